//! 领域数据模型与币安原始载荷
//!
//! 所有价格、数量一律使用 `Decimal`，禁止在阈值比较中使用二进制浮点。

use crate::common::{AppError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 交易品种标识（基础资产+计价资产，例如 ETHBTC）
///
/// 启动发现后不可变，进程生命周期内品种全集固定。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 订阅流名称使用小写品种名
    pub fn stream_name(&self) -> String {
        self.0.to_lowercase()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::new(s)
    }
}

/// 交易所元数据中的一个可交易品种
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrument {
    pub symbol: Symbol,
    pub base_asset: String,
    pub quote_asset: String,
    pub status: String,
}

impl Instrument {
    pub fn is_trading(&self) -> bool {
        self.status == "TRADING"
    }
}

/// 一根K线。`is_final = false` 表示当前周期尚未收盘
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub is_final: bool,
}

/// 盘口深度快照：最优买卖价量 + 前N档数量之和
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepthSample {
    pub best_bid_price: Decimal,
    pub best_bid_qty: Decimal,
    pub best_ask_price: Decimal,
    pub best_ask_qty: Decimal,
    pub bid_sum: Decimal,
    pub ask_sum: Decimal,
}

/// 一笔成交
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeEvent {
    /// 交易所成交时间（毫秒）
    pub trade_time_ms: i64,
    pub price: Decimal,
    pub quantity: Decimal,
    /// 买方是否为挂单方
    pub is_buyer_maker: bool,
}

/// 解析币安字符串数值
pub fn parse_decimal(field: &str, value: &str) -> Result<Decimal> {
    Decimal::from_str(value)
        .map_err(|e| AppError::ParseError(format!("字段 {} 无法解析为十进制数 '{}': {}", field, value, e)))
}

//=============================================================================
// 币安 REST 载荷
//=============================================================================

/// `/api/v3/exchangeInfo` 响应（只保留需要的字段）
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
}

impl From<SymbolInfo> for Instrument {
    fn from(info: SymbolInfo) -> Self {
        Instrument {
            symbol: Symbol::new(info.symbol),
            base_asset: info.base_asset,
            quote_asset: info.quote_asset,
            status: info.status,
        }
    }
}

/// `/api/v3/klines` 单行：
/// `[openTime, open, high, low, close, volume, closeTime, ...]`
pub fn candle_from_rest_row(row: &[serde_json::Value], is_final: bool) -> Result<Candle> {
    if row.len() < 6 {
        return Err(AppError::DataError(format!("K线数组长度不足: {}", row.len())));
    }
    let open_time = row[0]
        .as_i64()
        .ok_or_else(|| AppError::ParseError("K线开盘时间不是整数".to_string()))?;
    let field = |idx: usize, name: &str| -> Result<Decimal> {
        let raw = row[idx]
            .as_str()
            .ok_or_else(|| AppError::ParseError(format!("K线字段 {} 不是字符串", name)))?;
        parse_decimal(name, raw)
    };
    Ok(Candle {
        open_time,
        open: field(1, "open")?,
        high: field(2, "high")?,
        low: field(3, "low")?,
        close: field(4, "close")?,
        volume: field(5, "volume")?,
        is_final,
    })
}

//=============================================================================
// 币安 WebSocket 载荷
//=============================================================================

/// `<symbol>@depth<levels>@100ms` 部分深度推送
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPartialDepth {
    pub last_update_id: u64,
    pub bids: Vec<[String; 2]>,
    pub asks: Vec<[String; 2]>,
}

impl RawPartialDepth {
    /// 转换为深度快照，只统计前 `levels` 档
    pub fn to_sample(&self, levels: usize) -> Result<DepthSample> {
        let (best_bid_price, best_bid_qty) = best_level("bids", &self.bids)?;
        let (best_ask_price, best_ask_qty) = best_level("asks", &self.asks)?;
        Ok(DepthSample {
            best_bid_price,
            best_bid_qty,
            best_ask_price,
            best_ask_qty,
            bid_sum: sum_quantities("bids", &self.bids, levels)?,
            ask_sum: sum_quantities("asks", &self.asks, levels)?,
        })
    }
}

fn best_level(side: &str, levels: &[[String; 2]]) -> Result<(Decimal, Decimal)> {
    let first = levels
        .first()
        .ok_or_else(|| AppError::DataError(format!("深度推送的 {} 为空", side)))?;
    Ok((parse_decimal("price", &first[0])?, parse_decimal("quantity", &first[1])?))
}

fn sum_quantities(side: &str, levels: &[[String; 2]], limit: usize) -> Result<Decimal> {
    levels
        .iter()
        .take(limit)
        .try_fold(Decimal::ZERO, |acc, level| {
            parse_decimal(side, &level[1]).map(|qty| acc + qty)
        })
}

/// `<symbol>@trade` 逐笔成交推送
#[derive(Debug, Clone, Deserialize)]
pub struct RawTrade {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "q")]
    pub quantity: String,
    #[serde(rename = "T")]
    pub trade_time: i64,
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

impl TryFrom<RawTrade> for TradeEvent {
    type Error = AppError;

    fn try_from(raw: RawTrade) -> Result<Self> {
        Ok(TradeEvent {
            trade_time_ms: raw.trade_time,
            price: parse_decimal("price", &raw.price)?,
            quantity: parse_decimal("quantity", &raw.quantity)?,
            is_buyer_maker: raw.is_buyer_maker,
        })
    }
}

/// `<symbol>@kline_<interval>` K线推送
#[derive(Debug, Clone, Deserialize)]
pub struct RawKlineEvent {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "k")]
    pub kline: RawKline,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawKline {
    #[serde(rename = "t")]
    pub open_time: i64,
    #[serde(rename = "o")]
    pub open: String,
    #[serde(rename = "h")]
    pub high: String,
    #[serde(rename = "l")]
    pub low: String,
    #[serde(rename = "c")]
    pub close: String,
    #[serde(rename = "v")]
    pub volume: String,
    #[serde(rename = "x")]
    pub is_final: bool,
}

impl TryFrom<RawKline> for Candle {
    type Error = AppError;

    fn try_from(raw: RawKline) -> Result<Self> {
        Ok(Candle {
            open_time: raw.open_time,
            open: parse_decimal("open", &raw.open)?,
            high: parse_decimal("high", &raw.high)?,
            low: parse_decimal("low", &raw.low)?,
            close: parse_decimal("close", &raw.close)?,
            volume: parse_decimal("volume", &raw.volume)?,
            is_final: raw.is_final,
        })
    }
}
