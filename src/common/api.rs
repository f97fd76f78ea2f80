use crate::common::{
    models::{candle_from_rest_row, Candle, ExchangeInfo, Instrument, Symbol},
    AppError, Result,
};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

/// 回填时请求的历史K线根数（币安默认上限）
pub const BACKFILL_LIMIT: usize = 500;

/// 解析失败时日志中保留的响应字符数
const RESPONSE_PREVIEW_CHARS: usize = 1000;

/// 按字符截断响应文本，不会切在多字节字符中间
fn response_preview(text: &str, max_chars: usize) -> &str {
    text.char_indices().nth(max_chars).map_or(text, |(end, _)| &text[..end])
}

/// 将时间间隔转换为毫秒数
/// 例如: "1m" -> 60000, "15m" -> 900000, "1h" -> 3600000
pub fn interval_to_milliseconds(interval: &str) -> Option<i64> {
    let last_char = interval.chars().last()?;
    let value: i64 = interval[..interval.len() - last_char.len_utf8()].parse().ok()?;
    if value <= 0 {
        return None;
    }

    match last_char {
        'm' => Some(value * 60 * 1000),            // 分钟
        'h' => Some(value * 60 * 60 * 1000),       // 小时
        'd' => Some(value * 24 * 60 * 60 * 1000),  // 天
        'w' => Some(value * 7 * 24 * 60 * 60 * 1000), // 周
        _ => None,
    }
}

/// 币安现货 REST 客户端
#[derive(Clone, Debug)]
pub struct BinanceApi {
    api_url: String,
    client: Client,
}

impl BinanceApi {
    /// 创建新的API客户端实例
    pub fn new(api_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let api_url = api_url.into();
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::ApiError(format!("创建HTTP客户端失败: {}", e)))?;
        info!(target: "api", log_type = "low_freq", endpoint = %api_url, "初始化币安REST客户端");
        Ok(Self { api_url, client })
    }

    /// 获取交易所信息
    #[instrument(target = "api", skip(self), err)]
    pub async fn get_exchange_info(&self) -> Result<ExchangeInfo> {
        let url = format!("{}/api/v3/exchangeInfo", self.api_url);
        debug!(target: "api", "发送获取交易所信息请求: {}", url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            let api_error = AppError::ApiError(format!("获取交易所信息失败: {} - {}", status, text));
            error!(
                target: "api",
                status = %status,
                error.summary = api_error.get_error_type_summary(),
                error.details = %api_error,
                "API响应状态错误"
            );
            return Err(api_error);
        }

        let text = response.text().await?;
        let info: ExchangeInfo = serde_json::from_str(&text).map_err(|e| {
            error!(
                target: "api",
                response_preview = %response_preview(&text, RESPONSE_PREVIEW_CHARS),
                "解析交易所信息JSON失败: {}", e
            );
            AppError::JsonError(e)
        })?;
        debug!(target: "api", symbol_count = info.symbols.len(), "成功解析交易所信息");
        Ok(info)
    }

    /// 获取全部品种元数据
    pub async fn get_tradable_instruments(&self) -> Result<Vec<Instrument>> {
        let info = self.get_exchange_info().await?;
        Ok(info.symbols.into_iter().map(Instrument::from).collect())
    }

    /// 获取历史K线，最后一根视为未收盘
    #[instrument(target = "api", skip(self, symbol), fields(symbol = %symbol), err)]
    pub async fn get_klines(&self, symbol: &Symbol, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let url = format!("{}/api/v3/klines", self.api_url);
        let limit_str = limit.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol.as_str()), ("interval", interval), ("limit", limit_str.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            return Err(AppError::ApiError(format!(
                "获取 {} 的K线失败: {} - {}",
                symbol, status, text
            )));
        }

        let rows: Vec<Vec<serde_json::Value>> = response.json().await?;
        let last = rows.len().saturating_sub(1);
        let candles = rows
            .iter()
            .enumerate()
            .map(|(i, row)| candle_from_rest_row(row, i != last))
            .collect::<Result<Vec<_>>>()?;

        debug!(target: "api", %symbol, interval, count = candles.len(), "历史K线获取成功");
        Ok(candles)
    }
}
