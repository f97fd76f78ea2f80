//! 行情数据客户端边界
//!
//! 流水线只依赖 `MarketDataClient` trait；生产环境使用 `BinanceClient`，
//! 测试使用内存实现。

use crate::common::{
    api::{BinanceApi, BACKFILL_LIMIT},
    models::{Candle, DepthSample, Instrument, Symbol, TradeEvent},
    websocket::{BinanceStreamClient, FeedStream},
    AppConfig, Result,
};
use async_trait::async_trait;
use std::time::Duration;

/// 外部行情数据客户端
///
/// 订阅方法返回的 future 成功即表示订阅已建立；之后流中的 `Err` 项或流结束表示断线。
#[async_trait]
pub trait MarketDataClient: Send + Sync {
    /// 交易所全部品种元数据
    async fn get_tradable_instruments(&self) -> Result<Vec<Instrument>>;

    /// 历史K线回填，按时间升序，最后一根可能未收盘
    async fn get_candles(&self, symbol: &Symbol, interval: &str) -> Result<Vec<Candle>>;

    async fn subscribe_depth(&self, symbol: &Symbol, levels: usize) -> Result<FeedStream<DepthSample>>;

    async fn subscribe_trades(&self, symbol: &Symbol) -> Result<FeedStream<TradeEvent>>;

    async fn subscribe_candles(&self, symbol: &Symbol, interval: &str) -> Result<FeedStream<Candle>>;
}

/// 币安现货客户端：REST 负责元数据与回填，WebSocket 负责实时流
#[derive(Clone, Debug)]
pub struct BinanceClient {
    api: BinanceApi,
    streams: BinanceStreamClient,
}

impl BinanceClient {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api = BinanceApi::new(
            config.market.rest_url.clone(),
            Duration::from_secs(config.market.request_timeout_secs),
        )?;
        let streams = BinanceStreamClient::new(config.market.ws_url.clone());
        Ok(Self { api, streams })
    }
}

#[async_trait]
impl MarketDataClient for BinanceClient {
    async fn get_tradable_instruments(&self) -> Result<Vec<Instrument>> {
        self.api.get_tradable_instruments().await
    }

    async fn get_candles(&self, symbol: &Symbol, interval: &str) -> Result<Vec<Candle>> {
        self.api.get_klines(symbol, interval, BACKFILL_LIMIT).await
    }

    async fn subscribe_depth(&self, symbol: &Symbol, levels: usize) -> Result<FeedStream<DepthSample>> {
        self.streams.depth_stream(symbol, levels).await
    }

    async fn subscribe_trades(&self, symbol: &Symbol) -> Result<FeedStream<TradeEvent>> {
        self.streams.trade_stream(symbol).await
    }

    async fn subscribe_candles(&self, symbol: &Symbol, interval: &str) -> Result<FeedStream<Candle>> {
        self.streams.kline_stream(symbol, interval).await
    }
}
