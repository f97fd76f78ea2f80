//! 信号流水线
//!
//! ## 设计核心
//! 1.  **SymbolAggregator**: 每个品种一个独立任务，独占自己的滚动窗口、K线序列、指标和信号状态，无跨品种共享。
//! 2.  **通道通信**: 三路订阅（深度、成交、K线）把事件送入该品种的 MPSC 通道，按到达顺序串行处理。
//! 3.  **节拍**: 事件处理与聚合节拍在同一个任务的 `select!` 中交替执行，节拍永远看到之前的全部事件。
//! 4.  **IngestionScheduler**: 逐个错峰启动品种，监督订阅并按退避重试，耗尽后只终止该品种。

pub mod aggregator;
pub mod candles;
pub mod indicator;
pub mod scheduler;
pub mod signal_engine;
pub mod sink;
pub mod web_server;
pub mod window_store;


pub use aggregator::{AggregatorSettings, SymbolAggregator};
pub use candles::{CandleSeries, CandleUpdate};
pub use indicator::{IndicatorState, StochRsi};
pub use scheduler::{
    discover_symbols, select_cross_listed_symbols, IngestionScheduler, SchedulerHandle, StartupPolicy, StatusCounts,
    SymbolRegistry,
};
pub use signal_engine::{BuySignal, SellSignal, SignalEngine, SignalEvent, SignalKey, SignalRuleState};
pub use sink::{BroadcastSink, DashboardMessage, EventSink, FanoutSink, TracingSink};
pub use web_server::run_dashboard_server;
pub use window_store::{RollingWindowStore, WindowSnapshot};

use crate::common::models::{Candle, DepthSample, Symbol, TradeEvent};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// 单个品种的一路订阅
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    Candle,
    Depth,
    Trade,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Candle => "candle",
            FeedKind::Depth => "depth",
            FeedKind::Trade => "trade",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 送入品种任务通道的事件
#[derive(Debug, Clone)]
pub enum SymbolEvent {
    Depth(DepthSample),
    Trade(TradeEvent),
    Candle(Candle),
    /// 某路订阅已建立（或重连成功）
    FeedUp(FeedKind),
    /// 某路订阅重试耗尽
    FeedExhausted(FeedKind),
}

/// 品种生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolStatus {
    Initializing,
    Live,
    Terminated,
}

/// 最新成交价相对上一个节拍的方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceDirection {
    Up,
    Down,
    Flat,
}

impl PriceDirection {
    pub fn between(previous: Option<Decimal>, current: Option<Decimal>) -> Self {
        match (previous, current) {
            (Some(prev), Some(cur)) if cur > prev => PriceDirection::Up,
            (Some(prev), Some(cur)) if cur < prev => PriceDirection::Down,
            _ => PriceDirection::Flat,
        }
    }
}

/// 每个品种每个节拍产生的一条不可变指标快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub symbol: Symbol,
    pub timestamp_ms: i64,
    pub last_price: Option<Decimal>,
    pub price_direction: PriceDirection,
    pub volume_sum: Decimal,
    pub trade_count: usize,
    pub maker_ratio: Decimal,
    /// 带符号的盘口失衡比，分母为 0 时为 0
    pub depth_imbalance: Decimal,
    pub bid_sum: Option<Decimal>,
    pub ask_sum: Option<Decimal>,
    pub best_bid_price: Option<Decimal>,
    pub best_bid_qty: Option<Decimal>,
    pub best_ask_price: Option<Decimal>,
    pub best_ask_qty: Option<Decimal>,
    pub indicator: IndicatorState,
    pub last_close: Option<Decimal>,
    pub prev_close: Option<Decimal>,
}

impl MetricsSnapshot {
    /// 窗口成交量按卖一价折算的名义金额
    pub fn notional(&self) -> Option<Decimal> {
        self.best_ask_price.map(|ask| self.volume_sum * ask)
    }

    /// 最新K线收盘价低于上一根
    pub fn momentum_down(&self) -> bool {
        matches!((self.last_close, self.prev_close), (Some(last), Some(prev)) if last < prev)
    }
}
