// 导出共享模块
pub mod api;
pub mod audit_log;
pub mod client;
pub mod config;
pub mod error;
pub mod logging_setup;
pub mod models;
pub mod websocket;

// 重新导出常用类型，方便使用
pub use client::{BinanceClient, MarketDataClient};
pub use config::{
    AggregationConfig, AppConfig, IndicatorConfig, LoggingConfig, MarketConfig, RuleConfig, SchedulerConfig,
    ServerConfig,
};
pub use error::{AppError, Result};
pub use models::{Candle, DepthSample, Instrument, Symbol, TradeEvent};
pub use websocket::FeedStream;
