//! 信号服务配置模块

use crate::common::{api::interval_to_milliseconds, AppError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// 系统配置常量
pub mod constants {
    /// 默认配置文件路径
    pub const DEFAULT_CONFIG_PATH: &str = "config/SignalServerConfig.toml";

    /// 默认看板端口
    pub const DEFAULT_PORT: u16 = 4000;

    /// 币安现货 REST 端点
    pub const BINANCE_REST_URL: &str = "https://api.binance.com";

    /// 币安现货 WebSocket 端点
    pub const BINANCE_WS_URL: &str = "wss://stream.binance.com:9443/ws";

    /// 逐笔成交保留窗口（秒）
    pub const DEFAULT_TRADE_RETENTION_SECS: u64 = 10;

    /// 盘口档位之和的历史长度
    pub const DEFAULT_DEPTH_HISTORY_LEN: usize = 33;
}

use constants::*;

/// 信号服务总配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 看板服务配置
    pub server: ServerConfig,

    /// 行情源配置
    pub market: MarketConfig,

    /// 启动调度配置
    pub scheduler: SchedulerConfig,

    /// 聚合窗口配置
    pub aggregation: AggregationConfig,

    /// 指标参数
    pub indicator: IndicatorConfig,

    /// 信号规则列表
    pub rules: Vec<RuleConfig>,

    /// 日志配置
    pub logging: LoggingConfig,
}

/// 看板服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听端口
    pub port: u16,

    /// 是否启动 WebSocket 看板
    pub enable_dashboard: bool,
}

/// 行情源配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub rest_url: String,
    pub ws_url: String,

    /// K线周期
    pub candle_interval: String,

    /// 深度订阅档位
    pub depth_levels: usize,

    /// 被跟踪品种的计价资产
    pub quote_currency: String,

    /// 用于交叉筛选的参考计价资产
    pub reference_currency: String,

    /// 无论是否通过筛选都要跟踪的品种（放在最前面）
    pub always_include: Vec<String>,

    /// 最多跟踪的品种数
    pub max_tracked_symbols: usize,

    /// 单次 REST 请求超时（秒）
    pub request_timeout_secs: u64,
}

/// 启动调度与重试配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 相邻品种启动之间的间隔（毫秒）
    ///
    /// 每个品种建立三个 WebSocket 连接，币安限制单 IP 每 5 分钟新建 300 个连接。
    /// 跟踪品种较多时应让 `max(startup_delay_ms, 2 * subscription_stagger_ms)` 不小于 3000。
    pub startup_delay_ms: u64,

    /// 同一品种三路订阅之间的间隔（毫秒）
    pub subscription_stagger_ms: u64,

    /// 同时处于启动阶段的品种上限
    pub max_concurrent_startup: usize,

    /// 单路订阅连续失败的最大重试次数
    pub max_retry_attempts: u32,

    /// 退避初始值（毫秒）
    pub initial_backoff_ms: u64,

    /// 退避上限（毫秒）
    pub max_backoff_ms: u64,

    /// 连接存活超过该时长（秒）后失败计数清零
    pub stable_session_secs: u64,

    /// 历史K线回填超时（秒）
    pub backfill_timeout_secs: u64,

    /// 品种发现超时（秒）
    pub discovery_timeout_secs: u64,

    /// 品种发现重试次数
    pub discovery_retries: u32,

    /// 关闭时等待各品种任务退出的时长（秒）
    pub shutdown_timeout_secs: u64,
}

/// 聚合窗口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// 聚合节拍（毫秒）
    pub tick_interval_ms: u64,

    /// 逐笔成交保留窗口（秒）
    pub trade_retention_secs: u64,

    /// 盘口档位之和的历史长度
    pub depth_history_len: usize,

    /// 每个品种事件通道容量
    pub channel_capacity: usize,
}

/// StochRSI 参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub rsi_period: usize,
    pub stochastic_period: usize,
    pub k_period: usize,
    pub d_period: usize,
}

/// 单条信号规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// 信号名称
    pub name: String,

    pub author_name: String,

    /// 作者唯一键，参与规则键的生成
    pub author_key: String,

    /// 买入条件：窗口成交量 × 卖一价 必须超过该值
    #[serde(default = "default_min_notional")]
    pub min_notional: Decimal,

    /// 买入条件：指标值必须超过该值
    #[serde(default = "default_indicator_upper")]
    pub indicator_upper: Decimal,

    /// 止损百分比（负数）
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: Decimal,

    /// 止盈百分比
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: Decimal,

    /// 卖出后重新买入前的冷却时间（秒），默认无冷却
    #[serde(default)]
    pub cooldown_secs: Option<u64>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别 (trace, debug, info, warn, error)
    pub log_level: String,

    /// 日志目录
    pub log_dir: String,

    /// 是否输出到控制台
    pub enable_console_output: bool,

    /// 是否输出滚动日志文件
    pub enable_file_output: bool,
}

fn default_min_notional() -> Decimal {
    dec!(10.0)
}

fn default_indicator_upper() -> Decimal {
    dec!(69)
}

fn default_stop_loss_pct() -> Decimal {
    dec!(-0.81)
}

fn default_take_profit_pct() -> Decimal {
    dec!(1.81)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            enable_dashboard: true,
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            rest_url: BINANCE_REST_URL.to_string(),
            ws_url: BINANCE_WS_URL.to_string(),
            candle_interval: "15m".to_string(),
            depth_levels: 10,
            quote_currency: "BTC".to_string(),
            reference_currency: "USDT".to_string(),
            always_include: vec!["BTCUSDT".to_string()],
            max_tracked_symbols: 200,
            request_timeout_secs: 10,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            startup_delay_ms: 3100,
            subscription_stagger_ms: 1500,
            max_concurrent_startup: 1,
            max_retry_attempts: 5,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            stable_session_secs: 60,
            backfill_timeout_secs: 10,
            discovery_timeout_secs: 15,
            discovery_retries: 3,
            shutdown_timeout_secs: 5,
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            trade_retention_secs: DEFAULT_TRADE_RETENTION_SECS,
            depth_history_len: DEFAULT_DEPTH_HISTORY_LEN,
            channel_capacity: 1024,
        }
    }
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            rsi_period: 100,
            stochastic_period: 100,
            k_period: 1,
            d_period: 1,
        }
    }
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            name: "SIGNAL TEST".to_string(),
            author_name: "your_signal_author_name".to_string(),
            author_key: "your_unique_author_key".to_string(),
            min_notional: default_min_notional(),
            indicator_upper: default_indicator_upper(),
            stop_loss_pct: default_stop_loss_pct(),
            take_profit_pct: default_take_profit_pct(),
            cooldown_secs: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "logs".to_string(),
            enable_console_output: true,
            enable_file_output: true,
        }
    }
}

impl RuleConfig {
    /// 规则键：去掉空白的信号名 + 作者键
    pub fn rule_key(&self) -> String {
        let compact: String = self.name.chars().filter(|c| !c.is_whitespace()).collect();
        format!("{}{}", compact, self.author_key)
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: Self = toml::from_str(&content)?;

        // 未配置任何规则时使用默认测试规则
        if config.rules.is_empty() {
            config.rules.push(RuleConfig::default());
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// 环境变量覆盖，目前只有 PORT
    pub fn apply_env_overrides(&mut self) {
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
            self.server.port = port;
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if interval_to_milliseconds(&self.market.candle_interval).is_none() {
            return Err(AppError::ConfigError(format!(
                "无效的K线周期: {}",
                self.market.candle_interval
            )));
        }

        if self.market.depth_levels == 0 {
            return Err(AppError::ConfigError("深度档位必须大于0".to_string()));
        }

        if self.market.max_tracked_symbols == 0 {
            return Err(AppError::ConfigError("最大跟踪品种数必须大于0".to_string()));
        }

        if self.scheduler.max_concurrent_startup == 0 {
            return Err(AppError::ConfigError("并发启动数必须大于0".to_string()));
        }

        if self.scheduler.initial_backoff_ms > self.scheduler.max_backoff_ms {
            return Err(AppError::ConfigError("退避初始值不能大于退避上限".to_string()));
        }

        if self.aggregation.tick_interval_ms == 0 {
            return Err(AppError::ConfigError("聚合节拍必须大于0".to_string()));
        }

        if self.aggregation.trade_retention_secs == 0 {
            return Err(AppError::ConfigError("成交保留窗口必须大于0".to_string()));
        }

        if self.aggregation.depth_history_len == 0 {
            return Err(AppError::ConfigError("盘口历史长度必须大于0".to_string()));
        }

        if self.aggregation.channel_capacity == 0 {
            return Err(AppError::ConfigError("事件通道容量必须大于0".to_string()));
        }

        let ind = &self.indicator;
        if ind.rsi_period == 0 || ind.stochastic_period == 0 || ind.k_period == 0 || ind.d_period == 0 {
            return Err(AppError::ConfigError("StochRSI 各周期必须大于0".to_string()));
        }

        if self.rules.is_empty() {
            return Err(AppError::ConfigError("至少需要一条信号规则".to_string()));
        }

        let mut seen = HashSet::new();
        for rule in &self.rules {
            if rule.stop_loss_pct >= rule.take_profit_pct {
                return Err(AppError::ConfigError(format!(
                    "规则 {} 的止损 {} 必须小于止盈 {}",
                    rule.name, rule.stop_loss_pct, rule.take_profit_pct
                )));
            }
            if !seen.insert(rule.rule_key()) {
                return Err(AppError::ConfigError(format!("重复的规则键: {}", rule.rule_key())));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_original_constants() {
        let mut config = AppConfig::default();
        config.rules.push(RuleConfig::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.aggregation.depth_history_len, 33);
        assert_eq!(config.aggregation.trade_retention_secs, 10);
        assert_eq!(config.indicator.rsi_period, 100);
        assert_eq!(config.rules[0].rule_key(), "SIGNALTESTyour_unique_author_key");
    }

    #[test]
    fn loads_partial_file_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 5000

[aggregation]
tick_interval_ms = 500

[[rules]]
name = "FAST ONE"
author_name = "alice"
author_key = "k1"
min_notional = "25.5"
indicator_upper = "80"
"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.aggregation.tick_interval_ms, 500);
        assert_eq!(config.aggregation.depth_history_len, 33);
        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.rules[0].min_notional, dec!(25.5));
        assert_eq!(config.rules[0].stop_loss_pct, dec!(-0.81));
        assert_eq!(config.rules[0].rule_key(), "FASTONEk1");
    }

    #[test]
    fn rejects_inverted_stop_levels() {
        let mut config = AppConfig::default();
        config.rules.push(RuleConfig {
            stop_loss_pct: dec!(2),
            take_profit_pct: dec!(1),
            ..RuleConfig::default()
        });
        assert!(matches!(config.validate(), Err(AppError::ConfigError(_))));
    }

    #[test]
    fn rejects_duplicate_rule_keys() {
        let mut config = AppConfig::default();
        config.rules.push(RuleConfig::default());
        config.rules.push(RuleConfig { name: "SIGNAL  TEST".to_string(), ..RuleConfig::default() });
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_interval() {
        let mut config = AppConfig::default();
        config.rules.push(RuleConfig::default());
        config.market.candle_interval = "15x".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn port_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 5000").unwrap();

        std::env::set_var("PORT", "4321");
        let overridden = AppConfig::from_file(file.path()).unwrap();
        std::env::set_var("PORT", "not-a-port");
        let ignored = AppConfig::from_file(file.path()).unwrap();
        std::env::remove_var("PORT");

        assert_eq!(overridden.server.port, 4321);
        assert_eq!(ignored.server.port, 5000);
    }
}
