use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("URL parsing error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Symbol discovery failed: {0}")]
    DiscoveryError(String),

    #[error("Candle backfill failed: {0}")]
    BackfillError(String),

    #[error("Subscription error: {0}")]
    SubscriptionError(String),

    #[error("Web server error: {0}")]
    WebServerError(String),
}

impl AppError {
    /// 获取错误类型的简洁摘要，作为日志中稳定的错误分类字段
    pub fn get_error_type_summary(&self) -> &'static str {
        match self {
            // 行情数据获取
            AppError::ApiError(_) => "market_data_request_failed",
            AppError::HttpError(_) => "market_data_connection_failed",
            AppError::Timeout(_) => "market_data_request_timeout",
            AppError::DiscoveryError(_) => "symbol_discovery_failed",
            AppError::BackfillError(_) => "candle_backfill_failed",

            // 行情数据解析
            AppError::JsonError(_) => "market_data_parsing_failed",
            AppError::ParseError(_) => "market_data_format_invalid",
            AppError::DataError(_) => "market_data_validation_failed",

            // 实时订阅
            AppError::WebSocketError(_) => "realtime_feed_failed",
            AppError::SubscriptionError(_) => "realtime_subscription_failed",
            AppError::UrlParseError(_) => "market_endpoint_invalid",

            // 系统资源
            AppError::IoError(_) => "file_operation_failed",

            // 配置
            AppError::ConfigError(_) | AppError::TomlError(_) => "service_configuration_invalid",

            AppError::WebServerError(_) => "dashboard_server_failed",
        }
    }

    /// 检查错误是否为可重试类型
    ///
    /// 订阅监督器和发现流程据此决定是否继续重试
    pub fn is_retryable(&self) -> bool {
        match self {
            // 网络相关错误通常可重试
            AppError::HttpError(_)
            | AppError::ApiError(_)
            | AppError::WebSocketError(_)
            | AppError::SubscriptionError(_)
            | AppError::Timeout(_) => true,

            // 临时性系统资源错误可重试
            AppError::IoError(_) => true,

            // 解析错误、配置错误等不可重试
            AppError::JsonError(_)
            | AppError::ParseError(_)
            | AppError::DataError(_)
            | AppError::ConfigError(_)
            | AppError::TomlError(_)
            | AppError::UrlParseError(_) => false,

            // 已经是重试耗尽后的结论
            AppError::DiscoveryError(_) | AppError::BackfillError(_) => false,

            AppError::WebServerError(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_errors_are_retryable() {
        assert!(AppError::WebSocketError("closed".into()).is_retryable());
        assert!(AppError::Timeout("klines".into()).is_retryable());
        assert!(!AppError::ConfigError("bad".into()).is_retryable());
        assert!(!AppError::ParseError("x".into()).is_retryable());
    }

    #[test]
    fn summaries_are_stable() {
        assert_eq!(
            AppError::DiscoveryError("none".into()).get_error_type_summary(),
            "symbol_discovery_failed"
        );
        assert_eq!(
            AppError::SubscriptionError("drop".into()).get_error_type_summary(),
            "realtime_subscription_failed"
        );
    }
}
