//! 统一日志系统初始化模块
//!
//! 控制台输出、按天滚动的文件日志、以及按 log_type 分档的审计日志。

use crate::common::{audit_log::AuditLogLayer, LoggingConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// 自定义Guard trait，持有期间保证非阻塞写入器的缓冲会被刷新
pub trait LogGuard: Send {}

/// 空的Guard实现，用于文件日志未启用时的占位符
pub struct DummyGuard;

impl LogGuard for DummyGuard {}

impl LogGuard for tracing_appender::non_blocking::WorkerGuard {}

/// 初始化日志系统，返回的 guard 生命周期由 main 函数管理
pub fn init_logging(config: &LoggingConfig) -> Box<dyn LogGuard> {
    if let Err(e) = std::fs::create_dir_all(&config.log_dir) {
        eprintln!("警告：无法创建日志目录 {}: {}", config.log_dir, e);
    }

    let audit_layer = match AuditLogLayer::open(&config.log_dir) {
        Ok(layer) => Some(layer),
        Err(e) => {
            eprintln!("警告：无法初始化审计日志 {}: {}", config.log_dir, e);
            None
        }
    };

    // RUST_LOG 优先于配置文件
    let filter_str = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        format!("{},hyper=warn,reqwest=warn,tungstenite=warn,tokio_tungstenite=warn", config.log_level)
    });
    let filter = || EnvFilter::new(&filter_str);

    let console_layer = config
        .enable_console_output
        .then(|| fmt::layer().with_target(true).with_filter(filter()));

    let (file_layer, guard): (Option<_>, Box<dyn LogGuard>) = if config.enable_file_output {
        let appender = tracing_appender::rolling::daily(&config.log_dir, "signal_server.log");
        let (writer, worker_guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .json()
            .with_writer(writer)
            .with_filter(filter());
        (Some(layer), Box::new(worker_guard))
    } else {
        (None, Box::new(DummyGuard))
    };

    let registry = Registry::default()
        .with(console_layer)
        .with(file_layer)
        .with(audit_layer.map(|layer| layer.with_filter(filter())));

    if let Err(e) = registry.try_init() {
        eprintln!("日志系统已初始化过，跳过: {}", e);
    }

    eprintln!("统一日志系统初始化完成，过滤器: {}", filter_str);
    guard
}
