//! 启动信号服务
//!
//! ## 执行流程
//! 1. 加载配置并初始化日志（guard 由 main 持有）
//! 2. 品种发现：失败直接退出
//! 3. 调度器在后台逐个错峰启动品种，每个品种一个独立任务
//! 4. 可选启动看板服务器
//! 5. Ctrl+C 后广播关闭信号，等待各任务退出

use anyhow::{Context, Result};
use clap::Parser;
use signal_server::common::{config::constants::DEFAULT_CONFIG_PATH, AppConfig, BinanceClient, MarketDataClient};
use signal_server::pipeline::{
    self, BroadcastSink, EventSink, FanoutSink, IngestionScheduler, StartupPolicy, TracingSink,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{error, info, instrument, span, trace, warn, Instrument, Level};

/// 看板广播通道容量
const DASHBOARD_CHANNEL_CAPACITY: usize = 4096;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Streams Binance spot market data and emits StochRSI buy/sell signals.", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = AppConfig::from_file(&args.config)
        .with_context(|| format!("无法加载配置文件 {}", args.config))?;

    // 1. ==================== 日志系统必须最先初始化 ====================
    let _guard = signal_server::common::logging_setup::init_logging(&config.logging);

    // 只记录不退出：品种任务内的 panic 由调度器收敛为该品种 Terminated
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let thread = std::thread::current();
        error!(
            target: "应用生命周期",
            thread = thread.name().unwrap_or("unnamed"),
            panic_info = %panic_info,
            "任务发生未捕获的Panic"
        );
        original_hook(panic_info);
    }));

    // 2. ==================== 创建运行时并启动应用 ====================
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("signal-io")
        .build()?;

    let main_span = span!(target: "应用生命周期", Level::INFO, "signal_server_lifecycle");
    let result = runtime.block_on(run_app(Arc::new(config), args.config).instrument(main_span));

    if let Err(e) = &result {
        error!(target: "应用生命周期", error = ?e, "应用因顶层错误而异常退出");
    } else {
        info!(target: "应用生命周期", log_type = "low_freq", "应用程序正常关闭");
    }

    runtime.shutdown_timeout(Duration::from_secs(5));
    result
}

#[instrument(target = "应用生命周期", skip_all, name = "run_app")]
async fn run_app(config: Arc<AppConfig>, config_path: String) -> Result<()> {
    info!(
        target: "应用生命周期",
        log_type = "low_freq",
        path = %config_path,
        port = config.server.port,
        rules = config.rules.len(),
        candle_interval = %config.market.candle_interval,
        "配置文件加载成功，信号服务启动中..."
    );
    trace!(target: "应用生命周期", config_details = ?config, "详细配置信息");

    let client: Arc<dyn MarketDataClient> = Arc::new(BinanceClient::from_config(&config)?);

    // 3. ==================== 品种发现（失败即退出） ====================
    let symbols = pipeline::discover_symbols(client.as_ref(), &config.market, &config.scheduler)
        .await
        .context("品种发现失败，服务退出")?;
    info!(target: "应用生命周期", log_type = "low_freq", symbol_count = symbols.len(), "待跟踪品种已确定");

    // 4. ==================== 事件出口 ====================
    let broadcast_sink = BroadcastSink::new(DASHBOARD_CHANNEL_CAPACITY);
    let mut fanout = FanoutSink::default().with(Arc::new(TracingSink));
    if config.server.enable_dashboard {
        fanout = fanout.with(Arc::new(broadcast_sink.clone()));
    }
    let sink: Arc<dyn EventSink> = Arc::new(fanout);

    // 5. ==================== 启动调度器与看板 ====================
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = IngestionScheduler::new(client, sink, &config);
    let handle = scheduler.start(
        symbols,
        StartupPolicy::from_config(&config.scheduler),
        shutdown_rx.clone(),
    );

    let dashboard = config.server.enable_dashboard.then(|| {
        tokio::spawn(pipeline::run_dashboard_server(
            config.server.port,
            broadcast_sink,
            scheduler.registry(),
            shutdown_rx.clone(),
        ))
    });

    // 6. ==================== 等待并处理关闭信号 ====================
    info!(target: "应用生命周期", "所有服务已启动，等待关闭信号 (Ctrl+C)...");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(target: "应用生命周期", error = %e, "无法监听 Ctrl+C，立即关闭");
    }
    info!(target: "应用生命周期", log_type = "low_freq", reason = "received_ctrl_c", "接收到关闭信号，开始优雅关闭");
    let _ = shutdown_tx.send(true);

    let shutdown_timeout = Duration::from_secs(config.scheduler.shutdown_timeout_secs + 1);
    if tokio::time::timeout(shutdown_timeout, handle.join()).await.is_err() {
        warn!(target: "应用生命周期", "调度器未能在超时内退出");
    }

    if let Some(task) = dashboard {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(target: "应用生命周期", error = %e, "看板服务器异常退出"),
            Err(e) => error!(target: "应用生命周期", task = "dashboard", panic = ?e, "看板任务在退出时发生 panic"),
        }
    }

    Ok(())
}
