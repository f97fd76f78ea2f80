//! 启动调度器
//!
//! 负责品种发现，以及逐个错峰启动各品种的聚合器和三路订阅。
//!
//! - 相邻品种之间固定间隔启动，同时处于启动阶段的品种数受信号量限制，避免被行情源限流
//! - 同一品种的三路订阅之间同样错峰
//! - 每路订阅独立监督：断线按指数退避重试，重试耗尽只终止该品种
//! - 回填失败或超时只跳过该品种；只有品种发现失败是致命的

use crate::common::{
    models::Instrument, AppConfig, AppError, Candle, FeedStream, MarketConfig, MarketDataClient, Result,
    SchedulerConfig, Symbol,
};
use crate::pipeline::{
    aggregator::{wait_for_shutdown, AggregatorSettings, SymbolAggregator},
    sink::EventSink,
    FeedKind, SymbolEvent, SymbolStatus,
};
use futures::StreamExt;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// 同一品种三路订阅的建立顺序，每路一个独立连接
const FEED_ORDER: [FeedKind; 3] = [FeedKind::Candle, FeedKind::Depth, FeedKind::Trade];

/// 币安单个 IP 在 `CONNECTION_WINDOW` 内允许新建的 WebSocket 连接数
pub const CONNECTION_LIMIT_PER_WINDOW: u64 = 300;

const CONNECTION_WINDOW: Duration = Duration::from_secs(300);

//=============================================================================
// 品种发现
//=============================================================================

/// 交叉筛选：同时以参考资产和计价资产上市、且处于交易状态的基础资产
///
/// 按交易所返回顺序截断到 `max_tracked_symbols`，再把缺失的 `always_include` 放到最前面。
pub fn select_cross_listed_symbols(instruments: &[Instrument], market: &MarketConfig) -> Vec<Symbol> {
    let trading: Vec<&Instrument> = instruments.iter().filter(|i| i.is_trading()).collect();

    let reference_bases: HashSet<&str> = trading
        .iter()
        .filter(|i| i.quote_asset == market.reference_currency)
        .map(|i| i.base_asset.as_str())
        .collect();

    let mut seen = HashSet::new();
    let tracked: Vec<Symbol> = trading
        .iter()
        .filter(|i| i.quote_asset == market.quote_currency && reference_bases.contains(i.base_asset.as_str()))
        .map(|i| Symbol::new(format!("{}{}", i.base_asset, i.quote_asset)))
        .filter(|s| seen.insert(s.clone()))
        .take(market.max_tracked_symbols)
        .collect();

    let mut selected: Vec<Symbol> = Vec::with_capacity(tracked.len() + market.always_include.len());
    for always in &market.always_include {
        let symbol = Symbol::new(always.as_str());
        if !tracked.contains(&symbol) && !selected.contains(&symbol) {
            selected.push(symbol);
        }
    }
    selected.extend(tracked);
    selected
}

/// 查询可交易品种并筛选，带超时和有限次重试；失败对进程是致命的
///
/// 不可重试的错误（如响应格式错误）直接失败，不再消耗剩余重试次数。
#[instrument(target = "品种发现", skip_all)]
pub async fn discover_symbols(
    client: &dyn MarketDataClient,
    market: &MarketConfig,
    scheduler: &SchedulerConfig,
) -> Result<Vec<Symbol>> {
    let total_attempts = scheduler.discovery_retries + 1;
    let request_timeout = Duration::from_secs(scheduler.discovery_timeout_secs);
    let mut attempts_made = 0;
    let mut last_error = None;

    for attempt in 1..=total_attempts {
        attempts_made = attempt;
        let error = match time::timeout(request_timeout, client.get_tradable_instruments()).await {
            Ok(Ok(instruments)) => {
                let symbols = select_cross_listed_symbols(&instruments, market);
                info!(
                    target: "品种发现",
                    log_type = "low_freq",
                    instruments = instruments.len(),
                    selected = symbols.len(),
                    "品种发现完成"
                );
                return Ok(symbols);
            }
            Ok(Err(e)) => e,
            Err(_) => AppError::Timeout(format!("获取交易品种超过 {} 秒", scheduler.discovery_timeout_secs)),
        };

        let retryable = error.is_retryable();
        warn!(
            target: "品种发现",
            log_type = "retry",
            attempt,
            total_attempts,
            retryable,
            error_type = error.get_error_type_summary(),
            error = %error,
            "获取交易品种失败"
        );
        last_error = Some(error);
        if !retryable {
            break;
        }
        if attempt < total_attempts {
            time::sleep(Duration::from_millis(scheduler.initial_backoff_ms * attempt as u64)).await;
        }
    }

    let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
    Err(AppError::DiscoveryError(format!(
        "尝试 {} 次后仍无法获取交易品种: {}",
        attempts_made, reason
    )))
}

//=============================================================================
// 品种注册表
//=============================================================================

/// 各状态的品种数量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub initializing: usize,
    pub live: usize,
    pub terminated: usize,
}

/// 调度器持有的品种 → 状态 映射，各品种状态由其聚合器通过 watch 发布
#[derive(Clone, Default)]
pub struct SymbolRegistry {
    inner: Arc<RwLock<HashMap<Symbol, watch::Receiver<SymbolStatus>>>>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn register(&self, symbol: Symbol, status_rx: watch::Receiver<SymbolStatus>) {
        self.inner.write().await.insert(symbol, status_rx);
    }

    pub async fn status(&self, symbol: &Symbol) -> Option<SymbolStatus> {
        self.inner.read().await.get(symbol).map(current_status)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn counts(&self) -> StatusCounts {
        let guard = self.inner.read().await;
        let mut counts = StatusCounts::default();
        for rx in guard.values() {
            match current_status(rx) {
                SymbolStatus::Initializing => counts.initializing += 1,
                SymbolStatus::Live => counts.live += 1,
                SymbolStatus::Terminated => counts.terminated += 1,
            }
        }
        counts
    }
}

/// 品种当前状态；发布端已释放（品种任务 panic 退出）时视为 Terminated
fn current_status(rx: &watch::Receiver<SymbolStatus>) -> SymbolStatus {
    if rx.has_changed().is_err() {
        return SymbolStatus::Terminated;
    }
    *rx.borrow()
}

//=============================================================================
// 调度器
//=============================================================================

/// 启动节奏
#[derive(Debug, Clone, Copy)]
pub struct StartupPolicy {
    pub max_concurrent_startup: usize,
    pub startup_delay: Duration,
}

impl StartupPolicy {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            max_concurrent_startup: config.max_concurrent_startup.max(1),
            startup_delay: Duration::from_millis(config.startup_delay_ms),
        }
    }
}

/// 按启动节奏估算一个连接窗口内新建的连接数
///
/// 并发启动数为 1 时，相邻品种的间隔至少是 `startup_delay` 与两次订阅错峰中的较大者。
pub fn estimated_connections_per_window(
    total_symbols: usize,
    startup_delay: Duration,
    subscription_stagger: Duration,
) -> u64 {
    let period_ms = startup_delay.max(subscription_stagger * 2).as_millis().max(1);
    let symbols_per_window = (CONNECTION_WINDOW.as_millis() / period_ms + 1) as u64;
    symbols_per_window.min(total_symbols as u64) * FEED_ORDER.len() as u64
}

/// 单路订阅的重试策略
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    stable_session: Duration,
}

impl RetryPolicy {
    fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            max_attempts: config.max_retry_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            stable_session: Duration::from_secs(config.stable_session_secs),
        }
    }
}

/// 各品种任务共享的只读上下文
struct SymbolContext {
    client: Arc<dyn MarketDataClient>,
    sink: Arc<dyn EventSink>,
    settings: AggregatorSettings,
    retry: RetryPolicy,
    candle_interval: String,
    depth_levels: usize,
    backfill_timeout: Duration,
    subscription_stagger: Duration,
    channel_capacity: usize,
    shutdown_timeout: Duration,
}

pub struct IngestionScheduler {
    ctx: Arc<SymbolContext>,
    registry: SymbolRegistry,
}

/// 启动任务句柄
pub struct SchedulerHandle {
    task: JoinHandle<()>,
    registry: SymbolRegistry,
}

impl SchedulerHandle {
    pub fn registry(&self) -> &SymbolRegistry {
        &self.registry
    }

    /// 等待所有品种任务退出
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(target: "启动调度器", error = %e, "调度任务异常退出");
        }
    }
}

impl IngestionScheduler {
    pub fn new(client: Arc<dyn MarketDataClient>, sink: Arc<dyn EventSink>, config: &AppConfig) -> Self {
        let ctx = SymbolContext {
            client,
            sink,
            settings: AggregatorSettings::from_config(config),
            retry: RetryPolicy::from_config(&config.scheduler),
            candle_interval: config.market.candle_interval.clone(),
            depth_levels: config.market.depth_levels,
            backfill_timeout: Duration::from_secs(config.scheduler.backfill_timeout_secs),
            subscription_stagger: Duration::from_millis(config.scheduler.subscription_stagger_ms),
            channel_capacity: config.aggregation.channel_capacity,
            shutdown_timeout: Duration::from_secs(config.scheduler.shutdown_timeout_secs),
        };
        Self {
            ctx: Arc::new(ctx),
            registry: SymbolRegistry::new(),
        }
    }

    pub fn registry(&self) -> SymbolRegistry {
        self.registry.clone()
    }

    /// 在后台逐个启动品种，立即返回句柄
    pub fn start(
        &self,
        symbols: Vec<Symbol>,
        policy: StartupPolicy,
        shutdown_rx: watch::Receiver<bool>,
    ) -> SchedulerHandle {
        let task = tokio::spawn(run_startup(
            self.ctx.clone(),
            self.registry.clone(),
            symbols,
            policy,
            shutdown_rx,
        ));
        SchedulerHandle {
            task,
            registry: self.registry.clone(),
        }
    }
}

#[instrument(target = "启动调度器", skip_all, fields(symbols = symbols.len()))]
async fn run_startup(
    ctx: Arc<SymbolContext>,
    registry: SymbolRegistry,
    symbols: Vec<Symbol>,
    policy: StartupPolicy,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(
        target: "启动调度器",
        log_type = "low_freq",
        total = symbols.len(),
        max_concurrent = policy.max_concurrent_startup,
        delay_ms = policy.startup_delay.as_millis() as u64,
        "开始错峰启动品种"
    );

    let estimated = estimated_connections_per_window(symbols.len(), policy.startup_delay, ctx.subscription_stagger)
        .saturating_mul(policy.max_concurrent_startup as u64);
    if estimated > CONNECTION_LIMIT_PER_WINDOW {
        warn!(
            target: "启动调度器",
            log_type = "low_freq",
            estimated,
            limit = CONNECTION_LIMIT_PER_WINDOW,
            "启动节奏可能超过行情源的连接频率限制，后启动的品种可能被拒绝连接；请调大 startup_delay_ms 或 subscription_stagger_ms"
        );
    }

    let semaphore = Arc::new(Semaphore::new(policy.max_concurrent_startup));
    let mut tasks = JoinSet::new();
    let mut interrupted = false;

    for (index, symbol) in symbols.into_iter().enumerate() {
        if index > 0 && !sleep_or_shutdown(policy.startup_delay, &mut shutdown_rx).await {
            interrupted = true;
            break;
        }

        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                interrupted = true;
                break;
            }
        };

        let (status_tx, status_rx) = watch::channel(SymbolStatus::Initializing);
        registry.register(symbol.clone(), status_rx).await;
        debug!(target: "启动调度器", symbol = %symbol, index, "启动品种");

        tasks.spawn(run_symbol(ctx.clone(), symbol, status_tx, permit, shutdown_rx.clone()));
    }

    if !interrupted {
        info!(target: "启动调度器", log_type = "low_freq", started = tasks.len(), "全部品种已进入启动流程");
    }

    loop {
        tokio::select! {
            joined = tasks.join_next() => match joined {
                None => break,
                Some(Err(e)) => error!(target: "启动调度器", error = %e, "品种任务异常退出，仅该品种终止"),
                Some(Ok(())) => {}
            },
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                let drain = async { while tasks.join_next().await.is_some() {} };
                if time::timeout(ctx.shutdown_timeout, drain).await.is_err() {
                    warn!(target: "启动调度器", remaining = tasks.len(), "等待品种任务退出超时，强制中止");
                    tasks.abort_all();
                }
                break;
            }
        }
    }

    let counts = registry.counts().await;
    info!(
        target: "启动调度器",
        log_type = "low_freq",
        live = counts.live,
        terminated = counts.terminated,
        "调度器已停止"
    );
}

/// 带超时的历史K线回填，失败与超时统一为 `BackfillError`
pub(crate) async fn fetch_backfill(
    client: &dyn MarketDataClient,
    symbol: &Symbol,
    interval: &str,
    backfill_timeout: Duration,
) -> Result<Vec<Candle>> {
    match time::timeout(backfill_timeout, client.get_candles(symbol, interval)).await {
        Ok(Ok(candles)) => Ok(candles),
        Ok(Err(e)) => Err(AppError::BackfillError(format!(
            "{} [{}]: {}",
            symbol,
            e.get_error_type_summary(),
            e
        ))),
        Err(_) => Err(AppError::BackfillError(format!(
            "{} 回填超过 {} 秒",
            symbol,
            backfill_timeout.as_secs()
        ))),
    }
}

/// 单个品种：回填 → 启动聚合器 → 错峰建立三路订阅 → 等待聚合器结束
#[instrument(target = "品种启动", skip_all, fields(symbol = %symbol))]
async fn run_symbol(
    ctx: Arc<SymbolContext>,
    symbol: Symbol,
    status_tx: watch::Sender<SymbolStatus>,
    permit: OwnedSemaphorePermit,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let backfill = match fetch_backfill(ctx.client.as_ref(), &symbol, &ctx.candle_interval, ctx.backfill_timeout).await {
        Ok(candles) => candles,
        Err(e) => {
            warn!(
                target: "品种启动",
                error_type = e.get_error_type_summary(),
                error = %e,
                "历史K线回填失败，跳过该品种"
            );
            status_tx.send_replace(SymbolStatus::Terminated);
            return;
        }
    };

    let (events_tx, events_rx) = mpsc::channel(ctx.channel_capacity);
    let aggregator = SymbolAggregator::new(symbol.clone(), backfill, &ctx.settings, ctx.sink.clone(), status_tx);
    let aggregator_task = tokio::spawn(aggregator.run(events_rx, shutdown_rx.clone()));

    let mut feeds = JoinSet::new();
    for (index, kind) in FEED_ORDER.into_iter().enumerate() {
        if index > 0 && !sleep_or_shutdown(ctx.subscription_stagger, &mut shutdown_rx).await {
            break;
        }
        feeds.spawn(supervise_feed(
            ctx.clone(),
            symbol.clone(),
            kind,
            events_tx.clone(),
            shutdown_rx.clone(),
        ));
    }
    drop(events_tx);
    drop(permit);

    if let Err(e) = aggregator_task.await {
        error!(target: "品种启动", error = %e, "聚合器任务异常退出，仅该品种终止");
    }
    feeds.abort_all();
    debug!(target: "品种启动", "品种任务已结束");
}

enum FeedOutcome {
    /// 订阅出错或流结束
    Dropped(AppError),
    /// 聚合器已退出
    ReceiverClosed,
    Shutdown,
}

async fn open_feed(ctx: &SymbolContext, symbol: &Symbol, kind: FeedKind) -> Result<FeedStream<SymbolEvent>> {
    let stream = match kind {
        FeedKind::Candle => ctx
            .client
            .subscribe_candles(symbol, &ctx.candle_interval)
            .await?
            .map(|item| item.map(SymbolEvent::Candle))
            .boxed(),
        FeedKind::Depth => ctx
            .client
            .subscribe_depth(symbol, ctx.depth_levels)
            .await?
            .map(|item| item.map(SymbolEvent::Depth))
            .boxed(),
        FeedKind::Trade => ctx
            .client
            .subscribe_trades(symbol)
            .await?
            .map(|item| item.map(SymbolEvent::Trade))
            .boxed(),
    };
    Ok(stream)
}

/// 把一路订阅的事件泵入品种通道，直到断线、聚合器退出或关闭
async fn pump(
    mut stream: FeedStream<SymbolEvent>,
    events_tx: &mpsc::Sender<SymbolEvent>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> FeedOutcome {
    loop {
        tokio::select! {
            item = stream.next() => match item {
                Some(Ok(event)) => {
                    if events_tx.send(event).await.is_err() {
                        return FeedOutcome::ReceiverClosed;
                    }
                }
                Some(Err(e)) => return FeedOutcome::Dropped(e),
                None => return FeedOutcome::Dropped(AppError::SubscriptionError("订阅流已结束".to_string())),
            },
            _ = wait_for_shutdown(shutdown_rx) => return FeedOutcome::Shutdown,
        }
    }
}

/// 监督一路订阅：建立 → 泵送 → 断线后指数退避重试
///
/// 连接存活超过 `stable_session` 后失败计数清零；连续失败超过上限，
/// 或遇到不可重试的错误时，通知聚合器终止。
#[instrument(target = "订阅监督", skip_all, fields(symbol = %symbol, feed = %kind))]
async fn supervise_feed(
    ctx: Arc<SymbolContext>,
    symbol: Symbol,
    kind: FeedKind,
    events_tx: mpsc::Sender<SymbolEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let retry = ctx.retry;
    let mut attempts: u32 = 0;
    let mut backoff = retry.initial_backoff;

    loop {
        let session_started = Instant::now();
        let outcome = match open_feed(&ctx, &symbol, kind).await {
            Ok(stream) => {
                debug!(target: "订阅监督", "订阅已建立");
                if events_tx.send(SymbolEvent::FeedUp(kind)).await.is_err() {
                    return;
                }
                pump(stream, &events_tx, &mut shutdown_rx).await
            }
            Err(e) => FeedOutcome::Dropped(e),
        };

        let error = match outcome {
            FeedOutcome::ReceiverClosed | FeedOutcome::Shutdown => return,
            FeedOutcome::Dropped(error) => error,
        };

        if session_started.elapsed() >= retry.stable_session {
            attempts = 0;
            backoff = retry.initial_backoff;
        }
        attempts += 1;

        if !error.is_retryable() {
            error!(
                target: "订阅监督",
                attempt = attempts,
                error_type = error.get_error_type_summary(),
                error = %error,
                "订阅遇到不可重试的错误"
            );
            let _ = events_tx.send(SymbolEvent::FeedExhausted(kind)).await;
            return;
        }

        if attempts > retry.max_attempts {
            error!(
                target: "订阅监督",
                attempts = attempts - 1,
                error_type = error.get_error_type_summary(),
                error = %error,
                "订阅重试耗尽"
            );
            let _ = events_tx.send(SymbolEvent::FeedExhausted(kind)).await;
            return;
        }

        warn!(
            target: "订阅监督",
            log_type = "retry",
            attempt = attempts,
            max_attempts = retry.max_attempts,
            backoff_ms = backoff.as_millis() as u64,
            error_type = error.get_error_type_summary(),
            error = %error,
            "订阅断开，准备重连"
        );

        if !sleep_or_shutdown(backoff, &mut shutdown_rx).await {
            return;
        }
        backoff = (backoff * 2).min(retry.max_backoff);
    }
}

/// 睡眠指定时长；期间收到关闭信号返回 false
async fn sleep_or_shutdown(duration: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = time::sleep(duration) => true,
        _ = wait_for_shutdown(shutdown_rx) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instrument(base: &str, quote: &str, status: &str) -> Instrument {
        Instrument {
            symbol: Symbol::new(format!("{}{}", base, quote)),
            base_asset: base.to_string(),
            quote_asset: quote.to_string(),
            status: status.to_string(),
        }
    }

    fn instruments() -> Vec<Instrument> {
        vec![
            instrument("BTC", "USDT", "TRADING"),
            instrument("ETH", "BTC", "TRADING"),
            instrument("ETH", "USDT", "TRADING"),
            instrument("LTC", "BTC", "TRADING"),
            instrument("XRP", "USDT", "TRADING"),
            instrument("XRP", "BTC", "TRADING"),
            instrument("ONLYBTC", "BTC", "TRADING"),
            instrument("OLD", "USDT", "BREAK"),
            instrument("OLD", "BTC", "TRADING"),
            instrument("ADA", "USDT", "TRADING"),
            instrument("ADA", "BTC", "BREAK"),
        ]
    }

    #[test]
    fn cross_listed_symbols_keep_exchange_order() {
        let symbols = select_cross_listed_symbols(&instruments(), &MarketConfig::default());
        let names: Vec<&str> = symbols.iter().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["BTCUSDT", "ETHBTC", "XRPBTC"]);
    }

    #[test]
    fn truncation_happens_before_always_include() {
        let market = MarketConfig {
            max_tracked_symbols: 1,
            ..MarketConfig::default()
        };
        let symbols = select_cross_listed_symbols(&instruments(), &market);
        assert_eq!(symbols, vec![Symbol::new("BTCUSDT"), Symbol::new("ETHBTC")]);
    }

    #[test]
    fn always_include_is_not_duplicated() {
        let market = MarketConfig {
            always_include: vec!["ETHBTC".to_string(), "ethbtc".to_string()],
            ..MarketConfig::default()
        };
        let symbols = select_cross_listed_symbols(&instruments(), &market);
        let names: Vec<&str> = symbols.iter().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["ETHBTC", "XRPBTC"]);
    }

    #[tokio::test]
    async fn registry_counts_statuses() {
        let registry = SymbolRegistry::new();
        let (live_tx, live_rx) = watch::channel(SymbolStatus::Initializing);
        let (_dead_tx, dead_rx) = watch::channel(SymbolStatus::Terminated);
        registry.register(Symbol::new("ETHBTC"), live_rx).await;
        registry.register(Symbol::new("XRPBTC"), dead_rx).await;

        live_tx.send_replace(SymbolStatus::Live);
        assert_eq!(
            registry.counts().await,
            StatusCounts {
                initializing: 0,
                live: 1,
                terminated: 1
            }
        );
        assert_eq!(registry.status(&Symbol::new("ETHBTC")).await, Some(SymbolStatus::Live));
        assert_eq!(registry.len().await, 2);
    }

    #[test]
    fn connection_estimate_tracks_startup_pacing() {
        let fast_pace = estimated_connections_per_window(200, Duration::from_millis(800), Duration::from_millis(800));
        assert!(fast_pace > CONNECTION_LIMIT_PER_WINDOW);
        assert_eq!(fast_pace, 188 * 3);

        let defaults = SchedulerConfig::default();
        let shipped_pace = estimated_connections_per_window(
            200,
            Duration::from_millis(defaults.startup_delay_ms),
            Duration::from_millis(defaults.subscription_stagger_ms),
        );
        assert_eq!(shipped_pace, 97 * 3);
        assert!(shipped_pace <= CONNECTION_LIMIT_PER_WINDOW);

        assert_eq!(estimated_connections_per_window(5, Duration::from_millis(800), Duration::from_millis(800)), 15);
    }

    #[tokio::test]
    async fn released_status_sender_counts_as_terminated() {
        let registry = SymbolRegistry::new();
        let (status_tx, status_rx) = watch::channel(SymbolStatus::Live);
        registry.register(Symbol::new("ETHBTC"), status_rx).await;
        assert_eq!(registry.status(&Symbol::new("ETHBTC")).await, Some(SymbolStatus::Live));

        drop(status_tx);
        assert_eq!(registry.status(&Symbol::new("ETHBTC")).await, Some(SymbolStatus::Terminated));
        assert_eq!(registry.counts().await.terminated, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_or_shutdown_is_interrupted() {
        let (tx, mut rx) = watch::channel(false);
        assert!(sleep_or_shutdown(Duration::from_millis(10), &mut rx).await);
        tx.send_replace(true);
        assert!(!sleep_or_shutdown(Duration::from_secs(3600), &mut rx).await);
    }
}
