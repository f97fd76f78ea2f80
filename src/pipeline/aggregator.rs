//! 单品种聚合器
//!
//! 状态：`Initializing → Live → Terminated`
//! - Initializing：已用回填K线初始化，等待三路订阅全部建立
//! - Live：处理事件，按固定节拍淘汰过期成交、生成快照、评估信号、写出口
//! - Terminated：收到关闭信号，或某路订阅重试耗尽
//!
//! 事件与节拍在同一个任务里串行执行，节拍生成的快照总是包含之前处理过的全部事件。

use crate::common::{AppConfig, Candle, IndicatorConfig, RuleConfig, Symbol};
use crate::pipeline::{
    candles::CandleSeries,
    indicator::{IndicatorState, StochRsi},
    signal_engine::SignalEngine,
    sink::EventSink,
    window_store::{depth_imbalance, RollingWindowStore},
    FeedKind, MetricsSnapshot, PriceDirection, SymbolEvent, SymbolStatus,
};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

const ALL_FEEDS: [FeedKind; 3] = [FeedKind::Candle, FeedKind::Depth, FeedKind::Trade];

/// 聚合器参数（从总配置中裁剪出的部分）
#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub tick_interval: Duration,
    pub trade_retention: Duration,
    pub depth_history_len: usize,
    pub indicator: IndicatorConfig,
    pub rules: Vec<RuleConfig>,
}

impl AggregatorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            tick_interval: Duration::from_millis(config.aggregation.tick_interval_ms),
            trade_retention: Duration::from_secs(config.aggregation.trade_retention_secs),
            depth_history_len: config.aggregation.depth_history_len,
            indicator: config.indicator,
            rules: config.rules.clone(),
        }
    }
}

pub struct SymbolAggregator {
    symbol: Symbol,
    tick_interval: Duration,
    window: RollingWindowStore,
    candles: CandleSeries,
    stoch_rsi: StochRsi,
    indicator: IndicatorState,
    signals: SignalEngine,
    sink: Arc<dyn EventSink>,
    last_price: Option<Decimal>,
    prev_tick_price: Option<Decimal>,
    feeds_up: HashSet<FeedKind>,
    status_tx: watch::Sender<SymbolStatus>,
    // 毫秒时间戳 = 启动时的墙钟 + 单调时钟流逝量
    epoch_ms: i64,
    started: Instant,
}

impl SymbolAggregator {
    pub fn new(
        symbol: Symbol,
        backfill: Vec<Candle>,
        settings: &AggregatorSettings,
        sink: Arc<dyn EventSink>,
        status_tx: watch::Sender<SymbolStatus>,
    ) -> Self {
        let candles = CandleSeries::from_backfill(backfill);
        let stoch_rsi = StochRsi::new(settings.indicator);
        let indicator = stoch_rsi.update(&candles);
        status_tx.send_replace(SymbolStatus::Initializing);

        debug!(
            target: "品种聚合器",
            symbol = %symbol,
            candles = candles.len(),
            indicator_ready = indicator.is_ready(),
            "聚合器已用回填K线初始化"
        );

        Self {
            symbol,
            tick_interval: settings.tick_interval,
            window: RollingWindowStore::new(settings.trade_retention, settings.depth_history_len),
            candles,
            stoch_rsi,
            indicator,
            signals: SignalEngine::new(&settings.rules),
            sink,
            last_price: None,
            prev_tick_price: None,
            feeds_up: HashSet::new(),
            status_tx,
            epoch_ms: chrono::Utc::now().timestamp_millis(),
            started: Instant::now(),
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn status(&self) -> SymbolStatus {
        *self.status_tx.borrow()
    }

    pub fn indicator(&self) -> IndicatorState {
        self.indicator
    }

    pub fn candles(&self) -> &CandleSeries {
        &self.candles
    }

    pub fn window(&self) -> &RollingWindowStore {
        &self.window
    }

    fn now_ms(&self) -> i64 {
        self.epoch_ms + self.started.elapsed().as_millis() as i64
    }

    fn set_status(&self, status: SymbolStatus) {
        let previous = self.status_tx.send_replace(status);
        if previous != status {
            info!(
                target: "品种聚合器",
                log_type = "low_freq",
                symbol = %self.symbol,
                from = ?previous,
                to = ?status,
                "品种状态变更"
            );
        }
    }

    /// 处理一个事件，返回 false 表示聚合器应当终止
    pub fn handle_event(&mut self, event: SymbolEvent, now_ms: i64) -> bool {
        match event {
            SymbolEvent::Depth(sample) => self.window.record_depth(sample),
            SymbolEvent::Trade(trade) => {
                // 以本地接收时间入窗
                self.window.record_trade(trade.quantity, trade.is_buyer_maker, now_ms);
                self.last_price = Some(trade.price);
            }
            SymbolEvent::Candle(candle) => {
                let update = self.candles.apply(candle);
                if update.changed() {
                    self.indicator = self.stoch_rsi.update(&self.candles);
                } else {
                    trace!(target: "品种聚合器", symbol = %self.symbol, "忽略过期K线更新");
                }
            }
            SymbolEvent::FeedUp(kind) => {
                self.feeds_up.insert(kind);
                if self.status() == SymbolStatus::Initializing
                    && ALL_FEEDS.iter().all(|k| self.feeds_up.contains(k))
                {
                    self.set_status(SymbolStatus::Live);
                }
            }
            SymbolEvent::FeedExhausted(kind) => {
                error!(
                    target: "品种聚合器",
                    symbol = %self.symbol,
                    feed = %kind,
                    "订阅重试耗尽，终止该品种"
                );
                self.set_status(SymbolStatus::Terminated);
                return false;
            }
        }
        true
    }

    /// 一个聚合节拍：淘汰、快照、信号评估、写出口
    pub fn on_tick(&mut self, now_ms: i64) -> MetricsSnapshot {
        let evicted = self.window.evict_expired(now_ms);
        let window = self.window.snapshot();
        let depth = self.window.latest_depth();

        let imbalance = match (window.bid_sum, window.ask_sum) {
            (Some(bid), Some(ask)) => depth_imbalance(bid, ask),
            _ => Decimal::ZERO,
        };

        let snapshot = MetricsSnapshot {
            symbol: self.symbol.clone(),
            timestamp_ms: now_ms,
            last_price: self.last_price,
            price_direction: PriceDirection::between(self.prev_tick_price, self.last_price),
            volume_sum: window.volume_sum,
            trade_count: window.trade_count,
            maker_ratio: window.maker_ratio,
            depth_imbalance: imbalance,
            bid_sum: window.bid_sum,
            ask_sum: window.ask_sum,
            best_bid_price: depth.map(|d| d.best_bid_price),
            best_bid_qty: depth.map(|d| d.best_bid_qty),
            best_ask_price: depth.map(|d| d.best_ask_price),
            best_ask_qty: depth.map(|d| d.best_ask_qty),
            indicator: self.indicator,
            last_close: self.candles.last_close(),
            prev_close: self.candles.prev_close(),
        };
        self.prev_tick_price = self.last_price;

        trace!(target: "品种聚合器", symbol = %self.symbol, evicted, trades = window.trade_count, "节拍完成");

        self.sink.on_metrics_snapshot(&snapshot);
        for event in self.signals.evaluate(&snapshot) {
            self.sink.on_signal(&event);
        }
        snapshot
    }

    /// 品种任务主循环
    pub async fn run(mut self, mut events_rx: mpsc::Receiver<SymbolEvent>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // interval 第一次立即触发，跳过它
        ticker.tick().await;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else {
                        warn!(target: "品种聚合器", symbol = %self.symbol, "事件通道已关闭");
                        break;
                    };
                    let now = self.now_ms();
                    if !self.handle_event(event, now) {
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if self.status() == SymbolStatus::Live {
                        let now = self.now_ms();
                        self.on_tick(now);
                    }
                },
                _ = wait_for_shutdown(&mut shutdown_rx) => {
                    debug!(target: "品种聚合器", symbol = %self.symbol, "收到关闭信号");
                    break;
                }
            }
        }

        self.set_status(SymbolStatus::Terminated);
    }
}

/// 等待关闭信号；发送端被丢弃同样视为关闭
pub async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{DepthSample, TradeEvent};
    use crate::pipeline::sink::FanoutSink;
    use rust_decimal_macros::dec;

    fn settings() -> AggregatorSettings {
        AggregatorSettings {
            tick_interval: Duration::from_secs(1),
            trade_retention: Duration::from_secs(10),
            depth_history_len: 33,
            indicator: IndicatorConfig::default(),
            rules: vec![RuleConfig::default()],
        }
    }

    fn aggregator(backfill: Vec<Candle>) -> (SymbolAggregator, watch::Receiver<SymbolStatus>) {
        let (status_tx, status_rx) = watch::channel(SymbolStatus::Initializing);
        let agg = SymbolAggregator::new(
            Symbol::new("ETHBTC"),
            backfill,
            &settings(),
            Arc::new(FanoutSink::default()),
            status_tx,
        );
        (agg, status_rx)
    }

    fn candle(open_time: i64, close: Decimal) -> Candle {
        Candle {
            open_time,
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
            is_final: true,
        }
    }

    fn trade(price: Decimal, quantity: Decimal, maker: bool) -> SymbolEvent {
        SymbolEvent::Trade(TradeEvent {
            trade_time_ms: 0,
            price,
            quantity,
            is_buyer_maker: maker,
        })
    }

    fn depth(bid_sum: Decimal, ask_sum: Decimal) -> SymbolEvent {
        SymbolEvent::Depth(DepthSample {
            best_bid_price: dec!(0.049),
            best_bid_qty: dec!(3),
            best_ask_price: dec!(0.05),
            best_ask_qty: dec!(4),
            bid_sum,
            ask_sum,
        })
    }

    #[test]
    fn becomes_live_only_after_all_feeds() {
        let (mut agg, status_rx) = aggregator(Vec::new());
        assert!(agg.handle_event(SymbolEvent::FeedUp(FeedKind::Candle), 0));
        assert!(agg.handle_event(SymbolEvent::FeedUp(FeedKind::Depth), 0));
        assert_eq!(*status_rx.borrow(), SymbolStatus::Initializing);
        assert!(agg.handle_event(SymbolEvent::FeedUp(FeedKind::Trade), 0));
        assert_eq!(*status_rx.borrow(), SymbolStatus::Live);
    }

    #[test]
    fn exhausted_feed_terminates() {
        let (mut agg, status_rx) = aggregator(Vec::new());
        assert!(!agg.handle_event(SymbolEvent::FeedExhausted(FeedKind::Depth), 0));
        assert_eq!(*status_rx.borrow(), SymbolStatus::Terminated);
    }

    #[test]
    fn tick_reflects_window_and_depth() {
        let (mut agg, _rx) = aggregator(vec![candle(0, dec!(1)), candle(900_000, dec!(2))]);
        agg.handle_event(trade(dec!(0.05), dec!(2), true), 1_000);
        agg.handle_event(trade(dec!(0.051), dec!(3), false), 5_000);
        agg.handle_event(depth(dec!(10), dec!(30)), 5_000);

        let snap = agg.on_tick(12_000);
        assert_eq!(snap.trade_count, 1);
        assert_eq!(snap.volume_sum, dec!(3));
        assert_eq!(snap.maker_ratio, Decimal::ZERO);
        assert_eq!(snap.depth_imbalance, dec!(-3));
        assert_eq!(snap.best_ask_price, Some(dec!(0.05)));
        assert_eq!(snap.last_price, Some(dec!(0.051)));
        assert_eq!(snap.price_direction, PriceDirection::Flat);
        assert_eq!(snap.last_close, Some(dec!(2)));
        assert_eq!(snap.prev_close, Some(dec!(1)));
        assert!(!snap.indicator.is_ready());

        agg.handle_event(trade(dec!(0.049), dec!(1), true), 12_500);
        let snap = agg.on_tick(13_000);
        assert_eq!(snap.price_direction, PriceDirection::Down);
    }

    #[test]
    fn empty_window_has_zero_maker_ratio() {
        let (mut agg, _rx) = aggregator(Vec::new());
        let snap = agg.on_tick(0);
        assert_eq!(snap.trade_count, 0);
        assert_eq!(snap.maker_ratio, Decimal::ZERO);
        assert_eq!(snap.depth_imbalance, Decimal::ZERO);
    }

    #[test]
    fn candle_updates_recompute_indicator() {
        let backfill: Vec<Candle> = (0..199).map(|i| candle(i * 900_000, Decimal::from(100 + (i % 7)))).collect();
        let (mut agg, _rx) = aggregator(backfill);
        assert!(!agg.indicator().is_ready());

        agg.handle_event(SymbolEvent::Candle(candle(199 * 900_000, dec!(104))), 0);
        assert_eq!(agg.candles().len(), 200);
        assert!(agg.indicator().is_ready());
    }
}
