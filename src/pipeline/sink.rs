//! 事件出口
//!
//! 指标快照和信号是流水线唯一的输出。出口是所有品种任务共享的资源，
//! 写入只追加、可任意交错，实现只需保证自身线程安全。

use crate::pipeline::{BuySignal, MetricsSnapshot, SellSignal, SignalEvent};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

pub trait EventSink: Send + Sync {
    /// 每个品种每个节拍调用一次
    fn on_metrics_snapshot(&self, snapshot: &MetricsSnapshot);

    /// 每次信号状态转换调用一次
    fn on_signal(&self, event: &SignalEvent);
}

/// 推送给看板客户端的消息
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardMessage {
    Metrics(MetricsSnapshot),
    BuySignal(BuySignal),
    SellSignal(SellSignal),
}

impl From<&SignalEvent> for DashboardMessage {
    fn from(event: &SignalEvent) -> Self {
        match event {
            SignalEvent::Buy(buy) => DashboardMessage::BuySignal(buy.clone()),
            SignalEvent::Sell(sell) => DashboardMessage::SellSignal(sell.clone()),
        }
    }
}

/// 把快照和信号写进 tracing 日志
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_metrics_snapshot(&self, s: &MetricsSnapshot) {
        debug!(
            target: "指标快照",
            symbol = %s.symbol,
            price = ?s.last_price,
            direction = ?s.price_direction,
            volume = %s.volume_sum,
            notional = ?s.notional(),
            trades = s.trade_count,
            maker_ratio = %s.maker_ratio.round_dp(2),
            imbalance = %s.depth_imbalance,
            bid_sum = ?s.bid_sum,
            ask_sum = ?s.ask_sum,
            indicator = ?s.indicator.value().map(|v| v.round_dp(2)),
            "节拍快照"
        );
    }

    fn on_signal(&self, event: &SignalEvent) {
        info!(
            target: "信号出口",
            log_type = "signal",
            kind = event.kind(),
            symbol = %event.symbol(),
            rule = event.rule_key(),
            payload = ?event,
            "信号已发出"
        );
    }
}

/// 通过 broadcast 通道推送给看板；没有订阅者时直接丢弃
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<DashboardMessage>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardMessage> {
        self.tx.subscribe()
    }

    fn publish(&self, message: DashboardMessage) {
        if self.tx.send(message).is_err() {
            trace!(target: "信号出口", "看板无订阅者，丢弃消息");
        }
    }
}

impl EventSink for BroadcastSink {
    fn on_metrics_snapshot(&self, snapshot: &MetricsSnapshot) {
        self.publish(DashboardMessage::Metrics(snapshot.clone()));
    }

    fn on_signal(&self, event: &SignalEvent) {
        self.publish(DashboardMessage::from(event));
    }
}

/// 依次转发给多个出口
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn on_metrics_snapshot(&self, snapshot: &MetricsSnapshot) {
        for sink in &self.sinks {
            sink.on_metrics_snapshot(snapshot);
        }
    }

    fn on_signal(&self, event: &SignalEvent) {
        for sink in &self.sinks {
            sink.on_signal(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Symbol;
    use crate::pipeline::{IndicatorState, PriceDirection};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingSink {
        snapshots: Mutex<usize>,
        signals: Mutex<Vec<String>>,
    }

    impl EventSink for CountingSink {
        fn on_metrics_snapshot(&self, _snapshot: &MetricsSnapshot) {
            *self.snapshots.lock().unwrap() += 1;
        }

        fn on_signal(&self, event: &SignalEvent) {
            self.signals.lock().unwrap().push(event.kind().to_string());
        }
    }

    fn snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            symbol: Symbol::new("ETHBTC"),
            timestamp_ms: 0,
            last_price: None,
            price_direction: PriceDirection::Flat,
            volume_sum: Decimal::ZERO,
            trade_count: 0,
            maker_ratio: Decimal::ZERO,
            depth_imbalance: Decimal::ZERO,
            bid_sum: None,
            ask_sum: None,
            best_bid_price: None,
            best_bid_qty: None,
            best_ask_price: None,
            best_ask_qty: None,
            indicator: IndicatorState::NotReady { have: 0, need: 200 },
            last_close: None,
            prev_close: None,
        }
    }

    fn sell() -> SignalEvent {
        SignalEvent::Sell(SellSignal {
            author_key: "k".to_string(),
            signal_name: "S".to_string(),
            signal_key: "Sk".to_string(),
            pair: Symbol::new("ETHBTC"),
            sell_price: dec!(0.05),
        })
    }

    #[test]
    fn fanout_forwards_to_every_sink() {
        let a = Arc::new(CountingSink::default());
        let b = Arc::new(CountingSink::default());
        let fanout = FanoutSink::default().with(a.clone()).with(b.clone());
        assert_eq!(fanout.len(), 2);

        fanout.on_metrics_snapshot(&snapshot());
        fanout.on_signal(&sell());

        for sink in [&a, &b] {
            assert_eq!(*sink.snapshots.lock().unwrap(), 1);
            assert_eq!(*sink.signals.lock().unwrap(), vec!["sell_signal".to_string()]);
        }
    }

    #[tokio::test]
    async fn broadcast_sink_tags_messages() {
        let sink = BroadcastSink::new(16);
        let mut rx = sink.subscribe();

        sink.on_metrics_snapshot(&snapshot());
        sink.on_signal(&sell());

        let metrics = serde_json::to_value(rx.recv().await.unwrap()).unwrap();
        assert_eq!(metrics["type"], "metrics");
        assert_eq!(metrics["symbol"], "ETHBTC");
        assert_eq!(metrics["indicator"]["state"], "not_ready");

        let signal = serde_json::to_value(rx.recv().await.unwrap()).unwrap();
        assert_eq!(signal["type"], "sell_signal");
        assert_eq!(signal["signal_key"], "Sk");
        assert_eq!(signal["sell_price"], "0.05");
    }

    #[test]
    fn broadcast_without_subscribers_is_silent() {
        let sink = BroadcastSink::new(4);
        sink.on_metrics_snapshot(&snapshot());
        TracingSink.on_signal(&sell());
    }
}
