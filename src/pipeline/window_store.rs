//! 单品种滚动窗口存储
//!
//! - 逐笔成交：按时间窗口保留（默认10秒），每个聚合节拍前淘汰过期条目
//! - 盘口前N档数量之和：固定容量环形历史（默认33条），超出时丢弃最旧的
//!
//! 纯数据结构，不做任何 I/O。

use crate::common::models::DepthSample;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
struct TradeEntry {
    timestamp_ms: i64,
    quantity: Decimal,
    is_maker: bool,
}

/// 窗口聚合结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// 窗口内成交量之和
    pub volume_sum: Decimal,
    /// 窗口内成交笔数
    pub trade_count: usize,
    /// 挂单方成交占比，[0, 100]；无成交时为 0
    pub maker_ratio: Decimal,
    /// 最新的买盘前N档之和
    pub bid_sum: Option<Decimal>,
    /// 最新的卖盘前N档之和
    pub ask_sum: Option<Decimal>,
}

#[derive(Debug)]
pub struct RollingWindowStore {
    retention_ms: i64,
    history_capacity: usize,
    trades: VecDeque<TradeEntry>,
    bid_sums: VecDeque<Decimal>,
    ask_sums: VecDeque<Decimal>,
    latest_depth: Option<DepthSample>,
}

impl RollingWindowStore {
    pub fn new(retention: Duration, history_capacity: usize) -> Self {
        Self {
            retention_ms: retention.as_millis() as i64,
            history_capacity,
            trades: VecDeque::new(),
            bid_sums: VecDeque::with_capacity(history_capacity + 1),
            ask_sums: VecDeque::with_capacity(history_capacity + 1),
            latest_depth: None,
        }
    }

    pub fn record_trade(&mut self, quantity: Decimal, is_maker: bool, now_ms: i64) {
        self.trades.push_back(TradeEntry { timestamp_ms: now_ms, quantity, is_maker });
    }

    /// 覆盖最新盘口，并把前N档之和追加到环形历史
    pub fn record_depth(&mut self, sample: DepthSample) {
        push_bounded(&mut self.bid_sums, sample.bid_sum, self.history_capacity);
        push_bounded(&mut self.ask_sums, sample.ask_sum, self.history_capacity);
        self.latest_depth = Some(sample);
    }

    /// 删除时间戳早于 `cutoff_ms` 的成交，返回删除数量
    ///
    /// 成交可能乱序到达，因此逐条判断而不是只从队首弹出。
    pub fn evict_older_than(&mut self, cutoff_ms: i64) -> usize {
        let before = self.trades.len();
        self.trades.retain(|t| t.timestamp_ms >= cutoff_ms);
        before - self.trades.len()
    }

    /// 按保留窗口淘汰：保留 `timestamp >= now - retention`
    pub fn evict_expired(&mut self, now_ms: i64) -> usize {
        self.evict_older_than(now_ms - self.retention_ms)
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        let trade_count = self.trades.len();
        let volume_sum = self.trades.iter().map(|t| t.quantity).sum::<Decimal>();
        let maker_count = self.trades.iter().filter(|t| t.is_maker).count();

        WindowSnapshot {
            volume_sum,
            trade_count,
            maker_ratio: maker_ratio(maker_count, trade_count),
            bid_sum: self.bid_sums.back().copied(),
            ask_sum: self.ask_sums.back().copied(),
        }
    }

    pub fn latest_depth(&self) -> Option<&DepthSample> {
        self.latest_depth.as_ref()
    }

    pub fn bid_history(&self) -> impl Iterator<Item = &Decimal> {
        self.bid_sums.iter()
    }

    pub fn ask_history(&self) -> impl Iterator<Item = &Decimal> {
        self.ask_sums.iter()
    }

    pub fn trade_len(&self) -> usize {
        self.trades.len()
    }

    /// 窗口内最早一笔成交的时间戳
    pub fn oldest_trade_ms(&self) -> Option<i64> {
        self.trades.iter().map(|t| t.timestamp_ms).min()
    }
}

fn push_bounded(history: &mut VecDeque<Decimal>, value: Decimal, capacity: usize) {
    history.push_back(value);
    while history.len() > capacity {
        history.pop_front();
    }
}

/// makers / total × 100，total 为 0 时定义为 0
pub fn maker_ratio(maker_count: usize, total_count: usize) -> Decimal {
    if total_count == 0 {
        return Decimal::ZERO;
    }
    Decimal::from(maker_count) * dec!(100) / Decimal::from(total_count)
}

/// 盘口失衡比（带符号，保留两位小数）
///
/// 买盘弱于卖盘时为 `-(ask / bid)`，否则为 `+(bid / ask)`；分母为 0 时返回 0。
pub fn depth_imbalance(bid_sum: Decimal, ask_sum: Decimal) -> Decimal {
    if bid_sum < ask_sum {
        match ask_sum.checked_div(bid_sum) {
            Some(ratio) if !bid_sum.is_zero() => -ratio.round_dp(2),
            _ => Decimal::ZERO,
        }
    } else {
        match bid_sum.checked_div(ask_sum) {
            Some(ratio) if !ask_sum.is_zero() => ratio.round_dp(2),
            _ => Decimal::ZERO,
        }
    }
}
