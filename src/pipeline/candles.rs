//! 单品种K线序列
//!
//! 按开盘时间对齐：相同开盘时间原地替换最后一根（收盘后冻结），
//! 更晚的开盘时间追加新K线，更早的开盘时间视为过期数据丢弃。

use crate::common::models::Candle;
use rust_decimal::Decimal;

/// 一次K线更新对序列产生的效果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleUpdate {
    /// 原地更新了未收盘的最后一根
    Replaced,
    /// 追加了新的一根
    Appended,
    /// 过期或已冻结，序列未变化
    Ignored,
}

impl CandleUpdate {
    pub fn changed(self) -> bool {
        !matches!(self, CandleUpdate::Ignored)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// 用回填结果初始化，回填数据同样走开盘时间对齐规则
    pub fn from_backfill(candles: impl IntoIterator<Item = Candle>) -> Self {
        let mut series = Self::new();
        for candle in candles {
            series.apply(candle);
        }
        series
    }

    pub fn apply(&mut self, candle: Candle) -> CandleUpdate {
        let Some(last) = self.candles.last_mut() else {
            self.candles.push(candle);
            return CandleUpdate::Appended;
        };

        if candle.open_time > last.open_time {
            self.candles.push(candle);
            CandleUpdate::Appended
        } else if candle.open_time == last.open_time && !last.is_final {
            *last = candle;
            CandleUpdate::Replaced
        } else {
            CandleUpdate::Ignored
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn closes(&self) -> Vec<Decimal> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn last_close(&self) -> Option<Decimal> {
        self.candles.last().map(|c| c.close)
    }

    pub fn prev_close(&self) -> Option<Decimal> {
        self.candles.len().checked_sub(2).map(|i| self.candles[i].close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(open_time: i64, close: Decimal, is_final: bool) -> Candle {
        Candle {
            open_time,
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
            is_final,
        }
    }

    #[test]
    fn in_progress_candle_is_replaced_in_place() {
        let mut series = CandleSeries::new();
        assert_eq!(series.apply(candle(0, dec!(1), false)), CandleUpdate::Appended);
        assert_eq!(series.apply(candle(0, dec!(2), false)), CandleUpdate::Replaced);
        assert_eq!(series.apply(candle(0, dec!(3), true)), CandleUpdate::Replaced);
        assert_eq!(series.len(), 1);
        assert_eq!(series.last_close(), Some(dec!(3)));
        assert!(series.last().unwrap().is_final);
    }

    #[test]
    fn closed_candle_is_frozen() {
        let mut series = CandleSeries::new();
        series.apply(candle(0, dec!(5), true));
        assert_eq!(series.apply(candle(0, dec!(9), false)), CandleUpdate::Ignored);
        assert_eq!(series.last_close(), Some(dec!(5)));
    }

    #[test]
    fn stale_update_is_ignored_and_length_never_shrinks() {
        let mut series = CandleSeries::new();
        let mut last_len = 0;
        let updates = [
            candle(0, dec!(1), true),
            candle(900, dec!(2), false),
            candle(0, dec!(7), false),
            candle(900, dec!(3), true),
            candle(1800, dec!(4), false),
            candle(900, dec!(8), true),
        ];
        for update in updates {
            series.apply(update);
            assert!(series.len() >= last_len);
            last_len = series.len();
        }

        assert_eq!(series.closes(), vec![dec!(1), dec!(3), dec!(4)]);
        assert_eq!(series.prev_close(), Some(dec!(3)));
        assert_eq!(series.last_close(), Some(dec!(4)));
    }

    #[test]
    fn backfill_seeds_series() {
        let series = CandleSeries::from_backfill(vec![
            candle(0, dec!(1), true),
            candle(900, dec!(2), true),
            candle(1800, dec!(3), false),
        ]);
        assert_eq!(series.len(), 3);
        assert!(!series.last().unwrap().is_final);
        assert_eq!(series.prev_close(), Some(dec!(2)));
    }

    #[test]
    fn prev_close_needs_two_candles() {
        let mut series = CandleSeries::new();
        assert_eq!(series.prev_close(), None);
        series.apply(candle(0, dec!(1), false));
        assert_eq!(series.prev_close(), None);
        assert!(!series.is_empty());
    }
}
