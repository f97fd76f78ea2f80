//! StochRSI 指标
//!
//! 每次K线变化后基于完整收盘价序列重新计算（不做增量修补）：
//!
//! 1. RSI：Wilder 平滑，首个均值为前 `rsi_period` 个涨跌幅的简单平均
//! 2. Stoch：在最近 `stochastic_period` 个 RSI 值上做随机指标归一化
//! 3. K = Stoch 的 `k_period` 简单平均，D = K 的 `d_period` 简单平均
//!
//! 输出 K 值。数据不足时返回 `NotReady`，调用方不得把它当作 0。

use crate::common::IndicatorConfig;
use crate::pipeline::candles::CandleSeries;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IndicatorState {
    NotReady { have: usize, need: usize },
    Ready { value: Decimal },
}

impl IndicatorState {
    pub fn value(&self) -> Option<Decimal> {
        match self {
            IndicatorState::Ready { value } => Some(*value),
            IndicatorState::NotReady { .. } => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, IndicatorState::Ready { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StochRsi {
    config: IndicatorConfig,
}

impl StochRsi {
    pub fn new(config: IndicatorConfig) -> Self {
        Self { config }
    }

    /// 产出第一个值所需的最少K线数
    pub fn min_len(&self) -> usize {
        let c = &self.config;
        c.rsi_period + c.stochastic_period + c.k_period.saturating_sub(1) + c.d_period.saturating_sub(1)
    }

    pub fn update(&self, series: &CandleSeries) -> IndicatorState {
        self.compute(&series.closes())
    }

    pub fn compute(&self, closes: &[Decimal]) -> IndicatorState {
        let need = self.min_len();
        if closes.len() < need {
            return IndicatorState::NotReady { have: closes.len(), need };
        }

        let rsi = wilder_rsi(closes, self.config.rsi_period);
        let stoch = stochastic(&rsi, self.config.stochastic_period);
        let k = sma(&stoch, self.config.k_period);
        let d = sma(&k, self.config.d_period);

        // d 非空说明 k 的最后一个值已经过完整的平滑链
        match (d.last(), k.last()) {
            (Some(_), Some(value)) => IndicatorState::Ready {
                value: (*value).clamp(Decimal::ZERO, dec!(100)),
            },
            _ => IndicatorState::NotReady { have: closes.len(), need },
        }
    }
}

/// Wilder RSI，返回 `closes.len() - period` 个值
fn wilder_rsi(closes: &[Decimal], period: usize) -> Vec<Decimal> {
    if period == 0 || closes.len() <= period {
        return Vec::new();
    }

    let period_dec = Decimal::from(period);
    let changes: Vec<Decimal> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let (mut avg_gain, mut avg_loss) = changes[..period].iter().fold(
        (Decimal::ZERO, Decimal::ZERO),
        |(gain, loss), change| {
            if change.is_sign_positive() {
                (gain + change, loss)
            } else {
                (gain, loss - change)
            }
        },
    );
    avg_gain /= period_dec;
    avg_loss /= period_dec;

    let mut values = Vec::with_capacity(changes.len() - period + 1);
    values.push(rsi_from_averages(avg_gain, avg_loss));

    for change in &changes[period..] {
        let (gain, loss) = if change.is_sign_positive() {
            (*change, Decimal::ZERO)
        } else {
            (Decimal::ZERO, -*change)
        };
        avg_gain = (avg_gain * (period_dec - Decimal::ONE) + gain) / period_dec;
        avg_loss = (avg_loss * (period_dec - Decimal::ONE) + loss) / period_dec;
        values.push(rsi_from_averages(avg_gain, avg_loss));
    }

    values
}

fn rsi_from_averages(avg_gain: Decimal, avg_loss: Decimal) -> Decimal {
    if avg_loss.is_zero() {
        // 没有下跌：完全平盘时也记为 100
        return dec!(100);
    }
    let rs = avg_gain / avg_loss;
    dec!(100) - dec!(100) / (Decimal::ONE + rs)
}

/// 在 RSI 序列上做随机指标归一化；窗口内最高等于最低时记为 0
fn stochastic(values: &[Decimal], period: usize) -> Vec<Decimal> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    values
        .windows(period)
        .map(|window| {
            let current = window[period - 1];
            let (low, high) = window
                .iter()
                .fold((window[0], window[0]), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
            let range = high - low;
            if range.is_zero() {
                Decimal::ZERO
            } else {
                (current - low) / range * dec!(100)
            }
        })
        .collect()
}

fn sma(values: &[Decimal], period: usize) -> Vec<Decimal> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let period_dec = Decimal::from(period);
    values
        .windows(period)
        .map(|w| w.iter().copied().sum::<Decimal>() / period_dec)
        .collect()
}
