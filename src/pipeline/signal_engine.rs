//! 信号状态机
//!
//! 每个 (品种, 规则键) 维护一个 `SignalRuleState`。对每个快照先做买入检查再做卖出检查：
//! - 买入：未武装 + 名义成交额 > min_notional + 指标 > indicator_upper，按卖一价记录入场价
//! - 卖出：已武装 + 最新收盘 < 上一根收盘 + 盈亏（按买一价）跌破止损或突破止盈
//!
//! 两个转换都是边沿触发，条件持续成立不会重复发出信号。
//! 同一快照上刚触发买入的规则不再做卖出检查。

use crate::common::{RuleConfig, Symbol};
use crate::pipeline::MetricsSnapshot;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

/// 结构化的状态键，避免字符串拼接带来的键冲突
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalKey {
    pub symbol: Symbol,
    pub rule_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalRuleState {
    pub armed: bool,
    /// 只在武装期间有意义
    pub entry_price: Option<Decimal>,
    /// 冷却结束时间（毫秒）
    pub cooldown_until_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuySignal {
    pub author_name: String,
    pub author_key: String,
    pub signal_name: String,
    pub signal_key: String,
    pub description: String,
    pub pair: Symbol,
    pub buy_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SellSignal {
    pub author_key: String,
    pub signal_name: String,
    pub signal_key: String,
    pub pair: Symbol,
    pub sell_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalEvent {
    Buy(BuySignal),
    Sell(SellSignal),
}

impl SignalEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalEvent::Buy(_) => "buy_signal",
            SignalEvent::Sell(_) => "sell_signal",
        }
    }

    pub fn symbol(&self) -> &Symbol {
        match self {
            SignalEvent::Buy(s) => &s.pair,
            SignalEvent::Sell(s) => &s.pair,
        }
    }

    pub fn rule_key(&self) -> &str {
        match self {
            SignalEvent::Buy(s) => &s.signal_key,
            SignalEvent::Sell(s) => &s.signal_key,
        }
    }
}

#[derive(Debug, Clone)]
struct SignalRule {
    key: String,
    config: RuleConfig,
}

#[derive(Debug)]
pub struct SignalEngine {
    rules: Vec<SignalRule>,
    states: HashMap<SignalKey, SignalRuleState>,
}

impl SignalEngine {
    pub fn new(rules: &[RuleConfig]) -> Self {
        let rules = rules
            .iter()
            .map(|config| SignalRule {
                key: config.rule_key(),
                config: config.clone(),
            })
            .collect();
        Self {
            rules,
            states: HashMap::new(),
        }
    }

    pub fn state(&self, key: &SignalKey) -> Option<&SignalRuleState> {
        self.states.get(key)
    }

    /// 对一个快照评估全部规则，返回本次触发的信号
    pub fn evaluate(&mut self, snapshot: &MetricsSnapshot) -> Vec<SignalEvent> {
        // 指标未就绪或还没有盘口时不做任何评估
        let Some(indicator) = snapshot.indicator.value() else {
            return Vec::new();
        };
        let (Some(best_ask), Some(best_bid)) = (snapshot.best_ask_price, snapshot.best_bid_price) else {
            return Vec::new();
        };
        let notional = snapshot.volume_sum * best_ask;

        let mut events = Vec::new();
        for rule in &self.rules {
            let key = SignalKey {
                symbol: snapshot.symbol.clone(),
                rule_key: rule.key.clone(),
            };
            let state = self.states.entry(key).or_default();

            if let Some(buy) = check_buy(rule, state, snapshot, notional, indicator, best_ask) {
                events.push(SignalEvent::Buy(buy));
                continue;
            }
            if let Some(sell) = check_sell(rule, state, snapshot, best_bid) {
                events.push(SignalEvent::Sell(sell));
            }
        }
        events
    }
}

fn check_buy(
    rule: &SignalRule,
    state: &mut SignalRuleState,
    snapshot: &MetricsSnapshot,
    notional: Decimal,
    indicator: Decimal,
    best_ask: Decimal,
) -> Option<BuySignal> {
    if state.armed {
        return None;
    }
    if let Some(until) = state.cooldown_until_ms {
        if snapshot.timestamp_ms < until {
            return None;
        }
    }
    if best_ask <= Decimal::ZERO {
        return None;
    }
    if notional <= rule.config.min_notional || indicator <= rule.config.indicator_upper {
        return None;
    }

    state.armed = true;
    state.entry_price = Some(best_ask);
    state.cooldown_until_ms = None;

    let description = format!(
        "{} :: {:.2} {:.2}",
        rule.config.name,
        notional.round_dp(2),
        indicator.round_dp(2)
    );
    info!(
        target: "信号引擎",
        log_type = "signal",
        symbol = %snapshot.symbol,
        rule = %rule.key,
        entry_price = %best_ask,
        notional = %notional.round_dp(2),
        indicator = %indicator.round_dp(2),
        "买入信号"
    );

    Some(BuySignal {
        author_name: rule.config.author_name.clone(),
        author_key: rule.config.author_key.clone(),
        signal_name: rule.config.name.clone(),
        signal_key: rule.key.clone(),
        description,
        pair: snapshot.symbol.clone(),
        buy_price: best_ask,
    })
}

fn check_sell(
    rule: &SignalRule,
    state: &mut SignalRuleState,
    snapshot: &MetricsSnapshot,
    best_bid: Decimal,
) -> Option<SellSignal> {
    if !state.armed || !snapshot.momentum_down() {
        return None;
    }
    let entry = state.entry_price?;
    let pnl = pnl_pct(entry, best_bid)?;

    if pnl >= rule.config.stop_loss_pct && pnl <= rule.config.take_profit_pct {
        debug!(target: "信号引擎", symbol = %snapshot.symbol, rule = %rule.key, pnl = %pnl, "持仓中，未触及止损/止盈");
        return None;
    }

    state.armed = false;
    state.entry_price = None;
    state.cooldown_until_ms = rule
        .config
        .cooldown_secs
        .map(|secs| snapshot.timestamp_ms + secs as i64 * 1000);

    info!(
        target: "信号引擎",
        log_type = "signal",
        symbol = %snapshot.symbol,
        rule = %rule.key,
        entry_price = %entry,
        exit_price = %best_bid,
        pnl_pct = %pnl.round_dp(4),
        "卖出信号"
    );

    Some(SellSignal {
        author_key: rule.config.author_key.clone(),
        signal_name: rule.config.name.clone(),
        signal_key: rule.key.clone(),
        pair: snapshot.symbol.clone(),
        sell_price: best_bid,
    })
}

/// (exit - entry) / entry × 100；入场价为 0 时无定义
pub fn pnl_pct(entry: Decimal, exit: Decimal) -> Option<Decimal> {
    if entry.is_zero() {
        return None;
    }
    (exit - entry).checked_div(entry).map(|r| r * dec!(100))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{IndicatorState, PriceDirection};

    fn rule() -> RuleConfig {
        RuleConfig {
            name: "SIGNAL TEST".to_string(),
            author_name: "tester".to_string(),
            author_key: "key1".to_string(),
            ..RuleConfig::default()
        }
    }

    /// 成交量 0.15 × 卖一 100 = 名义 15，指标 72
    fn buy_snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            symbol: Symbol::new("XYZBASE"),
            timestamp_ms: 1_000,
            last_price: Some(dec!(100)),
            price_direction: PriceDirection::Flat,
            volume_sum: dec!(0.15),
            trade_count: 3,
            maker_ratio: dec!(50),
            depth_imbalance: dec!(1),
            bid_sum: Some(dec!(10)),
            ask_sum: Some(dec!(10)),
            best_bid_price: Some(dec!(99.9)),
            best_bid_qty: Some(dec!(1)),
            best_ask_price: Some(dec!(100)),
            best_ask_qty: Some(dec!(1)),
            indicator: IndicatorState::Ready { value: dec!(72) },
            last_close: Some(dec!(100)),
            prev_close: Some(dec!(99)),
        }
    }

    fn key() -> SignalKey {
        SignalKey {
            symbol: Symbol::new("XYZBASE"),
            rule_key: "SIGNALTESTkey1".to_string(),
        }
    }

    #[test]
    fn buy_fires_once_with_ask_as_entry() {
        let mut engine = SignalEngine::new(&[rule()]);
        let snapshot = buy_snapshot();

        let events = engine.evaluate(&snapshot);
        assert_eq!(events.len(), 1);
        let SignalEvent::Buy(buy) = &events[0] else {
            panic!("expected buy, got {:?}", events[0]);
        };
        assert_eq!(buy.buy_price, dec!(100));
        assert_eq!(buy.signal_key, "SIGNALTESTkey1");
        assert_eq!(buy.description, "SIGNAL TEST :: 15.00 72.00");
        assert_eq!(buy.pair, Symbol::new("XYZBASE"));

        // 条件持续成立 N 次，只有第一次发出
        for _ in 0..10 {
            assert!(engine.evaluate(&snapshot).is_empty());
        }
        let state = engine.state(&key()).unwrap();
        assert!(state.armed);
        assert_eq!(state.entry_price, Some(dec!(100)));
    }

    #[test]
    fn stop_loss_with_falling_candle_sells() {
        let mut engine = SignalEngine::new(&[rule()]);
        engine.evaluate(&buy_snapshot());

        let mut snapshot = buy_snapshot();
        snapshot.best_bid_price = Some(dec!(99));
        snapshot.last_close = Some(dec!(98));
        snapshot.prev_close = Some(dec!(99));

        let events = engine.evaluate(&snapshot);
        assert_eq!(events.len(), 1);
        let SignalEvent::Sell(sell) = &events[0] else {
            panic!("expected sell, got {:?}", events[0]);
        };
        assert_eq!(sell.sell_price, dec!(99));
        assert_eq!(events[0].kind(), "sell_signal");
        assert!(!engine.state(&key()).unwrap().armed);
    }

    #[test]
    fn no_sell_while_candle_is_rising() {
        let mut engine = SignalEngine::new(&[rule()]);
        engine.evaluate(&buy_snapshot());

        let mut snapshot = buy_snapshot();
        snapshot.best_bid_price = Some(dec!(95));
        assert!(!snapshot.momentum_down());
        assert!(engine.evaluate(&snapshot).is_empty());
        assert!(engine.state(&key()).unwrap().armed);
    }

    #[test]
    fn take_profit_sells_and_inside_band_holds() {
        let mut engine = SignalEngine::new(&[rule()]);
        engine.evaluate(&buy_snapshot());

        let mut holding = buy_snapshot();
        holding.last_close = Some(dec!(98));
        holding.best_bid_price = Some(dec!(100.5));
        assert!(engine.evaluate(&holding).is_empty());

        let mut profit = holding.clone();
        profit.best_bid_price = Some(dec!(102));
        let events = engine.evaluate(&profit);
        assert!(matches!(events.as_slice(), [SignalEvent::Sell(s)] if s.sell_price == dec!(102)));
    }

    #[test]
    fn sell_conditions_without_arming_never_emit() {
        let mut engine = SignalEngine::new(&[rule()]);
        let mut snapshot = buy_snapshot();
        snapshot.volume_sum = dec!(0.01);
        snapshot.best_bid_price = Some(dec!(50));
        snapshot.last_close = Some(dec!(90));

        for _ in 0..5 {
            assert!(engine.evaluate(&snapshot).is_empty());
        }
        assert!(!engine.state(&key()).unwrap().armed);
    }

    #[test]
    fn not_ready_indicator_skips_evaluation() {
        let mut engine = SignalEngine::new(&[rule()]);
        let mut snapshot = buy_snapshot();
        snapshot.indicator = IndicatorState::NotReady { have: 50, need: 200 };

        assert!(engine.evaluate(&snapshot).is_empty());
        assert!(engine.state(&key()).is_none());
    }

    #[test]
    fn missing_depth_skips_evaluation() {
        let mut engine = SignalEngine::new(&[rule()]);
        let mut snapshot = buy_snapshot();
        snapshot.best_ask_price = None;
        snapshot.best_bid_price = None;
        assert!(engine.evaluate(&snapshot).is_empty());
    }

    #[test]
    fn rearms_immediately_without_cooldown() {
        let mut engine = SignalEngine::new(&[rule()]);
        engine.evaluate(&buy_snapshot());

        let mut sell = buy_snapshot();
        sell.best_bid_price = Some(dec!(99));
        sell.last_close = Some(dec!(98));
        assert_eq!(engine.evaluate(&sell).len(), 1);

        let events = engine.evaluate(&buy_snapshot());
        assert!(matches!(events.as_slice(), [SignalEvent::Buy(_)]));
    }

    #[test]
    fn cooldown_blocks_rearm_until_elapsed() {
        let mut cooled = rule();
        cooled.cooldown_secs = Some(60);
        let mut engine = SignalEngine::new(&[cooled]);
        engine.evaluate(&buy_snapshot());

        let mut sell = buy_snapshot();
        sell.timestamp_ms = 10_000;
        sell.best_bid_price = Some(dec!(99));
        sell.last_close = Some(dec!(98));
        assert_eq!(engine.evaluate(&sell).len(), 1);

        let mut early = buy_snapshot();
        early.timestamp_ms = 69_999;
        assert!(engine.evaluate(&early).is_empty());

        let mut later = buy_snapshot();
        later.timestamp_ms = 70_000;
        assert_eq!(engine.evaluate(&later).len(), 1);
    }

    #[test]
    fn rules_keep_independent_state() {
        let mut strict = rule();
        strict.name = "STRICT".to_string();
        strict.indicator_upper = dec!(80);
        let mut engine = SignalEngine::new(&[rule(), strict]);

        let events = engine.evaluate(&buy_snapshot());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].rule_key(), "SIGNALTESTkey1");

        let strict_key = SignalKey {
            symbol: Symbol::new("XYZBASE"),
            rule_key: "STRICTkey1".to_string(),
        };
        assert!(!engine.state(&strict_key).unwrap().armed);
    }

    #[test]
    fn pnl_is_undefined_for_zero_entry() {
        assert_eq!(pnl_pct(Decimal::ZERO, dec!(1)), None);
        assert_eq!(pnl_pct(dec!(100), dec!(99)), Some(dec!(-1)));
    }
}
