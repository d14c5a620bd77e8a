use crate::config::{RegimeConfig, StrategyConfig};
use crate::models::{SeedEvent, SellReason, Tranche};
use crate::regime::Regime;
use chrono::NaiveDate;
use log::{debug, info, warn};
use std::collections::HashSet;

const CASH_EPSILON: f64 = 1e-9;

/// A sell decided for one tranche, applied later as part of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct TrancheExit {
    pub tranche_id: u64,
    pub date: NaiveDate,
    pub price: f64,
    pub reason: SellReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosedTranche {
    pub tranche: Tranche,
    pub sell_date: NaiveDate,
    pub sell_price: f64,
    pub proceeds: f64,
    pub realized_pnl: f64,
    pub reason: SellReason,
}

#[derive(Debug, Clone, PartialEq)]
struct ScheduledSeed {
    event: SeedEvent,
    applied: bool,
}

/// Position ledger owned by a single simulation run.
#[derive(Debug, Clone)]
pub struct TraderState {
    config: StrategyConfig,
    positions: Vec<Tranche>,
    current_round: usize,
    available_cash: f64,
    investment_capital_baseline: f64,
    active_regime: Option<Regime>,
    trading_day_counter: u64,
    seed_events: Vec<ScheduledSeed>,
    realized_pnl: f64,
    next_tranche_id: u64,
}

impl TraderState {
    pub fn new(config: StrategyConfig) -> Self {
        let mut seeds: Vec<ScheduledSeed> = config
            .seed_events
            .iter()
            .cloned()
            .map(|event| ScheduledSeed {
                event,
                applied: false,
            })
            .collect();
        seeds.sort_by_key(|seed| seed.event.date);

        Self {
            positions: Vec::new(),
            current_round: 1,
            available_cash: config.initial_capital,
            investment_capital_baseline: config.initial_capital,
            active_regime: None,
            trading_day_counter: 0,
            seed_events: seeds,
            realized_pnl: 0.0,
            next_tranche_id: 1,
            config,
        }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn positions(&self) -> &[Tranche] {
        &self.positions
    }

    pub fn current_round(&self) -> usize {
        self.current_round
    }

    pub fn available_cash(&self) -> f64 {
        self.available_cash
    }

    pub fn investment_capital_baseline(&self) -> f64 {
        self.investment_capital_baseline
    }

    pub fn active_regime(&self) -> Option<Regime> {
        self.active_regime
    }

    pub fn trading_day_counter(&self) -> u64 {
        self.trading_day_counter
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn seed_events(&self) -> impl Iterator<Item = &SeedEvent> {
        self.seed_events.iter().map(|seed| &seed.event)
    }

    /// Sets the active regime after the configured policy has had its say.
    pub fn set_active_regime(&mut self, regime: Regime) -> Regime {
        let effective = self.config.regime_policy.apply(regime);
        self.active_regime = Some(effective);
        effective
    }

    pub fn effective_regime(&self) -> Regime {
        self.active_regime
            .unwrap_or_else(|| self.config.regime_policy.apply(Regime::Conservative))
    }

    pub fn active_config(&self) -> &RegimeConfig {
        self.config.for_regime(self.effective_regime())
    }

    pub fn config_for_tranche(&self, tranche: &Tranche) -> &RegimeConfig {
        self.config.for_regime(tranche.regime_at_purchase)
    }

    /// Round budget, always measured against the capital baseline.
    pub fn round_size(&self, round_index: usize) -> f64 {
        let config = self.active_config();
        if round_index == 0 || round_index > config.round_count {
            return 0.0;
        }
        config
            .allocation_ratios
            .get(round_index - 1)
            .map(|ratio| self.investment_capital_baseline * ratio)
            .unwrap_or(0.0)
    }

    /// Advisory gate; the buy executor decides the affordable share count.
    pub fn can_open_next_round(&self) -> bool {
        if self.current_round > self.active_config().round_count {
            return false;
        }
        self.available_cash + CASH_EPSILON >= self.round_size(self.current_round)
    }

    pub fn position_value(&self, close: f64) -> f64 {
        self.positions
            .iter()
            .map(|tranche| tranche.market_value(close))
            .sum()
    }

    pub fn total_assets(&self, close: f64) -> f64 {
        self.available_cash + self.position_value(close)
    }

    /// Counts a trading day and rebases the capital baseline on every
    /// `capital_rebase_interval`-th one. Returns the new baseline when rebased.
    pub fn advance_trading_day(&mut self, close: f64) -> Option<f64> {
        self.trading_day_counter += 1;
        let interval = u64::from(self.config.capital_rebase_interval.max(1));
        if self.trading_day_counter % interval != 0 {
            return None;
        }
        self.investment_capital_baseline = self.total_assets(close);
        debug!(
            "Rebased investment capital to {:.2} on trading day {}",
            self.investment_capital_baseline, self.trading_day_counter
        );
        Some(self.investment_capital_baseline)
    }

    /// Schedules a seed event; it is applied on the first processed day on or after its date.
    pub fn schedule_seed_event(&mut self, event: SeedEvent) {
        let position = self
            .seed_events
            .partition_point(|seed| seed.event.date <= event.date);
        self.seed_events.insert(
            position,
            ScheduledSeed {
                event,
                applied: false,
            },
        );
    }

    /// Applies every pending seed event dated on or before `date`, in date order.
    pub fn apply_due_seed_events(&mut self, date: NaiveDate, close: f64) -> Vec<SeedEvent> {
        let mut applied = Vec::new();
        for index in 0..self.seed_events.len() {
            let seed = &self.seed_events[index];
            if seed.applied || seed.event.date > date {
                continue;
            }
            let event = seed.event.clone();
            if event.date < date {
                warn!(
                    "Seed event dated {} applied late on {}",
                    event.date, date
                );
            }
            self.inject_cash(&event, close);
            self.seed_events[index].applied = true;
            applied.push(event);
        }
        applied
    }

    fn inject_cash(&mut self, event: &SeedEvent, close: f64) {
        let total_before = self.total_assets(close);
        if event.amount < 0.0 && -event.amount > self.available_cash {
            warn!(
                "Withdrawal of {:.2} on {} exceeds available cash {:.2}",
                -event.amount, event.date, self.available_cash
            );
        }
        self.available_cash += event.amount;
        self.investment_capital_baseline = total_before + event.amount;
        info!(
            "Seed event on {}: {:+.2} (cash {:.2}, baseline {:.2})",
            event.date, event.amount, self.available_cash, self.investment_capital_baseline
        );
    }

    /// Appends a tranche for a fill the caller has already validated against cash.
    pub fn open_tranche(
        &mut self,
        date: NaiveDate,
        fill_price: f64,
        shares: u64,
        nominal_target_price: f64,
    ) -> Tranche {
        let invested_amount = shares as f64 * fill_price;
        let tranche = Tranche {
            id: self.next_tranche_id,
            round_index: self.current_round,
            buy_date: date,
            buy_price: fill_price,
            shares,
            nominal_target_price,
            invested_amount,
            regime_at_purchase: self.effective_regime(),
        };
        debug_assert!(
            invested_amount <= self.available_cash + CASH_EPSILON,
            "buy of {:.2} would overdraw cash {:.2}",
            invested_amount,
            self.available_cash
        );
        self.next_tranche_id += 1;
        self.available_cash -= invested_amount;
        if self.available_cash < 0.0 && self.available_cash > -CASH_EPSILON {
            // Rounding residue from share sizing, not an overdraft.
            self.available_cash = 0.0;
        }
        self.current_round += 1;
        self.positions.push(tranche.clone());
        tranche
    }

    /// Closes a batch of tranches: the removal set is computed first and the
    /// open list rebuilt by exclusion. Unknown or duplicate ids are ignored.
    /// `current_round` is left alone; call [`TraderState::settle_rounds`] when
    /// the batch should take effect.
    pub fn close_tranches(&mut self, exits: &[TrancheExit]) -> Vec<ClosedTranche> {
        let open_ids: HashSet<u64> = self.positions.iter().map(|t| t.id).collect();
        let mut removal: HashSet<u64> = HashSet::new();
        let mut accepted = Vec::new();
        for exit in exits {
            if open_ids.contains(&exit.tranche_id) && removal.insert(exit.tranche_id) {
                accepted.push(exit);
            }
        }
        if accepted.is_empty() {
            return Vec::new();
        }

        let (closed, remaining): (Vec<Tranche>, Vec<Tranche>) = self
            .positions
            .drain(..)
            .partition(|tranche| removal.contains(&tranche.id));
        self.positions = remaining;

        let mut results = Vec::with_capacity(closed.len());
        for exit in accepted {
            let Some(tranche) = closed.iter().find(|t| t.id == exit.tranche_id) else {
                continue;
            };
            let proceeds = tranche.shares as f64 * exit.price;
            let realized_pnl = proceeds - tranche.invested_amount;
            self.available_cash += proceeds;
            self.realized_pnl += realized_pnl;
            results.push(ClosedTranche {
                tranche: tranche.clone(),
                sell_date: exit.date,
                sell_price: exit.price,
                proceeds,
                realized_pnl,
                reason: exit.reason,
            });
        }
        results
    }

    /// Recomputes `current_round` from the open tranches and renumbers them
    /// 1..=n in order, so the next round index cannot collide with an open one.
    pub fn settle_rounds(&mut self) {
        for (index, tranche) in self.positions.iter_mut().enumerate() {
            tranche.round_index = index + 1;
        }
        self.current_round = self.positions.len() + 1;
    }

    /// Replaces shares and fill price on an open round, moving the cash
    /// difference. Returns false without mutating anything if the round is
    /// unknown, the inputs are invalid, or cash would go negative.
    pub fn correct_tranche(&mut self, round_index: usize, shares: u64, buy_price: f64) -> bool {
        if shares == 0 || !buy_price.is_finite() || buy_price <= 0.0 {
            return false;
        }
        let Some(position) = self
            .positions
            .iter()
            .position(|tranche| tranche.round_index == round_index)
        else {
            return false;
        };

        let new_invested = shares as f64 * buy_price;
        let difference = new_invested - self.positions[position].invested_amount;
        if self.available_cash - difference < -CASH_EPSILON {
            warn!(
                "Correction of round {} rejected: needs {:.2} more cash than the {:.2} available",
                round_index, difference, self.available_cash
            );
            return false;
        }

        self.available_cash = (self.available_cash - difference).max(0.0);
        let tranche = &mut self.positions[position];
        tranche.shares = shares;
        tranche.buy_price = buy_price;
        tranche.invested_amount = new_invested;
        info!(
            "Corrected round {}: {} shares at {:.4} (cash {:.2})",
            round_index, shares, buy_price, self.available_cash
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn state_with_capital(capital: f64) -> TraderState {
        let config = StrategyConfig {
            initial_capital: capital,
            ..StrategyConfig::default()
        };
        let mut state = TraderState::new(config);
        state.set_active_regime(Regime::Conservative);
        state
    }

    #[test]
    fn round_size_uses_baseline_and_schedule() {
        let state = state_with_capital(10_000.0);
        assert!((state.round_size(1) - 490.0).abs() < 1e-9);
        assert!((state.round_size(4) - 2_570.0).abs() < 1e-9);
        assert_eq!(state.round_size(8), 0.0);
        assert_eq!(state.round_size(0), 0.0);
    }

    #[test]
    fn can_open_next_round_respects_round_count_and_cash() {
        let mut state = state_with_capital(10_000.0);
        assert!(state.can_open_next_round());
        for _ in 0..7 {
            state.open_tranche(d(2024, 1, 2), 1.0, 1, 1.0);
        }
        assert_eq!(state.current_round(), 8);
        assert!(!state.can_open_next_round());

        let mut poor = state_with_capital(10_000.0);
        poor.open_tranche(d(2024, 1, 2), 9_900.0, 1, 9_900.0);
        assert!(poor.available_cash() < poor.round_size(2));
        assert!(!poor.can_open_next_round());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "would overdraw cash")]
    fn unvalidated_buy_that_overdraws_cash_panics_in_debug() {
        let mut state = state_with_capital(1_000.0);
        state.open_tranche(d(2024, 1, 2), 100.0, 11, 103.5);
    }

    #[test]
    fn seed_injection_rebases_to_total_assets() {
        let mut state = state_with_capital(8_000.0);
        // 30 shares at 100 leaves 5000 cash and 3000 in positions.
        state.open_tranche(d(2024, 1, 2), 100.0, 30, 101.4);
        assert!((state.available_cash() - 5_000.0).abs() < 1e-9);
        state.schedule_seed_event(SeedEvent {
            date: d(2024, 1, 3),
            amount: 10_000.0,
            note: "top up".to_string(),
        });

        assert!(state.apply_due_seed_events(d(2024, 1, 2), 100.0).is_empty());
        let applied = state.apply_due_seed_events(d(2024, 1, 3), 100.0);
        assert_eq!(applied.len(), 1);
        assert!((state.available_cash() - 15_000.0).abs() < 1e-9);
        assert!((state.investment_capital_baseline() - 18_000.0).abs() < 1e-9);

        // Never applied twice.
        assert!(state.apply_due_seed_events(d(2024, 1, 4), 100.0).is_empty());
    }

    #[test]
    fn withdrawal_lowers_baseline() {
        let mut state = state_with_capital(10_000.0);
        state.schedule_seed_event(SeedEvent {
            date: d(2024, 1, 3),
            amount: -4_000.0,
            note: String::new(),
        });
        state.apply_due_seed_events(d(2024, 1, 3), 50.0);
        assert!((state.available_cash() - 6_000.0).abs() < 1e-9);
        assert!((state.investment_capital_baseline() - 6_000.0).abs() < 1e-9);
    }

    #[test]
    fn rebase_happens_every_tenth_trading_day() {
        let mut state = state_with_capital(10_000.0);
        state.open_tranche(d(2024, 1, 2), 100.0, 10, 101.4);
        for _ in 0..9 {
            assert!(state.advance_trading_day(150.0).is_none());
        }
        let rebased = state.advance_trading_day(150.0).unwrap();
        assert!((rebased - (9_000.0 + 1_500.0)).abs() < 1e-9);
        assert_eq!(state.trading_day_counter(), 10);
    }

    #[test]
    fn close_batch_rebuilds_by_exclusion_and_defers_round() {
        let mut state = state_with_capital(10_000.0);
        let first = state.open_tranche(d(2024, 1, 2), 10.0, 10, 10.14);
        let second = state.open_tranche(d(2024, 1, 3), 9.0, 10, 9.126);
        let third = state.open_tranche(d(2024, 1, 4), 8.0, 10, 8.112);
        let cash_before = state.available_cash();

        let exits = vec![
            TrancheExit {
                tranche_id: second.id,
                date: d(2024, 1, 5),
                price: 9.5,
                reason: SellReason::TargetReached,
            },
            TrancheExit {
                tranche_id: second.id,
                date: d(2024, 1, 5),
                price: 9.5,
                reason: SellReason::TargetReached,
            },
        ];
        let closed = state.close_tranches(&exits);
        assert_eq!(closed.len(), 1);
        assert!((closed[0].realized_pnl - 5.0).abs() < 1e-9);
        assert!((state.available_cash() - (cash_before + 95.0)).abs() < 1e-9);
        assert_eq!(state.current_round(), 4);

        state.settle_rounds();
        assert_eq!(state.current_round(), 3);
        let ids: Vec<u64> = state.positions().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![first.id, third.id]);
        assert_eq!(state.positions()[1].round_index, 2);

        // Already closed: nothing happens.
        assert!(state.close_tranches(&exits).is_empty());
    }

    #[test]
    fn correction_moves_cash_and_rejects_overdraft() {
        let mut state = state_with_capital(1_000.0);
        state.open_tranche(d(2024, 1, 2), 10.0, 50, 10.14);
        assert!((state.available_cash() - 500.0).abs() < 1e-9);

        assert!(state.correct_tranche(1, 40, 10.0));
        assert!((state.available_cash() - 600.0).abs() < 1e-9);
        assert!((state.positions()[0].invested_amount - 400.0).abs() < 1e-9);

        assert!(!state.correct_tranche(1, 200, 10.0));
        assert_eq!(state.positions()[0].shares, 40);
        assert!((state.available_cash() - 600.0).abs() < 1e-9);

        assert!(!state.correct_tranche(9, 1, 1.0));
    }

    #[test]
    fn aggressive_only_policy_pins_regime() {
        let config = StrategyConfig {
            regime_policy: crate::config::RegimePolicy::AggressiveOnly,
            ..StrategyConfig::default()
        };
        let mut state = TraderState::new(config);
        assert_eq!(state.effective_regime(), Regime::Aggressive);
        assert_eq!(state.set_active_regime(Regime::Conservative), Regime::Aggressive);
        assert_eq!(state.active_config().round_count, 8);
    }
}
