use crate::calendar::{week_ending_friday, TradingCalendar};
use crate::config::StrategyConfig;
use crate::error::EngineError;
use crate::ledger::{ClosedTranche, TraderState};
use crate::market_data::PriceSeries;
use crate::models::{BacktestSummary, BuyFill, Candle, DailyLedgerRecord, SellFill};
use crate::performance::PerformanceCalculator;
use crate::reconciliation::reconcile;
use crate::regime::{determine_regime, initial_regime, lagged_readings, Regime};
use crate::rsi_reference::RsiLookup;
use crate::trading_rules::{buy_trigger, evaluate_buy, evaluate_sells, BuyOutcome};
use chrono::{Datelike, NaiveDate};
use log::{debug, info};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Initializing,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub enum BacktestOutcome {
    Completed(Box<BacktestSummary>),
    /// The requested window holds no trading day with data. Not a failure.
    Skipped {
        reason: &'static str,
        latest_trading_day: Option<NaiveDate>,
    },
}

/// A run that hit a fatal condition. The records appended before the
/// failing day are kept for diagnostics.
#[derive(Debug, Error)]
#[error("backtest failed: {error}")]
pub struct BacktestFailure {
    pub error: EngineError,
    pub failed_on: Option<NaiveDate>,
    pub daily_records: Vec<DailyLedgerRecord>,
    pub state: TraderState,
}

impl BacktestFailure {
    pub fn reason(&self) -> String {
        self.error.reason()
    }
}

pub enum SimulationRun {
    Ran(Box<Simulation>),
    Skipped {
        reason: &'static str,
        latest_trading_day: Option<NaiveDate>,
    },
}

/// One run's day-by-day fold over the traded series.
#[derive(Debug, Clone)]
pub struct Simulation {
    trader: TraderState,
    records: Vec<DailyLedgerRecord>,
    // Tranche id -> index of the record holding its buy fill.
    buy_rows: HashMap<u64, usize>,
    previous_close: Option<f64>,
    current_week: Option<NaiveDate>,
    week_number: usize,
    current_rsi: Option<f64>,
    settlement_pending: bool,
    run_state: RunState,
}

impl Simulation {
    /// Resolves the starting regime from the readings lagging the start week.
    /// Both readings must exist; the regime itself comes from the single
    /// one-week-ago value.
    pub fn initialize<L: RsiLookup + ?Sized>(
        config: StrategyConfig,
        rsi: &L,
        start: NaiveDate,
        previous_close: Option<f64>,
    ) -> Result<Self, (EngineError, TraderState)> {
        let mut trader = TraderState::new(config);
        if let Err(err) = trader.config().validate() {
            return Err((err, trader));
        }
        let (one_week_ago, _) = match lagged_readings(rsi, week_ending_friday(start)) {
            Ok(readings) => readings,
            Err(err) => return Err((err, trader)),
        };
        let regime = trader.set_active_regime(initial_regime(one_week_ago));
        info!(
            "Initial regime {} from weekly RSI {:.2} (start {})",
            regime, one_week_ago, start
        );

        Ok(Self {
            trader,
            records: Vec::new(),
            buy_rows: HashMap::new(),
            previous_close,
            current_week: None,
            week_number: 0,
            current_rsi: Some(one_week_ago),
            settlement_pending: false,
            run_state: RunState::Initializing,
        })
    }

    pub fn trader(&self) -> &TraderState {
        &self.trader
    }

    pub fn trader_mut(&mut self) -> &mut TraderState {
        &mut self.trader
    }

    pub fn records(&self) -> &[DailyLedgerRecord] {
        &self.records
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.records.last().map(|record| record.date)
    }

    pub fn current_week(&self) -> Option<NaiveDate> {
        self.current_week
    }

    pub fn previous_close(&self) -> Option<f64> {
        self.previous_close
    }

    /// Applies a deferred round recount from the last processed day's sells.
    pub fn settle_pending_rounds(&mut self) {
        if self.settlement_pending {
            self.trader.settle_rounds();
            self.settlement_pending = false;
        }
    }

    /// Processes one trading day. A missing weekly RSI at a week boundary is
    /// fatal and leaves the records of earlier days untouched.
    pub fn advance<L: RsiLookup + ?Sized>(
        &mut self,
        candle: &Candle,
        calendar: &TradingCalendar,
        rsi: &L,
    ) -> Result<(), EngineError> {
        self.run_state = RunState::Running;
        self.settle_pending_rounds();

        if let Some(baseline) = self.trader.advance_trading_day(candle.close) {
            debug!("{}: capital baseline rebased to {:.2}", candle.date, baseline);
        }
        self.trader.apply_due_seed_events(candle.date, candle.close);

        let week = week_ending_friday(candle.date);
        if self.current_week != Some(week) {
            if let Err(err) = self.reevaluate_regime(week, rsi) {
                self.run_state = RunState::Failed;
                return Err(err);
            }
        }

        let round_before_buy = self.trader.current_round();
        let mut sells = Vec::new();
        let mut buy = None;
        let mut trigger = None;

        if let Some(previous_close) = self.previous_close {
            let exits = evaluate_sells(&self.trader, candle, calendar);
            for closed in self.trader.close_tranches(&exits) {
                let holding_days = calendar.trading_days_between(closed.tranche.buy_date, candle.date);
                debug!(
                    "{}: sold round {} ({} shares) at {:.2}, {} (P&L {:+.2})",
                    candle.date,
                    closed.tranche.round_index,
                    closed.tranche.shares,
                    closed.sell_price,
                    closed.reason.label(),
                    closed.realized_pnl
                );
                self.attach_sell_to_buy_row(&closed, holding_days);
                sells.push(sell_fill(&closed, holding_days));
            }
            if !sells.is_empty() {
                // Freed rounds become available from the next day.
                self.settlement_pending = true;
            }

            trigger = Some(buy_trigger(previous_close, self.trader.active_config()));
            match evaluate_buy(&mut self.trader, previous_close, candle) {
                BuyOutcome::Filled(tranche) => {
                    debug!(
                        "{}: bought round {} ({} shares) at {:.2}",
                        candle.date, tranche.round_index, tranche.shares, tranche.buy_price
                    );
                    self.buy_rows.insert(tranche.id, self.records.len());
                    buy = Some(BuyFill {
                        tranche_id: tranche.id,
                        round_index: tranche.round_index,
                        trigger_price: tranche.nominal_target_price,
                        price: tranche.buy_price,
                        shares: tranche.shares,
                        amount: tranche.invested_amount,
                        sell_date: None,
                        sell_price: None,
                        holding_days: None,
                    });
                }
                BuyOutcome::Skipped { reason } => {
                    debug!("{}: no buy ({})", candle.date, reason);
                }
            }
        }

        let daily_realized_pnl = sells.iter().map(|sell| sell.realized_pnl).sum();
        let position_value = self.trader.position_value(candle.close);
        self.records.push(DailyLedgerRecord {
            date: candle.date,
            iso_week: candle.date.iso_week().week(),
            week_number: self.week_number,
            regime: self.trader.effective_regime(),
            rsi: self.current_rsi,
            close: candle.close,
            round_before_buy,
            buy_trigger: trigger,
            buy,
            sells,
            daily_realized_pnl,
            cumulative_realized_pnl: self.trader.realized_pnl(),
            cash_balance: self.trader.available_cash(),
            position_value,
            total_assets: self.trader.available_cash() + position_value,
            investment_capital_baseline: self.trader.investment_capital_baseline(),
            open_tranches: self.trader.positions().len(),
        });
        self.previous_close = Some(candle.close);
        Ok(())
    }

    fn reevaluate_regime<L: RsiLookup + ?Sized>(
        &mut self,
        week: NaiveDate,
        rsi: &L,
    ) -> Result<(), EngineError> {
        let (one_week_ago, two_weeks_ago) = lagged_readings(rsi, week)?;
        let previous = self.trader.effective_regime();
        let next = self
            .trader
            .set_active_regime(determine_regime(one_week_ago, two_weeks_ago, previous));
        if next != previous {
            info!(
                "Week ending {}: regime {} -> {} (RSI {:.2} / {:.2})",
                week,
                previous.code(),
                next.code(),
                two_weeks_ago,
                one_week_ago
            );
        }
        self.current_week = Some(week);
        self.week_number += 1;
        self.current_rsi = Some(one_week_ago);
        Ok(())
    }

    fn attach_sell_to_buy_row(&mut self, closed: &ClosedTranche, holding_days: usize) {
        let Some(row) = self.buy_rows.remove(&closed.tranche.id) else {
            return;
        };
        if let Some(fill) = self.records[row].buy.as_mut() {
            fill.sell_date = Some(closed.sell_date);
            fill.sell_price = Some(closed.sell_price);
            fill.holding_days = Some(holding_days);
        }
    }

    /// Runs the reconciliation sweep on this run's ledger through `as_of`
    /// and attaches the fills to their buy rows.
    pub fn reconcile(
        &mut self,
        series: &PriceSeries,
        as_of: NaiveDate,
        calendar: &TradingCalendar,
    ) -> Vec<ClosedTranche> {
        let closed = reconcile(&mut self.trader, series, as_of);
        if !closed.is_empty() {
            self.settlement_pending = false;
        }
        for entry in &closed {
            let holding_days = calendar.trading_days_between(entry.tranche.buy_date, entry.sell_date);
            self.attach_sell_to_buy_row(entry, holding_days);
        }
        closed
    }

    pub fn final_regime(&self) -> Regime {
        self.trader.effective_regime()
    }

    pub fn into_failure(self, error: EngineError, failed_on: Option<NaiveDate>) -> BacktestFailure {
        BacktestFailure {
            error,
            failed_on,
            daily_records: self.records,
            state: self.trader,
        }
    }

    /// Closes the run and summarizes it for the requested `[start, end]` window.
    pub fn finish(mut self, start: NaiveDate, end: NaiveDate) -> BacktestSummary {
        self.settle_pending_rounds();
        self.run_state = RunState::Completed;

        let initial_capital = self.trader.config().initial_capital;
        let performance = PerformanceCalculator::calculate_performance(&self.records, initial_capital);
        let drawdown = PerformanceCalculator::calculate_max_drawdown(&self.records);
        let final_total_assets = self
            .records
            .last()
            .map(|record| record.total_assets)
            .unwrap_or_else(|| self.trader.available_cash());

        let summary = BacktestSummary {
            run_id: Uuid::new_v4(),
            start,
            end,
            first_trading_day: self.records.first().map(|record| record.date),
            last_trading_day: self.last_date(),
            trading_days: self.records.len(),
            initial_capital,
            final_total_assets,
            total_return_pct: performance.total_return_pct,
            open_tranche_count: self.trader.positions().len(),
            final_round: self.trader.current_round(),
            final_regime: self.trader.effective_regime(),
            final_cash: self.trader.available_cash(),
            drawdown,
            performance,
            open_tranches: self.trader.positions().to_vec(),
            daily_records: self.records,
        };
        info!(
            "Backtest {} -> {}: {} trading days, final assets {:.2} ({:+.2}%), MDD {:.2}%, {} open tranche(s)",
            summary.start,
            summary.end,
            summary.trading_days,
            summary.final_total_assets,
            summary.total_return_pct,
            summary.drawdown.mdd_percent,
            summary.open_tranche_count
        );
        summary
    }
}

pub fn sell_fill(closed: &ClosedTranche, holding_days: usize) -> SellFill {
    SellFill {
        tranche_id: closed.tranche.id,
        round_index: closed.tranche.round_index,
        buy_date: closed.tranche.buy_date,
        sell_date: closed.sell_date,
        price: closed.sell_price,
        shares: closed.tranche.shares,
        proceeds: closed.proceeds,
        realized_pnl: closed.realized_pnl,
        holding_days,
        reason: closed.reason,
    }
}

/// Runs the strategy over a traded series using a weekly RSI source.
pub struct BacktestEngine<'a, L: RsiLookup + ?Sized> {
    config: StrategyConfig,
    calendar: &'a TradingCalendar,
    rsi: &'a L,
}

impl<'a, L: RsiLookup + ?Sized> BacktestEngine<'a, L> {
    pub fn new(config: StrategyConfig, calendar: &'a TradingCalendar, rsi: &'a L) -> Self {
        Self {
            config,
            calendar,
            rsi,
        }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn run(
        &self,
        series: &PriceSeries,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BacktestOutcome, BacktestFailure> {
        match self.simulate(series, start, end)? {
            SimulationRun::Ran(simulation) => {
                Ok(BacktestOutcome::Completed(Box::new(simulation.finish(start, end))))
            }
            SimulationRun::Skipped {
                reason,
                latest_trading_day,
            } => Ok(BacktestOutcome::Skipped {
                reason,
                latest_trading_day,
            }),
        }
    }

    /// Folds every trading day with data in `[start, end]`. The close before
    /// `start`, when present, seeds the first day's buy trigger.
    pub fn simulate(
        &self,
        series: &PriceSeries,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<SimulationRun, BacktestFailure> {
        let fail_early = |error: EngineError| BacktestFailure {
            error,
            failed_on: Some(start),
            daily_records: Vec::new(),
            state: TraderState::new(self.config.clone()),
        };

        let Some(latest) = series.last_date() else {
            return Err(fail_early(EngineError::MissingPriceData {
                symbol: series.symbol().to_string(),
            }));
        };
        if end < start {
            return Err(fail_early(EngineError::InvalidDate {
                input: format!("{}..{}", start, end),
            }));
        }
        if start > latest {
            info!(
                "Skipping backtest: start {} is after the latest trading day {}",
                start, latest
            );
            return Ok(SimulationRun::Skipped {
                reason: "window starts after the latest available trading day",
                latest_trading_day: Some(latest),
            });
        }

        let days = self.trading_days(series, start, end);
        if days.is_empty() {
            return Ok(SimulationRun::Skipped {
                reason: "no trading days with data in the requested window",
                latest_trading_day: Some(latest),
            });
        }

        let mut simulation = Simulation::initialize(
            self.config.clone(),
            self.rsi,
            days[0].date,
            series.previous_close(days[0].date),
        )
        .map_err(|(error, state)| BacktestFailure {
            error,
            failed_on: Some(start),
            daily_records: Vec::new(),
            state,
        })?;

        for candle in days {
            if let Err(error) = simulation.advance(candle, self.calendar, self.rsi) {
                return Err(simulation.into_failure(error, Some(candle.date)));
            }
        }
        Ok(SimulationRun::Ran(Box::new(simulation)))
    }

    /// Continues an existing simulation through `through`.
    pub fn resume(
        &self,
        simulation: &mut Simulation,
        series: &PriceSeries,
        through: NaiveDate,
    ) -> Result<usize, EngineError> {
        let Some(last) = simulation.last_date() else {
            return Ok(0);
        };
        let Some(from) = last.succ_opt() else {
            return Ok(0);
        };
        let mut processed = 0;
        for candle in self.trading_days(series, from, through) {
            simulation.advance(candle, self.calendar, self.rsi)?;
            processed += 1;
        }
        Ok(processed)
    }

    fn trading_days<'s>(&self, series: &'s PriceSeries, start: NaiveDate, end: NaiveDate) -> Vec<&'s Candle> {
        series
            .window(start, end)
            .iter()
            .filter(|candle| {
                let open = self.calendar.is_trading_day(candle.date);
                if !open {
                    debug!("Ignoring {} bar on non-trading day {}", series.symbol(), candle.date);
                }
                open
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegimeConfig;
    use crate::models::{SeedEvent, SellReason};

    struct FlatRsi(f64);

    impl RsiLookup for FlatRsi {
        fn lookup_rsi(&self, _date: NaiveDate) -> Option<f64> {
            Some(self.0)
        }
    }

    struct RsiUntil(NaiveDate);

    impl RsiLookup for RsiUntil {
        fn lookup_rsi(&self, date: NaiveDate) -> Option<f64> {
            (date < self.0).then_some(55.0)
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn series(points: &[(NaiveDate, f64)]) -> PriceSeries {
        PriceSeries::new(
            "SOXL",
            points
                .iter()
                .map(|(date, close)| Candle {
                    date: *date,
                    open: *close,
                    high: *close,
                    low: *close,
                    close: *close,
                    volume: 1_000,
                })
                .collect(),
        )
    }

    fn completed(outcome: BacktestOutcome) -> BacktestSummary {
        match outcome {
            BacktestOutcome::Completed(summary) => *summary,
            other => panic!("expected a completed run, got {:?}", other),
        }
    }

    #[test]
    fn freed_round_is_reused_only_on_the_next_day() {
        let calendar = TradingCalendar::nyse();
        let rsi = FlatRsi(55.0);
        let engine = BacktestEngine::new(StrategyConfig::default(), &calendar, &rsi);
        let prices = series(&[
            (d(2024, 1, 2), 100.0),
            (d(2024, 1, 3), 99.0),
            (d(2024, 1, 4), 101.0),
            (d(2024, 1, 5), 101.0),
        ]);

        let summary = completed(engine.run(&prices, d(2024, 1, 3), d(2024, 1, 5)).unwrap());
        let records = &summary.daily_records;
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.regime == Regime::Conservative));

        // floor(9000 * 0.049 / 103.5) = 4 shares at the close.
        let first_buy = records[0].buy.as_ref().unwrap();
        assert_eq!(first_buy.shares, 4);
        assert_eq!(first_buy.price, 99.0);
        assert_eq!(first_buy.sell_date, Some(d(2024, 1, 4)));
        assert_eq!(first_buy.holding_days, Some(1));

        assert_eq!(records[1].sells.len(), 1);
        assert!((records[1].daily_realized_pnl - 8.0).abs() < 1e-9);
        assert_eq!(records[1].round_before_buy, 2);
        assert_eq!(records[1].buy.as_ref().unwrap().round_index, 2);

        assert_eq!(records[2].round_before_buy, 2);
        assert_eq!(records[2].buy.as_ref().unwrap().shares, 10);

        assert_eq!(summary.open_tranche_count, 2);
        assert_eq!(summary.final_round, 3);
        assert!((summary.final_cash - 6_887.0).abs() < 1e-9);
        assert!((summary.final_total_assets - 9_008.0).abs() < 1e-9);
    }

    #[test]
    fn time_exit_after_max_hold() {
        let calendar = TradingCalendar::nyse();
        let rsi = FlatRsi(55.0);
        let config = StrategyConfig {
            conservative: RegimeConfig {
                max_hold_trading_days: 2,
                ..RegimeConfig::conservative_default()
            },
            ..StrategyConfig::default()
        };
        let engine = BacktestEngine::new(config, &calendar, &rsi);
        let prices = series(&[
            (d(2024, 1, 2), 100.0),
            (d(2024, 1, 3), 99.0),
            (d(2024, 1, 4), 98.5),
            (d(2024, 1, 5), 98.0),
            (d(2024, 1, 8), 97.5),
        ]);

        let summary = completed(engine.run(&prices, d(2024, 1, 3), d(2024, 1, 8)).unwrap());
        let records = &summary.daily_records;
        assert!(records[1].sells.is_empty());
        assert!(records[2].sells.is_empty());
        assert_eq!(records[3].sells.len(), 1);
        assert_eq!(records[3].sells[0].reason, SellReason::MaxHoldExceeded);
        assert_eq!(records[3].sells[0].holding_days, 3);
        assert_eq!(
            records[3].sells[0].tranche_id,
            records[0].buy.as_ref().unwrap().tranche_id
        );
    }

    #[test]
    fn missing_rsi_mid_run_fails_and_keeps_partial_ledger() {
        let calendar = TradingCalendar::nyse();
        let rsi = RsiUntil(d(2024, 1, 5));
        let engine = BacktestEngine::new(StrategyConfig::default(), &calendar, &rsi);
        let prices = series(&[
            (d(2024, 1, 2), 100.0),
            (d(2024, 1, 3), 99.0),
            (d(2024, 1, 4), 98.0),
            (d(2024, 1, 5), 97.0),
            (d(2024, 1, 8), 96.0),
        ]);

        let failure = engine.run(&prices, d(2024, 1, 3), d(2024, 1, 8)).unwrap_err();
        assert_eq!(failure.failed_on, Some(d(2024, 1, 8)));
        assert_eq!(failure.daily_records.len(), 3);
        assert!(failure.error.is_fatal());
        assert_eq!(
            failure.error,
            EngineError::MissingRsi {
                week_ending: d(2024, 1, 5),
                label: "one week ago",
            }
        );
        assert!(!failure.state.positions().is_empty());
    }

    #[test]
    fn missing_rsi_at_start_is_fatal() {
        let calendar = TradingCalendar::nyse();
        let rsi = RsiUntil(d(2000, 1, 1));
        let engine = BacktestEngine::new(StrategyConfig::default(), &calendar, &rsi);
        let prices = series(&[(d(2024, 1, 2), 100.0), (d(2024, 1, 3), 99.0)]);

        let failure = engine.run(&prices, d(2024, 1, 2), d(2024, 1, 3)).unwrap_err();
        assert!(failure.daily_records.is_empty());
        assert!(matches!(failure.error, EngineError::MissingRsi { .. }));
    }

    #[test]
    fn window_after_latest_data_is_skipped() {
        let calendar = TradingCalendar::nyse();
        let rsi = FlatRsi(55.0);
        let engine = BacktestEngine::new(StrategyConfig::default(), &calendar, &rsi);
        let prices = series(&[(d(2024, 1, 2), 100.0)]);

        match engine.run(&prices, d(2024, 2, 1), d(2024, 3, 1)).unwrap() {
            BacktestOutcome::Skipped {
                latest_trading_day, ..
            } => assert_eq!(latest_trading_day, Some(d(2024, 1, 2))),
            other => panic!("expected skip, got {:?}", other),
        }

        let empty = PriceSeries::new("SOXL", Vec::new());
        let failure = engine.run(&empty, d(2024, 1, 2), d(2024, 1, 3)).unwrap_err();
        assert!(matches!(failure.error, EngineError::MissingPriceData { .. }));
    }

    #[test]
    fn seed_event_on_weekend_lands_on_next_trading_day() {
        let calendar = TradingCalendar::nyse();
        let rsi = FlatRsi(55.0);
        let config = StrategyConfig {
            seed_events: vec![SeedEvent {
                date: d(2024, 1, 6),
                amount: 1_000.0,
                note: "weekend deposit".to_string(),
            }],
            ..StrategyConfig::default()
        };
        let engine = BacktestEngine::new(config, &calendar, &rsi);
        // Prices jump every day so no buy ever triggers.
        let prices = series(&[
            (d(2024, 1, 4), 100.0),
            (d(2024, 1, 5), 110.0),
            (d(2024, 1, 8), 121.0),
        ]);

        let summary = completed(engine.run(&prices, d(2024, 1, 5), d(2024, 1, 8)).unwrap());
        assert!((summary.daily_records[0].cash_balance - 9_000.0).abs() < 1e-9);
        assert!((summary.daily_records[1].cash_balance - 10_000.0).abs() < 1e-9);
        assert!((summary.daily_records[1].investment_capital_baseline - 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn resume_continues_from_the_last_processed_day() {
        let calendar = TradingCalendar::nyse();
        let rsi = FlatRsi(55.0);
        let engine = BacktestEngine::new(StrategyConfig::default(), &calendar, &rsi);
        let prices = series(&[
            (d(2024, 1, 2), 100.0),
            (d(2024, 1, 3), 99.0),
            (d(2024, 1, 4), 101.0),
            (d(2024, 1, 5), 101.0),
        ]);

        let SimulationRun::Ran(mut partial) = engine.simulate(&prices, d(2024, 1, 3), d(2024, 1, 4)).unwrap() else {
            panic!("expected a simulation");
        };
        assert_eq!(engine.resume(&mut partial, &prices, d(2024, 1, 5)).unwrap(), 1);
        let resumed = partial.finish(d(2024, 1, 3), d(2024, 1, 5));

        let full = completed(engine.run(&prices, d(2024, 1, 3), d(2024, 1, 5)).unwrap());
        assert_eq!(resumed.daily_records, full.daily_records);
    }

    #[test]
    fn summary_echoes_the_requested_window() {
        let calendar = TradingCalendar::nyse();
        let rsi = FlatRsi(55.0);
        let engine = BacktestEngine::new(StrategyConfig::default(), &calendar, &rsi);
        let prices = series(&[
            (d(2024, 1, 2), 100.0),
            (d(2024, 1, 3), 99.0),
            (d(2024, 1, 4), 101.0),
            (d(2024, 1, 5), 101.0),
        ]);

        let summary = completed(engine.run(&prices, d(2023, 12, 30), d(2024, 1, 7)).unwrap());
        assert_eq!(summary.start, d(2023, 12, 30));
        assert_eq!(summary.end, d(2024, 1, 7));
        assert_eq!(summary.first_trading_day, Some(d(2024, 1, 2)));
        assert_eq!(summary.last_trading_day, Some(d(2024, 1, 5)));
        assert_eq!(summary.trading_days, 4);
    }
}
