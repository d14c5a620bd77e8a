use crate::calendar::{week_ending_friday, Clock, TradingCalendar};
use crate::config::StrategyConfig;
use crate::engine::{sell_fill, BacktestEngine, BacktestFailure, BacktestOutcome, Simulation, SimulationRun};
use crate::error::EngineError;
use crate::ledger::TraderState;
use crate::market_data::PriceSeries;
use crate::models::{SeedEvent, SellFill};
use crate::regime::{determine_regime, lagged_readings, Regime};
use crate::rsi_reference::RsiLookup;
use crate::trading_rules::{buy_trigger, sell_trigger, size_buy, spendable_cash};
use chrono::NaiveDate;
use log::{info, warn};
use serde::Serialize;

pub type SharedRsiLookup = Box<dyn RsiLookup + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RsiReadings {
    pub week_ending: NaiveDate,
    pub one_week_ago: f64,
    pub two_weeks_ago: f64,
}

/// Limit-on-close buy order for the next session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuyPlan {
    pub round: usize,
    pub limit_price: f64,
    pub round_amount: f64,
    pub estimated_shares: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SellPlan {
    pub round_index: usize,
    pub buy_date: NaiveDate,
    pub buy_price: f64,
    pub shares: u64,
    pub regime_at_purchase: Regime,
    pub target_price: f64,
    pub holding_days: usize,
    pub max_hold_days: u32,
    /// Sell at the close regardless of price.
    pub time_exit_due: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSnapshot {
    pub cash: f64,
    pub position_value: f64,
    pub total_assets: f64,
    pub investment_capital_baseline: f64,
    pub current_round: usize,
    pub open_tranches: usize,
    pub realized_pnl: f64,
}

impl PortfolioSnapshot {
    fn of(state: &TraderState, close: f64) -> Self {
        Self {
            cash: state.available_cash(),
            position_value: state.position_value(close),
            total_assets: state.total_assets(close),
            investment_capital_baseline: state.investment_capital_baseline(),
            current_round: state.current_round(),
            open_tranches: state.positions().len(),
            realized_pnl: state.realized_pnl(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyRecommendation {
    /// Session the orders are meant for.
    pub date: NaiveDate,
    /// Last completed trading day the state was computed through.
    pub basis_date: NaiveDate,
    pub basis_close: f64,
    pub regime: Regime,
    pub rsi_readings: RsiReadings,
    pub buy_plan: Option<BuyPlan>,
    pub buy_skip_reason: Option<&'static str>,
    pub sell_plans: Vec<SellPlan>,
    pub portfolio_snapshot: PortfolioSnapshot,
    pub reconciled: Vec<SellFill>,
}

/// Caller-facing handle over one strategy run that follows the calendar.
/// The simulated state is cached until reset or until the as-of date moves
/// behind it; moving forward extends the cached run.
pub struct TraderSession {
    config: StrategyConfig,
    calendar: TradingCalendar,
    clock: Box<dyn Clock>,
    traded: PriceSeries,
    rsi: SharedRsiLookup,
    session_start: NaiveDate,
    as_of_override: Option<NaiveDate>,
    cached: Option<Simulation>,
    corrections_applied: usize,
}

impl TraderSession {
    pub fn new(
        config: StrategyConfig,
        calendar: TradingCalendar,
        clock: Box<dyn Clock>,
        traded: PriceSeries,
        rsi: SharedRsiLookup,
        session_start: NaiveDate,
    ) -> Self {
        Self {
            config,
            calendar,
            clock,
            traded,
            rsi,
            session_start,
            as_of_override: None,
            cached: None,
            corrections_applied: 0,
        }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn simulation(&self) -> Option<&Simulation> {
        self.cached.as_ref()
    }

    /// Latest completed trading day, or the override mapped onto a trading day.
    pub fn as_of(&self) -> NaiveDate {
        match self.as_of_override {
            Some(date) => self.calendar.trading_day_on_or_before(date),
            None => self.calendar.latest_completed_trading_day(self.clock.now()),
        }
    }

    /// Independent run over `[start, end]`; never touches the session state.
    pub fn run_backtest(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BacktestOutcome, BacktestFailure> {
        BacktestEngine::new(self.config.clone(), &self.calendar, self.rsi.as_ref()).run(
            &self.traded,
            start,
            end,
        )
    }

    pub fn set_as_of_override(&mut self, date: Option<NaiveDate>) {
        if self.as_of_override != date {
            match date {
                Some(date) => info!("As-of date overridden to {}", date),
                None => info!("As-of override cleared"),
            }
            self.as_of_override = date;
        }
    }

    /// Drops the simulated state. Recorded seed events are kept.
    pub fn reset_state(&mut self) {
        if self.corrections_applied > 0 {
            warn!(
                "Discarding {} manual tranche correction(s)",
                self.corrections_applied
            );
        }
        self.cached = None;
        self.corrections_applied = 0;
        info!("Session state reset");
    }

    pub fn add_seed_event(
        &mut self,
        date: NaiveDate,
        amount: f64,
        note: impl Into<String>,
    ) -> Result<(), EngineError> {
        if !amount.is_finite() {
            return Err(EngineError::InvalidConfig(format!(
                "seed amount must be finite (value: {})",
                amount
            )));
        }
        let event = SeedEvent {
            date,
            amount,
            note: note.into(),
        };
        self.config.seed_events.push(event.clone());

        let ahead_of_state = self
            .cached
            .as_ref()
            .map(|simulation| simulation.last_date().map_or(false, |last| last < date));
        match ahead_of_state {
            Some(true) => {
                if let Some(simulation) = self.cached.as_mut() {
                    simulation.trader_mut().schedule_seed_event(event);
                }
            }
            Some(false) => {
                info!(
                    "Seed event on {} predates the simulated state; it will be rebuilt",
                    date
                );
                self.reset_state();
            }
            None => {}
        }
        Ok(())
    }

    /// Replaces shares and price of an open round. `Ok(false)` means the
    /// round is unknown or the change would overdraw cash.
    pub fn correct_tranche(
        &mut self,
        round_index: usize,
        shares: u64,
        buy_price: f64,
    ) -> Result<bool, EngineError> {
        self.sync()?;
        let Some(simulation) = self.cached.as_mut() else {
            return Ok(false);
        };
        simulation.settle_pending_rounds();
        let applied = simulation
            .trader_mut()
            .correct_tranche(round_index, shares, buy_price);
        if applied {
            self.corrections_applied += 1;
        }
        Ok(applied)
    }

    /// Brings the state up to the latest completed trading day, reconciles
    /// open tranches against the full close history and plans the next
    /// session's limit-on-close orders.
    pub fn daily_recommendation(&mut self) -> Result<DailyRecommendation, EngineError> {
        let basis_date = self.sync()?;
        let basis_close = self
            .traded
            .close_on(basis_date)
            .ok_or_else(|| EngineError::MissingPriceData {
                symbol: self.traded.symbol().to_string(),
            })?;
        let Some(simulation) = self.cached.as_mut() else {
            return Err(EngineError::InsufficientData(
                "no simulated state available".to_string(),
            ));
        };

        let reconciled: Vec<SellFill> = simulation
            .reconcile(&self.traded, basis_date, &self.calendar)
            .iter()
            .map(|closed| {
                sell_fill(
                    closed,
                    self.calendar
                        .trading_days_between(closed.tranche.buy_date, closed.sell_date),
                )
            })
            .collect();
        simulation.settle_pending_rounds();

        let date = self.calendar.next_trading_day(basis_date);
        let plan_week = week_ending_friday(date);
        let (one_week_ago, two_weeks_ago) = lagged_readings(self.rsi.as_ref(), plan_week)
            .map_err(|err| EngineError::InsufficientData(err.to_string()))?;

        let mut planning = simulation.trader().clone();
        if simulation.current_week() != Some(plan_week) {
            let previous = planning.effective_regime();
            planning.set_active_regime(determine_regime(one_week_ago, two_weeks_ago, previous));
        }

        let (buy_plan, buy_skip_reason) = plan_buy(&planning, basis_close);
        let sell_plans = planning
            .positions()
            .iter()
            .map(|tranche| {
                let config = planning.config_for_tranche(tranche);
                let holding_days = self.calendar.trading_days_between(tranche.buy_date, date);
                SellPlan {
                    round_index: tranche.round_index,
                    buy_date: tranche.buy_date,
                    buy_price: tranche.buy_price,
                    shares: tranche.shares,
                    regime_at_purchase: tranche.regime_at_purchase,
                    target_price: sell_trigger(tranche.buy_price, config),
                    holding_days,
                    max_hold_days: config.max_hold_trading_days,
                    time_exit_due: holding_days > config.max_hold_trading_days as usize,
                }
            })
            .collect();

        let recommendation = DailyRecommendation {
            date,
            basis_date,
            basis_close,
            regime: planning.effective_regime(),
            rsi_readings: RsiReadings {
                week_ending: plan_week,
                one_week_ago,
                two_weeks_ago,
            },
            buy_plan,
            buy_skip_reason,
            sell_plans,
            portfolio_snapshot: PortfolioSnapshot::of(&planning, basis_close),
            reconciled,
        };
        info!(
            "Recommendation for {} (basis {}): regime {}, {} sell order(s), buy {}",
            recommendation.date,
            recommendation.basis_date,
            recommendation.regime.code(),
            recommendation.sell_plans.len(),
            recommendation
                .buy_plan
                .as_ref()
                .map(|plan| format!("round {} at {:.2}", plan.round, plan.limit_price))
                .unwrap_or_else(|| recommendation.buy_skip_reason.unwrap_or("none").to_string())
        );
        Ok(recommendation)
    }

    /// Simulates through the last bar on or before the as-of date, reusing
    /// the cached run when it is not ahead of that bar.
    fn sync(&mut self) -> Result<NaiveDate, EngineError> {
        let as_of = self.as_of();
        let Some(basis_date) = self
            .traded
            .window(self.session_start, as_of)
            .last()
            .map(|candle| candle.date)
        else {
            if self.traded.is_empty() {
                return Err(EngineError::MissingPriceData {
                    symbol: self.traded.symbol().to_string(),
                });
            }
            return Err(EngineError::InsufficientData(format!(
                "no {} bars between {} and {}",
                self.traded.symbol(),
                self.session_start,
                as_of
            )));
        };

        let engine = BacktestEngine::new(self.config.clone(), &self.calendar, self.rsi.as_ref());
        match self.cached.take() {
            Some(simulation) if simulation.last_date().map_or(false, |last| last <= basis_date) => {
                // Extend a copy so a failed day leaves the cached state and
                // any manual corrections in place.
                let mut extended = simulation.clone();
                match engine.resume(&mut extended, &self.traded, basis_date) {
                    Ok(_) => self.cached = Some(extended),
                    Err(err) => {
                        warn!(
                            "Could not extend state from {:?} to {}: {}",
                            simulation.last_date(),
                            basis_date,
                            err
                        );
                        self.cached = Some(simulation);
                        return Err(err);
                    }
                }
            }
            stale => {
                if stale.is_some() && self.corrections_applied > 0 {
                    warn!(
                        "Rebuilding state behind {}; {} manual correction(s) discarded",
                        basis_date, self.corrections_applied
                    );
                    self.corrections_applied = 0;
                }
                match engine.simulate(&self.traded, self.session_start, basis_date) {
                    Ok(SimulationRun::Ran(simulation)) => self.cached = Some(*simulation),
                    Ok(SimulationRun::Skipped { reason, .. }) => {
                        return Err(EngineError::InsufficientData(reason.to_string()))
                    }
                    Err(failure) => {
                        warn!(
                            "Session simulation failed on {:?} after {} day(s): {}",
                            failure.failed_on,
                            failure.daily_records.len(),
                            failure.reason()
                        );
                        return Err(failure.error);
                    }
                }
            }
        }
        Ok(basis_date)
    }
}

fn plan_buy(state: &TraderState, basis_close: f64) -> (Option<BuyPlan>, Option<&'static str>) {
    let config = state.active_config();
    let round = state.current_round();
    if round > config.round_count {
        return (None, Some("all rounds in use"));
    }
    if !state.can_open_next_round() {
        return (None, Some("insufficient cash for the next round"));
    }
    if let Some(cap) = state.config().risk.position_cap_ratio {
        let total = state.total_assets(basis_close);
        if total > 0.0 && state.position_value(basis_close) >= cap * total {
            return (None, Some("position cap reached"));
        }
    }

    let limit_price = buy_trigger(basis_close, config);
    let round_amount = state.round_size(round);
    // Worst case: the close lands right at the limit.
    let estimated_shares = size_buy(
        round_amount,
        limit_price,
        limit_price,
        spendable_cash(state, basis_close),
    );
    if estimated_shares == 0 {
        return (None, Some("no affordable shares"));
    }
    (
        Some(BuyPlan {
            round,
            limit_price,
            round_amount,
            estimated_shares,
        }),
        None,
    )
}
