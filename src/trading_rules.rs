use crate::calendar::TradingCalendar;
use crate::config::RegimeConfig;
use crate::ledger::{TraderState, TrancheExit};
use crate::models::{Candle, SellReason, Tranche};

pub const PRICE_EPSILON: f64 = 1e-9;

pub fn buy_trigger(previous_close: f64, config: &RegimeConfig) -> f64 {
    previous_close * (1.0 + config.buy_threshold_pct / 100.0)
}

pub fn sell_trigger(buy_price: f64, config: &RegimeConfig) -> f64 {
    buy_price * (1.0 + config.sell_threshold_pct / 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SellDecision {
    Hold,
    Sell { reason: SellReason, price: f64 },
}

/// Limit-on-close exit check for one tranche. The target is checked before
/// the time exit, so a tranche gets at most one reason per day.
pub fn evaluate_sell(
    tranche: &Tranche,
    today: &Candle,
    holding_days: usize,
    config: &RegimeConfig,
) -> SellDecision {
    let target = sell_trigger(tranche.buy_price, config);
    if today.close + PRICE_EPSILON >= target {
        return SellDecision::Sell {
            reason: SellReason::TargetReached,
            price: today.close,
        };
    }
    if holding_days > config.max_hold_trading_days as usize {
        return SellDecision::Sell {
            reason: SellReason::MaxHoldExceeded,
            price: today.close,
        };
    }
    SellDecision::Hold
}

/// Exits for every open tranche on `today`, each judged with the thresholds
/// of the regime it was bought under.
pub fn evaluate_sells(
    state: &TraderState,
    today: &Candle,
    calendar: &TradingCalendar,
) -> Vec<TrancheExit> {
    state
        .positions()
        .iter()
        .filter_map(|tranche| {
            let holding_days = calendar.trading_days_between(tranche.buy_date, today.date);
            match evaluate_sell(tranche, today, holding_days, state.config_for_tranche(tranche)) {
                SellDecision::Hold => None,
                SellDecision::Sell { reason, price } => Some(TrancheExit {
                    tranche_id: tranche.id,
                    date: today.date,
                    price,
                    reason,
                }),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum BuyOutcome {
    Filled(Tranche),
    Skipped { reason: &'static str },
}

/// Shares for a round: sized off the trigger, clamped to what `spendable_cash`
/// buys at the close. Zero means no fill.
pub fn size_buy(round_size: f64, trigger: f64, close: f64, spendable_cash: f64) -> u64 {
    if !(trigger > 0.0) || !(close > 0.0) || !round_size.is_finite() || round_size <= 0.0 {
        return 0;
    }
    let mut shares = (round_size / trigger).floor();
    if shares * close > spendable_cash + PRICE_EPSILON {
        shares = (spendable_cash.max(0.0) / close).floor();
    }
    if shares.is_finite() && shares > 0.0 {
        shares as u64
    } else {
        0
    }
}

/// Cash a new buy may use after the configured buffer.
pub fn spendable_cash(state: &TraderState, close: f64) -> f64 {
    let buffer = state.config().risk.cash_buffer_ratio * state.total_assets(close);
    (state.available_cash() - buffer).max(0.0)
}

/// Buy-the-dip check: fills at the close when the close stays below the
/// trigger computed from the previous close.
pub fn evaluate_buy(state: &mut TraderState, previous_close: f64, today: &Candle) -> BuyOutcome {
    let trigger = buy_trigger(previous_close, state.active_config());
    if !(trigger > today.close) {
        return BuyOutcome::Skipped {
            reason: "close_above_trigger",
        };
    }
    if !state.can_open_next_round() {
        return BuyOutcome::Skipped {
            reason: "round_unavailable",
        };
    }
    if let Some(cap) = state.config().risk.position_cap_ratio {
        let total = state.total_assets(today.close);
        if total > 0.0 && state.position_value(today.close) >= cap * total {
            return BuyOutcome::Skipped {
                reason: "position_cap_reached",
            };
        }
    }

    let round_size = state.round_size(state.current_round());
    let shares = size_buy(
        round_size,
        trigger,
        today.close,
        spendable_cash(state, today.close),
    );
    if shares == 0 {
        return BuyOutcome::Skipped {
            reason: "no_affordable_shares",
        };
    }

    BuyOutcome::Filled(state.open_tranche(today.date, today.close, shares, trigger))
}
