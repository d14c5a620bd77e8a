use crate::ledger::{ClosedTranche, TraderState, TrancheExit};
use crate::market_data::PriceSeries;
use crate::models::SellReason;
use crate::trading_rules::{sell_trigger, PRICE_EPSILON};
use chrono::{Duration, NaiveDate};
use log::info;

/// Sweeps every open tranche against the closes after its buy date, up to and
/// including `as_of`. The first close at or above the tranche's target closes
/// it at that close, as a resting limit-on-close order would have filled.
/// Rounds are settled when anything closed, so a second pass over the same
/// data closes nothing.
pub fn reconcile(state: &mut TraderState, series: &PriceSeries, as_of: NaiveDate) -> Vec<ClosedTranche> {
    let exits: Vec<TrancheExit> = state
        .positions()
        .iter()
        .filter_map(|tranche| {
            let target = sell_trigger(tranche.buy_price, state.config_for_tranche(tranche));
            series
                .window(tranche.buy_date + Duration::days(1), as_of)
                .iter()
                .find(|candle| candle.close + PRICE_EPSILON >= target)
                .map(|candle| TrancheExit {
                    tranche_id: tranche.id,
                    date: candle.date,
                    price: candle.close,
                    reason: SellReason::Reconciled,
                })
        })
        .collect();

    if exits.is_empty() {
        return Vec::new();
    }

    let closed = state.close_tranches(&exits);
    for entry in &closed {
        info!(
            "Reconciled round {} bought {} at {:.2}: filled {} at {:.2} (P&L {:+.2})",
            entry.tranche.round_index,
            entry.tranche.buy_date,
            entry.tranche.buy_price,
            entry.sell_date,
            entry.sell_price,
            entry.realized_pnl
        );
    }
    state.settle_rounds();
    closed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyConfig;
    use crate::models::Candle;
    use crate::regime::Regime;

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
                    volume: 1,
                })
                .collect(),
        )
    }

    fn state() -> TraderState {
        let mut state = TraderState::new(StrategyConfig {
            initial_capital: 100_000.0,
            ..StrategyConfig::default()
        });
        state.set_active_regime(Regime::Conservative);
        state
    }

    #[test]
    fn closes_at_first_qualifying_close_after_buy_date() {
        let mut state = state();
        state.open_tranche(d(2024, 1, 2), 100.0, 10, 103.5);
        state.open_tranche(d(2024, 1, 3), 99.0, 10, 103.0);
        let prices = series(&[
            (d(2024, 1, 2), 102.0),
            (d(2024, 1, 3), 99.0),
            (d(2024, 1, 4), 101.0),
            (d(2024, 1, 5), 101.6),
            (d(2024, 1, 8), 103.0),
        ]);

        let closed = reconcile(&mut state, &prices, d(2024, 1, 8));
        assert_eq!(closed.len(), 2);
        // 100 * 1.014 = 101.4 is first reached on the 5th.
        assert_eq!(closed[0].sell_date, d(2024, 1, 5));
        assert!((closed[0].sell_price - 101.6).abs() < 1e-9);
        // 99 * 1.014 = 100.386 is reached on the 4th.
        assert_eq!(closed[1].sell_date, d(2024, 1, 4));
        assert_eq!(closed[1].reason, SellReason::Reconciled);
        assert!(state.positions().is_empty());
        assert_eq!(state.current_round(), 1);
    }

    #[test]
    fn ignores_the_buy_day_and_dates_after_as_of() {
        let mut state = state();
        state.open_tranche(d(2024, 1, 2), 100.0, 10, 103.5);
        let prices = series(&[(d(2024, 1, 2), 110.0), (d(2024, 1, 3), 100.0), (d(2024, 1, 4), 110.0)]);

        assert!(reconcile(&mut state, &prices, d(2024, 1, 3)).is_empty());
        assert_eq!(state.positions().len(), 1);
        assert_eq!(reconcile(&mut state, &prices, d(2024, 1, 4)).len(), 1);
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let mut state = state();
        state.open_tranche(d(2024, 1, 2), 100.0, 10, 103.5);
        state.open_tranche(d(2024, 1, 3), 120.0, 10, 103.5);
        let prices = series(&[(d(2024, 1, 3), 120.0), (d(2024, 1, 4), 105.0)]);

        let first = reconcile(&mut state, &prices, d(2024, 1, 4));
        assert_eq!(first.len(), 1);
        let cash = state.available_cash();
        assert!(reconcile(&mut state, &prices, d(2024, 1, 4)).is_empty());
        assert_eq!(state.available_cash(), cash);
        assert_eq!(state.current_round(), state.positions().len() + 1);
        assert_eq!(state.positions()[0].round_index, 1);
    }
}
