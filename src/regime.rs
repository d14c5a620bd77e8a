use crate::calendar::week_ending_friday;
use crate::error::EngineError;
use crate::rsi_reference::RsiLookup;
use chrono::{Duration, NaiveDate};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_MAX_LOOKBACK_WEEKS: usize = 52;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    /// SF: smaller dips bought, quick profit taking, long holds.
    Conservative,
    /// AG: deeper allocation, wider targets, short holds.
    Aggressive,
}

impl Regime {
    pub fn code(self) -> &'static str {
        match self {
            Regime::Conservative => "SF",
            Regime::Aggressive => "AG",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regime::Conservative => write!(f, "Conservative (SF)"),
            Regime::Aggressive => write!(f, "Aggressive (AG)"),
        }
    }
}

/// Weekly regime rule. Conservative rules are checked first, then
/// Aggressive; with no signal the previous regime carries over.
pub fn determine_regime(one_week_ago_rsi: f64, two_weeks_ago_rsi: f64, previous: Regime) -> Regime {
    let one = one_week_ago_rsi;
    let two = two_weeks_ago_rsi;

    let falling_from_overbought = two > 65.0 && two > one;
    let falling_in_low_band = two > 40.0 && two < 50.0 && two > one;
    let crossing_down = two >= 50.0 && one < 50.0;
    if falling_from_overbought || falling_in_low_band || crossing_down {
        return Regime::Conservative;
    }

    let crossing_up = two < 50.0 && two < one && one > 50.0;
    let rising_in_high_band = two > 50.0 && two < 60.0 && two < one;
    let rising_from_oversold = two < 35.0 && two < one;
    if crossing_up || rising_in_high_band || rising_from_oversold {
        return Regime::Aggressive;
    }

    previous
}

/// Starting regime from a single reading, used once when no prior regime exists.
pub fn initial_regime(rsi: f64) -> Regime {
    if rsi >= 50.0 {
        Regime::Conservative
    } else {
        Regime::Aggressive
    }
}

/// The two completed-week readings that drive the regime of the week ending `week_friday`.
pub fn lagged_readings<L: RsiLookup + ?Sized>(
    lookup: &L,
    week_friday: NaiveDate,
) -> Result<(f64, f64), EngineError> {
    let one_week_ago = week_friday - Duration::days(7);
    let two_weeks_ago = week_friday - Duration::days(14);
    let one = lookup
        .lookup_rsi(one_week_ago)
        .ok_or(EngineError::MissingRsi {
            week_ending: one_week_ago,
            label: "one week ago",
        })?;
    let two = lookup
        .lookup_rsi(two_weeks_ago)
        .ok_or(EngineError::MissingRsi {
            week_ending: two_weeks_ago,
            label: "two weeks ago",
        })?;
    Ok((one, two))
}

/// Resolves the regime in force for an arbitrary week without a running
/// simulation: walks back at most `max_lookback_weeks`, seeds from the
/// single-reading rule at the horizon and replays forward. Every resolved
/// week is memoized.
pub struct RegimeResolver<'a, L: RsiLookup + ?Sized> {
    lookup: &'a L,
    memo: BTreeMap<NaiveDate, Regime>,
    max_lookback_weeks: usize,
}

impl<'a, L: RsiLookup + ?Sized> RegimeResolver<'a, L> {
    pub fn new(lookup: &'a L) -> Self {
        Self::with_lookback(lookup, DEFAULT_MAX_LOOKBACK_WEEKS)
    }

    pub fn with_lookback(lookup: &'a L, max_lookback_weeks: usize) -> Self {
        Self {
            lookup,
            memo: BTreeMap::new(),
            max_lookback_weeks: max_lookback_weeks.max(1),
        }
    }

    pub fn memoized_weeks(&self) -> usize {
        self.memo.len()
    }

    pub fn resolve_as_of(&mut self, date: NaiveDate) -> Result<Regime, EngineError> {
        let target = week_ending_friday(date);
        if let Some(regime) = self.memo.get(&target) {
            return Ok(*regime);
        }

        let mut pending = vec![target];
        let mut seed = None;
        let mut week = target;
        for _ in 0..self.max_lookback_weeks {
            week -= Duration::days(7);
            if let Some(regime) = self.memo.get(&week) {
                seed = Some(*regime);
                break;
            }
            pending.push(week);
        }

        let mut regime = match seed {
            Some(regime) => regime,
            None => {
                // `week` is the horizon; its own completed week seeds the walk.
                let horizon_reading = week - Duration::days(7);
                let rsi =
                    self.lookup
                        .lookup_rsi(horizon_reading)
                        .ok_or(EngineError::MissingRsi {
                            week_ending: horizon_reading,
                            label: "regime seed",
                        })?;
                let seeded = initial_regime(rsi);
                debug!(
                    "Seeded regime walk at {} with {} (RSI {:.2})",
                    week, seeded, rsi
                );
                seeded
            }
        };

        for week in pending.into_iter().rev() {
            let (one, two) = lagged_readings(self.lookup, week)?;
            regime = determine_regime(one, two, regime);
            self.memo.insert(week, regime);
        }

        Ok(regime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rsi_reference::{WeeklyRsiEntry, WeeklyRsiReference};

    #[test]
    fn conservative_rules_fire_before_aggressive() {
        // Falling from overbought.
        assert_eq!(determine_regime(60.0, 70.0, Regime::Aggressive), Regime::Conservative);
        // Falling inside 40-50.
        assert_eq!(determine_regime(42.0, 45.0, Regime::Aggressive), Regime::Conservative);
        // Crossing down through 50.
        assert_eq!(determine_regime(49.0, 50.0, Regime::Aggressive), Regime::Conservative);
    }

    #[test]
    fn aggressive_rules() {
        assert_eq!(determine_regime(55.0, 45.0, Regime::Conservative), Regime::Aggressive);
        assert_eq!(determine_regime(58.0, 55.0, Regime::Conservative), Regime::Aggressive);
        assert_eq!(determine_regime(33.0, 30.0, Regime::Conservative), Regime::Aggressive);
    }

    #[test]
    fn no_signal_keeps_previous_regime() {
        // Rising above 65 and rising from 35-40 are not signals.
        assert_eq!(determine_regime(72.0, 68.0, Regime::Aggressive), Regime::Aggressive);
        assert_eq!(determine_regime(72.0, 68.0, Regime::Conservative), Regime::Conservative);
        assert_eq!(determine_regime(39.0, 37.0, Regime::Conservative), Regime::Conservative);
        // Flat at 50 has no rule either.
        assert_eq!(determine_regime(50.0, 50.0, Regime::Aggressive), Regime::Aggressive);
    }

    #[test]
    fn determine_regime_is_deterministic_over_grid() {
        let mut value = 0.0;
        while value <= 100.0 {
            let mut other = 0.0;
            while other <= 100.0 {
                for previous in [Regime::Conservative, Regime::Aggressive] {
                    let first = determine_regime(value, other, previous);
                    assert_eq!(first, determine_regime(value, other, previous));
                }
                other += 2.5;
            }
            value += 2.5;
        }
    }

    #[test]
    fn initial_regime_splits_at_fifty() {
        assert_eq!(initial_regime(50.0), Regime::Conservative);
        assert_eq!(initial_regime(49.99), Regime::Aggressive);
    }

    fn reference_from(values: &[(NaiveDate, f64)]) -> WeeklyRsiReference {
        WeeklyRsiReference::from_entries(values.iter().enumerate().map(|(idx, (friday, rsi))| {
            WeeklyRsiEntry {
                week: idx as u32 + 1,
                start: *friday - Duration::days(4),
                end: *friday,
                rsi: *rsi,
            }
        }))
    }

    #[test]
    fn resolver_replays_forward_and_memoizes() {
        let first = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let readings: Vec<(NaiveDate, f64)> = [60.0, 62.0, 45.0, 40.0, 55.0, 57.0, 57.0]
            .iter()
            .enumerate()
            .map(|(idx, rsi)| (first + Duration::days(7 * idx as i64), *rsi))
            .collect();
        let reference = reference_from(&readings);
        let mut resolver = RegimeResolver::with_lookback(&reference, 4);

        // Week ending 2024-02-16 uses 57 (02-09) and 55 (02-02): rising in 50-60.
        let target = NaiveDate::from_ymd_opt(2024, 2, 14).unwrap();
        assert_eq!(resolver.resolve_as_of(target).unwrap(), Regime::Aggressive);
        assert_eq!(resolver.memoized_weeks(), 5);

        // Week ending 2024-02-23: 57 vs 57, no rule fires, inherits memoized Aggressive.
        let next = NaiveDate::from_ymd_opt(2024, 2, 23).unwrap();
        assert_eq!(resolver.resolve_as_of(next).unwrap(), Regime::Aggressive);
        assert_eq!(resolver.memoized_weeks(), 6);
    }

    #[test]
    fn resolver_fails_without_reference_data() {
        let empty = WeeklyRsiReference::default();
        let mut resolver = RegimeResolver::new(&empty);
        let err = resolver
            .resolve_as_of(NaiveDate::from_ymd_opt(2024, 2, 14).unwrap())
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingRsi { .. }));
    }
}
