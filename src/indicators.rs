use crate::calendar::{week_ending_friday, week_starting_monday};
use crate::models::Candle;
use crate::rsi_reference::WeeklyRsiEntry;
use chrono::{Datelike, NaiveDate};

pub const DEFAULT_RSI_WINDOW: usize = 14;

#[derive(Debug, Clone, PartialEq)]
pub struct WeeklyBar {
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub close: f64,
}

/// Friday-anchored weekly bars; the last close inside each Mon-Fri window wins.
pub fn resample_weekly(candles: &[Candle]) -> Vec<WeeklyBar> {
    let mut bars: Vec<WeeklyBar> = Vec::new();
    for candle in candles {
        if !candle.close.is_finite() {
            continue;
        }
        let week_end = week_ending_friday(candle.date);
        match bars.last_mut() {
            Some(bar) if bar.week_end == week_end => bar.close = candle.close,
            _ => bars.push(WeeklyBar {
                week_start: week_starting_monday(candle.date),
                week_end,
                close: candle.close,
            }),
        }
    }
    bars
}

fn rsi_from_avgs(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        None
    } else if avg_loss == 0.0 {
        Some(100.0)
    } else {
        let rs = avg_gain / avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }
}

/// RSI from simple rolling means of gains and losses (not Wilder smoothing).
/// Index `i` needs `window` deltas, so the first `window` values are `None`.
pub fn rolling_mean_rsi(closes: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut values = vec![None; closes.len()];
    if window == 0 || closes.len() <= window {
        return values;
    }

    let mut sum_gain = 0.0f64;
    let mut sum_loss = 0.0f64;
    for i in 1..closes.len() {
        let delta = closes[i] - closes[i - 1];
        sum_gain += delta.max(0.0);
        sum_loss += (-delta).max(0.0);

        if i > window {
            let dropped = closes[i - window] - closes[i - window - 1];
            sum_gain -= dropped.max(0.0);
            sum_loss -= (-dropped).max(0.0);
        }
        if i >= window {
            // Clamp drift from the running sums.
            let avg_gain = sum_gain.max(0.0) / window as f64;
            let avg_loss = sum_loss.max(0.0) / window as f64;
            values[i] = rsi_from_avgs(avg_gain, avg_loss);
        }
    }
    values
}

pub fn weekly_rsi_entries(candles: &[Candle], window: usize) -> Vec<WeeklyRsiEntry> {
    let bars = resample_weekly(candles);
    let closes: Vec<f64> = bars.iter().map(|bar| bar.close).collect();
    let rsi = rolling_mean_rsi(&closes, window);

    let mut entries = Vec::new();
    let mut year = None;
    let mut week = 0;
    for (bar, value) in bars.iter().zip(rsi) {
        let Some(value) = value else {
            continue;
        };
        if year != Some(bar.week_end.year()) {
            year = Some(bar.week_end.year());
            week = 0;
        }
        week += 1;
        entries.push(WeeklyRsiEntry {
            week,
            start: bar.week_start,
            end: bar.week_end,
            rsi: (value * 100.0).round() / 100.0,
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn daily(start: NaiveDate, closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                date: start + Duration::days(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1_000,
            })
            .collect()
    }

    #[test]
    fn resample_keeps_last_close_per_week() {
        // Monday 2024-01-01 through Sunday 2024-01-14.
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let candles = daily(start, &(1..=14).map(|v| v as f64).collect::<Vec<_>>());
        let bars = resample_weekly(&candles);
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].week_end, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        assert_eq!(bars[0].close, 5.0);
        // Saturday and Sunday roll into the following week's bucket.
        assert_eq!(bars[1].week_start, NaiveDate::from_ymd_opt(2024, 1, 8).unwrap());
        assert_eq!(bars[1].close, 12.0);
        assert_eq!(bars[2].close, 14.0);
    }

    #[test]
    fn rolling_rsi_matches_hand_computation() {
        // Deltas: +1, -1, +2, -1 with window 2.
        let closes = [10.0, 11.0, 10.0, 12.0, 11.0];
        let rsi = rolling_mean_rsi(&closes, 2);
        assert_eq!(rsi[0], None);
        assert_eq!(rsi[1], None);
        // Window (+1, -1): gain 0.5, loss 0.5.
        assert!((rsi[2].unwrap() - 50.0).abs() < 1e-9);
        // Window (-1, +2): gain 1.0, loss 0.5 -> 66.67.
        assert!((rsi[3].unwrap() - 200.0 / 3.0).abs() < 1e-9);
        // Window (+2, -1): same averages.
        assert!((rsi[4].unwrap() - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn rolling_rsi_edge_cases() {
        let rising = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(rolling_mean_rsi(&rising, 2)[3], Some(100.0));
        let flat = [5.0, 5.0, 5.0];
        assert_eq!(rolling_mean_rsi(&flat, 2)[2], None);
        assert!(rolling_mean_rsi(&flat, 3).iter().all(Option::is_none));
    }
}
