use crate::models::DailyLedgerRecord;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Peak-to-trough analysis of total assets. Dates are `None` for an empty ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawdownReport {
    pub mdd_percent: f64,
    pub mdd_date: Option<NaiveDate>,
    pub mdd_value: f64,
    pub mdd_peak_date: Option<NaiveDate>,
    pub overall_peak_date: Option<NaiveDate>,
    pub overall_peak_value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub total_return_pct: f64,
    pub cagr: f64,
    pub sharpe_ratio: f64,
    pub closed_trades: usize,
    pub winning_trades: usize,
    pub win_rate: f64,
    pub realized_pnl: f64,
    pub avg_realized_pnl: f64,
    pub avg_holding_days: f64,
}

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    pub fn calculate_performance(
        records: &[DailyLedgerRecord],
        initial_capital: f64,
    ) -> PerformanceStats {
        let final_value = records
            .last()
            .map(|record| record.total_assets)
            .unwrap_or(initial_capital);
        let total_return_pct = Self::calculate_total_return_pct(initial_capital, final_value);
        let cagr = Self::calculate_cagr(initial_capital, final_value, records.len());
        let sharpe_ratio = Self::calculate_sharpe_ratio(records);

        let sells: Vec<_> = records.iter().flat_map(|record| record.sells.iter()).collect();
        let closed_trades = sells.len();
        let winning_trades = sells.iter().filter(|sell| sell.realized_pnl > 0.0).count();
        let realized_pnl: f64 = sells.iter().map(|sell| sell.realized_pnl).sum();
        let (win_rate, avg_realized_pnl, avg_holding_days) = if closed_trades > 0 {
            let holding: f64 = sells.iter().map(|sell| sell.holding_days as f64).sum();
            (
                winning_trades as f64 / closed_trades as f64,
                realized_pnl / closed_trades as f64,
                holding / closed_trades as f64,
            )
        } else {
            (0.0, 0.0, 0.0)
        };

        PerformanceStats {
            total_return_pct,
            cagr,
            sharpe_ratio,
            closed_trades,
            winning_trades,
            win_rate,
            realized_pnl,
            avg_realized_pnl,
            avg_holding_days,
        }
    }

    pub fn calculate_total_return_pct(initial_capital: f64, final_value: f64) -> f64 {
        if initial_capital <= 0.0 || !final_value.is_finite() {
            return 0.0;
        }
        (final_value - initial_capital) / initial_capital * 100.0
    }

    fn calculate_cagr(initial_capital: f64, final_value: f64, trading_days: usize) -> f64 {
        if initial_capital <= 0.0 || !final_value.is_finite() || trading_days == 0 {
            return 0.0;
        }

        let years = trading_days as f64 / TRADING_DAYS_PER_YEAR;
        let total_return_ratio = final_value / initial_capital;
        if total_return_ratio <= 0.0 {
            return -1.0;
        }

        total_return_ratio.powf(1.0 / years) - 1.0
    }

    pub fn calculate_sharpe_ratio(records: &[DailyLedgerRecord]) -> f64 {
        if records.len() < 2 {
            return 0.0;
        }

        let returns: Vec<f64> = records
            .windows(2)
            .map(|window| {
                let prev_value = window[0].total_assets;
                let curr_value = window[1].total_assets;
                if prev_value > 0.0 {
                    (curr_value - prev_value) / prev_value
                } else {
                    0.0
                }
            })
            .collect();

        if returns.len() < 2 {
            return 0.0;
        }

        let mean_return = returns.clone().mean();
        let std_dev = returns.std_dev();

        if std_dev == 0.0 || !std_dev.is_finite() {
            return 0.0;
        }

        // Annualized from daily returns with a 2% risk-free rate.
        let annualized_return = mean_return * TRADING_DAYS_PER_YEAR;
        let annualized_volatility = std_dev * TRADING_DAYS_PER_YEAR.sqrt();
        let risk_free_rate = 0.02;

        (annualized_return - risk_free_rate) / annualized_volatility
    }

    pub fn calculate_max_drawdown(records: &[DailyLedgerRecord]) -> DrawdownReport {
        Self::drawdown_from_series(
            records
                .iter()
                .map(|record| (record.date, record.total_assets)),
        )
    }

    pub fn drawdown_from_series<I>(series: I) -> DrawdownReport
    where
        I: IntoIterator<Item = (NaiveDate, f64)>,
    {
        let mut report = DrawdownReport::default();
        let mut running_peak: Option<(NaiveDate, f64)> = None;
        let mut max_drawdown = 0.0;

        for (date, value) in series {
            match running_peak {
                Some((_, peak)) if value <= peak => {}
                _ => running_peak = Some((date, value)),
            }
            if report.overall_peak_date.is_none() || value > report.overall_peak_value {
                report.overall_peak_date = Some(date);
                report.overall_peak_value = value;
            }

            let Some((peak_date, peak)) = running_peak else {
                continue;
            };
            if peak <= 0.0 {
                continue;
            }
            let drawdown = (peak - value) / peak;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
                report.mdd_date = Some(date);
                report.mdd_value = value;
                report.mdd_peak_date = Some(peak_date);
            }
        }

        report.mdd_percent = max_drawdown * 100.0;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn series(values: &[f64]) -> Vec<(NaiveDate, f64)> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (start + Duration::days(i as i64), *v))
            .collect()
    }

    #[test]
    fn max_drawdown_tracks_trough_and_preceding_peak() {
        let points = series(&[100.0, 120.0, 90.0, 110.0, 80.0, 130.0]);
        let report = PerformanceCalculator::drawdown_from_series(points.clone());
        assert!((report.mdd_percent - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.mdd_date, Some(points[4].0));
        assert_eq!(report.mdd_value, 80.0);
        assert_eq!(report.mdd_peak_date, Some(points[1].0));
        assert_eq!(report.overall_peak_date, Some(points[5].0));
        assert_eq!(report.overall_peak_value, 130.0);
    }

    #[test]
    fn empty_series_reports_zeros() {
        let report = PerformanceCalculator::drawdown_from_series(Vec::new());
        assert_eq!(report, DrawdownReport::default());
        assert_eq!(report.mdd_percent, 0.0);
        assert!(report.mdd_date.is_none());
    }

    #[test]
    fn monotonic_series_has_no_drawdown() {
        let report = PerformanceCalculator::drawdown_from_series(series(&[1.0, 2.0, 3.0]));
        assert_eq!(report.mdd_percent, 0.0);
        assert_eq!(report.overall_peak_value, 3.0);
    }

    #[test]
    fn cagr_uses_trading_day_years() {
        let cagr = PerformanceCalculator::calculate_cagr(100_000.0, 121_000.0, 504);
        assert!((cagr - 0.1).abs() < 1e-9);
        assert_eq!(PerformanceCalculator::calculate_cagr(0.0, 10.0, 10), 0.0);
        assert!(
            (PerformanceCalculator::calculate_total_return_pct(9_000.0, 13_500.0) - 50.0).abs()
                < 1e-9
        );
    }
}
