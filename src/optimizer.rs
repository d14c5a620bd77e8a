use crate::calendar::TradingCalendar;
use crate::config::{RegimeConfig, StrategyConfig};
use crate::engine::{BacktestEngine, BacktestOutcome};
use crate::market_data::PriceSeries;
use crate::rsi_reference::RsiLookup;
use chrono::NaiveDate;
use crossbeam_channel::{bounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

pub const DEFAULT_MAX_TESTS: usize = 300;
pub const DEFAULT_TARGET_MDD: f64 = 35.0;
pub const DEFAULT_REQUIRED_RETURN: f64 = 13_000.0;
pub const DEFAULT_SWEEP_CAPITAL: f64 = 40_000.0;
const TOP_N: usize = 5;

/// Threshold and allocation values tried for each regime.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepGrid {
    pub conservative_buy: Vec<f64>,
    pub conservative_sell: Vec<f64>,
    pub conservative_hold: Vec<u32>,
    pub conservative_splits: Vec<Vec<f64>>,
    pub aggressive_buy: Vec<f64>,
    pub aggressive_sell: Vec<f64>,
    pub aggressive_hold: Vec<u32>,
    pub aggressive_splits: Vec<Vec<f64>>,
}

impl Default for SweepGrid {
    fn default() -> Self {
        Self {
            conservative_buy: vec![3.0, 3.2, 3.3, 3.5, 3.8, 4.0],
            conservative_sell: vec![1.8, 2.0, 2.2, 2.5, 2.8],
            conservative_hold: vec![25, 28, 30, 32, 35],
            conservative_splits: vec![
                vec![0.049, 0.127, 0.230, 0.257, 0.028, 0.169, 0.140],
                vec![0.04, 0.10, 0.18, 0.22, 0.12, 0.22, 0.12],
                vec![0.03, 0.08, 0.15, 0.20, 0.15, 0.25, 0.14],
                vec![0.02, 0.06, 0.12, 0.20, 0.20, 0.30, 0.10],
            ],
            aggressive_buy: vec![3.4, 3.6, 3.8, 4.0],
            aggressive_sell: vec![3.0, 3.2, 3.5, 3.8, 4.0],
            aggressive_hold: vec![5, 6, 7, 9],
            aggressive_splits: vec![
                vec![0.062, 0.134, 0.118, 0.148, 0.150, 0.182, 0.186, 0.020],
                vec![0.05, 0.10, 0.12, 0.15, 0.15, 0.18, 0.20, 0.05],
                vec![0.04, 0.08, 0.12, 0.15, 0.15, 0.20, 0.20, 0.06],
                vec![0.02, 0.05, 0.10, 0.15, 0.18, 0.30, 0.18, 0.02],
            ],
        }
    }
}

fn regime_configs(buy: &[f64], sell: &[f64], hold: &[u32], splits: &[Vec<f64>]) -> Vec<RegimeConfig> {
    let mut configs = Vec::with_capacity(buy.len() * sell.len() * hold.len() * splits.len());
    for &buy_threshold_pct in buy {
        for &sell_threshold_pct in sell {
            for &max_hold_trading_days in hold {
                for ratios in splits {
                    configs.push(RegimeConfig {
                        buy_threshold_pct,
                        sell_threshold_pct,
                        max_hold_trading_days,
                        round_count: ratios.len(),
                        allocation_ratios: ratios.clone(),
                    });
                }
            }
        }
    }
    configs
}

impl SweepGrid {
    pub fn size(&self) -> usize {
        self.conservative_buy.len()
            * self.conservative_sell.len()
            * self.conservative_hold.len()
            * self.conservative_splits.len()
            * self.aggressive_buy.len()
            * self.aggressive_sell.len()
            * self.aggressive_hold.len()
            * self.aggressive_splits.len()
    }

    /// The first `max_tests` pairs, Conservative outermost and the
    /// Aggressive split varying fastest.
    pub fn candidates(&self, max_tests: usize) -> Vec<SweepCandidate> {
        let conservative = regime_configs(
            &self.conservative_buy,
            &self.conservative_sell,
            &self.conservative_hold,
            &self.conservative_splits,
        );
        let aggressive = regime_configs(
            &self.aggressive_buy,
            &self.aggressive_sell,
            &self.aggressive_hold,
            &self.aggressive_splits,
        );

        conservative
            .iter()
            .flat_map(|sf| aggressive.iter().map(move |ag| (sf, ag)))
            .take(max_tests)
            .enumerate()
            .map(|(id, (sf, ag))| SweepCandidate {
                id: id + 1,
                conservative: sf.clone(),
                aggressive: ag.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepCandidate {
    pub id: usize,
    pub conservative: RegimeConfig,
    pub aggressive: RegimeConfig,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepSettings {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub initial_capital: f64,
    pub target_mdd: f64,
    pub required_return: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepResult {
    pub candidate: SweepCandidate,
    pub total_return_pct: f64,
    pub mdd_percent: f64,
    pub final_total_assets: f64,
    pub cagr: f64,
    pub sharpe_ratio: f64,
    pub closed_trades: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub tested: usize,
    pub failed: usize,
    pub target_mdd: f64,
    pub required_return: f64,
    /// Lowest MDD among runs within the MDD target that also reach the required return.
    pub best_within_target: Option<SweepResult>,
    /// Highest return among runs within the MDD target.
    pub best_mdd_hit: Option<SweepResult>,
    pub best_overall: Option<SweepResult>,
    pub top_by_return: Vec<SweepResult>,
    pub top_by_lowest_mdd: Vec<SweepResult>,
}

struct SweepTask {
    candidate: SweepCandidate,
}

struct SweepTaskResult {
    id: usize,
    result: Option<SweepResult>,
    error: Option<String>,
}

pub type SharedRsi = Arc<dyn RsiLookup + Send + Sync>;

pub struct SweepRunner {
    base_config: StrategyConfig,
    calendar: Arc<TradingCalendar>,
    traded: Arc<PriceSeries>,
    rsi: SharedRsi,
    settings: SweepSettings,
}

impl SweepRunner {
    pub fn new(
        base_config: StrategyConfig,
        calendar: Arc<TradingCalendar>,
        traded: Arc<PriceSeries>,
        rsi: SharedRsi,
        settings: SweepSettings,
    ) -> Self {
        Self {
            base_config,
            calendar,
            traded,
            rsi,
            settings,
        }
    }

    pub fn run(&self, candidates: Vec<SweepCandidate>) -> SweepReport {
        let tested = candidates.len();
        if candidates.is_empty() {
            return summarize(Vec::new(), 0, 0, &self.settings);
        }

        let num_workers = std::cmp::min(tested, std::cmp::max(1, num_cpus::get()));
        info!(
            "Sweeping {} candidate(s) from {} to {} on {} worker thread(s)",
            tested, self.settings.start, self.settings.end, num_workers
        );

        let (tx, rx): (Sender<SweepTask>, Receiver<SweepTask>) = bounded(tested);
        let (result_tx, result_rx): (Sender<SweepTaskResult>, Receiver<SweepTaskResult>) =
            bounded(tested);

        let mut handles = Vec::new();
        for _worker_id in 0..num_workers {
            let rx = rx.clone();
            let result_tx = result_tx.clone();
            let calendar = Arc::clone(&self.calendar);
            let traded = Arc::clone(&self.traded);
            let rsi = Arc::clone(&self.rsi);
            let base_config = self.base_config.clone();
            let settings = self.settings;

            let handle = thread::spawn(move || {
                while let Ok(task) = rx.recv() {
                    let start_time = Instant::now();
                    let result = run_candidate(
                        &base_config,
                        &calendar,
                        &traded,
                        rsi.as_ref(),
                        &settings,
                        task.candidate,
                    );
                    if let Some(outcome) = &result.result {
                        info!(
                            "Candidate {} finished in {:.1}s: return {:+.2}%, MDD {:.2}%, SF({}/{}/{}) AG({}/{}/{})",
                            result.id,
                            start_time.elapsed().as_secs_f64(),
                            outcome.total_return_pct,
                            outcome.mdd_percent,
                            outcome.candidate.conservative.buy_threshold_pct,
                            outcome.candidate.conservative.sell_threshold_pct,
                            outcome.candidate.conservative.max_hold_trading_days,
                            outcome.candidate.aggressive.buy_threshold_pct,
                            outcome.candidate.aggressive.sell_threshold_pct,
                            outcome.candidate.aggressive.max_hold_trading_days
                        );
                    } else if let Some(error) = &result.error {
                        warn!("Candidate {} failed: {}", result.id, error);
                    }

                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
            });
            handles.push(handle);
        }
        drop(result_tx);

        for candidate in candidates {
            if tx.send(SweepTask { candidate }).is_err() {
                warn!("Sweep workers stopped before all candidates were queued");
                break;
            }
        }
        drop(tx);

        let mut results = Vec::new();
        let mut completed = 0;
        let mut failed = 0;
        let pb = ProgressBar::new(tested as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }

        while completed < tested {
            match result_rx.recv_timeout(std::time::Duration::from_millis(200)) {
                Ok(task_result) => {
                    completed += 1;
                    pb.set_position(completed as u64);
                    match task_result.result {
                        Some(result) => results.push(result),
                        None => failed += 1,
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    warn!("Result channel closed unexpectedly. Some results may be lost.");
                    failed += tested - completed;
                    break;
                }
            }
        }

        if failed > 0 {
            warn!("Sweep completed with {} failed candidate(s)", failed);
            pb.finish_with_message("Sweep completed with errors");
        } else {
            pb.finish_with_message("Sweep completed");
        }

        for handle in handles {
            if handle.join().is_err() {
                warn!("A sweep worker panicked");
            }
        }

        results.sort_by_key(|result| result.candidate.id);
        summarize(results, failed, tested, &self.settings)
    }
}

fn run_candidate(
    base_config: &StrategyConfig,
    calendar: &TradingCalendar,
    traded: &PriceSeries,
    rsi: &(dyn RsiLookup + Send + Sync),
    settings: &SweepSettings,
    candidate: SweepCandidate,
) -> SweepTaskResult {
    let id = candidate.id;
    let config = StrategyConfig {
        initial_capital: settings.initial_capital,
        conservative: candidate.conservative.clone(),
        aggressive: candidate.aggressive.clone(),
        ..base_config.clone()
    };

    match BacktestEngine::new(config, calendar, rsi).run(traded, settings.start, settings.end) {
        Ok(BacktestOutcome::Completed(summary)) => SweepTaskResult {
            id,
            result: Some(SweepResult {
                candidate,
                total_return_pct: summary.total_return_pct,
                mdd_percent: summary.drawdown.mdd_percent,
                final_total_assets: summary.final_total_assets,
                cagr: summary.performance.cagr,
                sharpe_ratio: summary.performance.sharpe_ratio,
                closed_trades: summary.performance.closed_trades,
            }),
            error: None,
        },
        Ok(BacktestOutcome::Skipped { reason, .. }) => SweepTaskResult {
            id,
            result: None,
            error: Some(reason.to_string()),
        },
        Err(failure) => SweepTaskResult {
            id,
            result: None,
            error: Some(failure.reason()),
        },
    }
}

fn by_return_desc(a: &SweepResult, b: &SweepResult) -> Ordering {
    b.total_return_pct
        .partial_cmp(&a.total_return_pct)
        .unwrap_or(Ordering::Equal)
}

fn by_mdd_asc(a: &SweepResult, b: &SweepResult) -> Ordering {
    a.mdd_percent
        .partial_cmp(&b.mdd_percent)
        .unwrap_or(Ordering::Equal)
}

/// Picks the report entries from results in candidate order. Earlier
/// candidates win exact ties.
pub fn summarize(
    results: Vec<SweepResult>,
    failed: usize,
    tested: usize,
    settings: &SweepSettings,
) -> SweepReport {
    let mut best_within_target: Option<&SweepResult> = None;
    let mut best_mdd_hit: Option<&SweepResult> = None;
    let mut best_overall: Option<&SweepResult> = None;

    for result in &results {
        let ret = result.total_return_pct;
        let mdd = result.mdd_percent;
        if best_overall.map_or(true, |best| ret > best.total_return_pct) {
            best_overall = Some(result);
        }
        if mdd > settings.target_mdd {
            continue;
        }
        if best_mdd_hit.map_or(true, |best| ret > best.total_return_pct) {
            best_mdd_hit = Some(result);
        }
        if ret >= settings.required_return {
            let better = best_within_target.map_or(true, |best| {
                mdd < best.mdd_percent
                    || ((mdd - best.mdd_percent).abs() < 1e-9 && ret > best.total_return_pct)
            });
            if better {
                best_within_target = Some(result);
            }
        }
    }

    let mut top_by_return = results.clone();
    top_by_return.sort_by(by_return_desc);
    top_by_return.truncate(TOP_N);
    let mut top_by_lowest_mdd = results.clone();
    top_by_lowest_mdd.sort_by(by_mdd_asc);
    top_by_lowest_mdd.truncate(TOP_N);

    SweepReport {
        tested,
        failed,
        target_mdd: settings.target_mdd,
        required_return: settings.required_return,
        best_within_target: best_within_target.cloned(),
        best_mdd_hit: best_mdd_hit.cloned(),
        best_overall: best_overall.cloned(),
        top_by_return,
        top_by_lowest_mdd,
    }
}

fn print_result(label: &str, result: &SweepResult) {
    let sf = &result.candidate.conservative;
    let ag = &result.candidate.aggressive;
    println!("{}:", label);
    println!("  Candidate: #{}", result.candidate.id);
    println!("  Total Return: {:+.2}%", result.total_return_pct);
    println!("  Max Drawdown: {:.2}%", result.mdd_percent);
    println!("  CAGR: {:.2}%", result.cagr * 100.0);
    println!("  Sharpe Ratio: {:.4}", result.sharpe_ratio);
    println!("  Closed Trades: {}", result.closed_trades);
    println!(
        "  SF: buy {:.1}% / sell {:.1}% / hold {} / splits {:?}",
        sf.buy_threshold_pct, sf.sell_threshold_pct, sf.max_hold_trading_days, sf.allocation_ratios
    );
    println!(
        "  AG: buy {:.1}% / sell {:.1}% / hold {} / splits {:?}",
        ag.buy_threshold_pct, ag.sell_threshold_pct, ag.max_hold_trading_days, ag.allocation_ratios
    );
    println!();
}

pub fn print_report(report: &SweepReport) {
    println!(
        "\n=== SWEEP: {} tested, {} failed, target MDD <= {:.2}%, required return >= {:.2}% ===\n",
        report.tested, report.failed, report.target_mdd, report.required_return
    );
    match (&report.best_within_target, &report.best_mdd_hit) {
        (Some(best), _) => print_result("Within MDD target and required return", best),
        (None, Some(best)) => print_result("Within MDD target, highest return", best),
        (None, None) => match report.top_by_lowest_mdd.first() {
            Some(lowest) => print_result("MDD target missed, lowest MDD", lowest),
            None => println!("No successful runs.\n"),
        },
    }
    if let Some(best) = &report.best_overall {
        print_result("Highest return overall", best);
    }
    println!("Top {} by return:", report.top_by_return.len());
    for (rank, result) in report.top_by_return.iter().enumerate() {
        println!(
            "  {}. #{} return {:+.2}% MDD {:.2}%",
            rank + 1,
            result.candidate.id,
            result.total_return_pct,
            result.mdd_percent
        );
    }
    println!("Top {} by lowest MDD:", report.top_by_lowest_mdd.len());
    for (rank, result) in report.top_by_lowest_mdd.iter().enumerate() {
        println!(
            "  {}. #{} MDD {:.2}% return {:+.2}%",
            rank + 1,
            result.candidate.id,
            result.mdd_percent,
            result.total_return_pct
        );
    }
}
