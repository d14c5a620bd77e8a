use crate::context::{write_json_report, AppContext, MarketDataSource};
use crate::engine::{BacktestEngine, BacktestOutcome};
use crate::error::parse_date;
use crate::models::BacktestSummary;
use anyhow::{anyhow, Result};
use log::{info, warn};
use std::path::PathBuf;

pub struct BacktestArgs {
    pub start: String,
    pub end: String,
    pub capital: Option<f64>,
    pub config_path: Option<PathBuf>,
    pub data_file: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

pub async fn run(app: &AppContext, args: BacktestArgs) -> Result<()> {
    let start = parse_date(&args.start)?;
    let end = parse_date(&args.end)?;
    let config = app.strategy_config(args.config_path.as_deref(), args.capital)?;
    let source = MarketDataSource::from_cli(args.data_file, start);
    let ctx = app.engine_context(&source).await?;

    info!(
        "Backtesting {} from {} to {} with {:.2} initial capital",
        ctx.traded().symbol(),
        start,
        end,
        config.initial_capital
    );

    let engine = BacktestEngine::new(config, ctx.calendar(), ctx.rsi());
    match engine.run(ctx.traded(), start, end) {
        Ok(BacktestOutcome::Completed(summary)) => {
            print_summary(&summary);
            if let Some(path) = args.output.as_deref() {
                write_json_report(path, &*summary)?;
            }
            Ok(())
        }
        Ok(BacktestOutcome::Skipped {
            reason,
            latest_trading_day,
        }) => {
            warn!(
                "Backtest skipped: {} (latest trading day with data: {})",
                reason,
                latest_trading_day
                    .map(|date| date.to_string())
                    .unwrap_or_else(|| "none".to_string())
            );
            Ok(())
        }
        Err(failure) => {
            println!(
                "Backtest failed{}: {} [{:?}]",
                failure
                    .failed_on
                    .map(|date| format!(" on {}", date))
                    .unwrap_or_default(),
                failure.reason(),
                failure.error.kind()
            );
            println!(
                "{} day(s) were processed before the failure",
                failure.daily_records.len()
            );
            if let Some(path) = args.output.as_deref() {
                write_json_report(path, &failure.daily_records)?;
            }
            Err(anyhow!(failure))
        }
    }
}

fn print_summary(summary: &BacktestSummary) {
    println!(
        "\n=== BACKTEST {} to {} ({} trading days) ===\n",
        summary.start, summary.end, summary.trading_days
    );
    println!(
        "  Bars processed:    {} to {}",
        describe_date(summary.first_trading_day),
        describe_date(summary.last_trading_day)
    );
    println!("  Initial capital:   {:>14.2}", summary.initial_capital);
    println!("  Final assets:      {:>14.2}", summary.final_total_assets);
    println!("  Final cash:        {:>14.2}", summary.final_cash);
    println!("  Total return:      {:>13.2}%", summary.total_return_pct);
    println!("  CAGR:              {:>13.2}%", summary.performance.cagr * 100.0);
    println!("  Sharpe ratio:      {:>14.2}", summary.performance.sharpe_ratio);
    println!(
        "  Max drawdown:      {:>13.2}% on {}",
        summary.drawdown.mdd_percent,
        describe_date(summary.drawdown.mdd_date)
    );
    println!(
        "  Closed trades:     {:>14} ({:.1}% winners, avg hold {:.1} days)",
        summary.performance.closed_trades,
        summary.performance.win_rate * 100.0,
        summary.performance.avg_holding_days
    );
    println!(
        "  Open tranches:     {:>14} (next round {}, regime {})",
        summary.open_tranche_count,
        summary.final_round,
        summary.final_regime.code()
    );
    for tranche in &summary.open_tranches {
        println!(
            "    round {} bought {} at {:.2} x {} ({})",
            tranche.round_index,
            tranche.buy_date,
            tranche.buy_price,
            tranche.shares,
            tranche.regime_at_purchase.code()
        );
    }
    println!();
}

fn describe_date(date: Option<chrono::NaiveDate>) -> String {
    date.map(|date| date.to_string())
        .unwrap_or_else(|| "-".to_string())
}
