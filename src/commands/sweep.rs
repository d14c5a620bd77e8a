use crate::context::{write_json_report, AppContext, MarketDataSource};
use crate::error::parse_date;
use crate::optimizer::{
    print_report, SweepGrid, SweepRunner, SweepSettings, DEFAULT_SWEEP_CAPITAL,
};
use anyhow::{anyhow, Result};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

pub struct SweepArgs {
    pub start: String,
    pub end: Option<String>,
    pub capital: Option<f64>,
    pub max_tests: usize,
    pub target_mdd: f64,
    pub required_return: f64,
    pub config_path: Option<PathBuf>,
    pub data_file: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

pub async fn run(app: &AppContext, args: SweepArgs) -> Result<()> {
    let start = parse_date(&args.start)?;
    let capital = args
        .capital
        .or(app.settings().initial_capital)
        .unwrap_or(DEFAULT_SWEEP_CAPITAL);
    let base_config = app.strategy_config(args.config_path.as_deref(), Some(capital))?;
    let source = MarketDataSource::from_cli(args.data_file, start);
    let ctx = app.engine_context(&source).await?;
    let end = match args.end.as_deref() {
        Some(raw) => parse_date(raw)?,
        None => ctx.latest_completed_trading_day(),
    };
    if end < start {
        return Err(anyhow!("Sweep end {} is before start {}", end, start));
    }

    let grid = SweepGrid::default();
    let candidates = grid.candidates(args.max_tests);
    info!(
        "Parameter grid has {} combinations; testing the first {}",
        grid.size(),
        candidates.len()
    );

    let settings = SweepSettings {
        start,
        end,
        initial_capital: capital,
        target_mdd: args.target_mdd,
        required_return: args.required_return,
    };
    let (traded, rsi, calendar) = ctx.into_parts();
    let runner = SweepRunner::new(
        base_config,
        Arc::new(calendar),
        Arc::new(traded),
        Arc::new(rsi),
        settings,
    );
    let report = tokio::task::spawn_blocking(move || runner.run(candidates)).await?;

    print_report(&report);
    if let Some(path) = args.output.as_deref() {
        write_json_report(path, &report)?;
    }
    Ok(())
}
