use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use tranche_engine::{
    commands::{
        backtest::{self, BacktestArgs},
        export_market_data,
        recommend::{self, RecommendArgs},
        sweep::{self, SweepArgs},
        update_rsi,
    },
    context::AppContext,
    error::parse_date,
    optimizer::{DEFAULT_MAX_TESTS, DEFAULT_REQUIRED_RETURN, DEFAULT_TARGET_MDD},
};

const DEFAULT_MARKET_DATA_FILE: &str = "data/market-data.bin";
const DEFAULT_HISTORY_START: &str = "2017-01-01";
const DEFAULT_RSI_HISTORY_START: &str = "2010-01-01";

#[derive(Parser)]
#[command(name = "tranche-engine")]
#[command(about = "Tranche accumulation backtester and daily limit-on-close order planner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay the strategy over a date range and report returns and drawdown
    Backtest {
        /// First day of the window (YYYY-MM-DD)
        start: String,
        /// Last day of the window (YYYY-MM-DD)
        end: String,
        /// Initial capital (overrides INITIAL_CAPITAL and the config file)
        #[arg(long)]
        capital: Option<f64>,
        /// Strategy config JSON
        #[arg(long = "config", value_name = "PATH")]
        config: Option<PathBuf>,
        /// Path to a market data snapshot file; prices are fetched when omitted
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// Write the full summary with daily records as JSON
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Print the next session's buy and sell orders for the running strategy
    Recommend {
        /// Session start date (defaults to SESSION_START_DATE)
        #[arg(long)]
        start: Option<String>,
        /// Plan as if this date were the latest completed session
        #[arg(long = "as-of")]
        as_of: Option<String>,
        #[arg(long)]
        capital: Option<f64>,
        #[arg(long = "config", value_name = "PATH")]
        config: Option<PathBuf>,
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// Extra capital injection, YYYY-MM-DD=AMOUNT (repeatable)
        #[arg(long = "seed", value_name = "DATE=AMOUNT")]
        seeds: Vec<String>,
        /// Overwrite an open round with the broker's fill, ROUND=SHARES@PRICE (repeatable)
        #[arg(long = "correct", value_name = "ROUND=SHARES@PRICE")]
        corrections: Vec<String>,
        /// Print the recommendation as JSON
        #[arg(long)]
        json: bool,
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Grid-search regime parameters under a drawdown target
    Sweep {
        #[arg(long, default_value = DEFAULT_HISTORY_START)]
        start: String,
        /// Defaults to the latest completed trading day
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        capital: Option<f64>,
        /// Number of grid candidates to test
        #[arg(long = "max-tests", default_value_t = DEFAULT_MAX_TESTS)]
        max_tests: usize,
        /// Maximum drawdown target in percent
        #[arg(long = "target-mdd", default_value_t = DEFAULT_TARGET_MDD)]
        target_mdd: f64,
        /// Required total return in percent
        #[arg(long = "required-return", default_value_t = DEFAULT_REQUIRED_RETURN)]
        required_return: f64,
        #[arg(long = "config", value_name = "PATH")]
        config: Option<PathBuf>,
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Recompute the weekly RSI reference from the reference symbol's closes
    UpdateRsi {
        #[arg(long, default_value = DEFAULT_RSI_HISTORY_START)]
        start: String,
    },
    /// Export a market data snapshot for offline runs
    ExportMarketData {
        /// Destination file for the snapshot
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
        /// Earliest date the snapshot has to cover
        #[arg(long, default_value = DEFAULT_HISTORY_START)]
        start: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let Cli { command } = cli;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let app_context = AppContext::initialize().await?;

    info!("Starting tranche engine. Not financial advice. Leveraged ETFs can lose most of their value quickly.");

    match command {
        Commands::Backtest {
            start,
            end,
            capital,
            config,
            data_file,
            output,
        } => {
            backtest::run(
                &app_context,
                BacktestArgs {
                    start,
                    end,
                    capital,
                    config_path: config,
                    data_file,
                    output,
                },
            )
            .await?;
        }
        Commands::Recommend {
            start,
            as_of,
            capital,
            config,
            data_file,
            seeds,
            corrections,
            json,
            output,
        } => {
            recommend::run(
                &app_context,
                RecommendArgs {
                    start,
                    as_of,
                    capital,
                    config_path: config,
                    data_file,
                    seeds,
                    corrections,
                    json,
                    output,
                },
            )
            .await?;
        }
        Commands::Sweep {
            start,
            end,
            capital,
            max_tests,
            target_mdd,
            required_return,
            config,
            data_file,
            output,
        } => {
            sweep::run(
                &app_context,
                SweepArgs {
                    start,
                    end,
                    capital,
                    max_tests,
                    target_mdd,
                    required_return,
                    config_path: config,
                    data_file,
                    output,
                },
            )
            .await?;
        }
        Commands::UpdateRsi { start } => {
            update_rsi::run(&app_context, parse_date(&start)?).await?;
        }
        Commands::ExportMarketData { output, start } => {
            let output_path = resolve_market_data_path(output);
            export_market_data::run(&app_context, &output_path, parse_date(&start)?).await?;
        }
    }

    Ok(())
}

fn resolve_market_data_path(cli_value: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_value {
        return path;
    }

    PathBuf::from(DEFAULT_MARKET_DATA_FILE)
}
