use crate::calendar::TradingCalendar;
use crate::commands::market_data_snapshot::ensure_market_data_file;
use crate::config::{EngineSettings, StrategyConfig};
use crate::error::EngineError;
use crate::market_data::{
    lookback_range_for, ManualCloseCorrections, MarketDataSnapshot, PriceSeries, YahooChartClient,
};
use crate::models::DataWarning;
use crate::rsi_reference::WeeklyRsiReference;
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use log::{info, warn};
use serde::Serialize;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Clone)]
pub struct AppContext {
    settings: EngineSettings,
}

/// Where a command reads its price history from.
#[derive(Debug, Clone)]
pub enum MarketDataSource {
    Snapshot(PathBuf),
    Remote { start: NaiveDate },
}

impl MarketDataSource {
    pub fn from_cli(data_file: Option<PathBuf>, start: NaiveDate) -> Self {
        match data_file {
            Some(path) => MarketDataSource::Snapshot(path),
            None => MarketDataSource::Remote { start },
        }
    }
}

impl AppContext {
    pub async fn initialize() -> Result<Self> {
        Ok(Self::from_settings(EngineSettings::from_env()?))
    }

    pub fn from_settings(settings: EngineSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn calendar(&self) -> TradingCalendar {
        TradingCalendar::nyse().with_extra_holidays(self.settings.extra_market_holidays.iter().copied())
    }

    pub fn price_client(&self) -> Result<YahooChartClient> {
        YahooChartClient::new(self.settings.price_fetch_timeout_secs)
    }

    /// Strategy config from `path` (defaults otherwise), with the capital
    /// override from settings and then from the command line applied.
    pub fn strategy_config(
        &self,
        path: Option<&Path>,
        capital_override: Option<f64>,
    ) -> Result<StrategyConfig> {
        let mut config = match path {
            Some(path) => StrategyConfig::load_from_file(path)?,
            None => StrategyConfig::default(),
        };
        if let Some(capital) = capital_override.or(self.settings.initial_capital) {
            config.initial_capital = capital;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn corrections(&self) -> Result<ManualCloseCorrections> {
        match &self.settings.manual_corrections_path {
            Some(path) => ManualCloseCorrections::load_from_file(path),
            None => Ok(ManualCloseCorrections::default()),
        }
    }

    pub fn rsi_reference(&self) -> Result<WeeklyRsiReference> {
        WeeklyRsiReference::load(&self.settings.rsi_reference_path)
    }

    /// Fetches the traded and reference series concurrently.
    pub async fn fetch_market_data(&self, start: NaiveDate) -> Result<MarketDataSnapshot> {
        let client = self.price_client()?;
        let corrections = self.corrections()?;
        let calendar = self.calendar();
        let now = Utc::now();
        let range = lookback_range_for(start, now.date_naive());
        info!(
            "Fetching {} and {} price history ({} range)",
            self.settings.traded_symbol, self.settings.reference_symbol, range
        );

        let (traded, reference) = futures::join!(
            client.fetch_series(&self.settings.traded_symbol, range, &corrections),
            client.fetch_series(&self.settings.reference_symbol, range, &corrections)
        );
        let (traded, mut warnings) = traded?;
        let (reference, reference_warnings) = reference?;
        warnings.extend(reference_warnings);

        let traded = traded.without_unfinished_session(&calendar, now);
        let reference = reference.without_unfinished_session(&calendar, now);
        Ok(MarketDataSnapshot::new(traded, reference, warnings))
    }

    pub async fn engine_context(&self, source: &MarketDataSource) -> Result<EngineContext> {
        let snapshot = match source {
            MarketDataSource::Snapshot(path) => {
                ensure_market_data_file(path).await?;
                MarketDataSnapshot::load_from_file(path)?
            }
            MarketDataSource::Remote { start } => self.fetch_market_data(*start).await?,
        };
        EngineContext::from_snapshot(snapshot, self.calendar(), self.rsi_reference()?)
    }
}

/// Price history, weekly RSI table and calendar a command runs against.
pub struct EngineContext {
    market: MarketDataSnapshot,
    rsi: WeeklyRsiReference,
    calendar: TradingCalendar,
}

impl EngineContext {
    pub fn from_snapshot(
        market: MarketDataSnapshot,
        calendar: TradingCalendar,
        rsi: WeeklyRsiReference,
    ) -> Result<Self> {
        for series in [&market.traded, &market.reference] {
            if series.is_empty() {
                return Err(EngineError::MissingPriceData {
                    symbol: series.symbol().to_string(),
                }
                .into());
            }
        }
        for warning in &market.warnings {
            warn!(
                "Data warning for {} on {}: {}",
                warning.symbol, warning.date, warning.message
            );
        }
        if rsi.is_empty() {
            warn!("Weekly RSI reference is empty; run `update-rsi` first");
        }
        info!(
            "{}: {} bars through {:?}; weekly RSI through {:?}",
            market.traded.symbol(),
            market.traded.len(),
            market.traded.last_date(),
            rsi.latest().map(|entry| entry.end)
        );
        Ok(Self {
            market,
            rsi,
            calendar,
        })
    }

    pub fn traded(&self) -> &PriceSeries {
        &self.market.traded
    }

    pub fn reference(&self) -> &PriceSeries {
        &self.market.reference
    }

    pub fn warnings(&self) -> &[DataWarning] {
        &self.market.warnings
    }

    pub fn rsi(&self) -> &WeeklyRsiReference {
        &self.rsi
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    pub fn latest_completed_trading_day(&self) -> NaiveDate {
        self.calendar.latest_completed_trading_day(Utc::now())
    }

    pub fn into_parts(self) -> (PriceSeries, WeeklyRsiReference, TradingCalendar) {
        (self.market.traded, self.rsi, self.calendar)
    }
}

pub fn write_json_report<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    let file = fs::File::create(path)
        .with_context(|| format!("Unable to create report at {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .with_context(|| format!("Failed to serialize report to {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("Failed to flush report to {}", path.display()))?;
    info!("Report written to {}", path.display());
    Ok(())
}
