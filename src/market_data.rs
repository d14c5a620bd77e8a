use crate::calendar::{session_date, TradingCalendar};
use crate::models::{Candle, DataWarning};
use crate::retry::retry_http_operation;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::America::New_York;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

const MARKET_DATA_SNAPSHOT_VERSION: u32 = 1;
const DEFAULT_CHART_BASE_URL: &str = "https://query1.finance.yahoo.com";
const HISTORY_PADDING_DAYS: i64 = 180;

/// Daily bars for one symbol, ascending and unique by date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    symbol: String,
    candles: Vec<Candle>,
}

/// A provider row before validation; any field may be missing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPriceRow {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<u64>,
}

impl PriceSeries {
    pub fn new(symbol: impl Into<String>, mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|candle| candle.date);
        // Keep the last row for a repeated date.
        candles.reverse();
        candles.dedup_by_key(|candle| candle.date);
        candles.reverse();
        Self {
            symbol: symbol.into(),
            candles,
        }
    }

    /// Validates provider rows. Rows without a usable close are dropped and
    /// reported, unless the correction table supplies one.
    pub fn from_raw_rows(
        symbol: &str,
        rows: Vec<RawPriceRow>,
        corrections: &ManualCloseCorrections,
    ) -> (Self, Vec<DataWarning>) {
        let mut warnings = Vec::new();
        let mut candles = Vec::with_capacity(rows.len());

        for row in rows {
            let corrected = corrections.get(symbol, row.date);
            let close = match (corrected, row.close) {
                (Some(value), _) => value,
                (None, Some(value)) if value.is_finite() && value > 0.0 => value,
                (None, other) => {
                    warnings.push(DataWarning {
                        symbol: symbol.to_string(),
                        date: row.date,
                        message: match other {
                            None => "missing close; row dropped".to_string(),
                            Some(value) => format!("invalid close {}; row dropped", value),
                        },
                    });
                    continue;
                }
            };
            let usable = |value: Option<f64>| value.filter(|v| v.is_finite() && *v > 0.0);
            candles.push(Candle {
                date: row.date,
                open: usable(row.open).unwrap_or(close),
                high: usable(row.high).unwrap_or(close).max(close),
                low: usable(row.low).unwrap_or(close).min(close),
                close,
                volume: row.volume.unwrap_or(0),
            });
        }

        for warning in &warnings {
            warn!(
                "{} {}: {}",
                warning.symbol, warning.date, warning.message
            );
        }
        (Self::new(symbol, candles), warnings)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.candles.first().map(|candle| candle.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.candles.last().map(|candle| candle.date)
    }

    pub fn close_on(&self, date: NaiveDate) -> Option<f64> {
        self.candles
            .binary_search_by_key(&date, |candle| candle.date)
            .ok()
            .map(|index| self.candles[index].close)
    }

    /// Last close strictly before `date`.
    pub fn previous_close(&self, date: NaiveDate) -> Option<f64> {
        let index = self.candles.partition_point(|candle| candle.date < date);
        index
            .checked_sub(1)
            .map(|previous| self.candles[previous].close)
    }

    /// Bars with `start <= date <= end`.
    pub fn window(&self, start: NaiveDate, end: NaiveDate) -> &[Candle] {
        let lower = self.candles.partition_point(|candle| candle.date < start);
        let upper = self.candles.partition_point(|candle| candle.date <= end);
        if lower >= upper {
            return &[];
        }
        &self.candles[lower..upper]
    }

    pub fn truncate_after(&self, date: NaiveDate) -> Self {
        let upper = self.candles.partition_point(|candle| candle.date <= date);
        Self {
            symbol: self.symbol.clone(),
            candles: self.candles[..upper].to_vec(),
        }
    }

    /// Drops a bar for the current session when the session has not closed yet.
    pub fn without_unfinished_session(mut self, calendar: &TradingCalendar, now: DateTime<Utc>) -> Self {
        let today = session_date(now);
        if self.last_date() == Some(today) && !calendar.is_session_closed(now) {
            info!(
                "Dropping unfinished {} session bar for {}",
                self.symbol, today
            );
            self.candles.pop();
        }
        self
    }
}

/// Out-of-band close overrides for known provider gaps, keyed by `(symbol, date)`.
#[derive(Debug, Clone, Default)]
pub struct ManualCloseCorrections {
    entries: HashMap<(String, NaiveDate), f64>,
}

#[derive(Debug, Deserialize)]
struct CorrectionRow {
    symbol: String,
    date: NaiveDate,
    close: f64,
}

impl ManualCloseCorrections {
    pub fn insert(&mut self, symbol: &str, date: NaiveDate, close: f64) {
        self.entries
            .insert((symbol.to_ascii_uppercase(), date), close);
    }

    pub fn get(&self, symbol: &str, date: NaiveDate) -> Option<f64> {
        self.entries
            .get(&(symbol.to_ascii_uppercase(), date))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read price corrections at {}", path.display()))?;
        let rows: Vec<CorrectionRow> = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid price corrections at {}", path.display()))?;
        let mut corrections = Self::default();
        for row in rows {
            if !row.close.is_finite() || row.close <= 0.0 {
                return Err(anyhow!(
                    "Correction for {} on {} must be a positive close (value: {})",
                    row.symbol,
                    row.date,
                    row.close
                ));
            }
            corrections.insert(&row.symbol, row.date, row.close);
        }
        info!(
            "Loaded {} manual close correction(s) from {}",
            corrections.len(),
            path.display()
        );
        Ok(corrections)
    }
}

/// Provider range long enough to cover `start` plus indicator warm-up.
pub fn lookback_range_for(start: NaiveDate, today: NaiveDate) -> &'static str {
    let needed_days = (today - (start - Duration::days(HISTORY_PADDING_DAYS))).num_days();
    match needed_days {
        d if d <= 365 => "1y",
        d if d <= 730 => "2y",
        d if d <= 1825 => "5y",
        d if d <= 3650 => "10y",
        d if d <= 5475 => "15y",
        _ => "max",
    }
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChartQuote {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<f64>>,
}

/// Converts a chart API payload into rows dated in New York time.
pub fn parse_chart_response(body: &str) -> Result<Vec<RawPriceRow>> {
    let envelope: ChartEnvelope =
        serde_json::from_str(body).context("Unexpected chart response format")?;
    if let Some(error) = envelope.chart.error {
        return Err(anyhow!(
            "Chart API error {}: {}",
            error.code,
            error.description
        ));
    }
    let result = envelope
        .chart
        .result
        .and_then(|mut results| results.drain(..).next())
        .ok_or_else(|| anyhow!("Chart response contained no result"))?;
    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();

    let pick = |values: &[Option<f64>], index: usize| values.get(index).copied().flatten();
    let mut rows = Vec::with_capacity(result.timestamp.len());
    for (index, timestamp) in result.timestamp.iter().enumerate() {
        let Some(instant) = Utc.timestamp_opt(*timestamp, 0).single() else {
            continue;
        };
        rows.push(RawPriceRow {
            date: instant.with_timezone(&New_York).date_naive(),
            open: pick(&quote.open, index),
            high: pick(&quote.high, index),
            low: pick(&quote.low, index),
            close: pick(&quote.close, index),
            volume: pick(&quote.volume, index)
                .filter(|v| v.is_finite() && *v >= 0.0)
                .map(|v| v as u64),
        });
    }
    Ok(rows)
}

pub struct YahooChartClient {
    http: reqwest::Client,
    base_url: String,
}

impl YahooChartClient {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent("Mozilla/5.0 (compatible; tranche-engine)")
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: DEFAULT_CHART_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn request_chart(&self, symbol: &str, range: &str) -> Result<String> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);
        let response = self
            .http
            .get(&url)
            .query(&[("range", range), ("interval", "1d"), ("includePrePost", "false")])
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Chart request for {} returned {}", symbol, status));
        }
        response
            .text()
            .await
            .with_context(|| format!("Failed to read chart body for {}", symbol))
    }

    pub async fn fetch_rows(&self, symbol: &str, range: &str) -> Result<Vec<RawPriceRow>> {
        let body = retry_http_operation!(
            format!("{} price history ({})", symbol, range),
            self.request_chart(symbol, range)
        )?;
        parse_chart_response(&body)
    }

    pub async fn fetch_series(
        &self,
        symbol: &str,
        range: &str,
        corrections: &ManualCloseCorrections,
    ) -> Result<(PriceSeries, Vec<DataWarning>)> {
        let rows = self.fetch_rows(symbol, range).await?;
        let (series, warnings) = PriceSeries::from_raw_rows(symbol, rows, corrections);
        info!(
            "Fetched {} daily bars for {} ({} range, {} warning(s))",
            series.len(),
            symbol,
            range,
            warnings.len()
        );
        Ok((series, warnings))
    }
}

/// Traded and reference series saved for offline runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataSnapshot {
    version: u32,
    pub generated_at: DateTime<Utc>,
    pub traded: PriceSeries,
    pub reference: PriceSeries,
    #[serde(default)]
    pub warnings: Vec<DataWarning>,
}

impl MarketDataSnapshot {
    pub fn new(traded: PriceSeries, reference: PriceSeries, warnings: Vec<DataWarning>) -> Self {
        Self {
            version: MARKET_DATA_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            traded,
            reference,
            warnings,
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| {
            format!("Failed to open market data snapshot at {}", path.display())
        })?;
        let reader = BufReader::new(file);
        let snapshot: MarketDataSnapshot =
            bincode::deserialize_from(reader).context("Snapshot decode failed")?;

        if snapshot.version != MARKET_DATA_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Market data snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                MARKET_DATA_SNAPSHOT_VERSION
            ));
        }
        info!(
            "Loaded snapshot from {} generated {}: {} {} bars, {} {} bars",
            path.display(),
            snapshot.generated_at.format("%Y-%m-%d %H:%M"),
            snapshot.traded.len(),
            snapshot.traded.symbol(),
            snapshot.reference.len(),
            snapshot.reference.symbol()
        );
        Ok(snapshot)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path).with_context(|| {
            format!(
                "Unable to create market data snapshot at {}",
                path.display()
            )
        })?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self)
            .context("Failed to serialize market data snapshot")?;
        writer
            .flush()
            .with_context(|| format!("Failed to flush snapshot to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn row(date: NaiveDate, close: Option<f64>) -> RawPriceRow {
        RawPriceRow {
            date,
            open: close,
            high: close,
            low: close,
            close,
            volume: Some(100),
        }
    }

    #[test]
    fn null_closes_are_dropped_with_warnings() {
        let rows = vec![
            row(d(2024, 1, 2), Some(10.0)),
            row(d(2024, 1, 3), None),
            row(d(2024, 1, 4), Some(f64::NAN)),
            row(d(2024, 1, 5), Some(11.0)),
        ];
        let (series, warnings) =
            PriceSeries::from_raw_rows("SOXL", rows, &ManualCloseCorrections::default());
        assert_eq!(series.len(), 2);
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].date, d(2024, 1, 3));
    }

    #[test]
    fn corrections_override_and_fill_gaps() {
        let mut corrections = ManualCloseCorrections::default();
        corrections.insert("soxl", d(2024, 1, 3), 10.5);
        corrections.insert("SOXL", d(2024, 1, 5), 12.0);
        let rows = vec![
            row(d(2024, 1, 2), Some(10.0)),
            row(d(2024, 1, 3), None),
            row(d(2024, 1, 5), Some(11.0)),
        ];
        let (series, warnings) = PriceSeries::from_raw_rows("SOXL", rows, &corrections);
        assert!(warnings.is_empty());
        assert_eq!(series.close_on(d(2024, 1, 3)), Some(10.5));
        assert_eq!(series.close_on(d(2024, 1, 5)), Some(12.0));
        assert_eq!(series.candles()[2].high, 12.0);
    }

    #[test]
    fn window_and_previous_close() {
        let (series, _) = PriceSeries::from_raw_rows(
            "SOXL",
            vec![
                row(d(2024, 1, 5), Some(12.0)),
                row(d(2024, 1, 2), Some(10.0)),
                row(d(2024, 1, 3), Some(11.0)),
                row(d(2024, 1, 3), Some(11.5)),
            ],
            &ManualCloseCorrections::default(),
        );
        assert_eq!(series.len(), 3);
        assert_eq!(series.close_on(d(2024, 1, 3)), Some(11.5));
        assert_eq!(series.previous_close(d(2024, 1, 5)), Some(11.5));
        assert_eq!(series.previous_close(d(2024, 1, 4)), Some(11.5));
        assert_eq!(series.previous_close(d(2024, 1, 2)), None);
        assert_eq!(series.window(d(2024, 1, 3), d(2024, 1, 4)).len(), 1);
        assert!(series.window(d(2024, 2, 1), d(2024, 1, 1)).is_empty());
        assert_eq!(series.truncate_after(d(2024, 1, 3)).last_date(), Some(d(2024, 1, 3)));
    }

    #[test]
    fn parses_chart_payload_in_new_york_dates() {
        // 2024-01-02 14:30 UTC and 2024-01-03 14:30 UTC (market opens).
        let body = r#"{"chart":{"result":[{"timestamp":[1704205800,1704292200],
            "indicators":{"quote":[{"open":[10.0,null],"high":[10.5,null],
            "low":[9.5,null],"close":[10.2,null],"volume":[1000,null]}]}}],"error":null}}"#;
        let rows = parse_chart_response(body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, d(2024, 1, 2));
        assert_eq!(rows[0].close, Some(10.2));
        assert_eq!(rows[0].volume, Some(1000));
        assert_eq!(rows[1].close, None);
    }

    #[test]
    fn chart_errors_surface() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found"}}}"#;
        let err = parse_chart_response(body).unwrap_err();
        assert!(err.to_string().contains("No data found"));
    }

    #[test]
    fn lookback_range_covers_padding() {
        let today = d(2025, 1, 1);
        assert_eq!(lookback_range_for(d(2024, 11, 1), today), "1y");
        assert_eq!(lookback_range_for(d(2024, 1, 1), today), "2y");
        assert_eq!(lookback_range_for(d(2017, 1, 1), today), "10y");
        assert_eq!(lookback_range_for(d(2005, 1, 1), today), "max");
    }

    #[test]
    fn snapshot_round_trips_through_file() {
        let dir = std::env::temp_dir().join(format!("tranche-snapshot-{}", uuid::Uuid::new_v4()));
        let path = dir.join("market.bin");
        let traded = PriceSeries::new(
            "SOXL",
            vec![Candle {
                date: d(2024, 1, 2),
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 5,
            }],
        );
        let snapshot = MarketDataSnapshot::new(traded.clone(), PriceSeries::new("QQQ", vec![]), vec![]);
        snapshot.save_to_file(&path).unwrap();
        let loaded = MarketDataSnapshot::load_from_file(&path).unwrap();
        assert_eq!(loaded.traded, traded);
        assert!(loaded.reference.is_empty());
        fs::remove_dir_all(dir).ok();
    }
}
