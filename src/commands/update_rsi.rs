use crate::calendar::week_ending_friday;
use crate::context::AppContext;
use crate::indicators::weekly_rsi_entries;
use crate::market_data::lookback_range_for;
use crate::regime::RegimeResolver;
use crate::rsi_reference::{WeeklyRsiEntry, WeeklyRsiReference};
use anyhow::{anyhow, Result};
use chrono::{NaiveDate, Utc};
use log::{info, warn};
use serde_json::json;

pub async fn run(app: &AppContext, start: NaiveDate) -> Result<()> {
    let settings = app.settings();
    let path = &settings.rsi_reference_path;
    let mut reference = if tokio::fs::metadata(path).await.is_ok() {
        app.rsi_reference()?
    } else {
        warn!(
            "No weekly RSI reference at {}; creating a new one",
            path.display()
        );
        WeeklyRsiReference::default()
    };

    let now = Utc::now();
    let calendar = app.calendar();
    let latest_completed = calendar.latest_completed_trading_day(now);
    let client = app.price_client()?;
    let corrections = app.corrections()?;
    let (series, warnings) = client
        .fetch_series(
            &settings.reference_symbol,
            lookback_range_for(start, now.date_naive()),
            &corrections,
        )
        .await?;
    for warning in &warnings {
        warn!("{} {}: {}", warning.symbol, warning.date, warning.message);
    }
    let series = series.without_unfinished_session(&calendar, now);
    if series.is_empty() {
        return Err(anyhow!(
            "No usable {} closes returned; the RSI reference was left unchanged",
            settings.reference_symbol
        ));
    }

    let entries = completed_weeks(
        weekly_rsi_entries(series.candles(), settings.rsi_window),
        latest_completed,
    );
    let Some(last) = entries.last().cloned() else {
        return Err(anyhow!(
            "Not enough {} history for a {}-week RSI",
            settings.reference_symbol,
            settings.rsi_window
        ));
    };

    let added = reference.merge(entries);
    reference.set_metadata("symbol", json!(settings.reference_symbol));
    reference.set_metadata("window", json!(settings.rsi_window));
    reference.set_metadata("method", json!("rolling-mean"));
    reference.set_metadata("updated_at", json!(now.to_rfc3339()));
    reference.save(path)?;

    info!(
        "Weekly RSI reference updated at {}: {} new week(s), {} total, latest week ending {} = {:.2}",
        path.display(),
        added,
        reference.len(),
        last.end,
        last.rsi
    );

    let next_session = calendar.next_trading_day(latest_completed);
    match RegimeResolver::new(&reference).resolve_as_of(next_session) {
        Ok(regime) => info!(
            "Regime for the week ending {}: {}",
            week_ending_friday(next_session),
            regime.code()
        ),
        Err(err) => warn!("Regime for the next session is not resolvable: {}", err),
    }
    Ok(())
}

/// Drops the current week while its Friday close has not printed yet.
fn completed_weeks(entries: Vec<WeeklyRsiEntry>, latest_completed: NaiveDate) -> Vec<WeeklyRsiEntry> {
    entries
        .into_iter()
        .filter(|entry| entry.end <= latest_completed)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(end: NaiveDate) -> WeeklyRsiEntry {
        WeeklyRsiEntry {
            week: 1,
            start: end - chrono::Duration::days(4),
            end,
            rsi: 50.0,
        }
    }

    #[test]
    fn partial_week_is_dropped() {
        let friday = NaiveDate::from_ymd_opt(2024, 3, 8).unwrap();
        let next_friday = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let wednesday = NaiveDate::from_ymd_opt(2024, 3, 13).unwrap();

        let kept = completed_weeks(vec![entry(friday), entry(next_friday)], wednesday);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].end, friday);

        let kept = completed_weeks(vec![entry(friday), entry(next_friday)], next_friday);
        assert_eq!(kept.len(), 2);
    }
}
