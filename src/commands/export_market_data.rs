use crate::context::AppContext;
use anyhow::Result;
use chrono::NaiveDate;
use log::info;
use std::path::Path;

pub async fn run(app: &AppContext, output_path: &Path, start: NaiveDate) -> Result<()> {
    info!(
        "Generating market data snapshot at {}",
        output_path.display()
    );

    let snapshot = app.fetch_market_data(start).await?;
    for warning in &snapshot.warnings {
        info!(
            "Skipped {} row on {}: {}",
            warning.symbol, warning.date, warning.message
        );
    }

    snapshot.save_to_file(output_path)?;
    info!(
        "Market data snapshot with {} {} bars and {} {} bars written to {}",
        snapshot.traded.len(),
        snapshot.traded.symbol(),
        snapshot.reference.len(),
        snapshot.reference.symbol(),
        output_path.display()
    );

    Ok(())
}
