use anyhow::{anyhow, Result};
use std::path::Path;
use tokio::fs;

pub async fn ensure_market_data_file(path: &Path) -> Result<()> {
    match fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => Ok(()),
        Ok(_) => Err(anyhow!(
            "Market data path {} is not a file",
            path.display()
        )),
        Err(_) => Err(anyhow!(
            "Market data snapshot not found at {}. Generate it with `export-market-data`, or drop --data-file to fetch prices directly.",
            path.display()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_snapshot_names_the_export_command() {
        let path = std::env::temp_dir().join(format!("missing-{}.bin", uuid::Uuid::new_v4()));
        let err = ensure_market_data_file(&path).await.unwrap_err();
        assert!(err.to_string().contains("export-market-data"));
    }

    #[tokio::test]
    async fn directory_is_rejected() {
        let err = ensure_market_data_file(&std::env::temp_dir()).await.unwrap_err();
        assert!(err.to_string().contains("not a file"));
    }
}
