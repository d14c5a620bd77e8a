use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

/// Whether an error stops a run or can be surfaced and retried by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    Fatal,
    Recoverable,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("no weekly RSI available for the week ending {week_ending} ({label})")]
    MissingRsi {
        week_ending: NaiveDate,
        label: &'static str,
    },
    #[error("no price data available for {symbol}")]
    MissingPriceData { symbol: String },
    #[error("invalid date '{input}' (expected YYYY-MM-DD)")]
    InvalidDate { input: String },
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InsufficientData(_) => ErrorKind::Recoverable,
            EngineError::MissingRsi { .. }
            | EngineError::MissingPriceData { .. }
            | EngineError::InvalidDate { .. }
            | EngineError::InvalidConfig(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }

    /// Human-readable explanation shown next to the structured kind.
    pub fn reason(&self) -> String {
        match self {
            EngineError::MissingRsi { .. } => format!(
                "{}. Refresh the weekly RSI reference before running.",
                self
            ),
            EngineError::MissingPriceData { symbol } => format!(
                "The price provider returned no usable rows for {}. Check the symbol or the data snapshot.",
                symbol
            ),
            _ => self.to_string(),
        }
    }
}

pub fn parse_date(input: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d").map_err(|_| EngineError::InvalidDate {
        input: input.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_rsi_is_fatal_and_insufficient_data_is_recoverable() {
        let missing = EngineError::MissingRsi {
            week_ending: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            label: "one week ago",
        };
        assert!(missing.is_fatal());
        assert!(missing.reason().contains("2024-01-05"));

        let thin = EngineError::InsufficientData("no RSI yet".to_string());
        assert_eq!(thin.kind(), ErrorKind::Recoverable);
    }

    #[test]
    fn parse_date_rejects_malformed_input() {
        assert_eq!(
            parse_date(" 2024-03-01 ").unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
        assert!(matches!(
            parse_date("03/01/2024"),
            Err(EngineError::InvalidDate { .. })
        ));
    }
}
