use crate::error::EngineError;
use crate::indicators::DEFAULT_RSI_WINDOW;
use crate::models::SeedEvent;
use crate::regime::Regime;
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_INITIAL_CAPITAL: f64 = 9_000.0;
pub const DEFAULT_CAPITAL_REBASE_INTERVAL: u32 = 10;
const RATIO_SUM_TOLERANCE: f64 = 1e-3;

/// Thresholds and allocation schedule for one regime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeConfig {
    pub buy_threshold_pct: f64,
    pub sell_threshold_pct: f64,
    pub max_hold_trading_days: u32,
    pub round_count: usize,
    pub allocation_ratios: Vec<f64>,
}

impl RegimeConfig {
    pub fn conservative_default() -> Self {
        Self {
            buy_threshold_pct: 3.5,
            sell_threshold_pct: 1.4,
            max_hold_trading_days: 35,
            round_count: 7,
            allocation_ratios: vec![0.049, 0.127, 0.230, 0.257, 0.028, 0.169, 0.140],
        }
    }

    pub fn aggressive_default() -> Self {
        Self {
            buy_threshold_pct: 3.6,
            sell_threshold_pct: 3.5,
            max_hold_trading_days: 7,
            round_count: 8,
            allocation_ratios: vec![0.062, 0.134, 0.118, 0.148, 0.150, 0.182, 0.186, 0.020],
        }
    }

    pub fn validate(&self, label: &str) -> Result<(), EngineError> {
        if self.round_count == 0 {
            return Err(EngineError::InvalidConfig(format!(
                "{} round_count must be at least 1",
                label
            )));
        }
        if self.allocation_ratios.len() != self.round_count {
            return Err(EngineError::InvalidConfig(format!(
                "{} has {} allocation ratios for {} rounds",
                label,
                self.allocation_ratios.len(),
                self.round_count
            )));
        }
        if !self.buy_threshold_pct.is_finite() || !self.sell_threshold_pct.is_finite() {
            return Err(EngineError::InvalidConfig(format!(
                "{} thresholds must be finite",
                label
            )));
        }
        if self
            .allocation_ratios
            .iter()
            .any(|ratio| !ratio.is_finite() || *ratio < 0.0)
        {
            return Err(EngineError::InvalidConfig(format!(
                "{} allocation ratios must be finite and non-negative",
                label
            )));
        }
        let total: f64 = self.allocation_ratios.iter().sum();
        if (total - 1.0).abs() > RATIO_SUM_TOLERANCE {
            warn!(
                "{} allocation ratios sum to {:.3} rather than 1.0",
                label, total
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegimePolicy {
    /// Weekly RSI rules pick the regime.
    #[default]
    Adaptive,
    AggressiveOnly,
}

impl RegimePolicy {
    pub fn apply(self, regime: Regime) -> Regime {
        match self {
            RegimePolicy::Adaptive => regime,
            RegimePolicy::AggressiveOnly => Regime::Aggressive,
        }
    }
}

/// Optional exposure limits. Defaults leave the base strategy untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    /// Skip buys once positions reach this share of total assets.
    pub position_cap_ratio: Option<f64>,
    /// Share of total assets kept out of reach of new buys.
    pub cash_buffer_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub initial_capital: f64,
    pub conservative: RegimeConfig,
    pub aggressive: RegimeConfig,
    pub regime_policy: RegimePolicy,
    pub risk: RiskLimits,
    pub capital_rebase_interval: u32,
    pub seed_events: Vec<SeedEvent>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            conservative: RegimeConfig::conservative_default(),
            aggressive: RegimeConfig::aggressive_default(),
            regime_policy: RegimePolicy::Adaptive,
            risk: RiskLimits::default(),
            capital_rebase_interval: DEFAULT_CAPITAL_REBASE_INTERVAL,
            seed_events: Vec::new(),
        }
    }
}

impl StrategyConfig {
    pub fn for_regime(&self, regime: Regime) -> &RegimeConfig {
        match regime {
            Regime::Conservative => &self.conservative,
            Regime::Aggressive => &self.aggressive,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.initial_capital.is_finite() || self.initial_capital < 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "initial_capital must be a non-negative number (value: {})",
                self.initial_capital
            )));
        }
        if self.capital_rebase_interval == 0 {
            return Err(EngineError::InvalidConfig(
                "capital_rebase_interval must be at least 1".to_string(),
            ));
        }
        if let Some(cap) = self.risk.position_cap_ratio {
            if !(0.0..=1.0).contains(&cap) {
                return Err(EngineError::InvalidConfig(format!(
                    "position_cap_ratio must be within 0..=1 (value: {})",
                    cap
                )));
            }
        }
        if !(0.0..1.0).contains(&self.risk.cash_buffer_ratio) {
            return Err(EngineError::InvalidConfig(format!(
                "cash_buffer_ratio must be within 0..1 (value: {})",
                self.risk.cash_buffer_ratio
            )));
        }
        if self.seed_events.iter().any(|event| !event.amount.is_finite()) {
            return Err(EngineError::InvalidConfig(
                "seed event amounts must be finite".to_string(),
            ));
        }
        self.conservative.validate("Conservative (SF)")?;
        self.aggressive.validate("Aggressive (AG)")
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read strategy config at {}", path.display()))?;
        let config: StrategyConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid strategy config at {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Process-level settings read from the environment.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub traded_symbol: String,
    pub reference_symbol: String,
    pub rsi_reference_path: PathBuf,
    pub manual_corrections_path: Option<PathBuf>,
    pub initial_capital: Option<f64>,
    pub session_start_date: Option<NaiveDate>,
    pub rsi_window: usize,
    pub price_fetch_timeout_secs: u64,
    pub extra_market_holidays: Vec<NaiveDate>,
}

impl EngineSettings {
    pub fn from_env() -> Result<Self> {
        let settings: HashMap<String, String> = std::env::vars().collect();
        Self::from_settings_map(&settings)
    }

    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let traded_symbol = optional_setting(settings, "TRADED_SYMBOL")
            .unwrap_or("SOXL")
            .to_ascii_uppercase();
        let reference_symbol = optional_setting(settings, "REFERENCE_SYMBOL")
            .unwrap_or("QQQ")
            .to_ascii_uppercase();
        let rsi_reference_path = PathBuf::from(
            optional_setting(settings, "RSI_REFERENCE_PATH")
                .unwrap_or("data/weekly_rsi_reference.json"),
        );
        let manual_corrections_path =
            optional_setting(settings, "MANUAL_CORRECTIONS_PATH").map(PathBuf::from);
        let initial_capital = if has_setting(settings, "INITIAL_CAPITAL") {
            Some(require_setting_f64(
                settings,
                "INITIAL_CAPITAL",
                Some(0.0),
                None,
            )?)
        } else {
            None
        };
        let session_start_date = if has_setting(settings, "SESSION_START_DATE") {
            Some(require_setting_date(settings, "SESSION_START_DATE")?)
        } else {
            None
        };
        let rsi_window = if has_setting(settings, "RSI_WINDOW") {
            require_setting_usize(settings, "RSI_WINDOW", 2)?
        } else {
            DEFAULT_RSI_WINDOW
        };
        let price_fetch_timeout_secs = if has_setting(settings, "PRICE_FETCH_TIMEOUT_SECS") {
            require_setting_usize(settings, "PRICE_FETCH_TIMEOUT_SECS", 1)? as u64
        } else {
            15
        };
        let extra_market_holidays = if has_setting(settings, "EXTRA_MARKET_HOLIDAYS") {
            require_setting_date_list(settings, "EXTRA_MARKET_HOLIDAYS")?
        } else {
            Vec::new()
        };

        if traded_symbol == reference_symbol {
            warn!(
                "TRADED_SYMBOL and REFERENCE_SYMBOL are both {}; regime RSI will follow the traded instrument",
                traded_symbol
            );
        }

        Ok(Self {
            traded_symbol,
            reference_symbol,
            rsi_reference_path,
            manual_corrections_path,
            initial_capital,
            session_start_date,
            rsi_window,
            price_fetch_timeout_secs,
            extra_market_holidays,
        })
    }
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn has_setting(settings: &HashMap<String, String>, key: &str) -> bool {
    optional_setting(settings, key).is_some()
}

fn require_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    optional_setting(settings, key).ok_or_else(|| anyhow!("Missing required setting {}", key))
}

pub fn require_setting_date(settings: &HashMap<String, String>, key: &str) -> Result<NaiveDate> {
    let raw = require_setting(settings, key)?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        anyhow!(
            "Setting {} must be a date in YYYY-MM-DD format (value: {})",
            key,
            raw
        )
    })
}

fn require_setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<f64> {
    let raw = require_setting(settings, key)?;
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(value)
}

fn require_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    min: usize,
) -> Result<usize> {
    let raw = require_setting(settings, key)?;
    let value = raw
        .parse::<usize>()
        .map_err(|_| anyhow!("Setting {} must be a whole number (value: {})", key, raw))?;
    if value < min {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value)
}

fn require_setting_date_list(
    settings: &HashMap<String, String>,
    key: &str,
) -> Result<Vec<NaiveDate>> {
    let raw = require_setting(settings, key)?;
    let trimmed = raw.trim().trim_matches(|c| c == '[' || c == ']');
    let mut values = Vec::new();

    for part in trimmed.split(|c: char| c == ',' || c.is_whitespace()) {
        let entry = part.trim().trim_matches('"');
        if entry.is_empty() {
            continue;
        }
        let value = NaiveDate::parse_from_str(entry, "%Y-%m-%d").map_err(|_| {
            anyhow!(
                "Setting {} must be a list of YYYY-MM-DD dates (value: {})",
                key,
                raw
            )
        })?;
        values.push(value);
    }

    Ok(values)
}
