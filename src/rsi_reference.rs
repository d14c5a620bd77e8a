use anyhow::{anyhow, Context, Result};
use chrono::{Datelike, NaiveDate, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

const METADATA_KEY: &str = "metadata";

/// Read-only weekly RSI source consumed by the regime logic.
pub trait RsiLookup {
    fn lookup_rsi(&self, date: NaiveDate) -> Option<f64>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyRsiEntry {
    pub week: u32,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub rsi: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct YearBlock {
    #[serde(default)]
    description: String,
    #[serde(default)]
    weeks: Vec<WeeklyRsiEntry>,
}

/// Weekly RSI table keyed by week-ending Friday.
#[derive(Debug, Clone, Default)]
pub struct WeeklyRsiReference {
    weeks: BTreeMap<NaiveDate, WeeklyRsiEntry>,
    metadata: Map<String, Value>,
}

impl WeeklyRsiReference {
    pub fn from_entries<I: IntoIterator<Item = WeeklyRsiEntry>>(entries: I) -> Self {
        let weeks = entries
            .into_iter()
            .filter(|entry| entry.rsi.is_finite())
            .map(|entry| (entry.end, entry))
            .collect();
        Self {
            weeks,
            metadata: Map::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.weeks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weeks.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &WeeklyRsiEntry> {
        self.weeks.values()
    }

    pub fn latest(&self) -> Option<&WeeklyRsiEntry> {
        self.weeks.values().next_back()
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Exact week, else the nearest earlier week, else the earliest week on file.
    pub fn lookup(&self, date: NaiveDate) -> Option<&WeeklyRsiEntry> {
        if let Some((_, entry)) = self.weeks.range(date..).next() {
            if entry.start <= date {
                return Some(entry);
            }
        }
        if let Some((_, entry)) = self.weeks.range(..date).next_back() {
            return Some(entry);
        }
        self.weeks.values().next()
    }

    /// Inserts or overwrites weeks; returns how many weeks were new.
    pub fn merge<I: IntoIterator<Item = WeeklyRsiEntry>>(&mut self, entries: I) -> usize {
        let mut added = 0;
        for entry in entries {
            if !entry.rsi.is_finite() {
                continue;
            }
            if self.weeks.insert(entry.end, entry).is_none() {
                added += 1;
            }
        }
        self.renumber_weeks();
        added
    }

    pub fn set_metadata(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }

    fn renumber_weeks(&mut self) {
        let mut current_year = None;
        let mut counter = 0;
        for (end, entry) in self.weeks.iter_mut() {
            if current_year != Some(end.year()) {
                current_year = Some(end.year());
                counter = 0;
            }
            counter += 1;
            entry.week = counter;
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read RSI reference at {}", path.display()))?;
        let reference = Self::from_json_str(&raw)
            .with_context(|| format!("Invalid RSI reference at {}", path.display()))?;
        info!(
            "Loaded {} weekly RSI values from {}",
            reference.len(),
            path.display()
        );
        Ok(reference)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(raw).context("RSI reference is not valid JSON")?;
        let Value::Object(object) = root else {
            return Err(anyhow!("RSI reference root must be an object keyed by year"));
        };

        let mut weeks = BTreeMap::new();
        let mut metadata = Map::new();
        for (key, value) in object {
            if key == METADATA_KEY {
                if let Value::Object(map) = value {
                    metadata = map;
                }
                continue;
            }
            if key.parse::<i32>().is_err() {
                warn!("Ignoring unexpected RSI reference key '{}'", key);
                continue;
            }
            let block: YearBlock = serde_json::from_value(value)
                .with_context(|| format!("Invalid weeks for year {}", key))?;
            for entry in block.weeks {
                if entry.rsi.is_finite() {
                    weeks.insert(entry.end, entry);
                }
            }
        }

        Ok(Self { weeks, metadata })
    }

    pub fn to_json_value(&self) -> Value {
        let mut years: BTreeMap<i32, Vec<WeeklyRsiEntry>> = BTreeMap::new();
        for entry in self.weeks.values() {
            years.entry(entry.end.year()).or_default().push(entry.clone());
        }

        let mut root = Map::new();
        for (year, weeks) in years {
            let block = YearBlock {
                description: format!("{} weekly RSI values", year),
                weeks,
            };
            root.insert(
                year.to_string(),
                serde_json::to_value(block).unwrap_or(Value::Null),
            );
        }

        let mut metadata = self.metadata.clone();
        metadata.insert("total_weeks".to_string(), Value::from(self.weeks.len()));
        metadata.insert(
            "last_updated".to_string(),
            Value::from(Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()),
        );
        root.insert(METADATA_KEY.to_string(), Value::Object(metadata));
        Value::Object(root)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create RSI reference directory {}", parent.display())
                })?;
            }
        }
        let json = serde_json::to_string_pretty(&self.to_json_value())
            .context("Failed to serialize RSI reference")?;
        fs::write(path, json)
            .with_context(|| format!("Unable to write RSI reference to {}", path.display()))
    }
}

impl RsiLookup for WeeklyRsiReference {
    fn lookup_rsi(&self, date: NaiveDate) -> Option<f64> {
        self.lookup(date).map(|entry| entry.rsi)
    }
}

impl<T: RsiLookup + ?Sized> RsiLookup for &T {
    fn lookup_rsi(&self, date: NaiveDate) -> Option<f64> {
        (**self).lookup_rsi(date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn entry(friday: NaiveDate, rsi: f64) -> WeeklyRsiEntry {
        WeeklyRsiEntry {
            week: 0,
            start: friday - Duration::days(4),
            end: friday,
            rsi,
        }
    }

    fn sample() -> WeeklyRsiReference {
        WeeklyRsiReference::from_entries(vec![
            entry(d(2024, 1, 5), 41.0),
            entry(d(2024, 1, 12), 44.0),
            entry(d(2024, 1, 26), 52.0),
        ])
    }

    #[test]
    fn lookup_prefers_containing_week() {
        let reference = sample();
        assert_eq!(reference.lookup_rsi(d(2024, 1, 8)), Some(44.0));
        assert_eq!(reference.lookup_rsi(d(2024, 1, 26)), Some(52.0));
    }

    #[test]
    fn lookup_falls_back_to_nearest_earlier_week() {
        let reference = sample();
        // Week of 2024-01-19 is missing.
        assert_eq!(reference.lookup_rsi(d(2024, 1, 17)), Some(44.0));
        // Weekend after the last week.
        assert_eq!(reference.lookup_rsi(d(2024, 1, 27)), Some(52.0));
        assert_eq!(reference.lookup_rsi(d(2024, 6, 3)), Some(52.0));
    }

    #[test]
    fn lookup_before_first_week_returns_earliest() {
        let reference = sample();
        assert_eq!(reference.lookup_rsi(d(2023, 12, 1)), Some(41.0));
        assert_eq!(WeeklyRsiReference::default().lookup_rsi(d(2024, 1, 8)), None);
    }

    #[test]
    fn json_layout_is_grouped_by_year() {
        let mut reference = sample();
        reference.merge(vec![entry(d(2025, 1, 3), 61.5)]);
        let value = reference.to_json_value();
        assert_eq!(value["2024"]["weeks"].as_array().unwrap().len(), 3);
        assert_eq!(value["2025"]["weeks"][0]["week"], 1);
        assert_eq!(value["2025"]["weeks"][0]["start"], "2024-12-30");
        assert_eq!(value["metadata"]["total_weeks"], 4);

        let parsed = WeeklyRsiReference::from_json_str(&value.to_string()).unwrap();
        assert_eq!(parsed.len(), 4);
        assert_eq!(parsed.lookup_rsi(d(2025, 1, 2)), Some(61.5));
    }

    #[test]
    fn merge_overwrites_existing_weeks() {
        let mut reference = sample();
        let added = reference.merge(vec![entry(d(2024, 1, 12), 47.0), entry(d(2024, 1, 19), 50.0)]);
        assert_eq!(added, 1);
        assert_eq!(reference.lookup_rsi(d(2024, 1, 10)), Some(47.0));
        assert_eq!(reference.lookup_rsi(d(2024, 1, 17)), Some(50.0));
    }
}
