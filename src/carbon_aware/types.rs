//! Types for generation-mix samples and carbon-intensity results

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Literal the transparency platform uses for values that were not estimated
pub const NOT_ESTIMATED: &str = "n/e";

/// Column key of a provider table.
///
/// The ENTSO-E API yields `(production type, aggregation)` pairs while the
/// CSV export uses flat header strings. Both are flattened to a single
/// string before lookup.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ColumnLabel {
    Flat(String),
    Compound {
        category: String,
        aggregation: String,
    },
}

impl ColumnLabel {
    pub fn flat(label: impl Into<String>) -> Self {
        Self::Flat(label.into())
    }

    pub fn compound(category: impl Into<String>, aggregation: impl Into<String>) -> Self {
        Self::Compound {
            category: category.into(),
            aggregation: aggregation.into(),
        }
    }

    /// Join a compound label as `"<category> - <aggregation>"`
    pub fn flatten(&self) -> String {
        match self {
            Self::Flat(label) => label.trim().to_string(),
            Self::Compound {
                category,
                aggregation,
            } => format!("{} - {}", category.trim(), aggregation.trim()),
        }
    }
}

impl fmt::Display for ColumnLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.flatten())
    }
}

/// One cell of a provider table
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Quantity(f64),
    /// The `n/e` sentinel
    NotEstimated,
    /// Empty cell
    Missing,
    /// Non-numeric content, e.g. the `Area` metadata column
    Text(String),
}

impl CellValue {
    /// Parse a raw cell as exported by the provider
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::Missing;
        }
        if trimmed.eq_ignore_ascii_case(NOT_ESTIMATED) {
            return Self::NotEstimated;
        }
        match trimmed.parse::<f64>() {
            Ok(v) => Self::Quantity(v),
            Err(_) => Self::Text(trimmed.to_string()),
        }
    }

    /// Energy quantity of the cell; missing data counts as zero
    pub fn energy(&self, label: &str) -> Result<f64> {
        match self {
            Self::Quantity(v) => Ok(*v),
            Self::NotEstimated | Self::Missing => Ok(0.0),
            Self::Text(text) => Err(Error::ParseError(format!(
                "column '{label}' holds non-numeric value '{text}'"
            ))),
        }
    }
}

/// One row of a provider table
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRow {
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<ColumnLabel, CellValue>,
}

/// Time-indexed table of generation columns as returned by a provider
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerationTable {
    rows: BTreeMap<DateTime<Utc>, BTreeMap<ColumnLabel, CellValue>>,
}

impl GenerationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one cell, creating the row for `timestamp` if needed
    pub fn insert(&mut self, timestamp: DateTime<Utc>, label: ColumnLabel, value: CellValue) {
        self.rows.entry(timestamp).or_default().insert(label, value);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Most recent row of the series
    pub fn latest(&self) -> Option<GenerationRow> {
        self.rows
            .iter()
            .next_back()
            .map(|(timestamp, values)| GenerationRow {
                timestamp: *timestamp,
                values: values.clone(),
            })
    }

    /// Keep only rows with `start <= timestamp < end`
    pub fn retain_window(&mut self, window: &QueryWindow) {
        self.rows
            .retain(|timestamp, _| *timestamp >= window.start && *timestamp < window.end);
    }
}

/// Half-open UTC interval `[start, end)` used to query the provider
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl QueryWindow {
    /// `[start of today, start of tomorrow)` in UTC
    pub fn day_of(now: DateTime<Utc>) -> Self {
        let start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        Self {
            start,
            end: start + Duration::days(1),
        }
    }

    /// The one-day window ending where this one starts
    pub fn previous_day(&self) -> Self {
        Self {
            start: self.start - Duration::days(1),
            end: self.start,
        }
    }
}

impl fmt::Display for QueryWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%dT%H:%MZ"),
            self.end.format("%Y-%m-%dT%H:%MZ")
        )
    }
}

/// Normalized sample: canonical category → energy quantity
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GenerationSample {
    pub timestamp: DateTime<Utc>,
    pub categories: BTreeMap<String, f64>,
    /// Labels that matched neither the mapping table nor a canonical name
    pub unmapped: Vec<String>,
}

impl GenerationSample {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }

    /// Add energy to a category, summing repeated columns
    pub fn add(&mut self, category: impl Into<String>, energy: f64) {
        *self.categories.entry(category.into()).or_insert(0.0) += energy;
    }

    pub fn get(&self, category: &str) -> f64 {
        self.categories.get(category).copied().unwrap_or(0.0)
    }

    /// Total energy over every category, mapped or not
    pub fn total(&self) -> f64 {
        self.categories.values().sum()
    }
}

/// Carbon intensity computed from one generation sample
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CarbonIntensityResult {
    /// Zone identifier the estimate was computed for
    pub zone: String,
    /// Weighted intensity in gCO2-eq/kWh
    pub carbon_intensity: f64,
    /// Timestamp of the sample the value was computed from
    pub timestamp: DateTime<Utc>,
    /// Emission factor profile in effect (`base` or a zone name)
    pub factor_profile: String,
}
