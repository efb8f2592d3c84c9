//! Transparency-platform CSV export as a generation provider

use crate::carbon_aware::provider::GenerationProvider;
use crate::carbon_aware::types::{CellValue, ColumnLabel, GenerationTable, QueryWindow};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::PathBuf;
use tracing::{debug, info, warn};

const MTU_COLUMN: &str = "MTU";
const ZONE_PLACEHOLDER: &str = "{zone}";

/// Reads "Actual Generation per Production Type" CSV exports from disk.
///
/// The path may contain a `{zone}` placeholder, so one file per zone can be
/// kept side by side.
#[derive(Clone, Debug)]
pub struct CsvExportProvider {
    path_template: String,
}

impl CsvExportProvider {
    pub fn new(path_template: impl Into<String>) -> Self {
        Self {
            path_template: path_template.into(),
        }
    }

    pub fn path_for(&self, zone_id: &str) -> PathBuf {
        PathBuf::from(self.path_template.replace(ZONE_PLACEHOLDER, zone_id))
    }
}

#[async_trait]
impl GenerationProvider for CsvExportProvider {
    async fn query_generation(
        &self,
        zone_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<GenerationTable> {
        let path = self.path_for(zone_id);
        debug!("Reading generation export {}", path.display());
        let content = tokio::fs::read_to_string(&path).await?;

        let mut table = parse_export(&content)?;
        table.retain_window(&QueryWindow { start, end });
        if table.is_empty() {
            warn!(
                "Export {} has no rows between {} and {}",
                path.display(),
                start,
                end
            );
            return Ok(table);
        }
        info!(
            "Loaded {} generation rows for zone {} from {}",
            table.len(),
            zone_id,
            path.display()
        );
        Ok(table)
    }

    fn name(&self) -> &str {
        "CSV export"
    }
}

/// `Biomass  - Actual Aggregated [MW]` → `Biomass - Actual Aggregated`
fn clean_header(raw: &str) -> String {
    let without_unit = match raw.trim().rfind(" [") {
        Some(idx) if raw.trim().ends_with(']') => &raw.trim()[..idx],
        _ => raw.trim(),
    };
    without_unit.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Start of an MTU cell such as `01.03.2024 00:00 - 01.03.2024 01:00 (UTC)`
fn parse_mtu_start(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Some(open) = raw.rfind('(') {
        let zone = raw[open..].trim_matches(|c| c == '(' || c == ')');
        if zone != "UTC" {
            return Err(Error::ParseError(format!(
                "MTU '{raw}' is not in UTC; export the data with the UTC time zone"
            )));
        }
    }
    let start = raw
        .split(" - ")
        .next()
        .map(str::trim)
        .unwrap_or_default();
    NaiveDateTime::parse_from_str(start, "%d.%m.%Y %H:%M")
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::ParseError(format!("invalid MTU '{raw}': {e}")))
}

/// Parse an export into a table indexed by MTU start.
///
/// All columns other than `MTU` are kept, including the `Area` metadata
/// column; normalization decides which ones carry energy.
pub fn parse_export(content: &str) -> Result<GenerationTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(clean_header).collect();
    let mtu_index = headers
        .iter()
        .position(|h| h == MTU_COLUMN)
        .ok_or_else(|| Error::ParseError("export has no MTU column".to_string()))?;

    let mut table = GenerationTable::new();
    for record in reader.records() {
        let record = record?;
        let timestamp = parse_mtu_start(record.get(mtu_index).unwrap_or_default())?;
        for (idx, cell) in record.iter().enumerate() {
            if idx == mtu_index {
                continue;
            }
            if let Some(header) = headers.get(idx) {
                table.insert(timestamp, ColumnLabel::flat(header.clone()), CellValue::parse(cell));
            }
        }
    }
    Ok(table)
}
