//! Carbon intensity estimation from the latest generation-mix sample

use crate::carbon_aware::factors::{EmissionFactorTable, LabelMapping};
use crate::carbon_aware::provider::GenerationProvider;
use crate::carbon_aware::types::{
    CarbonIntensityResult, GenerationRow, GenerationSample, QueryWindow,
};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

/// Columns that describe the row rather than an energy source
pub const STRUCTURAL_COLUMNS: &[&str] = &["Area", "MTU", "Date", "Time"];

/// Estimates the carbon intensity of a zone from its latest generation mix
pub struct CarbonIntensityEstimator<P> {
    provider: P,
    mapping: LabelMapping,
}

impl<P: GenerationProvider> CarbonIntensityEstimator<P> {
    pub fn new(provider: P) -> Self {
        Self::with_mapping(provider, LabelMapping::default())
    }

    pub fn with_mapping(provider: P, mapping: LabelMapping) -> Self {
        Self { provider, mapping }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Carbon intensity of the most recent sample for `zone_id`
    pub async fn compute_carbon_intensity(&self, zone_id: &str) -> Result<CarbonIntensityResult> {
        self.compute_carbon_intensity_at(zone_id, Utc::now()).await
    }

    /// Same as [`compute_carbon_intensity`](Self::compute_carbon_intensity)
    /// with the query window anchored at `now`
    pub async fn compute_carbon_intensity_at(
        &self,
        zone_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CarbonIntensityResult> {
        let row = self.fetch_latest(zone_id, now).await?;
        let sample = normalize(&row, &self.mapping)?;
        let factors = EmissionFactorTable::for_zone(zone_id);
        let carbon_intensity = weighted_intensity(&sample, &factors)?;

        info!(
            "Carbon intensity for zone {} at {}: {:.2} gCO2eq/kWh (profile {}, total {:.1})",
            zone_id,
            sample.timestamp,
            carbon_intensity,
            factors.profile(),
            sample.total()
        );

        Ok(CarbonIntensityResult {
            zone: zone_id.to_string(),
            carbon_intensity,
            timestamp: sample.timestamp,
            factor_profile: factors.profile().to_string(),
        })
    }

    /// Latest row for today, falling back once to yesterday's window
    async fn fetch_latest(&self, zone_id: &str, now: DateTime<Utc>) -> Result<GenerationRow> {
        let primary = QueryWindow::day_of(now);
        let primary_err = match self.latest_in(zone_id, &primary).await {
            Ok(row) => return Ok(row),
            Err(e) => e,
        };

        warn!(
            "{} query for zone {} over {} failed: {}; retrying with the previous day",
            self.provider.name(),
            zone_id,
            primary,
            primary_err
        );

        let fallback = primary.previous_day();
        match self.latest_in(zone_id, &fallback).await {
            Ok(row) => {
                info!(
                    "Using fallback sample at {} for zone {}",
                    row.timestamp, zone_id
                );
                Ok(row)
            }
            Err(fallback_err) => {
                error!(
                    "{} query for zone {} over {} failed: {}",
                    self.provider.name(),
                    zone_id,
                    fallback,
                    fallback_err
                );
                Err(Error::DataUnavailable {
                    zone: zone_id.to_string(),
                    primary_start: primary.start,
                    primary: Box::new(primary_err),
                    fallback_start: fallback.start,
                    fallback: Box::new(fallback_err),
                })
            }
        }
    }

    async fn latest_in(&self, zone_id: &str, window: &QueryWindow) -> Result<GenerationRow> {
        debug!("Querying {} for zone {} over {}", self.provider.name(), zone_id, window);
        let table = self
            .provider
            .query_generation(zone_id, window.start, window.end)
            .await?;
        table.latest().ok_or_else(|| {
            Error::ProviderError(format!("no generation data for zone {zone_id} in {window}"))
        })
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

fn is_structural(label: &str) -> bool {
    STRUCTURAL_COLUMNS.contains(&label)
}

/// Turn a provider row into a sample keyed by canonical category.
///
/// Structural columns are dropped, missing-data markers read as zero, and
/// labels outside the mapping keep their raw name and are listed in
/// [`GenerationSample::unmapped`].
pub fn normalize(row: &GenerationRow, mapping: &LabelMapping) -> Result<GenerationSample> {
    let mut sample = GenerationSample::new(row.timestamp);

    for (label, value) in &row.values {
        let flat = label.flatten();
        if is_structural(&flat) {
            continue;
        }

        let energy = value.energy(&flat)?;
        let category = match mapping.canonical(&flat) {
            Some(canonical) => canonical.to_string(),
            None if mapping.is_canonical(&flat) => flat,
            None => {
                sample.unmapped.push(flat.clone());
                flat
            }
        };
        sample.add(category, energy);
    }

    if !sample.unmapped.is_empty() {
        warn!(
            "Unmapped generation labels kept under their raw name: {}",
            sample.unmapped.join(", ")
        );
    }

    Ok(sample)
}

// ---------------------------------------------------------------------------
// Weighting
// ---------------------------------------------------------------------------

/// Emission-weighted average over all categories of the sample.
///
/// Categories without a factor contribute to the total but not to the
/// weighted sum.
pub fn weighted_intensity(sample: &GenerationSample, factors: &EmissionFactorTable) -> Result<f64> {
    let total = sample.total();
    if sample.categories.is_empty() || total == 0.0 {
        return Err(Error::DivisionUndefined {
            timestamp: sample.timestamp,
        });
    }

    let mut weighted_sum = 0.0;
    let mut without_factor = Vec::new();
    for (category, energy) in &sample.categories {
        match factors.factor(category) {
            Some(factor) => weighted_sum += energy * factor,
            None => {
                if *energy != 0.0 {
                    without_factor.push(category.as_str());
                }
            }
        }
    }

    if !without_factor.is_empty() {
        warn!(
            "No emission factor in profile {} for {}; counted in total only",
            factors.profile(),
            without_factor.join(", ")
        );
    }

    let value = weighted_sum / total;
    if !value.is_finite() || value < 0.0 {
        return Err(Error::InvalidResult {
            value,
            timestamp: sample.timestamp,
        });
    }

    Ok(value)
}
