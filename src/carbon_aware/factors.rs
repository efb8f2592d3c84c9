//! Emission factor tables and the raw-label → fuel-category mapping

use super::zones;
use std::collections::{BTreeMap, HashMap};

/// Profile name of the unmodified base table
pub const BASE_PROFILE: &str = "base";

/// Aggregation suffix appended to bare production-type labels
pub const ACTUAL_AGGREGATED: &str = "Actual Aggregated";

/// Base emission factors in gCO2-eq/kWh per canonical fuel category
pub const BASE_FACTORS: &[(&str, f64)] = &[
    ("Coal", 1104.0),
    ("Gas", 549.0),
    ("Biomass", 230.0),
    ("Geothermal", 38.0),
    ("Solar", 27.0),
    ("Hydropower", 11.0),
    ("Hydropower_Reservoir", 374.0),
    ("Wind", 13.0),
    ("Oil", 1103.0),
    ("Oil_Cons", 1103.0),
    ("Nuclear", 5.0),
    ("Battery", 374.0),
    ("Waste", 0.0),
    ("Other", 700.0),
    ("HydroStorage", 30.0),
    ("HydroStorage_Aggregated", 30.0),
    ("WindOffshore", 13.0),
    ("Lignite", 1104.0),
    ("CoalDerivedGas", 1104.0),
    ("Renewable", 1000.0),
];

/// Per-zone replacements of base factors
pub const ZONE_OVERRIDES: &[(&str, &[(&str, f64)])] = &[
    (
        "france",
        &[
            ("Gas", 502.0),
            ("Coal", 969.0),
            ("Oil", 999.0),
            ("Solar", 30.0),
            ("Hydropower_Reservoir", 67.0),
        ],
    ),
    (
        "switzerland",
        &[
            ("Nuclear", 12.0),
            ("Coal", 820.0),
            ("Wind", 11.0),
            ("Solar", 30.0),
            ("Hydropower", 24.0),
            ("Hydropower_Reservoir", 68.0),
            ("Gas", 490.0),
            ("Oil", 650.0),
            ("Other", 165.0),
        ],
    ),
    (
        "austria",
        &[
            ("Coal", 1187.0),
            ("Solar", 31.0),
            ("Hydropower", 11.0),
            ("Hydropower_Reservoir", 237.0),
            ("Battery", 237.0),
            ("Gas", 528.0),
            ("Oil", 1170.0),
        ],
    ),
    (
        "slovenia",
        &[
            ("Coal", 1042.0),
            ("Solar", 31.0),
            ("Hydropower", 11.0),
            ("Hydropower_Reservoir", 323.0),
            ("Battery", 232.0),
            ("Gas", 532.0),
            ("Oil", 1170.0),
        ],
    ),
    (
        "italyCentreNorth",
        &[("Hydropower_Reservoir", 306.0), ("Battery", 374.0)],
    ),
];

/// Flattened provider label → canonical fuel category
pub const LABEL_MAPPING: &[(&str, &str)] = &[
    ("Biomass - Actual Aggregated", "Biomass"),
    ("Fossil Gas - Actual Aggregated", "Gas"),
    ("Fossil Oil - Actual Aggregated", "Oil"),
    ("Fossil Oil - Actual Consumption", "Oil_Cons"),
    ("Geothermal - Actual Aggregated", "Geothermal"),
    (
        "Hydro Run-of-river and poundage - Actual Aggregated",
        "Hydropower",
    ),
    (
        "Hydro Water Reservoir - Actual Aggregated",
        "Hydropower_Reservoir",
    ),
    ("Other - Actual Aggregated", "Other"),
    ("Solar - Actual Aggregated", "Solar"),
    ("Waste - Actual Aggregated", "Waste"),
    ("Wind Onshore - Actual Aggregated", "Wind"),
    ("Fossil Hard coal - Actual Aggregated", "Coal"),
    (
        "Hydro Pumped Storage - Actual Aggregated",
        "HydroStorage_Aggregated",
    ),
    ("Hydro Pumped Storage - Actual Consumption", "HydroStorage"),
    ("Nuclear - Actual Aggregated", "Nuclear"),
    ("Wind Offshore - Actual Aggregated", "WindOffshore"),
    ("Fossil Brown coal/Lignite - Actual Aggregated", "Lignite"),
    ("Fossil Coal-derived gas - Actual Aggregated", "CoalDerivedGas"),
    ("Other renewable - Actual Aggregated", "Renewable"),
];

/// Emission factors in effect for one zone
#[derive(Clone, Debug, PartialEq)]
pub struct EmissionFactorTable {
    profile: String,
    factors: BTreeMap<String, f64>,
}

impl EmissionFactorTable {
    /// The base table with no zone overrides
    pub fn base() -> Self {
        Self {
            profile: BASE_PROFILE.to_string(),
            factors: BASE_FACTORS
                .iter()
                .map(|(category, factor)| (category.to_string(), *factor))
                .collect(),
        }
    }

    /// Table for `zone_id`: base table with the zone's overrides applied.
    ///
    /// The zone id is matched against the override names first, then through
    /// the known-zone table (so `FR` selects the `france` profile). Zones
    /// without overrides get the base table.
    pub fn for_zone(zone_id: &str) -> Self {
        let profile = Self::override_profile(zone_id);
        let mut table = Self::base();
        if let Some((name, overrides)) = profile {
            table.profile = name.to_string();
            for (category, factor) in overrides {
                table.factors.insert(category.to_string(), *factor);
            }
        }
        table
    }

    fn override_profile(zone_id: &str) -> Option<(&'static str, &'static [(&'static str, f64)])> {
        let zone_id = zone_id.trim();
        let by_name = |name: &str| {
            ZONE_OVERRIDES
                .iter()
                .find(|(profile, _)| *profile == name)
                .copied()
        };
        by_name(zone_id).or_else(|| zones::lookup(zone_id).and_then(|z| by_name(z.name)))
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn factor(&self, category: &str) -> Option<f64> {
        self.factors.get(category).copied()
    }

}

impl Default for EmissionFactorTable {
    fn default() -> Self {
        Self::base()
    }
}

/// Lookup from flattened provider labels to canonical categories
#[derive(Clone, Debug)]
pub struct LabelMapping {
    entries: HashMap<String, String>,
    /// Bare production-type names, e.g. `Fossil Gas`
    production_types: Vec<String>,
}

impl LabelMapping {
    /// The mapping for ENTSO-E "actual generation per production type" data
    pub fn entsoe() -> Self {
        let entries: HashMap<String, String> = LABEL_MAPPING
            .iter()
            .map(|(raw, canonical)| (raw.to_string(), canonical.to_string()))
            .collect();
        let suffix = format!(" - {ACTUAL_AGGREGATED}");
        let production_types = LABEL_MAPPING
            .iter()
            .filter_map(|(raw, _)| raw.strip_suffix(&suffix))
            .map(String::from)
            .collect();
        Self {
            entries,
            production_types,
        }
    }

    /// Canonical category for a flattened label, if the label is known.
    ///
    /// A bare production-type name (no aggregation suffix) is read as its
    /// `Actual Aggregated` column.
    pub fn canonical(&self, label: &str) -> Option<&str> {
        let label = label.trim();
        if let Some(canonical) = self.entries.get(label) {
            return Some(canonical.as_str());
        }
        if self.production_types.iter().any(|t| t == label) {
            return self
                .entries
                .get(&format!("{label} - {ACTUAL_AGGREGATED}"))
                .map(String::as_str);
        }
        None
    }

    /// Whether `name` is one of the canonical category names
    pub fn is_canonical(&self, name: &str) -> bool {
        self.entries.values().any(|c| c == name)
    }
}

impl Default for LabelMapping {
    fn default() -> Self {
        Self::entsoe()
    }
}
