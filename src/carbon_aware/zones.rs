//! Known bidding zones and their ENTSO-E area codes

/// A bidding zone known by friendly name, short code and EIC code
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Zone {
    /// Friendly name, also the emission factor profile name
    pub name: &'static str,
    /// Short code as used by the transparency platform tooling
    pub code: &'static str,
    /// ENTSO-E energy identification code
    pub eic: &'static str,
}

pub const KNOWN_ZONES: &[Zone] = &[
    Zone {
        name: "france",
        code: "FR",
        eic: "10YFR-RTE------C",
    },
    Zone {
        name: "switzerland",
        code: "CH",
        eic: "10YCH-SWISSGRIDZ",
    },
    Zone {
        name: "austria",
        code: "AT",
        eic: "10YAT-APG------L",
    },
    Zone {
        name: "slovenia",
        code: "SI",
        eic: "10YSI-ELES-----O",
    },
    Zone {
        name: "italyCentreNorth",
        code: "IT_CNOR",
        eic: "10Y1001A1001A70O",
    },
    Zone {
        name: "italyNorth",
        code: "IT_NORD",
        eic: "10Y1001A1001A73I",
    },
    Zone {
        name: "italyCentreSouth",
        code: "IT_CSUD",
        eic: "10Y1001A1001A71M",
    },
    Zone {
        name: "italySouth",
        code: "IT_SUD",
        eic: "10Y1001A1001A788",
    },
    Zone {
        name: "italySicily",
        code: "IT_SICI",
        eic: "10Y1001A1001A75E",
    },
    Zone {
        name: "italySardinia",
        code: "IT_SARD",
        eic: "10Y1001A1001A74G",
    },
    Zone {
        name: "germanyLuxembourg",
        code: "DE_LU",
        eic: "10Y1001A1001A82H",
    },
    Zone {
        name: "spain",
        code: "ES",
        eic: "10YES-REE------0",
    },
    Zone {
        name: "netherlands",
        code: "NL",
        eic: "10YNL----------L",
    },
    Zone {
        name: "belgium",
        code: "BE",
        eic: "10YBE----------2",
    },
];

/// Look a zone up by friendly name, short code or EIC code
pub fn lookup(zone_id: &str) -> Option<&'static Zone> {
    let zone_id = zone_id.trim();
    KNOWN_ZONES
        .iter()
        .find(|z| z.name == zone_id || z.code.eq_ignore_ascii_case(zone_id) || z.eic == zone_id)
}

/// Area code to send to the provider.
///
/// Unknown identifiers are passed through so that any EIC code can be queried.
pub fn area_code(zone_id: &str) -> String {
    lookup(zone_id)
        .map(|z| z.eic.to_string())
        .unwrap_or_else(|| zone_id.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_any_identifier() {
        assert_eq!(lookup("france").unwrap().code, "FR");
        assert_eq!(lookup("fr").unwrap().name, "france");
        assert_eq!(lookup("10Y1001A1001A73I").unwrap().name, "italyNorth");
        assert!(lookup("atlantis").is_none());
    }

    #[test]
    fn test_area_code_passthrough() {
        assert_eq!(area_code("IT_NORD"), "10Y1001A1001A73I");
        assert_eq!(area_code("10YPL-AREA-----S"), "10YPL-AREA-----S");
    }

    #[test]
    fn test_codes_are_unique() {
        for (i, a) in KNOWN_ZONES.iter().enumerate() {
            for b in &KNOWN_ZONES[i + 1..] {
                assert_ne!(a.name, b.name);
                assert_ne!(a.code, b.code);
                assert_ne!(a.eic, b.eic);
            }
        }
    }
}
