//! Error types for the carbon-intensity publisher

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The provider failed on the primary window and on the fallback window
    #[error(
        "generation data unavailable for zone {zone} (primary window from {primary_start}: {primary}; fallback window from {fallback_start}: {fallback})"
    )]
    DataUnavailable {
        zone: String,
        primary_start: DateTime<Utc>,
        primary: Box<Error>,
        fallback_start: DateTime<Utc>,
        fallback: Box<Error>,
    },

    /// Total energy across all categories is zero
    #[error("total generation is zero at {timestamp}, carbon intensity is undefined")]
    DivisionUndefined { timestamp: DateTime<Utc> },

    /// Computed intensity is non-finite or negative
    #[error("computed carbon intensity {value} at {timestamp} is not a finite non-negative number")]
    InvalidResult {
        value: f64,
        timestamp: DateTime<Utc>,
    },

    /// Provider answered but rejected the query or returned no series
    #[error("provider error: {0}")]
    ProviderError(String),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Malformed provider payload
    #[error("failed to parse provider response: {0}")]
    ParseError(String),

    #[error("XML error: {0}")]
    XmlError(#[from] quick_xml::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("failed to parse configuration file: {0}")]
    TomlError(#[from] toml::de::Error),

    /// No provider credential in the credentials file or environment
    #[error("missing provider credential: {0}")]
    MissingCredential(String),

    #[error("broker error: {0}")]
    BrokerError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl Error {
    /// Errors that end the current poll cycle (and with it the publish loop)
    pub fn is_estimator_failure(&self) -> bool {
        matches!(
            self,
            Error::DataUnavailable { .. }
                | Error::DivisionUndefined { .. }
                | Error::InvalidResult { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_data_unavailable_reports_both_attempts() {
        let start = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let err = Error::DataUnavailable {
            zone: "IT_NORD".to_string(),
            primary_start: start,
            primary: Box::new(Error::ProviderError("no matching data".to_string())),
            fallback_start: start - chrono::Duration::days(1),
            fallback: Box::new(Error::ParseError("empty document".to_string())),
        };
        let msg = err.to_string();
        assert!(msg.contains("IT_NORD"));
        assert!(msg.contains("no matching data"));
        assert!(msg.contains("empty document"));
        assert!(err.is_estimator_failure());
    }

    #[test]
    fn test_broker_error_is_not_estimator_failure() {
        assert!(!Error::BrokerError("refused".to_string()).is_estimator_failure());
        assert!(Error::DivisionUndefined {
            timestamp: Utc::now()
        }
        .is_estimator_failure());
    }
}
