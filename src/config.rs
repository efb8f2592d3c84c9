//! Process configuration
//!
//! Loaded once at startup from a TOML file and handed by reference to the
//! estimator and the publish loop. Every key is optional.
//!
//! ```toml
//! [broker]
//! host = "127.0.0.1"
//! port = 1883
//! topic_template = "org/unibo/cluster/hifive/node/{hostname}/plugin/coe_calculator/chnl/data/carbon_intensity"
//!
//! [cadence]
//! repeat_count = 30
//! interval_secs = 120
//!
//! [provider]
//! kind = "entsoe"
//! zone = "IT_NORD"
//! credentials_file = "entsoe_key.json"
//! ```

use crate::carbon_aware::api::DEFAULT_API_URL;
use crate::carbon_aware::{CsvExportProvider, EntsoeClient, GenerationProvider};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "carbon-publisher.toml";
pub const DEFAULT_BROKER_HOST: &str = "127.0.0.1";
pub const DEFAULT_BROKER_PORT: u16 = 1883;
pub const DEFAULT_TOPIC_TEMPLATE: &str =
    "org/unibo/cluster/hifive/node/{hostname}/plugin/coe_calculator/chnl/data/carbon_intensity";
pub const HOSTNAME_PLACEHOLDER: &str = "{hostname}";
pub const DEFAULT_ZONE: &str = "IT_NORD";
pub const DEFAULT_CREDENTIALS_FILE: &str = "entsoe_key.json";

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub cadence: CadenceConfig,
    pub provider: ProviderConfig,
}

/// MQTT broker settings
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// Topic with a `{hostname}` placeholder
    pub topic_template: String,
    /// MQTT client id; defaults to `carbon-publisher-<hostname>`
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BROKER_HOST.to_string(),
            port: DEFAULT_BROKER_PORT,
            topic_template: DEFAULT_TOPIC_TEMPLATE.to_string(),
            client_id: None,
            keep_alive_secs: 60,
            connect_timeout_secs: 10,
        }
    }
}

impl BrokerConfig {
    /// Topic with `{hostname}` substituted
    pub fn topic(&self, hostname: &str) -> String {
        self.topic_template.replace(HOSTNAME_PLACEHOLDER, hostname)
    }

    pub fn client_id(&self, hostname: &str) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("carbon-publisher-{hostname}"))
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Poll-and-burst cadence: one estimate, then `repeat_count` publishes
/// spaced `interval_secs` apart
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CadenceConfig {
    pub repeat_count: u32,
    pub interval_secs: u64,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            repeat_count: 30,
            interval_secs: 120,
        }
    }
}

impl CadenceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// ENTSO-E transparency REST API
    #[default]
    Entsoe,
    /// Local CSV exports of the transparency platform
    CsvExport,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Zone name, short code or EIC code
    pub zone: String,
    pub api_url: String,
    /// JSON file holding `ENTSOE_KEY`
    pub credentials_file: PathBuf,
    pub timeout_secs: u64,
    /// Export path for `csv_export`, may contain `{zone}`
    pub export_path: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            zone: DEFAULT_ZONE.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            credentials_file: PathBuf::from(DEFAULT_CREDENTIALS_FILE),
            timeout_secs: 30,
            export_path: None,
        }
    }
}

impl ProviderConfig {
    /// Build the configured provider.
    ///
    /// `credential` overrides the credentials file (e.g. from `ENTSOE_KEY`).
    pub fn build(&self, credential: Option<String>) -> Result<Box<dyn GenerationProvider>> {
        match self.kind {
            ProviderKind::Entsoe => {
                let token = match credential.filter(|c| !c.trim().is_empty()) {
                    Some(token) => token,
                    None => load_credential(&self.credentials_file)?,
                };
                let client = EntsoeClient::new(
                    self.api_url.clone(),
                    token,
                    Duration::from_secs(self.timeout_secs),
                )?;
                Ok(Box::new(client))
            }
            ProviderKind::CsvExport => {
                let path = self.export_path.clone().ok_or_else(|| {
                    Error::ConfigError("provider.export_path is required for csv_export".to_string())
                })?;
                Ok(Box::new(CsvExportProvider::new(path)))
            }
        }
    }
}

impl AppConfig {
    /// Load from `path`, or from [`DEFAULT_CONFIG_PATH`] when `None`.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        let config = match std::fs::read_to_string(path) {
            Ok(raw) => {
                info!("Loaded configuration from {}", path.display());
                Self::from_toml(&raw)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Configuration file {} not found, using defaults",
                    path.display()
                );
                Self::default()
            }
            Err(e) => return Err(Error::IoError(e)),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.broker.host.trim().is_empty() {
            return Err(Error::ConfigError("broker.host must not be empty".to_string()));
        }
        if self.broker.topic_template.trim().is_empty() {
            return Err(Error::ConfigError(
                "broker.topic_template must not be empty".to_string(),
            ));
        }
        if self.cadence.repeat_count == 0 {
            return Err(Error::ConfigError(
                "cadence.repeat_count must be at least 1".to_string(),
            ));
        }
        if self.provider.zone.trim().is_empty() {
            return Err(Error::ConfigError("provider.zone must not be empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct CredentialsFile {
    #[serde(rename = "ENTSOE_KEY")]
    entsoe_key: Option<String>,
}

/// Read the provider key from a `{"ENTSOE_KEY": "..."}` file
pub fn load_credential(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        Error::MissingCredential(format!("cannot read {}: {e}", path.display()))
    })?;
    let file: CredentialsFile = serde_json::from_str(&raw)?;
    file.entsoe_key
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| Error::MissingCredential(format!("ENTSOE_KEY not set in {}", path.display())))
}

/// Local hostname used in the topic and client id
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.broker.host, "127.0.0.1");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.cadence.repeat_count, 30);
        assert_eq!(config.cadence.interval_secs, 120);
        assert_eq!(config.provider.zone, "IT_NORD");
        assert_eq!(config.provider.kind, ProviderKind::Entsoe);
    }

    #[test]
    fn test_topic_rendering() {
        let broker = BrokerConfig::default();
        assert_eq!(
            broker.topic("node07"),
            "org/unibo/cluster/hifive/node/node07/plugin/coe_calculator/chnl/data/carbon_intensity"
        );
        assert_eq!(broker.client_id("node07"), "carbon-publisher-node07");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [broker]
            port = 8883

            [cadence]
            repeat_count = 2
            interval_secs = 1800
            "#,
        )
        .unwrap();
        assert_eq!(config.broker.host, "127.0.0.1");
        assert_eq!(config.broker.port, 8883);
        assert_eq!(config.cadence.repeat_count, 2);
        assert_eq!(config.cadence.interval(), Duration::from_secs(1800));
        assert_eq!(config.provider, ProviderConfig::default());
    }

    #[test]
    fn test_csv_export_kind() {
        let config = AppConfig::from_toml(
            r#"
            [provider]
            kind = "csv_export"
            zone = "france"
            export_path = "exports/{zone}.csv"
            "#,
        )
        .unwrap();
        assert_eq!(config.provider.kind, ProviderKind::CsvExport);
        assert!(config.provider.build(None).is_ok());
    }

    #[test]
    fn test_csv_export_requires_path() {
        let provider = ProviderConfig {
            kind: ProviderKind::CsvExport,
            ..Default::default()
        };
        assert!(matches!(provider.build(None), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[broker\nport = ").unwrap();
        assert!(matches!(
            AppConfig::load(Some(file.path())),
            Err(Error::TomlError(_))
        ));
    }

    #[test]
    fn test_zero_repeat_count_rejected() {
        let mut config = AppConfig::default();
        config.cadence.repeat_count = 0;
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_load_credential() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"ENTSOE_KEY": "abc-123"}}"#).unwrap();
        assert_eq!(load_credential(file.path()).unwrap(), "abc-123");
    }

    #[test]
    fn test_missing_credential_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_credential(&dir.path().join("entsoe_key.json")).unwrap_err();
        assert!(matches!(err, Error::MissingCredential(_)));

        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"OTHER": "x"}}"#).unwrap();
        assert!(matches!(
            load_credential(file.path()),
            Err(Error::MissingCredential(_))
        ));

        let provider = ProviderConfig {
            credentials_file: dir.path().join("entsoe_key.json"),
            ..Default::default()
        };
        assert!(matches!(
            provider.build(None),
            Err(Error::MissingCredential(_))
        ));
    }

    #[test]
    fn test_credential_override_skips_file() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ProviderConfig {
            credentials_file: dir.path().join("entsoe_key.json"),
            ..Default::default()
        };
        assert!(provider.build(Some("from-env".to_string())).is_ok());
    }
}
