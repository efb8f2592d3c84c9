//! End-to-end tests: generation export → estimator → publish loop → broker
//!
//! The broker is an in-memory recorder, so these tests need no MQTT server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use carbon_publisher::carbon_aware::{CarbonIntensityEstimator, CsvExportProvider};
use carbon_publisher::config::{AppConfig, ProviderKind};
use carbon_publisher::publisher::{MessageBroker, PublishLoop};
use carbon_publisher::{Error, Result};
use chrono::{Duration as ChronoDuration, Utc};

#[derive(Clone, Default)]
struct MemoryBroker {
    published: Arc<Mutex<Vec<(String, String)>>>,
    disconnects: Arc<Mutex<usize>>,
    connected: bool,
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn connect(&mut self, _host: &str, _port: u16) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        *self.disconnects.lock().unwrap() += 1;
        self.connected = false;
        Ok(())
    }
}

/// Export covering today (UTC) with the requested rows
fn write_export(dir: &std::path::Path, zone: &str, rows: &[(&str, &str, &str)]) {
    let today = Utc::now().date_naive();
    let mut content = String::from(
        "\"Area\",\"MTU\",\"Fossil Hard coal  - Actual Aggregated [MW]\",\"Fossil Gas  - Actual Aggregated [MW]\",\"Marine  - Actual Aggregated [MW]\"\n",
    );
    for (hour, (coal, gas, marine)) in rows.iter().enumerate() {
        let start = today.and_hms_opt(hour as u32, 0, 0).unwrap();
        let end = start + ChronoDuration::hours(1);
        content.push_str(&format!(
            "\"BZN|{zone}\",\"{} - {} (UTC)\",\"{coal}\",\"{gas}\",\"{marine}\"\n",
            start.format("%d.%m.%Y %H:%M"),
            end.format("%d.%m.%Y %H:%M"),
        ));
    }
    std::fs::write(dir.join(format!("{zone}.csv")), content).unwrap();
}

fn csv_config(dir: &std::path::Path, zone: &str, repeat_count: u32, interval_secs: u64) -> AppConfig {
    let mut config = AppConfig::default();
    config.provider.kind = ProviderKind::CsvExport;
    config.provider.zone = zone.to_string();
    config.provider.export_path = Some(format!("{}/{{zone}}.csv", dir.display()));
    config.cadence.repeat_count = repeat_count;
    config.cadence.interval_secs = interval_secs;
    config
}

#[tokio::test]
async fn test_export_latest_row_base_profile() {
    let dir = tempfile::tempdir().unwrap();
    write_export(dir.path(), "IT_NORD", &[("10", "10", "0"), ("100", "100", "n/e")]);
    let config = csv_config(dir.path(), "IT_NORD", 1, 1);

    let estimator = CarbonIntensityEstimator::new(config.provider.build(None).unwrap());
    let result = estimator
        .compute_carbon_intensity(&config.provider.zone)
        .await
        .unwrap();
    assert_eq!(result.carbon_intensity, 826.5);
    assert_eq!(result.factor_profile, "base");
}

#[tokio::test]
async fn test_export_france_profile() {
    let dir = tempfile::tempdir().unwrap();
    write_export(dir.path(), "france", &[("100", "100", "0")]);
    let config = csv_config(dir.path(), "france", 1, 1);

    let estimator = CarbonIntensityEstimator::new(CsvExportProvider::new(
        config.provider.export_path.clone().unwrap(),
    ));
    let result = estimator.compute_carbon_intensity("france").await.unwrap();
    assert_eq!(result.carbon_intensity, 735.5);
}

#[tokio::test]
async fn test_unmapped_column_counts_in_total_only() {
    let dir = tempfile::tempdir().unwrap();
    write_export(dir.path(), "IT_NORD", &[("100", "0", "100")]);
    let config = csv_config(dir.path(), "IT_NORD", 1, 1);

    let estimator = CarbonIntensityEstimator::new(config.provider.build(None).unwrap());
    let result = estimator.compute_carbon_intensity("IT_NORD").await.unwrap();
    assert_eq!(result.carbon_intensity, 552.0);
}

#[tokio::test]
async fn test_all_not_estimated_is_division_undefined() {
    let dir = tempfile::tempdir().unwrap();
    write_export(dir.path(), "IT_NORD", &[("n/e", "n/e", "n/e")]);
    let config = csv_config(dir.path(), "IT_NORD", 1, 1);

    let estimator = CarbonIntensityEstimator::new(config.provider.build(None).unwrap());
    let err = estimator
        .compute_carbon_intensity("IT_NORD")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DivisionUndefined { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_publishes_on_hostname_topic() {
    let dir = tempfile::tempdir().unwrap();
    write_export(dir.path(), "IT_NORD", &[("100", "100", "0")]);
    let config = csv_config(dir.path(), "IT_NORD", 2, 1800);

    let broker = MemoryBroker::default();
    let estimator = CarbonIntensityEstimator::new(config.provider.build(None).unwrap());
    let mut publish_loop = PublishLoop::new(&config, "hifive-03", estimator, broker.clone());
    publish_loop
        .run(tokio::time::sleep(Duration::from_secs(2700)))
        .await
        .unwrap();

    let published = broker.published.lock().unwrap().clone();
    assert_eq!(published.len(), 2);
    for (topic, payload) in &published {
        assert_eq!(
            topic,
            "org/unibo/cluster/hifive/node/hifive-03/plugin/coe_calculator/chnl/data/carbon_intensity"
        );
        assert!(payload.starts_with("826.50;"));
    }
    assert_eq!(*broker.disconnects.lock().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_export_stops_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let config = csv_config(dir.path(), "IT_NORD", 2, 60);

    let broker = MemoryBroker::default();
    let estimator = CarbonIntensityEstimator::new(config.provider.build(None).unwrap());
    let mut publish_loop = PublishLoop::new(&config, "hifive-03", estimator, broker.clone());
    let err = publish_loop
        .run(std::future::pending::<()>())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::DataUnavailable { .. }));
    assert!(broker.published.lock().unwrap().is_empty());
    assert_eq!(*broker.disconnects.lock().unwrap(), 1);
}
