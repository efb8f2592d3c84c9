//! Poll-and-burst publish loop

use crate::carbon_aware::{CarbonIntensityEstimator, GenerationProvider};
use crate::config::{AppConfig, CadenceConfig};
use crate::error::Result;
use crate::publisher::broker::MessageBroker;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, error, info, warn};

/// Value with exactly two decimals, as carried in the payload
pub fn format_value(carbon_intensity: f64) -> String {
    format!("{carbon_intensity:.2}")
}

/// `<value>;<unix seconds>` with a fractional timestamp, e.g. `826.50;1700000000.0`
pub fn format_payload(value: &str, unix_timestamp: f64) -> String {
    format!("{value};{unix_timestamp:?}")
}

/// Fractional Unix seconds of `ts`
pub fn unix_timestamp(ts: DateTime<Utc>) -> f64 {
    ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_micros()) / 1_000_000.0
}

#[derive(Clone, Debug, PartialEq)]
enum LoopState {
    /// Computing a new estimate
    Polling,
    /// Re-sending `value`; `sent` publishes done so far
    Bursting { value: String, sent: u32 },
}

/// Estimates once, then publishes the value `repeat_count` times with
/// `interval` pauses, and starts over.
pub struct PublishLoop<P, B> {
    estimator: CarbonIntensityEstimator<P>,
    broker: B,
    zone: String,
    host: String,
    port: u16,
    topic: String,
    cadence: CadenceConfig,
}

impl<P, B> PublishLoop<P, B>
where
    P: GenerationProvider,
    B: MessageBroker,
{
    pub fn new(
        config: &AppConfig,
        hostname: &str,
        estimator: CarbonIntensityEstimator<P>,
        broker: B,
    ) -> Self {
        Self {
            estimator,
            broker,
            zone: config.provider.zone.clone(),
            host: config.broker.host.clone(),
            port: config.broker.port,
            topic: config.broker.topic(hostname),
            cadence: config.cadence.clone(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Run until `shutdown` resolves or an estimate fails.
    ///
    /// The broker connection is closed before returning in every case.
    /// Estimator failures are returned; cancellation returns `Ok(())`.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            "Publishing carbon intensity for zone {} to {} every {:?} ({} repeats per estimate)",
            self.zone,
            self.topic,
            self.cadence.interval(),
            self.cadence.repeat_count
        );

        let outcome = self.drive(shutdown.as_mut()).await;
        match &outcome {
            Err(e) if e.is_estimator_failure() => {
                error!("No carbon intensity estimate, stopping publish loop: {}", e)
            }
            Err(e) => error!("Stopping publish loop: {}", e),
            Ok(()) => {}
        }

        match self.broker.disconnect().await {
            Ok(()) => info!("Broker connection closed"),
            Err(e) => warn!("Error while closing broker connection: {}", e),
        }
        outcome
    }

    async fn drive<F>(&mut self, mut shutdown: Pin<&mut F>) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut state = LoopState::Polling;
        loop {
            state = match state {
                LoopState::Polling => {
                    let result = tokio::select! {
                        _ = shutdown.as_mut() => {
                            info!("Shutdown requested while polling");
                            return Ok(());
                        }
                        result = self.estimator.compute_carbon_intensity(&self.zone) => result?,
                    };
                    let value = format_value(result.carbon_intensity);
                    debug!("New estimate {} from sample at {}", value, result.timestamp);
                    LoopState::Bursting { value, sent: 0 }
                }
                LoopState::Bursting { sent, .. } if sent >= self.cadence.repeat_count => {
                    debug!("Burst of {} publishes complete, polling again", sent);
                    LoopState::Polling
                }
                LoopState::Bursting { value, sent } => {
                    tokio::select! {
                        _ = shutdown.as_mut() => {
                            info!("Shutdown requested while publishing");
                            return Ok(());
                        }
                        _ = self.publish_once(&value) => {}
                    }
                    tokio::select! {
                        _ = shutdown.as_mut() => {
                            info!("Shutdown requested");
                            return Ok(());
                        }
                        _ = tokio::time::sleep(self.cadence.interval()) => {}
                    }
                    LoopState::Bursting {
                        value,
                        sent: sent + 1,
                    }
                }
            };
        }
    }

    /// Ensure the connection is live, then publish once; failures are
    /// logged and left to the next cycle
    async fn publish_once(&mut self, value: &str) {
        if !self.broker.is_connected() {
            if let Err(e) = self.broker.connect(&self.host, self.port).await {
                warn!("Broker unavailable, skipping publish: {}", e);
                return;
            }
        }

        let payload = format_payload(value, unix_timestamp(Utc::now()));
        match self.broker.publish(&self.topic, &payload).await {
            Ok(()) => info!("Published {} to topic {}", payload, self.topic),
            Err(e) => warn!("Publish of {} to {} failed: {}", payload, self.topic, e),
        }
    }
}
