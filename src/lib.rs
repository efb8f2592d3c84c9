//! Carbon Publisher: grid carbon-intensity estimation and MQTT republishing
//!
//! This crate estimates the carbon intensity of an electrical grid zone from
//! its latest generation mix and republishes the value on a hostname-scoped
//! MQTT topic.

pub mod carbon_aware;
pub mod config;
pub mod error;
pub mod publisher;
pub mod telemetry;

pub use crate::error::{Error, Result};
