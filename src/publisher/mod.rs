//! Republishing of carbon-intensity estimates on an MQTT topic

pub mod broker;
pub mod publish_loop;

pub use broker::{MessageBroker, MqttBroker};
pub use publish_loop::{format_payload, format_value, PublishLoop};
