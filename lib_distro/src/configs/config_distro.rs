//! # Engine Settings
//!
//! Everything the coordinator, the actors and the sender factory need to know
//! about their environment. One `DistroSettings` value is built by the binary
//! and shared through `DistroContext`; nothing in the library reads global
//! state.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Client certificate material for a TLS MQTT connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TlsFiles {
    /// PEM encoded client certificate chain.
    pub cert_file: Option<PathBuf>,
    /// PEM encoded private key matching `cert_file`.
    pub key_file: Option<PathBuf>,
    /// PEM encoded CA bundle used to verify the broker.
    pub ca_file: Option<PathBuf>,
}

/// Where events come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MessageBusSettings {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
}

impl Default for MessageBusSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            topic: "events".to_string(),
            client_id: "export-distro".to_string(),
        }
    }
}

/// # Distro Settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DistroSettings {
    /// Port of the control HTTP server.
    pub port: u16,
    /// Base URL of the registration store (export-client).
    pub client_host: String,
    /// Base URL of core-data, used to mark events as pushed.
    pub data_host: String,
    /// Mark every successfully delivered event as pushed in core-data.
    pub mark_pushed: bool,
    /// Delay between registration fetch attempts while the store is unavailable.
    pub registration_poll_interval_ms: u64,
    /// Transient-error retries of the registration/core-data HTTP clients.
    pub client_max_retries: u32,
    /// Capacity of each actor's event queue.
    pub actor_queue_depth: usize,
    /// Capacity of the registration update queue fed by the control server.
    pub update_queue_depth: usize,
    /// Capacity of the queue between the event ingestor and the coordinator.
    pub event_queue_depth: usize,
    /// Timeout of a single HTTP/InfluxDB delivery and of MQTT/XMPP connects.
    pub send_timeout_ms: u64,
    /// Certificates for `MQTT_TOPIC`, `AZURE_TOPIC` and `IOTCORE_TOPIC` over TLS.
    pub mqtts: TlsFiles,
    /// Certificates for `AWS_TOPIC`.
    pub aws: TlsFiles,
    pub message_bus: MessageBusSettings,
}

impl Default for DistroSettings {
    fn default() -> Self {
        Self {
            port: 48070,
            client_host: "http://localhost:48071".to_string(),
            data_host: "http://localhost:48080".to_string(),
            mark_pushed: false,
            registration_poll_interval_ms: 1000,
            client_max_retries: 3,
            actor_queue_depth: 1,
            update_queue_depth: 2,
            event_queue_depth: 64,
            send_timeout_ms: 10_000,
            mqtts: TlsFiles::default(),
            aws: TlsFiles::default(),
            message_bus: MessageBusSettings::default(),
        }
    }
}

impl DistroSettings {
    pub fn registration_poll_interval(&self) -> Duration {
        Duration::from_millis(self.registration_poll_interval_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}
