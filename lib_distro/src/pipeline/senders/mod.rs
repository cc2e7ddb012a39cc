//! # Senders
//!
//! The last stage of a pipeline: hands the transformed payload to a
//! transport. Senders are stateful (lazy connections, persistent sessions)
//! and are owned by exactly one actor, hence `&mut self`.
//!
//! Transports behind a cargo feature report `SenderUnavailable` when the
//! crate is built without it.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::configs::DistroSettings;
use crate::models::{Addressable, Destination, Event, RegistrationError};

/// REST endpoint sender.
pub mod http;
/// InfluxDB line-protocol sender.
#[cfg(feature = "influxdb")]
pub mod influxdb;
/// MQTT family: plain MQTT, IoT Core, AWS IoT and Azure IoT Hub.
#[cfg(feature = "mqtt")]
pub mod mqtt;
/// Persistent XMPP chat sender.
#[cfg(feature = "xmpp")]
pub mod xmpp;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("HTTP method not supported: {0}")]
    UnsupportedMethod(String),

    #[error("endpoint answered status {status}")]
    Rejected { status: u16, body: Option<String> },

    #[error("not connected: {0}")]
    NotConnected(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<anyhow::Error> for SendError {
    fn from(e: anyhow::Error) -> Self {
        SendError::Transport(format!("{:#}", e))
    }
}

impl From<std::io::Error> for SendError {
    fn from(e: std::io::Error) -> Self {
        SendError::Transport(e.to_string())
    }
}

/// A destination transport.
#[async_trait]
pub trait Sender: Send {
    /// Delivers one payload. `event` is the filtered event the payload was
    /// produced from, for transports that address per device.
    async fn send(&mut self, payload: &[u8], event: &Event) -> Result<(), SendError>;
}

/// Builds senders for pipeline construction.
#[async_trait]
pub trait SenderFactory: Send + Sync {
    async fn build(
        &self,
        destination: Destination,
        addressable: &Addressable,
    ) -> Result<Box<dyn Sender>, RegistrationError>;
}

/// The production factory: real network transports.
pub struct TransportSenderFactory {
    settings: Arc<DistroSettings>,
}

impl TransportSenderFactory {
    pub fn new(settings: Arc<DistroSettings>) -> Self {
        Self { settings }
    }
}

fn unavailable(destination: Destination, reason: impl ToString) -> RegistrationError {
    RegistrationError::SenderUnavailable {
        destination: destination.to_string(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl SenderFactory for TransportSenderFactory {
    async fn build(
        &self,
        destination: Destination,
        addressable: &Addressable,
    ) -> Result<Box<dyn Sender>, RegistrationError> {
        let timeout = self.settings.send_timeout();
        match destination {
            Destination::Rest => http::HttpSender::new(addressable, timeout)
                .map(|s| Box::new(s) as Box<dyn Sender>)
                .map_err(|e| unavailable(destination, format!("{:#}", e))),

            #[cfg(feature = "mqtt")]
            Destination::Mqtt | Destination::AzureMqtt => {
                mqtt::MqttSender::new(addressable, &self.settings.mqtts, timeout)
                    .await
                    .map(|s| Box::new(s) as Box<dyn Sender>)
                    .map_err(|e| unavailable(destination, format!("{:#}", e)))
            }
            #[cfg(feature = "mqtt")]
            Destination::IotCoreMqtt => {
                mqtt::MqttSender::iot_core(addressable, &self.settings.mqtts, timeout)
                    .await
                    .map(|s| Box::new(s) as Box<dyn Sender>)
                    .map_err(|e| unavailable(destination, format!("{:#}", e)))
            }
            #[cfg(feature = "mqtt")]
            Destination::AwsMqtt => mqtt::MqttSender::aws(addressable, &self.settings.aws, timeout)
                .await
                .map(|s| Box::new(s) as Box<dyn Sender>)
                .map_err(|e| unavailable(destination, format!("{:#}", e))),
            #[cfg(not(feature = "mqtt"))]
            Destination::Mqtt | Destination::AzureMqtt | Destination::IotCoreMqtt | Destination::AwsMqtt => {
                Err(unavailable(destination, "built without the `mqtt` feature"))
            }

            #[cfg(feature = "xmpp")]
            Destination::Xmpp => xmpp::XmppSender::connect(addressable, timeout)
                .await
                .map(|s| Box::new(s) as Box<dyn Sender>)
                .map_err(|e| unavailable(destination, e)),
            #[cfg(not(feature = "xmpp"))]
            Destination::Xmpp => Err(unavailable(destination, "built without the `xmpp` feature")),

            #[cfg(feature = "influxdb")]
            Destination::InfluxDb => Ok(Box::new(influxdb::InfluxDbSender::new(addressable, timeout))),
            #[cfg(not(feature = "influxdb"))]
            Destination::InfluxDb => {
                Err(unavailable(destination, "built without the `influxdb` feature"))
            }

            Destination::Zmq => {
                log::warn!("ZeroMQ destinations are not supported");
                Err(RegistrationError::UnsupportedDestination(
                    destination.to_string(),
                ))
            }
        }
    }
}
