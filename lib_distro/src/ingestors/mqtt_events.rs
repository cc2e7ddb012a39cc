//! # MQTT Event Ingestor
//!
//! Subscribes to the message-bus topic and pushes every decoded event into
//! the coordinator's event channel. The `rumqttc` event loop reconnects on
//! the next poll after an error; the subscription is renewed on every
//! connection acknowledgement.

use rumqttc::{AsyncClient, Event as MqttEvent, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::decode_event;
use crate::configs::MessageBusSettings;
use crate::models::Event;

const RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct MqttEventIngestor {
    settings: MessageBusSettings,
    events: mpsc::Sender<Arc<Event>>,
}

impl MqttEventIngestor {
    pub fn new(settings: MessageBusSettings, events: mpsc::Sender<Arc<Event>>) -> Self {
        Self { settings, events }
    }

    /// Runs until `shutdown` fires or the event channel closes.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut options = MqttOptions::new(
            self.settings.client_id.clone(),
            self.settings.host.clone(),
            self.settings.port,
        );
        options.set_keep_alive(Duration::from_secs(30));
        let (client, mut eventloop) = AsyncClient::new(options, 10);

        log::info!(
            "Subscribing to events on {}:{} topic '{}'",
            self.settings.host,
            self.settings.port,
            self.settings.topic
        );

        loop {
            let polled = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = eventloop.poll() => polled,
            };

            match polled {
                Ok(MqttEvent::Incoming(Packet::ConnAck(_))) => {
                    if let Err(e) = client.try_subscribe(self.settings.topic.as_str(), QoS::AtMostOnce) {
                        log::error!("Could not subscribe to '{}': {}", self.settings.topic, e);
                    }
                }
                Ok(MqttEvent::Incoming(Packet::Publish(publish))) => {
                    let Some(event) = decode_event(&publish.payload) else {
                        continue;
                    };
                    if self.events.send(Arc::new(event)).await.is_err() {
                        log::info!("Event channel closed, ingestor stopping");
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!("Message bus connection error: {}. Retrying in {:?}", e, RETRY_DELAY);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                    }
                }
            }
        }

        let _ = client.try_disconnect();
        log::info!("Event ingestor stopped");
    }
}
