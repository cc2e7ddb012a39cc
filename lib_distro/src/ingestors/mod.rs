//! # Event Ingestors
//!
//! Sources that feed device events into the coordinator's event channel.
//!
//! - **`mqtt_events`**: subscribes to the message-bus topic and forwards
//!   every JSON-encoded event.

/// MQTT message-bus subscriber.
#[cfg(feature = "mqtt")]
pub mod mqtt_events;

#[cfg(feature = "mqtt")]
pub use mqtt_events::MqttEventIngestor;

use crate::models::Event;

/// Decodes a JSON event payload. Malformed payloads are logged and yield
/// `None`.
pub fn decode_event(payload: &[u8]) -> Option<Event> {
    match serde_json::from_slice::<Event>(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            log::warn!("Dropping malformed event payload ({} bytes): {}", payload.len(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_event() {
        let event = decode_event(br#"{"id":"e1","device":"DEV1","readings":[{"name":"temperature","value":"72"}]}"#)
            .unwrap();
        assert_eq!(event.device, "DEV1");
        assert_eq!(event.readings[0].value, "72");
        assert!(decode_event(b"\x00garbage").is_none());
        assert!(decode_event(b"[1,2]").is_none());
    }
}
