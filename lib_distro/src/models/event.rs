//! # Device Events
//!
//! The telemetry unit flowing through the engine. An `Event` carries the
//! originating device and an ordered list of `Reading`s. Events are shared
//! between registration actors behind an `Arc`, so no stage ever mutates one
//! in place; narrowing stages build a new `Event` instead.

use serde::{Deserialize, Serialize};

/// A single sensor value reported by a device.
///
/// `name` is the value-descriptor id the reading belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Reading {
    pub id: String,
    pub pushed: i64,
    pub created: i64,
    pub origin: i64,
    pub modified: i64,
    pub device: String,
    pub name: String,
    pub value: String,
}

/// # Event
///
/// A batch of readings produced by one device at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Event {
    pub id: String,
    pub pushed: i64,
    pub device: String,
    pub created: i64,
    pub modified: i64,
    pub origin: i64,
    pub readings: Vec<Reading>,
}

impl Event {
    /// Creates an event for `device` carrying `readings`, all timestamps zeroed.
    pub fn new(device: impl Into<String>, readings: Vec<Reading>) -> Self {
        Self {
            device: device.into(),
            readings,
            ..Default::default()
        }
    }

    /// Returns a copy of this event holding only the readings accepted by
    /// `keep`, in their original order. Every other field is preserved.
    pub fn with_readings_where<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(&Reading) -> bool,
    {
        Self {
            id: self.id.clone(),
            pushed: self.pushed,
            device: self.device.clone(),
            created: self.created,
            modified: self.modified,
            origin: self.origin,
            readings: self.readings.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }
}

impl Reading {
    /// Shorthand used by ingestion code and tests.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_deserializes_with_missing_fields() {
        let raw = r#"{"device":"DEV1","readings":[{"name":"temperature","value":"72"}]}"#;
        let event: Event = serde_json::from_str(raw).unwrap();
        assert_eq!(event.device, "DEV1");
        assert_eq!(event.origin, 0);
        assert_eq!(event.readings, vec![Reading::new("temperature", "72")]);
    }

    #[test]
    fn test_with_readings_where_keeps_order_and_fields() {
        let mut event = Event::new(
            "DEV1",
            vec![
                Reading::new("a", "1"),
                Reading::new("b", "2"),
                Reading::new("a", "3"),
            ],
        );
        event.origin = 42;
        event.id = "evt".to_string();

        let narrowed = event.with_readings_where(|r| r.name == "a");
        assert_eq!(narrowed.origin, 42);
        assert_eq!(narrowed.id, "evt");
        let values: Vec<&str> = narrowed.readings.iter().map(|r| r.value.as_str()).collect();
        assert_eq!(values, vec!["1", "3"]);
        assert_eq!(event.readings.len(), 3);
    }
}
