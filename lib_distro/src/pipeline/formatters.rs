//! # Payload Formatters
//!
//! Pure `Event -> bytes` encoders. The encodings here are wire formats
//! consumed by third-party endpoints (ThingsBoard, Azure IoT Hub, AWS IoT
//! shadows), so field names and layouts are fixed.

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, NaiveDate, Utc};
use quick_xml::events::Event as XmlNode;
use quick_xml::Reader;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Event, Format, Reading};

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML encoding failed: {0}")]
    Xml(String),
}

/// A formatter stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Formatter {
    Json,
    Xml,
    ThingsBoardJson,
    AzureJson,
    AwsJson,
    Noop,
}

impl Formatter {
    /// Resolves the formatter for a registration format.
    ///
    /// `SERIALIZED` and `CSV` are accepted kinds without an encoder and
    /// resolve to `None`.
    pub fn for_format(format: Format) -> Option<Formatter> {
        match format {
            Format::Json | Format::IotCoreJson => Some(Formatter::Json),
            Format::Xml => Some(Formatter::Xml),
            Format::ThingsBoardJson => Some(Formatter::ThingsBoardJson),
            Format::AzureJson => Some(Formatter::AzureJson),
            Format::AwsJson => Some(Formatter::AwsJson),
            Format::Noop => Some(Formatter::Noop),
            Format::Serialized | Format::Csv => None,
        }
    }

    pub fn format(&self, event: &Event) -> Result<Vec<u8>, FormatError> {
        match self {
            Formatter::Json => Ok(serde_json::to_vec(event)?),
            Formatter::Xml => format_xml(event),
            Formatter::ThingsBoardJson => format_thingsboard(event),
            Formatter::AzureJson => format_azure(event),
            Formatter::AwsJson => format_aws_shadow(event),
            Formatter::Noop => Ok(Vec::new()),
        }
    }
}

// --- XML ---

#[derive(Debug, Serialize)]
#[serde(rename = "Event")]
struct XmlEvent {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(rename = "Pushed", default)]
    pushed: i64,
    #[serde(rename = "Device", default)]
    device: String,
    #[serde(rename = "Created", default)]
    created: i64,
    #[serde(rename = "Modified", default)]
    modified: i64,
    #[serde(rename = "Origin", default)]
    origin: i64,
    #[serde(rename = "Readings", default)]
    readings: Vec<XmlReading>,
}

#[derive(Debug, Serialize)]
struct XmlReading {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(rename = "Pushed", default)]
    pushed: i64,
    #[serde(rename = "Created", default)]
    created: i64,
    #[serde(rename = "Origin", default)]
    origin: i64,
    #[serde(rename = "Modified", default)]
    modified: i64,
    #[serde(rename = "Device", default)]
    device: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Value", default)]
    value: String,
}

impl From<&Event> for XmlEvent {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id.clone(),
            pushed: event.pushed,
            device: event.device.clone(),
            created: event.created,
            modified: event.modified,
            origin: event.origin,
            readings: event.readings.iter().map(XmlReading::from).collect(),
        }
    }
}

impl From<&Reading> for XmlReading {
    fn from(r: &Reading) -> Self {
        Self {
            id: r.id.clone(),
            pushed: r.pushed,
            created: r.created,
            origin: r.origin,
            modified: r.modified,
            device: r.device.clone(),
            name: r.name.clone(),
            value: r.value.clone(),
        }
    }
}

fn format_xml(event: &Event) -> Result<Vec<u8>, FormatError> {
    quick_xml::se::to_string(&XmlEvent::from(event))
        .map(String::into_bytes)
        .map_err(|e| FormatError::Xml(e.to_string()))
}

fn xml_error(e: impl std::fmt::Display) -> FormatError {
    FormatError::Xml(e.to_string())
}

fn xml_number(field: &str, text: &str) -> Result<i64, FormatError> {
    text.parse()
        .map_err(|e| FormatError::Xml(format!("{}: {}", field, e)))
}

fn set_event_field(event: &mut Event, field: &[u8], text: String) -> Result<(), FormatError> {
    match field {
        b"ID" => event.id = text,
        b"Pushed" => event.pushed = xml_number("Pushed", &text)?,
        b"Device" => event.device = text,
        b"Created" => event.created = xml_number("Created", &text)?,
        b"Modified" => event.modified = xml_number("Modified", &text)?,
        b"Origin" => event.origin = xml_number("Origin", &text)?,
        _ => {}
    }
    Ok(())
}

fn set_reading_field(reading: &mut Reading, field: &[u8], text: String) -> Result<(), FormatError> {
    match field {
        b"ID" => reading.id = text,
        b"Pushed" => reading.pushed = xml_number("Pushed", &text)?,
        b"Created" => reading.created = xml_number("Created", &text)?,
        b"Origin" => reading.origin = xml_number("Origin", &text)?,
        b"Modified" => reading.modified = xml_number("Modified", &text)?,
        b"Device" => reading.device = text,
        b"Name" => reading.name = text,
        b"Value" => reading.value = text,
        _ => {}
    }
    Ok(())
}

/// Decodes a payload produced by the XML formatter.
///
/// Text content is taken verbatim: surrounding whitespace in device names
/// and values survives the round trip.
pub fn event_from_xml(payload: &[u8]) -> Result<Event, FormatError> {
    let mut reader = Reader::from_reader(payload);
    reader.config_mut().trim_text(false);

    let mut event = Event::default();
    let mut seen_root = false;
    // Open elements below the document root.
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            XmlNode::Start(e) => {
                let name = e.name().as_ref().to_vec();
                if !seen_root {
                    if name != b"Event" {
                        return Err(FormatError::Xml("root element is not <Event>".to_string()));
                    }
                    seen_root = true;
                } else {
                    if path.len() == 1 && name == b"Readings" {
                        event.readings.push(Reading::default());
                    }
                    path.push(name);
                }
                text.clear();
            }
            XmlNode::Empty(e) => {
                if seen_root && path.is_empty() && e.name().as_ref() == b"Readings" {
                    event.readings.push(Reading::default());
                }
            }
            XmlNode::Text(t) => text.push_str(&t.unescape().map_err(xml_error)?),
            XmlNode::CData(c) => text.push_str(std::str::from_utf8(&c).map_err(xml_error)?),
            XmlNode::End(_) => {
                let Some(field) = path.pop() else {
                    break;
                };
                let value = std::mem::take(&mut text);
                match path.as_slice() {
                    [] => set_event_field(&mut event, &field, value)?,
                    [parent] if parent.as_slice() == b"Readings" => {
                        if let Some(reading) = event.readings.last_mut() {
                            set_reading_field(reading, &field, value)?;
                        }
                    }
                    _ => {}
                }
            }
            XmlNode::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !seen_root {
        return Err(FormatError::Xml("no <Event> element".to_string()));
    }
    Ok(event)
}

// --- ThingsBoard ---
// https://thingsboard.io/docs/reference/gateway-mqtt-api/#telemetry-upload-api

#[derive(Debug, Serialize)]
struct ThingsBoardTelemetry<'a> {
    ts: i64,
    values: BTreeMap<&'a str, &'a str>,
}

fn format_thingsboard(event: &Event) -> Result<Vec<u8>, FormatError> {
    let mut values = BTreeMap::new();
    for reading in &event.readings {
        values.insert(reading.name.as_str(), reading.value.as_str());
    }

    let mut device = BTreeMap::new();
    device.insert(
        event.device.as_str(),
        vec![ThingsBoardTelemetry {
            ts: event.origin,
            values,
        }],
    );
    Ok(serde_json::to_vec(&device)?)
}

// --- Azure IoT Hub ---
// https://docs.microsoft.com/en-us/azure/iot-hub/iot-hub-devguide-messages-construct

#[derive(Debug, Default, Serialize)]
struct ConnAuthMethod {
    scope: String,
    #[serde(rename = "type")]
    kind: String,
    issuer: String,
}

#[derive(Debug, Serialize)]
struct AzureMessage {
    id: String,
    #[serde(rename = "sequenceNumber")]
    sequence_number: i64,
    #[serde(rename = "To")]
    to: String,
    #[serde(rename = "CreationTimeUtc")]
    created: DateTime<Utc>,
    #[serde(rename = "ExpiryTimeUtc")]
    expire: DateTime<Utc>,
    #[serde(rename = "EnqueuedTime")]
    enqueued: DateTime<Utc>,
    #[serde(rename = "CorrelationId")]
    correlation_id: String,
    #[serde(rename = "userId")]
    user_id: String,
    /// Feedback code; 0 requests no feedback.
    ack: u8,
    #[serde(rename = "connectionDeviceId")]
    conn_dev_id: String,
    #[serde(rename = "connectionDeviceGenerationId")]
    conn_dev_gen_id: String,
    #[serde(rename = "connectionAuthMethod")]
    conn_auth_method: ConnAuthMethod,
    /// Base64 of the JSON encoded event.
    body: String,
    properties: BTreeMap<String, String>,
}

/// 0001-01-01T00:00:00Z, the "unset" timestamp of IoT Hub messages.
fn zero_time() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
        .unwrap_or_default()
}

fn format_azure(event: &Event) -> Result<Vec<u8>, FormatError> {
    let body = serde_json::to_vec(event)?;
    let message = AzureMessage {
        id: Uuid::new_v4().to_string(),
        sequence_number: 0,
        to: String::new(),
        created: Utc::now(),
        expire: zero_time(),
        enqueued: zero_time(),
        correlation_id: Uuid::new_v4().to_string(),
        user_id: event.origin.to_string(),
        ack: 0,
        conn_dev_id: event.device.clone(),
        conn_dev_gen_id: String::new(),
        conn_auth_method: ConnAuthMethod::default(),
        body: general_purpose::STANDARD.encode(body),
        properties: BTreeMap::new(),
    };
    Ok(serde_json::to_vec(&message)?)
}

// --- AWS IoT device shadow ---

fn shadow_value(raw: &str) -> serde_json::Value {
    if let Some(number) = raw
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
    {
        return serde_json::Value::Number(number);
    }
    match raw.to_lowercase().as_str() {
        "true" => serde_json::Value::Bool(true),
        "false" => serde_json::Value::Bool(false),
        _ => serde_json::Value::String(raw.to_string()),
    }
}

fn format_aws_shadow(event: &Event) -> Result<Vec<u8>, FormatError> {
    let reported: serde_json::Map<String, serde_json::Value> = event
        .readings
        .iter()
        .map(|r| (r.name.clone(), shadow_value(&r.value)))
        .collect();
    let document = serde_json::json!({ "state": { "reported": reported } });
    Ok(serde_json::to_vec(&document)?)
}
