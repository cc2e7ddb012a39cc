//! # Export Registrations
//!
//! A `Registration` is a named outbound delivery rule: which events to keep,
//! how to encode them, and where to push them. Registrations live in an
//! external store and reach the engine as JSON, so the kind fields stay plain
//! strings on the wire. They are parsed into the closed enums below when a
//! pipeline is built, and anything outside those sets is rejected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while validating a registration or building its pipeline.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// The registration has no name and therefore no identity.
    #[error("registration name is required")]
    MissingName,

    #[error("format not supported: {0}")]
    UnsupportedFormat(String),

    #[error("compression not supported: {0}")]
    UnsupportedCompression(String),

    #[error("encryption not supported: {0}")]
    UnsupportedEncryption(String),

    #[error("destination not supported: {0}")]
    UnsupportedDestination(String),

    /// The destination is known but its sender could not be constructed.
    #[error("sender for {destination} could not be built: {reason}")]
    SenderUnavailable { destination: String, reason: String },
}

/// Connection details of a destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Addressable {
    pub id: String,
    pub created: i64,
    pub modified: i64,
    pub origin: i64,
    pub name: String,
    pub protocol: String,
    /// HTTP verb used by the REST sender.
    pub method: String,
    pub address: String,
    pub port: u16,
    pub path: String,
    pub publisher: String,
    pub user: String,
    pub password: String,
    pub topic: String,
}

impl Addressable {
    /// `protocol://address:port`, with the protocol lower-cased.
    pub fn base_url(&self) -> String {
        format!(
            "{}://{}:{}",
            self.protocol.to_lowercase(),
            self.address,
            self.port
        )
    }

    /// Full endpoint URL: the base URL followed by `path`.
    pub fn url(&self) -> String {
        format!("{}{}", self.base_url(), self.path)
    }

    /// True when the protocol asks for a TLS transport.
    pub fn wants_tls(&self) -> bool {
        matches!(
            self.protocol.to_lowercase().as_str(),
            "tcps" | "ssl" | "tls"
        )
    }
}

/// Allow-lists applied before formatting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationFilter {
    #[serde(rename = "deviceIdentifiers")]
    pub device_ids: Vec<String>,
    #[serde(rename = "valueDescriptorIdentifiers")]
    pub value_descriptor_ids: Vec<String>,
}

/// Encryption settings. Only AES is implemented.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionDetails {
    #[serde(rename = "encryptionAlgorithm")]
    pub algo: String,
    #[serde(rename = "encryptionKey")]
    pub key: String,
    #[serde(rename = "initializingVector")]
    pub init_vector: String,
}

/// # Registration
///
/// The wire representation shared with the registration store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Registration {
    pub id: String,
    pub created: i64,
    pub modified: i64,
    pub origin: i64,
    pub name: String,
    pub addressable: Addressable,
    pub format: String,
    pub filter: RegistrationFilter,
    pub encryption: EncryptionDetails,
    pub compression: String,
    pub enable: bool,
    pub destination: String,
}

impl Registration {
    /// Checks that the registration can be turned into a pipeline.
    ///
    /// Empty compression and encryption fields are normalized to `NONE`
    /// before the kinds are checked.
    pub fn validate(&mut self) -> Result<(), RegistrationError> {
        if self.name.is_empty() {
            return Err(RegistrationError::MissingName);
        }
        if self.compression.is_empty() {
            self.compression = Compression::None.as_str().to_string();
        }
        if self.encryption.algo.is_empty() {
            self.encryption.algo = EncryptionAlgo::None.as_str().to_string();
        }
        self.kinds().map(|_| ())
    }

    /// Parses every kind field, failing on the first unsupported value.
    pub fn kinds(&self) -> Result<RegistrationKinds, RegistrationError> {
        Ok(RegistrationKinds {
            format: self.format.parse()?,
            compression: self.compression.parse()?,
            destination: self.destination.parse()?,
            encryption: self.encryption.algo.parse()?,
        })
    }
}

/// The typed view of a registration's kind fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationKinds {
    pub format: Format,
    pub compression: Compression,
    pub destination: Destination,
    pub encryption: EncryptionAlgo,
}

/// Generates `as_str`, `FromStr` and `Display` for a wire-string enum.
macro_rules! wire_enum {
    ($name:ident, $err:ident, { $($variant:ident => $wire:literal),+ $(,)? } $(, empty => $empty:ident)?) => {
        impl $name {
            /// All variants, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The wire string of this variant.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl FromStr for $name {
            type Err = RegistrationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    $("" => Ok($name::$empty),)?
                    other => Err(RegistrationError::$err(other.to_string())),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Payload encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Json,
    Xml,
    /// Accepted, not implemented: events are dropped.
    Serialized,
    IotCoreJson,
    AzureJson,
    AwsJson,
    /// Accepted, not implemented: events are dropped.
    Csv,
    ThingsBoardJson,
    Noop,
}

wire_enum!(Format, UnsupportedFormat, {
    Json => "JSON",
    Xml => "XML",
    Serialized => "SERIALIZED",
    IotCoreJson => "IOTCORE_JSON",
    AzureJson => "AZURE_JSON",
    AwsJson => "AWS_JSON",
    Csv => "CSV",
    ThingsBoardJson => "THINGSBOARD_JSON",
    Noop => "NOOP",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    None,
    Gzip,
    Zip,
}

wire_enum!(Compression, UnsupportedCompression, {
    None => "NONE",
    Gzip => "GZIP",
    Zip => "ZIP",
}, empty => None);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionAlgo {
    None,
    Aes,
}

wire_enum!(EncryptionAlgo, UnsupportedEncryption, {
    None => "NONE",
    Aes => "AES",
}, empty => None);

/// Transport kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Mqtt,
    /// Declared by the schema; no sender exists for it.
    Zmq,
    IotCoreMqtt,
    AzureMqtt,
    AwsMqtt,
    Rest,
    Xmpp,
    InfluxDb,
}

wire_enum!(Destination, UnsupportedDestination, {
    Mqtt => "MQTT_TOPIC",
    Zmq => "ZMQ_TOPIC",
    IotCoreMqtt => "IOTCORE_TOPIC",
    AzureMqtt => "AZURE_TOPIC",
    AwsMqtt => "AWS_TOPIC",
    Rest => "REST_ENDPOINT",
    Xmpp => "XMPP_TOPIC",
    InfluxDb => "INFLUXDB_ENDPOINT",
});

/// Control-plane operations carried by a `NotifyUpdate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateOperation {
    Add,
    Update,
    Delete,
}

impl UpdateOperation {
    /// Parses the wire string; `None` for anything unrecognized.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "add" => Some(UpdateOperation::Add),
            "update" => Some(UpdateOperation::Update),
            "delete" => Some(UpdateOperation::Delete),
            _ => None,
        }
    }
}

/// A change notification for a single registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyUpdate {
    pub name: String,
    pub operation: UpdateOperation,
}

impl NotifyUpdate {
    pub fn new(name: impl Into<String>, operation: UpdateOperation) -> Self {
        Self {
            name: name.into(),
            operation,
        }
    }
}
