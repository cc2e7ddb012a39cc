//! # Data Model
//!
//! Wire types shared by every other module: device events and the export
//! registrations that describe where those events go.

/// Device events and readings.
pub mod event;
/// Registrations, their kind enums and control-plane notifications.
pub mod registration;

pub use event::{Event, Reading};
pub use registration::{
    Addressable, Compression, Destination, EncryptionAlgo, EncryptionDetails, Format,
    NotifyUpdate, Registration, RegistrationError, RegistrationFilter, RegistrationKinds,
    UpdateOperation,
};
