//! # lib_distro
//!
//! Event distribution engine: device events come in, every registered
//! export filters, encodes, compresses, encrypts and pushes them to its own
//! destination. Registrations can be added, changed and removed while the
//! engine runs.

// Declare the modules to re-export
pub mod configs;
pub mod control;
pub mod core;
pub mod ingestors;
pub mod models;
pub mod pipeline;
pub mod retrieve;

#[cfg(test)]
mod test_support;

// Re-export the engine surface
pub use configs::{DistroSettings, MessageBusSettings, TlsFiles};
pub use crate::core::{Coordinator, CoordinatorError, DistroContext};
pub use models::{Event, NotifyUpdate, Reading, Registration, UpdateOperation};
pub use pipeline::{SendError, Sender, SenderFactory};
pub use retrieve::{HttpPushMarker, HttpRegistrationSource, PushMarker, RegistrationSource};
