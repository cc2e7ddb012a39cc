//! # Configuration Modules
//!
//! Runtime settings of the distribution engine. The binary merges defaults,
//! a JSON file, environment variables and CLI flags into a `DistroSettings`.

/// Engine-wide settings shared through the distro context.
pub mod config_distro;

pub use config_distro::{DistroSettings, MessageBusSettings, TlsFiles};
