//! # Data Retrieval Module
//!
//! HTTP collaborators of the engine. Every client here is built on the
//! retrying `ky_http::ApiClient`.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: generic `ApiClient` on `reqwest` + `reqwest-middleware`
//!   with exponential backoff.
//! - **`registration_client`**: the `RegistrationSource` seam and its
//!   export-client implementation.
//! - **`coredata_client`**: the `PushMarker` seam and its core-data
//!   implementation.

/// Generic HTTP API client with retry middleware.
pub mod ky_http;
/// Registration store access.
pub mod registration_client;
/// Pushed-event bookkeeping in core-data.
pub mod coredata_client;

pub use coredata_client::{HttpPushMarker, PushMarker};
pub use ky_http::{ApiClient, ApiResponse};
pub use registration_client::{HttpRegistrationSource, RegistrationSource};
