//! # Core Engine Module
//!
//! The distribution engine proper.
//!
//! - **`coordinator`**: single owner of the registration map; fans events out
//!   and applies control-plane updates.
//! - **`registration_actor`**: one task per registration running its
//!   pipeline.
//! - **`context`**: the explicit collaborator bundle threaded through both.

/// Shared engine collaborators.
pub mod context;
/// The supervisor task.
pub mod coordinator;
/// Per-registration actors.
pub mod registration_actor;

pub use context::DistroContext;
pub use coordinator::{Coordinator, CoordinatorError};
pub use registration_actor::{ActorCommand, RegistrationHandle, RegistrationInfo};
