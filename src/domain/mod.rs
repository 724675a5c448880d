//! Core domain types for the teleport broker.
//!
//! This module contains pure domain types with no concurrency or host dependencies:
//! - Actor identifiers and locations
//! - Teleport requests and their direction
//! - Per-actor auto-response preferences

pub mod actor;
pub mod preference;
pub mod request;

pub use actor::{ActorId, Location};
pub use preference::Preference;
pub use request::{Direction, RequestKey, TeleportRequest};
