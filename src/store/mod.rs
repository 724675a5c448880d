//! Shared mutable state of the broker.
//!
//! Each store is a flat, independently keyed concurrent map. No store holds a
//! reference into another, and no operation needs a cross-key transaction:
//! - [`RequestRegistry`]: pending requests keyed by (target, requester)
//! - [`PreferenceStore`]: auto-response policy per actor
//! - [`CooldownTracker`]: last relocation time per actor

pub mod cooldown;
pub mod preferences;
pub mod registry;

pub use cooldown::{CooldownReservation, CooldownTracker};
pub use preferences::PreferenceStore;
pub use registry::{Registration, RequestRegistry};
