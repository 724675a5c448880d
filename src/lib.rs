//! Consent-gated teleport requests between actors of a live session.
//!
//! This crate provides a [`RequestBroker`] that accepts teleport requests from one actor to
//! another, lets the receiving actor accept or decline them (or answers on their behalf per
//! their [`Preference`]), and performs the relocation through a host-supplied primitive once
//! the per-actor cooldown and the optional destination safety check allow it.
//!
//! Pending requests expire; a background sweeper purges them and notifies both parties.
//!
//! # Example
//! ```ignore
//! let broker = RequestBroker::new(BrokerConfig::default(), host)?;
//! broker.start()?;
//!
//! broker.create_request(alice, bob, Direction::RequesterToTarget).await?;
//! let outcome = broker.accept_request(bob, alice).await?;
//!
//! broker.shutdown().await;
//! ```

pub mod broker;
pub mod config;
pub mod domain;
pub mod error;
pub mod host;
pub mod store;
pub mod sweeper;

// Re-export commonly used types
pub use broker::{BrokerStats, CreateOutcome, RelocationOutcome, RequestBroker};
pub use config::BrokerConfig;
pub use domain::{ActorId, Direction, Location, Preference, RequestKey, TeleportRequest};
pub use error::{BrokerError, Result};
pub use host::{
    AlwaysSafe, Clock, Host, Notification, Notifier, Relocator, SafetyChecker, SessionDirectory,
    SystemClock, TracingNotifier,
};
pub use store::{CooldownTracker, PreferenceStore, RequestRegistry};
