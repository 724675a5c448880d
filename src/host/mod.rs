//! Host collaborator abstractions.
//!
//! The broker never touches the game server directly. Everything it needs
//! from the host (who is online, where they stand, how to move them, how to
//! tell them things, what time it is) goes through the traits in this module,
//! which keeps the request lifecycle testable with the doubles in [`mock`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{ActorId, Direction, Location};

pub mod mock;

/// Live view of the actors in the session.
pub trait SessionDirectory: Send + Sync {
    /// Whether the actor is currently connected.
    fn is_present(&self, actor: ActorId) -> bool;

    /// The actor's current location, `None` if the actor is not present.
    fn location(&self, actor: ActorId) -> Option<Location>;
}

/// The host's "move actor to coordinates" primitive.
///
/// Implementations typically hop onto the server's main thread to perform the
/// move, hence the async signature. The broker never calls this while holding
/// a registry lock.
///
/// # Example
/// ```ignore
/// relocator.relocate(mover, &anchor_location.facing_from(&mover_location)).await?;
/// ```
#[async_trait]
pub trait Relocator: Send + Sync {
    /// Move `mover` to `destination`.
    ///
    /// # Errors
    /// Any error is treated as fatal for this attempt; no cooldown is recorded.
    async fn relocate(&self, mover: ActorId, destination: &Location) -> anyhow::Result<()>;
}

/// Predicate deciding whether a destination is safe to arrive at.
pub trait SafetyChecker: Send + Sync {
    fn is_safe(&self, destination: &Location) -> bool;
}

/// Safety checker that accepts every destination.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysSafe;

impl SafetyChecker for AlwaysSafe {
    fn is_safe(&self, _destination: &Location) -> bool {
        true
    }
}

/// Semantic events emitted to actors. Rendering is the presentation layer's job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// Sent to the requester once their request is pending.
    RequestSent {
        target: ActorId,
        direction: Direction,
        expires_at: DateTime<Utc>,
    },
    /// Sent to the target of a new pending request.
    RequestReceived {
        requester: ActorId,
        direction: Direction,
        expires_at: DateTime<Utc>,
    },
    /// Sent to the requester when the target accepts.
    RequestAccepted { by: ActorId },
    /// Sent to the requester when the target declines.
    RequestDeclined { by: ActorId },
    /// Sent to the target when the requester withdraws.
    RequestCancelled { by: ActorId },
    /// Sent to both parties when a request lapses.
    RequestExpired { requester: ActorId, target: ActorId },
    /// Sent to the requester when the target's policy accepted immediately.
    AutoAccepted { target: ActorId },
    /// Sent to the requester when the target's policy declined.
    AutoDeclined { target: ActorId },
    /// Sent to both parties after a successful move.
    Relocated { mover: ActorId, anchor: ActorId },
    /// Sent to the mover when they are still on cooldown.
    CooldownBlocked {
        #[serde(with = "duration_secs")]
        remaining: Duration,
    },
    /// Sent to both parties when the destination failed the safety check.
    UnsafeDestination { anchor: ActorId },
    /// The other party is no longer in the session.
    PlayerNotFound { actor: ActorId },
    /// The host failed to perform the move.
    RelocationFailed { mover: ActorId },
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs_f64().ceil() as u64)
    }
}

impl Notification {
    /// Short stable name for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::RequestSent { .. } => "request_sent",
            Notification::RequestReceived { .. } => "request_received",
            Notification::RequestAccepted { .. } => "request_accepted",
            Notification::RequestDeclined { .. } => "request_declined",
            Notification::RequestCancelled { .. } => "request_cancelled",
            Notification::RequestExpired { .. } => "request_expired",
            Notification::AutoAccepted { .. } => "auto_accepted",
            Notification::AutoDeclined { .. } => "auto_declined",
            Notification::Relocated { .. } => "relocated",
            Notification::CooldownBlocked { .. } => "cooldown_blocked",
            Notification::UnsafeDestination { .. } => "unsafe_destination",
            Notification::PlayerNotFound { .. } => "player_not_found",
            Notification::RelocationFailed { .. } => "relocation_failed",
        }
    }
}

/// Delivery of [`Notification`]s to actors. Fire-and-forget.
pub trait Notifier: Send + Sync {
    fn notify(&self, actor: ActorId, notification: Notification);
}

/// Notifier that only logs events. Useful for headless hosts.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, actor: ActorId, notification: Notification) {
        tracing::debug!(actor = %actor, kind = notification.kind(), ?notification, "Notify");
    }
}

/// Time source for request expiry and cooldowns.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Bundle of host collaborators handed to the broker at construction.
#[derive(Clone)]
pub struct Host {
    pub session: Arc<dyn SessionDirectory>,
    pub relocator: Arc<dyn Relocator>,
    pub safety: Arc<dyn SafetyChecker>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

impl Host {
    /// Host with the given session and relocator, no safety filtering,
    /// log-only notifications and the wall clock.
    pub fn new(session: Arc<dyn SessionDirectory>, relocator: Arc<dyn Relocator>) -> Self {
        Self {
            session,
            relocator,
            safety: Arc::new(AlwaysSafe),
            notifier: Arc::new(TracingNotifier),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_safety(mut self, safety: Arc<dyn SafetyChecker>) -> Self {
        self.safety = safety;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
