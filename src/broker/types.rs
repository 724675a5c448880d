//! Result types returned by the broker.

use std::time::Duration;

use serde::Serialize;

use crate::domain::{ActorId, TeleportRequest};

/// Outcome of a successful `create_request` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "details", rename_all = "snake_case")]
pub enum CreateOutcome {
    /// The request is pending the target's answer.
    Created(TeleportRequest),
    /// The target's policy accepted immediately. The inner outcome says whether
    /// the move itself went through; the call is reported as accepted either way.
    AutoAccepted(RelocationOutcome),
    /// The target's policy declined; nothing was registered.
    AutoDeclined,
}

/// Result of one relocation attempt for a consumed request.
///
/// Every variant means the request is gone: a blocked attempt is not re-queued,
/// the actor has to ask again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RelocationOutcome {
    /// The mover now stands at the anchor's location.
    Relocated { mover: ActorId, anchor: ActorId },
    /// The mover relocated too recently.
    CooldownBlocked {
        mover: ActorId,
        #[serde(serialize_with = "serialize_millis")]
        remaining: Duration,
    },
    /// The anchor's location failed the safety check.
    UnsafeDestination { mover: ActorId, anchor: ActorId },
    /// One of the parties left the session before the move.
    PlayerMissing { actor: ActorId },
}

impl RelocationOutcome {
    pub fn is_relocated(&self) -> bool {
        matches!(self, RelocationOutcome::Relocated { .. })
    }

    /// Short stable name for logs and metrics labels.
    pub fn label(&self) -> &'static str {
        match self {
            RelocationOutcome::Relocated { .. } => "relocated",
            RelocationOutcome::CooldownBlocked { .. } => "cooldown_blocked",
            RelocationOutcome::UnsafeDestination { .. } => "unsafe_destination",
            RelocationOutcome::PlayerMissing { .. } => "player_missing",
        }
    }
}

fn serialize_millis<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(value.as_millis() as u64)
}

/// Point-in-time broker statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    /// Requests currently waiting for an answer.
    pub pending_requests: usize,
    /// Total requests registered since start.
    pub requests_created: u64,
    /// Total moves actually performed.
    pub relocations: u64,
    /// Total requests that lapsed without an answer.
    pub expired: u64,
}
