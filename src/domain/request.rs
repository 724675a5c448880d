//! Teleport request value types.
//!
//! A request is never mutated after creation. Its lifecycle is expressed
//! entirely by presence in the registry:
//!
//! ```text
//!          create()
//!  [none] ----------> [pending] --accept()--> relocation attempt --> [none]
//!                         |
//!                         +--decline()/cancel()/expiry--> [none]
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::actor::ActorId;

/// Which actor physically moves if the request is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// The requester moves to the target (`/tpa`).
    RequesterToTarget,
    /// The target moves to the requester (`/tpahere`).
    TargetToRequester,
}

/// Registry key: one pending request per ordered (target, requester) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub target: ActorId,
    pub requester: ActorId,
}

impl RequestKey {
    pub fn new(target: ActorId, requester: ActorId) -> Self {
        Self { target, requester }
    }

    /// True if `actor` is either party of this key.
    pub fn involves(&self, actor: ActorId) -> bool {
        self.target == actor || self.requester == actor
    }
}

/// One outstanding ask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeleportRequest {
    /// Actor who initiated the request.
    pub requester: ActorId,
    /// Actor whose approval is required.
    pub target: ActorId,
    pub direction: Direction,
    pub created_at: DateTime<Utc>,
    /// The request is void at and after this instant.
    pub expires_at: DateTime<Utc>,
}

impl TeleportRequest {
    pub fn key(&self) -> RequestKey {
        RequestKey::new(self.target, self.requester)
    }

    /// The actor who relocates if this request is accepted.
    pub fn mover(&self) -> ActorId {
        match self.direction {
            Direction::RequesterToTarget => self.requester,
            Direction::TargetToRequester => self.target,
        }
    }

    /// The actor whose location is the destination.
    pub fn anchor(&self) -> ActorId {
        match self.direction {
            Direction::RequesterToTarget => self.target,
            Direction::TargetToRequester => self.requester,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
