//! Error types for the teleport broker.

use thiserror::Error;

use crate::domain::ActorId;

/// Result type alias using the broker error type.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Main error type for the teleport broker.
///
/// None of these are fatal to the broker; each is an expected outcome of an
/// actor command and is handed back to the caller for rendering.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// One of the actors is not present in the session
    #[error("Actor not found in session: {0}")]
    ActorNotFound(ActorId),

    /// An actor tried to send a request to themselves
    #[error("Actor {0} cannot send a teleport request to themselves")]
    SelfRequest(ActorId),

    /// The requester already has a pending request to this target
    #[error("Actor {requester} already has a pending request to {target}")]
    AlreadyRequested { target: ActorId, requester: ActorId },

    /// Registry-level duplicate insert for an occupied (target, requester) pair
    #[error("Request already exists for target {target} from requester {requester}")]
    DuplicateExists { target: ActorId, requester: ActorId },

    /// No pending request exists for the pair
    #[error("No pending request for target {target} from requester {requester}")]
    NotFound { target: ActorId, requester: ActorId },

    /// The actor has no pending incoming requests at all
    #[error("No pending requests for {0}")]
    NoPendingRequests(ActorId),

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The host relocation primitive failed
    #[error("Relocation failed: {0}")]
    Relocation(#[source] anyhow::Error),

    /// General error from anyhow
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BrokerError {
    /// Returns true if this error describes a missing request rather than a
    /// broken precondition.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BrokerError::NotFound { .. } | BrokerError::NoPendingRequests(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_include_actor_ids() {
        let target = ActorId::from(uuid::Uuid::new_v4());
        let requester = ActorId::from(uuid::Uuid::new_v4());

        let error = BrokerError::AlreadyRequested { target, requester };
        let message = error.to_string();
        assert!(message.contains(&requester.to_string()));
        assert!(message.contains(&target.to_string()));
    }

    #[test]
    fn test_relocation_error_keeps_source() {
        let error = BrokerError::Relocation(anyhow::anyhow!("chunk not loaded"));
        let source = std::error::Error::source(&error).map(|e| e.to_string());
        assert_eq!(source.as_deref(), Some("chunk not loaded"));
        assert!(!error.is_not_found());
    }
}
