//! Per-actor auto-response preferences.

use dashmap::DashMap;

use crate::domain::{ActorId, Preference};

/// Last-write-wins map from actor to [`Preference`].
///
/// Entries are created lazily on first write and live for the session.
#[derive(Debug, Default)]
pub struct PreferenceStore {
    preferences: DashMap<ActorId, Preference>,
}

impl PreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The actor's preference, [`Preference::Ask`] if never set.
    pub fn get(&self, actor: ActorId) -> Preference {
        self.preferences
            .get(&actor)
            .map(|entry| *entry.value())
            .unwrap_or_default()
    }

    /// Set the actor's preference, returning the previous one.
    pub fn set(&self, actor: ActorId, preference: Preference) -> Preference {
        let previous = self
            .preferences
            .insert(actor, preference)
            .unwrap_or_default();
        tracing::debug!(
            actor = %actor,
            previous = %previous,
            preference = %preference,
            "Updated teleport preference"
        );
        previous
    }
}
