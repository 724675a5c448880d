//! Actor identity and position.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an actor (player) in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub Uuid);

impl ActorId {
    /// Generate a fresh random actor id.
    pub fn new() -> Self {
        ActorId(Uuid::new_v4())
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Display only first 8 characters for readability in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl From<Uuid> for ActorId {
    fn from(uuid: Uuid) -> Self {
        ActorId(uuid)
    }
}

impl std::ops::Deref for ActorId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// A position inside a world, including facing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// World or dimension name (e.g. "minecraft:overworld")
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Horizontal facing in degrees
    pub yaw: f32,
    /// Vertical facing in degrees
    pub pitch: f32,
}

impl Location {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    /// Returns this location with the facing taken from `facing`.
    ///
    /// The mover keeps looking where they were looking; only the position changes.
    pub fn facing_from(mut self, facing: &Location) -> Self {
        self.yaw = facing.yaw;
        self.pitch = facing.pitch;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_id_display_is_short() {
        let id = ActorId::new();
        assert_eq!(id.to_string().len(), 8);
        assert!(id.0.to_string().starts_with(&id.to_string()));
    }

    #[test]
    fn test_facing_from_keeps_position() {
        let anchor = Location::new("overworld", 10.5, 64.0, -3.25);
        let mover = Location {
            yaw: 90.0,
            pitch: -15.0,
            ..Location::new("nether", 0.0, 0.0, 0.0)
        };

        let destination = anchor.clone().facing_from(&mover);
        assert_eq!(destination.world, "overworld");
        assert_eq!(destination.x, anchor.x);
        assert_eq!(destination.z, anchor.z);
        assert_eq!(destination.yaw, 90.0);
        assert_eq!(destination.pitch, -15.0);
    }
}
