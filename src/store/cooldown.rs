//! Per-actor relocation cooldowns.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::domain::ActorId;

/// Tracks when each actor was last relocated.
///
/// A relocation claims the actor's slot up front with [`try_reserve`], which
/// checks and stamps it under one entry lock, so two concurrent moves of the
/// same actor cannot both pass the gate. An attempt that does not end in a
/// move hands the slot back with [`release`].
///
/// [`try_reserve`]: CooldownTracker::try_reserve
/// [`release`]: CooldownTracker::release
#[derive(Debug, Default)]
pub struct CooldownTracker {
    last_relocation: DashMap<ActorId, DateTime<Utc>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time left before `actor` may be relocated again.
    ///
    /// `max(0, cooldown - (now - last_relocation))`; zero if the actor has
    /// never relocated. A clock that went backwards counts as zero elapsed.
    pub fn remaining_cooldown(
        &self,
        actor: ActorId,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Duration {
        let Some(last) = self.last_relocation.get(&actor).map(|entry| *entry.value()) else {
            return Duration::ZERO;
        };
        remaining_after(last, now, cooldown)
    }

    /// Claim `actor`'s cooldown slot at `now` if the cooldown has elapsed.
    ///
    /// # Errors
    /// Returns the remaining cooldown if the actor relocated too recently; the
    /// stored record is left untouched.
    pub fn try_reserve(
        &self,
        actor: ActorId,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<CooldownReservation, Duration> {
        let previous = match self.last_relocation.entry(actor) {
            Entry::Occupied(mut slot) => {
                let remaining = remaining_after(*slot.get(), now, cooldown);
                if !remaining.is_zero() {
                    return Err(remaining);
                }
                Some(slot.insert(now))
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                None
            }
        };
        Ok(CooldownReservation {
            actor,
            reserved_at: now,
            previous,
        })
    }

    /// Undo a reservation whose relocation did not happen.
    ///
    /// Restores the record it replaced, unless a later reservation or
    /// relocation has overwritten the slot since.
    pub fn release(&self, reservation: CooldownReservation) {
        if let Entry::Occupied(mut slot) = self.last_relocation.entry(reservation.actor)
            && *slot.get() == reservation.reserved_at
        {
            match reservation.previous {
                Some(previous) => {
                    slot.insert(previous);
                }
                None => {
                    slot.remove();
                }
            }
        }
    }

    /// Overwrite the actor's last relocation time.
    pub fn record_relocation(&self, actor: ActorId, now: DateTime<Utc>) {
        self.last_relocation.insert(actor, now);
    }

    pub fn last_relocation(&self, actor: ActorId) -> Option<DateTime<Utc>> {
        self.last_relocation.get(&actor).map(|entry| *entry.value())
    }
}

/// A claimed cooldown slot, returned by [`CooldownTracker::try_reserve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "release the reservation if the relocation does not happen"]
pub struct CooldownReservation {
    actor: ActorId,
    reserved_at: DateTime<Utc>,
    previous: Option<DateTime<Utc>>,
}

// A clock that went backwards counts as zero elapsed.
fn remaining_after(last: DateTime<Utc>, now: DateTime<Utc>, cooldown: Duration) -> Duration {
    let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
    cooldown.saturating_sub(elapsed)
}
