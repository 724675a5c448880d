//! Pending request registry.
//!
//! The registry is the single arbiter of a request's fate: whichever caller
//! removes an entry first (accept, decline, cancel, or expiry) owns the
//! outcome, and every other caller observes absence.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::domain::{ActorId, Direction, RequestKey, TeleportRequest};
use crate::error::{BrokerError, Result};

/// Result of [`RequestRegistry::create`].
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    /// The request now pending.
    pub request: TeleportRequest,
    /// An expired request for the same pair that had not been swept yet.
    pub lapsed: Option<TeleportRequest>,
}

/// Concurrent map of pending requests keyed by (target, requester).
///
/// Backed by a lock-striped [`DashMap`], so operations on unrelated pairs do
/// not serialize behind each other while operations on the same pair are
/// linearizable.
#[derive(Debug, Default)]
pub struct RequestRegistry {
    requests: DashMap<RequestKey, TeleportRequest>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new pending request.
    ///
    /// The existence check and the insert happen under the same shard lock. An
    /// occupant already past its deadline is void: it is replaced and handed
    /// back in [`Registration::lapsed`] so the caller can report the expiry.
    ///
    /// # Errors
    /// Returns [`BrokerError::DuplicateExists`] if the requester already has a
    /// live request to the target, whatever its direction.
    pub fn create(
        &self,
        requester: ActorId,
        target: ActorId,
        direction: Direction,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<Registration> {
        let request = TeleportRequest {
            requester,
            target,
            direction,
            created_at: now,
            expires_at: now + ttl,
        };

        let lapsed = match self.requests.entry(RequestKey::new(target, requester)) {
            Entry::Occupied(mut slot) => {
                if !slot.get().is_expired(now) {
                    return Err(BrokerError::DuplicateExists { target, requester });
                }
                Some(slot.insert(request.clone()))
            }
            Entry::Vacant(slot) => {
                slot.insert(request.clone());
                None
            }
        };

        tracing::trace!(
            requester = %requester,
            target = %target,
            direction = ?direction,
            replaced_lapsed = lapsed.is_some(),
            "Registered pending request"
        );
        Ok(Registration { request, lapsed })
    }

    pub fn find(&self, target: ActorId, requester: ActorId) -> Option<TeleportRequest> {
        self.requests
            .get(&RequestKey::new(target, requester))
            .map(|entry| entry.value().clone())
    }

    /// Remove the request for the pair, returning it if this call removed it.
    ///
    /// Idempotent: a missing entry yields `None`.
    pub fn remove(&self, target: ActorId, requester: ActorId) -> Option<TeleportRequest> {
        self.requests
            .remove(&RequestKey::new(target, requester))
            .map(|(_, request)| request)
    }

    /// All requests currently waiting on `target`, newest first.
    pub fn list_incoming(&self, target: ActorId) -> Vec<TeleportRequest> {
        self.collect_sorted(|key| key.target == target)
    }

    /// All requests `requester` currently has open, newest first.
    ///
    /// This is a full scan; request volume per session is small.
    pub fn list_outgoing(&self, requester: ActorId) -> Vec<TeleportRequest> {
        self.collect_sorted(|key| key.requester == requester)
    }

    /// Remove every request whose `expires_at <= now` and return them.
    ///
    /// Each removal re-checks expiry under the entry's lock, so a request that
    /// a concurrent accept or cancel already took is never returned here.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<TeleportRequest> {
        // Collect first: removing while an iterator guard is alive would deadlock.
        let candidates: Vec<RequestKey> = self
            .requests
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| *entry.key())
            .collect();

        candidates
            .into_iter()
            .filter_map(|key| {
                self.requests
                    .remove_if(&key, |_, request| request.is_expired(now))
                    .map(|(_, request)| request)
            })
            .collect()
    }

    /// Remove every request `actor` is a party to, in either role.
    pub fn remove_involving(&self, actor: ActorId) -> Vec<TeleportRequest> {
        let keys: Vec<RequestKey> = self
            .requests
            .iter()
            .filter(|entry| entry.key().involves(actor))
            .map(|entry| *entry.key())
            .collect();

        keys.into_iter()
            .filter_map(|key| self.requests.remove(&key).map(|(_, request)| request))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    fn collect_sorted(&self, filter: impl Fn(&RequestKey) -> bool) -> Vec<TeleportRequest> {
        let mut requests: Vec<TeleportRequest> = self
            .requests
            .iter()
            .filter(|entry| filter(entry.key()))
            .map(|entry| entry.value().clone())
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ttl() -> chrono::Duration {
        chrono::Duration::seconds(5)
    }

    #[test]
    fn test_create_then_find() {
        let registry = RequestRegistry::new();
        let (a, b) = (ActorId::new(), ActorId::new());
        let now = Utc::now();

        let created = registry
            .create(a, b, Direction::RequesterToTarget, now, ttl())
            .unwrap()
            .request;
        assert_eq!(created.expires_at, now + ttl());

        let found = registry.find(b, a).expect("request should be pending");
        assert_eq!(found, created);
        // Keyed by (target, requester), not the other way round
        assert!(registry.find(a, b).is_none());
    }

    #[test]
    fn test_duplicate_rejected_regardless_of_direction() {
        let registry = RequestRegistry::new();
        let (a, b) = (ActorId::new(), ActorId::new());
        let now = Utc::now();

        registry
            .create(a, b, Direction::RequesterToTarget, now, ttl())
            .unwrap();
        let second = registry.create(a, b, Direction::TargetToRequester, now, ttl());
        assert!(matches!(second, Err(BrokerError::DuplicateExists { .. })));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.find(b, a).unwrap().direction,
            Direction::RequesterToTarget
        );
    }

    #[test]
    fn test_lapsed_occupant_is_replaced() {
        let registry = RequestRegistry::new();
        let (a, b) = (ActorId::new(), ActorId::new());
        let now = Utc::now();

        let first = registry
            .create(a, b, Direction::RequesterToTarget, now, ttl())
            .unwrap();
        assert!(first.lapsed.is_none());

        // Still live one instant before the deadline
        let almost = now + ttl() - chrono::Duration::milliseconds(1);
        assert!(matches!(
            registry.create(a, b, Direction::RequesterToTarget, almost, ttl()),
            Err(BrokerError::DuplicateExists { .. })
        ));

        let later = now + ttl();
        let second = registry
            .create(a, b, Direction::TargetToRequester, later, ttl())
            .unwrap();
        assert_eq!(second.lapsed, Some(first.request));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.find(b, a).unwrap().direction,
            Direction::TargetToRequester
        );
        assert!(registry.sweep_expired(later).is_empty());
    }

    #[test]
    fn test_reverse_pair_is_independent() {
        let registry = RequestRegistry::new();
        let (a, b) = (ActorId::new(), ActorId::new());
        let now = Utc::now();

        registry
            .create(a, b, Direction::RequesterToTarget, now, ttl())
            .unwrap();
        registry
            .create(b, a, Direction::RequesterToTarget, now, ttl())
            .unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = RequestRegistry::new();
        let (a, b) = (ActorId::new(), ActorId::new());

        registry
            .create(a, b, Direction::RequesterToTarget, Utc::now(), ttl())
            .unwrap();
        assert!(registry.remove(b, a).is_some());
        assert!(registry.remove(b, a).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_list_incoming_and_outgoing() {
        let registry = RequestRegistry::new();
        let (a, b, c) = (ActorId::new(), ActorId::new(), ActorId::new());
        let now = Utc::now();

        registry
            .create(a, c, Direction::RequesterToTarget, now, ttl())
            .unwrap();
        registry
            .create(
                b,
                c,
                Direction::TargetToRequester,
                now + chrono::Duration::seconds(1),
                ttl(),
            )
            .unwrap();
        registry
            .create(a, b, Direction::RequesterToTarget, now, ttl())
            .unwrap();

        let incoming = registry.list_incoming(c);
        assert_eq!(incoming.len(), 2);
        // Newest first
        assert_eq!(incoming[0].requester, b);
        assert_eq!(incoming[1].requester, a);

        let outgoing = registry.list_outgoing(a);
        assert_eq!(outgoing.len(), 2);
        assert!(outgoing.iter().all(|r| r.requester == a));

        assert!(registry.list_incoming(a).is_empty());
    }

    #[test]
    fn test_sweep_expired_removes_only_expired() {
        let registry = RequestRegistry::new();
        let (a, b, c) = (ActorId::new(), ActorId::new(), ActorId::new());
        let now = Utc::now();

        registry
            .create(a, b, Direction::RequesterToTarget, now, ttl())
            .unwrap();
        registry
            .create(
                c,
                b,
                Direction::RequesterToTarget,
                now,
                chrono::Duration::seconds(60),
            )
            .unwrap();

        let expired = registry.sweep_expired(now + chrono::Duration::seconds(6));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].requester, a);
        assert!(registry.find(b, a).is_none());
        assert!(registry.find(b, c).is_some());

        // A second sweep at the same instant finds nothing new
        assert!(
            registry
                .sweep_expired(now + chrono::Duration::seconds(6))
                .is_empty()
        );
    }

    #[test]
    fn test_remove_involving_both_roles() {
        let registry = RequestRegistry::new();
        let (a, b, c) = (ActorId::new(), ActorId::new(), ActorId::new());
        let now = Utc::now();

        registry
            .create(a, b, Direction::RequesterToTarget, now, ttl())
            .unwrap();
        registry
            .create(c, a, Direction::TargetToRequester, now, ttl())
            .unwrap();
        registry
            .create(c, b, Direction::RequesterToTarget, now, ttl())
            .unwrap();

        let removed = registry.remove_involving(a);
        assert_eq!(removed.len(), 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.find(b, c).is_some());
    }

    #[test]
    fn test_concurrent_create_same_pair_single_winner() {
        let registry = Arc::new(RequestRegistry::new());
        let (a, b) = (ActorId::new(), ActorId::new());
        let now = Utc::now();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    registry
                        .create(a, b, Direction::RequesterToTarget, now, ttl())
                        .is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|created| *created)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_remove_and_sweep_single_winner() {
        for _ in 0..64 {
            let registry = Arc::new(RequestRegistry::new());
            let (a, b) = (ActorId::new(), ActorId::new());
            let now = Utc::now();
            registry
                .create(a, b, Direction::RequesterToTarget, now, ttl())
                .unwrap();
            let later = now + chrono::Duration::seconds(10);

            let remover = {
                let registry = registry.clone();
                std::thread::spawn(move || registry.remove(b, a).is_some())
            };
            let sweeper = {
                let registry = registry.clone();
                std::thread::spawn(move || registry.sweep_expired(later).len())
            };

            let removed = remover.join().unwrap() as usize;
            let swept = sweeper.join().unwrap();
            assert_eq!(removed + swept, 1);
        }
    }
}
