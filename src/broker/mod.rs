//! Request broker: the orchestration state machine.
//!
//! The broker ties the stores and the host collaborators together:
//!
//! ```text
//!  create_request ──> PreferenceStore ──AutoDecline──> (nothing registered)
//!                          │
//!                          ├──AutoAccept──> attempt_relocation
//!                          │
//!                          └──Ask──> RequestRegistry::create ──> [pending]
//!
//!  [pending] ──accept──> remove ──> attempt_relocation ──> [none]
//!  [pending] ──decline/cancel/actor_left──> remove ──> [none]
//!  [pending] ──expiry (lazy or sweeper)──> remove ──> [none]
//!
//!  attempt_relocation: reserve cooldown ──> liveness ──> safety gate ──> move ──> restamp
//!                      (any step short of the move hands the cooldown slot back)
//! ```
//!
//! Removal from the registry is the single point of arbitration. Whoever
//! removes an entry owns its outcome, so an accept racing an expiry produces
//! exactly one of "relocated" or "expired".

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::BrokerConfig;
use crate::domain::{ActorId, Direction, Preference, TeleportRequest};
use crate::error::{BrokerError, Result};
use crate::host::{Host, Notification};
use crate::store::{CooldownTracker, PreferenceStore, RequestRegistry};
use crate::sweeper::{Sweeper, SweeperHandle};

pub mod types;

pub use types::{BrokerStats, CreateOutcome, RelocationOutcome};

/// Brokers consent-gated teleport requests between actors of one session.
///
/// Construct one per session and share it as `Arc<RequestBroker>`; all
/// methods take `&self` and are safe to call concurrently.
pub struct RequestBroker {
    config: RwLock<Arc<BrokerConfig>>,
    host: Host,
    registry: RequestRegistry,
    preferences: PreferenceStore,
    cooldowns: CooldownTracker,
    requests_created: AtomicU64,
    relocations: AtomicU64,
    expired: AtomicU64,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl RequestBroker {
    /// Create a new broker. The sweeper is not running until [`start`](Self::start).
    ///
    /// # Errors
    /// Returns [`BrokerError::InvalidConfig`] if the configuration is invalid.
    pub fn new(config: BrokerConfig, host: Host) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            config: RwLock::new(Arc::new(config)),
            host,
            registry: RequestRegistry::new(),
            preferences: PreferenceStore::new(),
            cooldowns: CooldownTracker::new(),
            requests_created: AtomicU64::new(0),
            relocations: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            sweeper: Mutex::new(None),
        }))
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start the background sweeper. Does nothing if it is already running.
    ///
    /// # Errors
    /// Fails if called outside a tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        self.start_with_parent(&CancellationToken::new())
    }

    /// Start the sweeper as a child of `parent`, so cancelling the host's
    /// shutdown token also stops it.
    pub fn start_with_parent(self: &Arc<Self>, parent: &CancellationToken) -> Result<()> {
        let mut slot = self.sweeper.lock();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            tracing::debug!("Sweeper already running");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| anyhow::anyhow!("Cannot start sweeper outside a tokio runtime: {}", e))?;
        let interval = self.config().sweep_interval();
        *slot = Some(Sweeper::spawn(
            &runtime,
            Arc::downgrade(self),
            interval,
            parent.child_token(),
        ));
        tracing::info!(interval_ms = interval.as_millis() as u64, "Teleport broker started");
        Ok(())
    }

    /// Stop the sweeper and wait for it to exit. Idempotent.
    pub async fn shutdown(&self) {
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            handle.stop().await;
            tracing::info!("Teleport broker stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<BrokerConfig> {
        self.config.read().clone()
    }

    /// Atomically replace the configuration for all subsequent operations.
    ///
    /// Operations already in flight keep the snapshot they captured.
    ///
    /// # Errors
    /// Returns [`BrokerError::InvalidConfig`] and keeps the old configuration
    /// if `config` is invalid.
    pub fn reconfigure(&self, config: BrokerConfig) -> Result<()> {
        config.validate()?;
        tracing::info!(
            request_expiration_ms = config.request_expiration_ms,
            cooldown_ms = config.cooldown_ms,
            safety_check_enabled = config.safety_check_enabled,
            sweep_interval_ms = config.sweep_interval_ms,
            "Teleport broker reconfigured"
        );
        *self.config.write() = Arc::new(config);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Request lifecycle
    // ------------------------------------------------------------------

    /// Ask `target` for a teleport.
    ///
    /// `direction` decides who moves if the request is accepted.
    ///
    /// # Errors
    /// - [`BrokerError::SelfRequest`] if requester and target are the same actor
    /// - [`BrokerError::ActorNotFound`] if either actor is not in the session
    /// - [`BrokerError::AlreadyRequested`] if the requester already has a
    ///   pending request to the target
    /// - [`BrokerError::Relocation`] if the target auto-accepts and the host
    ///   failed to perform the move
    #[tracing::instrument(
        skip_all,
        fields(requester = %requester, target = %target, direction = ?direction)
    )]
    pub async fn create_request(
        &self,
        requester: ActorId,
        target: ActorId,
        direction: Direction,
    ) -> Result<CreateOutcome> {
        if requester == target {
            return Err(BrokerError::SelfRequest(requester));
        }
        if !self.host.session.is_present(requester) {
            return Err(BrokerError::ActorNotFound(requester));
        }
        if !self.host.session.is_present(target) {
            self.notify(requester, Notification::PlayerNotFound { actor: target });
            return Err(BrokerError::ActorNotFound(target));
        }

        let config = self.config();
        match self.preferences.get(target) {
            Preference::AutoDecline => {
                counter!("teleport_requests_resolved_total", "outcome" => "auto_declined")
                    .increment(1);
                tracing::debug!("Request auto-declined by target preference");
                self.notify(requester, Notification::AutoDeclined { target });
                Ok(CreateOutcome::AutoDeclined)
            }
            Preference::AutoAccept => {
                counter!("teleport_requests_resolved_total", "outcome" => "auto_accepted")
                    .increment(1);
                tracing::debug!("Request auto-accepted by target preference");
                self.notify(requester, Notification::AutoAccepted { target });
                let outcome = self.relocate_with(&config, requester, target, direction).await?;
                Ok(CreateOutcome::AutoAccepted(outcome))
            }
            Preference::Ask => {
                let now = self.host.clock.now();
                let registration = self
                    .registry
                    .create(requester, target, direction, now, config.request_expiration())
                    .map_err(|e| match e {
                        BrokerError::DuplicateExists { target, requester } => {
                            BrokerError::AlreadyRequested { target, requester }
                        }
                        other => other,
                    })?;
                if let Some(lapsed) = registration.lapsed {
                    self.report_expired(&[lapsed]);
                }
                let request = registration.request;

                self.requests_created.fetch_add(1, Ordering::Relaxed);
                counter!("teleport_requests_created_total").increment(1);
                tracing::debug!(expires_at = %request.expires_at, "Request pending");

                self.notify(
                    requester,
                    Notification::RequestSent {
                        target,
                        direction,
                        expires_at: request.expires_at,
                    },
                );
                self.notify(
                    target,
                    Notification::RequestReceived {
                        requester,
                        direction,
                        expires_at: request.expires_at,
                    },
                );
                Ok(CreateOutcome::Created(request))
            }
        }
    }

    /// Accept the pending request from `requester` to `target`.
    ///
    /// The request is consumed whether or not the move goes through; the
    /// returned outcome tells which.
    ///
    /// # Errors
    /// - [`BrokerError::NotFound`] if there is no live request for the pair
    ///   (including one that just expired)
    /// - [`BrokerError::Relocation`] if the host failed to perform the move
    #[tracing::instrument(skip_all, fields(target = %target, requester = %requester))]
    pub async fn accept_request(
        &self,
        target: ActorId,
        requester: ActorId,
    ) -> Result<RelocationOutcome> {
        let config = self.config();
        self.sweep_expired();

        let request = self
            .registry
            .remove(target, requester)
            .ok_or(BrokerError::NotFound { target, requester })?;

        counter!("teleport_requests_resolved_total", "outcome" => "accepted").increment(1);
        tracing::debug!(direction = ?request.direction, "Request accepted");
        self.notify(requester, Notification::RequestAccepted { by: target });

        self.relocate_with(&config, request.requester, request.target, request.direction).await
    }

    /// Accept the newest pending request addressed to `target`.
    ///
    /// # Errors
    /// [`BrokerError::NoPendingRequests`] if nothing is waiting, otherwise as
    /// [`accept_request`](Self::accept_request).
    pub async fn accept_latest(&self, target: ActorId) -> Result<RelocationOutcome> {
        let latest = self
            .pending_incoming(target)
            .into_iter()
            .next()
            .ok_or(BrokerError::NoPendingRequests(target))?;
        self.accept_request(target, latest.requester).await
    }

    /// Decline the pending request from `requester` to `target`.
    ///
    /// # Errors
    /// [`BrokerError::NotFound`] if there is no live request for the pair.
    #[tracing::instrument(skip_all, fields(target = %target, requester = %requester))]
    pub fn decline_request(&self, target: ActorId, requester: ActorId) -> Result<TeleportRequest> {
        self.sweep_expired();
        let request = self
            .registry
            .remove(target, requester)
            .ok_or(BrokerError::NotFound { target, requester })?;

        counter!("teleport_requests_resolved_total", "outcome" => "declined").increment(1);
        tracing::debug!("Request declined");
        self.notify(requester, Notification::RequestDeclined { by: target });
        Ok(request)
    }

    /// Decline the newest pending request addressed to `target`.
    pub fn decline_latest(&self, target: ActorId) -> Result<TeleportRequest> {
        let latest = self
            .pending_incoming(target)
            .into_iter()
            .next()
            .ok_or(BrokerError::NoPendingRequests(target))?;
        self.decline_request(target, latest.requester)
    }

    /// Withdraw `requester`'s pending request to `target`.
    ///
    /// # Errors
    /// [`BrokerError::NotFound`] if there is no live request for the pair.
    #[tracing::instrument(skip_all, fields(requester = %requester, target = %target))]
    pub fn cancel_request(&self, requester: ActorId, target: ActorId) -> Result<TeleportRequest> {
        self.sweep_expired();
        let request = self
            .registry
            .remove(target, requester)
            .ok_or(BrokerError::NotFound { target, requester })?;

        counter!("teleport_requests_resolved_total", "outcome" => "cancelled").increment(1);
        tracing::debug!("Request cancelled");
        self.notify(target, Notification::RequestCancelled { by: requester });
        Ok(request)
    }

    /// Drop every request `actor` is a party to, typically on disconnect.
    ///
    /// The remaining party of each request is told the actor is gone.
    #[tracing::instrument(skip_all, fields(actor = %actor))]
    pub fn actor_left(&self, actor: ActorId) -> Vec<TeleportRequest> {
        let removed = self.registry.remove_involving(actor);
        for request in &removed {
            let other = if request.requester == actor {
                request.target
            } else {
                request.requester
            };
            if self.host.session.is_present(other) {
                self.notify(other, Notification::PlayerNotFound { actor });
            }
        }
        if !removed.is_empty() {
            counter!("teleport_requests_resolved_total", "outcome" => "actor_left")
                .increment(removed.len() as u64);
            tracing::debug!(count = removed.len(), "Dropped requests of departed actor");
        }
        removed
    }

    /// Move the mover of a (requester, target, direction) triple to the anchor,
    /// subject to the cooldown and safety gates.
    ///
    /// Runs with the current configuration snapshot. This does not touch the
    /// registry; callers consume the request first.
    pub async fn attempt_relocation(
        &self,
        requester: ActorId,
        target: ActorId,
        direction: Direction,
    ) -> Result<RelocationOutcome> {
        let config = self.config();
        self.relocate_with(&config, requester, target, direction).await
    }

    async fn relocate_with(
        &self,
        config: &BrokerConfig,
        requester: ActorId,
        target: ActorId,
        direction: Direction,
    ) -> Result<RelocationOutcome> {
        let (mover, anchor) = match direction {
            Direction::RequesterToTarget => (requester, target),
            Direction::TargetToRequester => (target, requester),
        };

        // The slot stays claimed across the move so a concurrent accept that
        // moves the same actor sees the cooldown.
        let now = self.host.clock.now();
        let reservation = match self.cooldowns.try_reserve(mover, now, config.cooldown()) {
            Ok(reservation) => reservation,
            Err(remaining) => {
                tracing::debug!(
                    mover = %mover,
                    remaining_ms = remaining.as_millis() as u64,
                    "Relocation blocked by cooldown"
                );
                self.notify(mover, Notification::CooldownBlocked { remaining });
                let outcome = RelocationOutcome::CooldownBlocked { mover, remaining };
                return Ok(self.finish(outcome));
            }
        };

        let (Some(anchor_location), Some(mover_location)) = (
            self.host.session.location(anchor),
            self.host.session.location(mover),
        ) else {
            self.cooldowns.release(reservation);
            let missing = if self.host.session.is_present(anchor) {
                mover
            } else {
                anchor
            };
            let other = if missing == mover { anchor } else { mover };
            tracing::debug!(missing = %missing, "Relocation aborted, party left the session");
            self.notify(other, Notification::PlayerNotFound { actor: missing });
            return Ok(self.finish(RelocationOutcome::PlayerMissing { actor: missing }));
        };

        if config.safety_check_enabled && !self.host.safety.is_safe(&anchor_location) {
            self.cooldowns.release(reservation);
            tracing::debug!(
                mover = %mover,
                anchor = %anchor,
                world = %anchor_location.world,
                "Relocation blocked, destination unsafe"
            );
            self.notify(mover, Notification::UnsafeDestination { anchor });
            self.notify(anchor, Notification::UnsafeDestination { anchor });
            return Ok(self.finish(RelocationOutcome::UnsafeDestination { mover, anchor }));
        }

        let destination = anchor_location.facing_from(&mover_location);
        if let Err(e) = self.host.relocator.relocate(mover, &destination).await {
            self.cooldowns.release(reservation);
            counter!("teleport_relocations_total", "outcome" => "failed").increment(1);
            tracing::warn!(mover = %mover, anchor = %anchor, error = %e, "Relocation failed");
            self.notify(mover, Notification::RelocationFailed { mover });
            return Err(BrokerError::Relocation(e));
        }

        // Restamp with the time the move completed
        self.cooldowns.record_relocation(mover, self.host.clock.now());
        self.relocations.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            mover = %mover,
            anchor = %anchor,
            world = %destination.world,
            "Actor relocated"
        );

        self.notify(mover, Notification::Relocated { mover, anchor });
        self.notify(anchor, Notification::Relocated { mover, anchor });
        Ok(self.finish(RelocationOutcome::Relocated { mover, anchor }))
    }

    fn finish(&self, outcome: RelocationOutcome) -> RelocationOutcome {
        counter!("teleport_relocations_total", "outcome" => outcome.label()).increment(1);
        outcome
    }

    /// Purge every expired request and notify both parties of each.
    ///
    /// Called by the sweeper on every tick and lazily before accept, decline,
    /// cancel and listing.
    pub fn sweep_expired(&self) -> Vec<TeleportRequest> {
        let expired = self.registry.sweep_expired(self.host.clock.now());
        self.report_expired(&expired);
        expired
    }

    fn report_expired(&self, expired: &[TeleportRequest]) {
        if expired.is_empty() {
            return;
        }

        self.expired.fetch_add(expired.len() as u64, Ordering::Relaxed);
        counter!("teleport_requests_expired_total").increment(expired.len() as u64);

        for request in expired {
            tracing::debug!(
                requester = %request.requester,
                target = %request.target,
                expires_at = %request.expires_at,
                "Request expired"
            );
            let notification = Notification::RequestExpired {
                requester: request.requester,
                target: request.target,
            };
            for actor in [request.requester, request.target] {
                // Best effort: departed actors simply miss the message
                if self.host.session.is_present(actor) {
                    self.notify(actor, notification.clone());
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries and preferences
    // ------------------------------------------------------------------

    /// Requests waiting on `target`, newest first.
    pub fn pending_incoming(&self, target: ActorId) -> Vec<TeleportRequest> {
        self.sweep_expired();
        self.registry.list_incoming(target)
    }

    /// Requests `requester` has open, newest first.
    pub fn pending_outgoing(&self, requester: ActorId) -> Vec<TeleportRequest> {
        self.sweep_expired();
        self.registry.list_outgoing(requester)
    }

    /// Look up one pending request without consuming it.
    pub fn find_request(&self, target: ActorId, requester: ActorId) -> Option<TeleportRequest> {
        self.registry
            .find(target, requester)
            .filter(|request| !request.is_expired(self.host.clock.now()))
    }

    pub fn preference(&self, actor: ActorId) -> Preference {
        self.preferences.get(actor)
    }

    /// Set how `actor` wants incoming requests handled. Returns the previous preference.
    pub fn set_preference(&self, actor: ActorId, preference: Preference) -> Preference {
        self.preferences.set(actor, preference)
    }

    /// Time before `actor` may be relocated again under the current configuration.
    pub fn remaining_cooldown(&self, actor: ActorId) -> Duration {
        self.cooldowns
            .remaining_cooldown(actor, self.host.clock.now(), self.config().cooldown())
    }

    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            pending_requests: self.registry.len(),
            requests_created: self.requests_created.load(Ordering::Relaxed),
            relocations: self.relocations.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }

    fn notify(&self, actor: ActorId, notification: Notification) {
        self.host.notifier.notify(actor, notification);
    }
}

impl std::fmt::Debug for RequestBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBroker")
            .field("config", &*self.config())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
