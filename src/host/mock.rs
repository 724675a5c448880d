//! In-memory host doubles for tests and examples.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::{Clock, Notification, Notifier, Relocator, SafetyChecker, SessionDirectory};
use crate::domain::{ActorId, Location};

/// Session of actors standing at fixed locations.
///
/// # Example
/// ```ignore
/// let session = MockSession::new();
/// let alice = session.join(Location::new("overworld", 0.0, 64.0, 0.0));
/// assert!(session.is_present(alice));
/// ```
#[derive(Clone, Default)]
pub struct MockSession {
    actors: Arc<Mutex<HashMap<ActorId, Location>>>,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fresh actor at `location` and return its id.
    pub fn join(&self, location: Location) -> ActorId {
        let actor = ActorId::new();
        self.actors.lock().insert(actor, location);
        actor
    }

    pub fn leave(&self, actor: ActorId) {
        self.actors.lock().remove(&actor);
    }

    /// Place an actor, adding it if absent.
    pub fn place(&self, actor: ActorId, location: Location) {
        self.actors.lock().insert(actor, location);
    }
}

impl SessionDirectory for MockSession {
    fn is_present(&self, actor: ActorId) -> bool {
        self.actors.lock().contains_key(&actor)
    }

    fn location(&self, actor: ActorId) -> Option<Location> {
        self.actors.lock().get(&actor).cloned()
    }
}

/// Record of a call made to the mock relocator.
#[derive(Debug, Clone, PartialEq)]
pub struct RelocationCall {
    pub mover: ActorId,
    pub destination: Location,
}

/// Scripted outcome for the next relocation.
enum Script {
    Fail(String),
    /// Wait for the trigger before succeeding
    Hold(oneshot::Receiver<()>),
}

/// Relocator that records calls and, when attached to a [`MockSession`],
/// actually moves the actor there.
#[derive(Clone, Default)]
pub struct MockRelocator {
    session: Option<MockSession>,
    scripts: Arc<Mutex<VecDeque<Script>>>,
    calls: Arc<Mutex<Vec<RelocationCall>>>,
    in_flight: Arc<AtomicUsize>,
}

impl MockRelocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relocator that applies successful moves to `session`.
    pub fn with_session(session: MockSession) -> Self {
        Self {
            session: Some(session),
            ..Self::default()
        }
    }

    /// Make the next relocation fail with `message`.
    pub fn fail_next(&self, message: &str) {
        self.scripts
            .lock()
            .push_back(Script::Fail(message.to_string()));
    }

    /// Make the next relocation block until the returned sender fires (or is dropped).
    pub fn hold_next(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.scripts.lock().push_back(Script::Hold(rx));
        tx
    }

    pub fn get_calls(&self) -> Vec<RelocationCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of relocations currently executing.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Relocator for MockRelocator {
    async fn relocate(&self, mover: ActorId, destination: &Location) -> anyhow::Result<()> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlightGuard {
            in_flight: self.in_flight.clone(),
        };

        self.calls.lock().push(RelocationCall {
            mover,
            destination: destination.clone(),
        });

        let script = self.scripts.lock().pop_front();
        match script {
            Some(Script::Fail(message)) => return Err(anyhow::anyhow!(message)),
            Some(Script::Hold(trigger)) => {
                // Proceed whether the trigger fired or was dropped
                let _ = trigger.await;
            }
            None => {}
        }

        if let Some(session) = &self.session {
            session.place(mover, destination.clone());
        }
        Ok(())
    }
}

/// Decrements the in-flight counter even if the relocation future is dropped.
struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Safety checker that rejects configured worlds.
#[derive(Clone, Default)]
pub struct MockSafetyChecker {
    unsafe_worlds: Arc<Mutex<HashSet<String>>>,
    checks: Arc<AtomicUsize>,
}

impl MockSafetyChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_unsafe(&self, world: &str) {
        self.unsafe_worlds.lock().insert(world.to_string());
    }

    pub fn mark_safe(&self, world: &str) {
        self.unsafe_worlds.lock().remove(world);
    }

    pub fn check_count(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

impl SafetyChecker for MockSafetyChecker {
    fn is_safe(&self, destination: &Location) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        !self.unsafe_worlds.lock().contains(&destination.world)
    }
}

/// Notifier that keeps every event for later assertions.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<(ActorId, Notification)>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events delivered to `actor`, in order.
    pub fn for_actor(&self, actor: ActorId) -> Vec<Notification> {
        self.events
            .lock()
            .iter()
            .filter(|(to, _)| *to == actor)
            .map(|(_, notification)| notification.clone())
            .collect()
    }

    /// Number of events of the given kind (see [`Notification::kind`]).
    pub fn count_kind(&self, kind: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(_, notification)| notification.kind() == kind)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, actor: ActorId, notification: Notification) {
        self.events.lock().push((actor, notification));
    }
}

/// Manually advanced clock.
#[derive(Clone)]
pub struct MockClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock();
        *now += delta;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_relocator_moves_actor_in_session() {
        let session = MockSession::new();
        let actor = session.join(Location::new("overworld", 0.0, 64.0, 0.0));
        let relocator = MockRelocator::with_session(session.clone());

        let destination = Location::new("nether", 8.0, 70.0, 8.0);
        relocator.relocate(actor, &destination).await.unwrap();

        assert_eq!(session.location(actor), Some(destination.clone()));
        assert_eq!(
            relocator.get_calls(),
            vec![RelocationCall {
                mover: actor,
                destination
            }]
        );
    }

    #[tokio::test]
    async fn test_relocator_scripted_failure_leaves_actor() {
        let session = MockSession::new();
        let start = Location::new("overworld", 0.0, 64.0, 0.0);
        let actor = session.join(start.clone());
        let relocator = MockRelocator::with_session(session.clone());

        relocator.fail_next("world unloaded");
        let result = relocator
            .relocate(actor, &Location::new("end", 0.0, 0.0, 0.0))
            .await;

        assert!(result.is_err());
        assert_eq!(session.location(actor), Some(start));
        assert_eq!(relocator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_relocator_hold_blocks_until_triggered() {
        let relocator = MockRelocator::new();
        let trigger = relocator.hold_next();

        let relocator_clone = relocator.clone();
        let handle = tokio::spawn(async move {
            relocator_clone
                .relocate(ActorId::new(), &Location::new("overworld", 0.0, 0.0, 0.0))
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());
        assert_eq!(relocator.in_flight_count(), 1);

        trigger.send(()).unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(relocator.in_flight_count(), 0);
    }

    #[test]
    fn test_clock_advances() {
        let start = Utc::now();
        let clock = MockClock::new(start);
        clock.advance(Duration::from_secs(6));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(6));
    }

    #[test]
    fn test_safety_checker_by_world() {
        let checker = MockSafetyChecker::new();
        checker.mark_unsafe("lava_lake");
        assert!(!checker.is_safe(&Location::new("lava_lake", 0.0, 0.0, 0.0)));
        assert!(checker.is_safe(&Location::new("overworld", 0.0, 0.0, 0.0)));
        assert_eq!(checker.check_count(), 2);
    }
}
