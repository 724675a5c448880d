//! Background task purging expired requests.
//!
//! The sweeper owns no business logic. On every tick it asks the broker to
//! purge expired requests, which notifies the parties. It holds only a weak
//! reference to the broker, so a dropped broker ends the loop on the next tick.

use std::sync::Weak;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::broker::RequestBroker;

/// Spawner for the sweep loop.
pub struct Sweeper;

impl Sweeper {
    /// Spawn the sweep loop on `runtime`, ticking every `period` until
    /// `shutdown_token` is cancelled or the broker is dropped.
    pub fn spawn(
        runtime: &Handle,
        broker: Weak<RequestBroker>,
        period: Duration,
        shutdown_token: CancellationToken,
    ) -> SweeperHandle {
        let token = shutdown_token.clone();
        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; nothing can have expired yet
            interval.tick().await;

            tracing::info!(interval_ms = period.as_millis() as u64, "Request sweeper started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let Some(broker) = broker.upgrade() else {
                            tracing::debug!("Broker dropped, stopping sweeper");
                            break;
                        };
                        let expired = broker.sweep_expired();
                        if !expired.is_empty() {
                            tracing::debug!(count = expired.len(), "Swept expired requests");
                        }
                    }
                    _ = token.cancelled() => {
                        tracing::info!("Shutting down request sweeper");
                        break;
                    }
                }
            }
        });

        SweeperHandle {
            shutdown_token,
            handle: Some(handle),
        }
    }
}

/// Owned handle to a running sweeper.
///
/// Dropping the handle cancels the sweeper, so the timer never outlives its
/// owner even on abnormal teardown paths. Use [`stop`](Self::stop) to also
/// wait for the task to finish.
pub struct SweeperHandle {
    shutdown_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Cancel the sweeper and wait for its task to exit.
    pub async fn stop(mut self) {
        self.shutdown_token.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            tracing::error!(error = %e, "Request sweeper task terminated abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .is_none_or(|handle| handle.is_finished())
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::domain::{Direction, Location};
    use crate::host::Host;
    use crate::host::mock::{MockClock, MockRelocator, MockSession, RecordingNotifier};
    use std::sync::Arc;

    fn broker(
        sweep_interval_ms: u64,
    ) -> (Arc<RequestBroker>, MockSession, RecordingNotifier, MockClock) {
        let session = MockSession::new();
        let notifier = RecordingNotifier::new();
        let clock = MockClock::default();
        let host = Host::new(
            Arc::new(session.clone()),
            Arc::new(MockRelocator::with_session(session.clone())),
        )
        .with_notifier(Arc::new(notifier.clone()))
        .with_clock(Arc::new(clock.clone()));
        let config = BrokerConfig {
            request_expiration_ms: 5_000,
            sweep_interval_ms,
            ..Default::default()
        };
        (
            RequestBroker::new(config, host).unwrap(),
            session,
            notifier,
            clock,
        )
    }

    #[tokio::test]
    async fn test_sweeper_expires_requests_on_tick() {
        let (broker, session, notifier, clock) = broker(10);
        let a = session.join(Location::new("overworld", 0.0, 64.0, 0.0));
        let b = session.join(Location::new("overworld", 50.0, 64.0, 0.0));

        broker
            .create_request(a, b, Direction::RequesterToTarget)
            .await
            .unwrap();
        broker.start().unwrap();

        clock.advance(Duration::from_secs(6));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(broker.stats().pending_requests, 0);
        assert_eq!(notifier.count_kind("request_expired"), 2);
        broker.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_restartable() {
        let (broker, _, _, _) = broker(10);

        broker.start().unwrap();
        broker.start().unwrap();
        assert!(broker.is_running());

        broker.shutdown().await;
        broker.shutdown().await;
        assert!(!broker.is_running());

        broker.start().unwrap();
        assert!(broker.is_running());
        broker.shutdown().await;
    }

    #[tokio::test]
    async fn test_parent_token_stops_sweeper() {
        let (broker, _, _, _) = broker(10);
        let parent = CancellationToken::new();

        broker.start_with_parent(&parent).unwrap();
        parent.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!broker.is_running());
    }

    #[tokio::test]
    async fn test_dropping_handle_cancels_task() {
        let (broker, _, _, _) = broker(10);
        let token = CancellationToken::new();

        let handle = Sweeper::spawn(
            &Handle::current(),
            Arc::downgrade(&broker),
            Duration::from_millis(10),
            token.clone(),
        );
        drop(handle);

        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_sweeper_exits_when_broker_dropped() {
        let (broker, _, _, _) = broker(10);
        let weak = Arc::downgrade(&broker);

        let handle = Sweeper::spawn(
            &Handle::current(),
            weak,
            Duration::from_millis(10),
            CancellationToken::new(),
        );
        drop(broker);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(handle.is_finished());
    }
}
