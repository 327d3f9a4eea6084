//! Forwarder facade
//!
//! Owns the registry, the membership worker and the broadcaster of one
//! stream, and enforces the open/closed lifecycle.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tracing::Instrument;

use crate::error::{ForwardError, Result};
use crate::stats::{ForwarderStats, StatsSnapshot};

use super::action::{run_membership_worker, Action};
use super::broadcast::{run_broadcaster, Intake};
use super::config::ForwarderConfig;
use super::envelope::Envelope;
use super::handler::{DeliveryHandler, SharedHandler};
use super::registry::SubscriberRegistry;

/// Scalar forwarder state, behind a single lock
pub(crate) struct ForwarderState {
    /// Set once, never cleared
    pub(crate) closed: bool,
    pub(crate) actions: Option<mpsc::Sender<Action>>,
    pub(crate) intake: Option<mpsc::Sender<Intake>>,
}

/// State shared between the facade and the forwarder's tasks
pub(crate) struct Shared {
    pub(crate) id: String,
    pub(crate) config: ForwarderConfig,
    pub(crate) registry: SubscriberRegistry,
    pub(crate) state: RwLock<ForwarderState>,
    pub(crate) stats: Arc<ForwarderStats>,
    /// Raised when the close cascade has finished
    pub(crate) shutdown: watch::Sender<bool>,
}

impl Shared {
    pub(crate) async fn is_closed(&self) -> bool {
        self.state.read().await.closed
    }
}

/// Fans one producer's envelopes out to many subscribers
///
/// Cheap to clone; clones control the same forwarder. The forwarder's tasks
/// keep running until [`Forwarder::close`] is called, so every forwarder
/// must eventually be closed.
#[derive(Clone)]
pub struct Forwarder {
    shared: Arc<Shared>,
}

impl Forwarder {
    /// Create a forwarder with default configuration
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_config(id, ForwarderConfig::default())
    }

    /// Create a forwarder with custom configuration
    ///
    /// The forwarder's tasks log under a `forwarder` span whose parent is
    /// the span current at this call.
    pub fn with_config(id: impl Into<String>, config: ForwarderConfig) -> Self {
        let id = id.into();
        let (action_tx, action_rx) = mpsc::channel(config.action_capacity.max(1));
        // Rendezvous with the broadcaster: a push waits for its acknowledgement
        let (intake_tx, intake_rx) = mpsc::channel(1);
        let (shutdown, _) = watch::channel(false);

        let span = tracing::info_span!("forwarder", id = %id);
        let shared = Arc::new(Shared {
            id,
            config,
            registry: SubscriberRegistry::new(),
            state: RwLock::new(ForwarderState {
                closed: false,
                actions: Some(action_tx),
                intake: Some(intake_tx),
            }),
            stats: Arc::new(ForwarderStats::new()),
            shutdown,
        });

        tokio::spawn(run_broadcaster(Arc::clone(&shared), intake_rx).instrument(span.clone()));
        tokio::spawn(run_membership_worker(Arc::clone(&shared), action_rx).instrument(span));

        tracing::info!(forwarder = %shared.id, "Forwarder created");
        Self { shared }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn config(&self) -> &ForwarderConfig {
        &self.shared.config
    }

    /// Publish an envelope to every subscriber
    ///
    /// Returns once the broadcaster has taken the envelope. Rejected
    /// (logged, not delivered) if the forwarder is closed.
    pub async fn push(&self, envelope: Envelope) {
        if let Err(e) = self.try_push(envelope).await {
            tracing::warn!(forwarder = %self.shared.id, error = %e, "Push rejected");
        }
    }

    /// Like [`Forwarder::push`], but reports a rejection
    pub async fn try_push(&self, envelope: Envelope) -> Result<()> {
        let intake = {
            let state = self.shared.state.read().await;
            if state.closed {
                None
            } else {
                state.intake.clone()
            }
        };
        let Some(intake) = intake else {
            self.shared.stats.record_rejected();
            return Err(self.closed_error());
        };

        let (accepted, ack) = oneshot::channel();
        if intake.send(Intake { envelope, accepted }).await.is_err() {
            self.shared.stats.record_rejected();
            return Err(self.closed_error());
        }

        match ack.await {
            Ok(true) => Ok(()),
            // The broadcaster counted the rejection itself
            Ok(false) => Err(self.closed_error()),
            Err(_) => {
                self.shared.stats.record_rejected();
                Err(self.closed_error())
            }
        }
    }

    /// Attach a subscriber
    ///
    /// Replaces any subscriber already registered under `id`. The change is
    /// applied asynchronously, in submission order; see [`Forwarder::barrier`].
    pub async fn register<H: DeliveryHandler>(&self, id: impl Into<String>, handler: H) {
        self.register_shared(id, Arc::new(handler)).await;
    }

    /// Attach a subscriber with an already shared handler
    pub async fn register_shared(&self, id: impl Into<String>, handler: SharedHandler) {
        let id = id.into();
        if let Err(e) = self.try_register_shared(id.clone(), handler).await {
            tracing::warn!(forwarder = %self.shared.id, subscriber = %id, error = %e, "Register rejected");
        }
    }

    /// Like [`Forwarder::register`], but reports a rejection
    pub async fn try_register<H: DeliveryHandler>(
        &self,
        id: impl Into<String>,
        handler: H,
    ) -> Result<()> {
        self.try_register_shared(id, Arc::new(handler)).await
    }

    /// Like [`Forwarder::register_shared`], but reports a rejection
    pub async fn try_register_shared(
        &self,
        id: impl Into<String>,
        handler: SharedHandler,
    ) -> Result<()> {
        self.submit(Action::Add {
            id: id.into(),
            handler,
        })
        .await
    }

    /// Detach a subscriber; no-op if it is not registered
    pub async fn unregister(&self, id: &str) {
        if let Err(e) = self.try_unregister(id).await {
            tracing::warn!(forwarder = %self.shared.id, subscriber = %id, error = %e, "Unregister rejected");
        }
    }

    /// Like [`Forwarder::unregister`], but reports a rejection
    pub async fn try_unregister(&self, id: &str) -> Result<()> {
        self.submit(Action::Remove { id: id.to_string() }).await
    }

    /// Close the forwarder, revoking every subscriber
    ///
    /// Idempotent. Returns once the request is queued; use
    /// [`Forwarder::closed`] to wait for the cascade to finish.
    pub async fn close(&self) {
        if self.submit(Action::Close).await.is_ok() {
            tracing::debug!(forwarder = %self.shared.id, "Close requested");
        }
    }

    /// Wait until the forwarder is fully closed
    pub async fn closed(&self) {
        let mut shutdown = self.shared.shutdown.subscribe();
        let _ = shutdown.wait_for(|done| *done).await;
    }

    /// Wait until every membership change submitted so far has been applied
    ///
    /// On a closed forwarder, waits for the close cascade instead.
    pub async fn barrier(&self) {
        let (ack, applied) = oneshot::channel();
        match self.submit(Action::Barrier { ack }).await {
            Ok(()) => {
                // Dropped unanswered only if a queued close ended the worker
                if applied.await.is_err() {
                    self.closed().await;
                }
            }
            Err(_) => self.closed().await,
        }
    }

    /// Whether the forwarder has closed
    pub async fn is_closed(&self) -> bool {
        self.shared.is_closed().await
    }

    /// Register every current subscriber on `target`
    ///
    /// Handler bindings are carried over as they are; this forwarder keeps
    /// its own subscribers until it is closed, so nobody sees a gap. Returns
    /// the number of subscribers transferred.
    pub async fn transfer(&self, target: &Forwarder) -> Result<usize> {
        if self.is_closed().await {
            tracing::warn!(forwarder = %self.shared.id, "Forwarder closed, transfer ignored");
            return Err(self.closed_error());
        }

        let mut moved = 0;
        for (id, entry) in self.shared.registry.capture() {
            // Revoked after the capture
            let Some(handler) = entry.handler().await else {
                continue;
            };
            target.try_register_shared(id, handler).await?;
            moved += 1;
        }

        tracing::info!(
            from = %self.shared.id,
            to = %target.id(),
            subscribers = moved,
            "Subscribers transferred"
        );
        Ok(moved)
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Ids of the registered subscribers
    pub fn subscriber_ids(&self) -> Vec<String> {
        self.shared.registry.keys()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.shared.registry.contains(id)
    }

    /// Point-in-time statistics
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    async fn submit(&self, action: Action) -> Result<()> {
        let actions = {
            let state = self.shared.state.read().await;
            if state.closed {
                None
            } else {
                state.actions.clone()
            }
        };
        let Some(actions) = actions else {
            return Err(self.closed_error());
        };

        actions
            .send(action)
            .await
            .map_err(|_| self.closed_error())
    }

    fn closed_error(&self) -> ForwardError {
        ForwardError::Closed(self.shared.id.clone())
    }
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("id", &self.shared.id)
            .field("subscribers", &self.shared.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::forward::handler::HandlerError;

    fn collector() -> (impl DeliveryHandler, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = move |env: Envelope| -> std::result::Result<(), HandlerError> {
            tx.send(env).map_err(|e| e.to_string().into())
        };
        (handler, rx)
    }

    fn packet(seat: u32) -> Envelope {
        Envelope::audio(seat, vec![seat as u8; 4])
    }

    fn scaled() -> ForwarderConfig {
        ForwarderConfig::default().idle_window(Duration::from_millis(100))
    }

    async fn seats(rx: &mut mpsc::UnboundedReceiver<Envelope>, n: usize) -> Vec<u32> {
        let mut seats = Vec::with_capacity(n);
        for _ in 0..n {
            seats.push(rx.recv().await.unwrap().seat());
        }
        seats
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_replay_between_bursts() {
        let fwd = Forwarder::with_config("mixed", scaled());
        let (handler, mut seen) = collector();
        fwd.register("alice", handler).await;
        fwd.barrier().await;

        for seat in 1..=3 {
            fwd.push(packet(seat)).await;
        }
        // One idle window elapses inside the gap
        tokio::time::sleep(Duration::from_millis(150)).await;
        fwd.push(packet(4)).await;
        fwd.push(packet(5)).await;

        assert_eq!(seats(&mut seen, 6).await, vec![1, 2, 3, 3, 4, 5]);
        assert_eq!(fwd.stats().replayed, 1);

        fwd.close().await;
        fwd.closed().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_replay_repeats_per_window() {
        let fwd = Forwarder::with_config("mixed", scaled());
        let (handler, mut seen) = collector();
        fwd.register("alice", handler).await;
        fwd.barrier().await;

        for seat in 1..=3 {
            fwd.push(packet(seat)).await;
        }
        // Windows end at 100ms and 200ms
        tokio::time::sleep(Duration::from_millis(250)).await;
        fwd.push(packet(4)).await;
        fwd.push(packet(5)).await;

        assert_eq!(seats(&mut seen, 7).await, vec![1, 2, 3, 3, 3, 4, 5]);

        fwd.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_preserved_per_subscriber() {
        let fwd = Forwarder::new("video");
        let mut receivers = Vec::new();
        for id in ["a", "b", "c"] {
            let (handler, rx) = collector();
            fwd.register(id, handler).await;
            receivers.push(rx);
        }
        fwd.barrier().await;
        assert_eq!(fwd.subscriber_count(), 3);

        for seat in 0..500 {
            fwd.push(packet(seat)).await;
        }

        let expected: Vec<u32> = (0..500).collect();
        for rx in receivers.iter_mut() {
            assert_eq!(seats(rx, 500).await, expected);
        }

        let stats = fwd.stats();
        assert_eq!(stats.pushed, 500);
        assert_eq!(stats.enqueued, 1500);
        assert_eq!(stats.bytes_pushed, 2000);

        fwd.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_replaces_existing() {
        let fwd = Forwarder::new("mixed");
        let (first, mut seen_first) = collector();
        let (second, mut seen_second) = collector();

        fwd.register("alice", first).await;
        fwd.barrier().await;
        fwd.push(packet(1)).await;
        assert_eq!(seen_first.recv().await.unwrap().seat(), 1);

        fwd.register("alice", second).await;
        fwd.barrier().await;
        fwd.push(packet(2)).await;
        assert_eq!(seen_second.recv().await.unwrap().seat(), 2);

        // Old handler was dropped on replacement and never called again
        assert!(seen_first.recv().await.is_none());
        assert_eq!(fwd.subscriber_count(), 1);

        let stats = fwd.stats();
        assert_eq!(stats.subscribers_added, 2);
        assert_eq!(stats.subscribers_removed, 1);

        fwd.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister() {
        let fwd = Forwarder::new("mixed");
        let (handler, mut seen) = collector();

        fwd.register("alice", handler).await;
        fwd.barrier().await;
        assert!(fwd.contains("alice"));

        fwd.unregister("alice").await;
        fwd.unregister("alice").await;
        fwd.unregister("nobody").await;
        fwd.barrier().await;
        assert!(!fwd.contains("alice"));

        fwd.push(packet(1)).await;
        assert!(seen.recv().await.is_none());
        assert_eq!(fwd.stats().subscribers_removed, 1);

        fwd.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_failure_is_isolated() {
        let fwd = Forwarder::new("mixed");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let (steady, mut seen) = collector();

        fwd.register("flaky", move |env: Envelope| -> std::result::Result<(), HandlerError> {
            counter.fetch_add(1, Ordering::SeqCst);
            if env.seat() == 2 {
                Err("track closed".into())
            } else {
                Ok(())
            }
        })
        .await;
        fwd.register("steady", steady).await;
        fwd.barrier().await;

        for seat in 1..=3 {
            fwd.push(packet(seat)).await;
        }
        assert_eq!(seats(&mut seen, 3).await, vec![1, 2, 3]);
        while fwd.stats().handler_failures == 0 {
            tokio::task::yield_now().await;
        }

        fwd.push(packet(4)).await;
        assert_eq!(seen.recv().await.unwrap().seat(), 4);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // Stays registered, but dead until registered again
        assert!(fwd.contains("flaky"));

        let (revived, mut seen_revived) = collector();
        fwd.register("flaky", revived).await;
        fwd.barrier().await;
        fwd.push(packet(5)).await;
        assert_eq!(seen_revived.recv().await.unwrap().seat(), 5);
        assert_eq!(seen.recv().await.unwrap().seat(), 5);

        fwd.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent() {
        let fwd = Forwarder::new("mixed");
        let (a, mut seen_a) = collector();
        let (b, mut seen_b) = collector();
        fwd.register("a", a).await;
        fwd.register("b", b).await;
        fwd.barrier().await;

        fwd.close().await;
        fwd.close().await;
        fwd.closed().await;
        fwd.close().await;

        assert!(fwd.is_closed().await);
        assert_eq!(fwd.subscriber_count(), 0);
        assert_eq!(fwd.stats().subscribers_removed, 2);
        assert!(seen_a.recv().await.is_none());
        assert!(seen_b.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_after_close_are_rejected() {
        let fwd = Forwarder::new("mixed");
        fwd.close().await;
        fwd.closed().await;

        let closed = Err(ForwardError::Closed("mixed".into()));
        assert_eq!(fwd.try_push(packet(1)).await, closed);
        fwd.push(packet(2)).await;

        let (handler, mut seen) = collector();
        tokio_test::assert_err!(fwd.try_register("a", handler).await);
        let (handler, _) = collector();
        fwd.register("b", handler).await;
        tokio_test::assert_err!(fwd.try_unregister("a").await);
        fwd.unregister("b").await;
        fwd.barrier().await;

        assert_eq!(fwd.subscriber_count(), 0);
        assert!(seen.recv().await.is_none());

        let stats = fwd.stats();
        assert_eq!(stats.pushed, 0);
        assert_eq!(stats.rejected, 2);
        assert_eq!(stats.subscribers_added, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transfer_keeps_handlers() {
        let old = Forwarder::new("mixed");
        let (x, mut seen_x) = collector();
        let (y, mut seen_y) = collector();
        old.register("x", x).await;
        old.register("y", y).await;
        old.barrier().await;

        let new = Forwarder::new("mixed-2");
        let moved = tokio_test::assert_ok!(old.transfer(&new).await);
        assert_eq!(moved, 2);
        new.barrier().await;

        let mut ids = new.subscriber_ids();
        ids.sort();
        assert_eq!(ids, vec!["x", "y"]);

        old.close().await;
        old.closed().await;
        assert_eq!(old.transfer(&new).await, Err(ForwardError::Closed("mixed".into())));

        new.push(packet(9)).await;
        assert_eq!(seen_x.recv().await.unwrap().seat(), 9);
        assert_eq!(seen_y.recv().await.unwrap().seat(), 9);

        new.close().await;
    }
}
