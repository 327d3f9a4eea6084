//! Subscriber registry
//!
//! Concurrent map of subscriber id to its delivery queue and handler. The
//! broadcaster reads it, the membership worker is its only writer, and
//! lifecycle operations snapshot it; none of them need an outer lock.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, watch};

use super::envelope::Envelope;
use super::handler::{HandlerSlot, SharedHandler};

/// Outcome of handing an envelope to one subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueue {
    /// Envelope is in the delivery queue
    Queued,
    /// Subscriber was revoked before or while waiting for space
    Revoked,
    /// Subscriber's relay is gone (handler failed or detached)
    Dead,
}

/// One registered subscriber
///
/// Clones share the same queue, handler slot and done signal. The done
/// signal is owned by the membership worker: only it revokes entries.
#[derive(Clone)]
pub struct SubscriberEntry {
    id: Arc<str>,
    sender: mpsc::Sender<Envelope>,
    handler: HandlerSlot,
    done: Arc<watch::Sender<bool>>,
}

/// Receiving half of a new entry, consumed by its keep-alive relay
pub(crate) struct EntryReceivers {
    pub(crate) delivery: mpsc::Receiver<Envelope>,
    pub(crate) done: watch::Receiver<bool>,
    pub(crate) handler: HandlerSlot,
}

impl SubscriberEntry {
    /// Create an entry with a fresh delivery queue
    pub(crate) fn new(
        id: &str,
        handler: SharedHandler,
        capacity: usize,
    ) -> (Self, EntryReceivers) {
        let (sender, delivery) = mpsc::channel(capacity.max(1));
        let (done, done_rx) = watch::channel(false);
        let handler = HandlerSlot::new(handler);

        let entry = Self {
            id: Arc::from(id),
            sender,
            handler: handler.clone(),
            done: Arc::new(done),
        };
        let receivers = EntryReceivers {
            delivery,
            done: done_rx,
            handler,
        };

        (entry, receivers)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the entry has been revoked
    pub fn is_revoked(&self) -> bool {
        *self.done.borrow()
    }

    /// Currently bound handler
    pub async fn handler(&self) -> Option<SharedHandler> {
        self.handler.current().await
    }

    /// Number of envelopes waiting in the delivery queue
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Whether the relay has stopped taking envelopes
    ///
    /// True once the entry is revoked or its handler failed and the relay
    /// noticed.
    pub fn is_stopped(&self) -> bool {
        self.sender.is_closed()
    }

    /// Wait until the relay stops taking envelopes
    pub async fn stopped(&self) {
        self.sender.closed().await
    }

    /// Enqueue an envelope, waiting for space if the queue is full
    ///
    /// The wait is abandoned as soon as the entry is revoked, so a removed
    /// subscriber never holds up the broadcaster.
    pub(crate) async fn enqueue(&self, envelope: Envelope) -> Enqueue {
        if self.is_revoked() {
            return Enqueue::Revoked;
        }

        let mut done = self.done.subscribe();
        tokio::select! {
            biased;
            result = self.sender.send(envelope) => match result {
                Ok(()) => Enqueue::Queued,
                Err(_) => Enqueue::Dead,
            },
            _ = revoked(&mut done) => Enqueue::Revoked,
        }
    }

    /// Revoke the entry: stop writers, end its relay, unbind its handler
    ///
    /// Never waits on the handler itself. Returns once no new invocation can
    /// be dispatched; one already running finishes on its own.
    pub(crate) async fn revoke(&self) {
        self.done.send_replace(true);
        self.handler.detach().await;
    }
}

impl std::fmt::Debug for SubscriberEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberEntry")
            .field("id", &self.id)
            .field("queued", &self.queued())
            .field("revoked", &self.is_revoked())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Resolve once the done signal is raised or its owner is gone
pub(crate) async fn revoked(done: &mut watch::Receiver<bool>) {
    if done.wait_for(|revoked| *revoked).await.is_err() {
        tracing::trace!("done signal dropped");
    }
}

/// Concurrent subscriber registry
#[derive(Default)]
pub struct SubscriberRegistry {
    entries: DashMap<String, SubscriberEntry>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a subscriber entry
    pub fn get(&self, id: &str) -> Option<SubscriberEntry> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    /// Insert an entry, returning the one it replaced
    pub(crate) fn insert(&self, entry: SubscriberEntry) -> Option<SubscriberEntry> {
        self.entries.insert(entry.id().to_string(), entry)
    }

    /// Remove an entry
    pub(crate) fn remove(&self, id: &str) -> Option<SubscriberEntry> {
        self.entries.remove(id).map(|(_, entry)| entry)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Ids of all registered subscribers
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Visit entries until the callback breaks
    ///
    /// The callback runs while a shard guard is held; it must not touch the
    /// registry itself.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&str, &SubscriberEntry) -> ControlFlow<()>,
    {
        for entry in self.entries.iter() {
            if f(entry.key(), entry.value()).is_break() {
                break;
            }
        }
    }

    /// Entries in iteration order, with no guard held
    pub fn snapshot(&self) -> Vec<SubscriberEntry> {
        self.entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Copy of the registry as an ordinary map
    pub fn capture(&self) -> HashMap<String, SubscriberEntry> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::handler::HandlerError;

    fn noop() -> SharedHandler {
        Arc::new(|_env: Envelope| -> Result<(), HandlerError> { Ok(()) })
    }

    #[test]
    fn test_insert_get_remove() {
        let registry = SubscriberRegistry::new();
        let (entry, _rx) = SubscriberEntry::new("alice", noop(), 4);

        assert!(registry.insert(entry).is_none());
        assert!(registry.contains("alice"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("alice").unwrap().id(), "alice");

        assert!(registry.remove("alice").is_some());
        assert!(registry.remove("alice").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_insert_replaces() {
        let registry = SubscriberRegistry::new();
        let (first, _rx1) = SubscriberEntry::new("bob", noop(), 4);
        let (second, _rx2) = SubscriberEntry::new("bob", noop(), 4);

        registry.insert(first);
        let old = registry.insert(second);

        assert!(old.is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_for_each_early_exit() {
        let registry = SubscriberRegistry::new();
        let mut receivers = Vec::new();
        for id in ["a", "b", "c", "d"] {
            let (entry, rx) = SubscriberEntry::new(id, noop(), 4);
            registry.insert(entry);
            receivers.push(rx);
        }

        let mut visited = 0;
        registry.for_each(|_, _| {
            visited += 1;
            if visited == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(visited, 2);

        let mut keys = registry.keys();
        keys.sort();
        assert_eq!(keys, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_capture_is_detached() {
        let registry = SubscriberRegistry::new();
        let (entry, _rx) = SubscriberEntry::new("carol", noop(), 4);
        registry.insert(entry);

        let captured = registry.capture();
        registry.remove("carol");

        assert!(captured.contains_key("carol"));
        assert!(registry.capture().is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_and_revoke() {
        let (entry, mut rx) = SubscriberEntry::new("dave", noop(), 1);

        assert_eq!(entry.enqueue(Envelope::audio(0, vec![1u8])).await, Enqueue::Queued);
        assert_eq!(entry.queued(), 1);

        // Queue is full; revoking releases the waiting writer
        let writer = entry.clone();
        let pending =
            tokio::spawn(async move { writer.enqueue(Envelope::audio(0, vec![2u8])).await });
        tokio::task::yield_now().await;
        entry.revoke().await;

        assert_eq!(pending.await.unwrap(), Enqueue::Revoked);
        assert!(entry.is_revoked());
        assert!(entry.handler().await.is_none());
        assert!(*rx.done.borrow());
        assert_eq!(rx.delivery.recv().await.unwrap().payload().as_ref(), &[1u8]);

        // Revoked entries take nothing
        assert_eq!(entry.enqueue(Envelope::audio(0, vec![3u8])).await, Enqueue::Revoked);
    }

    #[tokio::test]
    async fn test_enqueue_dead_relay() {
        let (entry, rx) = SubscriberEntry::new("erin", noop(), 4);
        drop(rx);

        assert!(entry.is_stopped());
        assert_eq!(entry.enqueue(Envelope::video(0, vec![1u8])).await, Enqueue::Dead);
    }
}
