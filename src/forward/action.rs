//! Membership action queue
//!
//! Every structural change to a forwarder's registry goes through one
//! bounded command queue drained by a single worker task. Callers only
//! enqueue; the worker is the sole writer of the registry and the sole owner
//! of each subscriber's done signal, which gives membership changes a total
//! order.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::forwarder::Shared;
use super::handler::SharedHandler;
use super::registry::SubscriberEntry;
use super::relay::{self, RelaySettings};

/// Membership command
pub(crate) enum Action {
    /// Install a subscriber, replacing any entry with the same id
    Add { id: String, handler: SharedHandler },
    /// Revoke a subscriber if present
    Remove { id: String },
    /// Close the forwarder and revoke everyone
    Close,
    /// Acknowledge once every earlier command has been applied
    Barrier { ack: oneshot::Sender<()> },
}

impl Action {
    fn name(&self) -> &'static str {
        match self {
            Action::Add { .. } => "add",
            Action::Remove { .. } => "remove",
            Action::Close => "close",
            Action::Barrier { .. } => "barrier",
        }
    }
}

/// Drain the command queue until the forwarder closes
pub(crate) async fn run_membership_worker(shared: Arc<Shared>, mut actions: mpsc::Receiver<Action>) {
    while let Some(action) = actions.recv().await {
        tracing::trace!(action = action.name(), "Applying membership action");

        match action {
            Action::Add { id, handler } => add_subscriber(&shared, &id, handler).await,
            Action::Remove { id } => remove_subscriber(&shared, &id).await,
            Action::Barrier { ack } => {
                let _ = ack.send(());
            }
            Action::Close => {
                close(&shared).await;
                break;
            }
        }
    }

    tracing::debug!(forwarder = %shared.id, "Membership worker stopped");
}

async fn add_subscriber(shared: &Shared, id: &str, handler: SharedHandler) {
    if shared.is_closed().await {
        tracing::info!(forwarder = %shared.id, subscriber = %id, "Forwarder closed, add ignored");
        return;
    }

    // Replace, never merge: the old queue and handler are fully revoked first
    if shared.registry.contains(id) {
        remove_subscriber(shared, id).await;
    }

    let config = &shared.config;
    let (entry, receivers) = SubscriberEntry::new(id, handler, config.delivery_capacity);
    let settings = RelaySettings {
        idle_window: config.replays().then_some(config.idle_window),
        capacity: config.relay_capacity,
    };

    relay::spawn(id, receivers, settings, Arc::clone(&shared.stats));
    shared.registry.insert(entry);
    shared.stats.record_added();

    tracing::info!(
        forwarder = %shared.id,
        subscriber = %id,
        subscribers = shared.registry.len(),
        "Subscriber added"
    );
}

async fn remove_subscriber(shared: &Shared, id: &str) {
    let Some(entry) = shared.registry.remove(id) else {
        return;
    };

    entry.revoke().await;
    shared.stats.record_removed();

    tracing::info!(
        forwarder = %shared.id,
        subscriber = %id,
        subscribers = shared.registry.len(),
        "Subscriber removed"
    );
}

async fn close(shared: &Shared) {
    {
        let mut state = shared.state.write().await;
        if state.closed {
            return;
        }
        state.closed = true;
        state.actions = None;
        state.intake = None;
    }

    let ids = shared.registry.keys();
    let count = ids.len();
    for id in ids {
        remove_subscriber(shared, &id).await;
    }

    tracing::info!(forwarder = %shared.id, revoked = count, "Forwarder closed");
    shared.shutdown.send_replace(true);
}
