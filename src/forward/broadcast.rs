//! Fan-out broadcaster
//!
//! A single task takes envelopes from the producer one at a time and copies
//! each into every registered subscriber's delivery queue.
//!
//! There is no drop-on-full: if one subscriber's queue is full the
//! broadcaster waits for it, which in turn holds up the producer's next push
//! and every other subscriber. Revoking that subscriber releases the wait.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::envelope::Envelope;
use super::forwarder::Shared;
use super::registry::Enqueue;

/// Envelope handed over by the producer
///
/// `accepted` reports whether the broadcaster took the envelope (`true`) or
/// rejected it because the forwarder closed meanwhile.
pub(crate) struct Intake {
    pub(crate) envelope: Envelope,
    pub(crate) accepted: oneshot::Sender<bool>,
}

/// Broadcast loop; ends once every intake handle is gone
pub(crate) async fn run_broadcaster(shared: Arc<Shared>, mut intake: mpsc::Receiver<Intake>) {
    while let Some(Intake { envelope, accepted }) = intake.recv().await {
        if shared.is_closed().await {
            tracing::debug!(forwarder = %shared.id, "Forwarder closed, envelope dropped");
            shared.stats.record_rejected();
            let _ = accepted.send(false);
            continue;
        }

        let _ = accepted.send(true);
        shared.stats.record_push(envelope.len());
        fan_out(&shared, envelope).await;
    }

    tracing::debug!(forwarder = %shared.id, "Broadcaster stopped");
}

async fn fan_out(shared: &Shared, envelope: Envelope) {
    for entry in shared.registry.snapshot() {
        match entry.enqueue(envelope.clone()).await {
            Enqueue::Queued => shared.stats.record_enqueued(),
            Enqueue::Revoked => {
                tracing::trace!(subscriber = %entry.id(), "Subscriber revoked, skipped");
            }
            Enqueue::Dead => {
                tracing::trace!(subscriber = %entry.id(), "Subscriber relay stopped, skipped");
            }
        }
    }
}
