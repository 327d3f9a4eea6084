//! Per-subscriber keep-alive relay
//!
//! Each subscriber gets two tasks:
//!
//! ```text
//!  delivery queue ──► idle relay ──► relay queue ──► handler loop ──► handler()
//!                     (replays last                  (one envelope
//!                      envelope on idle)              at a time)
//! ```
//!
//! The idle relay forwards every fresh envelope and remembers it. Whenever
//! the idle window elapses with nothing new, it forwards the remembered
//! envelope again and re-arms, so a silent producer yields a steady replay
//! cadence instead of starving fixed-rate track writers downstream.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tracing::Instrument;

use crate::stats::ForwarderStats;

use super::envelope::Envelope;
use super::handler::HandlerSlot;
use super::registry::{revoked, EntryReceivers};

/// Relay settings for one subscriber
#[derive(Debug, Clone)]
pub(crate) struct RelaySettings {
    /// Replay interval, or `None` to never replay
    pub(crate) idle_window: Option<Duration>,
    pub(crate) capacity: usize,
}

/// Spawn the idle relay and handler loop for one subscriber
///
/// Both tasks end on their own: the idle relay when the entry is revoked or
/// the handler loop is gone, the handler loop when its input closes or the
/// handler fails or is detached.
pub(crate) fn spawn(
    subscriber: &str,
    receivers: EntryReceivers,
    settings: RelaySettings,
    stats: Arc<ForwarderStats>,
) {
    let span = tracing::debug_span!("subscriber", id = %subscriber);
    let (relay_tx, relay_rx) = mpsc::channel(settings.capacity.max(1));

    tokio::spawn(
        run_idle_relay(
            receivers.delivery,
            receivers.done,
            relay_tx,
            settings.idle_window,
            Arc::clone(&stats),
        )
        .instrument(span.clone()),
    );
    tokio::spawn(
        run_handler_loop(subscriber.to_string(), relay_rx, receivers.handler, stats)
            .instrument(span),
    );
}

/// Stage A: forward fresh envelopes, replay the last one on idle
async fn run_idle_relay(
    mut delivery: mpsc::Receiver<Envelope>,
    mut done: watch::Receiver<bool>,
    out: mpsc::Sender<Envelope>,
    idle_window: Option<Duration>,
    stats: Arc<ForwarderStats>,
) {
    let window = idle_window.unwrap_or(Duration::MAX);
    // Task-local: nothing else ever reads the remembered envelope
    let mut last: Option<Envelope> = None;

    let idle = time::sleep(window);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            biased;
            _ = revoked(&mut done) => {
                tracing::trace!("subscriber revoked, idle relay stopping");
                break;
            }
            received = delivery.recv() => {
                let Some(envelope) = received else {
                    tracing::trace!("delivery queue closed, idle relay stopping");
                    break;
                };
                if out.send(envelope.clone()).await.is_err() {
                    break;
                }
                last = Some(envelope);
                idle.as_mut().reset(deadline(window));
            }
            () = &mut idle, if idle_window.is_some() => {
                if let Some(envelope) = &last {
                    tracing::debug!(seat = envelope.seat(), kind = %envelope.kind(), "Idle window elapsed, replaying");
                    stats.record_replay();
                    if out.send(envelope.clone()).await.is_err() {
                        break;
                    }
                }
                idle.as_mut().reset(deadline(window));
            }
        }
    }
}

/// Stage B: invoke the handler for each relayed envelope
async fn run_handler_loop(
    subscriber: String,
    mut input: mpsc::Receiver<Envelope>,
    handler: HandlerSlot,
    stats: Arc<ForwarderStats>,
) {
    while let Some(envelope) = input.recv().await {
        let Some(current) = handler.current().await else {
            tracing::info!(subscriber = %subscriber, "Handler detached, stopping delivery");
            return;
        };

        if let Err(e) = current.deliver(envelope) {
            tracing::error!(subscriber = %subscriber, error = %e, "Handler failed, stopping delivery");
            stats.record_handler_failure();
            return;
        }
        stats.record_delivery();
    }
}

fn deadline(window: Duration) -> Instant {
    Instant::now()
        .checked_add(window)
        .unwrap_or_else(far_future)
}

// Roughly 30 years
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400 * 365 * 30)
}
