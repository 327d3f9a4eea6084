//! Fan-out demo: one mixed audio stream relayed to a small room
//!
//! Run with: cargo run --example relay_demo
//!
//! Set RUST_LOG=sfu_relay=debug to watch idle replays and membership changes.
//!
//! The producer sends a 20ms-paced stream, goes silent for a few seconds (the
//! subscribers keep receiving replays of the last packet), then the stream is
//! hot-swapped to a fresh forwarder without anyone leaving the room.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sfu_relay::session::PendingCandidates;
use sfu_relay::{Envelope, ForwarderConfig, ForwarderManager, HandlerError};

const STREAM: &str = "mixedStreamID";

/// Counts packets written to one participant's outbound track
struct TrackWriter {
    participant: String,
    packets: AtomicU64,
}

impl TrackWriter {
    fn new(participant: &str) -> Arc<Self> {
        Arc::new(Self {
            participant: participant.to_string(),
            packets: AtomicU64::new(0),
        })
    }

    fn write(&self, env: &Envelope) -> Result<(), HandlerError> {
        let n = self.packets.fetch_add(1, Ordering::Relaxed) + 1;
        if n % 50 == 0 {
            println!(
                "[{}] {} packets written (last seat={} bytes={})",
                self.participant,
                n,
                env.seat(),
                env.len()
            );
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sfu_relay=info")),
        )
        .init();

    let config = ForwarderConfig::default().idle_window(Duration::from_millis(500));
    let manager = ForwarderManager::with_config(config);

    // Candidates that showed up before the offer was answered
    let pending = PendingCandidates::new();
    pending.push("peer-c", "candidate:1 1 udp 2130706431 10.0.0.2 54321 typ host");

    let mut writers = Vec::new();
    for participant in ["peer-b", "peer-a", "peer-c"] {
        let writer = TrackWriter::new(participant);
        let track = Arc::clone(&writer);
        manager
            .register(STREAM, participant, move |env: Envelope| track.write(&env))
            .await;
        for candidate in pending.drain(participant) {
            println!("[{}] applying parked candidate {}", participant, candidate);
        }
        writers.push(writer);
    }

    let fwd = manager.get_or_create(STREAM);
    fwd.barrier().await;

    let mut ticker = tokio::time::interval(Duration::from_millis(20));
    for seq in 0..150u32 {
        ticker.tick().await;
        manager
            .push(STREAM, Envelope::audio(seq % 3, vec![0u8; 160]))
            .await;
    }

    println!("Producer silent for 2s, subscribers keep receiving replays");
    tokio::time::sleep(Duration::from_secs(2)).await;

    match manager.replace(STREAM).await {
        Ok(fresh) => println!("Hot-swapped forwarder, {} subscribers carried over", fresh.subscriber_count()),
        Err(e) => eprintln!("Hot-swap failed: {}", e),
    }

    for seq in 150..200u32 {
        ticker.tick().await;
        manager
            .push(STREAM, Envelope::audio(seq % 3, vec![0u8; 160]))
            .await;
    }

    if let Some(fwd) = manager.get(STREAM) {
        let stats = fwd.stats();
        println!(
            "Stats: pushed={} enqueued={} delivered={} replayed={} failures={}",
            stats.pushed, stats.enqueued, stats.delivered, stats.replayed, stats.handler_failures
        );
    }

    manager.close_all().await;
    for writer in &writers {
        println!(
            "[{}] total packets: {}",
            writer.participant,
            writer.packets.load(Ordering::Relaxed)
        );
    }
}
