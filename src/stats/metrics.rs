//! Statistics and metrics for forwarders

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Live counters of one forwarder
///
/// Updated from the broadcaster, the membership worker and every relay task;
/// all counters are relaxed atomics and only meaningful as a whole through
/// [`ForwarderStats::snapshot`].
#[derive(Debug)]
pub struct ForwarderStats {
    started_at: Instant,
    pushed: AtomicU64,
    bytes_pushed: AtomicU64,
    rejected: AtomicU64,
    enqueued: AtomicU64,
    delivered: AtomicU64,
    replayed: AtomicU64,
    handler_failures: AtomicU64,
    subscribers_added: AtomicU64,
    subscribers_removed: AtomicU64,
}

impl ForwarderStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            pushed: AtomicU64::new(0),
            bytes_pushed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            replayed: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            subscribers_added: AtomicU64::new(0),
            subscribers_removed: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_push(&self, bytes: usize) {
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.bytes_pushed.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivery(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_replay(&self) {
        self.replayed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_added(&self) {
        self.subscribers_added.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_removed(&self) {
        self.subscribers_removed.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime: self.started_at.elapsed(),
            pushed: self.pushed.load(Ordering::Relaxed),
            bytes_pushed: self.bytes_pushed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            subscribers_added: self.subscribers_added.load(Ordering::Relaxed),
            subscribers_removed: self.subscribers_removed.load(Ordering::Relaxed),
        }
    }
}

impl Default for ForwarderStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Forwarder statistics at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Time since the forwarder was created
    pub uptime: Duration,
    /// Envelopes accepted from the producer
    pub pushed: u64,
    /// Payload bytes accepted from the producer
    pub bytes_pushed: u64,
    /// Pushes rejected because the forwarder was closed
    pub rejected: u64,
    /// Envelopes placed in subscriber delivery queues
    pub enqueued: u64,
    /// Successful handler invocations, replays included
    pub delivered: u64,
    /// Idle replays emitted
    pub replayed: u64,
    /// Subscribers stopped by a failing handler
    pub handler_failures: u64,
    /// Subscribers installed
    pub subscribers_added: u64,
    /// Subscribers revoked
    pub subscribers_removed: u64,
}

impl StatsSnapshot {
    /// Ingest bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.uptime.as_secs();
        if secs > 0 {
            (self.bytes_pushed * 8) / secs
        } else {
            0
        }
    }

    /// Subscribers currently installed
    pub fn active_subscribers(&self) -> u64 {
        self.subscribers_added
            .saturating_sub(self.subscribers_removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = ForwarderStats::new();
        let snapshot = stats.snapshot();

        assert_eq!(snapshot.pushed, 0);
        assert_eq!(snapshot.rejected, 0);
        assert_eq!(snapshot.delivered, 0);
        assert_eq!(snapshot.replayed, 0);
        assert_eq!(snapshot.handler_failures, 0);
        assert_eq!(snapshot.active_subscribers(), 0);
    }

    #[test]
    fn test_counters() {
        let stats = ForwarderStats::new();
        stats.record_push(100);
        stats.record_push(50);
        stats.record_rejected();
        stats.record_enqueued();
        stats.record_delivery();
        stats.record_replay();
        stats.record_added();
        stats.record_added();
        stats.record_removed();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.pushed, 2);
        assert_eq!(snapshot.bytes_pushed, 150);
        assert_eq!(snapshot.rejected, 1);
        assert_eq!(snapshot.enqueued, 1);
        assert_eq!(snapshot.delivered, 1);
        assert_eq!(snapshot.replayed, 1);
        assert_eq!(snapshot.active_subscribers(), 1);
    }

    #[test]
    fn test_bitrate() {
        let snapshot = StatsSnapshot {
            uptime: Duration::from_secs(10),
            bytes_pushed: 1_000_000,
            ..Default::default()
        };

        // 1,000,000 bytes * 8 bits / 10 seconds
        assert_eq!(snapshot.bitrate(), 800_000);
    }

    #[test]
    fn test_bitrate_zero_uptime() {
        let snapshot = StatsSnapshot {
            bytes_pushed: 1_000_000,
            ..Default::default()
        };

        assert_eq!(snapshot.bitrate(), 0);
    }
}
