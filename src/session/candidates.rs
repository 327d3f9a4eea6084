//! Pending ICE candidate cache
//!
//! Candidates can arrive from signaling before the peer connection has its
//! remote description. They are parked here per peer and drained, in
//! arrival order, once the connection can take them.

use dashmap::DashMap;

/// An ICE candidate as received from signaling, kept opaque
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IceCandidate(String);

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self(candidate.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for IceCandidate {
    fn from(candidate: String) -> Self {
        Self(candidate)
    }
}

impl From<&str> for IceCandidate {
    fn from(candidate: &str) -> Self {
        Self(candidate.to_string())
    }
}

impl std::fmt::Display for IceCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-peer queue of candidates waiting for a remote description
#[derive(Debug, Default)]
pub struct PendingCandidates {
    peers: DashMap<String, Vec<IceCandidate>>,
}

impl PendingCandidates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a candidate for `peer`
    pub fn push(&self, peer: &str, candidate: impl Into<IceCandidate>) {
        let candidate = candidate.into();
        tracing::trace!(peer = %peer, candidate = %candidate, "Candidate parked");
        self.peers
            .entry(peer.to_string())
            .or_default()
            .push(candidate);
    }

    /// Take every parked candidate of `peer`, oldest first
    pub fn drain(&self, peer: &str) -> Vec<IceCandidate> {
        self.peers
            .remove(peer)
            .map(|(_, candidates)| candidates)
            .unwrap_or_default()
    }

    /// Forget a peer's parked candidates, returning how many were dropped
    pub fn discard(&self, peer: &str) -> usize {
        let dropped = self.drain(peer).len();
        if dropped > 0 {
            tracing::debug!(peer = %peer, dropped, "Pending candidates discarded");
        }
        dropped
    }

    /// Number of candidates parked for `peer`
    pub fn len(&self, peer: &str) -> usize {
        self.peers.get(peer).map_or(0, |candidates| candidates.len())
    }

    /// Whether nothing is parked for any peer
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Peers with parked candidates
    pub fn peers(&self) -> Vec<String> {
        self.peers.iter().map(|entry| entry.key().clone()).collect()
    }
}
