//! Session-side helpers
//!
//! Typed state the signaling layer keeps next to its forwarders.

pub mod candidates;

pub use candidates::{IceCandidate, PendingCandidates};
