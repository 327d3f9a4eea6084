//! sfu-relay: media fan-out engine for selective-forwarding conferencing relays
//!
//! Takes the packets of one producer (a participant's inbound track or a
//! mixed output) and relays them to many independently paced subscribers.
//!
//! - [`Forwarder`]: broadcaster, subscriber registry, membership queue and a
//!   keep-alive relay per subscriber that replays the last packet when the
//!   source goes quiet
//! - [`ForwarderManager`]: one forwarder per stream id, with hot-swap
//! - [`session::PendingCandidates`]: ICE candidates parked until a peer can
//!   take them
//!
//! Logging goes through `tracing`; install a subscriber (for example
//! `tracing_subscriber::fmt`) in the application to see it.
//!
//! ```no_run
//! use sfu_relay::{Envelope, Forwarder, HandlerError};
//!
//! # async fn run() {
//! let fwd = Forwarder::new("mixed-audio");
//! fwd.register("peer-a", |env: Envelope| -> Result<(), HandlerError> {
//!     // write env.payload() to the outbound track
//!     Ok(())
//! })
//! .await;
//!
//! fwd.push(Envelope::audio(0, vec![0x80, 0x6f])).await;
//! fwd.close().await;
//! # }
//! ```

pub mod error;
pub mod forward;
pub mod session;
pub mod stats;

pub use error::{ForwardError, Result};
pub use forward::{
    DeliveryHandler, Envelope, Forwarder, ForwarderConfig, ForwarderManager, HandlerError,
    MediaKind, MessageType, SharedHandler,
};
pub use stats::StatsSnapshot;
