//! Media fan-out for one producer and many subscribers
//!
//! A [`Forwarder`] takes envelopes from a single producer (an inbound track
//! reader or a mixing stage) and hands a copy to every registered
//! subscriber's write path. Subscribers join, leave, stall or fail without
//! affecting each other.
//!
//! # Architecture
//!
//! ```text
//!                 push()                    register() / unregister() / close()
//!                   │                                    │
//!                   ▼ (rendezvous)                       ▼ (bounded, 100)
//!            ┌─────────────┐                    ┌──────────────────┐
//!            │ broadcaster │ ◄── snapshot ───── │ membership worker│
//!            └──────┬──────┘    of registry     │ (only writer)    │
//!                   │                           └──────────────────┘
//!     ┌─────────────┼─────────────┐
//!     ▼             ▼             ▼          delivery queues (bounded, 1000)
//! [idle relay]  [idle relay]  [idle relay]   replay last envelope on idle
//!     ▼             ▼             ▼          relay queues (bounded, 100)
//! [handler]     [handler]     [handler]      one invocation at a time
//! ```
//!
//! # Backpressure
//!
//! Nothing is dropped. A full delivery queue blocks the broadcaster, and a
//! blocked broadcaster blocks the producer's next `push`. One slow
//! subscriber therefore slows everyone; revoke it to release the others.
//!
//! # Delivery
//!
//! Each subscriber sees envelopes in publish order, interleaved with replays
//! of the latest one whenever the idle window passes without fresh data.
//! Delivery is at-least-once.

mod action;
mod broadcast;
pub mod config;
pub mod envelope;
pub mod forwarder;
pub mod handler;
pub mod manager;
pub mod registry;
mod relay;

pub use config::ForwarderConfig;
pub use envelope::{Envelope, MediaKind, MessageType};
pub use forwarder::Forwarder;
pub use handler::{DeliveryHandler, HandlerError, SharedHandler};
pub use manager::ForwarderManager;
pub use registry::{SubscriberEntry, SubscriberRegistry};
