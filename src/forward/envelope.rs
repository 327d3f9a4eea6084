//! Envelope types
//!
//! An [`Envelope`] is the unit of data moving through a forwarder: one media
//! packet plus the small amount of routing metadata the relay needs.

use bytes::Bytes;

/// Kind of media carried by an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Audio packet
    Audio,
    /// Video packet
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Purpose of an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MessageType {
    /// Media data to write downstream
    #[default]
    Data,
    /// Liveness probe
    Ping,
    /// Liveness probe reply
    Pong,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageType::Data => write!(f, "data"),
            MessageType::Ping => write!(f, "ping"),
            MessageType::Pong => write!(f, "pong"),
        }
    }
}

/// A packet to be fanned out to subscribers
///
/// Immutable once built. Cloning is cheap since the payload is reference
/// counted, so every stage gets its own value and no stage can observe
/// another stage's changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    payload: Bytes,
    kind: MediaKind,
    seat: u32,
    message_type: MessageType,
}

impl Envelope {
    /// Create a data envelope
    pub fn new(kind: MediaKind, seat: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            kind,
            seat,
            message_type: MessageType::Data,
        }
    }

    /// Create an audio data envelope
    pub fn audio(seat: u32, payload: impl Into<Bytes>) -> Self {
        Self::new(MediaKind::Audio, seat, payload)
    }

    /// Create a video data envelope
    pub fn video(seat: u32, payload: impl Into<Bytes>) -> Self {
        Self::new(MediaKind::Video, seat, payload)
    }

    /// Create an empty ping envelope
    pub fn ping(kind: MediaKind, seat: u32) -> Self {
        Self::new(kind, seat, Bytes::new()).with_message_type(MessageType::Ping)
    }

    /// Create an empty pong envelope
    pub fn pong(kind: MediaKind, seat: u32) -> Self {
        Self::new(kind, seat, Bytes::new()).with_message_type(MessageType::Pong)
    }

    /// Return a copy tagged with another message type
    pub fn with_message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    /// Raw packet bytes, opaque to the relay
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Slot of the logical source in a mixed layout
    pub fn seat(&self) -> u32 {
        self.seat
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Whether this is a ping or pong rather than media
    pub fn is_control(&self) -> bool {
        self.message_type != MessageType::Data
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
