//! Subscriber delivery handlers
//!
//! A handler is a subscriber's outbound write path (typically a paced track
//! writer). It runs synchronously inside the subscriber's own task, so a slow
//! handler only delays that subscriber.

use std::sync::Arc;

use tokio::sync::Mutex;

use super::envelope::Envelope;

/// Error returned by a failing handler
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Outbound write path of one subscriber
///
/// Returning an error stops delivery to this subscriber permanently; it has
/// to be registered again to resume.
pub trait DeliveryHandler: Send + Sync + 'static {
    fn deliver(&self, envelope: Envelope) -> Result<(), HandlerError>;
}

impl<F> DeliveryHandler for F
where
    F: Fn(Envelope) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    fn deliver(&self, envelope: Envelope) -> Result<(), HandlerError> {
        self(envelope)
    }
}

/// Shared, type-erased handler
pub type SharedHandler = Arc<dyn DeliveryHandler>;

/// Handler binding of one registry entry
///
/// The lock is only held to read or swap the binding, never across an
/// invocation. The handler loop takes a fresh copy before every call, so once
/// [`HandlerSlot::detach`] returns no new call is dispatched; a call already
/// dispatched runs to completion on its own copy.
#[derive(Clone)]
pub(crate) struct HandlerSlot {
    inner: Arc<Mutex<Option<SharedHandler>>>,
}

impl HandlerSlot {
    pub(crate) fn new(handler: SharedHandler) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(handler))),
        }
    }

    /// Current handler, if still attached
    pub(crate) async fn current(&self) -> Option<SharedHandler> {
        self.inner.lock().await.clone()
    }

    /// Unbind the handler
    ///
    /// Does not wait for an in-flight invocation.
    pub(crate) async fn detach(&self) -> Option<SharedHandler> {
        self.inner.lock().await.take()
    }
}
