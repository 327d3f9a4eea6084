//! Forwarder manager
//!
//! Keeps one [`Forwarder`] per logical stream (for example the mixed audio
//! output of a room) and routes pushes and membership changes to it by id.
//!
//! Membership calls routed through the manager are serialized against
//! [`ForwarderManager::replace`] and [`ForwarderManager::remove`], so a
//! subscriber registered during a hot swap always lands on the forwarder
//! that survives it.

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::error::{ForwardError, Result};

use super::config::ForwarderConfig;
use super::envelope::Envelope;
use super::forwarder::Forwarder;
use super::handler::DeliveryHandler;

/// Keyed collection of forwarders sharing one configuration
pub struct ForwarderManager {
    forwarders: DashMap<String, Forwarder>,
    config: ForwarderConfig,
    /// Shared by membership calls, exclusive for swaps and removals
    swap: RwLock<()>,
}

impl ForwarderManager {
    /// Create a manager with default forwarder configuration
    pub fn new() -> Self {
        Self::with_config(ForwarderConfig::default())
    }

    /// Create a manager whose forwarders use `config`
    pub fn with_config(config: ForwarderConfig) -> Self {
        Self {
            forwarders: DashMap::new(),
            config,
            swap: RwLock::new(()),
        }
    }

    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    /// Get a forwarder by id
    pub fn get(&self, id: &str) -> Option<Forwarder> {
        self.forwarders.get(id).map(|fwd| fwd.value().clone())
    }

    /// Get a forwarder, creating it if needed
    pub fn get_or_create(&self, id: &str) -> Forwarder {
        if let Some(fwd) = self.get(id) {
            return fwd;
        }

        self.forwarders
            .entry(id.to_string())
            .or_insert_with(|| Forwarder::with_config(id, self.config.clone()))
            .value()
            .clone()
    }

    /// Publish to a forwarder; dropped (and logged) if it does not exist
    pub async fn push(&self, id: &str, envelope: Envelope) {
        if let Err(e) = self.try_push(id, envelope).await {
            tracing::warn!(forwarder = %id, error = %e, "Push dropped");
        }
    }

    /// Like [`ForwarderManager::push`], but reports the failure
    pub async fn try_push(&self, id: &str, envelope: Envelope) -> Result<()> {
        let fwd = self
            .get(id)
            .ok_or_else(|| ForwardError::ForwarderNotFound(id.to_string()))?;
        fwd.try_push(envelope).await
    }

    /// Attach a subscriber to a forwarder, creating the forwarder if needed
    pub async fn register<H: DeliveryHandler>(&self, id: &str, subscriber: &str, handler: H) {
        let _swap = self.swap.read().await;
        self.get_or_create(id).register(subscriber, handler).await;
    }

    /// Detach a subscriber; no-op if either side is unknown
    pub async fn unregister(&self, id: &str, subscriber: &str) {
        let _swap = self.swap.read().await;
        if let Some(fwd) = self.get(id) {
            fwd.unregister(subscriber).await;
        }
    }

    /// Close and forget a forwarder
    pub async fn remove(&self, id: &str) -> Option<Forwarder> {
        let _swap = self.swap.write().await;
        let (_, fwd) = self.forwarders.remove(id)?;
        fwd.close().await;
        tracing::info!(forwarder = %id, "Forwarder removed");
        Some(fwd)
    }

    /// Swap a forwarder for a fresh one, carrying every subscriber over
    ///
    /// Subscribers are registered on the new forwarder before the old one
    /// closes, so none of them is ever unregistered. Membership calls made
    /// through the manager meanwhile wait for the swap and then go to the new
    /// forwarder. Fails if no forwarder with this id exists.
    pub async fn replace(&self, id: &str) -> Result<Forwarder> {
        let _swap = self.swap.write().await;
        let old = self
            .get(id)
            .ok_or_else(|| ForwardError::ForwarderNotFound(id.to_string()))?;

        // Registrations queued before the swap began must be in the capture
        old.barrier().await;

        let fresh = Forwarder::with_config(id, self.config.clone());
        if let Err(e) = old.transfer(&fresh).await {
            fresh.close().await;
            return Err(e);
        }
        fresh.barrier().await;

        self.forwarders.insert(id.to_string(), fresh.clone());
        old.close().await;

        tracing::info!(
            forwarder = %id,
            subscribers = fresh.subscriber_count(),
            "Forwarder replaced"
        );
        Ok(fresh)
    }

    /// Close every forwarder
    pub async fn close_all(&self) {
        for id in self.ids() {
            self.remove(&id).await;
        }
    }

    /// Ids of the managed forwarders
    pub fn ids(&self) -> Vec<String> {
        self.forwarders.iter().map(|fwd| fwd.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.forwarders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forwarders.is_empty()
    }
}

impl Default for ForwarderManager {
    fn default() -> Self {
        Self::new()
    }
}
