//! Forwarder configuration

use std::time::Duration;

/// Default idle window before the last envelope is replayed
pub const DEFAULT_IDLE_WINDOW: Duration = Duration::from_secs(3);

/// Default per-subscriber delivery queue capacity
pub const DEFAULT_DELIVERY_CAPACITY: usize = 1000;

/// Default capacity between the idle relay and the handler loop
pub const DEFAULT_RELAY_CAPACITY: usize = 100;

/// Default membership command queue capacity
pub const DEFAULT_ACTION_CAPACITY: usize = 100;

/// Forwarder configuration options
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// How long a subscriber may go without a fresh envelope before the
    /// last one is replayed
    pub idle_window: Duration,

    /// Replay the last envelope on idle
    pub keep_alive: bool,

    /// Capacity of each subscriber's delivery queue
    pub delivery_capacity: usize,

    /// Capacity of the queue feeding each subscriber's handler
    pub relay_capacity: usize,

    /// Capacity of the membership command queue
    pub action_capacity: usize,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            idle_window: DEFAULT_IDLE_WINDOW,
            keep_alive: true,
            delivery_capacity: DEFAULT_DELIVERY_CAPACITY,
            relay_capacity: DEFAULT_RELAY_CAPACITY,
            action_capacity: DEFAULT_ACTION_CAPACITY,
        }
    }
}

impl ForwarderConfig {
    /// Set the idle window
    pub fn idle_window(mut self, window: Duration) -> Self {
        self.idle_window = window;
        self
    }

    /// Enable or disable replay on idle
    pub fn keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = enabled;
        self
    }

    /// Set the delivery queue capacity (minimum 1)
    pub fn delivery_capacity(mut self, capacity: usize) -> Self {
        self.delivery_capacity = capacity.max(1);
        self
    }

    /// Set the relay queue capacity (minimum 1)
    pub fn relay_capacity(mut self, capacity: usize) -> Self {
        self.relay_capacity = capacity.max(1);
        self
    }

    /// Set the membership queue capacity (minimum 1)
    pub fn action_capacity(mut self, capacity: usize) -> Self {
        self.action_capacity = capacity.max(1);
        self
    }

    /// Whether idle replay is effectively on
    pub(crate) fn replays(&self) -> bool {
        self.keep_alive && !self.idle_window.is_zero()
    }
}
