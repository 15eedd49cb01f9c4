//! Broadcast set configuration

use std::time::Duration;

/// Configuration for the broadcast set and its streams
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// How long a stream outlives its producer before being destroyed
    ///
    /// A producer reconnecting within this window resumes the stream and
    /// keeps all viewers attached.
    pub grace_period: Duration,

    /// Catch-up ring capacity, in entries (frames + cluster markers)
    pub ring_capacity: usize,

    /// Interval of the per-broadcast housekeeping tick
    pub tick_interval: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(10),
            ring_capacity: 120,
            tick_interval: Duration::from_secs(1),
        }
    }
}

impl BroadcastConfig {
    /// Set the producer grace period
    pub fn grace_period(mut self, period: Duration) -> Self {
        self.grace_period = period;
        self
    }

    /// Set the catch-up ring capacity
    pub fn ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity.max(1);
        self
    }

    /// Set the housekeeping tick interval
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }
}
