//! Ingest statistics
//!
//! Byte rates are sampled once per second by the broadcast tick and smoothed
//! with exponentially weighted moving moments at alpha = 0.5:
//!
//! ```text
//! avg[n] = a * x + (1 - a) * avg[n - 1]
//! var[n] = a * (x - avg[n])^2 / (1 - a) + (1 - a) * var[n - 1]
//! ```

/// Exponentially weighted rate meter
///
/// `add` accumulates bytes between ticks; `tick` folds the accumulated
/// amount into the moving mean and variance and resets the accumulator.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateMeter {
    unit: f64,
    mean: f64,
    var: f64,
}

impl RateMeter {
    /// Create a meter with no history
    pub fn new() -> Self {
        Self::default()
    }

    /// Account bytes ingested since the last tick
    pub fn add(&mut self, bytes: usize) {
        self.unit += bytes as f64;
    }

    /// Fold one sampling interval into the moving moments
    pub fn tick(&mut self) {
        let delta = self.unit - self.mean;
        self.mean += delta / 2.0;
        self.var += delta * delta - self.var / 2.0;
        self.unit = 0.0;
    }

    /// Smoothed bytes-per-interval mean
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Smoothed variance of the rate
    pub fn var(&self) -> f64 {
        self.var
    }
}

/// Point-in-time view of a single broadcast, for dashboards and debugging
#[derive(Debug, Clone)]
pub struct BroadcastStats {
    /// Stream id
    pub stream_id: String,
    /// Whether a producer currently holds the stream
    pub has_producer: bool,
    /// Number of connected viewers
    pub viewer_count: usize,
    /// Entries currently held in the catch-up ring
    pub ring_len: usize,
    /// Smoothed ingest rate, bytes per second
    pub rate_mean: f64,
    /// Variance of the ingest rate
    pub rate_var: f64,
}
