//! Observable statistics for active broadcasts

pub mod metrics;

pub use metrics::{BroadcastStats, RateMeter};
