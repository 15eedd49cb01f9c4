//! Broadcast set
//!
//! Maps stream ids to live broadcasts and owns their lifecycle. Producer
//! acquisition is serialized under a single lock; each created stream runs
//! a 1 Hz housekeeping task that reports track metadata, advances the
//! destruction countdown, and smooths the ingest rate.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::stats::BroadcastStats;

use super::config::BroadcastConfig;
use super::entry::BroadcastEntry;
use super::error::BroadcastError;
use super::hooks::RelayHooks;

struct SetShared {
    streams: Mutex<HashMap<String, Arc<BroadcastEntry>>>,
    config: BroadcastConfig,
    hooks: Arc<dyn RelayHooks>,
}

/// Registry of all live broadcasts
#[derive(Clone)]
pub struct BroadcastSet {
    shared: Arc<SetShared>,
}

impl BroadcastSet {
    /// Create a set with the given configuration and collaborator hooks
    pub fn new(config: BroadcastConfig, hooks: Arc<dyn RelayHooks>) -> Self {
        Self {
            shared: Arc::new(SetShared {
                streams: Mutex::new(HashMap::new()),
                config,
                hooks,
            }),
        }
    }

    /// The set's configuration
    pub fn config(&self) -> &BroadcastConfig {
        &self.shared.config
    }

    /// The collaborator hooks
    pub fn hooks(&self) -> &Arc<dyn RelayHooks> {
        &self.shared.hooks
    }

    /// Acquire the producer side of a stream, creating or reviving it
    ///
    /// Fails if another producer currently holds the stream. Reacquiring a
    /// stream in its grace period cancels the pending close.
    pub async fn writable(&self, id: &str) -> Result<Arc<BroadcastEntry>, BroadcastError> {
        let mut streams = self.shared.streams.lock().await;

        if let Some(entry) = streams.get(id) {
            if !entry.acquire() {
                return Err(BroadcastError::AlreadyPublishing(id.to_owned()));
            }
            tracing::info!(stream = %id, "Producer reacquired stream");
            return Ok(Arc::clone(entry));
        }

        let entry = Arc::new(BroadcastEntry::new(id, self.shared.config.ring_capacity));
        entry.acquire();
        streams.insert(id.to_owned(), Arc::clone(&entry));
        tracing::info!(stream = %id, "Stream created");

        tokio::spawn(Self::run_tick(
            Arc::clone(&self.shared),
            id.to_owned(),
            Arc::clone(&entry),
        ));

        Ok(entry)
    }

    /// Look up a stream for viewing
    pub async fn readable(&self, id: &str) -> Option<Arc<BroadcastEntry>> {
        self.shared.streams.lock().await.get(id).cloned()
    }

    /// Number of live streams
    pub async fn stream_count(&self) -> usize {
        self.shared.streams.lock().await.len()
    }

    /// Statistics for one stream
    pub async fn stats(&self, id: &str) -> Option<BroadcastStats> {
        let entry = self.readable(id).await?;
        Some(entry.stats().await)
    }

    /// Per-stream housekeeping, one iteration per tick interval
    async fn run_tick(shared: Arc<SetShared>, id: String, entry: Arc<BroadcastEntry>) {
        let interval = shared.config.tick_interval;
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick completes immediately

        loop {
            ticker.tick().await;

            if let Some(info) = entry.broadcast().take_changed_track_info().await {
                shared.hooks.on_track_info(&id, info);
            }

            entry.rate_tick();

            // Countdown and removal are decided under the set lock so a
            // concurrent `writable` either revives the stream or misses it
            let destroy = {
                let mut streams = shared.streams.lock().await;
                if entry.advance_close(interval, shared.config.grace_period) {
                    streams.remove(&id);
                    true
                } else {
                    false
                }
            };

            if destroy {
                entry.destroy();
                shared.hooks.on_stream_close(&id);
                tracing::info!(stream = %id, "Stream destroyed");
                return;
            }
        }
    }
}
