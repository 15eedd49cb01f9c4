//! Per-stream lifecycle state
//!
//! A stream is created when a producer first acquires it, survives producer
//! disconnects for a grace period, and is revived if the producer comes
//! back in time. The countdown is advanced by the owning set's tick.

use std::sync::Mutex;
use std::time::Duration;

use crate::error::Result;
use crate::stats::{BroadcastStats, RateMeter};

use super::cast::Broadcast;

/// Producer-side lifecycle of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastPhase {
    /// Created but not yet acquired
    Idle,
    /// A producer holds the stream
    Writing,
    /// Producer gone, destruction countdown running
    Closing,
    /// Torn down and removed from the set
    Destroyed,
}

#[derive(Debug)]
struct EntryState {
    phase: BroadcastPhase,
    /// Time spent in `Closing` so far
    closing_for: Duration,
    rate: RateMeter,
}

/// A broadcast plus its lifecycle bookkeeping
pub struct BroadcastEntry {
    id: String,
    broadcast: Broadcast,
    state: Mutex<EntryState>,
}

impl BroadcastEntry {
    pub(crate) fn new(id: &str, ring_capacity: usize) -> Self {
        Self {
            id: id.to_owned(),
            broadcast: Broadcast::new(ring_capacity),
            state: Mutex::new(EntryState {
                phase: BroadcastPhase::Idle,
                closing_for: Duration::ZERO,
                rate: RateMeter::new(),
            }),
        }
    }

    /// Stream id this entry was registered under
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The demux/fan-out engine
    pub fn broadcast(&self) -> &Broadcast {
        &self.broadcast
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> BroadcastPhase {
        self.state.lock().unwrap().phase
    }

    /// Try to take the producer side; cancels a pending close
    pub(crate) fn acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.phase {
            BroadcastPhase::Writing | BroadcastPhase::Destroyed => false,
            BroadcastPhase::Idle | BroadcastPhase::Closing => {
                state.phase = BroadcastPhase::Writing;
                state.closing_for = Duration::ZERO;
                true
            }
        }
    }

    /// Feed producer bytes, accounting them toward the ingest rate
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        self.state.lock().unwrap().rate.add(data.len());
        self.broadcast.write(data).await
    }

    /// Release the producer side and start the destruction countdown
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if state.phase == BroadcastPhase::Writing {
            state.phase = BroadcastPhase::Closing;
            state.closing_for = Duration::ZERO;
        }
    }

    /// Fold one tick into the rate meter
    pub(crate) fn rate_tick(&self) {
        self.state.lock().unwrap().rate.tick();
    }

    /// Advance the countdown; true once the grace period has run out
    pub(crate) fn advance_close(&self, elapsed: Duration, grace: Duration) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.phase != BroadcastPhase::Closing {
            return false;
        }
        state.closing_for += elapsed;
        state.closing_for > grace
    }

    /// Final teardown: mark destroyed and signal end of stream to viewers
    pub(crate) fn destroy(&self) {
        self.state.lock().unwrap().phase = BroadcastPhase::Destroyed;
        self.broadcast.shutdown();
    }

    /// Point-in-time statistics
    pub async fn stats(&self) -> BroadcastStats {
        let (phase, mean, var) = {
            let state = self.state.lock().unwrap();
            (state.phase, state.rate.mean(), state.rate.var())
        };
        BroadcastStats {
            stream_id: self.id.clone(),
            has_producer: phase == BroadcastPhase::Writing,
            viewer_count: self.broadcast.viewer_count(),
            ring_len: self.broadcast.ring_len().await,
            rate_mean: mean,
            rate_var: var,
        }
    }
}
