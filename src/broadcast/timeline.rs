//! Monotonic output timebase
//!
//! Producer sessions each start their timecodes near zero; concatenating
//! them must still play as one stream. The timeline accumulates a shift
//! applied to every producer timecode so that a new segment's first block
//! never lands before anything already emitted.
//!
//! Within a segment, coding order may differ from display order, so single
//! blocks are allowed to move backward; only the first block of a segment
//! re-anchors the timebase.

use bytes::Bytes;

use crate::ebml::constants;

/// Timecode the relay has never emitted a cluster for
const NEVER: u64 = u64::MAX;

/// Rewrite decision for one block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockTiming {
    /// Shifted cluster timecode the block belongs under
    pub cluster_tc: u64,
    /// Whether a new cluster header must precede this block
    pub force: bool,
}

/// Monotonic timecode state across producer sessions
#[derive(Debug)]
pub(crate) struct Timeline {
    /// Last received cluster timecode, shift included
    recv_cluster_tc: u64,
    /// Maximum absolute timecode already emitted
    sent_tc: u64,
    /// Timecode of the last cluster header emitted to viewers
    sent_cluster_tc: u64,
    /// Accumulated shift applied to producer timecodes
    shift: u64,
    /// True until a block has been processed in the current segment
    first_block_in_segment: bool,
}

impl Timeline {
    pub(crate) fn new() -> Self {
        Self {
            recv_cluster_tc: 0,
            sent_tc: 0,
            sent_cluster_tc: NEVER,
            shift: 0,
            first_block_in_segment: true,
        }
    }

    /// A new Segment started; its first block re-anchors the timebase
    pub(crate) fn on_segment(&mut self) {
        self.shift = 0;
        self.first_block_in_segment = true;
    }

    /// A Cluster Timecode child was parsed
    pub(crate) fn on_cluster_timecode(&mut self, raw: u64) {
        self.recv_cluster_tc = raw.saturating_add(self.shift);
    }

    /// Rewrite decision for a block at `offset` from the cluster timecode
    pub(crate) fn on_block(&mut self, offset: i16) -> BlockTiming {
        let mut abs = self.recv_cluster_tc.saturating_add_signed(i64::from(offset));

        if self.first_block_in_segment {
            if abs < self.sent_tc {
                let delta = self.sent_tc - abs;
                self.shift += delta;
                self.recv_cluster_tc += delta;
                abs += delta;
            }
            self.first_block_in_segment = false;
        }

        self.sent_tc = self.sent_tc.max(abs);

        BlockTiming {
            cluster_tc: self.recv_cluster_tc,
            force: self.recv_cluster_tc != self.sent_cluster_tc,
        }
    }

    /// Record that a cluster header for the current timecode went out
    pub(crate) fn after_emit(&mut self) {
        self.sent_cluster_tc = self.recv_cluster_tc;
    }

    /// Accumulated shift applied to producer timecodes
    pub(crate) fn shift(&self) -> u64 {
        self.shift
    }

    /// Maximum absolute timecode already emitted
    pub(crate) fn sent_tc(&self) -> u64 {
        self.sent_tc
    }
}

/// Encode the synthetic cluster header viewers see
///
/// Cluster id, indeterminate length, and a single fixed 8-byte Timecode
/// child. 15 bytes total; the fixed width keeps the encoding independent of
/// the timecode's magnitude.
pub(crate) fn synthetic_cluster(tc: u64) -> Bytes {
    let id = constants::CLUSTER;
    let header = [
        (id >> 24) as u8,
        (id >> 16) as u8,
        (id >> 8) as u8,
        id as u8,
        0xFF,
        constants::TIMECODE as u8,
        0x88,
        (tc >> 56) as u8,
        (tc >> 48) as u8,
        (tc >> 40) as u8,
        (tc >> 32) as u8,
        (tc >> 24) as u8,
        (tc >> 16) as u8,
        (tc >> 8) as u8,
        tc as u8,
    ];
    Bytes::copy_from_slice(&header)
}
