//! Per-viewer dispatch state
//!
//! Each viewer owns a bounded byte-chunk queue drained by its transport.
//! Enqueueing is strictly non-blocking: a full queue makes the viewer drop
//! frames and desynchronize on that track until the next keyframe, it never
//! stalls the parser.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::ring::BufferedFrame;

/// Handle identifying a connected viewer
pub type ViewerId = u64;

/// Dispatch state for one connected viewer
#[derive(Debug)]
pub struct Viewer {
    /// Downstream queue of WebM byte chunks
    tx: mpsc::Sender<Bytes>,
    /// Headers and track info are sent once per connection; codecs must
    /// stay the same between segments, so they are never repeated.
    skip_headers: bool,
    /// While the last-emitted cluster header is still current there is no
    /// need to start a new one.
    skip_cluster: bool,
    /// The first frame a viewer receives on each track must be a keyframe;
    /// one bit per track for which that has happened.
    seen_keyframes: u32,
    /// Saturation latch; stays set until the queue drains to half
    blocked: bool,
    /// Receiver dropped; the viewer is pruned after the dispatch pass
    gone: bool,
}

impl Viewer {
    /// Wrap a downstream queue
    pub(crate) fn new(tx: mpsc::Sender<Bytes>, skip_headers: bool) -> Self {
        Self {
            tx,
            skip_headers,
            skip_cluster: false,
            seen_keyframes: 0,
            blocked: false,
            gone: false,
        }
    }

    /// Whether the downstream receiver has gone away
    pub(crate) fn is_gone(&self) -> bool {
        self.gone
    }

    /// Whether this viewer still needs the header + tracks opener
    pub(crate) fn needs_headers(&self) -> bool {
        !self.skip_headers
    }

    /// Non-blocking enqueue
    ///
    /// Returns `true` iff the chunk was accepted. Once a send is refused
    /// the viewer stays blocked until its queue has drained to at most
    /// half capacity.
    pub(crate) fn write(&mut self, data: Bytes) -> bool {
        if self.blocked {
            let max = self.tx.max_capacity();
            if self.tx.capacity() < max - max / 2 {
                return false;
            }
            self.blocked = false;
        }

        match self.tx.try_send(data) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.blocked = true;
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.gone = true;
                false
            }
        }
    }

    /// Send the EBML header and the Segment + Info + Tracks opener
    ///
    /// Both chunks go out together or not at all; a retried half-pair would
    /// duplicate the header. Returns `true` once the pair is enqueued.
    pub(crate) fn write_headers(&mut self, header: Bytes, tracks: Bytes) -> bool {
        if self.blocked || self.tx.capacity() < 2 {
            return false;
        }
        if !self.write(header) || !self.write(tracks) {
            return false;
        }
        self.skip_headers = true;
        self.skip_cluster = false;
        true
    }

    /// Offer one frame, preceded by its cluster header where needed
    ///
    /// `force` marks the first frame under a new cluster header. Frames on
    /// tracks without a delivered keyframe are gated off. A refused write
    /// desynchronizes the track: the keyframe bit is cleared and the next
    /// keyframe re-opens the track under a fresh cluster header.
    pub(crate) fn write_frame(&mut self, cluster: &Bytes, force: bool, frame: &BufferedFrame) {
        let mask = 1u32 << frame.track;

        if force {
            self.skip_cluster = false;
        }
        if frame.key {
            self.seen_keyframes |= mask;
        }
        if self.seen_keyframes & mask == 0 {
            return;
        }

        if !self.skip_cluster {
            self.skip_cluster = self.write(cluster.clone());
        }
        if !self.skip_cluster || !self.write(frame.data.clone()) {
            self.seen_keyframes &= !mask;
            self.skip_cluster = false;
        }
    }

    /// Signal end of stream with an empty payload
    pub(crate) fn send_eos(&mut self) {
        let _ = self.tx.try_send(Bytes::new());
    }
}
