//! Catch-up ring for late-joiner support
//!
//! When a new viewer connects to a running stream (or a stalled viewer
//! recovers), it needs the most recent keyframe and every frame since, each
//! under the cluster header it belongs to. The ring keeps a bounded window
//! of recent frames interleaved with the synthetic cluster headers that
//! preceded them.
//!
//! Eviction must not orphan frames: when the oldest entry falls off and it
//! is a cluster header, the header is stashed aside so the oldest surviving
//! frame still has a cluster to belong to.

use std::collections::VecDeque;

use bytes::Bytes;

/// A single coded frame as it went out to viewers
#[derive(Debug, Clone)]
pub struct BufferedFrame {
    /// The whole SimpleBlock or BlockGroup tag, verbatim
    pub data: Bytes,
    /// Track number the frame belongs to
    pub track: u8,
    /// Whether the frame is decodable without references
    pub key: bool,
}

/// One slot of the catch-up ring
#[derive(Debug, Clone)]
pub enum RingEntry {
    /// A synthetic cluster header
    Cluster(Bytes),
    /// A coded frame
    Frame(BufferedFrame),
}

/// Fixed-capacity ring of recent frames and cluster markers
#[derive(Debug)]
pub struct FrameRing {
    entries: VecDeque<RingEntry>,
    capacity: usize,
    /// Cluster header evicted from the front, still owning the oldest frames
    head_cluster: Option<Bytes>,
}

impl FrameRing {
    /// Create a ring holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            head_cluster: None,
        }
    }

    /// Append an entry, evicting the oldest when full
    pub fn push(&mut self, entry: RingEntry) {
        if self.entries.len() == self.capacity {
            if let Some(RingEntry::Cluster(header)) = self.entries.pop_front() {
                self.head_cluster = Some(header);
            }
        }
        self.entries.push_back(entry);
    }

    /// Append a cluster header
    pub fn push_cluster(&mut self, header: Bytes) {
        self.push(RingEntry::Cluster(header));
    }

    /// Append a frame
    pub fn push_frame(&mut self, frame: BufferedFrame) {
        self.push(RingEntry::Frame(frame));
    }

    /// Walk the ring oldest to newest for one viewer's catch-up
    ///
    /// Each frame is handed to `f` together with the cluster header it
    /// belongs to; `force` is true for the first frame under each header.
    pub fn replay<F>(&self, mut f: F)
    where
        F: FnMut(&Bytes, bool, &BufferedFrame),
    {
        let mut current = self.head_cluster.clone();
        let mut force = true;

        for entry in &self.entries {
            match entry {
                RingEntry::Cluster(header) => {
                    current = Some(header.clone());
                    force = true;
                }
                RingEntry::Frame(frame) => {
                    if let Some(header) = &current {
                        f(header, force, frame);
                        force = false;
                    }
                }
            }
        }
    }

    /// Number of buffered entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ring holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The stashed cluster header of the oldest frames, if any was evicted
    pub fn head_cluster(&self) -> Option<&Bytes> {
        self.head_cluster.as_ref()
    }

    /// Drop all entries and the stashed header
    pub fn clear(&mut self) {
        self.entries.clear();
        self.head_cluster = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: u8, key: bool) -> BufferedFrame {
        BufferedFrame {
            data: Bytes::from(vec![n; 4]),
            track: 1,
            key,
        }
    }

    fn cluster(n: u8) -> Bytes {
        Bytes::from(vec![0xC0, n])
    }

    fn replay_all(ring: &FrameRing) -> Vec<(Bytes, bool, Bytes)> {
        let mut out = Vec::new();
        ring.replay(|header, force, fr| out.push((header.clone(), force, fr.data.clone())));
        out
    }

    #[test]
    fn test_replay_groups_frames_under_clusters() {
        let mut ring = FrameRing::new(8);
        ring.push_cluster(cluster(0));
        ring.push_frame(frame(1, true));
        ring.push_frame(frame(2, false));
        ring.push_cluster(cluster(1));
        ring.push_frame(frame(3, true));

        let out = replay_all(&ring);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], (cluster(0), true, frame(1, true).data));
        assert_eq!(out[1], (cluster(0), false, frame(2, false).data));
        assert_eq!(out[2], (cluster(1), true, frame(3, true).data));
    }

    #[test]
    fn test_eviction_stashes_head_cluster() {
        let mut ring = FrameRing::new(3);
        ring.push_cluster(cluster(0));
        ring.push_frame(frame(1, true));
        ring.push_frame(frame(2, false));
        assert_eq!(ring.len(), 3);
        assert!(ring.head_cluster().is_none());

        // One more push evicts the cluster into the stash
        ring.push_frame(frame(3, false));
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.head_cluster(), Some(&cluster(0)));

        // Frames still replay under the stashed header
        let out = replay_all(&ring);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], (cluster(0), true, frame(1, true).data));
        assert_eq!(out[2].0, cluster(0));
    }

    #[test]
    fn test_evicting_frame_keeps_stash() {
        let mut ring = FrameRing::new(2);
        ring.push_cluster(cluster(0));
        ring.push_frame(frame(1, true));
        ring.push_frame(frame(2, false)); // evicts cluster(0)
        assert_eq!(ring.head_cluster(), Some(&cluster(0)));

        ring.push_frame(frame(3, false)); // evicts frame(1)
        assert_eq!(ring.head_cluster(), Some(&cluster(0)));
    }

    #[test]
    fn test_newer_cluster_replaces_stash_on_eviction() {
        let mut ring = FrameRing::new(2);
        ring.push_cluster(cluster(0));
        ring.push_cluster(cluster(1));
        ring.push_frame(frame(1, true)); // evicts cluster(0)
        ring.push_frame(frame(2, false)); // evicts cluster(1)
        assert_eq!(ring.head_cluster(), Some(&cluster(1)));
    }

    #[test]
    fn test_replay_skips_frames_without_cluster_context() {
        let mut ring = FrameRing::new(4);
        ring.push_frame(frame(1, true));
        assert!(replay_all(&ring).is_empty());
    }

    #[test]
    fn test_clear() {
        let mut ring = FrameRing::new(2);
        ring.push_cluster(cluster(0));
        ring.push_frame(frame(1, true));
        ring.push_frame(frame(2, false));
        ring.clear();
        assert!(ring.is_empty());
        assert!(ring.head_cluster().is_none());
    }
}
