//! Incremental WebM demux, rewrite, and fan-out
//!
//! A [`Broadcast`] accepts arbitrarily fragmented producer bytes, parses
//! just enough of the container to find keyframes and cluster boundaries,
//! and retransmits a rewritten stream to any number of viewers:
//!
//! ```text
//!  producer bytes ──► ingest buffer ──► tag loop ──► timeline ─┐
//!                                          │                   │
//!                    header/tracks capture ┘       synthetic Cluster
//!                                                              │
//!                       catch-up ring ◄── frames ──► viewers ◄─┘
//! ```
//!
//! Producer-side cluster boundaries are discarded; viewers only ever see
//! synthetic indeterminate-length clusters whose timecodes are monotonic
//! across producer reconnects. All fan-out chunks are reference-counted
//! [`Bytes`] slices of the ingest allocation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex as SyncMutex;

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, Mutex};

use crate::ebml::{self, constants, Tag};
use crate::error::{ParseError, Result};

use super::ring::{BufferedFrame, FrameRing};
use super::timeline::{synthetic_cluster, Timeline};
use super::viewer::{Viewer, ViewerId};

/// Viewer keyframe state is a 32-bit mask, so track numbers are capped
pub const MAX_TRACKS: u64 = 32;

/// Largest accepted payload of a non-container tag
pub const MAX_TAG_PAYLOAD: u64 = 1024 * 1024;

/// Track metadata of the current segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackInfo {
    /// Whether the segment declares a video track
    pub has_video: bool,
    /// Whether the segment declares an audio track
    pub has_audio: bool,
    /// Dimensions of the video track that came last in the Tracks tag
    pub width: u32,
    /// See `width`
    pub height: u32,
}

/// Parser-side state, guarded by the broadcast's state lock
struct MuxState {
    /// Pending producer bytes not yet consumed
    buffer: BytesMut,
    /// The EBML (DocType) tag exactly as first received
    header: Bytes,
    /// Segment opener (id + indeterminate marker) followed by the Info and
    /// Tracks bytes of the current segment
    tracks: BytesMut,
    /// Monotonic output timebase
    timeline: Timeline,
    /// Recent frames and cluster markers for late joiners
    ring: FrameRing,
    /// Track metadata of the current segment
    track_info: TrackInfo,
    /// Track metadata changed since the last collaborator report
    info_dirty: bool,
    /// Last value handed to the collaborator sink
    info_reported: Option<TrackInfo>,
}

/// One live stream: parser, timebase, catch-up ring, and viewer fan-out
pub struct Broadcast {
    /// Parser/state lock, held for the duration of one `write`
    state: Mutex<MuxState>,
    /// Viewer map, locked briefly for connect/disconnect and one fan-out pass
    viewers: SyncMutex<HashMap<ViewerId, Viewer>>,
    next_viewer_id: AtomicU64,
    closed: AtomicBool,
}

impl Broadcast {
    /// Create a broadcast with a catch-up ring of `ring_capacity` entries
    pub fn new(ring_capacity: usize) -> Self {
        Self {
            state: Mutex::new(MuxState {
                buffer: BytesMut::new(),
                header: Bytes::new(),
                tracks: BytesMut::new(),
                timeline: Timeline::new(),
                ring: FrameRing::new(ring_capacity),
                track_info: TrackInfo::default(),
                info_dirty: false,
                info_reported: None,
            }),
            viewers: SyncMutex::new(HashMap::new()),
            next_viewer_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Attach a viewer's downstream queue
    ///
    /// The EBML header, the Segment + Info + Tracks opener (unless
    /// `skip_headers`), and a catch-up replay are delivered when the next
    /// frame is dispatched. Returns the id to pass to [`disconnect`].
    ///
    /// [`disconnect`]: Broadcast::disconnect
    pub fn connect(&self, tx: mpsc::Sender<Bytes>, skip_headers: bool) -> ViewerId {
        let id = self.next_viewer_id.fetch_add(1, Ordering::Relaxed);
        let mut viewer = Viewer::new(tx, skip_headers);

        if self.closed.load(Ordering::Acquire) {
            viewer.send_eos();
            return id;
        }

        let mut viewers = self.viewers.lock().unwrap();
        viewers.insert(id, viewer);
        tracing::debug!(viewer_id = id, viewers = viewers.len(), "Viewer connected");
        id
    }

    /// Detach a viewer
    pub fn disconnect(&self, id: ViewerId) {
        let mut viewers = self.viewers.lock().unwrap();
        if viewers.remove(&id).is_some() {
            tracing::debug!(viewer_id = id, viewers = viewers.len(), "Viewer disconnected");
        }
    }

    /// Number of attached viewers
    pub fn viewer_count(&self) -> usize {
        self.viewers.lock().unwrap().len()
    }

    /// Whether the broadcast has been destroyed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Feed producer bytes
    ///
    /// Input may be fragmented at any byte position; the set of bytes
    /// delivered to viewers does not depend on the fragmentation. Returns
    /// the number of bytes accepted (always all of them on success). Any
    /// parse error invalidates the pending ingest buffer; the producer
    /// session is over but viewers stay attached for a reconnect.
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        let mut st = self.state.lock().await;
        st.buffer.extend_from_slice(data);

        match self.drain(&mut st) {
            Ok(()) => Ok(data.len()),
            Err(e) => {
                st.buffer.clear();
                Err(e)
            }
        }
    }

    /// Discard pending ingest bytes
    pub async fn reset(&self) {
        self.state.lock().await.buffer.clear();
    }

    /// Current track metadata
    pub async fn track_info(&self) -> TrackInfo {
        self.state.lock().await.track_info
    }

    /// Entries currently buffered in the catch-up ring
    pub async fn ring_len(&self) -> usize {
        self.state.lock().await.ring.len()
    }

    /// Track metadata if it changed since the last call
    pub(crate) async fn take_changed_track_info(&self) -> Option<TrackInfo> {
        let mut st = self.state.lock().await;
        if !st.info_dirty {
            return None;
        }
        st.info_dirty = false;
        if st.info_reported == Some(st.track_info) {
            return None;
        }
        st.info_reported = Some(st.track_info);
        Some(st.track_info)
    }

    /// Tear down: every viewer receives an empty payload as end of stream
    pub(crate) fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let mut viewers = self.viewers.lock().unwrap();
        for viewer in viewers.values_mut() {
            viewer.send_eos();
        }
        viewers.clear();
    }

    /// Consume as many complete tags from the ingest buffer as possible
    fn drain(&self, st: &mut MuxState) -> Result<()> {
        loop {
            let Some(tag) = ebml::parse_tag_incomplete(&st.buffer)? else {
                return Ok(());
            };

            if tag.is_indeterminate()
                && !matches!(tag.id, constants::SEGMENT | constants::CLUSTER)
            {
                return Err(ParseError::IndeterminateNotAllowed);
            }

            // Segment, Tracks, and Cluster are walked into: only their
            // header is consumed and their children parse at this level,
            // which is what discards producer cluster boundaries.
            let descend = matches!(
                tag.id,
                constants::SEGMENT | constants::TRACKS | constants::CLUSTER
            );
            let consume = if descend {
                u64::from(tag.header_size)
            } else {
                if tag.payload_len > MAX_TAG_PAYLOAD {
                    return Err(ParseError::BlockTooLarge);
                }
                tag.total_len()
            };
            if consume > st.buffer.len() as u64 {
                return Ok(());
            }

            // The unit of work: header only for containers, whole tag else
            let chunk = st.buffer.split_to(consume as usize);

            match tag.id {
                // Seeking aids and padding have no place in a live stream
                constants::SEEK_HEAD
                | constants::CUES
                | constants::CHAPTERS
                | constants::TAGS
                | constants::PREV_SIZE
                | constants::VOID => {}

                // Boundaries are regrouped around keyframes downstream
                constants::CLUSTER => {}

                constants::EBML => {
                    if st.header.is_empty() {
                        st.header = chunk.freeze();
                    }
                }

                constants::SEGMENT => self.on_segment(st),

                constants::INFO => {
                    let mut chunk = chunk;
                    rewrite_info(&mut chunk, tag)?;
                    st.tracks.extend_from_slice(&chunk);
                }

                constants::TRACK_ENTRY => {
                    scan_track_entry(&chunk, tag, &mut st.track_info)?;
                    st.tracks.extend_from_slice(&chunk);
                    st.info_dirty = true;
                }

                constants::TRACKS => {
                    st.tracks.extend_from_slice(&chunk);
                }

                constants::TIMECODE => {
                    let raw = ebml::parse_fixed_uint(tag.payload(&chunk));
                    st.timeline.on_cluster_timecode(raw);
                }

                constants::SIMPLE_BLOCK | constants::BLOCK_GROUP => {
                    self.on_block(st, tag, chunk.freeze())?;
                }

                _ => return Err(ParseError::UnknownTag),
            }
        }
    }

    /// A new Segment begins: codecs may be re-declared, timecodes re-anchor
    fn on_segment(&self, st: &mut MuxState) {
        st.track_info = TrackInfo::default();
        st.info_dirty = false;
        st.tracks.clear();
        let id = constants::SEGMENT;
        st.tracks.extend_from_slice(&[
            (id >> 24) as u8,
            (id >> 16) as u8,
            (id >> 8) as u8,
            id as u8,
            0xFF,
        ]);
        st.timeline.on_segment();
    }

    /// One coded frame: rewrite its timebase and fan it out
    fn on_block(&self, st: &mut MuxState, tag: Tag, chunk: Bytes) -> Result<()> {
        let payload = &chunk[tag.header_size as usize..tag.total_len() as usize];

        let mut key = false;
        let block: &[u8] = if tag.id == constants::BLOCK_GROUP {
            // Keyframes, by definition, have no reference frame
            key = true;
            let mut found: Option<&[u8]> = None;
            let mut off = 0;
            while off < payload.len() {
                let child =
                    ebml::parse_tag(&payload[off..])?.ok_or(ParseError::MalformedEbml)?;
                let body = child.payload(&payload[off..]);
                match child.id {
                    constants::BLOCK => found = Some(body),
                    constants::REFERENCE_BLOCK => key = ebml::parse_fixed_uint(body) == 0,
                    _ => {}
                }
                off += child.total_len() as usize;
            }
            found.ok_or(ParseError::EmptyBlockGroup)?
        } else {
            payload
        };

        // Block layout: track vint, 16-bit signed timecode offset, flags.
        // The flags byte's high bit is the keyframe flag in a SimpleBlock,
        // always clear in a Block.
        let track = ebml::parse_vint(block)
            .map_err(|_| ParseError::InvalidTrack)?
            .ok_or(ParseError::InvalidTrack)?;
        if track.value >= MAX_TRACKS || block.len() < track.consumed + 3 {
            return Err(ParseError::InvalidTrack);
        }
        key = key || block[track.consumed + 2] & 0x80 != 0;

        let offset = i16::from_be_bytes([block[track.consumed], block[track.consumed + 1]]);
        let timing = st.timeline.on_block(offset);
        let cluster = synthetic_cluster(timing.cluster_tc);
        let frame = BufferedFrame {
            data: chunk,
            track: track.value as u8,
            key,
        };

        self.dispatch(st, &cluster, timing.force, &frame);
        st.timeline.after_emit();

        if timing.force {
            st.ring.push_cluster(cluster);
        }
        st.ring.push_frame(frame);
        Ok(())
    }

    /// One fan-out pass over all viewers
    fn dispatch(&self, st: &MuxState, cluster: &Bytes, force: bool, frame: &BufferedFrame) {
        let mut viewers = self.viewers.lock().unwrap();
        if viewers.is_empty() {
            return;
        }

        let mut tracks_snapshot: Option<Bytes> = None;

        for viewer in viewers.values_mut() {
            if viewer.needs_headers() {
                if st.header.is_empty() || st.tracks.is_empty() {
                    continue;
                }
                let tracks = tracks_snapshot
                    .get_or_insert_with(|| Bytes::copy_from_slice(&st.tracks))
                    .clone();
                if !viewer.write_headers(st.header.clone(), tracks) {
                    // Saturated before it even started; retry next frame
                    continue;
                }
                st.ring.replay(|header, replay_force, buffered| {
                    viewer.write_frame(header, replay_force, buffered);
                });
            }

            viewer.write_frame(cluster, force, frame);
        }

        viewers.retain(|_, viewer| !viewer.is_gone());
    }
}

/// Neutralize Duration and enforce millisecond resolution in an Info tag
///
/// Live streams must not carry a duration, so the Duration child's id is
/// overwritten in place with a Void id and a one-byte length covering the
/// rest of the child. Only rewrites that fit those two bytes are possible.
fn rewrite_info(chunk: &mut BytesMut, tag: Tag) -> Result<()> {
    let start = tag.header_size as usize;
    let end = tag.total_len() as usize;
    let mut scale: u64 = 0;

    let mut off = start;
    while off < end {
        let child = ebml::parse_tag(&chunk[off..end])?.ok_or(ParseError::MalformedEbml)?;
        match child.id {
            constants::DURATION => {
                // Duration's id is two bytes; the rewrite needs the length
                // field to fit right behind a one-byte Void id
                let length_width = child.header_size as usize - 2;
                let void_len = child.total_len() - 2;
                if length_width > 2 || void_len > 0x7F {
                    return Err(ParseError::DurationTooLarge);
                }
                chunk[off] = constants::VOID as u8;
                chunk[off + 1] = 0x80 | void_len as u8;
            }
            constants::TIMECODE_SCALE => {
                scale = ebml::parse_fixed_uint(child.payload(&chunk[off..end]));
            }
            _ => {}
        }
        off += child.total_len() as usize;
    }

    // The timecode rewriting logic only works at millisecond resolution
    if scale != 1_000_000 {
        return Err(ParseError::InvalidTimecodeScale);
    }
    Ok(())
}

/// Pull track flags and video dimensions out of a TrackEntry
fn scan_track_entry(chunk: &[u8], tag: Tag, info: &mut TrackInfo) -> Result<()> {
    let payload = &chunk[tag.header_size as usize..tag.total_len() as usize];

    let mut off = 0;
    while off < payload.len() {
        let child = ebml::parse_tag(&payload[off..])?.ok_or(ParseError::MalformedEbml)?;
        let body = child.payload(&payload[off..]);
        match child.id {
            constants::TRACK_NUMBER => {
                if ebml::parse_fixed_uint(body) >= MAX_TRACKS {
                    return Err(ParseError::TooManyTracks);
                }
            }
            constants::AUDIO => info.has_audio = true,
            constants::VIDEO => {
                info.has_video = true;
                let mut voff = 0;
                while voff < body.len() {
                    let grand =
                        ebml::parse_tag(&body[voff..])?.ok_or(ParseError::MalformedEbml)?;
                    let value = grand.payload(&body[voff..]);
                    match grand.id {
                        constants::PIXEL_WIDTH => {
                            info.width = ebml::parse_fixed_uint(value) as u32;
                        }
                        constants::PIXEL_HEIGHT => {
                            info.height = ebml::parse_fixed_uint(value) as u32;
                        }
                        _ => {}
                    }
                    voff += grand.total_len() as usize;
                }
            }
            _ => {}
        }
        off += child.total_len() as usize;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::Receiver;

    // --- minimal WebM stream builders ---

    fn ebml_header() -> Vec<u8> {
        vec![0x1A, 0x45, 0xDF, 0xA3, 0x84, 0x42, 0x86, 0x81, 0x01]
    }

    fn segment_opener() -> Vec<u8> {
        vec![0x18, 0x53, 0x80, 0x67, 0xFF]
    }

    fn timecode_scale(value: u32) -> Vec<u8> {
        let mut out = vec![0x2A, 0xD7, 0xB1, 0x84];
        out.extend_from_slice(&value.to_be_bytes());
        out
    }

    fn info(children: &[Vec<u8>]) -> Vec<u8> {
        let payload: Vec<u8> = children.concat();
        assert!(payload.len() <= 0x7F);
        let mut out = vec![0x15, 0x49, 0xA9, 0x66, 0x80 | payload.len() as u8];
        out.extend_from_slice(&payload);
        out
    }

    fn default_info() -> Vec<u8> {
        info(&[timecode_scale(1_000_000)])
    }

    /// Duration child with a length field of the given byte width
    fn duration(length_width: usize) -> Vec<u8> {
        let mut out = vec![0x44, 0x89];
        match length_width {
            1 => out.push(0x88),
            2 => out.extend_from_slice(&[0x40, 0x08]),
            3 => out.extend_from_slice(&[0x20, 0x00, 0x08]),
            _ => panic!("unsupported width"),
        }
        out.extend_from_slice(&[0x45, 0x1C, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00]);
        out
    }

    fn track_entry(number: u8, video: bool) -> Vec<u8> {
        let mut payload = vec![0xD7, 0x81, number];
        if video {
            // Video with PixelWidth 640 and PixelHeight 480
            payload.extend_from_slice(&[
                0xE0, 0x88, 0xB0, 0x82, 0x02, 0x80, 0xBA, 0x82, 0x01, 0xE0,
            ]);
        } else {
            // Empty Audio container
            payload.extend_from_slice(&[0xE1, 0x80]);
        }
        let mut out = vec![0xAE, 0x80 | payload.len() as u8];
        out.extend_from_slice(&payload);
        out
    }

    fn tracks(entries: &[Vec<u8>]) -> Vec<u8> {
        let payload: Vec<u8> = entries.concat();
        assert!(payload.len() <= 0x7F);
        let mut out = vec![0x16, 0x54, 0xAE, 0x6B, 0x80 | payload.len() as u8];
        out.extend_from_slice(&payload);
        out
    }

    fn cluster(timecode: u8) -> Vec<u8> {
        vec![0x1F, 0x43, 0xB6, 0x75, 0xFF, 0xE7, 0x81, timecode]
    }

    fn simple_block(track: u8, offset: i16, key: bool) -> Vec<u8> {
        let off = offset.to_be_bytes();
        let flags = if key { 0x80 } else { 0x00 };
        vec![0xA3, 0x86, 0x80 | track, off[0], off[1], flags, 0xAA, 0xBB]
    }

    fn block_group(track: u8, offset: i16, reference: Option<u8>) -> Vec<u8> {
        let off = offset.to_be_bytes();
        let mut payload = vec![0xA1, 0x86, 0x80 | track, off[0], off[1], 0x00, 0xCC, 0xDD];
        if let Some(value) = reference {
            payload.extend_from_slice(&[0xFB, 0x81, value]);
        }
        let mut out = vec![0xA0, 0x80 | payload.len() as u8];
        out.extend_from_slice(&payload);
        out
    }

    /// EBML header through Tracks for a single 640x480 video track
    fn preamble() -> Vec<u8> {
        [
            ebml_header(),
            segment_opener(),
            default_info(),
            tracks(&[track_entry(1, true)]),
        ]
        .concat()
    }

    fn drain(rx: &mut Receiver<Bytes>) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            out.push(chunk);
        }
        out
    }

    fn flatten(chunks: &[Bytes]) -> Vec<u8> {
        chunks.iter().flat_map(|c| c.iter().copied()).collect()
    }

    /// The tracks opener a viewer should receive for `preamble`
    fn expected_tracks() -> Vec<u8> {
        let all = tracks(&[track_entry(1, true)]);
        [segment_opener(), default_info(), all[..5].to_vec(), track_entry(1, true)].concat()
    }

    // --- scenarios ---

    #[tokio::test]
    async fn test_single_segment_two_viewers_one_late() {
        let cast = Broadcast::new(120);

        let (tx_a, mut rx_a) = mpsc::channel(64);
        cast.connect(tx_a, false);

        cast.write(&preamble()).await.unwrap();
        cast.write(&cluster(0)).await.unwrap();
        cast.write(&simple_block(1, 0, true)).await.unwrap();

        // B joins after the first keyframe
        let (tx_b, mut rx_b) = mpsc::channel(64);
        cast.connect(tx_b, false);

        cast.write(&simple_block(1, 33, false)).await.unwrap();
        cast.write(&simple_block(1, 66, true)).await.unwrap();

        let expected_a = [
            ebml_header(),
            expected_tracks(),
            synthetic_cluster(0).to_vec(),
            simple_block(1, 0, true),
            simple_block(1, 33, false),
            simple_block(1, 66, true),
        ]
        .concat();
        assert_eq!(flatten(&drain(&mut rx_a)), expected_a);

        // B catches up from the buffered keyframe, then gets live frames
        let expected_b = [
            ebml_header(),
            expected_tracks(),
            synthetic_cluster(0).to_vec(),
            simple_block(1, 0, true),
            simple_block(1, 33, false),
            simple_block(1, 66, true),
        ]
        .concat();
        assert_eq!(flatten(&drain(&mut rx_b)), expected_b);
    }

    #[tokio::test]
    async fn test_headers_sent_exactly_once() {
        let cast = Broadcast::new(120);
        let (tx, mut rx) = mpsc::channel(64);
        cast.connect(tx, false);

        cast.write(&preamble()).await.unwrap();
        cast.write(&cluster(0)).await.unwrap();
        cast.write(&simple_block(1, 0, true)).await.unwrap();
        cast.write(&simple_block(1, 33, false)).await.unwrap();

        let bytes = flatten(&drain(&mut rx));
        let header = ebml_header();
        let count = bytes
            .windows(header.len())
            .filter(|w| *w == &header[..])
            .count();
        assert_eq!(count, 1);
        assert!(bytes.starts_with(&[header.clone(), expected_tracks()].concat()));
    }

    #[tokio::test]
    async fn test_producer_reconnect_preserves_monotonicity() {
        let cast = Broadcast::new(120);
        let (tx, mut rx) = mpsc::channel(64);
        cast.connect(tx, false);

        cast.write(&preamble()).await.unwrap();
        cast.write(&cluster(0)).await.unwrap();
        cast.write(&simple_block(1, 0, true)).await.unwrap();
        cast.write(&simple_block(1, 33, false)).await.unwrap();
        cast.write(&simple_block(1, 66, true)).await.unwrap();
        drain(&mut rx);

        // Producer reconnects within the grace window and restarts at zero
        let second = [
            segment_opener(),
            default_info(),
            tracks(&[track_entry(1, true)]),
            cluster(0),
            simple_block(1, 0, true),
        ]
        .concat();
        cast.write(&second).await.unwrap();

        // No repeated headers; a cluster at or after the last timecode
        let expected = [
            synthetic_cluster(66).to_vec(),
            simple_block(1, 0, true),
        ]
        .concat();
        assert_eq!(flatten(&drain(&mut rx)), expected);
    }

    #[tokio::test]
    async fn test_fragmented_upload_is_invariant() {
        let stream = [
            preamble(),
            cluster(0),
            simple_block(1, 0, true),
            simple_block(1, 33, false),
            simple_block(1, 66, true),
        ]
        .concat();

        let whole = Broadcast::new(120);
        let (tx, mut rx) = mpsc::channel(256);
        whole.connect(tx, false);
        whole.write(&stream).await.unwrap();
        let expected = flatten(&drain(&mut rx));

        let fragmented = Broadcast::new(120);
        let (tx, mut rx) = mpsc::channel(256);
        fragmented.connect(tx, false);
        for byte in &stream {
            fragmented.write(std::slice::from_ref(byte)).await.unwrap();
        }
        assert_eq!(flatten(&drain(&mut rx)), expected);
    }

    #[tokio::test]
    async fn test_backpressure_desync_recovers_at_keyframe() {
        let cast = Broadcast::new(120);
        // Room for headers + tracks + cluster + one frame, nothing more
        let (tx, mut rx) = mpsc::channel(4);
        cast.connect(tx, false);

        cast.write(&preamble()).await.unwrap();
        cast.write(&cluster(0)).await.unwrap();
        cast.write(&simple_block(1, 0, true)).await.unwrap();

        // Queue is now full: the delta block is dropped and the track desyncs
        cast.write(&simple_block(1, 33, false)).await.unwrap();

        let bytes = flatten(&drain(&mut rx));
        let expected = [
            ebml_header(),
            expected_tracks(),
            synthetic_cluster(0).to_vec(),
            simple_block(1, 0, true),
        ]
        .concat();
        assert_eq!(bytes, expected);

        // The next keyframe re-syncs, preceded by a cluster header
        cast.write(&simple_block(1, 66, true)).await.unwrap();
        let expected = [synthetic_cluster(0).to_vec(), simple_block(1, 66, true)].concat();
        assert_eq!(flatten(&drain(&mut rx)), expected);
    }

    #[tokio::test]
    async fn test_block_group_without_reference_is_keyframe() {
        let cast = Broadcast::new(120);
        let (tx, mut rx) = mpsc::channel(64);
        cast.connect(tx, false);

        cast.write(&preamble()).await.unwrap();
        cast.write(&cluster(0)).await.unwrap();
        cast.write(&block_group(1, 0, None)).await.unwrap();

        let bytes = flatten(&drain(&mut rx));
        assert!(bytes.ends_with(&block_group(1, 0, None)));
    }

    #[tokio::test]
    async fn test_block_group_with_reference_is_gated() {
        let cast = Broadcast::new(120);
        let (tx, mut rx) = mpsc::channel(64);
        cast.connect(tx, false);

        cast.write(&preamble()).await.unwrap();
        cast.write(&cluster(0)).await.unwrap();
        // References another frame: not a keyframe. Headers go out on the
        // first dispatch, but the gated frame itself does not.
        cast.write(&block_group(1, 0, Some(0x01))).await.unwrap();
        let bytes = flatten(&drain(&mut rx));
        assert_eq!(bytes, [ebml_header(), expected_tracks()].concat());

        // An explicit zero reference counts as a keyframe
        cast.write(&block_group(1, 10, Some(0x00))).await.unwrap();
        let expected = [
            synthetic_cluster(0).to_vec(),
            block_group(1, 10, Some(0x00)),
        ]
        .concat();
        assert_eq!(flatten(&drain(&mut rx)), expected);
    }

    #[tokio::test]
    async fn test_empty_block_group_rejected() {
        let cast = Broadcast::new(120);
        cast.write(&preamble()).await.unwrap();
        cast.write(&cluster(0)).await.unwrap();

        let group = vec![0xA0, 0x83, 0xFB, 0x81, 0x00];
        assert_eq!(
            cast.write(&group).await,
            Err(ParseError::EmptyBlockGroup)
        );
    }

    #[tokio::test]
    async fn test_malformed_tag_mid_stream_recovers() {
        let cast = Broadcast::new(120);
        let (tx, mut rx) = mpsc::channel(64);
        cast.connect(tx, false);

        cast.write(&preamble()).await.unwrap();
        cast.write(&cluster(0)).await.unwrap();
        cast.write(&simple_block(1, 0, true)).await.unwrap();
        drain(&mut rx);

        // A zero byte where a tag id belongs kills the session
        assert_eq!(cast.write(&[0x00]).await, Err(ParseError::MalformedEbml));

        // Ingest buffer was invalidated; the viewer stayed attached and a
        // reconnecting producer resumes playback at its next keyframe
        let resume = [
            segment_opener(),
            default_info(),
            tracks(&[track_entry(1, true)]),
            cluster(0),
            simple_block(1, 0, true),
        ]
        .concat();
        cast.write(&resume).await.unwrap();
        assert_eq!(cast.viewer_count(), 1);
        assert!(!drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_error_empties_ingest_buffer() {
        let cast = Broadcast::new(120);
        cast.write(&preamble()).await.unwrap();

        // Leave a partial tag pending, then fail
        assert!(cast.write(&[0x00]).await.is_err());
        assert!(cast.state.lock().await.buffer.is_empty());
    }

    // --- boundaries ---

    #[tokio::test]
    async fn test_track_number_limits() {
        let cast = Broadcast::new(120);
        let stream = [
            ebml_header(),
            segment_opener(),
            default_info(),
            tracks(&[track_entry(31, true)]),
        ]
        .concat();
        cast.write(&stream).await.unwrap();

        let cast = Broadcast::new(120);
        let stream = [
            ebml_header(),
            segment_opener(),
            default_info(),
            tracks(&[track_entry(32, true)]),
        ]
        .concat();
        assert_eq!(cast.write(&stream).await, Err(ParseError::TooManyTracks));
    }

    #[tokio::test]
    async fn test_block_on_track_32_rejected() {
        let cast = Broadcast::new(120);
        cast.write(&preamble()).await.unwrap();
        cast.write(&cluster(0)).await.unwrap();

        // Track vint 0xA0 decodes to 32
        let block = vec![0xA3, 0x86, 0xA0, 0x00, 0x00, 0x80, 0xAA, 0xBB];
        assert_eq!(cast.write(&block).await, Err(ParseError::InvalidTrack));
    }

    #[tokio::test]
    async fn test_truncated_block_rejected() {
        let cast = Broadcast::new(120);
        cast.write(&preamble()).await.unwrap();
        cast.write(&cluster(0)).await.unwrap();

        // Track number but only one timecode byte
        let block = vec![0xA3, 0x82, 0x81, 0x00];
        assert_eq!(cast.write(&block).await, Err(ParseError::InvalidTrack));
    }

    #[tokio::test]
    async fn test_duration_width_two_rewritten_width_three_rejected() {
        let cast = Broadcast::new(120);
        let (tx, mut rx) = mpsc::channel(64);
        cast.connect(tx, false);

        let stream = [
            ebml_header(),
            segment_opener(),
            info(&[duration(2), timecode_scale(1_000_000)]),
            tracks(&[track_entry(1, true)]),
            cluster(0),
            simple_block(1, 0, true),
        ]
        .concat();
        cast.write(&stream).await.unwrap();

        // The viewer sees the Duration neutralized to a Void tag
        let bytes = flatten(&drain(&mut rx));
        let patched: Vec<u8> = {
            let mut d = duration(2);
            d[0] = 0xEC;
            d[1] = 0x80 | (d.len() - 2) as u8;
            d
        };
        assert!(bytes
            .windows(patched.len())
            .any(|w| w == &patched[..]));

        let cast = Broadcast::new(120);
        let stream = [
            ebml_header(),
            segment_opener(),
            info(&[duration(3), timecode_scale(1_000_000)]),
        ]
        .concat();
        assert_eq!(
            cast.write(&stream).await,
            Err(ParseError::DurationTooLarge)
        );
    }

    #[tokio::test]
    async fn test_timecode_scale_must_be_milliseconds() {
        let cast = Broadcast::new(120);
        let stream = [
            ebml_header(),
            segment_opener(),
            info(&[timecode_scale(1_000)]),
        ]
        .concat();
        assert_eq!(
            cast.write(&stream).await,
            Err(ParseError::InvalidTimecodeScale)
        );

        // Missing scale is just as wrong
        let cast = Broadcast::new(120);
        let stream = [ebml_header(), segment_opener(), info(&[])].concat();
        assert_eq!(
            cast.write(&stream).await,
            Err(ParseError::InvalidTimecodeScale)
        );
    }

    #[tokio::test]
    async fn test_payload_cap_at_one_mebibyte() {
        // Void tags are discarded but still bounded
        let cast = Broadcast::new(120);
        let mut tag = vec![0xEC, 0x01, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00];
        tag.resize(tag.len() + 1024 * 1024, 0);
        cast.write(&tag).await.unwrap();

        let cast = Broadcast::new(120);
        let mut tag = vec![0xEC, 0x01, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x01];
        tag.resize(tag.len() + 1024 * 1024 + 1, 0);
        assert_eq!(cast.write(&tag).await, Err(ParseError::BlockTooLarge));
    }

    #[tokio::test]
    async fn test_indeterminate_on_non_container_rejected() {
        let cast = Broadcast::new(120);
        cast.write(&preamble()).await.unwrap();
        cast.write(&cluster(0)).await.unwrap();

        let block = vec![0xA3, 0xFF, 0x81, 0x00, 0x00, 0x80];
        assert_eq!(
            cast.write(&block).await,
            Err(ParseError::IndeterminateNotAllowed)
        );
    }

    #[tokio::test]
    async fn test_indeterminate_tracks_rejected() {
        let cast = Broadcast::new(120);
        let stream = [
            ebml_header(),
            segment_opener(),
            default_info(),
            vec![0x16, 0x54, 0xAE, 0x6B, 0xFF],
        ]
        .concat();
        assert_eq!(
            cast.write(&stream).await,
            Err(ParseError::IndeterminateNotAllowed)
        );
    }

    #[tokio::test]
    async fn test_unknown_top_level_tag_rejected() {
        let cast = Broadcast::new(120);
        cast.write(&preamble()).await.unwrap();

        // A ReferenceBlock is only meaningful inside a BlockGroup
        let stray = vec![0xFB, 0x81, 0x00];
        assert_eq!(cast.write(&stray).await, Err(ParseError::UnknownTag));
    }

    #[tokio::test]
    async fn test_track_info_captured_and_reported_once() {
        let cast = Broadcast::new(120);
        cast.write(&preamble()).await.unwrap();

        let info = cast.track_info().await;
        assert!(info.has_video);
        assert!(!info.has_audio);
        assert_eq!((info.width, info.height), (640, 480));

        assert_eq!(cast.take_changed_track_info().await, Some(info));
        assert_eq!(cast.take_changed_track_info().await, None);
    }

    #[tokio::test]
    async fn test_audio_track_flag() {
        let cast = Broadcast::new(120);
        let stream = [
            ebml_header(),
            segment_opener(),
            default_info(),
            tracks(&[track_entry(1, true), track_entry(2, false)]),
        ]
        .concat();
        cast.write(&stream).await.unwrap();

        let info = cast.track_info().await;
        assert!(info.has_video);
        assert!(info.has_audio);
    }

    #[tokio::test]
    async fn test_shutdown_sends_empty_payload() {
        let cast = Broadcast::new(120);
        let (tx, mut rx) = mpsc::channel(8);
        cast.connect(tx, false);

        cast.shutdown();
        assert!(rx.try_recv().unwrap().is_empty());
        assert!(cast.is_closed());
        assert_eq!(cast.viewer_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_after_shutdown_gets_eos() {
        let cast = Broadcast::new(120);
        cast.shutdown();

        let (tx, mut rx) = mpsc::channel(8);
        cast.connect(tx, false);
        assert!(rx.try_recv().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_stops_delivery() {
        let cast = Broadcast::new(120);
        let (tx, mut rx) = mpsc::channel(64);
        let id = cast.connect(tx, false);

        cast.write(&preamble()).await.unwrap();
        cast.write(&cluster(0)).await.unwrap();
        cast.write(&simple_block(1, 0, true)).await.unwrap();
        drain(&mut rx);

        cast.disconnect(id);
        cast.write(&simple_block(1, 33, false)).await.unwrap();
        assert!(drain(&mut rx).is_empty());
        assert_eq!(cast.viewer_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let cast = Broadcast::new(120);
        let (tx, rx) = mpsc::channel(64);
        cast.connect(tx, false);
        drop(rx);

        cast.write(&preamble()).await.unwrap();
        cast.write(&cluster(0)).await.unwrap();
        cast.write(&simple_block(1, 0, true)).await.unwrap();
        assert_eq!(cast.viewer_count(), 0);
    }

    #[tokio::test]
    async fn test_multi_track_first_delivered_frame_is_keyframe() {
        let cast = Broadcast::new(120);
        let (tx, mut rx) = mpsc::channel(64);
        cast.connect(tx, false);

        let opener = [
            ebml_header(),
            segment_opener(),
            default_info(),
            tracks(&[track_entry(1, true), track_entry(2, false)]),
        ]
        .concat();
        cast.write(&opener).await.unwrap();
        cast.write(&cluster(0)).await.unwrap();

        // Video starts mid-GOP: the delta is gated, audio passes right away
        cast.write(&simple_block(1, 0, false)).await.unwrap();
        cast.write(&simple_block(2, 5, true)).await.unwrap();
        cast.write(&simple_block(1, 33, false)).await.unwrap();
        cast.write(&simple_block(1, 66, true)).await.unwrap();

        let bytes = flatten(&drain(&mut rx));
        let expected_opener = {
            let all = tracks(&[track_entry(1, true), track_entry(2, false)]);
            [
                segment_opener(),
                default_info(),
                all[..5].to_vec(),
                track_entry(1, true),
                track_entry(2, false),
            ]
            .concat()
        };
        let expected = [
            ebml_header(),
            expected_opener,
            synthetic_cluster(0).to_vec(),
            simple_block(2, 5, true),
            simple_block(1, 66, true),
        ]
        .concat();
        assert_eq!(bytes, expected);
    }

    #[tokio::test]
    async fn test_write_reports_all_bytes_consumed() {
        let cast = Broadcast::new(120);
        let stream = preamble();
        assert_eq!(cast.write(&stream).await.unwrap(), stream.len());

        // Even a partial tag counts as consumed; it is buffered
        let partial = [0x1F, 0x43];
        assert_eq!(cast.write(&partial).await.unwrap(), partial.len());
    }

    #[tokio::test]
    async fn test_ring_eviction_keeps_cluster_context() {
        let cast = Broadcast::new(4);

        cast.write(&preamble()).await.unwrap();
        cast.write(&cluster(0)).await.unwrap();
        cast.write(&simple_block(1, 0, true)).await.unwrap();
        // Push the cluster marker out of the ring
        for i in 1..5i16 {
            cast.write(&simple_block(1, i * 10, false)).await.unwrap();
        }
        assert_eq!(cast.ring_len().await, 4);

        // A late joiner still gets a cluster header before the frames
        let (tx, mut rx) = mpsc::channel(64);
        cast.connect(tx, false);
        cast.write(&simple_block(1, 100, true)).await.unwrap();

        let bytes = flatten(&drain(&mut rx));
        let headers_len = ebml_header().len() + expected_tracks().len();
        assert_eq!(
            &bytes[headers_len..headers_len + 15],
            &synthetic_cluster(0)[..]
        );
    }
}
