//! Crate error types
//!
//! Parse errors are unrecoverable for the current producer session: the
//! ingest buffer is discarded and the upload fails. Viewers are never
//! disconnected by a parse error; a producer reconnecting within the grace
//! window continues the stream.

use thiserror::Error;

/// Error type for the incremental WebM parser
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A tag id starts with a zero byte, or a child tag overruns its container
    #[error("malformed EBML")]
    MalformedEbml,

    /// Indeterminate length on anything but Segment or Cluster
    #[error("indeterminate length only allowed on Segment and Cluster")]
    IndeterminateNotAllowed,

    /// Non-container tag with a payload over the 1 MiB cap
    #[error("data block too big")]
    BlockTooLarge,

    /// Duration tag that cannot be rewritten to Void in place
    #[error("EBML Duration too large")]
    DurationTooLarge,

    /// TimecodeScale other than 1,000,000 (millisecond resolution)
    #[error("invalid timecode scale")]
    InvalidTimecodeScale,

    /// TrackNumber outside the 32-track keyframe bitmask
    #[error("too many tracks")]
    TooManyTracks,

    /// BlockGroup without a Block child
    #[error("a BlockGroup contains no Blocks")]
    EmptyBlockGroup,

    /// Bad track vint, track number out of range, or truncated block header
    #[error("invalid track")]
    InvalidTrack,

    /// A tag the relay does not recognize at the top level
    #[error("unknown EBML tag")]
    UnknownTag,
}

/// Convenience alias for parse results
pub type Result<T> = std::result::Result<T, ParseError>;
