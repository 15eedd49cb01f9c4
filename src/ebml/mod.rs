//! EBML tokenizer and WebM tag constants
//!
//! The byte-level framing shared by Matroska and WebM. The relay decodes
//! just enough of it to find cluster boundaries, track metadata, and
//! keyframes; complete EBML validation is a non-goal.

pub mod constants;
pub mod tokenizer;

pub use constants::INDETERMINATE;
pub use tokenizer::{parse_fixed_uint, parse_tag, parse_tag_incomplete, parse_vint, Tag, Vint};
