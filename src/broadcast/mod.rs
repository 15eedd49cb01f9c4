//! Broadcast engine: demux, rewrite, fan-out, lifecycle
//!
//! One producer feeds a stream, many viewers read it, and the set keeps
//! streams alive across producer reconnects:
//!
//! ```text
//!                         BroadcastSet
//!                  ┌──────────────────────────┐
//!                  │ streams: HashMap<String, │
//!                  │   Arc<BroadcastEntry> {  │
//!                  │     Broadcast,           │
//!                  │     phase, rate,         │
//!                  │   }                      │
//!                  │ >                        │
//!                  └────────────┬─────────────┘
//!                               │
//!        ┌──────────────────────┼──────────────────────┐
//!        │                      │                      │
//!        ▼                      ▼                      ▼
//!   [Producer]             [Viewer]               [Viewer]
//!   entry.write()          queue.recv()           queue.recv()
//!        │                      ▲                      ▲
//!        └─► Broadcast::write ──┴── try_send ──────────┘
//! ```
//!
//! # Zero-copy design
//!
//! `bytes::Bytes` is reference counted: every viewer queue and the catch-up
//! ring share the producer's ingest allocation. Fan-out clones chunk
//! handles, never payloads.

pub mod cast;
pub mod config;
pub mod entry;
pub mod error;
pub mod hooks;
pub mod ring;
pub mod set;
pub mod viewer;

mod timeline;

pub use cast::{Broadcast, TrackInfo, MAX_TAG_PAYLOAD, MAX_TRACKS};
pub use config::BroadcastConfig;
pub use entry::{BroadcastEntry, BroadcastPhase};
pub use error::BroadcastError;
pub use hooks::{NoHooks, RelayHooks};
pub use ring::{BufferedFrame, FrameRing, RingEntry};
pub use set::BroadcastSet;
pub use viewer::ViewerId;
