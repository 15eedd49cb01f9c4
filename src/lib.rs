//! Live WebM broadcast relay
//!
//! A single producer uploads a continuous WebM stream over HTTP; any number
//! of viewers receive a retransmitted stream that is playable from the
//! moment they connect. The relay parses just enough of the container to
//! find keyframes and cluster boundaries, rewrites cluster timecodes so
//! that producer reconnects concatenate into one monotonic stream, and
//! gates each viewer's output on reference-frame availability under
//! backpressure.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use webm_relay::{BroadcastConfig, BroadcastSet, NoHooks, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let set = BroadcastSet::new(BroadcastConfig::default(), Arc::new(NoHooks));
//!     let config = ServerConfig::default();
//!     let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
//!     axum::serve(listener, webm_relay::router(set, config)).await?;
//!     Ok(())
//! }
//! ```
//!
//! Publish with `ffmpeg -i input -c:v libvpx -c:a libvorbis -f webm
//! http://localhost:8080/mystream` and watch at the same URL.

pub mod broadcast;
pub mod ebml;
pub mod error;
pub mod server;
pub mod stats;

pub use broadcast::{
    Broadcast, BroadcastConfig, BroadcastEntry, BroadcastError, BroadcastPhase, BroadcastSet,
    NoHooks, RelayHooks, TrackInfo, ViewerId,
};
pub use error::{ParseError, Result};
pub use server::{router, ServerConfig};
pub use stats::BroadcastStats;
