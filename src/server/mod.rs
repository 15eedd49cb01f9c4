//! HTTP edge of the relay
//!
//! A thin axum layer: one route per stream id, producers on `PUT`/`POST`,
//! viewers on `GET`. Everything stateful lives in the broadcast set.

pub mod config;
pub mod routes;

pub use config::ServerConfig;
pub use routes::{router, AppState};
