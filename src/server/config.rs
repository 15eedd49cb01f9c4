//! HTTP server configuration

use std::net::SocketAddr;

/// Configuration for the HTTP edge of the relay
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Largest slice of a request body fed to the parser in one call
    pub ingest_chunk_size: usize,

    /// Capacity of each viewer's outgoing queue, in byte-chunk slots
    ///
    /// Chunks are tag-sized, so this is measured in frames rather than
    /// bytes. A saturated queue makes the viewer skip to the next keyframe.
    pub viewer_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().unwrap(),
            ingest_chunk_size: 16 * 1024,
            viewer_queue_capacity: 60,
        }
    }
}

impl ServerConfig {
    /// Create a config with a custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the ingest chunk size
    pub fn ingest_chunk_size(mut self, size: usize) -> Self {
        self.ingest_chunk_size = size.max(1);
        self
    }

    /// Set the viewer queue capacity
    pub fn viewer_queue_capacity(mut self, slots: usize) -> Self {
        self.viewer_queue_capacity = slots.max(2);
        self
    }
}
