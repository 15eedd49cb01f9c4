//! Broadcast set error types

/// Error type for broadcast set acquisition
#[derive(Debug, Clone)]
pub enum BroadcastError {
    /// Stream already has a live producer
    AlreadyPublishing(String),
    /// Stream does not exist or has been destroyed
    NotFound(String),
}

impl std::fmt::Display for BroadcastError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BroadcastError::AlreadyPublishing(id) => {
                write!(f, "Stream already has a producer: {}", id)
            }
            BroadcastError::NotFound(id) => write!(f, "Stream not found: {}", id),
        }
    }
}

impl std::error::Error for BroadcastError {}
