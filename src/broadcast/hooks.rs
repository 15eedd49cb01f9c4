//! Collaborator interface
//!
//! The relay core knows nothing about accounts, directories, or databases;
//! those live outside and observe the core through this trait.

use super::cast::TrackInfo;

/// Callbacks from the relay core to the surrounding application
///
/// All methods have defaults, so a collaborator only implements what it
/// cares about. Callbacks are invoked from relay tasks and must not block.
pub trait RelayHooks: Send + Sync + 'static {
    /// Decide whether a producer may publish `id` with the given token
    fn authorize(&self, _id: &str, _token: &str) -> bool {
        true
    }

    /// A stream was destroyed after its grace period ran out
    fn on_stream_close(&self, _id: &str) {}

    /// Track metadata changed; reported at most once per tick
    fn on_track_info(&self, _id: &str, _info: TrackInfo) {}
}

/// Accept-everything hooks for tests and standalone relays
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl RelayHooks for NoHooks {}
