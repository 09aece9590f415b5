//! The external player contract.
//!
//! The decode/composite/render pipeline is out of scope; the arbiter drives
//! it through this narrow trait and receives lifecycle events back through
//! [`crate::playback::PlaybackArbiter::handle_event`].

use crate::error::Result;
use std::path::Path;

/// Classification of a playback failure reported by the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The resolved file could not be opened or parsed.
    File,
    /// The container decoded but frames could not be produced.
    Decode,
    /// The render surface failed.
    Render,
    /// Anything else.
    Other,
}

/// Lifecycle events emitted by the external player.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// Playback started.
    Started,
    /// A frame was rendered; index 1 is the first visible frame.
    FrameRendered(u32),
    /// The current pass through the animation finished.
    Completed,
    /// The player tore down its surface.
    Destroyed,
    /// Playback failed.
    Failed {
        /// Failure classification.
        kind: FailureKind,
        /// Human-readable description.
        message: String,
    },
}

/// Narrow interface to the external playback pipeline.
///
/// The arbiter serializes all calls; implementations are never called into
/// from two threads at once.
#[cfg_attr(test, mockall::automock)]
pub trait Player: Send + Sync {
    /// Begin playing the resolved file.
    fn start(&self, file: &Path) -> Result<()>;

    /// Request playback stop. Completion is signalled asynchronously via
    /// [`PlayerEvent::Completed`] or [`PlayerEvent::Destroyed`].
    fn stop(&self);

    /// Returns `true` while a session is starting or running.
    fn is_running(&self) -> bool;

    /// Set the loop count for the next start; values `<= 0` play once.
    fn set_loop(&self, loop_count: i32);

    /// Tear down the render surface and release player resources.
    fn release_surface(&self);
}
