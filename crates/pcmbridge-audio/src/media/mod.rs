//! Whole-file playback.
//!
//! [`FilePlaybackController`] drives one [`MediaPlayer`] at a time through
//! prepare, transport controls and completion. Players come from a
//! [`MediaBackend`]; [`DecodedMediaBackend`] decodes with symphonia and plays
//! through a device sink.

use std::path::Path;
use std::sync::Arc;

use crossbeam_channel::Sender;
use pcmbridge_core::Result;

pub mod controller;
pub mod decoded;

pub use controller::{FilePlaybackController, FilePlaybackSession, FileState, PendingStart, StartOutcome};
pub use decoded::{DecodedMediaBackend, DecodedMediaPlayer};

/// A player for one media file.
pub trait MediaPlayer: Send + Sync {
    /// Open `path` and detect its format. Blocks until the player is ready to start.
    fn prepare(&self, path: &Path) -> Result<()>;

    fn start(&self) -> Result<()>;

    fn pause(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    /// Free the decoder and output. Idempotent.
    fn release(&self);

    fn is_playing(&self) -> bool;

    fn current_position_ms(&self) -> u64;

    /// Zero until prepared or when unknown.
    fn duration_ms(&self) -> u64;

    /// Absolute seek.
    fn seek_to(&self, position_ms: u64) -> Result<()>;

    fn set_volume(&self, left: f32, right: f32) -> Result<()>;
}

/// Creates media players.
pub trait MediaBackend: Send + Sync {
    /// Create an unprepared player. It sends on `completion` once when
    /// playback reaches the end of the file.
    fn create(&self, completion: Sender<()>) -> Result<Arc<dyn MediaPlayer>>;
}
