//! # pcmbridge-audio
//!
//! Playback engines for the pcmbridge audio bridge.
//!
//! Features:
//! - Streaming player feeding pre-decoded PCM chunks to an output device
//! - Lock-free sample ring between writers and the output callback
//! - Whole-file playback with symphonia decoding and progress events
//! - cpal hardware output, or a real-time software sink for headless hosts

pub mod buffer;
pub mod decode;
pub mod device;
pub mod media;
pub mod output;
pub mod progress;
pub mod streaming;
pub mod timer;

pub use device::{CpalBackend, DeviceBackend, PlaybackDevice, VirtualBackend};
pub use media::{
    DecodedMediaBackend, FilePlaybackController, FilePlaybackSession, FileState, MediaBackend,
    MediaPlayer, PendingStart, StartOutcome,
};
pub use streaming::{StreamState, StreamingPlayer};
