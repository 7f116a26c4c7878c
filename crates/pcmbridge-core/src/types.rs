//! Core domain types for pcmbridge.

pub mod chunk;
pub mod codec;
pub mod events;
pub mod format;

pub use chunk::AudioChunk;
pub use codec::{Codec, DecoderCapabilities};
pub use events::{FileEvent, ProgressSnapshot, StreamEvent};
pub use format::{AudioFormatSpec, ChannelLayout, SampleWidth};
