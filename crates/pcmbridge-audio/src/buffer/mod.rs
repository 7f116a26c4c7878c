//! Buffers between producers, playback threads, and output callbacks.

pub mod queue;
pub mod ring;

pub use queue::BufferQueue;
pub use ring::SampleRing;
