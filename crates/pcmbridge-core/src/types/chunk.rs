//! Audio chunk submitted by a producer.

use crate::{Error, Result};

/// One submitted buffer of raw PCM bytes.
///
/// The contents never change after construction. An empty chunk marks the
/// end of the stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioChunk(Box<[u8]>);

impl AudioChunk {
    pub fn new(data: impl Into<Box<[u8]>>) -> Self {
        Self(data.into())
    }

    /// Copy exactly the first `size` bytes of `buffer`.
    pub fn copy_from(buffer: &[u8], size: usize) -> Result<Self> {
        let data = buffer.get(..size).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "size {size} exceeds buffer length {}",
                buffer.len()
            ))
        })?;
        Ok(Self(data.into()))
    }

    /// The end-of-stream marker.
    pub fn end_of_stream() -> Self {
        Self::default()
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for AudioChunk {
    fn from(data: Vec<u8>) -> Self {
        Self(data.into_boxed_slice())
    }
}
