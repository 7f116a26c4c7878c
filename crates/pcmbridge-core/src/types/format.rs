//! PCM stream format types.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Error, Result};

/// Channel layout of a PCM stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelLayout {
    #[default]
    Mono,
    Stereo,
}

impl ChannelLayout {
    /// Map a raw channel count to a layout. Two is stereo, anything else mono.
    pub const fn from_count(count: u32) -> Self {
        if count == 2 {
            Self::Stereo
        } else {
            Self::Mono
        }
    }

    pub const fn count(self) -> u16 {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
        }
    }
}

/// Sample width of integer PCM.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum SampleWidth {
    /// Unsigned 8-bit PCM.
    #[serde(rename = "u8")]
    Eight,
    /// Signed 16-bit little-endian PCM.
    #[default]
    #[serde(rename = "s16le")]
    Sixteen,
}

impl SampleWidth {
    /// Map a raw bit depth to a width. Sixteen is 16-bit, anything else 8-bit.
    pub const fn from_bits(bits: u32) -> Self {
        if bits == 16 {
            Self::Sixteen
        } else {
            Self::Eight
        }
    }

    pub const fn bits(self) -> u16 {
        match self {
            Self::Eight => 8,
            Self::Sixteen => 16,
        }
    }

    pub const fn bytes(self) -> usize {
        match self {
            Self::Eight => 1,
            Self::Sixteen => 2,
        }
    }

    /// Decode one sample at the start of `bytes` to a normalized f32.
    #[inline]
    pub fn decode(self, bytes: &[u8]) -> f32 {
        match self {
            Self::Eight => (f32::from(bytes[0]) - 128.0) / 128.0,
            Self::Sixteen => f32::from(i16::from_le_bytes([bytes[0], bytes[1]])) / 32768.0,
        }
    }
}

/// Format of a streaming session. Fixed for the lifetime of the session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AudioFormatSpec {
    pub sample_rate: u32,
    pub channels: ChannelLayout,
    pub width: SampleWidth,
}

impl AudioFormatSpec {
    pub const fn new(sample_rate: u32, channels: ChannelLayout, width: SampleWidth) -> Self {
        Self {
            sample_rate,
            channels,
            width,
        }
    }

    /// Build a format from the raw integers a controller sends.
    pub fn from_raw(sample_rate: u32, channels: u32, bits: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::InvalidArgument(
                "sample rate must be positive".to_string(),
            ));
        }
        Ok(Self::new(
            sample_rate,
            ChannelLayout::from_count(channels),
            SampleWidth::from_bits(bits),
        ))
    }

    /// Bytes per interleaved frame.
    pub const fn frame_bytes(&self) -> usize {
        self.channels.count() as usize * self.width.bytes()
    }

    /// Bytes of audio needed to hold `duration` of this stream.
    pub fn buffer_bytes(&self, duration: Duration) -> usize {
        let millis = duration.as_millis() as u64;
        let bytes = millis
            * u64::from(self.sample_rate)
            * u64::from(self.channels.count())
            * u64::from(self.width.bits())
            / 8000;
        bytes as usize
    }

    /// Elapsed milliseconds for a played-frame count.
    pub const fn frames_to_millis(&self, frames: u64) -> u64 {
        frames * 1000 / self.sample_rate as u64
    }
}

impl Default for AudioFormatSpec {
    fn default() -> Self {
        Self::new(44_100, ChannelLayout::Stereo, SampleWidth::Sixteen)
    }
}

impl std::fmt::Display for AudioFormatSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {}-bit",
            self.sample_rate,
            self.channels.count(),
            self.width.bits()
        )
    }
}
