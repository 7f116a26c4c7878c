//! Decoder capability table.
//!
//! Codec ids are the integers controllers send over the wire. The table is
//! fixed at compile time and never mutated.

use serde::{Deserialize, Serialize};

/// Codecs a controller may ask about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    Default = 0,
    Aac = 1,
    OggOpus = 2,
    CafOpus = 3,
    Mp3 = 4,
    OggVorbis = 5,
    Pcm = 6,
}

impl Codec {
    pub const ALL: [Self; 7] = [
        Self::Default,
        Self::Aac,
        Self::OggOpus,
        Self::CafOpus,
        Self::Mp3,
        Self::OggVorbis,
        Self::Pcm,
    ];

    pub fn from_id(id: i64) -> Option<Self> {
        usize::try_from(id)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    pub const fn id(self) -> i64 {
        self as i64
    }
}

/// Which codecs the bundled decoder handles. Indexed by codec id.
const DECODER_SUPPORT: [bool; 7] = [
    true,  // Default
    true,  // AAC
    false, // OGG/Opus
    false, // CAF/Opus
    true,  // MP3
    true,  // OGG/Vorbis
    true,  // WAV/PCM
];

/// Codecs only available from this platform version on.
const PLATFORM_GATES: [(Codec, u32); 2] = [(Codec::OggOpus, 23), (Codec::OggVorbis, 23)];

/// Process-wide decoder capabilities, optionally gated on a platform version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecoderCapabilities {
    platform_version: Option<u32>,
}

impl DecoderCapabilities {
    pub const fn new(platform_version: Option<u32>) -> Self {
        Self { platform_version }
    }

    /// Whether `codec_id` can be decoded locally. Unknown ids are unsupported.
    pub fn is_supported(&self, codec_id: i64) -> bool {
        let Some(codec) = Codec::from_id(codec_id) else {
            return false;
        };
        let supported = DECODER_SUPPORT[codec as usize];
        match self.platform_version {
            Some(version) => {
                supported
                    && !PLATFORM_GATES
                        .iter()
                        .any(|&(gated, min)| gated == codec && version < min)
            }
            None => supported,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_ids() {
        assert_eq!(Codec::from_id(4), Some(Codec::Mp3));
        assert_eq!(Codec::from_id(7), None);
        assert_eq!(Codec::from_id(-1), None);
        assert_eq!(Codec::Pcm.id(), 6);
    }

    #[test]
    fn test_ungated_table() {
        let caps = DecoderCapabilities::new(None);
        assert!(caps.is_supported(Codec::Mp3.id()));
        assert!(caps.is_supported(Codec::OggVorbis.id()));
        assert!(!caps.is_supported(Codec::CafOpus.id()));
        assert!(!caps.is_supported(99));
    }

    #[test]
    fn test_platform_gate() {
        let old = DecoderCapabilities::new(Some(21));
        assert!(!old.is_supported(Codec::OggVorbis.id()));
        assert!(old.is_supported(Codec::Aac.id()));

        let new = DecoderCapabilities::new(Some(23));
        assert!(new.is_supported(Codec::OggVorbis.id()));
    }
}
