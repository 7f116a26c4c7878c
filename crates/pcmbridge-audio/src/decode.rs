//! Media file decoding using symphonia.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::fs::File;
use std::path::Path;

use pcmbridge_core::{Error, Result};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
    units::{Time, TimeBase},
};
use tracing::{debug, warn};

/// Decoder for the first audio track of a media file.
pub struct AudioDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    n_frames: Option<u64>,
    sample_rate: u32,
    channels: u16,
    /// Timestamp the last seek asked for. Earlier frames are dropped.
    required_ts: Option<u64>,
}

impl AudioDecoder {
    /// Open a media file and detect its container.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::AudioDecode(format!("Failed to open {}: {e}", path.display())))?;
        let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };

        let detected = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| Error::AudioDecode(format!("Failed to detect format: {e}")))?;
        let format = detected.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::AudioDecode("No audio tracks found".to_string()))?;

        let params = &track.codec_params;
        let track_id = track.id;
        let sample_rate = params
            .sample_rate
            .ok_or_else(|| Error::AudioDecode("Track has no sample rate".to_string()))?;
        let channels = params.channels.map_or(2, |c| c.count() as u16);
        let time_base = params.time_base;
        let n_frames = params.n_frames;

        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| Error::AudioDecode(format!("Failed to create decoder: {e}")))?;

        debug!(
            "Opened {}: track {track_id}, {sample_rate} Hz, {channels} channels",
            path.display()
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            time_base,
            n_frames,
            sample_rate,
            channels,
            required_ts: None,
        })
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Decode the next packet into interleaved f32 samples.
    ///
    /// Returns `None` at the end of the stream. Corrupt packets are skipped.
    pub fn decode_next(&mut self) -> Result<Option<Vec<f32>>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => {
                    return Err(Error::AudioDecode(format!("Failed to read packet: {e}")));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let (samples, channels) = match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buffer.copy_interleaved_ref(decoded);
                    (buffer.samples().to_vec(), spec.channels.count().max(1))
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Decode error (skipping): {e}");
                    continue;
                }
                Err(e) => {
                    return Err(Error::AudioDecode(format!("Decode failed: {e}")));
                }
            };

            let frames = samples.len() / channels;
            let skip = self.frames_before_target(packet.ts(), frames);
            if skip >= frames {
                continue;
            }
            return Ok(Some(samples[skip * channels..].to_vec()));
        }
    }

    /// Frames at the start of a packet that precede the last seek target.
    fn frames_before_target(&mut self, packet_ts: u64, frames: usize) -> usize {
        let Some(required) = self.required_ts else {
            return 0;
        };
        let skip = self.ts_to_frames(required.saturating_sub(packet_ts));
        if skip < frames as u64 {
            self.required_ts = None;
        }
        skip.min(frames as u64) as usize
    }

    /// Seek to an absolute position.
    ///
    /// The next decoded samples start exactly at the target. Returns the
    /// target as the track's timestamps resolve it.
    pub fn seek(&mut self, position_ms: u64) -> Result<u64> {
        let time = Time::new(position_ms / 1000, (position_ms % 1000) as f64 / 1000.0);

        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| Error::AudioDecode(format!("Seek failed: {e}")))?;

        self.decoder.reset();
        self.required_ts = Some(seeked.required_ts);
        debug!(
            "Seek landed at ts {}, trimming to ts {}",
            seeked.actual_ts, seeked.required_ts
        );
        Ok(self.ts_to_millis(seeked.required_ts).unwrap_or(position_ms))
    }

    /// Total duration in milliseconds, if known.
    pub fn duration_ms(&self) -> Option<u64> {
        self.ts_to_millis(self.n_frames?)
    }

    /// Convert a timestamp span to frames at the track's sample rate.
    fn ts_to_frames(&self, ts: u64) -> u64 {
        match self.time_base {
            Some(tb) => {
                ts * u64::from(self.sample_rate) * u64::from(tb.numer) / u64::from(tb.denom).max(1)
            }
            None => ts,
        }
    }

    fn ts_to_millis(&self, ts: u64) -> Option<u64> {
        match self.time_base {
            Some(time_base) => {
                let time = time_base.calc_time(ts);
                Some(time.seconds * 1000 + (time.frac * 1000.0).round() as u64)
            }
            None if self.sample_rate > 0 => Some(ts * 1000 / u64::from(self.sample_rate)),
            None => None,
        }
    }
}

/// Helpers shared by tests that need a real media file.
#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::Write;
    use std::path::Path;

    /// Write a 16-bit PCM WAV with `frames` frames of a constant sample.
    pub fn write_wav(path: &Path, sample_rate: u32, channels: u16, frames: u32) {
        let block_align = u32::from(channels) * 2;
        let data_len = frames * block_align;

        let mut bytes = Vec::with_capacity(44 + data_len as usize);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * block_align).to_le_bytes());
        bytes.extend_from_slice(&(block_align as u16).to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for _ in 0..frames * u32::from(channels) {
            bytes.extend_from_slice(&4096i16.to_le_bytes());
        }

        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(&bytes).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        fixtures::write_wav(&path, 8_000, 2, 16_000);

        let decoder = AudioDecoder::open(&path).unwrap();
        assert_eq!(decoder.sample_rate(), 8_000);
        assert_eq!(decoder.channels(), 2);
        assert_eq!(decoder.duration_ms(), Some(2_000));
    }

    #[test]
    fn test_decode_all_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        fixtures::write_wav(&path, 8_000, 1, 4_000);

        let mut decoder = AudioDecoder::open(&path).unwrap();
        let mut total = 0;
        while let Some(samples) = decoder.decode_next().unwrap() {
            assert!(samples.iter().all(|s| (s - 0.125).abs() < 1e-3));
            total += samples.len();
        }
        assert_eq!(total, 4_000);
    }

    #[test]
    fn test_seek() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        fixtures::write_wav(&path, 8_000, 1, 16_000);

        let mut decoder = AudioDecoder::open(&path).unwrap();
        assert_eq!(decoder.seek(1_500).unwrap(), 1_500);

        let mut rest = 0;
        while let Some(samples) = decoder.decode_next().unwrap() {
            rest += samples.len();
        }
        assert_eq!(rest, 4_000);
    }

    #[test]
    fn test_seek_off_packet_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        fixtures::write_wav(&path, 44_100, 2, 88_200);

        let mut decoder = AudioDecoder::open(&path).unwrap();
        assert_eq!(decoder.seek(1_234).unwrap(), 1_234);

        let mut frames = 0;
        while let Some(samples) = decoder.decode_next().unwrap() {
            frames += samples.len() / 2;
        }
        // 1.234 s lands on frame 54_419 of 88_200.
        assert_eq!(frames, 88_200 - 54_419);
    }

    #[test]
    fn test_open_missing_file() {
        let result = AudioDecoder::open(Path::new("/definitely/not/here.mp3"));
        assert!(matches!(result, Err(Error::AudioDecode(_))));
    }

    #[test]
    fn test_open_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.mp3");
        std::fs::write(&path, [0x42u8; 64]).unwrap();
        assert!(AudioDecoder::open(&path).is_err());
    }
}
