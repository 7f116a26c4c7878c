//! Audio output using cpal.
//!
//! [`OutputShared`] is the state an output callback reads from: a sample ring,
//! a play/pause switch, per-side gains, and a counter of samples rendered.
//! [`OutputStream`] owns the cpal stream on a dedicated thread, since
//! `cpal::Stream` is not `Send`.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BufferSize, Device, SampleFormat, SampleRate, Stream, StreamConfig, SupportedBufferSize,
    SupportedStreamConfig,
};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use pcmbridge_core::{Error, Result};
use tracing::{debug, error, info, trace};

/// State shared between a writer and an output callback.
pub struct OutputShared {
    ring: crate::buffer::SampleRing,
    channels: u16,
    playing: AtomicBool,
    gains: Mutex<[f32; 2]>,
    samples_played: AtomicU64,
    epoch: Instant,
    /// Microseconds after `epoch` of the latest render while playing.
    rendered_at: AtomicU64,
}

impl OutputShared {
    /// Create shared state with a ring of at least `capacity` samples.
    pub fn new(capacity: usize, channels: u16) -> Self {
        Self {
            ring: crate::buffer::SampleRing::new(capacity),
            channels: channels.max(1),
            playing: AtomicBool::new(false),
            gains: Mutex::new([1.0, 1.0]),
            samples_played: AtomicU64::new(0),
            epoch: Instant::now(),
            rendered_at: AtomicU64::new(0),
        }
    }

    pub const fn ring(&self) -> &crate::buffer::SampleRing {
        &self.ring
    }

    pub const fn channels(&self) -> u16 {
        self.channels
    }

    pub fn set_playing(&self, playing: bool) {
        if playing {
            self.stamp_render();
        }
        self.playing.store(playing, Ordering::Release);
    }

    fn micros_since_epoch(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    fn stamp_render(&self) {
        self.rendered_at
            .store(self.micros_since_epoch(), Ordering::Release);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// Gains for even (left) and odd (right) channels.
    pub fn set_gains(&self, left: f32, right: f32) {
        *self.gains.lock() = [left.clamp(0.0, 1.0), right.clamp(0.0, 1.0)];
    }

    pub fn gains(&self) -> [f32; 2] {
        *self.gains.lock()
    }

    /// Whole frames rendered from the ring so far.
    pub fn frames_played(&self) -> u64 {
        self.samples_played.load(Ordering::Acquire) / u64::from(self.channels)
    }

    /// Frames played, advanced by the wall time since the last render while
    /// playing. The advance never exceeds the audio still queued in the ring.
    pub fn estimated_frames(&self, sample_rate: u32) -> u64 {
        let frames = self.frames_played();
        if !self.is_playing() {
            return frames;
        }

        let since = self
            .micros_since_epoch()
            .saturating_sub(self.rendered_at.load(Ordering::Acquire));
        let elapsed = since * u64::from(sample_rate) / 1_000_000;
        let queued = (self.ring.available() / usize::from(self.channels)) as u64;
        frames + elapsed.min(queued)
    }

    /// Move the played-frame counter, e.g. after a seek.
    pub fn reset_frames(&self, frames: u64) {
        self.samples_played
            .store(frames * u64::from(self.channels), Ordering::Release);
    }

    /// Fill `out` with interleaved samples, padding with silence.
    ///
    /// Returns the number of samples taken from the ring. Nothing is taken
    /// while paused.
    pub fn render(&self, out: &mut [f32]) -> usize {
        if !self.is_playing() {
            self.ring.settle();
            out.fill(0.0);
            return 0;
        }

        let read = self.ring.read(out);
        let [left, right] = self.gains();
        let channels = usize::from(self.channels);
        for (i, sample) in out[..read].iter_mut().enumerate() {
            *sample *= if (i % channels) % 2 == 1 { right } else { left };
        }
        out[read..].fill(0.0);
        self.stamp_render();

        if read < out.len() && read > 0 {
            trace!("Output underrun: needed {}, got {}", out.len(), read);
        }

        self.samples_played.fetch_add(read as u64, Ordering::AcqRel);
        read
    }
}

/// Rate and channel count an output stream is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    pub sample_rate: u32,
    pub channels: u16,
}

/// A running cpal output stream, held on its own thread.
pub struct OutputStream {
    release_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl OutputStream {
    /// Open the default output device and start rendering from `shared`.
    pub fn open(request: StreamRequest, shared: Arc<OutputShared>) -> Result<Self> {
        let (ready_tx, ready_rx) = bounded::<Result<String>>(1);
        let (release_tx, release_rx) = bounded::<()>(0);

        let thread = std::thread::Builder::new()
            .name("pcm-output".to_string())
            .spawn(move || {
                let stream = match build_output(request, shared) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Parked until the owner releases the stream.
                let _ = release_rx.recv();
                drop(stream);
                debug!("Output stream released");
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn output thread: {e}")))?;

        let ready = ready_rx
            .recv()
            .map_err(|_| Error::AudioOutput("Output thread exited during setup".to_string()));

        match ready.and_then(|r| r) {
            Ok(device_name) => {
                info!(
                    "Output stream open: {} Hz, {} channels, device: {device_name}",
                    request.sample_rate, request.channels
                );
                Ok(Self {
                    release_tx: Some(release_tx),
                    thread: Some(thread),
                })
            }
            Err(e) => {
                let _ = thread.join();
                Err(e)
            }
        }
    }

    /// Stop the stream and join its thread. Idempotent.
    pub fn close(&mut self) {
        drop(self.release_tx.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Output thread panicked");
            }
        }
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn default_device() -> Result<Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| Error::AudioOutput("No output device found".to_string()))
}

const fn format_rank(format: SampleFormat) -> u8 {
    match format {
        SampleFormat::F32 => 5,
        SampleFormat::I16 => 4,
        SampleFormat::I32 => 3,
        SampleFormat::U16 => 2,
        SampleFormat::U8 => 1,
        _ => 0,
    }
}

/// Find a device config with exactly the requested rate and channel count.
fn supported_config(device: &Device, request: StreamRequest) -> Result<SupportedStreamConfig> {
    let rate = SampleRate(request.sample_rate);

    device
        .supported_output_configs()
        .map_err(|e| Error::AudioOutput(format!("Failed to query output configs: {e}")))?
        .filter(|range| {
            range.channels() == request.channels
                && range.min_sample_rate() <= rate
                && rate <= range.max_sample_rate()
                && format_rank(range.sample_format()) > 0
        })
        .max_by_key(|range| format_rank(range.sample_format()))
        .map(|range| range.with_sample_rate(rate))
        .ok_or_else(|| {
            Error::AudioOutput(format!(
                "Output device does not support {} Hz with {} channels",
                request.sample_rate, request.channels
            ))
        })
}

/// Smallest callback buffer the default device accepts for `request`, in frames.
pub fn min_buffer_frames(request: StreamRequest) -> Result<Option<u32>> {
    let device = default_device()?;
    let supported = supported_config(&device, request)?;
    Ok(match supported.buffer_size() {
        SupportedBufferSize::Range { min, .. } => Some(*min),
        SupportedBufferSize::Unknown => None,
    })
}

fn build_output(request: StreamRequest, shared: Arc<OutputShared>) -> Result<(Stream, String)> {
    let device = default_device()?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let supported = supported_config(&device, request)?;
    let sample_format = supported.sample_format();
    debug!("Supported output config: {:?}", supported);

    let config = StreamConfig {
        channels: request.channels,
        sample_rate: SampleRate(request.sample_rate),
        buffer_size: BufferSize::Default,
    };

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, shared)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, shared)?,
        SampleFormat::I32 => build_stream::<i32>(&device, &config, shared)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, shared)?,
        SampleFormat::U8 => build_stream::<u8>(&device, &config, shared)?,
        _ => {
            return Err(Error::AudioOutput(format!(
                "Unsupported sample format: {sample_format:?}"
            )));
        }
    };

    stream
        .play()
        .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {e}")))?;

    Ok((stream, device_name))
}

fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
    device: &Device,
    config: &StreamConfig,
    shared: Arc<OutputShared>,
) -> Result<Stream> {
    let err_fn = |err| {
        error!("Audio stream error: {err}");
    };

    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if scratch.len() < data.len() {
                    scratch.resize(data.len(), 0.0);
                }
                let frame = &mut scratch[..data.len()];
                shared.render(frame);
                for (out, sample) in data.iter_mut().zip(frame.iter()) {
                    *out = T::from_sample(*sample);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {e}")))
}

/// List available output devices.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();

    let devices: Vec<String> = host
        .output_devices()
        .map_err(|e| Error::AudioOutput(format!("Failed to list devices: {e}")))?
        .filter_map(|d| d.name().ok())
        .collect();

    Ok(devices)
}

/// Get the default output device name.
pub fn default_device_name() -> Option<String> {
    default_device().ok().and_then(|d| d.name().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_render_applies_gains() {
        let shared = OutputShared::new(16, 2);
        shared.ring().write(&[1.0, 1.0, 0.5, 0.5]);
        shared.set_gains(0.5, 0.25);
        shared.set_playing(true);

        let mut out = [9.0f32; 6];
        assert_eq!(shared.render(&mut out), 4);
        assert_eq!(out, [0.5, 0.25, 0.25, 0.125, 0.0, 0.0]);
        assert_eq!(shared.frames_played(), 2);
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_render_paused_is_silent() {
        let shared = OutputShared::new(16, 1);
        shared.ring().write(&[0.7; 4]);

        let mut out = [1.0f32; 4];
        assert_eq!(shared.render(&mut out), 0);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(shared.ring().available(), 4);
        assert_eq!(shared.frames_played(), 0);
    }

    #[test]
    fn test_paused_render_applies_clear() {
        let shared = OutputShared::new(16, 1);
        shared.ring().write(&[0.7; 4]);
        shared.ring().request_clear();

        let mut out = [0.0f32; 4];
        shared.render(&mut out);
        assert!(shared.ring().is_empty());
    }

    #[test]
    fn test_estimate_advances_with_wall_time() {
        let shared = OutputShared::new(8_000, 1);
        shared.ring().write(&[0.1; 8_000]);
        shared.set_playing(true);

        let mut out = [0.0f32; 80];
        shared.render(&mut out);
        assert!(shared.estimated_frames(8_000) >= 80);

        std::thread::sleep(std::time::Duration::from_millis(50));
        let estimate = shared.estimated_frames(8_000);
        assert!(estimate >= 80 + 400, "estimate {estimate}");
        assert!(estimate <= 8_000);
    }

    #[test]
    fn test_estimate_capped_by_queued_audio() {
        let shared = OutputShared::new(64, 1);
        shared.ring().write(&[0.1; 16]);
        shared.set_playing(true);

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(shared.estimated_frames(48_000), 16);
    }

    #[test]
    fn test_estimate_frozen_while_paused() {
        let shared = OutputShared::new(64, 1);
        shared.ring().write(&[0.1; 32]);
        shared.reset_frames(100);

        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(shared.estimated_frames(48_000), 100);
    }

    #[test]
    fn test_reset_frames() {
        let shared = OutputShared::new(16, 2);
        shared.reset_frames(480);
        assert_eq!(shared.frames_played(), 480);
    }

    #[test]
    fn test_list_devices() {
        // May fail on CI without audio hardware; it must not panic.
        let _ = list_output_devices();
        let _ = default_device_name();
    }
}
