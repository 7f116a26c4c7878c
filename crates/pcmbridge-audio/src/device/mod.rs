//! Playback devices for the streaming player.
//!
//! A [`DeviceBackend`] opens [`PlaybackDevice`]s for a given PCM format. All
//! device methods take `&self` and are safe to call from a control thread
//! while another thread is blocked inside [`PlaybackDevice::write`].

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pcmbridge_core::{AudioFormatSpec, Error, Result};
use tracing::{debug, trace};

use crate::output::OutputShared;

pub mod hardware;
pub mod virtual_sink;

pub use hardware::CpalBackend;
pub use virtual_sink::VirtualBackend;

/// A sink that plays one PCM stream.
pub trait PlaybackDevice: Send + Sync {
    /// Start or resume playback.
    fn play(&self) -> Result<()>;

    /// Pause playback, keeping buffered audio.
    fn pause(&self) -> Result<()>;

    /// Drop buffered audio that has not been played yet.
    fn flush(&self) -> Result<()>;

    /// Stop playback. Pending and future writes return early.
    fn stop(&self) -> Result<()>;

    /// Make in-flight and later writes return early until the next `play`.
    ///
    /// Playback state is left alone.
    fn interrupt(&self);

    /// Write interleaved PCM bytes, blocking while the device buffer is full.
    ///
    /// Returns the number of bytes accepted, which is less than `data.len()`
    /// when the write was cut short by `flush`, `stop`, or `interrupt`.
    fn write(&self, data: &[u8]) -> Result<usize>;

    /// Frames played since the device was opened.
    fn frames_played(&self) -> Result<u64>;

    /// Release the underlying sink. Idempotent.
    fn release(&self);
}

/// Opens devices for a PCM format.
pub trait DeviceBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Minimum buffer size in bytes the sink needs for `format`.
    fn min_buffer_size(&self, format: &AudioFormatSpec) -> Result<usize>;

    /// Open a device with room for `buffer_size` bytes of audio.
    fn open(&self, format: &AudioFormatSpec, buffer_size: usize)
        -> Result<Arc<dyn PlaybackDevice>>;

    /// Start a sink that drains `shared` at `sample_rate`.
    fn open_sink(&self, sample_rate: u32, shared: Arc<OutputShared>)
        -> Result<Box<dyn SinkDriver>>;
}

/// Whatever keeps a ring device's consumer running.
pub trait SinkDriver: Send {
    fn shut_down(&mut self);
}

/// Lifecycle of a [`RingDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceState {
    Stopped = 0,
    Playing = 1,
    Paused = 2,
    Released = 3,
}

impl DeviceState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Playing,
            2 => Self::Paused,
            3 => Self::Released,
            _ => Self::Stopped,
        }
    }
}

/// How long a blocked write sleeps before retrying.
const WRITE_BACKOFF: Duration = Duration::from_millis(2);

/// Device that feeds integer PCM into a sample ring drained by a sink driver.
pub struct RingDevice {
    format: AudioFormatSpec,
    shared: Arc<OutputShared>,
    state: AtomicU8,
    /// Bumped by flush and stop so a blocked write gives up.
    generation: AtomicU64,
    interrupted: AtomicBool,
    /// Trailing bytes of a sample split across writes.
    carry: Mutex<Vec<u8>>,
    driver: Mutex<Option<Box<dyn SinkDriver>>>,
}

impl RingDevice {
    pub fn new(format: AudioFormatSpec, shared: Arc<OutputShared>, driver: Box<dyn SinkDriver>) -> Self {
        Self {
            format,
            shared,
            state: AtomicU8::new(DeviceState::Stopped as u8),
            generation: AtomicU64::new(0),
            interrupted: AtomicBool::new(false),
            carry: Mutex::new(Vec::new()),
            driver: Mutex::new(Some(driver)),
        }
    }

    /// Open a ring device drained by `backend`'s sink.
    pub fn open_on(
        backend: &dyn DeviceBackend,
        format: &AudioFormatSpec,
        buffer_size: usize,
    ) -> Result<Arc<dyn PlaybackDevice>> {
        let capacity = Self::ring_capacity(format, buffer_size);
        let shared = Arc::new(OutputShared::new(capacity, format.channels.count()));
        let sink = backend.open_sink(format.sample_rate, shared.clone())?;
        debug!(
            "Opened {format} on {} sink with {capacity}-sample ring",
            backend.name()
        );
        Ok(Arc::new(Self::new(*format, shared, sink)))
    }

    /// Ring capacity in samples for a buffer of `buffer_size` bytes.
    pub fn ring_capacity(format: &AudioFormatSpec, buffer_size: usize) -> usize {
        (buffer_size / format.width.bytes()).max(usize::from(format.channels.count()) * 64)
    }

    pub const fn format(&self) -> &AudioFormatSpec {
        &self.format
    }

    pub fn state(&self) -> DeviceState {
        DeviceState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: DeviceState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state() == DeviceState::Released {
            return Err(Error::AudioOutput("Device already released".to_string()));
        }
        Ok(())
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Decode `data` plus any carried bytes into normalized samples.
    fn decode(&self, data: &[u8]) -> Vec<f32> {
        let width = self.format.width;
        let step = width.bytes();
        let mut carry = self.carry.lock();

        let mut bytes = std::mem::take(&mut *carry);
        bytes.extend_from_slice(data);

        let whole = bytes.len() - bytes.len() % step;
        let samples = bytes[..whole].chunks_exact(step).map(|b| width.decode(b)).collect();
        carry.extend_from_slice(&bytes[whole..]);
        samples
    }
}

impl PlaybackDevice for RingDevice {
    fn play(&self) -> Result<()> {
        self.ensure_open()?;
        self.interrupted.store(false, Ordering::Release);
        self.set_state(DeviceState::Playing);
        self.shared.set_playing(true);
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.ensure_open()?;
        self.shared.set_playing(false);
        self.set_state(DeviceState::Paused);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        self.bump_generation();
        self.carry.lock().clear();
        self.shared.ring().request_clear();
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.ensure_open()?;
        self.shared.set_playing(false);
        self.set_state(DeviceState::Stopped);
        self.bump_generation();
        Ok(())
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        match self.state() {
            DeviceState::Released => {
                return Err(Error::AudioOutput("Write to released device".to_string()))
            }
            DeviceState::Stopped => {
                return Err(Error::AudioOutput("Write to stopped device".to_string()))
            }
            DeviceState::Playing | DeviceState::Paused => {}
        }

        let generation = self.generation.load(Ordering::Acquire);
        if self.interrupted.load(Ordering::Acquire) {
            return Ok(0);
        }
        let samples = self.decode(data);
        let ring = self.shared.ring();

        let mut offset = 0;
        while offset < samples.len() {
            if self.generation.load(Ordering::Acquire) != generation
                || self.interrupted.load(Ordering::Acquire)
            {
                debug!(
                    "Write cut short after {offset} of {} samples",
                    samples.len()
                );
                return Ok(offset * self.format.width.bytes());
            }

            let written = ring.write(&samples[offset..]);
            offset += written;
            if written == 0 {
                std::thread::sleep(WRITE_BACKOFF);
            }
        }

        trace!("Wrote {} bytes to device", data.len());
        Ok(data.len())
    }

    fn frames_played(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.shared.frames_played())
    }

    fn release(&self) {
        self.shared.set_playing(false);
        self.set_state(DeviceState::Released);
        self.bump_generation();
        if let Some(mut driver) = self.driver.lock().take() {
            driver.shut_down();
            debug!("Device released");
        }
    }
}

impl Drop for RingDevice {
    fn drop(&mut self) {
        self.release();
    }
}
