//! Media player built from symphonia decoding and a device sink.
//!
//! A feeder thread decodes packets into the output ring. Seeks take the
//! decoder lock, so the feeder never writes a stale packet after a seek
//! returns. Positions come from the frames the sink has rendered.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use pcmbridge_core::{Error, Result};
use tracing::{debug, error, info, warn};

use super::{MediaBackend, MediaPlayer};
use crate::decode::AudioDecoder;
use crate::device::{DeviceBackend, SinkDriver};
use crate::output::OutputShared;

/// Decoded audio buffered ahead of the sink.
const RING_MILLIS: usize = 500;

/// Feeder sleep while the ring is full or the file is drained.
const FEED_BACKOFF: Duration = Duration::from_millis(5);

/// Creates [`DecodedMediaPlayer`]s on a device backend's sinks.
pub struct DecodedMediaBackend {
    sinks: Arc<dyn DeviceBackend>,
}

impl DecodedMediaBackend {
    pub fn new(sinks: Arc<dyn DeviceBackend>) -> Self {
        Self { sinks }
    }
}

impl MediaBackend for DecodedMediaBackend {
    fn create(&self, completion: Sender<()>) -> Result<Arc<dyn MediaPlayer>> {
        Ok(Arc::new(DecodedMediaPlayer::new(self.sinks.clone(), completion)))
    }
}

/// State shared with the feeder thread.
struct Feed {
    decoder: Mutex<AudioDecoder>,
    shared: Arc<OutputShared>,
    /// Bumped by every seek.
    generation: AtomicU64,
    eof: AtomicBool,
    shutdown: AtomicBool,
    completion: Mutex<Option<Sender<()>>>,
}

impl Feed {
    fn complete(&self) {
        if let Some(tx) = self.completion.lock().take() {
            debug!("Playback reached end of file");
            let _ = tx.try_send(());
        }
    }

    fn run(&self) {
        let ring = self.shared.ring();
        let mut pending: Vec<f32> = Vec::new();
        let mut offset = 0;
        let mut pending_generation = self.generation.load(Ordering::Acquire);

        while !self.shutdown.load(Ordering::Acquire) {
            if offset < pending.len() {
                let written = {
                    let _decoder = self.decoder.lock();
                    if self.generation.load(Ordering::Acquire) == pending_generation {
                        ring.write(&pending[offset..])
                    } else {
                        // Seeked since this packet was decoded.
                        pending.clear();
                        offset = 0;
                        continue;
                    }
                };
                offset += written;
                if written == 0 {
                    std::thread::sleep(FEED_BACKOFF);
                }
                continue;
            }

            if self.eof.load(Ordering::Acquire) {
                if ring.is_empty() && self.shared.is_playing() {
                    self.complete();
                }
                std::thread::sleep(FEED_BACKOFF);
                continue;
            }

            let mut decoder = self.decoder.lock();
            pending_generation = self.generation.load(Ordering::Acquire);
            match decoder.decode_next() {
                Ok(Some(samples)) => {
                    pending = samples;
                    offset = 0;
                }
                Ok(None) => self.eof.store(true, Ordering::Release),
                Err(e) => {
                    warn!("Stopping decode: {e}");
                    self.eof.store(true, Ordering::Release);
                }
            }
        }
    }
}

/// Everything that exists only between prepare and release.
struct Prepared {
    feed: Arc<Feed>,
    sink: Box<dyn SinkDriver>,
    feeder: Option<JoinHandle<()>>,
    sample_rate: u32,
    duration_ms: u64,
    /// Highest position reported since the last seek.
    reported_ms: AtomicU64,
}

impl Prepared {
    /// Frames at `position_ms`, rounded up so the position reads back exactly.
    fn frames_at(&self, position_ms: u64) -> u64 {
        (position_ms * u64::from(self.sample_rate)).div_ceil(1000)
    }

    fn shut_down(&mut self) {
        self.feed.shutdown.store(true, Ordering::Release);
        self.feed.shared.set_playing(false);
        if let Some(feeder) = self.feeder.take() {
            if feeder.join().is_err() {
                error!("Feeder thread panicked");
            }
        }
        self.sink.shut_down();
    }
}

/// Plays one media file on a device sink.
pub struct DecodedMediaPlayer {
    sinks: Arc<dyn DeviceBackend>,
    completion: Mutex<Option<Sender<()>>>,
    prepared: Mutex<Option<Prepared>>,
    volume: Mutex<(f32, f32)>,
    released: AtomicBool,
}

impl DecodedMediaPlayer {
    pub fn new(sinks: Arc<dyn DeviceBackend>, completion: Sender<()>) -> Self {
        Self {
            sinks,
            completion: Mutex::new(Some(completion)),
            prepared: Mutex::new(None),
            volume: Mutex::new((1.0, 1.0)),
            released: AtomicBool::new(false),
        }
    }

    fn with_prepared<T>(&self, f: impl FnOnce(&Prepared) -> Result<T>) -> Result<T> {
        let prepared = self.prepared.lock();
        let prepared = prepared
            .as_ref()
            .ok_or_else(|| Error::AudioOutput("Player is not prepared".to_string()))?;
        f(prepared)
    }
}

impl MediaPlayer for DecodedMediaPlayer {
    fn prepare(&self, path: &Path) -> Result<()> {
        if self.released.load(Ordering::Acquire) {
            return Err(Error::AudioOutput("Player already released".to_string()));
        }
        if self.prepared.lock().is_some() {
            return Err(Error::AudioOutput("Player already prepared".to_string()));
        }

        let decoder = AudioDecoder::open(path)?;
        let sample_rate = decoder.sample_rate();
        let channels = decoder.channels();
        let duration_ms = decoder.duration_ms().unwrap_or(0);

        let capacity = sample_rate as usize * usize::from(channels) * RING_MILLIS / 1000;
        let shared = Arc::new(OutputShared::new(capacity, channels));
        let (left, right) = *self.volume.lock();
        shared.set_gains(left, right);

        let mut sink = self.sinks.open_sink(sample_rate, shared.clone())?;

        let feed = Arc::new(Feed {
            decoder: Mutex::new(decoder),
            shared,
            generation: AtomicU64::new(0),
            eof: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            completion: Mutex::new(self.completion.lock().take()),
        });

        let feeder = {
            let feed = feed.clone();
            std::thread::Builder::new()
                .name("file-decode".to_string())
                .spawn(move || feed.run())
        };
        let feeder = match feeder {
            Ok(handle) => handle,
            Err(e) => {
                sink.shut_down();
                return Err(Error::unknown(format!("Failed to spawn decode thread: {e}")));
            }
        };

        let mut prepared = Prepared {
            feed,
            sink,
            feeder: Some(feeder),
            sample_rate,
            duration_ms,
            reported_ms: AtomicU64::new(0),
        };

        let mut slot = self.prepared.lock();
        // Released while we were probing.
        if self.released.load(Ordering::Acquire) {
            drop(slot);
            prepared.shut_down();
            return Err(Error::AudioOutput("Player released during prepare".to_string()));
        }
        *slot = Some(prepared);

        info!(
            "Prepared {}: {sample_rate} Hz, {channels} channels, {duration_ms} ms",
            path.display()
        );
        Ok(())
    }

    fn start(&self) -> Result<()> {
        self.with_prepared(|prepared| {
            prepared.feed.shared.set_playing(true);
            Ok(())
        })
    }

    fn pause(&self) -> Result<()> {
        self.with_prepared(|prepared| {
            prepared.feed.shared.set_playing(false);
            Ok(())
        })
    }

    fn stop(&self) -> Result<()> {
        self.pause()
    }

    fn release(&self) {
        self.released.store(true, Ordering::Release);
        let prepared = self.prepared.lock().take();
        if let Some(mut prepared) = prepared {
            prepared.shut_down();
            debug!("Media player released");
        }
    }

    fn is_playing(&self) -> bool {
        self.prepared
            .lock()
            .as_ref()
            .is_some_and(|prepared| prepared.feed.shared.is_playing())
    }

    fn current_position_ms(&self) -> u64 {
        self.prepared.lock().as_ref().map_or(0, |prepared| {
            let frames = prepared.feed.shared.estimated_frames(prepared.sample_rate);
            let position = frames * 1000 / u64::from(prepared.sample_rate);
            prepared
                .reported_ms
                .fetch_max(position, Ordering::AcqRel)
                .max(position)
        })
    }

    fn duration_ms(&self) -> u64 {
        self.prepared
            .lock()
            .as_ref()
            .map_or(0, |prepared| prepared.duration_ms)
    }

    fn seek_to(&self, position_ms: u64) -> Result<()> {
        self.with_prepared(|prepared| {
            let feed = &prepared.feed;
            let mut decoder = feed.decoder.lock();
            let reached = decoder.seek(position_ms)?;

            feed.generation.fetch_add(1, Ordering::AcqRel);
            feed.eof.store(false, Ordering::Release);
            feed.shared.ring().request_clear();
            feed.shared.reset_frames(prepared.frames_at(position_ms));
            prepared.reported_ms.store(position_ms, Ordering::Release);

            debug!("Seeked to {reached} ms (asked {position_ms} ms)");
            Ok(())
        })
    }

    fn set_volume(&self, left: f32, right: f32) -> Result<()> {
        *self.volume.lock() = (left, right);
        if let Some(prepared) = self.prepared.lock().as_ref() {
            prepared.feed.shared.set_gains(left, right);
        }
        Ok(())
    }
}

impl Drop for DecodedMediaPlayer {
    fn drop(&mut self) {
        self.release();
    }
}
