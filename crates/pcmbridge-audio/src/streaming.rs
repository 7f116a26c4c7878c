//! Streaming PCM player.
//!
//! Producers push raw PCM chunks into a [`BufferQueue`]; one consumer thread
//! per session pops them and writes them to a [`PlaybackDevice`] in order.
//! Lifecycle calls (`start`, `pause`, `resume`, `stop`, `clear`) may come from
//! any thread. The live session sits behind a single lock and is swapped as a
//! whole, so there is never more than one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use pcmbridge_core::{AudioChunk, AudioFormatSpec, Error, Result, StreamEvent, StreamingConfig};
use tracing::{debug, error, info, trace, warn};

use crate::buffer::BufferQueue;
use crate::device::{DeviceBackend, PlaybackDevice};
use crate::progress::ProgressReporter;

/// Lifecycle state of the streaming player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Playing,
    Paused,
    /// Stop was requested; the consumer is tearing down.
    Stopping,
}

/// One run of the consumer loop against one opened device.
struct PlaybackSession {
    id: u64,
    format: AudioFormatSpec,
    device: Arc<dyn PlaybackDevice>,
    stop_flag: AtomicBool,
    paused: AtomicBool,
    started_at: Instant,
}

impl PlaybackSession {
    /// Wall time since the session started.
    fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn is_stopping(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    fn request_stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
        self.device.interrupt();
    }

    fn state(&self) -> StreamState {
        if self.is_stopping() {
            StreamState::Stopping
        } else if self.paused.load(Ordering::Acquire) {
            StreamState::Paused
        } else {
            StreamState::Playing
        }
    }
}

type SessionSlot = Arc<Mutex<Option<Arc<PlaybackSession>>>>;

/// Format stored by `init`, with the device buffer size computed for it.
#[derive(Debug, Clone, Copy)]
struct PreparedFormat {
    format: AudioFormatSpec,
    buffer_size: usize,
}

/// Producer/consumer PCM player.
pub struct StreamingPlayer {
    backend: Arc<dyn DeviceBackend>,
    config: StreamingConfig,
    queue: Arc<BufferQueue>,
    prepared: Mutex<Option<PreparedFormat>>,
    slot: SessionSlot,
    consumer: Mutex<Option<JoinHandle<()>>>,
    event_tx: Sender<StreamEvent>,
    event_rx: Receiver<StreamEvent>,
    next_session_id: AtomicU64,
}

impl StreamingPlayer {
    pub fn new(backend: Arc<dyn DeviceBackend>, config: StreamingConfig) -> Self {
        let (event_tx, event_rx) = unbounded();
        Self {
            backend,
            config,
            queue: Arc::new(BufferQueue::new()),
            prepared: Mutex::new(None),
            slot: Arc::new(Mutex::new(None)),
            consumer: Mutex::new(None),
            event_tx,
            event_rx,
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Receiver for lifecycle and position events.
    pub fn events(&self) -> Receiver<StreamEvent> {
        self.event_rx.clone()
    }

    /// Store the format for the next session and return the buffer size in
    /// bytes the device will be opened with.
    pub fn init(&self, format: AudioFormatSpec) -> Result<usize> {
        let wanted = format.buffer_bytes(self.config.buffer_duration());
        let minimum = self.backend.min_buffer_size(&format)?;
        let buffer_size = wanted.max(minimum);

        *self.prepared.lock() = Some(PreparedFormat {
            format,
            buffer_size,
        });
        info!(
            "Initialized {format}: buffer {buffer_size} bytes (wanted {wanted}, device minimum {minimum})"
        );
        Ok(buffer_size)
    }

    /// Open the device and start consuming the queue.
    pub fn start(&self) -> Result<()> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Err(Error::AlreadyPlaying);
        }
        let prepared = (*self.prepared.lock()).ok_or(Error::NotInitialized)?;
        let PreparedFormat {
            format,
            buffer_size,
        } = prepared;

        let device = self.backend.open(&format, buffer_size)?;
        if let Err(e) = device.play() {
            device.release();
            return Err(e);
        }

        let reporter = match ProgressReporter::start(
            device.clone(),
            format,
            self.config.progress_interval(),
            self.event_tx.clone(),
        ) {
            Ok(reporter) => reporter,
            Err(e) => {
                device.release();
                return Err(e);
            }
        };

        let session = Arc::new(PlaybackSession {
            id: self.next_session_id.fetch_add(1, Ordering::Relaxed),
            format,
            device: device.clone(),
            stop_flag: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            started_at: Instant::now(),
        });

        let consumer = Consumer {
            session: session.clone(),
            queue: self.queue.clone(),
            slot: self.slot.clone(),
            events: self.event_tx.clone(),
            reporter,
            poll_timeout: self.config.poll_timeout(),
        };

        let handle = match std::thread::Builder::new()
            .name("pcm-consumer".to_string())
            .spawn(move || consumer.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                device.release();
                return Err(Error::unknown(format!("Failed to spawn consumer: {e}")));
            }
        };

        // Sent under the slot lock. A previous session's Completed went out
        // before that session left the slot, so it always comes first.
        let _ = self.event_tx.send(StreamEvent::Started);
        info!(
            "Session {} started on {} device: {format}",
            session.id,
            self.backend.name()
        );
        *slot = Some(session);
        drop(slot);

        // The previous consumer, if any, finished before its slot was cleared.
        if let Some(previous) = self.consumer.lock().replace(handle) {
            let _ = previous.join();
        }
        Ok(())
    }

    /// Pause the device. The consumer keeps running and blocks on the
    /// paused device; queued chunks stay queued.
    pub fn pause(&self) -> Result<()> {
        let slot = self.slot.lock();
        let session = Self::live(&slot)?;
        session.device.pause()?;
        session.paused.store(true, Ordering::Release);
        debug!("Session {} paused", session.id);
        let _ = self.event_tx.send(StreamEvent::Paused);
        Ok(())
    }

    /// Restart the device after `pause`.
    pub fn resume(&self) -> Result<()> {
        let slot = self.slot.lock();
        let session = Self::live(&slot)?;
        session.device.play()?;
        session.paused.store(false, Ordering::Release);
        debug!("Session {} resumed", session.id);
        let _ = self.event_tx.send(StreamEvent::Resumed);
        Ok(())
    }

    /// Ask the consumer to stop. Teardown finishes asynchronously and ends
    /// with [`StreamEvent::Completed`].
    pub fn stop(&self) -> Result<()> {
        let slot = self.slot.lock();
        let session = slot.as_ref().ok_or(Error::NotPlaying)?;
        session.request_stop();
        info!("Session {} stop requested", session.id);
        let _ = self.event_tx.send(StreamEvent::Stopped);
        Ok(())
    }

    /// Drop everything queued and buffered without ending the session.
    pub fn clear(&self) -> Result<()> {
        let slot = self.slot.lock();
        let session = Self::live(&slot)?;

        session.device.pause()?;
        let dropped = self.queue.clear();
        session.device.flush()?;
        session.device.play()?;
        session.paused.store(false, Ordering::Release);

        debug!("Session {} cleared, dropped {dropped} chunks", session.id);
        Ok(())
    }

    /// Copy `size` bytes of `buffer` into a chunk and queue it.
    ///
    /// A `size` of zero queues the end-of-stream marker.
    pub fn submit(&self, buffer: &[u8], size: usize) -> Result<()> {
        let chunk = AudioChunk::copy_from(buffer, size)?;
        self.push(chunk);
        Ok(())
    }

    pub fn push(&self, chunk: AudioChunk) {
        trace!("Queued chunk of {} bytes", chunk.len());
        self.queue.push(chunk);
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn state(&self) -> StreamState {
        self.slot
            .lock()
            .as_ref()
            .map_or(StreamState::Idle, |session| session.state())
    }

    /// Stop any live session and wait for its consumer to finish.
    pub fn shutdown(&self) {
        if let Some(session) = self.slot.lock().as_ref() {
            session.request_stop();
        }
        if let Some(handle) = self.consumer.lock().take() {
            if handle.join().is_err() {
                error!("Consumer thread panicked");
            }
        }
    }

    /// The session, unless there is none or it is already stopping.
    fn live(slot: &Option<Arc<PlaybackSession>>) -> Result<&Arc<PlaybackSession>> {
        slot.as_ref()
            .filter(|session| !session.is_stopping())
            .ok_or(Error::NotPlaying)
    }
}

impl Drop for StreamingPlayer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Everything the consumer thread owns.
struct Consumer {
    session: Arc<PlaybackSession>,
    queue: Arc<BufferQueue>,
    slot: SessionSlot,
    events: Sender<StreamEvent>,
    reporter: ProgressReporter,
    poll_timeout: Duration,
}

impl Consumer {
    fn run(mut self) {
        let session = &self.session;
        debug!("Consumer for session {} running", session.id);

        while !session.is_stopping() {
            let Some(chunk) = self.queue.pop(self.poll_timeout) else {
                continue;
            };
            if chunk.is_end_of_stream() {
                info!("End of stream reached in session {}", session.id);
                session.stop_flag.store(true, Ordering::Release);
                break;
            }
            if session.is_stopping() {
                break;
            }

            match session.device.write(chunk.as_bytes()) {
                Ok(written) if written < chunk.len() => {
                    debug!("Write interrupted: {written} of {} bytes", chunk.len());
                }
                Ok(_) => {}
                Err(e) => warn!("Device write failed: {e}"),
            }
        }

        self.teardown();
    }

    fn teardown(&mut self) {
        self.reporter.stop();

        let mut slot = self.slot.lock();
        let session = &self.session;
        let device = &session.device;

        if let Err(e) = device.pause() {
            warn!("Failed to pause device: {e}");
        }
        if let Err(e) = device.flush() {
            warn!("Failed to flush device: {e}");
        }
        if let Err(e) = device.stop() {
            warn!("Failed to stop device: {e}");
        }
        device.release();

        let dropped = self.queue.clear();
        info!(
            "Session {} ({}) completed after {:.1}s, dropped {dropped} queued chunks",
            session.id,
            session.format,
            session.uptime().as_secs_f64()
        );

        // Sent before the slot frees up, so a new session's Started follows it.
        let _ = self.events.send(StreamEvent::Completed);
        if slot.as_ref().is_some_and(|s| s.id == session.id) {
            *slot = None;
        }
        drop(slot);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use parking_lot::Condvar;
    use pcmbridge_core::{ChannelLayout, SampleWidth};

    #[derive(Default)]
    struct FakeState {
        paused: bool,
        interrupted: bool,
        released: bool,
        frames: u64,
        writes: Vec<Vec<u8>>,
        calls: Vec<&'static str>,
    }

    /// Device that records writes and blocks them while paused.
    struct FakeDevice {
        frame_bytes: usize,
        state: Mutex<FakeState>,
        wake: Condvar,
    }

    impl FakeDevice {
        fn writes(&self) -> Vec<Vec<u8>> {
            self.state.lock().writes.clone()
        }

        fn calls(&self) -> Vec<&'static str> {
            self.state.lock().calls.clone()
        }
    }

    impl PlaybackDevice for FakeDevice {
        fn play(&self) -> Result<()> {
            let mut state = self.state.lock();
            state.calls.push("play");
            state.paused = false;
            state.interrupted = false;
            self.wake.notify_all();
            Ok(())
        }

        fn pause(&self) -> Result<()> {
            let mut state = self.state.lock();
            state.calls.push("pause");
            state.paused = true;
            Ok(())
        }

        fn flush(&self) -> Result<()> {
            self.state.lock().calls.push("flush");
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            let mut state = self.state.lock();
            state.calls.push("stop");
            state.interrupted = true;
            self.wake.notify_all();
            Ok(())
        }

        fn interrupt(&self) {
            let mut state = self.state.lock();
            state.interrupted = true;
            self.wake.notify_all();
        }

        fn write(&self, data: &[u8]) -> Result<usize> {
            let mut state = self.state.lock();
            if state.released {
                return Err(Error::AudioOutput("released".into()));
            }
            while state.paused && !state.interrupted {
                self.wake.wait(&mut state);
            }
            if state.interrupted {
                return Ok(0);
            }
            state.writes.push(data.to_vec());
            state.frames += (data.len() / self.frame_bytes) as u64;
            Ok(data.len())
        }

        fn frames_played(&self) -> Result<u64> {
            let state = self.state.lock();
            if state.released {
                return Err(Error::AudioOutput("released".into()));
            }
            Ok(state.frames)
        }

        fn release(&self) {
            let mut state = self.state.lock();
            if !state.released {
                state.calls.push("release");
            }
            state.released = true;
            self.wake.notify_all();
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        opened: Mutex<Vec<Arc<FakeDevice>>>,
        fail_open: AtomicBool,
    }

    impl FakeBackend {
        fn device(&self, index: usize) -> Arc<FakeDevice> {
            self.opened.lock()[index].clone()
        }
    }

    impl DeviceBackend for FakeBackend {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn min_buffer_size(&self, format: &AudioFormatSpec) -> Result<usize> {
            Ok(256 * format.frame_bytes())
        }

        fn open(
            &self,
            format: &AudioFormatSpec,
            _buffer_size: usize,
        ) -> Result<Arc<dyn PlaybackDevice>> {
            if self.fail_open.load(Ordering::SeqCst) {
                return Err(Error::AudioOutput("no device".into()));
            }
            let device = Arc::new(FakeDevice {
                frame_bytes: format.frame_bytes(),
                state: Mutex::new(FakeState::default()),
                wake: Condvar::new(),
            });
            self.opened.lock().push(device.clone());
            Ok(device)
        }

        fn open_sink(
            &self,
            _sample_rate: u32,
            _shared: Arc<crate::output::OutputShared>,
        ) -> Result<Box<dyn crate::device::SinkDriver>> {
            Err(Error::AudioOutput("fake backend has no raw sink".into()))
        }
    }

    fn fast_config() -> StreamingConfig {
        StreamingConfig {
            poll_timeout_ms: 20,
            progress_interval_ms: 10,
            buffer_duration_ms: 250,
        }
    }

    fn mono16() -> AudioFormatSpec {
        AudioFormatSpec::new(44_100, ChannelLayout::Mono, SampleWidth::Sixteen)
    }

    fn player(config: StreamingConfig) -> (StreamingPlayer, Arc<FakeBackend>) {
        let backend = Arc::new(FakeBackend::default());
        (StreamingPlayer::new(backend.clone(), config), backend)
    }

    /// Next event other than a position report.
    fn next_lifecycle(rx: &Receiver<StreamEvent>, timeout: Duration) -> Option<StreamEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.checked_duration_since(Instant::now())?;
            match rx.recv_timeout(left) {
                Ok(StreamEvent::Position(_)) => {}
                Ok(event) => return Some(event),
                Err(_) => return None,
            }
        }
    }

    fn wait_for(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        done()
    }

    fn positions(rx: &Receiver<StreamEvent>, count: usize) -> Vec<u64> {
        let mut out = Vec::new();
        while out.len() < count {
            if let StreamEvent::Position(ms) = rx.recv_timeout(Duration::from_secs(1)).unwrap() {
                out.push(ms);
            }
        }
        out
    }

    #[test]
    fn test_start_requires_init() {
        let (player, _) = player(fast_config());
        assert!(matches!(player.start(), Err(Error::NotInitialized)));
        assert_eq!(player.state(), StreamState::Idle);
    }

    #[test]
    fn test_init_uses_larger_buffer() {
        let (player, _) = player(fast_config());
        assert_eq!(player.init(mono16()).unwrap(), 22_050);

        let tiny = StreamingConfig {
            buffer_duration_ms: 1,
            ..fast_config()
        };
        let (player, _) = self::player(tiny);
        assert_eq!(player.init(mono16()).unwrap(), 512);
    }

    #[test]
    fn test_controls_without_session() {
        let (player, _) = player(fast_config());
        assert!(matches!(player.pause(), Err(Error::NotPlaying)));
        assert!(matches!(player.resume(), Err(Error::NotPlaying)));
        assert!(matches!(player.stop(), Err(Error::NotPlaying)));
        assert!(matches!(player.clear(), Err(Error::NotPlaying)));
    }

    #[test]
    fn test_submit_rejects_oversize() {
        let (player, _) = player(fast_config());
        assert!(matches!(
            player.submit(&[0u8; 4], 8),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(player.queue_depth(), 0);
    }

    #[test]
    fn test_start_stop_scenario() {
        let (player, backend) = player(StreamingConfig::default());
        let events = player.events();
        player
            .init(AudioFormatSpec::from_raw(44_100, 1, 16).unwrap())
            .unwrap();

        for tag in 1..=3u8 {
            player.submit(&[tag; 512], 512).unwrap();
        }
        player.start().unwrap();
        assert_eq!(
            next_lifecycle(&events, Duration::from_secs(1)),
            Some(StreamEvent::Started)
        );

        let device = backend.device(0);
        assert!(wait_for(Duration::from_secs(2), || device.writes().len() == 3));
        let writes = device.writes();
        for (i, tag) in (1..=3u8).enumerate() {
            assert_eq!(writes[i], vec![tag; 512]);
        }
        assert_eq!(player.state(), StreamState::Playing);

        player.stop().unwrap();
        assert_eq!(
            next_lifecycle(&events, Duration::from_millis(50)),
            Some(StreamEvent::Stopped)
        );
        // One 200 ms poll timeout plus teardown.
        assert_eq!(
            next_lifecycle(&events, Duration::from_millis(300)),
            Some(StreamEvent::Completed)
        );

        assert_eq!(player.state(), StreamState::Idle);
        assert_eq!(
            device.calls(),
            vec!["play", "pause", "flush", "stop", "release"]
        );
    }

    #[test]
    fn test_second_start_is_rejected() {
        let (player, backend) = player(fast_config());
        player.init(mono16()).unwrap();
        player.start().unwrap();

        assert!(matches!(player.start(), Err(Error::AlreadyPlaying)));
        assert_eq!(player.state(), StreamState::Playing);
        assert_eq!(backend.opened.lock().len(), 1);

        player.submit(&[9; 4], 4).unwrap();
        let device = backend.device(0);
        assert!(wait_for(Duration::from_secs(1), || device.writes().len() == 1));
        player.shutdown();
    }

    #[test]
    fn test_sentinel_drains_prior_chunks() {
        let (player, backend) = player(fast_config());
        let events = player.events();
        player.init(mono16()).unwrap();

        player.submit(&[1; 8], 8).unwrap();
        player.submit(&[2; 8], 8).unwrap();
        player.submit(&[], 0).unwrap();
        player.submit(&[3; 8], 8).unwrap();
        player.start().unwrap();

        assert_eq!(
            next_lifecycle(&events, Duration::from_secs(1)),
            Some(StreamEvent::Started)
        );
        assert_eq!(
            next_lifecycle(&events, Duration::from_secs(1)),
            Some(StreamEvent::Completed)
        );
        assert_eq!(backend.device(0).writes(), vec![vec![1; 8], vec![2; 8]]);
        assert_eq!(player.queue_depth(), 0);
        assert_eq!(player.state(), StreamState::Idle);
    }

    #[test]
    fn test_restart_after_completion() {
        let (player, backend) = player(fast_config());
        let events = player.events();
        player.init(mono16()).unwrap();

        player.start().unwrap();
        player.stop().unwrap();
        assert!(wait_for(Duration::from_secs(1), || player.state()
            == StreamState::Idle));

        player.start().unwrap();
        assert_eq!(backend.opened.lock().len(), 2);
        player.shutdown();

        let lifecycle: Vec<_> = events
            .try_iter()
            .filter(|e| !matches!(e, StreamEvent::Position(_)))
            .collect();
        assert_eq!(
            lifecycle,
            vec![
                StreamEvent::Started,
                StreamEvent::Stopped,
                StreamEvent::Completed,
                StreamEvent::Started,
                StreamEvent::Completed,
            ]
        );
    }

    #[test]
    fn test_completed_precedes_next_started() {
        let (player, _) = player(fast_config());
        let events = player.events();
        player.init(mono16()).unwrap();

        for _ in 0..50 {
            player.start().unwrap();
            player.stop().unwrap();
            while player.state() != StreamState::Idle {
                std::thread::yield_now();
            }
        }
        player.shutdown();

        let lifecycle: Vec<_> = events
            .try_iter()
            .filter(|e| matches!(e, StreamEvent::Started | StreamEvent::Completed))
            .collect();
        assert_eq!(lifecycle.len(), 100);
        for pair in lifecycle.chunks(2) {
            assert_eq!(pair, [StreamEvent::Started, StreamEvent::Completed]);
        }
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (player, backend) = player(fast_config());
        player.init(mono16()).unwrap();
        player.start().unwrap();
        player.pause().unwrap();

        for _ in 0..10 {
            player.submit(&[5; 64], 64).unwrap();
        }
        for _ in 0..3 {
            player.clear().unwrap();
            assert_eq!(player.queue_depth(), 0);
        }
        assert_eq!(player.state(), StreamState::Playing);

        let calls = backend.device(0).calls();
        assert_eq!(&calls[calls.len() - 3..], &["pause", "flush", "play"]);
        player.shutdown();
    }

    #[test]
    fn test_stop_unblocks_paused_write() {
        let (player, _) = player(fast_config());
        let events = player.events();
        player.init(mono16()).unwrap();
        player.start().unwrap();
        player.pause().unwrap();
        player.submit(&[1; 32], 32).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        player.stop().unwrap();
        assert!(matches!(player.clear(), Err(Error::NotPlaying)));
        assert!(matches!(player.pause(), Err(Error::NotPlaying)));

        let mut completed = false;
        while let Some(event) = next_lifecycle(&events, Duration::from_secs(1)) {
            if event == StreamEvent::Completed {
                completed = true;
                break;
            }
        }
        assert!(completed);
    }

    #[test]
    fn test_progress_monotonic_and_constant_while_paused() {
        let (player, _) = player(fast_config());
        let events = player.events();
        player.init(mono16()).unwrap();
        player.start().unwrap();

        for _ in 0..20 {
            player.submit(&[0; 882], 882).unwrap();
        }

        let playing = positions(&events, 5);
        assert!(playing.windows(2).all(|w| w[0] <= w[1]));

        player.pause().unwrap();
        player.submit(&[0; 882], 882).unwrap();
        std::thread::sleep(Duration::from_millis(40));
        while events.try_recv().is_ok() {}

        let paused = positions(&events, 4);
        assert!(paused.windows(2).all(|w| w[0] == w[1]));
        assert!(paused[0] >= *playing.last().unwrap());

        player.shutdown();
    }

    #[test]
    fn test_open_failure_leaves_idle() {
        let (player, backend) = player(fast_config());
        player.init(mono16()).unwrap();
        backend.fail_open.store(true, Ordering::SeqCst);

        assert!(matches!(player.start(), Err(Error::AudioOutput(_))));
        assert_eq!(player.state(), StreamState::Idle);

        backend.fail_open.store(false, Ordering::SeqCst);
        player.start().unwrap();
        player.shutdown();
    }
}
