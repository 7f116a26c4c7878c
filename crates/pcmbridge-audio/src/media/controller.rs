//! Session management for whole-file playback.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, select, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use pcmbridge_core::{Error, FileConfig, FileEvent, ProgressSnapshot, Result};
use tracing::{debug, info, warn};

use super::{MediaBackend, MediaPlayer};
use crate::timer::RepeatingTask;

/// Result of [`FilePlaybackController::start_player`].
pub enum StartOutcome {
    /// A paused session was resumed.
    Resumed,
    /// A session is already active; nothing changed.
    AlreadyRunning,
    /// A new session is preparing.
    Preparing(PendingStart),
}

/// Resolves once a new session has prepared and started, or failed to.
pub struct PendingStart {
    rx: Receiver<Result<PathBuf>>,
}

impl PendingStart {
    /// Block until prepare finishes. Returns the path now playing.
    pub fn wait(self) -> Result<PathBuf> {
        self.rx.recv().map_err(|_| Error::Cancelled)?
    }

    pub fn wait_timeout(self, timeout: Duration) -> Result<PathBuf> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(Error::unknown("Timed out waiting for prepare")),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Cancelled),
        }
    }
}

/// Coarse state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileState {
    #[default]
    NoSession,
    Preparing,
    Playing,
    Paused,
}

/// Snapshot of the active file session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePlaybackSession {
    pub source_path: PathBuf,
    pub duration_ms: u64,
    pub current_position_ms: u64,
    pub is_prepared: bool,
    pub is_playing: bool,
}

struct LiveSession {
    id: u64,
    path: PathBuf,
    player: Arc<dyn MediaPlayer>,
    prepared: bool,
    timer: Option<RepeatingTask>,
    /// Dropped to wake the session worker.
    cancel_tx: Option<Sender<()>>,
}

impl LiveSession {
    fn snapshot(&self) -> FilePlaybackSession {
        FilePlaybackSession {
            source_path: self.path.clone(),
            duration_ms: self.player.duration_ms(),
            current_position_ms: self.player.current_position_ms(),
            is_prepared: self.prepared,
            is_playing: self.player.is_playing(),
        }
    }

    fn shut_down(mut self) {
        if let Some(mut timer) = self.timer.take() {
            timer.cancel();
        }
        drop(self.cancel_tx.take());
        if self.prepared {
            if let Err(e) = self.player.stop() {
                warn!("Failed to stop player: {e}");
            }
        }
        self.player.release();
        debug!("File session {} shut down", self.id);
    }
}

type SessionSlot = Arc<Mutex<Option<LiveSession>>>;

/// Drives one file-backed media player at a time.
pub struct FilePlaybackController {
    backend: Arc<dyn MediaBackend>,
    slot: SessionSlot,
    subscription: Mutex<Duration>,
    event_tx: Sender<FileEvent>,
    event_rx: Receiver<FileEvent>,
    next_session_id: AtomicU64,
}

impl FilePlaybackController {
    pub fn new(backend: Arc<dyn MediaBackend>, config: &FileConfig) -> Self {
        let (event_tx, event_rx) = unbounded();
        Self {
            backend,
            slot: Arc::new(Mutex::new(None)),
            subscription: Mutex::new(config.subscription_duration()),
            event_tx,
            event_rx,
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Receiver for progress and completion events.
    pub fn events(&self) -> Receiver<FileEvent> {
        self.event_rx.clone()
    }

    /// Resume a paused session, report a running one, or prepare `path`.
    pub fn start_player(&self, path: impl AsRef<Path>) -> Result<StartOutcome> {
        let path = path.as_ref();
        let mut slot = self.slot.lock();

        if let Some(session) = slot.as_ref() {
            let player = &session.player;
            if session.prepared && !player.is_playing() && player.current_position_ms() > 1 {
                player.start()?;
                info!("File session {} resumed", session.id);
                return Ok(StartOutcome::Resumed);
            }
            debug!("File session {} already running", session.id);
            return Ok(StartOutcome::AlreadyRunning);
        }

        let (completion_tx, completion_rx) = bounded(1);
        let player = self.backend.create(completion_tx)?;
        let (result_tx, result_rx) = bounded(1);
        let (cancel_tx, cancel_rx) = bounded::<()>(0);
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        let worker = SessionWorker {
            id,
            path: path.to_path_buf(),
            player: player.clone(),
            slot: self.slot.clone(),
            period: *self.subscription.lock(),
            events: self.event_tx.clone(),
            result_tx,
            completion_rx,
            cancel_rx,
        };

        std::thread::Builder::new()
            .name("file-session".to_string())
            .spawn(move || worker.run())
            .map_err(|e| {
                player.release();
                Error::unknown(format!("Failed to spawn session worker: {e}"))
            })?;

        *slot = Some(LiveSession {
            id,
            path: path.to_path_buf(),
            player,
            prepared: false,
            timer: None,
            cancel_tx: Some(cancel_tx),
        });
        info!("File session {id} preparing {}", path.display());

        Ok(StartOutcome::Preparing(PendingStart { rx: result_rx }))
    }

    /// End the session and release its player.
    pub fn stop_player(&self) -> Result<()> {
        let session = self.slot.lock().take().ok_or(Error::PlayerIsNull)?;
        info!("File session {} stopped", session.id);
        session.shut_down();
        Ok(())
    }

    pub fn pause_player(&self) -> Result<()> {
        let slot = self.slot.lock();
        let session = slot.as_ref().ok_or(Error::PlayerIsNull)?;
        session.player.pause()?;
        debug!("File session {} paused", session.id);
        Ok(())
    }

    /// Restart a paused player at its current position.
    pub fn resume_player(&self) -> Result<()> {
        let slot = self.slot.lock();
        let session = slot.as_ref().ok_or(Error::PlayerIsNull)?;
        let player = &session.player;
        if player.is_playing() {
            return Err(Error::PlayerIsPlaying);
        }

        let position = player.current_position_ms();
        player.seek_to(position)?;
        player.start()?;
        debug!("File session {} resumed at {position} ms", session.id);
        Ok(())
    }

    /// Absolute seek. Returns the target position.
    pub fn seek_to_player(&self, position_ms: u64) -> Result<u64> {
        let slot = self.slot.lock();
        let session = slot.as_ref().ok_or(Error::PlayerIsNull)?;
        session.player.seek_to(position_ms)?;
        debug!("File session {} seeked to {position_ms} ms", session.id);
        Ok(position_ms)
    }

    /// Set both channels to `volume`, clamped to 0.0-1.0.
    pub fn set_volume(&self, volume: f64) -> Result<()> {
        let slot = self.slot.lock();
        let session = slot.as_ref().ok_or(Error::PlayerIsNull)?;
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        let volume = volume as f32;
        session.player.set_volume(volume, volume)
    }

    /// Set the progress period for sessions started from now on.
    pub fn set_subscription_duration(&self, seconds: f64) -> Result<Duration> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "subscription duration must be a non-negative number of seconds, got {seconds}"
            )));
        }
        let millis = ((seconds * 1000.0).round() as u64).max(1);
        let period = Duration::from_millis(millis);
        *self.subscription.lock() = period;
        debug!("Subscription duration set to {millis} ms");
        Ok(period)
    }

    pub fn subscription_duration(&self) -> Duration {
        *self.subscription.lock()
    }

    pub fn session(&self) -> Option<FilePlaybackSession> {
        self.slot.lock().as_ref().map(LiveSession::snapshot)
    }

    pub fn state(&self) -> FileState {
        match self.slot.lock().as_ref() {
            None => FileState::NoSession,
            Some(session) if !session.prepared => FileState::Preparing,
            Some(session) if session.player.is_playing() => FileState::Playing,
            Some(_) => FileState::Paused,
        }
    }
}

impl Drop for FilePlaybackController {
    fn drop(&mut self) {
        if let Some(session) = self.slot.lock().take() {
            session.shut_down();
        }
    }
}

/// Prepares one session, then waits for its completion or cancellation.
struct SessionWorker {
    id: u64,
    path: PathBuf,
    player: Arc<dyn MediaPlayer>,
    slot: SessionSlot,
    period: Duration,
    events: Sender<FileEvent>,
    result_tx: Sender<Result<PathBuf>>,
    completion_rx: Receiver<()>,
    cancel_rx: Receiver<()>,
}

impl SessionWorker {
    fn run(self) {
        let prepared = self.player.prepare(&self.path);

        if let Err(e) = self.begin(prepared) {
            self.player.release();
            let _ = self.result_tx.send(Err(e));
            return;
        }
        let _ = self.result_tx.send(Ok(self.path.clone()));

        select! {
            recv(self.completion_rx) -> msg => {
                if msg.is_ok() {
                    self.finish();
                }
            }
            recv(self.cancel_rx) -> _ => {
                debug!("File session {} worker cancelled", self.id);
            }
        }
    }

    /// Start playback and the progress timer if the session is still current.
    fn begin(&self, prepared: Result<()>) -> Result<()> {
        let mut slot = self.slot.lock();
        let Some(session) = slot.as_mut().filter(|s| s.id == self.id) else {
            debug!("File session {} stopped during prepare", self.id);
            return Err(Error::Cancelled);
        };

        let started = prepared
            .and_then(|()| self.player.start())
            .and_then(|()| self.spawn_timer());

        match started {
            Ok(timer) => {
                session.prepared = true;
                session.timer = Some(timer);
                info!(
                    "File session {} playing {} ({} ms)",
                    self.id,
                    self.path.display(),
                    self.player.duration_ms()
                );
                Ok(())
            }
            Err(e) => {
                warn!("File session {} failed to start: {e}", self.id);
                *slot = None;
                Err(Error::unknown(e))
            }
        }
    }

    fn spawn_timer(&self) -> Result<RepeatingTask> {
        let player = self.player.clone();
        let events = self.events.clone();
        RepeatingTask::spawn("file-progress", self.period, move || {
            let snapshot = ProgressSnapshot::new(player.duration_ms(), player.current_position_ms());
            if events.send(FileEvent::Progress(snapshot)).is_err() {
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        })
    }

    fn finish(&self) {
        let session = {
            let mut slot = self.slot.lock();
            if slot.as_ref().is_some_and(|s| s.id == self.id) {
                slot.take()
            } else {
                None
            }
        };
        // Stopped concurrently; stop_player already cleaned up.
        let Some(mut session) = session else {
            return;
        };

        if let Some(mut timer) = session.timer.take() {
            timer.cancel();
        }

        let snapshot =
            ProgressSnapshot::new(self.player.duration_ms(), self.player.current_position_ms());
        info!(
            "File session {} finished at {} ms",
            self.id, snapshot.current_position_ms
        );
        let _ = self.events.send(FileEvent::Finished(snapshot));

        if self.player.is_playing() {
            if let Err(e) = self.player.stop() {
                warn!("Failed to stop finished player: {e}");
            }
        }
        self.player.release();
    }
}
