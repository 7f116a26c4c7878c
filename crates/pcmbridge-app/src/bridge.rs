//! Method dispatch between the wire protocol and the playback engines.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, select, Receiver, Sender};
use pcmbridge_audio::{
    DecodedMediaBackend, DeviceBackend, FilePlaybackController, StartOutcome, StreamingPlayer,
};
use pcmbridge_core::{AudioFormatSpec, BridgeConfig, DecoderCapabilities, Error, Result};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::protocol::{
    CodecArgs, InitArgs, Outbound, PathArgs, Request, SeekArgs, SubscriptionArgs, VolumeArgs,
    WireError, WriteArgs,
};

/// Owns both playback domains and answers requests for them.
pub struct Bridge {
    streaming: Arc<StreamingPlayer>,
    files: Arc<FilePlaybackController>,
    capabilities: DecoderCapabilities,
    outbound: Sender<Outbound>,
    /// Dropped to stop the event forwarders.
    done_tx: Option<Sender<()>>,
    forwarders: Vec<JoinHandle<()>>,
}

impl Bridge {
    /// Build the engines on `devices` and start forwarding their events to
    /// `outbound`.
    pub fn new(
        config: &BridgeConfig,
        devices: Arc<dyn DeviceBackend>,
        outbound: Sender<Outbound>,
    ) -> Result<Self> {
        let streaming = Arc::new(StreamingPlayer::new(
            Arc::clone(&devices),
            config.streaming.clone(),
        ));
        let media = Arc::new(DecodedMediaBackend::new(devices));
        let files = Arc::new(FilePlaybackController::new(media, &config.file));
        let (done_tx, done_rx) = bounded::<()>(0);

        let forwarders = vec![
            forward("stream-events", streaming.events(), done_rx.clone(), outbound.clone())?,
            forward("file-events", files.events(), done_rx, outbound.clone())?,
        ];

        Ok(Self {
            streaming,
            files,
            capabilities: config.capabilities(),
            outbound,
            done_tx: Some(done_tx),
            forwarders,
        })
    }

    /// Handle one request. Returns `None` when the reply is sent later.
    pub fn handle(&self, request: &Request) -> Option<Outbound> {
        match self.dispatch(request) {
            Ok(Some(result)) => Some(Outbound::reply(request.id, result)),
            Ok(None) => None,
            Err(e) => Some(Outbound::failure(request.id, e)),
        }
    }

    fn dispatch(&self, request: &Request) -> std::result::Result<Option<Value>, WireError> {
        let result = match request.method.as_str() {
            "init" => {
                let args: InitArgs = request.args()?;
                let format = AudioFormatSpec::from_raw(args.samplerate, args.nchannels, args.nbits)?;
                Value::from(self.streaming.init(format)?)
            }
            "write" => {
                let args: WriteArgs = request.args()?;
                self.streaming.submit(&args.decode()?, args.size)?;
                Value::Null
            }
            "play" => {
                self.streaming.start()?;
                Value::Null
            }
            "pause" => {
                self.streaming.pause()?;
                Value::Null
            }
            "resume" => {
                self.streaming.resume()?;
                Value::Null
            }
            "stop" => {
                self.streaming.stop()?;
                Value::Null
            }
            "clear" => {
                self.streaming.clear()?;
                Value::Null
            }
            "queueLen" | "queueLength" => Value::from(self.streaming.queue_depth()),
            "isDecoderSupported" => {
                let args: CodecArgs = request.args()?;
                Value::Bool(self.capabilities.is_supported(args.codec))
            }
            "startPlayer" => {
                let args: PathArgs = request.args()?;
                return self.start_player(request.id, &args.path);
            }
            "stopPlayer" => {
                self.files.stop_player()?;
                Value::from("stopped player.")
            }
            "pausePlayer" => {
                self.files.pause_player()?;
                Value::from("paused player.")
            }
            "resumePlayer" => {
                self.files.resume_player()?;
                Value::from("resumed player.")
            }
            "seekToPlayer" => {
                let args: SeekArgs = request.args()?;
                Value::from(self.files.seek_to_player(args.sec)?.to_string())
            }
            "setVolume" => {
                let args: VolumeArgs = request.args()?;
                self.files.set_volume(args.volume)?;
                Value::from("Set volume")
            }
            "setSubscriptionDuration" => {
                let args: SubscriptionArgs = request.args()?;
                let period = self.files.set_subscription_duration(args.sec)?;
                Value::from(format!("setSubscriptionDuration: {}", period.as_millis()))
            }
            other => return Err(WireError::not_implemented(other)),
        };
        Ok(Some(result))
    }

    /// Replies at once for resume and already-running, otherwise once
    /// prepare resolves on a waiter thread.
    fn start_player(
        &self,
        id: Option<u64>,
        path: &str,
    ) -> std::result::Result<Option<Value>, WireError> {
        let pending = match self.files.start_player(path)? {
            StartOutcome::Resumed => return Ok(Some(Value::from("player resumed."))),
            StartOutcome::AlreadyRunning => {
                return Ok(Some(Value::from("player is already running.")))
            }
            StartOutcome::Preparing(pending) => pending,
        };

        let outbound = self.outbound.clone();
        std::thread::Builder::new()
            .name("start-reply".to_string())
            .spawn(move || {
                let reply = match pending.wait() {
                    Ok(path) => Outbound::reply(id, path.display().to_string()),
                    Err(e) => Outbound::failure(id, e),
                };
                let _ = outbound.send(reply);
            })
            .map_err(|e| Error::unknown(format!("Failed to spawn start waiter: {e}")))?;
        Ok(None)
    }

    /// Stop both domains and the event forwarders. Idempotent.
    pub fn shutdown(&mut self) {
        if self.done_tx.is_none() {
            return;
        }
        info!("Shutting down bridge");

        match self.files.stop_player() {
            Ok(()) | Err(Error::PlayerIsNull) => {}
            Err(e) => warn!("Failed to stop file player: {e}"),
        }
        self.streaming.shutdown();

        drop(self.done_tx.take());
        for forwarder in self.forwarders.drain(..) {
            if forwarder.join().is_err() {
                error!("Event forwarder panicked");
            }
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Relay engine events to `outbound` until `done` closes.
fn forward<E>(
    name: &str,
    events: Receiver<E>,
    done: Receiver<()>,
    outbound: Sender<Outbound>,
) -> Result<JoinHandle<()>>
where
    E: Into<Outbound> + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || loop {
            select! {
                recv(events) -> event => {
                    let Ok(event) = event else { break };
                    if outbound.send(event.into()).is_err() {
                        break;
                    }
                }
                recv(done) -> _ => break,
            }
        })
        .map_err(|e| Error::unknown(format!("Failed to spawn {name}: {e}")))
}
