//! Periodic position reports for a streaming session.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use pcmbridge_core::{AudioFormatSpec, Result, StreamEvent};
use tracing::{debug, warn};

use crate::device::PlaybackDevice;
use crate::timer::RepeatingTask;

/// Samples a device's played-frame counter and emits [`StreamEvent::Position`].
pub struct ProgressReporter {
    task: RepeatingTask,
}

impl ProgressReporter {
    pub fn start(
        device: Arc<dyn PlaybackDevice>,
        format: AudioFormatSpec,
        period: Duration,
        events: Sender<StreamEvent>,
    ) -> Result<Self> {
        let mut failures = 0u32;

        let task = RepeatingTask::spawn("pcm-progress", period, move || {
            match device.frames_played() {
                Ok(frames) => {
                    failures = 0;
                    let elapsed = format.frames_to_millis(frames);
                    if events.send(StreamEvent::Position(elapsed)).is_err() {
                        debug!("Event receiver gone, stopping progress");
                        return ControlFlow::Break(());
                    }
                }
                Err(e) => {
                    failures += 1;
                    if failures >= 2 {
                        warn!("Progress stopped after repeated device errors: {e}");
                        return ControlFlow::Break(());
                    }
                    debug!("Skipping progress tick: {e}");
                }
            }
            ControlFlow::Continue(())
        })?;

        Ok(Self { task })
    }

    /// Cancel and join. No tick fires after this returns.
    pub fn stop(&mut self) {
        self.task.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
