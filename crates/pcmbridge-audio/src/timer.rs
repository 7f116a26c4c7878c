//! Cancellable periodic task on its own thread.

use std::ops::ControlFlow;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use pcmbridge_core::{Error, Result};
use tracing::{debug, error};

/// Runs a closure every `period` until cancelled or the closure breaks.
///
/// The first run happens one period after spawning. Cancelling wakes the
/// thread immediately instead of waiting out the current period.
pub struct RepeatingTask {
    name: String,
    cancel_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl RepeatingTask {
    pub fn spawn<F>(name: &str, period: Duration, mut tick: F) -> Result<Self>
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = bounded::<()>(0);
        let thread_name = name.to_string();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                loop {
                    match cancel_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if tick().is_break() {
                        break;
                    }
                }
                debug!("Task {thread_name} finished");
            })
            .map_err(|e| Error::unknown(format!("Failed to spawn {name}: {e}")))?;

        Ok(Self {
            name: name.to_string(),
            cancel_tx: Some(cancel_tx),
            thread: Some(thread),
        })
    }

    /// True once the thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the task and wait for an in-progress tick. Idempotent.
    ///
    /// Called from the task's own tick, it only signals and returns.
    pub fn cancel(&mut self) {
        drop(self.cancel_tx.take());
        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.thread().id() == std::thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            error!("Task {} panicked", self.name);
        }
    }
}

impl Drop for RepeatingTask {
    fn drop(&mut self) {
        self.cancel();
    }
}
