//! Software sink that consumes samples at real-time pace.
//!
//! Used when no audio hardware is available, e.g. on headless hosts and in
//! tests. Timing matches a real device, so positions and back-pressure behave
//! the same way.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use pcmbridge_core::{AudioFormatSpec, Error, Result};
use tracing::{debug, error};

use super::{DeviceBackend, PlaybackDevice, RingDevice, SinkDriver};
use crate::output::OutputShared;

/// Frames the virtual sink reports as its minimum buffer.
const MIN_BUFFER_FRAMES: usize = 1024;

/// Clock tick of the drain thread.
const TICK: Duration = Duration::from_millis(10);

/// Opens clocked software sinks.
#[derive(Debug, Default, Clone, Copy)]
pub struct VirtualBackend;

impl VirtualBackend {
    pub const fn new() -> Self {
        Self
    }
}

impl DeviceBackend for VirtualBackend {
    fn name(&self) -> &'static str {
        "virtual"
    }

    fn min_buffer_size(&self, format: &AudioFormatSpec) -> Result<usize> {
        Ok(MIN_BUFFER_FRAMES * format.frame_bytes())
    }

    fn open(&self, format: &AudioFormatSpec, buffer_size: usize) -> Result<Arc<dyn PlaybackDevice>> {
        RingDevice::open_on(self, format, buffer_size)
    }

    fn open_sink(&self, sample_rate: u32, shared: Arc<OutputShared>) -> Result<Box<dyn SinkDriver>> {
        if sample_rate == 0 {
            return Err(Error::AudioOutput("Sample rate must be positive".to_string()));
        }
        Ok(Box::new(Clock::spawn(sample_rate, shared)?))
    }
}

/// Drain thread pulling frames out of the ring as a device callback would.
struct Clock {
    cancel_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Clock {
    fn spawn(sample_rate: u32, shared: Arc<OutputShared>) -> Result<Self> {
        let (cancel_tx, cancel_rx) = bounded::<()>(0);

        let thread = std::thread::Builder::new()
            .name("virtual-sink".to_string())
            .spawn(move || {
                let channels = usize::from(shared.channels());
                let started = Instant::now();
                let mut rendered: u64 = 0;
                let mut scratch = Vec::new();

                loop {
                    match cancel_rx.recv_timeout(TICK) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    // Frames the wall clock says are due since the sink opened.
                    let due = started.elapsed().as_micros() as u64 * u64::from(sample_rate)
                        / 1_000_000;
                    let frames = due.saturating_sub(rendered) as usize;
                    rendered = due;
                    if frames == 0 {
                        continue;
                    }

                    scratch.resize(frames * channels, 0.0);
                    shared.render(&mut scratch);
                }
                debug!("Virtual sink stopped");
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn virtual sink: {e}")))?;

        Ok(Self {
            cancel_tx: Some(cancel_tx),
            thread: Some(thread),
        })
    }
}

impl SinkDriver for Clock {
    fn shut_down(&mut self) {
        drop(self.cancel_tx.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Virtual sink thread panicked");
            }
        }
    }
}

impl Drop for Clock {
    fn drop(&mut self) {
        self.shut_down();
    }
}
