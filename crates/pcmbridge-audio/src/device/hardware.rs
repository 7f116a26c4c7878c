//! Hardware devices through the default cpal output.

use std::sync::Arc;

use pcmbridge_core::{AudioFormatSpec, Result};
use tracing::warn;

use super::{DeviceBackend, PlaybackDevice, RingDevice, SinkDriver};
use crate::output::{min_buffer_frames, OutputShared, OutputStream, StreamRequest};

/// Frames assumed when the host does not report a buffer range.
const FALLBACK_MIN_FRAMES: usize = 1024;

/// Opens devices on the system's default output.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub const fn new() -> Self {
        Self
    }
}

impl SinkDriver for OutputStream {
    fn shut_down(&mut self) {
        self.close();
    }
}

impl DeviceBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn min_buffer_size(&self, format: &AudioFormatSpec) -> Result<usize> {
        let request = StreamRequest {
            sample_rate: format.sample_rate,
            channels: format.channels.count(),
        };
        let frames = match min_buffer_frames(request)? {
            Some(frames) => (frames as usize).max(1),
            None => {
                warn!("Host reports no buffer range, assuming {FALLBACK_MIN_FRAMES} frames");
                FALLBACK_MIN_FRAMES
            }
        };
        Ok(frames * format.frame_bytes())
    }

    fn open(&self, format: &AudioFormatSpec, buffer_size: usize) -> Result<Arc<dyn PlaybackDevice>> {
        RingDevice::open_on(self, format, buffer_size)
    }

    fn open_sink(&self, sample_rate: u32, shared: Arc<OutputShared>) -> Result<Box<dyn SinkDriver>> {
        let request = StreamRequest {
            sample_rate,
            channels: shared.channels(),
        };
        Ok(Box::new(OutputStream::open(request, shared)?))
    }
}
