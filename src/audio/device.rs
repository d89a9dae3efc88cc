//! Audio device capabilities
//!
//! Devices take `&self` so a pipeline can read from (or write to) a device
//! on one thread while another starts or stops it.

use std::sync::Arc;

use crate::error::AudioError;

/// Microphone producing 16-bit mono PCM at the voice sample rate
pub trait CaptureDevice: Send + Sync {
    fn start(&self) -> Result<(), AudioError>;

    fn stop(&self);

    fn is_recording(&self) -> bool;

    /// Fill `buf` with captured samples, blocking for a bounded time.
    ///
    /// Returns the number of samples written, possibly zero.
    fn read(&self, buf: &mut [i16]) -> Result<usize, AudioError>;
}

/// Speaker rendering 16-bit mono PCM at the voice sample rate
pub trait RenderDevice: Send + Sync {
    fn start(&self) -> Result<(), AudioError>;

    fn stop(&self);

    fn write(&self, samples: &[i16]) -> Result<(), AudioError>;

    /// Linear level in `0.0..=1.0`
    fn set_volume(&self, level: f32);
}

/// Opens devices for a session: one capture device, one render device per
/// live peer connection
pub trait AudioBackend: Send + Sync {
    fn open_capture(&self) -> Result<Arc<dyn CaptureDevice>, AudioError>;

    fn open_render(&self) -> Result<Arc<dyn RenderDevice>, AudioError>;
}

/// Description of a host audio device
#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
}
