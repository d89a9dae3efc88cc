//! Audio subsystem: framing buffers, capture fan-out and per-peer playback

pub mod buffer;
pub mod capture;
#[cfg(feature = "cpal-devices")]
pub mod cpal_backend;
pub mod device;
pub mod playback;

pub use buffer::{
    create_shared_buffer, FramingBuffer, FramingStats, RingBuffer, SharedFramingBuffer,
};
pub use capture::{CapturePipeline, CaptureStats, FanoutTarget, FramePacker};
#[cfg(feature = "cpal-devices")]
pub use cpal_backend::{list_devices, CpalBackend, CpalCaptureDevice, CpalRenderDevice};
pub use device::{AudioBackend, AudioDeviceInfo, CaptureDevice, RenderDevice};
pub use playback::{PlaybackPipeline, VolumeRegistry};
