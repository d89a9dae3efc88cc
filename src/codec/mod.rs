//! Voice codec capability
//!
//! The pipelines only see these traits; the compression algorithm itself
//! lives behind them and can be swapped. An Opus-backed implementation is
//! available with the `opus-codec` feature.

#[cfg(feature = "opus-codec")]
pub mod decoder;
#[cfg(feature = "opus-codec")]
pub mod encoder;

#[cfg(feature = "opus-codec")]
pub use decoder::OpusDecoder;
#[cfg(feature = "opus-codec")]
pub use encoder::{OpusCodecFactory, OpusEncoder};

use bytes::Bytes;

use crate::error::CodecError;

/// Compresses fixed-size windows of PCM samples
pub trait Encoder: Send {
    /// Samples consumed by one `encode` call
    fn frame_sample_count(&self) -> usize;

    /// Encode exactly `frame_sample_count()` samples into one frame
    fn encode(&mut self, samples: &[i16]) -> Result<Bytes, CodecError>;

    /// Free codec resources; the encoder is unusable afterwards
    fn release(&mut self) {}
}

/// Expands one encoded frame back to PCM samples
pub trait Decoder: Send {
    fn frame_sample_count(&self) -> usize;

    fn decode(&mut self, frame: &[u8]) -> Result<Vec<i16>, CodecError>;

    fn release(&mut self) {}
}

/// Creates codec instances: one encoder for the capture pipeline, one
/// decoder per playback pipeline
pub trait CodecFactory: Send + Sync {
    fn new_encoder(&self) -> Result<Box<dyn Encoder>, CodecError>;

    fn new_decoder(&self) -> Result<Box<dyn Decoder>, CodecError>;
}
