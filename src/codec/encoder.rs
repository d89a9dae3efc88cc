//! Opus encoder wrapper
//!
//! Narrowband voice: 8 kHz mono, 20 ms (160 sample) frames.

use bytes::Bytes;
use opus::{Application, Channels};

use crate::codec::{CodecFactory, Decoder, Encoder, OpusDecoder};
use crate::config::CodecConfig;
use crate::constants::{FRAME_SAMPLES, SAMPLE_RATE};
use crate::error::CodecError;

/// Opus encoder configured for voice
pub struct OpusEncoder {
    encoder: Option<opus::Encoder>,
    frame_size: usize,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
    frames_encoded: u64,
    bytes_produced: u64,
}

impl OpusEncoder {
    pub fn new(config: &CodecConfig) -> Result<Self, CodecError> {
        let mut encoder = opus::Encoder::new(SAMPLE_RATE, Channels::Mono, Application::Voip)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        encoder
            .set_bitrate(opus::Bitrate::Bits(config.bitrate as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;
        encoder
            .set_vbr(config.vbr)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set VBR: {}", e)))?;
        encoder
            .set_inband_fec(config.fec)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set FEC: {}", e)))?;

        Ok(Self {
            encoder: Some(encoder),
            frame_size: FRAME_SAMPLES,
            encode_buffer: vec![0u8; 512],
            frames_encoded: 0,
            bytes_produced: 0,
        })
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
            average_frame_size: if self.frames_encoded > 0 {
                self.bytes_produced as f32 / self.frames_encoded as f32
            } else {
                0.0
            },
        }
    }
}

impl Encoder for OpusEncoder {
    fn frame_sample_count(&self) -> usize {
        self.frame_size
    }

    fn encode(&mut self, samples: &[i16]) -> Result<Bytes, CodecError> {
        if samples.len() != self.frame_size {
            return Err(CodecError::InvalidFrameSize(samples.len()));
        }
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| CodecError::EncodingFailed("encoder released".into()))?;

        let size = encoder
            .encode(samples, &mut self.encode_buffer)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        self.frames_encoded += 1;
        self.bytes_produced += size as u64;

        Ok(Bytes::copy_from_slice(&self.encode_buffer[..size]))
    }

    fn release(&mut self) {
        self.encoder = None;
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub average_frame_size: f32,
}

/// Builds Opus encoders and decoders from one codec configuration
pub struct OpusCodecFactory {
    config: CodecConfig,
}

impl OpusCodecFactory {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }
}

impl CodecFactory for OpusCodecFactory {
    fn new_encoder(&self) -> Result<Box<dyn Encoder>, CodecError> {
        Ok(Box::new(OpusEncoder::new(&self.config)?))
    }

    fn new_decoder(&self) -> Result<Box<dyn Decoder>, CodecError> {
        Ok(Box::new(OpusDecoder::new()?))
    }
}
