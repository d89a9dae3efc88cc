//! Opus decoder wrapper

use opus::Channels;

use crate::codec::Decoder;
use crate::constants::{FRAME_SAMPLES, SAMPLE_RATE};
use crate::error::CodecError;

/// Opus decoder for the narrowband voice stream
pub struct OpusDecoder {
    decoder: Option<opus::Decoder>,
    frame_size: usize,
    /// Decoding buffer, large enough for a 120 ms packet at 8 kHz
    decode_buffer: Vec<i16>,
    frames_decoded: u64,
    frames_failed: u64,
}

impl OpusDecoder {
    pub fn new() -> Result<Self, CodecError> {
        let decoder = opus::Decoder::new(SAMPLE_RATE, Channels::Mono)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        Ok(Self {
            decoder: Some(decoder),
            frame_size: FRAME_SAMPLES,
            decode_buffer: vec![0i16; SAMPLE_RATE as usize * 120 / 1000],
            frames_decoded: 0,
            frames_failed: 0,
        })
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_failed: self.frames_failed,
        }
    }
}

impl Decoder for OpusDecoder {
    fn frame_sample_count(&self) -> usize {
        self.frame_size
    }

    fn decode(&mut self, frame: &[u8]) -> Result<Vec<i16>, CodecError> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| CodecError::DecodingFailed("decoder released".into()))?;

        match decoder.decode(frame, &mut self.decode_buffer, false) {
            Ok(samples) => {
                self.frames_decoded += 1;
                Ok(self.decode_buffer[..samples].to_vec())
            }
            Err(e) => {
                self.frames_failed += 1;
                Err(CodecError::DecodingFailed(e.to_string()))
            }
        }
    }

    fn release(&mut self) {
        self.decoder = None;
    }
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_failed: u64,
}
