//! Per-connection playback: de-frame, decode, render
//!
//! Every live connection owns one [`PlaybackPipeline`]. Bytes arriving from
//! the socket are inserted into a receive-side framing buffer and a decode
//! task, woken per insertion, turns complete frames into samples for the
//! render device.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::audio::buffer::{FramingBuffer, FramingStats};
use crate::audio::device::RenderDevice;
use crate::codec::Decoder;
use crate::error::AudioError;

struct VolumeState {
    level: f32,
    players: HashMap<u64, Arc<dyn RenderDevice>>,
    next_id: u64,
}

/// Shared playback volume and the set of render devices it applies to.
///
/// One registry lives for the duration of a talk session and is handed to
/// each playback pipeline at construction.
pub struct VolumeRegistry {
    state: Mutex<VolumeState>,
}

impl VolumeRegistry {
    pub fn new(initial_level: f32) -> Self {
        Self {
            state: Mutex::new(VolumeState {
                level: initial_level.clamp(0.0, 1.0),
                players: HashMap::new(),
                next_id: 0,
            }),
        }
    }

    /// Track a render device and apply the current level to it
    pub fn register(&self, device: Arc<dyn RenderDevice>) -> u64 {
        let mut state = self.state.lock();
        device.set_volume(state.level);
        let id = state.next_id;
        state.next_id += 1;
        state.players.insert(id, device);
        id
    }

    pub fn unregister(&self, id: u64) {
        self.state.lock().players.remove(&id);
    }

    /// Set the level and reapply it to every active device
    pub fn set_volume(&self, level: f32) {
        let mut state = self.state.lock();
        state.level = level.clamp(0.0, 1.0);
        for device in state.players.values() {
            device.set_volume(state.level);
        }
    }

    pub fn level(&self) -> f32 {
        self.state.lock().level
    }

    pub fn active_players(&self) -> usize {
        self.state.lock().players.len()
    }

    /// Forget every registered device
    pub fn clear(&self) {
        self.state.lock().players.clear();
    }
}

/// Decode/render loop for one remote peer
pub struct PlaybackPipeline {
    registry_id: u64,
    buffer: Mutex<FramingBuffer>,
    data_ready: Notify,
    device: Arc<dyn RenderDevice>,
    registry: Arc<VolumeRegistry>,
    closed: AtomicBool,
    frames_played: AtomicU64,
    decode_failures: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackPipeline {
    /// Start the render device and spawn the decode task.
    ///
    /// The receive buffer holds `receive_frames` times the decoder's frame
    /// sample count in bytes.
    pub fn start(
        device: Arc<dyn RenderDevice>,
        decoder: Box<dyn Decoder>,
        registry: Arc<VolumeRegistry>,
        receive_frames: usize,
    ) -> Result<Arc<Self>, AudioError> {
        let capacity = (receive_frames * decoder.frame_sample_count()).max(2);
        device.start()?;
        let registry_id = registry.register(device.clone());

        let pipeline = Arc::new(Self {
            registry_id,
            buffer: Mutex::new(FramingBuffer::new(capacity)),
            data_ready: Notify::new(),
            device,
            registry,
            closed: AtomicBool::new(false),
            frames_played: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            task: Mutex::new(None),
        });

        let handle = tokio::spawn(pipeline.clone().decode_loop(decoder));
        *pipeline.task.lock() = Some(handle);
        Ok(pipeline)
    }

    /// Queue raw socket bytes and wake the decode task.
    ///
    /// A chunk that does not fit the receive buffer is dropped.
    pub fn on_bytes_received(&self, data: &[u8]) -> Result<(), AudioError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AudioError::Closed);
        }
        if !self.buffer.lock().insert(data) {
            tracing::trace!(bytes = data.len(), "Receive buffer full, chunk dropped");
        }
        self.data_ready.notify_one();
        Ok(())
    }

    /// Stop rendering and let the decode task exit. Idempotent.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.registry.unregister(self.registry_id);
        self.device.stop();
        self.data_ready.notify_one();
    }

    /// Wait for the decode task to finish after [`shutdown`](Self::shutdown)
    pub async fn join(&self) {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn frames_played(&self) -> u64 {
        self.frames_played.load(Ordering::Relaxed)
    }

    pub fn buffer_stats(&self) -> FramingStats {
        self.buffer.lock().stats()
    }

    /// Next frame from the receive buffer, skipping empty frames
    fn next_frame(&self) -> Option<bytes::Bytes> {
        let mut buffer = self.buffer.lock();
        loop {
            if let Some(frame) = buffer.extract_frame() {
                return Some(frame);
            }
            if !buffer.may_hold_frame() {
                return None;
            }
        }
    }

    async fn decode_loop(self: Arc<Self>, mut decoder: Box<dyn Decoder>) {
        loop {
            self.data_ready.notified().await;
            if self.is_closed() {
                break;
            }

            while let Some(frame) = self.next_frame() {
                if self.is_closed() {
                    break;
                }
                match decoder.decode(&frame) {
                    Ok(samples) => {
                        if let Err(e) = self.device.write(&samples) {
                            tracing::debug!("Render write failed: {}", e);
                        } else {
                            self.frames_played.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Err(e) => {
                        self.decode_failures.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!("Dropping undecodable frame: {}", e);
                    }
                }
            }
        }

        decoder.release();
        tracing::debug!(
            frames = self.frames_played(),
            failures = self.decode_failures.load(Ordering::Relaxed),
            "Playback decode loop exited"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::FRAME_TERMINATOR;
    use crate::error::CodecError;
    use std::time::Duration;

    #[derive(Default)]
    struct Speaker {
        samples: Mutex<Vec<i16>>,
        volume: Mutex<f32>,
        running: AtomicBool,
    }

    impl RenderDevice for Speaker {
        fn start(&self) -> Result<(), AudioError> {
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self) {
            self.running.store(false, Ordering::SeqCst);
        }

        fn write(&self, samples: &[i16]) -> Result<(), AudioError> {
            self.samples.lock().extend_from_slice(samples);
            Ok(())
        }

        fn set_volume(&self, level: f32) {
            *self.volume.lock() = level;
        }
    }

    struct ByteDecoder {
        released: Arc<AtomicBool>,
    }

    impl Decoder for ByteDecoder {
        fn frame_sample_count(&self) -> usize {
            8
        }

        fn decode(&mut self, frame: &[u8]) -> Result<Vec<i16>, CodecError> {
            Ok(frame.iter().map(|&b| b as i16).collect())
        }

        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut out = payload.to_vec();
        out.extend_from_slice(&FRAME_TERMINATOR);
        out
    }

    #[test]
    fn test_registry_reapplies_level() {
        let registry = VolumeRegistry::new(0.5);
        let first = Arc::new(Speaker::default());
        let second = Arc::new(Speaker::default());

        registry.register(first.clone());
        let id = registry.register(second.clone());
        assert_eq!(*first.volume.lock(), 0.5);

        registry.set_volume(0.8);
        assert_eq!(*first.volume.lock(), 0.8);
        assert_eq!(*second.volume.lock(), 0.8);

        registry.unregister(id);
        registry.set_volume(0.1);
        assert_eq!(*first.volume.lock(), 0.1);
        assert_eq!(*second.volume.lock(), 0.8);
        assert_eq!(registry.active_players(), 1);
    }

    #[test]
    fn test_registry_clamps() {
        let registry = VolumeRegistry::new(3.0);
        assert_eq!(registry.level(), 1.0);
        registry.set_volume(-1.0);
        assert_eq!(registry.level(), 0.0);
    }

    #[tokio::test]
    async fn test_frames_rendered_in_order() {
        let speaker = Arc::new(Speaker::default());
        let registry = Arc::new(VolumeRegistry::new(0.3));
        let released = Arc::new(AtomicBool::new(false));
        let decoder = Box::new(ByteDecoder {
            released: released.clone(),
        });

        let pipeline =
            PlaybackPipeline::start(speaker.clone(), decoder, registry.clone(), 4).unwrap();
        assert_eq!(*speaker.volume.lock(), 0.3);

        let mut stream = framed(&[1, 2, 3]);
        stream.extend_from_slice(&FRAME_TERMINATOR);
        stream.extend_from_slice(&framed(&[4, 5]));
        pipeline.on_bytes_received(&stream).unwrap();
        pipeline.on_bytes_received(&framed(&[6])).unwrap();

        for _ in 0..100 {
            if speaker.samples.lock().len() >= 6 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*speaker.samples.lock(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(pipeline.frames_played(), 3);

        pipeline.shutdown();
        pipeline.join().await;
        assert!(released.load(Ordering::SeqCst));
        assert!(!speaker.running.load(Ordering::SeqCst));
        assert_eq!(registry.active_players(), 0);
        assert!(pipeline.on_bytes_received(&[1]).is_err());
    }
}
