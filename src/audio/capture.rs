//! Single-capture, multi-deliver microphone pipeline
//!
//! One capture device and one send-side framing buffer serve every
//! connected peer: audio is read and encoded once, and the same framed
//! bytes go to each registered fan-out target.

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{create_shared_buffer, FramingStats, SharedFramingBuffer};
use crate::audio::device::CaptureDevice;
use crate::codec::Encoder;
use crate::config::AudioConfig;
use crate::constants::CAPTURE_RETRY_DELAY_MS;
use crate::error::AudioError;

/// Receiver of the broadcast byte stream
pub trait FanoutTarget: Send + Sync {
    /// Queue bytes for delivery; must not block
    fn send(&self, data: Bytes);
}

fn same_target(a: &Arc<dyn FanoutTarget>, b: &Arc<dyn FanoutTarget>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Cuts raw samples into codec windows, encodes them and frames the result
pub struct FramePacker {
    encoder: Box<dyn Encoder>,
    pending: Vec<i16>,
    output: SharedFramingBuffer,
    frames_packed: u64,
    encode_failures: u64,
}

impl FramePacker {
    pub fn new(encoder: Box<dyn Encoder>, output: SharedFramingBuffer) -> Self {
        let window = encoder.frame_sample_count();
        Self {
            encoder,
            pending: Vec::with_capacity(window * 2),
            output,
            frames_packed: 0,
            encode_failures: 0,
        }
    }

    /// Feed captured samples; every complete window is encoded and framed
    pub fn add_raw(&mut self, samples: &[i16]) {
        self.pending.extend_from_slice(samples);
        let window = self.encoder.frame_sample_count();
        if window == 0 {
            self.pending.clear();
            return;
        }

        let mut consumed = 0;
        while self.pending.len() - consumed >= window {
            let chunk = &self.pending[consumed..consumed + window];
            consumed += window;
            match self.encoder.encode(chunk) {
                Ok(frame) => {
                    if self.output.lock().append_frame(&frame) {
                        self.frames_packed += 1;
                    }
                }
                Err(e) => {
                    self.encode_failures += 1;
                    tracing::trace!("Encoding failed: {}", e);
                }
            }
        }
        self.pending.drain(..consumed);
    }

    /// Take up to `max` framed bytes ready for the wire
    pub fn take_framed(&self, max: usize) -> Bytes {
        self.output.lock().drain(max)
    }

    pub fn frames_packed(&self) -> u64 {
        self.frames_packed
    }

    pub fn release(&mut self) {
        self.encoder.release();
    }
}

struct CaptureState {
    targets: Vec<Arc<dyn FanoutTarget>>,
    muted: bool,
    exit: bool,
}

struct Shared {
    device: Arc<dyn CaptureDevice>,
    state: Mutex<CaptureState>,
    /// Signalled whenever the device may have started or exit was requested
    wake: Condvar,
    send_buffer: SharedFramingBuffer,
    bytes_broadcast: AtomicU64,
    read_failures: AtomicU64,
}

impl Shared {
    /// Start or stop the device so that it runs exactly when there is
    /// someone to send to and the microphone is not muted.
    fn sync_device(&self, state: &CaptureState) {
        let wanted = !state.exit && !state.muted && !state.targets.is_empty();
        if wanted && !self.device.is_recording() {
            if let Err(e) = self.device.start() {
                tracing::error!("Failed to start capture device: {}", e);
                return;
            }
            self.wake.notify_all();
        } else if !wanted && self.device.is_recording() {
            self.device.stop();
        }
    }
}

/// Microphone capture shared by all sessions
pub struct CapturePipeline {
    shared: Arc<Shared>,
    packer: Mutex<Option<FramePacker>>,
    capture_buffer_len: usize,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl CapturePipeline {
    pub fn new(
        device: Arc<dyn CaptureDevice>,
        encoder: Box<dyn Encoder>,
        config: &AudioConfig,
    ) -> Self {
        let send_buffer = create_shared_buffer(config.send_buffer_len);
        let packer = FramePacker::new(encoder, send_buffer.clone());

        Self {
            shared: Arc::new(Shared {
                device,
                state: Mutex::new(CaptureState {
                    targets: Vec::new(),
                    muted: false,
                    exit: false,
                }),
                wake: Condvar::new(),
                send_buffer,
                bytes_broadcast: AtomicU64::new(0),
                read_failures: AtomicU64::new(0),
            }),
            packer: Mutex::new(Some(packer)),
            capture_buffer_len: config.capture_buffer_len,
            thread_handle: Mutex::new(None),
        }
    }

    /// Spawn the capture thread. Calling it again is a no-op.
    pub fn start(&self) -> Result<(), AudioError> {
        let Some(mut packer) = self.packer.lock().take() else {
            return Ok(());
        };
        let shared = self.shared.clone();
        let buffer_len = self.capture_buffer_len;

        let handle = thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                capture_loop(&shared, &mut packer, buffer_len);
                packer.release();
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        *self.thread_handle.lock() = Some(handle);
        Ok(())
    }

    /// Add a channel to the broadcast set, starting capture if it was idle
    pub fn register_fanout_target(&self, target: Arc<dyn FanoutTarget>) {
        let mut state = self.shared.state.lock();
        if state.exit || state.targets.iter().any(|t| same_target(t, &target)) {
            return;
        }
        state.targets.push(target);
        self.shared.sync_device(&state);
    }

    /// Remove a channel; capture stops when nobody is left
    pub fn unregister_fanout_target(&self, target: &Arc<dyn FanoutTarget>) {
        let mut state = self.shared.state.lock();
        state.targets.retain(|t| !same_target(t, target));
        self.shared.sync_device(&state);
    }

    /// Stop or resume the microphone without touching registrations
    pub fn set_muted(&self, muted: bool) {
        let mut state = self.shared.state.lock();
        if state.muted == muted {
            return;
        }
        state.muted = muted;
        self.shared.sync_device(&state);
        tracing::info!(muted, "Microphone state changed");
    }

    pub fn is_muted(&self) -> bool {
        self.shared.state.lock().muted
    }

    pub fn target_count(&self) -> usize {
        self.shared.state.lock().targets.len()
    }

    pub fn is_capturing(&self) -> bool {
        self.shared.device.is_recording()
    }

    /// Stop capture, drop all targets and join the capture thread
    pub fn exit(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.exit {
                return;
            }
            state.exit = true;
            state.targets.clear();
            self.shared.sync_device(&state);
            self.shared.wake.notify_all();
        }

        if let Some(handle) = self.thread_handle.lock().take() {
            let _ = handle.join();
        }
        if let Some(mut packer) = self.packer.lock().take() {
            packer.release();
        }
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            bytes_broadcast: self.shared.bytes_broadcast.load(Ordering::Relaxed),
            read_failures: self.shared.read_failures.load(Ordering::Relaxed),
            send_buffer: self.shared.send_buffer.lock().stats(),
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.exit();
    }
}

fn capture_loop(shared: &Shared, packer: &mut FramePacker, buffer_len: usize) {
    let mut samples = vec![0i16; buffer_len];
    let retry_delay = Duration::from_millis(CAPTURE_RETRY_DELAY_MS);

    loop {
        {
            let mut state = shared.state.lock();
            while !state.exit && !shared.device.is_recording() {
                shared.wake.wait(&mut state);
            }
            if state.exit {
                break;
            }
        }

        let count = match shared.device.read(&mut samples) {
            Ok(count) => count,
            Err(e) => {
                let failures = shared.read_failures.fetch_add(1, Ordering::Relaxed);
                if failures == 0 {
                    tracing::warn!("Capture read failed: {}", e);
                } else {
                    tracing::trace!("Capture read failed again: {}", e);
                }
                // Back off, but wake early on exit
                let mut state = shared.state.lock();
                if !state.exit {
                    shared.wake.wait_for(&mut state, retry_delay);
                }
                continue;
            }
        };
        if count > 0 {
            packer.add_raw(&samples[..count]);
        }
        let framed = packer.take_framed(buffer_len);
        if framed.is_empty() {
            continue;
        }

        let targets = shared.state.lock().targets.clone();
        for target in &targets {
            target.send(framed.clone());
        }
        shared
            .bytes_broadcast
            .fetch_add((framed.len() * targets.len()) as u64, Ordering::Relaxed);
    }

    tracing::debug!("Capture loop exited");
}

/// Capture pipeline statistics
#[derive(Debug, Clone)]
pub struct CaptureStats {
    pub bytes_broadcast: u64,
    pub read_failures: u64,
    pub send_buffer: FramingStats,
}
