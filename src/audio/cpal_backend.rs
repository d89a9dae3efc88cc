//! cpal-backed capture and render devices
//!
//! A cpal stream is not `Send`, so each one lives on its own thread for as
//! long as the device is started. Captured audio is downmixed to mono and
//! decimated to the voice rate in the input callback; rendered audio is
//! held and repeated up to the device rate in the output callback.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::queue::ArrayQueue;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::{AudioBackend, AudioDeviceInfo, CaptureDevice, RenderDevice};
use crate::constants::{DEFAULT_VOLUME, SAMPLE_RATE};
use crate::error::AudioError;

/// Captured chunks buffered between the callback and `read`
const CAPTURE_QUEUE_CHUNKS: usize = 64;

/// Render queue length in samples (one second of voice)
const RENDER_QUEUE_SAMPLES: usize = SAMPLE_RATE as usize;

/// How long `read` waits for the callback before returning nothing
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Thread owning a running cpal stream
struct StreamThread {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl StreamThread {
    fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.handle.join();
    }
}

fn find_device(name: Option<&str>, input: bool) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();

    let Some(name) = name else {
        let device = if input {
            host.default_input_device()
        } else {
            host.default_output_device()
        };
        return device.ok_or_else(|| AudioError::DeviceNotFound("No default device".to_string()));
    };

    let devices = if input {
        host.input_devices()
    } else {
        host.output_devices()
    }
    .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if device.name().ok().as_deref() == Some(name) {
            return Ok(device);
        }
    }
    Err(AudioError::DeviceNotFound(name.to_string()))
}

/// Spawn a thread that builds a stream with `build`, plays it, and keeps it
/// alive until stopped. Returns once the stream is playing or has failed.
fn spawn_stream<F>(thread_name: &str, build: F) -> Result<StreamThread, AudioError>
where
    F: FnOnce() -> Result<cpal::Stream, AudioError> + Send + 'static,
{
    let (stop_tx, stop_rx) = bounded::<()>(1);
    let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

    let handle = thread::Builder::new()
        .name(thread_name.to_string())
        .spawn(move || {
            let stream = match build() {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            // Keep the stream alive until asked to stop
            let _ = stop_rx.recv();
        })
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(StreamThread { stop_tx, handle }),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => {
            let _ = handle.join();
            Err(AudioError::StreamError("stream thread exited".to_string()))
        }
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Box-filter decimator from the device rate down to the voice rate
struct Decimator {
    ratio: f64,
    position: f64,
    sum: f32,
    count: u32,
}

impl Decimator {
    fn new(device_rate: u32) -> Self {
        Self {
            ratio: device_rate as f64 / SAMPLE_RATE as f64,
            position: 0.0,
            sum: 0.0,
            count: 0,
        }
    }

    fn push(&mut self, sample: f32, out: &mut Vec<i16>) {
        self.sum += sample;
        self.count += 1;
        self.position += 1.0;
        if self.position >= self.ratio {
            out.push(to_i16(self.sum / self.count as f32));
            self.position -= self.ratio;
            self.sum = 0.0;
            self.count = 0;
        }
    }
}

/// Microphone input through cpal
pub struct CpalCaptureDevice {
    device_name: Option<String>,
    recording: AtomicBool,
    stream: Mutex<Option<StreamThread>>,
    chunks_tx: Sender<Vec<i16>>,
    chunks_rx: Receiver<Vec<i16>>,
    pending: Mutex<VecDeque<i16>>,
}

impl CpalCaptureDevice {
    pub fn new(device_name: Option<String>) -> Self {
        let (chunks_tx, chunks_rx) = bounded(CAPTURE_QUEUE_CHUNKS);
        Self {
            device_name,
            recording: AtomicBool::new(false),
            stream: Mutex::new(None),
            chunks_tx,
            chunks_rx,
            pending: Mutex::new(VecDeque::new()),
        }
    }
}

impl CaptureDevice for CpalCaptureDevice {
    fn start(&self) -> Result<(), AudioError> {
        let mut stream = self.stream.lock();
        if stream.is_some() {
            return Ok(());
        }

        let device_name = self.device_name.clone();
        let chunks_tx = self.chunks_tx.clone();
        let thread = spawn_stream("capture-stream", move || {
            let device = find_device(device_name.as_deref(), true)?;
            let supported = device
                .default_input_config()
                .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;
            let config: cpal::StreamConfig = supported.config();
            let channels = config.channels.max(1) as usize;
            let mut decimator = Decimator::new(config.sample_rate.0);

            device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let mut out = Vec::with_capacity(data.len() / channels + 1);
                        for frame in data.chunks_exact(channels) {
                            let mono = frame.iter().sum::<f32>() / channels as f32;
                            decimator.push(mono, &mut out);
                        }
                        if !out.is_empty() {
                            // Reader fell behind: drop this chunk
                            let _ = chunks_tx.try_send(out);
                        }
                    },
                    |err| tracing::warn!("Audio input stream error: {}", err),
                    None,
                )
                .map_err(|e| AudioError::StreamError(e.to_string()))
        })?;

        *stream = Some(thread);
        self.recording.store(true, Ordering::SeqCst);
        tracing::debug!("Capture device started");
        Ok(())
    }

    fn stop(&self) {
        self.recording.store(false, Ordering::SeqCst);
        if let Some(thread) = self.stream.lock().take() {
            thread.stop();
            tracing::debug!("Capture device stopped");
        }
    }

    fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    fn read(&self, buf: &mut [i16]) -> Result<usize, AudioError> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            match self.chunks_rx.recv_timeout(READ_TIMEOUT) {
                Ok(chunk) => pending.extend(chunk),
                Err(_) => return Ok(0),
            }
        }
        while let Ok(chunk) = self.chunks_rx.try_recv() {
            pending.extend(chunk);
        }

        let count = buf.len().min(pending.len());
        for (slot, sample) in buf.iter_mut().zip(pending.drain(..count)) {
            *slot = sample;
        }
        Ok(count)
    }
}

impl Drop for CpalCaptureDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Speaker output through cpal
pub struct CpalRenderDevice {
    device_name: Option<String>,
    stream: Mutex<Option<StreamThread>>,
    queue: Arc<ArrayQueue<i16>>,
    volume_bits: Arc<AtomicU32>,
    dropped_samples: AtomicU64,
}

impl CpalRenderDevice {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            stream: Mutex::new(None),
            queue: Arc::new(ArrayQueue::new(RENDER_QUEUE_SAMPLES)),
            volume_bits: Arc::new(AtomicU32::new(DEFAULT_VOLUME.to_bits())),
            dropped_samples: AtomicU64::new(0),
        }
    }

    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples.load(Ordering::Relaxed)
    }
}

impl RenderDevice for CpalRenderDevice {
    fn start(&self) -> Result<(), AudioError> {
        let mut stream = self.stream.lock();
        if stream.is_some() {
            return Ok(());
        }

        let device_name = self.device_name.clone();
        let queue = self.queue.clone();
        let volume_bits = self.volume_bits.clone();
        let thread = spawn_stream("render-stream", move || {
            let device = find_device(device_name.as_deref(), false)?;
            let supported = device
                .default_output_config()
                .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;
            let config: cpal::StreamConfig = supported.config();
            let channels = config.channels.max(1) as usize;
            let step = SAMPLE_RATE as f64 / config.sample_rate.0 as f64;
            let mut position = 1.0f64;
            let mut current = 0.0f32;

            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let volume = f32::from_bits(volume_bits.load(Ordering::Relaxed));
                        for frame in data.chunks_exact_mut(channels) {
                            position += step;
                            if position >= 1.0 {
                                position -= 1.0;
                                current = queue.pop().unwrap_or(0) as f32 / i16::MAX as f32;
                            }
                            frame.fill(current * volume);
                        }
                    },
                    |err| tracing::warn!("Audio output stream error: {}", err),
                    None,
                )
                .map_err(|e| AudioError::StreamError(e.to_string()))
        })?;

        *stream = Some(thread);
        Ok(())
    }

    fn stop(&self) {
        if let Some(thread) = self.stream.lock().take() {
            thread.stop();
        }
        while self.queue.pop().is_some() {}
    }

    fn write(&self, samples: &[i16]) -> Result<(), AudioError> {
        if self.stream.lock().is_none() {
            return Err(AudioError::Closed);
        }
        for (i, &sample) in samples.iter().enumerate() {
            if self.queue.push(sample).is_err() {
                self.dropped_samples
                    .fetch_add((samples.len() - i) as u64, Ordering::Relaxed);
                break;
            }
        }
        Ok(())
    }

    fn set_volume(&self, level: f32) {
        self.volume_bits
            .store(level.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

impl Drop for CpalRenderDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Host audio through cpal
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

impl AudioBackend for CpalBackend {
    fn open_capture(&self) -> Result<Arc<dyn CaptureDevice>, AudioError> {
        // Fail early when there is no such device
        find_device(self.input_device.as_deref(), true)?;
        Ok(Arc::new(CpalCaptureDevice::new(self.input_device.clone())))
    }

    fn open_render(&self) -> Result<Arc<dyn RenderDevice>, AudioError> {
        find_device(self.output_device.as_deref(), false)?;
        Ok(Arc::new(CpalRenderDevice::new(self.output_device.clone())))
    }
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<AudioDeviceInfo> = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let is_default = default_input_name.as_ref() == Some(&name);
                devices.push(AudioDeviceInfo {
                    name,
                    is_input: true,
                    is_output: false,
                    is_default,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let is_default = default_output_name.as_ref() == Some(&name);
                if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                    existing.is_output = true;
                    existing.is_default |= is_default;
                } else {
                    devices.push(AudioDeviceInfo {
                        name,
                        is_input: false,
                        is_output: true,
                        is_default,
                    });
                }
            }
        }
    }

    devices
}
