//! Fakes shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::DuplexStream;

use group_intercom::audio::{
    AudioBackend, CaptureDevice, CapturePipeline, RenderDevice, VolumeRegistry,
};
use group_intercom::codec::{CodecFactory, Decoder, Encoder};
use group_intercom::config::AppConfig;
use group_intercom::error::{AudioError, CodecError, ConnectError, NetworkError};
use group_intercom::network::{Acceptor, PeerStream, Transport};
use group_intercom::peer::{ChannelId, PeerIdentity};
use group_intercom::session::{LinkContext, Notifier};

/// Samples per codec window
pub const WINDOW: usize = 16;

/// Encodes a window as `[first sample, window length]`
pub struct ToneEncoder;

impl Encoder for ToneEncoder {
    fn frame_sample_count(&self) -> usize {
        WINDOW
    }

    fn encode(&mut self, samples: &[i16]) -> Result<Bytes, CodecError> {
        Ok(Bytes::from(vec![samples[0] as u8, samples.len() as u8]))
    }
}

pub struct ToneDecoder;

impl Decoder for ToneDecoder {
    fn frame_sample_count(&self) -> usize {
        WINDOW
    }

    fn decode(&mut self, frame: &[u8]) -> Result<Vec<i16>, CodecError> {
        if frame.len() != 2 {
            return Err(CodecError::InvalidFrameSize(frame.len()));
        }
        Ok(vec![frame[0] as i16; frame[1] as usize])
    }
}

pub struct ToneCodec;

impl CodecFactory for ToneCodec {
    fn new_encoder(&self) -> Result<Box<dyn Encoder>, CodecError> {
        Ok(Box::new(ToneEncoder))
    }

    fn new_decoder(&self) -> Result<Box<dyn Decoder>, CodecError> {
        Ok(Box::new(ToneDecoder))
    }
}

/// Microphone producing a constant sample value
pub struct ToneMic {
    value: i16,
    recording: AtomicBool,
}

impl ToneMic {
    pub fn new(value: i16) -> Self {
        Self {
            value,
            recording: AtomicBool::new(false),
        }
    }
}

impl CaptureDevice for ToneMic {
    fn start(&self) -> Result<(), AudioError> {
        self.recording.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.recording.store(false, Ordering::SeqCst);
    }

    fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    fn read(&self, buf: &mut [i16]) -> Result<usize, AudioError> {
        std::thread::sleep(Duration::from_millis(2));
        buf.fill(self.value);
        Ok(buf.len())
    }
}

#[derive(Default)]
pub struct FakeSpeaker {
    pub samples: Mutex<Vec<i16>>,
    pub volume: Mutex<f32>,
}

impl FakeSpeaker {
    pub fn heard(&self, value: i16) -> bool {
        self.samples.lock().iter().any(|&s| s == value)
    }
}

impl RenderDevice for FakeSpeaker {
    fn start(&self) -> Result<(), AudioError> {
        Ok(())
    }

    fn stop(&self) {}

    fn write(&self, samples: &[i16]) -> Result<(), AudioError> {
        self.samples.lock().extend_from_slice(samples);
        Ok(())
    }

    fn set_volume(&self, level: f32) {
        *self.volume.lock() = level;
    }
}

/// Backend handing out one tone microphone and recording speakers
pub struct FakeBackend {
    pub mic: Arc<ToneMic>,
    pub speakers: Mutex<Vec<Arc<FakeSpeaker>>>,
    pub render_fails: AtomicBool,
}

impl FakeBackend {
    pub fn new(tone: i16) -> Arc<Self> {
        Arc::new(Self {
            mic: Arc::new(ToneMic::new(tone)),
            speakers: Mutex::new(Vec::new()),
            render_fails: AtomicBool::new(false),
        })
    }

    pub fn heard(&self, value: i16) -> bool {
        self.speakers.lock().iter().any(|s| s.heard(value))
    }
}

impl AudioBackend for FakeBackend {
    fn open_capture(&self) -> Result<Arc<dyn CaptureDevice>, AudioError> {
        Ok(self.mic.clone())
    }

    fn open_render(&self) -> Result<Arc<dyn RenderDevice>, AudioError> {
        if self.render_fails.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceNotFound("speaker".to_string()));
        }
        let speaker = Arc::new(FakeSpeaker::default());
        self.speakers.lock().push(speaker.clone());
        Ok(speaker)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connected(String),
    Disconnected(String),
    Message(String),
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<Event>>,
}

impl RecordingNotifier {
    pub fn connected_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, Event::Connected(_)))
            .count()
    }

    pub fn disconnected_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, Event::Disconnected(_)))
            .count()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Message(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn connected(&self, peer: &PeerIdentity) {
        self.events.lock().push(Event::Connected(peer.name.clone()));
    }

    fn disconnected(&self, peer: &PeerIdentity) {
        self.events.lock().push(Event::Disconnected(peer.name.clone()));
    }

    fn show_message(&self, text: &str) {
        self.events.lock().push(Event::Message(text.to_string()));
    }
}

/// Outcome of one scripted connect attempt
pub enum Attempt {
    Unreachable,
    Fatal,
    Connect,
}

/// Connector transport following a script; once the script runs out every
/// attempt is unreachable. The remote end of each connection is kept for
/// the test to drive.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Attempt>>,
    pub remotes: Mutex<Vec<DuplexStream>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Attempt>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            remotes: Mutex::new(Vec::new()),
        })
    }

    pub fn take_remote(&self) -> Option<DuplexStream> {
        self.remotes.lock().pop()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(
        &self,
        _channel_id: ChannelId,
        peer: &PeerIdentity,
    ) -> Result<PeerStream, ConnectError> {
        let attempt = self.script.lock().pop_front().unwrap_or(Attempt::Unreachable);
        match attempt {
            Attempt::Unreachable => {
                Err(ConnectError::Unreachable(format!("{} out of range", peer.name)))
            }
            Attempt::Fatal => Err(ConnectError::Fatal("adapter failure".to_string())),
            Attempt::Connect => {
                let (local, remote) = tokio::io::duplex(64 * 1024);
                self.remotes.lock().push(remote);
                Ok(Box::new(local))
            }
        }
    }

    async fn listen(&self, _channel_id: ChannelId) -> Result<Box<dyn Acceptor>, NetworkError> {
        Err(NetworkError::BindFailed("scripted transport cannot listen".to_string()))
    }
}

/// Configuration sized for the tone codec
pub fn test_config(name: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.identity.name = name.to_string();
    config.identity.address = format!("addr-{name}");
    config.session.reconnect_interval_ms = 50;
    config.audio.capture_buffer_len = WINDOW;
    config.audio.send_buffer_len = 16 * WINDOW;
    config.audio.receive_frames = 16;
    config
}

/// Link context over a running capture pipeline
pub fn link_context(
    config: &AppConfig,
    backend: Arc<FakeBackend>,
    notifier: Arc<RecordingNotifier>,
) -> (LinkContext, Arc<CapturePipeline>) {
    let capture = Arc::new(CapturePipeline::new(
        backend.mic.clone(),
        Box::new(ToneEncoder),
        &config.audio,
    ));
    capture.start().unwrap();
    let volume = Arc::new(VolumeRegistry::new(config.audio.initial_volume));
    let context = LinkContext::new(
        config,
        capture.clone(),
        backend,
        Arc::new(ToneCodec),
        volume,
        notifier,
    );
    (context, capture)
}

/// Poll `condition` until it holds or two seconds pass
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
