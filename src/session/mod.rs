//! Talk session: wires topology, supervisors, listeners and the audio
//! pipelines together for one talk phase

pub mod listener;
pub mod notify;
pub mod supervisor;
pub mod topology;

pub use listener::ListenerService;
pub use notify::{Notifier, TracingNotifier};
pub use supervisor::{ConnectionSupervisor, LinkContext, LinkRole, SupervisorState};
pub use topology::{assign_role, channel_id_for, plan, PeerPlan};

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::audio::capture::CapturePipeline;
use crate::audio::device::AudioBackend;
use crate::audio::playback::VolumeRegistry;
use crate::codec::CodecFactory;
use crate::config::AppConfig;
use crate::constants::DEFAULT_VOLUME;
use crate::error::{Error, SessionError};
use crate::network::transport::Transport;
use crate::peer::{ChannelRole, LocalIdentity, PeerIdentity};

/// External capabilities a session runs on
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub backend: Arc<dyn AudioBackend>,
    pub codecs: Arc<dyn CodecFactory>,
    pub notifier: Arc<dyn Notifier>,
}

/// Names may repeat inside a group; the address keeps members apart
type PeerKey = (String, String);

fn peer_key(peer: &PeerIdentity) -> PeerKey {
    (peer.name.clone(), peer.address.clone())
}

/// Keeps the live peer list in sync with link notifications before
/// passing them on
struct StatusTracker {
    peers: Arc<DashMap<PeerKey, PeerIdentity>>,
    inner: Arc<dyn Notifier>,
}

impl StatusTracker {
    fn mark(&self, peer: &PeerIdentity, connected: bool) {
        if let Some(mut entry) = self.peers.get_mut(&peer_key(peer)) {
            entry.connected = connected;
        }
    }
}

impl Notifier for StatusTracker {
    fn connected(&self, peer: &PeerIdentity) {
        self.mark(peer, true);
        self.inner.connected(peer);
    }

    fn disconnected(&self, peer: &PeerIdentity) {
        self.mark(peer, false);
        self.inner.disconnected(peer);
    }

    fn show_message(&self, text: &str) {
        self.inner.show_message(text);
    }
}

struct SpeakerState {
    muted: bool,
    /// Level to restore on unmute
    saved_level: f32,
}

/// One running talk phase with a group of peers
pub struct TalkSession {
    capture: Arc<CapturePipeline>,
    volume: Arc<VolumeRegistry>,
    supervisors: Vec<Arc<ConnectionSupervisor>>,
    listeners: Vec<Arc<ListenerService>>,
    peers: Arc<DashMap<PeerKey, PeerIdentity>>,
    speaker: Mutex<SpeakerState>,
    ended: AtomicBool,
}

impl TalkSession {
    /// Plan roles for every picked peer and start connecting/listening.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: &AppConfig,
        local: LocalIdentity,
        peers: Vec<PeerIdentity>,
        collaborators: Collaborators,
    ) -> Result<Self, Error> {
        let Collaborators {
            transport,
            backend,
            codecs,
            notifier,
        } = collaborators;

        if !transport.is_available() {
            notifier.show_message("This device has no usable transport");
            return Err(SessionError::TransportUnavailable.into());
        }

        let picked: Vec<PeerIdentity> = peers.into_iter().filter(|p| p.picked).collect();
        let limit = config.session.max_group_members;
        if picked.len() > limit {
            return Err(SessionError::TooManyPeers(picked.len(), limit).into());
        }

        let device = backend.open_capture()?;
        let encoder = codecs.new_encoder()?;
        let capture = Arc::new(CapturePipeline::new(device, encoder, &config.audio));
        capture.start()?;

        let volume = Arc::new(VolumeRegistry::new(config.audio.initial_volume));
        let peer_map = Arc::new(DashMap::new());
        for peer in &picked {
            let mut peer = peer.clone();
            peer.connected = false;
            peer_map.insert(peer_key(&peer), peer);
        }

        let tracker: Arc<dyn Notifier> = Arc::new(StatusTracker {
            peers: peer_map.clone(),
            inner: notifier,
        });
        let context = LinkContext::new(
            config,
            capture.clone(),
            backend,
            codecs,
            volume.clone(),
            tracker,
        );

        let mut supervisors = Vec::new();
        let mut listeners = Vec::new();
        for link in topology::plan(&local, &picked) {
            match link.role {
                ChannelRole::Connector => supervisors.push(ConnectionSupervisor::spawn(
                    context.clone(),
                    link.peer,
                    link.channel_id,
                    LinkRole::Connector(transport.clone()),
                )),
                ChannelRole::Listener => listeners.push(ListenerService::spawn(
                    context.clone(),
                    transport.clone(),
                    link.peer,
                    link.channel_id,
                )),
            }
        }

        info!(
            local = %local.name,
            connecting = supervisors.len(),
            listening = listeners.len(),
            "Talk session started"
        );

        Ok(Self {
            capture,
            volume,
            supervisors,
            listeners,
            peers: peer_map,
            speaker: Mutex::new(SpeakerState {
                muted: false,
                saved_level: config.audio.initial_volume,
            }),
            ended: AtomicBool::new(false),
        })
    }

    /// Tear down every link, the listeners and the capture pipeline.
    /// Idempotent.
    pub fn end_session(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        for listener in &self.listeners {
            listener.exit();
        }
        for supervisor in &self.supervisors {
            supervisor.stop();
        }
        self.capture.exit();
        self.volume.clear();
        info!("Talk session ended");
    }

    /// Wait for every supervisor and accept loop to finish
    pub async fn join(&self) {
        for supervisor in &self.supervisors {
            supervisor.join().await;
        }
        for listener in &self.listeners {
            listener.join().await;
            if let Some(supervisor) = listener.current() {
                supervisor.join().await;
            }
        }
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    pub fn set_mic_muted(&self, muted: bool) {
        self.capture.set_muted(muted);
    }

    pub fn is_mic_muted(&self) -> bool {
        self.capture.is_muted()
    }

    /// Zero the playback volume, or restore the level it had before
    pub fn set_speaker_muted(&self, muted: bool) {
        let mut speaker = self.speaker.lock();
        if muted == speaker.muted {
            return;
        }
        if muted {
            let level = self.volume.level();
            if level > 0.0 {
                speaker.saved_level = level;
            }
            self.volume.set_volume(0.0);
        } else {
            let level = if speaker.saved_level > 0.0 {
                speaker.saved_level
            } else {
                DEFAULT_VOLUME
            };
            self.volume.set_volume(level);
        }
        speaker.muted = muted;
        info!(muted, "Speaker state changed");
    }

    pub fn is_speaker_muted(&self) -> bool {
        self.speaker.lock().muted
    }

    /// Set the playback level for every peer; zero counts as muted
    pub fn set_volume(&self, level: f32) {
        let level = level.clamp(0.0, 1.0);
        let mut speaker = self.speaker.lock();
        self.volume.set_volume(level);
        speaker.muted = level == 0.0;
        if level > 0.0 {
            speaker.saved_level = level;
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume.level()
    }

    /// Mute microphone and speaker while something else owns the audio
    pub fn set_suspended(&self, suspended: bool) {
        self.set_mic_muted(suspended);
        self.set_speaker_muted(suspended);
    }

    /// Session peers with their live connection flags, sorted by name
    /// and then address
    pub fn peers(&self) -> Vec<PeerIdentity> {
        let mut peers: Vec<PeerIdentity> = self
            .peers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        peers.sort_by(|a, b| (&a.name, &a.address).cmp(&(&b.name, &b.address)));
        peers
    }

    /// Current state of every link, listener links included once accepted
    pub fn link_states(&self) -> Vec<(String, SupervisorState)> {
        let mut states: Vec<(String, SupervisorState)> = self
            .supervisors
            .iter()
            .map(|s| (s.peer().name.clone(), s.state()))
            .collect();
        states.extend(
            self.listeners
                .iter()
                .filter_map(|l| l.current())
                .map(|s| (s.peer().name.clone(), s.state())),
        );
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    pub fn capture(&self) -> &Arc<CapturePipeline> {
        &self.capture
    }
}

impl Drop for TalkSession {
    fn drop(&mut self) {
        self.end_session();
    }
}
