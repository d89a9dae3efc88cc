//! Per-peer connection supervisor
//!
//! One supervisor task owns the lifecycle of the link to one remote peer:
//! obtain a socket, wire it to a fresh playback pipeline and the shared
//! capture fan-out, then sleep until the channel fails or the session stops
//! it. A connector retries unreachable peers forever; a listener-side
//! supervisor handles exactly one accepted socket.
//!
//! ```text
//! Idle ─▶ Connecting ─▶ Connected ─▶ Error ─▶ Connecting (connector)
//!              │             │          └───▶ Terminated (listener)
//!              └─────────────┴──▶ Stopped
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audio::capture::{CapturePipeline, FanoutTarget};
use crate::audio::device::AudioBackend;
use crate::audio::playback::{PlaybackPipeline, VolumeRegistry};
use crate::codec::CodecFactory;
use crate::config::AppConfig;
use crate::error::Error;
use crate::network::channel::{ChannelObserver, ChannelSettings, SocketChannel};
use crate::network::transport::{PeerStream, Transport};
use crate::peer::{ChannelId, ChannelRole, PeerIdentity};
use crate::session::notify::Notifier;

/// Where a supervisor gets its socket from
pub enum LinkRole {
    /// Dial the peer, again after every failure
    Connector(Arc<dyn Transport>),
    /// One socket already accepted by a listener service
    Listener(PeerStream),
}

impl LinkRole {
    pub fn role(&self) -> ChannelRole {
        match self {
            LinkRole::Connector(_) => ChannelRole::Connector,
            LinkRole::Listener(_) => ChannelRole::Listener,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Connecting,
    Connected,
    Error,
    Stopped,
    Terminated,
}

impl SupervisorState {
    pub fn is_final(self) -> bool {
        matches!(self, SupervisorState::Stopped | SupervisorState::Terminated)
    }
}

/// Collaborators shared by every supervisor of a session
#[derive(Clone)]
pub struct LinkContext {
    pub capture: Arc<CapturePipeline>,
    pub backend: Arc<dyn AudioBackend>,
    pub codecs: Arc<dyn CodecFactory>,
    pub volume: Arc<VolumeRegistry>,
    pub notifier: Arc<dyn Notifier>,
    pub channel: ChannelSettings,
    pub reconnect_interval: Duration,
    pub receive_frames: usize,
}

impl LinkContext {
    pub fn new(
        config: &AppConfig,
        capture: Arc<CapturePipeline>,
        backend: Arc<dyn AudioBackend>,
        codecs: Arc<dyn CodecFactory>,
        volume: Arc<VolumeRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            capture,
            backend,
            codecs,
            volume,
            notifier,
            channel: ChannelSettings::from(&config.session),
            reconnect_interval: config.session.reconnect_interval(),
            receive_frames: config.audio.receive_frames,
        }
    }
}

#[derive(Default)]
struct Counters {
    attempts: AtomicU64,
    retry_sleeps: AtomicU64,
}

/// Handle to a running supervisor task
pub struct ConnectionSupervisor {
    peer: PeerIdentity,
    role: ChannelRole,
    stop: CancellationToken,
    state: watch::Receiver<SupervisorState>,
    counters: Arc<Counters>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSupervisor {
    /// Spawn the supervisor loop for `peer`
    pub fn spawn(
        context: LinkContext,
        peer: PeerIdentity,
        channel_id: ChannelId,
        role: LinkRole,
    ) -> Arc<Self> {
        let stop = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(SupervisorState::Idle);
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let channel_role = role.role();

        let source = match role {
            LinkRole::Connector(transport) => Source::Connector(transport),
            LinkRole::Listener(stream) => Source::Listener(Some(stream)),
        };

        let runner = Runner {
            context,
            peer: peer.clone(),
            channel_id,
            source,
            stop: stop.clone(),
            state: state_tx,
            error_tx,
            error_rx,
            counters: counters.clone(),
            generation: 0,
        };
        let task = tokio::spawn(runner.run());

        Arc::new(Self {
            peer,
            role: channel_role,
            stop,
            state: state_rx,
            counters,
            task: Mutex::new(Some(task)),
        })
    }

    /// Tear the link down and end the loop. Idempotent.
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            debug!(peer = %self.peer.name, "Stopping supervisor");
            self.stop.cancel();
        }
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions
    pub fn watch_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.clone()
    }

    /// Wait until the state satisfies `pred`, returning it
    pub async fn wait_for(&self, pred: impl FnMut(&SupervisorState) -> bool) -> SupervisorState {
        let mut rx = self.state.clone();
        let result = rx.wait_for(pred).await.map(|state| *state);
        result.unwrap_or_else(|_| *rx.borrow())
    }

    /// Wait for the loop to finish
    pub async fn join(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    pub fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    pub fn role(&self) -> ChannelRole {
        self.role
    }

    pub fn connection_attempts(&self) -> u64 {
        self.counters.attempts.load(Ordering::Relaxed)
    }

    pub fn retry_sleeps(&self) -> u64 {
        self.counters.retry_sleeps.load(Ordering::Relaxed)
    }
}

enum Source {
    Connector(Arc<dyn Transport>),
    Listener(Option<PeerStream>),
}

enum Obtained {
    Socket(PeerStream),
    Stopped,
    Terminated,
}

/// Wakes the supervisor when the channel of one connection fails
struct ErrorSignal {
    generation: u64,
    errors: mpsc::UnboundedSender<u64>,
}

impl ChannelObserver for ErrorSignal {
    fn on_channel_error(&self) {
        let _ = self.errors.send(self.generation);
    }
}

/// Everything one live connection consists of
struct Link {
    channel: Arc<SocketChannel>,
    target: Arc<dyn FanoutTarget>,
    playback: Arc<PlaybackPipeline>,
}

struct Runner {
    context: LinkContext,
    peer: PeerIdentity,
    channel_id: ChannelId,
    source: Source,
    stop: CancellationToken,
    state: watch::Sender<SupervisorState>,
    error_tx: mpsc::UnboundedSender<u64>,
    error_rx: mpsc::UnboundedReceiver<u64>,
    counters: Arc<Counters>,
    generation: u64,
}

impl Runner {
    fn set_state(&self, state: SupervisorState) {
        self.state.send_replace(state);
    }

    fn retries(&self) -> bool {
        matches!(self.source, Source::Connector(_))
    }

    async fn run(mut self) {
        let final_state = loop {
            if self.stop.is_cancelled() {
                break SupervisorState::Stopped;
            }

            let stream = match self.obtain_socket().await {
                Obtained::Socket(stream) => stream,
                Obtained::Stopped => break SupervisorState::Stopped,
                Obtained::Terminated => break SupervisorState::Terminated,
            };

            self.generation += 1;
            let link = match self.open_link(stream).await {
                Ok(link) => link,
                Err(e) => {
                    error!(peer = %self.peer.name, "Failed to set up audio for link: {}", e);
                    self.context
                        .notifier
                        .show_message(&format!("Cannot play audio from {}: {}", self.peer.name, e));
                    break SupervisorState::Terminated;
                }
            };
            info!(peer = %self.peer.name, channel_id = %self.channel_id, "Link established");
            self.context.notifier.connected(&self.peer);
            self.set_state(SupervisorState::Connected);

            let stopped = self.wait_for_failure().await;
            self.close_link(link).await;

            if stopped {
                break SupervisorState::Stopped;
            }
            self.set_state(SupervisorState::Error);
            self.context.notifier.disconnected(&self.peer);
            if !self.retries() {
                break SupervisorState::Terminated;
            }
        };

        debug!(peer = %self.peer.name, state = ?final_state, "Supervisor finished");
        self.set_state(final_state);
    }

    /// Dial until the peer answers, the session stops, or a fatal error
    async fn obtain_socket(&mut self) -> Obtained {
        let transport = match &mut self.source {
            Source::Listener(slot) => {
                return match slot.take() {
                    Some(stream) => Obtained::Socket(stream),
                    None => Obtained::Terminated,
                };
            }
            Source::Connector(transport) => transport.clone(),
        };

        loop {
            self.set_state(SupervisorState::Connecting);
            self.counters.attempts.fetch_add(1, Ordering::Relaxed);

            let result = tokio::select! {
                _ = self.stop.cancelled() => return Obtained::Stopped,
                result = transport.connect(self.channel_id, &self.peer) => result,
            };

            match result {
                Ok(stream) => return Obtained::Socket(stream),
                Err(e) if e.is_unreachable() => {
                    debug!(peer = %self.peer.name, "Peer unreachable, retrying: {}", e);
                    self.counters.retry_sleeps.fetch_add(1, Ordering::Relaxed);
                    tokio::select! {
                        _ = self.stop.cancelled() => return Obtained::Stopped,
                        _ = tokio::time::sleep(self.context.reconnect_interval) => {}
                    }
                }
                Err(e) => {
                    error!(peer = %self.peer.name, "Connect failed: {}", e);
                    self.context
                        .notifier
                        .show_message(&format!("Cannot connect to {}: {}", self.peer.name, e));
                    return Obtained::Terminated;
                }
            }
        }
    }

    async fn open_link(&mut self, stream: PeerStream) -> Result<Link, Error> {
        let device = self.context.backend.open_render()?;
        let decoder = self.context.codecs.new_decoder()?;
        let playback = PlaybackPipeline::start(
            device,
            decoder,
            self.context.volume.clone(),
            self.context.receive_frames,
        )?;

        let observer = Arc::new(ErrorSignal {
            generation: self.generation,
            errors: self.error_tx.clone(),
        });
        let channel = SocketChannel::start(
            &self.peer.name,
            stream,
            playback.clone(),
            observer,
            &self.context.channel,
        );

        let target: Arc<dyn FanoutTarget> = channel.clone();
        let capture = self.context.capture.clone();
        let registered = target.clone();
        // Registering may start the microphone, which blocks
        if let Err(e) =
            tokio::task::spawn_blocking(move || capture.register_fanout_target(registered)).await
        {
            warn!(peer = %self.peer.name, "Capture registration did not finish: {}", e);
        }

        Ok(Link {
            channel,
            target,
            playback,
        })
    }

    /// Block until the current channel fails (false) or stop (true)
    async fn wait_for_failure(&mut self) -> bool {
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => return true,
                generation = self.error_rx.recv() => match generation {
                    Some(generation) if generation == self.generation => return false,
                    Some(stale) => {
                        debug!(peer = %self.peer.name, stale, "Ignoring stale channel error");
                    }
                    None => return true,
                },
            }
        }
    }

    async fn close_link(&mut self, link: Link) {
        let capture = self.context.capture.clone();
        let target = link.target.clone();
        if let Err(e) =
            tokio::task::spawn_blocking(move || capture.unregister_fanout_target(&target)).await
        {
            warn!(peer = %self.peer.name, "Capture unregistration did not finish: {}", e);
        }
        link.playback.shutdown();
        link.channel.cancel();
    }
}
