//! Accept loop for peers that connect to us

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::network::transport::Transport;
use crate::peer::{ChannelId, PeerIdentity};
use crate::session::supervisor::{ConnectionSupervisor, LinkContext, LinkRole};

/// Waits for one remote peer to connect on its channel id, handing every
/// accepted socket to a fresh listener-role supervisor.
///
/// Only the latest supervisor is tracked. When a new connection arrives the
/// previous supervisor is stopped, so a stale link never keeps running next
/// to the new one.
pub struct ListenerService {
    peer: PeerIdentity,
    exit: CancellationToken,
    current: Arc<Mutex<Option<Arc<ConnectionSupervisor>>>>,
    accepted: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ListenerService {
    pub fn spawn(
        context: LinkContext,
        transport: Arc<dyn Transport>,
        peer: PeerIdentity,
        channel_id: ChannelId,
    ) -> Arc<Self> {
        let exit = CancellationToken::new();
        let current = Arc::new(Mutex::new(None));
        let accepted = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn(accept_loop(
            context,
            transport,
            peer.clone(),
            channel_id,
            exit.clone(),
            current.clone(),
            accepted.clone(),
        ));

        Arc::new(Self {
            peer,
            exit,
            current,
            accepted,
            task: Mutex::new(Some(task)),
        })
    }

    /// Stop the live supervisor and close the acceptor. Idempotent.
    pub fn exit(&self) {
        if !self.exit.is_cancelled() {
            debug!(peer = %self.peer.name, "Listener exiting");
        }
        self.exit.cancel();
        if let Some(supervisor) = self.current.lock().as_ref() {
            supervisor.stop();
        }
    }

    /// Supervisor of the most recently accepted connection; kept after
    /// `exit()` so callers can join it
    pub fn current(&self) -> Option<Arc<ConnectionSupervisor>> {
        self.current.lock().clone()
    }

    pub fn accepted_count(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub async fn join(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

async fn accept_loop(
    context: LinkContext,
    transport: Arc<dyn Transport>,
    peer: PeerIdentity,
    channel_id: ChannelId,
    exit: CancellationToken,
    current: Arc<Mutex<Option<Arc<ConnectionSupervisor>>>>,
    accepted: Arc<AtomicU64>,
) {
    let retry_delay = context.reconnect_interval;

    while !exit.is_cancelled() {
        let listening = tokio::select! {
            _ = exit.cancelled() => break,
            result = transport.listen(channel_id) => result,
        };
        let mut acceptor = match listening {
            Ok(acceptor) => acceptor,
            Err(e) => {
                warn!(peer = %peer.name, "Cannot listen: {}", e);
                tokio::select! {
                    _ = exit.cancelled() => break,
                    _ = tokio::time::sleep(retry_delay) => continue,
                }
            }
        };

        let incoming = tokio::select! {
            _ = exit.cancelled() => break,
            result = acceptor.accept() => result,
        };
        // One connection per acceptor
        drop(acceptor);

        let stream = match incoming {
            Ok(stream) => stream,
            Err(e) => {
                debug!(peer = %peer.name, "Accept failed: {}", e);
                tokio::select! {
                    _ = exit.cancelled() => break,
                    _ = tokio::time::sleep(retry_delay) => continue,
                }
            }
        };

        accepted.fetch_add(1, Ordering::Relaxed);
        info!(peer = %peer.name, "Accepted connection");
        let supervisor = ConnectionSupervisor::spawn(
            context.clone(),
            peer.clone(),
            channel_id,
            LinkRole::Listener(stream),
        );

        let previous = current.lock().replace(supervisor.clone());
        if let Some(previous) = previous {
            debug!(peer = %peer.name, "Replacing previous listener link");
            previous.stop();
        }
        if exit.is_cancelled() {
            supervisor.stop();
        }
    }

    debug!(peer = %peer.name, "Accept loop finished");
}
