//! In-process transport over `tokio::io::duplex` pipes
//!
//! Every [`MemoryTransport`] cloned from the same hub shares one rendezvous
//! table, so several simulated devices can run in a single process.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use crate::error::{ConnectError, NetworkError};
use crate::network::transport::{Acceptor, PeerStream, Transport};
use crate::peer::{ChannelId, PeerIdentity};

const PIPE_CAPACITY: usize = 64 * 1024;

type Rendezvous = Arc<Mutex<HashMap<ChannelId, mpsc::UnboundedSender<DuplexStream>>>>;

#[derive(Clone)]
pub struct MemoryTransport {
    listeners: Rendezvous,
    available: Arc<AtomicBool>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(HashMap::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate a device without a usable transport
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_listening(&self, channel_id: ChannelId) -> bool {
        self.listeners.lock().contains_key(&channel_id)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn connect(
        &self,
        channel_id: ChannelId,
        peer: &PeerIdentity,
    ) -> Result<PeerStream, ConnectError> {
        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        let delivered = match self.listeners.lock().get(&channel_id) {
            Some(listener) => listener.send(remote).is_ok(),
            None => false,
        };
        if !delivered {
            return Err(ConnectError::Unreachable(format!(
                "{} is not listening on {}",
                peer.name, channel_id
            )));
        }
        Ok(Box::new(local))
    }

    async fn listen(&self, channel_id: ChannelId) -> Result<Box<dyn Acceptor>, NetworkError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().insert(channel_id, tx.clone());
        Ok(Box::new(MemoryAcceptor {
            channel_id,
            own: tx,
            incoming: rx,
            listeners: self.listeners.clone(),
        }))
    }
}

struct MemoryAcceptor {
    channel_id: ChannelId,
    own: mpsc::UnboundedSender<DuplexStream>,
    incoming: mpsc::UnboundedReceiver<DuplexStream>,
    listeners: Rendezvous,
}

#[async_trait]
impl Acceptor for MemoryAcceptor {
    async fn accept(&mut self) -> Result<PeerStream, NetworkError> {
        match self.incoming.recv().await {
            Some(stream) => Ok(Box::new(stream)),
            None => Err(NetworkError::Closed),
        }
    }
}

impl Drop for MemoryAcceptor {
    fn drop(&mut self) {
        let mut listeners = self.listeners.lock();
        // A newer acceptor may already own the slot
        if listeners
            .get(&self.channel_id)
            .is_some_and(|current| current.same_channel(&self.own))
        {
            listeners.remove(&self.channel_id);
        }
    }
}
