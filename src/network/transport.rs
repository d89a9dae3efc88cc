//! Transport capability: obtain byte-stream sockets for a channel id

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{ConnectError, NetworkError};
use crate::peer::{ChannelId, PeerIdentity};

/// A reliable, ordered, bidirectional byte stream
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// An established connection to one peer
pub type PeerStream = Box<dyn ByteStream>;

/// Socket factory shared by every supervisor and listener of a session
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether this device can open connections at all
    fn is_available(&self) -> bool {
        true
    }

    /// Open a connection to `peer` on the rendezvous point for `channel_id`.
    ///
    /// A peer that is out of reach or refuses must yield
    /// [`ConnectError::Unreachable`] so the caller retries.
    async fn connect(
        &self,
        channel_id: ChannelId,
        peer: &PeerIdentity,
    ) -> Result<PeerStream, ConnectError>;

    /// Start accepting connections for `channel_id`
    async fn listen(&self, channel_id: ChannelId) -> Result<Box<dyn Acceptor>, NetworkError>;
}

/// Server side of a rendezvous point. Dropping it closes the point.
#[async_trait]
pub trait Acceptor: Send {
    async fn accept(&mut self) -> Result<PeerStream, NetworkError>;
}
