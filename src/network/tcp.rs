//! TCP transport
//!
//! Each channel id maps to one rendezvous port on the listening device, the
//! way a service record selects a channel on a radio link. The listener binds
//! `base_port + (first two id bytes % port_span)`, the connector dials the
//! same port on the peer's address.

use async_trait::async_trait;
use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use crate::config::NetworkConfig;
use crate::error::{ConnectError, NetworkError};
use crate::network::transport::{Acceptor, PeerStream, Transport};
use crate::peer::{ChannelId, PeerIdentity};

const KEEPALIVE_IDLE: Duration = Duration::from_secs(10);

/// Rendezvous over plain TCP on the local network
#[derive(Debug, Clone)]
pub struct TcpTransport {
    config: NetworkConfig,
}

impl TcpTransport {
    pub fn new(config: NetworkConfig) -> Self {
        Self { config }
    }

    /// Port both ends use for `channel_id`
    pub fn port_for(&self, channel_id: ChannelId) -> u16 {
        let bytes = channel_id.as_bytes();
        let slot = u16::from_be_bytes([bytes[0], bytes[1]]) % self.config.port_span.max(1);
        self.config.base_port.saturating_add(slot)
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.config.connect_timeout_ms)
    }
}

/// Keep-alive and no-delay on an established stream
fn configure_stream(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    let socket = SockRef::from(stream);
    socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_IDLE))?;
    Ok(())
}

/// Bind a listening socket with address reuse so a fresh listener can take
/// the port right after the previous one closed
fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(16)?;
    TcpListener::from_std(socket.into())
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(
        &self,
        channel_id: ChannelId,
        peer: &PeerIdentity,
    ) -> Result<PeerStream, ConnectError> {
        let target = format!("{}:{}", peer.address, self.port_for(channel_id));
        debug!(peer = %peer.name, %channel_id, target = %target, "Connecting");

        let connecting = TcpStream::connect(&target);
        let stream = match tokio::time::timeout(self.connect_timeout(), connecting).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ConnectError::Unreachable(format!(
                    "connect to {target} timed out"
                )))
            }
        };
        configure_stream(&stream)?;
        Ok(Box::new(stream))
    }

    async fn listen(&self, channel_id: ChannelId) -> Result<Box<dyn Acceptor>, NetworkError> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.port_for(channel_id))
            .parse()
            .map_err(|e| NetworkError::BindFailed(format!("{}: {}", self.config.bind_address, e)))?;
        let listener =
            bind_listener(addr).map_err(|e| NetworkError::BindFailed(format!("{addr}: {e}")))?;
        debug!(%channel_id, %addr, "Listening");
        Ok(Box::new(TcpAcceptor { listener }))
    }
}

struct TcpAcceptor {
    listener: TcpListener,
}

#[async_trait]
impl Acceptor for TcpAcceptor {
    async fn accept(&mut self) -> Result<PeerStream, NetworkError> {
        let (stream, remote) = self
            .listener
            .accept()
            .await
            .map_err(|e| NetworkError::AcceptFailed(e.to_string()))?;
        configure_stream(&stream).map_err(|e| NetworkError::AcceptFailed(e.to_string()))?;
        debug!(%remote, "Accepted connection");
        Ok(Box::new(stream))
    }
}
