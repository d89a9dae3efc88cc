//! Network subsystem: socket factories and per-connection byte channels

pub mod channel;
pub mod memory;
pub mod tcp;
pub mod transport;

pub use channel::{ChannelObserver, ChannelSettings, ChannelStats, ReceiveSink, SocketChannel};
pub use memory::MemoryTransport;
pub use tcp::TcpTransport;
pub use transport::{Acceptor, ByteStream, PeerStream, Transport};
