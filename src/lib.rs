//! # Group Intercom
//!
//! Small-group peer-to-peer realtime voice over point-to-point stream sockets.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                               LOCAL DEVICE                               │
//! │                                                                          │
//! │  ┌────────────┐   ┌──────────────────────────────────────────────────┐   │
//! │  │ Microphone │──▶│ CapturePipeline (audio::capture) - one thread    │   │
//! │  └────────────┘   │  encode 160-sample windows, frame with 7F 7F     │   │
//! │                   └───────────────┬──────────────────────────────────┘   │
//! │                                   │ fan-out (same bytes to every peer)   │
//! │          ┌────────────────────────┼────────────────────────┐             │
//! │          ▼                        ▼                        ▼             │
//! │  ┌───────────────┐        ┌───────────────┐        ┌───────────────┐     │
//! │  │ SocketChannel │        │ SocketChannel │        │ SocketChannel │     │
//! │  └───────┬───────┘        └───────┬───────┘        └───────┬───────┘     │
//! │          │ owned by               │                        │             │
//! │  ┌───────┴───────┐        ┌───────┴───────┐        ┌───────┴───────┐     │
//! │  │ Supervisor    │        │ Supervisor    │        │ Supervisor    │     │
//! │  │ (Connector)   │        │ (Listener)    │        │ (Listener)    │     │
//! │  └───────┬───────┘        └───────┬───────┘        └───────┬───────┘     │
//! │          ▼                        ▼                        ▼             │
//! │  ┌───────────────┐        ┌───────────────┐        ┌───────────────┐     │
//! │  │ Playback      │        │ Playback      │        │ Playback      │     │
//! │  │ de-frame+decode        │ de-frame+decode        │ de-frame+decode     │
//! │  └───────────────┘        └───────────────┘        └───────────────┘     │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Roles are assigned by [`session::topology`]: for each pair of devices the
//! one whose name sorts later connects, the other listens, and both derive the
//! same [`peer::ChannelId`] to rendezvous on without any handshake.

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod peer;
pub mod session;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Voice sample rate (narrowband)
    pub const SAMPLE_RATE: u32 = 8000;

    /// Samples read from the capture device per loop iteration
    pub const CAPTURE_BUFFER_LEN: usize = 320;

    /// Decoded samples per codec frame (20 ms at 8 kHz)
    pub const FRAME_SAMPLES: usize = 160;

    /// Byte that, doubled, terminates every frame on the wire
    pub const SEPARATOR: u8 = 0x7F;

    /// Wire terminator following each encoded frame
    pub const FRAME_TERMINATOR: [u8; 2] = [SEPARATOR, SEPARATOR];

    /// Maximum number of remote members in one talk group
    pub const MAX_GROUP_MEMBERS: usize = 7;

    /// Delay between connection attempts to an unreachable peer
    pub const RECONNECT_INTERVAL_MS: u64 = 3000;

    /// Number of reads between two lag-cuts on a socket
    pub const LAG_CUT_PERIOD: u32 = 200;

    /// Upper bound of backlog bytes discarded by one lag-cut
    pub const LAG_CUT_SKIP_LIMIT: usize = 1_024_000;

    /// Pause after a failed microphone read before trying again
    pub const CAPTURE_RETRY_DELAY_MS: u64 = 20;

    /// Size of a single socket read
    pub const READ_CHUNK_SIZE: usize = 1024;

    /// Outbound chunks queued per socket before new ones are dropped
    pub const OUTBOUND_QUEUE_DEPTH: usize = 64;

    /// Playback volume applied before anyone sets one
    pub const DEFAULT_VOLUME: f32 = 0.5;

    /// Default first TCP rendezvous port
    pub const DEFAULT_BASE_PORT: u16 = 47_000;

    /// Number of ports channel ids are spread across
    pub const DEFAULT_PORT_SPAN: u16 = 2_000;
}
