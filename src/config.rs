//! Application configuration
//!
//! Loaded from a TOML file; every field has a default so a partial file (or
//! none at all) yields a working configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::Error;
use crate::peer::{LocalIdentity, PeerIdentity};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub identity: IdentityConfig,
    pub peers: Vec<PeerConfig>,
    pub session: SessionConfig,
    pub audio: AudioConfig,
    pub codec: CodecConfig,
    pub network: NetworkConfig,
}

/// Local device identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub name: String,
    /// Secondary identifier used to break ties between equal names
    pub address: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            address: "127.0.0.1".to_string(),
        }
    }
}

/// A remote group member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub paired: bool,
    #[serde(default = "default_true")]
    pub picked: bool,
}

fn default_true() -> bool {
    true
}

/// Connection engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub reconnect_interval_ms: u64,
    /// Socket reads between two lag-cuts
    pub lag_cut_period: u32,
    pub lag_cut_skip_limit: usize,
    pub read_chunk_size: usize,
    pub outbound_queue_depth: usize,
    pub max_group_members: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: RECONNECT_INTERVAL_MS,
            lag_cut_period: LAG_CUT_PERIOD,
            lag_cut_skip_limit: LAG_CUT_SKIP_LIMIT,
            read_chunk_size: READ_CHUNK_SIZE,
            outbound_queue_depth: OUTBOUND_QUEUE_DEPTH,
            max_group_members: MAX_GROUP_MEMBERS,
        }
    }
}

impl SessionConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

/// Capture and playback buffer sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Narrowband only; any other rate is rejected by `validate`
    pub sample_rate: u32,
    /// Samples per capture read
    pub capture_buffer_len: usize,
    /// Send-side framing ring size in bytes
    pub send_buffer_len: usize,
    /// Receive-side framing ring size, in multiples of the frame sample count
    pub receive_frames: usize,
    pub initial_volume: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            capture_buffer_len: CAPTURE_BUFFER_LEN,
            send_buffer_len: 4 * CAPTURE_BUFFER_LEN,
            receive_frames: 2,
            initial_volume: DEFAULT_VOLUME,
        }
    }
}

/// Voice codec settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub bitrate: u32,
    pub vbr: bool,
    pub fec: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            bitrate: 12_000,
            vbr: false,
            fec: false,
        }
    }
}

/// TCP transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: String,
    pub base_port: u16,
    pub port_span: u16,
    pub connect_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            base_port: DEFAULT_BASE_PORT,
            port_span: DEFAULT_PORT_SPAN,
            connect_timeout_ms: 5000,
        }
    }
}

impl AppConfig {
    /// Default config file location for this user
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "group-intercom", "intercom")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Parse a configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self, Error> {
        let config: AppConfig = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.identity.name.trim().is_empty() {
            return Err(Error::Config("identity.name must not be empty".into()));
        }
        if self.audio.sample_rate != SAMPLE_RATE {
            return Err(Error::Config(format!(
                "audio.sample_rate {} is not supported, only {} Hz",
                self.audio.sample_rate, SAMPLE_RATE
            )));
        }
        if self.audio.capture_buffer_len == 0
            || self.audio.send_buffer_len == 0
            || self.audio.receive_frames == 0
        {
            return Err(Error::Config("audio buffer sizes must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&self.audio.initial_volume) {
            return Err(Error::Config(format!(
                "audio.initial_volume out of range: {}",
                self.audio.initial_volume
            )));
        }
        if self.session.read_chunk_size == 0
            || self.session.lag_cut_period == 0
            || self.session.outbound_queue_depth == 0
        {
            return Err(Error::Config("session sizes must be non-zero".into()));
        }
        if self.network.port_span == 0 {
            return Err(Error::Config("network.port_span must be non-zero".into()));
        }
        Ok(())
    }

    pub fn local_identity(&self) -> LocalIdentity {
        LocalIdentity::new(&self.identity.name, &self.identity.address)
    }

    pub fn peer_identities(&self) -> Vec<PeerIdentity> {
        self.peers
            .iter()
            .map(|p| {
                let mut peer = PeerIdentity::new(&p.name, &p.address, p.paired);
                peer.picked = p.picked;
                peer
            })
            .collect()
    }
}
