//! Peer identities and per-pair channel identifiers

use std::fmt;
use uuid::Uuid;

/// This device, as seen by the rest of the group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub name: String,
    /// Fixed secondary identifier (link address), only used for tie-breaks
    pub address: String,
}

impl LocalIdentity {
    pub fn new(name: &str, address: &str) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
        }
    }
}

/// A remote participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    pub name: String,
    pub address: String,
    /// Previously bonded rather than newly discovered
    pub paired: bool,
    /// Picked for this session
    pub picked: bool,
    /// Live link status, driven by supervisor notifications
    pub connected: bool,
}

impl PeerIdentity {
    pub fn new(name: &str, address: &str, paired: bool) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            paired,
            picked: true,
            connected: false,
        }
    }

    pub fn status(&self) -> &'static str {
        if self.paired {
            "Paired"
        } else {
            "Unpaired"
        }
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}    {}", self.name, self.status())
    }
}

/// Which side of a pair opens the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelRole {
    Connector,
    Listener,
}

impl ChannelRole {
    pub fn opposite(self) -> Self {
        match self {
            ChannelRole::Connector => ChannelRole::Listener,
            ChannelRole::Listener => ChannelRole::Connector,
        }
    }
}

/// Rendezvous identifier shared by both ends of a pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(Uuid);

impl ChannelId {
    /// Derive the id for the ordered pair (connector, listener).
    ///
    /// MD5 of the concatenated names, XOR-folded onto 16 bytes, then turned
    /// into a name-based (version 3) UUID.
    pub fn derive(connector_name: &str, listener_name: &str) -> Self {
        let concatenated = format!("{connector_name}{listener_name}");
        let digest = md5::compute(concatenated.as_bytes());

        let mut folded = [0u8; 16];
        for block in digest.0.chunks(16) {
            for (acc, byte) in folded.iter_mut().zip(block) {
                *acc ^= byte;
            }
        }

        let name_hash = md5::compute(folded);
        Self(uuid::Builder::from_md5_bytes(name_hash.0).into_uuid())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl From<Uuid> for ChannelId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
