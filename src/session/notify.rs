//! Notification sink for connection status changes

use crate::peer::PeerIdentity;

/// Receives per-peer link transitions and user-facing messages
pub trait Notifier: Send + Sync {
    fn connected(&self, peer: &PeerIdentity);

    fn disconnected(&self, peer: &PeerIdentity);

    fn show_message(&self, text: &str);
}

/// Notifier that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn connected(&self, peer: &PeerIdentity) {
        tracing::info!(peer = %peer.name, "Connected");
    }

    fn disconnected(&self, peer: &PeerIdentity) {
        tracing::info!(peer = %peer.name, "Disconnected");
    }

    fn show_message(&self, text: &str) {
        tracing::warn!("{}", text);
    }
}
