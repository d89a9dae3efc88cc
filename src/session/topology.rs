//! Connect/listen role assignment for every peer pair
//!
//! Both ends of a pair run the same comparison on the same two names and
//! reach complementary answers, so no handshake is needed: the side whose
//! name sorts later connects, the other listens. The rendezvous
//! [`ChannelId`] is derived from (connector, listener) in that order.

use std::cmp::Ordering;

use crate::peer::{ChannelId, ChannelRole, LocalIdentity, PeerIdentity};

/// Role and rendezvous id for one remote peer
#[derive(Debug, Clone)]
pub struct PeerPlan {
    pub peer: PeerIdentity,
    pub role: ChannelRole,
    pub channel_id: ChannelId,
}

/// Role the local device plays towards `peer`.
///
/// Names are compared case-insensitively. Equal names fall back to the
/// secondary identifier with the same rule; if that is equal too, both
/// sides listen and no link forms.
pub fn assign_role(local: &LocalIdentity, peer: &PeerIdentity) -> ChannelRole {
    let local_name = local.name.to_lowercase();
    let peer_name = peer.name.to_lowercase();

    match peer_name.cmp(&local_name) {
        Ordering::Less => ChannelRole::Connector,
        Ordering::Greater => ChannelRole::Listener,
        Ordering::Equal => {
            if peer.address.as_str() < local.address.as_str() {
                ChannelRole::Connector
            } else {
                if peer.address == local.address {
                    tracing::warn!(
                        peer = %peer.name,
                        "Peer has the same name and address as this device, no link can form"
                    );
                }
                ChannelRole::Listener
            }
        }
    }
}

/// Channel id for the pair, given the local role
pub fn channel_id_for(local: &LocalIdentity, peer: &PeerIdentity, role: ChannelRole) -> ChannelId {
    match role {
        ChannelRole::Connector => ChannelId::derive(&local.name, &peer.name),
        ChannelRole::Listener => ChannelId::derive(&peer.name, &local.name),
    }
}

/// Plan every picked peer
pub fn plan(local: &LocalIdentity, peers: &[PeerIdentity]) -> Vec<PeerPlan> {
    peers
        .iter()
        .filter(|peer| peer.picked)
        .map(|peer| {
            let role = assign_role(local, peer);
            let channel_id = channel_id_for(local, peer, role);
            tracing::debug!(peer = %peer.name, ?role, %channel_id, "Planned link");
            PeerPlan {
                peer: peer.clone(),
                role,
                channel_id,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(local: (&str, &str), peer: (&str, &str)) -> (ChannelRole, ChannelId) {
        let local = LocalIdentity::new(local.0, local.1);
        let peer = PeerIdentity::new(peer.0, peer.1, true);
        let role = assign_role(&local, &peer);
        (role, channel_id_for(&local, &peer, role))
    }

    #[test]
    fn test_roles_are_complementary() {
        let names = ["alice", "bob", "carol", "Dave", "eve"];
        for a in names {
            for b in names {
                if a == b {
                    continue;
                }
                let (role_a, id_a) = view((a, "A"), (b, "B"));
                let (role_b, id_b) = view((b, "B"), (a, "A"));
                assert_eq!(role_a, role_b.opposite(), "{a} vs {b}");
                assert_eq!(id_a, id_b, "{a} vs {b}");
            }
        }
    }

    #[test]
    fn test_equal_names_break_on_address() {
        let (role_a, id_a) = view(("bob", "00:11"), ("bob", "00:22"));
        let (role_b, id_b) = view(("bob", "00:22"), ("bob", "00:11"));
        assert_eq!(role_a, ChannelRole::Listener);
        assert_eq!(role_b, ChannelRole::Connector);
        assert_eq!(id_a, id_b);

        // Reproducible
        assert_eq!(view(("bob", "00:11"), ("bob", "00:22")).0, role_a);
    }

    #[test]
    fn test_identical_devices_both_listen() {
        let (role, _) = view(("bob", "00:11"), ("bob", "00:11"));
        assert_eq!(role, ChannelRole::Listener);
    }

    #[test]
    fn test_case_insensitive() {
        let (role, _) = view(("bob", "B"), ("Alice", "A"));
        assert_eq!(role, ChannelRole::Connector);
        let (role, _) = view(("Bob", "B"), ("carol", "C"));
        assert_eq!(role, ChannelRole::Listener);
    }

    #[test]
    fn test_group_of_three() {
        let local = LocalIdentity::new("bob", "B");
        let peers = vec![
            PeerIdentity::new("alice", "A", true),
            PeerIdentity::new("carol", "C", true),
        ];
        let plans = plan(&local, &peers);

        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].peer.name, "alice");
        assert_eq!(plans[0].role, ChannelRole::Connector);
        assert_eq!(plans[0].channel_id, ChannelId::derive("bob", "alice"));
        assert_eq!(plans[1].peer.name, "carol");
        assert_eq!(plans[1].role, ChannelRole::Listener);
        assert_eq!(plans[1].channel_id, ChannelId::derive("carol", "bob"));
    }

    #[test]
    fn test_unpicked_peers_skipped() {
        let local = LocalIdentity::new("bob", "B");
        let mut carol = PeerIdentity::new("carol", "C", true);
        carol.picked = false;
        let plans = plan(&local, &[PeerIdentity::new("alice", "A", true), carol]);
        assert_eq!(plans.len(), 1);
    }
}
