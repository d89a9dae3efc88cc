mod common;

use std::sync::Arc;

use common::*;
use group_intercom::config::AppConfig;
use group_intercom::error::{Error, SessionError};
use group_intercom::network::MemoryTransport;
use group_intercom::peer::PeerIdentity;
use group_intercom::session::{Collaborators, SupervisorState, TalkSession};

struct Device {
    config: AppConfig,
    backend: Arc<FakeBackend>,
    notifier: Arc<RecordingNotifier>,
}

impl Device {
    fn new(name: &str, tone: i16) -> Self {
        Self {
            config: test_config(name),
            backend: FakeBackend::new(tone),
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    fn start(&self, transport: &MemoryTransport, peers: &[&str]) -> Result<TalkSession, Error> {
        let peers = peers
            .iter()
            .map(|name| PeerIdentity::new(name, &format!("addr-{name}"), true))
            .collect();
        TalkSession::start(
            &self.config,
            self.config.local_identity(),
            peers,
            Collaborators {
                transport: Arc::new(transport.clone()),
                backend: self.backend.clone(),
                codecs: Arc::new(ToneCodec),
                notifier: self.notifier.clone(),
            },
        )
    }
}

fn all_connected(session: &TalkSession) -> bool {
    session.peers().iter().all(|p| p.connected)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_devices_hear_each_other() {
    let hub = MemoryTransport::new();
    let alice = Device::new("alice", 11);
    let bob = Device::new("bob", 22);

    // bob dials before alice listens and has to retry
    let bob_session = bob.start(&hub, &["alice"]).unwrap();
    let alice_session = alice.start(&hub, &["bob"]).unwrap();

    assert!(eventually(|| all_connected(&alice_session) && all_connected(&bob_session)).await);
    assert!(eventually(|| alice.backend.heard(22) && bob.backend.heard(11)).await);

    assert_eq!(
        bob_session.link_states(),
        vec![("alice".to_string(), SupervisorState::Connected)]
    );

    bob_session.end_session();
    bob_session.join().await;
    assert!(eventually(|| !all_connected(&alice_session)).await);
    assert_eq!(alice.notifier.disconnected_count(), 1);
    assert_eq!(bob.notifier.disconnected_count(), 0);

    alice_session.end_session();
    alice_session.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn group_of_three_forms_every_link() {
    let hub = MemoryTransport::new();
    let alice = Device::new("alice", 11);
    let bob = Device::new("bob", 22);
    let carol = Device::new("carol", 33);

    let sessions = vec![
        alice.start(&hub, &["bob", "carol"]).unwrap(),
        bob.start(&hub, &["alice", "carol"]).unwrap(),
        carol.start(&hub, &["alice", "bob"]).unwrap(),
    ];

    assert!(eventually(|| sessions.iter().all(all_connected)).await);
    assert!(eventually(|| alice.backend.heard(22) && alice.backend.heard(33)).await);
    assert!(eventually(|| carol.backend.heard(11) && carol.backend.heard(22)).await);

    for session in &sessions {
        session.end_session();
    }
    for session in &sessions {
        session.join().await;
    }
}

#[tokio::test]
async fn missing_transport_is_reported() {
    let hub = MemoryTransport::new();
    hub.set_available(false);
    let bob = Device::new("bob", 22);

    let result = bob.start(&hub, &["alice"]);
    assert!(matches!(result, Err(Error::Session(SessionError::TransportUnavailable))));
    assert_eq!(bob.notifier.messages().len(), 1);
}

#[tokio::test]
async fn group_size_is_bounded() {
    let hub = MemoryTransport::new();
    let bob = Device::new("bob", 22);
    let names = ["a", "c", "d", "e", "f", "g", "h", "i"];

    let result = bob.start(&hub, &names);
    assert!(matches!(result, Err(Error::Session(SessionError::TooManyPeers(8, 7)))));

    let session = bob.start(&hub, &names[..7]).unwrap();
    assert_eq!(session.peers().len(), 7);
    session.end_session();
}

#[tokio::test]
async fn peers_sharing_a_name_stay_distinct() {
    let hub = MemoryTransport::new();
    let carol = Device::new("carol", 33);
    let peers = vec![
        PeerIdentity::new("bob", "addr-bob-1", true),
        PeerIdentity::new("bob", "addr-bob-2", true),
    ];
    let session = TalkSession::start(
        &carol.config,
        carol.config.local_identity(),
        peers,
        Collaborators {
            transport: Arc::new(hub.clone()),
            backend: carol.backend.clone(),
            codecs: Arc::new(ToneCodec),
            notifier: carol.notifier.clone(),
        },
    )
    .unwrap();

    let snapshot = session.peers();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].address, "addr-bob-1");
    assert_eq!(snapshot[1].address, "addr-bob-2");
    assert_eq!(session.link_states().len(), 2);

    session.end_session();
    session.join().await;
}

#[tokio::test]
async fn speaker_mute_restores_volume() {
    let hub = MemoryTransport::new();
    let bob = Device::new("bob", 22);
    let session = bob.start(&hub, &["alice"]).unwrap();

    session.set_volume(0.8);
    session.set_speaker_muted(true);
    assert_eq!(session.volume(), 0.0);
    assert!(session.is_speaker_muted());

    session.set_speaker_muted(false);
    assert_eq!(session.volume(), 0.8);

    session.set_volume(7.0);
    assert_eq!(session.volume(), 1.0);

    session.set_suspended(true);
    assert!(session.is_mic_muted());
    assert!(session.is_speaker_muted());
    session.set_suspended(false);
    assert!(!session.is_mic_muted());
    assert_eq!(session.volume(), 1.0);

    session.end_session();
    session.end_session();
    assert!(session.is_ended());
}
