mod common;

use std::sync::Arc;

use common::*;
use group_intercom::network::{MemoryTransport, Transport};
use group_intercom::peer::{ChannelId, PeerIdentity};
use group_intercom::session::{ListenerService, SupervisorState};

fn bob() -> PeerIdentity {
    PeerIdentity::new("bob", "addr-bob", true)
}

fn channel() -> ChannelId {
    ChannelId::derive("bob", "alice")
}

fn connected(listener: &ListenerService) -> bool {
    listener
        .current()
        .is_some_and(|s| s.state() == SupervisorState::Connected)
}

#[tokio::test]
async fn listener_accepts_again_after_link_failure() {
    let config = test_config("alice");
    let notifier = Arc::new(RecordingNotifier::default());
    let (context, capture) = link_context(&config, FakeBackend::new(11), notifier.clone());
    let hub = MemoryTransport::new();

    let listener = ListenerService::spawn(context, Arc::new(hub.clone()), bob(), channel());
    assert!(eventually(|| hub.is_listening(channel())).await);

    let first = hub.connect(channel(), &bob()).await.unwrap();
    assert!(eventually(|| connected(&listener)).await);
    let first_link = listener.current().unwrap();

    drop(first);
    first_link.join().await;
    assert_eq!(first_link.state(), SupervisorState::Terminated);
    assert_eq!(notifier.disconnected_count(), 1);

    assert!(eventually(|| hub.is_listening(channel())).await);
    let _second = hub.connect(channel(), &bob()).await.unwrap();
    assert!(eventually(|| listener.accepted_count() == 2 && connected(&listener)).await);
    assert_eq!(capture.target_count(), 1);
    assert_eq!(notifier.connected_count(), 2);

    listener.exit();
    listener.join().await;
    let last_link = listener.current().unwrap();
    last_link.join().await;
    assert_eq!(last_link.state(), SupervisorState::Stopped);
    assert_eq!(capture.target_count(), 0);
    assert!(!hub.is_listening(channel()));
}

#[tokio::test]
async fn new_connection_replaces_the_previous_link() {
    let config = test_config("alice");
    let notifier = Arc::new(RecordingNotifier::default());
    let (context, capture) = link_context(&config, FakeBackend::new(11), notifier.clone());
    let hub = MemoryTransport::new();

    let listener = ListenerService::spawn(context, Arc::new(hub.clone()), bob(), channel());
    assert!(eventually(|| hub.is_listening(channel())).await);
    let _first = hub.connect(channel(), &bob()).await.unwrap();
    assert!(eventually(|| connected(&listener)).await);
    let first_link = listener.current().unwrap();

    // The first link is still healthy when the second one arrives
    assert!(eventually(|| hub.is_listening(channel())).await);
    let _second = hub.connect(channel(), &bob()).await.unwrap();
    assert!(eventually(|| listener.accepted_count() == 2).await);

    first_link.join().await;
    assert_eq!(first_link.state(), SupervisorState::Stopped);
    assert!(eventually(|| connected(&listener)).await);
    assert!(!Arc::ptr_eq(&first_link, &listener.current().unwrap()));
    assert_eq!(capture.target_count(), 1);
    assert_eq!(notifier.disconnected_count(), 0);

    listener.exit();
    listener.join().await;
}

#[tokio::test]
async fn exit_unblocks_a_pending_accept() {
    let config = test_config("alice");
    let notifier = Arc::new(RecordingNotifier::default());
    let (context, _capture) = link_context(&config, FakeBackend::new(11), notifier.clone());
    let hub = MemoryTransport::new();

    let listener = ListenerService::spawn(context, Arc::new(hub.clone()), bob(), channel());
    assert!(eventually(|| hub.is_listening(channel())).await);

    listener.exit();
    listener.exit();
    listener.join().await;

    assert!(listener.current().is_none());
    assert_eq!(listener.accepted_count(), 0);
    assert!(!hub.is_listening(channel()));
    assert!(notifier.events.lock().is_empty());
}
