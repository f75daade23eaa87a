//! Tests for chat module

use super::*;
use crate::network::fake::FakeNetwork;
use crate::network::{PeerNetwork, PublishOutcome};
use libp2p::PeerId;
use std::sync::Arc;

fn bridge_with(network: Arc<FakeNetwork>) -> TopicBridge {
    TopicBridge::new(network, display_name_for_port(3001), MessageStore::with_welcome(WELCOME_MESSAGE))
}

#[test]
fn test_display_name_uses_port() {
    assert_eq!(display_name_for_port(3002), "GuestUser-3002");
    assert_eq!(format_message("GuestUser-3002", "hello"), "GuestUser-3002: hello");
}

#[test]
fn test_bridge_display_name_prefixes_lines() {
    let bridge = bridge_with(Arc::new(FakeNetwork::new()));
    assert_eq!(bridge.display_name(), "GuestUser-3001");
}

#[tokio::test]
async fn test_submit_appends_then_publishes() {
    let network = Arc::new(FakeNetwork::new());
    let bridge = bridge_with(network.clone());

    let submission = bridge.submit("hello mesh").await.unwrap();

    assert_eq!(submission.formatted, "GuestUser-3001: hello mesh");
    assert_eq!(submission.outcome, PublishOutcome::Published);
    assert_eq!(
        bridge.store().last().await.as_deref(),
        Some("GuestUser-3001: hello mesh")
    );
    assert_eq!(network.published(), vec![b"GuestUser-3001: hello mesh".to_vec()]);
}

#[tokio::test]
async fn test_submit_rejects_blank_text() {
    let network = Arc::new(FakeNetwork::new());
    let bridge = bridge_with(network.clone());

    assert_eq!(bridge.submit("").await, Err(ChatError::EmptyMessage));
    assert_eq!(bridge.submit("   ").await, Err(ChatError::EmptyMessage));
    assert_eq!(bridge.submit("\n\t").await, Err(ChatError::EmptyMessage));

    assert_eq!(bridge.store().snapshot().await, vec![WELCOME_MESSAGE]);
    assert!(network.published().is_empty());
}

#[tokio::test]
async fn test_submit_keeps_message_when_publish_fails() {
    let network = Arc::new(FakeNetwork::new());
    network.set_publish_outcome(PublishOutcome::Failed("duplicate".into()));
    let bridge = bridge_with(network.clone());

    let submission = bridge.submit("still here").await.unwrap();

    assert_eq!(submission.outcome, PublishOutcome::Failed("duplicate".into()));
    assert_eq!(bridge.store().len().await, 2);
}

#[tokio::test]
async fn test_submit_without_subscribers_is_not_an_error() {
    let network = Arc::new(FakeNetwork::new());
    network.set_publish_outcome(PublishOutcome::NoSubscribers);
    let bridge = bridge_with(network);

    let submission = bridge.submit("anyone?").await.unwrap();

    assert_eq!(submission.outcome, PublishOutcome::NoSubscribers);
    assert_eq!(bridge.store().last().await.as_deref(), Some("GuestUser-3001: anyone?"));
}

#[tokio::test]
async fn test_inbound_from_local_origin_is_dropped() {
    let network = Arc::new(FakeNetwork::new());
    let local = network.local_peer_id();
    let bridge = bridge_with(network);

    let appended = bridge
        .on_inbound(Some(local), PeerId::random(), b"GuestUser-3001: echo")
        .await;

    assert!(!appended);
    assert_eq!(bridge.store().snapshot().await, vec![WELCOME_MESSAGE]);
}

#[tokio::test]
async fn test_inbound_from_remote_origin_is_appended() {
    let network = Arc::new(FakeNetwork::new());
    let bridge = bridge_with(network);
    let remote = PeerId::random();

    let appended = bridge
        .on_inbound(Some(remote), remote, b"GuestUser-3002: hi there")
        .await;

    assert!(appended);
    assert_eq!(
        bridge.store().last().await.as_deref(),
        Some("GuestUser-3002: hi there")
    );
}

#[tokio::test]
async fn test_inbound_without_origin_uses_propagation_source() {
    let network = Arc::new(FakeNetwork::new());
    let local = network.local_peer_id();
    let bridge = bridge_with(network);

    assert!(!bridge.on_inbound(None, local, b"looped").await);
    assert!(bridge.on_inbound(None, PeerId::random(), b"relayed").await);

    assert_eq!(bridge.store().snapshot().await, vec![WELCOME_MESSAGE, "relayed"]);
}

#[tokio::test]
async fn test_inbound_invalid_utf8_is_decoded_lossily() {
    let network = Arc::new(FakeNetwork::new());
    let bridge = bridge_with(network);

    bridge
        .on_inbound(Some(PeerId::random()), PeerId::random(), &[b'h', b'i', 0xff])
        .await;

    assert_eq!(bridge.store().last().await.as_deref(), Some("hi\u{FFFD}"));
}
