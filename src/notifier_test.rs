use super::*;
use std::sync::Arc;

use crate::config::{ChannelConfig, parse_endpoint};
use crate::identity::identity_channel;
use crate::test_support::{MockConnector, RecordingRenderer, ServerEnd, accept_session};
use frames::{Command, Frame};
use tokio::time::{Duration, sleep};

fn user(raw: &str) -> UserId {
    UserId::new(raw).expect("valid user id")
}

fn channel() -> (NotificationChannel, Arc<MockConnector>, mpsc::UnboundedReceiver<ServerEnd>) {
    let config = ChannelConfig::new(parse_endpoint("ws://localhost:8080/ws").expect("endpoint"));
    let (connector, accepted) = MockConnector::new();
    let (renderer, _shown) = RecordingRenderer::new();
    (NotificationChannel::new(config, connector.clone(), renderer), connector, accepted)
}

async fn expect_disconnect(server: &mut ServerEnd) {
    let disconnect = server.expect_frame(Command::Disconnect).await;
    let receipt = disconnect.header("receipt").unwrap_or_default().to_owned();
    server.push(&Frame::new(Command::Receipt).with_header("receipt-id", receipt));
}

#[tokio::test(start_paused = true)]
async fn waits_for_identity_before_connecting() {
    let (channel, connector, mut accepted) = channel();
    let (publisher, watch) = identity_channel(None);
    let notifier = Notifier::spawn(channel, watch, None);

    sleep(Duration::from_secs(30)).await;
    assert!(connector.attempts().is_empty());

    publisher.publish(user("late"));
    let (_server, connect) = accept_session(&mut accepted).await;
    assert_eq!(connect.header("userId"), Some("late"));
    notifier.shutdown().await;
}

#[tokio::test]
async fn initial_identity_connects_immediately() {
    let (channel, _connector, mut accepted) = channel();
    let (_publisher, watch) = identity_channel(Some(user("u1")));
    let notifier = Notifier::spawn(channel, watch, None);

    let (mut server, connect) = accept_session(&mut accepted).await;
    assert_eq!(connect.header("userId"), Some("u1"));
    server.expect_frame(Command::Subscribe).await;
    server.expect_frame(Command::Send).await;

    notifier.shutdown().await;
    server.expect_frame(Command::Disconnect).await;
}

#[tokio::test]
async fn identity_change_reconnects_as_new_user() {
    let (channel, connector, mut accepted) = channel();
    let (publisher, watch) = identity_channel(Some(user("u1")));
    let _notifier = Notifier::spawn(channel, watch, None);

    let (mut first, _connect) = accept_session(&mut accepted).await;
    first.expect_frame(Command::Subscribe).await;
    first.expect_frame(Command::Send).await;

    assert!(!publisher.publish(user("u1")), "same identity is not a change");
    publisher.publish(user("u2"));

    let (mut second, connect) = accept_session(&mut accepted).await;
    assert_eq!(connect.header("userId"), Some("u2"));
    let subscribe = second.expect_frame(Command::Subscribe).await;
    assert_eq!(subscribe.header("destination"), Some("/user/u2/notifications"));

    expect_disconnect(&mut first).await;
    assert_eq!(connector.attempts().len(), 2);
}

#[tokio::test]
async fn handle_disconnect_then_connect() {
    let (channel, _connector, mut accepted) = channel();
    let (_publisher, watch) = identity_channel(Some(user("u1")));
    let notifier = Notifier::spawn(channel, watch, None);
    let handle = notifier.handle();

    let (mut first, _connect) = accept_session(&mut accepted).await;
    first.expect_frame(Command::Subscribe).await;
    first.expect_frame(Command::Send).await;

    handle.disconnect();
    expect_disconnect(&mut first).await;
    assert!(first.closed().await.is_empty());

    handle.connect(user("u3"));
    let (_second, connect) = accept_session(&mut accepted).await;
    assert_eq!(connect.header("userId"), Some("u3"));
    notifier.shutdown().await;
}

#[tokio::test]
async fn adopted_identity_is_mirrored_to_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileIdentityStore::new(dir.path().join("currentUserId"));
    let (channel, _connector, mut accepted) = channel();
    let (publisher, watch) = identity_channel(None);
    let notifier = Notifier::spawn(channel, watch, Some(store.clone()));

    publisher.publish(user("mirrored"));
    let (_server, _connect) = accept_session(&mut accepted).await;
    assert_eq!(store.load().expect("load"), Some(user("mirrored")));
    notifier.shutdown().await;
}

#[test]
#[should_panic(expected = "Tokio")]
fn spawn_outside_runtime_panics() {
    let (channel, _connector, _accepted) = channel();
    let (_publisher, watch) = identity_channel(Some(user("u1")));
    let _notifier = Notifier::spawn(channel, watch, None);
}

#[tokio::test]
async fn requests_after_shutdown_are_ignored() {
    let (channel, connector, _accepted) = channel();
    let (_publisher, watch) = identity_channel(None);
    let notifier = Notifier::spawn(channel, watch, None);
    let handle = notifier.handle();

    notifier.shutdown().await;
    handle.connect(user("too-late"));
    handle.disconnect();
    tokio::task::yield_now().await;
    assert!(connector.attempts().is_empty());
}
