/// Notification feed over a scripted push connection
mod common;

use common::{client, eventually, FakeBackend, FakeConnector};
use marketlink_core::realtime::{NotificationFeed, PushEvent};
use marketlink_core::{ClientError, Credential};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;

fn frame(value: serde_json::Value) -> PushEvent {
    PushEvent::Frame(value.to_string())
}

#[tokio::test]
async fn test_feed_delivers_only_notifications() {
    let backend = Arc::new(FakeBackend::new("a1", "a2"));
    let (api, _store) = client(&backend, Some(Credential::new("a1", Some("r1".to_string()))));
    let connector = FakeConnector::new(&backend);

    let feed = NotificationFeed::open(&api, &connector).await.unwrap();
    assert_eq!(
        connector.urls.lock().unwrap().as_slice(),
        ["ws://api.test/ws/notifications/?token=a1".to_string()]
    );
    assert!(feed.is_open());

    let mut notifications = feed.subscribe();
    let socket = connector.take_socket();
    let sends = [
        frame(json!({
            "type": "notification",
            "payload": {
                "title": "Delivery ready",
                "message": "The freelancer uploaded files",
                "data": { "file_url": "/request/7/files/3/" }
            }
        })),
        frame(json!({ "type": "presence", "payload": { "online": true } })),
        PushEvent::Frame("{broken".to_string()),
        frame(json!({ "type": "notification", "payload": { "title": 5 } })),
        frame(json!({
            "type": "notification",
            "payload": { "title": "Request accepted", "message": "Work has started" }
        })),
    ];
    for event in sends {
        socket.to_client.send(event).await.unwrap();
    }

    let first = notifications.recv().await.unwrap();
    assert_eq!(first.title, "Delivery ready");
    assert_eq!(first.attachment_url(), Some("/request/7/files/3/"));

    let second = notifications.recv().await.unwrap();
    assert_eq!(second.title, "Request accepted");
    assert_eq!(second.attachment_url(), None);

    assert!(matches!(notifications.try_recv(), Err(TryRecvError::Empty)));
    assert!(feed.is_open());
}

#[tokio::test]
async fn test_feed_requires_session() {
    let backend = Arc::new(FakeBackend::new("a1", "a2"));
    let (api, _store) = client(&backend, None);
    let connector = FakeConnector::new(&backend);

    let err = NotificationFeed::open(&api, &connector).await.err().unwrap();
    assert!(matches!(err, ClientError::Channel(_)));
    assert!(connector.urls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_feed_handshake_failure_is_returned() {
    let backend = Arc::new(FakeBackend::new("a1", "a2"));
    let (api, _store) = client(&backend, Some(Credential::new("a1", None)));
    let connector = FakeConnector::failing(&backend);

    assert!(NotificationFeed::open(&api, &connector).await.is_err());
}

#[tokio::test]
async fn test_server_close_ends_feed() {
    let backend = Arc::new(FakeBackend::new("a1", "a2"));
    let (api, _store) = client(&backend, Some(Credential::new("a1", None)));
    let connector = FakeConnector::new(&backend);
    let feed = NotificationFeed::open(&api, &connector).await.unwrap();
    let socket = connector.take_socket();

    socket.to_client.send(PushEvent::Closed).await.unwrap();
    let f = &feed;
    assert!(eventually(|| async move { !f.is_open() }).await);
}

#[tokio::test]
async fn test_close_releases_socket() {
    let backend = Arc::new(FakeBackend::new("a1", "a2"));
    let (api, _store) = client(&backend, Some(Credential::new("a1", None)));
    let connector = FakeConnector::new(&backend);
    let mut feed = NotificationFeed::open(&api, &connector).await.unwrap();
    let mut socket = connector.take_socket();

    feed.close();
    assert!(!feed.is_open());
    assert!(socket.from_client.recv().await.is_none());
    let to_client = &socket.to_client;
    assert!(eventually(|| async move { to_client.is_closed() }).await);
}
