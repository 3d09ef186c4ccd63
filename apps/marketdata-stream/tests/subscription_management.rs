//! Subscription Management Integration Tests
//!
//! Tests subscription deltas, replay ordering and resolution against a live
//! in-process feed server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use marketdata_stream::{ConnectionState, MarketDataClient, StaticToken};

use common::{FeedServer, directory, eventually, fast_config};

const WAIT: Duration = Duration::from_secs(5);

fn client_for(server: &FeedServer) -> MarketDataClient {
    MarketDataClient::new(
        directory(),
        fast_config(server.url()),
        Arc::new(StaticToken::new("tok-1")),
    )
}

#[tokio::test]
async fn token_is_appended_to_stream_path() {
    let server = FeedServer::start().await;
    let client = client_for(&server);

    client.connect(WAIT).await.unwrap();

    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(server.paths(), vec!["/stream/tok-1".to_string()]);
    client.stop().await;
}

#[tokio::test]
async fn subscriptions_made_offline_are_replayed_first() {
    let server = FeedServer::start().await;
    let client = client_for(&server);

    let changes = client.subscribe(["NSECM|TCS", "NSECM|RELIANCE"]).unwrap();
    assert!(!changes.sent);
    assert_eq!(changes.added, vec![200, 100]);

    client.connect(WAIT).await.unwrap();
    assert!(eventually(WAIT, || !server.frames(0).is_empty()).await);

    assert_eq!(
        server.frames(0)[0],
        r#"{"action":"subscribe","instrumentIds":[100,200]}"#
    );
    client.stop().await;
}

#[tokio::test]
async fn no_replay_when_nothing_subscribed() {
    let server = FeedServer::start().await;
    let client = client_for(&server);

    client.connect(WAIT).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(server.frames(0).is_empty());
    client.stop().await;
}

#[tokio::test]
async fn live_subscribe_and_unsubscribe_send_deltas() {
    let server = FeedServer::start().await;
    let client = client_for(&server);
    client.connect(WAIT).await.unwrap();

    let changes = client.subscribe(["NSECM|RELIANCE", "300"]).unwrap();
    assert!(changes.sent);

    let changes = client.unsubscribe(["NSECM|RELIANCE", "NSECM|TCS"]).unwrap();
    assert!(changes.sent);
    assert_eq!(changes.removed, vec![100]);

    assert!(eventually(WAIT, || server.frames(0).len() == 2).await);
    let frames = server.frames(0);
    assert_eq!(frames[0], r#"{"action":"subscribe","instrumentIds":[100,300]}"#);
    assert_eq!(frames[1], r#"{"action":"unsubscribe","instrumentIds":[100]}"#);
    assert_eq!(client.subscriptions(), vec![300]);
    client.stop().await;
}

#[tokio::test]
async fn unknown_symbol_rejects_whole_batch() {
    let server = FeedServer::start().await;
    let client = client_for(&server);
    client.connect(WAIT).await.unwrap();

    let err = client.subscribe(["NSECM|RELIANCE", "NSECM|UNKNOWN"]).unwrap_err();

    assert_eq!(err.index, 1);
    assert!(client.subscriptions().is_empty());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(server.frames(0).is_empty());
    client.stop().await;
}

#[tokio::test]
async fn unsubscribe_of_unknown_subscription_sends_nothing() {
    let server = FeedServer::start().await;
    let client = client_for(&server);
    client.connect(WAIT).await.unwrap();

    let changes = client.unsubscribe([200_i64]).unwrap();

    assert!(changes.is_empty());
    assert!(!changes.sent);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(server.frames(0).is_empty());
    client.stop().await;
}
