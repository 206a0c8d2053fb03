//! Subscription Management Integration Tests
//!
//! Tests subscription registration, acknowledgement, replay, persistence
//! across client restarts, and per-subscription message accounting.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::timeout;

use market_stream_client::infrastructure::feed::InMemoryPeer;
use market_stream_client::{
    ClientConfig, InMemoryTransport, JsonFileStore, MemoryStore, StreamClient, StreamEvent,
    SubscriptionId, SubscriptionStore,
};

fn setup_with_store(store: Arc<dyn SubscriptionStore>) -> (StreamClient, InMemoryTransport) {
    let transport = InMemoryTransport::new();
    let client = StreamClient::with_store(
        ClientConfig::new("ws://feed.test/stream"),
        Arc::new(transport.clone()),
        store,
    );
    (client, transport)
}

async fn connect(client: &StreamClient, transport: &InMemoryTransport) -> InMemoryPeer {
    client.connect().await.unwrap();
    transport.next_peer().await.unwrap()
}

async fn wait_for(
    events: &mut broadcast::Receiver<StreamEvent>,
    predicate: impl Fn(&StreamEvent) -> bool,
) -> StreamEvent {
    timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.unwrap();
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not emitted in time")
}

#[tokio::test]
async fn test_subscribe_and_acknowledge() {
    let (client, transport) = setup_with_store(Arc::new(MemoryStore::new()));
    let peer = connect(&client, &transport).await;
    let mut events = client.events();

    let id = client.subscribe("EURUSD", "price");

    let sent = peer.sent_json();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["action"], "subscribe");
    assert_eq!(sent[0]["symbol"], "EURUSD");
    assert_eq!(sent[0]["channel"], "price");
    assert_eq!(sent[0]["id"], id.get());
    assert!(sent[0]["timestamp"].as_u64().is_some());
    assert!(!client.subscription(id).unwrap().acknowledged);

    peer.push_json(&json!({"type": "subscription_ack", "id": id.get()}));

    let event = wait_for(&mut events, |e| {
        matches!(e, StreamEvent::SubscriptionAcknowledged { .. })
    })
    .await;
    assert_eq!(event, StreamEvent::SubscriptionAcknowledged { id });
    assert!(client.subscription(id).unwrap().acknowledged);
}

#[tokio::test]
async fn test_duplicate_subscribe_returns_existing_id() {
    let (client, transport) = setup_with_store(Arc::new(MemoryStore::new()));
    let peer = connect(&client, &transport).await;

    let first = client.subscribe("BTCUSD", "trades");
    let second = client.subscribe("BTCUSD", "trades");
    let other_channel = client.subscribe("BTCUSD", "depth");

    assert_eq!(first, second);
    assert_ne!(first, other_channel);
    assert_eq!(client.subscriptions().len(), 2);
    assert_eq!(peer.sent_json().len(), 2);
}

#[tokio::test]
async fn test_unsubscribe_sends_frame_and_forgets_counts() {
    let (client, transport) = setup_with_store(Arc::new(MemoryStore::new()));
    let peer = connect(&client, &transport).await;
    let mut events = client.events();

    let id = client.subscribe("EURUSD", "price");
    peer.push_json(&json!({"type": "tick", "symbol": "EURUSD", "price": 1.08}));
    wait_for(&mut events, |e| matches!(e, StreamEvent::MarketData(_))).await;
    assert_eq!(client.stats().subscription_messages.get(&id), Some(&1));

    assert!(client.unsubscribe(id));
    assert!(!client.unsubscribe(id));
    assert!(!client.unsubscribe(SubscriptionId::new(999)));

    let last = peer.sent_json().pop().unwrap();
    assert_eq!(last["action"], "unsubscribe");
    assert_eq!(last["id"], id.get());
    assert!(client.stats().subscription_messages.get(&id).is_none());
}

#[tokio::test]
async fn test_market_data_counts_only_active_matching_subscriptions() {
    let (client, transport) = setup_with_store(Arc::new(MemoryStore::new()));
    let peer = connect(&client, &transport).await;
    let mut events = client.events();

    let price = client.subscribe("EURUSD", "price");
    let depth = client.subscribe("EURUSD", "depth");
    let other = client.subscribe("GBPUSD", "price");
    assert!(client.set_subscription_active(depth, false));

    peer.push_json(&json!([
        {"type": "tick", "symbol": "EURUSD", "price": 1.0842},
        {"type": "trade", "symbol": "EURUSD", "price": 1.0843, "volume": 1000.0},
        {"type": "tick", "symbol": "USDJPY", "price": 151.2}
    ]));
    for _ in 0..3 {
        wait_for(&mut events, |e| matches!(e, StreamEvent::MarketData(_))).await;
    }

    assert_eq!(client.subscription(price).unwrap().message_count, 2);
    assert_eq!(client.subscription(depth).unwrap().message_count, 0);
    assert_eq!(client.subscription(other).unwrap().message_count, 0);
    assert!(client.subscription(other).unwrap().last_update.is_none());
}

#[tokio::test]
async fn test_pause_and_resume_send_control_frames() {
    let (client, transport) = setup_with_store(Arc::new(MemoryStore::new()));
    let peer = connect(&client, &transport).await;

    let id = client.subscribe("XAUUSD", "price");
    assert!(client.set_subscription_active(id, false));
    assert!(client.set_subscription_active(id, true));

    let actions: Vec<_> = peer.sent_json().iter().map(|v| v["action"].clone()).collect();
    assert_eq!(
        actions,
        vec![json!("subscribe"), json!("unsubscribe"), json!("subscribe")]
    );
}

#[tokio::test]
async fn test_subscriptions_survive_client_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("subscriptions.json");

    let (first, _transport) = setup_with_store(Arc::new(JsonFileStore::new(&path)));
    let eurusd = first.subscribe("EURUSD", "price");
    let paused = first.subscribe("GBPUSD", "depth");
    first.set_subscription_active(paused, false);
    drop(first);

    let (client, transport) = setup_with_store(Arc::new(JsonFileStore::new(&path)));
    assert_eq!(client.restore_subscriptions().unwrap(), 2);

    let restored = client.subscription(eurusd).unwrap();
    assert_eq!(restored.symbol, "EURUSD");
    assert!(restored.active);
    assert!(!restored.acknowledged);
    assert!(!client.subscription(paused).unwrap().active);

    // New ids continue after the restored ones
    let fresh = client.subscribe("USDJPY", "price");
    assert!(fresh > paused);

    // Only active subscriptions are replayed on connect
    let peer = connect(&client, &transport).await;
    let symbols: Vec<_> = peer.sent_json().iter().map(|v| v["symbol"].clone()).collect();
    assert_eq!(symbols, vec![json!("EURUSD"), json!("USDJPY")]);
}

#[tokio::test]
async fn test_teardown_clears_persisted_state() {
    let store = Arc::new(MemoryStore::new());
    let (client, _transport) = setup_with_store(store.clone());
    client.subscribe("EURUSD", "price");
    assert_eq!(store.load().unwrap().len(), 1);

    client.teardown();

    assert!(client.subscriptions().is_empty());
    assert!(store.load().unwrap().is_empty());
}

#[tokio::test]
async fn test_disconnect_keeps_subscriptions_for_next_connect() {
    let (client, transport) = setup_with_store(Arc::new(MemoryStore::new()));
    let first = connect(&client, &transport).await;
    let mut events = client.events();
    let id = client.subscribe("EURUSD", "price");
    first.push_json(&json!({"type": "subscription_ack", "id": id.get()}));
    wait_for(&mut events, |e| {
        matches!(e, StreamEvent::SubscriptionAcknowledged { .. })
    })
    .await;

    client.disconnect();
    assert!(!client.subscription(id).unwrap().acknowledged);

    let second = connect(&client, &transport).await;
    let sent = second.sent_json();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["action"], "subscribe");
    assert_eq!(sent[0]["id"], id.get());
}
