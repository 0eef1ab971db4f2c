//! End-to-end sync over the channel adapter and the loopback hub.

use realsync_channel::{ChannelAdapter, ChannelConfig, LoopbackHub};
use realsync_engine::{
    ConnectionStatus, EntityCollection, EntityId, SubscriptionDescriptor, SyncConfig, SyncOptions,
    SyncOrchestrator,
};
use realsync_testkit::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

type Orchestrator = SyncOrchestrator<ChannelAdapter<LoopbackHub>>;

fn start(hub: &LoopbackHub, options: SyncOptions) -> (Orchestrator, Arc<EntityCollection<Item>>) {
    init_tracing();
    let adapter = Arc::new(ChannelAdapter::new(hub.clone(), ChannelConfig::default()));
    let (registry, items) = items_registry();
    let config =
        SyncConfig::new(registry).with_subscription(ITEMS, SubscriptionDescriptor::<Item>::new(ITEMS));
    (SyncOrchestrator::start(adapter, config, options), items)
}

async fn wait_status(orchestrator: &Orchestrator, status: ConnectionStatus) {
    tokio::time::timeout(
        Duration::from_secs(600),
        orchestrator.connection().wait_for_status(status),
    )
    .await
    .expect("status never reached");
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_insert_then_delete_end_to_end() {
    let hub = LoopbackHub::new();
    let (orchestrator, items) = start(&hub, SyncOptions::new());
    wait_status(&orchestrator, ConnectionStatus::Connected).await;
    assert_eq!(hub.channel_count(), 1);

    hub.insert(ITEMS, json!({ "id": 1, "name": "A" })).unwrap();
    settle().await;
    assert_eq!(items.all(), vec![Item::new(1, "A")]);

    hub.delete(ITEMS, json!({ "id": 1 })).unwrap();
    settle().await;
    assert!(items.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_backend_outage() {
    let hub = LoopbackHub::new();
    let options = SyncOptions::new().with_reconnect_delay(Duration::from_millis(200));
    let (orchestrator, items) = start(&hub, options);
    wait_status(&orchestrator, ConnectionStatus::Connected).await;

    hub.set_reachable(false);
    hub.drop_sessions(Some("maintenance"));
    wait_status(&orchestrator, ConnectionStatus::Reconnecting).await;

    // Two failed attempts, then the hub comes back.
    tokio::time::sleep(Duration::from_millis(200 + 400 + 50)).await;
    assert!(!orchestrator.connection().is_connected());
    hub.set_reachable(true);

    wait_status(&orchestrator, ConnectionStatus::Connected).await;
    assert_eq!(orchestrator.connection().reconnect_attempts(), 0);
    assert_eq!(hub.session_count(), 1);
    assert_eq!(hub.channel_count(), 1);

    hub.insert(ITEMS, json!({ "id": 3, "name": "C" })).unwrap();
    settle().await;
    assert_eq!(items.by_id(&EntityId::Int(3)), Some(Item::new(3, "C")));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_stops_sync() {
    let hub = LoopbackHub::new();
    let (orchestrator, items) = start(&hub, SyncOptions::new());
    wait_status(&orchestrator, ConnectionStatus::Connected).await;

    orchestrator.disconnect();
    assert_eq!(hub.session_count(), 0);
    assert_eq!(hub.insert(ITEMS, json!({ "id": 1, "name": "A" })).unwrap(), 0);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(items.is_empty());
    assert_eq!(orchestrator.connection().status(), ConnectionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_dynamic_subscription_with_filter() {
    let hub = LoopbackHub::new();
    let (orchestrator, _items) = start(&hub, SyncOptions::new());
    wait_status(&orchestrator, ConnectionStatus::Connected).await;

    let handle = orchestrator.subscribe(
        ITEMS,
        SubscriptionDescriptor::<Item>::new(ITEMS).with_filter("id=gt.10"),
    );
    assert_eq!(hub.channel_count(), 1);
    handle.release();
    assert_eq!(hub.channel_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_raw_json_entities() {
    init_tracing();
    let hub = LoopbackHub::new();
    let adapter = Arc::new(ChannelAdapter::new(hub.clone(), ChannelConfig::default()));
    let registry = realsync_engine::TargetRegistry::new();
    let rows = registry.insert_collection("rows", EntityCollection::<Value>::new());
    let config = SyncConfig::new(Arc::new(registry)).with_subscription(
        "rows",
        SubscriptionDescriptor::<Value>::new("events").with_id_field("uuid"),
    );
    let orchestrator = SyncOrchestrator::start(adapter, config, SyncOptions::new());
    wait_status(&orchestrator, ConnectionStatus::Connected).await;

    hub.insert("events", json!({ "uuid": "a-1", "kind": "click" })).unwrap();
    hub.update("events", json!({ "uuid": "a-1", "kind": "tap" }), None).unwrap();
    settle().await;
    assert_eq!(
        rows.by_id(&EntityId::from("a-1")),
        Some(json!({ "uuid": "a-1", "kind": "tap" }))
    );

    hub.delete("events", json!({ "uuid": "a-1" })).unwrap();
    settle().await;
    assert!(rows.is_empty());
}
