//! Integration tests for the sync orchestrator against a scripted adapter.

use realsync_engine::{
    Adapter, ConnectionSnapshot, ConnectionStatus, EntityCollection, EntityId, EventFilter,
    SubscriptionDescriptor, SyncConfig, SyncError, SyncOptions, SyncOrchestrator,
};
use realsync_testkit::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const DELAY: Duration = Duration::from_millis(100);

fn options() -> SyncOptions {
    SyncOptions::new()
        .with_reconnect_delay(DELAY)
        .with_max_reconnect_attempts(10)
        .with_debug_logging(true)
}

fn items_config() -> (SyncConfig, Arc<EntityCollection<Item>>) {
    let (registry, items) = items_registry();
    let config =
        SyncConfig::new(registry).with_subscription(ITEMS, SubscriptionDescriptor::<Item>::new(ITEMS));
    (config, items)
}

fn start(
    adapter: ScriptedAdapter,
    options: SyncOptions,
) -> (
    SyncOrchestrator<ScriptedAdapter>,
    Arc<ScriptedAdapter>,
    Arc<EntityCollection<Item>>,
) {
    init_tracing();
    let adapter = Arc::new(adapter);
    let (config, items) = items_config();
    let orchestrator = SyncOrchestrator::start(Arc::clone(&adapter), config, options);
    (orchestrator, adapter, items)
}

async fn wait_until(
    orchestrator: &SyncOrchestrator<ScriptedAdapter>,
    predicate: impl FnMut(&ConnectionSnapshot) -> bool,
) -> ConnectionSnapshot {
    tokio::time::timeout(Duration::from_secs(600), orchestrator.connection().wait_for(predicate))
        .await
        .expect("connection state never matched")
}

async fn wait_status(
    orchestrator: &SyncOrchestrator<ScriptedAdapter>,
    status: ConnectionStatus,
) -> ConnectionSnapshot {
    wait_until(orchestrator, |s| s.status == status).await
}

fn item(items: &EntityCollection<Item>, id: i64) -> Option<Item> {
    items.by_id(&EntityId::Int(id))
}

// ============================================================================
// Connection lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_connects_and_subscribes_configured_topics() {
    let (orchestrator, adapter, _items) = start(ScriptedAdapter::new(), options());

    let state = wait_status(&orchestrator, ConnectionStatus::Connected).await;
    assert!(state.is_connected());
    assert!(state.error.is_none());
    assert!(state.last_connected_at.is_some());
    assert_eq!(state.reconnect_attempts, 0);

    assert_eq!(adapter.connect_calls(), 1);
    assert_eq!(adapter.subscribed_topics(), vec![ITEMS.to_string()]);
    assert!(adapter.has_listener());
    assert_eq!(orchestrator.subscribed_paths(), vec![ITEMS.to_string()]);
    assert_eq!(orchestrator.stats().connects, 1);
}

#[tokio::test(start_paused = true)]
async fn test_recovers_with_exponential_backoff() {
    let (orchestrator, adapter, _items) = start(ScriptedAdapter::failing(3), options());

    let state = wait_status(&orchestrator, ConnectionStatus::Connected).await;
    assert_eq!(state.reconnect_attempts, 0);
    assert!(state.error.is_none());

    let times = adapter.connect_times();
    assert_eq!(times.len(), 4);
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    for (gap, expected) in gaps.iter().zip([DELAY, DELAY * 2, DELAY * 4]) {
        assert!(*gap >= expected, "gap {gap:?} shorter than {expected:?}");
        assert!(*gap < expected + Duration::from_millis(5), "gap {gap:?} longer than {expected:?}");
    }

    let stats = orchestrator.stats();
    assert_eq!(stats.failed_connects, 3);
    assert_eq!(stats.reconnects_scheduled, 3);
    assert!(!orchestrator.has_pending_reconnect());
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_max_attempts() {
    let (orchestrator, adapter, _items) = start(
        ScriptedAdapter::always_failing(),
        options().with_max_reconnect_attempts(3),
    );

    let state = wait_until(&orchestrator, |s| {
        s.error.as_deref() == Some("max reconnect attempts reached")
    })
    .await;
    assert_eq!(state.status, ConnectionStatus::Error);
    assert_eq!(state.reconnect_attempts, 3);
    assert!(!orchestrator.has_pending_reconnect());
    assert_eq!(adapter.connect_calls(), 4);

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(adapter.connect_calls(), 4);
    assert_eq!(orchestrator.connection().status(), ConnectionStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn test_manual_reconnect_recovers_from_error() {
    let adapter = ScriptedAdapter::always_failing();
    let (orchestrator, adapter, _items) = start(adapter, options().with_max_reconnect_attempts(1));

    wait_until(&orchestrator, |s| {
        s.error.as_deref() == Some("max reconnect attempts reached")
    })
    .await;

    adapter.set_always_fail(false);
    orchestrator.reconnect().await.unwrap();

    let state = orchestrator.connection().snapshot();
    assert_eq!(state.status, ConnectionStatus::Connected);
    assert_eq!(state.reconnect_attempts, 0);
    assert!(state.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_manual_reconnect_propagates_failure() {
    let (orchestrator, adapter, _items) = start(ScriptedAdapter::new(), SyncOptions::no_reconnect());
    wait_status(&orchestrator, ConnectionStatus::Connected).await;

    adapter.set_always_fail(true);
    let err = orchestrator.reconnect().await.unwrap_err();
    assert!(matches!(err, SyncError::Connect { .. }));
    assert!(err.is_retryable());
    assert_eq!(orchestrator.connection().status(), ConnectionStatus::Error);
    assert!(!orchestrator.has_pending_reconnect());
}

#[tokio::test(start_paused = true)]
async fn test_clean_close_without_auto_reconnect() {
    let (orchestrator, adapter, _items) = start(ScriptedAdapter::new(), SyncOptions::no_reconnect());
    wait_status(&orchestrator, ConnectionStatus::Connected).await;

    adapter.drop_connection(None);
    assert_eq!(orchestrator.connection().status(), ConnectionStatus::Disconnected);
    assert!(orchestrator.connection().error().is_none());
    assert!(!orchestrator.has_pending_reconnect());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(adapter.connect_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connection_loss_reconnects() {
    let (orchestrator, adapter, _items) = start(ScriptedAdapter::new(), options());
    wait_status(&orchestrator, ConnectionStatus::Connected).await;

    adapter.drop_connection(Some("socket reset"));
    let state = orchestrator.connection().snapshot();
    assert_eq!(state.status, ConnectionStatus::Reconnecting);
    assert_eq!(state.error.as_deref(), Some("socket reset"));
    assert_eq!(state.reconnect_attempts, 1);
    assert!(orchestrator.has_pending_reconnect());

    // A second loss report while the timer is armed arms nothing new.
    adapter.drop_connection(Some("socket reset"));
    assert_eq!(orchestrator.connection().reconnect_attempts(), 1);

    wait_status(&orchestrator, ConnectionStatus::Connected).await;
    assert_eq!(adapter.connect_calls(), 2);
    assert_eq!(orchestrator.stats().reconnects_scheduled, 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_reconnect() {
    let (orchestrator, adapter, _items) = start(
        ScriptedAdapter::failing(1),
        options().with_reconnect_delay(Duration::from_secs(1)),
    );

    wait_status(&orchestrator, ConnectionStatus::Reconnecting).await;
    assert!(orchestrator.has_pending_reconnect());

    orchestrator.disconnect();
    assert_eq!(orchestrator.connection().status(), ConnectionStatus::Disconnected);
    assert!(!orchestrator.has_pending_reconnect());
    assert!(!adapter.has_listener());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(adapter.connect_calls(), 1);
    assert_eq!(orchestrator.connection().status(), ConnectionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_connect_discards_connection() {
    let (orchestrator, adapter, _items) = start(
        ScriptedAdapter::new().with_latency(Duration::from_secs(1)),
        options(),
    );

    wait_status(&orchestrator, ConnectionStatus::Connecting).await;
    orchestrator.disconnect();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(orchestrator.connection().status(), ConnectionStatus::Disconnected);
    assert!(!adapter.is_connected());
    assert_eq!(adapter.active_subscriptions(), 0);
    assert_eq!(adapter.disconnect_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_manual_reconnect_waits_for_scheduled_connect() {
    let latency = Duration::from_secs(1);
    let (orchestrator, adapter, _items) = start(
        ScriptedAdapter::failing(1).with_latency(latency),
        options(),
    );

    wait_status(&orchestrator, ConnectionStatus::Reconnecting).await;
    // The timer has fired and its connect is still in flight.
    tokio::time::sleep(DELAY + latency / 2).await;
    assert_eq!(adapter.connect_calls(), 2);
    assert!(!orchestrator.has_pending_reconnect());

    orchestrator.reconnect().await.unwrap();

    let state = orchestrator.connection().snapshot();
    assert_eq!(state.status, ConnectionStatus::Connected);
    assert_eq!(adapter.connect_calls(), 3);
    assert_eq!(adapter.active_subscriptions(), 1);
    assert_eq!(orchestrator.subscribed_paths(), vec![ITEMS.to_string()]);
    assert!(!orchestrator.has_pending_reconnect());
    // The superseded connect was closed again as soon as it resolved.
    assert_eq!(adapter.disconnect_calls(), 2);
    assert_eq!(orchestrator.stats().connects, 1);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(adapter.connect_calls(), 3);
    assert_eq!(orchestrator.connection().status(), ConnectionStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_drop_tears_down() {
    let (orchestrator, adapter, _items) = start(ScriptedAdapter::new(), options());
    wait_status(&orchestrator, ConnectionStatus::Connected).await;

    drop(orchestrator);
    assert!(!adapter.is_connected());
    assert!(!adapter.has_listener());
    assert_eq!(adapter.active_subscriptions(), 0);

    adapter.drop_connection(Some("late"));
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(adapter.connect_calls(), 1);
}

// ============================================================================
// Event application
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_insert_then_delete() {
    let (orchestrator, adapter, items) = start(ScriptedAdapter::new(), options());
    wait_status(&orchestrator, ConnectionStatus::Connected).await;

    assert_eq!(adapter.emit(item_inserted(1, "A")), 1);
    assert_eq!(item(&items, 1), Some(Item::new(1, "A")));
    assert_eq!(items.len(), 1);

    adapter.emit(item_deleted(1));
    assert!(items.is_empty());
    assert_eq!(orchestrator.stats().events_applied, 2);
}

#[tokio::test(start_paused = true)]
async fn test_update_replaces_entity() {
    let (orchestrator, adapter, items) = start(ScriptedAdapter::new(), options());
    wait_status(&orchestrator, ConnectionStatus::Connected).await;

    adapter.emit(item_inserted(1, "A"));
    adapter.emit(item_inserted(2, "B"));
    adapter.emit(item_updated(1, "A2"));

    assert_eq!(item(&items, 1), Some(Item::new(1, "A2")));
    assert_eq!(items.all(), vec![Item::new(1, "A2"), Item::new(2, "B")]);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_events_are_dropped() {
    let (orchestrator, adapter, items) = start(ScriptedAdapter::new(), options());
    wait_status(&orchestrator, ConnectionStatus::Connected).await;

    adapter.emit(realsync_engine::NormalizedEvent::insert(ITEMS, json!({ "name": "no id" })));
    adapter.emit(realsync_engine::NormalizedEvent::insert(ITEMS, json!({ "id": "x", "name": 5 })));
    adapter.emit(item_deleted(42));

    assert!(items.is_empty());
    let stats = orchestrator.stats();
    assert_eq!(stats.events_dropped, 2);
    // Deleting an absent id is applied as a no-op.
    assert_eq!(stats.events_applied, 1);
    assert_eq!(orchestrator.connection().status(), ConnectionStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_event_filter_limits_application() {
    init_tracing();
    let adapter = Arc::new(ScriptedAdapter::new());
    let (registry, items) = items_registry();
    let config = SyncConfig::new(registry).with_subscription(
        ITEMS,
        SubscriptionDescriptor::<Item>::new(ITEMS).with_event_filter(EventFilter::Insert),
    );
    let orchestrator = SyncOrchestrator::start(Arc::clone(&adapter), config, options());
    wait_status(&orchestrator, ConnectionStatus::Connected).await;

    adapter.emit(item_inserted(1, "A"));
    assert_eq!(adapter.emit(item_deleted(1)), 0);
    assert_eq!(items.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_target_is_ignored() {
    init_tracing();
    let adapter = Arc::new(ScriptedAdapter::new());
    let (registry, items) = items_registry();
    let config = SyncConfig::new(registry)
        .with_subscription(ITEMS, SubscriptionDescriptor::<Item>::new(ITEMS))
        .with_subscription("ghosts", SubscriptionDescriptor::<Item>::new("ghosts"));
    let orchestrator = SyncOrchestrator::start(Arc::clone(&adapter), config, options());

    wait_status(&orchestrator, ConnectionStatus::Connected).await;
    assert_eq!(adapter.subscribed_topics(), vec![ITEMS.to_string()]);

    adapter.emit(item_inserted(1, "A"));
    assert_eq!(items.len(), 1);
}

// ============================================================================
// Subscription management
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_stops_changes() {
    let (orchestrator, adapter, items) = start(ScriptedAdapter::new(), options());
    wait_status(&orchestrator, ConnectionStatus::Connected).await;

    adapter.emit(item_inserted(1, "A"));
    assert!(orchestrator.unsubscribe(ITEMS));
    assert!(!orchestrator.unsubscribe(ITEMS));

    assert_eq!(adapter.emit(item_inserted(2, "B")), 0);
    assert_eq!(items.ids(), vec![EntityId::Int(1)]);
    assert!(orchestrator.subscribed_paths().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_releases_previous_handle() {
    let (orchestrator, adapter, items) = start(ScriptedAdapter::new(), options());
    wait_status(&orchestrator, ConnectionStatus::Connected).await;
    assert_eq!(adapter.released_handles(), 0);

    let handle = orchestrator.subscribe(
        ITEMS,
        SubscriptionDescriptor::<Item>::new(ITEMS).with_event_filter(EventFilter::Delete),
    );
    assert!(!handle.is_noop());
    assert_eq!(adapter.released_handles(), 1);
    assert_eq!(adapter.active_subscriptions(), 1);

    // Only deletes reach the collection now.
    assert_eq!(adapter.emit(item_inserted(1, "A")), 0);
    assert!(items.is_empty());

    handle.release();
    assert_eq!(adapter.active_subscriptions(), 0);
    assert!(orchestrator.subscribed_paths().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stale_handle_keeps_newer_subscription() {
    let (orchestrator, adapter, items) = start(ScriptedAdapter::new(), options());
    wait_status(&orchestrator, ConnectionStatus::Connected).await;

    let first = orchestrator.subscribe(ITEMS, SubscriptionDescriptor::<Item>::new(ITEMS));
    let second = orchestrator.subscribe(
        ITEMS,
        SubscriptionDescriptor::<Item>::new(ITEMS).with_event_filter(EventFilter::Insert),
    );
    first.release();

    assert!(orchestrator.is_subscribed(ITEMS));
    assert_eq!(adapter.active_subscriptions(), 1);
    assert_eq!(adapter.emit(item_inserted(1, "A")), 1);
    assert_eq!(item(&items, 1), Some(Item::new(1, "A")));

    // The newer subscription is still the one reinstalled after a reconnect.
    adapter.drop_connection(Some("socket reset"));
    wait_status(&orchestrator, ConnectionStatus::Connected).await;
    assert_eq!(adapter.emit(item_deleted(1)), 0);
    assert_eq!(adapter.emit(item_inserted(2, "B")), 1);
    assert_eq!(item(&items, 2), Some(Item::new(2, "B")));

    second.release();
    assert!(!orchestrator.is_subscribed(ITEMS));
    assert_eq!(adapter.active_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_requires_connection() {
    let (orchestrator, adapter, _items) = start(
        ScriptedAdapter::always_failing(),
        SyncOptions::no_reconnect(),
    );
    wait_status(&orchestrator, ConnectionStatus::Error).await;

    let handle = orchestrator.subscribe(ITEMS, SubscriptionDescriptor::<Item>::new(ITEMS));
    assert!(handle.is_noop());
    assert_eq!(adapter.active_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dynamic_subscription_survives_automatic_reconnect() {
    init_tracing();
    let adapter = Arc::new(ScriptedAdapter::new());
    let (registry, items) = items_registry();
    let orchestrator =
        SyncOrchestrator::start(Arc::clone(&adapter), SyncConfig::new(registry), options());
    wait_status(&orchestrator, ConnectionStatus::Connected).await;
    assert_eq!(adapter.active_subscriptions(), 0);

    let _handle = orchestrator.subscribe(ITEMS, SubscriptionDescriptor::<Item>::new(ITEMS));
    adapter.drop_connection(Some("socket reset"));
    wait_status(&orchestrator, ConnectionStatus::Connected).await;

    assert_eq!(adapter.subscribed_topics(), vec![ITEMS.to_string()]);
    adapter.emit(item_inserted(7, "G"));
    assert_eq!(item(&items, 7), Some(Item::new(7, "G")));

    // A manual disconnect forgets dynamic subscriptions.
    orchestrator.reconnect().await.unwrap();
    assert!(orchestrator.subscribed_paths().is_empty());
    assert_eq!(adapter.active_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_silences_lax_adapter() {
    let (orchestrator, adapter, items) = start(ScriptedAdapter::new().with_lax_cleanup(), options());
    wait_status(&orchestrator, ConnectionStatus::Connected).await;

    orchestrator.disconnect();
    assert_eq!(adapter.released_handles(), 1);

    // The adapter still delivers, the orchestrator ignores it.
    assert_eq!(adapter.emit(item_inserted(1, "A")), 1);
    assert!(items.is_empty());
    assert_eq!(orchestrator.stats().events_applied, 0);
}
