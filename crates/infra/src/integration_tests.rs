//! End-to-end pipeline scenarios against the in-memory adapters.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use serde_json::json;

use relaybox_core::{EventId, OrganizationId, ProcessorName};
use relaybox_outbox::{Broadcast, DeliveryOutcome, NewOutboxEvent, OutboxEvent, RetryPolicy};

use crate::cursor_store::{CursorStore, InMemoryCursorStore};
use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::health::health_snapshot;
use crate::outbox_store::{InMemoryOutboxStore, OutboxStore};
use crate::pruner::{Pruner, PrunerConfig};

/// Records every delivered event id, optionally holding each call open.
#[derive(Default)]
struct RecordingBroadcast {
    delivered: Mutex<Vec<EventId>>,
    delay: Option<StdDuration>,
}

impl RecordingBroadcast {
    fn new() -> Self {
        Self::default()
    }

    fn with_delay(delay: StdDuration) -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            delay: Some(delay),
        }
    }

    fn delivered(&self) -> Vec<EventId> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Broadcast for RecordingBroadcast {
    async fn deliver(&self, event: &OutboxEvent) -> DeliveryOutcome {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.delivered.lock().unwrap().push(event.event_id);
        DeliveryOutcome::Delivered
    }
}

/// Fails each event a fixed number of times, then succeeds.
struct FlakyBroadcast {
    failures_before_success: u32,
    calls: Mutex<HashMap<EventId, u32>>,
}

impl FlakyBroadcast {
    fn new(failures_before_success: u32) -> Self {
        Self {
            failures_before_success,
            calls: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Broadcast for FlakyBroadcast {
    async fn deliver(&self, event: &OutboxEvent) -> DeliveryOutcome {
        let mut calls = self.calls.lock().unwrap();
        let count = calls.entry(event.event_id).or_insert(0);
        *count += 1;
        if *count <= self.failures_before_success {
            DeliveryOutcome::retryable("connection reset by peer")
        } else {
            DeliveryOutcome::Delivered
        }
    }
}

/// Returns a scripted outcome per event id, `Delivered` otherwise.
struct ScriptedBroadcast {
    outcomes: HashMap<EventId, DeliveryOutcome>,
    delivered: Mutex<Vec<EventId>>,
}

impl ScriptedBroadcast {
    fn new(outcomes: HashMap<EventId, DeliveryOutcome>) -> Self {
        Self {
            outcomes,
            delivered: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Broadcast for ScriptedBroadcast {
    async fn deliver(&self, event: &OutboxEvent) -> DeliveryOutcome {
        match self.outcomes.get(&event.event_id) {
            Some(outcome) => outcome.clone(),
            None => {
                self.delivered.lock().unwrap().push(event.event_id);
                DeliveryOutcome::Delivered
            }
        }
    }
}

fn processor() -> ProcessorName {
    ProcessorName::new("realtime-fanout").unwrap()
}

fn config() -> DispatcherConfig {
    DispatcherConfig::new(processor())
        .with_retry_policy(RetryPolicy::fixed(5, StdDuration::ZERO))
        .with_run_budget(StdDuration::from_secs(30))
        .with_broadcast_timeout(StdDuration::from_secs(5))
}

async fn enqueue(store: &InMemoryOutboxStore, org: OrganizationId, seq: u32) -> EventId {
    store
        .enqueue(NewOutboxEvent::new(
            org,
            "invoice.posted",
            json!({ "seq": seq }),
        ))
        .await
        .unwrap()
}

#[tokio::test]
async fn happy_path_delivers_and_advances_cursor() {
    let store = InMemoryOutboxStore::arc();
    let cursors = std::sync::Arc::new(InMemoryCursorStore::new());
    let broadcast = std::sync::Arc::new(RecordingBroadcast::new());
    let org = OrganizationId::new();

    let mut ids = Vec::new();
    for seq in 0..3 {
        ids.push(enqueue(&store, org, seq).await);
    }

    let dispatcher = Dispatcher::new(store.clone(), cursors.clone(), broadcast.clone(), config());
    let report = dispatcher.run_once().await.unwrap();

    assert_eq!(report.claimed, 3);
    assert_eq!(report.delivered, 3);
    assert_eq!(report.retried, 0);
    assert_eq!(report.dead_lettered, 0);
    assert_eq!(broadcast.delivered(), ids);

    let cursor = cursors.get(&processor(), org).await.unwrap().unwrap();
    assert_eq!(cursor.last_event_id, *ids.last().unwrap());

    let snapshot = health_snapshot(&store, &cursors, &processor(), org)
        .await
        .unwrap();
    assert_eq!(snapshot.cursor_lag, Some(0));
    assert_eq!(snapshot.stats.pending, 0);
    assert_eq!(snapshot.stats.delivered, 3);
}

#[tokio::test]
async fn delivered_event_is_not_reoffered() {
    let store = InMemoryOutboxStore::arc();
    let cursors = InMemoryCursorStore::new();
    let broadcast = std::sync::Arc::new(RecordingBroadcast::new());
    let org = OrganizationId::new();
    enqueue(&store, org, 0).await;

    let dispatcher = Dispatcher::new(store.clone(), cursors, broadcast.clone(), config());
    dispatcher.run_once().await.unwrap();
    let second = dispatcher.run_once().await.unwrap();

    assert_eq!(second.claimed, 0);
    assert_eq!(broadcast.delivered().len(), 1);
}

#[tokio::test]
async fn transient_failures_retry_until_delivery() {
    let store = InMemoryOutboxStore::arc();
    let cursors = InMemoryCursorStore::new();
    let org = OrganizationId::new();
    let event_id = enqueue(&store, org, 0).await;

    // Fails attempts 1 through 3, succeeds on the 4th, within max_attempts 5.
    let dispatcher = Dispatcher::new(
        store.clone(),
        cursors,
        FlakyBroadcast::new(3),
        config().with_retry_policy(RetryPolicy::fixed(5, StdDuration::ZERO)),
    );

    let mut delivered = 0;
    for _ in 0..4 {
        delivered += dispatcher.run_once().await.unwrap().delivered;
    }

    assert_eq!(delivered, 1);
    let event = store.get(org, event_id).await.unwrap().unwrap();
    assert!(event.is_delivered());
    assert_eq!(event.delivery_attempts, 4);
    assert!(store.list_dead_letters(org, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn exhausted_retries_dead_letter_with_final_attempt_count() {
    let store = InMemoryOutboxStore::arc();
    let cursors = InMemoryCursorStore::new();
    let org = OrganizationId::new();
    let event_id = enqueue(&store, org, 0).await;

    let dispatcher = Dispatcher::new(
        store.clone(),
        cursors,
        FlakyBroadcast::new(u32::MAX),
        config().with_retry_policy(RetryPolicy::fixed(3, StdDuration::ZERO)),
    );

    let mut dead_lettered = 0;
    for _ in 0..3 {
        dead_lettered += dispatcher.run_once().await.unwrap().dead_lettered;
    }
    assert_eq!(dead_lettered, 1);

    let dead = store.list_dead_letters(org, 10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].event.event_id, event_id);
    assert_eq!(dead[0].attempts_at_failure, 3);
    assert_eq!(dead[0].failure_reason, "connection reset by peer");

    // Dead-lettered events never reappear in the claim path.
    let after = dispatcher.run_once().await.unwrap();
    assert_eq!(after.claimed, 0);
    assert!(store.pending_organizations(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn permanent_failure_dead_letters_without_blocking_successors() {
    let store = InMemoryOutboxStore::arc();
    let cursors = std::sync::Arc::new(InMemoryCursorStore::new());
    let org = OrganizationId::new();

    let first = enqueue(&store, org, 0).await;
    let poison = enqueue(&store, org, 1).await;
    let last = enqueue(&store, org, 2).await;

    let mut outcomes = HashMap::new();
    outcomes.insert(poison, DeliveryOutcome::permanent("payload rejected"));
    let dispatcher = Dispatcher::new(
        store.clone(),
        cursors.clone(),
        ScriptedBroadcast::new(outcomes),
        config(),
    );

    let report = dispatcher.run_once().await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(report.retried, 0);

    let dead = store.list_dead_letters(org, 10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].event.event_id, poison);
    assert_eq!(dead[0].attempts_at_failure, 1);

    assert!(store.get(org, first).await.unwrap().unwrap().is_delivered());
    assert!(store.get(org, last).await.unwrap().unwrap().is_delivered());
    let cursor = cursors.get(&processor(), org).await.unwrap().unwrap();
    assert_eq!(cursor.last_event_id, last);
}

#[tokio::test]
async fn retryable_failure_stops_the_batch_to_preserve_order() {
    let store = InMemoryOutboxStore::arc();
    let cursors = InMemoryCursorStore::new();
    let org = OrganizationId::new();

    let stuck = enqueue(&store, org, 0).await;
    let behind = enqueue(&store, org, 1).await;

    let mut outcomes = HashMap::new();
    outcomes.insert(stuck, DeliveryOutcome::retryable("subscriber offline"));
    let dispatcher = Dispatcher::new(
        store.clone(),
        cursors,
        ScriptedBroadcast::new(outcomes),
        config(),
    );

    let report = dispatcher.run_once().await.unwrap();
    assert_eq!(report.claimed, 2);
    assert_eq!(report.retried, 1);
    assert_eq!(report.delivered, 0);

    // The event behind the failure was claimed but not offered.
    assert!(!store.get(org, behind).await.unwrap().unwrap().is_delivered());
}

#[tokio::test]
async fn unoffered_successor_keeps_its_full_attempt_allowance() {
    let store = InMemoryOutboxStore::arc();
    let cursors = InMemoryCursorStore::new();
    let org = OrganizationId::new();

    let stuck = enqueue(&store, org, 0).await;
    let healthy = enqueue(&store, org, 1).await;

    let mut outcomes = HashMap::new();
    outcomes.insert(stuck, DeliveryOutcome::retryable("subscriber offline"));
    let dispatcher = Dispatcher::new(
        store.clone(),
        cursors,
        ScriptedBroadcast::new(outcomes),
        config()
            .with_retry_policy(RetryPolicy::fixed(3, StdDuration::ZERO))
            .with_claim_lease(chrono::Duration::zero()),
    );

    // Each cycle claims both events but stops at the failing head, so the
    // successor is claimed repeatedly without ever being offered. Those
    // claim-only cycles must not burn its attempts.
    for _ in 0..3 {
        dispatcher.run_once().await.unwrap();
    }

    let dead = store.list_dead_letters(org, 10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].event.event_id, stuck);
    assert_eq!(dead[0].attempts_at_failure, 3);

    // Once the head dead-letters, the successor delivers on its first offer.
    let event = store.get(org, healthy).await.unwrap().unwrap();
    assert!(event.is_delivered());
    assert_eq!(event.delivery_attempts, 1);
}

#[tokio::test]
async fn busy_tenant_is_skipped_without_stalling_others() {
    let store = InMemoryOutboxStore::arc();
    let cursors = InMemoryCursorStore::new();
    let broadcast = std::sync::Arc::new(RecordingBroadcast::new());
    let org_busy = OrganizationId::new();
    let org_free = OrganizationId::new();

    let held = enqueue(&store, org_busy, 0).await;
    let open = enqueue(&store, org_free, 0).await;

    store.hold_tenant_claim(org_busy);
    let dispatcher = Dispatcher::new(store.clone(), cursors, broadcast.clone(), config());

    let report = dispatcher.run_once().await.unwrap();
    assert_eq!(report.tenants_skipped, 1);
    assert_eq!(report.tenants_processed, 1);
    assert_eq!(report.delivered, 1);
    assert!(store.get(org_free, open).await.unwrap().unwrap().is_delivered());
    assert!(!store.get(org_busy, held).await.unwrap().unwrap().is_delivered());

    // The skipped tenant is picked up once the contending claim ends.
    store.release_tenant_claim(org_busy);
    let report = dispatcher.run_once().await.unwrap();
    assert_eq!(report.tenants_skipped, 0);
    assert!(store.get(org_busy, held).await.unwrap().unwrap().is_delivered());
}

#[tokio::test]
async fn failures_in_one_organization_do_not_stall_another() {
    let store = InMemoryOutboxStore::arc();
    let cursors = InMemoryCursorStore::new();
    let org_a = OrganizationId::new();
    let org_b = OrganizationId::new();

    let stuck = enqueue(&store, org_a, 0).await;
    let healthy = enqueue(&store, org_b, 0).await;

    let mut outcomes = HashMap::new();
    outcomes.insert(stuck, DeliveryOutcome::retryable("subscriber offline"));
    let dispatcher = Dispatcher::new(
        store.clone(),
        cursors,
        ScriptedBroadcast::new(outcomes),
        config(),
    );

    let report = dispatcher.run_once().await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.retried, 1);
    assert!(store.get(org_b, healthy).await.unwrap().unwrap().is_delivered());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_dispatchers_deliver_each_event_once() {
    let store = InMemoryOutboxStore::arc();
    let cursors = std::sync::Arc::new(InMemoryCursorStore::new());
    let broadcast = std::sync::Arc::new(RecordingBroadcast::with_delay(
        StdDuration::from_millis(200),
    ));
    let org = OrganizationId::new();

    for seq in 0..4 {
        enqueue(&store, org, seq).await;
    }

    let shared = config()
        .with_claim_lease(chrono::Duration::seconds(30))
        .with_broadcast_timeout(StdDuration::from_secs(5));
    let a = Dispatcher::new(store.clone(), cursors.clone(), broadcast.clone(), shared.clone());
    let b = Dispatcher::new(store.clone(), cursors.clone(), broadcast.clone(), shared);

    let (ra, rb) = tokio::join!(a.run_once(), b.run_once());
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(ra.delivered + rb.delivered, 4);
    let mut delivered = broadcast.delivered();
    let total = delivered.len();
    delivered.sort();
    delivered.dedup();
    assert_eq!(delivered.len(), total);
}

#[tokio::test]
async fn broadcast_timeout_counts_as_retryable() {
    let store = InMemoryOutboxStore::arc();
    let cursors = InMemoryCursorStore::new();
    let org = OrganizationId::new();
    let event_id = enqueue(&store, org, 0).await;

    let dispatcher = Dispatcher::new(
        store.clone(),
        cursors,
        RecordingBroadcast::with_delay(StdDuration::from_millis(100)),
        config().with_broadcast_timeout(StdDuration::from_millis(5)),
    );

    let report = dispatcher.run_once().await.unwrap();
    assert_eq!(report.retried, 1);
    assert_eq!(report.delivered, 0);

    let event = store.get(org, event_id).await.unwrap().unwrap();
    assert!(!event.is_delivered());
    assert!(event.last_error.as_deref().unwrap().contains("exceeded"));
}

#[tokio::test]
async fn run_budget_bounds_an_invocation() {
    let store = InMemoryOutboxStore::arc();
    let cursors = InMemoryCursorStore::new();
    let org = OrganizationId::new();
    enqueue(&store, org, 0).await;

    let dispatcher = Dispatcher::new(
        store.clone(),
        cursors,
        RecordingBroadcast::new(),
        config().with_run_budget(StdDuration::ZERO),
    );

    let report = dispatcher.run_once().await.unwrap();
    assert!(report.budget_exhausted);
    assert_eq!(report.claimed, 0);
}

#[tokio::test]
async fn requeued_dead_letter_is_delivered_again() {
    let store = InMemoryOutboxStore::arc();
    let cursors = InMemoryCursorStore::new();
    let org = OrganizationId::new();
    let event_id = enqueue(&store, org, 0).await;

    store
        .move_to_dead_letter(org, event_id, "operator pulled it")
        .await
        .unwrap();
    let requeued = store.requeue_dead_letter(org, event_id).await.unwrap();
    assert_eq!(requeued.event_id, event_id);
    assert_eq!(requeued.delivery_attempts, 0);

    let broadcast = std::sync::Arc::new(RecordingBroadcast::new());
    let dispatcher = Dispatcher::new(store.clone(), cursors, broadcast.clone(), config());
    let report = dispatcher.run_once().await.unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(broadcast.delivered(), vec![event_id]);
    assert!(store.list_dead_letters(org, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn pruner_removes_only_aged_delivered_rows() {
    let store = InMemoryOutboxStore::arc();
    let org = OrganizationId::new();

    let delivered = enqueue(&store, org, 0).await;
    let pending = enqueue(&store, org, 1).await;

    store.mark_delivered(org, delivered).await.unwrap();
    tokio::time::sleep(StdDuration::from_millis(10)).await;

    let pruner = Pruner::new(
        store.clone(),
        PrunerConfig {
            retention: chrono::Duration::zero(),
            batch_size: 100,
            max_batches: 5,
        },
    );
    let report = pruner.run_once().await.unwrap();

    assert_eq!(report.pruned, 1);
    assert!(!report.truncated);
    assert!(store.get(org, delivered).await.unwrap().is_none());
    assert!(store.get(org, pending).await.unwrap().is_some());
}

#[tokio::test]
async fn health_lag_is_unknown_before_first_cursor_write() {
    let store = InMemoryOutboxStore::arc();
    let cursors = InMemoryCursorStore::new();
    let org = OrganizationId::new();

    enqueue(&store, org, 0).await;
    enqueue(&store, org, 1).await;

    // Event ids come from a store-wide sequence; with no cursor row yet,
    // the lag is unknown rather than measured from zero.
    let snapshot = health_snapshot(&store, &cursors, &processor(), org)
        .await
        .unwrap();
    assert!(snapshot.latest_event_id.is_some());
    assert_eq!(snapshot.cursor_position, None);
    assert_eq!(snapshot.cursor_lag, None);
    assert_eq!(snapshot.stats.pending, 2);
}

#[tokio::test]
async fn pruner_respects_retention_window() {
    let store = InMemoryOutboxStore::arc();
    let org = OrganizationId::new();
    let recent = enqueue(&store, org, 0).await;
    store.mark_delivered(org, recent).await.unwrap();

    let pruner = Pruner::new(store.clone(), PrunerConfig::default());
    let report = pruner.run_once().await.unwrap();

    assert_eq!(report.pruned, 0);
    assert!(store.get(org, recent).await.unwrap().is_some());
}
