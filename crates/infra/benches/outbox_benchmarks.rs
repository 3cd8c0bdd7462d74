use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use relaybox_core::{OrganizationId, ProcessorName};
use relaybox_infra::{
    Dispatcher, DispatcherConfig, InMemoryCursorStore, InMemoryOutboxStore, OutboxStore,
};
use relaybox_outbox::{Broadcast, DeliveryOutcome, NewOutboxEvent, OutboxEvent};

struct NullBroadcast;

#[async_trait::async_trait]
impl Broadcast for NullBroadcast {
    async fn deliver(&self, _event: &OutboxEvent) -> DeliveryOutcome {
        DeliveryOutcome::Delivered
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

fn bench_enqueue(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("enqueue");
    group.throughput(Throughput::Elements(1));

    group.bench_function("single_event", |b| {
        let store = InMemoryOutboxStore::arc();
        let org = OrganizationId::new();
        b.iter(|| {
            rt.block_on(async {
                let id = store
                    .enqueue(NewOutboxEvent::new(
                        org,
                        "invoice.posted",
                        json!({ "amount_cents": 125_00 }),
                    ))
                    .await
                    .unwrap();
                black_box(id)
            })
        });
    });

    group.finish();
}

fn bench_dispatch_cycle(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("dispatch_cycle");

    for batch_size in [1usize, 16, 64] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("claim_deliver_advance", batch_size),
            &batch_size,
            |b, &batch_size| {
                b.iter(|| {
                    rt.block_on(async {
                        let store = InMemoryOutboxStore::arc();
                        let cursors = Arc::new(InMemoryCursorStore::new());
                        let org = OrganizationId::new();
                        for seq in 0..batch_size {
                            store
                                .enqueue(NewOutboxEvent::new(
                                    org,
                                    "invoice.posted",
                                    json!({ "seq": seq }),
                                ))
                                .await
                                .unwrap();
                        }

                        let config =
                            DispatcherConfig::new(ProcessorName::new("bench-fanout").unwrap())
                                .with_batch_size(batch_size)
                                .with_run_budget(Duration::from_secs(60));
                        let dispatcher =
                            Dispatcher::new(store.clone(), cursors, NullBroadcast, config);
                        let report = dispatcher.run_once().await.unwrap();
                        black_box(report)
                    })
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_enqueue, bench_dispatch_cycle);
criterion_main!(benches);
