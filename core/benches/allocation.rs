//! Allocation engine benchmarks at member scale.
//!
//! A busy member holds tens of batches and a few hundred entries; the linear
//! first-fit scan must stay well under a millisecond there.
//!
//! Run with: `cargo bench -p passledger-core`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)] // Small fixture sizes

use chrono::{Duration, TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use passledger_core::allocation::allocate;
use passledger_core::reconcile::reconcile;
use passledger_core::types::{
    BatchId, ConsumptionEvent, EntitlementBatch, EventId, MemberId, PassType,
};

fn member_history(batch_count: usize, uses_per_batch: u32) -> (Vec<EntitlementBatch>, Vec<ConsumptionEvent>) {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default();
    let pass_types = [PassType::new("12회권"), PassType::new("26회권")];

    let batches: Vec<EntitlementBatch> = (0..batch_count)
        .map(|i| EntitlementBatch {
            id: BatchId::new(i as i64),
            member_id: MemberId::new(1),
            pass_type: pass_types[i % 2].clone(),
            purchase_count: uses_per_batch,
            remaining_count: 0,
            purchase_date: start + Duration::days(i as i64 * 7),
            active: true,
            last_used_date: None,
        })
        .collect();

    let total = batch_count * uses_per_batch as usize;
    let events: Vec<ConsumptionEvent> = (0..total)
        .rev()
        .map(|i| ConsumptionEvent {
            id: EventId::new(i as i64),
            member_id: MemberId::new(1),
            pass_type: pass_types[i % 2].clone(),
            entry_time: start + Duration::hours(i as i64 * 6),
        })
        .collect();

    (batches, events)
}

fn benchmark_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate");

    for batch_count in [4_usize, 16, 64] {
        let (batches, events) = member_history(batch_count, 12);
        group.throughput(Throughput::Elements(events.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_count),
            &(batches, events),
            |b, (batches, events)| b.iter(|| allocate(black_box(batches), black_box(events))),
        );
    }

    group.finish();
}

fn benchmark_reconcile(c: &mut Criterion) {
    let (batches, events) = member_history(16, 26);

    c.bench_function("reconcile/16_batches", |b| {
        b.iter(|| reconcile(black_box(&batches), black_box(&events)));
    });
}

criterion_group!(benches, benchmark_allocate, benchmark_reconcile);
criterion_main!(benches);
