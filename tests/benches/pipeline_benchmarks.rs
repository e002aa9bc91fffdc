//! # Throughput Pipeline Benchmarks
//!
//! Hot paths of batch formation and execution:
//!
//! | Area | Operation | Target |
//! |------|-----------|--------|
//! | Pending queue | push 10k transactions | < 10ms |
//! | Selection | choose 100 of 10k candidates | < 5ms |
//! | Aggregation | aggregate a 100-transaction batch | < 1ms |

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use throughput_pipeline::{
    select_transactions, DigestSignatureVerifier, PendingQueue, SelectionLimits,
    SelectionStrategy, SignatureAggregator, Transaction, MIN_GAS_LIMIT,
};

fn random_transactions(count: usize) -> Vec<Transaction> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|i| {
            let tx = Transaction::new("bench", "sink", i as u64 + 1, rng.gen_range(MIN_GAS_LIMIT..=200_000))
                .with_priority(rng.gen_range(0..=10))
                .with_payload(vec![0u8; rng.gen_range(0..512)]);
            let mut tx = DigestSignatureVerifier::sign(tx);
            tx.submitted_at = rng.gen_range(0..10_000);
            tx
        })
        .collect()
}

// ============================================================================
// PENDING QUEUE
// ============================================================================

fn bench_queue_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("pending-queue");
    let transactions = random_transactions(10_000);

    group.throughput(Throughput::Elements(transactions.len() as u64));
    group.bench_function("push_10k", |b| {
        b.iter(|| {
            let mut queue = PendingQueue::new();
            for tx in transactions.iter().cloned() {
                queue.push(tx);
            }
            black_box(queue.len())
        })
    });

    group.finish();
}

// ============================================================================
// SELECTION
// ============================================================================

fn bench_selection_strategies(c: &mut Criterion) {
    let mut group = c.benchmark_group("selection");
    group.measurement_time(Duration::from_secs(5));

    for size in [1_000usize, 10_000] {
        let mut queue = PendingQueue::new();
        for tx in random_transactions(size) {
            queue.push(tx);
        }
        let snapshot = queue.snapshot();
        let limits = SelectionLimits {
            max_count: 100,
            max_gas: 30_000_000,
        };

        group.throughput(Throughput::Elements(size as u64));
        for strategy in [
            SelectionStrategy::Size,
            SelectionStrategy::Gas,
            SelectionStrategy::Time,
            SelectionStrategy::Hybrid,
        ] {
            group.bench_with_input(
                BenchmarkId::new(strategy.as_str(), size),
                &snapshot,
                |b, snapshot| {
                    b.iter(|| black_box(select_transactions(snapshot, strategy, limits, 10_000)))
                },
            );
        }
    }

    group.finish();
}

// ============================================================================
// AGGREGATION
// ============================================================================

fn bench_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregation");
    let aggregator = SignatureAggregator::new(Arc::new(DigestSignatureVerifier::new()));

    // One size per algorithm: schnorr, musig, bls
    for size in [5usize, 50, 100] {
        let batch = random_transactions(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("aggregate", size), &batch, |b, batch| {
            b.iter(|| black_box(aggregator.aggregate(batch).is_ok()))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_queue_push,
    bench_selection_strategies,
    bench_aggregation
);
criterion_main!(benches);
