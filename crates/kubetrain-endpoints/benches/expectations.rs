//! Criterion benchmarks for ControllerExpectations and endpoint classification
//!
//! The expectations store sits on the hot path of every reconcile pass and
//! every endpoint watch event, shared by all reconcilers and the router.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use kubetrain_common::{REPLICA_INDEX_LABEL_KEY, REPLICA_TYPE_LABEL_KEY};
use kubetrain_endpoints::classifier::slice_endpoints;
use kubetrain_endpoints::ControllerExpectations;

// =============================================================================
// Test Fixtures
// =============================================================================

fn key(job: usize) -> String {
    format!("default/job-{}/worker/services", job)
}

fn populated_store(jobs: usize) -> ControllerExpectations {
    let store = ControllerExpectations::new();
    for j in 0..jobs {
        store
            .expect_creations(&key(j), 1)
            .expect("benchmark key is well formed");
    }
    store
}

fn worker_endpoints(replicas: usize) -> Vec<Arc<Service>> {
    (0..replicas)
        .map(|i| {
            let labels = BTreeMap::from([
                (REPLICA_TYPE_LABEL_KEY.to_string(), "worker".to_string()),
                (REPLICA_INDEX_LABEL_KEY.to_string(), i.to_string()),
            ]);
            Arc::new(Service {
                metadata: ObjectMeta {
                    name: Some(format!("job-worker-{}", i)),
                    labels: Some(labels),
                    ..Default::default()
                },
                ..Default::default()
            })
        })
        .collect()
}

// =============================================================================
// Benchmarks: Single Operations
// =============================================================================

fn bench_raise_and_observe(c: &mut Criterion) {
    let mut group = c.benchmark_group("raise_and_observe");

    for size in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("existing_store", size), &size, |b, &size| {
            let store = populated_store(size);
            let mut i = 0;
            b.iter(|| {
                let k = key(size + i % size);
                store.expect_creations(black_box(&k), 1).ok();
                store.creation_observed(black_box(&k));
                i += 1;
            });
        });
    }

    group.finish();
}

fn bench_satisfied(c: &mut Criterion) {
    let mut group = c.benchmark_group("satisfied");

    for size in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("pending", size), &size, |b, &size| {
            let store = populated_store(size);
            let mut i = 0;
            b.iter(|| {
                black_box(store.satisfied(&key(i % size)));
                i += 1;
            });
        });
    }

    group.finish();
}

fn bench_slice_endpoints(c: &mut Criterion) {
    let mut group = c.benchmark_group("slice_endpoints");

    for replicas in [8usize, 64, 512] {
        group.throughput(Throughput::Elements(replicas as u64));
        group.bench_with_input(BenchmarkId::new("workers", replicas), &replicas, |b, &n| {
            let endpoints = worker_endpoints(n);
            b.iter(|| black_box(slice_endpoints(black_box(&endpoints), n)));
        });
    }

    group.finish();
}

// =============================================================================
// Benchmarks: Concurrent Access
// =============================================================================

fn bench_concurrent_mixed(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_mixed");

    for size in [100usize, 1000] {
        group.throughput(Throughput::Elements(4)); // 4 threads

        group.bench_with_input(BenchmarkId::new("reconcile_and_watch", size), &size, |b, &size| {
            b.iter_batched(
                || Arc::new(populated_store(size)),
                |store| {
                    let handles: Vec<_> = (0..4)
                        .map(|t| {
                            let s = Arc::clone(&store);
                            thread::spawn(move || {
                                for i in 0..25 {
                                    let k = key((t * 25 + i) % size);
                                    if t % 2 == 0 {
                                        // reconciler side
                                        black_box(s.satisfied(&k));
                                        s.expect_creations(&k, 1).ok();
                                    } else {
                                        // watch side
                                        s.creation_observed(&k);
                                    }
                                }
                            })
                        })
                        .collect();

                    for h in handles {
                        h.join().unwrap();
                    }
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

// =============================================================================
// Criterion Groups
// =============================================================================

criterion_group!(
    benches,
    bench_raise_and_observe,
    bench_satisfied,
    bench_slice_endpoints,
    bench_concurrent_mixed,
);

criterion_main!(benches);
