//! Benchmarks for single-flight coalescing
//!
//! Measures the cost of the coordinator's attach-or-install path under
//! varying fan-in, and the overhead it adds over a bare cache hit.

use cachette::events::EventBus;
use cachette::local::LocalTier;
use cachette::single_flight::SingleFlight;
use cachette::tier::Tier;
use cachette::value::Value;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    Runtime::new().unwrap_or_else(|_| panic!("failed to create runtime"))
}

fn coordinator() -> SingleFlight<LocalTier> {
    SingleFlight::new(Arc::new(LocalTier::new(EventBus::new())))
}

/// A single caller hitting an already-populated key: read-through only, no
/// in-flight table interaction.
fn bench_cache_hit(c: &mut Criterion) {
    let rt = runtime();
    let sf = coordinator();
    rt.block_on(sf.tier().set("warm", &Value::String("v".to_string()), Duration::ZERO));

    c.bench_function("single_flight_cache_hit", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(
                    sf.get_or_fetch("warm", Duration::from_secs(60), || async { Ok(None) }, None, None)
                        .await,
                )
            });
        });
    });
}

/// N concurrent callers racing for the same cold key: exactly one should
/// run `compute`, the rest attach to its shared future.
fn bench_coalesced_fan_in(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("single_flight_coalesced_fan_in");

    for fan_in in &[2, 10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(fan_in), fan_in, |b, &fan_in| {
            b.iter(|| {
                rt.block_on(async {
                    let sf = coordinator();
                    let key = format!("key-{}", rand::random::<u32>());
                    let mut handles = Vec::with_capacity(fan_in);
                    for _ in 0..fan_in {
                        let sf = sf.clone();
                        let key = key.clone();
                        handles.push(tokio::spawn(async move {
                            sf.get_or_fetch(
                                &key,
                                Duration::from_secs(60),
                                || async {
                                    tokio::time::sleep(Duration::from_micros(200)).await;
                                    Ok(Some(Value::String("computed".to_string())))
                                },
                                None,
                                None,
                            )
                            .await
                        }));
                    }
                    for h in handles {
                        black_box(h.await.unwrap_or_else(|_| panic!("task panicked")));
                    }
                });
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_cache_hit, bench_coalesced_fan_in);
criterion_main!(benches);
