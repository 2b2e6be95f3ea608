//! Benchmarks for the write-through tier
//!
//! Requires a live Redis at `REDIS_URL` (defaults to `redis://127.0.0.1:6379`),
//! matching this crate's other Redis-backed benchmarks.

use cachette::config::CacheConfig;
use cachette::events::EventBus;
use cachette::local::LocalTier;
use cachette::remote::RemoteTier;
use cachette::tier::Tier;
use cachette::value::Value;
use cachette::write_through::WriteThroughTier;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn setup() -> (WriteThroughTier, Runtime) {
    let rt = Runtime::new().unwrap_or_else(|_| panic!("failed to create runtime"));
    let tier = rt.block_on(async {
        let config = CacheConfig::default();
        let events = EventBus::new();
        let remote = RemoteTier::connect(&redis_url(), None, &config, events.clone())
            .await
            .unwrap_or_else(|_| panic!("failed to connect to redis"));
        let local = LocalTier::with_config(&config, events.clone());
        WriteThroughTier::new(Arc::new(local), Arc::new(remote), &config, events)
    });
    (tier, rt)
}

/// A key already promoted to the local tier: no Redis round trip.
fn bench_local_hit(c: &mut Criterion) {
    let (tier, rt) = setup();
    rt.block_on(tier.set("bench:wt:warm", &Value::String("v".to_string()), Duration::from_secs(60)));

    c.bench_function("write_through_local_hit", |b| {
        b.iter(|| {
            rt.block_on(async { black_box(tier.get("bench:wt:warm").await) });
        });
    });
}

/// A key present only in Redis: exercises the promote-on-read path,
/// including the TTL-alignment fetch.
fn bench_remote_promotion(c: &mut Criterion) {
    let (tier, rt) = setup();

    c.bench_function("write_through_remote_promotion", |b| {
        b.iter(|| {
            rt.block_on(async {
                let key = format!("bench:wt:remote:{}", rand::random::<u32>());
                tier.set(&key, &Value::String("v".to_string()), Duration::from_secs(60)).await;
                tier.clear_memory().await;
                black_box(tier.get(&key).await)
            });
        });
    });
}

/// Write-through `set`: both tiers written concurrently.
fn bench_set(c: &mut Criterion) {
    let (tier, rt) = setup();

    c.bench_function("write_through_set", |b| {
        b.iter(|| {
            rt.block_on(async {
                let key = format!("bench:wt:set:{}", rand::random::<u32>());
                black_box(tier.set(&key, &Value::String("v".to_string()), Duration::from_secs(60)).await)
            });
        });
    });
}

criterion_group!(benches, bench_local_hit, bench_remote_promotion, bench_set);
criterion_main!(benches);
