//! The write-through tier: local LRU fronting Redis, TTL-aligned on
//! promotion, with a periodic hit/miss metrics summary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::CacheConfig;
use crate::events::EventBus;
use crate::local::LocalTier;
use crate::remote::RemoteTier;
use crate::tier::{Tier, Ttl};
use crate::value::Value;

#[derive(Default)]
struct Counters {
    local_hits: AtomicU64,
    remote_hits: AtomicU64,
    double_misses: AtomicU64,
}

impl Counters {
    fn reset_and_snapshot(&self) -> (u64, u64, u64) {
        (
            self.local_hits.swap(0, Ordering::Relaxed),
            self.remote_hits.swap(0, Ordering::Relaxed),
            self.double_misses.swap(0, Ordering::Relaxed),
        )
    }
}

/// Composes a local tier (read-through cache) with a remote tier.
///
/// Locking is not supported here — the default `Tier` trait methods already
/// return `UnsupportedOperation`, matching `isLockingSupported -> false`;
/// callers needing locking go to the bare `RemoteTier`.
pub struct WriteThroughTier {
    local: Arc<LocalTier>,
    remote: Arc<RemoteTier>,
    counters: Arc<Counters>,
    events: EventBus,
}

impl WriteThroughTier {
    /// Builds the tier and, if `config.metrics_period_minutes` is set,
    /// spawns the periodic metrics-reporting timer described in spec.md
    /// §4.4. An invalid (zero or unparsable) toggle value is already
    /// filtered out and warned about by `CacheConfig::from_env`, so by the
    /// time it reaches here `None` simply means "disabled".
    #[must_use]
    pub fn new(local: Arc<LocalTier>, remote: Arc<RemoteTier>, config: &CacheConfig, events: EventBus) -> Self {
        let counters = Arc::new(Counters::default());
        if let Some(minutes) = config.metrics_period_minutes {
            let counters = counters.clone();
            let events = events.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(minutes * 60));
                interval.tick().await; // first tick fires immediately; skip it
                loop {
                    interval.tick().await;
                    let (local_hits, remote_hits, double_misses) = counters.reset_and_snapshot();
                    events.emit_info(format!(
                        "cache metrics (last {minutes}m): local_hits={local_hits} remote_hits={remote_hits} double_misses={double_misses}"
                    ));
                }
            });
        }
        Self { local, remote, counters, events }
    }
}

#[async_trait]
impl Tier for WriteThroughTier {
    async fn get(&self, key: &str) -> Option<Value> {
        if let Some(v) = self.local.get(key).await {
            self.counters.local_hits.fetch_add(1, Ordering::Relaxed);
            return Some(v);
        }

        let (value, ttl) = tokio::join!(self.remote.get(key), self.remote.get_ttl(key));
        match value {
            Some(v) => {
                self.counters.remote_hits.fetch_add(1, Ordering::Relaxed);
                let local_ttl = match ttl {
                    Ttl::Remaining(d) => d,
                    Ttl::NonExpiring | Ttl::NoSuchEntry => Duration::ZERO,
                };
                self.local.set(key, &v, local_ttl).await;
                Some(v)
            }
            None => {
                self.counters.double_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> bool {
        let (local_ok, remote_ok) = tokio::join!(
            self.local.set(key, value, ttl),
            self.remote.set(key, value, ttl)
        );
        local_ok && remote_ok
    }

    async fn get_ttl(&self, key: &str) -> Ttl {
        // Routed through whichever tier currently holds the entry; the
        // local copy is authoritative when present since it's fresher
        // (aligned-TTL invariant keeps it no later than the remote one).
        match self.local.get_ttl(key).await {
            Ttl::NoSuchEntry => self.remote.get_ttl(key).await,
            other => other,
        }
    }

    async fn delete(&self, key: &str) {
        self.events.emit_del(key);
        tokio::join!(self.local.delete(key), self.remote.delete(key));
    }

    async fn clear(&self) {
        tokio::join!(self.local.clear(), self.remote.clear());
    }

    async fn clear_memory(&self) {
        // Only the local tier has in-process state to drop; the remote
        // tier's `clear_memory` is already a no-op.
        tokio::join!(self.local.clear_memory(), self.remote.clear_memory());
    }

    /// Sums both tiers' counts. This double-counts any key resident in
    /// both — documented in spec.md §9 as a known, deliberately preserved
    /// characteristic rather than a logical de-duplicated count.
    async fn item_count(&self) -> u64 {
        self.local.item_count().await + self.remote.item_count().await
    }

    async fn wait_for_replication(&self, replicas: usize, timeout: Duration) -> crate::error::CacheResult<usize> {
        self.remote.wait_for_replication(replicas, timeout).await
    }
}
