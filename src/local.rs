//! The local tier: a bounded in-process LRU with per-entry TTL, plus an
//! advisory process-scoped lock substrate used when no Redis is configured.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use moka::future::Cache;
use std::time::Instant;
use uuid::Uuid;

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::events::EventBus;
use crate::tier::{LockHandle, Tier, Ttl};
use crate::value::Value;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);
const LOCK_DEFAULT_WAIT: Duration = Duration::from_secs(2);

#[derive(Clone)]
struct StoredEntry {
    value: Value,
    /// `None` means never expires.
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Bounded LRU cache with per-entry TTL and an advisory lock table.
///
/// Capacity bounds eviction (moka's TinyLFU-ish admission policy stands in
/// for exact LRU, per the stated Non-goal on exact LRU semantics below the
/// eviction boundary); expiry is checked on read rather than delegated to
/// moka's own time-to-live, since each entry's TTL is set independently at
/// `set` time.
pub struct LocalTier {
    cache: Cache<String, StoredEntry>,
    locks: DashMap<String, Instant>,
    events: EventBus,
}

impl LocalTier {
    #[must_use]
    pub fn new(events: EventBus) -> Self {
        Self::with_config(&CacheConfig::from_env(), events)
    }

    #[must_use]
    pub fn with_config(config: &CacheConfig, events: EventBus) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.local_max_items)
            .build();
        Self {
            cache,
            locks: DashMap::new(),
            events,
        }
    }

    fn purge_stale_locks(&self) {
        let now = Instant::now();
        self.locks.retain(|_, expires_at| *expires_at > now);
    }
}

#[async_trait]
impl Tier for LocalTier {
    async fn get(&self, key: &str) -> Option<Value> {
        match self.cache.get(key).await {
            Some(entry) if !entry.is_expired() => {
                self.events.emit_get(key, true);
                Some(entry.value)
            }
            Some(_) => {
                self.cache.remove(key).await;
                self.events.emit_get(key, false);
                None
            }
            None => {
                self.events.emit_get(key, false);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> bool {
        let expires_at = if ttl.is_zero() { None } else { Some(Instant::now() + ttl) };
        self.cache
            .insert(
                key.to_string(),
                StoredEntry { value: value.clone(), expires_at },
            )
            .await;
        self.events.emit_set(key);
        true
    }

    async fn get_ttl(&self, key: &str) -> Ttl {
        match self.cache.get(key).await {
            Some(entry) if entry.is_expired() => Ttl::NoSuchEntry,
            Some(entry) => match entry.expires_at {
                None => Ttl::NonExpiring,
                Some(at) => {
                    let now = Instant::now();
                    Ttl::Remaining(at.saturating_duration_since(now))
                }
            },
            None => Ttl::NoSuchEntry,
        }
    }

    async fn delete(&self, key: &str) {
        self.cache.remove(key).await;
        self.events.emit_del(key);
    }

    async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    async fn clear_memory(&self) {
        self.clear().await;
    }

    /// Derived from moka's own `entry_count`, not a hand-rolled counter:
    /// moka never reports capacity-based evictions back to callers, so a
    /// separately maintained counter would drift above the real resident
    /// count once eviction kicks in. `run_pending_tasks` first flushes
    /// moka's internal read/write buffers so the count reflects any
    /// eviction that has happened but not yet been applied.
    async fn item_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    fn is_locking_supported(&self) -> bool {
        true
    }

    /// Polls a stale-purged view every ~10ms until `name` is free, then
    /// inserts a placeholder. Bounded by `LOCK_DEFAULT_WAIT`.
    async fn lock(&self, name: &str, ttl: Duration) -> CacheResult<LockHandle> {
        let deadline = Instant::now() + LOCK_DEFAULT_WAIT;
        loop {
            self.purge_stale_locks();
            let inserted = match self.locks.entry(name.to_string()) {
                Entry::Vacant(slot) => {
                    slot.insert(Instant::now() + ttl);
                    true
                }
                Entry::Occupied(_) => false,
            };
            if inserted {
                return Ok(LockHandle {
                    name: name.to_string(),
                    token: Uuid::new_v4().to_string(),
                });
            }
            if Instant::now() >= deadline {
                return Err(CacheError::LockTimeout {
                    name: name.to_string(),
                    waited_ms: LOCK_DEFAULT_WAIT.as_millis() as u64,
                });
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    async fn unlock(&self, handle: LockHandle) -> CacheResult<()> {
        // An expired handle's placeholder may already be gone or may belong
        // to a new holder; either way releasing is a no-op rather than an
        // error, matching the handle-expiry invariant in the data model.
        self.locks.remove(&handle.name);
        Ok(())
    }

    async fn has_lock(&self, prefix: &str) -> CacheResult<bool> {
        self.purge_stale_locks();
        Ok(self.locks.iter().any(|entry| entry.key().starts_with(prefix)))
    }
}
