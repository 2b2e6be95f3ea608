//! The remote tier: a Redis-backed store with connection supervision,
//! fixed-delay retry, an optional read-replica split, and Redlock-style
//! distributed locking with and without retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use uuid::Uuid;

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::events::EventBus;
use crate::tier::{LockHandle, Tier, Ttl};
use crate::value::{self, Value};

/// `set` bodies larger than this emit a `largeWrite` warning but still write.
const LARGE_WRITE_WARN_BYTES: usize = 100_000;

/// `SET key value NX PX ttl_ms` via a Lua script so acquisition is atomic
/// and records an owner token, mirroring the Redis `SET NX PX` Redlock
/// pattern used throughout the corpus.
const LOCK_SCRIPT: &str = r"
if redis.call('set', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2]) then
    return 1
else
    return 0
end
";

/// Only the owner's token may release a lock, verified and deleted
/// atomically so a stale release can never evict a newer holder.
const UNLOCK_SCRIPT: &str = r"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
";

fn validate_url(url: &str) -> CacheResult<()> {
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        Ok(())
    } else {
        Err(CacheError::InvalidUrl(url.to_string()))
    }
}

/// Retry policy for distributed lock acquisition.
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    count: u32,
    delay: Duration,
    jitter_ms: u64,
}

impl RetryPolicy {
    fn none() -> Self {
        Self { count: 0, delay: Duration::ZERO, jitter_ms: 0 }
    }
}

pub struct RemoteTier {
    writer: ConnectionManager,
    reader: ConnectionManager,
    events: EventBus,
    lock_script: Script,
    unlock_script: Script,
    retry_policy: RetryPolicy,
    no_retry_policy: RetryPolicy,
    ready: Arc<AtomicBool>,
}

impl RemoteTier {
    /// Connect a writer (and, if `replica_url` is given, a distinct
    /// read-only view) to Redis. Rejects non-`redis(s)://` URLs up front.
    pub async fn connect(
        url: &str,
        replica_url: Option<&str>,
        config: &CacheConfig,
        events: EventBus,
    ) -> CacheResult<Self> {
        validate_url(url)?;
        if let Some(r) = replica_url {
            validate_url(r)?;
        }

        let writer_client = Client::open(url).map_err(CacheError::Transport)?;
        let writer = ConnectionManager::new(writer_client).await.map_err(CacheError::Transport)?;

        let reader = match replica_url {
            Some(r) => {
                let client = Client::open(r).map_err(CacheError::Transport)?;
                ConnectionManager::new(client).await.map_err(CacheError::Transport)?
            }
            None => writer.clone(),
        };

        events.emit_info(format!("remote tier connection established ({url})"));

        Ok(Self {
            writer,
            reader,
            events,
            lock_script: Script::new(LOCK_SCRIPT),
            unlock_script: Script::new(UNLOCK_SCRIPT),
            retry_policy: RetryPolicy {
                count: config.redlock_retry_count,
                delay: config.redlock_retry_delay,
                jitter_ms: config.redlock_jitter_ms,
            },
            no_retry_policy: RetryPolicy::none(),
            ready: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Resolves once the connection has entered the `ready` state at least
    /// once. `ConnectionManager` establishes its connection during
    /// construction, so by the time a `RemoteTier` exists it is ready;
    /// this is kept as an explicit, awaitable check for symmetry with the
    /// connection-lifecycle contract in spec.md (`connecting -> ready`).
    pub async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    async fn try_lock_once(&self, name: &str, ttl: Duration) -> CacheResult<Option<LockHandle>> {
        let token = Uuid::new_v4().to_string();
        let mut conn = self.writer.clone();
        let acquired: i64 = self
            .lock_script
            .key(name)
            .arg(&token)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                self.events.emit_warn("lock acquisition failed", Some(e.to_string()));
                CacheError::Lock(e.to_string())
            })?;
        if acquired == 1 {
            Ok(Some(LockHandle { name: name.to_string(), token }))
        } else {
            Ok(None)
        }
    }

    async fn lock_with_policy(&self, name: &str, ttl: Duration, policy: RetryPolicy) -> CacheResult<LockHandle> {
        let mut attempts_left = policy.count + 1;
        loop {
            if let Some(handle) = self.try_lock_once(name, ttl).await? {
                return Ok(handle);
            }
            attempts_left -= 1;
            if attempts_left == 0 {
                self.events.emit_warn(
                    format!("lock acquisition exhausted retries for {name}"),
                    None,
                );
                return Err(CacheError::Lock(format!("could not acquire lock {name}")));
            }
            let jitter = if policy.jitter_ms > 0 {
                rand::thread_rng().gen_range(0..=policy.jitter_ms)
            } else {
                0
            };
            tokio::time::sleep(policy.delay + Duration::from_millis(jitter)).await;
        }
    }
}

#[async_trait]
impl Tier for RemoteTier {
    async fn get(&self, key: &str) -> Option<Value> {
        let mut conn = self.reader.clone();
        match conn.get::<_, Option<String>>(key).await {
            Ok(raw) => {
                let hit = raw.is_some();
                self.events.emit_get(key, hit);
                value::decode(raw.as_deref())
            }
            Err(e) => {
                self.events.emit_warn("get failed", Some(e.to_string()));
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> bool {
        let encoded = value::encode(value);
        if encoded.len() > LARGE_WRITE_WARN_BYTES {
            self.events.emit_warn(
                format!("largeWrite: {key} is {} bytes", encoded.len()),
                None,
            );
        }
        let mut conn = self.writer.clone();
        // Millisecond-precision `SET key val PX ms` rather than `SETEX`
        // (seconds only): the `Tier` trait takes a `Duration`, and callers
        // like the write-through tier's TTL-alignment promotion pass
        // sub-second remainders through here.
        let result: redis::RedisResult<()> = if ttl.is_zero() {
            conn.set(key, encoded).await
        } else {
            conn.pset_ex(key, encoded, ttl.as_millis().max(1) as u64).await
        };
        match result {
            Ok(()) => {
                self.events.emit_set(key);
                true
            }
            Err(e) => {
                self.events.emit_warn("set failed", Some(e.to_string()));
                false
            }
        }
    }

    async fn get_ttl(&self, key: &str) -> Ttl {
        let mut conn = self.reader.clone();
        match conn.pttl::<_, i64>(key).await {
            Ok(-2) | Err(_) => Ttl::NoSuchEntry,
            Ok(-1) => Ttl::NonExpiring,
            Ok(ms) => Ttl::Remaining(Duration::from_millis(ms.max(0) as u64)),
        }
    }

    async fn delete(&self, key: &str) {
        let mut conn = self.writer.clone();
        let _: redis::RedisResult<()> = conn.del(key).await;
        self.events.emit_del(key);
    }

    async fn clear(&self) {
        let mut conn = self.writer.clone();
        let _: redis::RedisResult<()> = redis::cmd("FLUSHDB").query_async(&mut conn).await;
    }

    async fn clear_memory(&self) {
        // The remote tier holds no in-process state to clear.
    }

    async fn item_count(&self) -> u64 {
        let mut conn = self.reader.clone();
        redis::cmd("DBSIZE").query_async(&mut conn).await.unwrap_or(0)
    }

    fn is_locking_supported(&self) -> bool {
        true
    }

    async fn lock(&self, name: &str, ttl: Duration) -> CacheResult<LockHandle> {
        self.lock_with_policy(name, ttl, self.retry_policy).await
    }

    async fn unlock(&self, handle: LockHandle) -> CacheResult<()> {
        let mut conn = self.writer.clone();
        self.unlock_script
            .key(&handle.name)
            .arg(&handle.token)
            .invoke_async::<_, i64>(&mut conn)
            .await
            .map_err(|e| CacheError::Lock(e.to_string()))?;
        Ok(())
    }

    /// Cursor-paginated `SCAN MATCH prefix* COUNT 1000`, short-circuiting on
    /// first match. Cost is linear in database size — callers relying on
    /// this should scope their database accordingly.
    async fn has_lock(&self, prefix: &str) -> CacheResult<bool> {
        let mut conn = self.reader.clone();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(1000)
                .query_async(&mut conn)
                .await
                .map_err(CacheError::Transport)?;
            if !keys.is_empty() {
                return Ok(true);
            }
            if next_cursor == 0 {
                return Ok(false);
            }
            cursor = next_cursor;
        }
    }

    async fn wait_for_replication(&self, replicas: usize, timeout: Duration) -> CacheResult<usize> {
        let mut conn = self.writer.clone();
        let acknowledged: usize = redis::cmd("WAIT")
            .arg(replicas)
            .arg(timeout.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(CacheError::Transport)?;
        self.events.emit_wait(acknowledged);
        Ok(acknowledged)
    }
}

impl RemoteTier {
    /// Acquire a lock without the configured retry policy (used when a
    /// caller wants a single, non-retried attempt).
    pub async fn lock_no_retry(&self, name: &str, ttl: Duration) -> CacheResult<LockHandle> {
        self.lock_with_policy(name, ttl, self.no_retry_policy).await
    }
}
