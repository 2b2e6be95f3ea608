//! The uniform contract implemented by the local tier, the remote tier, and
//! the write-through tier that composes them.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CacheError, CacheResult};
use crate::value::Value;

/// Remaining time-to-live for an entry, as returned by `Tier::get_ttl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    NoSuchEntry,
    NonExpiring,
    Remaining(Duration),
}

/// An opaque handle required to release a lock. Bound to a lock name and an
/// owner token the underlying store uses to verify the releaser is the
/// acquirer (so one caller can't release another's lock after its TTL
/// already rotated ownership).
#[derive(Debug, Clone)]
pub struct LockHandle {
    pub name: String,
    pub(crate) token: String,
}

/// A store layer implementing the uniform get/set/delete/lock contract.
///
/// `ttl = Duration::ZERO` means "no expiration" throughout, matching
/// spec.md's `ttlSeconds = 0` convention.
#[async_trait]
pub trait Tier: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;

    /// Returns `true` iff the value was stored.
    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> bool;

    async fn get_ttl(&self, key: &str) -> Ttl;

    async fn delete(&self, key: &str);

    /// Full clear of all persisted entries.
    async fn clear(&self);

    /// Clear only this process's in-memory view (a no-op for tiers with no
    /// local state of their own).
    async fn clear_memory(&self);

    async fn item_count(&self) -> u64;

    fn is_locking_supported(&self) -> bool {
        false
    }

    async fn lock(&self, _name: &str, _ttl: Duration) -> CacheResult<LockHandle> {
        Err(CacheError::UnsupportedOperation)
    }

    async fn unlock(&self, _handle: LockHandle) -> CacheResult<()> {
        Err(CacheError::UnsupportedOperation)
    }

    /// Does any live lock name start with `prefix`?
    async fn has_lock(&self, _prefix: &str) -> CacheResult<bool> {
        Err(CacheError::UnsupportedOperation)
    }

    /// Wait for `replicas` to acknowledge all writes so far, up to `timeout`.
    /// Returns the number of replicas that acknowledged. Tiers with no
    /// replication concept (the local tier) report 0 immediately.
    async fn wait_for_replication(&self, _replicas: usize, _timeout: Duration) -> CacheResult<usize> {
        Ok(0)
    }
}
