//! Error taxonomy for the cache library.
//!
//! Mirrors the split this codebase has always used at its public seams: a
//! narrow `thiserror`-derived enum for anything a caller might want to match
//! on, and `anyhow::Result` everywhere else (bootstrap, examples, glue).

use thiserror::Error;

/// Errors surfaced across tier, lock, and facade boundaries.
///
/// Transport-level failures (`TransportError`) are caught and degraded to
/// absence at the tier boundary rather than returned here — see
/// `RemoteTier::get`/`set`/`get_ttl`. This variant exists so the *cause* can
/// still be logged and, where a caller does propagate it (e.g.
/// `wait_for_replication`), inspected.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Redis connection, stream, timeout, or `READONLY` failure.
    #[error("transport error: {0}")]
    Transport(#[from] redis::RedisError),

    /// Distributed lock acquisition or release failed.
    #[error("lock error: {0}")]
    Lock(String),

    /// Local-tier advisory lock waited past its bound without acquiring.
    #[error("lock timeout acquiring {name} after {waited_ms}ms")]
    LockTimeout { name: String, waited_ms: u64 },

    /// `lock`/`unlock`/`has_lock` called on a tier that doesn't support locking.
    #[error("tier does not support locking")]
    UnsupportedOperation,

    /// Remote tier constructor was given a non-`redis(s)://` URL.
    #[error("invalid redis url: {0}")]
    InvalidUrl(String),

    /// Facade key construction exceeded the configured maximum length.
    #[error("cache key exceeds maximum length of {max} bytes ({actual} bytes)")]
    KeyTooLong { max: usize, actual: usize },

    /// Facade key construction detected a circular reference in the argument list.
    #[error("circular reference detected while building cache key")]
    CircularArgument,

    /// A value outside the codec's representable domain was passed to `encode`.
    #[error("value is not representable by the cache codec")]
    UnsupportedValue,

    /// The computation bound to `get_or_fetch` returned an error.
    #[error("compute failed: {0}")]
    Compute(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type CacheResult<T> = Result<T, CacheError>;
