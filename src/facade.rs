//! The computation-caching façade: binds a method-like computation to the
//! cache under a key built deterministically from its name and arguments.
//!
//! spec.md also allows a builder-style `bind(compute, policy)` skin instead
//! of method decoration; Rust has no runtime method decorators, so this
//! module exposes the builder shape directly — `cached`/`uncached`/
//! `error_caching` are plain methods taking the computation as a parameter,
//! with the single-flight coordinator as the actual contract underneath.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CacheConfig;
use crate::error::CacheResult;
use crate::single_flight::{BoxError, FetchError, ShouldCacheError, SingleFlight};
use crate::tier::Tier;
use crate::value::{self, Value};

/// An argument to `build_key`. Unlike the dynamically-typed source this is
/// modeled on, there is no variant carrying an arbitrary opaque type — the
/// "reject class instances, only allow plain records/sequences/scalars"
/// policy described as one of spec.md's open questions is therefore
/// enforced structurally by this enum's shape rather than by a runtime
/// check, and a circular argument graph is unconstructible in safe Rust for
/// the same reason (no owned back-references), so `CircularArgument` is
/// unreachable here rather than detected.
#[derive(Debug, Clone)]
pub enum Arg {
    Null,
    Undefined,
    String(String),
    Number(f64),
    Bool(bool),
    Record(BTreeMap<String, Arg>),
    Sequence(Vec<Arg>),
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::String(s.to_string())
    }
}
impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::String(s)
    }
}
impl From<f64> for Arg {
    fn from(n: f64) -> Self {
        Arg::Number(n)
    }
}
impl From<bool> for Arg {
    fn from(b: bool) -> Self {
        Arg::Bool(b)
    }
}

fn render_arg(arg: &Arg) -> String {
    match arg {
        // Recent behavior (spec.md §4.6): null/undefined are preserved as
        // literal tokens rather than filtered out of the key.
        Arg::Null => "null".to_string(),
        Arg::Undefined => "undefined".to_string(),
        Arg::String(s) => s.clone(),
        Arg::Number(n) => value::format_number(*n),
        Arg::Bool(b) => b.to_string(),
        Arg::Record(map) => map
            .iter()
            .map(|(k, v)| format!("{k}-{}", render_arg(v)))
            .collect::<Vec<_>>()
            .join("-"),
        Arg::Sequence(items) => {
            let mut rendered: Vec<String> = items.iter().map(render_arg).collect();
            rendered.sort();
            rendered.join("-")
        }
    }
}

/// Build a deterministic, order-insensitive (for record/sequence shaped
/// arguments) cache key from a function name and its argument list.
pub fn build_key(name: &str, args: &[Arg], max_key_length: usize) -> CacheResult<String> {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(name.to_string());
    parts.extend(args.iter().map(render_arg));
    let key = parts.join("-");
    if key.len() > max_key_length {
        return Err(crate::error::CacheError::KeyTooLong { max: max_key_length, actual: key.len() });
    }
    Ok(key)
}

/// Binds computations to the cache under keys built by `build_key`.
pub struct CacheFacade<T: Tier + ?Sized + 'static> {
    coordinator: SingleFlight<T>,
    max_key_length: usize,
}

impl<T: Tier + ?Sized + 'static> CacheFacade<T> {
    #[must_use]
    pub fn new(tier: Arc<T>, config: &CacheConfig) -> Self {
        Self { coordinator: SingleFlight::new(tier), max_key_length: config.max_key_length }
    }

    /// `cache(ttl, shouldCacheError?)`: the annotated call. Delegates to the
    /// single-flight coordinator under the key `build_key(name, args)`.
    pub async fn cached<F, Fut>(
        &self,
        name: &str,
        args: &[Arg],
        ttl: Duration,
        compute: F,
        lock_ttl: Option<Duration>,
        should_cache_error: Option<ShouldCacheError>,
    ) -> Result<Option<Value>, FacadeError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<Value>, BoxError>> + Send + 'static,
    {
        let key = build_key(name, args, self.max_key_length)?;
        self.coordinator
            .get_or_fetch(&key, ttl, compute, lock_ttl, should_cache_error)
            .await
            .map_err(FacadeError::Fetch)
    }

    /// `errorCaching(name)`: a sibling invocation whose `should_cache_error`
    /// is fixed to the predicate supplied here (typically the same one an
    /// earlier `cached` call for the same `name` was annotated with).
    pub async fn error_caching<F, Fut>(
        &self,
        name: &str,
        args: &[Arg],
        ttl: Duration,
        compute: F,
        should_cache_error: ShouldCacheError,
    ) -> Result<Option<Value>, FacadeError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<Value>, BoxError>> + Send + 'static,
    {
        self.cached(name, args, ttl, compute, None, Some(should_cache_error)).await
    }

    /// `uncached(name)`: bypasses the cache entirely.
    pub async fn uncached<F, Fut>(&self, compute: F) -> Result<Option<Value>, BoxError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<Value>, BoxError>>,
    {
        compute().await
    }

    /// `clearCached(name, ...args)`: deletes the entry.
    pub async fn clear_cached(&self, name: &str, args: &[Arg]) -> CacheResult<()> {
        let key = build_key(name, args, self.max_key_length)?;
        self.coordinator.tier().delete(&key).await;
        Ok(())
    }

    /// `peekCached(name, ...args)`: a tier read without fetching.
    pub async fn peek_cached(&self, name: &str, args: &[Arg]) -> CacheResult<Option<Value>> {
        let key = build_key(name, args, self.max_key_length)?;
        Ok(self.coordinator.tier().get(&key).await)
    }

    pub async fn wait_for_replication(&self, replicas: usize, timeout: Duration) -> CacheResult<usize> {
        self.coordinator.tier().wait_for_replication(replicas, timeout).await
    }
}

/// Errors surfaced at the façade boundary: either `build_key` validation
/// failed, or the underlying fetch did.
#[derive(Debug)]
pub enum FacadeError {
    Key(crate::error::CacheError),
    Fetch(FetchError),
}

impl From<crate::error::CacheError> for FacadeError {
    fn from(e: crate::error::CacheError) -> Self {
        FacadeError::Key(e)
    }
}

impl std::fmt::Display for FacadeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FacadeError::Key(e) => write!(f, "{e}"),
            FacadeError::Fetch(e) => write!(f, "{e}"),
        }
    }
}
impl std::error::Error for FacadeError {}
