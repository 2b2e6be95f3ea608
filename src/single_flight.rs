//! The single-flight coordinator: the heart of the library.
//!
//! Guarantees at-most-one concurrent `compute` per key per process via an
//! in-memory in-flight table, with an optional distributed lock and
//! second-check to extend that guarantee across processes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};

use crate::tier::Tier;
use crate::value::{ErrorValue, Value};

/// A type-erased computation error, boxed at the coordinator boundary so
/// the coordinator itself is not generic over every caller's error type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A predicate deciding whether a thrown error should be cached.
pub type ShouldCacheError = Arc<dyn Fn(&(dyn std::error::Error + Send + Sync)) -> bool + Send + Sync>;

type ComputeOutcome = Result<Option<Value>, Arc<dyn std::error::Error + Send + Sync>>;

/// Internal marker wrapping a previously-cached error object so the
/// in-flight future's otherwise-uniform error channel can carry the
/// "this was a cache hit on an error, not a fresh compute failure"
/// distinction through to the caller.
#[derive(Debug)]
struct CachedErrorMarker(ErrorValue);

impl std::fmt::Display for CachedErrorMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for CachedErrorMarker {}

/// Internal marker carrying a distributed-lock acquisition failure through
/// the in-flight future's error channel, distinguishing it from a
/// `compute` failure so `get_or_fetch` can report `FetchError::Lock`
/// instead of misrepresenting it as a fresh compute error.
#[derive(Debug)]
struct LockFailureMarker(String);

impl std::fmt::Display for LockFailureMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for LockFailureMarker {}

/// The outcome of `get_or_fetch`.
#[derive(Debug)]
pub enum FetchError {
    /// `compute` itself failed (fresh invocation, not a cache hit).
    Compute(Arc<dyn std::error::Error + Send + Sync>),
    /// A previously cached error object was re-read and error-caching is
    /// enabled for this call, so it is re-thrown rather than treated as
    /// absent.
    Cached(ErrorValue),
    /// The distributed lock required to serialize this fetch across
    /// processes could not be acquired. `compute` is never invoked in this
    /// case — proceeding without the lock would defeat the whole point of
    /// requesting it, so the failure is propagated to every attached
    /// waiter instead of silently falling back to per-process-only
    /// semantics.
    Lock(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Compute(e) => write!(f, "{e}"),
            FetchError::Cached(e) => write!(f, "{e}"),
            FetchError::Lock(msg) => write!(f, "{msg}"),
        }
    }
}
impl std::error::Error for FetchError {}

/// The in-memory "in-progress fetch" table keyed by cache key, coupled to
/// one underlying tier.
pub struct SingleFlight<T: Tier + ?Sized + 'static> {
    tier: Arc<T>,
    in_flight: Arc<DashMap<String, Shared<BoxFuture<'static, ComputeOutcome>>>>,
}

impl<T: Tier + ?Sized + 'static> Clone for SingleFlight<T> {
    fn clone(&self) -> Self {
        Self { tier: self.tier.clone(), in_flight: self.in_flight.clone() }
    }
}

impl<T: Tier + ?Sized + 'static> SingleFlight<T> {
    #[must_use]
    pub fn new(tier: Arc<T>) -> Self {
        Self { tier, in_flight: Arc::new(DashMap::new()) }
    }

    #[must_use]
    pub fn tier(&self) -> &Arc<T> {
        &self.tier
    }

    /// `get_or_fetch(key, ttl, compute, lock_ttl, should_cache_error)`.
    ///
    /// `ttl = Duration::ZERO` means "no expiration" when a value is stored.
    /// `lock_ttl`, when given and the tier supports locking, guards the
    /// fetch with a distributed lock named `lock__{key}` for that duration.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
        lock_ttl: Option<Duration>,
        should_cache_error: Option<ShouldCacheError>,
    ) -> Result<Option<Value>, FetchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<Value>, BoxError>> + Send + 'static,
    {
        // Step 1: read-through.
        if let Some(v) = self.tier.get(key).await {
            match v {
                Value::Error(err) if should_cache_error.is_some() => {
                    return Err(FetchError::Cached(err));
                }
                Value::Error(_) => { /* mixed invocation: treat as absent */ }
                other => return Ok(Some(other)),
            }
        }

        // Steps 2 & 3: atomically attach to an existing in-flight future or
        // become the installer that runs the lock/second-check/compute
        // sequence. `DashMap::entry` locks the shard for the duration of
        // this match, so at most one caller per key ever becomes Vacant.
        let shared = match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(slot) => {
                let tier = self.tier.clone();
                let in_flight = self.in_flight.clone();
                let key_owned = key.to_string();
                let should_cache_error = should_cache_error.clone();

                let fut: BoxFuture<'static, ComputeOutcome> = Box::pin(async move {
                    let mut lock_handle = None;

                    if let Some(lt) = lock_ttl {
                        if tier.is_locking_supported() {
                            let lock_name = format!("lock__{key_owned}");
                            match tier.lock(&lock_name, lt).await {
                                Ok(handle) => {
                                    lock_handle = Some(handle);

                                    // Second-check, still inside the critical section.
                                    if let Some(v) = tier.get(&key_owned).await {
                                        let early: Option<ComputeOutcome> = match v {
                                            Value::Error(err) if should_cache_error.is_some() => {
                                                Some(Err(Arc::new(CachedErrorMarker(err))
                                                    as Arc<dyn std::error::Error + Send + Sync>))
                                            }
                                            Value::Error(_) => None,
                                            other => Some(Ok(Some(other))),
                                        };
                                        if let Some(result) = early {
                                            in_flight.remove(&key_owned);
                                            if let Some(h) = lock_handle.take() {
                                                let _ = tier.unlock(h).await;
                                            }
                                            return result;
                                        }
                                    }
                                }
                                Err(e) => {
                                    // Locking was explicitly requested to
                                    // serialize this fetch across processes;
                                    // proceeding to `compute` without it would
                                    // silently drop that guarantee in exactly
                                    // the contention case the lock exists for.
                                    // Abort instead of falling back.
                                    let message =
                                        format!("could not acquire lock {lock_name}: {e}");
                                    tracing::warn!(key = %key_owned, "{message}");
                                    in_flight.remove(&key_owned);
                                    return Err(Arc::new(LockFailureMarker(message))
                                        as Arc<dyn std::error::Error + Send + Sync>);
                                }
                            }
                        }
                    }

                    let compute_result = compute().await;
                    match &compute_result {
                        Ok(Some(v)) => {
                            tier.set(&key_owned, v, ttl).await;
                        }
                        Ok(None) => { /* absence: nothing to store */ }
                        Err(e) => {
                            if let Some(pred) = &should_cache_error {
                                if pred(e.as_ref()) {
                                    // Preserve custom properties (`name`,
                                    // `retryable`, ...) when `compute`'s error
                                    // already is an `ErrorValue`; otherwise
                                    // fall back to a message-only one.
                                    let err_value = match e.downcast_ref::<ErrorValue>() {
                                        Some(existing) => Value::Error(existing.clone()),
                                        None => Value::Error(ErrorValue::new(e.to_string())),
                                    };
                                    tier.set(&key_owned, &err_value, ttl).await;
                                }
                            }
                        }
                    }

                    in_flight.remove(&key_owned);
                    if let Some(h) = lock_handle {
                        let _ = tier.unlock(h).await;
                    }

                    compute_result.map_err(|e| Arc::from(e) as Arc<dyn std::error::Error + Send + Sync>)
                });

                let shared = fut.shared();
                slot.insert(shared.clone());
                shared
            }
        };

        shared.await.map_err(|err| {
            if let Some(marker) = err.downcast_ref::<CachedErrorMarker>() {
                FetchError::Cached(marker.0.clone())
            } else if let Some(marker) = err.downcast_ref::<LockFailureMarker>() {
                FetchError::Lock(marker.0.clone())
            } else {
                FetchError::Compute(err)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalTier;
    use crate::events::EventBus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn coordinator() -> SingleFlight<LocalTier> {
        SingleFlight::new(Arc::new(LocalTier::new(EventBus::new())))
    }

    #[tokio::test]
    async fn concurrent_coalescing_runs_compute_once() {
        let sf = coordinator();
        sf.tier().set("key2", &Value::String("value".to_string()), Duration::ZERO).await;

        let invocations = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..100 {
            let sf = sf.clone();
            let invocations = invocations.clone();
            handles.push(tokio::spawn(async move {
                sf.get_or_fetch(
                    "key",
                    Duration::from_secs(10),
                    move || {
                        let invocations = invocations.clone();
                        async move {
                            invocations.fetch_add(1, Ordering::SeqCst);
                            Ok(Some(Value::String("newvalue".to_string())))
                        }
                    },
                    None,
                    None,
                )
                .await
            }));
        }

        for h in handles {
            let result = h.await.unwrap().unwrap();
            assert_eq!(result, Some(Value::String("newvalue".to_string())));
        }
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn two_key_coalescing_is_independent_per_key() {
        let sf = coordinator();
        let count1 = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..100 {
            let sf = sf.clone();
            let (key, counter, value) = if i % 2 == 0 {
                ("key1", count1.clone(), "newvalue")
            } else {
                ("key2", count2.clone(), "newvaluebis")
            };
            handles.push(tokio::spawn(async move {
                sf.get_or_fetch(
                    key,
                    Duration::from_secs(10),
                    move || {
                        let counter = counter.clone();
                        async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                            Ok(Some(Value::String(value.to_string())))
                        }
                    },
                    None,
                    None,
                )
                .await
            }));
        }
        let mut newvalue_count = 0;
        let mut newvaluebis_count = 0;
        for h in handles {
            match h.await.unwrap().unwrap() {
                Some(Value::String(s)) if s == "newvalue" => newvalue_count += 1,
                Some(Value::String(s)) if s == "newvaluebis" => newvaluebis_count += 1,
                other => panic!("unexpected result {other:?}"),
            }
        }
        assert_eq!(count1.load(Ordering::SeqCst), 1);
        assert_eq!(count2.load(Ordering::SeqCst), 1);
        assert_eq!(newvalue_count, 50);
        assert_eq!(newvaluebis_count, 50);
    }

    #[tokio::test]
    async fn errors_are_not_cached_by_default() {
        let sf = coordinator();
        let invocations = Arc::new(AtomicUsize::new(0));

        for expected in 1..=2 {
            let invocations = invocations.clone();
            let result = sf
                .get_or_fetch(
                    "errkey",
                    Duration::from_secs(10),
                    move || {
                        let invocations = invocations.clone();
                        async move {
                            let n = invocations.fetch_add(1, Ordering::SeqCst) + 1;
                            Err(Box::new(std::io::Error::other(format!("nope {n}"))) as BoxError)
                        }
                    },
                    None,
                    None,
                )
                .await;
            match result {
                Err(FetchError::Compute(e)) => assert_eq!(e.to_string(), format!("nope {expected}")),
                other => panic!("expected a fresh compute error, got {other:?}"),
            }
        }
        assert_eq!(invocations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn errors_are_cached_when_should_cache_error_holds() {
        let sf = coordinator();
        let invocations = Arc::new(AtomicUsize::new(0));
        let always: ShouldCacheError = Arc::new(|_| true);

        let make_compute = |invocations: Arc<AtomicUsize>| {
            move || {
                let invocations = invocations.clone();
                async move {
                    let n = invocations.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(Box::new(std::io::Error::other(format!("nope {n}"))) as BoxError)
                }
            }
        };

        // First call: fresh compute failure.
        let first = sf
            .get_or_fetch(
                "cachederr",
                Duration::from_secs(10),
                make_compute(invocations.clone()),
                None,
                Some(always.clone()),
            )
            .await;
        match first {
            Err(FetchError::Compute(e)) => assert_eq!(e.to_string(), "nope 1"),
            other => panic!("expected a fresh compute error, got {other:?}"),
        }

        // Second call: re-reads the cached error object instead of recomputing.
        let second = sf
            .get_or_fetch(
                "cachederr",
                Duration::from_secs(10),
                make_compute(invocations.clone()),
                None,
                Some(always.clone()),
            )
            .await;
        match second {
            Err(FetchError::Cached(err)) => assert_eq!(err.message, "nope 1"),
            other => panic!("expected a cached error, got {other:?}"),
        }

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn absent_compute_result_is_not_stored() {
        let sf = coordinator();
        let result = sf
            .get_or_fetch(
                "absentkey",
                Duration::from_secs(10),
                || async { Ok(None) },
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(result, None);
        assert_eq!(sf.tier().get("absentkey").await, None);
    }

    #[tokio::test]
    async fn cached_error_preserves_custom_properties() {
        let sf = coordinator();
        let always: ShouldCacheError = Arc::new(|_| true);

        let first = sf
            .get_or_fetch(
                "propkey",
                Duration::from_secs(10),
                || async {
                    Err(Box::new(
                        ErrorValue::new("nope")
                            .with_property("name", Value::String("RetryableError".to_string()))
                            .with_property("retryable", Value::Bool(true))
                            .with_property("myStringProperty", Value::String("abc".to_string())),
                    ) as BoxError)
                },
                None,
                Some(always.clone()),
            )
            .await;
        assert!(matches!(first, Err(FetchError::Compute(_))));

        // Second call re-reads the cached error object; its custom
        // properties must have survived the round trip through the tier.
        let second = sf
            .get_or_fetch(
                "propkey",
                Duration::from_secs(10),
                || async { Err(Box::new(ErrorValue::new("should not run")) as BoxError) },
                None,
                Some(always),
            )
            .await;
        match second {
            Err(FetchError::Cached(err)) => {
                assert_eq!(err.message, "nope");
                assert_eq!(
                    err.properties.get("name"),
                    Some(&Value::String("RetryableError".to_string()))
                );
                assert_eq!(err.properties.get("retryable"), Some(&Value::Bool(true)));
                assert_eq!(
                    err.properties.get("myStringProperty"),
                    Some(&Value::String("abc".to_string()))
                );
            }
            other => panic!("expected a cached error with preserved properties, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn lock_acquisition_failure_aborts_without_running_compute() {
        let sf = coordinator();
        let lock_name = "lock__lockfail";
        // Hold the lock ourselves so the coordinator's own `lock()` call
        // inside `get_or_fetch` cannot acquire it and must time out.
        let held = sf.tier().lock(lock_name, Duration::from_secs(10)).await.unwrap();

        let invocations = Arc::new(AtomicUsize::new(0));
        let invocations_in_compute = invocations.clone();
        let result = tokio::time::timeout(
            Duration::from_secs(3),
            sf.get_or_fetch(
                "lockfail",
                Duration::from_secs(10),
                move || {
                    let invocations = invocations_in_compute.clone();
                    async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        Ok(Some(Value::String("should not run".to_string())))
                    }
                },
                Some(Duration::from_secs(5)),
                None,
            ),
        )
        .await
        .expect("get_or_fetch should not hang past the local tier's bounded lock wait");

        match result {
            Err(FetchError::Lock(_)) => {}
            other => panic!("expected a lock failure, got {other:?}"),
        }
        assert_eq!(invocations.load(Ordering::SeqCst), 0);

        sf.tier().unlock(held).await.unwrap();
    }
}
