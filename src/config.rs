//! Environment-driven configuration bootstrap.
//!
//! Every knob from the external-interfaces section is gathered into one
//! `CacheConfig::from_env()` call site, following this codebase's existing
//! idiom of `std::env::var(..).ok().and_then(|s| s.parse().ok()).unwrap_or(default)`
//! rather than a schema/`.env`-file crate.

use std::time::Duration;

/// Local-tier default capacity (`CACHETTE_LC_MAX_ITEMS`).
pub const DEFAULT_LOCAL_MAX_ITEMS: u64 = 5000;
/// Local-tier default max age in milliseconds (`CACHETTE_LC_MAX_AGE`).
pub const DEFAULT_LOCAL_MAX_AGE_MS: u64 = 1_800_000;
/// Facade key-length cap (`UNITO_CACHE_MAX_KEY_LENGTH`).
pub const DEFAULT_MAX_KEY_LENGTH: usize = 1000;
/// Remote tier reconnection delay.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// `CACHETTE_METRICS_PERIOD_MINUTES` must be a positive integer to enable
/// the write-through metrics timer; anything else (unset, unparsable, zero,
/// negative) leaves metrics disabled. Unlike a missing/unset variable, a
/// *present but invalid* value is surprising enough to warn about.
fn parse_metrics_period() -> Option<u64> {
    match std::env::var("CACHETTE_METRICS_PERIOD_MINUTES") {
        Err(_) => None,
        Ok(raw) => match raw.parse::<u64>() {
            Ok(n) if n > 0 => Some(n),
            _ => {
                tracing::warn!(
                    value = %raw,
                    "CACHETTE_METRICS_PERIOD_MINUTES must be a positive integer; metrics disabled"
                );
                None
            }
        },
    }
}

/// Full environment contract for the cache library, gathered into one struct.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// `CACHE_URL` — Redis URL; only adopted if it begins with `redis://`/`rediss://`.
    pub cache_url: Option<String>,
    /// `CACHETTE_LC_MAX_ITEMS`
    pub local_max_items: u64,
    /// `CACHETTE_LC_MAX_AGE` (ms)
    pub local_max_age: Duration,
    /// `CACHETTE_METRICS_PERIOD_MINUTES` — `None` disables the timer.
    pub metrics_period_minutes: Option<u64>,
    /// `REDIS_CONNECTION_TIMEOUT_MS`
    pub redis_connection_timeout: Duration,
    /// Fixed reconnection delay applied indefinitely by the remote tier.
    pub redis_reconnect_delay: Duration,
    /// `REDLOCK_RETRY_COUNT`
    pub redlock_retry_count: u32,
    /// `REDLOCK_RETRY_DELAY_MS`
    pub redlock_retry_delay: Duration,
    /// `REDLOCK_CLOCK_DRIFT_FACTOR`
    pub redlock_clock_drift_factor: f64,
    /// `REDLOCK_JITTER_MS`
    pub redlock_jitter_ms: u64,
    /// `UNITO_CACHE_MAX_KEY_LENGTH`
    pub max_key_length: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_url: None,
            local_max_items: DEFAULT_LOCAL_MAX_ITEMS,
            local_max_age: Duration::from_millis(DEFAULT_LOCAL_MAX_AGE_MS),
            metrics_period_minutes: None,
            redis_connection_timeout: Duration::from_millis(5000),
            redis_reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            redlock_retry_count: 3,
            redlock_retry_delay: Duration::from_millis(200),
            redlock_clock_drift_factor: 0.01,
            redlock_jitter_ms: 50,
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
        }
    }
}

impl CacheConfig {
    /// Read the whole environment contract in one call.
    #[must_use]
    pub fn from_env() -> Self {
        let default = Self::default();

        let cache_url = std::env::var("CACHE_URL").ok().filter(|url| {
            url.starts_with("redis://") || url.starts_with("rediss://")
        });

        Self {
            cache_url,
            local_max_items: env_parsed("CACHETTE_LC_MAX_ITEMS", default.local_max_items),
            local_max_age: Duration::from_millis(env_parsed(
                "CACHETTE_LC_MAX_AGE",
                DEFAULT_LOCAL_MAX_AGE_MS,
            )),
            metrics_period_minutes: parse_metrics_period(),
            redis_connection_timeout: Duration::from_millis(env_parsed(
                "REDIS_CONNECTION_TIMEOUT_MS",
                5000,
            )),
            redis_reconnect_delay: Duration::from_millis(env_parsed(
                "REDIS_RECONNECT_DELAY_MS",
                DEFAULT_RECONNECT_DELAY_MS,
            )),
            redlock_retry_count: env_parsed("REDLOCK_RETRY_COUNT", default.redlock_retry_count),
            redlock_retry_delay: Duration::from_millis(env_parsed(
                "REDLOCK_RETRY_DELAY_MS",
                200,
            )),
            redlock_clock_drift_factor: env_parsed(
                "REDLOCK_CLOCK_DRIFT_FACTOR",
                default.redlock_clock_drift_factor,
            ),
            redlock_jitter_ms: env_parsed("REDLOCK_JITTER_MS", default.redlock_jitter_ms),
            max_key_length: env_parsed("UNITO_CACHE_MAX_KEY_LENGTH", DEFAULT_MAX_KEY_LENGTH),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env_overrides() {
        let cfg = CacheConfig::default();
        assert_eq!(cfg.local_max_items, 5000);
        assert_eq!(cfg.local_max_age, Duration::from_secs(1800));
        assert_eq!(cfg.max_key_length, 1000);
        assert!(cfg.metrics_period_minutes.is_none());
    }

    #[test]
    fn rejects_non_redis_scheme() {
        std::env::set_var("CACHE_URL", "http://example.com");
        let cfg = CacheConfig::from_env();
        assert!(cfg.cache_url.is_none());
        std::env::remove_var("CACHE_URL");
    }

    #[test]
    fn adopts_rediss_scheme() {
        std::env::set_var("CACHE_URL", "rediss://example.com:6380");
        let cfg = CacheConfig::from_env();
        assert_eq!(cfg.cache_url.as_deref(), Some("rediss://example.com:6380"));
        std::env::remove_var("CACHE_URL");
    }

    #[test]
    fn invalid_metrics_period_leaves_metrics_disabled() {
        std::env::set_var("CACHETTE_METRICS_PERIOD_MINUTES", "0");
        assert!(parse_metrics_period().is_none());
        std::env::set_var("CACHETTE_METRICS_PERIOD_MINUTES", "not-a-number");
        assert!(parse_metrics_period().is_none());
        std::env::set_var("CACHETTE_METRICS_PERIOD_MINUTES", "5");
        assert_eq!(parse_metrics_period(), Some(5));
        std::env::remove_var("CACHETTE_METRICS_PERIOD_MINUTES");
    }
}
