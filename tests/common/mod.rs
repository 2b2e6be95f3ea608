//! Common utilities for integration tests
//!
//! Provides a Redis URL helper, unique test key generation, and a
//! ready-to-use write-through tier so each test file doesn't repeat the
//! connection boilerplate.

use cachette::config::CacheConfig;
use cachette::events::EventBus;
use cachette::local::LocalTier;
use cachette::remote::RemoteTier;
use cachette::write_through::WriteThroughTier;
use std::sync::Arc;

/// Get Redis URL from environment or use default
pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Create a test key with a unique suffix to avoid cross-test collisions
pub fn test_key(name: &str) -> String {
    format!("test_{name}_{}", rand::random::<u32>())
}

/// Build a remote tier against the test Redis instance.
pub async fn setup_remote() -> RemoteTier {
    RemoteTier::connect(&redis_url(), None, &CacheConfig::default(), EventBus::new())
        .await
        .expect("failed to connect to redis")
}

/// Build a full local+remote write-through tier against the test Redis instance.
pub async fn setup_write_through() -> WriteThroughTier {
    let config = CacheConfig::default();
    let events = EventBus::new();
    let remote = setup_remote().await;
    let local = LocalTier::with_config(&config, events.clone());
    WriteThroughTier::new(Arc::new(local), Arc::new(remote), &config, events)
}
