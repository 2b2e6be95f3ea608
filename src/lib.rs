//! Cachette: a resilient, tiered cache.
//!
//! Three tightly coupled concerns make up the core of this crate:
//!
//! 1. A **single-flight coalescing layer** (`SingleFlight::get_or_fetch`,
//!    [`single_flight`]) guaranteeing at-most-one concurrent origin
//!    computation per key per process, with an optional distributed-lock
//!    second-check extending that guarantee across processes.
//! 2. A **tiered write-through cache** ([`write_through`]) keeping a local
//!    LRU ([`local`]) synchronized with Redis ([`remote`]) under
//!    aligned TTLs, round-tripping values through a codec ([`value`]) for
//!    types Redis cannot represent natively.
//! 3. A **distributed lock prefix index** (`RemoteTier::has_lock`) used both
//!    to serialize expensive computations and as a general advisory
//!    coordination primitive.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use cachette::{CacheConfig, EventBus, build_cache, facade::CacheFacade};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CacheConfig::from_env();
//!     let handle = build_cache(&config, EventBus::new()).await?;
//!     let facade = CacheFacade::new(handle.as_tier(), &config);
//!
//!     let user = facade
//!         .cached(
//!             "getUser",
//!             &[cachette::facade::Arg::Number(1.0)],
//!             std::time::Duration::from_secs(60),
//!             || async { Ok(Some(cachette::Value::String("alice".to_string()))) },
//!             None,
//!             None,
//!         )
//!         .await;
//!     println!("{user:?}");
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod events;
pub mod facade;
pub mod local;
pub mod remote;
pub mod single_flight;
pub mod tier;
pub mod value;
pub mod write_through;

pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
pub use events::{Event, EventBus};
pub use local::LocalTier;
pub use remote::RemoteTier;
pub use single_flight::{FetchError, SingleFlight};
pub use tier::{LockHandle, Tier, Ttl};
pub use value::{ErrorValue, Value};
pub use write_through::WriteThroughTier;

/// Either a bare local tier (no `CACHE_URL` configured) or a full
/// local+remote write-through tier, exposed uniformly as `Arc<dyn Tier>`.
///
/// This is the "lazily-initialized cache instance singleton selected by URL
/// startup logic" from spec.md's source, re-architected per its own
/// guidance: an explicit factory returning a tier, not a module-global.
pub enum CacheHandle {
    Local(Arc<LocalTier>),
    Tiered(Arc<WriteThroughTier>),
}

impl CacheHandle {
    /// A type-erased handle to the chosen tier, ready to hand to a
    /// [`SingleFlight`] coordinator or a [`facade::CacheFacade`].
    #[must_use]
    pub fn as_tier(&self) -> Arc<dyn Tier> {
        match self {
            CacheHandle::Local(l) => l.clone(),
            CacheHandle::Tiered(w) => w.clone(),
        }
    }
}

/// Build a cache from configuration: adopts `config.cache_url` if it
/// parses as a `redis(s)://` URL and connects successfully, otherwise
/// falls back to a bare local tier.
pub async fn build_cache(config: &CacheConfig, events: EventBus) -> CacheResult<CacheHandle> {
    match &config.cache_url {
        Some(url) => {
            let remote = Arc::new(RemoteTier::connect(url, None, config, events.clone()).await?);
            let local = Arc::new(LocalTier::with_config(config, events.clone()));
            Ok(CacheHandle::Tiered(Arc::new(WriteThroughTier::new(local, remote, config, events))))
        }
        None => {
            events.emit_info("no CACHE_URL configured, using local tier only");
            Ok(CacheHandle::Local(Arc::new(LocalTier::with_config(config, events))))
        }
    }
}
