//! Gatehouse Cache
//!
//! Fetch-or-compute caching of expensive rendered views (front page, feed,
//! post pages) on top of the shared backend.
//!
//! Invalidation is write-driven: after a mutation commits, the writer expires
//! every key whose output depends on it, usually via
//! [`ContentChange::affected_keys`]. The TTL is a backstop only.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! default_ttl_seconds = 3600
//! single_flight = false
//! ```

mod config;
mod flight;
pub mod keys;
mod store;

pub use config::CacheConfig;
pub use keys::{ContentChange, ViewKey};
pub use store::CacheStore;

pub(crate) use config::DEFAULT_TTL_SECS;
pub(crate) use store::{
    METRIC_CACHE_BACKEND_ERROR, METRIC_CACHE_BUILDER_ERROR, METRIC_CACHE_HIT, METRIC_CACHE_MISS,
};
