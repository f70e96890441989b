//! Shared key-value store contract.
//!
//! Four operations, all atomic on the store side:
//!
//! - `incr_with_expiry`: increment a counter, setting its TTL only when the
//!   increment created the key
//! - `get`
//! - `set_with_ttl`
//! - `delete`
//!
//! [`RedisBackend`] talks to a real store shared by every worker process.
//! [`MemoryBackend`] implements the same contract inside one process and is
//! substituted when no store is configured.

mod memory;
mod redis_store;
mod timeout;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::BackendSettings;
use crate::error::BackendError;

pub use memory::MemoryBackend;
pub use redis_store::RedisBackend;
pub use timeout::TimeoutBackend;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Increment the counter at `key` and return the new value.
    ///
    /// When the key did not exist (or had expired) the counter starts at 1 and
    /// expires after `ttl_secs`. An existing key keeps its original expiry.
    async fn incr_with_expiry(&self, key: &str, ttl_secs: u64) -> Result<u64, BackendError>;

    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError>;

    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl_secs: u64)
    -> Result<(), BackendError>;

    async fn delete(&self, key: &str) -> Result<(), BackendError>;

    /// Name used in logs.
    fn name(&self) -> &'static str;
}

/// Build the process-wide backend from settings.
///
/// With a store URL this is a Redis client; without one it is the in-memory
/// fallback. Either way every call is bounded by the configured timeout.
pub fn from_settings(
    settings: &BackendSettings,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn Backend>, BackendError> {
    let inner: Arc<dyn Backend> = match settings.url.as_deref() {
        Some(url) => {
            info!(backend = "redis", "Using shared key-value backend");
            Arc::new(RedisBackend::open(url, settings.key_prefix.clone())?)
        }
        None => {
            warn!(
                backend = "memory",
                hint = "limits and cache entries are not shared between processes",
                "No backend URL configured; using in-memory fallback"
            );
            Arc::new(MemoryBackend::new(clock))
        }
    };

    Ok(Arc::new(TimeoutBackend::new(inner, settings.timeout)))
}
