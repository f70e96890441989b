//! Fetch-or-compute cache over the shared backend.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::backend::Backend;

use super::config::{CacheConfig, ttl_secs};
use super::flight::InFlight;

pub(crate) const METRIC_CACHE_HIT: &str = "gatehouse_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS: &str = "gatehouse_cache_miss_total";
pub(crate) const METRIC_CACHE_BACKEND_ERROR: &str = "gatehouse_cache_backend_error_total";
pub(crate) const METRIC_CACHE_BUILDER_ERROR: &str = "gatehouse_cache_builder_error_total";

const SOURCE: &str = "cache::store";

enum Lookup<T> {
    Hit(T),
    /// Absent; compute and store.
    Miss,
    /// Backend failed; compute but do not store.
    Bypass,
}

/// Cache of rendered views keyed by caller-chosen strings.
///
/// Entries are immutable: a refresh is `expire` followed by a fetch that
/// recomputes. Freshness comes from writers calling `expire` right after a
/// mutation commits; the TTL only bounds staleness when that is missed.
///
/// Concurrent misses on one key each run the builder and the last store wins,
/// unless single-flight is enabled, in which case misses inside this process
/// are collapsed into one computation.
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn Backend>,
    config: CacheConfig,
    flights: InFlight,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn Backend>, config: CacheConfig) -> Self {
        Self {
            backend,
            config,
            flights: InFlight::new(),
        }
    }

    /// Return the value cached under `key`, or run `builder`, store its output
    /// for `ttl`, and return that.
    ///
    /// A builder error is returned as-is and nothing is stored. Backend errors
    /// never surface: a failed read runs the builder without storing, a failed
    /// write is logged and the computed value is still returned.
    pub async fn fetch_or_compute<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        builder: F,
    ) -> Result<Bytes, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
    {
        self.run(key, ttl, Some, |value: &Bytes| Some(value.clone()), builder)
            .await
    }

    /// [`fetch_or_compute`](Self::fetch_or_compute) with the configured
    /// `cache.default_ttl_seconds`.
    pub async fn fetch_or_compute_default<F, Fut, E>(
        &self,
        key: &str,
        builder: F,
    ) -> Result<Bytes, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
    {
        self.fetch_or_compute(key, self.config.default_ttl, builder)
            .await
    }

    pub async fn fetch_or_compute_json_default<T, F, Fut, E>(
        &self,
        key: &str,
        builder: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.fetch_or_compute_json(key, self.config.default_ttl, builder)
            .await
    }

    /// Typed variant of [`fetch_or_compute`](Self::fetch_or_compute) storing
    /// values as JSON. A stored value that no longer decodes counts as a miss.
    pub async fn fetch_or_compute_json<T, F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        builder: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(
            key,
            ttl,
            |bytes| match serde_json::from_slice(&bytes) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(key, error = %err, "Discarding undecodable cache entry");
                    None
                }
            },
            |value| match serde_json::to_vec(value) {
                Ok(encoded) => Some(Bytes::from(encoded)),
                Err(err) => {
                    warn!(key, error = %err, "Computed value could not be encoded; not caching");
                    None
                }
            },
            builder,
        )
        .await
    }

    /// Remove the entry for `key`. The next fetch is guaranteed to miss.
    pub async fn expire(&self, key: &str) {
        if let Err(err) = self.backend.delete(key).await {
            counter!(METRIC_CACHE_BACKEND_ERROR, "op" => "delete").increment(1);
            warn!(
                key,
                op = "delete",
                target_module = SOURCE,
                error_kind = err.kind(),
                error = %err,
                "Cache invalidation failed; entry lives until its TTL"
            );
        } else {
            debug!(key, "Cache entry expired");
        }
    }

    /// Expire a small set of related keys, e.g. a post and the front page.
    pub async fn expire_many<I, K>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        for key in keys {
            self.expire(key.as_ref()).await;
        }
    }

    async fn run<T, F, Fut, E, D, C>(
        &self,
        key: &str,
        ttl: Duration,
        decode: D,
        encode: C,
        builder: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        D: Fn(Bytes) -> Option<T>,
        C: FnOnce(&T) -> Option<Bytes>,
    {
        if !self.config.enabled {
            return self.build(key, builder).await;
        }

        let mut lookup = self.lookup(key, &decode).await;

        let mut _flight = None;
        if self.config.single_flight && matches!(lookup, Lookup::Miss) {
            let flight = self.flights.enter(key).await;
            if flight.waited {
                // Someone else just computed this key; their result may be stored.
                lookup = self.lookup(key, &decode).await;
            }
            _flight = Some(flight);
        }

        let store = match lookup {
            Lookup::Hit(value) => {
                counter!(METRIC_CACHE_HIT).increment(1);
                return Ok(value);
            }
            Lookup::Miss => {
                counter!(METRIC_CACHE_MISS).increment(1);
                true
            }
            Lookup::Bypass => false,
        };

        let value = self.build(key, builder).await?;

        if store && let Some(bytes) = encode(&value) {
            self.store(key, bytes, ttl).await;
        }

        Ok(value)
    }

    async fn lookup<T, D>(&self, key: &str, decode: &D) -> Lookup<T>
    where
        D: Fn(Bytes) -> Option<T>,
    {
        match self.backend.get(key).await {
            Ok(Some(bytes)) => match decode(bytes) {
                Some(value) => Lookup::Hit(value),
                None => Lookup::Miss,
            },
            Ok(None) => Lookup::Miss,
            Err(err) => {
                counter!(METRIC_CACHE_BACKEND_ERROR, "op" => "get").increment(1);
                warn!(
                    key,
                    op = "get",
                    target_module = SOURCE,
                    error_kind = err.kind(),
                    error = %err,
                    result = "bypass",
                    "Cache read failed; computing without caching"
                );
                Lookup::Bypass
            }
        }
    }

    async fn build<T, F, Fut, E>(&self, key: &str, builder: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let result = builder().await;
        if result.is_err() {
            counter!(METRIC_CACHE_BUILDER_ERROR).increment(1);
            debug!(key, "Cache builder failed; nothing stored");
        }
        result
    }

    async fn store(&self, key: &str, value: Bytes, ttl: Duration) {
        if let Err(err) = self.backend.set_with_ttl(key, value, ttl_secs(ttl)).await {
            counter!(METRIC_CACHE_BACKEND_ERROR, "op" => "set").increment(1);
            warn!(
                key,
                op = "set",
                target_module = SOURCE,
                error_kind = err.kind(),
                error = %err,
                "Cache write failed; returning computed value uncached"
            );
        }
    }
}
