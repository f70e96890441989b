use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::BackendError;

use super::Backend;

/// Bounds every call on the wrapped backend.
///
/// A call that outlives the bound is abandoned and reported as
/// [`BackendError::Timeout`], which callers treat exactly like any other
/// backend failure.
pub struct TimeoutBackend {
    inner: Arc<dyn Backend>,
    timeout: Duration,
}

impl TimeoutBackend {
    pub fn new(inner: Arc<dyn Backend>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout {
                op,
                elapsed: self.timeout,
            }),
        }
    }
}

#[async_trait]
impl Backend for TimeoutBackend {
    async fn incr_with_expiry(&self, key: &str, ttl_secs: u64) -> Result<u64, BackendError> {
        self.bounded("incr_with_expiry", self.inner.incr_with_expiry(key, ttl_secs))
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        self.bounded("get", self.inner.get(key)).await
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: Bytes,
        ttl_secs: u64,
    ) -> Result<(), BackendError> {
        self.bounded("set_with_ttl", self.inner.set_with_ttl(key, value, ttl_secs))
            .await
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.bounded("delete", self.inner.delete(key)).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::cache::{CacheConfig, CacheStore};
    use crate::clock::ManualClock;
    use crate::limiter::{Policy, RateLimiter};

    /// Never answers.
    struct Stalled;

    #[async_trait]
    impl Backend for Stalled {
        async fn incr_with_expiry(&self, _key: &str, _ttl: u64) -> Result<u64, BackendError> {
            std::future::pending().await
        }

        async fn get(&self, _key: &str) -> Result<Option<Bytes>, BackendError> {
            std::future::pending().await
        }

        async fn set_with_ttl(&self, _: &str, _: Bytes, _: u64) -> Result<(), BackendError> {
            std::future::pending().await
        }

        async fn delete(&self, _key: &str) -> Result<(), BackendError> {
            std::future::pending().await
        }

        fn name(&self) -> &'static str {
            "stalled"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_calls_become_timeouts() {
        let backend = TimeoutBackend::new(Arc::new(Stalled), Duration::from_millis(250));

        let err = backend.get("rss").await.unwrap_err();
        assert!(matches!(
            err,
            BackendError::Timeout { op: "get", elapsed } if elapsed == Duration::from_millis(250)
        ));

        let err = backend.incr_with_expiry("k", 10).await.unwrap_err();
        assert!(matches!(err, BackendError::Timeout { op: "incr_with_expiry", .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_backend_fails_open_and_computes() {
        let backend: Arc<dyn Backend> = Arc::new(TimeoutBackend::new(
            Arc::new(Stalled),
            Duration::from_millis(250),
        ));

        let limiter = RateLimiter::new(
            Arc::clone(&backend),
            Arc::new(ManualClock::at_unix(1_700_000_000)),
        );
        let policy = Policy::new(1, 10).unwrap();
        assert!(limiter.allow("posting", "user:42", &policy).await);
        assert!(limiter.allow("posting", "user:42", &policy).await);

        let cache = CacheStore::new(backend, CacheConfig::default());
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let body = cache
                .fetch_or_compute("front_page", Duration::from_secs(60), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::io::Error>(Bytes::from_static(b"<ol/>"))
                })
                .await
                .unwrap();
            assert_eq!(body, "<ol/>");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        cache.expire("front_page").await;
    }

    #[test]
    fn name_passes_through() {
        let backend = TimeoutBackend::new(Arc::new(Stalled), Duration::from_millis(1));
        assert_eq!(backend.name(), "stalled");
    }
}
