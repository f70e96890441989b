//! Behavior when every backend call fails.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use gatehouse::backend::Backend;
use gatehouse::cache::CacheConfig;
use gatehouse::clock::SystemClock;
use gatehouse::guard::POSTING_POLICY;
use gatehouse::{BackendError, Gatehouse, Identity, Policy};

struct Unreachable;

#[async_trait]
impl Backend for Unreachable {
    async fn incr_with_expiry(&self, _key: &str, _ttl_secs: u64) -> Result<u64, BackendError> {
        Err(BackendError::unavailable("connection refused"))
    }

    async fn get(&self, _key: &str) -> Result<Option<Bytes>, BackendError> {
        Err(BackendError::unavailable("connection refused"))
    }

    async fn set_with_ttl(
        &self,
        _key: &str,
        _value: Bytes,
        _ttl_secs: u64,
    ) -> Result<(), BackendError> {
        Err(BackendError::unavailable("connection refused"))
    }

    async fn delete(&self, _key: &str) -> Result<(), BackendError> {
        Err(BackendError::unavailable("connection refused"))
    }

    fn name(&self) -> &'static str {
        "unreachable"
    }
}

fn gatehouse() -> Gatehouse {
    Gatehouse::assemble(
        Arc::new(Unreachable),
        Arc::new(SystemClock),
        CacheConfig::default(),
        [(
            POSTING_POLICY,
            Policy::new(1, 10).expect("valid policy"),
        )],
    )
}

#[tokio::test]
async fn limiter_admits_everything() {
    let gatehouse = gatehouse();
    let user = Identity::User("42".to_string());

    for _ in 0..5 {
        let decision = gatehouse
            .guard
            .check(POSTING_POLICY, &user)
            .await
            .expect("known policy");
        assert!(decision.allowed);
        assert!(decision.retry_after.is_none());
    }
}

#[tokio::test]
async fn cache_computes_every_time() {
    let gatehouse = gatehouse();
    let calls = AtomicUsize::new(0);

    for _ in 0..3 {
        let body = gatehouse
            .cache
            .fetch_or_compute("front_page", Duration::from_secs(60), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(Bytes::from_static(b"<ol/>"))
            })
            .await
            .expect("builder succeeds");
        assert_eq!(body, Bytes::from_static(b"<ol/>"));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn invalidation_failure_is_swallowed() {
    let gatehouse = gatehouse();
    gatehouse.cache.expire("front_page").await;
    gatehouse.cache.expire_many(["post:abcd", "rss"]).await;
}
