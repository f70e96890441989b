use std::sync::Arc;

use crate::backend::{self, Backend};
use crate::cache::{CacheConfig, CacheStore, ContentChange};
use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::error::BackendError;
use crate::guard::RequestGuard;
use crate::limiter::RateLimiter;

/// Per-process handles shared by request handlers.
///
/// Built once at startup and passed through the web layer's state; cloning is
/// cheap and every clone talks to the same backend.
#[derive(Clone)]
pub struct Gatehouse {
    pub limiter: RateLimiter,
    pub cache: CacheStore,
    pub guard: RequestGuard,
    backend: Arc<dyn Backend>,
}

impl Gatehouse {
    /// Wire everything from validated settings using the system clock.
    pub fn from_settings(settings: &Settings) -> Result<Self, BackendError> {
        Self::from_settings_with_clock(settings, Arc::new(SystemClock))
    }

    pub fn from_settings_with_clock(
        settings: &Settings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, BackendError> {
        let backend = backend::from_settings(&settings.backend, Arc::clone(&clock))?;
        Ok(Self::assemble(
            backend,
            clock,
            CacheConfig::from(&settings.cache),
            settings
                .policies
                .iter()
                .map(|(name, policy)| (name.as_str(), *policy)),
        ))
    }

    /// Wire around an existing backend, e.g. a test double.
    pub fn assemble<'a, I>(
        backend: Arc<dyn Backend>,
        clock: Arc<dyn Clock>,
        cache: CacheConfig,
        policies: I,
    ) -> Self
    where
        I: IntoIterator<Item = (&'a str, crate::limiter::Policy)>,
    {
        let limiter = RateLimiter::new(Arc::clone(&backend), clock);
        let guard = RequestGuard::new(limiter.clone(), policies);
        let cache = CacheStore::new(Arc::clone(&backend), cache);
        Self {
            limiter,
            cache,
            guard,
            backend,
        }
    }

    /// Expire every cached view depending on a committed mutation.
    pub async fn content_changed(&self, change: &ContentChange) {
        self.cache.expire_many(change.affected_keys()).await;
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}
