//! Fixed-window request counting over the shared backend.
//!
//! Each `(action, identity)` pair gets one counter per aligned window:
//! `bucket = floor(now / window)`. The counter is created with an expiry of one
//! window, so it dies on its own and is never deleted explicitly.
//!
//! Aligned windows allow a burst of up to twice the limit across a bucket
//! boundary. That is the accepted price for one backend round trip per check.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::clock::Clock;
use crate::error::ConfigurationError;

pub(crate) const METRIC_LIMITER_ALLOWED: &str = "gatehouse_limiter_allowed_total";
pub(crate) const METRIC_LIMITER_REJECTED: &str = "gatehouse_limiter_rejected_total";
pub(crate) const METRIC_LIMITER_FAIL_OPEN: &str = "gatehouse_limiter_fail_open_total";

/// Requests permitted per window. Both values are non-zero by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Policy {
    max_requests: NonZeroU32,
    window_seconds: NonZeroU32,
}

impl Policy {
    pub fn new(max_requests: u32, window_seconds: u32) -> Result<Self, ConfigurationError> {
        let max_requests = NonZeroU32::new(max_requests)
            .ok_or_else(|| ConfigurationError::invalid("max_requests", "must be greater than zero"))?;
        let window_seconds = NonZeroU32::new(window_seconds).ok_or_else(|| {
            ConfigurationError::invalid("window_seconds", "must be greater than zero")
        })?;
        Ok(Self::from_non_zero(max_requests, window_seconds))
    }

    pub const fn from_non_zero(max_requests: NonZeroU32, window_seconds: NonZeroU32) -> Self {
        Self {
            max_requests,
            window_seconds,
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests.get()
    }

    pub fn window_seconds(&self) -> u32 {
        self.window_seconds.get()
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds.get().into())
    }
}

/// Outcome of one counted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub allowed: bool,
    /// Counter value after this request; `None` when the backend failed and the
    /// request was let through uncounted.
    pub count: Option<u64>,
    pub limit: u32,
    /// Time left until the current window closes.
    pub resets_in: Duration,
}

impl Verdict {
    pub fn failed_open(&self) -> bool {
        self.count.is_none()
    }

    pub fn remaining(&self) -> u32 {
        match self.count {
            Some(count) => u64::from(self.limit).saturating_sub(count) as u32,
            None => self.limit,
        }
    }
}

/// Counts requests per `(action, identity)` against a [`Policy`].
///
/// One instance per process, built around the shared backend. The limiter
/// keeps no local state; all coordination is the backend's atomic increment.
#[derive(Clone)]
pub struct RateLimiter {
    backend: Arc<dyn Backend>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(backend: Arc<dyn Backend>, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    /// Record one request and report whether it is within quota.
    ///
    /// Every call consumes a slot, including calls that end up rejected.
    pub async fn allow(&self, action: &str, identity: &str, policy: &Policy) -> bool {
        self.check(action, identity, policy).await.allowed
    }

    /// Like [`allow`](Self::allow) but returns the full verdict.
    pub async fn check(&self, action: &str, identity: &str, policy: &Policy) -> Verdict {
        let now = self.clock.unix_seconds();
        let window = u64::from(policy.window_seconds());
        let bucket = now / window;
        let resets_in = Duration::from_secs(window - now % window);
        let key = counter_key(action, identity, bucket);

        match self.backend.incr_with_expiry(&key, window).await {
            Ok(count) => {
                let allowed = count <= u64::from(policy.max_requests());
                if allowed {
                    counter!(METRIC_LIMITER_ALLOWED, "action" => action.to_owned()).increment(1);
                } else {
                    counter!(METRIC_LIMITER_REJECTED, "action" => action.to_owned()).increment(1);
                    debug!(
                        action,
                        identity,
                        count,
                        limit = policy.max_requests(),
                        "Request over quota"
                    );
                }
                Verdict {
                    allowed,
                    count: Some(count),
                    limit: policy.max_requests(),
                    resets_in,
                }
            }
            Err(err) => {
                counter!(METRIC_LIMITER_FAIL_OPEN, "action" => action.to_owned()).increment(1);
                warn!(
                    action,
                    backend = self.backend.name(),
                    error_kind = err.kind(),
                    error = %err,
                    result = "fail_open",
                    "Rate limit backend failed; allowing request"
                );
                Verdict {
                    allowed: true,
                    count: None,
                    limit: policy.max_requests(),
                    resets_in,
                }
            }
        }
    }
}

fn counter_key(action: &str, identity: &str, bucket: u64) -> String {
    format!("{action}:{identity}:{bucket}")
}
