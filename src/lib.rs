//! Abuse protection and view caching for a multi-user publishing service.
//!
//! - [`RateLimiter`]: fixed-window counters shared by every worker process
//! - [`CacheStore`]: fetch-or-compute cache with write-driven invalidation
//! - [`RequestGuard`]: named policies the web layer checks before doing work
//!
//! Both sit on a [`Backend`](backend::Backend): a Redis-compatible store when
//! one is configured, an in-process map otherwise. Backend trouble never
//! reaches callers. The limiter lets requests through and the cache computes
//! without storing; both log and count it.

pub mod backend;
pub mod cache;
pub mod clock;
pub mod config;
mod context;
pub mod error;
pub mod guard;
pub mod limiter;
mod lock;
pub mod telemetry;

pub use cache::CacheStore;
pub use context::Gatehouse;
pub use error::{BackendError, ConfigurationError};
pub use guard::{Decision, Identity, RequestGuard};
pub use limiter::{Policy, RateLimiter, Verdict};
