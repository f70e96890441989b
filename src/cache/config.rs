//! Cache configuration.
//!
//! Controls the fetch-or-compute cache via the `[cache]` table of
//! `gatehouse.toml`.

use std::time::Duration;

/// One hour: long enough to rarely fire while invalidation works, short
/// enough to bound staleness when an invalidation is missed.
pub(crate) const DEFAULT_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// When false every fetch runs its builder and nothing is stored.
    pub enabled: bool,
    /// TTL backstop for callers that do not pick their own.
    pub default_ttl: Duration,
    /// Collapse concurrent misses on the same key within this process.
    pub single_flight: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            single_flight: false,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            default_ttl: settings.default_ttl,
            single_flight: settings.single_flight,
        }
    }
}

/// Whole seconds for the backend, rounding up and never below one.
pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl
        .as_secs()
        .saturating_add(u64::from(ttl.subsec_nanos() > 0));
    secs.max(1)
}
