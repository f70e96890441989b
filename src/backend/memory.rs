use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use time::OffsetDateTime;

use crate::clock::Clock;
use crate::error::BackendError;

use super::Backend;

/// Expired entries are swept after this many writes.
const SWEEP_EVERY_WRITES: u64 = 1024;

#[derive(Debug, Clone)]
enum Value {
    Counter(u64),
    Bytes(Bytes),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: OffsetDateTime,
}

impl Slot {
    fn is_live(&self, now: OffsetDateTime) -> bool {
        now < self.expires_at
    }
}

/// Single-process implementation of the backend contract.
///
/// Every operation is atomic per key through `DashMap`'s shard locks, so
/// concurrent tasks in one process see the same guarantees a shared store
/// gives across processes. Nothing is shared with other processes.
pub struct MemoryBackend {
    entries: DashMap<String, Slot>,
    clock: Arc<dyn Clock>,
    writes: AtomicU64,
}

impl MemoryBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            writes: AtomicU64::new(0),
        }
    }

    /// Drop every expired entry and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn expiry(&self, ttl_secs: u64) -> Result<OffsetDateTime, BackendError> {
        if ttl_secs == 0 {
            return Err(BackendError::protocol("invalid expire time 0"));
        }
        time::Duration::try_from(Duration::from_secs(ttl_secs))
            .ok()
            .and_then(|ttl| self.clock.now().checked_add(ttl))
            .ok_or_else(|| BackendError::protocol("expire time out of range"))
    }

    fn note_write(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_EVERY_WRITES == 0 {
            self.purge_expired();
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn incr_with_expiry(&self, key: &str, ttl_secs: u64) -> Result<u64, BackendError> {
        let now = self.clock.now();
        let fresh = Slot {
            value: Value::Counter(1),
            expires_at: self.expiry(ttl_secs)?,
        };

        let count = match self.entries.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                1
            }
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                if !slot.is_live(now) {
                    *slot = fresh;
                    1
                } else {
                    let next = match &slot.value {
                        Value::Counter(count) => count.saturating_add(1),
                        Value::Bytes(bytes) => parse_counter(bytes)?.saturating_add(1),
                    };
                    slot.value = Value::Counter(next);
                    next
                }
            }
        };

        self.note_write();
        Ok(count)
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        let now = self.clock.now();
        let Some(slot) = self.entries.get(key) else {
            return Ok(None);
        };
        if !slot.is_live(now) {
            drop(slot);
            self.entries.remove_if(key, |_, slot| !slot.is_live(now));
            return Ok(None);
        }

        Ok(Some(match &slot.value {
            Value::Counter(count) => Bytes::from(count.to_string()),
            Value::Bytes(bytes) => bytes.clone(),
        }))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: Bytes,
        ttl_secs: u64,
    ) -> Result<(), BackendError> {
        let slot = Slot {
            value: Value::Bytes(value),
            expires_at: self.expiry(ttl_secs)?,
        };
        self.entries.insert(key.to_string(), slot);
        self.note_write();
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.entries.remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

fn parse_counter(bytes: &Bytes) -> Result<u64, BackendError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|text| text.parse::<u64>().ok())
        .ok_or_else(|| BackendError::protocol("value is not an integer"))
}

#[cfg(test)]
mod tests {
    use crate::clock::ManualClock;

    use super::*;

    fn backend() -> (Arc<ManualClock>, MemoryBackend) {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let backend = MemoryBackend::new(clock.clone());
        (clock, backend)
    }

    #[tokio::test]
    async fn counter_starts_at_one_and_keeps_first_expiry() {
        let (clock, backend) = backend();

        assert_eq!(backend.incr_with_expiry("k", 10).await.unwrap(), 1);
        clock.advance(Duration::from_secs(6));
        // A later increment must not push the expiry out.
        assert_eq!(backend.incr_with_expiry("k", 10).await.unwrap(), 2);
        clock.advance(Duration::from_secs(4));

        assert_eq!(backend.get("k").await.unwrap(), None);
        assert_eq!(backend.incr_with_expiry("k", 10).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn counter_is_readable_as_decimal_bytes() {
        let (_clock, backend) = backend();
        backend.incr_with_expiry("k", 10).await.unwrap();
        backend.incr_with_expiry("k", 10).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(Bytes::from("2")));
    }

    #[tokio::test]
    async fn incr_on_numeric_bytes_continues_the_count() {
        let (_clock, backend) = backend();
        backend
            .set_with_ttl("k", Bytes::from("41"), 60)
            .await
            .unwrap();
        assert_eq!(backend.incr_with_expiry("k", 60).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn incr_on_non_numeric_value_is_a_protocol_error() {
        let (_clock, backend) = backend();
        backend
            .set_with_ttl("k", Bytes::from("<feed/>"), 60)
            .await
            .unwrap();
        let err = backend.incr_with_expiry("k", 60).await.unwrap_err();
        assert!(matches!(err, BackendError::Protocol { .. }));
    }

    #[tokio::test]
    async fn values_vanish_after_ttl() {
        let (clock, backend) = backend();
        backend
            .set_with_ttl("front_page", Bytes::from("<html/>"), 60)
            .await
            .unwrap();

        clock.advance(Duration::from_secs(59));
        assert_eq!(
            backend.get("front_page").await.unwrap(),
            Some(Bytes::from("<html/>"))
        );

        clock.advance(Duration::from_secs(1));
        assert_eq!(backend.get("front_page").await.unwrap(), None);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn delete_is_unconditional() {
        let (_clock, backend) = backend();
        backend.delete("missing").await.unwrap();
        backend
            .set_with_ttl("rss", Bytes::from("<feed/>"), 3600)
            .await
            .unwrap();
        backend.delete("rss").await.unwrap();
        assert_eq!(backend.get("rss").await.unwrap(), None);
    }

    #[tokio::test]
    async fn zero_ttl_is_rejected() {
        let (_clock, backend) = backend();
        assert!(backend.set_with_ttl("k", Bytes::new(), 0).await.is_err());
        assert!(backend.incr_with_expiry("k", 0).await.is_err());
    }

    #[tokio::test]
    async fn out_of_range_ttl_is_rejected() {
        let (_clock, backend) = backend();
        for ttl in [u64::MAX, u64::MAX / 2] {
            let err = backend
                .set_with_ttl("k", Bytes::new(), ttl)
                .await
                .unwrap_err();
            assert!(matches!(err, BackendError::Protocol { .. }));
            assert!(backend.incr_with_expiry("k", ttl).await.is_err());
        }
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn purge_drops_only_expired_entries() {
        let (clock, backend) = backend();
        backend.set_with_ttl("short", Bytes::new(), 5).await.unwrap();
        backend.set_with_ttl("long", Bytes::new(), 500).await.unwrap();

        clock.advance(Duration::from_secs(10));
        assert_eq!(backend.purge_expired(), 1);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let (_clock, backend) = backend();
        let backend = Arc::new(backend);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let backend = Arc::clone(&backend);
            tasks.push(tokio::spawn(async move {
                for _ in 0..250 {
                    backend.incr_with_expiry("hot", 60).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(backend.get("hot").await.unwrap(), Some(Bytes::from("2000")));
    }
}
