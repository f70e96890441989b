use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-key turnstile for cache misses within one process.
///
/// The first caller for a key passes straight through; later callers wait
/// until it finishes. Workers in other processes are not coordinated.
#[derive(Default, Clone)]
pub(crate) struct InFlight {
    keys: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

pub(crate) struct FlightGuard {
    key: String,
    keys: Arc<DashMap<String, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
    /// True when another computation for the key was running on arrival.
    pub waited: bool,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enter(&self, key: &str) -> FlightGuard {
        let gate = self
            .keys
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let (guard, waited) = match Arc::clone(&gate).try_lock_owned() {
            Ok(guard) => (guard, false),
            Err(_) => (gate.lock_owned().await, true),
        };

        FlightGuard {
            key: key.to_string(),
            keys: Arc::clone(&self.keys),
            guard: Some(guard),
            waited,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.keys.len()
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map still holds the gate once nobody is waiting on it.
        self.keys
            .remove_if(&self.key, |_, gate| Arc::strong_count(gate) == 1);
    }
}
