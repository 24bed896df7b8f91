//! Per-fingerprint single-flight gate.
//!
//! Concurrent misses on the same file serialize behind one async mutex; the
//! caller that wins computes and stores the result while the others wait and
//! then re-check the cache.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::keys::Fingerprint;

type Slot = Arc<Mutex<()>>;

#[derive(Clone, Default)]
pub struct InFlight {
    slots: Arc<DashMap<Fingerprint, Slot>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other holder owns `key`, then take it.
    pub async fn acquire(&self, key: Fingerprint) -> FlightGuard {
        let slot = Arc::clone(
            self.slots
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let guard = slot.lock_owned().await;
        FlightGuard {
            key,
            slots: Arc::clone(&self.slots),
            guard: Some(guard),
        }
    }

    /// Number of fingerprints with a holder or waiters.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

pub struct FlightGuard {
    key: Fingerprint,
    slots: Arc<DashMap<Fingerprint, Slot>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl FlightGuard {
    pub fn key(&self) -> &Fingerprint {
        &self.key
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let slot = Arc::clone(OwnedMutexGuard::mutex(&guard));
        drop(guard);
        // The map and `slot` hold two references; any more means waiters remain.
        self.slots.remove_if(&self.key, |_, current| {
            Arc::ptr_eq(current, &slot) && Arc::strong_count(current) == 2
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::super::keys::hash_bytes;
    use super::*;

    #[tokio::test]
    async fn guard_release_clears_the_slot() {
        let flights = InFlight::new();
        let guard = flights.acquire(hash_bytes(b"model")).await;
        assert_eq!(flights.len(), 1);
        assert_eq!(guard.key(), &hash_bytes(b"model"));

        drop(guard);
        assert!(flights.is_empty());
    }

    #[tokio::test]
    async fn same_key_holders_run_one_at_a_time() {
        let flights = InFlight::new();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let flights = flights.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                let _guard = flights.acquire(hash_bytes(b"shared")).await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.expect("task should finish");
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(flights.is_empty());
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block_each_other() {
        let flights = InFlight::new();
        let _first = flights.acquire(hash_bytes(b"a")).await;
        let second = tokio::time::timeout(
            Duration::from_millis(500),
            flights.acquire(hash_bytes(b"b")),
        )
        .await;
        assert!(second.is_ok());
    }
}
