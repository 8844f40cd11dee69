//! Per-key serialization of expensive computations.
//!
//! A [`ProducerGuard`] makes sure that at most one thread runs a producer for
//! a given key at a time. Threads that arrive while a producer is in flight
//! block until it finishes and then run their own producer, which is
//! expected to find the freshly cached value. The guard never stores results.
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;
use parking_lot::ReentrantMutex;

type KeyLock = Arc<ReentrantMutex<()>>;

/// Lazily created, reference counted critical sections keyed by `K`.
///
/// Locks for different keys are independent. The per-key lock is reentrant:
/// a thread that asks for a key it already holds proceeds instead of
/// deadlocking.
pub struct ProducerGuard<K> {
    locks: Mutex<HashMap<K, KeyLock>>,
}

impl<K> Default for ProducerGuard<K>
where
    K: Eq + Hash + Clone + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> ProducerGuard<K>
where
    K: Eq + Hash + Clone + Debug,
{
    /// Creates a guard with no keys.
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `producer` while holding the lock for `key` and returns whatever
    /// it returns. Failures are not remembered, so a waiting thread that
    /// wakes up after a failed producer runs its own attempt.
    pub fn guard_by_key<T, F>(&self, key: &K, producer: F) -> T
    where
        F: FnOnce() -> T,
    {
        let lease = self.lease(key);
        let _held = match lease.lock.try_lock() {
            Some(held) => held,
            None => {
                trace!("waiting for in-flight producer of {key:?}");
                lease.lock.lock()
            }
        };
        producer()
    }

    /// Number of keys that currently have a live lock.
    pub fn in_flight(&self) -> usize {
        self.locks.lock().len()
    }

    fn lease(&self, key: &K) -> KeyLease<'_, K> {
        let lock = self
            .locks
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(ReentrantMutex::new(())))
            .clone();
        KeyLease {
            guard: self,
            key: key.clone(),
            lock,
        }
    }
}

/// One thread's reference to a key lock. The entry leaves the map when the
/// last lease is dropped.
struct KeyLease<'a, K>
where
    K: Eq + Hash + Clone + Debug,
{
    guard: &'a ProducerGuard<K>,
    key: K,
    lock: KeyLock,
}

impl<K> Drop for KeyLease<'_, K>
where
    K: Eq + Hash + Clone + Debug,
{
    fn drop(&mut self) {
        // Leases are only handed out under the map lock, so with it held a
        // count of two means the map and this lease are the only owners.
        let mut locks = self.guard.locks.lock();
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.key);
        }
    }
}
