use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

/// In-process mutexes keyed by normalized identifying value.
///
/// Two resolutions that share an email or phone never run concurrently, so
/// a value seen for the first time yields exactly one new primary. Entries
/// are weak and pruned once the map grows past a threshold.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl KeyedLocks {
    const PRUNE_THRESHOLD: usize = 1024;

    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();

        if locks.len() > Self::PRUNE_THRESHOLD {
            locks.retain(|_, weak| weak.strong_count() > 0);
        }

        if let Some(existing) = locks.get(key).and_then(Weak::upgrade) {
            return existing;
        }

        let lock = Arc::new(Mutex::new(()));
        locks.insert(key.to_owned(), Arc::downgrade(&lock));
        lock
    }

    /// Run `f` while holding the lock of every key.
    /// Keys are locked in sorted order so overlapping key sets cannot deadlock.
    pub fn with_locked<T>(&self, keys: &[String], f: impl FnOnce() -> T) -> T {
        let mut keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        keys.sort_unstable();
        keys.dedup();

        let held: Vec<Arc<Mutex<()>>> = keys.iter().map(|k| self.acquire(k)).collect();
        let _guards: Vec<MutexGuard<'_, ()>> = held.iter().map(|l| l.lock()).collect();
        f()
    }

    /// Number of keys with a live lock.
    #[cfg(test)]
    fn live_keys(&self) -> usize {
        self.locks
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}
