//! The operation lock table: a keyed mutex used to serialize
//! operations that must not race per resource — per-volume-id for
//! CreateVolume/DeleteVolume/expand, per-snapshot-id for snapshot ops,
//! per-(target, node) for NVMe-oF/iSCSI login/logout, and per-staging-path
//! for stage/unstage.
//!
//! Implemented as a map from key to refcount + mutex: acquiring bumps the
//! refcount and takes the mutex, releasing decrements and drops the entry
//! at zero. This replaces any global lock or per-resource singleton.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct KeyEntry {
    mutex: Arc<tokio::sync::Mutex<()>>,
    refcount: AtomicUsize,
}

pub struct KeyedLockTable<K> {
    entries: Mutex<HashMap<K, Arc<KeyEntry>>>,
}

impl<K> Default for KeyedLockTable<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> KeyedLockTable<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Acquires the lock for `key`, waiting if another caller already holds
    /// it. The returned guard releases and, if it was the last holder,
    /// removes the table entry on drop.
    pub async fn acquire(self: &Arc<Self>, key: K) -> KeyGuard<K> {
        let mutex = {
            let mut map = self.entries.lock().expect("lock table poisoned");
            let entry = map.entry(key.clone()).or_insert_with(|| {
                Arc::new(KeyEntry {
                    mutex: Arc::new(tokio::sync::Mutex::new(())),
                    refcount: AtomicUsize::new(0),
                })
            });
            entry.refcount.fetch_add(1, Ordering::SeqCst);
            entry.mutex.clone()
        };

        let owned = mutex.lock_owned().await;
        KeyGuard {
            table: self.clone(),
            key,
            _owned: owned,
        }
    }

    pub fn active_keys(&self) -> usize {
        self.entries.lock().expect("lock table poisoned").len()
    }

    fn release(&self, key: &K) {
        let mut map = self.entries.lock().expect("lock table poisoned");
        let should_remove = if let Some(entry) = map.get(key) {
            entry.refcount.fetch_sub(1, Ordering::SeqCst) == 1
                && entry.refcount.load(Ordering::SeqCst) == 0
        } else {
            false
        };
        if should_remove {
            map.remove(key);
        }
    }
}

pub struct KeyGuard<K>
where
    K: Eq + Hash + Clone,
{
    table: Arc<KeyedLockTable<K>>,
    key: K,
    _owned: tokio::sync::OwnedMutexGuard<()>,
}

impl<K> Drop for KeyGuard<K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        self.table.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn distinct_keys_proceed_in_parallel() {
        let table: Arc<KeyedLockTable<String>> = Arc::new(KeyedLockTable::new());
        let g1 = table.acquire("vol-a".to_string()).await;
        let g2 = table.acquire("vol-b".to_string()).await;
        // Both acquired without blocking each other.
        drop(g1);
        drop(g2);
    }

    #[tokio::test]
    async fn same_key_serializes_waiters() {
        let table: Arc<KeyedLockTable<String>> = Arc::new(KeyedLockTable::new());
        let order = Arc::new(tokio::sync::Mutex::new(Vec::<u32>::new()));

        let t1 = {
            let table = table.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _g = table.acquire("vol-a".to_string()).await;
                tokio::time::sleep(Duration::from_millis(20)).await;
                order.lock().await.push(1);
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let t2 = {
            let table = table.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _g = table.acquire("vol-a".to_string()).await;
                order.lock().await.push(2);
            })
        };

        t1.await.unwrap();
        t2.await.unwrap();
        assert_eq!(*order.lock().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn entry_is_dropped_when_refcount_reaches_zero() {
        let table: Arc<KeyedLockTable<String>> = Arc::new(KeyedLockTable::new());
        {
            let _g = table.acquire("vol-a".to_string()).await;
            assert_eq!(table.active_keys(), 1);
        }
        assert_eq!(table.active_keys(), 0);
    }
}
