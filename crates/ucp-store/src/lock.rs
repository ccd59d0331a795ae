use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// In-process per-resource mutual exclusion, shared between the frontend's
/// request path and the worker's `process(msg)` loop (§4.5, §5): both must
/// serialize mutations of the same resource, and neither is the sole owner
/// of that guarantee, so the table lives here rather than inside either
/// crate. One process holds one `ResourceLockTable`, constructed once at
/// startup and handed to both the API router and the worker loop.
///
/// This is advisory, single-process locking only — it does not replace the
/// ETag precondition check, which is what actually protects against
/// concurrent writers across multiple UCP processes.
#[derive(Clone, Default)]
pub struct ResourceLockTable {
    locks: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
}

/// Held for the duration of one critical section; releases the per-resource
/// lock on drop. Does not itself prevent the table entry from being evicted
/// by a concurrent `shrink`, which is fine: a stale entry is just a
/// never-contended mutex that gets garbage-collected next time around.
pub struct ResourceGuard(#[allow(dead_code)] OwnedMutexGuard<()>);

impl ResourceLockTable {
    pub fn new() -> Self {
        ResourceLockTable::default()
    }

    /// Acquires the lock for `key` (typically a [`ucp_domain::ResourceId`]'s
    /// canonical string form), waiting if another caller already holds it.
    pub async fn lock(&self, key: &str) -> ResourceGuard {
        let entry = {
            let mut locks = self.locks.lock().expect("lock table poisoned");
            locks.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        ResourceGuard(entry.lock_owned().await)
    }

    /// Drops table entries with no other live reference, bounding the
    /// table's size once resources stop being touched. Safe to call
    /// periodically from the same sweep that purges expired operations.
    pub fn shrink(&self) {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn same_key_serializes_concurrent_critical_sections() {
        let table = ResourceLockTable::new();
        let counter = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let table = table.clone();
            let counter = counter.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = table.lock("same").await;
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(n, Ordering::SeqCst);
                tokio::task::yield_now().await;
                counter.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let table = ResourceLockTable::new();
        let a = table.lock("a").await;
        let b = table.lock("b").await;
        drop(a);
        drop(b);
    }

    #[tokio::test]
    async fn shrink_drops_unreferenced_entries() {
        let table = ResourceLockTable::new();
        {
            let _guard = table.lock("transient").await;
        }
        table.shrink();
        assert_eq!(table.locks.lock().unwrap().len(), 0);
    }
}
