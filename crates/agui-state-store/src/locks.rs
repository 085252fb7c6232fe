//! Per-thread write locks.
//!
//! A save is a read-modify-write sequence (load, merge, enforce the thread
//! limit, write). Holding the thread's lock for the whole sequence makes it
//! atomic with respect to every other mutation of the same thread.
//!
//! Entries are removed from the map once no task holds or awaits them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::StorageError;
use crate::StorageResult;

type LockMap = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

#[derive(Debug, Default)]
pub(crate) struct ThreadLocks {
    locks: LockMap,
}

impl ThreadLocks {
    /// Wait for exclusive access to `thread_id`.
    pub(crate) async fn acquire(&self, thread_id: &str) -> StorageResult<ThreadLockGuard<'_>> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| StorageError::poisoned("thread lock map"))?;
            Arc::clone(locks.entry(thread_id.to_string()).or_default())
        };
        let guard = lock.lock_owned().await;
        Ok(ThreadLockGuard {
            guard: Some(guard),
            locks: &self.locks,
            thread_id: thread_id.to_string(),
        })
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}

/// Releases the thread lock on drop and prunes the map entry when idle.
pub(crate) struct ThreadLockGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    locks: &'a LockMap,
    thread_id: String,
}

impl Drop for ThreadLockGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        if let Ok(mut locks) = self.locks.lock() {
            // Only the map still references the mutex: nobody holds or awaits it.
            if locks
                .get(&self.thread_id)
                .is_some_and(|l| Arc::strong_count(l) == 1)
            {
                locks.remove(&self.thread_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_are_pruned_after_release() {
        let locks = ThreadLocks::default();
        {
            let _a = locks.acquire("t1").await.unwrap();
            let _b = locks.acquire("t2").await.unwrap();
            assert_eq!(locks.len(), 2);
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn same_thread_is_exclusive() {
        let locks = Arc::new(ThreadLocks::default());
        let first = locks.acquire("t").await.unwrap();

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _g = locks.acquire("t").await.unwrap();
            })
        };
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        drop(first);
        contender.await.unwrap();
        assert_eq!(locks.len(), 0);
    }
}
