//! Cross-process mutual exclusion on top of a [`LockStore`].

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ports::{LockError, LockStore};

#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn LockStore>,
    prefix: String,
    ttl: Duration,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn LockStore>, prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            ttl,
        }
    }

    /// Order-independent key for an account pair: A->B and B->A share it.
    pub fn account_pair_key(a: Uuid, b: Uuid) -> String {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        format!("transfer:{}:{}", low, high)
    }

    /// Single attempt. A held key yields `LockError::NotAcquired`.
    pub async fn acquire(&self, key: &str) -> Result<LockGuard, LockError> {
        let full_key = format!("{}{}", self.prefix, key);
        let token = Uuid::new_v4().to_string();

        if !self.store.set_if_absent(&full_key, &token, self.ttl).await? {
            return Err(LockError::NotAcquired(full_key));
        }

        debug!(key = %full_key, "Lock acquired");
        Ok(LockGuard {
            store: Arc::clone(&self.store),
            key: full_key,
            token,
            released: false,
        })
    }
}

/// Held lock. Call [`LockGuard::release`] on the normal path; a guard dropped
/// without release (panic, cancelled future) schedules the release on the
/// current runtime, and the TTL covers a crashed process.
#[must_use = "dropping the guard releases the lock"]
pub struct LockGuard {
    store: Arc<dyn LockStore>,
    key: String,
    token: String,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        let result = self.store.release(&self.key, &self.token).await;
        if result.is_ok() {
            debug!(key = %self.key, "Lock released");
        }
        result
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.release(&key, &token).await {
                        warn!(key = %key, error = %e, "Failed to release dropped lock");
                    }
                });
            }
            Err(_) => warn!(key = %key, "Lock dropped outside a runtime, left to expire"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryLockStore;

    fn lock() -> (DistributedLock, Arc<InMemoryLockStore>) {
        let store = Arc::new(InMemoryLockStore::new());
        (
            DistributedLock::new(store.clone(), "lock:", Duration::from_secs(30)),
            store,
        )
    }

    #[test]
    fn test_pair_key_is_order_independent() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(
            DistributedLock::account_pair_key(a, b),
            DistributedLock::account_pair_key(b, a)
        );
    }

    #[tokio::test]
    async fn test_second_acquire_fails_until_release() {
        let (lock, _) = lock();
        let guard = lock.acquire("k").await.unwrap();
        assert_eq!(guard.key(), "lock:k");

        let err = lock.acquire("k").await.err().unwrap();
        assert_eq!(err, LockError::NotAcquired("lock:k".to_string()));

        guard.release().await.unwrap();
        assert!(lock.acquire("k").await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_guard_is_released() {
        let (lock, store) = lock();
        {
            let _guard = lock.acquire("k").await.unwrap();
        }
        // The release runs on a spawned task.
        for _ in 0..10 {
            if !store.is_held("lock:k") {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!store.is_held("lock:k"));
    }
}
