//! Named TTL locks over a `MetadataStore`.
//!
//! A lock is the only cross-process mutual exclusion for a named resource.
//! It is not renewed: the holder must finish within the TTL.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{MetaError, MetaResult};
use crate::store::MetadataStore;

const RETRY_INTERVAL: Duration = Duration::from_millis(20);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

fn owner_token() -> String {
    format!(
        "{}-{}",
        std::process::id(),
        NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)
    )
}

/// Lock factory bound to one store.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn MetadataStore>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    /// Non-blocking acquire. `None` if another owner holds the lock.
    pub async fn try_acquire(&self, key: &str, ttl: Duration) -> MetaResult<Option<LockGuard>> {
        let owner = owner_token();
        if self.store.try_lock(key, &owner, ttl).await? {
            Ok(Some(LockGuard {
                store: Arc::clone(&self.store),
                key: key.to_string(),
                owner,
                released: false,
            }))
        } else {
            Ok(None)
        }
    }

    /// Blocking acquire: retry until the lock is free or `wait` elapses.
    pub async fn acquire(&self, key: &str, ttl: Duration, wait: Duration) -> MetaResult<LockGuard> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(guard) = self.try_acquire(key, ttl).await? {
                return Ok(guard);
            }
            if Instant::now() >= deadline {
                return Err(MetaError::LockHeld(key.to_string()));
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }
}

/// A held lock. Call [`LockGuard::release`]; dropping the guard releases
/// the lock on a background task.
pub struct LockGuard {
    store: Arc<dyn MetadataStore>,
    key: String,
    owner: String,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn release(mut self) -> MetaResult<()> {
        self.released = true;
        self.store.unlock(&self.key, &self.owner).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key, "lock dropped outside a runtime, left to expire");
            return;
        };
        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        let owner = std::mem::take(&mut self.owner);
        handle.spawn(async move {
            if let Err(e) = store.unlock(&key, &owner).await {
                warn!(%key, error = %e, "background unlock failed");
            } else {
                debug!(%key, "lock released on drop");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RedbMetaStore;

    fn locks() -> DistributedLock {
        DistributedLock::new(Arc::new(RedbMetaStore::open_in_memory().unwrap()))
    }

    #[tokio::test]
    async fn second_try_acquire_fails_until_release() {
        let locks = locks();
        let ttl = Duration::from_secs(30);
        let guard = locks.try_acquire("/lock/db/a", ttl).await.unwrap().unwrap();
        assert!(locks.try_acquire("/lock/db/a", ttl).await.unwrap().is_none());

        guard.release().await.unwrap();
        assert!(locks.try_acquire("/lock/db/a", ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn blocking_acquire_waits_for_holder() {
        let locks = locks();
        let ttl = Duration::from_secs(30);
        let guard = locks.try_acquire("/lock/space/d/s", ttl).await.unwrap().unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                locks
                    .acquire("/lock/space/d/s", ttl, Duration::from_secs(5))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(60)).await;
        guard.release().await.unwrap();

        let second = waiter.await.unwrap().unwrap();
        assert_eq!(second.key(), "/lock/space/d/s");
    }

    #[tokio::test]
    async fn blocking_acquire_gives_up_after_wait() {
        let locks = locks();
        let ttl = Duration::from_secs(30);
        let _held = locks.try_acquire("/lock/x", ttl).await.unwrap().unwrap();
        let result = locks.acquire("/lock/x", ttl, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(MetaError::LockHeld(_))));
    }

    #[tokio::test]
    async fn dropped_guard_releases_in_background() {
        let locks = locks();
        let ttl = Duration::from_secs(30);
        {
            let _guard = locks.try_acquire("/lock/y", ttl).await.unwrap().unwrap();
        }
        let again = locks
            .acquire("/lock/y", ttl, Duration::from_secs(2))
            .await;
        assert!(again.is_ok());
    }
}
