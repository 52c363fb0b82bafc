use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-user async locks, created on demand and evicted once idle.
pub struct UserLocks {
    locks: Cache<i64, Arc<Mutex<()>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self {
            locks: Cache::builder()
                .max_capacity(50_000)
                .time_to_idle(Duration::from_secs(600))
                .build(),
        }
    }

    /// Waits until no other task holds the lock for `user_id`.
    pub async fn acquire(&self, user_id: i64) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .get_with(user_id, async { Arc::new(Mutex::new(())) })
            .await;
        lock.lock_owned().await
    }
}

impl Default for UserLocks {
    fn default() -> Self {
        Self::new()
    }
}
