//! Per-key write serialization.
//!
//! Two writes for the same `(user, module, level)` never run at once: the
//! second caller waits on the first one's guard and then re-reads.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use waypoint_core::{LevelKey, ModuleId, UserId};

/// What a write lock protects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WriteKey {
    /// One level record
    Level(UserId, LevelKey),
    /// One module record
    Module(UserId, ModuleId),
}

/// Map of async locks, one per key in use.
#[derive(Default)]
pub struct WriteLocks {
    locks: Mutex<HashMap<WriteKey, Arc<Mutex<()>>>>,
}

impl WriteLocks {
    /// Empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: WriteKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Entries only referenced by the table are idle.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(key).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of keys with a holder or waiter.
    pub async fn in_use(&self) -> usize {
        let locks = self.locks.lock().await;
        locks.values().filter(|lock| Arc::strong_count(lock) > 1).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use waypoint_core::LevelId;

    fn key() -> WriteKey {
        WriteKey::Level(UserId::new("u"), LevelKey::new(ModuleId(1), LevelId(2)))
    }

    #[tokio::test]
    async fn test_second_writer_waits() {
        let locks = Arc::new(WriteLocks::new());
        let guard = locks.acquire(key()).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(key()).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(locks.in_use().await, 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let locks = WriteLocks::new();
        let _a = locks.acquire(key()).await;
        let _b = locks
            .acquire(WriteKey::Module(UserId::new("u"), ModuleId(1)))
            .await;
        assert_eq!(locks.in_use().await, 2);
    }
}
