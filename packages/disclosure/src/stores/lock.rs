//! Per-identifier async locks guarding read-modify-write cycles.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use crate::error::{DisclosureError, Result};

/// Default time to wait for a per-identifier lock before retrying.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Registry of per-identifier locks.
///
/// Lock objects are created lazily and never evicted; the identifier space
/// (documents, comparisons) is small enough that this is not a concern.
#[derive(Debug, Default)]
pub(crate) struct LockRegistry {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the lock for `id`, retrying once with jitter on timeout.
    pub async fn acquire(&self, id: &str) -> Result<OwnedMutexGuard<()>> {
        let lock = self.lock_for(id);

        match tokio::time::timeout(ACQUIRE_TIMEOUT, lock.clone().lock_owned()).await {
            Ok(guard) => return Ok(guard),
            Err(_) => warn!(id, "lock acquisition timed out, retrying"),
        }

        // Jitter without a rand dependency: derive from the clock's subsecond part.
        let jitter_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_millis() % 250)
            .unwrap_or(100) as u64;
        tokio::time::sleep(Duration::from_millis(jitter_ms)).await;

        tokio::time::timeout(ACQUIRE_TIMEOUT, lock.lock_owned())
            .await
            .map_err(|_| {
                DisclosureError::Concurrency(format!("could not acquire lock for {id:?}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn locks_are_exclusive_per_identifier() {
        let registry = LockRegistry::new();
        let guard = registry.acquire("doc-1").await.unwrap();

        // A different identifier is not blocked.
        let other = registry.acquire("doc-2").await.unwrap();
        drop(other);

        // The same identifier is blocked until the guard drops.
        let lock = registry.lock_for("doc-1");
        assert!(lock.try_lock().is_err());
        drop(guard);
        assert!(lock.try_lock().is_ok());
    }
}
