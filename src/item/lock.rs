//! Per-owner mutation scopes.
//!
//! Tree mutations of one owner run one at a time so a cascade never
//! interleaves with another write touching the same subtree. Different
//! owners proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of per-owner mutexes.
#[derive(Debug, Default)]
pub struct OwnerLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl OwnerLocks {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and hold the mutation scope of an owner.
    pub async fn acquire(&self, owner_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Entries nobody holds or waits on are only referenced by the map.
            locks.retain(|owner, lock| owner == owner_id || Arc::strong_count(lock) > 1);
            Arc::clone(
                locks
                    .entry(owner_id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    /// Number of owners currently tracked.
    pub async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}
