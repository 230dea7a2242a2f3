//! Per-owner structural mutation lock.
//!
//! Create, rename, move and the trash cascades of one owner are serialized
//! through this lock; different owners never contend. Blob store calls are
//! never made while a guard is held.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

/// Map size above which idle entries are pruned.
const PRUNE_THRESHOLD: usize = 1024;

/// Registry of per-owner async mutexes.
#[derive(Debug, Clone, Default)]
pub struct OwnerLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl OwnerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the mutation lock of an owner.
    pub async fn lock(&self, owner_id: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if map.len() > PRUNE_THRESHOLD {
                map.retain(|_, m| Arc::strong_count(m) > 1);
            }
            Arc::clone(map.entry(owner_id.to_string()).or_default())
        };
        mutex.lock_owned().await
    }

    /// Number of owners with a registered lock.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
