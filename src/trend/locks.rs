use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::period::PeriodKey;

/// Held while a period is read and rewritten. Releases the key on drop.
pub type KeyGuard = OwnedMutexGuard<()>;

/// Per-[`PeriodKey`] mutual exclusion.
///
/// Two builds of the same period must not interleave their "read previous
/// period" and "write current period" steps, otherwise one of them may store
/// a delta computed from a stale previous period. Different keys never block
/// each other.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<PeriodKey, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    /// Creates an empty lock map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until `key` is free and locks it.
    pub async fn lock(&self, key: &PeriodKey) -> KeyGuard {
        let lock = {
            let mut locks = self.locks.lock();
            // Entries only referenced by the map have no holder and no waiter.
            locks.retain(|k, l| k == key || Arc::strong_count(l) > 1);
            locks.entry(key.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    /// Returns true if no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
