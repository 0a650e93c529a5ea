use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::identity::{ResolvedTarget, UploadTarget};

/// Registry of per-target locks.
///
/// Entries are held weakly: a target's lock lives exactly as long as some
/// [`TargetGuard`] (or waiter) references it, so the registry does not grow
/// with the number of targets ever seen. The registry mutex itself is only
/// held for the lookup.
#[derive(Default)]
pub struct TargetLocks {
    map: Mutex<HashMap<UploadTarget, Weak<AsyncMutex<()>>>>,
}

/// Proof that the caller holds the lock of one target.
///
/// Every staging, tracking, assembly and reclaim operation takes a guard,
/// so read-modify-write sequences on one target cannot interleave.
pub struct TargetGuard {
    target: ResolvedTarget,
    _lock: OwnedMutexGuard<()>,
}

impl TargetGuard {
    pub fn target(&self) -> &ResolvedTarget {
        &self.target
    }
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `target`.
    pub async fn lock(&self, target: ResolvedTarget) -> TargetGuard {
        let mutex = self.entry(target.target());
        let lock = mutex.lock_owned().await;
        TargetGuard {
            target,
            _lock: lock,
        }
    }

    /// Blocking variant of [`lock`](Self::lock) for synchronous callers.
    ///
    /// Panics when called from inside an async runtime.
    pub fn lock_blocking(&self, target: ResolvedTarget) -> TargetGuard {
        let mutex = self.entry(target.target());
        let lock = mutex.blocking_lock_owned();
        TargetGuard {
            target,
            _lock: lock,
        }
    }

    /// Number of targets whose lock is currently referenced.
    pub fn active(&self) -> usize {
        let map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        map.values().filter(|w| w.strong_count() > 0).count()
    }

    fn entry(&self, key: &UploadTarget) -> Arc<AsyncMutex<()>> {
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = map.get(key).and_then(Weak::upgrade) {
            return existing;
        }

        // Drop entries whose lock is no longer referenced before inserting.
        map.retain(|_, w| w.strong_count() > 0);

        let mutex = Arc::new(AsyncMutex::new(()));
        map.insert(key.clone(), Arc::downgrade(&mutex));
        mutex
    }
}
