//! Per-order critical sections
//!
//! Operations on the same order id run one at a time; different orders run
//! concurrently. Components expose `*_locked` variants that take an
//! [`OrderGuard`] so a caller already holding the lock (the tracker facade)
//! can chain ledger append, milestone update and sync without re-entering.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Proof that the caller holds the lock for one order.
///
/// Dropping the guard releases the order and frees its map entry when no
/// other task is waiting for it.
pub struct OrderGuard {
    order_id: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: OrderLocks,
}

impl OrderGuard {
    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    /// Whether this guard covers `order_id`
    pub fn covers(&self, order_id: &str) -> bool {
        self.order_id == order_id
    }
}

impl Drop for OrderGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters clone the mutex under the map lock, so a count of one
        // means only the map still refers to it.
        let mut map = self.locks.inner.lock().unwrap_or_else(|e| e.into_inner());
        if map
            .get(&self.order_id)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            map.remove(&self.order_id);
        }
    }
}

/// Keyed async mutexes, cheap to clone.
#[derive(Clone, Default)]
pub struct OrderLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl OrderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `order_id`
    pub async fn lock(&self, order_id: &str) -> OrderGuard {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(order_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        OrderGuard {
            order_id: order_id.to_string(),
            guard: Some(mutex.lock_owned().await),
            locks: self.clone(),
        }
    }

    /// Drop mutexes nobody holds or waits on, such as those left by a
    /// waiter cancelled after the holder released
    pub fn prune(&self) -> usize {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let before = map.len();
        map.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        before - map.len()
    }

    /// Number of order ids with a mutex allocated
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
