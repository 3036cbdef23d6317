//! Per-story lock port.
//!
//! One story maps to at most one live run. The executor acquires the
//! story's lock before touching state and releases it on every exit path;
//! a refused acquire surfaces as lock contention, never as a queue.

use dashmap::DashMap;
use futures_util::future::BoxFuture;

/// Port for named exclusive locks.
pub trait LockManager: Send + Sync {
    /// Try to acquire the named lock. Returns `false` if it is already held.
    fn acquire<'a>(&'a self, name: &str) -> BoxFuture<'a, bool>;

    /// Release the named lock. Returns `false` if it was not held.
    fn release<'a>(&'a self, name: &str) -> BoxFuture<'a, bool>;
}

/// In-process lock manager backed by a concurrent map.
///
/// Suitable for single-process deployments and tests. Multi-process
/// deployments supply a filesystem- or database-backed implementation.
#[derive(Default)]
pub struct InProcessLockManager {
    held: DashMap<String, ()>,
}

impl InProcessLockManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockManager for InProcessLockManager {
    fn acquire<'a>(&'a self, name: &str) -> BoxFuture<'a, bool> {
        use dashmap::mapref::entry::Entry;

        let name = name.to_string();
        Box::pin(async move {
            match self.held.entry(name) {
                Entry::Occupied(_) => false,
                Entry::Vacant(slot) => {
                    slot.insert(());
                    true
                }
            }
        })
    }

    fn release<'a>(&'a self, name: &str) -> BoxFuture<'a, bool> {
        let name = name.to_string();
        Box::pin(async move { self.held.remove(&name).is_some() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_then_contend_then_release() {
        let locks = InProcessLockManager::new();
        assert!(locks.acquire("story-1").await);
        assert!(!locks.acquire("story-1").await, "second acquire must fail");
        assert!(locks.acquire("story-2").await, "other names are independent");

        assert!(locks.release("story-1").await);
        assert!(locks.acquire("story-1").await, "reacquire after release");
    }

    #[tokio::test]
    async fn test_release_unheld_returns_false() {
        let locks = InProcessLockManager::new();
        assert!(!locks.release("never-held").await);
    }
}
