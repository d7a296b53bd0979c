//! The memoized-async-task primitive (§4.1): per-key deduplication of
//! in-flight work, realized as a `Shared<BoxFuture<...>>` stored in a
//! `DashMap`. `DashMap::entry(...).or_insert_with(...)` is the single
//! `get_or_create` chokepoint, so concurrent callers racing to create the
//! same key's entry collapse to one spawn.
//!
//! Errors aren't `Clone` in general, so the cached future's error type is
//! `Arc<EngineError>`. A background watcher removes the entry if the
//! computation fails, so a later caller restarts the work instead of
//! replaying the same failure forever (the "cancel poisons only that
//! attempt" policy, §5).

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};

use crate::error::EngineError;

pub type MemoFuture<V> = Shared<BoxFuture<'static, Result<V, Arc<EngineError>>>>;

/// A registry of at-most-once-per-key async computations.
pub struct TaskRegistry<K, V> {
    tasks: Arc<DashMap<K, MemoFuture<V>>>,
}

impl<K, V> Default for TaskRegistry<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TaskRegistry<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
        }
    }

    /// Look up the shared future for `key`, creating it via `make` if absent.
    /// `make` runs at most once per key, regardless of how many concurrent
    /// callers race to call `get_or_create`.
    pub fn get_or_create<F, Fut>(&self, key: K, make: F) -> MemoFuture<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, EngineError>> + Send + 'static,
    {
        if let Some(existing) = self.tasks.get(&key) {
            return existing.clone();
        }

        let shared = match self.tasks.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => occupied.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let fut = make();
                let boxed: BoxFuture<'static, Result<V, Arc<EngineError>>> =
                    Box::pin(async move { fut.await.map_err(Arc::new) });
                let shared = boxed.shared();
                vacant.insert(shared.clone());
                shared
            }
        };

        let tasks = Arc::clone(&self.tasks);
        let watch_key = key;
        let watch_shared = shared.clone();
        tokio::spawn(async move {
            if watch_shared.await.is_err() {
                tasks.remove(&watch_key);
            }
        });

        shared
    }

    /// Whether `key`'s computation has already completed (success or
    /// failure), without forcing a wait.
    pub fn done(&self, key: &K) -> bool {
        self.tasks.get(key).map(|f| f.peek().is_some()).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn concurrent_callers_share_one_computation() {
        let registry: TaskRegistry<&'static str, u32> = TaskRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));

        let make_fut = {
            let calls = Arc::clone(&calls);
            move || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    Ok::<u32, EngineError>(42)
                }
            }
        };

        let a = registry.get_or_create("k", make_fut.clone());
        let b = registry.get_or_create("k", make_fut);

        let (ra, rb) = tokio::join!(a, b);
        assert_eq!(ra.unwrap(), 42);
        assert_eq!(rb.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn done_is_false_until_awaited_to_completion() {
        let registry: TaskRegistry<&'static str, u32> = TaskRegistry::new();
        let fut = registry.get_or_create("k", || async { Ok::<u32, EngineError>(1) });
        assert!(!registry.done(&"k"));
        let _ = fut.await;
        tokio::task::yield_now().await;
        assert!(registry.done(&"k"));
    }

    #[tokio::test]
    async fn failed_attempt_is_not_cached_forever() {
        let registry: TaskRegistry<&'static str, u32> = TaskRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));

        {
            let calls = Arc::clone(&calls);
            let fut = registry.get_or_create("k", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<u32, EngineError>(EngineError::Other(anyhow::anyhow!("boom")))
            });
            assert!(fut.await.is_err());
        }

        // Give the watcher task a chance to remove the poisoned entry.
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }

        let calls2 = Arc::clone(&calls);
        let fut2 = registry.get_or_create("k", move || async move {
            calls2.fetch_add(1, Ordering::SeqCst);
            Ok::<u32, EngineError>(7)
        });
        assert_eq!(fut2.await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
