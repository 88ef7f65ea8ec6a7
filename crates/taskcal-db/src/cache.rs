//! Process-local, per-user cache of task lists.
//!
//! Task enrichment needs the list summary of every task it returns. Rather
//! than joining `task_list` on each read, the whole collection of a user's
//! lists is cached under the user id and filtered in memory.
//!
//! This is a write-through invalidation cache: it is filled lazily on read and
//! evicted on every task-list mutation. There is no time-based expiry, so every
//! mutation path must call [`TaskListCache::invalidate`]. Entries are only
//! coherent within one process; another process keeps serving its own copy
//! until one of its own writes evicts it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::trace;
use uuid::Uuid;

use taskcal_core::{Result, TaskList, TaskListSummary};

/// Shared handle to the cache; clones share state.
#[derive(Clone, Default)]
pub struct TaskListCache {
    inner: Arc<TaskListCacheInner>,
}

#[derive(Default)]
struct TaskListCacheInner {
    entries: RwLock<HashMap<String, Arc<Vec<TaskList>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub entries: usize,
}

impl TaskListCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached lists for a user, counting the hit or miss.
    pub async fn get(&self, user_id: &str) -> Option<Arc<Vec<TaskList>>> {
        let found = self.inner.entries.read().await.get(user_id).cloned();
        let counter = if found.is_some() {
            &self.inner.hits
        } else {
            &self.inner.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        trace!(
            subsystem = "cache",
            component = "task_list",
            user_id,
            hit = found.is_some(),
            "Task list cache lookup"
        );
        found
    }

    /// Store a user's full list collection, replacing any previous entry.
    pub async fn put(&self, user_id: &str, lists: Vec<TaskList>) -> Arc<Vec<TaskList>> {
        let lists = Arc::new(lists);
        self.inner
            .entries
            .write()
            .await
            .insert(user_id.to_string(), Arc::clone(&lists));
        lists
    }

    /// Cached lists, or the result of `load` stored as the new entry.
    pub async fn get_or_load<F, Fut>(&self, user_id: &str, load: F) -> Result<Arc<Vec<TaskList>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<TaskList>>>,
    {
        if let Some(lists) = self.get(user_id).await {
            return Ok(lists);
        }
        let lists = load().await?;
        Ok(self.put(user_id, lists).await)
    }

    /// Evict a user's entry. Called after every task-list mutation.
    pub async fn invalidate(&self, user_id: &str) {
        self.inner.entries.write().await.remove(user_id);
        self.inner.invalidations.fetch_add(1, Ordering::Relaxed);
        trace!(
            subsystem = "cache",
            component = "task_list",
            user_id,
            "Task list cache invalidated"
        );
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        self.inner.entries.write().await.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            invalidations: self.inner.invalidations.load(Ordering::Relaxed),
            entries: self.inner.entries.read().await.len(),
        }
    }
}

/// Summaries of the lists among `lists` whose id is in `ids`.
pub fn select_summaries(lists: &[TaskList], ids: &[Uuid]) -> HashMap<Uuid, TaskListSummary> {
    lists
        .iter()
        .filter(|l| ids.contains(&l.id))
        .map(|l| (l.id, l.summary()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;
    use taskcal_core::new_v7;

    fn list(user: &str, name: &str) -> TaskList {
        let now = Utc::now();
        TaskList {
            id: new_v7(),
            user_id: user.to_string(),
            name: name.to_string(),
            color: "#FF5722".to_string(),
            icon: "list".to_string(),
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_miss_loads_then_hit_serves_from_cache() {
        let cache = TaskListCache::new();
        let load_count = AtomicUsize::new(0);
        let loads = &load_count;

        for _ in 0..3 {
            let lists = cache
                .get_or_load("alice", move || async move {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![list("alice", "General")])
                })
                .await
                .unwrap();
            assert_eq!(lists.len(), 1);
        }

        assert_eq!(load_count.load(Ordering::SeqCst), 1);
        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let cache = TaskListCache::new();
        cache.put("alice", vec![list("alice", "General")]).await;

        cache.invalidate("alice").await;
        assert!(cache.get("alice").await.is_none());

        let lists = cache
            .get_or_load("alice", || async {
                Ok(vec![list("alice", "General"), list("alice", "Work")])
            })
            .await
            .unwrap();
        assert_eq!(lists.len(), 2);
        assert_eq!(cache.stats().await.invalidations, 1);
    }

    #[tokio::test]
    async fn test_entries_are_per_user() {
        let cache = TaskListCache::new();
        cache.put("alice", vec![list("alice", "General")]).await;
        cache.put("bob", vec![list("bob", "General")]).await;

        cache.invalidate("alice").await;
        assert!(cache.get("alice").await.is_none());
        assert!(cache.get("bob").await.is_some());
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let cache = TaskListCache::new();
        let result = cache
            .get_or_load("alice", || async {
                Err(taskcal_core::Error::Internal("store down".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let cache = TaskListCache::new();
        let other = cache.clone();
        cache.put("alice", vec![list("alice", "General")]).await;
        assert!(other.get("alice").await.is_some());
        other.clear().await;
        assert!(cache.get("alice").await.is_none());
    }

    #[test]
    fn test_select_summaries_filters_to_requested_ids() {
        let general = list("alice", "General");
        let work = list("alice", "Work");
        let lists = vec![general.clone(), work.clone()];

        let selected = select_summaries(&lists, &[work.id]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[&work.id].name, "Work");
        assert!(!selected.contains_key(&general.id));
    }
}
