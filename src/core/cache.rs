//! Process-wide cache of loaded rule sets
//!
//! Tests typically query the same few sources hundreds of times. A
//! [`RuleCache`] is created once per test session and passed by reference to
//! whatever builds [`TestContext`](crate::core::assertions::TestContext)s.
//!
//! Each source name owns a `tokio::sync::OnceCell`. Concurrent first requests
//! for one name run a single load and the rest wait for it; a failed load
//! leaves the cell empty, so the error reaches every waiter without poisoning
//! the cache for later retries or for other sources. Once a cell is filled,
//! lookups only take the map's read lock.

use crate::core::error::Result;
use crate::core::rule_set::RuleSet;
use crate::core::storage;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::OnceCell;
use tracing::debug;

type Cell = Arc<OnceCell<Arc<RuleSet>>>;

#[derive(Debug, Default)]
pub struct RuleCache {
    cells: RwLock<HashMap<String, Cell>>,
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, name: &str) -> Cell {
        if let Some(cell) = self
            .cells
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Arc::clone(cell);
        }
        let mut cells = self.cells.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(cells.entry(name.to_string()).or_default())
    }

    /// Returns the cached rule set for `name`, if it has been loaded.
    pub fn get(&self, name: &str) -> Option<Arc<RuleSet>> {
        self.cells
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .and_then(|cell| cell.get().cloned())
    }

    /// Returns the rule set for `name`, running `load` if it is not cached.
    ///
    /// # Errors
    ///
    /// Returns whatever `load` returns; nothing is cached in that case.
    pub async fn get_or_load<F, Fut>(&self, name: &str, load: F) -> Result<Arc<RuleSet>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RuleSet>>,
    {
        let cell = self.cell(name);
        let rules = cell
            .get_or_try_init(|| async move {
                debug!("rule cache miss for {name}");
                load().await.map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(rules))
    }

    /// Returns the rule set for `name`, loading it from `path` on first use.
    ///
    /// # Errors
    ///
    /// See [`storage::load_rules`].
    pub async fn load_file(&self, name: &str, path: &Path) -> Result<Arc<RuleSet>> {
        self.get_or_load(name, || storage::load_rules(path)).await
    }

    /// Number of sources loaded so far
    pub fn len(&self) -> usize {
        self.cells
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{Error, LoadError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_loads_run_once() {
        let cache = Arc::new(RuleCache::new());
        let loads = Arc::new(AtomicUsize::new(0));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let loads = Arc::clone(&loads);
            tasks.spawn(async move {
                cache
                    .get_or_load("edge", || async {
                        loads.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok::<_, Error>(RuleSet::default())
                    })
                    .await
                    .unwrap()
            });
        }
        let mut results = Vec::new();
        while let Some(res) = tasks.join_next().await {
            results.push(res.unwrap());
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let cache = RuleCache::new();
        let err = cache
            .get_or_load("broken", || async {
                Err::<RuleSet, _>(Error::Load(LoadError::NotFound("broken.json".into())))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Load(LoadError::NotFound(_))));
        assert!(cache.get("broken").is_none());
        assert!(cache.is_empty());

        let rules = cache
            .get_or_load("broken", || async { Ok::<_, Error>(RuleSet::default()) })
            .await
            .unwrap();
        assert!(rules.is_empty());
        assert!(cache.get("broken").is_some());
    }

    #[tokio::test]
    async fn test_sources_are_cached_independently() {
        let cache = RuleCache::new();
        let _ = cache
            .get_or_load("a", || async {
                Err::<RuleSet, _>(Error::Internal("boom".into()))
            })
            .await;
        cache
            .get_or_load("b", || async { Ok::<_, Error>(RuleSet::default()) })
            .await
            .unwrap();
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
    }
}
