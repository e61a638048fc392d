//! Bounded LRU cache for query results.
//!
//! Keys carry everything that affects a result set: query text, `k`, the
//! canonical filter fingerprint, and the effective `ef_search`. Any mutation
//! clears the whole cache — coarse, but it preserves the
//! update-equals-delete-then-add law without fingerprint bookkeeping.

use crate::types::SearchResult;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Composite cache key for one search request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub query: String,
    pub k: usize,
    pub filter_fingerprint: String,
    pub ef_search: usize,
}

/// Thread-safe bounded LRU over shared result vectors.
#[derive(Debug)]
pub struct QueryCache {
    entries: Mutex<LruCache<CacheKey, Arc<Vec<SearchResult>>>>,
}

impl QueryCache {
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries.max(1)).expect("max(1) is non-zero");
        Self {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<Vec<SearchResult>>> {
        self.entries.lock().get(key).cloned()
    }

    pub fn put(&self, key: CacheKey, results: Arc<Vec<SearchResult>>) {
        self.entries.lock().put(key, results);
    }

    /// Drop every entry. Called on any mutation.
    pub fn invalidate_all(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
