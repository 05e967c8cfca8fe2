//! Term lookup cache.
//!
//! Entries record either a found term or a confirmed absence, so a repeated
//! lookup of a missing id never reaches the backend again.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::model::types::Term;

pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry {
    Found(Arc<Term>),
    NotFound,
}

impl CacheEntry {
    pub fn term(&self) -> Option<Arc<Term>> {
        match self {
            Self::Found(t) => Some(Arc::clone(t)),
            Self::NotFound => None,
        }
    }
}

pub struct TermCache {
    inner: Mutex<LruCache<String, CacheEntry>>,
}

impl TermCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.inner.lock().get(key).cloned()
    }

    pub fn put_found(&self, key: impl Into<String>, term: Arc<Term>) {
        self.inner.lock().put(key.into(), CacheEntry::Found(term));
    }

    pub fn put_not_found(&self, key: impl Into<String>) {
        self.inner.lock().put(key.into(), CacheEntry::NotFound);
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TermCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for TermCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.inner.lock();
        f.debug_struct("TermCache")
            .field("len", &guard.len())
            .field("capacity", &guard.cap())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MultiMap;

    fn term(id: &str) -> Arc<Term> {
        let mut fields = MultiMap::new();
        fields.insert("id".to_string(), id.to_string());
        Arc::new(Term::from_fields(fields).unwrap())
    }

    #[test]
    fn distinguishes_absent_from_not_found() {
        let cache = TermCache::new(4);
        assert_eq!(cache.get("id:X"), None);
        cache.put_not_found("id:X");
        assert_eq!(cache.get("id:X"), Some(CacheEntry::NotFound));
        assert_eq!(cache.get("id:X").unwrap().term(), None);
    }

    #[test]
    fn found_entries_share_the_term() {
        let cache = TermCache::new(4);
        let t = term("HP:1");
        cache.put_found("id:HP\\:1", Arc::clone(&t));
        let hit = cache.get("id:HP\\:1").unwrap().term().unwrap();
        assert!(Arc::ptr_eq(&hit, &t));
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = TermCache::new(2);
        cache.put_not_found("a");
        cache.put_not_found("b");
        cache.get("a");
        cache.put_not_found("c");
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_capacity_still_caches_one() {
        let cache = TermCache::new(0);
        cache.put_not_found("a");
        assert_eq!(cache.len(), 1);
    }
}
