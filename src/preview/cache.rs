//! LRU page cache for artifacts rendered from the opened file

use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

use lru::LruCache;

use super::types::Artifact;

/// Base layer: artifacts of the opened file keyed by page index.
///
/// Shared between readers and the lazy render path, so every access goes
/// through an internal lock. Eviction is harmless: a missing page is rendered
/// again on demand.
pub struct BaseCache {
    cache: Mutex<LruCache<usize, Artifact>>,
}

impl BaseCache {
    /// Create a new cache with the given capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    /// Get a cached page, promoting it in the LRU order
    #[must_use]
    pub fn get(&self, page: usize) -> Option<Artifact> {
        self.lock().get(&page).cloned()
    }

    /// Get a cached page without touching the LRU order
    #[must_use]
    pub fn peek(&self, page: usize) -> Option<Artifact> {
        self.lock().peek(&page).cloned()
    }

    #[must_use]
    pub fn contains(&self, page: usize) -> bool {
        self.lock().contains(&page)
    }

    pub fn insert(&self, page: usize, artifact: Artifact) {
        self.lock().put(page, artifact);
    }

    pub fn invalidate_all(&self) {
        self.lock().clear();
    }

    /// Number of cached pages
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<usize, Artifact>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preview::PageSize;

    fn artifact(tag: u8) -> Artifact {
        Artifact::new(vec![tag; 4], PageSize::new(612.0, 792.0))
    }

    #[test]
    fn cache_insert_and_get() {
        let cache = BaseCache::new(10);
        cache.insert(0, artifact(1));

        assert!(cache.contains(0));
        assert_eq!(&cache.get(0).expect("cached").bytes[..], &[1, 1, 1, 1]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_lru_eviction() {
        let cache = BaseCache::new(2);

        for i in 0..3 {
            cache.insert(i, artifact(i as u8));
        }

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(0));
        assert!(cache.contains(1));
        assert!(cache.contains(2));
    }

    #[test]
    fn peek_does_not_promote() {
        let cache = BaseCache::new(2);
        cache.insert(0, artifact(0));
        cache.insert(1, artifact(1));

        let _ = cache.peek(0);
        cache.insert(2, artifact(2));

        assert!(!cache.contains(0));
    }

    #[test]
    fn cache_invalidate_all() {
        let cache = BaseCache::new(10);

        for i in 0..5 {
            cache.insert(i, artifact(i as u8));
        }

        assert_eq!(cache.len(), 5);
        cache.invalidate_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_capacity_falls_back_to_one() {
        let cache = BaseCache::new(0);
        assert_eq!(cache.capacity(), 1);
    }
}
