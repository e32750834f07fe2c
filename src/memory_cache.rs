// this_file: src/memory_cache.rs

//! In-memory cache of resolved face images.
//!
//! Holds the `FaceImages` each face resolved to, including the "unknown"
//! placeholder for faces that failed. It is an `lru` map guarded by a mutex;
//! an evicted face is simply resolved again through the disk and network
//! tiers the next time it is requested.

use crate::face::FaceImages;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Lightweight stats for observability.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResolvedCacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Bounded map from face id to resolved images.
#[derive(Debug)]
pub struct ResolvedFaceCache {
    inner: Mutex<LruCache<u32, FaceImages>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResolvedFaceCache {
    /// Create a cache holding at most `capacity` faces.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Resolved images for a face id, marking it recently used.
    pub fn get(&self, face_id: u32) -> Option<FaceImages> {
        let hit = self
            .inner
            .lock()
            .expect("resolved face cache mutex poisoned")
            .get(&face_id)
            .cloned();
        match hit {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        hit
    }

    /// Whether a face is cached; does not touch recency or stats.
    pub fn contains(&self, face_id: u32) -> bool {
        self.inner
            .lock()
            .expect("resolved face cache mutex poisoned")
            .contains(&face_id)
    }

    /// Store resolved images, evicting the least recently used face if full.
    pub fn insert(&self, face_id: u32, images: FaceImages) {
        self.inner
            .lock()
            .expect("resolved face cache mutex poisoned")
            .put(face_id, images);
    }

    /// Drop one face.
    pub fn remove(&self, face_id: u32) -> Option<FaceImages> {
        self.inner
            .lock()
            .expect("resolved face cache mutex poisoned")
            .pop(&face_id)
    }

    /// Remove all cached entries.
    pub fn clear(&self) {
        self.inner
            .lock()
            .expect("resolved face cache mutex poisoned")
            .clear();
    }

    /// Current stats.
    pub fn stats(&self) -> ResolvedCacheStats {
        let guard = self.inner.lock().expect("resolved face cache mutex poisoned");
        ResolvedCacheStats {
            entries: guard.len(),
            capacity: guard.cap().get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    fn images() -> FaceImages {
        FaceImages::from_original(RgbaImage::new(8, 8))
    }

    fn cache(capacity: usize) -> ResolvedFaceCache {
        ResolvedFaceCache::new(NonZeroUsize::new(capacity).expect("non-zero"))
    }

    #[test]
    fn stores_and_retrieves_images() {
        let cache = cache(4);
        let stored = images();
        cache.insert(42, stored.clone());
        let hit = cache.get(42).expect("images present");
        assert!(hit.ptr_eq(&stored));
        assert!(cache.get(7).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.capacity, 4);
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = cache(2);
        cache.insert(1, images());
        cache.insert(2, images());
        assert!(cache.get(1).is_some());
        cache.insert(3, images());
        assert!(cache.get(2).is_none(), "2 was least recently used");
        assert!(cache.get(1).is_some());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn clear_and_remove() {
        let cache = cache(2);
        cache.insert(1, images());
        cache.insert(2, images());
        assert!(cache.remove(1).is_some());
        assert_eq!(cache.stats().entries, 1);
        cache.clear();
        assert_eq!(cache.stats().entries, 0);
    }
}
