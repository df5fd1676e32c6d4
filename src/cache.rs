//! In-memory page caches.
//!
//! [`DirtyPages`] holds pages modified but not yet persisted, keyed by page
//! number. [`CleanPages`] is an explicitly bounded LRU over page images that
//! have already been written, replacing garbage-collector-driven soft caches
//! with deterministic eviction.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::page::{Page, PageId};

/// Default number of dirty pages that triggers a write-back flush.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 4096;

/// Default capacity of the clean-page cache, in pages.
pub const DEFAULT_CACHE_PAGES: usize = 1024;

/// Map of modified, not-yet-persisted pages.
#[derive(Default)]
pub struct DirtyPages {
    inner: Mutex<BTreeMap<u64, Page>>,
}

impl DirtyPages {
    /// Creates an empty dirty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a page, replacing any previously staged image.
    pub fn insert(&self, page: Page) {
        self.inner.lock().insert(page.id().0, page);
    }

    /// Returns a copy of the staged page image, if any.
    pub fn get(&self, id: PageId) -> Option<Page> {
        self.inner.lock().get(&id.0).cloned()
    }

    /// Number of pages currently staged.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns true when nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Removes and returns every staged page, ordered by page number.
    pub fn take_all(&self) -> BTreeMap<u64, Page> {
        std::mem::take(&mut *self.inner.lock())
    }
}

/// Bounded LRU of clean page images.
pub struct CleanPages {
    inner: Mutex<LruCache<u64, Page>>,
}

impl CleanPages {
    /// Creates a cache bounded to `capacity` pages (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns a copy of the cached page image, refreshing its recency.
    pub fn get(&self, id: PageId) -> Option<Page> {
        self.inner.lock().get(&id.0).cloned()
    }

    /// Caches a clean page image, evicting the least recently used if full.
    pub fn put(&self, page: Page) {
        self.inner.lock().put(page.id().0, page);
    }

    /// Drops any cached image for `id`.
    pub fn remove(&self, id: PageId) {
        self.inner.lock().pop(&id.0);
    }

    /// Drops every cached image.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}
