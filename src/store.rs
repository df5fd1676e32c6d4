//! The record store façade: keyed byte records over one backing file.
//!
//! A [`Store`] owns a [`PagedFile`](crate::paged::PagedFile) and a key tree.
//! Operations on a closed store are quiet no-ops (`false`/`None`) rather than
//! errors; genuinely bad arguments and write attempts on read-only stores do
//! fail.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::cache::{DEFAULT_CACHE_PAGES, DEFAULT_FLUSH_THRESHOLD};
use crate::error::{Result, StoreError};
use crate::header::{DEFAULT_MAX_KEY_SIZE, DEFAULT_PAGE_SIZE};
use crate::key::Key;
use crate::node::Tree;
use crate::page::{PageId, PageStatus};
use crate::paged::PagedFile;
use crate::pool::DEFAULT_POOL_SIZE;

/// Tunables for creating or opening a [`Store`].
///
/// `page_size` and `max_key_size` are fixed at creation; when opening an
/// existing file the on-disk values win.
#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// Size of each page in bytes.
    pub page_size: u32,
    /// Longest key the store accepts, in bytes.
    pub max_key_size: u16,
    /// Number of file descriptors the store may hold open.
    pub pool_size: usize,
    /// Dirty-page count that triggers a write-back flush.
    pub flush_threshold: usize,
    /// Capacity of the clean-page cache, in pages.
    pub cache_pages: usize,
    /// When false, every mutation flushes immediately.
    pub cached: bool,
    /// Open without write access; all mutations fail.
    pub read_only: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_key_size: DEFAULT_MAX_KEY_SIZE,
            pool_size: DEFAULT_POOL_SIZE,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            cache_pages: DEFAULT_CACHE_PAGES,
            cached: true,
            read_only: false,
        }
    }
}

impl StoreOptions {
    /// Sets the page size in bytes.
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the maximum key length in bytes.
    pub fn max_key_size(mut self, max_key_size: u16) -> Self {
        self.max_key_size = max_key_size;
        self
    }

    /// Sets the descriptor pool capacity.
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Sets the dirty-page count that triggers a flush.
    pub fn flush_threshold(mut self, flush_threshold: usize) -> Self {
        self.flush_threshold = flush_threshold;
        self
    }

    /// Sets the clean-page cache capacity.
    pub fn cache_pages(mut self, cache_pages: usize) -> Self {
        self.cache_pages = cache_pages;
        self
    }

    /// Enables or disables write-back caching.
    pub fn cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }

    /// Opens the store read-only.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// Callback invoked for every record during [`Store::accept`].
pub trait RecordVisitor {
    /// Called once per record, in key order.
    fn record(&mut self, key: &Key, page: PageId) -> Result<()>;
}

impl<F> RecordVisitor for F
where
    F: FnMut(&Key, PageId) -> Result<()>,
{
    fn record(&mut self, key: &Key, page: PageId) -> Result<()> {
        self(key, page)
    }
}

struct Inner {
    paged: PagedFile,
    root: PageId,
}

/// A keyed record store backed by a single file.
pub struct Store {
    path: PathBuf,
    live: AtomicBool,
    inner: Mutex<Option<Inner>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Creates a new store file, truncating any existing file at `path`.
    pub fn create(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let paged = PagedFile::create(&path, &options)?;
        let root = Tree::create_root(&paged)?;
        paged.with_header(|h| {
            h.root_page = root;
            h.dirty = true;
        });
        paged.flush()?;
        info!(path = %path.display(), page_size = paged.page_size(), "created store");
        Ok(Self {
            path,
            live: AtomicBool::new(true),
            inner: Mutex::new(Some(Inner { paged, root })),
        })
    }

    /// Opens an existing store file.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let paged = PagedFile::open(&path, &options)?;
        let root = paged.with_header(|h| h.root_page);
        info!(
            path = %path.display(),
            records = paged.with_header(|h| h.record_count),
            read_only = options.read_only,
            "opened store"
        );
        Ok(Self {
            path,
            live: AtomicBool::new(true),
            inner: Mutex::new(Some(Inner { paged, root })),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true while the store is open.
    pub fn is_open(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Runs `f` against the open store, or returns `fallback` when closed.
    fn with_inner<T>(&self, fallback: T, f: impl FnOnce(&Inner) -> Result<T>) -> Result<T> {
        if !self.live.load(Ordering::SeqCst) {
            return Ok(fallback);
        }
        let guard = self.inner.lock();
        match guard.as_ref() {
            Some(inner) => f(inner),
            None => Ok(fallback),
        }
    }

    fn check_key(inner: &Inner, key: &[u8]) -> Result<()> {
        if key.len() > inner.paged.max_key_size() as usize {
            return Err(StoreError::Invalid("key exceeds maximum key size"));
        }
        Ok(())
    }

    /// Stores `value` under `key`, replacing any existing record in place.
    /// Returns false without writing when the key is empty or the store is
    /// closed.
    pub fn add_record(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        if key.is_empty() {
            return Ok(false);
        }
        self.with_inner(false, |inner| {
            inner.paged.ensure_writable()?;
            Self::check_key(inner, key)?;
            let key = Key::new(key);
            let tree = Tree::new(&inner.paged, inner.root);
            match tree.find(&key)? {
                Some(head_id) => {
                    let head = inner.paged.read_page(head_id)?;
                    if head.header.status != PageStatus::Record {
                        return Err(StoreError::Corruption(
                            "tree pointer does not reference a record page",
                        ));
                    }
                    let old_len = head.header.record_len as u64;
                    inner.paged.write_value(head, value)?;
                    inner.paged.with_header(|h| {
                        h.total_bytes = h.total_bytes.saturating_sub(old_len) + value.len() as u64;
                        h.dirty = true;
                    });
                }
                None => {
                    let mut head = inner.paged.get_free_page()?;
                    head.header.status = PageStatus::Record;
                    let head_id = inner.paged.write_value(head, value)?;
                    tree.insert(&key, head_id)?;
                    inner.paged.with_header(|h| {
                        h.record_count += 1;
                        h.total_bytes += value.len() as u64;
                        h.dirty = true;
                    });
                }
            }
            inner.paged.maybe_flush()?;
            Ok(true)
        })
    }

    /// Reads the record stored under `key`. Returns `None` for missing keys,
    /// empty keys, and closed stores.
    pub fn get_record(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if key.is_empty() {
            return Ok(None);
        }
        self.with_inner(None, |inner| {
            Self::check_key(inner, key)?;
            let tree = Tree::new(&inner.paged, inner.root);
            match tree.find(&Key::new(key))? {
                Some(head) => Ok(Some(inner.paged.read_value(head)?)),
                None => Ok(None),
            }
        })
    }

    /// Returns true when a record exists under `key`.
    pub fn contains_record(&self, key: &[u8]) -> Result<bool> {
        if key.is_empty() {
            return Ok(false);
        }
        self.with_inner(false, |inner| {
            Self::check_key(inner, key)?;
            let tree = Tree::new(&inner.paged, inner.root);
            Ok(tree.find(&Key::new(key))?.is_some())
        })
    }

    /// Deletes the record stored under `key`, reclaiming its pages. Returns
    /// false when there was nothing to delete.
    pub fn remove_record(&self, key: &[u8]) -> Result<bool> {
        if key.is_empty() {
            return Ok(false);
        }
        self.with_inner(false, |inner| {
            inner.paged.ensure_writable()?;
            Self::check_key(inner, key)?;
            let tree = Tree::new(&inner.paged, inner.root);
            match tree.remove(&Key::new(key))? {
                Some(head_id) => {
                    let old_len = inner.paged.read_page(head_id)?.header.record_len as u64;
                    inner.paged.free_chain(head_id)?;
                    inner.paged.with_header(|h| {
                        h.record_count = h.record_count.saturating_sub(1);
                        h.total_bytes = h.total_bytes.saturating_sub(old_len);
                        h.dirty = true;
                    });
                    inner.paged.maybe_flush()?;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    /// Re-keys the record under `old` to `new` without copying its value
    /// pages. An existing record under `new` blocks the rename unless
    /// `overwrite` is set, in which case it is deleted.
    pub fn rename_record(&self, old: &[u8], new: &[u8], overwrite: bool) -> Result<bool> {
        if old.is_empty() || new.is_empty() {
            return Ok(false);
        }
        if old == new {
            return self.contains_record(old);
        }
        self.with_inner(false, |inner| {
            inner.paged.ensure_writable()?;
            Self::check_key(inner, old)?;
            Self::check_key(inner, new)?;
            let tree = Tree::new(&inner.paged, inner.root);
            let new_key = Key::new(new);
            let displaced = tree.find(&new_key)?;
            if displaced.is_some() && !overwrite {
                return Ok(false);
            }
            let ptr = match tree.remove(&Key::new(old))? {
                Some(ptr) => ptr,
                None => return Ok(false),
            };
            if let Some(victim) = displaced {
                let old_len = inner.paged.read_page(victim)?.header.record_len as u64;
                tree.remove(&new_key)?;
                inner.paged.free_chain(victim)?;
                inner.paged.with_header(|h| {
                    h.record_count = h.record_count.saturating_sub(1);
                    h.total_bytes = h.total_bytes.saturating_sub(old_len);
                });
            }
            tree.insert(&new_key, ptr)?;
            inner.paged.with_header(|h| h.dirty = true);
            inner.paged.maybe_flush()?;
            Ok(true)
        })
    }

    /// Number of records currently stored; zero when closed.
    pub fn record_count(&self) -> Result<u64> {
        self.with_inner(0, |inner| Ok(inner.paged.with_header(|h| h.record_count)))
    }

    /// Cumulative logical payload bytes across all records; zero when closed.
    pub fn total_bytes(&self) -> Result<u64> {
        self.with_inner(0, |inner| Ok(inner.paged.with_header(|h| h.total_bytes)))
    }

    /// Walks every record in key order, invoking `visitor` once per record.
    /// Returns false when the walk was cut short by the store closing.
    pub fn accept<V: RecordVisitor + ?Sized>(&self, visitor: &mut V) -> Result<bool> {
        self.with_inner(false, |inner| {
            let tree = Tree::new(&inner.paged, inner.root);
            tree.visit(visitor, &self.live)
        })
    }

    /// Writes all dirty pages out. A no-op on closed stores.
    pub fn flush(&self) -> Result<()> {
        self.with_inner((), |inner| inner.paged.flush())
    }

    /// Flushes and closes the store. Further operations become quiet no-ops.
    /// Flush failures during close are logged, not returned; teardown always
    /// completes.
    pub fn close(&self) {
        if !self.live.swap(false, Ordering::SeqCst) {
            return;
        }
        let inner = self.inner.lock().take();
        if let Some(inner) = inner {
            if let Err(err) = inner.paged.flush() {
                warn!(error = %err, "flush during close failed");
            }
            inner.paged.close();
            info!(path = %self.path.display(), "closed store");
        }
    }

    /// Closes the store and deletes its backing file.
    pub fn destroy(self) -> Result<()> {
        self.close();
        fs::remove_file(&self.path)?;
        info!(path = %self.path.display(), "destroyed store");
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.close();
    }
}
