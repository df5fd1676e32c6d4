//! The file/page store: translates page numbers to byte offsets, performs
//! pooled positioned I/O, recycles freed pages, stages dirty pages for
//! write-back, and chains oversized values across overflow pages.

use std::path::Path;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::{CleanPages, DirtyPages};
use crate::error::{Result, StoreError};
use crate::header::{FileHeader, HEADER_SIZE};
use crate::io::{eof_as_corruption, Descriptor};
use crate::page::{Page, PageId, PageStatus, PAGE_HEADER_LEN};
use crate::pool::DescriptorPool;
use crate::store::StoreOptions;

/// Paged access to the single backing file.
///
/// All structural state lives behind its own lock: the file header, the
/// dirty map, the clean cache and the descriptor pool each form a separate
/// synchronization domain nested inside the store-wide lock.
pub(crate) struct PagedFile {
    page_size: u32,
    read_only: bool,
    cached: bool,
    flush_threshold: usize,
    pool: DescriptorPool,
    header: Mutex<FileHeader>,
    dirty: DirtyPages,
    clean: CleanPages,
}

impl PagedFile {
    /// Creates a fresh store file, truncating any existing content, and
    /// persists the initial header block.
    pub fn create(path: &Path, options: &StoreOptions) -> Result<Self> {
        if options.read_only {
            return Err(StoreError::Invalid("cannot create a read-only store"));
        }
        let header = FileHeader::new(options.page_size, options.max_key_size)?;
        let descriptor = Descriptor::create(path)?;
        let mut buf = vec![0u8; HEADER_SIZE];
        header.encode(&mut buf)?;
        descriptor.write_at(0, &buf)?;
        descriptor.sync_all()?;
        Ok(Self::from_header(path, options, header))
    }

    /// Opens an existing store file, reading and validating its header.
    /// On-disk geometry wins over differently-configured options.
    pub fn open(path: &Path, options: &StoreOptions) -> Result<Self> {
        let descriptor = Descriptor::open(path, options.read_only)?;
        let mut buf = vec![0u8; HEADER_SIZE];
        eof_as_corruption(descriptor.read_at(0, &mut buf), "file header truncated")?;
        let header = FileHeader::decode(&buf)?;
        if header.page_size != options.page_size || header.max_key_size != options.max_key_size {
            debug!(
                page_size = header.page_size,
                max_key_size = header.max_key_size,
                "using on-disk geometry over supplied options"
            );
        }
        Ok(Self::from_header(path, options, header))
    }

    fn from_header(path: &Path, options: &StoreOptions, header: FileHeader) -> Self {
        Self {
            page_size: header.page_size,
            read_only: options.read_only,
            cached: options.cached,
            flush_threshold: options.flush_threshold.max(1),
            pool: DescriptorPool::new(path, options.read_only, options.pool_size),
            header: Mutex::new(header),
            dirty: DirtyPages::new(),
            clean: CleanPages::new(options.cache_pages),
        }
    }

    /// Page size of this store in bytes.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Bytes available per page after the fixed page header.
    pub fn work_size(&self) -> usize {
        self.page_size as usize - PAGE_HEADER_LEN
    }

    /// Maximum key length recorded in the file header.
    pub fn max_key_size(&self) -> u16 {
        self.header.lock().max_key_size
    }

    /// Runs `f` with the file header locked.
    pub fn with_header<R>(&self, f: impl FnOnce(&mut FileHeader) -> R) -> R {
        f(&mut self.header.lock())
    }

    /// Fails with [`StoreError::ReadOnly`] on read-only stores.
    pub fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            Err(StoreError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn page_offset(&self, id: PageId) -> u64 {
        HEADER_SIZE as u64 + id.0 * self.page_size as u64
    }

    /// Fetches a page image: dirty map first, then the clean cache, then disk
    /// through the descriptor pool.
    pub fn read_page(&self, id: PageId) -> Result<Page> {
        if let Some(page) = self.dirty.get(id) {
            return Ok(page);
        }
        if let Some(page) = self.clean.get(id) {
            return Ok(page);
        }
        let mut buf = vec![0u8; self.page_size as usize];
        {
            let descriptor = self.pool.acquire()?;
            eof_as_corruption(
                descriptor.read_at(self.page_offset(id), &mut buf),
                "page truncated",
            )?;
        }
        let page = Page::from_bytes(id, buf)?;
        self.clean.put(page.clone());
        Ok(page)
    }

    /// Stages a modified page for write-back.
    pub fn stage(&self, page: Page) {
        self.clean.remove(page.id());
        self.dirty.insert(page);
    }

    /// Flushes when running uncached, or when the dirty set has crossed the
    /// configured threshold.
    pub fn maybe_flush(&self) -> Result<()> {
        if !self.cached || self.dirty.len() >= self.flush_threshold {
            self.flush()
        } else {
            Ok(())
        }
    }

    /// Writes every dirty page and, if dirty, the file header, then syncs.
    ///
    /// Per-page failures are counted, logged and reported as one aggregate
    /// [`StoreError::Flush`]; failed pages stay staged for the next attempt.
    pub fn flush(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        let pages = self.dirty.take_all();
        let wrote_pages = !pages.is_empty();
        let mut failed = 0usize;
        for (_, mut page) in pages {
            match self.write_page(&mut page) {
                Ok(()) => self.clean.put(page),
                Err(err) => {
                    warn!(page = page.id().0, error = %err, "failed to write dirty page");
                    failed += 1;
                    self.dirty.insert(page);
                }
            }
        }
        let header_image = {
            let mut header = self.header.lock();
            if header.dirty {
                let mut buf = vec![0u8; HEADER_SIZE];
                header.encode(&mut buf)?;
                header.dirty = false;
                Some(buf)
            } else {
                None
            }
        };
        let wrote_header = header_image.is_some();
        if let Some(buf) = header_image {
            let descriptor = self.pool.acquire()?;
            if let Err(err) = descriptor.write_at(0, &buf) {
                self.header.lock().dirty = true;
                return Err(err);
            }
        }
        if wrote_pages || wrote_header {
            let descriptor = self.pool.acquire()?;
            descriptor.sync_all()?;
        }
        if failed > 0 {
            return Err(StoreError::Flush { failed });
        }
        Ok(())
    }

    fn write_page(&self, page: &mut Page) -> Result<()> {
        let offset = self.page_offset(page.id());
        let descriptor = self.pool.acquire()?;
        descriptor.write_at(offset, page.encoded()?)
    }

    /// Allocates a page: unlinks the head of the free list when one exists,
    /// otherwise extends the file by one page. The returned page is not yet
    /// staged; callers set its status and stage it (directly or through
    /// [`PagedFile::write_value`]).
    pub fn get_free_page(&self) -> Result<Page> {
        self.ensure_writable()?;
        let reuse = self.header.lock().first_free;
        if let Some(id) = reuse {
            let free = self.read_page(id)?;
            if free.header.status != PageStatus::Deleted {
                return Err(StoreError::Corruption("free list page not marked deleted"));
            }
            {
                let mut header = self.header.lock();
                header.first_free = free.header.next;
                if header.first_free.is_none() {
                    header.last_free = None;
                }
                header.page_count += 1;
                header.dirty = true;
            }
            let mut page = free;
            page.reset(PageStatus::Unused);
            Ok(page)
        } else {
            let mut header = self.header.lock();
            let id = PageId(header.total_pages);
            header.total_pages += 1;
            header.page_count += 1;
            header.dirty = true;
            drop(header);
            Ok(Page::new(id, self.page_size as usize))
        }
    }

    /// Reclaims a whole next-page chain starting at `head`: every page is
    /// marked deleted and the chain is appended to the free-list tail. The
    /// file never shrinks.
    pub fn free_chain(&self, head: PageId) -> Result<usize> {
        self.ensure_writable()?;
        let mut pages = Vec::new();
        let mut next = Some(head);
        while let Some(id) = next {
            let page = self.read_page(id)?;
            next = page.header.next;
            pages.push(page);
        }
        let count = pages.len();
        let tail_id = pages[count - 1].id();
        for i in 0..count {
            let next_id = pages.get(i + 1).map(|p| p.id());
            let page = &mut pages[i];
            page.reset(PageStatus::Deleted);
            page.header.next = next_id;
        }
        let old_tail = self.header.lock().last_free;
        if let Some(tail) = old_tail {
            let mut tail_page = self.read_page(tail)?;
            tail_page.header.next = Some(head);
            self.stage(tail_page);
        }
        {
            let mut header = self.header.lock();
            if header.first_free.is_none() {
                header.first_free = Some(head);
            }
            header.last_free = Some(tail_id);
            header.page_count = header.page_count.saturating_sub(count as u64);
            header.dirty = true;
        }
        for page in pages {
            self.stage(page);
        }
        debug!(head = head.0, pages = count, "reclaimed page chain");
        Ok(count)
    }

    /// Writes `bytes` as the value beginning on `head`, reusing or allocating
    /// overflow continuation pages as needed and reclaiming any leftover tail
    /// of a previously longer chain. Stages every touched page.
    pub fn write_value(&self, mut head: Page, bytes: &[u8]) -> Result<PageId> {
        self.ensure_writable()?;
        if bytes.len() > u32::MAX as usize {
            return Err(StoreError::Invalid("value length exceeds u32"));
        }
        let head_id = head.id();
        head.header.record_len = bytes.len() as u32;
        let mut remaining = bytes;
        let mut page = head;
        loop {
            let take = remaining.len().min(page.data_capacity());
            page.set_data(&remaining[..take])?;
            remaining = &remaining[take..];
            if remaining.is_empty() {
                let leftover = page.header.next.take();
                self.stage(page);
                if let Some(id) = leftover {
                    self.free_chain(id)?;
                }
                return Ok(head_id);
            }
            let next = match page.header.next {
                Some(id) => {
                    let mut reused = self.read_page(id)?;
                    reused.reuse(PageStatus::Overflow);
                    reused
                }
                None => {
                    let mut fresh = self.get_free_page()?;
                    fresh.header.status = PageStatus::Overflow;
                    fresh
                }
            };
            page.header.next = Some(next.id());
            self.stage(page);
            page = next;
        }
    }

    /// Reads the whole value beginning on `head` by following its overflow
    /// chain; a mismatch against the recorded total length is corruption.
    pub fn read_value(&self, head: PageId) -> Result<Vec<u8>> {
        let first = self.read_page(head)?;
        let total = first.header.record_len as usize;
        let limit = self.header.lock().total_pages;
        let mut out = Vec::with_capacity(total);
        let mut walked = 0u64;
        let mut page = first;
        loop {
            out.extend_from_slice(page.data());
            walked += 1;
            if walked > limit {
                return Err(StoreError::Corruption("value chain cycles"));
            }
            match page.header.next {
                Some(id) => page = self.read_page(id)?,
                None => break,
            }
        }
        if out.len() != total {
            return Err(StoreError::Corruption(
                "value chain does not match recorded length",
            ));
        }
        Ok(out)
    }

    /// Drops the caches and drains the descriptor pool best-effort.
    pub fn close(&self) {
        if !self.dirty.is_empty() {
            warn!(
                pages = self.dirty.len(),
                "closing with unwritten dirty pages"
            );
        }
        self.clean.clear();
        self.pool.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn small_options() -> StoreOptions {
        StoreOptions::default()
            .page_size(128)
            .max_key_size(16)
            .pool_size(2)
    }

    fn record_head(paged: &PagedFile) -> Page {
        let mut page = paged.get_free_page().unwrap();
        page.header.status = PageStatus::Record;
        page
    }

    #[test]
    fn value_roundtrip_spanning_overflow_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("paged.db");
        let value: Vec<u8> = (0..300u32).map(|i| (i % 251) as u8).collect();

        let paged = PagedFile::create(&path, &small_options()).unwrap();
        let head = record_head(&paged);
        let head_id = paged.write_value(head, &value).unwrap();
        paged.flush().unwrap();
        assert_eq!(paged.read_value(head_id).unwrap(), value);
        // 128-byte pages leave 103 work bytes; 300 bytes need three pages.
        assert_eq!(paged.with_header(|h| h.total_pages), 3);
        paged.close();

        let reopened = PagedFile::open(&path, &small_options()).unwrap();
        assert_eq!(reopened.read_value(head_id).unwrap(), value);
    }

    #[test]
    fn empty_value_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("paged.db");
        let paged = PagedFile::create(&path, &small_options()).unwrap();
        let head = record_head(&paged);
        let head_id = paged.write_value(head, &[]).unwrap();
        paged.flush().unwrap();
        assert_eq!(paged.read_value(head_id).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn shrinking_value_reclaims_chain_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("paged.db");
        let paged = PagedFile::create(&path, &small_options()).unwrap();

        let head = record_head(&paged);
        let head_id = paged.write_value(head, &[7u8; 300]).unwrap();
        assert_eq!(paged.with_header(|h| h.total_pages), 3);
        assert!(paged.with_header(|h| h.first_free.is_none()));

        let head = paged.read_page(head_id).unwrap();
        paged.write_value(head, &[9u8; 10]).unwrap();
        assert_eq!(paged.read_value(head_id).unwrap(), vec![9u8; 10]);
        assert!(paged.with_header(|h| h.first_free.is_some()));

        // Growing again reuses the reclaimed pages instead of extending.
        let head = paged.read_page(head_id).unwrap();
        paged.write_value(head, &[5u8; 290]).unwrap();
        assert_eq!(paged.read_value(head_id).unwrap(), vec![5u8; 290]);
        assert_eq!(paged.with_header(|h| h.total_pages), 3);
    }

    #[test]
    fn free_chain_feeds_later_allocations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("paged.db");
        let paged = PagedFile::create(&path, &small_options()).unwrap();

        let head = record_head(&paged);
        let head_id = paged.write_value(head, &[1u8; 250]).unwrap();
        let freed = paged.free_chain(head_id).unwrap();
        assert_eq!(freed, 3);
        assert_eq!(paged.with_header(|h| h.page_count), 0);

        let reused = paged.get_free_page().unwrap();
        assert_eq!(reused.id(), head_id);
        assert_eq!(paged.with_header(|h| h.total_pages), 3);
    }

    #[test]
    fn flush_persists_header_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("paged.db");
        let paged = PagedFile::create(&path, &small_options()).unwrap();
        paged.with_header(|h| {
            h.record_count = 42;
            h.dirty = true;
        });
        paged.flush().unwrap();
        paged.close();

        let reopened = PagedFile::open(&path, &small_options()).unwrap();
        assert_eq!(reopened.with_header(|h| h.record_count), 42);
    }
}
