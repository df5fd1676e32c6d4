//! The single leading block of the store file, holding global metadata:
//! page geometry, allocation counters, free-list head/tail, the root page
//! number, record count and cumulative payload bytes.

use crate::error::{Result, StoreError};
use crate::page::{PageId, PAGE_HEADER_LEN};

/// Size of the leading header block in bytes.
pub const HEADER_SIZE: usize = 4096;

/// Default page size in bytes.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// Default maximum key length in bytes.
pub const DEFAULT_MAX_KEY_SIZE: u16 = 2048;

/// Smallest page size the engine accepts.
pub const MIN_PAGE_SIZE: u32 = 64;

const NO_PAGE: u64 = u64::MAX;

/// Byte offsets for the fixed file header fields.
mod layout {
    use core::ops::Range;

    pub const HEADER_SIZE: Range<usize> = 0..2;
    pub const PAGE_SIZE: Range<usize> = 2..6;
    pub const PAGE_COUNT: Range<usize> = 6..14;
    pub const TOTAL_PAGES: Range<usize> = 14..22;
    pub const FIRST_FREE: Range<usize> = 22..30;
    pub const LAST_FREE: Range<usize> = 30..38;
    pub const PAGE_HEADER_SIZE: usize = 38;
    pub const MAX_KEY_SIZE: Range<usize> = 39..41;
    pub const RECORD_COUNT: Range<usize> = 41..49;
    pub const ROOT_PAGE: Range<usize> = 49..57;
    pub const TOTAL_BYTES: Range<usize> = 57..65;
}

/// Global store metadata, one per file, persisted lazily via the dirty flag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileHeader {
    /// Size of each page in bytes.
    pub page_size: u32,
    /// Pages currently in use (allocated minus free).
    pub page_count: u64,
    /// Pages ever allocated, including those on the free list.
    pub total_pages: u64,
    /// Head of the free-page list.
    pub first_free: Option<PageId>,
    /// Tail of the free-page list.
    pub last_free: Option<PageId>,
    /// Maximum key length accepted by this store.
    pub max_key_size: u16,
    /// Number of records currently stored.
    pub record_count: u64,
    /// Page number of the tree root.
    pub root_page: PageId,
    /// Cumulative logical payload bytes across all records.
    pub total_bytes: u64,
    /// Set on every structural change; cleared when the header is persisted.
    /// Not serialized.
    pub dirty: bool,
}

impl FileHeader {
    /// Creates a header for a freshly-initialized store.
    pub fn new(page_size: u32, max_key_size: u16) -> Result<Self> {
        if page_size < MIN_PAGE_SIZE {
            return Err(StoreError::Invalid("page size below minimum"));
        }
        // A branch node must be able to hold at least one full-size key plus
        // two child pointers within a single page's work area.
        let work_size = page_size as usize - PAGE_HEADER_LEN;
        if max_key_size as usize + 2 + 16 > work_size {
            return Err(StoreError::Invalid("max key size too large for page size"));
        }
        Ok(Self {
            page_size,
            page_count: 0,
            total_pages: 0,
            first_free: None,
            last_free: None,
            max_key_size,
            record_count: 0,
            root_page: PageId(0),
            total_bytes: 0,
            dirty: false,
        })
    }

    /// Bytes available per page after the fixed page header.
    pub fn work_size(&self) -> usize {
        self.page_size as usize - PAGE_HEADER_LEN
    }

    /// Encodes the header into `dst`, which must span the full header block.
    pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
        if dst.len() < HEADER_SIZE {
            return Err(StoreError::Invalid("file header buffer too small"));
        }
        dst[..HEADER_SIZE].fill(0);
        dst[layout::HEADER_SIZE].copy_from_slice(&(HEADER_SIZE as u16).to_be_bytes());
        dst[layout::PAGE_SIZE].copy_from_slice(&self.page_size.to_be_bytes());
        dst[layout::PAGE_COUNT].copy_from_slice(&self.page_count.to_be_bytes());
        dst[layout::TOTAL_PAGES].copy_from_slice(&self.total_pages.to_be_bytes());
        let first = self.first_free.map_or(NO_PAGE, |p| p.0);
        let last = self.last_free.map_or(NO_PAGE, |p| p.0);
        dst[layout::FIRST_FREE].copy_from_slice(&first.to_be_bytes());
        dst[layout::LAST_FREE].copy_from_slice(&last.to_be_bytes());
        dst[layout::PAGE_HEADER_SIZE] = PAGE_HEADER_LEN as u8;
        dst[layout::MAX_KEY_SIZE].copy_from_slice(&self.max_key_size.to_be_bytes());
        dst[layout::RECORD_COUNT].copy_from_slice(&self.record_count.to_be_bytes());
        dst[layout::ROOT_PAGE].copy_from_slice(&self.root_page.0.to_be_bytes());
        dst[layout::TOTAL_BYTES].copy_from_slice(&self.total_bytes.to_be_bytes());
        Ok(())
    }

    /// Decodes and validates a header block read from disk.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < HEADER_SIZE {
            return Err(StoreError::Corruption("file header truncated"));
        }
        let header_size =
            u16::from_be_bytes(src[layout::HEADER_SIZE].try_into().expect("2-byte slice"));
        if header_size as usize != HEADER_SIZE {
            return Err(StoreError::Corruption("unsupported file header size"));
        }
        let page_size =
            u32::from_be_bytes(src[layout::PAGE_SIZE].try_into().expect("4-byte slice"));
        if page_size < MIN_PAGE_SIZE {
            return Err(StoreError::Corruption("file header page size below minimum"));
        }
        let page_header_size = src[layout::PAGE_HEADER_SIZE];
        if page_header_size as usize != PAGE_HEADER_LEN {
            return Err(StoreError::Corruption("unsupported page header size"));
        }
        let page_count =
            u64::from_be_bytes(src[layout::PAGE_COUNT].try_into().expect("8-byte slice"));
        let total_pages =
            u64::from_be_bytes(src[layout::TOTAL_PAGES].try_into().expect("8-byte slice"));
        if page_count > total_pages {
            return Err(StoreError::Corruption("page count exceeds total pages"));
        }
        let first_raw =
            u64::from_be_bytes(src[layout::FIRST_FREE].try_into().expect("8-byte slice"));
        let last_raw = u64::from_be_bytes(src[layout::LAST_FREE].try_into().expect("8-byte slice"));
        let first_free = (first_raw != NO_PAGE).then_some(PageId(first_raw));
        let last_free = (last_raw != NO_PAGE).then_some(PageId(last_raw));
        if first_free.is_some() != last_free.is_some() {
            return Err(StoreError::Corruption("free list head/tail mismatch"));
        }
        let max_key_size =
            u16::from_be_bytes(src[layout::MAX_KEY_SIZE].try_into().expect("2-byte slice"));
        let record_count =
            u64::from_be_bytes(src[layout::RECORD_COUNT].try_into().expect("8-byte slice"));
        let root_page = PageId(u64::from_be_bytes(
            src[layout::ROOT_PAGE].try_into().expect("8-byte slice"),
        ));
        let total_bytes =
            u64::from_be_bytes(src[layout::TOTAL_BYTES].try_into().expect("8-byte slice"));
        Ok(Self {
            page_size,
            page_count,
            total_pages,
            first_free,
            last_free,
            max_key_size,
            record_count,
            root_page,
            total_bytes,
            dirty: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_header_roundtrip() {
        let mut header = FileHeader::new(4096, 2048).unwrap();
        header.page_count = 10;
        header.total_pages = 12;
        header.first_free = Some(PageId(5));
        header.last_free = Some(PageId(11));
        header.record_count = 9;
        header.root_page = PageId(0);
        header.total_bytes = 12345;
        let mut buf = vec![0u8; HEADER_SIZE];
        header.encode(&mut buf).unwrap();
        let decoded = FileHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn decode_rejects_bad_page_header_size() {
        let header = FileHeader::new(4096, 2048).unwrap();
        let mut buf = vec![0u8; HEADER_SIZE];
        header.encode(&mut buf).unwrap();
        buf[38] = 17;
        let err = FileHeader::decode(&buf).unwrap_err();
        assert!(matches!(err, StoreError::Corruption(_)));
    }

    #[test]
    fn decode_rejects_truncated_block() {
        let err = FileHeader::decode(&[0u8; 64]).unwrap_err();
        assert!(matches!(err, StoreError::Corruption(_)));
    }

    #[test]
    fn new_rejects_unworkable_geometry() {
        assert!(FileHeader::new(32, 8).is_err());
        assert!(FileHeader::new(256, 2048).is_err());
    }

    #[test]
    fn free_list_head_without_tail_is_corrupt() {
        let mut header = FileHeader::new(4096, 2048).unwrap();
        header.first_free = Some(PageId(3));
        let mut buf = vec![0u8; HEADER_SIZE];
        header.encode(&mut buf).unwrap();
        let err = FileHeader::decode(&buf).unwrap_err();
        assert!(matches!(err, StoreError::Corruption(_)));
    }
}
