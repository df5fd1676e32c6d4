//! Fixed-size pages: the unit of I/O and of tree structure.
//!
//! Every page starts with a 25-byte big-endian header followed by a key
//! region and a data region. The engine currently writes an empty key region
//! everywhere (keys live inside serialized node payloads); the header fields
//! remain part of the format.

use std::cmp::Ordering;
use std::convert::TryFrom;
use std::fmt;

use crate::error::{Result, StoreError};

/// Number of bytes occupied by the per-page header.
pub const PAGE_HEADER_LEN: usize = 25;

/// On-disk sentinel for "no page" in 8-byte pointer fields.
const NO_PAGE: u64 = u64::MAX;

/// Byte offsets for the fixed page header fields.
pub mod layout {
    use core::ops::Range;

    /// Page status byte.
    pub const STATUS: usize = 0;
    /// Key length (big-endian u16).
    pub const KEY_LEN: Range<usize> = 1..3;
    /// Key content hash (big-endian u32).
    pub const KEY_HASH: Range<usize> = 3..7;
    /// Length of the data payload held by this page (big-endian u32).
    pub const DATA_LEN: Range<usize> = 7..11;
    /// Total logical record length, head pages only (big-endian u32).
    pub const RECORD_LEN: Range<usize> = 11..15;
    /// Forward pointer to the next page in an overflow/free chain.
    pub const NEXT_PAGE: Range<usize> = 15..23;
    /// Key/pointer count for tree-node pages (big-endian u16).
    pub const COUNT: Range<usize> = 23..25;
}

/// Logical page number. Page `n` lives at `header_size + n * page_size`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageId(pub u64);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of a page, stored in its header's status byte.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PageStatus {
    /// Freshly allocated, not yet assigned a role.
    Unused = 0,
    /// B-tree leaf node.
    Leaf = 1,
    /// B-tree branch node.
    Branch = 2,
    /// Head page of a stored record value.
    Record = 3,
    /// Continuation page of a value too large for one page.
    Overflow = 4,
    /// Reclaimed page threaded onto the free list.
    Deleted = 5,
    /// Reserved for streamed record payloads.
    Stream = 6,
}

impl PageStatus {
    /// Returns the on-disk byte for this status.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PageStatus {
    type Error = StoreError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(PageStatus::Unused),
            1 => Ok(PageStatus::Leaf),
            2 => Ok(PageStatus::Branch),
            3 => Ok(PageStatus::Record),
            4 => Ok(PageStatus::Overflow),
            5 => Ok(PageStatus::Deleted),
            6 => Ok(PageStatus::Stream),
            _ => Err(StoreError::Corruption("unknown page status")),
        }
    }
}

/// Decoded per-page metadata.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PageHeader {
    /// Role of the page; determines which other fields are meaningful.
    pub status: PageStatus,
    /// Length of the key region in bytes.
    pub key_len: u16,
    /// Content hash of the key region.
    pub key_hash: u32,
    /// Bytes of data payload held by this page.
    pub data_len: u32,
    /// Total logical length of the value beginning on this page.
    pub record_len: u32,
    /// Next page in an overflow or free chain.
    pub next: Option<PageId>,
    /// Key count for tree-node pages; branches carry `count + 1` pointers.
    pub count: u16,
}

impl PageHeader {
    /// Creates a header for a page with the given status and no content.
    pub fn new(status: PageStatus) -> Self {
        Self {
            status,
            key_len: 0,
            key_hash: 0,
            data_len: 0,
            record_len: 0,
            next: None,
            count: 0,
        }
    }

    /// Encodes the header into the first [`PAGE_HEADER_LEN`] bytes of `dst`.
    pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
        if dst.len() < PAGE_HEADER_LEN {
            return Err(StoreError::Invalid("page header buffer too small"));
        }
        dst[layout::STATUS] = self.status.as_u8();
        dst[layout::KEY_LEN].copy_from_slice(&self.key_len.to_be_bytes());
        dst[layout::KEY_HASH].copy_from_slice(&self.key_hash.to_be_bytes());
        dst[layout::DATA_LEN].copy_from_slice(&self.data_len.to_be_bytes());
        dst[layout::RECORD_LEN].copy_from_slice(&self.record_len.to_be_bytes());
        let next = self.next.map_or(NO_PAGE, |p| p.0);
        dst[layout::NEXT_PAGE].copy_from_slice(&next.to_be_bytes());
        dst[layout::COUNT].copy_from_slice(&self.count.to_be_bytes());
        Ok(())
    }

    /// Decodes a header from the first [`PAGE_HEADER_LEN`] bytes of `src`.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < PAGE_HEADER_LEN {
            return Err(StoreError::Corruption("page header truncated"));
        }
        let status = PageStatus::try_from(src[layout::STATUS])?;
        let key_len = u16::from_be_bytes(src[layout::KEY_LEN].try_into().expect("2-byte slice"));
        let key_hash = u32::from_be_bytes(src[layout::KEY_HASH].try_into().expect("4-byte slice"));
        let data_len = u32::from_be_bytes(src[layout::DATA_LEN].try_into().expect("4-byte slice"));
        let record_len =
            u32::from_be_bytes(src[layout::RECORD_LEN].try_into().expect("4-byte slice"));
        let next_raw =
            u64::from_be_bytes(src[layout::NEXT_PAGE].try_into().expect("8-byte slice"));
        let next = if next_raw == NO_PAGE {
            None
        } else {
            Some(PageId(next_raw))
        };
        let count = u16::from_be_bytes(src[layout::COUNT].try_into().expect("2-byte slice"));
        Ok(Self {
            status,
            key_len,
            key_hash,
            data_len,
            record_len,
            next,
            count,
        })
    }
}

/// An owned full-size page image plus its decoded header.
#[derive(Clone, Debug)]
pub struct Page {
    id: PageId,
    /// Decoded header; re-encoded into the buffer when the page is written.
    pub header: PageHeader,
    buf: Vec<u8>,
}

impl Page {
    /// Creates a zeroed page of `page_size` bytes with an [`PageStatus::Unused`] header.
    pub fn new(id: PageId, page_size: usize) -> Self {
        Self {
            id,
            header: PageHeader::new(PageStatus::Unused),
            buf: vec![0u8; page_size],
        }
    }

    /// Wraps a full page image read from disk, decoding and validating its header.
    pub fn from_bytes(id: PageId, buf: Vec<u8>) -> Result<Self> {
        let header = PageHeader::decode(&buf)?;
        let used = PAGE_HEADER_LEN + header.key_len as usize + header.data_len as usize;
        if used > buf.len() {
            return Err(StoreError::Corruption("page regions exceed page size"));
        }
        Ok(Self { id, header, buf })
    }

    /// Logical page number.
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Total page size in bytes.
    pub fn page_size(&self) -> usize {
        self.buf.len()
    }

    /// Bytes available for key + data after the fixed header.
    pub fn work_size(&self) -> usize {
        self.buf.len() - PAGE_HEADER_LEN
    }

    /// Bytes available for the data region on this page.
    pub fn data_capacity(&self) -> usize {
        self.work_size() - self.header.key_len as usize
    }

    /// The data region currently held by this page.
    pub fn data(&self) -> &[u8] {
        let start = PAGE_HEADER_LEN + self.header.key_len as usize;
        &self.buf[start..start + self.header.data_len as usize]
    }

    /// Replaces the data region with `chunk`, zeroing any stale tail bytes.
    pub fn set_data(&mut self, chunk: &[u8]) -> Result<()> {
        if chunk.len() > self.data_capacity() {
            return Err(StoreError::Invalid("data chunk exceeds page capacity"));
        }
        let start = PAGE_HEADER_LEN + self.header.key_len as usize;
        self.buf[start..].fill(0);
        self.buf[start..start + chunk.len()].copy_from_slice(chunk);
        self.header.data_len = chunk.len() as u32;
        Ok(())
    }

    /// Reinitializes the page under a new status, dropping all content and links.
    pub fn reset(&mut self, status: PageStatus) {
        self.buf.fill(0);
        self.header = PageHeader::new(status);
    }

    /// Reinitializes the page content but keeps the forward chain link, so an
    /// existing overflow chain can be rewritten in place.
    pub fn reuse(&mut self, status: PageStatus) {
        let next = self.header.next;
        self.reset(status);
        self.header.next = next;
    }

    /// Re-encodes the header and exposes the full page image for writing.
    pub fn encoded(&mut self) -> Result<&[u8]> {
        self.header.encode(&mut self.buf[..PAGE_HEADER_LEN])?;
        Ok(&self.buf)
    }
}

impl PartialEq for Page {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Page {}

impl PartialOrd for Page {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Page {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_header_roundtrip() {
        let header = PageHeader {
            status: PageStatus::Record,
            key_len: 0,
            key_hash: 0xDEADBEEF,
            data_len: 512,
            record_len: 9000,
            next: Some(PageId(7)),
            count: 0,
        };
        let mut buf = [0u8; PAGE_HEADER_LEN];
        header.encode(&mut buf).unwrap();
        assert_eq!(PageHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn no_page_sentinel_decodes_to_none() {
        let mut header = PageHeader::new(PageStatus::Overflow);
        header.next = None;
        let mut buf = [0u8; PAGE_HEADER_LEN];
        header.encode(&mut buf).unwrap();
        assert_eq!(buf[layout::NEXT_PAGE.start], 0xFF);
        assert_eq!(PageHeader::decode(&buf).unwrap().next, None);
    }

    #[test]
    fn unknown_status_rejected() {
        let mut buf = [0u8; PAGE_HEADER_LEN];
        buf[layout::STATUS] = 200;
        let err = PageHeader::decode(&buf).unwrap_err();
        assert!(matches!(err, StoreError::Corruption(_)));
    }

    #[test]
    fn from_bytes_rejects_oversized_regions() {
        let mut buf = vec![0u8; 64];
        let mut header = PageHeader::new(PageStatus::Record);
        header.data_len = 100;
        header.encode(&mut buf).unwrap();
        let err = Page::from_bytes(PageId(1), buf).unwrap_err();
        assert!(matches!(err, StoreError::Corruption(_)));
    }

    #[test]
    fn set_data_respects_capacity_and_zeroes_tail() {
        let mut page = Page::new(PageId(3), 64);
        page.set_data(&[1u8; 39]).unwrap();
        assert_eq!(page.data(), &[1u8; 39][..]);
        page.set_data(&[2u8; 4]).unwrap();
        assert_eq!(page.data(), &[2u8; 4][..]);
        assert!(page.set_data(&[0u8; 40]).is_err());
    }

    #[test]
    fn pages_order_by_page_number() {
        let a = Page::new(PageId(1), 64);
        let b = Page::new(PageId(2), 64);
        assert!(a < b);
        assert_eq!(a, Page::new(PageId(1), 128));
    }
}
