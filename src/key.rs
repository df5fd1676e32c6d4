//! Record keys: immutable byte sequences with a cached content hash.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// An immutable, ordered key.
///
/// Ordering is byte-wise unsigned lexicographic comparison of the shared
/// prefix, then shorter-is-smaller. Equality short-circuits on the cached
/// crc32 content hash before comparing bytes.
#[derive(Clone)]
pub struct Key {
    bytes: Arc<[u8]>,
    hash: u32,
}

impl Key {
    /// Builds a key from raw bytes, computing the content hash once.
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            bytes: Arc::from(bytes),
            hash: crc32fast::hash(bytes),
        }
    }

    /// The key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Key length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true for the zero-length key.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The cached crc32 content hash.
    pub fn hash(&self) -> u32 {
        self.hash
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.bytes == other.bytes
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes.as_ref().cmp(other.bytes.as_ref())
    }
}

impl std::hash::Hash for Key {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<&[u8]> for Key {
    fn from(bytes: &[u8]) -> Self {
        Key::new(bytes)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.bytes) {
            Ok(text) => write!(f, "Key({text:?})"),
            Err(_) => write!(f, "Key({:02x?})", &self.bytes[..self.bytes.len().min(16)]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_bytewise_lexicographic() {
        assert!(Key::new(b"abc") < Key::new(b"abd"));
        assert!(Key::new(b"ab") < Key::new(b"abc"));
        assert!(Key::new(b"\x00") < Key::new(b"\x01"));
        assert!(Key::new(b"\xff") > Key::new(b"a"));
        assert_eq!(Key::new(b"same"), Key::new(b"same"));
    }

    #[test]
    fn hash_is_cached_and_stable() {
        let key = Key::new(b"stable");
        assert_eq!(key.hash(), crc32fast::hash(b"stable"));
        assert_eq!(key.hash(), key.clone().hash());
    }

    #[test]
    fn equal_bytes_have_equal_hashes() {
        let a = Key::new(b"twin");
        let b = Key::new(b"twin");
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a, b);
        assert_ne!(Key::new(b"twin"), Key::new(b"twine"));
    }
}
