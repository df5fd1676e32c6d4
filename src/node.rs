//! B-tree nodes and tree operations over a [`PagedFile`].
//!
//! A node page's payload is its keys, each as a big-endian u16 length prefix
//! followed by the key bytes, then its child or record pointers as 8-byte
//! big-endian page numbers. The key count lives in the page header. Leaves
//! carry one pointer per key; branches carry one more pointer than keys.
//!
//! Splits keep the root on its original page: when a split propagates out of
//! the root, the overfull half is relocated to a fresh page and the root page
//! is rewritten as the new branch.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, StoreError};
use crate::key::Key;
use crate::page::{PageId, PageStatus};
use crate::paged::PagedFile;
use crate::store::RecordVisitor;

/// A node never splits while holding this many keys or fewer, no matter how
/// large its serialized form grows; oversized payloads overflow-chain instead.
const MIN_SPLIT_KEYS: usize = 4;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum NodeKind {
    Leaf,
    Branch,
}

impl NodeKind {
    fn status(self) -> PageStatus {
        match self {
            NodeKind::Leaf => PageStatus::Leaf,
            NodeKind::Branch => PageStatus::Branch,
        }
    }
}

struct Node {
    page: PageId,
    kind: NodeKind,
    keys: Vec<Key>,
    pointers: Vec<u64>,
}

impl Node {
    fn serialized_len(&self) -> usize {
        let keys: usize = self.keys.iter().map(|k| 2 + k.len()).sum();
        keys + self.pointers.len() * 8
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_len());
        for key in &self.keys {
            out.extend_from_slice(&(key.len() as u16).to_be_bytes());
            out.extend_from_slice(key.as_bytes());
        }
        for ptr in &self.pointers {
            out.extend_from_slice(&ptr.to_be_bytes());
        }
        out
    }

    fn decode(page: PageId, status: PageStatus, count: usize, payload: &[u8]) -> Result<Self> {
        let kind = match status {
            PageStatus::Leaf => NodeKind::Leaf,
            PageStatus::Branch => NodeKind::Branch,
            _ => return Err(StoreError::Corruption("unexpected page status in tree")),
        };
        let mut keys = Vec::with_capacity(count);
        let mut at = 0usize;
        for _ in 0..count {
            let end = at + 2;
            if end > payload.len() {
                return Err(StoreError::Corruption("tree node payload truncated"));
            }
            let len =
                u16::from_be_bytes(payload[at..end].try_into().expect("2-byte slice")) as usize;
            at = end;
            if at + len > payload.len() {
                return Err(StoreError::Corruption("tree node payload truncated"));
            }
            keys.push(Key::new(&payload[at..at + len]));
            at += len;
        }
        let expected = match kind {
            NodeKind::Leaf => count,
            NodeKind::Branch => count + 1,
        };
        if payload.len() - at != expected * 8 {
            return Err(StoreError::Corruption("tree node pointer count mismatch"));
        }
        let pointers = payload[at..]
            .chunks_exact(8)
            .map(|c| u64::from_be_bytes(c.try_into().expect("8-byte slice")))
            .collect();
        Ok(Self {
            page,
            kind,
            keys,
            pointers,
        })
    }
}

/// The shortest prefix of `right` that still sorts strictly above `left`.
/// Used as the separator published when a leaf splits between the two.
fn separator(left: &Key, right: &Key) -> Key {
    debug_assert!(left < right);
    let l = left.as_bytes();
    let r = right.as_bytes();
    let diff = l.iter().zip(r).position(|(a, b)| a != b).unwrap_or(l.len());
    Key::new(&r[..=diff])
}

/// Read/write access to the key tree rooted at a fixed page.
pub(crate) struct Tree<'a> {
    paged: &'a PagedFile,
    root: PageId,
}

impl<'a> Tree<'a> {
    pub fn new(paged: &'a PagedFile, root: PageId) -> Self {
        Self { paged, root }
    }

    /// Allocates and stages an empty leaf to serve as a fresh store's root.
    pub fn create_root(paged: &'a PagedFile) -> Result<PageId> {
        let tree = Tree::new(paged, PageId(0));
        tree.allocate(NodeKind::Leaf, Vec::new(), Vec::new())
    }

    fn load(&self, id: PageId) -> Result<Node> {
        let page = self.paged.read_page(id)?;
        let status = page.header.status;
        let count = page.header.count as usize;
        let payload = self.paged.read_value(id)?;
        Node::decode(id, status, count, &payload)
    }

    fn save(&self, node: &Node) -> Result<()> {
        let mut head = self.paged.read_page(node.page)?;
        head.header.status = node.kind.status();
        head.header.count = node.keys.len() as u16;
        self.paged.write_value(head, &node.encode())?;
        Ok(())
    }

    /// Allocates a page, stages it under the node status, and saves the node
    /// onto it.
    fn allocate(&self, kind: NodeKind, keys: Vec<Key>, pointers: Vec<u64>) -> Result<PageId> {
        let mut page = self.paged.get_free_page()?;
        let id = page.id();
        page.header.status = kind.status();
        self.paged.stage(page);
        self.save(&Node {
            page: id,
            kind,
            keys,
            pointers,
        })?;
        Ok(id)
    }

    /// Looks up the record pointer stored under `key`.
    pub fn find(&self, key: &Key) -> Result<Option<PageId>> {
        let mut id = self.root;
        loop {
            let node = self.load(id)?;
            match node.kind {
                NodeKind::Leaf => {
                    return Ok(node
                        .keys
                        .binary_search(key)
                        .ok()
                        .map(|i| PageId(node.pointers[i])));
                }
                NodeKind::Branch => {
                    let idx = match node.keys.binary_search(key) {
                        Ok(i) => i + 1,
                        Err(i) => i,
                    };
                    id = PageId(node.pointers[idx]);
                }
            }
        }
    }

    /// Inserts or replaces the pointer stored under `key`, returning the
    /// previous pointer when the key already existed. The root page number
    /// never changes, even when the root itself splits.
    pub fn insert(&self, key: &Key, ptr: PageId) -> Result<Option<PageId>> {
        let (replaced, promoted) = self.insert_at(self.root, key, ptr)?;
        if let Some((sep, right)) = promoted {
            // The root just split: move its surviving half to a fresh page and
            // rewrite the root page as a branch over the two halves.
            let old_root = self.load(self.root)?;
            let left = self.allocate(old_root.kind, old_root.keys, old_root.pointers)?;
            self.save(&Node {
                page: self.root,
                kind: NodeKind::Branch,
                keys: vec![sep],
                pointers: vec![left.0, right.0],
            })?;
        }
        Ok(replaced)
    }

    fn insert_at(
        &self,
        id: PageId,
        key: &Key,
        ptr: PageId,
    ) -> Result<(Option<PageId>, Option<(Key, PageId)>)> {
        let mut node = self.load(id)?;
        match node.kind {
            NodeKind::Leaf => {
                let replaced = match node.keys.binary_search(key) {
                    Ok(i) => {
                        let old = node.pointers[i];
                        node.pointers[i] = ptr.0;
                        Some(PageId(old))
                    }
                    Err(i) => {
                        node.keys.insert(i, key.clone());
                        node.pointers.insert(i, ptr.0);
                        None
                    }
                };
                let promoted = self.maybe_split(&mut node)?;
                self.save(&node)?;
                Ok((replaced, promoted))
            }
            NodeKind::Branch => {
                let idx = match node.keys.binary_search(key) {
                    Ok(i) => i + 1,
                    Err(i) => i,
                };
                let child = PageId(node.pointers[idx]);
                let (replaced, promoted) = self.insert_at(child, key, ptr)?;
                match promoted {
                    Some((sep, right)) => {
                        let at = match node.keys.binary_search(&sep) {
                            Ok(i) => i,
                            Err(i) => i,
                        };
                        node.keys.insert(at, sep);
                        node.pointers.insert(at + 1, right.0);
                        let promoted = self.maybe_split(&mut node)?;
                        self.save(&node)?;
                        Ok((replaced, promoted))
                    }
                    None => Ok((replaced, None)),
                }
            }
        }
    }

    /// Splits `node` in place when it is both populous and oversized, leaving
    /// the lower half behind and returning the separator plus the new right
    /// sibling's page.
    fn maybe_split(&self, node: &mut Node) -> Result<Option<(Key, PageId)>> {
        if node.keys.len() <= MIN_SPLIT_KEYS || node.serialized_len() <= self.paged.work_size() {
            return Ok(None);
        }
        let mid = node.keys.len() / 2;
        match node.kind {
            NodeKind::Leaf => {
                // A leaf keeps all its entries; the separator is a copy, cut
                // down to the shortest prefix that still routes correctly.
                let sep = separator(&node.keys[mid - 1], &node.keys[mid]);
                let right_keys = node.keys.split_off(mid);
                let right_ptrs = node.pointers.split_off(mid);
                let right = self.allocate(NodeKind::Leaf, right_keys, right_ptrs)?;
                Ok(Some((sep, right)))
            }
            NodeKind::Branch => {
                // A branch promotes its middle key outright.
                let sep = node.keys.remove(mid);
                let right_keys = node.keys.split_off(mid);
                let right_ptrs = node.pointers.split_off(mid + 1);
                let right = self.allocate(NodeKind::Branch, right_keys, right_ptrs)?;
                Ok(Some((sep, right)))
            }
        }
    }

    /// Removes `key` from its leaf, returning the record pointer it held.
    /// Branch separators stay put and nodes never merge; they still route
    /// correctly once the key is gone.
    pub fn remove(&self, key: &Key) -> Result<Option<PageId>> {
        let mut id = self.root;
        loop {
            let mut node = self.load(id)?;
            match node.kind {
                NodeKind::Leaf => {
                    return match node.keys.binary_search(key) {
                        Ok(i) => {
                            node.keys.remove(i);
                            let old = node.pointers.remove(i);
                            self.save(&node)?;
                            Ok(Some(PageId(old)))
                        }
                        Err(_) => Ok(None),
                    };
                }
                NodeKind::Branch => {
                    let idx = match node.keys.binary_search(key) {
                        Ok(i) => i + 1,
                        Err(i) => i,
                    };
                    id = PageId(node.pointers[idx]);
                }
            }
        }
    }

    /// Walks every record in key order, checking `live` between nodes and
    /// entries. Returns `Ok(false)` when the walk stopped because the store
    /// went down, `Ok(true)` when it covered everything.
    pub fn visit<V: RecordVisitor + ?Sized>(
        &self,
        visitor: &mut V,
        live: &AtomicBool,
    ) -> Result<bool> {
        self.visit_at(self.root, visitor, live)
    }

    fn visit_at<V: RecordVisitor + ?Sized>(
        &self,
        id: PageId,
        visitor: &mut V,
        live: &AtomicBool,
    ) -> Result<bool> {
        if !live.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let node = self.load(id)?;
        match node.kind {
            NodeKind::Leaf => {
                for (key, ptr) in node.keys.iter().zip(&node.pointers) {
                    if !live.load(Ordering::SeqCst) {
                        return Ok(false);
                    }
                    visitor.record(key, PageId(*ptr))?;
                }
            }
            NodeKind::Branch => {
                for ptr in &node.pointers {
                    if !self.visit_at(PageId(*ptr), visitor, live)? {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }
}
