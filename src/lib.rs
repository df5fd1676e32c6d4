//! A single-file, disk-resident keyed record store.
//!
//! Records are arbitrary byte values filed under byte keys in a B-tree.
//! Everything lives in one backing file: a fixed leading header block
//! followed by fixed-size pages holding tree nodes, record values, overflow
//! continuations and a threaded free list. Values larger than one page chain
//! across overflow pages; deleted pages are recycled rather than returned to
//! the filesystem.
//!
//! ```no_run
//! use cellar::{Store, StoreOptions};
//!
//! # fn main() -> cellar::Result<()> {
//! let store = Store::create("records.db", StoreOptions::default())?;
//! store.add_record(b"greeting", b"hello")?;
//! assert_eq!(store.get_record(b"greeting")?.as_deref(), Some(&b"hello"[..]));
//! store.close();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cache;
pub mod error;
pub mod header;
pub mod io;
pub mod key;
mod node;
pub mod page;
mod paged;
pub mod pool;
pub mod store;

pub use error::{Result, StoreError};
pub use key::Key;
pub use page::{PageId, PageStatus};
pub use store::{RecordVisitor, Store, StoreOptions};
