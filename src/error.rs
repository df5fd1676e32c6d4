//! Error and result types shared across the engine.

use std::io;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Failures surfaced by the storage engine.
///
/// Structural corruption is never retried. Flush failures are aggregated into
/// a single [`StoreError::Flush`] rather than raised per page. Operations on a
/// store that has already been closed are no-ops returning `false`/`None`
/// instead of an error, keeping the CRUD surface total.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing file is unreadable or unwritable.
    #[error("I/O: {0}")]
    Io(#[from] io::Error),
    /// On-disk bytes do not describe a well-formed store.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// The caller supplied an argument the engine cannot honor.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// A mutating operation was attempted on a read-only store.
    #[error("store is read-only")]
    ReadOnly,
    /// Write-back could not persist every dirty page.
    #[error("flush failed for {failed} page(s)")]
    Flush {
        /// Number of pages that could not be written.
        failed: usize,
    },
}
