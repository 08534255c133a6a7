//! Storage error types.

use std::io;
use thiserror::Error;

/// Result alias for backend operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by a [`crate::StorageBackend`].
#[derive(Debug, Error)]
pub enum StorageError {
    /// The operating system reported a failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read reached past the current end of the store.
    #[error("read past end: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        len: usize,
        /// Size of the store at the time of the read.
        size: u64,
    },

    /// A truncate asked for a size larger than the store.
    #[error("cannot truncate to {requested} bytes, store holds {size}")]
    TruncateBeyondEnd {
        /// Size that was asked for.
        requested: u64,
        /// Current size.
        size: u64,
    },
}
