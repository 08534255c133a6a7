//! # Tessera Storage
//!
//! Byte-store backends underneath the Tessera commit log.
//!
//! A backend is an opaque, append-mostly byte sequence. It knows nothing
//! about records, rows or schemas; `tessera_core` owns every format
//! decision. The one structural operation a backend offers beyond
//! appending is [`StorageBackend::replace_contents`], which swaps the whole
//! contents in a single step and is what compaction builds on.
//!
//! ## Backends
//!
//! - [`InMemoryBackend`] keeps everything in a `Vec<u8>`; used for
//!   in-memory stores and tests.
//! - [`FileBackend`] writes through to a file and performs the swap with a
//!   temp-file + rename.
//!
//! ```rust
//! use tessera_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut log = InMemoryBackend::new();
//! log.append(b"first").unwrap();
//! log.replace_contents(b"compacted").unwrap();
//! assert_eq!(log.read_all().unwrap(), b"compacted");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
