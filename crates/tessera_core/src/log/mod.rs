//! Commit log for durability and crash recovery.
//!
//! Every committed write transaction appends one `Commit` record holding
//! the rows it changed. Compaction and schema changes write a `Snapshot`
//! record holding the full state; replay starts from the last snapshot.
//!
//! ## Record Format
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! ## Recovery Policy
//!
//! - A truncated header or payload at the end of the log is a torn write:
//!   the record is discarded and replay ends there.
//! - Bad magic, an unknown record type, a future format version or a CRC
//!   mismatch is corruption and the store does not open.

mod iterator;
mod record;
mod writer;

pub use iterator::LogIterator;
pub use record::{compute_crc32, LogRecord, LogRecordType, RowOp, TableImage, LOG_MAGIC, LOG_VERSION};
pub use writer::CommitLog;

/// magic (4) + version (2) + type (1) + length (4).
pub(crate) const HEADER_SIZE: usize = 11;

pub(crate) const CRC_SIZE: usize = 4;
