//! The backend trait.

use crate::error::StorageResult;

/// An opaque byte store holding one logical file.
///
/// Backends must uphold:
///
/// - `append` returns the offset the bytes were written at, which equals
///   the previous `size()`
/// - bytes returned by `read_at` are exactly the bytes appended there
/// - after `sync` returns, appended bytes survive process termination
/// - `replace_contents` is all-or-nothing: a crash during the call leaves
///   either the old or the new contents, never a mix
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::StorageError::ReadPastEnd`] when the range is not
    /// fully inside the store.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data`, returning the offset it starts at.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors.
    fn flush(&mut self) -> StorageResult<()>;

    /// Forces data and metadata to durable media.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors.
    fn sync(&mut self) -> StorageResult<()>;

    /// Current size in bytes.
    ///
    /// # Errors
    ///
    /// Fails if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Drops everything after `new_size`. Used to cut a torn tail off the
    /// commit log during recovery.
    ///
    /// # Errors
    ///
    /// Fails if `new_size` exceeds the current size or on I/O errors.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically replaces the full contents with `data`.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors; the previous contents are then left intact.
    fn replace_contents(&mut self, data: &[u8]) -> StorageResult<()>;

    /// Reads the whole store.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size).map_err(|_| {
            crate::StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "store too large to read into memory",
            ))
        })?;
        self.read_at(0, len)
    }
}
