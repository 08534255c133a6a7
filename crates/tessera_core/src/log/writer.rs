//! Commit log writer.

use std::sync::Arc;

use parking_lot::Mutex;
use tessera_storage::StorageBackend;

use super::record::{compute_crc32, LogRecord, LOG_MAGIC, LOG_VERSION};
use super::{LogIterator, CRC_SIZE, HEADER_SIZE};
use crate::error::{CoreError, CoreResult};

/// Append-only commit log over a storage backend.
///
/// A record becomes durable once [`CommitLog::append`] returns; recovery
/// stops at the first incomplete record.
pub struct CommitLog {
    backend: Arc<Mutex<Box<dyn StorageBackend>>>,
    sync_on_write: bool,
}

impl CommitLog {
    /// Creates a log over `backend`.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_write: bool) -> Self {
        Self {
            backend: Arc::new(Mutex::new(backend)),
            sync_on_write,
        }
    }

    /// Frames `record` in its envelope.
    ///
    /// # Errors
    ///
    /// Fails if the payload cannot be encoded or is larger than 4 GiB.
    pub fn frame(record: &LogRecord) -> CoreResult<Vec<u8>> {
        let payload = record.encode_payload()?;
        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&LOG_MAGIC);
        data.extend_from_slice(&LOG_VERSION.to_le_bytes());
        data.push(record.record_type().as_byte());
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::log_corruption("log record payload too large"))?;
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);
        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }

    /// Appends a record, returning the offset it was written at.
    ///
    /// # Errors
    ///
    /// Fails on encoding or I/O errors.
    pub fn append(&self, record: &LogRecord) -> CoreResult<u64> {
        let data = Self::frame(record)?;
        let mut backend = self.backend.lock();
        let offset = backend.append(&data)?;
        backend.flush()?;
        if self.sync_on_write {
            backend.sync()?;
        }
        Ok(offset)
    }

    /// Atomically replaces the whole log with `records`.
    ///
    /// # Errors
    ///
    /// Fails on encoding or I/O errors; the old log is then left intact.
    pub fn rewrite(&self, records: &[LogRecord]) -> CoreResult<()> {
        let mut data = Vec::new();
        for record in records {
            data.extend_from_slice(&Self::frame(record)?);
        }
        self.backend.lock().replace_contents(&data)?;
        Ok(())
    }

    /// Cuts the log back to `offset`, discarding a torn tail.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors.
    pub fn truncate(&self, offset: u64) -> CoreResult<()> {
        self.backend.lock().truncate(offset)?;
        Ok(())
    }

    /// Current log size in bytes.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// Streams the records of the log.
    ///
    /// # Errors
    ///
    /// Fails if the backend size cannot be read.
    pub fn iter(&self) -> CoreResult<LogIterator<'_>> {
        LogIterator::new(self.backend.lock(), 0)
    }

    /// Reads every record.
    ///
    /// # Errors
    ///
    /// Fails on the first corrupt record.
    pub fn read_all(&self) -> CoreResult<Vec<(u64, LogRecord)>> {
        self.iter()?.collect()
    }

    #[cfg(test)]
    pub(crate) fn backend_for_testing(&self) -> Arc<Mutex<Box<dyn StorageBackend>>> {
        Arc::clone(&self.backend)
    }
}

impl std::fmt::Debug for CommitLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitLog")
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}
