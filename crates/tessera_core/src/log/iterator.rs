//! Streaming commit log reader.
//!
//! Records are read one by one through a bounded buffer so recovery does
//! not need the whole log in memory.

use parking_lot::MutexGuard;
use tessera_storage::StorageBackend;

use super::record::{compute_crc32, LogRecord, LogRecordType, LOG_MAGIC, LOG_VERSION};
use super::{CRC_SIZE, HEADER_SIZE};
use crate::error::{CoreError, CoreResult};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Iterator over `(offset, record)` pairs of a commit log.
///
/// A truncated header or payload ends iteration cleanly (a torn write from
/// a crash). Bad magic, an unknown type, a future version or a checksum
/// mismatch is an error.
pub struct LogIterator<'a> {
    backend: MutexGuard<'a, Box<dyn StorageBackend>>,
    total_size: u64,
    current_offset: u64,
    buffer: Vec<u8>,
    buffer_pos: usize,
    buffer_len: usize,
    finished: bool,
}

impl<'a> LogIterator<'a> {
    /// Starts reading at `start_offset`.
    ///
    /// # Errors
    ///
    /// Fails if the backend size cannot be read.
    pub fn new(
        backend: MutexGuard<'a, Box<dyn StorageBackend>>,
        start_offset: u64,
    ) -> CoreResult<Self> {
        let total_size = backend.size()?;
        Ok(Self {
            backend,
            total_size,
            current_offset: start_offset,
            buffer: vec![0u8; READ_BUFFER_SIZE],
            buffer_pos: 0,
            buffer_len: 0,
            finished: false,
        })
    }

    /// Offset just past the last record returned.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.current_offset
    }

    fn ensure_buffered(&mut self, min_bytes: usize) -> CoreResult<bool> {
        let available = self.buffer_len - self.buffer_pos;
        if available >= min_bytes {
            return Ok(true);
        }
        let remaining = (self.total_size.saturating_sub(self.current_offset)) as usize - available;
        if remaining < min_bytes - available {
            return Ok(false);
        }

        if self.buffer_pos > 0 && available > 0 {
            self.buffer.copy_within(self.buffer_pos..self.buffer_len, 0);
        }
        self.buffer_len = available;
        self.buffer_pos = 0;
        if min_bytes > self.buffer.len() {
            self.buffer.resize(min_bytes.next_power_of_two(), 0);
        }

        let to_read = (self.buffer.len() - self.buffer_len).min(remaining);
        if to_read > 0 {
            let read_offset = self.current_offset + self.buffer_len as u64;
            let data = self.backend.read_at(read_offset, to_read)?;
            self.buffer[self.buffer_len..self.buffer_len + data.len()].copy_from_slice(&data);
            self.buffer_len += data.len();
        }
        Ok(self.buffer_len - self.buffer_pos >= min_bytes)
    }

    fn read_next_record(&mut self) -> CoreResult<Option<(u64, LogRecord)>> {
        let start = self.current_offset;
        if !self.ensure_buffered(HEADER_SIZE)? {
            return Ok(None);
        }

        let header = &self.buffer[self.buffer_pos..self.buffer_pos + HEADER_SIZE];
        if header[0..4] != LOG_MAGIC {
            return Err(CoreError::log_corruption(format!("invalid magic at offset {start}")));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > LOG_VERSION {
            return Err(CoreError::log_corruption(format!(
                "unsupported version {version} at offset {start}"
            )));
        }
        let type_byte = header[6];
        let record_type = LogRecordType::from_byte(type_byte).ok_or_else(|| {
            CoreError::log_corruption(format!("unknown record type {type_byte} at offset {start}"))
        })?;
        let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;

        let total_len = HEADER_SIZE + payload_len + CRC_SIZE;
        if !self.ensure_buffered(total_len)? {
            return Ok(None);
        }

        let payload_start = self.buffer_pos + HEADER_SIZE;
        let payload_end = payload_start + payload_len;
        let stored_crc = u32::from_le_bytes([
            self.buffer[payload_end],
            self.buffer[payload_end + 1],
            self.buffer[payload_end + 2],
            self.buffer[payload_end + 3],
        ]);
        let computed_crc = compute_crc32(&self.buffer[self.buffer_pos..payload_end]);
        if stored_crc != computed_crc {
            return Err(CoreError::ChecksumMismatch {
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        let record = LogRecord::decode_payload(record_type, &self.buffer[payload_start..payload_end])?;
        self.buffer_pos += total_len;
        self.current_offset += total_len as u64;
        Ok(Some((start, record)))
    }
}

impl Iterator for LogIterator<'_> {
    type Item = CoreResult<(u64, LogRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next_record() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl std::fmt::Debug for LogIterator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogIterator")
            .field("total_size", &self.total_size)
            .field("current_offset", &self.current_offset)
            .finish_non_exhaustive()
    }
}
