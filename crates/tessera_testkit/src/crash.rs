//! Crash recovery testing for Tessera.
//!
//! A crash is simulated by damaging the commit log between two opens of
//! the same store, or by a backend that stops writing part way through a
//! record.
//!
//! ## Test Strategy
//!
//! 1. **Torn final record** - the tail is cut mid-record; the record is
//!    discarded and the log truncated back to the last whole record
//! 2. **Cancelled write** - nothing reaches the log
//! 3. **Committed write** - survives every reopen
//! 4. **Checksum damage** - a flipped bit inside a whole record is
//!    corruption and the store refuses to open
//! 5. **Compaction** - the rewritten log replays to the same state
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tessera_testkit::crash::CrashRecoveryHarness;
//!
//! let harness = CrashRecoveryHarness::new();
//! harness.write_people(3);
//! harness.tear_tail(3).unwrap();
//! assert_eq!(harness.count_people().unwrap(), 2);
//! ```

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::TempDir;
use tessera_core::{Config, CoreResult, ManualScheduler, Realm, Registry};
use tessera_storage::{StorageBackend, StorageError, StorageResult};

use crate::fixtures::{people_schema, person};

/// A storage backend wrapper that can simulate crashes.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
}

impl CrashableBackend {
    /// Creates a new crashable backend wrapping an inner backend.
    pub fn new(inner: Box<dyn StorageBackend>) -> Self {
        Self {
            inner,
            crash_after_bytes: AtomicUsize::new(usize::MAX),
            bytes_written: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
        }
    }

    /// Sets the backend to crash after writing the specified number of
    /// bytes. Counting starts at the next append.
    pub fn crash_after(&self, bytes: usize) {
        self.bytes_written.store(0, Ordering::SeqCst);
        self.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    fn crash(&self, what: &str) -> StorageError {
        self.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(std::io::Error::other(format!("simulated crash during {what}")))
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.has_crashed() {
            return Err(self.crash("write"));
        }
        let current = self.bytes_written.fetch_add(data.len(), Ordering::SeqCst);
        let threshold = self.crash_after_bytes.load(Ordering::SeqCst);
        if current + data.len() > threshold {
            let partial = threshold.saturating_sub(current);
            if partial > 0 {
                self.inner.append(&data[..partial])?;
            }
            return Err(self.crash("partial write"));
        }
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.sync()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }

    fn replace_contents(&mut self, data: &[u8]) -> StorageResult<()> {
        if self.has_crashed() {
            return Err(self.crash("rewrite"));
        }
        self.inner.replace_contents(data)
    }
}

/// Test harness for crash recovery scenarios on a file-backed store.
///
/// Every open goes through a fresh [`Registry`], so nothing is shared
/// between opens except the files.
pub struct CrashRecoveryHarness {
    /// Path of the store directory.
    pub store_path: PathBuf,
    _temp_dir: TempDir,
}

impl CrashRecoveryHarness {
    /// Creates a harness over an empty temporary directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        Self {
            store_path: temp_dir.path().join("crash.tessera"),
            _temp_dir: temp_dir,
        }
    }

    /// Configuration for the store under test.
    pub fn config(&self) -> Config {
        Config::new(&self.store_path)
            .schema(people_schema())
            .scheduler(Arc::new(ManualScheduler::new()))
    }

    /// Opens the store in a fresh registry.
    ///
    /// # Errors
    ///
    /// Recovery and schema errors.
    pub fn open(&self) -> CoreResult<(Registry, Realm)> {
        let registry = Registry::new();
        let realm = registry.open(self.config())?;
        Ok((registry, realm))
    }

    /// Path of the commit log.
    pub fn log_path(&self) -> PathBuf {
        self.store_path.join("commit.log")
    }

    /// Size of the commit log file.
    pub fn log_len(&self) -> u64 {
        std::fs::metadata(self.log_path())
            .map(|m| m.len())
            .expect("Failed to stat commit log")
    }

    /// Opens the store, commits one person per transaction with ids
    /// `0..count`, and closes it.
    pub fn write_people(&self, count: i64) {
        let (registry, realm) = self.open().expect("Failed to open store");
        for id in 0..count {
            realm
                .write(|| realm.create("Person", person(id, &format!("p{id}"), id)))
                .expect("Failed to commit");
        }
        registry.close_all();
    }

    /// Opens the store and counts the stored people.
    ///
    /// # Errors
    ///
    /// Recovery errors.
    pub fn count_people(&self) -> CoreResult<usize> {
        let (registry, realm) = self.open()?;
        let count = realm.objects("Person")?.len()?;
        registry.close_all();
        Ok(count)
    }

    /// Cuts `bytes` off the end of the commit log.
    pub fn tear_tail(&self, bytes: u64) -> std::io::Result<()> {
        let len = self.log_len();
        truncate_file(&self.log_path(), len.saturating_sub(bytes))
    }

    /// Inverts one byte `from_end` bytes before the end of the log.
    pub fn flip_byte(&self, from_end: u64) -> std::io::Result<()> {
        let path = self.log_path();
        let mut data = std::fs::read(&path)?;
        let len = data.len() as u64;
        let idx = usize::try_from(len.saturating_sub(from_end + 1)).unwrap_or(0);
        data[idx] ^= 0xFF;
        std::fs::write(&path, data)
    }
}

impl Default for CrashRecoveryHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_file(path: &Path, len: u64) -> std::io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(len)?;
    file.sync_all()
}
