//! Transaction manager.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex, RwLock};
use tessera_storage::{FileBackend, InMemoryBackend};

use super::recovery;
use crate::config::Config;
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult};
use crate::log::{CommitLog, LogRecord, RowOp, TableImage};
use crate::manifest::Manifest;
use crate::schema::Schema;
use crate::storage::{State, WorkingState};
use crate::types::Version;

/// Receives a signal after every commit to the store.
pub(crate) trait CommitObserver: Send + Sync {
    /// Called once the commit producing `version` is published and the
    /// write lock released.
    fn committed(&self, version: Version);
}

/// The single write lock of a store.
///
/// Unlike a mutex guard, ownership of the gate is not tied to a stack
/// frame, so a write transaction can begin in one call and commit in
/// another.
#[derive(Default)]
struct WriteGate {
    held: Mutex<bool>,
    released: Condvar,
}

impl WriteGate {
    fn acquire(&self) {
        let mut held = self.held.lock();
        while *held {
            self.released.wait(&mut held);
        }
        *held = true;
    }

    fn release(&self) {
        *self.held.lock() = false;
        self.released.notify_one();
    }
}

/// Manages the committed state of one store.
///
/// The transaction manager provides:
/// - Single-writer concurrency control via [`TransactionManager::acquire_write`]
/// - Snapshot isolation: readers hold an `Arc<State>` that never changes
/// - Commit-log durability: a commit is published only after its record
///   is flushed
///
/// Every realm handle opened on the same path shares one manager.
pub(crate) struct TransactionManager {
    path: PathBuf,
    in_memory: bool,
    read_only: bool,
    max_log_size: u64,
    gate: WriteGate,
    latest: RwLock<Arc<State>>,
    log: CommitLog,
    dir: Mutex<Option<StoreDir>>,
    observers: Mutex<Vec<Weak<dyn CommitObserver>>>,
    open_handles: AtomicUsize,
    closed: AtomicBool,
}

impl TransactionManager {
    /// Opens the store described by `config` and recovers its state.
    pub fn open(config: &Config) -> CoreResult<Self> {
        let (log, dir, state) = if config.in_memory {
            let log = CommitLog::new(Box::new(InMemoryBackend::new()), false);
            (log, None, State::new(Arc::new(Schema::empty()), 0))
        } else {
            let dir = StoreDir::open(&config.path, config.create_if_missing, config.read_only)?;
            let base = match dir.load_manifest()? {
                Some(manifest) => State::new(Arc::new(manifest.schema()?), manifest.schema_version),
                None => State::new(Arc::new(Schema::empty()), 0),
            };
            let backend = FileBackend::open(&dir.log_path())?;
            let log = CommitLog::new(Box::new(backend), config.sync_on_commit);
            let state = recovery::replay(&log, base, !config.read_only)?;
            (log, Some(dir), state)
        };
        tracing::info!(
            path = %config.path.display(),
            in_memory = config.in_memory,
            version = state.version().as_u64(),
            schema_version = state.schema_version(),
            "store opened"
        );
        Ok(Self {
            path: config.path.clone(),
            in_memory: config.in_memory,
            read_only: config.read_only,
            max_log_size: config.max_log_size,
            gate: WriteGate::default(),
            latest: RwLock::new(Arc::new(state)),
            log,
            dir: Mutex::new(dir),
            observers: Mutex::new(Vec::new()),
            open_handles: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn in_memory(&self) -> bool {
        self.in_memory
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// The latest committed state.
    pub fn latest(&self) -> Arc<State> {
        Arc::clone(&self.latest.read())
    }

    /// Whether the store holds no data and no schema yet.
    pub fn is_new(&self) -> bool {
        let latest = self.latest.read();
        latest.version() == Version::INITIAL && latest.schema().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Blocks until the write lock is free, then takes it.
    ///
    /// # Errors
    ///
    /// Fails when the store has been closed.
    pub fn acquire_write(&self) -> CoreResult<()> {
        self.gate.acquire();
        if self.is_closed() {
            self.gate.release();
            return Err(CoreError::StoreClosed);
        }
        Ok(())
    }

    pub fn release_write(&self) {
        self.gate.release();
    }

    /// Writes `working` to the log and publishes it. The caller holds the
    /// write lock. Returns the published state.
    pub fn commit(&self, working: WorkingState) -> CoreResult<Arc<State>> {
        if working.changes.is_empty() {
            return Ok(self.latest());
        }
        let WorkingState { state, changes, .. } = working;
        if changes.schema_changed {
            self.log.rewrite(&[snapshot_record(&state)])?;
            if let Some(dir) = self.dir.lock().as_ref() {
                dir.save_manifest(&Manifest::new(state.schema(), state.schema_version()))?;
            }
        } else {
            let mut ops: Vec<RowOp> = changes
                .cleared
                .iter()
                .map(|class| RowOp::Clear {
                    class: class.clone(),
                })
                .collect();
            let (puts, deletes): (Vec<_>, Vec<_>) =
                changes.touched.iter().partition(|link| state.contains(link));
            ops.extend(deletes.into_iter().map(|link| RowOp::Delete {
                class: link.class.clone(),
                key: link.key,
            }));
            for link in puts {
                if let Some(row) = state.row(link) {
                    ops.push(RowOp::Put {
                        class: link.class.clone(),
                        key: link.key,
                        values: row.values.clone(),
                    });
                }
            }
            self.log.append(&LogRecord::Commit {
                version: state.version(),
                next_key: state.next_key(),
                ops,
            })?;
        }

        let state = Arc::new(state);
        *self.latest.write() = Arc::clone(&state);
        tracing::debug!(
            version = state.version().as_u64(),
            touched = changes.touched.len(),
            cleared = changes.cleared.len(),
            schema_changed = changes.schema_changed,
            "commit published"
        );

        if self.max_log_size > 0 && self.log.size()? > self.max_log_size {
            self.compact_locked(&state)?;
        }
        Ok(state)
    }

    /// Signals every live observer that `version` was committed.
    pub fn notify(&self, version: Version) {
        let observers: Vec<Arc<dyn CommitObserver>> = {
            let mut list = self.observers.lock();
            list.retain(|w| w.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in observers {
            observer.committed(version);
        }
    }

    pub fn add_observer(&self, observer: Weak<dyn CommitObserver>) {
        self.observers.lock().push(observer);
    }

    /// Rewrites the log as one snapshot record.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors, leaving the old log in place.
    pub fn compact(&self) -> CoreResult<()> {
        self.acquire_write()?;
        let state = self.latest();
        let result = self.compact_locked(&state);
        self.release_write();
        result
    }

    fn compact_locked(&self, state: &State) -> CoreResult<()> {
        let before = self.log.size()?;
        self.log.rewrite(&[snapshot_record(state)])?;
        tracing::info!(
            path = %self.path.display(),
            before,
            after = self.log.size()?,
            "commit log compacted"
        );
        Ok(())
    }

    /// Bytes used by the log.
    pub fn log_size(&self) -> CoreResult<u64> {
        self.log.size()
    }

    /// Bytes a compacted log would use.
    pub fn compacted_size(&self) -> CoreResult<u64> {
        let frame = CommitLog::frame(&snapshot_record(&self.latest()))?;
        Ok(frame.len() as u64)
    }

    pub fn handle_opened(&self) {
        self.open_handles.fetch_add(1, Ordering::AcqRel);
    }

    /// Records that a realm handle closed; the last one shuts the store.
    pub fn handle_closed(&self) {
        if self.open_handles.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shutdown();
        }
    }

    /// Closes the store: later writes fail and the directory lock is
    /// released.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.observers.lock().clear();
        self.dir.lock().take();
        tracing::info!(path = %self.path.display(), "store closed");
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("path", &self.path)
            .field("in_memory", &self.in_memory)
            .field("version", &self.latest.read().version())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// The full state as one log record.
fn snapshot_record(state: &State) -> LogRecord {
    LogRecord::Snapshot {
        version: state.version(),
        schema_version: state.schema_version(),
        schema_json: state.schema().to_json(),
        next_key: state.next_key(),
        tables: state
            .tables()
            .map(|table| TableImage {
                class: table.schema().name.clone(),
                rows: table
                    .iter()
                    .map(|(key, row)| (key, row.values.clone()))
                    .collect(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ObjectSchemaDef;
    use crate::types::UpdateMode;
    use tessera_codec::Value;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new(vec![ObjectSchemaDef::new("Item")
                .property("id", "int")
                .property("name", "string?")
                .primary_key("id")])
            .unwrap(),
        )
    }

    fn with_schema(tm: &TransactionManager) {
        tm.acquire_write().unwrap();
        let mut w = WorkingState::new(&tm.latest());
        w.replace_schema(schema());
        tm.commit(w).unwrap();
        tm.release_write();
    }

    fn insert(tm: &TransactionManager, id: i64) -> Version {
        tm.acquire_write().unwrap();
        let mut w = WorkingState::new(&tm.latest());
        w.create("Item", Value::object([("id", Value::Int(id))]), UpdateMode::Never)
            .unwrap();
        let state = tm.commit(w).unwrap();
        tm.release_write();
        state.version()
    }

    #[test]
    fn commits_are_versioned_and_published() {
        let tm = TransactionManager::open(&Config::in_memory("tm")).unwrap();
        assert!(tm.is_new());
        with_schema(&tm);
        let before = tm.latest();
        let v = insert(&tm, 1);
        assert_eq!(v, before.version().next());
        assert_eq!(before.table("Item").unwrap().len(), 0);
        assert_eq!(tm.latest().table("Item").unwrap().len(), 1);
    }

    #[test]
    fn empty_write_does_not_advance() {
        let tm = TransactionManager::open(&Config::in_memory("tm")).unwrap();
        with_schema(&tm);
        let v = tm.latest().version();
        tm.acquire_write().unwrap();
        let state = tm.commit(WorkingState::new(&tm.latest())).unwrap();
        tm.release_write();
        assert_eq!(state.version(), v);
    }

    #[test]
    fn file_store_recovers_after_reopen() {
        let temp = tempfile::tempdir().unwrap();
        let config = Config::new(temp.path().join("store"));
        {
            let tm = TransactionManager::open(&config).unwrap();
            with_schema(&tm);
            insert(&tm, 1);
            insert(&tm, 2);
            tm.shutdown();
        }
        let tm = TransactionManager::open(&config).unwrap();
        let latest = tm.latest();
        assert_eq!(latest.table("Item").unwrap().len(), 2);
        assert_eq!(latest.version(), Version::new(3));
        assert!(latest.table("Item").unwrap().find_primary(&Value::Int(2)).is_some());
    }

    #[test]
    fn compaction_keeps_state() {
        let temp = tempfile::tempdir().unwrap();
        let config = Config::new(temp.path().join("store"));
        {
            let tm = TransactionManager::open(&config).unwrap();
            with_schema(&tm);
            for id in 0..20 {
                insert(&tm, id);
            }
            let before = tm.log_size().unwrap();
            tm.compact().unwrap();
            assert!(tm.log_size().unwrap() < before);
            assert_eq!(tm.log_size().unwrap(), tm.compacted_size().unwrap());
            insert(&tm, 100);
            tm.shutdown();
        }
        let tm = TransactionManager::open(&config).unwrap();
        assert_eq!(tm.latest().table("Item").unwrap().len(), 21);
    }

    #[test]
    fn closed_store_rejects_writes() {
        let tm = TransactionManager::open(&Config::in_memory("tm")).unwrap();
        tm.handle_opened();
        tm.handle_closed();
        assert!(tm.is_closed());
        assert!(matches!(tm.acquire_write(), Err(CoreError::StoreClosed)));
    }

    #[test]
    fn writers_are_serialized() {
        let tm = Arc::new(TransactionManager::open(&Config::in_memory("tm")).unwrap());
        with_schema(&tm);
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let tm = Arc::clone(&tm);
                std::thread::spawn(move || {
                    for i in 0..10 {
                        insert(&tm, t * 100 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let latest = tm.latest();
        assert_eq!(latest.table("Item").unwrap().len(), 40);
        assert_eq!(latest.version(), Version::new(41));
    }
}
