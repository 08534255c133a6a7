//! Realm handles.
//!
//! A [`Realm`] is one handle on an open store. Handles on the same path
//! share the store's [`TransactionManager`] but each keeps its own pinned
//! read snapshot, its own open write transaction and its own listeners.
//!
//! ```text
//! Registry::open ──► Realm ──► snapshot: Arc<State>      (reads)
//!                        └──► write: WriteTransaction    (mutations)
//!                        └──► notifier + scheduler       (deliveries)
//! ```
//!
//! Reads inside a write transaction see the transaction's uncommitted
//! changes. Outside one they see the snapshot, which advances when a write
//! begins, on [`Realm::refresh`], and before each notification delivery
//! when auto-refresh is on.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tessera_codec::{ObjKey, ObjLink, Value};

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::notification::{Notifier, Scheduler, ThreadScheduler, Watch};
use crate::object::Object;
use crate::results::Results;
use crate::schema::Schema;
use crate::storage::{State, WorkingState};
use crate::transaction::{CommitObserver, TransactionManager, WriteTransaction};
use crate::types::{ListenerToken, UpdateMode, Version};

/// Listener target id of realm-level listeners.
const REALM_TARGET: u64 = 0;

/// A handle on an open store.
///
/// Cloning is cheap and yields the same handle: clones share the snapshot,
/// the write transaction and the listeners.
#[derive(Clone)]
pub struct Realm {
    inner: Arc<RealmInner>,
}

pub(crate) struct RealmInner {
    me: Weak<RealmInner>,
    store: Arc<TransactionManager>,
    config: Config,
    snapshot: RwLock<Arc<State>>,
    write: Mutex<Option<WriteTransaction>>,
    notifier: Notifier,
    scheduler: Arc<dyn Scheduler>,
    delivery_pending: AtomicBool,
    closed: AtomicBool,
    next_target: AtomicU64,
}

impl Realm {
    /// Creates a handle on an opened store and subscribes it to commits.
    pub(crate) fn attach(store: Arc<TransactionManager>, config: Config) -> CoreResult<Self> {
        let scheduler: Arc<dyn Scheduler> = match &config.scheduler {
            Some(s) => Arc::clone(s),
            None => Arc::new(ThreadScheduler::new()?),
        };
        let snapshot = store.latest();
        let inner = Arc::new_cyclic(|me| RealmInner {
            me: me.clone(),
            store: Arc::clone(&store),
            config,
            snapshot: RwLock::new(snapshot),
            write: Mutex::new(None),
            notifier: Notifier::new(),
            scheduler,
            delivery_pending: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            next_target: AtomicU64::new(REALM_TARGET + 1),
        });
        let observer: Weak<dyn CommitObserver> = Arc::downgrade(&inner) as Weak<RealmInner>;
        store.add_observer(observer);
        store.handle_opened();
        Ok(Self { inner })
    }

    /// The configuration this handle was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Path (or in-memory name) of the store.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        self.inner.store.path()
    }

    /// Whether two handles are the same handle.
    #[must_use]
    pub fn same_handle(&self, other: &Realm) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ---------------------------------------------------------------------
    // State access
    // ---------------------------------------------------------------------

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_closed() {
            Err(CoreError::StoreClosed)
        } else {
            Ok(())
        }
    }

    /// Runs `f` against the state this handle currently reads: the open
    /// write transaction's working copy, or the pinned snapshot.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&State) -> R) -> CoreResult<R> {
        self.ensure_open()?;
        let write = self.inner.write.lock();
        if let Some(state) = write.as_ref().and_then(WriteTransaction::state) {
            return Ok(f(state));
        }
        drop(write);
        let snapshot = Arc::clone(&self.inner.snapshot.read());
        Ok(f(&snapshot))
    }

    /// Runs `f` against the open write transaction.
    ///
    /// # Errors
    ///
    /// `Cannot modify managed objects outside of a write transaction.` when
    /// no write is open.
    pub(crate) fn mutate<R>(&self, f: impl FnOnce(&mut WorkingState) -> CoreResult<R>) -> CoreResult<R> {
        self.ensure_open()?;
        let mut write = self.inner.write.lock();
        let working = write
            .as_mut()
            .and_then(WriteTransaction::working_mut)
            .ok_or_else(CoreError::not_in_write)?;
        f(working)
    }

    /// The pinned read snapshot, ignoring any open write.
    pub(crate) fn snapshot(&self) -> Arc<State> {
        Arc::clone(&self.inner.snapshot.read())
    }

    pub(crate) fn next_target(&self) -> u64 {
        self.inner.next_target.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a listener watch observed at the pinned snapshot.
    /// Collection and object watches get their initial call on the next
    /// run of the scheduler.
    pub(crate) fn add_watch(&self, target: u64, watch: Watch) -> CoreResult<ListenerToken> {
        self.ensure_open()?;
        let initial = !matches!(watch, Watch::Realm { .. });
        let token = self
            .inner
            .notifier
            .add(target, watch, self.snapshot().version());
        if initial {
            self.inner.schedule_delivery();
        }
        Ok(token)
    }

    pub(crate) fn remove_watch(&self, token: ListenerToken) -> bool {
        self.inner.notifier.remove(token)
    }

    pub(crate) fn remove_watches(&self, target: u64) {
        self.inner.notifier.remove_target(target);
    }

    // ---------------------------------------------------------------------
    // Introspection
    // ---------------------------------------------------------------------

    /// The schema this handle reads with.
    ///
    /// # Errors
    ///
    /// Fails when the handle is closed.
    pub fn schema(&self) -> CoreResult<Arc<Schema>> {
        self.read(|s| Arc::clone(s.schema()))
    }

    /// The schema version this handle reads with.
    ///
    /// # Errors
    ///
    /// Fails when the handle is closed.
    pub fn schema_version(&self) -> CoreResult<u64> {
        self.read(State::schema_version)
    }

    /// Version of the snapshot this handle reads.
    #[must_use]
    pub fn version(&self) -> Version {
        self.snapshot().version()
    }

    /// Whether no class holds any object.
    ///
    /// # Errors
    ///
    /// Fails when the handle is closed.
    pub fn is_empty(&self) -> CoreResult<bool> {
        self.read(|s| s.tables().all(|t| t.is_empty()))
    }

    /// Whether the handle was opened read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.inner.store.read_only()
    }

    /// Whether the store lives in memory only.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.inner.store.in_memory()
    }

    /// Whether this handle or its store has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire) || self.inner.store.is_closed()
    }

    /// Whether this handle has an open write transaction.
    #[must_use]
    pub fn is_in_transaction(&self) -> bool {
        self.inner.write.lock().is_some()
    }

    /// Closes this handle. Open writes are rolled back and listeners are
    /// dropped; the store closes with its last handle.
    pub fn close(&self) {
        self.inner.close();
    }

    // ---------------------------------------------------------------------
    // Transactions
    // ---------------------------------------------------------------------

    /// Opens a write transaction, blocking while another handle writes.
    ///
    /// # Errors
    ///
    /// Fails on read-only or closed handles and when a write is already
    /// open on this handle.
    pub fn begin_transaction(&self) -> CoreResult<()> {
        self.ensure_open()?;
        if self.is_read_only() {
            return Err(CoreError::transaction_state(
                "Can't perform transactions on read-only Realms.",
            ));
        }
        if self.is_in_transaction() {
            return Err(CoreError::transaction_state(
                "The Realm is already in a write transaction",
            ));
        }
        let tx = WriteTransaction::begin(Arc::clone(&self.inner.store))?;
        let mut write = self.inner.write.lock();
        if write.is_some() {
            drop(write);
            tx.cancel();
            return Err(CoreError::transaction_state(
                "The Realm is already in a write transaction",
            ));
        }
        *self.inner.snapshot.write() = self.inner.store.latest();
        *write = Some(tx);
        Ok(())
    }

    /// Commits the open write transaction and signals every handle on the
    /// store.
    ///
    /// # Errors
    ///
    /// Fails when no write is open or the commit could not be logged; in
    /// the latter case the changes are discarded.
    pub fn commit_transaction(&self) -> CoreResult<()> {
        let tx = self
            .inner
            .write
            .lock()
            .take()
            .ok_or_else(|| CoreError::transaction_state("Can't commit a non-existing write transaction"))?;
        let state = tx.commit()?;
        let version = state.version();
        *self.inner.snapshot.write() = state;
        self.inner.store.notify(version);
        Ok(())
    }

    /// Discards the open write transaction.
    ///
    /// # Errors
    ///
    /// Fails when no write is open.
    pub fn cancel_transaction(&self) -> CoreResult<()> {
        let tx = self
            .inner
            .write
            .lock()
            .take()
            .ok_or_else(|| CoreError::transaction_state("Can't cancel a non-existing write transaction"))?;
        tx.cancel();
        Ok(())
    }

    /// Runs `body` in a write transaction: committed when it returns `Ok`,
    /// rolled back when it returns `Err` or panics.
    ///
    /// # Errors
    ///
    /// Returns the error of `body`, or any error of begin/commit.
    pub fn write<R>(&self, body: impl FnOnce() -> CoreResult<R>) -> CoreResult<R> {
        self.begin_transaction()?;
        let guard = RollbackOnUnwind(self);
        let outcome = body();
        std::mem::forget(guard);
        match outcome {
            Ok(value) => {
                self.commit_transaction()?;
                Ok(value)
            }
            Err(e) => {
                if self.is_in_transaction() {
                    self.cancel_transaction()?;
                }
                Err(e)
            }
        }
    }

    /// Advances the snapshot to the latest commit. Returns whether it
    /// moved. Has no effect inside a write transaction.
    pub fn refresh(&self) -> bool {
        if self.is_closed() || self.is_in_transaction() {
            return false;
        }
        let latest = self.inner.store.latest();
        let mut snapshot = self.inner.snapshot.write();
        if latest.version() > snapshot.version() {
            *snapshot = latest;
            true
        } else {
            false
        }
    }

    // ---------------------------------------------------------------------
    // Objects
    // ---------------------------------------------------------------------

    /// Creates an object of `class` from an object literal.
    ///
    /// # Errors
    ///
    /// Fails outside a write, on unknown classes, missing or mistyped
    /// values and duplicate primary keys.
    pub fn create(&self, class: &str, value: impl Into<Value>) -> CoreResult<Object> {
        self.create_with_mode(class, value, UpdateMode::Never)
    }

    /// Creates an object, or updates the one with the same primary key
    /// according to `mode`.
    ///
    /// # Errors
    ///
    /// As [`Realm::create`]; `UpdateMode::Never` rejects existing keys.
    pub fn create_with_mode(
        &self,
        class: &str,
        value: impl Into<Value>,
        mode: UpdateMode,
    ) -> CoreResult<Object> {
        let value = value.into();
        let key = self.mutate(|w| w.create(class, value, mode))?;
        Ok(Object::new(self.clone(), ObjLink::new(class, key)))
    }

    /// Deletes an object and its embedded children.
    ///
    /// # Errors
    ///
    /// Fails outside a write or when the object is already gone.
    pub fn delete(&self, object: &Object) -> CoreResult<()> {
        self.mutate(|w| w.delete(object.link()))
    }

    /// Deletes every object currently in `results`.
    ///
    /// # Errors
    ///
    /// Fails outside a write or when the results are invalidated.
    pub fn delete_results(&self, results: &Results) -> CoreResult<()> {
        let links: Vec<ObjLink> = results
            .to_vec()?
            .into_iter()
            .filter_map(|v| match v {
                Value::Link(link) => Some(link),
                _ => None,
            })
            .collect();
        self.mutate(|w| w.delete_objects(links))
    }

    /// Deletes every object of every class.
    ///
    /// # Errors
    ///
    /// Fails outside a write.
    pub fn delete_all(&self) -> CoreResult<()> {
        self.mutate(WorkingState::delete_everything)
    }

    /// Live results holding every object of `class` in creation order.
    ///
    /// # Errors
    ///
    /// `Object type 'X' not found in schema.`, or when `class` is embedded.
    pub fn objects(&self, class: &str) -> CoreResult<Results> {
        let embedded = self.read(|s| s.schema().require(class).map(|c| c.embedded))??;
        if embedded {
            return Err(CoreError::query(format!(
                "You cannot query an embedded object: '{class}'"
            )));
        }
        Ok(Results::for_class(self.clone(), class))
    }

    /// The object of `class` with primary key `key`.
    ///
    /// # Errors
    ///
    /// Fails on unknown classes and classes without a primary key.
    pub fn object_for_primary_key(&self, class: &str, key: impl Into<Value>) -> CoreResult<Option<Object>> {
        let key = key.into();
        let found = self.read(|s| -> CoreResult<Option<ObjKey>> {
            let table = s.table(class)?;
            let pk = table.schema().primary_key_property().ok_or_else(|| {
                CoreError::schema(format!("'{class}' does not have a primary key defined"))
            })?;
            let key = pk.ty.coerce(key.clone()).unwrap_or(key);
            Ok(table.find_primary(&key))
        })??;
        Ok(found.map(|k| Object::new(self.clone(), ObjLink::new(class, k))))
    }

    /// The object of `class` with object key `key`, if it exists.
    ///
    /// # Errors
    ///
    /// Fails on unknown classes.
    pub fn object_for_key(&self, class: &str, key: ObjKey) -> CoreResult<Option<Object>> {
        let exists = self.read(|s| s.table(class).map(|t| t.contains(key)))??;
        Ok(exists.then(|| Object::new(self.clone(), ObjLink::new(class, key))))
    }

    // ---------------------------------------------------------------------
    // Maintenance
    // ---------------------------------------------------------------------

    /// Bytes used by the commit log.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors or a closed handle.
    pub fn compute_size(&self) -> CoreResult<u64> {
        self.ensure_open()?;
        self.inner.store.log_size()
    }

    /// Bytes the commit log would use after [`Realm::compact`]. This is the
    /// `used` figure passed to `should_compact_on_launch`.
    ///
    /// # Errors
    ///
    /// Fails on encoding errors or a closed handle.
    pub fn compacted_size(&self) -> CoreResult<u64> {
        self.ensure_open()?;
        self.inner.store.compacted_size()
    }

    /// Rewrites the commit log as a single snapshot record.
    ///
    /// # Errors
    ///
    /// Fails inside a write transaction and on I/O errors.
    pub fn compact(&self) -> CoreResult<()> {
        self.ensure_open()?;
        if self.is_in_transaction() {
            return Err(CoreError::transaction_state(
                "Cannot compact a Realm within a transaction.",
            ));
        }
        self.inner.store.compact()
    }

    // ---------------------------------------------------------------------
    // Listeners
    // ---------------------------------------------------------------------

    /// Registers a listener called after every delivery that follows a
    /// commit to the store.
    ///
    /// # Errors
    ///
    /// Fails when the handle is closed.
    pub fn add_listener<F>(&self, callback: F) -> CoreResult<ListenerToken>
    where
        F: Fn(&Realm) + Send + Sync + 'static,
    {
        self.add_watch(
            REALM_TARGET,
            Watch::Realm {
                callback: Arc::new(callback),
            },
        )
    }

    /// Removes a listener registered on this handle, including collection
    /// and object listeners. Returns whether it existed.
    pub fn remove_listener(&self, token: ListenerToken) -> bool {
        self.remove_watch(token)
    }

    /// Removes every realm-level listener.
    pub fn remove_all_listeners(&self) {
        self.remove_watches(REALM_TARGET);
    }

    /// Brings every listener of this handle up to date and runs the
    /// callbacks on the calling thread.
    pub fn deliver_now(&self) {
        self.inner.deliver();
    }
}

impl std::fmt::Debug for Realm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Realm")
            .field("path", &self.inner.store.path())
            .field("version", &self.version())
            .field("in_transaction", &self.is_in_transaction())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Rolls back the open write if the write body unwinds.
struct RollbackOnUnwind<'a>(&'a Realm);

impl Drop for RollbackOnUnwind<'_> {
    fn drop(&mut self) {
        if let Some(tx) = self.0.inner.write.lock().take() {
            tracing::debug!("write body panicked; rolling back");
            tx.cancel();
        }
    }
}

impl RealmInner {
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(tx) = self.write.lock().take() {
            tx.cancel();
        }
        self.notifier.clear();
        self.store.handle_closed();
        tracing::debug!(path = %self.store.path().display(), "realm handle closed");
    }

    /// Refreshes (when enabled) and runs every due listener callback.
    fn deliver(&self) {
        self.delivery_pending.store(false, Ordering::Release);
        if self.closed.load(Ordering::Acquire) || self.write.lock().is_some() {
            return;
        }
        if self.config.auto_refresh {
            let latest = self.store.latest();
            let mut snapshot = self.snapshot.write();
            if latest.version() > snapshot.version() {
                *snapshot = latest;
            }
        }
        let state = Arc::clone(&self.snapshot.read());
        let calls = self.notifier.collect(&state);
        if calls.is_empty() {
            return;
        }
        let Some(me) = self.me.upgrade() else { return };
        tracing::trace!(version = state.version().as_u64(), calls = calls.len(), "delivering notifications");
        self.notifier.dispatch(calls, &Realm { inner: me });
    }

    /// Posts one delivery unless one is already waiting on the scheduler.
    fn schedule_delivery(&self) {
        if self.delivery_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let me = self.me.clone();
        self.scheduler.post(Box::new(move || {
            if let Some(inner) = me.upgrade() {
                inner.deliver();
            }
        }));
    }
}

impl CommitObserver for RealmInner {
    fn committed(&self, version: Version) {
        if self.closed.load(Ordering::Acquire) || self.notifier.is_empty() {
            return;
        }
        tracing::trace!(version = version.as_u64(), "delivery posted");
        self.schedule_delivery();
    }
}

impl Drop for RealmInner {
    fn drop(&mut self) {
        self.close();
    }
}
