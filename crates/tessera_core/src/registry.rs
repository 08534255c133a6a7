//! Open-store registry.
//!
//! Every realm handle on the same path shares one [`TransactionManager`].
//! The registry maps paths to the managers currently open, checks that a
//! second open is compatible with the first, and runs schema preparation
//! and launch-time compaction.
//!
//! # Example
//!
//! ```rust,ignore
//! use tessera_core::{Config, ObjectSchemaDef, Registry};
//!
//! let registry = Registry::new();
//! let realm = registry.open(
//!     Config::new("people")
//!         .schema(vec![ObjectSchemaDef::new("Person").property("name", "string")]),
//! )?;
//! realm.write(|| {
//!     realm.create("Person", Value::object([("name", "Ann")]))?;
//!     Ok(())
//! })?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::config::Config;
use crate::dir;
use crate::error::{CoreError, CoreResult};
use crate::migration;
use crate::realm::Realm;
use crate::transaction::TransactionManager;

struct Entry {
    store: Weak<TransactionManager>,
    in_memory: bool,
}

impl Entry {
    fn live(&self) -> Option<Arc<TransactionManager>> {
        self.store.upgrade().filter(|s| !s.is_closed())
    }
}

#[derive(Default)]
struct RegistryInner {
    stores: Mutex<HashMap<PathBuf, Entry>>,
}

/// Opens realms and tracks the stores they share.
///
/// Cloning is cheap; clones share the same open stores.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Creates a registry with no open stores.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a realm handle.
    ///
    /// # Errors
    ///
    /// Incompatible settings with a handle already open on the path,
    /// storage and recovery errors, and schema or migration errors.
    pub fn open(&self, config: Config) -> CoreResult<Realm> {
        let (store, fresh) = self.acquire(&config)?;
        let is_new = store.is_new();
        let realm = Realm::attach(Arc::clone(&store), config.clone())?;
        if let Err(e) = migration::prepare(&realm, &config, is_new) {
            realm.close();
            return Err(e);
        }
        if fresh && !config.read_only {
            if let Some(should_compact) = &config.should_compact_on_launch {
                let total = store.log_size()?;
                let used = store.compacted_size()?;
                if should_compact(total, used) {
                    tracing::info!(total, used, "compacting on launch");
                    store.compact()?;
                }
            }
        }
        Ok(realm)
    }

    /// Finds the live store for `config.path` or opens it.
    fn acquire(&self, config: &Config) -> CoreResult<(Arc<TransactionManager>, bool)> {
        let mut stores = self.inner.stores.lock();
        if let Some(entry) = stores.get(&config.path) {
            if let Some(store) = entry.live() {
                if entry.in_memory != config.in_memory {
                    return Err(CoreError::schema(format!(
                        "Realm at path '{}' already opened with different inMemory settings.",
                        config.path.display()
                    )));
                }
                let current = store.latest().schema_version();
                if config.schema_version.is_some_and(|v| v != current) {
                    return Err(CoreError::schema(format!(
                        "Realm at path '{}' already opened with different schema version.",
                        config.path.display()
                    )));
                }
                return Ok((store, false));
            }
        }
        let store = Arc::new(TransactionManager::open(config)?);
        stores.insert(
            config.path.clone(),
            Entry {
                store: Arc::downgrade(&store),
                in_memory: config.in_memory,
            },
        );
        Ok((store, true))
    }

    /// Opens a realm on a background thread. The returned future resolves
    /// to the realm, or to [`CoreError::OpenCancelled`] once
    /// [`AsyncOpen::cancel`] was called.
    #[must_use]
    pub fn open_async(&self, config: Config) -> AsyncOpen {
        let (tx, rx) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let registry = self.clone();
        let flag = Arc::clone(&cancelled);
        let spawned = std::thread::Builder::new()
            .name("tessera-open".into())
            .spawn(move || {
                let result = registry.open(config).and_then(|realm| {
                    if flag.load(Ordering::Acquire) {
                        realm.close();
                        Err(CoreError::OpenCancelled)
                    } else {
                        Ok(realm)
                    }
                });
                // The receiver is gone when the caller dropped the future;
                // an opened realm is closed by its drop.
                let _ = tx.send(result);
            });
        AsyncOpen {
            rx,
            cancelled,
            spawn_error: spawned.err().map(CoreError::from),
        }
    }

    /// Closes every open store. Existing handles report closed.
    pub fn close_all(&self) {
        let stores: Vec<Arc<TransactionManager>> = self
            .inner
            .stores
            .lock()
            .drain()
            .filter_map(|(_, e)| e.store.upgrade())
            .collect();
        for store in stores {
            store.shutdown();
        }
    }

    /// Closes everything and forgets every store, discarding in-memory
    /// data.
    pub fn reset(&self) {
        self.close_all();
        tracing::debug!("registry reset");
    }

    /// Whether a handle on `path` is open.
    #[must_use]
    pub fn is_open(&self, path: &Path) -> bool {
        self.inner
            .stores
            .lock()
            .get(path)
            .is_some_and(|e| e.live().is_some())
    }

    /// Schema version of the store at `path`, read from an open handle or
    /// the store's manifest. `None` when no store exists.
    ///
    /// # Errors
    ///
    /// Fails on a malformed manifest.
    pub fn schema_version_at(&self, path: &Path) -> CoreResult<Option<u64>> {
        if let Some(store) = self.inner.stores.lock().get(path).and_then(Entry::live) {
            return Ok(Some(store.latest().schema_version()));
        }
        Ok(dir::read_manifest(path)?.map(|m| m.schema_version))
    }

    /// Whether a file-backed store exists at `path`.
    #[must_use]
    pub fn exists(&self, path: &Path) -> bool {
        dir::store_exists(path)
    }

    /// Deletes the files of the store at `path`.
    ///
    /// # Errors
    ///
    /// Fails while a handle on `path` is open and on I/O errors.
    pub fn delete_files(&self, path: &Path) -> CoreResult<()> {
        if self.is_open(path) {
            return Err(CoreError::transaction_state(format!(
                "Cannot delete files of an open Realm at '{}'.",
                path.display()
            )));
        }
        self.inner.stores.lock().remove(path);
        dir::delete_store_files(path)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("stores", &self.inner.stores.lock().len())
            .finish()
    }
}

/// A realm being opened in the background.
pub struct AsyncOpen {
    rx: oneshot::Receiver<CoreResult<Realm>>,
    cancelled: Arc<AtomicBool>,
    spawn_error: Option<CoreError>,
}

impl AsyncOpen {
    /// Gives up on the open. The future resolves to
    /// [`CoreError::OpenCancelled`]; a realm opened meanwhile is closed.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether [`AsyncOpen::cancel`] was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Future for AsyncOpen {
    type Output = CoreResult<Realm>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(e) = self.spawn_error.take() {
            return Poll::Ready(Err(e));
        }
        if self.is_cancelled() {
            return Poll::Ready(Err(CoreError::OpenCancelled));
        }
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CoreError::OpenCancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for AsyncOpen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncOpen")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::ManualScheduler;
    use crate::schema::ObjectSchemaDef;
    use tessera_codec::Value;

    fn thing() -> Vec<ObjectSchemaDef> {
        vec![ObjectSchemaDef::new("Thing").property("n", "int")]
    }

    fn config(path: &Path) -> Config {
        Config::new(path)
            .schema(thing())
            .scheduler(Arc::new(ManualScheduler::new()))
    }

    #[test]
    fn handles_share_one_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s");
        let registry = Registry::new();
        let a = registry.open(config(&path)).unwrap();
        let b = registry.open(config(&path)).unwrap();
        a.write(|| {
            a.create("Thing", Value::object([("n", 1)]))?;
            Ok(())
        })
        .unwrap();
        assert_eq!(b.objects("Thing").unwrap().len().unwrap(), 0);
        assert!(b.refresh());
        assert_eq!(b.objects("Thing").unwrap().len().unwrap(), 1);
        a.close();
        assert!(!b.is_closed());
        b.close();
        assert!(!registry.is_open(&path));
    }

    #[test]
    fn incompatible_reopen_is_rejected() {
        let registry = Registry::new();
        let _realm = registry
            .open(Config::in_memory("mem").schema(thing()).scheduler(Arc::new(ManualScheduler::new())))
            .unwrap();
        let err = registry
            .open(Config::new("mem").scheduler(Arc::new(ManualScheduler::new())))
            .unwrap_err();
        assert!(err.to_string().ends_with("already opened with different inMemory settings."));
        let err = registry
            .open(
                Config::in_memory("mem")
                    .schema(thing())
                    .schema_version(1)
                    .scheduler(Arc::new(ManualScheduler::new())),
            )
            .unwrap_err();
        assert!(err.to_string().ends_with("already opened with different schema version."));
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s");
        let registry = Registry::new();
        let realm = registry.open(config(&path)).unwrap();
        realm
            .write(|| {
                realm.create("Thing", Value::object([("n", 7)]))?;
                Ok(())
            })
            .unwrap();
        realm.close();
        assert!(registry.exists(&path));
        assert_eq!(registry.schema_version_at(&path).unwrap(), Some(0));
        let realm = registry.open(config(&path)).unwrap();
        assert_eq!(realm.objects("Thing").unwrap().sum("n").unwrap(), Value::Int(7));
        assert!(registry.delete_files(&path).is_err());
        realm.close();
        registry.delete_files(&path).unwrap();
        assert!(!registry.exists(&path));
    }

    #[test]
    fn close_all_closes_handles() {
        let registry = Registry::new();
        let realm = registry
            .open(Config::in_memory("m").schema(thing()).scheduler(Arc::new(ManualScheduler::new())))
            .unwrap();
        registry.close_all();
        assert!(realm.is_closed());
        assert!(matches!(realm.objects("Thing"), Err(CoreError::StoreClosed)));
    }

    #[test]
    fn compaction_on_launch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s");
        let registry = Registry::new();
        let realm = registry.open(config(&path)).unwrap();
        for n in 0..20 {
            realm
                .write(|| {
                    realm.create("Thing", Value::object([("n", n)]))?;
                    Ok(())
                })
                .unwrap();
        }
        let before = realm.compute_size().unwrap();
        realm.close();
        let realm = registry
            .open(config(&path).should_compact_on_launch(|total, used| total > used))
            .unwrap();
        assert!(realm.compute_size().unwrap() < before);
        assert_eq!(realm.objects("Thing").unwrap().len().unwrap(), 20);
    }

    #[tokio::test]
    async fn async_open_and_cancel() {
        let registry = Registry::new();
        let realm = registry
            .open_async(Config::in_memory("a").schema(thing()).scheduler(Arc::new(ManualScheduler::new())))
            .await
            .unwrap();
        assert!(realm.is_empty().unwrap());
        let pending = registry.open_async(Config::in_memory("b").schema(thing()));
        pending.cancel();
        assert!(matches!(pending.await, Err(CoreError::OpenCancelled)));
    }
}
