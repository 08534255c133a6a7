//! Store configuration.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::CoreResult;
use crate::migration::OldRealm;
use crate::notification::Scheduler;
use crate::realm::Realm;
use crate::schema::ObjectSchemaDef;

/// Migration handler: `(old, new)`. The new realm is inside the migration
/// write transaction.
pub type MigrationFn = Arc<dyn Fn(&OldRealm, &Realm) -> CoreResult<()> + Send + Sync>;

/// Compaction predicate: `(total_bytes, used_bytes) -> compact?`.
pub type CompactPredicate = Arc<dyn Fn(u64, u64) -> bool + Send + Sync>;

/// Configuration for opening a store.
#[derive(Clone)]
pub struct Config {
    /// Store directory, or the registry name of an in-memory store.
    pub path: PathBuf,

    /// Keep the store in memory only.
    pub in_memory: bool,

    /// Requested schema. `None` opens with the stored schema.
    pub schema: Option<Vec<ObjectSchemaDef>>,

    /// Requested schema version. `None` means 0 when a schema is given, the
    /// stored version otherwise.
    pub schema_version: Option<u64>,

    /// Handler run when the schema version increases.
    pub migration: Option<MigrationFn>,

    /// Where listener deliveries are posted. `None` starts a delivery
    /// thread per store handle.
    pub scheduler: Option<Arc<dyn Scheduler>>,

    /// Reject write transactions.
    pub read_only: bool,

    /// Fsync the commit log on every commit.
    pub sync_on_commit: bool,

    /// Create the store if it does not exist.
    pub create_if_missing: bool,

    /// Wipe the data instead of failing when a migration would be needed.
    pub delete_if_migration_needed: bool,

    /// Asked at open whether the commit log should be compacted.
    pub should_compact_on_launch: Option<CompactPredicate>,

    /// Compact automatically once the log grows past this many bytes
    /// (0 disables).
    pub max_log_size: u64,

    /// Advance to the latest version before each notification delivery.
    pub auto_refresh: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("default.tessera"),
            in_memory: true,
            schema: None,
            schema_version: None,
            migration: None,
            scheduler: None,
            read_only: false,
            sync_on_commit: true,
            create_if_missing: true,
            delete_if_migration_needed: false,
            should_compact_on_launch: None,
            max_log_size: 64 * 1024 * 1024,
            auto_refresh: true,
        }
    }
}

impl Config {
    /// Configuration for a file-backed store at `path`.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            in_memory: false,
            ..Self::default()
        }
    }

    /// Configuration for an in-memory store registered under `name`.
    #[must_use]
    pub fn in_memory(name: impl AsRef<Path>) -> Self {
        Self {
            path: name.as_ref().to_path_buf(),
            in_memory: true,
            ..Self::default()
        }
    }

    /// Sets the schema.
    #[must_use]
    pub fn schema(mut self, schema: Vec<ObjectSchemaDef>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Sets the schema version.
    #[must_use]
    pub const fn schema_version(mut self, version: u64) -> Self {
        self.schema_version = Some(version);
        self
    }

    /// Sets the migration handler.
    #[must_use]
    pub fn migration<F>(mut self, f: F) -> Self
    where
        F: Fn(&OldRealm, &Realm) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.migration = Some(Arc::new(f));
        self
    }

    /// Sets the notification scheduler.
    #[must_use]
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Opens the store read-only.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets whether to fsync the log on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets whether to create a missing store.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to wipe data instead of requiring a migration.
    #[must_use]
    pub const fn delete_if_migration_needed(mut self, value: bool) -> Self {
        self.delete_if_migration_needed = value;
        self
    }

    /// Sets the compact-on-launch predicate.
    #[must_use]
    pub fn should_compact_on_launch<F>(mut self, f: F) -> Self
    where
        F: Fn(u64, u64) -> bool + Send + Sync + 'static,
    {
        self.should_compact_on_launch = Some(Arc::new(f));
        self
    }

    /// Sets the automatic compaction threshold.
    #[must_use]
    pub const fn max_log_size(mut self, bytes: u64) -> Self {
        self.max_log_size = bytes;
        self
    }

    /// Sets whether deliveries refresh the realm first.
    #[must_use]
    pub const fn auto_refresh(mut self, value: bool) -> Self {
        self.auto_refresh = value;
        self
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("in_memory", &self.in_memory)
            .field("schema_classes", &self.schema.as_ref().map(Vec::len))
            .field("schema_version", &self.schema_version)
            .field("has_migration", &self.migration.is_some())
            .field("read_only", &self.read_only)
            .field("sync_on_commit", &self.sync_on_commit)
            .field("create_if_missing", &self.create_if_missing)
            .field("delete_if_migration_needed", &self.delete_if_migration_needed)
            .field("max_log_size", &self.max_log_size)
            .field("auto_refresh", &self.auto_refresh)
            .finish_non_exhaustive()
    }
}
