//! Test fixtures and realm helpers.
//!
//! Every fixture realm delivers notifications through a
//! [`ManualScheduler`], so listeners only run when a test calls
//! [`TestRealm::deliver`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;
use tessera_core::{Config, ManualScheduler, ObjectSchemaDef, PropertyDef, Realm, Registry, Value};

static NEXT_MEMORY_ID: AtomicU64 = AtomicU64::new(0);

/// A test realm with automatic cleanup.
pub struct TestRealm {
    /// The realm handle.
    pub realm: Realm,
    /// The registry the handle was opened through.
    pub registry: Registry,
    /// Runs posted notification deliveries.
    pub scheduler: Arc<ManualScheduler>,
    config: Config,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestRealm {
    /// Opens a fresh in-memory realm with `schema`.
    pub fn memory(schema: Vec<ObjectSchemaDef>) -> Self {
        let id = NEXT_MEMORY_ID.fetch_add(1, Ordering::Relaxed);
        Self::open(Config::in_memory(format!("testkit-{id}")).schema(schema), None)
    }

    /// Opens a fresh file-backed realm with `schema` in a temporary
    /// directory.
    pub fn file(schema: Vec<ObjectSchemaDef>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("test.tessera");
        Self::open(Config::new(path).schema(schema), Some(temp_dir))
    }

    /// Opens `config`, replacing its scheduler with a manual one.
    pub fn with_config(config: Config) -> Self {
        Self::open(config, None)
    }

    fn open(config: Config, temp_dir: Option<TempDir>) -> Self {
        let scheduler = Arc::new(ManualScheduler::new());
        let config = config.scheduler(scheduler.clone());
        let registry = Registry::new();
        let realm = registry.open(config.clone()).expect("Failed to open realm");
        Self {
            realm,
            registry,
            scheduler,
            config,
            _temp_dir: temp_dir,
        }
    }

    /// The configuration the realm was opened with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the store path if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir
            .as_ref()
            .map(|_| self.config.path.clone())
    }

    /// Opens a second handle on the same store.
    pub fn second_handle(&self) -> Realm {
        self.registry
            .open(self.config.clone())
            .expect("Failed to open second handle")
    }

    /// Closes every handle and opens the store again with `config`.
    ///
    /// Only meaningful for file-backed realms; an in-memory store does
    /// not survive its last handle.
    pub fn reopen_with(mut self, config: Config) -> Self {
        self.registry.close_all();
        let config = config.scheduler(self.scheduler.clone());
        self.realm = self.registry.open(config.clone()).expect("Failed to reopen realm");
        self.config = config;
        self
    }

    /// Closes every handle and opens the store again unchanged.
    pub fn reopen(self) -> Self {
        let config = self.config.clone();
        self.reopen_with(config)
    }

    /// Runs every pending notification delivery. Returns how many
    /// deliveries ran.
    pub fn deliver(&self) -> usize {
        self.scheduler.run_pending()
    }

    /// Creates one object in its own write transaction.
    pub fn create_one(&self, class: &str, value: impl Into<Value>) -> tessera_core::Object {
        let value = value.into();
        self.realm
            .write(|| self.realm.create(class, value))
            .expect("Failed to create object")
    }
}

impl std::ops::Deref for TestRealm {
    type Target = Realm;

    fn deref(&self) -> &Self::Target {
        &self.realm
    }
}

/// Collects every value passed to a listener.
///
/// ```rust,ignore
/// let changes = Recorder::new();
/// results.add_listener(changes.sink()).unwrap();
/// ```
pub struct Recorder<T> {
    seen: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send + 'static> Recorder<T> {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A listener callback that appends a clone of its argument.
    pub fn sink(&self) -> impl Fn(&T) + Send + Sync + 'static {
        let seen = Arc::clone(&self.seen);
        move |value: &T| seen.lock().push(value.clone())
    }

    /// Everything recorded so far.
    pub fn calls(&self) -> Vec<T> {
        self.seen.lock().clone()
    }

    /// Number of recorded calls.
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }

    /// The most recent call.
    pub fn last(&self) -> Option<T> {
        self.seen.lock().last().cloned()
    }
}

impl<T: Clone + Send + 'static> Default for Recorder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A `Person` class with a primary key, a to-one link, a list of links,
/// a primitive list and linking objects.
pub fn people_schema() -> Vec<ObjectSchemaDef> {
    vec![
        ObjectSchemaDef::new("Person")
            .primary_key("id")
            .property("id", "int")
            .property("name", "string")
            .property("age", PropertyDef::new("int").indexed())
            .property("email", "string?")
            .property("partner", "Person")
            .property("friends", "Person[]")
            .property("nicknames", "string[]")
            .property("dogs", PropertyDef::linking_objects("Dog", "owner")),
        ObjectSchemaDef::new("Dog")
            .property("name", "string")
            .property("owner", "Person"),
    ]
}

/// A `Person` literal for [`people_schema`].
pub fn person(id: i64, name: &str, age: i64) -> Value {
    Value::object([
        ("id", Value::from(id)),
        ("name", Value::from(name)),
        ("age", Value::from(age)),
    ])
}

/// Runs a test with a temporary in-memory realm.
///
/// # Example
///
/// ```rust,ignore
/// use tessera_testkit::{people_schema, with_temp_realm};
///
/// #[test]
/// fn my_test() {
///     with_temp_realm(people_schema(), |t| {
///         assert!(t.realm.is_empty().unwrap());
///     });
/// }
/// ```
pub fn with_temp_realm<F, R>(schema: Vec<ObjectSchemaDef>, f: F) -> R
where
    F: FnOnce(&TestRealm) -> R,
{
    let test = TestRealm::memory(schema);
    f(&test)
}

/// Runs a test with a temporary file-backed realm.
pub fn with_file_realm<F, R>(schema: Vec<ObjectSchemaDef>, f: F) -> R
where
    F: FnOnce(&TestRealm, &Path) -> R,
{
    let test = TestRealm::file(schema);
    let path = test.path().expect("File realm should have a path");
    f(&test, &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// A realm holding `count` people with ids `0..count`, names
    /// `person-<id>` and ages `20 + id % 50`.
    pub fn populated_realm(count: i64) -> TestRealm {
        let test = TestRealm::memory(people_schema());
        test.realm
            .write(|| {
                for id in 0..count {
                    test.realm
                        .create("Person", person(id, &format!("person-{id}"), 20 + id % 50))?;
                }
                Ok(())
            })
            .expect("Failed to populate realm");
        test
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_realm() {
        let test = TestRealm::memory(people_schema());
        assert!(test.is_empty().unwrap());
        assert!(test.path().is_none());
    }

    #[test]
    fn test_with_temp_realm() {
        with_temp_realm(people_schema(), |t| {
            t.create_one("Person", person(1, "Ann", 30));
            assert_eq!(t.objects("Person").unwrap().len().unwrap(), 1);
        });
    }

    #[test]
    fn test_file_realm_survives_reopen() {
        let test = TestRealm::file(people_schema());
        test.create_one("Person", person(1, "Ann", 30));
        let test = test.reopen();
        let ann = test.object_for_primary_key("Person", 1).unwrap().unwrap();
        assert_eq!(ann.get("name").unwrap(), Value::from("Ann"));
    }

    #[test]
    fn test_recorder_collects_changes() {
        let t = TestRealm::memory(people_schema());
        let changes = Recorder::<tessera_core::ChangeSet>::new();
        t.objects("Person").unwrap().add_listener(changes.sink()).unwrap();
        t.create_one("Person", person(1, "Ann", 30));
        assert!(changes.is_empty());
        t.deliver();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes.last().unwrap().insertions, vec![0]);
    }

    #[test]
    fn test_populated_scenario() {
        let test = scenarios::populated_realm(10);
        assert_eq!(test.objects("Person").unwrap().len().unwrap(), 10);
    }
}
