//! Schema versioning and migrations.
//!
//! When a realm opens with a schema, the requested schema is reconciled
//! with the stored one:
//!
//! - a new store takes the requested schema and version as they are;
//! - a lower version than the stored one is rejected;
//! - at the same version only additive changes (new classes, new or
//!   changed indexes) are applied, anything else needs a migration;
//! - a higher version runs the migration handler inside one write
//!   transaction, with the pre-migration data available as an
//!   [`OldRealm`].
//!
//! Classes the store has but the requested schema omits are kept.

use std::sync::Arc;

use tessera_codec::{ObjKey, ObjLink, Value};

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::query::{self, ElementKind, QueryArg};
use crate::realm::Realm;
use crate::schema::{diff, Schema, SchemaChange};
use crate::storage::{State, WorkingState};

/// Read-only view of the data as it was before a migration.
#[derive(Clone)]
pub struct OldRealm {
    state: Arc<State>,
}

impl OldRealm {
    pub(crate) fn new(state: Arc<State>) -> Self {
        Self { state }
    }

    /// The stored schema before the migration.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        self.state.schema()
    }

    /// The stored schema version before the migration.
    #[must_use]
    pub fn schema_version(&self) -> u64 {
        self.state.schema_version()
    }

    /// Every object of `class`, in creation order.
    ///
    /// # Errors
    ///
    /// `Object type 'X' not found in schema.`
    pub fn objects(&self, class: &str) -> CoreResult<Vec<OldObject>> {
        Ok(self
            .state
            .table(class)?
            .keys()
            .map(|key| self.object(class, key))
            .collect())
    }

    /// Objects of `class` matching `predicate`.
    ///
    /// # Errors
    ///
    /// Unknown classes and any query error.
    pub fn filtered(&self, class: &str, predicate: &str, args: &[QueryArg]) -> CoreResult<Vec<OldObject>> {
        let all = self
            .state
            .table(class)?
            .keys()
            .map(|key| Value::Link(ObjLink::new(class, key)))
            .collect();
        let kind = ElementKind::Object(class.to_string());
        Ok(query::run(&self.state, &kind, all, predicate, args)?
            .iter()
            .filter_map(Value::as_link)
            .map(|link| self.object(class, link.key))
            .collect())
    }

    /// The object of `class` with primary key `key`.
    ///
    /// # Errors
    ///
    /// Unknown classes.
    pub fn object_for_primary_key(&self, class: &str, key: impl Into<Value>) -> CoreResult<Option<OldObject>> {
        Ok(self
            .state
            .table(class)?
            .find_primary(&key.into())
            .map(|k| self.object(class, k)))
    }

    fn object(&self, class: &str, key: ObjKey) -> OldObject {
        OldObject {
            state: Arc::clone(&self.state),
            link: ObjLink::new(class, key),
        }
    }
}

impl std::fmt::Debug for OldRealm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OldRealm")
            .field("schema_version", &self.schema_version())
            .finish_non_exhaustive()
    }
}

/// An object as it was before a migration.
#[derive(Clone)]
pub struct OldObject {
    state: Arc<State>,
    link: ObjLink,
}

impl OldObject {
    /// Class of the object.
    #[must_use]
    pub fn class(&self) -> &str {
        &self.link.class
    }

    /// Object key; objects keep their key through a migration.
    #[must_use]
    pub fn key(&self) -> ObjKey {
        self.link.key
    }

    /// Reads a property under the old schema.
    ///
    /// # Errors
    ///
    /// `Property 'p' does not exist on 'T' objects` when the old schema has
    /// no such property.
    pub fn get(&self, name: &str) -> CoreResult<Value> {
        let class = self.state.schema().require(&self.link.class)?;
        let prop = class.property(name).ok_or_else(|| {
            CoreError::schema(format!(
                "Property '{name}' does not exist on '{}' objects",
                self.link.class
            ))
        })?;
        self.state.read(&self.link, prop)
    }
}

impl std::fmt::Debug for OldObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OldObject").field("link", &self.link).finish()
    }
}

/// What opening with a schema does to the stored data.
#[derive(Debug)]
enum Plan {
    Keep,
    /// Replace the schema without touching data or version.
    Extend(Schema),
    /// Wipe everything and start over at the requested schema.
    Reset(Schema, u64),
    /// Run the migration handler.
    Migrate(Schema, u64),
}

fn plan(stored: &State, requested: Schema, version: u64, is_new: bool, config: &Config) -> CoreResult<Plan> {
    if is_new {
        return Ok(Plan::Reset(requested, version));
    }
    let stored_version = stored.schema_version();
    if version < stored_version {
        return Err(CoreError::schema(format!(
            "Provided schema version {version} is less than last set version {stored_version}."
        )));
    }
    let changes = diff(stored.schema(), &requested);
    let blocking: Vec<&SchemaChange> = changes.iter().filter(|c| c.requires_migration()).collect();
    let target = requested.merged_with(stored.schema());
    if !blocking.is_empty() && config.delete_if_migration_needed {
        return Ok(Plan::Reset(target, version));
    }
    if version > stored_version {
        return Ok(Plan::Migrate(target, version));
    }
    if !blocking.is_empty() {
        let lines: String = blocking.iter().map(|c| format!("\n- {c}")).collect();
        return Err(CoreError::schema(format!(
            "Migration is required due to the following errors:{lines}"
        )));
    }
    if diff(stored.schema(), &target).is_empty() {
        Ok(Plan::Keep)
    } else {
        Ok(Plan::Extend(target))
    }
}

/// Reconciles the realm's stored schema with `config`.
///
/// # Errors
///
/// Version and migration errors, any error of the migration handler, and
/// duplicate primary keys left behind by the handler.
pub(crate) fn prepare(realm: &Realm, config: &Config, is_new: bool) -> CoreResult<()> {
    let stored = realm.snapshot();
    let Some(defs) = &config.schema else {
        if let Some(version) = config.schema_version {
            if version < stored.schema_version() {
                return Err(CoreError::schema(format!(
                    "Provided schema version {version} is less than last set version {}.",
                    stored.schema_version()
                )));
            }
        }
        return Ok(());
    };
    let requested = Schema::new(defs.clone())?;
    let version = config.schema_version.unwrap_or(0);
    let plan = plan(&stored, requested, version, is_new, config)?;
    if matches!(plan, Plan::Keep) {
        return Ok(());
    }
    if realm.is_read_only() {
        return Err(CoreError::schema(
            "The schema of a read-only Realm cannot be changed.",
        ));
    }
    match plan {
        Plan::Keep => Ok(()),
        Plan::Extend(schema) => {
            tracing::debug!(classes = schema.len(), "schema extended");
            realm.write(|| {
                realm.mutate(|w| {
                    w.replace_schema(Arc::new(schema));
                    Ok(())
                })
            })
        }
        Plan::Reset(schema, version) => {
            if !is_new {
                tracing::info!(schema_version = version, "store reset for schema change");
            }
            realm.write(|| {
                realm.mutate(|w| {
                    w.delete_everything()?;
                    w.replace_schema(Arc::new(schema));
                    w.set_schema_version(version);
                    Ok(())
                })
            })
        }
        Plan::Migrate(schema, version) => migrate(realm, config, stored, schema, version),
    }
}

fn migrate(realm: &Realm, config: &Config, stored: Arc<State>, schema: Schema, version: u64) -> CoreResult<()> {
    let from = stored.schema_version();
    tracing::info!(from, to = version, "running migration");
    let old = OldRealm::new(stored);
    realm.write(|| {
        realm.mutate(|w: &mut WorkingState| w.begin_migration(Arc::new(schema), version))?;
        if let Some(handler) = &config.migration {
            handler(&old, realm).map_err(|e| match e {
                CoreError::Callback { message } => CoreError::migration_failed(message),
                other => other,
            })?;
        }
        realm.mutate(WorkingState::finish_migration)
    })?;
    tracing::info!(from, to = version, "migration complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::ManualScheduler;
    use crate::registry::Registry;
    use crate::schema::ObjectSchemaDef;

    fn person_v0() -> Vec<ObjectSchemaDef> {
        vec![ObjectSchemaDef::new("Person")
            .primary_key("id")
            .property("id", "int")
            .property("first", "string")
            .property("last", "string")]
    }

    fn person_v1() -> Vec<ObjectSchemaDef> {
        vec![ObjectSchemaDef::new("Person")
            .primary_key("id")
            .property("id", "int")
            .property("name", "string")]
    }

    fn config(dir: &std::path::Path) -> Config {
        Config::new(dir.join("store")).scheduler(Arc::new(ManualScheduler::new()))
    }

    fn seed(registry: &Registry, dir: &std::path::Path) {
        let realm = registry.open(config(dir).schema(person_v0())).unwrap();
        realm
            .write(|| {
                realm.create(
                    "Person",
                    Value::object([
                        ("id", Value::from(1)),
                        ("first", Value::from("Ada")),
                        ("last", Value::from("Lovelace")),
                    ]),
                )?;
                Ok(())
            })
            .unwrap();
        realm.close();
    }

    #[test]
    fn migration_copies_old_values() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new();
        seed(&registry, dir.path());
        let realm = registry
            .open(
                config(dir.path())
                    .schema(person_v1())
                    .schema_version(1)
                    .migration(|old, new| {
                        for person in old.objects("Person")? {
                            let name = format!(
                                "{} {}",
                                person.get("first")?.as_str().unwrap_or_default(),
                                person.get("last")?.as_str().unwrap_or_default()
                            );
                            let id = person.get("id")?;
                            if let Some(obj) = new.object_for_primary_key("Person", id)? {
                                obj.set("name", name)?;
                            }
                        }
                        Ok(())
                    }),
            )
            .unwrap();
        assert_eq!(realm.schema_version().unwrap(), 1);
        let ada = realm.object_for_primary_key("Person", 1).unwrap().unwrap();
        assert_eq!(ada.get("name").unwrap(), Value::from("Ada Lovelace"));
    }

    #[test]
    fn same_version_change_needs_migration() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new();
        seed(&registry, dir.path());
        let err = registry.open(config(dir.path()).schema(person_v1())).unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("Migration is required due to the following errors:\n- "));
        assert!(text.contains("'Person.name' has been added"));
    }

    #[test]
    fn lower_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new();
        let realm = registry
            .open(config(dir.path()).schema(person_v0()).schema_version(3))
            .unwrap();
        realm.close();
        let err = registry
            .open(config(dir.path()).schema(person_v0()).schema_version(2))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Provided schema version 2 is less than last set version 3."
        );
    }

    #[test]
    fn delete_if_migration_needed_wipes_data() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new();
        seed(&registry, dir.path());
        let realm = registry
            .open(
                config(dir.path())
                    .schema(person_v1())
                    .delete_if_migration_needed(true),
            )
            .unwrap();
        assert!(realm.is_empty().unwrap());
        assert!(realm.schema().unwrap().get("Person").unwrap().property("name").is_some());
    }

    #[test]
    fn duplicate_primary_keys_fail_the_migration() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new();
        let realm = registry.open(config(dir.path()).schema(person_v0())).unwrap();
        realm
            .write(|| {
                for id in [1, 2] {
                    realm.create(
                        "Person",
                        Value::object([
                            ("id", Value::from(id)),
                            ("first", Value::from("x")),
                            ("last", Value::from("y")),
                        ]),
                    )?;
                }
                Ok(())
            })
            .unwrap();
        realm.close();
        let err = registry
            .open(
                config(dir.path())
                    .schema(person_v0())
                    .schema_version(1)
                    .migration(|_, new| {
                        for person in new.objects("Person")?.objects()? {
                            person.set("id", 7)?;
                        }
                        Ok(())
                    }),
            )
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Primary key property 'Person.id' has duplicate values after migration."
        );
        let realm = registry.open(config(dir.path())).unwrap();
        assert_eq!(realm.schema_version().unwrap(), 0);
    }

    #[test]
    fn additive_changes_apply_without_a_version_bump() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new();
        seed(&registry, dir.path());
        let mut defs = person_v0();
        defs.push(ObjectSchemaDef::new("Dog").property("name", "string"));
        let realm = registry.open(config(dir.path()).schema(defs)).unwrap();
        assert!(realm.schema().unwrap().contains("Dog"));
        assert_eq!(realm.objects("Person").unwrap().len().unwrap(), 1);
    }
}
