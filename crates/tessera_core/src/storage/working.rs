//! Mutations applied inside a write transaction.
//!
//! [`WorkingState`] owns the writer's private copy of the store and
//! implements object creation, update, property assignment, collection
//! replacement and deletion (with embedded cascade and incoming-link
//! cleanup). Every touched object is recorded in a [`ChangeLog`] so the
//! commit can be written as a delta.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tessera_codec::{ObjKey, ObjLink, Value};

use super::row::Row;
use super::state::State;
use crate::error::{CoreError, CoreResult};
use crate::schema::{CollectionType, ObjectSchema, Property, PropertyType, Schema};
use crate::types::{UpdateMode, Version};

/// What a write transaction changed.
#[derive(Debug, Clone, Default)]
pub(crate) struct ChangeLog {
    /// Objects whose row was written or removed.
    pub touched: BTreeSet<ObjLink>,
    /// Classes whose table was emptied; replayed before `touched`.
    pub cleared: BTreeSet<String>,
    /// Whether the schema itself changed.
    pub schema_changed: bool,
}

impl ChangeLog {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.touched.is_empty() && self.cleared.is_empty() && !self.schema_changed
    }
}

/// A writer's private, mutable copy of the store.
#[derive(Debug)]
pub(crate) struct WorkingState {
    pub state: State,
    pub version: Version,
    pub changes: ChangeLog,
    /// Primary keys may be rewritten; uniqueness is checked by
    /// [`WorkingState::finish_migration`].
    migrating: bool,
}

impl WorkingState {
    /// Starts a working copy on top of `base`.
    pub fn new(base: &State) -> Self {
        let mut state = base.clone();
        let version = base.version().next();
        state.set_version(version);
        Self {
            state,
            version,
            changes: ChangeLog::default(),
            migrating: false,
        }
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::clone(self.state.schema())
    }

    fn class(&self, name: &str) -> CoreResult<Arc<ObjectSchema>> {
        self.state.schema().require(name).map(Arc::clone)
    }

    /// Creates a top-level object, or updates the existing one with the
    /// same primary key according to `mode`.
    pub fn create(&mut self, class: &str, value: Value, mode: UpdateMode) -> CoreResult<ObjKey> {
        let schema = self.class(class)?;
        if schema.embedded {
            return Err(CoreError::constraint(format!(
                "Cannot create an object of embedded type '{class}' outside of a parent"
            )));
        }
        self.create_object(&schema, value, mode)
    }

    fn create_object(
        &mut self,
        schema: &Arc<ObjectSchema>,
        value: Value,
        mode: UpdateMode,
    ) -> CoreResult<ObjKey> {
        let mut map = match value {
            Value::Object(map) => map,
            other => {
                return Err(CoreError::constraint(format!(
                    "Cannot create an object of type '{}' from a value of type '{}'",
                    schema.name,
                    other.type_name()
                )))
            }
        };

        if let Some(pk) = schema.primary_key_property() {
            let pk_value = match map.get(&pk.name) {
                Some(v) => convert_scalar(schema, pk, v.clone())?,
                None => pk
                    .default
                    .clone()
                    .or_else(|| pk.implicit_value())
                    .ok_or_else(|| missing_value(schema, pk))?,
            };
            if let Some(existing) = self.state.table(&schema.name)?.find_primary(&pk_value) {
                if mode == UpdateMode::Never {
                    return Err(duplicate_primary_key(&schema.name, &pk_value));
                }
                map.remove(&pk.name);
                self.update_object(schema, existing, map, mode)?;
                return Ok(existing);
            }
        }

        for prop in schema.persisted() {
            if !map.contains_key(&prop.name) && prop.default.is_none() && prop.implicit_value().is_none() {
                return Err(missing_value(schema, prop));
            }
        }

        let key = self.state.allocate_key();
        let mut values = Vec::with_capacity(schema.column_count());
        for prop in schema.persisted() {
            let value = match map.remove(&prop.name) {
                Some(v) => self.convert(schema, prop, v, mode)?,
                None => prop
                    .default
                    .clone()
                    .or_else(|| prop.implicit_value())
                    .ok_or_else(|| missing_value(schema, prop))?,
            };
            values.push(value);
        }
        self.put_row(schema, key, Row::new(values, self.version))?;
        Ok(key)
    }

    fn update_object(
        &mut self,
        schema: &Arc<ObjectSchema>,
        key: ObjKey,
        mut map: BTreeMap<String, Value>,
        mode: UpdateMode,
    ) -> CoreResult<()> {
        let link = ObjLink::new(schema.name.clone(), key);
        let mut row = self
            .state
            .row(&link)
            .ok_or_else(CoreError::object_invalidated)?
            .as_ref()
            .clone();
        row.values.resize(schema.column_count(), Value::Null);

        let mut changed = false;
        let mut replaced = Vec::new();
        for prop in schema.persisted() {
            let Some(column) = prop.column else { continue };
            if prop.is_primary {
                continue;
            }
            let new = match map.remove(&prop.name) {
                Some(v) => self.convert(schema, prop, v, mode)?,
                None if mode == UpdateMode::All => match &prop.default {
                    Some(default) => default.clone(),
                    None => continue,
                },
                None => continue,
            };
            if mode == UpdateMode::Modified && new == row.values[column] {
                continue;
            }
            let old = std::mem::replace(&mut row.values[column], new);
            replaced.push((prop.clone(), old));
            changed = true;
        }
        if changed {
            row.modified = self.version;
            let new_row = row.clone();
            self.put_row(schema, key, new_row)?;
            for (prop, old) in replaced {
                let Some(column) = prop.column else { continue };
                self.drop_replaced_embedded(&prop, &old, &row.values[column])?;
            }
        }
        Ok(())
    }

    /// Assigns one property of an existing object.
    pub fn set_property(&mut self, link: &ObjLink, name: &str, value: Value) -> CoreResult<()> {
        let schema = self.class(&link.class)?;
        let prop = schema
            .property(name)
            .ok_or_else(|| {
                CoreError::constraint(format!(
                    "Property '{name}' does not exist on '{}' objects",
                    schema.name
                ))
            })?
            .clone();
        if prop.is_computed() {
            return Err(CoreError::constraint(format!(
                "Cannot set read-only property '{}.{}'",
                schema.name, prop.name
            )));
        }
        let current = self.state.read(link, &prop)?;
        if prop.is_primary && !self.migrating {
            let new = convert_scalar(&schema, &prop, value)?;
            if new.loose_eq(&current) {
                return Ok(());
            }
            return Err(CoreError::constraint(format!(
                "Cannot modify primary key after creation: '{}.{}'",
                schema.name, prop.name
            )));
        }
        let new = self.convert(&schema, &prop, value, UpdateMode::Modified)?;
        self.write_column(&schema, link, &prop, new)
    }

    /// Replaces the whole content of a list or set property.
    pub fn replace_collection(
        &mut self,
        link: &ObjLink,
        prop: &Property,
        items: Vec<Value>,
    ) -> CoreResult<()> {
        let schema = self.class(&link.class)?;
        if !self.state.contains(link) {
            return Err(CoreError::list_invalidated());
        }
        if !prop.is_collection() {
            return self.set_property(link, &prop.name, Value::List(items));
        }
        // Links already held by the collection are kept as they are, which
        // lets embedded objects move within their own list.
        let current = self.state.read(link, prop)?;
        let held: BTreeSet<ObjLink> = links_in(&current).cloned().collect();
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::Link(l) if held.contains(&l) => out.push(Value::Link(l)),
                other => out.push(self.convert_element(&schema, prop, other, UpdateMode::Never)?),
            }
        }
        if prop.is_set() {
            normalize_set(&mut out);
        }
        self.write_column(&schema, link, prop, Value::List(out))
    }

    fn write_column(
        &mut self,
        schema: &Arc<ObjectSchema>,
        link: &ObjLink,
        prop: &Property,
        value: Value,
    ) -> CoreResult<()> {
        let Some(column) = prop.column else {
            return Ok(());
        };
        let mut row = self
            .state
            .row(link)
            .ok_or_else(CoreError::object_invalidated)?
            .as_ref()
            .clone();
        row.values.resize(schema.column_count(), Value::Null);
        let old = std::mem::replace(&mut row.values[column], value.clone());
        row.modified = self.version;
        self.put_row(schema, link.key, row)?;
        self.drop_replaced_embedded(prop, &old, &value)
    }

    /// Deletes embedded objects that were referenced by `old` but not by
    /// `new`.
    fn drop_replaced_embedded(&mut self, prop: &Property, old: &Value, new: &Value) -> CoreResult<()> {
        if !self.targets_embedded(prop) {
            return Ok(());
        }
        let kept: BTreeSet<&ObjLink> = links_in(new).collect();
        let orphans: Vec<ObjLink> = links_in(old).filter(|l| !kept.contains(l)).cloned().collect();
        if !orphans.is_empty() {
            self.delete_objects(orphans)?;
        }
        Ok(())
    }

    fn targets_embedded(&self, prop: &Property) -> bool {
        prop.is_link()
            && prop
                .object_type
                .as_deref()
                .and_then(|t| self.state.schema().get(t))
                .is_some_and(|t| t.embedded)
    }

    /// Converts an input value for `prop`, creating nested objects from
    /// object literals.
    fn convert(
        &mut self,
        schema: &Arc<ObjectSchema>,
        prop: &Property,
        value: Value,
        mode: UpdateMode,
    ) -> CoreResult<Value> {
        if prop.is_computed() {
            return Err(CoreError::constraint(format!(
                "Cannot set read-only property '{}.{}'",
                schema.name, prop.name
            )));
        }
        let Some(kind) = prop.collection else {
            return self.convert_element(schema, prop, value, mode);
        };
        let items = match value {
            Value::List(items) => items,
            Value::Null => Vec::new(),
            other => return Err(type_mismatch(schema, prop, &prop.label(), &other)),
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(self.convert_element(schema, prop, item, mode)?);
        }
        if kind == CollectionType::Set {
            normalize_set(&mut out);
        }
        Ok(Value::List(out))
    }

    fn convert_element(
        &mut self,
        schema: &Arc<ObjectSchema>,
        prop: &Property,
        value: Value,
        mode: UpdateMode,
    ) -> CoreResult<Value> {
        match prop.ty {
            PropertyType::Object => self.convert_link(schema, prop, value, mode),
            PropertyType::Mixed => match value {
                Value::Link(link) if !self.state.contains(&link) => {
                    Err(CoreError::object_invalidated())
                }
                v @ (Value::List(_) | Value::Object(_)) => {
                    Err(type_mismatch(schema, prop, "mixed", &v))
                }
                v => Ok(v),
            },
            _ => convert_scalar(schema, prop, value),
        }
    }

    fn convert_link(
        &mut self,
        schema: &Arc<ObjectSchema>,
        prop: &Property,
        value: Value,
        mode: UpdateMode,
    ) -> CoreResult<Value> {
        let target = self.class(prop.object_type.as_deref().unwrap_or_default())?;
        match value {
            Value::Null if prop.is_collection() => Err(CoreError::constraint(format!(
                "Property '{}.{}' cannot contain null",
                schema.name, prop.name
            ))),
            Value::Null => Ok(Value::Null),
            Value::Link(link) => {
                if link.class != target.name {
                    return Err(CoreError::constraint(format!(
                        "Object of type '{}' cannot be assigned to property '{}.{}' of type '{}'",
                        link.class, schema.name, prop.name, target.name
                    )));
                }
                if !self.state.contains(&link) {
                    return Err(CoreError::object_invalidated());
                }
                if target.embedded {
                    return Err(CoreError::constraint(format!(
                        "Cannot set a link to an existing managed embedded object of type '{}'",
                        target.name
                    )));
                }
                Ok(Value::Link(link))
            }
            v @ Value::Object(_) => {
                let key = self.create_object(&target, v, mode)?;
                Ok(Value::Link(ObjLink::new(target.name.clone(), key)))
            }
            other => Err(type_mismatch(schema, prop, &target.name, &other)),
        }
    }

    fn put_row(&mut self, schema: &ObjectSchema, key: ObjKey, row: Row) -> CoreResult<()> {
        let pk_value = schema
            .primary_key_property()
            .and_then(|p| p.column)
            .map(|c| row.get(c).clone());
        self.state
            .table_mut(&schema.name)?
            .put(key, row)
            .map_err(|_| duplicate_primary_key(&schema.name, &pk_value.unwrap_or(Value::Null)))?;
        self.changes.touched.insert(ObjLink::new(schema.name.clone(), key));
        Ok(())
    }

    /// Deletes one object with its embedded descendants.
    pub fn delete(&mut self, link: &ObjLink) -> CoreResult<()> {
        if !self.state.contains(link) {
            return Err(CoreError::object_invalidated());
        }
        self.delete_objects(vec![link.clone()])
    }

    /// Deletes every object of `class`.
    pub fn delete_all(&mut self, class: &str) -> CoreResult<()> {
        let keys: Vec<ObjLink> = self
            .state
            .table(class)?
            .keys()
            .map(|k| ObjLink::new(class, k))
            .collect();
        if keys.is_empty() {
            return Ok(());
        }
        self.delete_objects(keys)?;
        self.changes.touched.retain(|l| l.class != class);
        self.changes.cleared.insert(class.to_string());
        Ok(())
    }

    /// Deletes every object of every class.
    pub fn delete_everything(&mut self) -> CoreResult<()> {
        let classes: Vec<String> = self.state.schema().names().map(str::to_string).collect();
        for class in classes {
            self.delete_all(&class)?;
        }
        Ok(())
    }

    /// Removes `roots` and their embedded descendants, then prunes every
    /// link that pointed at a removed object.
    pub fn delete_objects(&mut self, roots: Vec<ObjLink>) -> CoreResult<()> {
        let schema = self.schema();
        let mut doomed: BTreeSet<ObjLink> = BTreeSet::new();
        let mut stack = roots;
        while let Some(link) = stack.pop() {
            let Some(row) = self.state.row(&link) else { continue };
            if !doomed.insert(link.clone()) {
                continue;
            }
            let Some(class) = schema.get(&link.class) else { continue };
            for prop in class.persisted().filter(|p| self.targets_embedded(p)) {
                if let Some(column) = prop.column {
                    stack.extend(links_in(row.get(column)).cloned());
                }
            }
        }

        let mut by_class: BTreeMap<String, BTreeSet<ObjKey>> = BTreeMap::new();
        for link in &doomed {
            self.state.table_mut(&link.class)?.remove(link.key);
            self.changes.touched.insert(link.clone());
            by_class.entry(link.class.clone()).or_default().insert(link.key);
        }

        for (class, keys) in &by_class {
            let referrers: Vec<(Arc<ObjectSchema>, usize)> = schema
                .incoming_links(class)
                .filter_map(|(c, p)| p.column.map(|col| (Arc::clone(c), col)))
                .collect();
            for (ref_class, column) in referrers {
                let updates: Vec<(ObjKey, Row)> = self
                    .state
                    .table(&ref_class.name)?
                    .iter()
                    .filter_map(|(key, row)| {
                        let pruned = prune_links(row.get(column), class, keys)?;
                        let mut row = row.as_ref().clone();
                        row.values.resize(ref_class.column_count(), Value::Null);
                        row.values[column] = pruned;
                        row.modified = self.version;
                        Some((key, row))
                    })
                    .collect();
                for (key, row) in updates {
                    self.put_row(&ref_class, key, row)?;
                }
            }
        }
        tracing::trace!(deleted = doomed.len(), "objects deleted");
        Ok(())
    }

    /// Replaces the schema of the working copy (migrations only).
    pub fn replace_schema(&mut self, schema: Arc<Schema>) {
        self.state.replace_schema(schema);
        self.changes.schema_changed = true;
    }

    /// Records a new schema version (migrations only).
    pub fn set_schema_version(&mut self, v: u64) {
        self.state.set_schema_version(v);
        self.changes.schema_changed = true;
    }

    /// Moves to `schema` at version `v` and lets primary keys change until
    /// [`WorkingState::finish_migration`].
    pub fn begin_migration(&mut self, schema: Arc<Schema>, v: u64) -> CoreResult<()> {
        self.replace_schema(schema);
        self.set_schema_version(v);
        self.migrating = true;
        let classes: Vec<String> = self
            .state
            .schema()
            .iter()
            .filter(|c| c.primary_key.is_some())
            .map(|c| c.name.clone())
            .collect();
        for class in classes {
            self.state.table_mut(&class)?.defer_primary_key();
        }
        Ok(())
    }

    /// Checks primary key uniqueness of every class again.
    ///
    /// # Errors
    ///
    /// `Primary key property 'T.p' has duplicate values after migration.`
    pub fn finish_migration(&mut self) -> CoreResult<()> {
        self.migrating = false;
        let schema = self.schema();
        for class in schema.iter() {
            let Some(pk) = class.primary_key_property() else { continue };
            self.state.table_mut(&class.name)?.enforce_primary_key().map_err(|_| {
                CoreError::constraint(format!(
                    "Primary key property '{}.{}' has duplicate values after migration.",
                    class.name, pk.name
                ))
            })?;
        }
        Ok(())
    }
}

/// Converts a scalar input for `prop`.
fn convert_scalar(schema: &ObjectSchema, prop: &Property, value: Value) -> CoreResult<Value> {
    if value.is_null() {
        return if prop.optional {
            Ok(Value::Null)
        } else {
            Err(type_mismatch(schema, prop, prop.ty.name(), &value))
        };
    }
    prop.ty
        .coerce(value.clone())
        .ok_or_else(|| type_mismatch(schema, prop, prop.ty.name(), &value))
}

fn type_mismatch(schema: &ObjectSchema, prop: &Property, expected: &str, got: &Value) -> CoreError {
    CoreError::constraint(format!(
        "Property '{}.{}' must be of type '{}', got '{}'",
        schema.name,
        prop.name,
        expected,
        got.type_name()
    ))
}

fn missing_value(schema: &ObjectSchema, prop: &Property) -> CoreError {
    CoreError::constraint(format!(
        "Missing value for property '{}.{}'",
        schema.name, prop.name
    ))
}

pub(crate) fn duplicate_primary_key(class: &str, value: &Value) -> CoreError {
    CoreError::constraint(format!(
        "Attempting to create an object of type '{class}' with an existing primary key value '{value}'."
    ))
}

/// Links held by a single-link or link-collection value.
pub(crate) fn links_in(value: &Value) -> impl Iterator<Item = &ObjLink> {
    let items: &[Value] = match value {
        Value::List(items) => items,
        other => std::slice::from_ref(other),
    };
    items.iter().filter_map(Value::as_link)
}

/// `value` with every link to `keys` of `class` removed, or `None` when it
/// held no such link.
fn prune_links(value: &Value, class: &str, keys: &BTreeSet<ObjKey>) -> Option<Value> {
    let hit = |v: &Value| matches!(v, Value::Link(l) if l.class == class && keys.contains(&l.key));
    match value {
        Value::Link(_) if hit(value) => Some(Value::Null),
        Value::List(items) if items.iter().any(hit) => {
            Some(Value::List(items.iter().filter(|v| !hit(v)).cloned().collect()))
        }
        _ => None,
    }
}

/// Sorts and deduplicates set content.
pub(crate) fn normalize_set(items: &mut Vec<Value>) {
    items.sort_by(Value::sort_cmp);
    items.dedup_by(|a, b| a.sort_cmp(b) == std::cmp::Ordering::Equal);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ObjectSchemaDef, PropertyDef};

    fn base() -> State {
        let schema = Schema::new(vec![
            ObjectSchemaDef::new("Person")
                .property("name", "string")
                .property("age", PropertyDef::new("int").default_value(0i64))
                .property("friends", "Person[]")
                .property("best", "Person")
                .property("address", "Address")
                .property("tags", "string<>")
                .primary_key("name"),
            ObjectSchemaDef::new("Address")
                .property("street", "string")
                .embedded(),
        ])
        .unwrap();
        State::new(Arc::new(schema), 0)
    }

    fn person(name: &str, age: i64) -> Value {
        Value::object([("name", Value::from(name)), ("age", Value::Int(age))])
    }

    #[test]
    fn create_applies_defaults_and_implicit_values() {
        let mut w = WorkingState::new(&base());
        let key = w
            .create("Person", Value::object([("name", Value::from("a"))]), UpdateMode::Never)
            .unwrap();
        let row = w.state.row(&ObjLink::new("Person", key)).unwrap();
        assert_eq!(row.get(1), &Value::Int(0));
        assert_eq!(row.get(2), &Value::List(vec![]));
        assert_eq!(row.get(3), &Value::Null);
        assert_eq!(row.modified, Version::new(1));
    }

    #[test]
    fn update_modes_on_existing_primary_key() {
        let mut w = WorkingState::new(&base());
        let key = w.create("Person", person("a", 1), UpdateMode::Never).unwrap();
        let err = w.create("Person", person("a", 2), UpdateMode::Never).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Attempting to create an object of type 'Person' with an existing primary key value 'a'."
        );
        let again = w.create("Person", person("a", 2), UpdateMode::Modified).unwrap();
        assert_eq!(again, key);
        let row = w.state.row(&ObjLink::new("Person", key)).unwrap();
        assert_eq!(row.get(1), &Value::Int(2));
        assert_eq!(w.state.table("Person").unwrap().len(), 1);
    }

    #[test]
    fn update_all_resets_defaulted_properties() {
        let mut w = WorkingState::new(&base());
        w.create("Person", person("a", 5), UpdateMode::Never).unwrap();
        let key = w
            .create("Person", Value::object([("name", Value::from("a"))]), UpdateMode::All)
            .unwrap();
        let row = w.state.row(&ObjLink::new("Person", key)).unwrap();
        assert_eq!(row.get(1), &Value::Int(0));
    }

    #[test]
    fn type_errors_name_the_property() {
        let mut w = WorkingState::new(&base());
        let err = w
            .create(
                "Person",
                Value::object([("name", Value::from("a")), ("age", Value::from("x"))]),
                UpdateMode::Never,
            )
            .unwrap_err();
        assert_eq!(err.to_string(), "Property 'Person.age' must be of type 'int', got 'string'");
    }

    #[test]
    fn nested_literals_create_linked_objects() {
        let mut w = WorkingState::new(&base());
        let key = w
            .create(
                "Person",
                Value::object([
                    ("name", Value::from("a")),
                    ("friends", Value::List(vec![person("b", 2), person("c", 3)])),
                    ("address", Value::object([("street", Value::from("Main"))])),
                ]),
                UpdateMode::Never,
            )
            .unwrap();
        assert_eq!(w.state.table("Person").unwrap().len(), 3);
        assert_eq!(w.state.table("Address").unwrap().len(), 1);
        let row = w.state.row(&ObjLink::new("Person", key)).unwrap();
        assert_eq!(row.get(2).as_list().unwrap().len(), 2);
    }

    #[test]
    fn delete_prunes_links_and_cascades_embedded() {
        let mut w = WorkingState::new(&base());
        let a = w
            .create(
                "Person",
                Value::object([
                    ("name", Value::from("a")),
                    ("address", Value::object([("street", Value::from("Main"))])),
                ]),
                UpdateMode::Never,
            )
            .unwrap();
        let a_link = ObjLink::new("Person", a);
        let b = w
            .create(
                "Person",
                Value::object([
                    ("name", Value::from("b")),
                    ("friends", Value::List(vec![Value::Link(a_link.clone())])),
                    ("best", Value::Link(a_link.clone())),
                ]),
                UpdateMode::Never,
            )
            .unwrap();
        w.delete(&a_link).unwrap();
        assert!(w.state.table("Address").unwrap().is_empty());
        let row = w.state.row(&ObjLink::new("Person", b)).unwrap();
        assert_eq!(row.get(2), &Value::List(vec![]));
        assert_eq!(row.get(3), &Value::Null);
        assert!(w.delete(&a_link).is_err());
    }

    #[test]
    fn replacing_embedded_object_deletes_the_old_one() {
        let mut w = WorkingState::new(&base());
        let a = w
            .create(
                "Person",
                Value::object([
                    ("name", Value::from("a")),
                    ("address", Value::object([("street", Value::from("Main"))])),
                ]),
                UpdateMode::Never,
            )
            .unwrap();
        w.set_property(
            &ObjLink::new("Person", a),
            "address",
            Value::object([("street", Value::from("High"))]),
        )
        .unwrap();
        assert_eq!(w.state.table("Address").unwrap().len(), 1);
    }

    #[test]
    fn embedded_types_cannot_be_created_directly() {
        let mut w = WorkingState::new(&base());
        let err = w
            .create("Address", Value::object([("street", Value::from("x"))]), UpdateMode::Never)
            .unwrap_err();
        assert!(err.to_string().contains("embedded type 'Address'"));
    }

    #[test]
    fn sets_are_normalized() {
        let mut w = WorkingState::new(&base());
        let key = w
            .create(
                "Person",
                Value::object([
                    ("name", Value::from("a")),
                    ("tags", Value::from(vec!["b", "a", "b"])),
                ]),
                UpdateMode::Never,
            )
            .unwrap();
        let row = w.state.row(&ObjLink::new("Person", key)).unwrap();
        assert_eq!(row.get(5), &Value::from(vec!["a", "b"]));
    }

    #[test]
    fn primary_key_cannot_change() {
        let mut w = WorkingState::new(&base());
        let key = w.create("Person", person("a", 1), UpdateMode::Never).unwrap();
        let link = ObjLink::new("Person", key);
        assert!(w.set_property(&link, "name", Value::from("a")).is_ok());
        assert!(w.set_property(&link, "name", Value::from("z")).is_err());
    }

    #[test]
    fn delete_all_records_a_clear() {
        let mut w = WorkingState::new(&base());
        w.create("Person", person("a", 1), UpdateMode::Never).unwrap();
        w.delete_all("Person").unwrap();
        assert!(w.changes.cleared.contains("Person"));
        assert!(w.changes.touched.iter().all(|l| l.class != "Person"));
    }
}
