//! Immutable store snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;

use tessera_codec::{ObjKey, ObjLink, Value};

use super::row::Row;
use super::table::Table;
use crate::error::{CoreError, CoreResult};
use crate::schema::{ObjectSchema, Property, Schema};
use crate::types::Version;

/// A complete, consistent state of the store at one version.
///
/// Published states are never mutated: readers hold an `Arc<State>` and a
/// writer works on its own clone, which shares every untouched table.
#[derive(Debug, Clone)]
pub struct State {
    version: Version,
    schema_version: u64,
    schema: Arc<Schema>,
    tables: BTreeMap<String, Arc<Table>>,
    next_key: u64,
}

impl State {
    /// An empty state with one table per class.
    #[must_use]
    pub fn new(schema: Arc<Schema>, schema_version: u64) -> Self {
        let tables = schema
            .iter()
            .map(|c| (c.name.clone(), Arc::new(Table::new(Arc::clone(c)))))
            .collect();
        Self {
            version: Version::INITIAL,
            schema_version,
            schema,
            tables,
            next_key: 1,
        }
    }

    /// Snapshot version.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Schema version recorded with the data.
    #[must_use]
    pub fn schema_version(&self) -> u64 {
        self.schema_version
    }

    pub(crate) fn set_schema_version(&mut self, v: u64) {
        self.schema_version = v;
    }

    /// The stored schema, including classes hidden from the open realm.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Next object key to be allocated.
    #[must_use]
    pub fn next_key(&self) -> u64 {
        self.next_key
    }

    pub(crate) fn set_next_key(&mut self, next: u64) {
        self.next_key = self.next_key.max(next);
    }

    pub(crate) fn allocate_key(&mut self) -> ObjKey {
        let key = ObjKey(self.next_key);
        self.next_key += 1;
        key
    }

    /// Table for `class`.
    ///
    /// # Errors
    ///
    /// `Object type 'X' not found in schema.`
    pub fn table(&self, class: &str) -> CoreResult<&Table> {
        self.tables
            .get(class)
            .map(Arc::as_ref)
            .ok_or_else(|| CoreError::schema(format!("Object type '{class}' not found in schema.")))
    }

    pub(crate) fn table_mut(&mut self, class: &str) -> CoreResult<&mut Table> {
        self.tables
            .get_mut(class)
            .map(Arc::make_mut)
            .ok_or_else(|| CoreError::schema(format!("Object type '{class}' not found in schema.")))
    }

    /// Tables in class-name order.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values().map(Arc::as_ref)
    }

    /// Row of `link`, if it exists.
    #[must_use]
    pub fn row(&self, link: &ObjLink) -> Option<&Arc<Row>> {
        self.tables.get(&link.class)?.get(link.key)
    }

    /// Whether `link` resolves to a live row.
    #[must_use]
    pub fn contains(&self, link: &ObjLink) -> bool {
        self.row(link).is_some()
    }

    /// Reads `prop` of `link`; computed properties are evaluated.
    ///
    /// # Errors
    ///
    /// Fails when the object no longer exists.
    pub fn read(&self, link: &ObjLink, prop: &Property) -> CoreResult<Value> {
        let row = self.row(link).ok_or_else(CoreError::object_invalidated)?;
        Ok(match prop.column {
            Some(column) => row.get(column).clone(),
            None => Value::List(
                self.linking_objects(
                    prop.object_type.as_deref().unwrap_or_default(),
                    prop.origin_property.as_deref().unwrap_or_default(),
                    link,
                )?
                .into_iter()
                .map(|key| Value::Link(ObjLink::new(prop.object_type.clone().unwrap_or_default(), key)))
                .collect(),
            ),
        })
    }

    /// Objects of `origin_class` whose `origin_prop` links to `target`, in
    /// creation order.
    ///
    /// # Errors
    ///
    /// Fails when the class or property does not exist.
    pub fn linking_objects(
        &self,
        origin_class: &str,
        origin_prop: &str,
        target: &ObjLink,
    ) -> CoreResult<Vec<ObjKey>> {
        let table = self.table(origin_class)?;
        let column = table
            .schema()
            .property(origin_prop)
            .and_then(|p| p.column)
            .ok_or_else(|| {
                CoreError::schema(format!(
                    "Property '{origin_prop}' does not exist on '{origin_class}' objects"
                ))
            })?;
        Ok(table
            .iter()
            .filter(|(_, row)| references(row.get(column), target))
            .map(|(key, _)| key)
            .collect())
    }

    /// Number of rows of any class holding a link to `target`.
    #[must_use]
    pub fn count_incoming(&self, target: &ObjLink) -> usize {
        self.schema
            .incoming_links(&target.class)
            .filter_map(|(class, prop)| {
                let table = self.tables.get(&class.name)?;
                let column = prop.column?;
                Some(
                    table
                        .iter()
                        .filter(|(_, row)| references(row.get(column), target))
                        .count(),
                )
            })
            .sum()
    }

    /// Replaces the schema, rebuilding the tables of changed classes.
    ///
    /// Properties whose name and type label are unchanged keep their
    /// values; new or retyped properties start at their initial value.
    /// Tables of classes missing from `schema` are dropped. Primary key
    /// uniqueness of rebuilt tables is deferred.
    pub(crate) fn replace_schema(&mut self, schema: Arc<Schema>) {
        let mut tables = BTreeMap::new();
        for class in schema.iter() {
            let table = match self.tables.get(&class.name) {
                Some(old) if old.schema().as_ref() == class.as_ref() => Arc::clone(old),
                Some(old) => {
                    let plan = column_plan(old.schema(), class);
                    Arc::new(old.remapped(Arc::clone(class), |row| Row {
                        values: plan
                            .iter()
                            .map(|source| match source {
                                ColumnSource::Copy(c) => row.get(*c).clone(),
                                ColumnSource::Fresh(v) => v.clone(),
                            })
                            .collect(),
                        modified: row.modified,
                    }))
                }
                None => Arc::new(Table::new(Arc::clone(class))),
            };
            tables.insert(class.name.clone(), table);
        }
        self.tables = tables;
        self.schema = schema;
    }
}

enum ColumnSource {
    Copy(usize),
    Fresh(Value),
}

fn column_plan(old: &ObjectSchema, new: &ObjectSchema) -> Vec<ColumnSource> {
    new.persisted()
        .map(|prop| {
            match old
                .property(&prop.name)
                .filter(|p| !p.is_computed() && p.label() == prop.label())
                .and_then(|p| p.column)
            {
                Some(column) => ColumnSource::Copy(column),
                None => ColumnSource::Fresh(prop.initial_value()),
            }
        })
        .collect()
}

/// Whether a stored value (single link or link collection) references
/// `target`.
pub(crate) fn references(value: &Value, target: &ObjLink) -> bool {
    match value {
        Value::Link(link) => link == target,
        Value::List(items) => items
            .iter()
            .any(|v| matches!(v, Value::Link(link) if link == target)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ObjectSchemaDef, PropertyDef};

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new(vec![
                ObjectSchemaDef::new("Person")
                    .property("name", "string")
                    .property("dogs", PropertyDef::linking_objects("Dog", "owner")),
                ObjectSchemaDef::new("Dog")
                    .property("name", "string")
                    .property("owner", "Person"),
            ])
            .unwrap(),
        )
    }

    fn populated() -> State {
        let mut state = State::new(schema(), 0);
        let alice = state.allocate_key();
        state
            .table_mut("Person")
            .unwrap()
            .put(alice, Row::new(vec![Value::from("Alice")], Version::new(1)))
            .unwrap();
        for name in ["Rex", "Fido"] {
            let key = state.allocate_key();
            let owner = Value::Link(ObjLink::new("Person", alice));
            state
                .table_mut("Dog")
                .unwrap()
                .put(key, Row::new(vec![Value::from(name), owner], Version::new(1)))
                .unwrap();
        }
        state
    }

    #[test]
    fn keys_are_allocated_monotonically() {
        let mut state = State::new(schema(), 0);
        assert_eq!(state.allocate_key(), ObjKey(1));
        assert_eq!(state.allocate_key(), ObjKey(2));
        state.set_next_key(1);
        assert_eq!(state.next_key(), 3);
    }

    #[test]
    fn linking_objects_are_computed() {
        let state = populated();
        let alice = ObjLink::new("Person", ObjKey(1));
        let dogs = state.linking_objects("Dog", "owner", &alice).unwrap();
        assert_eq!(dogs, vec![ObjKey(2), ObjKey(3)]);
        assert_eq!(state.count_incoming(&alice), 2);

        let person = Arc::clone(state.schema().get("Person").unwrap());
        let value = state.read(&alice, person.property("dogs").unwrap()).unwrap();
        assert_eq!(value.as_list().unwrap().len(), 2);
    }

    #[test]
    fn clones_share_untouched_tables() {
        let base = populated();
        let mut working = base.clone();
        working.table_mut("Dog").unwrap().remove(ObjKey(2));
        assert_eq!(base.table("Dog").unwrap().len(), 2);
        assert_eq!(working.table("Dog").unwrap().len(), 1);
        assert!(Arc::ptr_eq(&base.tables["Person"], &working.tables["Person"]));
    }

    #[test]
    fn replace_schema_keeps_matching_columns() {
        let mut state = populated();
        let new = Arc::new(
            Schema::new(vec![
                ObjectSchemaDef::new("Person")
                    .property("name", "string")
                    .property("age", PropertyDef::new("int").default_value(7i64)),
            ])
            .unwrap(),
        );
        state.replace_schema(new);
        let row = state.row(&ObjLink::new("Person", ObjKey(1))).unwrap();
        assert_eq!(row.values, vec![Value::from("Alice"), Value::Int(7)]);
        assert!(state.table("Dog").is_err());
    }
}
