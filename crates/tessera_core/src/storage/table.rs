//! Tables: the rows of one class plus their indexes.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use tessera_codec::{ObjKey, Value};

use super::row::Row;
use crate::index::{FullTextIndex, PrimaryKeyIndex, ValueIndex};
use crate::schema::{IndexKind, ObjectSchema};

/// Rows of one class keyed by object key, in key (creation) order.
///
/// Rows are shared between snapshots through `Arc`; a table is cloned
/// only when a write transaction first touches it.
#[derive(Debug, Clone)]
pub struct Table {
    schema: Arc<ObjectSchema>,
    rows: BTreeMap<ObjKey, Arc<Row>>,
    primary: Option<(usize, PrimaryKeyIndex)>,
    primary_deferred: bool,
    indexes: BTreeMap<usize, ValueIndex>,
    fulltext: BTreeMap<usize, FullTextIndex>,
}

impl Table {
    /// Creates an empty table for `schema`.
    #[must_use]
    pub fn new(schema: Arc<ObjectSchema>) -> Self {
        let primary = schema
            .primary_key_property()
            .and_then(|p| p.column)
            .map(|c| (c, PrimaryKeyIndex::new()));
        let mut indexes = BTreeMap::new();
        let mut fulltext = BTreeMap::new();
        for prop in schema.persisted() {
            let Some(column) = prop.column else { continue };
            match prop.index {
                IndexKind::Standard if !prop.is_primary => {
                    indexes.insert(column, ValueIndex::new());
                }
                IndexKind::FullText => {
                    fulltext.insert(column, FullTextIndex::new());
                }
                _ => {}
            }
        }
        Self {
            schema,
            rows: BTreeMap::new(),
            primary,
            primary_deferred: false,
            indexes,
            fulltext,
        }
    }

    /// The class schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<ObjectSchema> {
        &self.schema
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row for `key`.
    #[must_use]
    pub fn get(&self, key: ObjKey) -> Option<&Arc<Row>> {
        self.rows.get(&key)
    }

    /// Whether a row exists for `key`.
    #[must_use]
    pub fn contains(&self, key: ObjKey) -> bool {
        self.rows.contains_key(&key)
    }

    /// Object keys in creation order.
    pub fn keys(&self) -> impl Iterator<Item = ObjKey> + '_ {
        self.rows.keys().copied()
    }

    /// Rows in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjKey, &Arc<Row>)> + '_ {
        self.rows.iter().map(|(k, r)| (*k, r))
    }

    /// Looks up an object by primary key value.
    #[must_use]
    pub fn find_primary(&self, value: &Value) -> Option<ObjKey> {
        let (column, idx) = self.primary.as_ref()?;
        if self.primary_deferred {
            return self
                .rows
                .iter()
                .find(|(_, row)| row.get(*column).loose_eq(value))
                .map(|(k, _)| *k);
        }
        idx.get(value)
    }

    /// Object keys with `value` in an indexed column, when the column is
    /// indexed (primary key included).
    #[must_use]
    pub fn lookup_indexed(&self, column: usize, value: &Value) -> Option<Vec<ObjKey>> {
        if let Some((pk_column, idx)) = &self.primary {
            if *pk_column == column && !self.primary_deferred {
                return Some(idx.get(value).into_iter().collect());
            }
        }
        self.indexes.get(&column).map(|idx| idx.get(value))
    }

    /// Object keys whose indexed column lies in the given bounds.
    #[must_use]
    pub fn range_indexed(
        &self,
        column: usize,
        lower: Bound<&Value>,
        upper: Bound<&Value>,
    ) -> Option<Vec<ObjKey>> {
        self.indexes.get(&column).map(|idx| idx.range(lower, upper))
    }

    /// Full-text index on `column`.
    #[must_use]
    pub fn fulltext(&self, column: usize) -> Option<&FullTextIndex> {
        self.fulltext.get(&column)
    }

    /// Inserts or replaces the row for `key`, maintaining indexes.
    ///
    /// Fails with the key of the object already holding the primary key
    /// value, leaving the table unchanged.
    pub(crate) fn put(&mut self, key: ObjKey, row: Row) -> Result<Option<Arc<Row>>, ObjKey> {
        if let Some((column, idx)) = self.primary.as_mut().filter(|_| !self.primary_deferred) {
            let new_pk = row.get(*column);
            if let Some(existing) = idx.get(new_pk) {
                if existing != key {
                    return Err(existing);
                }
            }
            if let Some(old) = self.rows.get(&key) {
                idx.remove(old.get(*column), key);
            }
            idx.insert(new_pk, key)?;
        }
        let old = self.rows.insert(key, Arc::new(row));
        let new = self.rows.get(&key).cloned();
        self.reindex(key, old.as_deref(), new.as_deref());
        Ok(old)
    }

    /// Removes the row for `key`.
    pub(crate) fn remove(&mut self, key: ObjKey) -> Option<Arc<Row>> {
        let old = self.rows.remove(&key)?;
        if let Some((column, idx)) = self.primary.as_mut().filter(|_| !self.primary_deferred) {
            idx.remove(old.get(*column), key);
        }
        self.reindex(key, Some(&old), None);
        Some(old)
    }

    /// Removes every row, returning the removed keys.
    pub(crate) fn clear(&mut self) -> Vec<ObjKey> {
        let keys: Vec<ObjKey> = self.rows.keys().copied().collect();
        *self = Self::new(Arc::clone(&self.schema));
        keys
    }

    /// Rebuilds the table under a new class schema, mapping every row
    /// through `remap`. Primary key uniqueness is not enforced until
    /// [`Table::enforce_primary_key`] is called.
    pub(crate) fn remapped(&self, schema: Arc<ObjectSchema>, remap: impl Fn(&Row) -> Row) -> Table {
        let mut table = Table::new(schema);
        table.primary_deferred = true;
        for (key, row) in &self.rows {
            // Deferred tables never reject a row.
            let _ = table.put(*key, remap(row));
        }
        table
    }

    /// Suspends primary key enforcement until [`Table::enforce_primary_key`].
    pub(crate) fn defer_primary_key(&mut self) {
        self.primary_deferred = true;
    }

    /// Rebuilds the primary key index, failing with the first duplicated
    /// value.
    pub(crate) fn enforce_primary_key(&mut self) -> Result<(), Value> {
        self.primary_deferred = false;
        let Some((column, idx)) = &mut self.primary else {
            return Ok(());
        };
        let mut rebuilt = PrimaryKeyIndex::new();
        for (key, row) in &self.rows {
            let value = row.get(*column);
            if rebuilt.insert(value, *key).is_err() {
                self.primary_deferred = true;
                return Err(value.clone());
            }
        }
        *idx = rebuilt;
        Ok(())
    }

    fn reindex(&mut self, key: ObjKey, old: Option<&Row>, new: Option<&Row>) {
        for (column, idx) in &mut self.indexes {
            if let Some(old) = old {
                idx.remove(old.get(*column), key);
            }
            if let Some(new) = new {
                idx.insert(new.get(*column), key);
            }
        }
        for (column, idx) in &mut self.fulltext {
            match new.map(|r| r.get(*column)) {
                Some(Value::String(text)) => idx.index_text(key, text),
                _ => idx.remove(key),
            }
        }
    }
}
