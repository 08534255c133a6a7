//! Live query results.
//!
//! A [`Results`] is a description, not a copy: a base collection (a class
//! table, a list or set property, the linking objects of an object, or a
//! frozen snapshot) plus the compiled stages chained on it. Every read
//! re-evaluates the description against the handle's current state, so a
//! results value always reflects the latest snapshot it can see.

use std::sync::Arc;

use tessera_codec::{ObjLink, Value};

use crate::error::{CoreError, CoreResult};
use crate::notification::{observe, ChangeSet, Compute, Watch};
use crate::object::Object;
use crate::query::{
    self, aggregate, apply, AggregateKind, ElementKind, QueryArg, SortDescriptor, Stage,
};
use crate::realm::Realm;
use crate::schema::{Property, PropertyType};
use crate::storage::State;
use crate::types::ListenerToken;

/// Where a collection's elements come from.
#[derive(Debug, Clone)]
pub(crate) enum Base {
    /// Every object of a class, in creation order.
    Table(String),
    /// The elements of a list or set property.
    Property { owner: ObjLink, prop: Property },
    /// Objects of `origin_class` linking to `target` through `origin_prop`.
    Backlinks {
        target: ObjLink,
        origin_class: String,
        origin_prop: String,
    },
    /// A frozen element sequence. Deleted objects read as null.
    Snapshot(Vec<Value>),
}

/// A base collection and the stages applied to it.
#[derive(Debug)]
pub(crate) struct Source {
    base: Base,
    kind: ElementKind,
    stages: Vec<Stage>,
}

impl Source {
    pub(crate) fn new(base: Base, kind: ElementKind) -> Self {
        Self {
            base,
            kind,
            stages: Vec::new(),
        }
    }

    pub(crate) fn kind(&self) -> &ElementKind {
        &self.kind
    }

    /// The same source with one more stage.
    fn chained(&self, stages: impl IntoIterator<Item = Stage>) -> Self {
        let mut chained = Self {
            base: self.base.clone(),
            kind: self.kind.clone(),
            stages: self.stages.clone(),
        };
        chained.stages.extend(stages);
        chained
    }

    /// Whether elements are distinct objects, which picks the diff used
    /// for notifications.
    pub(crate) fn unique(&self) -> bool {
        match &self.base {
            Base::Property { prop, .. } => prop.is_set() && prop.is_link(),
            Base::Snapshot(_) => false,
            Base::Table(_) | Base::Backlinks { .. } => true,
        }
    }

    /// Evaluates the collection against `state`.
    pub(crate) fn elements(&self, state: &State) -> CoreResult<Vec<Value>> {
        let base = match &self.base {
            Base::Table(class) => state
                .table(class)?
                .keys()
                .map(|key| Value::Link(ObjLink::new(class.clone(), key)))
                .collect(),
            Base::Property { owner, prop } => {
                if !state.contains(owner) {
                    return Err(invalidated(&self.base));
                }
                match state.read(owner, prop)? {
                    Value::List(items) => items,
                    Value::Null => Vec::new(),
                    other => vec![other],
                }
            }
            Base::Backlinks {
                target,
                origin_class,
                origin_prop,
            } => {
                if !state.contains(target) {
                    return Err(CoreError::results_invalidated());
                }
                state
                    .linking_objects(origin_class, origin_prop, target)?
                    .into_iter()
                    .map(|key| Value::Link(ObjLink::new(origin_class.clone(), key)))
                    .collect()
            }
            Base::Snapshot(items) => {
                return Ok(items
                    .iter()
                    .map(|v| match v {
                        Value::Link(link) if !state.contains(link) => Value::Null,
                        other => other.clone(),
                    })
                    .collect())
            }
        };
        Ok(apply(&self.stages, state, base))
    }

    /// Whether the base collection still exists in `state`.
    fn is_valid(&self, state: &State) -> bool {
        match &self.base {
            Base::Table(class) => state.table(class).is_ok(),
            Base::Property { owner, .. } => state.contains(owner),
            Base::Backlinks { target, .. } => state.contains(target),
            Base::Snapshot(_) => true,
        }
    }

    /// `Type.prop` of a property-backed collection.
    fn owner_label(&self) -> String {
        match &self.base {
            Base::Property { owner, prop } => format!("{}.{}", owner.class, prop.name),
            _ => String::new(),
        }
    }
}

fn invalidated(base: &Base) -> CoreError {
    match base {
        Base::Property { .. } => CoreError::list_invalidated(),
        _ => CoreError::results_invalidated(),
    }
}

/// Computes an aggregate over the elements of `source`.
///
/// `property` names the value to aggregate for object collections and
/// must be absent for collections of primitives.
pub(crate) fn aggregate_over(
    source: &Source,
    state: &State,
    op: AggregateKind,
    property: Option<&str>,
) -> CoreResult<Value> {
    let elements = source.elements(state)?;
    match source.kind() {
        ElementKind::Object(class) => {
            let Some(name) = property else {
                return Err(CoreError::query(
                    "Expected 'name' to be a string, got undefined",
                ));
            };
            let target = final_property(state, class, name)?;
            if !supports(op, &target.1) {
                return Err(CoreError::query(format!(
                    "Operation '{}' not supported for {} property '{}.{}'",
                    op.name(),
                    target.1.aggregate_label(),
                    target.0,
                    target.1.name
                )));
            }
            let path = query::compile_value_path(state.schema(), source.kind(), name)?;
            let values: Vec<Value> = elements
                .iter()
                .filter(|e| !e.is_null())
                .map(|e| query::path_value(state, e, &path))
                .collect();
            Ok(aggregate(op, values.iter()))
        }
        ElementKind::Primitive(prop) => {
            if let Some(name) = property.filter(|n| *n != "self") {
                return Err(CoreError::query(format!(
                    "Cannot get property named '{name}' on a list of primitives"
                )));
            }
            if !supports(op, prop) {
                return Err(CoreError::query(format!(
                    "Operation '{}' not supported for {} '{}'",
                    op.name(),
                    prop.aggregate_label(),
                    source.owner_label()
                )));
            }
            Ok(aggregate(op, elements.iter()))
        }
    }
}

fn supports(op: AggregateKind, prop: &Property) -> bool {
    if prop.ty == PropertyType::Object || prop.is_computed() {
        return false;
    }
    match op {
        AggregateKind::Min | AggregateKind::Max => prop.ty.supports_min_max(),
        AggregateKind::Sum | AggregateKind::Avg => prop.ty.supports_sum(),
    }
}

/// Walks a dotted key path to its last property, returning the class it
/// belongs to.
fn final_property(state: &State, class: &str, key_path: &str) -> CoreResult<(String, Property)> {
    let mut class = class.to_string();
    let mut names = key_path.split('.').peekable();
    while let Some(name) = names.next() {
        let schema = state.schema().require(&class)?;
        let prop = schema.property(name).ok_or_else(|| {
            CoreError::query(format!("Property '{name}' does not exist on '{class}' objects"))
        })?;
        if names.peek().is_none() {
            return Ok((class, prop.clone()));
        }
        class = prop.object_type.clone().ok_or_else(|| {
            CoreError::query(format!(
                "Property '{class}.{name}' of type '{}' cannot be traversed",
                prop.ty.name()
            ))
        })?;
    }
    Err(CoreError::query("Empty key path"))
}

/// A live, lazily evaluated collection.
#[derive(Clone)]
pub struct Results {
    realm: Realm,
    source: Arc<Source>,
    target: u64,
}

impl Results {
    pub(crate) fn new(realm: Realm, source: Source) -> Self {
        let target = realm.next_target();
        Self {
            realm,
            source: Arc::new(source),
            target,
        }
    }

    pub(crate) fn for_class(realm: Realm, class: &str) -> Self {
        Self::new(
            realm,
            Source::new(Base::Table(class.to_string()), ElementKind::Object(class.to_string())),
        )
    }

    pub(crate) fn backlinks(realm: Realm, target: ObjLink, origin_class: &str, origin_prop: &str) -> Self {
        Self::new(
            realm,
            Source::new(
                Base::Backlinks {
                    target,
                    origin_class: origin_class.to_string(),
                    origin_prop: origin_prop.to_string(),
                },
                ElementKind::Object(origin_class.to_string()),
            ),
        )
    }

    fn derive(&self, source: Source) -> Self {
        Self::new(self.realm.clone(), source)
    }

    /// The realm this collection reads from.
    #[must_use]
    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    /// Class name of the elements, or `None` for primitives.
    #[must_use]
    pub fn object_type(&self) -> Option<&str> {
        match self.source.kind() {
            ElementKind::Object(class) => Some(class),
            ElementKind::Primitive(_) => None,
        }
    }

    fn eval<R>(&self, f: impl FnOnce(Vec<Value>) -> R) -> CoreResult<R> {
        let elements = self.realm.read(|s| self.source.elements(s))??;
        Ok(f(elements))
    }

    /// Every element, links as [`Value::Link`].
    ///
    /// # Errors
    ///
    /// `Access to invalidated Results objects` once the base is gone.
    pub fn to_vec(&self) -> CoreResult<Vec<Value>> {
        self.eval(|e| e)
    }

    /// Every element as an object handle. Null elements (deleted objects
    /// in a snapshot) are skipped.
    ///
    /// # Errors
    ///
    /// As [`Results::to_vec`].
    pub fn objects(&self) -> CoreResult<Vec<Object>> {
        Ok(self
            .to_vec()?
            .into_iter()
            .filter_map(|v| match v {
                Value::Link(link) => Some(Object::new(self.realm.clone(), link)),
                _ => None,
            })
            .collect())
    }

    /// Iterates over the elements of the current state.
    ///
    /// # Errors
    ///
    /// As [`Results::to_vec`].
    pub fn iter(&self) -> CoreResult<std::vec::IntoIter<Value>> {
        Ok(self.to_vec()?.into_iter())
    }

    /// # Errors
    ///
    /// As [`Results::to_vec`].
    pub fn len(&self) -> CoreResult<usize> {
        self.eval(|e| e.len())
    }

    /// # Errors
    ///
    /// As [`Results::to_vec`].
    pub fn is_empty(&self) -> CoreResult<bool> {
        self.eval(|e| e.is_empty())
    }

    /// The element at `index`, or `None` past the end.
    ///
    /// # Errors
    ///
    /// As [`Results::to_vec`].
    pub fn get(&self, index: usize) -> CoreResult<Option<Value>> {
        self.eval(|mut e| (index < e.len()).then(|| e.swap_remove(index)))
    }

    /// The object at `index`, or `None` past the end.
    ///
    /// # Errors
    ///
    /// As [`Results::to_vec`].
    pub fn object(&self, index: usize) -> CoreResult<Option<Object>> {
        Ok(match self.get(index)? {
            Some(Value::Link(link)) => Some(Object::new(self.realm.clone(), link)),
            _ => None,
        })
    }

    /// Position of `value`, compared by identity for objects.
    ///
    /// # Errors
    ///
    /// As [`Results::to_vec`].
    pub fn index_of(&self, value: impl Into<Value>) -> CoreResult<Option<usize>> {
        let needle = value.into();
        self.eval(|e| e.iter().position(|v| v.loose_eq(&needle)))
    }

    /// Chains a filter (with optional `SORT`, `DISTINCT` and `LIMIT`
    /// modifiers) onto this collection.
    ///
    /// # Errors
    ///
    /// Any parse or compile error of the predicate.
    pub fn filtered(&self, query: &str, args: &[QueryArg]) -> CoreResult<Results> {
        let schema = self.realm.schema()?;
        let stages = query::compile_query(&schema, self.source.kind(), query, args)?;
        Ok(self.derive(self.source.chained(stages)))
    }

    /// Sorts by one key path.
    ///
    /// # Errors
    ///
    /// `Cannot sort on key path ...` for unknown or unsortable paths.
    pub fn sorted(&self, key_path: &str, reverse: bool) -> CoreResult<Results> {
        self.sorted_by(&[SortDescriptor {
            key_path: key_path.to_string(),
            reverse,
        }])
    }

    /// Sorts by several key paths, the first one most significant.
    ///
    /// # Errors
    ///
    /// As [`Results::sorted`].
    pub fn sorted_by(&self, descriptors: &[SortDescriptor]) -> CoreResult<Results> {
        let schema = self.realm.schema()?;
        let stage = query::compile_sort(&schema, self.source.kind(), descriptors)?;
        Ok(self.derive(self.source.chained([stage])))
    }

    /// Sorts a collection of primitives by value.
    ///
    /// # Errors
    ///
    /// Fails on collections of objects.
    pub fn sorted_self(&self, reverse: bool) -> CoreResult<Results> {
        self.sorted("self", reverse)
    }

    /// Keeps the first element of each distinct combination of
    /// `key_paths`.
    ///
    /// # Errors
    ///
    /// `Cannot distinct on key path ...` for unknown paths.
    pub fn distinct(&self, key_paths: &[&str]) -> CoreResult<Results> {
        let schema = self.realm.schema()?;
        let stage = query::compile_distinct(&schema, self.source.kind(), key_paths)?;
        Ok(self.derive(self.source.chained([stage])))
    }

    /// A frozen copy of the current elements. Objects deleted later read as
    /// null.
    ///
    /// # Errors
    ///
    /// As [`Results::to_vec`].
    pub fn snapshot(&self) -> CoreResult<Results> {
        let items = self.to_vec()?;
        Ok(self.derive(Source::new(Base::Snapshot(items), self.source.kind().clone())))
    }

    fn aggregate(&self, op: AggregateKind, property: Option<&str>) -> CoreResult<Value> {
        self.realm
            .read(|s| aggregate_over(&self.source, s, op, property))?
    }

    /// Smallest value of `property` (or of the elements), null when empty.
    ///
    /// # Errors
    ///
    /// `Operation 'min' not supported for ...` for non-comparable types.
    pub fn min<'a>(&self, property: impl Into<Option<&'a str>>) -> CoreResult<Value> {
        self.aggregate(AggregateKind::Min, property.into())
    }

    /// Largest value, null when empty.
    ///
    /// # Errors
    ///
    /// As [`Results::min`].
    pub fn max<'a>(&self, property: impl Into<Option<&'a str>>) -> CoreResult<Value> {
        self.aggregate(AggregateKind::Max, property.into())
    }

    /// Sum of the numeric values, zero when empty.
    ///
    /// # Errors
    ///
    /// `Operation 'sum' not supported for ...` for non-numeric types.
    pub fn sum<'a>(&self, property: impl Into<Option<&'a str>>) -> CoreResult<Value> {
        self.aggregate(AggregateKind::Sum, property.into())
    }

    /// Mean of the non-null numeric values, null when there are none.
    ///
    /// # Errors
    ///
    /// `Operation 'average' not supported for ...` for non-numeric types.
    pub fn avg<'a>(&self, property: impl Into<Option<&'a str>>) -> CoreResult<Value> {
        self.aggregate(AggregateKind::Avg, property.into())
    }

    /// Whether the base collection still exists.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.realm
            .read(|s| self.source.is_valid(s))
            .unwrap_or(false)
    }

    /// Sets `property` to `value` on every object in the collection.
    ///
    /// # Errors
    ///
    /// Fails outside a write or on a collection of primitives.
    pub fn update(&self, property: &str, value: impl Into<Value>) -> CoreResult<()> {
        if matches!(self.source.kind(), ElementKind::Primitive(_)) {
            return Err(CoreError::query(format!(
                "Cannot get property named '{property}' on a list of primitives"
            )));
        }
        let value = value.into();
        let links: Vec<ObjLink> = self
            .to_vec()?
            .into_iter()
            .filter_map(|v| match v {
                Value::Link(link) => Some(link),
                _ => None,
            })
            .collect();
        self.realm.mutate(|w| {
            for link in &links {
                w.set_property(link, property, value.clone())?;
            }
            Ok(())
        })
    }

    pub(crate) fn compute(&self) -> Compute {
        let source = Arc::clone(&self.source);
        Arc::new(move |state: &State| source.elements(state))
    }

    /// Registers a change listener. The first delivery reports an empty
    /// change; later ones report positional insertions, deletions and
    /// modifications relative to the previous delivery.
    ///
    /// # Errors
    ///
    /// Fails when the realm is closed.
    pub fn add_listener<F>(&self, callback: F) -> CoreResult<ListenerToken>
    where
        F: Fn(&ChangeSet) + Send + Sync + 'static,
    {
        add_collection_listener(&self.realm, self.target, self.compute(), self.source.unique(), callback)
    }

    /// Removes one listener. Returns whether it existed.
    pub fn remove_listener(&self, token: ListenerToken) -> bool {
        self.realm.remove_watch(token)
    }

    /// Removes every listener registered through this collection.
    pub fn remove_all_listeners(&self) {
        self.realm.remove_watches(self.target);
    }
}

/// Registers a collection watch observed at the realm's pinned snapshot.
pub(crate) fn add_collection_listener<F>(
    realm: &Realm,
    target: u64,
    compute: Compute,
    unique: bool,
    callback: F,
) -> CoreResult<ListenerToken>
where
    F: Fn(&ChangeSet) + Send + Sync + 'static,
{
    let observed = observe(&compute, &realm.snapshot());
    realm.add_watch(
        target,
        Watch::Collection {
            compute,
            unique,
            observed,
            callback: Arc::new(callback),
        },
    )
}

impl std::fmt::Debug for Results {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Results")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::notification::ManualScheduler;
    use crate::registry::Registry;
    use crate::schema::{ObjectSchemaDef, PropertyDef};

    fn realm() -> (Registry, Realm) {
        realm_on(Arc::new(ManualScheduler::new()))
    }

    fn realm_on(scheduler: Arc<ManualScheduler>) -> (Registry, Realm) {
        let schema = vec![ObjectSchemaDef::new("Person")
            .property("name", "string")
            .property("age", "int")
            .property("alive", "bool?")
            .property("friends", "Person[]")
            .property("scores", "int[]")
            .property("parents", PropertyDef::linking_objects("Person", "friends"))];
        let registry = Registry::new();
        let realm = registry
            .open(
                Config::in_memory("results-tests")
                    .schema(schema)
                    .scheduler(scheduler),
            )
            .unwrap();
        realm
            .write(|| {
                for (name, age) in [("Ann", 30), ("Bob", 12), ("Cid", 45)] {
                    realm.create(
                        "Person",
                        Value::object([("name", Value::from(name)), ("age", Value::from(age))]),
                    )?;
                }
                Ok(())
            })
            .unwrap();
        (registry, realm)
    }

    fn names(results: &Results) -> Vec<String> {
        results
            .objects()
            .unwrap()
            .iter()
            .map(|o| o.get("name").unwrap().as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn results_are_live() {
        let (_registry, realm) = realm();
        let adults = realm.objects("Person").unwrap().filtered("age >= 18", &[]).unwrap();
        assert_eq!(names(&adults), ["Ann", "Cid"]);
        realm
            .write(|| {
                realm.create("Person", Value::object::<_, Value, _>([("name", "Dee".into()), ("age", 20.into())]))?;
                Ok(())
            })
            .unwrap();
        assert_eq!(names(&adults), ["Ann", "Cid", "Dee"]);
    }

    #[test]
    fn sort_and_distinct_chain() {
        let (_registry, realm) = realm();
        let all = realm.objects("Person").unwrap();
        assert_eq!(names(&all.sorted("age", false).unwrap()), ["Bob", "Ann", "Cid"]);
        assert_eq!(names(&all.sorted("age", true).unwrap()), ["Cid", "Ann", "Bob"]);
        let err = all.sorted("height", false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot sort on key path 'height': property 'Person.height' does not exist."
        );
        assert_eq!(all.distinct(&["alive"]).unwrap().len().unwrap(), 1);
    }

    #[test]
    fn aggregates_and_their_errors() {
        let (_registry, realm) = realm();
        let all = realm.objects("Person").unwrap();
        assert_eq!(all.min("age").unwrap(), Value::Int(12));
        assert_eq!(all.max("age").unwrap(), Value::Int(45));
        assert_eq!(all.sum("age").unwrap(), Value::Int(87));
        assert_eq!(all.avg("age").unwrap(), Value::Double(29.0));
        assert_eq!(
            all.min("alive").unwrap_err().to_string(),
            "Operation 'min' not supported for bool? property 'Person.alive'"
        );
        let empty = all.filtered("age > 100", &[]).unwrap();
        assert_eq!(empty.min("age").unwrap(), Value::Null);
        assert_eq!(empty.sum("age").unwrap(), Value::Int(0));
    }

    #[test]
    fn snapshot_does_not_follow_changes() {
        let (_registry, realm) = realm();
        let all = realm.objects("Person").unwrap();
        let frozen = all.snapshot().unwrap();
        realm
            .write(|| {
                let bob = all.object(1)?.unwrap();
                realm.delete(&bob)?;
                realm.create("Person", Value::object::<_, Value, _>([("name", "Eve".into()), ("age", 5.into())]))?;
                Ok(())
            })
            .unwrap();
        assert_eq!(frozen.len().unwrap(), 3);
        assert_eq!(frozen.get(1).unwrap(), Some(Value::Null));
        assert_eq!(all.len().unwrap(), 3);
    }

    #[test]
    fn update_sets_every_object() {
        let (_registry, realm) = realm();
        let all = realm.objects("Person").unwrap();
        let err = all.update("age", 1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot modify managed objects outside of a write transaction."
        );
        realm.write(|| all.update("age", 1)).unwrap();
        assert_eq!(all.filtered("age == 1", &[]).unwrap().len().unwrap(), 3);
    }

    #[test]
    fn listener_receives_initial_then_diff() {
        let scheduler = Arc::new(ManualScheduler::new());
        let (_registry, realm) = realm_on(Arc::clone(&scheduler));
        scheduler.run_pending();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::<ChangeSet>::new()));
        let all = realm.objects("Person").unwrap().sorted("age", false).unwrap();
        let sink = Arc::clone(&seen);
        all.add_listener(move |c| sink.lock().push(c.clone())).unwrap();
        // Registration alone schedules the initial call.
        assert_eq!(scheduler.run_pending(), 1);
        assert_eq!(seen.lock().len(), 1);
        realm
            .write(|| {
                realm.create("Person", Value::object::<_, Value, _>([("name", "Zed".into()), ("age", 1.into())]))?;
                Ok(())
            })
            .unwrap();
        scheduler.run_pending();
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].is_empty());
        assert_eq!(seen[1].insertions, vec![0]);
    }
}
