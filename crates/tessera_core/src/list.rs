//! Managed list properties.

use std::sync::Arc;

use tessera_codec::{ObjLink, Value};

use crate::error::{CoreError, CoreResult};
use crate::notification::ChangeSet;
use crate::object::Object;
use crate::query::{AggregateKind, ElementKind, QueryArg, SortDescriptor};
use crate::realm::Realm;
use crate::results::{add_collection_listener, aggregate_over, Base, Results, Source};
use crate::schema::Property;
use crate::storage::WorkingState;
use crate::types::ListenerToken;

/// The owner and property behind a managed list or set.
#[derive(Clone)]
pub(crate) struct Backing {
    pub realm: Realm,
    pub owner: ObjLink,
    pub prop: Property,
    pub target: u64,
}

impl Backing {
    pub fn new(realm: Realm, owner: ObjLink, prop: Property) -> Self {
        let target = realm.next_target();
        Self {
            realm,
            owner,
            prop,
            target,
        }
    }

    /// `Type.prop`, as used in messages.
    pub fn label(&self) -> String {
        format!("{}.{}", self.owner.class, self.prop.name)
    }

    pub fn kind(&self) -> ElementKind {
        if self.prop.is_link() {
            ElementKind::Object(self.prop.object_type.clone().unwrap_or_default())
        } else {
            ElementKind::Primitive(self.prop.clone())
        }
    }

    pub fn source(&self) -> Source {
        Source::new(
            Base::Property {
                owner: self.owner.clone(),
                prop: self.prop.clone(),
            },
            self.kind(),
        )
    }

    pub fn results(&self) -> Results {
        Results::new(self.realm.clone(), self.source())
    }

    /// Current elements.
    pub fn items(&self) -> CoreResult<Vec<Value>> {
        self.realm.read(|s| {
            if !s.contains(&self.owner) {
                return Err(CoreError::list_invalidated());
            }
            match s.read(&self.owner, &self.prop)? {
                Value::List(items) => Ok(items),
                _ => Ok(Vec::new()),
            }
        })?
    }

    /// Reads the elements inside the open write, lets `f` edit them and
    /// stores the result.
    pub fn modify<R>(&self, f: impl FnOnce(&mut Vec<Value>) -> CoreResult<R>) -> CoreResult<R> {
        self.realm.mutate(|w: &mut WorkingState| {
            if !w.state.contains(&self.owner) {
                return Err(CoreError::list_invalidated());
            }
            let mut items = match w.state.read(&self.owner, &self.prop)? {
                Value::List(items) => items,
                _ => Vec::new(),
            };
            let out = f(&mut items)?;
            w.replace_collection(&self.owner, &self.prop, items)?;
            Ok(out)
        })
    }

    pub fn is_valid(&self) -> bool {
        self.realm
            .read(|s| s.contains(&self.owner))
            .unwrap_or(false)
    }

    pub fn object_at(&self, value: Option<Value>) -> Option<Object> {
        match value {
            Some(Value::Link(link)) => Some(Object::new(self.realm.clone(), link)),
            _ => None,
        }
    }

    pub fn add_listener<F>(&self, callback: F) -> CoreResult<ListenerToken>
    where
        F: Fn(&ChangeSet) + Send + Sync + 'static,
    {
        let source = Arc::new(self.source());
        let unique = source.unique();
        add_collection_listener(
            &self.realm,
            self.target,
            Arc::new(move |state| source.elements(state)),
            unique,
            callback,
        )
    }
}

fn out_of_range(index: usize, max: usize) -> CoreError {
    CoreError::constraint(format!("Requested index {index} greater than max {max}"))
}

/// An ordered, live list property of a managed object.
///
/// Reads see the realm's current state. Mutations need an open write
/// transaction and replace the stored list atomically.
#[derive(Clone)]
pub struct List {
    backing: Backing,
}

impl List {
    pub(crate) fn new(realm: Realm, owner: ObjLink, prop: Property) -> Self {
        Self {
            backing: Backing::new(realm, owner, prop),
        }
    }

    /// The object owning the list.
    #[must_use]
    pub fn owner(&self) -> Object {
        Object::new(self.backing.realm.clone(), self.backing.owner.clone())
    }

    /// The list property.
    #[must_use]
    pub fn property(&self) -> &Property {
        &self.backing.prop
    }

    /// # Errors
    ///
    /// `Access to invalidated List object` once the owner is deleted.
    pub fn len(&self) -> CoreResult<usize> {
        Ok(self.backing.items()?.len())
    }

    /// # Errors
    ///
    /// As [`List::len`].
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.backing.items()?.is_empty())
    }

    /// # Errors
    ///
    /// As [`List::len`].
    pub fn to_vec(&self) -> CoreResult<Vec<Value>> {
        self.backing.items()
    }

    /// Elements of a list of objects as handles.
    ///
    /// # Errors
    ///
    /// As [`List::len`].
    pub fn objects(&self) -> CoreResult<Vec<Object>> {
        Ok(self
            .backing
            .items()?
            .into_iter()
            .filter_map(|v| self.backing.object_at(Some(v)))
            .collect())
    }

    /// The element at `index`, or `None` past the end.
    ///
    /// # Errors
    ///
    /// As [`List::len`].
    pub fn get(&self, index: usize) -> CoreResult<Option<Value>> {
        Ok(self.backing.items()?.get(index).cloned())
    }

    /// The object at `index` of a list of objects.
    ///
    /// # Errors
    ///
    /// As [`List::len`].
    pub fn get_object(&self, index: usize) -> CoreResult<Option<Object>> {
        Ok(self.backing.object_at(self.get(index)?))
    }

    /// Replaces the element at `index`.
    ///
    /// # Errors
    ///
    /// `Requested index N calling set() on list 'T.p' when max is M` past
    /// the end, type errors, or no open write.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> CoreResult<()> {
        let value = value.into();
        let label = self.backing.label();
        self.backing.modify(|items| {
            let Some(slot) = items.get_mut(index) else {
                return Err(CoreError::constraint(match items.len() {
                    0 => format!("Requested index {index} calling set() on list '{label}' when empty"),
                    len => format!(
                        "Requested index {index} calling set() on list '{label}' when max is {}",
                        len - 1
                    ),
                }));
            };
            *slot = value;
            Ok(())
        })
    }

    /// Appends values and returns the new length.
    ///
    /// # Errors
    ///
    /// Type errors or no open write.
    pub fn push<I, V>(&self, values: I) -> CoreResult<usize>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.backing.modify(|items| {
            items.extend(values);
            Ok(items.len())
        })
    }

    /// Removes and returns the last element.
    ///
    /// # Errors
    ///
    /// No open write or an invalidated list.
    pub fn pop(&self) -> CoreResult<Option<Value>> {
        self.backing.modify(|items| Ok(items.pop()))
    }

    /// Removes and returns the first element.
    ///
    /// # Errors
    ///
    /// As [`List::pop`].
    pub fn shift(&self) -> CoreResult<Option<Value>> {
        self.backing
            .modify(|items| Ok((!items.is_empty()).then(|| items.remove(0))))
    }

    /// Prepends values in order and returns the new length.
    ///
    /// # Errors
    ///
    /// As [`List::push`].
    pub fn unshift<I, V>(&self, values: I) -> CoreResult<usize>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.backing.modify(|items| {
            items.splice(0..0, values);
            Ok(items.len())
        })
    }

    /// Removes `delete_count` elements at `start` (clamped to the list),
    /// inserts `values` in their place and returns the removed elements.
    ///
    /// # Errors
    ///
    /// As [`List::push`].
    pub fn splice<I, V>(&self, start: usize, delete_count: usize, values: I) -> CoreResult<Vec<Value>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.backing.modify(|items| {
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            Ok(items.splice(start..end, values).collect())
        })
    }

    /// Inserts a value before `index`; `index == len` appends.
    ///
    /// # Errors
    ///
    /// `Requested index N greater than max M` past the end.
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> CoreResult<()> {
        let value = value.into();
        self.backing.modify(|items| {
            if index > items.len() {
                return Err(out_of_range(index, items.len()));
            }
            items.insert(index, value);
            Ok(())
        })
    }

    /// Removes and returns the element at `index`.
    ///
    /// # Errors
    ///
    /// `Requested index N greater than max M` past the end.
    pub fn remove(&self, index: usize) -> CoreResult<Value> {
        self.backing.modify(|items| {
            if index >= items.len() {
                return Err(out_of_range(index, items.len().saturating_sub(1)));
            }
            Ok(items.remove(index))
        })
    }

    /// Moves the element at `from` to position `to`.
    ///
    /// # Errors
    ///
    /// Either index past the end.
    pub fn move_item(&self, from: usize, to: usize) -> CoreResult<()> {
        self.backing.modify(|items| {
            let max = items.len().saturating_sub(1);
            if items.is_empty() || from > max || to > max {
                return Err(out_of_range(from.max(to), max));
            }
            let item = items.remove(from);
            items.insert(to, item);
            Ok(())
        })
    }

    /// Swaps the elements at `a` and `b`.
    ///
    /// # Errors
    ///
    /// Either index past the end.
    pub fn swap(&self, a: usize, b: usize) -> CoreResult<()> {
        self.backing.modify(|items| {
            let max = items.len().saturating_sub(1);
            if items.is_empty() || a > max || b > max {
                return Err(out_of_range(a.max(b), max));
            }
            items.swap(a, b);
            Ok(())
        })
    }

    /// Removes every element. Embedded objects in the list are deleted.
    ///
    /// # Errors
    ///
    /// As [`List::pop`].
    pub fn clear(&self) -> CoreResult<()> {
        self.backing.modify(|items| {
            items.clear();
            Ok(())
        })
    }

    /// Position of the first element equal to `value`.
    ///
    /// # Errors
    ///
    /// As [`List::len`].
    pub fn index_of(&self, value: impl Into<Value>) -> CoreResult<Option<usize>> {
        let needle = value.into();
        Ok(self.backing.items()?.iter().position(|v| v.loose_eq(&needle)))
    }

    /// Live results over the list's elements.
    #[must_use]
    pub fn as_results(&self) -> Results {
        self.backing.results()
    }

    /// # Errors
    ///
    /// Any parse or compile error of the predicate.
    pub fn filtered(&self, query: &str, args: &[QueryArg]) -> CoreResult<Results> {
        self.as_results().filtered(query, args)
    }

    /// Sorts a list of objects by a key path.
    ///
    /// # Errors
    ///
    /// `Cannot sort on key path ...`; lists of primitives only sort on
    /// `self`.
    pub fn sorted(&self, key_path: &str, reverse: bool) -> CoreResult<Results> {
        self.as_results().sorted(key_path, reverse)
    }

    /// # Errors
    ///
    /// As [`List::sorted`].
    pub fn sorted_by(&self, descriptors: &[SortDescriptor]) -> CoreResult<Results> {
        self.as_results().sorted_by(descriptors)
    }

    /// Sorts a list of primitives by value, nulls first when ascending.
    ///
    /// # Errors
    ///
    /// Fails on lists of objects.
    pub fn sorted_self(&self, reverse: bool) -> CoreResult<Results> {
        self.as_results().sorted_self(reverse)
    }

    /// A frozen copy of the current elements.
    ///
    /// # Errors
    ///
    /// As [`List::len`].
    pub fn snapshot(&self) -> CoreResult<Results> {
        self.as_results().snapshot()
    }

    fn aggregate(&self, op: AggregateKind, property: Option<&str>) -> CoreResult<Value> {
        let source = self.backing.source();
        self.backing
            .realm
            .read(|s| aggregate_over(&source, s, op, property))?
    }

    /// # Errors
    ///
    /// `Operation 'min' not supported for ...`, or a property name on a
    /// list of primitives.
    pub fn min<'a>(&self, property: impl Into<Option<&'a str>>) -> CoreResult<Value> {
        self.aggregate(AggregateKind::Min, property.into())
    }

    /// # Errors
    ///
    /// As [`List::min`].
    pub fn max<'a>(&self, property: impl Into<Option<&'a str>>) -> CoreResult<Value> {
        self.aggregate(AggregateKind::Max, property.into())
    }

    /// # Errors
    ///
    /// As [`List::min`].
    pub fn sum<'a>(&self, property: impl Into<Option<&'a str>>) -> CoreResult<Value> {
        self.aggregate(AggregateKind::Sum, property.into())
    }

    /// # Errors
    ///
    /// As [`List::min`].
    pub fn avg<'a>(&self, property: impl Into<Option<&'a str>>) -> CoreResult<Value> {
        self.aggregate(AggregateKind::Avg, property.into())
    }

    /// Whether the owning object still exists.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.backing.is_valid()
    }

    /// Registers a change listener. Positions follow list order.
    ///
    /// # Errors
    ///
    /// Fails when the realm is closed.
    pub fn add_listener<F>(&self, callback: F) -> CoreResult<ListenerToken>
    where
        F: Fn(&ChangeSet) + Send + Sync + 'static,
    {
        self.backing.add_listener(callback)
    }

    /// Removes one listener. Returns whether it existed.
    pub fn remove_listener(&self, token: ListenerToken) -> bool {
        self.backing.realm.remove_watch(token)
    }

    /// Removes every listener registered through this list.
    pub fn remove_all_listeners(&self) {
        self.backing.realm.remove_watches(self.backing.target);
    }
}

impl std::fmt::Debug for List {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("List")
            .field("owner", &self.backing.owner)
            .field("property", &self.backing.prop.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::notification::ManualScheduler;
    use crate::registry::Registry;
    use crate::schema::ObjectSchemaDef;

    fn open() -> (Registry, Realm, Object) {
        open_on(Arc::new(ManualScheduler::new()))
    }

    fn open_on(scheduler: Arc<ManualScheduler>) -> (Registry, Realm, Object) {
        let registry = Registry::new();
        let realm = registry
            .open(
                Config::in_memory("list-tests")
                    .schema(vec![
                        ObjectSchemaDef::new("Holder")
                            .property("ints", "int[]")
                            .property("maybe", "int?[]")
                            .property("dates", "date[]")
                            .property("flags", "bool[]")
                            .property("items", "Item[]")
                            .property("notes", "Note[]"),
                        ObjectSchemaDef::new("Item").property("n", "int"),
                        ObjectSchemaDef::new("Note").embedded().property("text", "string"),
                    ])
                    .scheduler(scheduler),
            )
            .unwrap();
        let holder = realm
            .write(|| realm.create("Holder", Value::object([("ints", Value::from(vec![3, 1, 2]))])))
            .unwrap();
        (registry, realm, holder)
    }

    #[test]
    fn mutations_need_a_write() {
        let (_r, realm, holder) = open();
        let ints = holder.list("ints").unwrap();
        assert!(ints.push([4]).is_err());
        realm
            .write(|| {
                ints.push([4, 5])?;
                ints.unshift([0])?;
                assert_eq!(ints.pop()?, Some(Value::Int(5)));
                assert_eq!(ints.shift()?, Some(Value::Int(0)));
                ints.insert(1, 9)?;
                ints.remove(0)?;
                ints.swap(0, 1)?;
                ints.move_item(0, 3)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(
            ints.to_vec().unwrap(),
            vec![Value::Int(9), Value::Int(2), Value::Int(4), Value::Int(1)]
        );
    }

    #[test]
    fn set_past_the_end() {
        let (_r, realm, holder) = open();
        let ints = holder.list("ints").unwrap();
        let err = realm.write(|| ints.set(3, 7)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Requested index 3 calling set() on list 'Holder.ints' when max is 2"
        );
        realm.write(|| ints.set(2, 7)).unwrap();
        assert_eq!(ints.get(2).unwrap(), Some(Value::Int(7)));
        assert_eq!(ints.get(3).unwrap(), None);
    }

    #[test]
    fn splice_returns_removed() {
        let (_r, realm, holder) = open();
        let ints = holder.list("ints").unwrap();
        let removed = realm.write(|| ints.splice(1, 5, [8, 9])).unwrap();
        assert_eq!(removed, vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(ints.to_vec().unwrap(), vec![Value::Int(3), Value::Int(8), Value::Int(9)]);
    }

    #[test]
    fn sorting_primitives_puts_null_first() {
        let (_r, realm, holder) = open();
        let ints = holder.list("ints").unwrap();
        let sorted: Vec<Value> = ints.sorted_self(false).unwrap().to_vec().unwrap();
        assert_eq!(sorted, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let desc = ints.sorted_self(true).unwrap().to_vec().unwrap();
        assert_eq!(desc, vec![Value::Int(3), Value::Int(2), Value::Int(1)]);
        let maybe = holder.list("maybe").unwrap();
        realm.write(|| maybe.push([Value::Int(2), Value::Null, Value::Int(1)])).unwrap();
        let sorted = maybe.sorted_self(false).unwrap().to_vec().unwrap();
        assert_eq!(sorted[0], Value::Null);
        assert_eq!(
            ints.sorted("value", false).unwrap_err().to_string(),
            "Cannot sort on key path 'value': arrays of 'int' can only be sorted on 'self'"
        );
    }

    #[test]
    fn primitive_aggregates() {
        let (_r, _realm, holder) = open();
        let ints = holder.list("ints").unwrap();
        assert_eq!(ints.sum(None).unwrap(), Value::Int(6));
        assert_eq!(ints.avg(None).unwrap(), Value::Double(2.0));
        assert_eq!(
            ints.min("foo").unwrap_err().to_string(),
            "Cannot get property named 'foo' on a list of primitives"
        );
        let flags = holder.list("flags").unwrap();
        assert_eq!(
            flags.min(None).unwrap_err().to_string(),
            "Operation 'min' not supported for bool list 'Holder.flags'"
        );
        let dates = holder.list("dates").unwrap();
        assert_eq!(
            dates.avg(None).unwrap_err().to_string(),
            "Operation 'average' not supported for date list 'Holder.dates'"
        );
    }

    #[test]
    fn object_lists_and_embedded_reordering() {
        let (_r, realm, holder) = open();
        let items = holder.list("items").unwrap();
        let notes = holder.list("notes").unwrap();
        realm
            .write(|| {
                items.push([Value::object([("n", 2)]), Value::object([("n", 1)])])?;
                notes.push([Value::object([("text", "a")]), Value::object([("text", "b")])])?;
                notes.swap(0, 1)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(items.sum("n").unwrap(), Value::Int(3));
        let texts: Vec<Value> = notes
            .objects()
            .unwrap()
            .iter()
            .map(|o| o.get("text").unwrap())
            .collect();
        assert_eq!(texts, vec![Value::from("b"), Value::from("a")]);
        realm.write(|| notes.clear()).unwrap();
        assert_eq!(realm.objects("Item").unwrap().len().unwrap(), 2);
    }

    #[test]
    fn replacing_an_object_reports_delete_and_insert() {
        let scheduler = Arc::new(ManualScheduler::new());
        let (_r, realm, holder) = open_on(Arc::clone(&scheduler));
        let items = holder.list("items").unwrap();
        let ints = holder.list("ints").unwrap();
        realm
            .write(|| {
                items.push([
                    Value::object([("n", 1)]),
                    Value::object([("n", 2)]),
                    Value::object([("n", 3)]),
                ])?;
                Ok(())
            })
            .unwrap();

        let item_changes = Arc::new(parking_lot::Mutex::new(Vec::<ChangeSet>::new()));
        let sink = Arc::clone(&item_changes);
        items.add_listener(move |c| sink.lock().push(c.clone())).unwrap();
        let int_changes = Arc::new(parking_lot::Mutex::new(Vec::<ChangeSet>::new()));
        let sink = Arc::clone(&int_changes);
        ints.add_listener(move |c| sink.lock().push(c.clone())).unwrap();
        scheduler.run_pending();

        realm
            .write(|| {
                let d = realm.create("Item", Value::object([("n", 4)]))?;
                items.splice(1, 1, [&d])?;
                ints.set(1, 9)
            })
            .unwrap();
        scheduler.run_pending();

        let item_changes = item_changes.lock();
        assert_eq!(item_changes.len(), 2);
        assert_eq!(item_changes[1].deletions, vec![1]);
        assert_eq!(item_changes[1].insertions, vec![1]);
        assert!(item_changes[1].modifications.is_empty());
        assert!(item_changes[1].old_modifications.is_empty());

        // A rewritten primitive slot stays a modification.
        let int_changes = int_changes.lock();
        assert_eq!(int_changes.len(), 2);
        assert!(int_changes[1].insertions.is_empty());
        assert!(int_changes[1].deletions.is_empty());
        assert_eq!(int_changes[1].modifications, vec![1]);
    }

    #[test]
    fn deleted_owner_invalidates() {
        let (_r, realm, holder) = open();
        let ints = holder.list("ints").unwrap();
        realm.write(|| realm.delete(&holder)).unwrap();
        assert!(!ints.is_valid());
        assert_eq!(ints.len().unwrap_err().to_string(), "Access to invalidated List object");
    }
}
