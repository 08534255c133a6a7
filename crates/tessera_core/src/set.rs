//! Managed set properties.
//!
//! Sets are stored sorted and deduplicated, so iteration order is the value
//! order (objects by class and key) rather than insertion order.

use tessera_codec::{ObjLink, Value};

use crate::error::CoreResult;
use crate::list::Backing;
use crate::notification::ChangeSet;
use crate::object::Object;
use crate::query::QueryArg;
use crate::realm::Realm;
use crate::results::Results;
use crate::schema::Property;
use crate::types::ListenerToken;

/// An unordered, unique, live set property of a managed object.
#[derive(Clone)]
pub struct Set {
    backing: Backing,
}

impl Set {
    pub(crate) fn new(realm: Realm, owner: ObjLink, prop: Property) -> Self {
        Self {
            backing: Backing::new(realm, owner, prop),
        }
    }

    /// The set property.
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
    /// As [`Set::len`].
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.backing.items()?.is_empty())
    }

    /// The members in stored order.
    ///
    /// # Errors
    ///
    /// As [`Set::len`].
    pub fn values(&self) -> CoreResult<Vec<Value>> {
        self.backing.items()
    }

    /// Members of a set of objects as handles.
    ///
    /// # Errors
    ///
    /// As [`Set::len`].
    pub fn objects(&self) -> CoreResult<Vec<Object>> {
        Ok(self
            .backing
            .items()?
            .into_iter()
            .filter_map(|v| self.backing.object_at(Some(v)))
            .collect())
    }

    /// Whether `value` is a member.
    ///
    /// # Errors
    ///
    /// As [`Set::len`].
    pub fn has(&self, value: impl Into<Value>) -> CoreResult<bool> {
        let needle = value.into();
        Ok(self.backing.items()?.iter().any(|v| v.loose_eq(&needle)))
    }

    /// Adds `value`. Returns whether it was not already a member.
    ///
    /// # Errors
    ///
    /// Type errors or no open write.
    pub fn add(&self, value: impl Into<Value>) -> CoreResult<bool> {
        let value = value.into();
        self.backing.modify(|items| {
            if items.iter().any(|v| v.loose_eq(&value)) {
                return Ok(false);
            }
            items.push(value);
            Ok(true)
        })
    }

    /// Removes `value`. Returns whether it was a member.
    ///
    /// # Errors
    ///
    /// No open write or an invalidated set.
    pub fn delete(&self, value: impl Into<Value>) -> CoreResult<bool> {
        let value = value.into();
        self.backing.modify(|items| {
            let before = items.len();
            items.retain(|v| !v.loose_eq(&value));
            Ok(items.len() != before)
        })
    }

    /// Removes every member.
    ///
    /// # Errors
    ///
    /// As [`Set::delete`].
    pub fn clear(&self) -> CoreResult<()> {
        self.backing.modify(|items| {
            items.clear();
            Ok(())
        })
    }

    /// Live results over the members.
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

    /// Whether the owning object still exists.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.backing.is_valid()
    }

    /// Registers a change listener.
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

    /// Removes every listener registered through this set.
    pub fn remove_all_listeners(&self) {
        self.backing.realm.remove_watches(self.backing.target);
    }
}

impl std::fmt::Debug for Set {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Set")
            .field("owner", &self.backing.owner)
            .field("property", &self.backing.prop.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Config;
    use crate::notification::ManualScheduler;
    use crate::registry::Registry;
    use crate::schema::ObjectSchemaDef;

    #[test]
    fn add_delete_has() {
        let registry = Registry::new();
        let realm = registry
            .open(
                Config::in_memory("set-tests")
                    .schema(vec![ObjectSchemaDef::new("Bag").property("tags", "string<>")])
                    .scheduler(Arc::new(ManualScheduler::new())),
            )
            .unwrap();
        let bag = realm
            .write(|| realm.create("Bag", Value::object([("tags", Value::from(vec!["b", "a", "b"]))])))
            .unwrap();
        let tags = bag.set_collection("tags").unwrap();
        assert_eq!(tags.len().unwrap(), 2);
        assert_eq!(tags.values().unwrap(), vec![Value::from("a"), Value::from("b")]);
        realm
            .write(|| {
                assert!(tags.add("c")?);
                assert!(!tags.add("a")?);
                assert!(tags.delete("b")?);
                assert!(!tags.delete("zz")?);
                Ok(())
            })
            .unwrap();
        assert!(tags.has("c").unwrap());
        assert!(!tags.has("b").unwrap());
        assert_eq!(tags.filtered("self BEGINSWITH 'c'", &[]).unwrap().len().unwrap(), 1);
        realm.write(|| tags.clear()).unwrap();
        assert!(tags.is_empty().unwrap());
    }
}
