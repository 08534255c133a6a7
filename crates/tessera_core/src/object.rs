//! Managed object handles.

use std::sync::Arc;

use tessera_codec::{ObjKey, ObjLink, Value};

use crate::error::{CoreError, CoreResult};
use crate::json;
use crate::list::List;
use crate::notification::{ObjectChangeSet, Watch};
use crate::query::QueryArg;
use crate::realm::Realm;
use crate::results::Results;
use crate::schema::{ObjectSchema, Property};
use crate::set::Set;
use crate::storage::State;
use crate::types::ListenerToken;

/// A handle on one stored object.
///
/// The handle holds only the object's class and key. Every access reads the
/// realm's current state, so it sees committed changes from other handles
/// once the realm refreshes, and fails once the object is deleted.
#[derive(Clone)]
pub struct Object {
    realm: Realm,
    link: ObjLink,
    target: u64,
}

impl Object {
    pub(crate) fn new(realm: Realm, link: ObjLink) -> Self {
        let target = realm.next_target();
        Self { realm, link, target }
    }

    pub(crate) fn link(&self) -> &ObjLink {
        &self.link
    }

    /// The realm the object belongs to.
    #[must_use]
    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    /// Class name.
    #[must_use]
    pub fn class(&self) -> &str {
        &self.link.class
    }

    /// Key of the object within its class. Keys are never reused.
    #[must_use]
    pub fn object_key(&self) -> ObjKey {
        self.link.key
    }

    /// Whether the object still exists in the state the realm reads.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.realm.read(|s| s.contains(&self.link)).unwrap_or(false)
    }

    /// # Errors
    ///
    /// Fails when the class is gone or the realm is closed.
    pub fn object_schema(&self) -> CoreResult<Arc<ObjectSchema>> {
        self.realm
            .read(|s| s.schema().require(&self.link.class).map(Arc::clone))?
    }

    /// Runs `f` with the object's property `name` in the current state.
    fn with_property<R>(
        &self,
        name: &str,
        f: impl FnOnce(&State, &Property) -> CoreResult<R>,
    ) -> CoreResult<R> {
        self.realm.read(|s| {
            if !s.contains(&self.link) {
                return Err(CoreError::object_invalidated());
            }
            let class = s.schema().require(&self.link.class)?;
            let prop = class.property(name).ok_or_else(|| missing_property(name, &class.name))?;
            f(s, prop)
        })?
    }

    /// Reads a property. Links read as [`Value::Link`], lists and sets as
    /// [`Value::List`], linking objects as the list of linking objects.
    ///
    /// # Errors
    ///
    /// `Accessing object which has been invalidated or deleted`, or an
    /// unknown property.
    pub fn get(&self, name: &str) -> CoreResult<Value> {
        self.with_property(name, |s, prop| s.read(&self.link, prop))
    }

    /// The object a single-link property points to.
    ///
    /// # Errors
    ///
    /// As [`Object::get`].
    pub fn get_object(&self, name: &str) -> CoreResult<Option<Object>> {
        Ok(match self.get(name)? {
            Value::Link(link) => Some(Object::new(self.realm.clone(), link)),
            _ => None,
        })
    }

    /// Writes a property. Object literals assigned to link properties
    /// create the linked objects.
    ///
    /// # Errors
    ///
    /// No open write, type errors, primary key changes and read-only
    /// properties.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> CoreResult<()> {
        let value = value.into();
        self.realm.mutate(|w| w.set_property(&self.link, name, value))
    }

    /// The list property `name`.
    ///
    /// # Errors
    ///
    /// Unknown or non-list properties and invalidated objects.
    pub fn list(&self, name: &str) -> CoreResult<List> {
        let prop = self.with_property(name, |_, prop| {
            if prop.is_list() {
                Ok(prop.clone())
            } else {
                Err(CoreError::schema(format!(
                    "Property '{}.{}' is not a list",
                    self.link.class, prop.name
                )))
            }
        })?;
        Ok(List::new(self.realm.clone(), self.link.clone(), prop))
    }

    /// The set property `name`.
    ///
    /// # Errors
    ///
    /// Unknown or non-set properties and invalidated objects.
    pub fn set_collection(&self, name: &str) -> CoreResult<Set> {
        let prop = self.with_property(name, |_, prop| {
            if prop.is_set() {
                Ok(prop.clone())
            } else {
                Err(CoreError::schema(format!(
                    "Property '{}.{}' is not a set",
                    self.link.class, prop.name
                )))
            }
        })?;
        Ok(Set::new(self.realm.clone(), self.link.clone(), prop))
    }

    /// Live results of a declared linking-objects property.
    ///
    /// # Errors
    ///
    /// Unknown properties or properties that are not linking objects.
    pub fn linking_objects(&self, name: &str) -> CoreResult<Results> {
        let (origin_class, origin_prop) = self.with_property(name, |_, prop| {
            match (prop.is_computed(), &prop.object_type, &prop.origin_property) {
                (true, Some(class), Some(origin)) => Ok((class.clone(), origin.clone())),
                _ => Err(CoreError::schema(format!(
                    "Property '{}.{}' is not a linkingObjects property",
                    self.link.class, prop.name
                ))),
            }
        })?;
        Ok(Results::backlinks(
            self.realm.clone(),
            self.link.clone(),
            &origin_class,
            &origin_prop,
        ))
    }

    /// Live results of the objects of `class` linking here through
    /// `property`, without a declared linking-objects property.
    ///
    /// # Errors
    ///
    /// Unknown class or property, or a property that does not link to this
    /// object's class.
    pub fn linking_objects_of(&self, class: &str, property: &str) -> CoreResult<Results> {
        self.realm.read(|s| -> CoreResult<()> {
            if !s.contains(&self.link) {
                return Err(CoreError::object_invalidated());
            }
            let origin = s.schema().require(class)?;
            let prop = origin.property(property).ok_or_else(|| missing_property(property, class))?;
            if !prop.is_link() || prop.object_type.as_deref() != Some(self.link.class.as_str()) {
                return Err(CoreError::schema(format!(
                    "'{class}#{property}' is not a relationship to '{}'",
                    self.link.class
                )));
            }
            Ok(())
        })??;
        Ok(Results::backlinks(self.realm.clone(), self.link.clone(), class, property))
    }

    /// Number of links to this object from any class.
    ///
    /// # Errors
    ///
    /// `Accessing object which has been invalidated or deleted`.
    pub fn linking_objects_count(&self) -> CoreResult<usize> {
        self.realm.read(|s| {
            if s.contains(&self.link) {
                Ok(s.count_incoming(&self.link))
            } else {
                Err(CoreError::object_invalidated())
            }
        })?
    }

    /// Property names in schema order.
    ///
    /// # Errors
    ///
    /// As [`Object::object_schema`].
    pub fn keys(&self) -> CoreResult<Vec<String>> {
        Ok(self
            .object_schema()?
            .properties
            .iter()
            .map(|p| p.name.clone())
            .collect())
    }

    /// `(name, value)` pairs in schema order.
    ///
    /// # Errors
    ///
    /// As [`Object::get`].
    pub fn entries(&self) -> CoreResult<Vec<(String, Value)>> {
        self.realm.read(|s| {
            let class = s.schema().require(&self.link.class)?;
            class
                .properties
                .iter()
                .map(|p| Ok((p.name.clone(), s.read(&self.link, p)?)))
                .collect()
        })?
    }

    /// A JSON rendering with links expanded into nested objects.
    ///
    /// # Errors
    ///
    /// `Converting circular structure to JSON` when links form a cycle.
    pub fn to_json(&self) -> CoreResult<serde_json::Value> {
        self.realm.read(|s| json::object_to_json(s, &self.link))?
    }

    /// Registers a listener for changes to this object. The first delivery
    /// reports no changes; later ones list changed properties or the
    /// deletion.
    ///
    /// # Errors
    ///
    /// `Accessing object which has been invalidated or deleted`, or a
    /// closed realm.
    pub fn add_listener<F>(&self, callback: F) -> CoreResult<ListenerToken>
    where
        F: Fn(&ObjectChangeSet) + Send + Sync + 'static,
    {
        let observed = self
            .realm
            .read(|s| s.row(&self.link).map(|r| r.values.clone()))?
            .ok_or_else(CoreError::object_invalidated)?;
        self.realm.add_watch(
            self.target,
            Watch::Object {
                link: self.link.clone(),
                observed: Some(observed),
                callback: Arc::new(callback),
            },
        )
    }

    /// Removes one listener. Returns whether it existed.
    pub fn remove_listener(&self, token: ListenerToken) -> bool {
        self.realm.remove_watch(token)
    }

    /// Removes every listener registered through this handle.
    pub fn remove_all_listeners(&self) {
        self.realm.remove_watches(self.target);
    }
}

fn missing_property(name: &str, class: &str) -> CoreError {
    CoreError::schema(format!("Property '{name}' does not exist on '{class}' objects"))
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.link == other.link && self.realm.path() == other.realm.path()
    }
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.link.class)
            .field("key", &self.link.key)
            .finish()
    }
}

impl From<&Object> for Value {
    fn from(object: &Object) -> Self {
        Value::Link(object.link.clone())
    }
}

impl From<Object> for Value {
    fn from(object: Object) -> Self {
        Value::Link(object.link)
    }
}

impl From<&Object> for QueryArg {
    fn from(object: &Object) -> Self {
        QueryArg::Value(Value::from(object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::notification::ManualScheduler;
    use crate::registry::Registry;
    use crate::schema::{ObjectSchemaDef, PropertyDef};

    fn open() -> (Registry, Realm) {
        let registry = Registry::new();
        let realm = registry
            .open(
                Config::in_memory("object-tests")
                    .schema(vec![
                        ObjectSchemaDef::new("Person")
                            .primary_key("name")
                            .property("name", "string")
                            .property("age", "int?")
                            .property("best", "Person")
                            .property("dogs", "Dog[]")
                            .property("nicknames", "string<>")
                            .property("fans", PropertyDef::linking_objects("Person", "best")),
                        ObjectSchemaDef::new("Dog").property("name", "string"),
                    ])
                    .scheduler(Arc::new(ManualScheduler::new())),
            )
            .unwrap();
        (registry, realm)
    }

    #[test]
    fn read_write_and_links() {
        let (_r, realm) = open();
        let (ann, bob) = realm
            .write(|| {
                let ann = realm.create("Person", Value::object([("name", "Ann")]))?;
                let bob = realm.create(
                    "Person",
                    Value::object([("name", Value::from("Bob")), ("best", Value::from(&ann))]),
                )?;
                Ok((ann, bob))
            })
            .unwrap();
        assert_eq!(bob.get_object("best").unwrap(), Some(ann.clone()));
        assert_eq!(ann.get("age").unwrap(), Value::Null);
        assert!(ann.set("age", 3).is_err());
        realm.write(|| ann.set("age", 3)).unwrap();
        assert_eq!(ann.get("age").unwrap(), Value::Int(3));
        assert_eq!(ann.linking_objects("fans").unwrap().len().unwrap(), 1);
        assert_eq!(ann.linking_objects_count().unwrap(), 1);
        assert_eq!(
            realm.write(|| ann.set("name", "Zed")).unwrap_err().to_string(),
            "Cannot modify primary key after creation: 'Person.name'"
        );
        assert_eq!(
            ann.keys().unwrap(),
            ["name", "age", "best", "dogs", "nicknames", "fans"]
        );
    }

    #[test]
    fn ad_hoc_linking_objects_errors() {
        let (_r, realm) = open();
        let ann = realm
            .write(|| realm.create("Person", Value::object([("name", "Ann")])))
            .unwrap();
        assert_eq!(ann.linking_objects_of("Person", "best").unwrap().len().unwrap(), 0);
        assert_eq!(
            ann.linking_objects_of("Cat", "best").unwrap_err().to_string(),
            "Object type 'Cat' not found in schema."
        );
        assert_eq!(
            ann.linking_objects_of("Person", "height").unwrap_err().to_string(),
            "Property 'height' does not exist on 'Person' objects"
        );
        assert_eq!(
            ann.linking_objects_of("Person", "name").unwrap_err().to_string(),
            "'Person#name' is not a relationship to 'Person'"
        );
    }

    #[test]
    fn deleted_object_is_invalid() {
        let (_r, realm) = open();
        let ann = realm
            .write(|| realm.create("Person", Value::object([("name", "Ann")])))
            .unwrap();
        realm.write(|| realm.delete(&ann)).unwrap();
        assert!(!ann.is_valid());
        assert_eq!(
            ann.get("name").unwrap_err().to_string(),
            "Accessing object which has been invalidated or deleted"
        );
    }

    #[test]
    fn listener_reports_changed_properties_then_deletion() {
        let (_r, realm) = open();
        let ann = realm
            .write(|| realm.create("Person", Value::object([("name", "Ann")])))
            .unwrap();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        ann.add_listener(move |c| sink.lock().push(c.clone())).unwrap();
        realm.deliver_now();
        realm.write(|| ann.set("age", 5)).unwrap();
        realm.deliver_now();
        realm.write(|| realm.delete(&ann)).unwrap();
        realm.deliver_now();
        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert!(seen[0].is_empty());
        assert_eq!(seen[1].changed_properties, ["age"]);
        assert!(seen[2].deleted);
    }
}
