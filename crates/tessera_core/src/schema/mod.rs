//! Schema registry.
//!
//! Validates object schemas and stores the resolved property tables. A
//! [`Schema`] is immutable once built and is shared between snapshots with
//! `Arc`.

mod diff;
mod object;
mod property;
mod validate;

use std::collections::HashMap;
use std::sync::Arc;

pub use diff::{diff, SchemaChange};
pub use object::{ObjectSchema, ObjectSchemaDef};
pub use property::{CollectionType, IndexKind, Property, PropertyDef, PropertyType};

use crate::error::{CoreError, CoreResult};

/// A validated set of object schemas.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    classes: Vec<Arc<ObjectSchema>>,
    by_name: HashMap<String, usize>,
}

impl Schema {
    /// Validates `defs` and builds a schema.
    ///
    /// # Errors
    ///
    /// Returns a schema error listing every problem found.
    pub fn new(defs: Vec<ObjectSchemaDef>) -> CoreResult<Self> {
        let classes = validate::validate(&defs)?;
        Ok(Self::from_classes(classes.into_iter().map(Arc::new).collect()))
    }

    /// Validates `defs` without keeping the result.
    ///
    /// # Errors
    ///
    /// Same as [`Schema::new`].
    pub fn validate(defs: &[ObjectSchemaDef]) -> CoreResult<()> {
        validate::validate(defs).map(|_| ())
    }

    /// Parses and validates a JSON array of object schema definitions.
    ///
    /// # Errors
    ///
    /// Returns a schema error for malformed JSON or an invalid schema.
    pub fn from_json(text: &str) -> CoreResult<Self> {
        let defs: Vec<ObjectSchemaDef> = serde_json::from_str(text)
            .map_err(|e| CoreError::schema(format!("Invalid schema JSON: {e}")))?;
        Self::new(defs)
    }

    /// Renders the schema as a JSON array of definitions.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.to_defs()).unwrap_or_else(|_| "[]".to_string())
    }

    fn from_classes(classes: Vec<Arc<ObjectSchema>>) -> Self {
        let by_name = classes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        Self { classes, by_name }
    }

    /// An empty schema.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Looks up a class.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<ObjectSchema>> {
        self.by_name.get(name).map(|&i| &self.classes[i])
    }

    /// Looks up a class, failing with the standard message.
    ///
    /// # Errors
    ///
    /// `Object type 'X' not found in schema.`
    pub fn require(&self, name: &str) -> CoreResult<&Arc<ObjectSchema>> {
        self.get(name)
            .ok_or_else(|| CoreError::schema(format!("Object type '{name}' not found in schema.")))
    }

    /// Whether the schema contains `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Iterates over classes in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ObjectSchema>> {
        self.classes.iter()
    }

    /// Class names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.classes.iter().map(|c| c.name.as_str())
    }

    /// Number of classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether the schema has no classes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Unvalidated definitions for every class.
    #[must_use]
    pub fn to_defs(&self) -> Vec<ObjectSchemaDef> {
        self.classes.iter().map(|c| c.to_def()).collect()
    }

    /// This schema followed by the classes of `retained` it does not define.
    #[must_use]
    pub fn merged_with(&self, retained: &Schema) -> Schema {
        let mut classes = self.classes.clone();
        classes.extend(
            retained
                .classes
                .iter()
                .filter(|c| !self.contains(&c.name))
                .cloned(),
        );
        Self::from_classes(classes)
    }

    /// The schema without `name`.
    #[must_use]
    pub fn without(&self, name: &str) -> Schema {
        Self::from_classes(
            self.classes
                .iter()
                .filter(|c| c.name != name)
                .cloned()
                .collect(),
        )
    }

    /// The schema restricted to `names`, in this schema's order.
    #[must_use]
    pub fn restricted_to<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Schema {
        let keep: std::collections::HashSet<&str> = names.into_iter().collect();
        Self::from_classes(
            self.classes
                .iter()
                .filter(|c| keep.contains(c.name.as_str()))
                .cloned()
                .collect(),
        )
    }

    /// Classes holding a stored link property that targets `class`, with
    /// the property.
    pub fn incoming_links<'a>(
        &'a self,
        class: &'a str,
    ) -> impl Iterator<Item = (&'a Arc<ObjectSchema>, &'a Property)> + 'a {
        self.classes
            .iter()
            .flat_map(move |c| c.links_to(class).map(move |p| (c, p)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> Schema {
        Schema::new(vec![
            ObjectSchemaDef::new("Person")
                .property("name", "string")
                .property("age", "int")
                .property("friends", "Person[]")
                .property("dogs", PropertyDef::linking_objects("Dog", "owner"))
                .primary_key("name"),
            ObjectSchemaDef::new("Dog")
                .property("name", "string")
                .property("owner", "Person"),
        ])
        .unwrap()
    }

    #[test]
    fn lookup_and_missing_type() {
        let schema = people();
        assert_eq!(schema.len(), 2);
        assert!(schema.require("Person").is_ok());
        assert_eq!(
            schema.require("Cat").unwrap_err().to_string(),
            "Object type 'Cat' not found in schema."
        );
    }

    #[test]
    fn computed_properties_have_no_column() {
        let schema = people();
        let person = schema.get("Person").unwrap();
        assert_eq!(person.column_count(), 3);
        assert_eq!(person.property("dogs").unwrap().column, None);
        assert_eq!(person.property("friends").unwrap().column, Some(2));
    }

    #[test]
    fn json_round_trip_preserves_schema() {
        let schema = people();
        let again = Schema::from_json(&schema.to_json()).unwrap();
        assert_eq!(again, schema);
    }

    #[test]
    fn incoming_links_finds_referrers() {
        let schema = people();
        let refs: Vec<_> = schema
            .incoming_links("Person")
            .map(|(c, p)| format!("{}.{}", c.name, p.name))
            .collect();
        assert_eq!(refs, vec!["Person.friends", "Dog.owner"]);
    }

    #[test]
    fn merge_keeps_retained_classes() {
        let schema = people();
        let only_dog = schema.restricted_to(["Dog"]);
        assert_eq!(only_dog.len(), 1);
        let merged = only_dog.merged_with(&schema);
        assert_eq!(merged.names().collect::<Vec<_>>(), vec!["Dog", "Person"]);
        assert!(!merged.without("Dog").contains("Dog"));
    }
}
