//! Schema comparison for migrations.

use std::fmt;

use super::Schema;

/// One difference between two validated schemas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    /// A class exists only in the new schema.
    AddedClass {
        /// Class name.
        class: String,
    },
    /// A class exists only in the old schema.
    RemovedClass {
        /// Class name.
        class: String,
    },
    /// A stored property exists only in the new schema.
    AddedProperty {
        /// Class name.
        class: String,
        /// Property name.
        property: String,
    },
    /// A stored property exists only in the old schema.
    RemovedProperty {
        /// Class name.
        class: String,
        /// Property name.
        property: String,
    },
    /// A stored property changed type, optionality or collection kind.
    ChangedPropertyType {
        /// Class name.
        class: String,
        /// Property name.
        property: String,
        /// Old type label.
        old: String,
        /// New type label.
        new: String,
    },
    /// The primary key property changed.
    ChangedPrimaryKey {
        /// Class name.
        class: String,
        /// Old primary key.
        old: Option<String>,
        /// New primary key.
        new: Option<String>,
    },
    /// The embedded flag changed.
    ChangedEmbedded {
        /// Class name.
        class: String,
    },
    /// An index was added or removed.
    ChangedIndex {
        /// Class name.
        class: String,
        /// Property name.
        property: String,
    },
}

impl SchemaChange {
    /// Whether existing data must be migrated for this change.
    #[must_use]
    pub fn requires_migration(&self) -> bool {
        !matches!(
            self,
            Self::AddedClass { .. } | Self::RemovedClass { .. } | Self::ChangedIndex { .. }
        )
    }
}

impl fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddedClass { class } => write!(f, "Class '{class}' has been added."),
            Self::RemovedClass { class } => write!(f, "Class '{class}' has been removed."),
            Self::AddedProperty { class, property } => {
                write!(f, "Property '{class}.{property}' has been added.")
            }
            Self::RemovedProperty { class, property } => {
                write!(f, "Property '{class}.{property}' has been removed.")
            }
            Self::ChangedPropertyType {
                class,
                property,
                old,
                new,
            } => write!(
                f,
                "Property '{class}.{property}' has been changed from '{old}' to '{new}'."
            ),
            Self::ChangedPrimaryKey { class, old, new } => match (old, new) {
                (None, Some(new)) => {
                    write!(f, "Primary Key for class '{class}' has been added ('{new}').")
                }
                (Some(old), None) => {
                    write!(f, "Primary Key for class '{class}' has been removed ('{old}').")
                }
                (old, new) => write!(
                    f,
                    "Primary Key for class '{class}' has changed from '{}' to '{}'.",
                    old.as_deref().unwrap_or_default(),
                    new.as_deref().unwrap_or_default()
                ),
            },
            Self::ChangedEmbedded { class } => {
                write!(f, "Class '{class}' has changed its embedded setting.")
            }
            Self::ChangedIndex { class, property } => {
                write!(f, "Property '{class}.{property}' has changed its index.")
            }
        }
    }
}

/// Compares `old` against `new`, class by class and then property by
/// property.
///
/// Entries for classes and properties of `new` come first in `new`'s order,
/// followed by removals in `old`'s order. Computed properties never
/// produce entries. Renames show up as a removal plus an addition.
#[must_use]
pub fn diff(old: &Schema, new: &Schema) -> Vec<SchemaChange> {
    let mut changes = Vec::new();
    for class in new.iter() {
        let Some(prev) = old.get(&class.name) else {
            changes.push(SchemaChange::AddedClass {
                class: class.name.clone(),
            });
            continue;
        };
        if prev.embedded != class.embedded {
            changes.push(SchemaChange::ChangedEmbedded {
                class: class.name.clone(),
            });
        }
        for prop in class.persisted() {
            match prev.property(&prop.name).filter(|p| !p.is_computed()) {
                None => changes.push(SchemaChange::AddedProperty {
                    class: class.name.clone(),
                    property: prop.name.clone(),
                }),
                Some(before) if before.label() != prop.label() => {
                    changes.push(SchemaChange::ChangedPropertyType {
                        class: class.name.clone(),
                        property: prop.name.clone(),
                        old: before.label(),
                        new: prop.label(),
                    });
                }
                Some(before) if before.index != prop.index && !prop.is_primary => {
                    changes.push(SchemaChange::ChangedIndex {
                        class: class.name.clone(),
                        property: prop.name.clone(),
                    });
                }
                Some(_) => {}
            }
        }
        for before in prev.persisted() {
            if class.property(&before.name).filter(|p| !p.is_computed()).is_none() {
                changes.push(SchemaChange::RemovedProperty {
                    class: class.name.clone(),
                    property: before.name.clone(),
                });
            }
        }
        if prev.primary_key != class.primary_key {
            changes.push(SchemaChange::ChangedPrimaryKey {
                class: class.name.clone(),
                old: prev.primary_key.clone(),
                new: class.primary_key.clone(),
            });
        }
    }
    for prev in old.iter() {
        if new.get(&prev.name).is_none() {
            changes.push(SchemaChange::RemovedClass {
                class: prev.name.clone(),
            });
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ObjectSchemaDef;

    fn schema(defs: Vec<ObjectSchemaDef>) -> Schema {
        Schema::new(defs).unwrap()
    }

    #[test]
    fn identical_schemas_have_no_changes() {
        let s = schema(vec![ObjectSchemaDef::new("T").property("a", "int")]);
        assert!(diff(&s, &s).is_empty());
    }

    #[test]
    fn property_changes_are_ordered() {
        let old = schema(vec![ObjectSchemaDef::new("T")
            .property("a", "int")
            .property("b", "string")]);
        let new = schema(vec![ObjectSchemaDef::new("T")
            .property("a", "string")
            .property("c", "int")]);
        let changes = diff(&old, &new);
        let text: Vec<String> = changes.iter().map(ToString::to_string).collect();
        assert_eq!(
            text,
            vec![
                "Property 'T.a' has been changed from 'int' to 'string'.",
                "Property 'T.c' has been added.",
                "Property 'T.b' has been removed.",
            ]
        );
        assert!(changes.iter().all(SchemaChange::requires_migration));
    }

    #[test]
    fn class_and_index_changes_do_not_require_migration() {
        let old = schema(vec![
            ObjectSchemaDef::new("T").property("a", "int"),
            ObjectSchemaDef::new("Gone").property("x", "int"),
        ]);
        let new = schema(vec![
            ObjectSchemaDef::new("T").property("a", crate::schema::PropertyDef::new("int").indexed()),
            ObjectSchemaDef::new("New").property("y", "int"),
        ]);
        let changes = diff(&old, &new);
        assert_eq!(changes.len(), 3);
        assert!(!changes.iter().any(SchemaChange::requires_migration));
    }

    #[test]
    fn primary_key_change_is_reported() {
        let old = schema(vec![ObjectSchemaDef::new("T").property("a", "int")]);
        let new = schema(vec![ObjectSchemaDef::new("T").property("a", "int").primary_key("a")]);
        let changes = diff(&old, &new);
        assert_eq!(
            changes,
            vec![SchemaChange::ChangedPrimaryKey {
                class: "T".into(),
                old: None,
                new: Some("a".into())
            }]
        );
    }
}
