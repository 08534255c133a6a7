//! Object schemas.

use std::collections::HashMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::property::{Property, PropertyDef};

/// Unvalidated object schema.
///
/// Properties keep declaration order, which also fixes the storage column
/// order once validated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSchemaDef {
    /// Class name.
    pub name: String,
    /// Primary key property, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
    /// Whether objects of this class only exist inside a parent.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub embedded: bool,
    /// Properties in declaration order.
    #[serde(with = "ordered_properties")]
    pub properties: Vec<(String, PropertyDef)>,
}

impl ObjectSchemaDef {
    /// Starts a definition for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Adds a property.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, def: impl Into<PropertyDef>) -> Self {
        self.properties.push((name.into(), def.into()));
        self
    }

    /// Sets the primary key.
    #[must_use]
    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = Some(name.into());
        self
    }

    /// Marks the class as embedded.
    #[must_use]
    pub fn embedded(mut self) -> Self {
        self.embedded = true;
        self
    }
}

mod ordered_properties {
    use super::*;

    pub fn serialize<S: Serializer>(
        props: &[(String, PropertyDef)],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(props.len()))?;
        for (name, def) in props {
            map.serialize_entry(name, def)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<(String, PropertyDef)>, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = Vec<(String, PropertyDef)>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of property names to descriptors")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, def)) = access.next_entry::<String, PropertyDef>()? {
                    out.push((name, def));
                }
                Ok(out)
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

/// A validated object schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSchema {
    /// Class name.
    pub name: String,
    /// Properties in declaration order.
    pub properties: Vec<Property>,
    /// Primary key property name.
    pub primary_key: Option<String>,
    /// Whether the class is embedded.
    pub embedded: bool,
    by_name: HashMap<String, usize>,
    column_count: usize,
}

impl ObjectSchema {
    pub(crate) fn new(
        name: String,
        mut properties: Vec<Property>,
        primary_key: Option<String>,
        embedded: bool,
    ) -> Self {
        let mut column = 0;
        for prop in &mut properties {
            prop.is_primary = primary_key.as_deref() == Some(prop.name.as_str());
            prop.column = if prop.is_computed() {
                None
            } else {
                column += 1;
                Some(column - 1)
            };
        }
        let by_name = properties
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect();
        Self {
            name,
            properties,
            primary_key,
            embedded,
            by_name,
            column_count: column,
        }
    }

    /// Looks up a property by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.by_name.get(name).map(|&i| &self.properties[i])
    }

    /// The primary key property.
    #[must_use]
    pub fn primary_key_property(&self) -> Option<&Property> {
        self.primary_key.as_deref().and_then(|pk| self.property(pk))
    }

    /// Number of stored columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.column_count
    }

    /// Stored (non-computed) properties in column order.
    pub fn persisted(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter().filter(|p| !p.is_computed())
    }

    /// Stored properties that link to `class`.
    pub fn links_to<'a>(&'a self, class: &'a str) -> impl Iterator<Item = &'a Property> + 'a {
        self.persisted()
            .filter(move |p| p.is_link() && p.object_type.as_deref() == Some(class))
    }

    /// Converts the schema back into an unvalidated definition.
    #[must_use]
    pub fn to_def(&self) -> ObjectSchemaDef {
        ObjectSchemaDef {
            name: self.name.clone(),
            primary_key: self.primary_key.clone(),
            embedded: self.embedded,
            properties: self
                .properties
                .iter()
                .map(|p| (p.name.clone(), p.to_def()))
                .collect(),
        }
    }
}
