//! Schema validation.
//!
//! Turns unvalidated definitions into [`ObjectSchema`]s. Every problem found
//! is collected and reported in a single error.

use std::collections::HashSet;

use super::object::{ObjectSchema, ObjectSchemaDef};
use super::property::{CollectionType, IndexKind, Property, PropertyDef, PropertyType};
use crate::error::{CoreError, CoreResult};
use tessera_codec::Value;

/// Validates a set of object schema definitions.
pub(crate) fn validate(defs: &[ObjectSchemaDef]) -> CoreResult<Vec<ObjectSchema>> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    let mut classes = Vec::with_capacity(defs.len());

    for def in defs {
        if def.name.trim().is_empty() {
            errors.push("Object schema must have a non-empty name".to_string());
            continue;
        }
        if !seen.insert(def.name.as_str()) {
            errors.push(format!("Type '{}' appears more than once in the schema.", def.name));
            continue;
        }
        let mut props = Vec::with_capacity(def.properties.len());
        let mut prop_names = HashSet::new();
        for (name, pdef) in &def.properties {
            if !prop_names.insert(name.as_str()) {
                errors.push(format!(
                    "Property '{}.{}' appears more than once.",
                    def.name, name
                ));
                continue;
            }
            match parse_property(&def.name, name, pdef) {
                Ok(prop) => props.push(prop),
                Err(msg) => errors.push(msg),
            }
        }
        classes.push(ObjectSchema::new(
            def.name.clone(),
            props,
            def.primary_key.clone(),
            def.embedded,
        ));
    }

    for class in &classes {
        check_primary_key(class, &mut errors);
        for prop in &class.properties {
            check_relationship(class, prop, &classes, &mut errors);
        }
    }

    if errors.is_empty() {
        Ok(classes)
    } else {
        Err(CoreError::schema(format!(
            "Schema validation failed due to the following errors:\n- {}",
            errors.join("\n- ")
        )))
    }
}

fn parse_property(class: &str, name: &str, def: &PropertyDef) -> Result<Property, String> {
    let full = format!("{class}.{name}");
    let type_name = def.type_name.trim();
    if type_name.is_empty() {
        return Err(format!("Property '{full}' must have a non-empty type"));
    }

    let mut optional = def.optional.unwrap_or(false);
    let (base, collection): (&str, Option<CollectionType>) = match type_name {
        "list" | "set" => {
            let collection = if type_name == "list" {
                CollectionType::List
            } else {
                CollectionType::Set
            };
            let element = def.object_type.as_deref().map(str::trim).unwrap_or_default();
            if element.is_empty() {
                return Err(format!(
                    "{} property '{full}' must have a non-empty objectType",
                    collection_word(collection)
                ));
            }
            (element, Some(collection))
        }
        "object" => {
            let target = def.object_type.as_deref().map(str::trim).unwrap_or_default();
            if target.is_empty() {
                return Err(format!("Property '{full}' of type 'object' must have an objectType"));
            }
            (target, None)
        }
        "linkingObjects" => return parse_linking_objects(&full, name, def),
        short => {
            if let Some(inner) = short.strip_suffix("[]") {
                (inner, Some(CollectionType::List))
            } else if let Some(inner) = short.strip_suffix("<>") {
                (inner, Some(CollectionType::Set))
            } else {
                (short, None)
            }
        }
    };

    let base = match base.strip_suffix('?') {
        Some(inner) => {
            optional = true;
            inner
        }
        None => base,
    };
    if let Some(collection) = collection {
        if base.ends_with("[]")
            || base.ends_with("<>")
            || base == "list"
            || base == "set"
        {
            return Err(format!(
                "{} property '{full}' must have a non-list value type",
                collection_word(collection)
            ));
        }
    }
    if base.is_empty() {
        return Err(format!("Property '{full}' must have a non-empty type"));
    }
    if base == "object" || base == "linkingObjects" {
        return Err(format!("Property '{full}' has invalid element type '{base}'"));
    }

    let (ty, object_type) = match PropertyType::from_primitive_name(base) {
        Some(ty) => (ty, None),
        None => (PropertyType::Object, Some(base.to_string())),
    };

    match (ty, collection) {
        (PropertyType::Object, Some(c)) if optional => {
            return Err(format!("{} property '{full}' cannot be optional", collection_word(c)));
        }
        (PropertyType::Object, None) => {
            if def.optional == Some(false) {
                return Err(format!("Property '{full}' of type 'object' must be nullable."));
            }
            optional = true;
        }
        (PropertyType::Mixed, _) => optional = true,
        _ => {}
    }

    match def.indexed {
        IndexKind::None => {}
        IndexKind::Standard if collection.is_none() && ty.can_be_indexed() => {}
        IndexKind::FullText if collection.is_none() && ty == PropertyType::String => {}
        IndexKind::Standard => {
            return Err(format!(
                "Property '{full}' of type '{}' cannot be indexed.",
                label_for(ty, collection, object_type.as_deref())
            ));
        }
        IndexKind::FullText => {
            return Err(format!(
                "Property '{full}' of type '{}' cannot be full-text indexed.",
                label_for(ty, collection, object_type.as_deref())
            ));
        }
    }

    let default = match &def.default {
        None => None,
        Some(_) if ty == PropertyType::Object || collection.is_some() => {
            return Err(format!("Property '{full}' cannot have a default value"));
        }
        Some(Value::Null) if optional => Some(Value::Null),
        Some(value) => Some(ty.coerce(value.clone()).ok_or_else(|| {
            format!(
                "Default value for property '{full}' must be of type '{}', got '{}'",
                ty.name(),
                value.type_name()
            )
        })?),
    };

    Ok(Property {
        name: name.to_string(),
        ty,
        collection,
        optional,
        index: def.indexed,
        object_type,
        origin_property: None,
        default,
        is_primary: false,
        column: None,
    })
}

fn parse_linking_objects(full: &str, name: &str, def: &PropertyDef) -> Result<Property, String> {
    let target = def.object_type.as_deref().map(str::trim).unwrap_or_default();
    let origin = def.origin_property.as_deref().map(str::trim).unwrap_or_default();
    if target.is_empty() || origin.is_empty() {
        return Err(format!(
            "Property '{full}' of type 'linkingObjects' must have an objectType and a property"
        ));
    }
    if def.optional == Some(true) {
        return Err(format!("Linking objects property '{full}' cannot be optional"));
    }
    Ok(Property {
        name: name.to_string(),
        ty: PropertyType::LinkingObjects,
        collection: Some(CollectionType::List),
        optional: false,
        index: IndexKind::None,
        object_type: Some(target.to_string()),
        origin_property: Some(origin.to_string()),
        default: None,
        is_primary: false,
        column: None,
    })
}

fn check_primary_key(class: &ObjectSchema, errors: &mut Vec<String>) {
    let Some(pk) = class.primary_key.as_deref() else {
        return;
    };
    if class.embedded {
        errors.push(format!("Embedded object '{}' cannot have a primary key.", class.name));
        return;
    }
    match class.property(pk) {
        None => errors.push(format!(
            "Specified primary key '{}.{}' does not exist.",
            class.name, pk
        )),
        Some(prop) if prop.is_collection() || !prop.ty.can_be_primary() => errors.push(format!(
            "Property '{}.{}' of type '{}' cannot be made the primary key.",
            class.name,
            pk,
            label_for(prop.ty, prop.collection, prop.object_type.as_deref())
        )),
        Some(_) => {}
    }
}

fn check_relationship(
    class: &ObjectSchema,
    prop: &Property,
    classes: &[ObjectSchema],
    errors: &mut Vec<String>,
) {
    let find = |name: &str| classes.iter().find(|c| c.name == name);
    match prop.ty {
        PropertyType::Object => {
            let target = prop.object_type.as_deref().unwrap_or_default();
            if find(target).is_none() {
                errors.push(format!(
                    "Property '{}.{}' of type '{}' has unknown object type '{}'",
                    class.name,
                    prop.name,
                    if prop.is_collection() { "array" } else { "object" },
                    target
                ));
            }
        }
        PropertyType::LinkingObjects => {
            let target = prop.object_type.as_deref().unwrap_or_default();
            let origin = prop.origin_property.as_deref().unwrap_or_default();
            let Some(target_class) = find(target) else {
                errors.push(format!(
                    "Property '{}.{}' of type 'linking objects' has unknown object type '{}'",
                    class.name, prop.name, target
                ));
                return;
            };
            match target_class.property(origin) {
                None => errors.push(format!(
                    "Property '{}.{}' declared as origin of linking objects property '{}.{}' does not exist",
                    target, origin, class.name, prop.name
                )),
                Some(origin_prop) if origin_prop.ty != PropertyType::Object => {
                    errors.push(format!(
                        "Property '{}.{}' declared as origin of linking objects property '{}.{}' is not a link",
                        target, origin, class.name, prop.name
                    ));
                }
                Some(origin_prop)
                    if origin_prop.object_type.as_deref() != Some(class.name.as_str()) =>
                {
                    errors.push(format!(
                        "Property '{}.{}' declared as origin of linking objects property '{}.{}' links to type '{}'",
                        target,
                        origin,
                        class.name,
                        prop.name,
                        origin_prop.object_type.as_deref().unwrap_or_default()
                    ));
                }
                Some(_) => {}
            }
        }
        _ => {}
    }
}

fn collection_word(collection: CollectionType) -> &'static str {
    match collection {
        CollectionType::List => "List",
        CollectionType::Set => "Set",
    }
}

fn label_for(ty: PropertyType, collection: Option<CollectionType>, object_type: Option<&str>) -> String {
    let base = match ty {
        PropertyType::Object => object_type.unwrap_or("object"),
        other => other.name(),
    };
    match collection {
        Some(CollectionType::List) => format!("{base}[]"),
        Some(CollectionType::Set) => format!("{base}<>"),
        None => base.to_string(),
    }
}
