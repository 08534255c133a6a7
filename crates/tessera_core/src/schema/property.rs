//! Property descriptors.
//!
//! [`PropertyDef`] is the unvalidated, user-supplied form (shorthand strings
//! such as `"int?[]"` or full descriptors); [`Property`] is the validated form
//! resolved once per schema, with a fixed column slot.

use serde::{Deserialize, Serialize};
use tessera_codec::{Decimal128, ObjectId, Timestamp, Uuid, Value};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Element type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
    /// Boolean.
    Bool,
    /// 64-bit signed integer.
    Int,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    String,
    /// Timestamp.
    Date,
    /// Binary blob.
    Data,
    /// Decimal number.
    Decimal128,
    /// 12-byte object id.
    ObjectId,
    /// UUID.
    Uuid,
    /// Any scalar or a link.
    Mixed,
    /// Link to another object.
    Object,
    /// Computed back-link collection.
    LinkingObjects,
}

impl PropertyType {
    /// The schema name of the type.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Double => "double",
            Self::String => "string",
            Self::Date => "date",
            Self::Data => "data",
            Self::Decimal128 => "decimal128",
            Self::ObjectId => "objectId",
            Self::Uuid => "uuid",
            Self::Mixed => "mixed",
            Self::Object => "object",
            Self::LinkingObjects => "linkingObjects",
        }
    }

    /// Parses a primitive type name. Class names return `None`.
    #[must_use]
    pub fn from_primitive_name(name: &str) -> Option<Self> {
        Some(match name {
            "bool" => Self::Bool,
            "int" => Self::Int,
            "float" => Self::Float,
            "double" => Self::Double,
            "string" => Self::String,
            "date" => Self::Date,
            "data" => Self::Data,
            "decimal128" | "decimal" => Self::Decimal128,
            "objectId" => Self::ObjectId,
            "uuid" => Self::Uuid,
            "mixed" => Self::Mixed,
            _ => return None,
        })
    }

    /// Whether the type may be used for a primary key.
    #[must_use]
    pub const fn can_be_primary(self) -> bool {
        matches!(self, Self::Int | Self::String | Self::ObjectId | Self::Uuid)
    }

    /// Whether the type supports a standard index.
    #[must_use]
    pub const fn can_be_indexed(self) -> bool {
        matches!(
            self,
            Self::Bool | Self::Int | Self::String | Self::Date | Self::ObjectId | Self::Uuid | Self::Mixed
        )
    }

    /// Whether the type is numeric.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Int | Self::Float | Self::Double | Self::Decimal128)
    }

    /// Whether `min`/`max` are defined over the type.
    #[must_use]
    pub const fn supports_min_max(self) -> bool {
        matches!(
            self,
            Self::Int | Self::Float | Self::Double | Self::Decimal128 | Self::Date | Self::Mixed
        )
    }

    /// Whether `sum`/`avg` are defined over the type.
    #[must_use]
    pub const fn supports_sum(self) -> bool {
        matches!(self, Self::Int | Self::Float | Self::Double | Self::Decimal128 | Self::Mixed)
    }

    /// The value a new non-optional column starts with.
    #[must_use]
    pub fn zero_value(self) -> Value {
        match self {
            Self::Bool => Value::Bool(false),
            Self::Int => Value::Int(0),
            Self::Float => Value::Float(0.0),
            Self::Double => Value::Double(0.0),
            Self::String => Value::String(String::new()),
            Self::Date => Value::Date(Timestamp::EPOCH),
            Self::Data => Value::Data(Vec::new()),
            Self::Decimal128 => Value::Decimal(Decimal128::ZERO),
            Self::ObjectId => Value::ObjectId(ObjectId::from_bytes([0; 12])),
            Self::Uuid => Value::Uuid(Uuid::nil()),
            Self::Mixed | Self::Object | Self::LinkingObjects => Value::Null,
        }
    }

    /// Converts `value` to this type if the conversion is lossless.
    ///
    /// Strings convert to the richer scalar types (dates, decimals, object
    /// ids, uuids, base64 data) so JSON input can populate them.
    /// Links and nulls are handled by the caller.
    #[must_use]
    pub fn coerce(self, value: Value) -> Option<Value> {
        let out = match (self, value) {
            (Self::Bool, v @ Value::Bool(_)) => v,
            (Self::Int, v @ Value::Int(_)) => v,
            (Self::Int, Value::Double(x)) if x.fract() == 0.0 && x.abs() < 9.007_199_254_740_992e15 => {
                Value::Int(x as i64)
            }
            (Self::Int, Value::Float(x)) if x.fract() == 0.0 && x.abs() < 16_777_216.0 => {
                Value::Int(x as i64)
            }
            (Self::Float, Value::Float(x)) => Value::Float(x),
            (Self::Float, Value::Double(x)) => Value::Float(x as f32),
            (Self::Float, Value::Int(n)) => Value::Float(n as f32),
            (Self::Double, Value::Double(x)) => Value::Double(x),
            (Self::Double, Value::Float(x)) => Value::Double(f64::from(x)),
            (Self::Double, Value::Int(n)) => Value::Double(n as f64),
            (Self::Decimal128, v @ Value::Decimal(_)) => v,
            (Self::Decimal128, Value::Int(n)) => Value::Decimal(Decimal128::from(n)),
            (Self::Decimal128, Value::Double(x)) => Value::Decimal(x.to_string().parse().ok()?),
            (Self::Decimal128, Value::String(s)) => Value::Decimal(s.parse().ok()?),
            (Self::String, v @ Value::String(_)) => v,
            (Self::Data, v @ Value::Data(_)) => v,
            (Self::Data, Value::String(s)) => Value::Data(STANDARD.decode(s).ok()?),
            (Self::Date, v @ Value::Date(_)) => v,
            (Self::Date, Value::String(s)) => Value::Date(Timestamp::parse_rfc3339(&s).ok()?),
            (Self::ObjectId, v @ Value::ObjectId(_)) => v,
            (Self::ObjectId, Value::String(s)) => Value::ObjectId(s.parse().ok()?),
            (Self::Uuid, v @ Value::Uuid(_)) => v,
            (Self::Uuid, Value::String(s)) => Value::Uuid(Uuid::parse_str(&s).ok()?),
            (Self::Mixed, v) => match v {
                Value::List(_) | Value::Object(_) => return None,
                other => other,
            },
            _ => return None,
        };
        Some(out)
    }
}

/// Collection kind of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionType {
    /// Ordered, duplicates allowed.
    List,
    /// Unordered, unique.
    Set,
}

/// Index kind of a property.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Not indexed.
    #[default]
    None,
    /// Equality/range index.
    Standard,
    /// Full-text index for `TEXT` queries.
    FullText,
}

/// Unvalidated property descriptor.
///
/// Accepts the shorthand forms (`"string"`, `"int?"`, `"Person"`,
/// `"Person[]"`, `"string?[]"`, `"int<>"`) as well as full descriptors with
/// `type`, `objectType`, `property`, `optional`, `indexed` and `default`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PropertyDefInput", into = "PropertyDefRepr")]
pub struct PropertyDef {
    /// Type name or shorthand.
    pub type_name: String,
    /// Target class for `object`, `list`, `set` and `linkingObjects`.
    pub object_type: Option<String>,
    /// Origin property for `linkingObjects`.
    pub origin_property: Option<String>,
    /// Explicit optionality.
    pub optional: Option<bool>,
    /// Requested index.
    pub indexed: IndexKind,
    /// Default value used on create.
    pub default: Option<Value>,
}

impl PropertyDef {
    /// Creates a descriptor from a type name or shorthand.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Self::default()
        }
    }

    /// A `linkingObjects` descriptor.
    pub fn linking_objects(object_type: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            type_name: "linkingObjects".into(),
            object_type: Some(object_type.into()),
            origin_property: Some(property.into()),
            ..Self::default()
        }
    }

    /// Sets the target class.
    #[must_use]
    pub fn object_type(mut self, name: impl Into<String>) -> Self {
        self.object_type = Some(name.into());
        self
    }

    /// Sets explicit optionality.
    #[must_use]
    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = Some(optional);
        self
    }

    /// Requests a standard index.
    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.indexed = IndexKind::Standard;
        self
    }

    /// Requests a full-text index.
    #[must_use]
    pub fn full_text(mut self) -> Self {
        self.indexed = IndexKind::FullText;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

impl From<&str> for PropertyDef {
    fn from(type_name: &str) -> Self {
        Self::new(type_name)
    }
}

impl From<String> for PropertyDef {
    fn from(type_name: String) -> Self {
        Self::new(type_name)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PropertyDefInput {
    Shorthand(String),
    Full(PropertyDefRepr),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum IndexedRepr {
    Flag(bool),
    Kind(String),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropertyDefRepr {
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    object_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    property: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    optional: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    indexed: Option<IndexedRepr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default: Option<serde_json::Value>,
}

impl TryFrom<PropertyDefInput> for PropertyDef {
    type Error = String;

    fn try_from(input: PropertyDefInput) -> Result<Self, Self::Error> {
        let repr = match input {
            PropertyDefInput::Shorthand(s) => return Ok(PropertyDef::new(s)),
            PropertyDefInput::Full(repr) => repr,
        };
        let indexed = match repr.indexed {
            None | Some(IndexedRepr::Flag(false)) => IndexKind::None,
            Some(IndexedRepr::Flag(true)) => IndexKind::Standard,
            Some(IndexedRepr::Kind(kind)) if kind == "full-text" => IndexKind::FullText,
            Some(IndexedRepr::Kind(kind)) => return Err(format!("unknown index kind '{kind}'")),
        };
        Ok(PropertyDef {
            type_name: repr.type_name,
            object_type: repr.object_type,
            origin_property: repr.property,
            optional: repr.optional,
            indexed,
            default: repr.default.map(Value::from),
        })
    }
}

impl From<PropertyDef> for PropertyDefRepr {
    fn from(def: PropertyDef) -> Self {
        let indexed = match def.indexed {
            IndexKind::None => None,
            IndexKind::Standard => Some(IndexedRepr::Flag(true)),
            IndexKind::FullText => Some(IndexedRepr::Kind("full-text".into())),
        };
        PropertyDefRepr {
            type_name: def.type_name,
            object_type: def.object_type,
            property: def.origin_property,
            optional: def.optional,
            indexed,
            default: def.default.as_ref().map(Value::to_json),
        }
    }
}

/// A validated property.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    /// Property name.
    pub name: String,
    /// Element type (for collections, the type of each element).
    pub ty: PropertyType,
    /// Collection kind, if any.
    pub collection: Option<CollectionType>,
    /// Whether the value (or each element) may be null.
    pub optional: bool,
    /// Index kind.
    pub index: IndexKind,
    /// Target class for links, link collections and linking objects.
    pub object_type: Option<String>,
    /// Origin property of a linking-objects property.
    pub origin_property: Option<String>,
    /// Declared default value, already coerced to the property type.
    pub default: Option<Value>,
    /// Whether this is the primary key.
    pub is_primary: bool,
    /// Storage column; `None` for computed properties.
    pub column: Option<usize>,
}

impl Property {
    /// Whether the property is a list.
    #[must_use]
    pub fn is_list(&self) -> bool {
        self.collection == Some(CollectionType::List)
    }

    /// Whether the property is a set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.collection == Some(CollectionType::Set)
    }

    /// Whether the property is a list or a set.
    #[must_use]
    pub fn is_collection(&self) -> bool {
        self.collection.is_some()
    }

    /// Whether the property stores links (single or collection).
    #[must_use]
    pub fn is_link(&self) -> bool {
        self.ty == PropertyType::Object
    }

    /// Whether the property is computed rather than stored.
    #[must_use]
    pub fn is_computed(&self) -> bool {
        self.ty == PropertyType::LinkingObjects
    }

    /// Label of a single element: `"int?"`, `"Person"`.
    #[must_use]
    pub fn element_label(&self) -> String {
        match self.ty {
            PropertyType::Object => self.object_type.clone().unwrap_or_default(),
            PropertyType::Mixed => "mixed".into(),
            ty if self.optional => format!("{}?", ty.name()),
            ty => ty.name().to_string(),
        }
    }

    /// Shorthand label of the whole property: `"int?[]"`, `"Person<>"`.
    #[must_use]
    pub fn label(&self) -> String {
        match (self.ty, self.collection) {
            (PropertyType::LinkingObjects, _) => format!(
                "linkingObjects<{}.{}>",
                self.object_type.as_deref().unwrap_or_default(),
                self.origin_property.as_deref().unwrap_or_default()
            ),
            (_, Some(CollectionType::List)) => format!("{}[]", self.element_label()),
            (_, Some(CollectionType::Set)) => format!("{}<>", self.element_label()),
            (_, None) => self.element_label(),
        }
    }

    /// Label used in aggregate errors: `"bool?"`, `"date list"`.
    #[must_use]
    pub fn aggregate_label(&self) -> String {
        let element = match self.ty {
            PropertyType::Object => "object".to_string(),
            ty if self.optional && ty != PropertyType::Mixed => format!("{}?", ty.name()),
            ty => ty.name().to_string(),
        };
        match self.collection {
            Some(CollectionType::List) => format!("{element} list"),
            Some(CollectionType::Set) => format!("{element} set"),
            None => element,
        }
    }

    /// Value a missing property takes on create when no default is
    /// declared: null when optional, empty for collections.
    #[must_use]
    pub fn implicit_value(&self) -> Option<Value> {
        if self.is_collection() {
            Some(Value::List(Vec::new()))
        } else if self.optional {
            Some(Value::Null)
        } else {
            None
        }
    }

    /// Value a property added by a migration starts with.
    #[must_use]
    pub fn initial_value(&self) -> Value {
        self.default
            .clone()
            .or_else(|| self.implicit_value())
            .unwrap_or_else(|| self.ty.zero_value())
    }

    /// Converts the property back into an unvalidated descriptor.
    #[must_use]
    pub fn to_def(&self) -> PropertyDef {
        let mut def = match (self.ty, self.collection) {
            (PropertyType::LinkingObjects, _) => PropertyDef::linking_objects(
                self.object_type.clone().unwrap_or_default(),
                self.origin_property.clone().unwrap_or_default(),
            ),
            _ => PropertyDef::new(self.label()),
        };
        def.indexed = self.index;
        def.default = self.default.clone();
        def
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerce_numbers() {
        assert_eq!(PropertyType::Int.coerce(Value::Double(3.0)), Some(Value::Int(3)));
        assert_eq!(PropertyType::Int.coerce(Value::Double(3.5)), None);
        assert_eq!(PropertyType::Double.coerce(Value::Int(2)), Some(Value::Double(2.0)));
        assert_eq!(PropertyType::Bool.coerce(Value::Int(1)), None);
        assert_eq!(PropertyType::String.coerce(Value::Int(1)), None);
    }

    #[test]
    fn coerce_strings_into_rich_scalars() {
        let id = ObjectId::generate();
        assert_eq!(
            PropertyType::ObjectId.coerce(Value::String(id.to_string())),
            Some(Value::ObjectId(id))
        );
        assert!(matches!(
            PropertyType::Date.coerce(Value::from("2020-01-02T03:04:05Z")),
            Some(Value::Date(_))
        ));
        assert_eq!(
            PropertyType::Data.coerce(Value::from("AQID")),
            Some(Value::Data(vec![1, 2, 3]))
        );
    }

    #[test]
    fn shorthand_and_full_descriptors_deserialize() {
        let short: PropertyDef = serde_json::from_str("\"int?[]\"").unwrap();
        assert_eq!(short.type_name, "int?[]");

        let full: PropertyDef = serde_json::from_str(
            r#"{"type":"string","indexed":"full-text","default":"x"}"#,
        )
        .unwrap();
        assert_eq!(full.indexed, IndexKind::FullText);
        assert_eq!(full.default, Some(Value::from("x")));

        let back = serde_json::to_value(&full).unwrap();
        assert_eq!(back["indexed"], "full-text");
    }

    #[test]
    fn unknown_index_kind_is_rejected() {
        let res: Result<PropertyDef, _> =
            serde_json::from_str(r#"{"type":"string","indexed":"fuzzy"}"#);
        assert!(res.is_err());
    }
}
