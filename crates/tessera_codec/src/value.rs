//! The dynamic value model shared by storage, queries and the public API.

use crate::scalar::{Decimal128, ObjLink, ObjectId, Timestamp};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Any value a property can hold, plus the two input-only shapes
/// (`List` for collection literals, `Object` for unmanaged object literals).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Binary blob.
    Data(Vec<u8>),
    /// Point in time.
    Date(Timestamp),
    /// Decimal number.
    Decimal(Decimal128),
    /// 12-byte object id.
    ObjectId(ObjectId),
    /// UUID.
    Uuid(Uuid),
    /// Reference to a stored object.
    Link(ObjLink),
    /// Ordered collection of values.
    List(Vec<Value>),
    /// Unmanaged object literal keyed by property name.
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Name of the value's type as used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Data(_) => "data",
            Value::Date(_) => "date",
            Value::Decimal(_) => "decimal128",
            Value::ObjectId(_) => "objectId",
            Value::Uuid(_) => "uuid",
            Value::Link(_) | Value::Object(_) => "object",
            Value::List(_) => "list",
        }
    }

    /// Builds an object literal from `(name, value)` pairs.
    pub fn object<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Object(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// True for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for the numeric variants.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Int(_) | Value::Float(_) | Value::Double(_) | Value::Decimal(_)
        )
    }

    /// Boolean payload.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer payload.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Any numeric payload widened to `f64`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(x) => Some(f64::from(*x)),
            Value::Double(x) => Some(*x),
            Value::Decimal(d) => Some(d.to_f64()),
            _ => None,
        }
    }

    /// String payload.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Binary payload.
    #[must_use]
    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            Value::Data(b) => Some(b),
            _ => None,
        }
    }

    /// Date payload.
    #[must_use]
    pub fn as_date(&self) -> Option<Timestamp> {
        match self {
            Value::Date(t) => Some(*t),
            _ => None,
        }
    }

    /// Link payload.
    #[must_use]
    pub fn as_link(&self) -> Option<&ObjLink> {
        match self {
            Value::Link(l) => Some(l),
            _ => None,
        }
    }

    /// List payload.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Object literal payload.
    #[must_use]
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Compares two values the way a query predicate does.
    ///
    /// Numbers compare across numeric variants; other variants compare only
    /// with themselves. Returns `None` for incomparable pairs, including
    /// anything involving `Null`.
    #[must_use]
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Decimal(a), Value::Decimal(b)) => Some(a.cmp(b)),
            (Value::Decimal(a), Value::Int(b)) => Some(a.cmp(&Decimal128::from(*b))),
            (Value::Int(a), Value::Decimal(b)) => Some(Decimal128::from(*a).cmp(b)),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                a.as_f64()?.partial_cmp(&b.as_f64()?)
            }
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Data(a), Value::Data(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::ObjectId(a), Value::ObjectId(b)) => Some(a.cmp(b)),
            (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
            (Value::Link(a), Value::Link(b)) => (a == b).then_some(Ordering::Equal),
            _ => None,
        }
    }

    /// Equality as seen by predicates: numeric variants compare by value,
    /// `Null` equals only `Null`.
    #[must_use]
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Link(a), Value::Link(b)) => a == b,
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }

    fn sort_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) | Value::Double(_) | Value::Decimal(_) => 2,
            Value::String(_) => 3,
            Value::Data(_) => 4,
            Value::Date(_) => 5,
            Value::ObjectId(_) => 6,
            Value::Uuid(_) => 7,
            Value::Link(_) => 8,
            Value::List(_) => 9,
            Value::Object(_) => 10,
        }
    }

    /// Total order used for sorting and distinct.
    ///
    /// `Null` sorts before everything; mixed types group by kind with all
    /// numbers in one group; NaN sorts before other numbers.
    #[must_use]
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        let (ra, rb) = (self.sort_rank(), other.sort_rank());
        if ra != rb {
            return ra.cmp(&rb);
        }
        if let Some(ord) = self.compare(other) {
            return ord;
        }
        match (self, other) {
            (a, b) if a.is_numeric() => {
                let (x, y) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
                match (x.is_nan(), y.is_nan()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Less,
                    (false, true) => Ordering::Greater,
                    _ => x.total_cmp(&y),
                }
            }
            (Value::Link(a), Value::Link(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b) {
                    let ord = x.sort_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => Ordering::Equal,
        }
    }
}

/// Human-readable rendering used in error messages: strings print
/// without quotes, binary as its length.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Double(x) => write!(f, "{x}"),
            Value::String(s) => f.write_str(s),
            Value::Data(bytes) => write!(f, "<binary {} bytes>", bytes.len()),
            Value::Date(t) => write!(f, "{t}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::ObjectId(id) => write!(f, "{id}"),
            Value::Uuid(u) => write!(f, "{u}"),
            Value::Link(link) => write!(f, "{link}"),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Object(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Data(v)
    }
}

impl From<Timestamp> for Value {
    fn from(v: Timestamp) -> Self {
        Value::Date(v)
    }
}

impl From<Decimal128> for Value {
    fn from(v: Decimal128) -> Self {
        Value::Decimal(v)
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Value::ObjectId(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<ObjLink> for Value {
    fn from(v: ObjLink) -> Self {
        Value::Link(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar::ObjKey;

    #[test]
    fn numbers_compare_across_variants() {
        assert_eq!(Value::Int(2).compare(&Value::Double(2.0)), Some(Ordering::Equal));
        assert_eq!(Value::Float(1.5).compare(&Value::Int(2)), Some(Ordering::Less));
        let d = Value::Decimal("2.5".parse().unwrap());
        assert_eq!(d.compare(&Value::Int(2)), Some(Ordering::Greater));
        assert!(Value::Int(1).loose_eq(&Value::Double(1.0)));
    }

    #[test]
    fn display_is_message_friendly() {
        assert_eq!(Value::from("Alice").to_string(), "Alice");
        assert_eq!(Value::Int(-3).to_string(), "-3");
        assert_eq!(Value::from(vec![1i64, 2]).to_string(), "[1, 2]");
    }

    #[test]
    fn incompatible_types_do_not_compare() {
        assert_eq!(Value::Bool(true).compare(&Value::Int(1)), None);
        assert_eq!(Value::Null.compare(&Value::Null), None);
        assert!(Value::Null.loose_eq(&Value::Null));
        assert!(!Value::Null.loose_eq(&Value::Int(0)));
    }

    #[test]
    fn sort_order_places_null_first() {
        let mut values = vec![
            Value::String("b".into()),
            Value::Int(3),
            Value::Null,
            Value::Double(-1.0),
            Value::Bool(false),
        ];
        values.sort_by(Value::sort_cmp);
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Bool(false),
                Value::Double(-1.0),
                Value::Int(3),
                Value::String("b".into()),
            ]
        );
    }

    #[test]
    fn links_equal_by_identity() {
        let a = Value::Link(ObjLink::new("Person", ObjKey::new(1)));
        let b = Value::Link(ObjLink::new("Person", ObjKey::new(2)));
        assert!(a.loose_eq(&a.clone()));
        assert!(!a.loose_eq(&b));
    }

    #[test]
    fn object_literal_builder() {
        let v = Value::object([("name", Value::from("Alice")), ("age", Value::from(15))]);
        let map = v.as_object().unwrap();
        assert_eq!(map["age"], Value::Int(15));
        assert_eq!(v.type_name(), "object");
    }

    #[test]
    fn option_conversion() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::String("x".into()));
    }
}
