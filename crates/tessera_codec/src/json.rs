//! Conversions between [`Value`] and `serde_json::Value`.
//!
//! JSON input has no dates, decimals or binary, so conversion from JSON only
//! yields null, bools, numbers, strings, lists and object literals; the
//! store coerces them against the schema later. Conversion to JSON renders
//! the richer scalars as strings.

use crate::value::Value;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Number, Value as Json};

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl Value {
    /// Renders the value as JSON.
    ///
    /// Links render as `{"$class": .., "$key": ..}`; callers that can resolve
    /// links (the store's object serializer) never hand links to this method.
    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(n) => Json::Number((*n).into()),
            Value::Float(x) => float_json(f64::from(*x)),
            Value::Double(x) => float_json(*x),
            Value::String(s) => Json::String(s.clone()),
            Value::Data(bytes) => Json::String(STANDARD.encode(bytes)),
            Value::Date(t) => Json::String(t.to_string()),
            Value::Decimal(d) => Json::String(d.to_string()),
            Value::ObjectId(id) => Json::String(id.to_string()),
            Value::Uuid(u) => Json::String(u.to_string()),
            Value::Link(link) => {
                let mut map = Map::new();
                map.insert("$class".into(), Json::String(link.class.clone()));
                map.insert("$key".into(), Json::Number(link.key.as_u64().into()));
                Json::Object(map)
            }
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

fn float_json(x: f64) -> Json {
    Number::from_f64(x).map_or(Json::Null, Json::Number)
}
