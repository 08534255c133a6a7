//! The string query language.
//!
//! Queries are tokenized, parsed into a schema-independent tree, then
//! compiled against the schema of the collection being filtered. The
//! compiled form is a list of [`Stage`]s (filter, sort, distinct, limit)
//! that live collections re-run against every new snapshot.
//!
//! ```text
//! age >= 18 && name BEGINSWITH[c] 'a' SORT(age DESC) LIMIT(10)
//! ANY friends.age > $0
//! location geoWithin geoCircle([-73.9, 40.7], 0.001)
//! ```

mod ast;
mod compile;
mod eval;
mod geo;
mod lexer;
mod parser;
mod token;

use tessera_codec::{Decimal128, ObjLink, ObjectId, Timestamp, Uuid, Value};

use crate::error::CoreResult;
use crate::schema::Schema;
use crate::storage::State;

pub use geo::{km_to_radians, mi_to_radians, GeoPoint, GeoRegion};

pub(crate) use compile::{AggregateKind, ElementKind, Stage, ValuePath};
pub(crate) use eval::{aggregate, apply, path_value};

/// A positional query argument (`$0`, `$1`, ...).
#[derive(Debug, Clone, PartialEq)]
pub enum QueryArg {
    /// A scalar, link or list value.
    Value(Value),
    /// A geospatial region for `geoWithin`.
    Geo(GeoRegion),
}

impl From<Value> for QueryArg {
    fn from(v: Value) -> Self {
        QueryArg::Value(v)
    }
}

impl From<GeoRegion> for QueryArg {
    fn from(region: GeoRegion) -> Self {
        QueryArg::Geo(region)
    }
}

macro_rules! value_arg {
    ($($ty:ty),* $(,)?) => {
        $(impl From<$ty> for QueryArg {
            fn from(v: $ty) -> Self {
                QueryArg::Value(Value::from(v))
            }
        })*
    };
}

value_arg!(
    bool, i32, i64, f32, f64, &str, String, Timestamp, Decimal128, ObjectId, Uuid, ObjLink, Vec<u8>
);

/// One sort criterion: a dotted key path and a direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDescriptor {
    /// Dotted key path, or `"self"` for primitive collections.
    pub key_path: String,
    /// Ascending when `false`.
    pub reverse: bool,
}

impl SortDescriptor {
    /// Ascending on `key_path`.
    pub fn new(key_path: impl Into<String>) -> Self {
        Self {
            key_path: key_path.into(),
            reverse: false,
        }
    }

    /// Descending on `key_path`.
    pub fn descending(key_path: impl Into<String>) -> Self {
        Self {
            key_path: key_path.into(),
            reverse: true,
        }
    }
}

impl From<&str> for SortDescriptor {
    fn from(key_path: &str) -> Self {
        SortDescriptor::new(key_path)
    }
}

impl From<(&str, bool)> for SortDescriptor {
    fn from((key_path, reverse): (&str, bool)) -> Self {
        SortDescriptor {
            key_path: key_path.to_string(),
            reverse,
        }
    }
}

/// Parses and compiles `text` for elements of `kind`.
pub(crate) fn compile_query(
    schema: &Schema,
    kind: &ElementKind,
    text: &str,
    args: &[QueryArg],
) -> CoreResult<Vec<Stage>> {
    let parsed = parser::parse(text)?;
    compile::compile(parsed, schema, kind, args)
}

/// Compiles sort descriptors into one stage.
pub(crate) fn compile_sort(
    schema: &Schema,
    kind: &ElementKind,
    descriptors: &[SortDescriptor],
) -> CoreResult<Stage> {
    let keys = descriptors
        .iter()
        .map(|d| {
            let names = split_key_path(&d.key_path);
            compile::value_path(schema, kind, &names, "sort").map(|p| (p, !d.reverse))
        })
        .collect::<CoreResult<_>>()?;
    Ok(Stage::Sort(keys))
}

/// Compiles distinct key paths into one stage.
pub(crate) fn compile_distinct(
    schema: &Schema,
    kind: &ElementKind,
    key_paths: &[&str],
) -> CoreResult<Stage> {
    let paths = key_paths
        .iter()
        .map(|k| compile::value_path(schema, kind, &split_key_path(k), "distinct"))
        .collect::<CoreResult<_>>()?;
    Ok(Stage::Distinct(paths))
}

/// Resolves a single value path, used by aggregates over object
/// collections.
pub(crate) fn compile_value_path(
    schema: &Schema,
    kind: &ElementKind,
    key_path: &str,
) -> CoreResult<ValuePath> {
    compile::value_path(schema, kind, &split_key_path(key_path), "sort")
}

fn split_key_path(key_path: &str) -> Vec<String> {
    key_path.split('.').map(str::to_string).collect()
}

/// Filters `elements` of `kind` by `text` in one shot.
pub(crate) fn run(
    state: &State,
    kind: &ElementKind,
    elements: Vec<Value>,
    text: &str,
    args: &[QueryArg],
) -> CoreResult<Vec<Value>> {
    let stages = compile_query(state.schema(), kind, text, args)?;
    Ok(apply(&stages, state, elements))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ObjectSchemaDef, PropertyDef};
    use crate::storage::WorkingState;
    use crate::types::UpdateMode;
    use std::sync::Arc;
    use tessera_codec::ObjKey;

    fn state() -> State {
        let schema = Schema::new(vec![
            ObjectSchemaDef::new("Person")
                .property("name", "string")
                .property("age", PropertyDef::new("int").indexed())
                .property("bio", PropertyDef::new("string?").full_text())
                .property("friends", "Person[]")
                .property("tags", "string[]")
                .property("parents", PropertyDef::linking_objects("Person", "friends")),
        ])
        .unwrap();
        let base = State::new(Arc::new(schema), 0);
        let mut w = WorkingState::new(&base);
        let people = [
            ("Ann", 30, "likes green tea", vec![], vec!["a"]),
            ("Bob", 12, "plays chess", vec![1], vec![]),
            ("Cid", 45, "drinks tea daily", vec![1, 2], vec!["a", "b"]),
        ];
        for (name, age, bio, friends, tags) in people {
            let friends: Vec<Value> = friends
                .into_iter()
                .map(|k| Value::Link(ObjLink::new("Person", ObjKey(k))))
                .collect();
            w.create(
                "Person",
                Value::object([
                    ("name", Value::from(name)),
                    ("age", Value::from(age)),
                    ("bio", Value::from(bio)),
                    ("friends", Value::List(friends)),
                    ("tags", Value::from(tags)),
                ]),
                UpdateMode::Never,
            )
            .unwrap();
        }
        w.state
    }

    fn names(state: &State, text: &str, args: &[QueryArg]) -> Vec<String> {
        let kind = ElementKind::Object("Person".into());
        let all = state
            .table("Person")
            .unwrap()
            .keys()
            .map(|k| Value::Link(ObjLink::new("Person", k)))
            .collect();
        run(state, &kind, all, text, args)
            .unwrap()
            .iter()
            .map(|v| {
                let row = state.row(v.as_link().unwrap()).unwrap();
                row.get(0).as_str().unwrap().to_string()
            })
            .collect()
    }

    #[test]
    fn filters_and_modifiers() {
        let s = state();
        assert_eq!(names(&s, "age > 20", &[]), ["Ann", "Cid"]);
        assert_eq!(names(&s, "age > $0 SORT(age DESC)", &[20.into()]), ["Cid", "Ann"]);
        assert_eq!(names(&s, "TRUEPREDICATE SORT(name DESC) LIMIT(1)", &[]), ["Cid"]);
        assert_eq!(names(&s, "name IN {'Bob', 'Cid'}", &[]), ["Bob", "Cid"]);
        assert_eq!(names(&s, "age BETWEEN {12, 30}", &[]), ["Ann", "Bob"]);
        assert_eq!(names(&s, "name LIKE '?o*'", &[]), ["Bob"]);
        assert_eq!(names(&s, "age == 12", &[]), ["Bob"]);
    }

    #[test]
    fn collections_and_backlinks() {
        let s = state();
        assert_eq!(names(&s, "friends.@count == 2", &[]), ["Cid"]);
        assert_eq!(names(&s, "ANY friends.name == 'Ann'", &[]), ["Bob", "Cid"]);
        assert_eq!(names(&s, "ALL friends.age > 20", &[]), ["Ann", "Bob"]);
        assert_eq!(names(&s, "NONE friends.age > 20", &[]), ["Ann"]);
        assert_eq!(names(&s, "parents.@count > 0", &[]), ["Ann", "Bob"]);
        assert_eq!(names(&s, "@links.@count == 2", &[]), ["Ann"]);
        assert_eq!(names(&s, "friends.@sum.age == 42", &[]), ["Cid"]);
        assert_eq!(names(&s, "'a' IN tags", &[]), ["Ann", "Cid"]);
        assert_eq!(names(&s, "tags.@size == 0", &[]), ["Bob"]);
    }

    #[test]
    fn full_text_search() {
        let s = state();
        assert_eq!(names(&s, "bio TEXT 'tea'", &[]), ["Ann", "Cid"]);
        assert_eq!(names(&s, "bio TEXT 'tea -green'", &[]), ["Cid"]);
    }

    #[test]
    fn primitive_lists_filter_on_self() {
        let s = state();
        let cid = ObjLink::new("Person", ObjKey(3));
        let tags = s.row(&cid).unwrap().get(4).as_list().unwrap().to_vec();
        let prop = s.schema().get("Person").unwrap().property("tags").unwrap().clone();
        let kind = ElementKind::Primitive(prop);
        let out = run(&s, &kind, tags.clone(), "self == 'b'", &[]).unwrap();
        assert_eq!(out, vec![Value::from("b")]);
        let err = run(&s, &kind, tags, "length > 1", &[]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot get property named 'length' on a list of primitives"
        );
    }
}
