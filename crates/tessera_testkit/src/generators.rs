//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data that respects the
//! fixture schemas, plus list edit scripts with a reference model.

use proptest::prelude::*;
use tessera_core::{List, Value};

/// Strategy for valid class and property names.
pub fn identifier_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_]{0,31}").expect("Invalid regex")
}

/// Strategy for scalar values of every primitive kind.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        (-1.0e9f64..1.0e9).prop_map(Value::Double),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Data),
    ]
}

/// Strategy for `(id, name, age)` rows with distinct ids.
pub fn people_strategy(max: usize) -> impl Strategy<Value = Vec<(i64, String, i64)>> {
    prop::collection::btree_map(0i64..10_000, ("[a-z]{1,8}", 0i64..100), 0..max).prop_map(|m| {
        m.into_iter()
            .map(|(id, (name, age))| (id, name, age))
            .collect()
    })
}

/// One edit of a primitive list.
#[derive(Debug, Clone)]
pub enum ListOp {
    /// Append a value.
    Push(i64),
    /// Remove the last value.
    Pop,
    /// Remove the first value.
    Shift,
    /// Insert at a position (clamped to the length).
    Insert(usize, i64),
    /// Remove at a position (skipped when out of range).
    Remove(usize),
    /// Move an element (skipped when out of range).
    Move(usize, usize),
    /// Overwrite an element (skipped when out of range).
    Set(usize, i64),
}

/// Strategy for a single list edit.
pub fn list_op_strategy() -> impl Strategy<Value = ListOp> {
    prop_oneof![
        any::<i64>().prop_map(ListOp::Push),
        Just(ListOp::Pop),
        Just(ListOp::Shift),
        (0usize..16, any::<i64>()).prop_map(|(i, v)| ListOp::Insert(i, v)),
        (0usize..16).prop_map(ListOp::Remove),
        (0usize..16, 0usize..16).prop_map(|(a, b)| ListOp::Move(a, b)),
        (0usize..16, any::<i64>()).prop_map(|(i, v)| ListOp::Set(i, v)),
    ]
}

/// Strategy for an edit script.
pub fn list_script_strategy(max: usize) -> impl Strategy<Value = Vec<ListOp>> {
    prop::collection::vec(list_op_strategy(), 0..max)
}

impl ListOp {
    /// Applies the edit to a plain vector.
    pub fn apply_to_model(&self, model: &mut Vec<i64>) {
        match *self {
            ListOp::Push(v) => model.push(v),
            ListOp::Pop => {
                model.pop();
            }
            ListOp::Shift => {
                if !model.is_empty() {
                    model.remove(0);
                }
            }
            ListOp::Insert(i, v) => model.insert(i.min(model.len()), v),
            ListOp::Remove(i) => {
                if i < model.len() {
                    model.remove(i);
                }
            }
            ListOp::Move(a, b) => {
                if a < model.len() && b < model.len() {
                    let v = model.remove(a);
                    model.insert(b, v);
                }
            }
            ListOp::Set(i, v) => {
                if i < model.len() {
                    model[i] = v;
                }
            }
        }
    }

    /// Applies the edit to a managed list. Must run inside a write
    /// transaction.
    pub fn apply_to_list(&self, list: &List) -> tessera_core::CoreResult<()> {
        let len = list.len()?;
        match *self {
            ListOp::Push(v) => {
                list.push([v])?;
            }
            ListOp::Pop => {
                list.pop()?;
            }
            ListOp::Shift => {
                list.shift()?;
            }
            ListOp::Insert(i, v) => list.insert(i.min(len), v)?,
            ListOp::Remove(i) if i < len => {
                list.remove(i)?;
            }
            ListOp::Move(a, b) if a < len && b < len => list.move_item(a, b)?,
            ListOp::Set(i, v) if i < len => list.set(i, v)?,
            _ => {}
        }
        Ok(())
    }
}
