//! JSON rendering of stored objects.
//!
//! Links are expanded into nested objects. Linking-objects properties are
//! left out since they always point back up the tree.

use serde_json::{Map, Value as Json};
use tessera_codec::{ObjLink, Value};

use crate::error::{CoreError, CoreResult};
use crate::storage::State;

/// Renders the object at `link` and everything it links to.
///
/// # Errors
///
/// `Converting circular structure to JSON` when a link leads back to an
/// object already being rendered, or an invalidated-object error.
pub(crate) fn object_to_json(state: &State, link: &ObjLink) -> CoreResult<Json> {
    let mut path = Vec::new();
    render_object(state, link, &mut path)
}

fn render_object(state: &State, link: &ObjLink, path: &mut Vec<ObjLink>) -> CoreResult<Json> {
    if path.contains(link) {
        return Err(CoreError::constraint("Converting circular structure to JSON"));
    }
    let class = state.schema().require(&link.class)?;
    let row = state.row(link).ok_or_else(CoreError::object_invalidated)?;
    path.push(link.clone());
    let mut out = Map::new();
    for prop in class.persisted() {
        let Some(column) = prop.column else { continue };
        out.insert(prop.name.clone(), render_value(state, row.get(column), path)?);
    }
    path.pop();
    Ok(Json::Object(out))
}

fn render_value(state: &State, value: &Value, path: &mut Vec<ObjLink>) -> CoreResult<Json> {
    match value {
        Value::Link(link) if state.contains(link) => render_object(state, link, path),
        Value::Link(_) => Ok(Json::Null),
        Value::List(items) => items
            .iter()
            .map(|v| render_value(state, v, path))
            .collect::<CoreResult<Vec<_>>>()
            .map(Json::Array),
        other => Ok(other.to_json()),
    }
}
