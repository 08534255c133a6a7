//! Versioned object storage.
//!
//! A [`State`] is one immutable snapshot: the schema plus one [`Table`] per
//! class. Write transactions mutate a private copy through
//! [`WorkingState`], which also records what changed for the commit log.

mod row;
mod state;
mod table;
mod working;

pub use row::Row;
pub use state::State;
pub use table::Table;
pub(crate) use state::references;
pub(crate) use working::WorkingState;
