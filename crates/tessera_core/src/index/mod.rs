//! Index structures maintained by each table.
//!
//! - [`PrimaryKeyIndex`]: unique primary key -> object key
//! - [`ValueIndex`]: ordered secondary index for `indexed` properties
//! - [`FullTextIndex`]: inverted token index for `TEXT` queries

mod fts;
mod key;
mod value;

pub use fts::{FullTextIndex, TokenizerConfig};
pub use value::{PrimaryKeyIndex, ValueIndex};
