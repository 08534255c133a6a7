//! # Tessera Core
//!
//! An embedded, transactional object store with live queries.
//!
//! This crate provides:
//! - Schema registry with validation, shorthand property types and diffs
//! - Versioned, copy-on-write storage with primary key, secondary and
//!   full-text indexes
//! - Single-writer transactions with snapshot isolation, persisted through
//!   a checksummed commit log
//! - A string query language with sort, distinct, limit, aggregates and
//!   geospatial predicates
//! - Live results, lists and sets with positional change notifications
//! - Schema migrations and a registry of open stores
//!
//! ```rust,ignore
//! use tessera_core::{Config, ObjectSchemaDef, Registry, Value};
//!
//! let registry = Registry::new();
//! let realm = registry.open(Config::in_memory("demo").schema(vec![
//!     ObjectSchemaDef::new("Dog").property("name", "string").property("age", "int"),
//! ]))?;
//! realm.write(|| {
//!     realm.create("Dog", Value::object([("name", Value::from("Rex")), ("age", Value::from(3))]))?;
//!     Ok(())
//! })?;
//! let puppies = realm.objects("Dog")?.filtered("age < $0", &[5.into()])?;
//! puppies.add_listener(|changes| println!("{changes:?}"))?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
pub mod dir;
mod error;
mod index;
mod json;
mod list;
pub mod log;
pub mod manifest;
mod migration;
mod notification;
mod object;
pub mod query;
mod realm;
mod registry;
mod results;
pub mod schema;
mod set;
pub mod storage;
mod transaction;
mod types;

pub use config::{CompactPredicate, Config, MigrationFn};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use index::{FullTextIndex, TokenizerConfig};
pub use list::List;
pub use migration::{OldObject, OldRealm};
pub use notification::{
    diff_sequence, diff_sequence_by, diff_unique, ChangeSet, ChannelDriver, ChannelScheduler,
    CollectionCallback, ManualScheduler, ObjectCallback, ObjectChangeSet, RealmCallback, Scheduler,
    Task, ThreadScheduler,
};
pub use object::Object;
pub use query::{km_to_radians, mi_to_radians, GeoPoint, GeoRegion, QueryArg, SortDescriptor};
pub use realm::Realm;
pub use registry::{AsyncOpen, Registry};
pub use results::Results;
pub use schema::{
    CollectionType, IndexKind, ObjectSchema, ObjectSchemaDef, Property, PropertyDef, PropertyType,
    Schema, SchemaChange,
};
pub use set::Set;
pub use transaction::TransactionStatus;
pub use types::{ListenerToken, ObjKey, ObjLink, UpdateMode, Version};

pub use tessera_codec::{Decimal128, ObjectId, Timestamp, Uuid, Value};

/// Replays the commit log of the store at `path` without opening it for
/// writing, returning the recovered state.
///
/// # Errors
///
/// Fails when no store exists, on I/O errors and on log corruption.
pub fn read_store(path: &std::path::Path) -> CoreResult<std::sync::Arc<storage::State>> {
    if !dir::store_exists(path) {
        return Err(CoreError::not_found(format!("no store at '{}'", path.display())));
    }
    let config = Config::new(path).read_only(true).create_if_missing(false);
    let store = transaction::TransactionManager::open(&config)?;
    let state = store.latest();
    store.shutdown();
    Ok(state)
}
