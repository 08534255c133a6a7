//! CLI command implementations.

pub mod compact;
pub mod dump_log;
pub mod inspect;
pub mod query;
pub mod verify;

use std::path::Path;
use std::sync::Arc;

use tessera_core::{Config, ManualScheduler, Realm, Registry};

/// Opens an existing store. Listeners are never registered, so the
/// scheduler is a manual one that is never driven.
pub(crate) fn open_existing(path: &Path, read_only: bool) -> Result<Realm, Box<dyn std::error::Error>> {
    if !tessera_core::dir::store_exists(path) {
        return Err(format!("No store found at {:?}", path).into());
    }
    let config = Config::new(path)
        .read_only(read_only)
        .create_if_missing(false)
        .scheduler(Arc::new(ManualScheduler::new()));
    Ok(Registry::new().open(config)?)
}
