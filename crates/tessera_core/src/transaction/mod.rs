//! Write transactions and commit publication.
//!
//! A store has one writer at a time and any number of readers:
//! - **Atomicity**: a write's changes are published together or not at all
//! - **Isolation**: readers keep the snapshot they started from
//! - **Durability**: a commit is logged before it is published
//!
//! Every realm handle on one path shares a [`TransactionManager`].

mod manager;
mod recovery;
mod state;

pub(crate) use manager::{CommitObserver, TransactionManager};
pub(crate) use state::WriteTransaction;
pub use state::TransactionStatus;
