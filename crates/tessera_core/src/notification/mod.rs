//! Live collection change notifications.
//!
//! Commits never call listeners directly. After a commit the store posts
//! one delivery task per affected realm handle onto that handle's
//! [`Scheduler`]; posts are coalesced, so several commits made before the
//! scheduler runs arrive as a single diff. A delivery refreshes the handle,
//! diffs every watched collection and object against what its listener
//! last saw and invokes the callbacks in registration order.

mod changeset;
mod diff;
mod notifier;
mod scheduler;

pub use changeset::{ChangeSet, ObjectChangeSet};
pub use diff::{diff_sequence, diff_sequence_by, diff_unique};
pub use notifier::{CollectionCallback, ObjectCallback, RealmCallback};
pub use scheduler::{ChannelDriver, ChannelScheduler, ManualScheduler, Scheduler, Task, ThreadScheduler};

pub(crate) use notifier::{observe, Compute, Notifier, Watch};
