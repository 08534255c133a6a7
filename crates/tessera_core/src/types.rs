//! Core type definitions for Tessera.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub use tessera_codec::{ObjKey, ObjLink};

/// Snapshot version of a store.
///
/// Versions are assigned by commits, increase monotonically and are never
/// reused. A reader pinned at version `v` sees exactly the rows committed at
/// or before `v`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(pub u64);

impl Version {
    /// The version of an empty store.
    pub const INITIAL: Version = Version(0);

    /// Creates a new version.
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    /// Returns the raw version value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next version.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v:{}", self.0)
    }
}

/// Behavior of `create` when a row with the same primary key exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum UpdateMode {
    /// Fail with a duplicate primary key error.
    #[default]
    Never,
    /// Merge supplied properties; only properties whose value changes are
    /// marked as modified.
    Modified,
    /// Write every supplied property and reset unsupplied properties that
    /// declare a default.
    All,
}

/// Handle returned when registering a listener.
///
/// Pass it back to `remove_listener` to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerToken(pub u64);

impl ListenerToken {
    /// Allocates a process-unique token.
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw token value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering() {
        let v = Version::new(3);
        assert!(v < v.next());
        assert_eq!(v.next().as_u64(), 4);
        assert_eq!(format!("{v}"), "v:3");
        assert_eq!(Version::default(), Version::INITIAL);
    }

    #[test]
    fn listener_tokens_are_unique() {
        let a = ListenerToken::next();
        let b = ListenerToken::next();
        assert_ne!(a, b);
    }

    #[test]
    fn update_mode_defaults_to_never() {
        assert_eq!(UpdateMode::default(), UpdateMode::Never);
    }
}
