//! Error types for Tessera core.
//!
//! Errors follow a small taxonomy (see [`ErrorKind`]). The user-facing
//! variants carry the complete message so it can be compared verbatim.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Broad classification of a [`CoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed schema, invalid property, version mismatch.
    Schema,
    /// Mutation outside a write, nested write, read-only handle.
    TransactionState,
    /// Duplicate primary key, type mismatch, wrong link target.
    Constraint,
    /// Malformed predicate, missing argument, unsupported operator.
    Query,
    /// Access to a deleted object or a collection whose owner is gone.
    Invalidated,
    /// Storage, codec or log failure.
    Storage,
    /// The store has been closed.
    Closed,
    /// An asynchronous open was cancelled.
    Cancelled,
    /// An error raised by user code inside a write or migration.
    Callback,
}

/// Errors that can occur in Tessera core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Schema validation or schema-version failure.
    #[error("{message}")]
    Schema {
        /// Verbatim message.
        message: String,
    },

    /// Operation not permitted in the current transaction state.
    #[error("{message}")]
    TransactionState {
        /// Verbatim message.
        message: String,
    },

    /// A value or key violated a schema constraint.
    #[error("{message}")]
    Constraint {
        /// Verbatim message.
        message: String,
    },

    /// Predicate parsing or evaluation failure.
    #[error("{message}")]
    Query {
        /// Verbatim message.
        message: String,
    },

    /// Access to an invalidated object or collection.
    #[error("{message}")]
    Invalidated {
        /// Verbatim message.
        message: String,
    },

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tessera_storage::StorageError),

    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] tessera_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Commit log is corrupted or invalid.
    #[error("commit log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// Invalid store directory or manifest.
    #[error("invalid store format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// The store has been closed.
    #[error("Cannot access realm that has been closed.")]
    StoreClosed,

    /// Another process holds the store directory lock.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// The migration handler failed and the migration was rolled back.
    #[error("migration failed: {message}")]
    MigrationFailed {
        /// Description of the failure.
        message: String,
    },

    /// An asynchronous open was cancelled before completing.
    #[error("open cancelled")]
    OpenCancelled,

    /// A store file or object was not found.
    #[error("not found: {message}")]
    NotFound {
        /// What was missing.
        message: String,
    },

    /// An error returned by user code.
    #[error("{message}")]
    Callback {
        /// Message supplied by the caller.
        message: String,
    },
}

impl CoreError {
    /// Creates a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Creates a transaction state error.
    pub fn transaction_state(message: impl Into<String>) -> Self {
        Self::TransactionState {
            message: message.into(),
        }
    }

    /// Creates a constraint error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint {
            message: message.into(),
        }
    }

    /// Creates a query error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    /// Creates an invalidated-state error.
    pub fn invalidated(message: impl Into<String>) -> Self {
        Self::Invalidated {
            message: message.into(),
        }
    }

    /// Creates a commit log corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a migration failed error.
    pub fn migration_failed(message: impl Into<String>) -> Self {
        Self::MigrationFailed {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates an error carrying a message from user code.
    pub fn callback(message: impl Into<String>) -> Self {
        Self::Callback {
            message: message.into(),
        }
    }

    /// The standard error for mutations attempted outside a write.
    pub(crate) fn not_in_write() -> Self {
        Self::transaction_state("Cannot modify managed objects outside of a write transaction.")
    }

    /// The standard error for a deleted or invalidated object.
    pub(crate) fn object_invalidated() -> Self {
        Self::invalidated("Accessing object which has been invalidated or deleted")
    }

    /// The standard error for an invalidated list.
    pub(crate) fn list_invalidated() -> Self {
        Self::invalidated("Access to invalidated List object")
    }

    /// The standard error for invalidated results.
    pub(crate) fn results_invalidated() -> Self {
        Self::invalidated("Access to invalidated Results objects")
    }

    /// Returns the taxonomy bucket of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Schema { .. } => ErrorKind::Schema,
            Self::TransactionState { .. } => ErrorKind::TransactionState,
            Self::Constraint { .. } => ErrorKind::Constraint,
            Self::Query { .. } => ErrorKind::Query,
            Self::Invalidated { .. } => ErrorKind::Invalidated,
            Self::Storage(_)
            | Self::Codec(_)
            | Self::Io(_)
            | Self::LogCorruption { .. }
            | Self::ChecksumMismatch { .. }
            | Self::InvalidFormat { .. }
            | Self::StoreLocked
            | Self::NotFound { .. } => ErrorKind::Storage,
            Self::StoreClosed => ErrorKind::Closed,
            Self::OpenCancelled => ErrorKind::Cancelled,
            Self::MigrationFailed { .. } | Self::Callback { .. } => ErrorKind::Callback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_facing_messages_are_verbatim() {
        let err = CoreError::constraint(
            "Attempting to create an object of type 'Person' with an existing primary key value 'Alice'.",
        );
        assert_eq!(
            err.to_string(),
            "Attempting to create an object of type 'Person' with an existing primary key value 'Alice'."
        );
        assert_eq!(err.kind(), ErrorKind::Constraint);
    }

    #[test]
    fn standard_errors_classify() {
        assert_eq!(CoreError::not_in_write().kind(), ErrorKind::TransactionState);
        assert_eq!(CoreError::list_invalidated().kind(), ErrorKind::Invalidated);
        assert_eq!(CoreError::StoreClosed.kind(), ErrorKind::Closed);
        assert_eq!(
            CoreError::log_corruption("bad tail").to_string(),
            "commit log corruption: bad tail"
        );
    }
}
