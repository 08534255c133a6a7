//! Codec error types.

use thiserror::Error;

/// Result alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while encoding, decoding or parsing values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The value cannot be represented.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// What went wrong.
        message: String,
    },

    /// Input ended in the middle of an item.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Indefinite-length items are not produced by this codec and are refused.
    #[error("indefinite-length items are forbidden")]
    IndefiniteLengthForbidden,

    /// A text item was not valid UTF-8.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// The bytes are well-formed CBOR but not in canonical form, or use a
    /// construct this codec does not emit.
    #[error("invalid CBOR structure: {message}")]
    InvalidStructure {
        /// What went wrong.
        message: String,
    },

    /// A tag number this codec does not know.
    #[error("unknown CBOR tag {tag}")]
    UnknownTag {
        /// The tag number.
        tag: u64,
    },

    /// A length prefix larger than the decoder accepts.
    #[error("declared size {claimed} exceeds limit {max_allowed}")]
    SizeLimitExceeded {
        /// Declared element or byte count.
        claimed: u64,
        /// Limit enforced by the decoder.
        max_allowed: u64,
    },

    /// A textual scalar (object id, decimal, date) could not be parsed.
    #[error("cannot parse {kind} from '{input}'")]
    Parse {
        /// Scalar kind being parsed.
        kind: &'static str,
        /// The offending input.
        input: String,
    },
}

impl CodecError {
    /// Creates an encoding error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Creates a structural error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }

    /// Creates a scalar parse error.
    pub fn parse(kind: &'static str, input: impl Into<String>) -> Self {
        Self::Parse {
            kind,
            input: input.into(),
        }
    }
}
