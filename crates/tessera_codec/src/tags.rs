//! CBOR tag numbers for store-specific scalars.

/// `[seconds, nanoseconds]`.
pub const DATE: u64 = 1001;
/// `[coefficient as 16 big-endian bytes, exponent]`.
pub const DECIMAL: u64 = 1002;
/// 12-byte string.
pub const OBJECT_ID: u64 = 1003;
/// `[class, key]`.
pub const LINK: u64 = 1004;
/// 16-byte string (IANA-registered UUID tag).
pub const UUID: u64 = 37;
