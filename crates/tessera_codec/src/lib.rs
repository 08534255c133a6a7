//! # Tessera Codec
//!
//! The value model of the Tessera object store and its binary encoding.
//!
//! [`Value`] covers every property type a schema can declare (scalars,
//! links, lists) plus unmanaged object literals used as input to
//! `create`. Rows and commit-log records are encoded with a canonical CBOR
//! writer so that identical rows always produce identical bytes:
//!
//! - definite lengths only, shortest-form integer heads
//! - object keys sorted length-first, then bytewise
//! - dates, decimals, object ids, uuids and links carry CBOR tags
//!
//! ```
//! use tessera_codec::{from_cbor, to_canonical_cbor, Value};
//!
//! let row = Value::object([("name", Value::from("Alice")), ("age", Value::from(15))]);
//! let bytes = to_canonical_cbor(&row).unwrap();
//! assert_eq!(from_cbor(&bytes).unwrap(), row);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod json;
mod scalar;
pub mod tags;
mod value;

pub use decoder::{from_cbor, CanonicalDecoder};
pub use encoder::{to_canonical_cbor, CanonicalEncoder};
pub use error::{CodecError, CodecResult};
pub use scalar::{Decimal128, ObjKey, ObjLink, ObjectId, Timestamp};
pub use uuid::Uuid;
pub use value::Value;

/// Types with a canonical CBOR form.
pub trait Encode {
    /// Encodes `self`.
    ///
    /// # Errors
    ///
    /// Fails if the value cannot be represented.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Types that can be read back from CBOR.
pub trait Decode: Sized {
    /// Decodes a value.
    ///
    /// # Errors
    ///
    /// Fails on malformed input.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for Value {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_canonical_cbor(self)
    }
}

impl Decode for Value {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            any::<f64>()
                .prop_filter("NaN never equals itself", |x| !x.is_nan())
                .prop_map(Value::Double),
            "[a-z]{0,12}".prop_map(Value::String),
            prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Data),
            (any::<i32>(), 0i64..1_000_000_000)
                .prop_map(|(s, n)| Value::Date(Timestamp::new(i64::from(s), n))),
            (any::<i64>(), -30i32..30)
                .prop_map(|(c, e)| Value::Decimal(Decimal128::new(i128::from(c), e))),
        ]
    }

    fn row() -> impl Strategy<Value = Value> {
        prop::collection::btree_map("[a-z]{1,6}", scalar(), 0..8).prop_map(Value::Object)
    }

    proptest! {
        #[test]
        fn encoding_is_deterministic_and_lossless(v in row()) {
            let first = v.encode().unwrap();
            let second = v.clone().encode().unwrap();
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(Value::decode(&first).unwrap(), v);
        }
    }
}
