//! Canonical CBOR encoder.
//!
//! Follows RFC 8949 §4.2.1 deterministic encoding for the core types
//! (shortest-form lengths, definite lengths, map keys sorted length-first
//! then bytewise). Floats are always written at their declared width.
//! Store-specific scalars use private tags, see [`crate::tags`].

use crate::error::CodecResult;
use crate::tags;
use crate::value::Value;
use std::collections::BTreeMap;

/// Encodes `value` to canonical CBOR.
///
/// # Errors
///
/// Fails if the value cannot be represented.
pub fn to_canonical_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut encoder = CanonicalEncoder::new();
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

/// Incremental canonical CBOR writer.
#[derive(Debug, Default)]
pub struct CanonicalEncoder {
    buffer: Vec<u8>,
}

impl CanonicalEncoder {
    /// Creates an empty encoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an encoder with a preallocated buffer.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Appends one value.
    ///
    /// # Errors
    ///
    /// Fails if the value cannot be represented.
    pub fn encode(&mut self, value: &Value) -> CodecResult<()> {
        match value {
            Value::Null => self.buffer.push(0xf6),
            Value::Bool(b) => self.buffer.push(if *b { 0xf5 } else { 0xf4 }),
            Value::Int(n) => self.encode_int(*n),
            Value::Float(x) => {
                self.buffer.push(0xfa);
                self.buffer.extend_from_slice(&x.to_be_bytes());
            }
            Value::Double(x) => {
                self.buffer.push(0xfb);
                self.buffer.extend_from_slice(&x.to_be_bytes());
            }
            Value::String(s) => self.encode_text(s),
            Value::Data(b) => self.encode_bytes(b),
            Value::Date(t) => {
                self.encode_head(6, tags::DATE);
                self.encode_head(4, 2);
                self.encode_int(t.seconds());
                self.encode_head(0, u64::from(t.nanoseconds()));
            }
            Value::Decimal(d) => {
                self.encode_head(6, tags::DECIMAL);
                self.encode_head(4, 2);
                self.encode_bytes(&d.coefficient().to_be_bytes());
                self.encode_int(i64::from(d.exponent()));
            }
            Value::ObjectId(id) => {
                self.encode_head(6, tags::OBJECT_ID);
                self.encode_bytes(&id.bytes());
            }
            Value::Uuid(u) => {
                self.encode_head(6, tags::UUID);
                self.encode_bytes(u.as_bytes());
            }
            Value::Link(link) => {
                self.encode_head(6, tags::LINK);
                self.encode_head(4, 2);
                self.encode_text(&link.class);
                self.encode_head(0, link.key.as_u64());
            }
            Value::List(items) => {
                self.encode_head(4, items.len() as u64);
                for item in items {
                    self.encode(item)?;
                }
            }
            Value::Object(map) => self.encode_object(map)?,
        }
        Ok(())
    }

    /// Consumes the encoder, returning the bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Bytes written so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    #[allow(clippy::cast_sign_loss)]
    fn encode_int(&mut self, n: i64) {
        if n >= 0 {
            self.encode_head(0, n as u64);
        } else {
            // -1 - n is non-negative for every negative i64.
            self.encode_head(1, (-1 - n) as u64);
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_head(&mut self, major: u8, arg: u64) {
        let mt = major << 5;
        if arg < 24 {
            self.buffer.push(mt | arg as u8);
        } else if arg <= u64::from(u8::MAX) {
            self.buffer.push(mt | 24);
            self.buffer.push(arg as u8);
        } else if arg <= u64::from(u16::MAX) {
            self.buffer.push(mt | 25);
            self.buffer.extend_from_slice(&(arg as u16).to_be_bytes());
        } else if arg <= u64::from(u32::MAX) {
            self.buffer.push(mt | 26);
            self.buffer.extend_from_slice(&(arg as u32).to_be_bytes());
        } else {
            self.buffer.push(mt | 27);
            self.buffer.extend_from_slice(&arg.to_be_bytes());
        }
    }

    fn encode_bytes(&mut self, bytes: &[u8]) {
        self.encode_head(2, bytes.len() as u64);
        self.buffer.extend_from_slice(bytes);
    }

    fn encode_text(&mut self, text: &str) {
        self.encode_head(3, text.len() as u64);
        self.buffer.extend_from_slice(text.as_bytes());
    }

    fn encode_object(&mut self, map: &BTreeMap<String, Value>) -> CodecResult<()> {
        let mut keyed: Vec<(Vec<u8>, &Value)> = map
            .iter()
            .map(|(k, v)| {
                let mut key = CanonicalEncoder::with_capacity(k.len() + 2);
                key.encode_text(k);
                (key.into_bytes(), v)
            })
            .collect();
        keyed.sort_by(|a, b| a.0.len().cmp(&b.0.len()).then_with(|| a.0.cmp(&b.0)));

        self.encode_head(5, keyed.len() as u64);
        for (key, value) in keyed {
            self.buffer.extend_from_slice(&key);
            self.encode(value)?;
        }
        Ok(())
    }
}
