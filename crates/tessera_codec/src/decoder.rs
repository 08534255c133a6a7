//! Canonical CBOR decoder.

use crate::error::{CodecError, CodecResult};
use crate::scalar::{Decimal128, ObjKey, ObjLink, ObjectId, Timestamp};
use crate::tags;
use crate::value::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Upper bound on declared array and map sizes.
const MAX_CONTAINER_ELEMENTS: u64 = 16 * 1024 * 1024;

/// Upper bound on declared byte and text lengths.
const MAX_BYTES_LENGTH: u64 = 256 * 1024 * 1024;

/// Decodes exactly one value from `bytes`.
///
/// # Errors
///
/// Fails on malformed or non-canonical input, or trailing bytes.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let mut decoder = CanonicalDecoder::new(bytes);
    let value = decoder.decode()?;
    if !decoder.is_empty() {
        return Err(CodecError::invalid_structure(format!(
            "{} trailing bytes after value",
            decoder.remaining().len()
        )));
    }
    Ok(value)
}

/// Streaming reader over canonical CBOR.
#[derive(Debug)]
pub struct CanonicalDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> CanonicalDecoder<'a> {
    /// Creates a decoder over `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// True once all input has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Unconsumed input.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    /// Decodes the next value.
    ///
    /// # Errors
    ///
    /// Fails on malformed or non-canonical input.
    pub fn decode(&mut self) -> CodecResult<Value> {
        let initial = self.read_byte()?;
        let major = initial >> 5;
        let info = initial & 0x1f;
        match major {
            0 => {
                let n = self.read_arg(info)?;
                i64::try_from(n)
                    .map(Value::Int)
                    .map_err(|_| CodecError::invalid_structure("integer exceeds i64"))
            }
            1 => {
                let n = self.read_arg(info)?;
                i64::try_from(n)
                    .map(|n| Value::Int(-1 - n))
                    .map_err(|_| CodecError::invalid_structure("integer exceeds i64"))
            }
            2 => Ok(Value::Data(self.read_bytes_item(info)?.to_vec())),
            3 => {
                let bytes = self.read_bytes_item(info)?;
                let text = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
                Ok(Value::String(text.to_string()))
            }
            4 => {
                let len = self.read_len(info, MAX_CONTAINER_ELEMENTS)?;
                let mut items = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    items.push(self.decode()?);
                }
                Ok(Value::List(items))
            }
            5 => self.decode_object(info),
            6 => {
                let tag = self.read_arg(info)?;
                self.decode_tagged(tag)
            }
            7 => self.decode_simple(info),
            _ => Err(CodecError::invalid_structure("invalid major type")),
        }
    }

    fn read_byte(&mut self) -> CodecResult<u8> {
        let byte = *self.data.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_exact(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(CodecError::UnexpectedEof)?;
        let bytes = self.data.get(self.pos..end).ok_or(CodecError::UnexpectedEof)?;
        self.pos = end;
        Ok(bytes)
    }

    fn read_arg(&mut self, info: u8) -> CodecResult<u64> {
        let non_canonical = || CodecError::invalid_structure("non-canonical: value could be encoded in fewer bytes");
        match info {
            0..=23 => Ok(u64::from(info)),
            24 => {
                let v = self.read_byte()?;
                if v < 24 {
                    return Err(non_canonical());
                }
                Ok(u64::from(v))
            }
            25 => {
                let b = self.read_exact(2)?;
                let v = u16::from_be_bytes([b[0], b[1]]);
                if u8::try_from(v).is_ok() {
                    return Err(non_canonical());
                }
                Ok(u64::from(v))
            }
            26 => {
                let b = self.read_exact(4)?;
                let v = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
                if u16::try_from(v).is_ok() {
                    return Err(non_canonical());
                }
                Ok(u64::from(v))
            }
            27 => {
                let b = self.read_exact(8)?;
                let mut arr = [0u8; 8];
                arr.copy_from_slice(b);
                let v = u64::from_be_bytes(arr);
                if u32::try_from(v).is_ok() {
                    return Err(non_canonical());
                }
                Ok(v)
            }
            31 => Err(CodecError::IndefiniteLengthForbidden),
            _ => Err(CodecError::invalid_structure("reserved additional info")),
        }
    }

    fn read_len(&mut self, info: u8, max: u64) -> CodecResult<usize> {
        let claimed = self.read_arg(info)?;
        if claimed > max {
            return Err(CodecError::SizeLimitExceeded {
                claimed,
                max_allowed: max,
            });
        }
        usize::try_from(claimed).map_err(|_| CodecError::SizeLimitExceeded {
            claimed,
            max_allowed: max,
        })
    }

    fn read_bytes_item(&mut self, info: u8) -> CodecResult<&'a [u8]> {
        let len = self.read_len(info, MAX_BYTES_LENGTH)?;
        self.read_exact(len)
    }

    fn decode_object(&mut self, info: u8) -> CodecResult<Value> {
        let len = self.read_len(info, MAX_CONTAINER_ELEMENTS)?;
        let mut map = BTreeMap::new();
        let mut previous: Option<&'a [u8]> = None;
        for _ in 0..len {
            let start = self.pos;
            let key = match self.decode()? {
                Value::String(s) => s,
                other => {
                    return Err(CodecError::invalid_structure(format!(
                        "object keys must be text, found {}",
                        other.type_name()
                    )))
                }
            };
            let data: &'a [u8] = self.data;
            let encoded = &data[start..self.pos];
            if let Some(prev) = previous {
                let order = prev.len().cmp(&encoded.len()).then_with(|| prev.cmp(encoded));
                if order != Ordering::Less {
                    return Err(CodecError::invalid_structure(
                        "non-canonical: map keys not in sorted order",
                    ));
                }
            }
            previous = Some(encoded);
            let value = self.decode()?;
            map.insert(key, value);
        }
        Ok(Value::Object(map))
    }

    fn decode_pair(&mut self, what: &str) -> CodecResult<(Value, Value)> {
        match self.decode()? {
            Value::List(items) if items.len() == 2 => {
                let mut it = items.into_iter();
                match (it.next(), it.next()) {
                    (Some(a), Some(b)) => Ok((a, b)),
                    _ => Err(CodecError::invalid_structure(format!("malformed {what}"))),
                }
            }
            _ => Err(CodecError::invalid_structure(format!("malformed {what}"))),
        }
    }

    fn decode_tagged(&mut self, tag: u64) -> CodecResult<Value> {
        match tag {
            tags::DATE => match self.decode_pair("date")? {
                (Value::Int(secs), Value::Int(nanos)) => Ok(Value::Date(Timestamp::new(secs, nanos))),
                _ => Err(CodecError::invalid_structure("malformed date")),
            },
            tags::DECIMAL => match self.decode_pair("decimal")? {
                (Value::Data(bytes), Value::Int(exp)) if bytes.len() == 16 => {
                    let mut arr = [0u8; 16];
                    arr.copy_from_slice(&bytes);
                    let exp = i32::try_from(exp)
                        .map_err(|_| CodecError::invalid_structure("decimal exponent out of range"))?;
                    Ok(Value::Decimal(Decimal128::new(i128::from_be_bytes(arr), exp)))
                }
                _ => Err(CodecError::invalid_structure("malformed decimal")),
            },
            tags::OBJECT_ID => match self.decode()? {
                Value::Data(bytes) if bytes.len() == 12 => {
                    let mut arr = [0u8; 12];
                    arr.copy_from_slice(&bytes);
                    Ok(Value::ObjectId(ObjectId::from_bytes(arr)))
                }
                _ => Err(CodecError::invalid_structure("malformed objectId")),
            },
            tags::UUID => match self.decode()? {
                Value::Data(bytes) => uuid::Uuid::from_slice(&bytes)
                    .map(Value::Uuid)
                    .map_err(|_| CodecError::invalid_structure("malformed uuid")),
                _ => Err(CodecError::invalid_structure("malformed uuid")),
            },
            tags::LINK => match self.decode_pair("link")? {
                (Value::String(class), Value::Int(key)) if key >= 0 => {
                    Ok(Value::Link(ObjLink::new(class, ObjKey::new(key as u64))))
                }
                _ => Err(CodecError::invalid_structure("malformed link")),
            },
            other => Err(CodecError::UnknownTag { tag: other }),
        }
    }

    fn decode_simple(&mut self, info: u8) -> CodecResult<Value> {
        match info {
            20 => Ok(Value::Bool(false)),
            21 => Ok(Value::Bool(true)),
            22 => Ok(Value::Null),
            26 => {
                let b = self.read_exact(4)?;
                Ok(Value::Float(f32::from_be_bytes([b[0], b[1], b[2], b[3]])))
            }
            27 => {
                let b = self.read_exact(8)?;
                let mut arr = [0u8; 8];
                arr.copy_from_slice(b);
                Ok(Value::Double(f64::from_be_bytes(arr)))
            }
            31 => Err(CodecError::invalid_structure("break without indefinite item")),
            other => Err(CodecError::invalid_structure(format!(
                "unsupported simple value {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::to_canonical_cbor;

    #[test]
    fn decodes_scalars() {
        assert_eq!(from_cbor(&[0xf6]).unwrap(), Value::Null);
        assert_eq!(from_cbor(&[0x38, 99]).unwrap(), Value::Int(-100));
        assert_eq!(from_cbor(&[0x62, b'h', b'i']).unwrap(), Value::String("hi".into()));
    }

    #[test]
    fn rejects_non_shortest_lengths() {
        assert!(matches!(
            from_cbor(&[0x18, 0x05]),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn rejects_unsorted_object_keys() {
        // {"b": 1, "a": 2}
        let bytes = [0xa2, 0x61, b'b', 0x01, 0x61, b'a', 0x02];
        assert!(from_cbor(&bytes).is_err());
    }

    #[test]
    fn rejects_trailing_bytes_and_truncation() {
        assert!(from_cbor(&[0x01, 0x02]).is_err());
        assert_eq!(from_cbor(&[0x62, b'h']), Err(CodecError::UnexpectedEof));
        assert_eq!(from_cbor(&[0x9f]), Err(CodecError::IndefiniteLengthForbidden));
    }

    #[test]
    fn unknown_tag_is_an_error() {
        // tag 5 wrapping 0
        assert_eq!(from_cbor(&[0xc5, 0x00]), Err(CodecError::UnknownTag { tag: 5 }));
    }

    #[test]
    fn rich_row_survives() {
        let row = Value::object([
            ("when", Value::Date(Timestamp::new(1_600_000_000, 42))),
            ("price", Value::Decimal("-19.99".parse().unwrap())),
            ("id", Value::ObjectId(ObjectId::from_bytes([9; 12]))),
            ("ref", Value::Link(ObjLink::new("Dog", ObjKey::new(300)))),
            ("ratio", Value::Float(0.25)),
            ("tags", Value::List(vec![Value::Uuid(uuid::Uuid::nil()), Value::Null])),
        ]);
        let bytes = to_canonical_cbor(&row).unwrap();
        assert_eq!(from_cbor(&bytes).unwrap(), row);
    }
}
