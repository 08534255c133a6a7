//! Commit log record types and serialization.
//!
//! Record payloads are canonical CBOR arrays built from [`Value`]s, so the
//! same row always produces the same bytes.

use tessera_codec::{from_cbor, to_canonical_cbor, ObjKey, Value};

use crate::error::{CoreError, CoreResult};
use crate::types::Version;

/// Magic bytes identifying a commit log record.
pub const LOG_MAGIC: [u8; 4] = *b"TSLG";

/// Current commit log format version.
pub const LOG_VERSION: u16 = 1;

/// Type of log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// Row changes of one committed write transaction.
    Commit = 1,
    /// Complete state at one version.
    Snapshot = 2,
}

impl LogRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Commit),
            2 => Some(Self::Snapshot),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One row-level change inside a commit.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOp {
    /// Every row of the class was removed. Applied before the other ops.
    Clear {
        /// Class name.
        class: String,
    },
    /// A row was inserted or replaced.
    Put {
        /// Class name.
        class: String,
        /// Object key.
        key: ObjKey,
        /// Column values.
        values: Vec<Value>,
    },
    /// A row was removed.
    Delete {
        /// Class name.
        class: String,
        /// Object key.
        key: ObjKey,
    },
}

/// The rows of one class inside a snapshot record.
#[derive(Debug, Clone, PartialEq)]
pub struct TableImage {
    /// Class name.
    pub class: String,
    /// Rows in key order.
    pub rows: Vec<(ObjKey, Vec<Value>)>,
}

/// A commit log record.
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    /// The changes of one committed write.
    Commit {
        /// Version produced by the commit.
        version: Version,
        /// Key counter after the commit.
        next_key: u64,
        /// Row changes.
        ops: Vec<RowOp>,
    },
    /// The full store state, written by compaction and schema changes.
    Snapshot {
        /// Version of the captured state.
        version: Version,
        /// Schema version of the captured state.
        schema_version: u64,
        /// Schema as JSON.
        schema_json: String,
        /// Key counter.
        next_key: u64,
        /// All tables.
        tables: Vec<TableImage>,
    },
}

const OP_CLEAR: i64 = 0;
const OP_PUT: i64 = 1;
const OP_DELETE: i64 = 2;

impl LogRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> LogRecordType {
        match self {
            Self::Commit { .. } => LogRecordType::Commit,
            Self::Snapshot { .. } => LogRecordType::Snapshot,
        }
    }

    /// Version this record brings the store to.
    #[must_use]
    pub fn version(&self) -> Version {
        match self {
            Self::Commit { version, .. } | Self::Snapshot { version, .. } => *version,
        }
    }

    /// Serializes the record payload (without envelope).
    ///
    /// # Errors
    ///
    /// Fails if a value cannot be encoded.
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let value = match self {
            Self::Commit {
                version,
                next_key,
                ops,
            } => Value::List(vec![
                int(version.as_u64()),
                int(*next_key),
                Value::List(ops.iter().map(encode_op).collect()),
            ]),
            Self::Snapshot {
                version,
                schema_version,
                schema_json,
                next_key,
                tables,
            } => Value::List(vec![
                int(version.as_u64()),
                int(*schema_version),
                Value::String(schema_json.clone()),
                int(*next_key),
                Value::List(
                    tables
                        .iter()
                        .map(|t| {
                            Value::List(vec![
                                Value::String(t.class.clone()),
                                Value::List(
                                    t.rows
                                        .iter()
                                        .map(|(k, values)| {
                                            Value::List(vec![int(k.as_u64()), Value::List(values.clone())])
                                        })
                                        .collect(),
                                ),
                            ])
                        })
                        .collect(),
                ),
            ]),
        };
        Ok(to_canonical_cbor(&value)?)
    }

    /// Deserializes a record from its type and payload.
    ///
    /// # Errors
    ///
    /// Returns a log corruption error when the payload does not have the
    /// expected shape.
    pub fn decode_payload(record_type: LogRecordType, payload: &[u8]) -> CoreResult<Self> {
        let value = from_cbor(payload)?;
        let fields = list(&value, "record")?;
        match record_type {
            LogRecordType::Commit => {
                let [version, next_key, ops] = fields else {
                    return Err(CoreError::log_corruption("malformed Commit record"));
                };
                Ok(Self::Commit {
                    version: Version::new(uint(version)?),
                    next_key: uint(next_key)?,
                    ops: list(ops, "ops")?
                        .iter()
                        .map(decode_op)
                        .collect::<CoreResult<_>>()?,
                })
            }
            LogRecordType::Snapshot => {
                let [version, schema_version, schema_json, next_key, tables] = fields else {
                    return Err(CoreError::log_corruption("malformed Snapshot record"));
                };
                let tables = list(tables, "tables")?
                    .iter()
                    .map(|t| {
                        let [class, rows] = list(t, "table")? else {
                            return Err(CoreError::log_corruption("malformed table image"));
                        };
                        let rows = list(rows, "rows")?
                            .iter()
                            .map(|r| {
                                let [key, values] = list(r, "row")? else {
                                    return Err(CoreError::log_corruption("malformed row image"));
                                };
                                Ok((ObjKey(uint(key)?), list(values, "values")?.to_vec()))
                            })
                            .collect::<CoreResult<_>>()?;
                        Ok(TableImage {
                            class: string(class)?,
                            rows,
                        })
                    })
                    .collect::<CoreResult<_>>()?;
                Ok(Self::Snapshot {
                    version: Version::new(uint(version)?),
                    schema_version: uint(schema_version)?,
                    schema_json: string(schema_json)?,
                    next_key: uint(next_key)?,
                    tables,
                })
            }
        }
    }
}

fn int(n: u64) -> Value {
    Value::Int(n as i64)
}

fn encode_op(op: &RowOp) -> Value {
    match op {
        RowOp::Clear { class } => Value::List(vec![Value::Int(OP_CLEAR), Value::String(class.clone())]),
        RowOp::Put { class, key, values } => Value::List(vec![
            Value::Int(OP_PUT),
            Value::String(class.clone()),
            int(key.as_u64()),
            Value::List(values.clone()),
        ]),
        RowOp::Delete { class, key } => Value::List(vec![
            Value::Int(OP_DELETE),
            Value::String(class.clone()),
            int(key.as_u64()),
        ]),
    }
}

fn decode_op(value: &Value) -> CoreResult<RowOp> {
    match list(value, "op")? {
        [Value::Int(OP_CLEAR), class] => Ok(RowOp::Clear {
            class: string(class)?,
        }),
        [Value::Int(OP_PUT), class, key, values] => Ok(RowOp::Put {
            class: string(class)?,
            key: ObjKey(uint(key)?),
            values: list(values, "values")?.to_vec(),
        }),
        [Value::Int(OP_DELETE), class, key] => Ok(RowOp::Delete {
            class: string(class)?,
            key: ObjKey(uint(key)?),
        }),
        _ => Err(CoreError::log_corruption("unknown row operation")),
    }
}

fn list<'a>(value: &'a Value, what: &str) -> CoreResult<&'a [Value]> {
    value
        .as_list()
        .ok_or_else(|| CoreError::log_corruption(format!("expected {what} array")))
}

fn uint(value: &Value) -> CoreResult<u64> {
    value
        .as_int()
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| CoreError::log_corruption("expected unsigned integer"))
}

fn string(value: &Value) -> CoreResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| CoreError::log_corruption("expected string"))
}

/// Computes CRC32 checksum for data.
pub fn compute_crc32(data: &[u8]) -> u32 {
    // IEEE polynomial, reflected.
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
