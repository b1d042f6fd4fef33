//! Value, schema and identity types for heapdb.
//!
//! Every column type is fixed width so that a tuple of a given schema always
//! occupies the same number of bytes on a page.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

pub mod ids;
pub mod tuple;

pub use ids::{PageId, RecordId, TableId, TransactionId};
pub use tuple::{FieldDef, Tuple, TupleDesc};

/// Declared width of a string column when the schema does not give one.
pub const DEFAULT_CHAR_LEN: u16 = 128;

/// Every encoded string starts with a big-endian u32 holding its byte length.
const LEN_PREFIX: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Expected {expected} fields, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("Value {value} is not compatible with {data_type}")]
    Incompatible { data_type: DataType, value: Value },

    #[error("Field index {0} out of range")]
    FieldOutOfRange(usize),

    #[error("Not enough bytes left to decode a {0} field")]
    Truncated(DataType),

    #[error("Stored length {len} exceeds the width of {data_type}")]
    CorruptLength { len: usize, data_type: DataType },

    #[error("Invalid UTF-8 in {0} field")]
    InvalidUtf8(DataType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Char(u16),
}

impl DataType {
    /// A string column of the default width.
    pub fn char() -> Self {
        DataType::Char(DEFAULT_CHAR_LEN)
    }

    /// Number of bytes a value of this type occupies on a page.
    pub fn byte_width(&self) -> usize {
        match self {
            DataType::Integer => 4,
            DataType::Char(n) => LEN_PREFIX + *n as usize,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, DataType::Char(_))
    }

    /// Reads exactly `byte_width()` bytes from `buf` and decodes a value.
    pub fn decode(&self, buf: &mut impl Buf) -> Result<Value, SchemaError> {
        if buf.remaining() < self.byte_width() {
            return Err(SchemaError::Truncated(*self));
        }

        match self {
            DataType::Integer => Ok(Value::Integer(buf.get_i32())),
            DataType::Char(n) => {
                let width = *n as usize;
                let len = buf.get_u32() as usize;
                if len > width {
                    return Err(SchemaError::CorruptLength {
                        len,
                        data_type: *self,
                    });
                }

                let mut raw = vec![0u8; len];
                buf.copy_to_slice(&mut raw);
                buf.advance(width - len);

                String::from_utf8(raw)
                    .map(Value::Char)
                    .map_err(|_| SchemaError::InvalidUtf8(*self))
            }
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Integer => write!(f, "INTEGER"),
            DataType::Char(n) => write!(f, "CHAR({})", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Integer(i32),
    Char(String),
}

impl Value {
    /// The narrowest type able to hold this value.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Integer(_) => DataType::Integer,
            Value::Char(s) => DataType::Char(s.len().min(u16::MAX as usize) as u16),
        }
    }

    pub fn type_compatible(&self, data_type: &DataType) -> bool {
        match (self, data_type) {
            (Value::Integer(_), DataType::Integer) => true,
            (Value::Char(s), DataType::Char(n)) => s.len() <= *n as usize,
            _ => false,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Char(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Char(s) => Some(s),
            Value::Integer(_) => None,
        }
    }

    /// Writes exactly `data_type.byte_width()` bytes, zero padding strings.
    pub fn encode(&self, data_type: DataType, buf: &mut impl BufMut) -> Result<(), SchemaError> {
        if !self.type_compatible(&data_type) {
            return Err(SchemaError::Incompatible {
                data_type,
                value: self.clone(),
            });
        }

        match (self, data_type) {
            (Value::Integer(i), DataType::Integer) => buf.put_i32(*i),
            (Value::Char(s), DataType::Char(n)) => {
                buf.put_u32(s.len() as u32);
                buf.put_slice(s.as_bytes());
                buf.put_bytes(0, n as usize - s.len());
            }
            _ => unreachable!("compatibility checked above"),
        }
        Ok(())
    }
}

impl PartialOrd for Value {
    /// Values of different types are unordered.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{}", i),
            Value::Char(s) => write!(f, "{}", s),
        }
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Char(s.to_string())
    }
}
