//! Column values and their inline byte encoding

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::catalog::ValueType;
use crate::error::{Result, StorageError};

/// A single column value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    TinyInt(i8),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Double(f64),
    Boolean(bool),
    Varchar(String),
}

impl Value {
    /// Column type this value naturally belongs to (varchar reports its own length)
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::TinyInt(_) => "TINYINT",
            Value::SmallInt(_) => "SMALLINT",
            Value::Integer(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Double(_) => "DOUBLE",
            Value::Boolean(_) => "BOOLEAN",
            Value::Varchar(_) => "VARCHAR",
        }
    }

    /// Write the value into `buf`, which must be exactly `value_type.length()` bytes
    pub fn encode(&self, value_type: ValueType, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), value_type.length());
        match (self, value_type) {
            (Value::TinyInt(v), ValueType::TinyInt) => buf[0] = *v as u8,
            (Value::SmallInt(v), ValueType::SmallInt) => LittleEndian::write_i16(buf, *v),
            (Value::Integer(v), ValueType::Integer) => LittleEndian::write_i32(buf, *v),
            (Value::BigInt(v), ValueType::BigInt) => LittleEndian::write_i64(buf, *v),
            (Value::Double(v), ValueType::Double) => LittleEndian::write_f64(buf, *v),
            (Value::Boolean(v), ValueType::Boolean) => buf[0] = *v as u8,
            (Value::Varchar(s), ValueType::Varchar(max_len)) => {
                let bytes = s.as_bytes();
                if bytes.len() > max_len as usize {
                    return Err(StorageError::Type(format!(
                        "String of {} bytes is too long for {}",
                        bytes.len(),
                        value_type
                    )));
                }
                LittleEndian::write_u16(&mut buf[..2], bytes.len() as u16);
                buf[2..2 + bytes.len()].copy_from_slice(bytes);
                buf[2 + bytes.len()..].fill(0);
            }
            (value, expected) => {
                return Err(StorageError::Type(format!(
                    "Cannot store {} value in {} column",
                    value.type_name(),
                    expected
                )))
            }
        }
        Ok(())
    }

    /// Read a value of `value_type` back from `buf`
    pub fn decode(value_type: ValueType, buf: &[u8]) -> Value {
        match value_type {
            ValueType::TinyInt => Value::TinyInt(buf[0] as i8),
            ValueType::SmallInt => Value::SmallInt(LittleEndian::read_i16(buf)),
            ValueType::Integer => Value::Integer(LittleEndian::read_i32(buf)),
            ValueType::BigInt => Value::BigInt(LittleEndian::read_i64(buf)),
            ValueType::Double => Value::Double(LittleEndian::read_f64(buf)),
            ValueType::Boolean => Value::Boolean(buf[0] != 0),
            ValueType::Varchar(max_len) => {
                let len = (LittleEndian::read_u16(&buf[..2]) as usize).min(max_len as usize);
                Value::Varchar(String::from_utf8_lossy(&buf[2..2 + len]).into_owned())
            }
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::TinyInt(v) => Some(*v as i64),
            Value::SmallInt(v) => Some(*v as i64),
            Value::Integer(v) => Some(*v as i64),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::TinyInt(v) => write!(f, "{}", v),
            Value::SmallInt(v) => write!(f, "{}", v),
            Value::Integer(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Boolean(v) => write!(f, "{}", if *v { "TRUE" } else { "FALSE" }),
            Value::Varchar(s) => write!(f, "'{}'", s),
        }
    }
}
