//! Constant pool values
//!
//! The persistable subset of script values. Object references never appear
//! in an image.

use std::fmt;

use core_types::{Value, VmError, VmResult};

const TAG_UNDEFINED: u8 = 0;
const TAG_BOOLEAN: u8 = 1;
const TAG_NUMBER: u8 = 2;
const TAG_STRING: u8 = 3;

/// A constant pool entry
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    /// Undefined value
    Undefined,
    /// Boolean value
    Boolean(bool),
    /// Numeric value
    Number(f64),
    /// String value
    String(String),
}

impl ConstValue {
    /// Returns the string if this is a string constant
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConstValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to a runtime value
    pub fn to_value(&self) -> Value {
        match self {
            ConstValue::Undefined => Value::Undefined,
            ConstValue::Boolean(b) => Value::Boolean(*b),
            ConstValue::Number(n) => Value::Number(*n),
            ConstValue::String(s) => Value::string(s),
        }
    }

    /// Append the serialized form to `out`
    pub fn write_bytes(&self, out: &mut Vec<u8>) {
        match self {
            ConstValue::Undefined => out.push(TAG_UNDEFINED),
            ConstValue::Boolean(b) => {
                out.push(TAG_BOOLEAN);
                out.push(u8::from(*b));
            }
            ConstValue::Number(n) => {
                out.push(TAG_NUMBER);
                out.extend_from_slice(&n.to_le_bytes());
            }
            ConstValue::String(s) => {
                out.push(TAG_STRING);
                out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
        }
    }

    /// Serialize value to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.write_bytes(&mut bytes);
        bytes
    }

    /// Decode value from bytes, returning it with the number of bytes used
    pub fn from_bytes(bytes: &[u8]) -> VmResult<(Self, usize)> {
        let (&tag, rest) = bytes
            .split_first()
            .ok_or_else(|| VmError::format("missing constant tag"))?;
        match tag {
            TAG_UNDEFINED => Ok((ConstValue::Undefined, 1)),
            TAG_BOOLEAN => match rest.first() {
                Some(0) => Ok((ConstValue::Boolean(false), 2)),
                Some(1) => Ok((ConstValue::Boolean(true), 2)),
                Some(other) => Err(VmError::format(format!(
                    "invalid boolean constant byte {}",
                    other
                ))),
                None => Err(VmError::format("not enough bytes for boolean constant")),
            },
            TAG_NUMBER => {
                let raw: [u8; 8] = rest
                    .get(..8)
                    .and_then(|slice| slice.try_into().ok())
                    .ok_or_else(|| VmError::format("not enough bytes for number constant"))?;
                Ok((ConstValue::Number(f64::from_le_bytes(raw)), 9))
            }
            TAG_STRING => {
                let raw: [u8; 4] = rest
                    .get(..4)
                    .and_then(|slice| slice.try_into().ok())
                    .ok_or_else(|| VmError::format("not enough bytes for string length"))?;
                let len = u32::from_le_bytes(raw) as usize;
                let data = rest
                    .get(4..4 + len)
                    .ok_or_else(|| VmError::format("not enough bytes for string content"))?;
                let s = std::str::from_utf8(data)
                    .map_err(|e| VmError::format(format!("invalid UTF-8 in constant: {}", e)))?;
                Ok((ConstValue::String(s.to_owned()), 5 + len))
            }
            _ => Err(VmError::format(format!("unknown constant tag {}", tag))),
        }
    }
}

impl From<f64> for ConstValue {
    fn from(n: f64) -> Self {
        ConstValue::Number(n)
    }
}

impl From<bool> for ConstValue {
    fn from(b: bool) -> Self {
        ConstValue::Boolean(b)
    }
}

impl From<&str> for ConstValue {
    fn from(s: &str) -> Self {
        ConstValue::String(s.to_owned())
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::String(s) => write!(f, "{:?}", s),
            other => write!(f, "{}", other.to_value()),
        }
    }
}
