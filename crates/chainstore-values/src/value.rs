//! Plain values
//!
//! [`Value`] is the in-process form of anything a [`Var`](crate::Var) can
//! hold. It carries no addresses; storing it creates records.

use bytes::Bytes;
use chainstore_common::{Error, Result};
use derive_more::Display;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Kind of a stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ValueKind {
    #[display("null")]
    Null,
    #[display("integer")]
    Integer,
    #[display("bytes")]
    Bytes,
    #[display("text")]
    Text,
    #[display("list")]
    List,
    #[display("opaque")]
    Opaque,
}

impl ValueKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer => "integer",
            Self::Bytes => "bytes",
            Self::Text => "text",
            Self::List => "list",
            Self::Opaque => "opaque",
        }
    }
}

/// A value as plain data
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Bytes(Bytes),
    Text(String),
    List(Vec<Value>),
    /// Bytes serialized by the caller; see [`Value::opaque`]
    Opaque(Bytes),
}

impl Value {
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Integer(_) => ValueKind::Integer,
            Self::Bytes(_) => ValueKind::Bytes,
            Self::Text(_) => ValueKind::Text,
            Self::List(_) => ValueKind::List,
            Self::Opaque(_) => ValueKind::Opaque,
        }
    }

    /// Serialize any serde value into an opaque payload
    pub fn opaque<T: Serialize>(value: &T) -> Result<Self> {
        bincode::serialize(value)
            .map(|encoded| Self::Opaque(Bytes::from(encoded)))
            .map_err(|e| Error::serialization(e.to_string()))
    }

    /// Deserialize an opaque payload produced by [`Value::opaque`]
    pub fn decode_opaque<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            Self::Opaque(payload) => {
                bincode::deserialize(payload).map_err(|e| Error::serialization(e.to_string()))
            }
            other => Err(other.mismatch(ValueKind::Opaque)),
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(payload) => Some(payload),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub(crate) fn mismatch(&self, expected: ValueKind) -> Error {
        Error::TypeMismatch {
            expected: expected.name(),
            found: self.kind().name(),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}

impl From<Vec<Self>> for Value {
    fn from(value: Vec<Self>) -> Self {
        Self::List(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Point {
        x: i32,
        label: String,
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Value::from(5i64), Value::Integer(5));
        assert_eq!(Value::from("a"), Value::Text("a".into()));
        assert_eq!(Value::from(vec![1u8, 2]).kind(), ValueKind::Bytes);
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(3i64)), Value::Integer(3));
        assert_eq!(
            Value::from(vec![Value::from(1i64), Value::Null]).as_list().map(<[Value]>::len),
            Some(2)
        );
    }

    #[test]
    fn test_opaque_roundtrip() {
        let point = Point {
            x: -4,
            label: "origin".into(),
        };
        let value = Value::opaque(&point).unwrap();
        assert_eq!(value.kind(), ValueKind::Opaque);
        assert_eq!(value.decode_opaque::<Point>().unwrap(), point);
    }

    #[test]
    fn test_decode_opaque_wrong_kind() {
        let err = Value::Integer(1).decode_opaque::<Point>().unwrap_err();
        assert_eq!(
            err,
            Error::TypeMismatch {
                expected: "opaque",
                found: "integer"
            }
        );
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ValueKind::List.to_string(), "list");
        assert_eq!(ValueKind::Opaque.to_string(), ValueKind::Opaque.name());
    }
}
