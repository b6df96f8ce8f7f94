use crate::error::{PlugsqlError, Result};
use chrono::{DateTime, Utc};
use std::any::Any;

/// The closed set of scalar values that may cross the plugin boundary.
///
/// Adding a variant is a protocol change: both `plugsql_protocol::codec`
/// match sites must be updated and the core protocol version bumped.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Int64(i64),
    Float64(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    String(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int64(_) => "int64",
            Value::Float64(_) => "float64",
            Value::Bool(_) => "bool",
            Value::Bytes(_) => "bytes",
            Value::String(_) => "string",
            Value::Timestamp(_) => "timestamp",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Classifies an arbitrary native value into one of the supported kinds.
    ///
    /// Accepts `()`, `i64`, `f64`, `bool`, `Vec<u8>`, `&[u8]`, `String`,
    /// `&str`, `DateTime<Utc>` and `Option` of any of those. Everything else
    /// is rejected with [`PlugsqlError::UnsupportedValueType`]; there is no
    /// fallback to `Null` and no numeric widening.
    pub fn from_native<T: Any>(value: &T) -> Result<Value> {
        let any = value as &dyn Any;
        macro_rules! classify {
            ($($ty:ty => |$v:ident| $map:expr),* $(,)?) => {
                $(
                    if let Some($v) = any.downcast_ref::<$ty>() {
                        return Ok($map);
                    }
                )*
            };
        }
        classify!(
            () => |_v| Value::Null,
            i64 => |v| Value::Int64(*v),
            f64 => |v| Value::Float64(*v),
            bool => |v| Value::Bool(*v),
            Vec<u8> => |v| Value::Bytes(v.clone()),
            &'static [u8] => |v| Value::Bytes(v.to_vec()),
            String => |v| Value::String(v.clone()),
            &'static str => |v| Value::String((*v).to_string()),
            DateTime<Utc> => |v| Value::Timestamp(*v),
            Option<i64> => |v| v.map_or(Value::Null, Value::Int64),
            Option<f64> => |v| v.map_or(Value::Null, Value::Float64),
            Option<bool> => |v| v.map_or(Value::Null, Value::Bool),
            Option<Vec<u8>> => |v| v.clone().map_or(Value::Null, Value::Bytes),
            Option<String> => |v| v.clone().map_or(Value::Null, Value::String),
            Option<&'static str> => |v| v.map_or(Value::Null, |s| Value::String(s.to_string())),
            Option<DateTime<Utc>> => |v| v.map_or(Value::Null, Value::Timestamp),
            Value => |v| v.clone(),
        );
        Err(PlugsqlError::UnsupportedValueType(std::any::type_name::<T>()))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Typed extraction of a column value.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch(expected: &'static str, value: &Value) -> PlugsqlError {
    PlugsqlError::TypeMismatch {
        expected,
        found: value.kind(),
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Int64(v) => Ok(*v),
            other => Err(mismatch("int64", other)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float64(v) => Ok(*v),
            other => Err(mismatch("float64", other)),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(v) => Ok(*v),
            other => Err(mismatch("bool", other)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bytes(v) => Ok(v.clone()),
            other => Err(mismatch("bytes", other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(v) => Ok(v.clone()),
            other => Err(mismatch("string", other)),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Timestamp(v) => Ok(*v),
            other => Err(mismatch("timestamp", other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}
