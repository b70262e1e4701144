//! Values flowing through expression evaluation and out of a row cursor.
use std::cmp::Ordering;
use std::fmt;

use bytes::Bytes;
use treestore::ScalarValue;

/// A value produced during evaluation.
///
/// Storage values are widened when decoded: signed integers become `Int64`,
/// unsigned integers `UInt64` and floats `Float64`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Int64(i64),
    UInt64(u64),
    Float64(f64),
    Utf8(String),
    Binary(Vec<u8>),
    Tuple(Vec<Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "Boolean",
            Value::Int64(_) => "Int64",
            Value::UInt64(_) => "UInt64",
            Value::Float64(_) => "Float64",
            Value::Utf8(_) => "Utf8",
            Value::Binary(_) => "Binary",
            Value::Tuple(_) => "Tuple",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int64(_) | Value::UInt64(_) | Value::Float64(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int64(v) => Some(*v as f64),
            Value::UInt64(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Int64(v) => Some(*v as i128),
            Value::UInt64(v) => Some(*v as i128),
            _ => None,
        }
    }

    /// Compare two values of comparable types.
    ///
    /// Returns `None` if the types can't be compared, or if either side is a
    /// NaN.
    pub fn partial_compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Utf8(a), Value::Utf8(b)) => Some(a.cmp(b)),
            (Value::Binary(a), Value::Binary(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Float64(_), _) | (_, Value::Float64(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            _ => Some(self.as_i128()?.cmp(&other.as_i128()?)),
        }
    }
}

impl From<ScalarValue> for Value {
    fn from(value: ScalarValue) -> Self {
        match value {
            ScalarValue::Boolean(v) => Value::Boolean(v),
            ScalarValue::Int8(v) => Value::Int64(v as i64),
            ScalarValue::Int16(v) => Value::Int64(v as i64),
            ScalarValue::Int32(v) => Value::Int64(v as i64),
            ScalarValue::Int64(v) => Value::Int64(v),
            ScalarValue::UInt8(v) => Value::UInt64(v as u64),
            ScalarValue::UInt16(v) => Value::UInt64(v as u64),
            ScalarValue::UInt32(v) => Value::UInt64(v as u64),
            ScalarValue::UInt64(v) => Value::UInt64(v),
            ScalarValue::Float16(v) => Value::Float64(v.to_f64()),
            ScalarValue::Float32(v) => Value::Float64(v as f64),
            ScalarValue::Float64(v) => Value::Float64(v),
            ScalarValue::Utf8(v) => Value::Utf8(v),
            ScalarValue::Binary(v) => Value::Binary(v),
        }
    }
}

impl From<&ScalarValue> for Value {
    fn from(value: &ScalarValue) -> Self {
        match value {
            ScalarValue::Utf8(v) => Value::Utf8(v.clone()),
            ScalarValue::Binary(v) => Value::Binary(v.clone()),
            other => Value::from(other.clone()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int64(value as i64)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::UInt64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float64(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Utf8(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Utf8(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::UInt64(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Utf8(v) => write!(f, "'{v}'"),
            Value::Binary(v) => write!(f, "{v:?}"),
            Value::Tuple(vs) => {
                write!(f, "(")?;
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// A single output column value, as handed to the caller by a row cursor.
///
/// Strings are carried as bytes.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RowValue {
    /// Slot not yet written.
    #[default]
    Empty,
    Boolean(bool),
    Int64(i64),
    UInt64(u64),
    Float64(f64),
    Bytes(Bytes),
}

impl RowValue {
    /// Interpret bytes as utf8, if this is a byte value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RowValue::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for RowValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowValue::Empty => Ok(()),
            RowValue::Boolean(v) => write!(f, "{v}"),
            RowValue::Int64(v) => write!(f, "{v}"),
            RowValue::UInt64(v) => write!(f, "{v}"),
            RowValue::Float64(v) => write!(f, "{v}"),
            RowValue::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => write!(f, "{s}"),
                Err(_) => write!(f, "{b:?}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use half::f16;

    use super::*;

    #[test]
    fn widen_on_decode() {
        assert_eq!(Value::Int64(-3), Value::from(ScalarValue::Int8(-3)));
        assert_eq!(Value::UInt64(7), Value::from(ScalarValue::UInt16(7)));
        assert_eq!(Value::Float64(1.5), Value::from(ScalarValue::Float32(1.5)));
        assert_eq!(
            Value::Float64(0.5),
            Value::from(ScalarValue::Float16(f16::from_f32(0.5)))
        );
    }

    #[test]
    fn compare_mixed_integers() {
        assert_eq!(
            Some(Ordering::Less),
            Value::Int64(-1).partial_compare(&Value::UInt64(u64::MAX))
        );
        assert_eq!(
            Some(Ordering::Equal),
            Value::Int64(5).partial_compare(&Value::UInt64(5))
        );
    }

    #[test]
    fn compare_int_float() {
        assert_eq!(
            Some(Ordering::Greater),
            Value::Int64(3).partial_compare(&Value::Float64(2.5))
        );
        assert_eq!(None, Value::Float64(f64::NAN).partial_compare(&Value::Int64(1)));
    }

    #[test]
    fn compare_incompatible() {
        assert_eq!(None, Value::Int64(1).partial_compare(&Value::from("1")));
        assert_eq!(None, Value::Boolean(true).partial_compare(&Value::Int64(1)));
    }
}
