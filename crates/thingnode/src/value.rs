use alloc::string::{String, ToString};
use alloc::vec::Vec;

use core::fmt;

/// Tolerance used when comparing two [`Value::Double`].
pub const DOUBLE_EPSILON: f64 = 0.01;

/// The discriminant of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// A `bool`.
    Boolean,
    /// An `i32`.
    Integer,
    /// An `i16`.
    Short,
    /// An `u32`.
    UnsignedLong,
    /// An `u8`.
    Byte,
    /// An `f64`.
    Double,
    /// A bounded text.
    String,
    /// A bounded sequence of bytes.
    ByteArray,
}

impl ValueKind {
    /// Returns the JSON type announced in a property structure.
    #[must_use]
    pub const fn as_type(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Integer | Self::Short | Self::UnsignedLong | Self::Byte => "integer",
            Self::Double => "number",
            Self::String => "string",
            Self::ByteArray => "array",
        }
    }

    /// Returns the number of bytes occupied in the non-volatile region.
    ///
    /// Variable-length kinds take a 1-byte length prefix followed by
    /// `max_length` bytes.
    #[must_use]
    pub const fn storage_width(self, max_length: u8) -> usize {
        match self {
            Self::Boolean | Self::Byte => 1,
            Self::Short => 2,
            Self::Integer | Self::UnsignedLong => 4,
            Self::Double => 8,
            Self::String | Self::ByteArray => 1 + max_length as usize,
        }
    }

    /// Whether the kind has a variable length.
    #[must_use]
    pub const fn is_variable(self) -> bool {
        matches!(self, Self::String | Self::ByteArray)
    }
}

/// A typed scalar or a short byte buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A `bool`.
    Boolean(bool),
    /// An `i32`.
    Integer(i32),
    /// An `i16`.
    Short(i16),
    /// An `u32`.
    UnsignedLong(u32),
    /// An `u8`.
    Byte(u8),
    /// An `f64`.
    Double(f64),
    /// A text.
    String(String),
    /// A sequence of bytes.
    ByteArray(Vec<u8>),
}

impl Value {
    /// Returns the default value of a [`ValueKind`].
    #[must_use]
    pub const fn default_for(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Boolean => Self::Boolean(false),
            ValueKind::Integer => Self::Integer(0),
            ValueKind::Short => Self::Short(0),
            ValueKind::UnsignedLong => Self::UnsignedLong(0),
            ValueKind::Byte => Self::Byte(0),
            ValueKind::Double => Self::Double(0.),
            ValueKind::String => Self::String(String::new()),
            ValueKind::ByteArray => Self::ByteArray(Vec::new()),
        }
    }

    /// Returns the [`ValueKind`] of this value.
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Boolean(_) => ValueKind::Boolean,
            Self::Integer(_) => ValueKind::Integer,
            Self::Short(_) => ValueKind::Short,
            Self::UnsignedLong(_) => ValueKind::UnsignedLong,
            Self::Byte(_) => ValueKind::Byte,
            Self::Double(_) => ValueKind::Double,
            Self::String(_) => ValueKind::String,
            Self::ByteArray(_) => ValueKind::ByteArray,
        }
    }

    /// Compares two values.
    ///
    /// Doubles are equal when they differ by less than [`DOUBLE_EPSILON`].
    /// Values of different kinds are never equal.
    #[must_use]
    pub fn approx_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Double(a), Self::Double(b)) => (a - b).abs() < DOUBLE_EPSILON,
            _ => self == other,
        }
    }

    /// Parses a text into a value of the given [`ValueKind`].
    ///
    /// Returns `None` when the text does not represent a value of that kind.
    #[must_use]
    pub fn parse(kind: ValueKind, text: &str) -> Option<Self> {
        let trimmed = text.trim();
        match kind {
            ValueKind::Boolean => parse_bool(trimmed).map(Self::Boolean),
            ValueKind::Integer => parse_integral::<i32>(trimmed).map(Self::Integer),
            ValueKind::Short => parse_integral::<i16>(trimmed).map(Self::Short),
            ValueKind::UnsignedLong => parse_integral::<u32>(trimmed).map(Self::UnsignedLong),
            ValueKind::Byte => parse_integral::<u8>(trimmed).map(Self::Byte),
            ValueKind::Double => trimmed
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Self::Double),
            // Texts are taken verbatim.
            ValueKind::String => Some(Self::String(text.to_string())),
            ValueKind::ByteArray => parse_bytes(trimmed).map(Self::ByteArray),
        }
    }

    // Writes the value as a record of exactly `kind.storage_width(max_length)`
    // bytes.
    pub(crate) fn encode(&self, max_length: u8, out: &mut Vec<u8>) {
        match self {
            Self::Boolean(v) => out.push(u8::from(*v)),
            Self::Integer(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::Short(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::UnsignedLong(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::Byte(v) => out.push(*v),
            Self::Double(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::String(v) => encode_variable(v.as_bytes(), max_length, out),
            Self::ByteArray(v) => encode_variable(v, max_length, out),
        }
    }

    // Reads a value back from its record.
    pub(crate) fn decode(kind: ValueKind, max_length: u8, record: &[u8]) -> Option<Self> {
        if record.len() < kind.storage_width(max_length) {
            return None;
        }

        Some(match kind {
            ValueKind::Boolean => Self::Boolean(record[0] != 0),
            ValueKind::Byte => Self::Byte(record[0]),
            ValueKind::Short => Self::Short(i16::from_le_bytes([record[0], record[1]])),
            ValueKind::Integer => Self::Integer(i32::from_le_bytes(record[..4].try_into().ok()?)),
            ValueKind::UnsignedLong => {
                Self::UnsignedLong(u32::from_le_bytes(record[..4].try_into().ok()?))
            }
            ValueKind::Double => Self::Double(f64::from_le_bytes(record[..8].try_into().ok()?)),
            ValueKind::String => {
                let bytes = decode_variable(max_length, record)?;
                Self::String(String::from_utf8(bytes.to_vec()).ok()?)
            }
            ValueKind::ByteArray => Self::ByteArray(decode_variable(max_length, record)?.to_vec()),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => v.fmt(f),
            Self::Integer(v) => v.fmt(f),
            Self::Short(v) => v.fmt(f),
            Self::UnsignedLong(v) => v.fmt(f),
            Self::Byte(v) => v.fmt(f),
            Self::Double(v) => v.fmt(f),
            Self::String(v) => v.fmt(f),
            Self::ByteArray(v) => {
                write!(f, "[{}", v.len())?;
                for byte in v {
                    write!(f, ",{byte}")?;
                }
                f.write_str("]")
            }
        }
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    if text.eq_ignore_ascii_case("true") || text == "1" {
        Some(true)
    } else if text.eq_ignore_ascii_case("false") || text == "0" {
        Some(false)
    } else {
        None
    }
}

// Integral kinds accept a decimal literal. A literal with a fractional part
// is truncated towards zero, provided it fits the target type.
fn parse_integral<T>(text: &str) -> Option<T>
where
    T: core::str::FromStr + TryFrom<i64>,
{
    if let Ok(value) = text.parse::<T>() {
        return Some(value);
    }

    let value = text.parse::<f64>().ok().filter(|v| v.is_finite())?;
    #[allow(clippy::cast_possible_truncation)]
    T::try_from(value as i64).ok()
}

// Byte arrays are written as `[length, byte, ...]`. The length must match
// the number of bytes which follow it.
fn parse_bytes(text: &str) -> Option<Vec<u8>> {
    let inner = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .unwrap_or(text);

    let mut elements = inner.split(',').map(|element| element.trim().parse::<u8>().ok());
    let length = elements.next()??;
    let bytes = elements.collect::<Option<Vec<u8>>>()?;

    (bytes.len() == usize::from(length)).then_some(bytes)
}

fn encode_variable(bytes: &[u8], max_length: u8, out: &mut Vec<u8>) {
    let length = bytes.len().min(usize::from(max_length));
    #[allow(clippy::cast_possible_truncation)]
    out.push(length as u8);
    out.extend_from_slice(&bytes[..length]);
    out.resize(out.len() + usize::from(max_length) - length, 0);
}

fn decode_variable(max_length: u8, record: &[u8]) -> Option<&[u8]> {
    let length = record[0];
    if length > max_length {
        return None;
    }
    Some(&record[1..=usize::from(length)])
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(value)
    }
}

impl From<i16> for Value {
    fn from(value: i16) -> Self {
        Self::Short(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::UnsignedLong(value)
    }
}

impl From<u8> for Value {
    fn from(value: u8) -> Self {
        Self::Byte(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::ByteArray(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Self::ByteArray(value.to_vec())
    }
}

/// A Rust type which can be read out of a [`Value`].
pub trait FromValue: Sized {
    /// The [`ValueKind`] this type is read from.
    const KIND: ValueKind;

    /// Copies the payload out of a [`Value`] of kind [`Self::KIND`].
    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! from_value {
    ($ty:ty, $variant:ident, $kind:ident) => {
        impl FromValue for $ty {
            const KIND: ValueKind = ValueKind::$kind;

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    };
}

from_value!(bool, Boolean, Boolean);
from_value!(i32, Integer, Integer);
from_value!(i16, Short, Short);
from_value!(u32, UnsignedLong, UnsignedLong);
from_value!(u8, Byte, Byte);
from_value!(f64, Double, Double);
from_value!(String, String, String);
from_value!(Vec<u8>, ByteArray, ByteArray);

#[cfg(test)]
mod tests {
    use alloc::string::{String, ToString};
    use alloc::vec;
    use alloc::vec::Vec;

    use super::{FromValue, Value, ValueKind};

    #[test]
    fn test_approx_eq() {
        assert!(Value::Double(21.5).approx_eq(&Value::Double(21.505)));
        assert!(!Value::Double(21.5).approx_eq(&Value::Double(21.52)));
        assert!(!Value::Integer(1).approx_eq(&Value::Short(1)));
        assert!(Value::from("heat").approx_eq(&Value::String("heat".into())));
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            Value::parse(ValueKind::Boolean, "TRUE"),
            Some(Value::Boolean(true))
        );
        assert_eq!(
            Value::parse(ValueKind::Boolean, "0"),
            Some(Value::Boolean(false))
        );
        assert_eq!(Value::parse(ValueKind::Boolean, "yes"), None);
        assert_eq!(
            Value::parse(ValueKind::Integer, " 80 "),
            Some(Value::Integer(80))
        );
        assert_eq!(
            Value::parse(ValueKind::Integer, "80.7"),
            Some(Value::Integer(80))
        );
        assert_eq!(Value::parse(ValueKind::Byte, "300"), None);
        assert_eq!(Value::parse(ValueKind::Short, "-12"), Some(Value::Short(-12)));
        assert_eq!(Value::parse(ValueKind::UnsignedLong, "-1"), None);
        assert_eq!(
            Value::parse(ValueKind::Double, "21.25"),
            Some(Value::Double(21.25))
        );
        assert_eq!(Value::parse(ValueKind::Double, "abc"), None);
        assert_eq!(
            Value::parse(ValueKind::String, " warm "),
            Some(Value::String(" warm ".into()))
        );
        assert_eq!(
            Value::parse(ValueKind::ByteArray, "[3,1, 2,255]"),
            Some(Value::ByteArray(vec![1, 2, 255]))
        );
        assert_eq!(
            Value::parse(ValueKind::ByteArray, "[0]"),
            Some(Value::ByteArray(Vec::new()))
        );
        assert_eq!(Value::parse(ValueKind::ByteArray, "[1,x]"), None);
        // The length prefix must match the bytes which follow.
        assert_eq!(Value::parse(ValueKind::ByteArray, "[1,2]"), None);
        assert_eq!(Value::parse(ValueKind::ByteArray, "[3,1,2]"), None);
        assert_eq!(Value::parse(ValueKind::ByteArray, "[]"), None);
    }

    #[test]
    fn test_text_round_trip() {
        let values = [
            Value::Boolean(true),
            Value::Integer(-42),
            Value::Short(1234),
            Value::UnsignedLong(4_000_000_000),
            Value::Byte(7),
            Value::Double(-3.75),
            Value::String("living room".into()),
            Value::ByteArray(vec![0, 128, 255]),
        ];

        for value in values {
            let parsed = Value::parse(value.kind(), &value.to_string()).unwrap();
            assert!(parsed.approx_eq(&value), "{value:?} != {parsed:?}");
        }

        assert_eq!(Value::ByteArray(vec![0, 128, 255]).to_string(), "[3,0,128,255]");
    }

    #[test]
    fn test_storage_width() {
        assert_eq!(ValueKind::Boolean.storage_width(0), 1);
        assert_eq!(ValueKind::Short.storage_width(0), 2);
        assert_eq!(ValueKind::UnsignedLong.storage_width(0), 4);
        assert_eq!(ValueKind::Double.storage_width(0), 8);
        assert_eq!(ValueKind::String.storage_width(16), 17);
    }

    #[test]
    fn test_record_encoding() {
        let mut out = Vec::new();
        Value::String("abc".into()).encode(5, &mut out);
        assert_eq!(out, [3, b'a', b'b', b'c', 0, 0]);
        assert_eq!(
            Value::decode(ValueKind::String, 5, &out),
            Some(Value::String("abc".into()))
        );

        // A length prefix beyond the declared maximum is garbage.
        assert_eq!(Value::decode(ValueKind::String, 5, &[9, 0, 0, 0, 0, 0]), None);

        let mut out = Vec::new();
        Value::String("too long".into()).encode(3, &mut out);
        assert_eq!(out, [3, b't', b'o', b'o']);

        let mut out = Vec::new();
        Value::Double(21.5).encode(0, &mut out);
        assert_eq!(
            Value::decode(ValueKind::Double, 0, &out),
            Some(Value::Double(21.5))
        );
    }

    #[test]
    fn test_from_value() {
        assert_eq!(u8::from_value(&Value::Byte(3)), Some(3));
        assert_eq!(u8::from_value(&Value::Integer(3)), None);
        assert_eq!(
            String::from_value(&Value::from("x")),
            Some(String::from("x"))
        );
    }
}
