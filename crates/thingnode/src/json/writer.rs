use alloc::string::String;
use alloc::vec::Vec;

use core::fmt::Write;

use crate::value::Value;

// Longest plain decimal rendering of a double. Longer renderings, such as
// `1e300` or `1e-300`, are written in exponent form.
const MAX_PLAIN_DOUBLE_LENGTH: usize = 24;

/// An incremental JSON serializer.
///
/// Each payload owns its own buffer: [`JsonWriter::finish`] hands the
/// buffer over to the caller, so no reference into a shared output stream
/// can outlive the serialization which produced it.
///
/// Separators are inserted automatically: a key or a value opened inside a
/// container is preceded by a `,` when it is not the first one.
#[derive(Debug, Default)]
pub struct JsonWriter {
    buffer: String,
    // One entry per open container, `true` until its first member.
    first: Vec<bool>,
    after_key: bool,
}

impl JsonWriter {
    /// Creates an empty [`JsonWriter`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: String::new(),
            first: Vec::new(),
            after_key: false,
        }
    }

    /// Opens an object.
    pub fn begin_object(&mut self) -> &mut Self {
        self.separator();
        self.buffer.push('{');
        self.first.push(true);
        self
    }

    /// Closes the current object.
    pub fn end_object(&mut self) -> &mut Self {
        let _ = self.first.pop();
        self.buffer.push('}');
        self
    }

    /// Opens an array.
    pub fn begin_array(&mut self) -> &mut Self {
        self.separator();
        self.buffer.push('[');
        self.first.push(true);
        self
    }

    /// Closes the current array.
    pub fn end_array(&mut self) -> &mut Self {
        let _ = self.first.pop();
        self.buffer.push(']');
        self
    }

    /// Writes an object key. The next written value belongs to it.
    pub fn key(&mut self, key: &str) -> &mut Self {
        self.separator();
        self.escaped(key);
        self.buffer.push(':');
        self.after_key = true;
        self
    }

    /// Writes `null`.
    pub fn null(&mut self) -> &mut Self {
        self.separator();
        self.buffer.push_str("null");
        self
    }

    /// Writes a boolean.
    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.separator();
        self.buffer.push_str(if value { "true" } else { "false" });
        self
    }

    /// Writes a signed integer.
    pub fn integer(&mut self, value: i64) -> &mut Self {
        self.separator();
        let _ = write!(self.buffer, "{value}");
        self
    }

    /// Writes an unsigned integer.
    pub fn unsigned(&mut self, value: u64) -> &mut Self {
        self.separator();
        let _ = write!(self.buffer, "{value}");
        self
    }

    /// Writes a floating point number.
    ///
    /// Whole numbers are written without a fractional part and very large
    /// or very small magnitudes in exponent form, so every rendering fits a
    /// parser token. Non-finite numbers cannot be represented in JSON and
    /// are written as `null`.
    pub fn double(&mut self, value: f64) -> &mut Self {
        if !value.is_finite() {
            return self.null();
        }
        self.separator();

        let start = self.buffer.len();
        let _ = write!(self.buffer, "{value}");
        if self.buffer.len() - start > MAX_PLAIN_DOUBLE_LENGTH {
            self.buffer.truncate(start);
            let _ = write!(self.buffer, "{value:e}");
        }
        self
    }

    /// Writes an escaped string.
    pub fn string(&mut self, value: &str) -> &mut Self {
        self.separator();
        self.escaped(value);
        self
    }

    /// Writes a byte sequence as an array of numbers, preceded by its
    /// length: `[2,1,2]`.
    pub fn bytes(&mut self, value: &[u8]) -> &mut Self {
        let length = u64::try_from(value.len()).unwrap_or(u64::MAX);
        let _ = self.begin_array().unsigned(length);
        for byte in value {
            let _ = self.unsigned(u64::from(*byte));
        }
        self.end_array()
    }

    /// Writes a [`Value`].
    pub fn value(&mut self, value: &Value) -> &mut Self {
        match value {
            Value::Boolean(v) => self.bool(*v),
            Value::Integer(v) => self.integer(i64::from(*v)),
            Value::Short(v) => self.integer(i64::from(*v)),
            Value::UnsignedLong(v) => self.unsigned(u64::from(*v)),
            Value::Byte(v) => self.unsigned(u64::from(*v)),
            Value::Double(v) => self.double(*v),
            Value::String(v) => self.string(v),
            Value::ByteArray(v) => self.bytes(v),
        }
    }

    /// Writes a `"key": "value"` member.
    pub fn field_str(&mut self, key: &str, value: &str) -> &mut Self {
        self.key(key).string(value)
    }

    /// Writes a `"key": true|false` member.
    pub fn field_bool(&mut self, key: &str, value: bool) -> &mut Self {
        self.key(key).bool(value)
    }

    /// Returns the text written so far.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    /// Consumes the writer and returns the serialized text.
    #[must_use]
    pub fn finish(self) -> String {
        self.buffer
    }

    fn separator(&mut self) {
        if self.after_key {
            self.after_key = false;
            return;
        }

        if let Some(first) = self.first.last_mut() {
            if *first {
                *first = false;
            } else {
                self.buffer.push(',');
            }
        }
    }

    fn escaped(&mut self, value: &str) {
        self.buffer.push('"');
        for c in value.chars() {
            match c {
                '"' => self.buffer.push_str("\\\""),
                '\\' => self.buffer.push_str("\\\\"),
                '\u{08}' => self.buffer.push_str("\\b"),
                '\u{0C}' => self.buffer.push_str("\\f"),
                '\n' => self.buffer.push_str("\\n"),
                '\r' => self.buffer.push_str("\\r"),
                '\t' => self.buffer.push_str("\\t"),
                c if u32::from(c) < 0x20 => {
                    let _ = write!(self.buffer, "\\u{:04x}", u32::from(c));
                }
                c => self.buffer.push(c),
            }
        }
        self.buffer.push('"');
    }
}
