//! Streaming JSON codec.
//!
//! The writer produces payloads incrementally into an owned buffer. The
//! parser consumes one byte at a time with bounded memory, either building
//! a [`JsonValue`] tree or writing the members of a document straight into
//! the properties of a [`crate::device::PropertySet`].

mod parser;
mod value;
mod writer;

pub use parser::{JsonParser, MAX_DEPTH, MAX_TOKEN_LENGTH, State, parse, parse_into};
pub use value::{JsonObject, JsonValue};
pub use writer::JsonWriter;
