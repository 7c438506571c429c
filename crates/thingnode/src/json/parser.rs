use alloc::string::String;
use alloc::vec::Vec;

use log::{debug, warn};

use crate::device::PropertySet;
use crate::property::Property;
use crate::value::ValueKind;

use super::value::{JsonObject, JsonValue};

/// Maximum length, in bytes, of a single string or number token.
pub const MAX_TOKEN_LENGTH: usize = 256;

/// Maximum nesting depth of containers.
pub const MAX_DEPTH: usize = 16;

/// The states of the streaming parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Nothing but whitespace has been read.
    StartDocument,
    /// Inside an object, expecting a key or its end.
    InObject,
    /// After a key, expecting `:`.
    EndKey,
    /// After `:`, expecting a value.
    AfterKey,
    /// Inside an array, expecting a value or its end.
    InArray,
    /// Inside a string.
    InString,
    /// After a `\` inside a string.
    StartEscape,
    /// Inside the four hexadecimal digits of a `\u` escape.
    UnicodeEscape,
    /// Inside a number.
    InNumber,
    /// Inside a `true` literal.
    InTrue,
    /// Inside a `false` literal.
    InFalse,
    /// Inside a `null` literal.
    InNull,
    /// After a value, expecting `,` or the end of the container.
    AfterValue,
    /// The top-level container has been closed.
    Done,
    /// A malformed byte has been met. Every following byte is ignored.
    Failed,
}

enum Children {
    Object(JsonObject),
    Array(Vec<JsonValue>),
}

struct Frame {
    children: Children,
    // Key under which this container is stored in its parent object.
    key_in_parent: Option<String>,
    current_key: Option<String>,
    // Raw scalar elements of an array, collected in property-directed mode.
    elements: Vec<String>,
    // Whether the array holds something other than scalars.
    nested: bool,
}

impl Frame {
    fn new(object: bool, key_in_parent: Option<String>) -> Self {
        Self {
            children: if object {
                Children::Object(JsonObject::default())
            } else {
                Children::Array(Vec::new())
            },
            key_in_parent,
            current_key: None,
            elements: Vec::new(),
            nested: false,
        }
    }

    const fn is_object(&self) -> bool {
        matches!(self.children, Children::Object(_))
    }

    fn push(&mut self, key: Option<String>, value: JsonValue) {
        match (&mut self.children, key) {
            (Children::Object(members), Some(key)) => {
                let _ = members.insert(key, value);
            }
            (Children::Array(values), _) => values.push(value),
            (Children::Object(_), None) => {}
        }
    }
}

enum Literal {
    String(String),
    Number(String),
    True,
    False,
    Null,
}

impl Literal {
    fn raw(&self) -> Option<&str> {
        match self {
            Self::String(raw) | Self::Number(raw) => Some(raw),
            Self::True => Some("true"),
            Self::False => Some("false"),
            Self::Null => None,
        }
    }

    fn into_value(self) -> Option<JsonValue> {
        Some(match self {
            Self::String(text) => JsonValue::String(text),
            Self::Number(raw) => JsonValue::Number(raw.parse().ok()?),
            Self::True => JsonValue::Bool(true),
            Self::False => JsonValue::Bool(false),
            Self::Null => JsonValue::Null,
        })
    }
}

// Where completed values go.
enum Target<'a> {
    Tree,
    // The properties, and the filter of those which may be written.
    Properties(&'a mut PropertySet, &'a dyn Fn(&Property) -> bool),
}

/// A single-pass, byte-at-a-time JSON parser.
///
/// The parser never backtracks and keeps at most one token of
/// [`MAX_TOKEN_LENGTH`] bytes. It runs in one of two modes, chosen per fed
/// byte:
///
/// - tree mode ([`JsonParser::feed`]) collects every value into a
///   [`JsonValue`] returned by [`JsonParser::finish`]
/// - property-directed mode ([`JsonParser::feed_properties`]) applies each
///   scalar member `"id": literal` to the property `id` of a
///   [`PropertySet`], without building any tree. A member
///   `"id": [length, byte, ...]` is applied to a byte-array property.
///
/// Malformed input moves the parser into [`State::Failed`]. Properties
/// already written before the malformed byte keep their new value.
pub struct JsonParser {
    state: State,
    stack: Vec<Frame>,
    token: Vec<u8>,
    key_string: bool,
    unicode: u32,
    unicode_digits: u8,
    root: Option<JsonValue>,
    last_updated: Option<String>,
    updates: usize,
}

impl Default for JsonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonParser {
    /// Creates a [`JsonParser`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: State::StartDocument,
            stack: Vec::new(),
            token: Vec::new(),
            key_string: false,
            unicode: 0,
            unicode_digits: 0,
            root: None,
            last_updated: None,
            updates: 0,
        }
    }

    /// Returns the current [`State`].
    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// Whether the top-level container has been closed.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self.state, State::Done)
    }

    /// Returns the identifier of the last property whose write has been
    /// accepted in property-directed mode.
    ///
    /// A write of the current value is accepted too, even if it leaves the
    /// property unchanged.
    #[must_use]
    pub fn last_updated(&self) -> Option<&str> {
        self.last_updated.as_deref()
    }

    /// Returns how many property writes have been accepted, unchanged
    /// values included.
    #[must_use]
    pub const fn updates(&self) -> usize {
        self.updates
    }

    /// Feeds a byte in tree mode.
    pub fn feed(&mut self, byte: u8) {
        self.step(byte, &mut Target::Tree);
    }

    /// Feeds a byte in property-directed mode.
    ///
    /// Only the properties for which `accept` returns `true` are written.
    pub fn feed_properties(
        &mut self,
        byte: u8,
        properties: &mut PropertySet,
        accept: &dyn Fn(&Property) -> bool,
    ) {
        self.step(byte, &mut Target::Properties(properties, accept));
    }

    /// Consumes the parser and returns the top-level container, if it has
    /// been completely parsed.
    #[must_use]
    pub fn finish(self) -> Option<JsonValue> {
        if self.is_done() { self.root } else { None }
    }

    fn step(&mut self, byte: u8, target: &mut Target<'_>) {
        match self.state {
            State::StartDocument => match byte {
                b'{' => self.start_container(true),
                b'[' => self.start_container(false),
                byte if is_whitespace(byte) => {}
                byte => self.fail(byte),
            },
            State::InObject => match byte {
                b'"' => self.start_string(true),
                b'}' => self.end_container(true, target),
                byte if is_whitespace(byte) => {}
                byte => self.fail(byte),
            },
            State::EndKey => match byte {
                b':' => self.state = State::AfterKey,
                byte if is_whitespace(byte) => {}
                byte => self.fail(byte),
            },
            State::AfterKey => {
                if !is_whitespace(byte) {
                    self.start_value(byte);
                }
            }
            State::InArray => match byte {
                b']' => self.end_container(false, target),
                byte if is_whitespace(byte) => {}
                byte => self.start_value(byte),
            },
            State::InString => match byte {
                b'"' => self.end_string(target),
                b'\\' => self.state = State::StartEscape,
                byte if byte < 0x20 => self.fail(byte),
                byte => self.push_token(byte),
            },
            State::StartEscape => {
                let unescaped = match byte {
                    b'"' => b'"',
                    b'\\' => b'\\',
                    b'/' => b'/',
                    b'b' => 0x08,
                    b'f' => 0x0C,
                    b'n' => b'\n',
                    b'r' => b'\r',
                    b't' => b'\t',
                    b'u' => {
                        self.unicode = 0;
                        self.unicode_digits = 0;
                        self.state = State::UnicodeEscape;
                        return;
                    }
                    byte => return self.fail(byte),
                };
                self.state = State::InString;
                self.push_token(unescaped);
            }
            State::UnicodeEscape => {
                let Some(digit) = char::from(byte).to_digit(16) else {
                    return self.fail(byte);
                };
                self.unicode = (self.unicode << 4) | digit;
                self.unicode_digits += 1;
                if self.unicode_digits == 4 {
                    self.state = State::InString;
                    // Only ASCII code points are decoded, surrogate halves
                    // included.
                    let decoded = u8::try_from(self.unicode)
                        .ok()
                        .filter(u8::is_ascii)
                        .unwrap_or(b' ');
                    self.push_token(decoded);
                }
            }
            State::InNumber => {
                if matches!(byte, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E') {
                    self.push_token(byte);
                } else {
                    self.end_number(target);
                    if self.state != State::Failed {
                        self.step(byte, target);
                    }
                }
            }
            State::InTrue => self.literal(byte, b"true", target),
            State::InFalse => self.literal(byte, b"false", target),
            State::InNull => self.literal(byte, b"null", target),
            State::AfterValue => match byte {
                b',' => {
                    self.state = if self.stack.last().is_some_and(Frame::is_object) {
                        State::InObject
                    } else {
                        State::InArray
                    };
                }
                b'}' => self.end_container(true, target),
                b']' => self.end_container(false, target),
                byte if is_whitespace(byte) => {}
                byte => self.fail(byte),
            },
            State::Done | State::Failed => {}
        }
    }

    fn start_value(&mut self, byte: u8) {
        match byte {
            b'"' => self.start_string(false),
            b'{' => self.start_container(true),
            b'[' => self.start_container(false),
            b'-' | b'0'..=b'9' => self.start_token(byte, State::InNumber),
            b't' => self.start_token(byte, State::InTrue),
            b'f' => self.start_token(byte, State::InFalse),
            b'n' => self.start_token(byte, State::InNull),
            byte => self.fail(byte),
        }
    }

    fn start_token(&mut self, byte: u8, state: State) {
        self.token.clear();
        self.token.push(byte);
        self.state = state;
    }

    fn start_string(&mut self, key: bool) {
        self.token.clear();
        self.key_string = key;
        self.state = State::InString;
    }

    fn push_token(&mut self, byte: u8) {
        if self.token.len() >= MAX_TOKEN_LENGTH {
            warn!("JSON token exceeds {MAX_TOKEN_LENGTH} bytes");
            self.state = State::Failed;
            return;
        }
        self.token.push(byte);
    }

    fn start_container(&mut self, object: bool) {
        if self.stack.len() >= MAX_DEPTH {
            warn!("JSON nesting exceeds {MAX_DEPTH} levels");
            self.state = State::Failed;
            return;
        }

        let key_in_parent = self
            .stack
            .last_mut()
            .and_then(|frame| frame.current_key.take());
        self.stack.push(Frame::new(object, key_in_parent));
        self.state = if object {
            State::InObject
        } else {
            State::InArray
        };
    }

    fn end_container(&mut self, object: bool, target: &mut Target<'_>) {
        let Some(frame) = self.stack.pop() else {
            return self.fail(if object { b'}' } else { b']' });
        };

        if frame.is_object() != object {
            return self.fail(if object { b'}' } else { b']' });
        }

        let Frame {
            children,
            key_in_parent,
            elements,
            nested,
            ..
        } = frame;

        if let Target::Properties(properties, accept) = target {
            if let Some(key) = &key_in_parent
                && !object
                && !nested
            {
                self.apply_bytes(key, &elements, properties, *accept);
            }
            if let Some(parent) = self.stack.last_mut() {
                parent.nested = true;
            }
        }

        let value = match children {
            Children::Object(members) => JsonValue::Object(members),
            Children::Array(values) => JsonValue::Array(values),
        };

        match self.stack.last_mut() {
            None => {
                self.root = Some(value);
                self.state = State::Done;
            }
            Some(parent) => {
                if matches!(target, Target::Tree) {
                    parent.push(key_in_parent, value);
                }
                self.state = State::AfterValue;
            }
        }
    }

    fn end_string(&mut self, target: &mut Target<'_>) {
        let Ok(text) = String::from_utf8(core::mem::take(&mut self.token)) else {
            warn!("JSON string is not valid UTF-8");
            self.state = State::Failed;
            return;
        };

        if self.key_string {
            if let Some(frame) = self.stack.last_mut() {
                frame.current_key = Some(text);
            }
            self.state = State::EndKey;
        } else {
            self.complete(Literal::String(text), target);
        }
    }

    fn end_number(&mut self, target: &mut Target<'_>) {
        // Number tokens only contain ASCII bytes.
        let raw = String::from_utf8_lossy(&self.token).into_owned();
        self.token.clear();
        self.complete(Literal::Number(raw), target);
    }

    fn literal(&mut self, byte: u8, expected: &[u8], target: &mut Target<'_>) {
        self.push_token(byte);
        let length = self.token.len();
        if length > expected.len() || self.token[..] != expected[..length] {
            return self.fail(byte);
        }

        if length == expected.len() {
            let literal = match expected[0] {
                b't' => Literal::True,
                b'f' => Literal::False,
                _ => Literal::Null,
            };
            self.complete(literal, target);
        }
    }

    fn complete(&mut self, literal: Literal, target: &mut Target<'_>) {
        let key = self
            .stack
            .last_mut()
            .and_then(|frame| frame.current_key.take());

        match target {
            Target::Properties(properties, accept) => match (key, literal.raw()) {
                (Some(key), Some(raw)) => self.apply(key, raw, properties, *accept),
                (None, raw) => {
                    if let Some(frame) = self.stack.last_mut() {
                        match raw {
                            Some(raw) => frame.elements.push(raw.into()),
                            None => frame.nested = true,
                        }
                    }
                }
                (Some(_), None) => {}
            },
            Target::Tree => {
                let Some(value) = literal.into_value() else {
                    warn!("Malformed JSON number");
                    self.state = State::Failed;
                    return;
                };
                if let Some(frame) = self.stack.last_mut() {
                    frame.push(key, value);
                }
            }
        }

        self.state = State::AfterValue;
    }

    fn apply(
        &mut self,
        key: String,
        raw: &str,
        properties: &mut PropertySet,
        accept: &dyn Fn(&Property) -> bool,
    ) {
        match properties.get_mut(&key) {
            Some(property) if accept(property) => {
                if property.parse_from_text(raw).is_accepted() {
                    self.updates += 1;
                    self.last_updated = Some(key);
                }
            }
            Some(_) => debug!("Property `{key}` cannot be written here"),
            None => debug!("No property `{key}` to apply"),
        }
    }

    fn apply_bytes(
        &mut self,
        key: &str,
        elements: &[String],
        properties: &mut PropertySet,
        accept: &dyn Fn(&Property) -> bool,
    ) {
        let is_byte_array = properties
            .get(key)
            .is_some_and(|property| property.kind() == ValueKind::ByteArray);
        if !is_byte_array {
            debug!("No byte-array property `{key}` to apply");
            return;
        }

        let raw = alloc::format!("[{}]", elements.join(","));
        self.apply(key.into(), &raw, properties, accept);
    }

    fn fail(&mut self, byte: u8) {
        warn!(
            "Unexpected byte `{}` in JSON parser state {:?}",
            char::from(byte).escape_default(),
            self.state
        );
        self.state = State::Failed;
    }
}

const fn is_whitespace(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b'\r')
}

/// Parses a complete document in tree mode.
///
/// Returns `None` when the input is malformed or incomplete.
#[must_use]
pub fn parse(bytes: &[u8]) -> Option<JsonValue> {
    let mut parser = JsonParser::new();
    for &byte in bytes {
        parser.feed(byte);
    }

    if !parser.is_done() {
        warn!("Incomplete JSON document, parser stopped in {:?}", parser.state);
    }
    parser.finish()
}

/// Parses a document in property-directed mode.
///
/// Every `"id": literal` member is applied to the property `id`, if any and
/// if `accept` returns `true` for it. Returns the last property whose write
/// has been accepted, a write of its current value included. Other
/// properties may have been written before it.
pub fn parse_into<'a>(
    bytes: &[u8],
    properties: &'a mut PropertySet,
    accept: impl Fn(&Property) -> bool,
) -> Option<&'a mut Property> {
    let mut parser = JsonParser::new();
    for &byte in bytes {
        parser.feed_properties(byte, properties, &accept);
    }

    if !parser.is_done() {
        warn!(
            "Incomplete JSON document, {} writes already applied",
            parser.updates
        );
    }

    let id = parser.last_updated?;
    properties.get_mut(&id)
}

#[cfg(test)]
mod tests {
    use alloc::string::String;

    use alloc::vec;
    use alloc::vec::Vec;

    use super::{JsonParser, MAX_TOKEN_LENGTH, State, parse, parse_into};
    use crate::device::PropertySet;
    use crate::json::{JsonValue, JsonWriter};
    use crate::property::{Property, Visibility};
    use crate::value::Value;

    fn any(_: &Property) -> bool {
        true
    }

    fn final_state(input: &str) -> State {
        let mut parser = JsonParser::new();
        for &byte in input.as_bytes() {
            parser.feed(byte);
        }
        parser.state()
    }

    #[test]
    fn test_transitions() {
        let table = [
            ("", State::StartDocument),
            (" \n", State::StartDocument),
            ("{", State::InObject),
            (r#"{"a""#, State::EndKey),
            (r#"{"a":"#, State::AfterKey),
            (r#"{"a":"x"#, State::InString),
            (r#"{"a":"\"#, State::StartEscape),
            (r#"{"a":"\u00"#, State::UnicodeEscape),
            (r#"{"a":12"#, State::InNumber),
            (r#"{"a":tr"#, State::InTrue),
            (r#"{"a":fa"#, State::InFalse),
            (r#"{"a":nu"#, State::InNull),
            (r#"{"a":"x""#, State::AfterValue),
            (r#"{"a":1,"#, State::InObject),
            ("[", State::InArray),
            ("[1,", State::InArray),
            ("[true", State::AfterValue),
            ("{}", State::Done),
            ("[ ]", State::Done),
            (r#"{"a":{"b":[1,2.5e3,-4]}}"#, State::Done),
            ("x", State::Failed),
            (r#"{"a" 1"#, State::Failed),
            (r#"{"a":tx"#, State::Failed),
            (r#"{"a":"\q"#, State::Failed),
            (r#"{"a":"\u00zz"#, State::Failed),
            ("[1}", State::Failed),
            ("{]", State::Failed),
            ("{\"a\":\"\n\"}", State::Failed),
        ];

        for (input, expected) in table {
            assert_eq!(final_state(input), expected, "input: {input:?}");
        }
    }

    #[test]
    fn test_failed_parser_ignores_input() {
        let mut parser = JsonParser::new();
        for &byte in b"x{}" {
            parser.feed(byte);
        }
        assert_eq!(parser.state(), State::Failed);
        assert_eq!(parser.finish(), None);
    }

    #[test]
    fn test_tree() {
        let value = parse(br#"{"power":true,"brightness":80,"mode":"heat","rgb":[255,0,10],"extra":{"x":null}}"#)
            .unwrap();

        assert_eq!(value.get("power").and_then(JsonValue::as_bool), Some(true));
        assert_eq!(
            value.get("brightness").and_then(JsonValue::as_f64),
            Some(80.)
        );
        assert_eq!(value.get("mode").and_then(JsonValue::as_str), Some("heat"));
        assert_eq!(
            value.get("rgb").and_then(JsonValue::as_array).map(<[_]>::len),
            Some(3)
        );
        assert!(
            value
                .get("extra")
                .and_then(|extra| extra.get("x"))
                .is_some_and(JsonValue::is_null)
        );

        let keys: alloc::vec::Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(keys, ["power", "brightness", "mode", "rgb", "extra"]);
    }

    #[test]
    fn test_tree_matches_serde() {
        let input = r#"{"a":[1.5,{"b":"c\"d"}],"e":-2.5,"f":false}"#;
        let value = parse(input.as_bytes()).unwrap();

        let ours = serde_json::to_value(&value).unwrap();
        let theirs: serde_json::Value = serde_json::from_str(input).unwrap();
        assert_eq!(ours, theirs);
    }

    #[test]
    fn test_duplicate_keys_keep_last() {
        let value = parse(br#"{"a":1,"b":2,"a":3}"#).unwrap();
        assert_eq!(value.get("a").and_then(JsonValue::as_f64), Some(3.));
        assert_eq!(value.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_escapes() {
        let value = parse(br#"["\"\\\/\b\f\n\r\t", "\u0041\u00e9", "\ud83d\ude00"]"#).unwrap();
        let strings = value.as_array().unwrap();
        assert_eq!(strings[0].as_str(), Some("\"\\/\u{08}\u{0C}\n\r\t"));
        // Code points above 0x7F degrade to a space.
        assert_eq!(strings[1].as_str(), Some("A "));
        assert_eq!(strings[2].as_str(), Some("  "));
    }

    #[test]
    fn test_utf8_passthrough() {
        let value = parse("[\"caffè\"]".as_bytes()).unwrap();
        assert_eq!(value.as_array().unwrap()[0].as_str(), Some("caffè"));
    }

    #[test]
    fn test_bounds() {
        let mut long = String::from("[\"");
        for _ in 0..=super::MAX_TOKEN_LENGTH {
            long.push('a');
        }
        long.push_str("\"]");
        assert_eq!(parse(long.as_bytes()), None);

        let mut deep = String::new();
        for _ in 0..=super::MAX_DEPTH {
            deep.push('[');
        }
        assert_eq!(final_state(&deep), State::Failed);
    }

    #[test]
    fn test_malformed_tree() {
        assert_eq!(parse(br#"{"a":1"#), None);
        assert_eq!(parse(br#"{"a":1-}"#), None);
        assert_eq!(parse(b"42"), None);
    }

    fn light() -> PropertySet {
        let mut properties = PropertySet::new();
        let _ = properties.add(Property::on_off("power", "Power").with_value(false));
        let _ = properties.add(Property::brightness("brightness", "Brightness").with_value(100));
        let _ = properties.add(
            Property::string("mode", "Mode", 8)
                .enum_value("off")
                .enum_value("heat")
                .with_value("off"),
        );
        let _ = properties.add(Property::level("temperature", "Temperature", "degree celsius"));
        properties
    }

    #[test]
    fn test_property_directed() {
        let mut properties = light();

        let last = parse_into(br#"{"power":true,"brightness":80}"#, &mut properties, any)
            .map(|property| String::from(property.id()));
        assert_eq!(last.as_deref(), Some("brightness"));

        assert!(properties.get_mut("power").unwrap().get::<bool>());
        assert_eq!(properties.get_mut("brightness").unwrap().get::<i32>(), 80);
    }

    #[test]
    fn test_property_directed_skips_rejected() {
        let mut properties = light();

        let mut parser = JsonParser::new();
        for &byte in br#"{"brightness":"55","unknown":1,"mode":"warm","temperature":30,"power":null}"# {
            parser.feed_properties(byte, &mut properties, &any);
        }

        assert!(parser.is_done());
        assert_eq!(parser.updates(), 1);
        assert_eq!(parser.last_updated(), Some("brightness"));
        assert_eq!(properties.get_mut("brightness").unwrap().get::<i32>(), 55);
        assert_eq!(properties.get_mut("mode").unwrap().get::<String>(), "off");
        assert!(properties.get("temperature").unwrap().is_null());
        assert!(!properties.get_mut("power").unwrap().get::<bool>());
    }

    #[test]
    fn test_property_directed_best_effort() {
        let mut properties = light();

        // The malformed byte stops the parse after `power` has been written.
        let last = parse_into(br#"{"power":true,"brightness":x80}"#, &mut properties, any)
            .map(|property| String::from(property.id()));

        assert_eq!(last.as_deref(), Some("power"));
        assert!(properties.get_mut("power").unwrap().get::<bool>());
        assert_eq!(properties.get_mut("brightness").unwrap().get::<i32>(), 100);
    }

    #[test]
    fn test_property_directed_nested_keys() {
        let mut properties = light();

        let _ = parse_into(
            br#"{"light":{"brightness":10},"list":[{"power":true}]}"#,
            &mut properties,
            any,
        );

        assert_eq!(properties.get_mut("brightness").unwrap().get::<i32>(), 10);
        assert!(properties.get_mut("power").unwrap().get::<bool>());
    }

    #[test]
    fn test_unchanged_write_is_accepted() {
        let mut properties = light();

        let mut parser = JsonParser::new();
        for &byte in br#"{"brightness":100}"# {
            parser.feed_properties(byte, &mut properties, &any);
        }

        assert_eq!(parser.updates(), 1);
        assert_eq!(parser.last_updated(), Some("brightness"));
        assert!(!properties.get("brightness").unwrap().is_changed());
    }

    #[test]
    fn test_property_directed_filter() {
        let mut properties = light();
        let _ = properties.add(
            Property::integer("raw", "Raw")
                .visibility(Visibility::Mqtt)
                .with_value(7),
        );

        let http = |property: &Property| property.get_visibility().is_http_visible();
        let last = parse_into(br#"{"raw":99,"power":true}"#, &mut properties, http)
            .map(|property| String::from(property.id()));

        assert_eq!(last.as_deref(), Some("power"));
        assert_eq!(properties.get_mut("raw").unwrap().get::<i32>(), 7);
        assert!(properties.get_mut("power").unwrap().get::<bool>());
    }

    #[test]
    fn test_property_directed_bytes() {
        let mut properties = light();
        let _ = properties.add(Property::byte_array("color", "Color", 3));

        let last = parse_into(br#"{"color":[3,255,128,0]}"#, &mut properties, any)
            .map(|property| String::from(property.id()));
        assert_eq!(last.as_deref(), Some("color"));
        assert_eq!(
            properties.get_mut("color").unwrap().get::<Vec<u8>>(),
            [255, 128, 0]
        );

        // Wrong prefixes, nested arrays and arrays aimed at scalar properties
        // are all refused.
        let input = br#"{"color":[2,1],"color":[[1],[2]],"brightness":[1,5],"mode":[1,2]}"#;
        assert!(parse_into(input, &mut properties, any).is_none());
        assert_eq!(
            properties.get_mut("color").unwrap().get::<Vec<u8>>(),
            [255, 128, 0]
        );
        assert_eq!(properties.get_mut("brightness").unwrap().get::<i32>(), 100);
        assert_eq!(properties.get_mut("mode").unwrap().get::<String>(), "off");
    }

    #[test]
    fn test_writer_round_trip() {
        let long_text = "x".repeat(MAX_TOKEN_LENGTH / 2);
        let values = [
            Value::Boolean(true),
            Value::Boolean(false),
            Value::Integer(i32::MIN),
            Value::Integer(i32::MAX),
            Value::Short(i16::MIN),
            Value::UnsignedLong(u32::MAX),
            Value::Byte(u8::MAX),
            Value::Double(0.),
            Value::Double(-21.5),
            Value::Double(1e300),
            Value::Double(-1e-300),
            Value::Double(f64::MAX),
            Value::Double(f64::MIN_POSITIVE),
            Value::Double(5e-324),
            Value::String("quote \" slash \\ line\n tab\t bell \u{07}".into()),
            Value::String("caffè ☕ 日本".into()),
            Value::String(long_text),
            Value::ByteArray(vec![0, 1, 128, 255]),
            Value::ByteArray(Vec::new()),
        ];

        for value in values {
            let max_length = u8::MAX;
            let mut source = Property::new("v", "V", value.kind()).max_length(max_length);
            assert!(source.set(value.clone()).is_accepted());

            let mut json = JsonWriter::new();
            let _ = json.begin_object();
            source.to_value(&mut json, true);
            let _ = json.end_object();
            let text = json.finish();

            let mut properties = PropertySet::new();
            let _ = properties.add(Property::new("v", "V", value.kind()).max_length(max_length));
            assert!(
                parse_into(text.as_bytes(), &mut properties, any).is_some(),
                "{text} was not applied"
            );

            let parsed = properties.get("v").and_then(Property::value).cloned();
            assert_eq!(parsed, Some(value), "{text}");

            // The tree mode reads the same text.
            assert!(parse(text.as_bytes()).is_some(), "{text}");
        }
    }
}
