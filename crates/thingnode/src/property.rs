use alloc::boxed::Box;
use alloc::format;
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use core::cell::Cell;
use core::fmt;

use log::debug;

use crate::json::JsonWriter;
use crate::value::{FromValue, Value, ValueKind};

/// Where a property is exposed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Visibility {
    /// Exposed over both the broker and `HTTP`.
    #[default]
    All,
    /// Never exposed.
    None,
    /// Only exposed over the broker.
    Mqtt,
    /// Only exposed over `HTTP`.
    Http,
}

impl Visibility {
    /// Whether the property is published on broker topics.
    #[must_use]
    pub const fn is_mqtt_visible(self) -> bool {
        matches!(self, Self::All | Self::Mqtt)
    }

    /// Whether the property is served by the `HTTP` surface.
    #[must_use]
    pub const fn is_http_visible(self) -> bool {
        matches!(self, Self::All | Self::Http)
    }
}

/// The outcome of a write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    /// The value has been refused: kind mismatch, read-only property,
    /// unparsable text or value outside the enum whitelist.
    Rejected,
    /// The value has been accepted but equals the current one.
    Unchanged,
    /// The value has been stored.
    Changed,
}

impl Update {
    /// Whether the write has been accepted.
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

/// An observer of property changes.
///
/// Listeners run synchronously on the stack of the write which changed the
/// property, so they must be fast. A listener receives the property by
/// shared reference and therefore cannot write it back.
///
/// A listener referring to an object which may be destroyed before the
/// property must hold a [`alloc::rc::Weak`] reference to it.
pub trait PropertyListener {
    /// Called after the value of `property` has changed.
    fn on_property_changed(&mut self, property: &Property);
}

impl<F: FnMut(&Property)> PropertyListener for F {
    fn on_property_changed(&mut self, property: &Property) {
        self(property);
    }
}

/// Identifier of a registered [`PropertyListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u32);

type Hook = Box<dyn FnMut(&mut Property)>;

/// A named, typed and observable datum.
///
/// The [`ValueKind`] of a property is fixed at construction: every write of
/// a different kind is ignored.
pub struct Property {
    id: String,
    title: String,
    kind: ValueKind,
    value: Value,
    null: bool,
    read_only: bool,
    changed: bool,
    requested: bool,
    visibility: Visibility,
    unit: Option<String>,
    multiple_of: Option<f64>,
    minimum: Option<f64>,
    maximum: Option<f64>,
    at_type: Option<String>,
    max_length: u8,
    enums: Vec<Value>,
    listeners: Vec<(ListenerId, Box<dyn PropertyListener>)>,
    next_listener: u32,
    value_changed: Option<Hook>,
    value_requested: Option<Hook>,
    device_signal: Option<Rc<Cell<bool>>>,
    // Reentrancy guards.
    notifying: bool,
    requesting: bool,
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("value", &self.value)
            .field("null", &self.null)
            .field("read_only", &self.read_only)
            .field("changed", &self.changed)
            .field("requested", &self.requested)
            .field("visibility", &self.visibility)
            .finish_non_exhaustive()
    }
}

impl Property {
    /// Creates a null [`Property`] of the given [`ValueKind`].
    ///
    /// Variable-length kinds get a maximum length of 32 bytes, see
    /// [`Self::max_length`].
    #[must_use]
    pub fn new(id: &str, title: &str, kind: ValueKind) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            kind,
            value: Value::default_for(kind),
            null: true,
            read_only: false,
            changed: false,
            requested: false,
            visibility: Visibility::All,
            unit: None,
            multiple_of: None,
            minimum: None,
            maximum: None,
            at_type: None,
            max_length: if kind.is_variable() { 32 } else { 0 },
            enums: Vec::new(),
            listeners: Vec::new(),
            next_listener: 0,
            value_changed: None,
            value_requested: None,
            device_signal: None,
            notifying: false,
            requesting: false,
        }
    }

    /// Creates a boolean [`Property`].
    #[must_use]
    pub fn boolean(id: &str, title: &str) -> Self {
        Self::new(id, title, ValueKind::Boolean)
    }

    /// Creates an `i32` [`Property`].
    #[must_use]
    pub fn integer(id: &str, title: &str) -> Self {
        Self::new(id, title, ValueKind::Integer)
    }

    /// Creates an `i16` [`Property`].
    #[must_use]
    pub fn short(id: &str, title: &str) -> Self {
        Self::new(id, title, ValueKind::Short)
    }

    /// Creates an `u32` [`Property`].
    #[must_use]
    pub fn unsigned_long(id: &str, title: &str) -> Self {
        Self::new(id, title, ValueKind::UnsignedLong)
    }

    /// Creates an `u8` [`Property`].
    #[must_use]
    pub fn byte(id: &str, title: &str) -> Self {
        Self::new(id, title, ValueKind::Byte)
    }

    /// Creates an `f64` [`Property`].
    #[must_use]
    pub fn double(id: &str, title: &str) -> Self {
        Self::new(id, title, ValueKind::Double)
    }

    /// Creates a text [`Property`] holding at most `max_length` bytes.
    #[must_use]
    pub fn string(id: &str, title: &str, max_length: u8) -> Self {
        Self::new(id, title, ValueKind::String).max_length(max_length)
    }

    /// Creates a bytes [`Property`] holding at most `max_length` bytes.
    #[must_use]
    pub fn byte_array(id: &str, title: &str, max_length: u8) -> Self {
        Self::new(id, title, ValueKind::ByteArray).max_length(max_length)
    }

    /// Creates an on/off switch.
    #[must_use]
    pub fn on_off(id: &str, title: &str) -> Self {
        Self::boolean(id, title).at_type("OnOffProperty")
    }

    /// Creates a brightness property expressed in percent.
    #[must_use]
    pub fn brightness(id: &str, title: &str) -> Self {
        Self::integer(id, title)
            .at_type("BrightnessProperty")
            .unit("percent")
            .range(0., 100.)
            .multiple_of(1.)
    }

    /// Creates a read-only level, such as a temperature reading.
    #[must_use]
    pub fn level(id: &str, title: &str, unit: &str) -> Self {
        Self::double(id, title)
            .at_type("LevelProperty")
            .unit(unit)
            .multiple_of(0.1)
            .read_only()
    }

    /// Sets the initial value.
    #[must_use]
    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        let _ = self.set(value);
        self
    }

    /// Marks the property as read-only for external clients.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Sets the [`Visibility`].
    #[must_use]
    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Sets the unit.
    #[must_use]
    pub fn unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Sets the step size.
    #[must_use]
    pub fn multiple_of(mut self, step: f64) -> Self {
        self.multiple_of = Some(step);
        self
    }

    /// Sets the range announced in the property structure.
    #[must_use]
    pub fn range(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    /// Sets the semantic type tag, i.e. `OnOffProperty`.
    #[must_use]
    pub fn at_type(mut self, at_type: &str) -> Self {
        self.at_type = Some(at_type.into());
        self
    }

    /// Sets the maximum length, in bytes, of a variable-length value.
    ///
    /// Longer values are truncated.
    #[must_use]
    pub fn max_length(mut self, max_length: u8) -> Self {
        if self.kind.is_variable() {
            self.max_length = max_length;
        }
        self
    }

    /// Adds an allowed literal to the enum whitelist.
    #[must_use]
    pub fn enum_value(mut self, value: impl Into<Value>) -> Self {
        self.add_enum(value);
        self
    }

    /// Appends an allowed literal to the enum whitelist.
    ///
    /// Once the whitelist is non-empty, text properties refuse every value
    /// which is not part of it.
    pub fn add_enum(&mut self, value: impl Into<Value>) {
        let value = value.into();
        if value.kind() == self.kind {
            self.enums.push(value);
        }
    }

    /// Returns the identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Returns the [`ValueKind`].
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Whether no value has ever been set.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.null
    }

    /// Whether external clients are prevented from writing this property.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether the value differs from the last published one.
    #[must_use]
    pub const fn is_changed(&self) -> bool {
        self.changed
    }

    /// Whether an external client has ever read this property.
    #[must_use]
    pub const fn is_requested(&self) -> bool {
        self.requested
    }

    /// Returns the [`Visibility`].
    #[must_use]
    pub const fn get_visibility(&self) -> Visibility {
        self.visibility
    }

    /// Returns the maximum length of a variable-length value.
    #[must_use]
    pub const fn get_max_length(&self) -> u8 {
        self.max_length
    }

    /// Returns the enum whitelist.
    #[must_use]
    pub fn enums(&self) -> &[Value] {
        &self.enums
    }

    /// Returns the current value without triggering the value requested
    /// callback, or `None` if the property is null.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        (!self.null).then_some(&self.value)
    }

    /// Returns a copy of the current value without triggering the value
    /// requested callback.
    ///
    /// The default of `T` is returned when the property is null or of a
    /// different kind.
    #[must_use]
    pub fn peek<T: FromValue + Default>(&self) -> T {
        if self.null {
            return T::default();
        }
        T::from_value(&self.value).unwrap_or_default()
    }

    /// Returns a copy of the current value.
    ///
    /// The value requested callback runs first, so a sensor can refresh
    /// itself lazily. The default of `T` is returned when the property is
    /// null or of a different kind.
    pub fn get<T: FromValue + Default>(&mut self) -> T {
        self.refresh();
        self.peek()
    }

    /// Sets the value.
    ///
    /// This is the internal write path: read-only properties accept it.
    /// Listeners are notified when the value changes.
    pub fn set(&mut self, value: impl Into<Value>) -> Update {
        self.store(value.into())
    }

    /// Parses a text and writes the resulting value.
    ///
    /// This is the external write path used by the codec and the network
    /// surfaces: read-only properties silently refuse it.
    pub fn parse_from_text(&mut self, text: &str) -> Update {
        if self.read_only {
            debug!("Refusing write of read-only property `{}`", self.id);
            return Update::Rejected;
        }

        match Value::parse(self.kind, text) {
            Some(value) => self.store(value),
            None => {
                debug!("Unable to parse `{text}` for property `{}`", self.id);
                Update::Rejected
            }
        }
    }

    /// Marks the property as read by an external client.
    pub const fn mark_requested(&mut self) {
        self.requested = true;
    }

    /// Clears the changed flag, usually after publication.
    pub const fn clear_changed(&mut self) {
        self.changed = false;
    }

    /// Registers a [`PropertyListener`].
    pub fn add_listener(&mut self, listener: impl PropertyListener + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener = self.next_listener.wrapping_add(1);
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Removes a [`PropertyListener`].
    ///
    /// Returns `false` if no listener with this identifier exists.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        before != self.listeners.len()
    }

    /// Installs the hook run before the listeners whenever the value
    /// changes.
    ///
    /// The hook may write the property, for example to keep a derived
    /// encoding in sync, without notifying the listeners again.
    pub fn on_value_changed(&mut self, hook: impl FnMut(&mut Property) + 'static) {
        self.value_changed = Some(Box::new(hook));
    }

    /// Installs the callback run before each [`Self::get`].
    ///
    /// Writes performed by the callback never notify the listeners.
    pub fn on_value_requested(&mut self, callback: impl FnMut(&mut Property) + 'static) {
        self.value_requested = Some(Box::new(callback));
    }

    // Loads a persisted value without marking the property as changed and
    // without notifications.
    pub(crate) fn load(&mut self, value: Value) {
        if value.kind() == self.kind {
            self.value = self.bounded(value);
            self.null = false;
        }
    }

    pub(crate) fn attach_device_signal(&mut self, signal: Rc<Cell<bool>>) {
        self.device_signal = Some(signal);
    }

    /// Writes the value, either bare or as an `"id": value` member of the
    /// currently open object.
    pub fn to_value(&mut self, json: &mut JsonWriter, with_id: bool) {
        self.refresh();
        if with_id {
            let _ = json.key(&self.id);
        }
        if self.null {
            let _ = json.null();
        } else {
            let _ = json.value(&self.value);
        }
    }

    /// Writes the `"id": { ... }` description of the property into the
    /// currently open object.
    ///
    /// `href` is the path of the resource serving the property value.
    pub fn to_structure(&self, json: &mut JsonWriter, href: &str) {
        let _ = json
            .key(&self.id)
            .begin_object()
            .field_str("title", &self.title)
            .field_str("type", self.kind.as_type())
            .field_bool("readOnly", self.read_only);

        if let Some(unit) = &self.unit {
            let _ = json.field_str("unit", unit);
        }
        if let Some(step) = self.multiple_of {
            let _ = json.key("multipleOf").double(step);
        }
        if let Some(minimum) = self.minimum {
            let _ = json.key("minimum").double(minimum);
        }
        if let Some(maximum) = self.maximum {
            let _ = json.key("maximum").double(maximum);
        }
        if self.kind.is_variable() {
            let _ = json
                .key("maxLength")
                .unsigned(u64::from(self.max_length));
        }
        if !self.enums.is_empty() {
            let _ = json.key("enum").begin_array();
            for value in &self.enums {
                let _ = json.value(value);
            }
            let _ = json.end_array();
        }
        if let Some(at_type) = &self.at_type {
            let _ = json.field_str("@type", at_type);
        }

        let _ = json
            .field_str("href", &format!("{href}/{}", self.id))
            .end_object();
    }

    fn store(&mut self, value: Value) -> Update {
        if value.kind() != self.kind {
            debug!(
                "Ignoring {:?} value for {:?} property `{}`",
                value.kind(),
                self.kind,
                self.id
            );
            return Update::Rejected;
        }

        if self.kind == ValueKind::String
            && !self.enums.is_empty()
            && !self.enums.contains(&value)
        {
            debug!("Value `{value}` is not allowed for property `{}`", self.id);
            return Update::Rejected;
        }

        let value = self.bounded(value);
        if !self.null && self.value.approx_eq(&value) {
            return Update::Unchanged;
        }

        self.value = value;
        self.null = false;
        self.changed = true;

        if !self.notifying && !self.requesting {
            self.notify();
        }

        Update::Changed
    }

    fn bounded(&self, value: Value) -> Value {
        let max_length = usize::from(self.max_length);
        match value {
            Value::String(text) if text.len() > max_length => {
                let mut end = max_length;
                while !text.is_char_boundary(end) {
                    end -= 1;
                }
                Value::String(text[..end].to_string())
            }
            Value::ByteArray(mut bytes) if bytes.len() > max_length => {
                bytes.truncate(max_length);
                Value::ByteArray(bytes)
            }
            value => value,
        }
    }

    fn notify(&mut self) {
        self.notifying = true;

        if let Some(mut hook) = self.value_changed.take() {
            hook(self);
            if self.value_changed.is_none() {
                self.value_changed = Some(hook);
            }
        }

        let mut listeners = core::mem::take(&mut self.listeners);
        for (_, listener) in &mut listeners {
            listener.on_property_changed(self);
        }
        self.listeners = listeners;

        if let Some(signal) = &self.device_signal {
            signal.set(true);
        }

        self.notifying = false;
    }

    fn refresh(&mut self) {
        if self.requesting {
            return;
        }

        if let Some(mut callback) = self.value_requested.take() {
            self.requesting = true;
            callback(self);
            self.requesting = false;
            if self.value_requested.is_none() {
                self.value_requested = Some(callback);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use alloc::string::String;
    use alloc::vec::Vec;

    use core::cell::{Cell, RefCell};

    use super::{Property, Update, Visibility};
    use crate::json::JsonWriter;
    use crate::value::Value;

    fn counter(property: &mut Property) -> Rc<Cell<u32>> {
        let count = Rc::new(Cell::new(0));
        let listener_count = count.clone();
        let _ = property.add_listener(move |_: &Property| {
            listener_count.set(listener_count.get() + 1);
        });
        count
    }

    #[test]
    fn test_set_notifies_on_change_only() {
        let mut power = Property::on_off("power", "Power");
        let count = counter(&mut power);

        assert!(power.is_null());
        assert_eq!(power.set(false), Update::Changed);
        assert!(!power.is_null());
        assert!(power.is_changed());
        assert_eq!(count.get(), 1);

        assert_eq!(power.set(false), Update::Unchanged);
        assert_eq!(count.get(), 1);

        assert_eq!(power.set(true), Update::Changed);
        assert_eq!(count.get(), 2);
        assert!(power.get::<bool>());
    }

    #[test]
    fn test_kind_mismatch_is_ignored() {
        let mut brightness = Property::brightness("brightness", "Brightness").with_value(100);
        let count = counter(&mut brightness);

        assert_eq!(brightness.set(true), Update::Rejected);
        assert_eq!(brightness.set(80.0), Update::Rejected);
        assert_eq!(brightness.get::<i32>(), 100);
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_double_epsilon() {
        let mut temperature = Property::double("temperature", "Temperature").with_value(21.5);
        let count = counter(&mut temperature);

        assert_eq!(temperature.set(21.505), Update::Unchanged);
        assert_eq!(count.get(), 0);
        assert_eq!(temperature.set(21.6), Update::Changed);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_enum_rejection() {
        let mut mode = Property::string("mode", "Mode", 8)
            .enum_value("off")
            .enum_value("heat")
            .enum_value("cool")
            .with_value("off");
        let count = counter(&mut mode);

        assert_eq!(mode.set("warm"), Update::Rejected);
        assert_eq!(mode.parse_from_text("warm"), Update::Rejected);
        assert_eq!(mode.get::<String>(), "off");
        assert_eq!(count.get(), 0);

        assert_eq!(mode.parse_from_text("heat"), Update::Changed);
        assert_eq!(mode.get::<String>(), "heat");
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_read_only_refuses_external_writes() {
        let mut temperature = Property::level("temperature", "Temperature", "degree celsius");
        assert!(temperature.is_read_only());

        assert_eq!(temperature.parse_from_text("25"), Update::Rejected);
        assert!(temperature.is_null());

        assert_eq!(temperature.set(25.0), Update::Changed);
        assert!((temperature.get::<f64>() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_get_default_when_null() {
        let mut name = Property::string("name", "Name", 16);
        assert_eq!(name.get::<String>(), "");
        assert_eq!(name.value(), None);
        // Wrong type requested.
        let mut power = Property::boolean("power", "Power").with_value(true);
        assert_eq!(power.get::<i32>(), 0);
    }

    #[test]
    fn test_string_truncated_on_char_boundary() {
        let mut name = Property::string("name", "Name", 4);
        let _ = name.set("caffè");
        // `è` takes two bytes and does not fit.
        assert_eq!(name.get::<String>(), "caff");

        let mut raw = Property::byte_array("raw", "Raw", 2);
        let _ = raw.set(alloc::vec![1u8, 2, 3]);
        assert_eq!(raw.get::<Vec<u8>>(), [1, 2]);
    }

    #[test]
    fn test_listeners_order_and_removal() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut power = Property::boolean("power", "Power");

        let hook_calls = calls.clone();
        power.on_value_changed(move |_| hook_calls.borrow_mut().push("hook"));
        let first_calls = calls.clone();
        let first = power.add_listener(move |_: &Property| first_calls.borrow_mut().push("first"));
        let second_calls = calls.clone();
        let _ = power.add_listener(move |_: &Property| second_calls.borrow_mut().push("second"));

        let _ = power.set(true);
        assert_eq!(*calls.borrow(), ["hook", "first", "second"]);

        assert!(power.remove_listener(first));
        assert!(!power.remove_listener(first));
        calls.borrow_mut().clear();
        let _ = power.set(false);
        assert_eq!(*calls.borrow(), ["hook", "second"]);
    }

    #[test]
    fn test_hook_write_does_not_reenter() {
        let mut level = Property::integer("level", "Level");
        let count = counter(&mut level);

        // Clamp the value from within the hook.
        level.on_value_changed(|property| {
            if property.peek::<i32>() > 100 {
                let _ = property.set(100);
            }
        });

        assert_eq!(level.set(250), Update::Changed);
        assert_eq!(level.get::<i32>(), 100);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_requested_callback_does_not_notify() {
        let mut temperature = Property::double("temperature", "Temperature");
        let count = counter(&mut temperature);

        let reading = Rc::new(Cell::new(19.5));
        let sensor = reading.clone();
        temperature.on_value_requested(move |property| {
            let _ = property.set(sensor.get());
        });

        assert!((temperature.get::<f64>() - 19.5).abs() < f64::EPSILON);
        reading.set(20.5);
        assert!((temperature.get::<f64>() - 20.5).abs() < f64::EPSILON);
        assert!(temperature.is_changed());
        assert_eq!(count.get(), 0);

        // Peeking never refreshes.
        reading.set(30.0);
        assert!((temperature.peek::<f64>() - 20.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_device_signal() {
        let signal = Rc::new(Cell::new(false));
        let mut power = Property::boolean("power", "Power");
        power.attach_device_signal(signal.clone());

        let _ = power.set(true);
        assert!(signal.get());
    }

    #[test]
    fn test_load_is_silent() {
        let mut name = Property::string("name", "Name", 8).with_value("default");
        name.clear_changed();
        let count = counter(&mut name);

        name.load(Value::String("stored".into()));
        assert_eq!(name.get::<String>(), "stored");
        assert!(!name.is_changed());
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_visibility() {
        assert!(Visibility::All.is_mqtt_visible());
        assert!(Visibility::All.is_http_visible());
        assert!(!Visibility::Http.is_mqtt_visible());
        assert!(!Visibility::Mqtt.is_http_visible());
        assert!(!Visibility::None.is_http_visible());
    }

    #[test]
    fn test_to_value() {
        let mut brightness = Property::brightness("brightness", "Brightness").with_value(80);

        let mut json = JsonWriter::new();
        brightness.to_value(&mut json, false);
        assert_eq!(json.finish(), "80");

        let mut json = JsonWriter::new();
        let _ = json.begin_object();
        brightness.to_value(&mut json, true);
        let _ = json.end_object();
        assert_eq!(json.finish(), r#"{"brightness":80}"#);

        let mut json = JsonWriter::new();
        Property::string("name", "Name", 8).to_value(&mut json, false);
        assert_eq!(json.finish(), "null");
    }

    #[test]
    fn test_to_structure() {
        let mode = Property::string("mode", "Mode", 8)
            .enum_value("off")
            .enum_value("heat");

        let mut json = JsonWriter::new();
        let _ = json.begin_object();
        mode.to_structure(&mut json, "/things/thermostat/properties");
        let _ = json.end_object();

        let structure: serde_json::Value = serde_json::from_str(&json.finish()).unwrap();
        assert_eq!(
            structure,
            serde_json::json!({
                "mode": {
                    "title": "Mode",
                    "type": "string",
                    "readOnly": false,
                    "maxLength": 8,
                    "enum": ["off", "heat"],
                    "href": "/things/thermostat/properties/mode"
                }
            })
        );
    }
}
