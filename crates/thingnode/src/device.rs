use alloc::boxed::Box;
use alloc::format;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;

use core::cell::Cell;

use hashbrown::DefaultHashBuilder;
use indexmap::IndexMap;

use log::warn;

use crate::json::{self, JsonWriter};
use crate::property::Property;

/// The context announced in every device structure.
pub const THING_CONTEXT: &str = "https://webthings.io/schemas";

/// An insertion-ordered collection of [`Property`], indexed by identifier.
#[derive(Debug, Default)]
pub struct PropertySet(IndexMap<String, Property, DefaultHashBuilder>);

impl PropertySet {
    /// Creates an empty [`PropertySet`].
    #[must_use]
    pub fn new() -> Self {
        Self(IndexMap::with_hasher(DefaultHashBuilder::default()))
    }

    /// Adds a [`Property`].
    ///
    /// Returns `false`, leaving the set untouched, if a property with the
    /// same identifier already exists.
    pub fn add(&mut self, property: Property) -> bool {
        if self.0.contains_key(property.id()) {
            warn!("Property `{}` already exists", property.id());
            return false;
        }
        let _ = self.0.insert(property.id().into(), property);
        true
    }

    /// Returns the [`Property`] with the given identifier.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Property> {
        self.0.get(id)
    }

    /// Returns the [`Property`] with the given identifier, mutably.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Property> {
        self.0.get_mut(id)
    }

    /// Iterates over the properties in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.0.values()
    }

    /// Iterates mutably over the properties in insertion order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Property> {
        self.0.values_mut()
    }

    /// Returns the number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether every property served over `HTTP` has been read at least
    /// once by an external client.
    #[must_use]
    pub fn all_requested(&self) -> bool {
        self.iter()
            .filter(|property| property.get_visibility().is_http_visible())
            .all(Property::is_requested)
    }

    /// Applies a JSON object to the properties accepted by `filter`.
    ///
    /// Returns the last property whose value has been accepted.
    pub fn parse_json(
        &mut self,
        payload: &[u8],
        filter: impl Fn(&Property) -> bool,
    ) -> Option<&mut Property> {
        json::parse_into(payload, self, filter)
    }

    /// Writes a `{"id": value, ...}` object made of the properties
    /// accepted by `filter`.
    pub fn write_values(&mut self, json: &mut JsonWriter, filter: impl Fn(&Property) -> bool) {
        let _ = json.begin_object();
        for property in self.iter_mut().filter(|property| filter(property)) {
            property.to_value(json, true);
        }
        let _ = json.end_object();
    }
}

/// How a device publishes its state on the broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PublishMode {
    /// One JSON object containing every visible property.
    #[default]
    Combined,
    /// One message per changed and visible property.
    PerProperty,
}

/// Device-specific behavior plugged into a [`Device`].
///
/// Every method has a default, so a handler only overrides what it needs.
pub trait DeviceHandler {
    /// Whether the device state is complete enough to be published.
    fn is_state_complete(&mut self, _device: &mut Device) -> bool {
        true
    }

    /// Gracefully powers the device down before deep sleep.
    ///
    /// Returning `false` vetoes the sleep for this cycle.
    fn off(&mut self, _device: &mut Device) -> bool {
        true
    }

    /// Handles a broker message whose sub-topic is neither the state nor
    /// the set topic.
    fn on_message(&mut self, _device: &mut Device, _sub_topic: &str, _payload: &[u8]) {}

    /// Called on every engine tick.
    fn tick(&mut self, _device: &mut Device, _now: u64) {}
}

/// A named group of properties.
pub struct Device {
    id: String,
    title: String,
    description: Option<String>,
    types: Vec<String>,
    properties: PropertySet,
    notify_interval: u64,
    last_notify: Option<u64>,
    publish_mode: PublishMode,
    deep_sleep: Option<u32>,
    sleep_requested: bool,
    // Raised by any property change.
    signal: Rc<Cell<bool>>,
    handler: Option<Box<dyn DeviceHandler>>,
}

impl core::fmt::Debug for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("properties", &self.properties)
            .field("notify_interval", &self.notify_interval)
            .field("last_notify", &self.last_notify)
            .field("publish_mode", &self.publish_mode)
            .field("deep_sleep", &self.deep_sleep)
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Creates a [`Device`] without properties.
    ///
    /// The state is published at most once per minute by default.
    #[must_use]
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            types: Vec::new(),
            properties: PropertySet::new(),
            notify_interval: 60_000,
            last_notify: None,
            publish_mode: PublishMode::Combined,
            deep_sleep: None,
            sleep_requested: false,
            signal: Rc::new(Cell::new(false)),
            handler: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a semantic type, i.e. `Light`.
    #[must_use]
    pub fn at_type(mut self, at_type: &str) -> Self {
        self.types.push(at_type.into());
        self
    }

    /// Sets the publication interval in milliseconds.
    ///
    /// With an interval of `0`, the state is only published when a
    /// property changes.
    #[must_use]
    pub fn notify_interval(mut self, milliseconds: u64) -> Self {
        self.notify_interval = milliseconds;
        self
    }

    /// Sets the [`PublishMode`].
    #[must_use]
    pub fn publish_mode(mut self, publish_mode: PublishMode) -> Self {
        self.publish_mode = publish_mode;
        self
    }

    /// Puts the device into deep sleep for `seconds` after its state has
    /// been published.
    #[must_use]
    pub fn deep_sleep(mut self, seconds: u32) -> Self {
        self.deep_sleep = Some(seconds);
        self
    }

    /// Sets the [`DeviceHandler`].
    #[must_use]
    pub fn handler(mut self, handler: impl DeviceHandler + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Adds a [`Property`] to the device.
    ///
    /// Returns `false` if a property with the same identifier exists.
    pub fn add_property(&mut self, mut property: Property) -> bool {
        property.attach_device_signal(self.signal.clone());
        self.properties.add(property)
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

    /// Returns the properties.
    #[must_use]
    pub const fn properties(&self) -> &PropertySet {
        &self.properties
    }

    /// Returns the properties, mutably.
    pub const fn properties_mut(&mut self) -> &mut PropertySet {
        &mut self.properties
    }

    /// Returns the [`Property`] with the given identifier.
    #[must_use]
    pub fn property(&self, id: &str) -> Option<&Property> {
        self.properties.get(id)
    }

    /// Returns the [`Property`] with the given identifier, mutably.
    pub fn property_mut(&mut self, id: &str) -> Option<&mut Property> {
        self.properties.get_mut(id)
    }

    /// Returns the [`PublishMode`].
    #[must_use]
    pub const fn get_publish_mode(&self) -> PublishMode {
        self.publish_mode
    }

    /// Returns the deep sleep duration in seconds, if configured.
    #[must_use]
    pub const fn deep_sleep_seconds(&self) -> Option<u32> {
        self.deep_sleep
    }

    /// Whether the device has been flagged for deep sleep.
    #[must_use]
    pub const fn is_sleep_requested(&self) -> bool {
        self.sleep_requested
    }

    pub(crate) const fn request_sleep(&mut self) {
        self.sleep_requested = true;
    }

    pub(crate) const fn clear_sleep_request(&mut self) {
        self.sleep_requested = false;
    }

    // Publishes the state on the next tick.
    pub(crate) fn mark_due(&self) {
        self.signal.set(true);
    }

    /// Whether the state should be published at `now`.
    ///
    /// A device is due when it has never been published, when one of its
    /// properties has changed or when its interval has elapsed.
    #[must_use]
    pub fn is_due(&self, now: u64) -> bool {
        match self.last_notify {
            None => true,
            Some(_) if self.signal.get() => true,
            Some(last) => {
                self.notify_interval > 0 && now.saturating_sub(last) >= self.notify_interval
            }
        }
    }

    /// Records a publication at `now` and clears every changed flag.
    pub fn mark_notified(&mut self, now: u64) {
        self.last_notify = Some(now);
        self.signal.set(false);
        for property in self.properties.iter_mut() {
            property.clear_changed();
        }
    }

    /// Applies a JSON object to the properties accepted by `filter`,
    /// usually those visible on the surface the payload came from.
    ///
    /// Returns the last property whose value has been accepted.
    pub fn parse_json(
        &mut self,
        payload: &[u8],
        filter: impl Fn(&Property) -> bool,
    ) -> Option<&mut Property> {
        self.properties.parse_json(payload, filter)
    }

    /// Whether the [`DeviceHandler`] reports a complete state.
    pub fn is_state_complete(&mut self) -> bool {
        self.with_handler(true, |handler, device| handler.is_state_complete(device))
    }

    /// Asks the [`DeviceHandler`] to power the device down.
    pub fn off(&mut self) -> bool {
        self.with_handler(true, |handler, device| handler.off(device))
    }

    /// Forwards an unrouted broker message to the [`DeviceHandler`].
    pub fn on_message(&mut self, sub_topic: &str, payload: &[u8]) {
        self.with_handler((), |handler, device| {
            handler.on_message(device, sub_topic, payload);
        });
    }

    /// Runs the [`DeviceHandler`] tick.
    pub fn tick(&mut self, now: u64) {
        self.with_handler((), |handler, device| handler.tick(device, now));
    }

    /// Writes the device description.
    pub fn to_structure(&self, json: &mut JsonWriter) {
        let href = format!("/things/{}", self.id);
        let _ = json
            .begin_object()
            .field_str("@context", THING_CONTEXT)
            .key("@type")
            .begin_array();
        for at_type in &self.types {
            let _ = json.string(at_type);
        }
        let _ = json
            .end_array()
            .field_str("id", &self.id)
            .field_str("title", &self.title);
        if let Some(description) = &self.description {
            let _ = json.field_str("description", description);
        }
        let _ = json.field_str("href", &href).key("properties").begin_object();

        let properties_href = format!("{href}/properties");
        for property in self
            .properties
            .iter()
            .filter(|property| property.get_visibility().is_http_visible())
        {
            property.to_structure(json, &properties_href);
        }
        let _ = json.end_object().end_object();
    }

    fn with_handler<R>(
        &mut self,
        default: R,
        f: impl FnOnce(&mut dyn DeviceHandler, &mut Self) -> R,
    ) -> R {
        let Some(mut handler) = self.handler.take() else {
            return default;
        };
        let result = f(handler.as_mut(), self);
        if self.handler.is_none() {
            self.handler = Some(handler);
        }
        result
    }
}
