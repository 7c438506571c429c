use alloc::string::String;

use log::warn;

use crate::device::PropertySet;
use crate::error::Result;
use crate::json::JsonWriter;
use crate::property::{Property, Visibility};
use crate::settings::{SettingsGroup, SettingsStore, Storage};

// Wireless join retry interval in milliseconds.
const RETRY_INTERVAL: u64 = 10_000;
// Join attempts before falling back to the access point.
const MAX_JOIN_ATTEMPTS: u32 = 10;
// Bounded wait of the first join, in milliseconds.
const JOIN_WAIT: u64 = 5_000;
const JOIN_POLL: u32 = 100;
// Minimum delay between two broker connection attempts, in milliseconds.
const BROKER_COOLDOWN: u64 = 5_000;
const HTTP_PORT: u16 = 80;
// Broker messages and HTTP requests handled per tick.
const MAX_MESSAGES_PER_TICK: usize = 8;

/// Timing and identity constants of the synchronization engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConfig {
    pub(crate) retry_interval: u64,
    pub(crate) max_join_attempts: u32,
    pub(crate) join_wait: u64,
    pub(crate) join_poll: u32,
    pub(crate) broker_cooldown: u64,
    pub(crate) http_port: u16,
    pub(crate) max_messages_per_tick: usize,
    pub(crate) firmware_version: &'static str,
    pub(crate) access_point_prefix: &'static str,
    pub(crate) force_access_point: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkConfig {
    /// Creates a [`NetworkConfig`] with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            retry_interval: RETRY_INTERVAL,
            max_join_attempts: MAX_JOIN_ATTEMPTS,
            join_wait: JOIN_WAIT,
            join_poll: JOIN_POLL,
            broker_cooldown: BROKER_COOLDOWN,
            http_port: HTTP_PORT,
            max_messages_per_tick: MAX_MESSAGES_PER_TICK,
            firmware_version: "0.1.0",
            access_point_prefix: "thing",
            force_access_point: false,
        }
    }

    /// Sets the delay between two join attempts, in milliseconds.
    #[must_use]
    pub const fn retry_interval(mut self, milliseconds: u64) -> Self {
        self.retry_interval = milliseconds;
        self
    }

    /// Sets the number of join attempts before falling back to the
    /// access point.
    #[must_use]
    pub const fn max_join_attempts(mut self, attempts: u32) -> Self {
        self.max_join_attempts = attempts;
        self
    }

    /// Sets the bound of the initial join wait and its polling period, in
    /// milliseconds.
    #[must_use]
    pub const fn join_wait(mut self, milliseconds: u64, poll: u32) -> Self {
        self.join_wait = milliseconds;
        self.join_poll = poll;
        self
    }

    /// Sets the minimum delay between two broker connection attempts, in
    /// milliseconds.
    #[must_use]
    pub const fn broker_cooldown(mut self, milliseconds: u64) -> Self {
        self.broker_cooldown = milliseconds;
        self
    }

    /// Sets the `HTTP` port.
    #[must_use]
    pub const fn http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }

    /// Sets how many broker messages and `HTTP` requests are handled per
    /// tick.
    #[must_use]
    pub const fn max_messages_per_tick(mut self, messages: usize) -> Self {
        self.max_messages_per_tick = messages;
        self
    }

    /// Sets the firmware version.
    #[must_use]
    pub const fn firmware_version(mut self, version: &'static str) -> Self {
        self.firmware_version = version;
        self
    }

    /// Sets the prefix of the access point name.
    #[must_use]
    pub const fn access_point_prefix(mut self, prefix: &'static str) -> Self {
        self.access_point_prefix = prefix;
        self
    }

    /// Starts in configuration mode: the saved network is ignored and the
    /// access point is hosted at once.
    #[must_use]
    pub const fn force_access_point(mut self) -> Self {
        self.force_access_point = true;
        self
    }

    /// Returns the `HTTP` port.
    #[must_use]
    pub const fn get_http_port(&self) -> u16 {
        self.http_port
    }

    /// Returns the firmware version.
    #[must_use]
    pub const fn get_firmware_version(&self) -> &'static str {
        self.firmware_version
    }
}

/// Identifier of the device name setting.
pub const IDX: &str = "idx";
/// Identifier of the wireless network name setting.
pub const SSID: &str = "ssid";
/// Identifier of the wireless password setting.
pub const PASSWORD: &str = "password";
/// Identifier of the broker host setting.
pub const MQTT_SERVER: &str = "mqttServer";
/// Identifier of the broker port setting.
pub const MQTT_PORT: &str = "mqttPort";
/// Identifier of the broker user setting.
pub const MQTT_USER: &str = "mqttUser";
/// Identifier of the broker password setting.
pub const MQTT_PASSWORD: &str = "mqttPassword";
/// Identifier of the base topic setting.
pub const MQTT_TOPIC: &str = "mqttTopic";
/// Identifier of the state topic name setting.
pub const STATE_TOPIC: &str = "stateTopic";
/// Identifier of the set topic name setting.
pub const SET_TOPIC: &str = "setTopic";
/// Identifier of the web-based discovery setting.
pub const SUPPORTING_WEBTHING: &str = "supportingWebThing";
/// Identifier of the broker support setting.
pub const SUPPORTING_MQTT: &str = "supportingMqtt";

const SECRETS: [&str; 2] = [PASSWORD, MQTT_PASSWORD];
const MASK: &str = "********";

/// The network configuration, persisted in the
/// [`SettingsGroup::Network`] group.
#[derive(Debug)]
pub struct NetworkSettings(PropertySet);

impl Default for NetworkSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkSettings {
    /// Creates the network settings with their default values.
    #[must_use]
    pub fn new() -> Self {
        let mut properties = PropertySet::new();
        for property in [
            Property::string(IDX, "Name", 32),
            Property::string(SSID, "Wifi network", 32),
            Property::string(PASSWORD, "Wifi password", 64),
            Property::string(MQTT_SERVER, "MQTT server", 32),
            Property::unsigned_long(MQTT_PORT, "MQTT port").with_value(1883u32),
            Property::string(MQTT_USER, "MQTT user", 32),
            Property::string(MQTT_PASSWORD, "MQTT password", 64),
            Property::string(MQTT_TOPIC, "MQTT topic", 64),
            Property::string(STATE_TOPIC, "State topic", 16).with_value("properties"),
            Property::string(SET_TOPIC, "Set topic", 16).with_value("set"),
            Property::boolean(SUPPORTING_WEBTHING, "Support web-based discovery").with_value(true),
            Property::boolean(SUPPORTING_MQTT, "Support MQTT").with_value(true),
        ] {
            let _ = properties.add(property.visibility(Visibility::None));
        }
        Self(properties)
    }

    /// Registers every setting in the [`SettingsGroup::Network`] group.
    ///
    /// Stored values replace the defaults when the group is present.
    ///
    /// # Errors
    ///
    /// Fails on the first setting which cannot be registered.
    pub fn register<S: Storage>(&mut self, store: &mut SettingsStore<S>) -> Result<()> {
        for property in self.0.iter_mut() {
            let _ = store.register(property, SettingsGroup::Network)?;
        }
        Ok(())
    }

    /// Returns the settings.
    #[must_use]
    pub const fn properties(&self) -> &PropertySet {
        &self.0
    }

    /// Returns the settings, mutably.
    pub const fn properties_mut(&mut self) -> &mut PropertySet {
        &mut self.0
    }

    /// Applies a JSON object to the settings.
    ///
    /// Returns how many settings have been accepted.
    pub fn apply_json(&mut self, payload: &[u8]) -> usize {
        let mut parser = crate::json::JsonParser::new();
        for &byte in payload {
            parser.feed_properties(byte, &mut self.0, &|_| true);
        }
        if !parser.is_done() {
            warn!("Malformed network settings, {} applied", parser.updates());
        }
        parser.updates()
    }

    /// Writes the settings as members of the currently open JSON object,
    /// with passwords masked.
    pub fn write_masked(&self, json: &mut JsonWriter) {
        for property in self.0.iter() {
            let _ = json.key(property.id());
            match property.value() {
                Some(_) if SECRETS.contains(&property.id()) => {
                    let _ = json.string(MASK);
                }
                Some(value) => {
                    let _ = json.value(value);
                }
                None => {
                    let _ = json.null();
                }
            }
        }
    }

    /// Sets the device name, if none is stored.
    pub fn default_idx(&mut self, idx: &str) {
        if self.idx().is_empty() {
            if let Some(property) = self.0.get_mut(IDX) {
                let _ = property.set(idx);
            }
        }
    }

    /// Returns the device name.
    #[must_use]
    pub fn idx(&self) -> String {
        self.text(IDX)
    }

    /// Returns the wireless network name.
    #[must_use]
    pub fn ssid(&self) -> String {
        self.text(SSID)
    }

    /// Returns the wireless password.
    #[must_use]
    pub fn password(&self) -> String {
        self.text(PASSWORD)
    }

    /// Whether a wireless network has been configured.
    #[must_use]
    pub fn has_network(&self) -> bool {
        !self.ssid().is_empty()
    }

    /// Returns the broker host.
    #[must_use]
    pub fn mqtt_server(&self) -> String {
        self.text(MQTT_SERVER)
    }

    /// Returns the broker port.
    #[must_use]
    pub fn mqtt_port(&self) -> u16 {
        let port = self.0.get(MQTT_PORT).map_or(0, Property::peek::<u32>);
        u16::try_from(port).unwrap_or_else(|_| {
            warn!("Invalid broker port {port}");
            0
        })
    }

    /// Returns the broker user and password, if a user is configured.
    #[must_use]
    pub fn mqtt_credentials(&self) -> Option<(String, String)> {
        let user = self.text(MQTT_USER);
        (!user.is_empty()).then(|| (user, self.text(MQTT_PASSWORD)))
    }

    /// Returns the base topic, which defaults to the device name.
    #[must_use]
    pub fn base_topic(&self) -> String {
        let topic = self.text(MQTT_TOPIC);
        if topic.is_empty() { self.idx() } else { topic }
    }

    /// Returns the name of the state sub-topic.
    #[must_use]
    pub fn state_topic(&self) -> String {
        self.text(STATE_TOPIC)
    }

    /// Returns the name of the set sub-topic.
    #[must_use]
    pub fn set_topic(&self) -> String {
        self.text(SET_TOPIC)
    }

    /// Whether web-based discovery is required.
    #[must_use]
    pub fn supports_webthing(&self) -> bool {
        self.flag(SUPPORTING_WEBTHING)
    }

    /// Whether the broker is enabled.
    #[must_use]
    pub fn supports_mqtt(&self) -> bool {
        self.flag(SUPPORTING_MQTT)
    }

    fn text(&self, id: &str) -> String {
        self.0.get(id).map(Property::peek::<String>).unwrap_or_default()
    }

    fn flag(&self, id: &str) -> bool {
        self.0.get(id).is_some_and(Property::peek::<bool>)
    }
}
