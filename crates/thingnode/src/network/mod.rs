//! The network synchronization engine.
//!
//! [`Network`] drives the wireless link, the broker connection and the
//! `HTTP` surface from a single cooperative [`Network::tick`], translating
//! inbound payloads into property writes and publishing device states.

/// Network configuration and the persisted network settings.
pub mod config;
/// The `HTTP` surface: requests, responses and routing.
pub mod http;
pub mod services;
/// Broker topic routing.
pub mod topic;

use alloc::format;
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use core::cell::RefCell;

use log::{debug, error, info, warn};

use crate::device::{Device, PublishMode};
use crate::error::{Error, ErrorKind, Result, UpdateError};
use crate::json::JsonWriter;
use crate::property::Property;
use crate::settings::{SettingsGroup, SettingsStore};

use config::{NetworkConfig, NetworkSettings};
use http::{Action, Response};
use services::{
    Board, BrokerClient, ConnectOptions, Discovery, InboundMessage, LastWill, Platform, Services,
    WebServer, WifiLink,
};
use topic::Route;

// Prefix of the discovery announcements.
const ANNOUNCE_PREFIX: &str = "devices";

/// The state of the wireless link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Not connected, waiting for the next join attempt.
    Idle,
    /// A join attempt is in progress.
    Joining,
    /// Connected to the configured network.
    Connected,
    /// Hosting the configuration access point.
    AccessPoint,
}

/// The synchronization engine.
///
/// The first added [`Device`] is the main device: its state carries the
/// device name and address, and its state topic receives the last will.
pub struct Network<B: Board> {
    services: Services<B>,
    config: NetworkConfig,
    settings: NetworkSettings,
    store: Rc<RefCell<SettingsStore<B::Storage>>>,
    devices: Vec<Device>,
    link: LinkState,
    join_attempts: u32,
    last_join: Option<u64>,
    last_broker_attempt: Option<u64>,
    // Whether the announcements of the current broker session are done.
    broker_session: bool,
    restart_requested: bool,
}

impl<B: Board> Network<B> {
    /// Creates a [`Network`].
    ///
    /// The network settings are registered with the settings store first,
    /// so they always occupy the beginning of the region.
    pub fn new(services: Services<B>, storage: B::Storage, config: NetworkConfig) -> Self {
        let mut store = SettingsStore::new(storage);
        let mut settings = NetworkSettings::new();
        if let Err(e) = settings.register(&mut store) {
            error!("Unable to register the network settings: {e}");
        }

        Self {
            services,
            config,
            settings,
            store: Rc::new(RefCell::new(store)),
            devices: Vec::new(),
            link: LinkState::Idle,
            join_attempts: 0,
            last_join: None,
            last_broker_attempt: None,
            broker_session: false,
            restart_requested: false,
        }
    }

    /// Adds a [`Device`].
    ///
    /// Returns `false` if a device with the same identifier exists.
    pub fn add_device(&mut self, device: Device) -> bool {
        if self.device(device.id()).is_some() {
            warn!("Device `{}` already exists", device.id());
            return false;
        }
        self.devices.push(device);
        true
    }

    /// Persists a device property in the [`SettingsGroup::Application`]
    /// group and saves it on every change.
    ///
    /// Returns the address of its record.
    ///
    /// # Errors
    ///
    /// Fails when the property does not exist or cannot be registered.
    pub fn persist(&mut self, device: &str, property: &str) -> Result<usize> {
        let target = self
            .devices
            .iter_mut()
            .find(|candidate| candidate.id() == device)
            .and_then(|device| device.property_mut(property))
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::Storage,
                    format!("No property `{property}` in device `{device}`"),
                )
            })?;

        let address = self
            .store
            .borrow_mut()
            .register(target, SettingsGroup::Application)?;
        let _ = SettingsStore::persist_on_change(&self.store, target);
        Ok(address)
    }

    /// Returns the devices.
    #[must_use]
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Returns a device.
    #[must_use]
    pub fn device(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|device| device.id() == id)
    }

    /// Returns a device, mutably.
    pub fn device_mut(&mut self, id: &str) -> Option<&mut Device> {
        self.devices.iter_mut().find(|device| device.id() == id)
    }

    /// Returns the network settings.
    #[must_use]
    pub const fn settings(&self) -> &NetworkSettings {
        &self.settings
    }

    /// Returns the network settings, mutably.
    pub const fn settings_mut(&mut self) -> &mut NetworkSettings {
        &mut self.settings
    }

    /// Returns the settings store.
    #[must_use]
    pub const fn store(&self) -> &Rc<RefCell<SettingsStore<B::Storage>>> {
        &self.store
    }

    /// Returns the services.
    #[must_use]
    pub const fn services(&self) -> &Services<B> {
        &self.services
    }

    /// Returns the services, mutably.
    pub const fn services_mut(&mut self) -> &mut Services<B> {
        &mut self.services
    }

    /// Returns the [`LinkState`].
    #[must_use]
    pub const fn link_state(&self) -> LinkState {
        self.link
    }

    /// Whether the broker session is established.
    #[must_use]
    pub const fn is_broker_connected(&self) -> bool {
        self.broker_session
    }

    /// Whether a restart has been scheduled.
    #[must_use]
    pub const fn is_restart_pending(&self) -> bool {
        self.restart_requested
    }

    /// Starts the engine.
    ///
    /// Without a saved network, or in configuration mode, the access point
    /// is hosted at once. Otherwise a first join is attempted and awaited
    /// for at most the configured bound. This is the only blocking call of
    /// the engine.
    pub fn begin(&mut self) {
        if let Some(main) = self.devices.first() {
            let idx = main.id().to_string();
            self.settings.default_idx(&idx);
        }

        self.save_application_defaults();

        if self.config.force_access_point || !self.settings.has_network() {
            info!("No network configured, starting configuration mode");
            self.open_access_point();
            return;
        }

        let now = self.services.platform.millis();
        self.join(now);

        let poll = self.config.join_poll.max(1);
        let mut waited = 0;
        while !self.services.wifi.is_connected() && waited < self.config.join_wait {
            self.services.platform.delay_ms(poll);
            waited += u64::from(poll);
        }

        if self.services.wifi.is_connected() {
            self.on_link_up();
        } else {
            info!("Network not joined after {waited} ms, retrying in the background");
        }
    }

    /// Runs one step of every state machine.
    ///
    /// `now` is a monotonic timestamp in milliseconds.
    pub fn tick(&mut self, now: u64) {
        self.update_link(now);
        self.update_broker(now);
        self.handle_messages(now);
        self.handle_requests();

        for device in &mut self.devices {
            device.tick(now);
        }

        self.publish_due(now);
        self.sleep();

        if self.restart_requested {
            self.restart_requested = false;
            info!("Restarting");
            self.services.platform.restart();
        }
    }

    /// Reports the outcome of a firmware update and schedules a restart.
    ///
    /// Returns the response for the client which uploaded the image.
    pub fn finish_firmware_update(
        &mut self,
        outcome: core::result::Result<(), UpdateError>,
    ) -> Response {
        self.restart_requested = true;
        match outcome {
            Ok(()) => {
                info!("Firmware update finished");
                let mut json = JsonWriter::new();
                let _ = json
                    .begin_object()
                    .field_bool("updated", true)
                    .end_object();
                Response::json(json.finish())
            }
            Err(e) => {
                error!("Firmware update failed: {e}");
                Response::error(e.as_str())
            }
        }
    }

    // The first boot writes the defaults, so that later incremental saves
    // are read back.
    fn save_application_defaults(&mut self) {
        let mut store = self.store.borrow_mut();
        let registered = store
            .entries()
            .iter()
            .any(|entry| entry.group() == SettingsGroup::Application);
        if !registered || store.is_present(SettingsGroup::Application) {
            return;
        }

        let properties = self.devices.iter().flat_map(|device| device.properties().iter());
        if let Err(e) = store.save_group(SettingsGroup::Application, properties) {
            warn!("Unable to save the application defaults: {e}");
        }
    }

    fn join(&mut self, now: u64) {
        self.join_attempts += 1;
        self.last_join = Some(now);
        self.link = LinkState::Joining;

        let ssid = self.settings.ssid();
        info!("Joining `{ssid}`, attempt {}", self.join_attempts);
        if let Err(e) = self.services.wifi.join(&ssid, &self.settings.password()) {
            warn!("Unable to join `{ssid}`: {e}");
        }
    }

    fn update_link(&mut self, now: u64) {
        if self.link == LinkState::AccessPoint {
            return;
        }

        if self.services.wifi.is_connected() {
            if self.link != LinkState::Connected {
                self.on_link_up();
            }
            return;
        }

        if self.link == LinkState::Connected {
            warn!("Wireless link lost");
            self.link = LinkState::Idle;
            self.broker_session = false;
            self.services.broker.disconnect();
        }

        let due = self
            .last_join
            .is_none_or(|last| now.saturating_sub(last) >= self.config.retry_interval);
        if !due {
            return;
        }

        if !self.settings.has_network() || self.join_attempts >= self.config.max_join_attempts {
            warn!("Unable to join after {} attempts", self.join_attempts);
            self.open_access_point();
        } else {
            self.join(now);
        }
    }

    fn on_link_up(&mut self) {
        self.link = LinkState::Connected;
        self.join_attempts = 0;
        info!(
            "Wireless link up, address {:?}",
            self.services.wifi.local_ip()
        );

        if self.settings.supports_webthing() {
            self.start_web();
        } else if self.services.web.is_running() {
            info!("Closing the configuration surface");
            self.services.web.stop();
        }

        let hostname = self.settings.idx();
        if let Err(e) = self
            .services
            .discovery
            .advertise(&hostname, self.config.http_port)
        {
            warn!("Unable to advertise `{hostname}`: {e}");
        }
    }

    fn open_access_point(&mut self) {
        if self.link == LinkState::AccessPoint {
            return;
        }

        let name = format!(
            "{}-{}",
            self.config.access_point_prefix,
            self.settings.idx()
        );
        info!("Hosting access point `{name}`");
        self.services.wifi.disconnect();
        if let Err(e) = self.services.wifi.start_access_point(&name) {
            error!("Unable to host access point `{name}`: {e}");
        }
        self.link = LinkState::AccessPoint;
        self.start_web();
    }

    fn start_web(&mut self) {
        if self.services.web.is_running() {
            return;
        }
        if let Err(e) = self.services.web.start(self.config.http_port) {
            error!("Unable to start the HTTP surface: {e}");
        }
    }

    fn update_broker(&mut self, now: u64) {
        if self.link != LinkState::Connected || !self.settings.supports_mqtt() {
            return;
        }

        if self.services.broker.is_connected() {
            if !self.broker_session {
                self.on_broker_connected();
            }
            return;
        }

        if self.broker_session {
            warn!("Broker connection lost");
            self.broker_session = false;
        }

        if self
            .last_broker_attempt
            .is_some_and(|last| now.saturating_sub(last) < self.config.broker_cooldown)
        {
            return;
        }
        self.last_broker_attempt = Some(now);

        let host = self.settings.mqtt_server();
        if host.is_empty() {
            debug!("No broker configured");
            self.start_web();
            return;
        }

        let options = ConnectOptions {
            host,
            port: self.settings.mqtt_port(),
            client_id: self.settings.idx(),
            credentials: self.settings.mqtt_credentials(),
            last_will: self.last_will(),
        };

        info!("Connecting to broker {}:{}", options.host, options.port);
        match self.services.broker.connect(&options) {
            Ok(()) => {
                if self.services.broker.is_connected() {
                    self.on_broker_connected();
                }
            }
            Err(e) => {
                warn!("Unable to connect to the broker: {e}");
                self.start_web();
            }
        }
    }

    fn last_will(&self) -> Option<LastWill> {
        let main = self.devices.first()?;
        let mut json = JsonWriter::new();
        self.write_presence(&mut json, false);
        let _ = json.end_object();

        Some(LastWill {
            topic: self.state_topic(main.id()),
            payload: json.finish(),
            retain: false,
        })
    }

    // Opens an object and writes the presence members of the main device.
    fn write_presence(&self, json: &mut JsonWriter, alive: bool) {
        let ip = self
            .services
            .wifi
            .local_ip()
            .map(|ip| ip.to_string())
            .unwrap_or_default();
        let _ = json
            .begin_object()
            .field_str("idx", &self.settings.idx())
            .field_str("ip", &ip)
            .field_bool("alive", alive);
    }

    fn on_broker_connected(&mut self) {
        info!("Broker connected");
        self.broker_session = true;

        let ip = self
            .services
            .wifi
            .local_ip()
            .map(|ip| ip.to_string())
            .unwrap_or_default();

        let mut announcements = Vec::with_capacity(self.devices.len());
        for device in &self.devices {
            let mut json = JsonWriter::new();
            let _ = json
                .begin_object()
                .field_str(
                    "url",
                    &format!(
                        "http://{ip}:{}/things/{}",
                        self.config.http_port,
                        device.id()
                    ),
                )
                .field_str("stateTopic", &self.state_topic(device.id()))
                .field_str("setTopic", &self.set_topic(device.id()))
                .end_object();
            announcements.push((
                format!("{ANNOUNCE_PREFIX}/{}", device.id()),
                json.finish(),
            ));
        }

        for (topic, payload) in announcements {
            if !self.send(&topic, payload.as_bytes(), true) {
                return;
            }
        }

        let filter = format!("{}/#", self.settings.base_topic());
        let subscriptions = self
            .services
            .broker
            .unsubscribe(&format!("{ANNOUNCE_PREFIX}/#"))
            .and_then(|()| self.services.broker.subscribe(&filter));
        if let Err(e) = subscriptions {
            warn!("Unable to subscribe to `{filter}`: {e}");
            self.drop_broker();
            return;
        }

        for device in &self.devices {
            device.mark_due();
        }
    }

    fn handle_messages(&mut self, now: u64) {
        if !self.broker_session {
            return;
        }

        for _ in 0..self.config.max_messages_per_tick {
            let Some(message) = self.services.broker.poll() else {
                break;
            };
            self.dispatch(&message, now);
        }
    }

    fn dispatch(&mut self, message: &InboundMessage, now: u64) {
        let base = self.settings.base_topic();
        let state = self.settings.state_topic();
        let set = self.settings.set_topic();

        let Some(route) = topic::route(&message.topic, &base, &state, &set) else {
            debug!("Ignoring message on `{}`", message.topic);
            return;
        };

        let device_id = match route {
            Route::State { device, .. } | Route::Set { device, .. } | Route::Other { device, .. } => {
                device
            }
        };
        let Some(index) = self
            .devices
            .iter()
            .position(|device| device.id() == device_id)
        else {
            debug!("No device `{device_id}`");
            return;
        };

        match route {
            // Non-empty payloads on state topics are publications.
            Route::State { .. } if !message.payload.is_empty() => {}
            Route::State { property: None, .. } => {
                if self.publish_combined(index) {
                    self.devices[index].mark_notified(now);
                }
            }
            Route::State {
                property: Some(property),
                ..
            } => {
                let _ = self.publish_property(index, property);
            }
            Route::Set { property: None, .. } => {
                if self.devices[index]
                    .parse_json(&message.payload, is_mqtt_visible)
                    .is_none()
                {
                    debug!("No property of `{device_id}` updated");
                }
            }
            Route::Set {
                property: Some(property),
                ..
            } => {
                let Ok(text) = core::str::from_utf8(&message.payload) else {
                    warn!("Payload for `{device_id}/{property}` is not text");
                    return;
                };
                match self.devices[index].property_mut(property) {
                    Some(target) if target.get_visibility().is_mqtt_visible() => {
                        let _ = target.parse_from_text(text);
                    }
                    _ => debug!("No property `{property}` in `{device_id}`"),
                }
            }
            Route::Other { sub_topic, .. } => {
                self.devices[index].on_message(sub_topic, &message.payload);
            }
        }
    }

    fn handle_requests(&mut self) {
        if !self.services.web.is_running() {
            return;
        }

        for _ in 0..self.config.max_messages_per_tick {
            let Some(request) = self.services.web.poll() else {
                break;
            };

            let (response, action) = http::handle(
                &request,
                &mut self.devices,
                &mut self.settings,
                self.config.firmware_version,
            );
            self.services.web.respond(request.id, response);

            match action {
                Action::None => {}
                Action::SaveNetwork => {
                    let saved = self
                        .store
                        .borrow_mut()
                        .save_group(SettingsGroup::Network, self.settings.properties().iter());
                    if let Err(e) = saved {
                        error!("Unable to save the network settings: {e}");
                    }
                    self.restart_requested = true;
                }
                Action::ResetAll => {
                    if let Err(e) = self.store.borrow_mut().reset_all() {
                        error!("Unable to reset the settings: {e}");
                    }
                    self.restart_requested = true;
                }
            }
        }
    }

    fn publish_due(&mut self, now: u64) {
        if !self.broker_session {
            return;
        }

        for index in 0..self.devices.len() {
            let device = &mut self.devices[index];
            if !device.is_due(now) || !device.is_state_complete() {
                continue;
            }

            let published = match device.get_publish_mode() {
                PublishMode::Combined => self.publish_combined(index),
                PublishMode::PerProperty => self.publish_changed(index),
            };
            if !published {
                return;
            }

            let supports_webthing = self.settings.supports_webthing();
            let device = &mut self.devices[index];
            device.mark_notified(now);

            if device.deep_sleep_seconds().is_some()
                && (!supports_webthing || device.properties().all_requested())
            {
                info!("Device `{}` ready to sleep", device.id());
                device.request_sleep();
            }
        }
    }

    fn publish_combined(&mut self, index: usize) -> bool {
        let mut json = JsonWriter::new();
        if index == 0 {
            self.write_presence(&mut json, true);
        } else {
            let _ = json.begin_object();
        }

        let device = &mut self.devices[index];
        for property in device
            .properties_mut()
            .iter_mut()
            .filter(|property| is_mqtt_visible(property))
        {
            property.to_value(&mut json, true);
        }
        let _ = json.end_object();

        let topic = self.state_topic(self.devices[index].id());
        self.send(&topic, json.finish().as_bytes(), false)
    }

    fn publish_changed(&mut self, index: usize) -> bool {
        let device = &mut self.devices[index];
        let device_id = device.id().to_string();

        let mut messages = Vec::new();
        for property in device
            .properties_mut()
            .iter_mut()
            .filter(|property| property.is_changed() && is_mqtt_visible(property))
        {
            let mut json = JsonWriter::new();
            property.to_value(&mut json, false);
            messages.push((String::from(property.id()), json.finish()));
        }

        let state_topic = self.state_topic(&device_id);
        messages.into_iter().all(|(property, payload)| {
            self.send(
                &format!("{state_topic}/{property}"),
                payload.as_bytes(),
                false,
            )
        })
    }

    fn publish_property(&mut self, index: usize, id: &str) -> bool {
        let device = &mut self.devices[index];
        let device_id = device.id().to_string();
        let Some(property) = device
            .property_mut(id)
            .filter(|property| is_mqtt_visible(property))
        else {
            debug!("No property `{id}` in `{device_id}`");
            return false;
        };

        let mut json = JsonWriter::new();
        property.to_value(&mut json, false);
        property.clear_changed();

        let topic = format!("{}/{id}", self.state_topic(&device_id));
        self.send(&topic, json.finish().as_bytes(), false)
    }

    fn send(&mut self, topic: &str, payload: &[u8], retain: bool) -> bool {
        match self.services.broker.publish(topic, payload, retain) {
            Ok(()) => true,
            Err(e) => {
                warn!("Unable to publish on `{topic}`: {e}");
                self.drop_broker();
                false
            }
        }
    }

    fn drop_broker(&mut self) {
        self.services.broker.disconnect();
        self.broker_session = false;
    }

    fn sleep(&mut self) {
        for device in &mut self.devices {
            if !device.is_sleep_requested() {
                continue;
            }

            device.clear_sleep_request();
            if device.off() {
                let seconds = device.deep_sleep_seconds().unwrap_or_default();
                info!("Device `{}` entering deep sleep for {seconds} s", device.id());
                self.services.platform.deep_sleep(seconds);
            } else {
                info!("Device `{}` vetoed deep sleep", device.id());
            }
        }
    }

    fn state_topic(&self, device: &str) -> String {
        format!(
            "{}/{device}/{}",
            self.settings.base_topic(),
            self.settings.state_topic()
        )
    }

    fn set_topic(&self, device: &str) -> String {
        format!(
            "{}/{device}/{}",
            self.settings.base_topic(),
            self.settings.set_topic()
        )
    }
}

fn is_mqtt_visible(property: &Property) -> bool {
    property.get_visibility().is_mqtt_visible()
}


#[cfg(test)]
mod tests {
    use alloc::collections::VecDeque;
    use alloc::rc::Rc;
    use alloc::string::String;
    use alloc::vec::Vec;

    use core::cell::RefCell;
    use core::net::{IpAddr, Ipv4Addr};

    use crate::device::{Device, DeviceHandler, PublishMode};
    use crate::error::{Error, ErrorKind, Result, UpdateError};
    use crate::property::{Property, Visibility};
    use crate::settings::{MemoryStorage, SettingsGroup};

    use super::config::NetworkConfig;
    use super::http::{Method, Request, RequestId, Response};
    use super::services::{
        Board, BrokerClient, ConnectOptions, Discovery, InboundMessage, Platform, Services,
        WebServer, WifiLink,
    };
    use super::{LinkState, Network};

    #[derive(Default)]
    struct FakeWifi {
        connected: bool,
        connect_on_join: bool,
        joins: u32,
        access_point: Option<String>,
    }

    impl WifiLink for FakeWifi {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn join(&mut self, _ssid: &str, _password: &str) -> Result<()> {
            self.joins += 1;
            self.connected = self.connect_on_join;
            Ok(())
        }

        fn disconnect(&mut self) {
            self.connected = false;
        }

        fn start_access_point(&mut self, name: &str) -> Result<()> {
            self.access_point = Some(name.into());
            Ok(())
        }

        fn local_ip(&self) -> Option<IpAddr> {
            self.connected
                .then_some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2)))
        }
    }

    #[derive(Default)]
    struct FakeBroker {
        connected: bool,
        refuse: bool,
        fail_publish: bool,
        connects: u32,
        options: Option<ConnectOptions>,
        published: Vec<(String, String, bool)>,
        subscribed: Vec<String>,
        unsubscribed: Vec<String>,
        inbox: VecDeque<InboundMessage>,
    }

    impl FakeBroker {
        fn topics(&self) -> Vec<&str> {
            self.published
                .iter()
                .map(|(topic, _, _)| topic.as_str())
                .collect()
        }
    }

    impl BrokerClient for FakeBroker {
        fn connect(&mut self, options: &ConnectOptions) -> Result<()> {
            self.connects += 1;
            self.options = Some(options.clone());
            if self.refuse {
                return Err(Error::new(ErrorKind::Broker, "connection refused"));
            }
            self.connected = true;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<()> {
            if self.fail_publish {
                return Err(Error::new(ErrorKind::Broker, "queue full"));
            }
            self.published.push((
                topic.into(),
                String::from_utf8_lossy(payload).into_owned(),
                retain,
            ));
            Ok(())
        }

        fn subscribe(&mut self, topic: &str) -> Result<()> {
            self.subscribed.push(topic.into());
            Ok(())
        }

        fn unsubscribe(&mut self, topic: &str) -> Result<()> {
            self.unsubscribed.push(topic.into());
            Ok(())
        }

        fn disconnect(&mut self) {
            self.connected = false;
        }

        fn poll(&mut self) -> Option<InboundMessage> {
            self.inbox.pop_front()
        }
    }

    #[derive(Default)]
    struct FakeWeb {
        running: bool,
        requests: VecDeque<Request>,
        responses: Vec<(RequestId, Response)>,
    }

    impl WebServer for FakeWeb {
        fn start(&mut self, _port: u16) -> Result<()> {
            self.running = true;
            Ok(())
        }

        fn stop(&mut self) {
            self.running = false;
        }

        fn is_running(&self) -> bool {
            self.running
        }

        fn poll(&mut self) -> Option<Request> {
            self.requests.pop_front()
        }

        fn respond(&mut self, request: RequestId, response: Response) {
            self.responses.push((request, response));
        }
    }

    #[derive(Default)]
    struct FakeDiscovery {
        advertised: Vec<(String, u16)>,
    }

    impl Discovery for FakeDiscovery {
        fn advertise(&mut self, hostname: &str, port: u16) -> Result<()> {
            self.advertised.push((hostname.into(), port));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakePlatform {
        now: u64,
        delays: u32,
        restarts: u32,
        sleeps: Vec<u32>,
    }

    impl Platform for FakePlatform {
        fn millis(&self) -> u64 {
            self.now
        }

        fn delay_ms(&mut self, milliseconds: u32) {
            self.delays += 1;
            self.now += u64::from(milliseconds);
        }

        fn restart(&mut self) {
            self.restarts += 1;
        }

        fn deep_sleep(&mut self, seconds: u32) {
            self.sleeps.push(seconds);
        }
    }

    struct FakeBoard;

    impl Board for FakeBoard {
        type Wifi = FakeWifi;
        type Broker = FakeBroker;
        type Web = FakeWeb;
        type Discovery = FakeDiscovery;
        type Platform = FakePlatform;
        type Storage = MemoryStorage;
    }

    const NETWORK: &[u8] = br#"{"ssid":"lab","mqttServer":"broker","mqttTopic":"home"}"#;

    fn light() -> Device {
        let mut device = Device::new("light", "Light").notify_interval(1000);
        let _ = device.add_property(Property::on_off("power", "Power").with_value(false));
        let _ = device.add_property(Property::brightness("brightness", "Brightness").with_value(100));
        device
    }

    fn network_with(device: Device, storage: MemoryStorage, settings: &[u8]) -> Network<FakeBoard> {
        let services = Services {
            wifi: FakeWifi {
                connect_on_join: true,
                ..FakeWifi::default()
            },
            broker: FakeBroker::default(),
            web: FakeWeb::default(),
            discovery: FakeDiscovery::default(),
            platform: FakePlatform::default(),
        };
        let config = NetworkConfig::new()
            .max_join_attempts(2)
            .retry_interval(100);

        let mut network = Network::new(services, storage, config);
        let _ = network.settings_mut().apply_json(settings);
        assert!(network.add_device(device));
        network
    }

    fn network(device: Device) -> Network<FakeBoard> {
        network_with(device, MemoryStorage::new(1024), NETWORK)
    }

    // Joined, broker session established and first state published.
    fn connected(device: Device) -> Network<FakeBoard> {
        let mut network = network(device);
        network.begin();
        network.tick(0);
        assert!(network.is_broker_connected());
        network
    }

    fn inbound(network: &mut Network<FakeBoard>, topic: &str, payload: &str) {
        network
            .services_mut()
            .broker
            .inbox
            .push_back(InboundMessage {
                topic: topic.into(),
                payload: payload.as_bytes().to_vec(),
            });
    }

    fn http(network: &mut Network<FakeBoard>, method: Method, path: &str, body: &str) {
        network.services_mut().web.requests.push_back(Request {
            id: 7,
            method,
            path: path.into(),
            body: body.as_bytes().to_vec(),
        });
    }

    fn int(network: &mut Network<FakeBoard>, device: &str, property: &str) -> i32 {
        network
            .device_mut(device)
            .and_then(|device| device.property_mut(property))
            .map(|property| property.get::<i32>())
            .unwrap()
    }

    #[test]
    fn test_begin_without_network() {
        let mut network = network_with(light(), MemoryStorage::new(1024), b"{}");
        network.begin();

        assert_eq!(network.link_state(), LinkState::AccessPoint);
        assert_eq!(
            network.services().wifi.access_point.as_deref(),
            Some("thing-light")
        );
        assert!(network.services().web.running);

        network.tick(1_000_000);
        assert_eq!(network.services().wifi.joins, 0);
        assert_eq!(network.link_state(), LinkState::AccessPoint);
    }

    #[test]
    fn test_begin_joins() {
        let mut network = network(light());
        network.begin();

        assert_eq!(network.link_state(), LinkState::Connected);
        assert_eq!(network.services().wifi.joins, 1);
        // Web-based discovery keeps the HTTP surface open.
        assert!(network.services().web.running);
        assert_eq!(
            network.services().discovery.advertised,
            [(String::from("light"), 80)]
        );
        assert_eq!(network.settings().idx(), "light");
    }

    #[test]
    fn test_join_retries_then_access_point() {
        let mut network = network(light());
        network.services_mut().wifi.connect_on_join = false;
        network.begin();

        // The first join is awaited for a bounded time.
        assert_eq!(network.services().platform.delays, 50);
        assert_eq!(network.link_state(), LinkState::Joining);

        network.tick(50);
        assert_eq!(network.services().wifi.joins, 1);
        network.tick(100);
        assert_eq!(network.services().wifi.joins, 2);
        network.tick(200);
        assert_eq!(network.services().wifi.joins, 2);
        assert_eq!(network.link_state(), LinkState::AccessPoint);
        assert!(network.services().web.running);
    }

    #[test]
    fn test_link_loss() {
        let mut network = connected(light());
        network.services_mut().wifi.connected = false;

        network.tick(10_000);
        assert!(!network.is_broker_connected());
        assert!(!network.services().broker.connected);
        // The fake joins at once.
        assert_eq!(network.services().wifi.joins, 2);

        network.tick(10_001);
        assert_eq!(network.link_state(), LinkState::Connected);
    }

    #[test]
    fn test_broker_session() {
        let network = connected(light());
        let broker = &network.services().broker;

        let options = broker.options.as_ref().unwrap();
        assert_eq!(options.host, "broker");
        assert_eq!(options.port, 1883);
        assert_eq!(options.client_id, "light");
        let will = options.last_will.as_ref().unwrap();
        assert_eq!(will.topic, "home/light/properties");
        assert_eq!(
            will.payload,
            r#"{"idx":"light","ip":"192.168.1.2","alive":false}"#
        );

        assert_eq!(broker.unsubscribed, ["devices/#"]);
        assert_eq!(broker.subscribed, ["home/#"]);
        assert_eq!(broker.topics(), ["devices/light", "home/light/properties"]);

        let (_, announcement, retain) = &broker.published[0];
        assert!(retain);
        let announcement: serde_json::Value = serde_json::from_str(announcement).unwrap();
        assert_eq!(
            announcement,
            serde_json::json!({
                "url": "http://192.168.1.2:80/things/light",
                "stateTopic": "home/light/properties",
                "setTopic": "home/light/set"
            })
        );

        assert_eq!(
            broker.published[1].1,
            r#"{"idx":"light","ip":"192.168.1.2","alive":true,"power":false,"brightness":100}"#
        );
        assert!(!network.device("light").unwrap().property("power").unwrap().is_changed());
    }

    #[test]
    fn test_state_request() {
        let mut network = connected(light());
        network.services_mut().broker.published.clear();

        inbound(&mut network, "home/light/properties", "");
        network.tick(1);
        assert_eq!(network.services().broker.topics(), ["home/light/properties"]);

        // Our own publications are echoed back and ignored.
        inbound(&mut network, "home/light/properties", r#"{"power":true}"#);
        network.tick(2);
        assert_eq!(network.services().broker.published.len(), 1);

        inbound(&mut network, "home/light/properties/brightness", "");
        network.tick(3);
        assert_eq!(
            network.services().broker.published[1],
            (
                String::from("home/light/properties/brightness"),
                String::from("100"),
                false
            )
        );
    }

    #[test]
    fn test_set_single_property() {
        let mut network = connected(light());
        network.services_mut().broker.published.clear();

        inbound(&mut network, "home/light/set/brightness", "80");
        network.tick(1);

        assert_eq!(int(&mut network, "light", "brightness"), 80);
        let power = network.device_mut("light").unwrap().property_mut("power").unwrap();
        assert!(!power.get::<bool>());
        assert!(!power.is_changed());

        // The change is published at once.
        assert_eq!(network.services().broker.topics(), ["home/light/properties"]);
    }

    #[test]
    fn test_set_json() {
        let mut network = connected(light());

        inbound(&mut network, "home/light/set", r#"{"power":true,"brightness":80}"#);
        inbound(&mut network, "home/lamp/set", r#"{"power":false}"#);
        network.tick(1);

        assert_eq!(int(&mut network, "light", "brightness"), 80);
        assert!(
            network
                .device_mut("light")
                .unwrap()
                .property_mut("power")
                .unwrap()
                .get::<bool>()
        );
    }

    #[test]
    fn test_set_json_skips_hidden_properties() {
        let mut device = light();
        let _ = device.add_property(
            Property::integer("local", "Local")
                .visibility(Visibility::Http)
                .with_value(3),
        );
        let mut network = connected(device);

        inbound(&mut network, "home/light/set", r#"{"local":9,"brightness":50}"#);
        inbound(&mut network, "home/light/set/local", "9");
        network.tick(1);

        assert_eq!(int(&mut network, "light", "brightness"), 50);
        assert_eq!(int(&mut network, "light", "local"), 3);
    }

    struct Recorder(Rc<RefCell<Vec<String>>>);

    impl DeviceHandler for Recorder {
        fn on_message(&mut self, _device: &mut Device, sub_topic: &str, payload: &[u8]) {
            self.0.borrow_mut().push(alloc::format!(
                "{sub_topic}={}",
                String::from_utf8_lossy(payload)
            ));
        }
    }

    #[test]
    fn test_other_topics_reach_handler() {
        let messages = Rc::new(RefCell::new(Vec::new()));
        let mut network = connected(light().handler(Recorder(messages.clone())));

        inbound(&mut network, "home/light/identify", "3");
        inbound(&mut network, "elsewhere/light/identify", "4");
        network.tick(1);

        assert_eq!(*messages.borrow(), ["identify=3"]);
    }

    fn sensor() -> Device {
        let mut device = Device::new("sensor", "Sensor")
            .notify_interval(1000)
            .deep_sleep(60);
        let _ = device.add_property(Property::level("temperature", "Temperature", "degree celsius").with_value(21.5));
        let _ = device.add_property(Property::level("humidity", "Humidity", "percent").with_value(40.0));
        device
    }

    #[test]
    fn test_deep_sleep_waits_for_requests() {
        let mut network = connected(sensor());
        assert!(network.services().platform.sleeps.is_empty());

        http(&mut network, Method::Get, "/things/sensor/properties/temperature", "");
        network.tick(1000);
        assert_eq!(network.services().web.responses[0].1.status(), 200);
        assert!(network.services().platform.sleeps.is_empty());

        http(&mut network, Method::Get, "/things/sensor/properties/humidity", "");
        network.tick(1500);
        // Not due yet.
        assert!(network.services().platform.sleeps.is_empty());

        network.tick(2000);
        assert_eq!(network.services().platform.sleeps, [60]);
        assert!(!network.device("sensor").unwrap().is_sleep_requested());
    }

    #[test]
    fn test_deep_sleep_without_webthing() {
        let mut network = network(sensor());
        let _ = network
            .settings_mut()
            .apply_json(br#"{"supportingWebThing":false}"#);
        network.begin();
        assert!(!network.services().web.running);

        network.tick(0);
        assert_eq!(network.services().platform.sleeps, [60]);
    }

    struct Veto(Rc<RefCell<u32>>);

    impl DeviceHandler for Veto {
        fn off(&mut self, _device: &mut Device) -> bool {
            *self.0.borrow_mut() += 1;
            false
        }
    }

    #[test]
    fn test_deep_sleep_veto() {
        let offs = Rc::new(RefCell::new(0));
        let mut network = network(sensor().handler(Veto(offs.clone())));
        let _ = network
            .settings_mut()
            .apply_json(br#"{"supportingWebThing":false}"#);
        network.begin();
        network.tick(0);

        assert_eq!(*offs.borrow(), 1);
        assert!(network.services().platform.sleeps.is_empty());
        assert!(!network.device("sensor").unwrap().is_sleep_requested());
    }

    #[test]
    fn test_per_property_publication() {
        let mut network = connected(light().publish_mode(PublishMode::PerProperty));
        assert_eq!(
            network.services().broker.topics(),
            [
                "devices/light",
                "home/light/properties/power",
                "home/light/properties/brightness"
            ]
        );

        network.services_mut().broker.published.clear();
        let _ = network
            .device_mut("light")
            .unwrap()
            .property_mut("brightness")
            .unwrap()
            .set(10);
        network.tick(1);
        assert_eq!(
            network.services().broker.published,
            [(
                String::from("home/light/properties/brightness"),
                String::from("10"),
                false
            )]
        );
    }

    #[test]
    fn test_broker_failure_opens_web() {
        let mut network = network(light());
        let _ = network
            .settings_mut()
            .apply_json(br#"{"supportingWebThing":false}"#);
        network.services_mut().broker.refuse = true;
        network.begin();
        assert!(!network.services().web.running);

        network.tick(0);
        assert_eq!(network.services().broker.connects, 1);
        assert!(network.services().web.running);

        // Cooldown.
        network.tick(1000);
        assert_eq!(network.services().broker.connects, 1);
        network.tick(5000);
        assert_eq!(network.services().broker.connects, 2);
    }

    #[test]
    fn test_publish_failure_disconnects() {
        let mut network = connected(light());
        network.services_mut().broker.fail_publish = true;

        let _ = network
            .device_mut("light")
            .unwrap()
            .property_mut("power")
            .unwrap()
            .set(true);
        network.tick(1);

        assert!(!network.is_broker_connected());
        assert!(!network.services().broker.connected);

        // Reconnection waits for the cooldown.
        network.services_mut().broker.fail_publish = false;
        network.tick(2);
        assert_eq!(network.services().broker.connects, 1);
        network.tick(5000);
        assert!(network.is_broker_connected());
        // The pending change is published with the new session.
        let topics = network.services().broker.topics();
        assert_eq!(topics[topics.len() - 1], "home/light/properties");
    }

    #[test]
    fn test_config_saved_then_restart() {
        let mut network = connected(light());

        http(&mut network, Method::Post, "/config", r#"{"mqttPort":1884}"#);
        network.tick(1);

        assert_eq!(network.services().web.responses[0].1.status(), 200);
        assert_eq!(network.services().platform.restarts, 1);
        assert!(!network.is_restart_pending());
        assert!(
            network
                .store()
                .borrow()
                .is_present(SettingsGroup::Network)
        );

        http(&mut network, Method::Post, "/config/reset", "");
        network.tick(2);
        assert_eq!(network.services().platform.restarts, 2);
        assert!(
            !network
                .store()
                .borrow()
                .is_present(SettingsGroup::Network)
        );
    }

    #[test]
    fn test_persisted_property() {
        let mut network = network(light());
        // Right after the network settings.
        assert_eq!(network.persist("light", "brightness"), Ok(369));
        assert_eq!(
            network.persist("light", "missing").map_err(|e| e.kind()),
            Err(ErrorKind::Storage)
        );
        network.begin();
        assert!(
            network
                .store()
                .borrow()
                .is_present(SettingsGroup::Application)
        );

        let _ = network
            .device_mut("light")
            .unwrap()
            .property_mut("brightness")
            .unwrap()
            .set(55);

        let storage = network.store().borrow().storage().clone();
        let mut rebooted = network_with(light(), storage, b"{}");
        assert_eq!(rebooted.persist("light", "brightness"), Ok(369));
        assert_eq!(int(&mut rebooted, "light", "brightness"), 55);
    }

    #[test]
    fn test_firmware_update() {
        let mut network = connected(light());

        let response = network.finish_firmware_update(Err(UpdateError::VerifyFailed));
        assert_eq!(response.status(), 500);
        assert_eq!(response.body(), br#"{"error":"Verify failed"}"#);
        assert!(network.is_restart_pending());

        network.tick(1);
        assert_eq!(network.services().platform.restarts, 1);

        let response = network.finish_firmware_update(Ok(()));
        assert_eq!(response.status(), 200);
    }
}
