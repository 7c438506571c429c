//! Services the synchronization engine relies on.
//!
//! A board implements each trait on top of its own drivers and groups them
//! through [`Board`]. The engine receives them explicitly, so it never
//! reaches a global singleton and can be tested with in-memory fakes.

use alloc::string::String;
use alloc::vec::Vec;

use core::net::IpAddr;

use crate::error::Result;
use crate::settings::Storage;

use super::http::{Request, RequestId, Response};

/// The wireless link.
pub trait WifiLink {
    /// Whether the device is associated to an access point and has an
    /// address.
    fn is_connected(&self) -> bool;

    /// Starts joining a network. The call must not block: the outcome is
    /// observed through [`WifiLink::is_connected`].
    ///
    /// # Errors
    ///
    /// Fails when the join cannot even be started.
    fn join(&mut self, ssid: &str, password: &str) -> Result<()>;

    /// Leaves the current network.
    fn disconnect(&mut self);

    /// Hosts a local access point together with a captive name resolver.
    ///
    /// # Errors
    ///
    /// Fails when the access point cannot be started.
    fn start_access_point(&mut self, name: &str) -> Result<()>;

    /// Returns the local address, if any.
    fn local_ip(&self) -> Option<IpAddr>;
}

/// The message published by the broker on behalf of a device which
/// disconnects uncleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    /// Topic.
    pub topic: String,
    /// Payload.
    pub payload: String,
    /// Whether the broker retains the message.
    pub retain: bool,
}

/// Parameters of a broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Client identifier.
    pub client_id: String,
    /// User name and password, if the broker requires authentication.
    pub credentials: Option<(String, String)>,
    /// Optional [`LastWill`].
    pub last_will: Option<LastWill>,
}

/// A message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic.
    pub topic: String,
    /// Payload.
    pub payload: Vec<u8>,
}

/// A message-broker client.
pub trait BrokerClient {
    /// Connects to the broker.
    ///
    /// # Errors
    ///
    /// Fails when the broker cannot be reached or refuses the connection.
    fn connect(&mut self, options: &ConnectOptions) -> Result<()>;

    /// Whether the client is connected.
    fn is_connected(&self) -> bool;

    /// Publishes a message.
    ///
    /// # Errors
    ///
    /// Fails when the message cannot be queued.
    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<()>;

    /// Subscribes to a topic filter.
    ///
    /// # Errors
    ///
    /// Fails when the request cannot be queued.
    fn subscribe(&mut self, topic: &str) -> Result<()>;

    /// Unsubscribes from a topic filter.
    ///
    /// # Errors
    ///
    /// Fails when the request cannot be queued.
    fn unsubscribe(&mut self, topic: &str) -> Result<()>;

    /// Disconnects from the broker.
    fn disconnect(&mut self);

    /// Returns the next received message, if any.
    fn poll(&mut self) -> Option<InboundMessage>;
}

/// The `HTTP` surface.
///
/// Requests are polled and answered by identifier, so the engine never
/// blocks on a connection.
pub trait WebServer {
    /// Starts listening.
    ///
    /// # Errors
    ///
    /// Fails when the port cannot be bound.
    fn start(&mut self, port: u16) -> Result<()>;

    /// Stops listening.
    fn stop(&mut self);

    /// Whether the server is listening.
    fn is_running(&self) -> bool;

    /// Returns the next pending request, if any.
    fn poll(&mut self) -> Option<Request>;

    /// Answers a request.
    fn respond(&mut self, request: RequestId, response: Response);
}

/// The discovery service announcing the `HTTP` surface.
pub trait Discovery {
    /// Starts advertising `hostname` on `port`.
    ///
    /// # Errors
    ///
    /// Fails when the service cannot be registered.
    fn advertise(&mut self, hostname: &str, port: u16) -> Result<()>;
}

/// Clock and power management.
pub trait Platform {
    /// Returns a monotonic timestamp in milliseconds.
    fn millis(&self) -> u64;

    /// Blocks for `milliseconds`.
    fn delay_ms(&mut self, milliseconds: u32);

    /// Restarts the device.
    fn restart(&mut self);

    /// Enters deep sleep for `seconds`.
    fn deep_sleep(&mut self, seconds: u32);
}

/// The set of service implementations of a board.
pub trait Board {
    /// Wireless link.
    type Wifi: WifiLink;
    /// Broker client.
    type Broker: BrokerClient;
    /// `HTTP` server.
    type Web: WebServer;
    /// Discovery service.
    type Discovery: Discovery;
    /// Clock and power management.
    type Platform: Platform;
    /// Non-volatile region.
    type Storage: Storage + 'static;
}

/// The service instances handed to the engine.
pub struct Services<B: Board> {
    /// Wireless link.
    pub wifi: B::Wifi,
    /// Broker client.
    pub broker: B::Broker,
    /// `HTTP` server.
    pub web: B::Web,
    /// Discovery service.
    pub discovery: B::Discovery,
    /// Clock and power management.
    pub platform: B::Platform,
}
