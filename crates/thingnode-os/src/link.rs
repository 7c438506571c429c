use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use thingnode::error::Result as CoreResult;
use thingnode::network::services::WifiLink;

use tracing::{info, warn};

// Remote address used to select the outbound interface. No packet is sent.
const PROBE_ADDRESS: (Ipv4Addr, u16) = (Ipv4Addr::new(192, 0, 2, 1), 9);

/// The link of a host, which is already attached to a network.
///
/// Joining only checks that an outbound interface exists. The configuration
/// access point is emulated by serving the configuration surface on the
/// host network.
#[derive(Debug, Default)]
pub struct HostLink {
    joined: bool,
    access_point: Option<String>,
    address: Option<IpAddr>,
}

impl HostLink {
    /// Creates a [`HostLink`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            joined: false,
            access_point: None,
            address: None,
        }
    }

    /// Forces the local address instead of detecting it.
    #[must_use]
    pub fn address(mut self, address: IpAddr) -> Self {
        self.address = Some(address);
        self
    }

    /// Returns the name of the emulated access point, if any.
    #[must_use]
    pub fn access_point(&self) -> Option<&str> {
        self.access_point.as_deref()
    }

    fn detect() -> Option<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
        socket.connect(PROBE_ADDRESS).ok()?;
        socket.local_addr().ok().map(|address| address.ip())
    }
}

impl WifiLink for HostLink {
    fn is_connected(&self) -> bool {
        self.joined
    }

    fn join(&mut self, ssid: &str, _password: &str) -> CoreResult<()> {
        if self.address.is_none() {
            self.address = Self::detect();
        }

        match self.address {
            Some(address) => {
                info!("Attached to `{ssid}` through the host network, address {address}");
                self.joined = true;
            }
            None => warn!("No outbound interface available"),
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.joined = false;
    }

    fn start_access_point(&mut self, name: &str) -> CoreResult<()> {
        info!("Serving the configuration of `{name}` on the host network");
        self.access_point = Some(name.into());
        Ok(())
    }

    fn local_ip(&self) -> Option<IpAddr> {
        if self.joined { self.address } else { None }
    }
}
