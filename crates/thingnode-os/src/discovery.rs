use thingnode::error::{ErrorKind as CoreErrorKind, Result as CoreResult};
use thingnode::network::services::Discovery;

use mdns_sd::{ServiceDaemon, ServiceInfo};

use tracing::{info, warn};

use crate::error::{Error, Result};

// Service type
const SERVICE_TYPE: &str = "_webthing";
// Transport protocol
const TRANSPORT_PROTOCOL: &str = "_tcp";
// Domain
const DOMAIN: &str = "local.";

/// The `mDNS-SD` discovery service.
pub struct MdnsDiscovery {
    service_type: &'static str,
    properties: &'static [(&'static str, &'static str)],
    daemon: Option<ServiceDaemon>,
    registered: Option<String>,
}

impl Default for MdnsDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl MdnsDiscovery {
    /// Creates the [`MdnsDiscovery`] service.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            service_type: SERVICE_TYPE,
            properties: &[("path", "/things")],
            daemon: None,
            registered: None,
        }
    }

    /// Sets the service type.
    ///
    /// The service type searched by the client. i.e. _webthing
    #[must_use]
    pub fn service_type(mut self, service_type: &'static str) -> Self {
        self.service_type = service_type;
        self
    }

    /// Sets the service properties.
    ///
    /// i.e. [("path", "/things")]
    #[must_use]
    pub fn properties(mut self, properties: &'static [(&'static str, &'static str)]) -> Self {
        self.properties = properties;
        self
    }

    /// Returns the full name of the advertised service, if any.
    #[must_use]
    pub fn registered(&self) -> Option<&str> {
        self.registered.as_deref()
    }

    fn service_info(&self, hostname: &str, port: u16) -> Result<ServiceInfo> {
        let service_type = format!("{}.{TRANSPORT_PROTOCOL}.{DOMAIN}", self.service_type);
        let host = format!("{hostname}.{DOMAIN}");

        ServiceInfo::new(&service_type, hostname, &host, "", port, self.properties)
            .map(ServiceInfo::enable_addr_auto)
            .map_err(Error::from)
    }

    fn register(&mut self, hostname: &str, port: u16) -> Result<()> {
        let info = self.service_info(hostname, port)?;

        let daemon = match self.daemon.take() {
            Some(daemon) => daemon,
            None => ServiceDaemon::new()?,
        };

        if let Some(fullname) = self.registered.take()
            && let Err(e) = daemon.unregister(&fullname)
        {
            warn!("Unable to withdraw `{fullname}`: {e}");
        }

        let fullname = info.get_fullname().to_string();
        let registered = daemon.register(info);
        self.daemon = Some(daemon);
        registered?;

        info!("Advertising `{fullname}` on port {port}");
        self.registered = Some(fullname);
        Ok(())
    }
}

impl Discovery for MdnsDiscovery {
    fn advertise(&mut self, hostname: &str, port: u16) -> CoreResult<()> {
        self.register(hostname, port)
            .map_err(|e| e.into_core(CoreErrorKind::Web))
    }
}

impl Drop for MdnsDiscovery {
    fn drop(&mut self) {
        if let Some(daemon) = self.daemon.take()
            && let Err(e) = daemon.shutdown()
        {
            warn!("Unable to shut the discovery service down: {e}");
        }
    }
}
