use std::path::{Path, PathBuf};
use std::time::Duration;

use thingnode::network::Network;
use thingnode::network::services::{Board, BrokerClient, Platform, Services, WebServer};

use tokio::time::MissedTickBehavior;

use tracing::info;

use crate::broker::MqttBroker;
use crate::discovery::MdnsDiscovery;
use crate::error::Result;
use crate::link::HostLink;
use crate::platform::{HostPlatform, PowerEvent};
use crate::storage::FileStorage;
use crate::web::AxumServer;

// Default size of the settings region.
const SETTINGS_SIZE: usize = 1024;
// Default period of the engine tick.
const TICK_PERIOD: Duration = Duration::from_millis(50);

/// The services of a host.
pub struct OsBoard;

impl Board for OsBoard {
    type Wifi = HostLink;
    type Broker = MqttBroker;
    type Web = AxumServer;
    type Discovery = MdnsDiscovery;
    type Platform = HostPlatform;
    type Storage = FileStorage;
}

impl OsBoard {
    /// Creates the default host services.
    #[must_use]
    pub fn services() -> Services<Self> {
        Services {
            wifi: HostLink::new(),
            broker: MqttBroker::new(),
            web: AxumServer::new(),
            discovery: MdnsDiscovery::new(),
            platform: HostPlatform::new(),
        }
    }
}

/// Host runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsConfig {
    settings_path: PathBuf,
    settings_size: usize,
    tick_period: Duration,
}

impl OsConfig {
    /// Creates an [`OsConfig`] storing the settings at `settings_path`.
    #[must_use]
    pub fn new(settings_path: impl Into<PathBuf>) -> Self {
        Self {
            settings_path: settings_path.into(),
            settings_size: SETTINGS_SIZE,
            tick_period: TICK_PERIOD,
        }
    }

    /// Sets the size of the settings region in bytes.
    #[must_use]
    pub fn settings_size(mut self, settings_size: usize) -> Self {
        self.settings_size = settings_size;
        self
    }

    /// Sets the period of the engine tick.
    ///
    /// A zero period is raised to one millisecond.
    #[must_use]
    pub fn tick_period(mut self, tick_period: Duration) -> Self {
        self.tick_period = tick_period.max(Duration::from_millis(1));
        self
    }

    /// Returns the settings file path.
    #[must_use]
    pub fn get_settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Returns the tick period.
    #[must_use]
    pub const fn get_tick_period(&self) -> Duration {
        self.tick_period
    }

    /// Opens the settings region.
    ///
    /// # Errors
    ///
    /// Fails when the settings file exists but cannot be read.
    pub fn open_storage(&self) -> Result<FileStorage> {
        FileStorage::open(&self.settings_path, self.settings_size)
    }
}

/// Ticks `network` every `tick_period` until it requests a power
/// transition.
///
/// The broker session and the `HTTP` server are closed before returning.
pub async fn run(network: &mut Network<OsBoard>, tick_period: Duration) -> PowerEvent {
    let mut interval = tokio::time::interval(tick_period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let _ = interval.tick().await;

        let now = network.services().platform.millis();
        network.tick(now);

        if let Some(event) = network.services_mut().platform.take_event() {
            let services = network.services_mut();
            services.broker.disconnect();
            services.web.stop();
            return event;
        }
    }
}

/// Runs a firmware forever.
///
/// `firmware` builds the engine on every boot. Restarts rebuild it at
/// once, deep sleep suspends the runner first.
///
/// # Errors
///
/// Fails when `firmware` fails.
pub async fn run_forever<F>(config: &OsConfig, mut firmware: F) -> Result<()>
where
    F: FnMut(&OsConfig) -> Result<Network<OsBoard>>,
{
    loop {
        let mut network = firmware(config)?;
        network.begin();

        match run(&mut network, config.tick_period).await {
            PowerEvent::Restart => info!("Restarting the firmware"),
            PowerEvent::DeepSleep(seconds) => {
                drop(network);
                info!("Sleeping for {seconds} s");
                tokio::time::sleep(Duration::from_secs(u64::from(seconds))).await;
            }
        }
    }
}
