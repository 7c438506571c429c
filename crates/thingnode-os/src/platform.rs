use std::time::{Duration, Instant};

use thingnode::network::services::Platform;

use tracing::info;

/// A power transition requested by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    /// The firmware has to be restarted.
    Restart,
    /// The firmware has to be suspended for the given seconds, then
    /// restarted.
    DeepSleep(u32),
}

/// Clock and power management of a host.
///
/// Power transitions are recorded and handled by the runner, which rebuilds
/// the firmware instead of rebooting the machine.
#[derive(Debug)]
pub struct HostPlatform {
    start: Instant,
    event: Option<PowerEvent>,
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl HostPlatform {
    /// Creates a [`HostPlatform`] whose clock starts now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            event: None,
        }
    }

    /// Returns the pending [`PowerEvent`], if any, clearing it.
    pub const fn take_event(&mut self) -> Option<PowerEvent> {
        self.event.take()
    }
}

impl Platform for HostPlatform {
    fn millis(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn delay_ms(&mut self, milliseconds: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(milliseconds)));
    }

    fn restart(&mut self) {
        info!("Restart requested");
        self.event = Some(PowerEvent::Restart);
    }

    fn deep_sleep(&mut self, seconds: u32) {
        info!("Deep sleep requested for {seconds} s");
        self.event = Some(PowerEvent::DeepSleep(seconds));
    }
}
