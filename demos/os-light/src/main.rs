use std::path::PathBuf;

use thingnode::device::{Device, DeviceHandler};
use thingnode::network::Network;
use thingnode::network::config::{
    MQTT_PORT, MQTT_SERVER, MQTT_TOPIC, NetworkConfig, NetworkSettings, SSID,
};
use thingnode::property::Property;
use thingnode::value::Value;

use thingnode_os::error::Result;
use thingnode_os::runner::{OsBoard, OsConfig, run_forever};

use clap::Parser;

use tracing::{Level, error, info, warn};

// Property identifiers.
const POWER: &str = "power";
const BRIGHTNESS: &str = "brightness";
const MODE: &str = "mode";

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Device identifier.
    #[arg(long, default_value = "light")]
    id: String,

    /// File holding the persisted settings.
    #[arg(long, default_value = "light-settings.bin")]
    settings: PathBuf,

    /// Name of the host network. Without it, and without a saved one, only
    /// the configuration surface is served.
    #[arg(long)]
    network: Option<String>,

    /// Broker host.
    #[arg(long)]
    broker: Option<String>,

    /// Broker port.
    #[arg(long)]
    broker_port: Option<u32>,

    /// Base topic.
    #[arg(long)]
    topic: Option<String>,

    /// `HTTP` port.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Serves the configuration surface only.
    #[arg(long)]
    configure: bool,
}

struct Light;

impl DeviceHandler for Light {
    fn on_message(&mut self, device: &mut Device, sub_topic: &str, _payload: &[u8]) {
        if sub_topic == "identify" {
            info!("`{}` identify requested", device.id());
        }
    }
}

fn light(id: &str) -> Device {
    let mut power = Property::on_off(POWER, "Power").with_value(false);
    let _ = power.add_listener(|property: &Property| {
        info!("Light turned {}", if property.peek::<bool>() { "on" } else { "off" });
    });

    let mut brightness = Property::brightness(BRIGHTNESS, "Brightness").with_value(100);
    let _ = brightness.add_listener(|property: &Property| {
        info!("Brightness set to {}%", property.peek::<i32>());
    });

    let mut mode = Property::string(MODE, "Mode", 16)
        .enum_value("white")
        .enum_value("color")
        .enum_value("night")
        .with_value("white");
    let _ = mode.add_listener(|property: &Property| {
        info!("Mode set to `{}`", property.peek::<String>());
    });

    let mut device = Device::new(id, "Light")
        .description("A dimmable light")
        .at_type("Light")
        .at_type("OnOffSwitch")
        .handler(Light);
    for property in [power, brightness, mode] {
        let _ = device.add_property(property);
    }
    device
}

// Command-line values override the saved ones on every boot. They reach the
// settings file only when a client saves the configuration through
// `POST /config`, which stores every network setting.
fn override_settings(settings: &mut NetworkSettings, cli: &Cli) {
    let overrides: [(&str, Option<Value>); 4] = [
        (SSID, cli.network.clone().map(Into::into)),
        (MQTT_SERVER, cli.broker.clone().map(Into::into)),
        (MQTT_PORT, cli.broker_port.map(Into::into)),
        (MQTT_TOPIC, cli.topic.clone().map(Into::into)),
    ];

    for (id, value) in overrides {
        let Some(value) = value else {
            continue;
        };
        if let Some(property) = settings.properties_mut().get_mut(id) {
            let _ = property.set(value);
        }
    }
}

fn firmware(cli: &Cli, config: &OsConfig) -> Result<Network<OsBoard>> {
    let mut network_config = NetworkConfig::new()
        .http_port(cli.port)
        .firmware_version(env!("CARGO_PKG_VERSION"));
    if cli.configure {
        network_config = network_config.force_access_point();
    }

    let mut network = Network::new(OsBoard::services(), config.open_storage()?, network_config);
    override_settings(network.settings_mut(), cli);

    let _ = network.add_device(light(&cli.id));
    for id in [POWER, BRIGHTNESS, MODE] {
        if let Err(e) = network.persist(&cli.id, id) {
            warn!("`{id}` is not persisted: {e}");
        }
    }

    Ok(network)
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();
    let config = OsConfig::new(&cli.settings);

    if let Err(e) = run_forever(&config, |config| firmware(&cli, config)).await {
        error!("{e}");
        std::process::exit(1);
    }
}
