//! Runs one node of the radiator link over UDP broadcast on the local network.
//!
//! ```text
//! cargo run --example node -- controller [config.json]
//! cargo run --example node -- radiator <name> [config.json]
//! ```
//!
//! The controller reads bridge commands (`ALL/T/21`, `SET/TEMP/0/19`,
//! `GET/RADIATORS`) from stdin and writes replies to stdout.

use std::sync::Arc;

use radiator_link::util::{init_logging, parse_level};
use radiator_link::{
    Communications, Config, RadiatorManager, Result, SerialBridge, Thermostat, UdpTransport,
};
use tokio::io::{self, BufReader};
use tokio::time::interval;
use tracing::{error, info, warn, Level};

enum Role {
    Controller,
    Radiator(String),
}

fn usage() -> ! {
    eprintln!("usage: node controller [config.json] | node radiator <name> [config.json]");
    std::process::exit(2);
}

#[tokio::main]
async fn main() {
    let level = std::env::var("RADIATOR_LOG")
        .ok()
        .and_then(|name| parse_level(&name))
        .unwrap_or(Level::INFO);
    init_logging(level);

    let mut args = std::env::args().skip(1);
    let role = match args.next().as_deref() {
        Some("controller") => Role::Controller,
        Some("radiator") => match args.next() {
            Some(name) => Role::Radiator(name),
            None => usage(),
        },
        _ => usage(),
    };

    let config = match args.next() {
        Some(path) => match Config::load(&path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    if let Err(e) = run(role, config).await {
        error!("Node stopped: {}", e);
        std::process::exit(1);
    }
}

enum Node {
    Controller(Arc<RadiatorManager>),
    Radiator(Arc<Thermostat>),
}

async fn run(role: Role, mut config: Config) -> Result<()> {
    if let Role::Radiator(name) = &role {
        config.name = name.clone();
    }

    let transport = Arc::new(UdpTransport::bind(&config)?);
    let comms = Arc::new(Communications::from_config(transport, &config)?);

    // handlers go in before the first frame can be dispatched
    let node = match role {
        Role::Controller => {
            let manager = Arc::new(RadiatorManager::with_default_temperature(
                comms.clone(),
                config.default_temperature,
            ));
            manager.attach();
            Node::Controller(manager)
        }
        Role::Radiator(_) => {
            let thermostat = Arc::new(Thermostat::new(comms.clone()));
            thermostat.attach();
            Node::Radiator(thermostat)
        }
    };

    comms.begin()?;
    tokio::spawn(comms.clone().run());

    let beacon = comms.clone();
    let period = config.discovery_interval;
    tokio::spawn(async move {
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            if let Err(e) = beacon.broadcast_discovery() {
                warn!("Discovery broadcast failed: {}", e);
            }
        }
    });

    match node {
        Node::Controller(manager) => {
            info!("Controller '{}' ready; reading commands from stdin", comms.name());
            let bridge = SerialBridge::new(manager);
            bridge.run(BufReader::new(io::stdin()), io::stdout()).await
        }
        Node::Radiator(thermostat) => {
            info!("Radiator '{}' ready at {}", comms.name(), comms.address());
            tokio::signal::ctrl_c().await?;
            info!("Shutting down at {}°C", thermostat.setpoint());
            Ok(())
        }
    }
}
