use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::{BoundedTable, Error, MacAddress, Peer, Result, DEFAULT_TEMPERATURE};
use crate::protocol::{msg_type, Communications, Record, TemperatureCommand, TemperatureResponse};

/// Maximum number of radiators one controller drives
pub const MAX_RADIATORS: usize = 10;

/// A radiator tracked by the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Radiator {
    #[serde(rename = "mac", serialize_with = "crate::core::serde::serialize_mac")]
    pub address: MacAddress,
    pub name: String,
    /// Last setpoint sent to the radiator
    #[serde(rename = "curr_temp")]
    pub target_temperature: u8,
    /// Whether the radiator confirmed the last setpoint
    #[serde(rename = "ack")]
    pub acknowledged: bool,
}

/// What `set_target` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The setpoint was already confirmed; nothing was sent
    AlreadyApplied,
    /// A command went out and the radiator is awaiting acknowledgement
    Sent,
}

/// Drives discovered radiators to their target temperatures
pub struct RadiatorManager {
    comms: Arc<Communications>,
    radiators: Mutex<BoundedTable<Radiator>>,
    default_temperature: u8,
}

impl RadiatorManager {
    /// Creates a manager whose new radiators start at the default temperature
    pub fn new(comms: Arc<Communications>) -> Self {
        Self::with_default_temperature(comms, DEFAULT_TEMPERATURE)
    }

    /// Creates a manager whose new radiators start at `default_temperature`
    pub fn with_default_temperature(comms: Arc<Communications>, default_temperature: u8) -> Self {
        RadiatorManager {
            comms,
            radiators: Mutex::new(BoundedTable::new("radiator table", MAX_RADIATORS)),
            default_temperature,
        }
    }

    /// Installs this manager as the engine's discovery and receive handler.
    ///
    /// Peers the engine discovered before this call are adopted as radiators,
    /// since the engine reports each address to the discovery handler only once.
    pub fn attach(self: &Arc<Self>) {
        let manager = Arc::downgrade(self);
        self.comms.set_discovery_handler(move |peer| {
            if let Some(manager) = manager.upgrade() {
                // capacity is logged inside
                let _ = manager.on_discovery(peer);
            }
        });

        let manager = Arc::downgrade(self);
        self.comms.set_receive_handler(move |src, ty, payload| {
            if let Some(manager) = manager.upgrade() {
                manager.on_frame(src, ty, payload);
            }
        });

        for peer in self.comms.peers() {
            // capacity is logged inside
            let _ = self.on_discovery(&peer);
        }
    }

    /// Starts tracking a newly discovered peer as a radiator
    pub fn on_discovery(&self, peer: &Peer) -> Result<()> {
        let mut radiators = self.table();
        if radiators.find(|r| r.address == peer.address).is_some() {
            return Ok(());
        }
        if radiators.is_full() {
            warn!("Maximum number of radiators reached; skipping {}", peer.address);
            return Err(Error::capacity("radiator table", MAX_RADIATORS));
        }

        let radiator = Radiator {
            address: peer.address,
            name: format!("Room {}", radiators.len() + 1),
            target_temperature: self.default_temperature,
            acknowledged: false,
        };
        info!("New radiator added: {} [{}]", radiator.name, radiator.address);
        radiators.push(radiator)?;
        Ok(())
    }

    /// Sends `temperature` to the radiator at `index` unless it already confirmed it
    pub fn set_target(&self, index: usize, temperature: u8) -> Result<Dispatch> {
        let address = {
            let mut radiators = self.table();
            let radiator = radiators.get_mut(index).ok_or(Error::InvalidIndex(index))?;
            if radiator.target_temperature == temperature && radiator.acknowledged {
                return Ok(Dispatch::AlreadyApplied);
            }
            radiator.acknowledged = false;
            radiator.target_temperature = temperature;
            radiator.address
        };

        let command = TemperatureCommand { temperature };
        match self.comms.send_record(&address, msg_type::TEMPERATURE_COMMAND, &command) {
            Ok(()) => {
                info!("Sent temperature command to [{}]: {}°C", address, temperature);
                Ok(Dispatch::Sent)
            }
            Err(e) => {
                warn!("Failed to send temperature command to [{}]: {}", address, e);
                Err(e)
            }
        }
    }

    /// Applies `set_target` to every radiator in table order; returns how many
    /// commands went out
    pub fn set_target_all(&self, temperature: u8) -> usize {
        let count = self.len();
        (0..count)
            .filter(|&index| matches!(self.set_target(index, temperature), Ok(Dispatch::Sent)))
            .count()
    }

    /// Applies a radiator's answer to the last command
    pub fn on_command_response(&self, address: &MacAddress, response: &TemperatureResponse) {
        let mut radiators = self.table();
        let Some(index) = radiators.position(|r| r.address == *address) else {
            debug!("ACK from unknown device [{}]: {}°C", address, response.temperature);
            return;
        };

        if !response.success {
            warn!("Failed to set temp on [{}] (wanted {}°C)", address, response.temperature);
            return;
        }

        if let Some(radiator) = radiators.get_mut(index) {
            radiator.acknowledged = true;
            info!(
                "ACK received from {}: temperature set to {}°C",
                radiator.name, response.temperature
            );
        }
    }

    fn on_frame(&self, src: &MacAddress, ty: u8, payload: &[u8]) {
        if ty != msg_type::TEMPERATURE_RESPONSE {
            debug!("Ignoring message type {} from {}", ty, src);
            return;
        }
        match TemperatureResponse::from_bytes(payload) {
            Ok(response) => self.on_command_response(src, &response),
            Err(e) => debug!("Bad temperature response from {}: {}", src, e),
        }
    }

    /// Snapshot of the radiator table
    pub fn radiators(&self) -> Vec<Radiator> {
        self.table().iter().cloned().collect()
    }

    /// Number of tracked radiators
    pub fn len(&self) -> usize {
        self.table().len()
    }

    /// Returns true when no radiator has been discovered
    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    /// Display name of the radiator at `index`
    pub fn name(&self, index: usize) -> Option<String> {
        self.table().get(index).map(|r| r.name.clone())
    }

    /// Last setpoint sent to the radiator at `index`
    pub fn temperature(&self, index: usize) -> Option<u8> {
        self.table().get(index).map(|r| r.target_temperature)
    }

    /// Whether the radiator at `index` confirmed its setpoint
    pub fn is_acked(&self, index: usize) -> bool {
        self.table().get(index).map_or(false, |r| r.acknowledged)
    }

    /// True when every radiator confirmed its setpoint (vacuously true when empty)
    pub fn all_acked(&self) -> bool {
        self.table().iter().all(|r| r.acknowledged)
    }

    fn table(&self) -> MutexGuard<'_, BoundedTable<Radiator>> {
        self.radiators.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
