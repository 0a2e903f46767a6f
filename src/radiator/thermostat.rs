use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::{MacAddress, DEFAULT_TEMPERATURE};
use crate::protocol::{msg_type, Communications, Record, TemperatureCommand, TemperatureResponse};

/// Lowest setpoint a radiator accepts
pub const MIN_TEMPERATURE: u8 = 8;

/// Highest setpoint a radiator accepts
pub const MAX_TEMPERATURE: u8 = 28;

/// Radiator side of the setpoint exchange: applies commands and answers them
pub struct Thermostat {
    comms: Arc<Communications>,
    setpoint: AtomicU8,
    accepted: RangeInclusive<u8>,
}

impl Thermostat {
    /// Creates a thermostat accepting 8..=28 °C
    pub fn new(comms: Arc<Communications>) -> Self {
        Self::with_range(comms, MIN_TEMPERATURE..=MAX_TEMPERATURE)
    }

    /// Creates a thermostat accepting setpoints in `accepted`
    pub fn with_range(comms: Arc<Communications>, accepted: RangeInclusive<u8>) -> Self {
        Thermostat {
            comms,
            setpoint: AtomicU8::new(DEFAULT_TEMPERATURE),
            accepted,
        }
    }

    /// Installs this thermostat as the engine's receive handler
    pub fn attach(self: &Arc<Self>) {
        let thermostat = Arc::downgrade(self);
        self.comms.set_receive_handler(move |src, ty, payload| {
            if let Some(thermostat) = thermostat.upgrade() {
                thermostat.on_frame(src, ty, payload);
            }
        });
    }

    /// Currently applied setpoint
    pub fn setpoint(&self) -> u8 {
        self.setpoint.load(Ordering::SeqCst)
    }

    /// Applies `command` if it is in range and answers `src` either way
    pub fn on_command(&self, src: &MacAddress, command: &TemperatureCommand) {
        let success = self.accepted.contains(&command.temperature);
        if success {
            self.setpoint.store(command.temperature, Ordering::SeqCst);
            info!("Setpoint {}°C applied on request from {}", command.temperature, src);
        } else {
            warn!(
                "Rejected setpoint {}°C from {}: outside {:?}",
                command.temperature, src, self.accepted
            );
        }

        let response = TemperatureResponse {
            temperature: command.temperature,
            success,
        };
        if let Err(e) = self
            .comms
            .send_record(src, msg_type::TEMPERATURE_RESPONSE, &response)
        {
            warn!("Failed to answer {}: {}", src, e);
        }
    }

    fn on_frame(&self, src: &MacAddress, ty: u8, payload: &[u8]) {
        if ty != msg_type::TEMPERATURE_COMMAND {
            debug!("Ignoring message type {} from {}", ty, src);
            return;
        }
        match TemperatureCommand::from_bytes(payload) {
            Ok(command) => self.on_command(src, &command),
            Err(e) => debug!("Bad temperature command from {}: {}", src, e),
        }
    }
}
