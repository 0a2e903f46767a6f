//! Radiator setpoint reconciliation
//!
//! The controller side tracks discovered radiators and the acknowledgement of
//! the last setpoint sent to each; the radiator side applies and answers those
//! setpoints. Retrying unacknowledged setpoints is left to the caller.

mod manager;
mod thermostat;

pub use self::manager::{Dispatch, Radiator, RadiatorManager, MAX_RADIATORS};
pub use self::thermostat::{Thermostat, MAX_TEMPERATURE, MIN_TEMPERATURE};
