//! Radiator Link: broadcast discovery and setpoint control over a short-range radio
//!
//! Nodes find each other by broadcasting a small discovery frame that carries
//! their name, keep a bounded table of peers (optionally filtered by an
//! allow-list), and exchange typed frames over a `Transport`. On top of that a
//! controller drives every discovered radiator to a target temperature and
//! tracks which radiators confirmed it.
pub mod bridge;
pub mod core;
pub mod network;
pub mod protocol;
pub mod radiator;
pub mod util;

// Re-export commonly used items
pub use crate::bridge::SerialBridge;
pub use crate::core::{Config, Error, MacAddress, Peer, Result};
pub use crate::network::{Medium, Transport, UdpTransport};
pub use crate::protocol::Communications;
pub use crate::radiator::{RadiatorManager, Thermostat};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
