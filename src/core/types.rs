use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{Error, Result};

/// Hardware address of a node on the radio link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// The all-ones broadcast address
    pub const BROADCAST: MacAddress = MacAddress([0xFF; 6]);

    /// Generates a random locally administered unicast address
    pub fn random() -> Self {
        use rand::Rng;
        let mut bytes = [0u8; 6];
        rand::thread_rng().fill(&mut bytes);
        bytes[0] = (bytes[0] | 0x02) & !0x01;
        MacAddress(bytes)
    }

    /// Returns true for the broadcast address
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| Error::config(format!("Address '{}' has too few octets", s)))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|e| Error::config(format!("Bad octet '{}' in '{}': {}", part, s, e)))?;
        }
        if parts.next().is_some() {
            return Err(Error::config(format!("Address '{}' has too many octets", s)));
        }
        Ok(MacAddress(bytes))
    }
}

/// Truncates a node name so it fits the on-air name buffer with its terminator
pub fn truncate_name(name: &str) -> String {
    let max = super::MAX_NAME_LEN - 1;
    if name.len() <= max {
        return name.to_string();
    }
    let mut end = max;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

/// A node discovered through the discovery handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// The peer's hardware address
    pub address: MacAddress,
    /// The name the peer advertised
    pub name: String,
}

/// Configuration for a radiator link node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name advertised in discovery
    pub name: String,
    /// Names accepted during discovery; empty accepts everyone
    pub allowlist: Vec<String>,
    /// UDP port shared by every node of the LAN link
    pub port: u16,
    /// IPv4 broadcast address used by the LAN link
    pub broadcast_addr: Ipv4Addr,
    /// Fixed hardware address; generated when absent
    pub local_address: Option<MacAddress>,
    /// Depth of the transport event queue
    pub event_queue_depth: usize,
    /// Target temperature given to newly discovered radiators
    pub default_temperature: u8,
    /// Interval between discovery broadcasts
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub discovery_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            name: "Unknown".to_string(),
            allowlist: Vec::new(),
            port: super::DEFAULT_PORT,
            broadcast_addr: Ipv4Addr::BROADCAST,
            local_address: None,
            event_queue_depth: 64,
            default_temperature: super::DEFAULT_TEMPERATURE,
            discovery_interval: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Parses a configuration from JSON, filling missing fields with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Checks the configuration against the link limits
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::config("Node name must not be empty"));
        }
        if self.allowlist.len() > super::MAX_ALLOWLIST {
            return Err(Error::config(format!(
                "Allow-list has {} names, max {}",
                self.allowlist.len(),
                super::MAX_ALLOWLIST
            )));
        }
        if self.event_queue_depth == 0 {
            return Err(Error::config("Event queue depth must be at least 1"));
        }
        if self.local_address.map_or(false, |a| a.is_broadcast()) {
            return Err(Error::config("Local address cannot be the broadcast address"));
        }
        Ok(())
    }
}
