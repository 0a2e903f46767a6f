use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::{truncate_name, Error, Result, MAX_NAME_LEN};
use super::codec::MAX_PAYLOAD_LEN;

/// Application message types; 0 is reserved for discovery
pub mod msg_type {
    pub const DISCOVERY: u8 = crate::protocol::codec::DISCOVERY_MSG_TYPE;
    pub const TEMPERATURE_COMMAND: u8 = 1;
    pub const TEMPERATURE_RESPONSE: u8 = 2;
}

/// A fixed-size record carried as a frame payload.
///
/// Records are encoded with bincode's fixed-int little-endian layout, which
/// matches the packed struct layout used on the air.
pub trait Record: Serialize + DeserializeOwned {
    /// Exact encoded size in bytes
    const WIRE_SIZE: usize;

    /// Encodes the record
    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decodes a record, requiring exactly `WIRE_SIZE` bytes
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::WIRE_SIZE {
            return Err(Error::LengthMismatch {
                declared: Self::WIRE_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Compile-time proof that a record fits in a single frame
pub(crate) struct FitsInFrame<R>(PhantomData<R>);

impl<R: Record> FitsInFrame<R> {
    pub(crate) const OK: () = assert!(
        R::WIRE_SIZE <= MAX_PAYLOAD_LEN,
        "record does not fit in one radio frame"
    );
}

/// Payload of a discovery frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryPayload {
    /// NUL-terminated node name
    pub name: [u8; MAX_NAME_LEN],
    /// Set when this frame answers another node's discovery; any non-zero byte
    #[serde(deserialize_with = "crate::core::serde::deserialize_flag")]
    pub is_response: bool,
}

impl DiscoveryPayload {
    /// Creates a payload advertising `name`, truncated to fit the buffer
    pub fn new(name: &str, is_response: bool) -> Self {
        let mut buf = [0u8; MAX_NAME_LEN];
        let name = truncate_name(name);
        buf[..name.len()].copy_from_slice(name.as_bytes());
        DiscoveryPayload {
            name: buf,
            is_response,
        }
    }

    /// The advertised name, up to the first NUL.
    ///
    /// Invalid UTF-8 is replaced and the result cut back to the name limit.
    pub fn name(&self) -> String {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_NAME_LEN - 1);
        truncate_name(&String::from_utf8_lossy(&self.name[..end]))
    }
}

impl Record for DiscoveryPayload {
    const WIRE_SIZE: usize = MAX_NAME_LEN + 1;
}

/// Setpoint command sent to a radiator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemperatureCommand {
    pub temperature: u8,
}

impl Record for TemperatureCommand {
    const WIRE_SIZE: usize = 1;
}

/// Radiator's answer to a TemperatureCommand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemperatureResponse {
    /// The setpoint the radiator was asked for
    pub temperature: u8,
    /// Whether the setpoint was applied; any non-zero byte
    #[serde(deserialize_with = "crate::core::serde::deserialize_flag")]
    pub success: bool,
}

impl Record for TemperatureResponse {
    const WIRE_SIZE: usize = 2;
}
