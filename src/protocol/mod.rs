//! Protocol implementation module
//!
//! This module defines the frame format, the fixed-size records carried in
//! frames, and the engine that runs discovery and dispatches inbound frames.

pub mod codec;
pub mod engine;
pub mod message;

pub use self::codec::{
    decode, encode, FrameHeader, DISCOVERY_MSG_TYPE, HEADER_SIZE, MAX_PAYLOAD_LEN, MESSAGE_MAGIC,
};
pub use self::engine::Communications;
pub use self::message::{
    msg_type, DiscoveryPayload, Record, TemperatureCommand, TemperatureResponse,
};
