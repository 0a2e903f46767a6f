//! Core types and limits for the radiator link
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod error;
pub mod types;
pub mod serde;
pub mod table;

pub use self::error::{Error, Result};
pub use self::table::BoundedTable;
pub use self::types::{
    truncate_name,
    Config,
    MacAddress,
    Peer,
};

/// Maximum number of discovered peers
pub const MAX_PEERS: usize = 10;

/// Maximum number of names on the discovery allow-list
pub const MAX_ALLOWLIST: usize = 10;

/// Size of the on-air name buffer, terminator included
pub const MAX_NAME_LEN: usize = 32;

/// Default UDP port for the LAN link
pub const DEFAULT_PORT: u16 = 4210;

/// Target temperature given to newly discovered radiators
pub const DEFAULT_TEMPERATURE: u8 = 20;
