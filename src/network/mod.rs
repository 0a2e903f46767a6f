//! Transport adapters for the radio link
//!
//! A transport moves raw frames between 6-byte addresses. It reports inbound
//! frames and the outcome of every send on one bounded event queue owned by the
//! protocol engine, so no global state is needed to route driver notifications.

mod medium;
mod udp;

pub use self::medium::{Medium, MediumTransport};
pub use self::udp::{LinkCodec, LinkFrame, UdpTransport};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::core::{BoundedTable, Error, MacAddress, Result};

/// Most unicast destinations a radio driver keeps registered at once
pub const MAX_DESTINATIONS: usize = 20;

/// Outcome of a transmission as reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Success,
    Fail,
}

/// Notification raised by a transport driver
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A frame arrived from `src`
    Received { src: MacAddress, data: Bytes },
    /// A transmission to `dst` completed
    SendComplete { dst: MacAddress, status: SendStatus },
}

/// Queue on which a transport delivers its notifications
pub type EventSender = mpsc::Sender<TransportEvent>;

/// Broadcast/unicast radio driver
pub trait Transport: Send + Sync {
    /// Address of this node on the link
    fn local_address(&self) -> MacAddress;

    /// Starts the driver. Receive and send-result notifications are delivered
    /// on `events` from then on.
    fn open(&self, events: EventSender) -> Result<()>;

    /// Registers `addr` as a destination; sends to unregistered addresses fail
    fn add_peer(&self, addr: &MacAddress) -> Result<()>;

    /// Queues `frame` for transmission without waiting for it to go out
    fn send(&self, dst: &MacAddress, frame: Bytes) -> Result<()>;
}

/// Registered destinations of one driver
#[derive(Debug)]
pub(crate) struct Destinations {
    table: BoundedTable<MacAddress>,
}

impl Destinations {
    /// Creates an empty registry
    pub(crate) fn new() -> Self {
        Destinations {
            table: BoundedTable::new("destination registry", MAX_DESTINATIONS),
        }
    }

    /// Registers `addr`; registering a known address again is a no-op
    pub(crate) fn add(&mut self, addr: &MacAddress) -> Result<()> {
        if self.contains(addr) {
            return Ok(());
        }
        self.table.push(*addr).map(|_| ())
    }

    /// Returns true when `addr` is registered
    pub(crate) fn contains(&self, addr: &MacAddress) -> bool {
        self.table.find(|a| a == addr).is_some()
    }

    /// Fails with UnknownDestination unless `addr` was registered
    pub(crate) fn check(&self, addr: &MacAddress) -> Result<()> {
        if self.contains(addr) {
            Ok(())
        } else {
            Err(Error::UnknownDestination(*addr))
        }
    }
}
