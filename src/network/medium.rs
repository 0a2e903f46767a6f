use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace, warn};

use crate::core::{Error, MacAddress, Result};
use super::{Destinations, EventSender, SendStatus, Transport, TransportEvent};

/// In-process broadcast medium shared by any number of simulated radios
pub struct Medium {
    inner: Mutex<MediumInner>,
}

struct MediumInner {
    /// Event queues of the attached, opened radios
    nodes: HashMap<MacAddress, EventSender>,
    /// Probability that one delivery is lost
    loss: f64,
    rng: StdRng,
}

impl Medium {
    /// Creates a lossless medium
    pub fn new() -> Arc<Self> {
        Self::with_loss(0.0, rand::random())
    }

    /// Creates a medium that drops each delivery with probability `loss`
    pub fn with_loss(loss: f64, seed: u64) -> Arc<Self> {
        Arc::new(Medium {
            inner: Mutex::new(MediumInner {
                nodes: HashMap::new(),
                loss: loss.clamp(0.0, 1.0),
                rng: StdRng::seed_from_u64(seed),
            }),
        })
    }

    /// Creates a radio with `address` on this medium
    pub fn attach(self: &Arc<Self>, address: MacAddress) -> MediumTransport {
        MediumTransport {
            medium: Arc::clone(self),
            address,
            destinations: Mutex::new(Destinations::new()),
            events: Mutex::new(None),
        }
    }

    fn join(&self, address: MacAddress, events: EventSender) -> Result<()> {
        let mut inner = self.lock();
        if inner.nodes.contains_key(&address) {
            return Err(Error::invalid_state(format!("{} is already on the medium", address)));
        }
        inner.nodes.insert(address, events);
        Ok(())
    }

    /// Delivers `frame` and reports whether the transmission succeeded.
    /// Broadcasts always succeed; unicasts succeed only when delivered.
    fn transmit(&self, src: MacAddress, dst: MacAddress, frame: &Bytes) -> SendStatus {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if dst.is_broadcast() {
            for (addr, tx) in inner.nodes.iter() {
                if *addr == src {
                    continue;
                }
                if inner.loss > 0.0 && inner.rng.gen_bool(inner.loss) {
                    trace!("Broadcast from {} lost before {}", src, addr);
                    continue;
                }
                let event = TransportEvent::Received { src, data: frame.clone() };
                if tx.try_send(event).is_err() {
                    debug!("Receive queue of {} unavailable; frame dropped", addr);
                }
            }
            return SendStatus::Success;
        }

        let Some(tx) = inner.nodes.get(&dst) else {
            return SendStatus::Fail;
        };
        if inner.loss > 0.0 && inner.rng.gen_bool(inner.loss) {
            trace!("Unicast {} -> {} lost", src, dst);
            return SendStatus::Fail;
        }
        match tx.try_send(TransportEvent::Received { src, data: frame.clone() }) {
            Ok(()) => SendStatus::Success,
            Err(_) => SendStatus::Fail,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MediumInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A simulated radio attached to a [`Medium`]
pub struct MediumTransport {
    medium: Arc<Medium>,
    address: MacAddress,
    destinations: Mutex<Destinations>,
    events: Mutex<Option<EventSender>>,
}

impl Transport for MediumTransport {
    fn local_address(&self) -> MacAddress {
        self.address
    }

    fn open(&self, events: EventSender) -> Result<()> {
        let mut slot = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(Error::invalid_state("Radio is already open"));
        }
        self.medium.join(self.address, events.clone())?;
        *slot = Some(events);
        Ok(())
    }

    fn add_peer(&self, addr: &MacAddress) -> Result<()> {
        self.destinations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(addr)
    }

    fn send(&self, dst: &MacAddress, frame: Bytes) -> Result<()> {
        let events = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::transport("Radio is not open"))?;
        self.destinations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .check(dst)?;

        let status = self.medium.transmit(self.address, *dst, &frame);
        if events
            .try_send(TransportEvent::SendComplete { dst: *dst, status })
            .is_err()
        {
            warn!("Send result for {} dropped: event queue full", dst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn mac(last: u8) -> MacAddress {
        MacAddress([0x02, 0, 0, 0, 0, last])
    }

    fn open(medium: &Arc<Medium>, last: u8) -> (MediumTransport, mpsc::Receiver<TransportEvent>) {
        let radio = medium.attach(mac(last));
        let (tx, rx) = mpsc::channel(16);
        radio.open(tx).unwrap();
        radio.add_peer(&MacAddress::BROADCAST).unwrap();
        (radio, rx)
    }

    #[test]
    fn test_broadcast_reaches_others_only() {
        let medium = Medium::new();
        let (a, mut a_rx) = open(&medium, 1);
        let (_b, mut b_rx) = open(&medium, 2);
        let (_c, mut c_rx) = open(&medium, 3);

        a.send(&MacAddress::BROADCAST, Bytes::from_static(b"hi")).unwrap();

        for rx in [&mut b_rx, &mut c_rx] {
            match rx.try_recv().unwrap() {
                TransportEvent::Received { src, data } => {
                    assert_eq!(src, mac(1));
                    assert_eq!(data.as_ref(), b"hi");
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert!(matches!(
            a_rx.try_recv().unwrap(),
            TransportEvent::SendComplete { status: SendStatus::Success, .. }
        ));
        assert!(a_rx.try_recv().is_err());
    }

    #[test]
    fn test_unicast_requires_registration() {
        let medium = Medium::new();
        let (a, mut a_rx) = open(&medium, 1);
        let (_b, mut b_rx) = open(&medium, 2);
        let (_c, mut c_rx) = open(&medium, 3);

        let err = a.send(&mac(2), Bytes::from_static(b"x")).unwrap_err();
        assert!(matches!(err, Error::UnknownDestination(_)));
        assert!(a_rx.try_recv().is_err());

        a.add_peer(&mac(2)).unwrap();
        a.send(&mac(2), Bytes::from_static(b"x")).unwrap();
        assert!(matches!(b_rx.try_recv().unwrap(), TransportEvent::Received { .. }));
        assert!(c_rx.try_recv().is_err());
        assert!(matches!(
            a_rx.try_recv().unwrap(),
            TransportEvent::SendComplete { status: SendStatus::Success, .. }
        ));
    }

    #[test]
    fn test_unicast_to_absent_node_fails() {
        let medium = Medium::new();
        let (a, mut a_rx) = open(&medium, 1);

        a.add_peer(&mac(9)).unwrap();
        a.send(&mac(9), Bytes::from_static(b"x")).unwrap();
        assert!(matches!(
            a_rx.try_recv().unwrap(),
            TransportEvent::SendComplete { status: SendStatus::Fail, .. }
        ));
    }

    #[test]
    fn test_total_loss() {
        let medium = Medium::with_loss(1.0, 7);
        let (a, mut a_rx) = open(&medium, 1);
        let (_b, mut b_rx) = open(&medium, 2);

        a.add_peer(&mac(2)).unwrap();
        a.send(&mac(2), Bytes::from_static(b"x")).unwrap();
        assert!(b_rx.try_recv().is_err());
        assert!(matches!(
            a_rx.try_recv().unwrap(),
            TransportEvent::SendComplete { status: SendStatus::Fail, .. }
        ));
    }

    #[test]
    fn test_send_before_open_fails() {
        let medium = Medium::new();
        let radio = medium.attach(mac(1));
        radio.add_peer(&MacAddress::BROADCAST).unwrap();
        assert!(matches!(
            radio.send(&MacAddress::BROADCAST, Bytes::new()),
            Err(Error::Transport(_))
        ));
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let medium = Medium::new();
        let (_a, _rx) = open(&medium, 1);
        let twin = medium.attach(mac(1));
        let (tx, _twin_rx) = mpsc::channel(4);
        assert!(twin.open(tx).is_err());
    }
}
