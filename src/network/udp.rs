use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Mutex, PoisonError};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::udp::UdpFramed;
use tracing::{debug, error, info, warn};

use crate::core::{Config, Error, MacAddress, Result};
use super::{Destinations, EventSender, SendStatus, Transport, TransportEvent};

/// Envelope header: source address (6) + destination address (6)
const ENVELOPE_HEADER: usize = 12;

/// Depth of the outbound datagram queue
const OUTBOUND_QUEUE: usize = 32;

/// A frame wrapped with its link-level source and destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFrame {
    pub src: MacAddress,
    pub dst: MacAddress,
    pub frame: Bytes,
}

/// Datagram codec for the LAN link envelope
#[derive(Clone, Default)]
pub struct LinkCodec;

impl Decoder for LinkCodec {
    type Item = LinkFrame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        // One datagram is one envelope; consume it whole so a bad one is not retried
        let mut datagram = src.split();
        if datagram.len() < ENVELOPE_HEADER {
            return Err(Error::transport(format!(
                "Datagram of {} bytes is shorter than the link envelope",
                datagram.len()
            )));
        }

        let mut src_addr = [0u8; 6];
        let mut dst_addr = [0u8; 6];
        datagram.copy_to_slice(&mut src_addr);
        datagram.copy_to_slice(&mut dst_addr);

        Ok(Some(LinkFrame {
            src: MacAddress(src_addr),
            dst: MacAddress(dst_addr),
            frame: datagram.freeze(),
        }))
    }
}

impl Encoder<LinkFrame> for LinkCodec {
    type Error = Error;

    fn encode(&mut self, item: LinkFrame, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        dst.reserve(ENVELOPE_HEADER + item.frame.len());
        dst.put_slice(&item.src.0);
        dst.put_slice(&item.dst.0);
        dst.put_slice(&item.frame);
        Ok(())
    }
}

/// Radio link emulated over UDP broadcast on a LAN.
///
/// Every node binds the same port and every envelope is broadcast; receivers keep
/// the envelopes addressed to them or to the broadcast address.
pub struct UdpTransport {
    address: MacAddress,
    target: SocketAddr,
    socket: Mutex<Option<std::net::UdpSocket>>,
    outbound: Mutex<Option<mpsc::Sender<LinkFrame>>>,
    destinations: Mutex<Destinations>,
}

impl UdpTransport {
    /// Binds the shared link port described by `config`
    pub fn bind(config: &Config) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port);
        socket
            .bind(&SocketAddr::V4(bind_addr).into())
            .map_err(|e| Error::transport(format!("Failed to bind {}: {}", bind_addr, e)))?;

        let address = config.local_address.unwrap_or_else(MacAddress::random);
        info!("LAN link bound on {} as {}", bind_addr, address);

        Ok(UdpTransport {
            address,
            target: SocketAddr::V4(SocketAddrV4::new(config.broadcast_addr, config.port)),
            socket: Mutex::new(Some(socket.into())),
            outbound: Mutex::new(None),
            destinations: Mutex::new(Destinations::new()),
        })
    }
}

impl Transport for UdpTransport {
    fn local_address(&self) -> MacAddress {
        self.address
    }

    fn open(&self, events: EventSender) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::transport(format!("LAN link needs a tokio runtime: {}", e)))?;
        let std_socket = self
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| Error::invalid_state("LAN link is already open"))?;

        let socket = {
            let _guard = runtime.enter();
            tokio::net::UdpSocket::from_std(std_socket)?
        };
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);

        runtime.spawn(drive(
            UdpFramed::new(socket, LinkCodec),
            rx,
            events,
            self.address,
            self.target,
        ));
        Ok(())
    }

    fn add_peer(&self, addr: &MacAddress) -> Result<()> {
        self.destinations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(addr)
    }

    fn send(&self, dst: &MacAddress, frame: Bytes) -> Result<()> {
        self.destinations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .check(dst)?;
        let outbound = self
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::transport("LAN link is not open"))?;

        outbound
            .try_send(LinkFrame {
                src: self.address,
                dst: *dst,
                frame,
            })
            .map_err(|e| Error::transport(format!("Outbound queue unavailable: {}", e)))
    }
}

/// Driver task: moves queued envelopes onto the socket and datagrams onto the
/// event queue until either side closes.
async fn drive(
    framed: UdpFramed<LinkCodec>,
    mut outbound: mpsc::Receiver<LinkFrame>,
    events: EventSender,
    local: MacAddress,
    target: SocketAddr,
) {
    let (mut sink, mut stream) = framed.split();

    loop {
        tokio::select! {
            Some(envelope) = outbound.recv() => {
                let dst = envelope.dst;
                let status = match sink.send((envelope, target)).await {
                    Ok(()) => SendStatus::Success,
                    Err(e) => {
                        warn!("Failed to send datagram to {}: {}", dst, e);
                        SendStatus::Fail
                    }
                };
                if events.send(TransportEvent::SendComplete { dst, status }).await.is_err() {
                    break;
                }
            }

            Some(item) = stream.next() => {
                let envelope = match item {
                    Ok((envelope, _from)) => envelope,
                    Err(e) => {
                        debug!("Dropping datagram: {}", e);
                        continue;
                    }
                };
                if envelope.src == local {
                    continue;
                }
                if envelope.dst != local && !envelope.dst.is_broadcast() {
                    continue;
                }
                let event = TransportEvent::Received { src: envelope.src, data: envelope.frame };
                if events.send(event).await.is_err() {
                    break;
                }
            }

            else => break,
        }
    }

    error!("LAN link driver for {} stopped", local);
}
