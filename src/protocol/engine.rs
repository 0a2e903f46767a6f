use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::{
    truncate_name, BoundedTable, Config, Error, MacAddress, Peer, Result, MAX_ALLOWLIST,
    MAX_PEERS,
};
use crate::network::{EventSender, SendStatus, Transport, TransportEvent};
use super::codec::{self, MAX_PAYLOAD_LEN};
use super::message::{msg_type, DiscoveryPayload, FitsInFrame, Record};

/// Handler for validated non-discovery frames: (source, message type, payload)
pub type ReceiveHandler = Arc<dyn Fn(&MacAddress, u8, &[u8]) + Send + Sync>;
/// Handler for completed transmissions
pub type SendHandler = Arc<dyn Fn(&MacAddress, SendStatus) + Send + Sync>;
/// Handler for newly accepted peers
pub type DiscoveryHandler = Arc<dyn Fn(&Peer) + Send + Sync>;

struct EngineState {
    name: String,
    peers: BoundedTable<Peer>,
    allowlist: BoundedTable<String>,
    started: bool,
}

#[derive(Default)]
struct Handlers {
    receive: Option<ReceiveHandler>,
    send: Option<SendHandler>,
    discovery: Option<DiscoveryHandler>,
}

/// The protocol engine of one node.
///
/// Owns the peer table and the allow-list. Transport notifications arrive on a
/// bounded event queue and are handled one at a time, either by the async
/// [`Communications::run`] loop or cooperatively through
/// [`Communications::process_pending`].
pub struct Communications {
    transport: Arc<dyn Transport>,
    state: Mutex<EngineState>,
    handlers: RwLock<Handlers>,
    events_tx: EventSender,
    events_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
}

impl Communications {
    /// Creates an engine on `transport` with an event queue of `queue_depth`
    pub fn new(transport: Arc<dyn Transport>, queue_depth: usize) -> Self {
        let (events_tx, events_rx) = mpsc::channel(queue_depth.max(1));
        Communications {
            transport,
            state: Mutex::new(EngineState {
                name: "Unknown".to_string(),
                peers: BoundedTable::new("peer table", MAX_PEERS),
                allowlist: BoundedTable::new("allow-list", MAX_ALLOWLIST),
                started: false,
            }),
            handlers: RwLock::new(Handlers::default()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Creates an engine with the name, allow-list and queue depth of `config`
    pub fn from_config(transport: Arc<dyn Transport>, config: &Config) -> Result<Self> {
        config.validate()?;
        let engine = Self::new(transport, config.event_queue_depth);
        engine.set_name(&config.name);
        for name in &config.allowlist {
            engine.add_to_allowlist(name)?;
        }
        Ok(engine)
    }

    /// Opens the transport and registers the broadcast destination.
    ///
    /// A failure is logged and returned; the engine stays usable for table
    /// queries but every send fails until a later `begin` succeeds.
    pub fn begin(&self) -> Result<()> {
        if let Err(e) = self.transport.open(self.events_tx.clone()) {
            error!("Error initializing radio link: {}", e);
            return Err(e);
        }
        if let Err(e) = self.transport.add_peer(&MacAddress::BROADCAST) {
            error!("Failed to register broadcast destination: {}", e);
            return Err(e);
        }

        let mut state = self.state();
        state.started = true;
        info!("Radio link up: '{}' at {}", state.name, self.transport.local_address());
        Ok(())
    }

    /// Sets the advertised name, truncated to the on-air buffer
    pub fn set_name(&self, name: &str) {
        self.state().name = truncate_name(name);
    }

    /// Name advertised in discovery
    pub fn name(&self) -> String {
        self.state().name.clone()
    }

    /// Hardware address of the underlying transport
    pub fn address(&self) -> MacAddress {
        self.transport.local_address()
    }

    /// Accepts discovery only from the listed names once any name is added
    pub fn add_to_allowlist(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        state.allowlist.push(truncate_name(name)).map(|_| ()).map_err(|e| {
            warn!("Allow-list full, cannot add '{}'", name);
            e
        })
    }

    /// Announces this node to everyone in range
    pub fn broadcast_discovery(&self) -> Result<()> {
        let payload = DiscoveryPayload::new(&self.name(), false);
        self.send_record(&MacAddress::BROADCAST, msg_type::DISCOVERY, &payload)?;
        debug!("Discovery message broadcasted");
        Ok(())
    }

    /// Frames `payload` and hands it to the transport without waiting
    pub fn send(&self, addr: &MacAddress, msg_type: u8, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_PAYLOAD_LEN {
            warn!("Payload of {} bytes too large for one frame", payload.len());
            return Err(Error::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        if !self.state().started {
            return Err(Error::invalid_state("Radio link is not initialized"));
        }

        let frame = codec::encode(msg_type, payload)?;
        self.transport.send(addr, frame).map_err(|e| {
            warn!("Failed to send message to {}: {}", addr, e);
            e
        })
    }

    /// Sends a fixed-size record; records larger than one frame do not compile
    pub fn send_record<R: Record>(&self, addr: &MacAddress, msg_type: u8, record: &R) -> Result<()> {
        #[allow(clippy::let_unit_value)]
        let () = FitsInFrame::<R>::OK;
        let bytes = record.to_bytes()?;
        self.send(addr, msg_type, &bytes)
    }

    /// Sets the handler for validated application frames
    pub fn set_receive_handler(&self, handler: impl Fn(&MacAddress, u8, &[u8]) + Send + Sync + 'static) {
        self.handlers_mut().receive = Some(Arc::new(handler));
    }

    /// Sets the handler for send-result notifications
    pub fn set_send_handler(&self, handler: impl Fn(&MacAddress, SendStatus) + Send + Sync + 'static) {
        self.handlers_mut().send = Some(Arc::new(handler));
    }

    /// Sets the handler called once for each newly accepted peer
    pub fn set_discovery_handler(&self, handler: impl Fn(&Peer) + Send + Sync + 'static) {
        self.handlers_mut().discovery = Some(Arc::new(handler));
    }

    /// Number of discovered peers
    pub fn peer_count(&self) -> usize {
        self.state().peers.len()
    }

    /// Peer at `index` in discovery order
    pub fn peer(&self, index: usize) -> Option<Peer> {
        self.state().peers.get(index).cloned()
    }

    /// First peer advertising `name`
    pub fn peer_by_name(&self, name: &str) -> Option<Peer> {
        self.state().peers.find(|p| p.name == name).cloned()
    }

    /// Snapshot of the peer table
    pub fn peers(&self) -> Vec<Peer> {
        self.state().peers.iter().cloned().collect()
    }

    /// Runs the dispatch loop until the task is cancelled
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut rx = self
            .events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| Error::invalid_state("Event loop is already running"))?;

        while let Some(event) = rx.recv().await {
            self.handle_event(event);
        }
        Ok(())
    }

    /// Handles every queued event without waiting; returns how many were handled.
    /// Must not be called from inside a handler.
    pub fn process_pending(&self) -> usize {
        let mut handled = 0;
        loop {
            let next = {
                let mut slot = self.events_rx.lock().unwrap_or_else(PoisonError::into_inner);
                slot.as_mut().and_then(|rx| rx.try_recv().ok())
            };
            match next {
                Some(event) => {
                    self.handle_event(event);
                    handled += 1;
                }
                None => return handled,
            }
        }
    }

    /// Dispatches one transport notification
    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Received { src, data } => self.on_receive(&src, &data),
            TransportEvent::SendComplete { dst, status } => self.on_send_complete(&dst, status),
        }
    }

    fn on_receive(&self, src: &MacAddress, data: &[u8]) {
        let (header, payload) = match codec::decode(data) {
            Ok(frame) => frame,
            Err(e) if e.is_malformed_frame() => {
                debug!("Dropping malformed frame from {}: {}", src, e);
                return;
            }
            Err(e) => {
                warn!("Dropping frame from {}: {}", src, e);
                return;
            }
        };

        if header.is_discovery() {
            if payload.len() != DiscoveryPayload::WIRE_SIZE {
                debug!("Invalid discovery payload length {} from {}", payload.len(), src);
                return;
            }
            match DiscoveryPayload::from_bytes(payload) {
                Ok(discovery) => self.handle_discovery(src, &discovery),
                Err(e) => debug!("Undecodable discovery payload from {}: {}", src, e),
            }
            return;
        }

        let handler = self.handlers().receive.clone();
        if let Some(handler) = handler {
            handler(src, header.msg_type, payload);
        }
    }

    fn on_send_complete(&self, dst: &MacAddress, status: SendStatus) {
        debug!("Sent to {} {:?}", dst, status);
        let handler = self.handlers().send.clone();
        if let Some(handler) = handler {
            handler(dst, status);
        }
    }

    fn handle_discovery(&self, src: &MacAddress, payload: &DiscoveryPayload) {
        let name = payload.name();

        let added = {
            let mut state = self.state();

            if !state.allowlist.is_empty() && state.allowlist.find(|n| *n == name).is_none() {
                info!("Discovery ignored: '{}' not in allow-list", name);
                return;
            }

            if state.peers.find(|p| p.address == *src).is_some() {
                None
            } else if state.peers.is_full() {
                warn!("Max peers reached; ignoring discovery from '{}' ({})", name, src);
                return;
            } else {
                if let Err(e) = self.transport.add_peer(src) {
                    warn!("Failed to add peer {}: {}", src, e);
                    return;
                }
                let peer = Peer { address: *src, name };
                if let Err(e) = state.peers.push(peer.clone()) {
                    warn!("Failed to record peer {}: {}", src, e);
                    return;
                }
                Some(peer)
            }
        };

        if !payload.is_response {
            self.send_discovery_response(src);
        }

        if let Some(peer) = added {
            info!("Discovered new peer: {} ({})", peer.name, peer.address);
            let handler = self.handlers().discovery.clone();
            if let Some(handler) = handler {
                handler(&peer);
            }
        }
    }

    fn send_discovery_response(&self, addr: &MacAddress) {
        let payload = DiscoveryPayload::new(&self.name(), true);
        match self.send_record(addr, msg_type::DISCOVERY, &payload) {
            Ok(()) => debug!("Sent discovery response to {}", addr),
            Err(e) => warn!("Discovery response to {} failed: {}", addr, e),
        }
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handlers(&self) -> std::sync::RwLockReadGuard<'_, Handlers> {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn handlers_mut(&self) -> std::sync::RwLockWriteGuard<'_, Handlers> {
        self.handlers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::network::Medium;
    use crate::protocol::codec::{decode, encode, MESSAGE_MAGIC};

    /// Transport that records every call instead of transmitting
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub(crate) sent: Mutex<Vec<(MacAddress, Bytes)>>,
        pub(crate) registered: Mutex<Vec<MacAddress>>,
        pub(crate) fail_open: bool,
        pub(crate) reject_peers: bool,
    }

    impl RecordingTransport {
        /// Discovery payloads sent to `to`
        pub(crate) fn discoveries_to(&self, to: &MacAddress) -> Vec<DiscoveryPayload> {
            self.frames_to(to, msg_type::DISCOVERY)
                .iter()
                .map(|p| DiscoveryPayload::from_bytes(p).unwrap())
                .collect()
        }

        /// Payloads of type `ty` sent to `to`
        pub(crate) fn frames_to(&self, to: &MacAddress, ty: u8) -> Vec<Vec<u8>> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(dst, _)| dst == to)
                .filter_map(|(_, frame)| {
                    let (header, payload) = decode(frame).unwrap();
                    (header.msg_type == ty).then(|| payload.to_vec())
                })
                .collect()
        }
    }

    impl Transport for RecordingTransport {
        fn local_address(&self) -> MacAddress {
            MacAddress([0x02, 0, 0, 0, 0, 0xAA])
        }

        fn open(&self, _events: EventSender) -> Result<()> {
            if self.fail_open {
                return Err(Error::transport("radio init failed"));
            }
            Ok(())
        }

        fn add_peer(&self, addr: &MacAddress) -> Result<()> {
            if self.reject_peers && !addr.is_broadcast() {
                return Err(Error::transport("peer list full"));
            }
            self.registered.lock().unwrap().push(*addr);
            Ok(())
        }

        fn send(&self, dst: &MacAddress, frame: Bytes) -> Result<()> {
            self.sent.lock().unwrap().push((*dst, frame));
            Ok(())
        }
    }

    pub(crate) fn mac(last: u8) -> MacAddress {
        MacAddress([0x02, 0, 0, 0, 1, last])
    }

    pub(crate) fn discovery_frame(name: &str, is_response: bool) -> Bytes {
        let payload = DiscoveryPayload::new(name, is_response).to_bytes().unwrap();
        encode(msg_type::DISCOVERY, &payload).unwrap()
    }

    fn started(transport: &Arc<RecordingTransport>) -> Communications {
        let engine = Communications::new(transport.clone(), 16);
        engine.set_name("Controller");
        engine.begin().unwrap();
        engine
    }

    fn deliver(engine: &Communications, src: MacAddress, data: Bytes) {
        engine.handle_event(TransportEvent::Received { src, data });
    }

    #[test]
    fn test_begin_registers_broadcast() {
        let transport = Arc::new(RecordingTransport::default());
        let _engine = started(&transport);
        assert_eq!(*transport.registered.lock().unwrap(), vec![MacAddress::BROADCAST]);
    }

    #[test]
    fn test_begin_failure_blocks_sends() {
        let transport = Arc::new(RecordingTransport {
            fail_open: true,
            ..Default::default()
        });
        let engine = Communications::new(transport.clone(), 16);
        assert!(engine.begin().is_err());
        assert!(matches!(engine.broadcast_discovery(), Err(Error::InvalidState(_))));
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_broadcast_discovery() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = started(&transport);
        engine.broadcast_discovery().unwrap();

        let sent = transport.discoveries_to(&MacAddress::BROADCAST);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].name(), "Controller");
        assert!(!sent[0].is_response);
    }

    #[test]
    fn test_set_name_truncates() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = Communications::new(transport, 4);
        engine.set_name(&"a".repeat(64));
        assert_eq!(engine.name().len(), 31);
    }

    #[test]
    fn test_discovery_is_idempotent_per_address() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = started(&transport);
        let discovered = Arc::new(AtomicUsize::new(0));
        let counter = discovered.clone();
        engine.set_discovery_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        deliver(&engine, mac(1), discovery_frame("Room", false));
        deliver(&engine, mac(1), discovery_frame("Room", false));

        assert_eq!(engine.peer_count(), 1);
        assert_eq!(discovered.load(Ordering::SeqCst), 1);

        let responses = transport.discoveries_to(&mac(1));
        assert_eq!(responses.len(), 2);
        assert!(responses.iter().all(|r| r.is_response && r.name() == "Controller"));
    }

    #[test]
    fn test_response_is_not_answered() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = started(&transport);

        deliver(&engine, mac(1), discovery_frame("Room", true));
        deliver(&engine, mac(1), discovery_frame("Room", true));

        assert_eq!(engine.peer_count(), 1);
        assert!(transport.discoveries_to(&mac(1)).is_empty());
    }

    #[test]
    fn test_allowlist_enforced() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = Communications::new(transport.clone(), 16);
        engine.add_to_allowlist("Kitchen").unwrap();
        engine.begin().unwrap();

        deliver(&engine, mac(1), discovery_frame("Garage", false));
        assert_eq!(engine.peer_count(), 0);
        assert!(transport.sent.lock().unwrap().is_empty());

        deliver(&engine, mac(2), discovery_frame("Kitchen", false));
        assert_eq!(engine.peer_count(), 1);
        assert_eq!(engine.peer_by_name("Kitchen").unwrap().address, mac(2));
    }

    #[test]
    fn test_allowlist_capacity() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = Communications::new(transport, 16);
        for i in 0..MAX_ALLOWLIST {
            engine.add_to_allowlist(&format!("Room {}", i)).unwrap();
        }
        assert!(matches!(
            engine.add_to_allowlist("One more"),
            Err(Error::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn test_peer_table_capacity() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = started(&transport);

        for i in 0..MAX_PEERS as u8 {
            deliver(&engine, mac(i), discovery_frame(&format!("Room {}", i), false));
        }
        assert_eq!(engine.peer_count(), MAX_PEERS);

        deliver(&engine, mac(200), discovery_frame("Late", false));
        assert_eq!(engine.peer_count(), MAX_PEERS);
        assert!(engine.peer_by_name("Late").is_none());
        assert!(transport.discoveries_to(&mac(200)).is_empty());

        // Insertion order is discovery order
        assert_eq!(engine.peer(0).unwrap().name, "Room 0");
        assert_eq!(engine.peer(9).unwrap().name, "Room 9");
        assert!(engine.peer(10).is_none());
    }

    #[test]
    fn test_rejected_registration_adds_nothing() {
        let transport = Arc::new(RecordingTransport {
            reject_peers: true,
            ..Default::default()
        });
        let engine = started(&transport);

        deliver(&engine, mac(1), discovery_frame("Room", false));
        assert_eq!(engine.peer_count(), 0);
        assert!(transport.discoveries_to(&mac(1)).is_empty());
    }

    #[test]
    fn test_malformed_frames_dropped() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = started(&transport);
        let received = Arc::new(AtomicUsize::new(0));
        let counter = received.clone();
        engine.set_receive_handler(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let magic = MESSAGE_MAGIC.to_le_bytes();
        deliver(&engine, mac(1), Bytes::from_static(&[0xA7, 0x42]));
        deliver(&engine, mac(1), Bytes::from(vec![0x00, 0x00, 5, 0]));
        deliver(&engine, mac(1), Bytes::from(vec![magic[0], magic[1], 5, 3, 1]));
        // discovery frame with a short payload
        deliver(&engine, mac(1), encode(msg_type::DISCOVERY, b"Room").unwrap());

        assert_eq!(received.load(Ordering::SeqCst), 0);
        assert_eq!(engine.peer_count(), 0);
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_application_frames_dispatched() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = started(&transport);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        engine.set_receive_handler(move |src, ty, payload| {
            sink.lock().unwrap().push((*src, ty, payload.to_vec()));
        });

        deliver(&engine, mac(3), encode(7, &[9, 8, 7]).unwrap());
        assert_eq!(*seen.lock().unwrap(), vec![(mac(3), 7, vec![9, 8, 7])]);
    }

    #[test]
    fn test_send_validates_before_transport() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = started(&transport);

        let err = engine.send(&mac(1), 1, &[0u8; 249]).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { len: 249, max: 248 }));
        assert!(transport.sent.lock().unwrap().is_empty());

        engine.send(&mac(1), 1, &[0u8; 248]).unwrap();
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_send_handler_invoked() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = started(&transport);
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = results.clone();
        engine.set_send_handler(move |dst, status| sink.lock().unwrap().push((*dst, status)));

        engine.handle_event(TransportEvent::SendComplete {
            dst: mac(4),
            status: SendStatus::Fail,
        });
        assert_eq!(*results.lock().unwrap(), vec![(mac(4), SendStatus::Fail)]);
    }

    #[test]
    fn test_from_config() {
        let transport = Arc::new(RecordingTransport::default());
        let config = Config {
            name: "Hall".to_string(),
            allowlist: vec!["Kitchen".to_string()],
            ..Config::default()
        };
        let engine = Communications::from_config(transport.clone(), &config).unwrap();
        engine.begin().unwrap();
        assert_eq!(engine.name(), "Hall");

        deliver(&engine, mac(1), discovery_frame("Garage", false));
        assert_eq!(engine.peer_count(), 0);
    }

    fn medium_node(medium: &Arc<Medium>, last: u8, name: &str) -> Communications {
        let engine = Communications::new(Arc::new(medium.attach(mac(last))), 32);
        engine.set_name(name);
        engine.begin().unwrap();
        engine
    }

    fn settle(nodes: &[&Communications]) {
        while nodes.iter().map(|n| n.process_pending()).sum::<usize>() > 0 {}
    }

    #[test]
    fn test_symmetric_discovery_over_medium() {
        let medium = Medium::new();
        let a = medium_node(&medium, 1, "A");
        let b = medium_node(&medium, 2, "B");

        for _ in 0..2 {
            a.broadcast_discovery().unwrap();
            settle(&[&a, &b]);
            b.broadcast_discovery().unwrap();
            settle(&[&a, &b]);
        }

        assert_eq!(a.peers(), vec![Peer { address: mac(2), name: "B".to_string() }]);
        assert_eq!(b.peers(), vec![Peer { address: mac(1), name: "A".to_string() }]);
    }

    #[tokio::test]
    async fn test_run_loop_dispatches() {
        let medium = Medium::new();
        let a = Arc::new(medium_node(&medium, 1, "A"));
        let b = Arc::new(medium_node(&medium, 2, "B"));

        let a_task = tokio::spawn(a.clone().run());
        let b_task = tokio::spawn(b.clone().run());

        a.broadcast_discovery().unwrap();
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
        while (a.peer_count() == 0 || b.peer_count() == 0) && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        assert_eq!(a.peer_by_name("B").map(|p| p.address), Some(mac(2)));
        assert_eq!(b.peer_by_name("A").map(|p| p.address), Some(mac(1)));
        assert!(matches!(a.clone().run().await, Err(Error::InvalidState(_))));

        a_task.abort();
        b_task.abort();
    }
}
