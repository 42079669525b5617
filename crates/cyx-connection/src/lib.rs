//! ConnectionManager (spec §4.1): per-peer reachability state, opportunistic
//! X25519 key exchange, and direct-vs-relay dispatch.

pub mod wire;

use cyx_crypto::x25519::X25519PublicKey;
use cyx_onion::Onion;
use cyx_relay::RelayClient;
use cyx_transport::Transport;
use cyx_types::NodeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use wire::DiscoveryFrame;

pub const MAX_PEERS: usize = 32;
const ANNOUNCE_THROTTLE_MS: u64 = 60_000;
const PEER_TIMEOUT_MS: u64 = 90_000;
const KEEPALIVE_INTERVAL_MS: u64 = 30_000;
const RELAY_FALLBACK_MS: u64 = 5_000;

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("peer table is full")]
    Full,
    #[error("network error reaching peer")]
    Network,
    #[error("connect attempt timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, ConnectionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Disconnected,
    Discovering,
    Connecting,
    Relaying,
    Connected,
}

pub struct PeerConn {
    pub peer_id: NodeId,
    pub state: PeerState,
    pub connected_at: u64,
    pub last_activity: u64,
    pub last_keepalive: u64,
    pub last_announce_sent: u64,
    pub last_key_exchange: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub rssi: i32,
    pub is_relayed: bool,
}

impl PeerConn {
    fn new(peer_id: NodeId) -> Self {
        Self {
            peer_id,
            state: PeerState::Disconnected,
            connected_at: 0,
            last_activity: 0,
            last_keepalive: 0,
            last_announce_sent: 0,
            last_key_exchange: 0,
            bytes_sent: 0,
            bytes_received: 0,
            rssi: 0,
            is_relayed: false,
        }
    }
}

struct PendingConnect {
    start_time_ms: u64,
}

/// A dispatched inbound event, drained by the host via [`ConnectionManager::poll`].
#[derive(Debug)]
pub enum ConnEvent {
    Connected { peer: NodeId },
    Disconnected { peer: NodeId },
    Raw { from: NodeId, bytes: Vec<u8> },
    OnionData { from: NodeId, cleartext: Vec<u8> },
}

/// Tracks reachability for up to [`MAX_PEERS`] peers and decides whether a
/// session rides direct UDP, a relay tunnel, or has timed out.
pub struct ConnectionManager {
    local_id: NodeId,
    transport: Rc<dyn Transport>,
    onion: Rc<dyn Onion>,
    relay: Rc<RelayClient>,
    peers: RefCell<HashMap<NodeId, PeerConn>>,
    pending: RefCell<HashMap<NodeId, PendingConnect>>,
    events: RefCell<Vec<ConnEvent>>,
}

impl ConnectionManager {
    pub fn new(
        local_id: NodeId,
        transport: Rc<dyn Transport>,
        onion: Rc<dyn Onion>,
        relay: Rc<RelayClient>,
    ) -> Self {
        Self {
            local_id,
            transport,
            onion,
            relay,
            peers: RefCell::new(HashMap::new()),
            pending: RefCell::new(HashMap::new()),
            events: RefCell::new(Vec::new()),
        }
    }

    pub fn peer_state(&self, peer: NodeId) -> Option<PeerState> {
        self.peers.borrow().get(&peer).map(|p| p.state)
    }

    fn ensure_peer(&self, peer: NodeId) -> Result<()> {
        let mut peers = self.peers.borrow_mut();
        if peers.contains_key(&peer) {
            return Ok(());
        }
        if peers.len() >= MAX_PEERS {
            return Err(ConnectionError::Full);
        }
        peers.insert(peer, PeerConn::new(peer));
        Ok(())
    }

    /// Send an Announce to a newly discovered or explicitly connected peer,
    /// subject to the 60s outbound throttle.
    fn send_announce(&self, peer: NodeId, now_ms: u64) {
        let should_send = {
            let peers = self.peers.borrow();
            peers
                .get(&peer)
                .map(|p| now_ms.saturating_sub(p.last_announce_sent) >= ANNOUNCE_THROTTLE_MS || p.last_announce_sent == 0)
                .unwrap_or(true)
        };
        if !should_send {
            return;
        }
        let frame = DiscoveryFrame::Announce {
            x25519_pubkey: *self.onion.get_pubkey().as_bytes(),
        };
        match self.transport.send(peer, &frame.to_bytes()) {
            Ok(()) => {
                if let Some(p) = self.peers.borrow_mut().get_mut(&peer) {
                    p.last_announce_sent = now_ms;
                }
            }
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "announce send failed");
            }
        }
    }

    /// Register discovery of a peer (from transport discovery or a DHT
    /// callback) and kick off opportunistic key exchange.
    pub fn on_peer_discovered(&self, peer: NodeId, now_ms: u64) -> Result<()> {
        self.ensure_peer(peer)?;
        if let Some(p) = self.peers.borrow_mut().get_mut(&peer) {
            if p.state == PeerState::Disconnected {
                p.state = PeerState::Discovering;
            }
        }
        self.send_announce(peer, now_ms);
        Ok(())
    }

    /// Explicitly request a connection to `peer`. Reported complete
    /// immediately if already connected or relaying.
    pub fn connect(&self, peer: NodeId, now_ms: u64) -> Result<()> {
        self.ensure_peer(peer)?;
        {
            let peers = self.peers.borrow();
            if let Some(p) = peers.get(&peer) {
                if p.state == PeerState::Connected || p.state == PeerState::Relaying {
                    return Ok(());
                }
            }
        }
        if let Some(p) = self.peers.borrow_mut().get_mut(&peer) {
            p.state = PeerState::Connecting;
        }
        self.pending.borrow_mut().insert(peer, PendingConnect { start_time_ms: now_ms });
        self.send_announce(peer, now_ms);
        Ok(())
    }

    pub fn disconnect(&self, peer: NodeId) {
        if let Some(p) = self.peers.borrow_mut().get_mut(&peer) {
            if p.is_relayed {
                let _ = self.relay.disconnect(peer);
            }
            p.state = PeerState::Disconnected;
            p.is_relayed = false;
        }
        let _ = self.transport.send(peer, &DiscoveryFrame::Goodbye.to_bytes());
    }

    /// Handle a raw inbound frame, dispatching by its first byte (§4.1).
    fn handle_inbound(&self, from: NodeId, bytes: &[u8], now_ms: u64) {
        if self.ensure_peer(from).is_err() {
            tracing::warn!(peer = %from, "peer table full, dropping inbound frame");
            return;
        }
        if let Some(p) = self.peers.borrow_mut().get_mut(&from) {
            p.last_activity = now_ms;
            p.bytes_received += bytes.len() as u64;
        }

        let Some(&first) = bytes.first() else { return };

        if DiscoveryFrame::is_discovery_byte(first) {
            self.handle_discovery(from, bytes, now_ms);
            return;
        }
        if cyx_relay::wire::RelayFrame::from_bytes(bytes).is_some() {
            if let Some((origin, payload)) = self.relay.handle_inbound(bytes, now_ms) {
                self.events.borrow_mut().push(ConnEvent::Raw { from: origin, bytes: payload });
            }
            return;
        }
        self.events.borrow_mut().push(ConnEvent::Raw { from, bytes: bytes.to_vec() });
    }

    fn handle_discovery(&self, from: NodeId, bytes: &[u8], now_ms: u64) {
        let Some(frame) = DiscoveryFrame::from_bytes(bytes) else {
            return; // parse errors are dropped silently
        };
        match frame {
            DiscoveryFrame::Announce { x25519_pubkey } => {
                let throttled = {
                    let peers = self.peers.borrow();
                    peers
                        .get(&from)
                        .map(|p| now_ms.saturating_sub(p.last_key_exchange) < ANNOUNCE_THROTTLE_MS && p.last_key_exchange != 0)
                        .unwrap_or(false)
                };
                if throttled {
                    return;
                }
                self.onion.add_peer_key(from, X25519PublicKey::from_bytes(x25519_pubkey));
                let was_connected = {
                    let mut peers = self.peers.borrow_mut();
                    let p = peers.get_mut(&from).expect("ensured above");
                    p.last_key_exchange = now_ms;
                    let was = p.state == PeerState::Connected;
                    p.state = PeerState::Connected;
                    p.connected_at = now_ms;
                    was
                };
                self.pending.borrow_mut().remove(&from);
                let ack = DiscoveryFrame::AnnounceAck { x25519_pubkey: *self.onion.get_pubkey().as_bytes() };
                let _ = self.transport.send(from, &ack.to_bytes());
                if !was_connected {
                    self.events.borrow_mut().push(ConnEvent::Connected { peer: from });
                }
            }
            DiscoveryFrame::AnnounceAck { x25519_pubkey } => {
                self.onion.add_peer_key(from, X25519PublicKey::from_bytes(x25519_pubkey));
                let was_connected = {
                    let mut peers = self.peers.borrow_mut();
                    let p = peers.get_mut(&from).expect("ensured above");
                    let was = p.state == PeerState::Connected;
                    p.state = PeerState::Connected;
                    p.connected_at = now_ms;
                    was
                };
                self.pending.borrow_mut().remove(&from);
                if !was_connected {
                    self.events.borrow_mut().push(ConnEvent::Connected { peer: from });
                }
            }
            DiscoveryFrame::Ping => {
                let _ = self.transport.send(from, &DiscoveryFrame::Pong.to_bytes());
            }
            DiscoveryFrame::Pong => {}
            DiscoveryFrame::Goodbye => {
                if let Some(p) = self.peers.borrow_mut().get_mut(&from) {
                    p.state = PeerState::Disconnected;
                    p.is_relayed = false;
                }
                self.events.borrow_mut().push(ConnEvent::Disconnected { peer: from });
            }
        }
    }

    /// Drain transport/onion inbound, check pending connects and timeouts,
    /// send keepalives, and return everything the host should react to.
    pub fn poll(&self, now_ms: u64) -> Vec<ConnEvent> {
        for frame in self.transport.poll_recv() {
            self.handle_inbound(frame.from, &frame.bytes, now_ms);
        }
        for discovered in self.transport.poll_discovered() {
            let _ = self.on_peer_discovered(discovered.peer_id, now_ms);
            if let Some(p) = self.peers.borrow_mut().get_mut(&discovered.peer_id) {
                p.rssi = discovered.rssi;
            }
        }
        for onion_inbound in self.onion.poll_recv() {
            self.events.borrow_mut().push(ConnEvent::OnionData {
                from: onion_inbound.source,
                cleartext: onion_inbound.cleartext,
            });
        }
        self.relay.poll(now_ms);

        self.check_pending_connects(now_ms);
        self.check_timeouts(now_ms);
        self.send_keepalives(now_ms);

        self.events.borrow_mut().drain(..).collect()
    }

    fn check_pending_connects(&self, now_ms: u64) {
        let expired: Vec<NodeId> = self
            .pending
            .borrow()
            .iter()
            .filter(|(_, pc)| now_ms.saturating_sub(pc.start_time_ms) >= RELAY_FALLBACK_MS)
            .map(|(peer, _)| *peer)
            .collect();

        for peer in expired {
            self.pending.borrow_mut().remove(&peer);
            match self.relay.connect(peer, now_ms) {
                Ok(()) => {
                    if let Some(p) = self.peers.borrow_mut().get_mut(&peer) {
                        p.state = PeerState::Relaying;
                        p.is_relayed = true;
                        p.connected_at = now_ms;
                    }
                    self.events.borrow_mut().push(ConnEvent::Connected { peer });
                }
                Err(e) => {
                    tracing::warn!(peer = %peer, error = %e, "relay fallback failed");
                    if let Some(p) = self.peers.borrow_mut().get_mut(&peer) {
                        p.state = PeerState::Disconnected;
                    }
                }
            }
        }
    }

    fn check_timeouts(&self, now_ms: u64) {
        let mut timed_out = Vec::new();
        {
            let mut peers = self.peers.borrow_mut();
            for p in peers.values_mut() {
                if matches!(p.state, PeerState::Connected | PeerState::Relaying)
                    && now_ms.saturating_sub(p.last_activity) > PEER_TIMEOUT_MS
                {
                    p.state = PeerState::Disconnected;
                    p.is_relayed = false;
                    timed_out.push(p.peer_id);
                }
            }
        }
        for peer in timed_out {
            self.events.borrow_mut().push(ConnEvent::Disconnected { peer });
        }
    }

    fn send_keepalives(&self, now_ms: u64) {
        let due: Vec<NodeId> = self
            .peers
            .borrow()
            .values()
            .filter(|p| {
                matches!(p.state, PeerState::Connected | PeerState::Relaying)
                    && now_ms.saturating_sub(p.last_keepalive) >= KEEPALIVE_INTERVAL_MS
            })
            .map(|p| p.peer_id)
            .collect();

        for peer in due {
            let _ = self.transport.send(peer, &DiscoveryFrame::Ping.to_bytes());
            if let Some(p) = self.peers.borrow_mut().get_mut(&peer) {
                p.last_keepalive = now_ms;
            }
        }
    }

    /// Send a payload to `peer` via its current channel: relay tunnel if
    /// `is_relayed`, otherwise direct transport.
    pub fn send(&self, peer: NodeId, bytes: &[u8]) -> Result<()> {
        let is_relayed = self
            .peers
            .borrow()
            .get(&peer)
            .map(|p| p.is_relayed)
            .unwrap_or(false);
        let result = if is_relayed {
            self.relay.send(peer, bytes).map_err(|_| ConnectionError::Network)
        } else {
            self.transport.send(peer, bytes).map_err(|_| ConnectionError::Network)
        };
        if result.is_ok() {
            if let Some(p) = self.peers.borrow_mut().get_mut(&peer) {
                p.bytes_sent += bytes.len() as u64;
            }
        }
        result
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Every peer currently reachable, direct or via relay. Used by the
    /// host to fan a broadcast (DNS refresh, presence) out to known peers.
    pub fn connected_peers(&self) -> Vec<NodeId> {
        self.peers
            .borrow()
            .values()
            .filter(|p| matches!(p.state, PeerState::Connected | PeerState::Relaying))
            .map(|p| p.peer_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyx_onion::FakeOnionNetwork;
    use cyx_transport::FakeNetwork;
    use rand::rngs::OsRng;

    fn setup_pair() -> (ConnectionManager, ConnectionManager) {
        let transport_net = FakeNetwork::new();
        let onion_net = FakeOnionNetwork::new();
        let alice_id = NodeId::random(&mut OsRng);
        let bob_id = NodeId::random(&mut OsRng);

        let alice_t: Rc<dyn Transport> = Rc::new(transport_net.register(alice_id));
        let bob_t: Rc<dyn Transport> = Rc::new(transport_net.register(bob_id));
        let alice_o: Rc<dyn Onion> = Rc::new(onion_net.register(alice_id));
        let bob_o: Rc<dyn Onion> = Rc::new(onion_net.register(bob_id));
        let alice_relay = Rc::new(RelayClient::new(alice_id, alice_t.clone()));
        let bob_relay = Rc::new(RelayClient::new(bob_id, bob_t.clone()));

        let alice = ConnectionManager::new(alice_id, alice_t, alice_o, alice_relay);
        let bob = ConnectionManager::new(bob_id, bob_t, bob_o, bob_relay);
        (alice, bob)
    }

    #[test]
    fn announce_exchange_reaches_connected() {
        let (alice, bob) = setup_pair();
        alice.connect(bob.local_id(), 0).unwrap();
        bob.poll(0);
        alice.poll(10);
        bob.poll(20);

        assert_eq!(alice.peer_state(bob.local_id()), Some(PeerState::Connected));
        assert_eq!(bob.peer_state(alice.local_id()), Some(PeerState::Connected));
    }

    #[test]
    fn announce_throttled_within_60s() {
        let (alice, bob) = setup_pair();
        alice.connect(bob.local_id(), 0).unwrap();
        alice.send_announce(bob.local_id(), 1_000);
        let sent_at = alice.peers.borrow().get(&bob.local_id()).unwrap().last_announce_sent;
        assert_eq!(sent_at, 0);
    }

    #[test]
    fn peer_table_rejects_past_cap() {
        let transport_net = FakeNetwork::new();
        let onion_net = FakeOnionNetwork::new();
        let local = NodeId::random(&mut OsRng);
        let t: Rc<dyn Transport> = Rc::new(transport_net.register(local));
        let o: Rc<dyn Onion> = Rc::new(onion_net.register(local));
        let relay = Rc::new(RelayClient::new(local, t.clone()));
        let mgr = ConnectionManager::new(local, t, o, relay);

        for _ in 0..MAX_PEERS {
            mgr.connect(NodeId::random(&mut OsRng), 0).unwrap();
        }
        assert!(matches!(mgr.connect(NodeId::random(&mut OsRng), 0), Err(ConnectionError::Full)));
    }

    #[test]
    fn idle_connected_peer_times_out() {
        let (alice, bob) = setup_pair();
        alice.connect(bob.local_id(), 0).unwrap();
        bob.poll(0);
        alice.poll(10);

        let events = alice.poll(90_011);
        assert!(events.iter().any(|e| matches!(e, ConnEvent::Disconnected { .. })));
        assert_eq!(alice.peer_state(bob.local_id()), Some(PeerState::Disconnected));
    }

    #[test]
    fn goodbye_moves_peer_to_disconnected() {
        let (alice, bob) = setup_pair();
        alice.connect(bob.local_id(), 0).unwrap();
        bob.poll(0);
        alice.poll(10);
        bob.poll(20);

        alice.disconnect(bob.local_id());
        let events = bob.poll(30);
        assert!(events.iter().any(|e| matches!(e, ConnEvent::Disconnected { .. })));
    }
}
