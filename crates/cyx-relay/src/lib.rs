//! RelayClient (spec §4.2).
//!
//! Addresses a small set (≤ 4) of relay servers and maintains ≤ 16 tunneled
//! sessions, forwarding opaque end-to-end-encrypted payloads the relay
//! cannot decrypt. The relay protocol itself is in [`wire`].

pub mod wire;

use cyx_crypto::blake2;
use cyx_transport::Transport;
use cyx_types::NodeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use wire::RelayFrame;

pub const MAX_RELAYS: usize = 4;
pub const MAX_SESSIONS: usize = 16;
const SESSION_IDLE_TIMEOUT_MS: u64 = 10_000;
const KEEPALIVE_INTERVAL_MS: u64 = 30_000;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("no relay servers configured")]
    NoRelaysConfigured,
    #[error("relay session table is full")]
    Full,
    #[error("no active session to peer")]
    NoSession,
    #[error("transport error: {0}")]
    Transport(#[from] cyx_transport::TransportError),
}

pub type Result<T> = std::result::Result<T, RelayError>;

/// Derive a synthetic NodeId for a relay endpoint addressed by `host:port`
/// (spec §9 open question: relay servers carry no NodeId at the protocol
/// level). This id is only ever used as a transport send destination; it
/// is never inserted into a [`cyx_connection`] peer table.
pub fn relay_virtual_id(host: &str, port: u16) -> NodeId {
    let mut input = host.as_bytes().to_vec();
    input.extend_from_slice(&port.to_be_bytes());
    NodeId(blake2::derive(blake2::contexts::RELAY_VIRTUAL_ID, &input))
}

struct Session {
    relay: NodeId,
    last_activity_ms: u64,
    last_keepalive_ms: u64,
}

/// Tunnels opaque payloads to a peer through an untrusted relay server.
pub struct RelayClient {
    local_id: NodeId,
    transport: Rc<dyn Transport>,
    relays: Vec<NodeId>,
    sessions: RefCell<HashMap<NodeId, Session>>,
}

impl RelayClient {
    pub fn new(local_id: NodeId, transport: Rc<dyn Transport>) -> Self {
        Self {
            local_id,
            transport,
            relays: Vec::new(),
            sessions: RefCell::new(HashMap::new()),
        }
    }

    /// Register a configured relay server, up to [`MAX_RELAYS`].
    pub fn add_relay(&mut self, relay_id: NodeId) -> Result<()> {
        if self.relays.len() >= MAX_RELAYS {
            return Err(RelayError::Full);
        }
        if !self.relays.contains(&relay_id) {
            self.relays.push(relay_id);
        }
        Ok(())
    }

    pub fn has_session(&self, peer: NodeId) -> bool {
        self.sessions.borrow().contains_key(&peer)
    }

    /// Open a tunnel to `peer` via the first configured relay. Does not
    /// wait for a `CONNECT_ACK`; the session is reported "up" immediately
    /// and DATA flow confirms liveness (spec §4.2).
    pub fn connect(&self, peer: NodeId, now_ms: u64) -> Result<()> {
        let relay = *self.relays.first().ok_or(RelayError::NoRelaysConfigured)?;
        {
            let mut sessions = self.sessions.borrow_mut();
            if sessions.len() >= MAX_SESSIONS && !sessions.contains_key(&peer) {
                return Err(RelayError::Full);
            }
            sessions.insert(
                peer,
                Session {
                    relay,
                    last_activity_ms: now_ms,
                    last_keepalive_ms: now_ms,
                },
            );
        }
        let frame = RelayFrame::Connect {
            from: self.local_id,
            to: peer,
        };
        self.transport.send(relay, &frame.to_bytes())?;
        Ok(())
    }

    pub fn disconnect(&self, peer: NodeId) -> Result<()> {
        let relay = {
            let sessions = self.sessions.borrow();
            sessions.get(&peer).map(|s| s.relay).ok_or(RelayError::NoSession)?
        };
        self.sessions.borrow_mut().remove(&peer);
        let frame = RelayFrame::Disconnect { peer };
        self.transport.send(relay, &frame.to_bytes())?;
        Ok(())
    }

    /// Send an opaque (already onion-encrypted) payload to `peer` through
    /// its active relay session.
    pub fn send(&self, peer: NodeId, payload: &[u8]) -> Result<()> {
        let relay = {
            let sessions = self.sessions.borrow();
            sessions.get(&peer).map(|s| s.relay).ok_or(RelayError::NoSession)?
        };
        let frame = RelayFrame::Data {
            from: self.local_id,
            to: peer,
            payload: payload.to_vec(),
        };
        self.transport.send(relay, &frame.to_bytes())?;
        Ok(())
    }

    /// Handle a raw frame in the relay-reserved range, delivered by
    /// [`cyx_connection`] after it classifies the frame's first byte.
    /// Returns the peer a DATA frame originated from, for re-dispatch.
    pub fn handle_inbound(&self, bytes: &[u8], now_ms: u64) -> Option<(NodeId, Vec<u8>)> {
        match RelayFrame::from_bytes(bytes)? {
            RelayFrame::Data { from, to, payload } => {
                if to != self.local_id {
                    return None;
                }
                if let Some(session) = self.sessions.borrow_mut().get_mut(&from) {
                    session.last_activity_ms = now_ms;
                }
                Some((from, payload))
            }
            RelayFrame::ConnectAck { .. } => {
                tracing::debug!("relay connect ack received");
                None
            }
            RelayFrame::Error { peer, code } => {
                tracing::warn!(peer = %peer, code, "relay reported error");
                None
            }
            RelayFrame::Keepalive { peer } => {
                if let Some(session) = self.sessions.borrow_mut().get_mut(&peer) {
                    session.last_activity_ms = now_ms;
                }
                None
            }
            RelayFrame::Connect { .. } | RelayFrame::Disconnect { .. } => None,
        }
    }

    /// Free stale sessions and emit keepalives for live ones.
    pub fn poll(&self, now_ms: u64) {
        let mut to_free = Vec::new();
        let mut to_keepalive = Vec::new();
        {
            let mut sessions = self.sessions.borrow_mut();
            for (peer, session) in sessions.iter_mut() {
                if now_ms.saturating_sub(session.last_activity_ms) > SESSION_IDLE_TIMEOUT_MS {
                    to_free.push(*peer);
                    continue;
                }
                if now_ms.saturating_sub(session.last_keepalive_ms) >= KEEPALIVE_INTERVAL_MS {
                    session.last_keepalive_ms = now_ms;
                    to_keepalive.push((*peer, session.relay));
                }
            }
            for peer in &to_free {
                sessions.remove(peer);
            }
        }
        for peer in to_free {
            tracing::debug!(peer = %peer, "relay session freed on idle timeout");
        }
        for (peer, relay) in to_keepalive {
            let frame = RelayFrame::Keepalive { peer };
            let _ = self.transport.send(relay, &frame.to_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyx_transport::FakeNetwork;
    use rand::rngs::OsRng;

    fn setup() -> (Rc<FakeNetwork>, NodeId, NodeId, NodeId) {
        let net = FakeNetwork::new();
        let local = NodeId::random(&mut OsRng);
        let relay = NodeId::random(&mut OsRng);
        let peer = NodeId::random(&mut OsRng);
        net.register(local);
        net.register(relay);
        net.register(peer);
        (net, local, relay, peer)
    }

    #[test]
    fn connect_reports_up_without_waiting_for_ack() {
        let (net, local, relay, peer) = setup();
        let transport = Rc::new(net.register(local));
        let mut client = RelayClient::new(local, transport);
        client.add_relay(relay).unwrap();

        assert!(client.connect(peer, 0).is_ok());
        assert!(client.has_session(peer));
    }

    #[test]
    fn send_without_session_fails() {
        let (_net, local, _relay, peer) = setup();
        let transport: Rc<dyn Transport> = Rc::new(FakeNetwork::new().register(local));
        let client = RelayClient::new(local, transport);
        assert!(matches!(client.send(peer, b"x"), Err(RelayError::NoSession)));
    }

    #[test]
    fn idle_session_freed_on_poll() {
        let (net, local, relay, peer) = setup();
        let transport = Rc::new(net.register(local));
        let mut client = RelayClient::new(local, transport);
        client.add_relay(relay).unwrap();
        client.connect(peer, 0).unwrap();

        client.poll(10_001);
        assert!(!client.has_session(peer));
    }

    #[test]
    fn relay_virtual_ids_are_distinct_and_deterministic() {
        let a = relay_virtual_id("relay.example", 9000);
        let b = relay_virtual_id("relay.example", 9000);
        let c = relay_virtual_id("relay.example", 9001);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn data_frame_for_other_recipient_is_ignored() {
        let (net, local, relay, peer) = setup();
        let transport = Rc::new(net.register(local));
        let client = RelayClient::new(local, transport);
        let someone_else = NodeId::random(&mut OsRng);
        let frame = RelayFrame::Data {
            from: peer,
            to: someone_else,
            payload: vec![1, 2, 3],
        };
        assert!(client.handle_inbound(&frame.to_bytes(), 0).is_none());
        let _ = relay;
    }
}
