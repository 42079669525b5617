//! The external Transport contract (spec §6).
//!
//! The actual UDP transport, STUN/hole-punch machinery, and peer tables are
//! out of scope for this workspace — they are a separate collaborator. This
//! crate defines the trait boundary the core consumes, plus an in-memory
//! [`FakeTransport`] used by engine tests and the integration suite so the
//! rest of the workspace can be exercised without a real socket.

use cyx_types::NodeId;
use std::cell::RefCell;
use std::collections::VecDeque;

/// NAT classification as reported by the transport's STUN probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatClass {
    Unknown,
    Open,
    Cone,
    Symmetric,
    Blocked,
}

/// A frame delivered by the transport: sender plus raw bytes.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub from: NodeId,
    pub bytes: Vec<u8>,
}

/// A peer the transport has newly discovered, with its signal strength.
#[derive(Debug, Clone, Copy)]
pub struct PeerDiscovered {
    pub peer_id: NodeId,
    pub rssi: i32,
}

/// Non-blocking datagram-like send/recv consumed by [`cyx_connection`].
///
/// `send` either queues the frame or fails immediately; it never blocks.
/// `poll_recv`/`poll_discovered` drain whatever arrived since the last call.
pub trait Transport {
    fn send(&self, to: NodeId, bytes: &[u8]) -> Result<()>;
    fn poll_recv(&self) -> Vec<InboundFrame>;
    fn poll_discovered(&self) -> Vec<PeerDiscovered>;
    fn nat_class(&self) -> NatClass;
    fn local_node_id(&self) -> NodeId;
}

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("peer unreachable")]
    Unreachable,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// In-memory [`Transport`] used by tests: frames sent to a peer land in
/// that peer's own inbound queue when both sides share a [`FakeNetwork`].
pub struct FakeTransport {
    local: NodeId,
    network: std::rc::Rc<FakeNetwork>,
}

/// A shared in-memory switch connecting a set of [`FakeTransport`] instances.
#[derive(Default)]
pub struct FakeNetwork {
    inboxes: RefCell<std::collections::HashMap<NodeId, VecDeque<InboundFrame>>>,
    discovered: RefCell<std::collections::HashMap<NodeId, VecDeque<PeerDiscovered>>>,
    blocked_routes: RefCell<std::collections::HashSet<(NodeId, NodeId)>>,
}

impl FakeNetwork {
    pub fn new() -> std::rc::Rc<Self> {
        std::rc::Rc::new(Self::default())
    }

    /// Register a node so it has an inbox, and returns a [`Transport`] handle for it.
    pub fn register(self: &std::rc::Rc<Self>, node_id: NodeId) -> FakeTransport {
        self.inboxes.borrow_mut().entry(node_id).or_default();
        self.discovered.borrow_mut().entry(node_id).or_default();
        FakeTransport {
            local: node_id,
            network: self.clone(),
        }
    }

    /// Simulate a discovery event firing for `observer` about `peer`.
    pub fn announce_discovery(&self, observer: NodeId, peer: PeerDiscovered) {
        if let Some(q) = self.discovered.borrow_mut().get_mut(&observer) {
            q.push_back(peer);
        }
    }

    /// Cut the link so frames from `from` to `to` are dropped (simulating a NAT failure).
    pub fn block_route(&self, from: NodeId, to: NodeId) {
        self.blocked_routes.borrow_mut().insert((from, to));
    }
}

impl Transport for FakeTransport {
    fn send(&self, to: NodeId, bytes: &[u8]) -> Result<()> {
        if self
            .network
            .blocked_routes
            .borrow()
            .contains(&(self.local, to))
        {
            return Err(TransportError::Unreachable);
        }
        let mut inboxes = self.network.inboxes.borrow_mut();
        match inboxes.get_mut(&to) {
            Some(q) => {
                q.push_back(InboundFrame {
                    from: self.local,
                    bytes: bytes.to_vec(),
                });
                Ok(())
            }
            None => Err(TransportError::Unreachable),
        }
    }

    fn poll_recv(&self) -> Vec<InboundFrame> {
        self.network
            .inboxes
            .borrow_mut()
            .get_mut(&self.local)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    fn poll_discovered(&self) -> Vec<PeerDiscovered> {
        self.network
            .discovered
            .borrow_mut()
            .get_mut(&self.local)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    fn nat_class(&self) -> NatClass {
        NatClass::Cone
    }

    fn local_node_id(&self) -> NodeId {
        self.local
    }
}
