//! The external Onion contract (spec §6).
//!
//! Forward-secret circuit construction and Sphinx payload wrapping are out
//! of scope for this workspace; they live in a separate onion-routing
//! collaborator. This crate defines the trait boundary the core consumes —
//! `send_to`/a receive callback/`get_pubkey`/`add_peer_key` — plus an
//! in-memory [`FakeOnion`] that passes cleartext straight through (no
//! circuits, no wrapping) for use in engine and integration tests.

use cyx_crypto::x25519::{X25519PublicKey, X25519StaticSecret};
use cyx_types::NodeId;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, thiserror::Error)]
pub enum OnionError {
    #[error("no circuit to destination")]
    NoCircuit,
    #[error("crypto error: {0}")]
    Crypto(#[from] cyx_crypto::CryptoError),
}

pub type Result<T> = std::result::Result<T, OnionError>;

/// A cleartext payload delivered from a peer after onion decryption.
#[derive(Debug, Clone)]
pub struct OnionInbound {
    pub source: NodeId,
    pub cleartext: Vec<u8>,
}

/// `send_to(dest, payload)` end-to-end-encrypts `payload` through onion
/// circuits; `poll_recv` drains whatever has been decrypted and delivered
/// to us since the last call. `get_pubkey`/`add_peer_key` manage the local
/// and per-peer X25519 material used to derive onion shared secrets.
pub trait Onion {
    fn send_to(&self, dest: NodeId, payload: &[u8]) -> Result<()>;
    fn poll_recv(&self) -> Vec<OnionInbound>;
    fn get_pubkey(&self) -> X25519PublicKey;
    fn add_peer_key(&self, peer: NodeId, pk: X25519PublicKey);
}

/// Pass-through in-memory [`Onion`]: no circuits, no wrapping, payload
/// delivered unchanged. Used by tests that want to exercise the engines
/// above this layer without modeling onion routing itself.
pub struct FakeOnion {
    local: NodeId,
    secret: X25519StaticSecret,
    network: std::rc::Rc<FakeOnionNetwork>,
}

#[derive(Default)]
pub struct FakeOnionNetwork {
    peer_keys: RefCell<HashMap<NodeId, HashMap<NodeId, X25519PublicKey>>>,
    inboxes: RefCell<HashMap<NodeId, VecDeque<OnionInbound>>>,
}

impl FakeOnionNetwork {
    pub fn new() -> std::rc::Rc<Self> {
        std::rc::Rc::new(Self::default())
    }

    pub fn register(self: &std::rc::Rc<Self>, node_id: NodeId) -> FakeOnion {
        self.peer_keys.borrow_mut().entry(node_id).or_default();
        self.inboxes.borrow_mut().entry(node_id).or_default();
        FakeOnion {
            local: node_id,
            secret: X25519StaticSecret::random(),
            network: self.clone(),
        }
    }
}

impl Onion for FakeOnion {
    fn send_to(&self, dest: NodeId, payload: &[u8]) -> Result<()> {
        let has_key = self
            .network
            .peer_keys
            .borrow()
            .get(&self.local)
            .map(|m| m.contains_key(&dest))
            .unwrap_or(false);
        if !has_key {
            return Err(OnionError::NoCircuit);
        }
        let mut inboxes = self.network.inboxes.borrow_mut();
        if let Some(q) = inboxes.get_mut(&dest) {
            q.push_back(OnionInbound {
                source: self.local,
                cleartext: payload.to_vec(),
            });
        }
        Ok(())
    }

    fn poll_recv(&self) -> Vec<OnionInbound> {
        self.network
            .inboxes
            .borrow_mut()
            .get_mut(&self.local)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    fn get_pubkey(&self) -> X25519PublicKey {
        self.secret.public_key()
    }

    fn add_peer_key(&self, peer: NodeId, pk: X25519PublicKey) {
        self.network
            .peer_keys
            .borrow_mut()
            .entry(self.local)
            .or_default()
            .insert(peer, pk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn send_without_key_exchange_fails() {
        let net = FakeOnionNetwork::new();
        let alice = net.register(NodeId::random(&mut OsRng));
        let bob = NodeId::random(&mut OsRng);
        assert!(matches!(alice.send_to(bob, b"hi"), Err(OnionError::NoCircuit)));
    }

    #[test]
    fn send_after_key_exchange_delivers() {
        let net = FakeOnionNetwork::new();
        let alice_id = NodeId::random(&mut OsRng);
        let bob_id = NodeId::random(&mut OsRng);
        let alice = net.register(alice_id);
        let bob = net.register(bob_id);

        alice.add_peer_key(bob_id, bob.get_pubkey());
        alice.send_to(bob_id, b"hello bob").unwrap();

        let inbound = bob.poll_recv();
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].source, alice_id);
        assert_eq!(inbound[0].cleartext, b"hello bob");
    }
}
