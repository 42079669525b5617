//! The external DHT contract (spec §6).
//!
//! The Kademlia routing table and key/value store themselves are out of
//! scope for this workspace — file transfer's DHT-delivery mode and the
//! DNS engine's lookups both consume this trait only. This crate defines
//! the `put`/`get`/`bootstrap`/`find_node`/`get_closest` boundary plus an
//! in-memory [`FakeDht`] for tests.

use cyx_types::NodeId;
use std::cell::RefCell;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum DhtError {
    #[error("record not found")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, DhtError>;

/// `put`/`get`/`bootstrap`/`find_node`/`get_closest`, consumed by file
/// transfer's DHT-delivery mode (spec §4.4) and by any lookup that needs
/// to reach nodes outside the direct peer table.
pub trait Dht {
    fn put(&self, key: [u8; 32], value: Vec<u8>, ttl_s: u64);
    fn get(&self, key: [u8; 32]) -> Option<Vec<u8>>;
    fn bootstrap(&self, seed_nodes: &[NodeId]);
    fn find_node(&self, target: NodeId) -> Option<NodeId>;
    fn get_closest(&self, target: NodeId, max: usize) -> Vec<NodeId>;
}

struct StoredValue {
    value: Vec<u8>,
    expires_at_s: u64,
}

/// In-memory [`Dht`]: a flat key/value map with TTL expiry and a static
/// known-node list, standing in for Kademlia routing during tests.
#[derive(Default)]
pub struct FakeDht {
    store: RefCell<HashMap<[u8; 32], StoredValue>>,
    known_nodes: RefCell<Vec<NodeId>>,
    now_s: RefCell<u64>,
}

impl FakeDht {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the fake clock used for TTL expiry.
    pub fn advance(&self, now_s: u64) {
        *self.now_s.borrow_mut() = now_s;
    }

    pub fn known_node_count(&self) -> usize {
        self.known_nodes.borrow().len()
    }
}

impl Dht for FakeDht {
    fn put(&self, key: [u8; 32], value: Vec<u8>, ttl_s: u64) {
        let expires_at_s = *self.now_s.borrow() + ttl_s;
        self.store.borrow_mut().insert(key, StoredValue { value, expires_at_s });
    }

    fn get(&self, key: [u8; 32]) -> Option<Vec<u8>> {
        let now = *self.now_s.borrow();
        let store = self.store.borrow();
        store
            .get(&key)
            .filter(|v| v.expires_at_s > now)
            .map(|v| v.value.clone())
    }

    fn bootstrap(&self, seed_nodes: &[NodeId]) {
        let mut known = self.known_nodes.borrow_mut();
        for node in seed_nodes {
            if !known.contains(node) {
                known.push(*node);
            }
        }
    }

    fn find_node(&self, target: NodeId) -> Option<NodeId> {
        self.known_nodes.borrow().iter().find(|n| **n == target).copied()
    }

    fn get_closest(&self, _target: NodeId, max: usize) -> Vec<NodeId> {
        self.known_nodes.borrow().iter().take(max).copied().collect()
    }
}
