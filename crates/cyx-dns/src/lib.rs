//! DNS gossip naming engine and contact/trust layer (spec §4.5, §C.3).
//!
//! Names are signed, gossiped bindings from a human-readable handle to a
//! `(NodeId, pubkey)` pair. There is no authority: any peer can hold and
//! serve a cached copy, and the newest-timestamp-wins rule (see
//! [`cache::NameCache`]) is what keeps the gossip converging instead of
//! flapping.

pub mod cache;
pub mod contact;
pub mod name;
pub mod record;
pub mod wire;

use std::collections::HashMap;

use cyx_crypto::ed25519::SigningKey;
use cyx_crypto::CryptoError;
use cyx_types::NodeId;

use cache::NameCache;
use contact::ContactBook;
use record::DnsRecord;
use wire::DnsFrame;

pub const DEFAULT_TTL_S: u64 = 3600;
pub const GOSSIP_MAX_HOPS: u8 = 3;
pub const LOOKUP_TIMEOUT_MS: u64 = 5_000;
pub const REFRESH_INTERVAL_MS: u64 = 1_800_000;

#[derive(Debug, thiserror::Error)]
pub enum DnsError {
    #[error("invalid name")]
    InvalidName,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

pub type Result<T> = std::result::Result<T, DnsError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    /// Resolved without a network round trip (crypto-name or cache hit).
    Resolved(NodeId),
    /// No local answer; a `DNS_LOOKUP` frame was armed with a 5 s timeout.
    Pending { query_id: u8, frame_bytes: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsEvent {
    LookupTimedOut { query_id: u8, name: String },
    LookupResolved { query_id: u8, node_id: NodeId },
    Refreshed { frame_bytes: Vec<u8> },
}

struct PendingLookup {
    query_id: u8,
    name: String,
    armed_at_ms: u64,
}

struct OwnedRecord {
    record: DnsRecord,
    registered_at_ms: u64,
    stun_addr: [u8; 24],
}

pub struct DnsEngine {
    local_id: NodeId,
    signing_key: SigningKey,
    cache: NameCache,
    pub contacts: ContactBook,
    owned: HashMap<String, OwnedRecord>,
    pending: Vec<PendingLookup>,
    next_query_id: u8,
}

impl DnsEngine {
    pub fn new(local_id: NodeId, signing_key: SigningKey) -> Self {
        Self {
            local_id,
            signing_key,
            cache: NameCache::new(),
            contacts: ContactBook::new(),
            owned: HashMap::new(),
            pending: Vec::new(),
            next_query_id: 0,
        }
    }

    /// Normalize and validate a candidate name, without touching state.
    pub fn validate_name(raw: &str) -> Option<String> {
        let normalized = name::normalize(raw);
        if name::validate(&normalized) {
            Some(normalized)
        } else {
            None
        }
    }

    /// `crypto_name(our pubkey)`, the self-certifying name every identity
    /// answers to without registering anything.
    pub fn our_crypto_name(&self) -> String {
        name::crypto_name(&self.signing_key.verifying_key())
    }

    /// Sign and register `name`, returning the `DNS_REGISTER(hops=0)` frame
    /// to broadcast.
    pub fn register(&mut self, raw_name: &str, stun_addr: [u8; 24], now_ms: u64) -> Result<Vec<u8>> {
        let normalized = Self::validate_name(raw_name).ok_or(DnsError::InvalidName)?;
        let record = DnsRecord::sign(
            &self.signing_key,
            &normalized,
            self.local_id,
            now_ms / 1000,
            DEFAULT_TTL_S as u32,
            stun_addr,
        );
        let tick = now_ms;
        // A local register always wins locally; ignore a stale rejection
        // against our own earlier copy (can't happen: timestamps only grow).
        let _ = self.cache.put(record.clone(), tick);
        self.owned.insert(
            normalized,
            OwnedRecord {
                record: record.clone(),
                registered_at_ms: now_ms,
                stun_addr,
            },
        );
        Ok(DnsFrame::Register { record, hops: 0 }.to_bytes())
    }

    /// Handle an inbound `DNS_REGISTER`/`DNS_UPDATE`. Returns the rebroadcast
    /// frame (hops incremented) when the record is fresh and hasn't reached
    /// the hop limit, or `None` if it was rejected, stale, or terminal.
    pub fn handle_gossip(&mut self, record: DnsRecord, hops: u8, now_ms: u64) -> Option<Vec<u8>> {
        if record.verify().is_err() {
            tracing::debug!(name = %record.name, "dropping dns record with bad signature");
            return None;
        }
        if self.cache.put(record.clone(), now_ms).is_err() {
            tracing::debug!(name = %record.name, "dropping stale dns record");
            return None;
        }
        if hops.saturating_add(1) > GOSSIP_MAX_HOPS {
            return None;
        }
        Some(DnsFrame::Register { record, hops: hops + 1 }.to_bytes())
    }

    /// Resolve `name`. Crypto-names and warm cache entries resolve
    /// immediately; anything else arms a pending lookup.
    pub fn lookup(&mut self, raw_name: &str, now_ms: u64) -> LookupResult {
        let normalized = name::normalize(raw_name);
        if name::is_crypto_name(&normalized) {
            if let Some(id) = self.resolve_crypto_name_locally(&normalized) {
                return LookupResult::Resolved(id);
            }
        }
        if let Some(record) = self.cache.get(&normalized, now_ms) {
            if !record.is_tombstone() {
                return LookupResult::Resolved(record.node_id);
            }
        }
        let query_id = self.next_query_id;
        self.next_query_id = self.next_query_id.wrapping_add(1);
        self.pending.push(PendingLookup {
            query_id,
            name: normalized.clone(),
            armed_at_ms: now_ms,
        });
        LookupResult::Pending {
            query_id,
            frame_bytes: DnsFrame::Lookup {
                query_id,
                name: normalized,
            }
            .to_bytes(),
        }
    }

    /// A crypto-name is self-certifying: if we already hold the pubkey that
    /// produces it (our own identity, a cached record, or a contact), we can
    /// check it with no network round trip.
    fn resolve_crypto_name_locally(&self, target: &str) -> Option<NodeId> {
        if self.our_crypto_name() == target {
            return Some(self.local_id);
        }
        self.owned
            .values()
            .map(|o| &o.record)
            .find(|r| name::crypto_name(&r.pubkey) == target)
            .map(|r| r.node_id)
    }

    /// Answer an inbound `DNS_LOOKUP` from our local cache, if we have it.
    pub fn handle_lookup_query(&mut self, query_id: u8, raw_name: &str, now_ms: u64) -> Vec<u8> {
        let normalized = name::normalize(raw_name);
        let record = self
            .cache
            .get(&normalized, now_ms)
            .filter(|r| !r.is_tombstone())
            .cloned();
        DnsFrame::Response { query_id, record }.to_bytes()
    }

    /// Handle an inbound `DNS_RESPONSE`: verify, cache, and resolve the
    /// matching pending lookup if one is still armed.
    pub fn handle_response(&mut self, query_id: u8, record: Option<DnsRecord>, now_ms: u64) -> Option<DnsEvent> {
        let idx = self.pending.iter().position(|p| p.query_id == query_id)?;
        let pending = self.pending.remove(idx);
        let record = record?;
        if record.verify().is_err() {
            return None;
        }
        let _ = self.cache.put(record.clone(), now_ms);
        let _ = pending;
        Some(DnsEvent::LookupResolved {
            query_id,
            node_id: record.node_id,
        })
    }

    /// Expire timed-out pending lookups and re-sign/rebroadcast owned names
    /// whose refresh interval has elapsed.
    pub fn poll(&mut self, now_ms: u64) -> Vec<DnsEvent> {
        let mut events = Vec::new();

        self.pending.retain(|p| {
            if now_ms.saturating_sub(p.armed_at_ms) >= LOOKUP_TIMEOUT_MS {
                events.push(DnsEvent::LookupTimedOut {
                    query_id: p.query_id,
                    name: p.name.clone(),
                });
                false
            } else {
                true
            }
        });

        self.cache.expire(now_ms / 1000);

        let due: Vec<String> = self
            .owned
            .iter()
            .filter(|(_, o)| now_ms.saturating_sub(o.registered_at_ms) >= REFRESH_INTERVAL_MS)
            .map(|(name, _)| name.clone())
            .collect();
        for name in due {
            if let Some(owned) = self.owned.get(&name) {
                let record = DnsRecord::sign(
                    &self.signing_key,
                    &name,
                    self.local_id,
                    now_ms / 1000,
                    DEFAULT_TTL_S as u32,
                    owned.stun_addr,
                );
                let _ = self.cache.put(record.clone(), now_ms);
                let stun_addr = owned.stun_addr;
                self.owned.insert(
                    name,
                    OwnedRecord {
                        record: record.clone(),
                        registered_at_ms: now_ms,
                        stun_addr,
                    },
                );
                events.push(DnsEvent::Refreshed {
                    frame_bytes: DnsFrame::Register { record, hops: 0 }.to_bytes(),
                });
            }
        }

        events
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyx_crypto::ed25519::KeyPair;
    use rand::rngs::OsRng;

    fn engine() -> (DnsEngine, NodeId) {
        let kp = KeyPair::generate();
        let local_id = NodeId::random(&mut OsRng);
        (DnsEngine::new(local_id, kp.signing_key), local_id)
    }

    #[test]
    fn register_then_local_cache_hit_resolves_without_network() {
        let (mut engine, local_id) = engine();
        engine.register("alice", [0u8; 24], 0).unwrap();
        match engine.lookup("alice", 100) {
            LookupResult::Resolved(id) => assert_eq!(id, local_id),
            other => panic!("expected resolved, got {other:?}"),
        }
    }

    #[test]
    fn crypto_name_of_self_resolves_immediately() {
        let (mut engine, local_id) = engine();
        let crypto_name = engine.our_crypto_name();
        match engine.lookup(&crypto_name, 0) {
            LookupResult::Resolved(id) => assert_eq!(id, local_id),
            other => panic!("expected resolved, got {other:?}"),
        }
    }

    #[test]
    fn unknown_name_arms_a_pending_lookup() {
        let (mut engine, _) = engine();
        match engine.lookup("bob", 0) {
            LookupResult::Pending { query_id, .. } => assert_eq!(query_id, 0),
            other => panic!("expected pending, got {other:?}"),
        }
    }

    #[test]
    fn pending_lookup_times_out_after_5s() {
        let (mut engine, _) = engine();
        engine.lookup("bob", 0);
        assert!(engine.poll(4_999).is_empty());
        let events = engine.poll(5_000);
        assert_eq!(
            events,
            vec![DnsEvent::LookupTimedOut {
                query_id: 0,
                name: "bob".to_string()
            }]
        );
    }

    #[test]
    fn response_resolves_matching_pending_lookup() {
        let (mut engine, _) = engine();
        let other_kp = KeyPair::generate();
        let other_id = NodeId::random(&mut OsRng);
        let query_id = match engine.lookup("bob", 0) {
            LookupResult::Pending { query_id, .. } => query_id,
            _ => panic!("expected pending"),
        };
        let record = DnsRecord::sign(&other_kp.signing_key, "bob", other_id, 1, 3600, [0u8; 24]);
        let event = engine.handle_response(query_id, Some(record), 10).unwrap();
        assert_eq!(
            event,
            DnsEvent::LookupResolved {
                query_id,
                node_id: other_id
            }
        );
    }

    #[test]
    fn gossip_with_bad_signature_is_rejected() {
        let (mut engine, _) = engine();
        let other_kp = KeyPair::generate();
        let mut record = DnsRecord::sign(
            &other_kp.signing_key,
            "carol",
            NodeId::random(&mut OsRng),
            1,
            3600,
            [0u8; 24],
        );
        record.timestamp += 1; // invalidates the signature
        assert!(engine.handle_gossip(record, 0, 0).is_none());
    }

    #[test]
    fn gossip_rebroadcasts_with_incremented_hops_until_the_limit() {
        let (mut engine, _) = engine();
        let other_kp = KeyPair::generate();
        let record = DnsRecord::sign(
            &other_kp.signing_key,
            "carol",
            NodeId::random(&mut OsRng),
            1,
            3600,
            [0u8; 24],
        );
        let rebroadcast = engine.handle_gossip(record.clone(), 2, 0).unwrap();
        match DnsFrame::from_bytes(&rebroadcast).unwrap() {
            DnsFrame::Register { hops, .. } => assert_eq!(hops, 3),
            _ => panic!("wrong variant"),
        }

        let mut record2 = record;
        record2.timestamp += 1;
        let record2 = DnsRecord::sign(
            &other_kp.signing_key,
            &record2.name,
            record2.node_id,
            record2.timestamp,
            record2.ttl,
            record2.stun_addr,
        );
        assert!(engine.handle_gossip(record2, 3, 0).is_none());
    }

    #[test]
    fn stale_gossip_replay_is_rejected() {
        let (mut engine, _) = engine();
        let other_kp = KeyPair::generate();
        let node_id = NodeId::random(&mut OsRng);
        let newer = DnsRecord::sign(&other_kp.signing_key, "carol", node_id, 100, 3600, [0u8; 24]);
        let older = DnsRecord::sign(&other_kp.signing_key, "carol", node_id, 50, 3600, [0u8; 24]);
        assert!(engine.handle_gossip(newer, 0, 0).is_some());
        assert!(engine.handle_gossip(older, 0, 0).is_none());
    }

    #[test]
    fn owned_name_refreshes_after_interval() {
        let (mut engine, _) = engine();
        engine.register("alice", [0u8; 24], 0).unwrap();
        assert!(engine.poll(REFRESH_INTERVAL_MS - 1).is_empty());
        let events = engine.poll(REFRESH_INTERVAL_MS);
        assert!(matches!(events.as_slice(), [DnsEvent::Refreshed { .. }]));
    }
}
