//! The DNS record wire struct and its signature (spec §4.5, §C.1).

use cyx_crypto::ed25519::{Signature, SigningKey, VerifyingKey};
use cyx_crypto::CryptoError;
use cyx_types::NodeId;

pub const NAME_FIELD_LEN: usize = 64;
pub const STUN_ADDR_LEN: usize = 24;
pub const RECORD_LEN: usize = NAME_FIELD_LEN + 32 + 32 + 64 + 8 + 4 + STUN_ADDR_LEN;

/// A signed name -> (NodeId, pubkey) binding, gossiped between peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub name: String,
    pub node_id: NodeId,
    pub pubkey: VerifyingKey,
    pub signature: Signature,
    pub timestamp: u64,
    pub ttl: u32,
    pub stun_addr: [u8; STUN_ADDR_LEN],
}

/// The bytes a registration signs over: `name ‖ pubkey ‖ be64(timestamp)`.
fn signed_material(name: &str, pubkey: &VerifyingKey, timestamp: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + 32 + 8);
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(pubkey.as_bytes());
    out.extend_from_slice(&timestamp.to_be_bytes());
    out
}

impl DnsRecord {
    /// Sign and build a fresh record for `name`, owned by `signing_key`.
    pub fn sign(
        signing_key: &SigningKey,
        name: &str,
        node_id: NodeId,
        timestamp: u64,
        ttl: u32,
        stun_addr: [u8; STUN_ADDR_LEN],
    ) -> Self {
        let pubkey = signing_key.verifying_key();
        let signature = signing_key.sign(&signed_material(name, &pubkey, timestamp));
        DnsRecord {
            name: name.to_string(),
            node_id,
            pubkey,
            signature,
            timestamp,
            ttl,
            stun_addr,
        }
    }

    /// Verify the embedded signature matches the embedded pubkey and fields.
    pub fn verify(&self) -> Result<(), CryptoError> {
        let material = signed_material(&self.name, &self.pubkey, self.timestamp);
        self.pubkey.verify(&material, &self.signature)
    }

    /// `true` once `ttl` has elapsed since `timestamp` (seconds-based clock).
    pub fn is_expired(&self, now_s: u64) -> bool {
        now_s.saturating_sub(self.timestamp) > self.ttl as u64
    }

    /// A tombstone carries `ttl = 0`: the name is withdrawn, not merely stale.
    pub fn is_tombstone(&self) -> bool {
        self.ttl == 0
    }

    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        let name_bytes = self.name.as_bytes();
        let n = name_bytes.len().min(NAME_FIELD_LEN);
        out[0..n].copy_from_slice(&name_bytes[..n]);
        let mut pos = NAME_FIELD_LEN;
        out[pos..pos + 32].copy_from_slice(self.node_id.as_bytes());
        pos += 32;
        out[pos..pos + 32].copy_from_slice(self.pubkey.as_bytes());
        pos += 32;
        out[pos..pos + 64].copy_from_slice(&self.signature.to_bytes());
        pos += 64;
        out[pos..pos + 8].copy_from_slice(&self.timestamp.to_le_bytes());
        pos += 8;
        out[pos..pos + 4].copy_from_slice(&self.ttl.to_le_bytes());
        pos += 4;
        out[pos..pos + STUN_ADDR_LEN].copy_from_slice(&self.stun_addr);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() != RECORD_LEN {
            return None;
        }
        let name_raw = &data[0..NAME_FIELD_LEN];
        let end = name_raw.iter().position(|&b| b == 0).unwrap_or(NAME_FIELD_LEN);
        let name = String::from_utf8(name_raw[..end].to_vec()).ok()?;
        let mut pos = NAME_FIELD_LEN;
        let mut node_id_bytes = [0u8; 32];
        node_id_bytes.copy_from_slice(&data[pos..pos + 32]);
        pos += 32;
        let mut pubkey_bytes = [0u8; 32];
        pubkey_bytes.copy_from_slice(&data[pos..pos + 32]);
        pos += 32;
        let mut sig_bytes = [0u8; 64];
        sig_bytes.copy_from_slice(&data[pos..pos + 64]);
        pos += 64;
        let timestamp = u64::from_le_bytes(data[pos..pos + 8].try_into().ok()?);
        pos += 8;
        let ttl = u32::from_le_bytes(data[pos..pos + 4].try_into().ok()?);
        pos += 4;
        let mut stun_addr = [0u8; STUN_ADDR_LEN];
        stun_addr.copy_from_slice(&data[pos..pos + STUN_ADDR_LEN]);
        Some(DnsRecord {
            name,
            node_id: NodeId(node_id_bytes),
            pubkey: VerifyingKey::from_bytes(&pubkey_bytes).ok()?,
            signature: Signature::from_bytes(&sig_bytes),
            timestamp,
            ttl,
            stun_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyx_crypto::ed25519::KeyPair;
    use rand::rngs::OsRng;

    #[test]
    fn sign_and_verify_round_trip() {
        let kp = KeyPair::generate();
        let node_id = NodeId::random(&mut OsRng);
        let record = DnsRecord::sign(&kp.signing_key, "alice", node_id, 1_000, 3600, [0u8; 24]);
        assert!(record.verify().is_ok());
    }

    #[test]
    fn tampered_field_fails_verification() {
        let kp = KeyPair::generate();
        let node_id = NodeId::random(&mut OsRng);
        let mut record = DnsRecord::sign(&kp.signing_key, "alice", node_id, 1_000, 3600, [0u8; 24]);
        record.timestamp += 1;
        assert!(record.verify().is_err());
    }

    #[test]
    fn wire_round_trip_preserves_all_fields() {
        let kp = KeyPair::generate();
        let node_id = NodeId::random(&mut OsRng);
        let record = DnsRecord::sign(&kp.signing_key, "alice", node_id, 1_000, 3600, [7u8; 24]);
        let bytes = record.to_bytes();
        let decoded = DnsRecord::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn expiry_respects_ttl() {
        let kp = KeyPair::generate();
        let node_id = NodeId::random(&mut OsRng);
        let record = DnsRecord::sign(&kp.signing_key, "alice", node_id, 1_000, 100, [0u8; 24]);
        assert!(!record.is_expired(1_050));
        assert!(record.is_expired(1_200));
    }

    #[test]
    fn zero_ttl_is_a_tombstone() {
        let kp = KeyPair::generate();
        let node_id = NodeId::random(&mut OsRng);
        let record = DnsRecord::sign(&kp.signing_key, "alice", node_id, 1_000, 0, [0u8; 24]);
        assert!(record.is_tombstone());
    }
}
