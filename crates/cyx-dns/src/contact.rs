//! Contact/trust layer (§C.3): petnamed peers, block lists, and the
//! human-verifiable safety number used to confirm a key out of band.

use cyx_crypto::blake2::{self, contexts};
use cyx_crypto::ed25519::VerifyingKey;
use cyx_types::NodeId;

/// URI scheme used to hand a contact's id and public key to a peer out of
/// band (QR code, paste, link), e.g. for scanning at a meetup.
pub const CONTACT_URI_SCHEME: &str = "cyxchat://add/";

#[derive(Debug, Clone)]
pub struct Contact {
    pub node_id: NodeId,
    pub petname: Option<String>,
    pub verified: bool,
    pub blocked: bool,
}

impl Contact {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            petname: None,
            verified: false,
            blocked: false,
        }
    }
}

/// Symmetric safety number: `BLAKE2b-256(SAFETY_NUMBER, sorted(our_pk, their_pk))`.
/// Sorting the two keys before hashing means both sides derive the same
/// value regardless of which one calls `safety` first.
pub fn safety(our: &VerifyingKey, their: &VerifyingKey) -> [u8; 32] {
    let (a, b) = if our.as_bytes() <= their.as_bytes() {
        (our.as_bytes(), their.as_bytes())
    } else {
        (their.as_bytes(), our.as_bytes())
    };
    blake2::derive_multi(contexts::SAFETY_NUMBER, &[a, b])
}

/// A contact book: petnamed entries plus a block list, local-only state.
#[derive(Default)]
pub struct ContactBook {
    contacts: std::collections::HashMap<NodeId, Contact>,
}

pub const MAX_PETNAMES: usize = 256;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ContactError {
    #[error("contact book is full")]
    Full,
    #[error("malformed contact uri")]
    MalformedUri,
}

/// Encode a contact's id and public key as a `cyxchat://add/<node_id>/<pubkey>`
/// URI, both fields 64 lowercase hex characters.
pub fn generate_contact_uri(node_id: NodeId, pubkey: &VerifyingKey) -> String {
    format!("{CONTACT_URI_SCHEME}{}/{}", node_id.to_hex(), hex::encode(pubkey.to_bytes()))
}

/// Parse a `cyxchat://add/<node_id>/<pubkey>` URI back into its parts.
pub fn parse_contact_uri(uri: &str) -> Result<(NodeId, VerifyingKey), ContactError> {
    let rest = uri.strip_prefix(CONTACT_URI_SCHEME).ok_or(ContactError::MalformedUri)?;
    let mut parts = rest.splitn(2, '/');
    let node_id_hex = parts.next().ok_or(ContactError::MalformedUri)?;
    let pubkey_hex = parts.next().ok_or(ContactError::MalformedUri)?;

    let node_id = NodeId::from_hex(node_id_hex).map_err(|_| ContactError::MalformedUri)?;
    let pubkey_bytes = hex::decode(pubkey_hex).map_err(|_| ContactError::MalformedUri)?;
    if pubkey_bytes.len() != 32 {
        return Err(ContactError::MalformedUri);
    }
    let mut pubkey_arr = [0u8; 32];
    pubkey_arr.copy_from_slice(&pubkey_bytes);
    let pubkey = VerifyingKey::from_bytes(&pubkey_arr).map_err(|_| ContactError::MalformedUri)?;

    Ok((node_id, pubkey))
}

impl ContactBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_or_update(&mut self, node_id: NodeId, petname: Option<String>) -> Result<(), ContactError> {
        if !self.contacts.contains_key(&node_id) && self.contacts.len() >= MAX_PETNAMES {
            return Err(ContactError::Full);
        }
        let entry = self.contacts.entry(node_id).or_insert_with(|| Contact::new(node_id));
        if petname.is_some() {
            entry.petname = petname;
        }
        Ok(())
    }

    pub fn mark_verified(&mut self, node_id: NodeId) {
        self.add_or_update(node_id, None).ok();
        if let Some(c) = self.contacts.get_mut(&node_id) {
            c.verified = true;
        }
    }

    pub fn block(&mut self, node_id: NodeId) {
        self.add_or_update(node_id, None).ok();
        if let Some(c) = self.contacts.get_mut(&node_id) {
            c.blocked = true;
        }
    }

    pub fn unblock(&mut self, node_id: &NodeId) {
        if let Some(c) = self.contacts.get_mut(node_id) {
            c.blocked = false;
        }
    }

    pub fn is_blocked(&self, node_id: &NodeId) -> bool {
        self.contacts.get(node_id).map(|c| c.blocked).unwrap_or(false)
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&Contact> {
        self.contacts.get(node_id)
    }

    pub fn resolve_petname(&self, petname: &str) -> Option<NodeId> {
        self.contacts
            .values()
            .find(|c| c.petname.as_deref() == Some(petname))
            .map(|c| c.node_id)
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}
