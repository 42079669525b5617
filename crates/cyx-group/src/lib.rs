//! Group membership, role policy, and key rotation (spec §4.6).
//!
//! There is no MLS tree here: a cyxchat group shares one symmetric
//! `group_key`, rotated on every membership change and resealed for each
//! remaining member individually. Group text is encrypted once under the
//! current key and handed to the caller as a list of per-member onion
//! sends — there is no fan-out tree.

pub mod wire;

use std::collections::HashMap;

use cyx_crypto::xchacha20;
use cyx_types::{GroupId, NodeId};

pub const MAX_LOCAL_GROUPS: usize = 32;
pub const MAX_MEMBERS: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("local group table is full")]
    Full,
    #[error("group not found")]
    NotFound,
    #[error("group is at member capacity")]
    MembersFull,
    #[error("member already in group")]
    AlreadyMember,
    #[error("member not found")]
    NotMember,
    #[error("insufficient role for this action")]
    NotAllowed,
    #[error("the owner must transfer ownership before leaving")]
    OwnerMustTransferFirst,
    #[error(transparent)]
    Crypto(#[from] cyx_crypto::CryptoError),
}

pub type Result<T> = std::result::Result<T, GroupError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Member,
    Admin,
    Owner,
}

#[derive(Debug, Clone)]
pub struct Member {
    pub node_id: NodeId,
    pub role: Role,
    pub pubkey: [u8; 32],
    pub joined_at: u64,
}

pub struct Group {
    pub group_id: GroupId,
    pub name: String,
    pub description: String,
    pub creator: NodeId,
    pub members: Vec<Member>,
    pub group_key: xchacha20::SymmetricKey,
    pub key_version: u64,
    pub key_updated_at: u64,
    pub left: bool,
}

impl Group {
    pub fn member(&self, node_id: &NodeId) -> Option<&Member> {
        self.members.iter().find(|m| &m.node_id == node_id)
    }

    fn member_mut(&mut self, node_id: &NodeId) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| &m.node_id == node_id)
    }

    pub fn owner(&self) -> Option<&Member> {
        self.members.iter().find(|m| m.role == Role::Owner)
    }

    pub fn other_members(&self, exclude: &NodeId) -> Vec<NodeId> {
        self.members.iter().filter(|m| &m.node_id != exclude).map(|m| m.node_id).collect()
    }

    fn rotate_key(&mut self, now_ms: u64) {
        // assigning drops and zeroizes the outgoing key first
        self.group_key = xchacha20::SymmetricKey::random();
        self.key_version += 1;
        self.key_updated_at = now_ms;
    }
}

/// Manages every group this identity belongs to.
#[derive(Default)]
pub struct GroupEngine {
    groups: HashMap<GroupId, Group>,
}

impl GroupEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_group(
        &mut self,
        group_id: GroupId,
        name: String,
        description: String,
        creator: NodeId,
        creator_pubkey: [u8; 32],
        now_ms: u64,
    ) -> Result<()> {
        if self.groups.len() >= MAX_LOCAL_GROUPS {
            return Err(GroupError::Full);
        }
        let group = Group {
            group_id,
            name,
            description,
            creator,
            members: vec![Member {
                node_id: creator,
                role: Role::Owner,
                pubkey: creator_pubkey,
                joined_at: now_ms,
            }],
            group_key: xchacha20::SymmetricKey::random(),
            key_version: 0,
            key_updated_at: now_ms,
            left: false,
        };
        self.groups.insert(group_id, group);
        Ok(())
    }

    pub fn get(&self, group_id: &GroupId) -> Option<&Group> {
        self.groups.get(group_id)
    }

    fn get_mut(&mut self, group_id: &GroupId) -> Result<&mut Group> {
        self.groups.get_mut(group_id).ok_or(GroupError::NotFound)
    }

    /// Seal the current group key for a newly invited peer. The caller
    /// supplies the X25519 shared secret already established with `peer`
    /// (key exchange is owned by the onion/connection layer, not here).
    pub fn invite(
        &mut self,
        group_id: GroupId,
        actor: NodeId,
        peer: NodeId,
        peer_pubkey: [u8; 32],
        shared_secret: &[u8; 32],
        now_ms: u64,
    ) -> Result<Vec<u8>> {
        let group = self.get_mut(&group_id)?;
        let actor_role = group.member(&actor).ok_or(GroupError::NotMember)?.role;
        if actor_role == Role::Member {
            return Err(GroupError::NotAllowed);
        }
        if group.member(&peer).is_some() {
            return Err(GroupError::AlreadyMember);
        }
        if group.members.len() >= MAX_MEMBERS {
            return Err(GroupError::MembersFull);
        }
        let nonce = xchacha20::random_nonce();
        let sealed = xchacha20::encrypt_no_aad(shared_secret, &nonce, group.group_key.as_bytes())?;
        let mut sealed_key = [0u8; wire::SEALED_KEY_LEN];
        sealed_key.copy_from_slice(&sealed);

        group.members.push(Member {
            node_id: peer,
            role: Role::Member,
            pubkey: peer_pubkey,
            joined_at: now_ms,
        });

        let frame = wire::GroupFrame::Invite {
            group_id,
            group_name: group.name.clone(),
            sealed_key,
            nonce,
            key_version: group.key_version,
            inviter: actor,
        };
        tracing::debug!(group = %group_id, peer = %peer, "invited member to group");
        Ok(frame.to_bytes())
    }

    /// Remove `target` (kick by an Admin/Owner, or a self-leave), rotate the
    /// key, and return the new key-version without resealing for anyone.
    /// Call [`reseal_for_members`](Self::reseal_for_members) right after
    /// with whatever per-member shared secrets are available.
    pub fn remove_member(&mut self, group_id: GroupId, actor: NodeId, target: NodeId, now_ms: u64) -> Result<()> {
        let group = self.get_mut(&group_id)?;
        let actor_role = group.member(&actor).ok_or(GroupError::NotMember)?.role;
        let target_role = group.member(&target).ok_or(GroupError::NotMember)?.role;

        if actor == target {
            if target_role == Role::Owner {
                return Err(GroupError::OwnerMustTransferFirst);
            }
        } else {
            match actor_role {
                Role::Owner => {}
                Role::Admin if target_role == Role::Member => {}
                _ => return Err(GroupError::NotAllowed),
            }
        }

        group.members.retain(|m| m.node_id != target);
        group.rotate_key(now_ms);
        if actor == target {
            group.left = true;
        }
        tracing::debug!(group = %group_id, target = %target, version = group.key_version, "rotated group key after removal");
        Ok(())
    }

    /// Seal the current key for every listed member, e.g. right after a
    /// rotation. Members with no known shared secret are skipped; the host
    /// is expected to retry once a secret becomes available.
    pub fn reseal_for_members(&self, group_id: GroupId, secrets: &[(NodeId, [u8; 32])]) -> Result<Vec<(NodeId, Vec<u8>)>> {
        let group = self.groups.get(&group_id).ok_or(GroupError::NotFound)?;
        let mut out = Vec::new();
        for (peer, shared_secret) in secrets {
            if group.member(peer).is_none() {
                continue;
            }
            let nonce = xchacha20::random_nonce();
            let sealed = xchacha20::encrypt_no_aad(shared_secret, &nonce, group.group_key.as_bytes())?;
            let mut sealed_key = [0u8; wire::SEALED_KEY_LEN];
            sealed_key.copy_from_slice(&sealed);
            let frame = wire::GroupFrame::KeyUpdate {
                group_id,
                sealed_key,
                nonce,
                key_version: group.key_version,
            };
            out.push((*peer, frame.to_bytes()));
        }
        Ok(out)
    }

    pub fn set_role(&mut self, group_id: GroupId, actor: NodeId, target: NodeId, new_role: Role) -> Result<()> {
        let group = self.get_mut(&group_id)?;
        let actor_role = group.member(&actor).ok_or(GroupError::NotMember)?.role;
        if actor_role != Role::Owner || new_role == Role::Owner {
            return Err(GroupError::NotAllowed);
        }
        let member = group.member_mut(&target).ok_or(GroupError::NotMember)?;
        member.role = new_role;
        Ok(())
    }

    pub fn transfer_ownership(&mut self, group_id: GroupId, actor: NodeId, new_owner: NodeId) -> Result<()> {
        let group = self.get_mut(&group_id)?;
        if group.member(&actor).map(|m| m.role) != Some(Role::Owner) {
            return Err(GroupError::NotAllowed);
        }
        group.member_mut(&new_owner).ok_or(GroupError::NotMember)?.role = Role::Owner;
        group.member_mut(&actor).expect("actor is a member").role = Role::Admin;
        Ok(())
    }

    /// Encrypt `text` under the current group key and list the individual
    /// onion recipients (every member but `sender`). No fan-out tree: the
    /// caller sends the same ciphertext to each recipient separately.
    pub fn send_text(&self, group_id: GroupId, sender: NodeId, text: &str) -> Result<(Vec<u8>, Vec<NodeId>)> {
        let group = self.groups.get(&group_id).ok_or(GroupError::NotFound)?;
        if group.member(&sender).is_none() {
            return Err(GroupError::NotMember);
        }
        let nonce = xchacha20::random_nonce();
        let ciphertext = xchacha20::encrypt_no_aad(group.group_key.as_bytes(), &nonce, text.as_bytes())?;
        let frame = wire::GroupFrame::Text {
            group_id,
            key_version: group.key_version,
            nonce,
            ciphertext,
        };
        Ok((frame.to_bytes(), group.other_members(&sender)))
    }

    /// Decrypt an inbound `GROUP_TEXT`. A `key_version` ahead of ours means
    /// we haven't received the matching `GROUP_KEY_UPDATE` yet; the message
    /// is dropped rather than guessed at.
    pub fn handle_text(&self, group_id: GroupId, key_version: u64, nonce: [u8; 24], ciphertext: &[u8]) -> Result<String> {
        let group = self.groups.get(&group_id).ok_or(GroupError::NotFound)?;
        if key_version != group.key_version {
            return Err(GroupError::NotAllowed);
        }
        let plaintext = xchacha20::decrypt_no_aad(group.group_key.as_bytes(), &nonce, ciphertext)?;
        String::from_utf8(plaintext).map_err(|_| GroupError::NotAllowed)
    }

    /// Unseal an inbound `GROUP_KEY_UPDATE` using the shared secret with
    /// whoever resealed it for us, accepting only a strictly newer version.
    pub fn handle_key_update(
        &mut self,
        group_id: GroupId,
        sealed_key: [u8; wire::SEALED_KEY_LEN],
        nonce: [u8; 24],
        key_version: u64,
        shared_secret: &[u8; 32],
        now_ms: u64,
    ) -> Result<()> {
        let group = self.get_mut(&group_id)?;
        if key_version <= group.key_version {
            return Ok(());
        }
        let key = xchacha20::decrypt_no_aad(shared_secret, &nonce, &sealed_key)?;
        let mut group_key_bytes = [0u8; 32];
        group_key_bytes.copy_from_slice(&key);
        // assigning drops and zeroizes the superseded key first
        group.group_key = xchacha20::SymmetricKey::from_bytes(group_key_bytes);
        group.key_version = key_version;
        group.key_updated_at = now_ms;
        Ok(())
    }
}
