//! Group messaging frame codec (spec §4.6, type-byte range `0x20..0x2F`).

use cyx_types::{GroupId, NodeId};

pub const GROUP_INVITE: u8 = 0x20;
pub const GROUP_KEY_UPDATE: u8 = 0x21;
pub const GROUP_TEXT: u8 = 0x22;
pub const GROUP_KICK: u8 = 0x23;
pub const GROUP_LEAVE: u8 = 0x24;
pub const GROUP_ROLE_UPDATE: u8 = 0x25;

pub const SEALED_KEY_LEN: usize = 48;

#[derive(Debug, Clone, PartialEq)]
pub enum GroupFrame {
    Invite {
        group_id: GroupId,
        group_name: String,
        sealed_key: [u8; SEALED_KEY_LEN],
        nonce: [u8; 24],
        key_version: u64,
        inviter: NodeId,
    },
    KeyUpdate {
        group_id: GroupId,
        sealed_key: [u8; SEALED_KEY_LEN],
        nonce: [u8; 24],
        key_version: u64,
    },
    Text {
        group_id: GroupId,
        key_version: u64,
        nonce: [u8; 24],
        ciphertext: Vec<u8>,
    },
    Kick {
        group_id: GroupId,
        target: NodeId,
    },
    Leave {
        group_id: GroupId,
    },
    RoleUpdate {
        group_id: GroupId,
        target: NodeId,
        role: u8,
    },
}

fn node_id(bytes: &[u8]) -> Option<NodeId> {
    let arr: [u8; 32] = bytes.try_into().ok()?;
    Some(NodeId(arr))
}

fn group_id(bytes: &[u8]) -> Option<GroupId> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(GroupId(arr))
}

impl GroupFrame {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            GroupFrame::Invite {
                group_id,
                group_name,
                sealed_key,
                nonce,
                key_version,
                inviter,
            } => {
                let mut out = vec![GROUP_INVITE];
                out.extend_from_slice(group_id.as_bytes());
                let name_bytes = group_name.as_bytes();
                out.push(name_bytes.len() as u8);
                out.extend_from_slice(name_bytes);
                out.extend_from_slice(sealed_key);
                out.extend_from_slice(nonce);
                out.extend_from_slice(&key_version.to_le_bytes());
                out.extend_from_slice(inviter.as_bytes());
                out
            }
            GroupFrame::KeyUpdate {
                group_id,
                sealed_key,
                nonce,
                key_version,
            } => {
                let mut out = vec![GROUP_KEY_UPDATE];
                out.extend_from_slice(group_id.as_bytes());
                out.extend_from_slice(sealed_key);
                out.extend_from_slice(nonce);
                out.extend_from_slice(&key_version.to_le_bytes());
                out
            }
            GroupFrame::Text {
                group_id,
                key_version,
                nonce,
                ciphertext,
            } => {
                let mut out = vec![GROUP_TEXT];
                out.extend_from_slice(group_id.as_bytes());
                out.extend_from_slice(&key_version.to_le_bytes());
                out.extend_from_slice(nonce);
                out.extend_from_slice(&(ciphertext.len() as u16).to_le_bytes());
                out.extend_from_slice(ciphertext);
                out
            }
            GroupFrame::Kick { group_id, target } => {
                let mut out = vec![GROUP_KICK];
                out.extend_from_slice(group_id.as_bytes());
                out.extend_from_slice(target.as_bytes());
                out
            }
            GroupFrame::Leave { group_id } => {
                let mut out = vec![GROUP_LEAVE];
                out.extend_from_slice(group_id.as_bytes());
                out
            }
            GroupFrame::RoleUpdate { group_id, target, role } => {
                let mut out = vec![GROUP_ROLE_UPDATE];
                out.extend_from_slice(group_id.as_bytes());
                out.extend_from_slice(target.as_bytes());
                out.push(*role);
                out
            }
        }
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let (&type_byte, rest) = data.split_first()?;
        match type_byte {
            GROUP_INVITE => {
                let gid = group_id(rest.get(0..8)?)?;
                let mut pos = 8;
                let name_len = *rest.get(pos)? as usize;
                pos += 1;
                let group_name = String::from_utf8(rest.get(pos..pos + name_len)?.to_vec()).ok()?;
                pos += name_len;
                let mut sealed_key = [0u8; SEALED_KEY_LEN];
                sealed_key.copy_from_slice(rest.get(pos..pos + SEALED_KEY_LEN)?);
                pos += SEALED_KEY_LEN;
                let mut nonce = [0u8; 24];
                nonce.copy_from_slice(rest.get(pos..pos + 24)?);
                pos += 24;
                let key_version = u64::from_le_bytes(rest.get(pos..pos + 8)?.try_into().ok()?);
                pos += 8;
                let inviter = node_id(rest.get(pos..pos + 32)?)?;
                Some(GroupFrame::Invite {
                    group_id: gid,
                    group_name,
                    sealed_key,
                    nonce,
                    key_version,
                    inviter,
                })
            }
            GROUP_KEY_UPDATE => {
                let gid = group_id(rest.get(0..8)?)?;
                let mut sealed_key = [0u8; SEALED_KEY_LEN];
                sealed_key.copy_from_slice(rest.get(8..8 + SEALED_KEY_LEN)?);
                let mut nonce = [0u8; 24];
                nonce.copy_from_slice(rest.get(8 + SEALED_KEY_LEN..8 + SEALED_KEY_LEN + 24)?);
                let key_version = u64::from_le_bytes(
                    rest.get(8 + SEALED_KEY_LEN + 24..8 + SEALED_KEY_LEN + 32)?.try_into().ok()?,
                );
                Some(GroupFrame::KeyUpdate {
                    group_id: gid,
                    sealed_key,
                    nonce,
                    key_version,
                })
            }
            GROUP_TEXT => {
                let gid = group_id(rest.get(0..8)?)?;
                let key_version = u64::from_le_bytes(rest.get(8..16)?.try_into().ok()?);
                let mut nonce = [0u8; 24];
                nonce.copy_from_slice(rest.get(16..40)?);
                let len = u16::from_le_bytes(rest.get(40..42)?.try_into().ok()?) as usize;
                let ciphertext = rest.get(42..42 + len)?.to_vec();
                Some(GroupFrame::Text {
                    group_id: gid,
                    key_version,
                    nonce,
                    ciphertext,
                })
            }
            GROUP_KICK => {
                let gid = group_id(rest.get(0..8)?)?;
                let target = node_id(rest.get(8..40)?)?;
                Some(GroupFrame::Kick { group_id: gid, target })
            }
            GROUP_LEAVE => Some(GroupFrame::Leave {
                group_id: group_id(rest.get(0..8)?)?,
            }),
            GROUP_ROLE_UPDATE => {
                let gid = group_id(rest.get(0..8)?)?;
                let target = node_id(rest.get(8..40)?)?;
                let role = *rest.get(40)?;
                Some(GroupFrame::RoleUpdate {
                    group_id: gid,
                    target,
                    role,
                })
            }
            _ => None,
        }
    }
}
