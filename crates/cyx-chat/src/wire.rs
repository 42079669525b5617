//! Compact header and per-type payload codec (spec §4.3, §6).

use cyx_types::MsgId;

pub const TYPE_TEXT: u8 = 0x10;
pub const TYPE_ACK: u8 = 0x11;
pub const TYPE_TYPING: u8 = 0x13;
pub const TYPE_FILE_META: u8 = 0x14;
pub const TYPE_FILE_CHUNK: u8 = 0x15;
pub const TYPE_FILE_ACK: u8 = 0x16;
pub const TYPE_REACT: u8 = 0x17;
pub const TYPE_DELETE: u8 = 0x18;
pub const TYPE_EDIT: u8 = 0x19;

pub const FLAG_ENCRYPTED: u8 = 0x01;
pub const FLAG_COMPRESSED: u8 = 0x02;
pub const FLAG_FRAGMENTED: u8 = 0x04;
pub const FLAG_REPLY: u8 = 0x08;
pub const FLAG_FORWARD: u8 = 0x10;
pub const FLAG_EPHEMERAL: u8 = 0x20;

pub const HEADER_LEN: usize = 10;
/// A single un-fragmented wire frame must not exceed this size (spec §4.3).
pub const MAX_FRAME_LEN: usize = 250;
/// Text over this many bytes (minus the reply_to tax) is fragmented.
pub const FRAGMENT_THRESHOLD: usize = 80;
pub const MAX_FRAGMENT_CHUNK: usize = 80;
pub const MAX_FRAGMENTS: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub msg_type: u8,
    pub flags: u8,
    pub msg_id: MsgId,
}

impl Header {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.msg_type;
        out[1] = self.flags;
        out[2..10].copy_from_slice(self.msg_id.as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<(Self, &[u8])> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        let mut msg_id = [0u8; 8];
        msg_id.copy_from_slice(&bytes[2..10]);
        Some((
            Header {
                msg_type: bytes[0],
                flags: bytes[1],
                msg_id: MsgId(msg_id),
            },
            &bytes[HEADER_LEN..],
        ))
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// A fragment wrapper: `frag_idx(1) | total_frags(1) | chunk_len(1) | chunk`.
pub struct FragmentHeader {
    pub frag_idx: u8,
    pub total_frags: u8,
}

impl FragmentHeader {
    pub fn encode(frag_idx: u8, total_frags: u8, chunk: &[u8]) -> Vec<u8> {
        let mut out = vec![frag_idx, total_frags, chunk.len() as u8];
        out.extend_from_slice(chunk);
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<(FragmentHeader, &[u8])> {
        if bytes.len() < 3 {
            return None;
        }
        let frag_idx = bytes[0];
        let total_frags = bytes[1];
        let chunk_len = bytes[2] as usize;
        let chunk = bytes.get(3..3 + chunk_len)?;
        Some((FragmentHeader { frag_idx, total_frags }, chunk))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatPayload {
    Text { text: Vec<u8>, reply_to: Option<MsgId> },
    Ack { ack_msg_id: MsgId, status: u8 },
    Typing { is_typing: bool },
    React { target: MsgId, reaction: Vec<u8>, remove: bool },
    Delete { target: MsgId },
    Edit { target: MsgId, new_text: Vec<u8> },
}

impl ChatPayload {
    pub fn msg_type(&self) -> u8 {
        match self {
            ChatPayload::Text { .. } => TYPE_TEXT,
            ChatPayload::Ack { .. } => TYPE_ACK,
            ChatPayload::Typing { .. } => TYPE_TYPING,
            ChatPayload::React { .. } => TYPE_REACT,
            ChatPayload::Delete { .. } => TYPE_DELETE,
            ChatPayload::Edit { .. } => TYPE_EDIT,
        }
    }

    /// Extra wire flags this payload implies (Reply when `reply_to` is set).
    pub fn implied_flags(&self) -> u8 {
        match self {
            ChatPayload::Text { reply_to: Some(_), .. } => FLAG_REPLY,
            _ => 0,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            ChatPayload::Text { text, reply_to } => {
                let mut out = vec![text.len() as u8];
                out.extend_from_slice(text);
                if let Some(reply_to) = reply_to {
                    out.extend_from_slice(reply_to.as_bytes());
                }
                out
            }
            ChatPayload::Ack { ack_msg_id, status } => {
                let mut out = ack_msg_id.as_bytes().to_vec();
                out.push(*status);
                out
            }
            ChatPayload::Typing { is_typing } => vec![*is_typing as u8],
            ChatPayload::React { target, reaction, remove } => {
                let mut out = target.as_bytes().to_vec();
                out.push(reaction.len() as u8);
                out.extend_from_slice(reaction);
                out.push(*remove as u8);
                out
            }
            ChatPayload::Delete { target } => target.as_bytes().to_vec(),
            ChatPayload::Edit { target, new_text } => {
                let mut out = target.as_bytes().to_vec();
                out.push(new_text.len() as u8);
                out.extend_from_slice(new_text);
                out
            }
        }
    }

    pub fn from_bytes(msg_type: u8, flags: u8, data: &[u8]) -> Option<Self> {
        match msg_type {
            TYPE_TEXT => {
                let text_len = *data.first()? as usize;
                let text = data.get(1..1 + text_len)?.to_vec();
                let reply_to = if flags & FLAG_REPLY != 0 {
                    let bytes = data.get(1 + text_len..1 + text_len + 8)?;
                    let mut arr = [0u8; 8];
                    arr.copy_from_slice(bytes);
                    Some(MsgId(arr))
                } else {
                    None
                };
                Some(ChatPayload::Text { text, reply_to })
            }
            TYPE_ACK => {
                let ack_id = id8(data.get(0..8)?);
                let status = *data.get(8)?;
                Some(ChatPayload::Ack { ack_msg_id: ack_id, status })
            }
            TYPE_TYPING => Some(ChatPayload::Typing { is_typing: *data.first()? != 0 }),
            TYPE_REACT => {
                let target = id8(data.get(0..8)?);
                let rlen = *data.get(8)? as usize;
                let reaction = data.get(9..9 + rlen)?.to_vec();
                let remove = *data.get(9 + rlen)? != 0;
                Some(ChatPayload::React { target, reaction, remove })
            }
            TYPE_DELETE => Some(ChatPayload::Delete { target: id8(data.get(0..8)?) }),
            TYPE_EDIT => {
                let target = id8(data.get(0..8)?);
                let new_len = *data.get(8)? as usize;
                let new_text = data.get(9..9 + new_len)?.to_vec();
                Some(ChatPayload::Edit { target, new_text })
            }
            _ => None,
        }
    }
}

fn id8(bytes: &[u8]) -> MsgId {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(bytes);
    MsgId(arr)
}

/// Build the delivered pull-queue body for a complete text message: a
/// uniform `u16` little-endian length prefix followed by the content,
/// whether the text arrived whole or was reassembled from fragments.
pub fn pull_queue_text_body(text: &[u8]) -> Vec<u8> {
    let mut out = (text.len() as u16).to_le_bytes().to_vec();
    out.extend_from_slice(text);
    out
}
