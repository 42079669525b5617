//! ChatEngine (spec §4.3): compact header codec, fragmentation,
//! reassembly, and the pull-queue delivery surface.

pub mod wire;

use cyx_types::{MsgId, NodeId};
use rand::rngs::OsRng;
use std::collections::{HashMap, VecDeque};
use wire::{ChatPayload, FragmentHeader, Header, FLAG_ENCRYPTED, FLAG_FRAGMENTED, HEADER_LEN};

pub const PULL_QUEUE_CAP: usize = 32;
pub const REASSEMBLY_CAP: usize = 8;
/// Practical fragment-per-message cap from the reassembly buffer shape
/// (8 entries x up to 32 fragments x 4 KiB), tighter than the wire's 1-byte
/// `total_frags` field range.
pub const MAX_FRAGMENTS_PER_ENTRY: usize = 32;
const FRAGMENT_EXPIRY_MS: u64 = 30_000;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("text too long to fragment within the wire limits")]
    TextTooLong,
    #[error("malformed frame")]
    Malformed,
}

pub type Result<T> = std::result::Result<T, ChatError>;

/// A fully decoded inbound item, delivered via the pull queue.
#[derive(Debug, Clone)]
pub struct Delivered {
    pub from: NodeId,
    pub msg_type: u8,
    pub data: Vec<u8>,
}

struct FragmentEntry {
    total_frags: u8,
    received_mask: u64,
    received_count: u8,
    chunks: Vec<Vec<u8>>,
    start_time_ms: u64,
}

/// Encodes outgoing chat frames, decodes and reassembles inbound ones, and
/// exposes a bounded FIFO pull queue for the host.
#[derive(Default)]
pub struct ChatEngine {
    reassembly: HashMap<(NodeId, MsgId), FragmentEntry>,
    reassembly_order: VecDeque<(NodeId, MsgId)>,
    pull_queue: VecDeque<Delivered>,
}

impl ChatEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn random_msg_id() -> MsgId {
        MsgId::random(&mut OsRng)
    }

    /// Encode a text message, fragmenting it when its text exceeds the
    /// 80 B threshold (minus 8 B if replying). Returns one frame per
    /// fragment, or a single frame for short text, plus the `msg_id` used.
    pub fn send_text(&self, text: &[u8], reply_to: Option<MsgId>) -> Result<(MsgId, Vec<Vec<u8>>)> {
        let msg_id = Self::random_msg_id();
        let reply_tax = if reply_to.is_some() { 8 } else { 0 };
        let threshold = wire::FRAGMENT_THRESHOLD - reply_tax;

        if text.len() <= threshold {
            let payload = ChatPayload::Text { text: text.to_vec(), reply_to };
            let header = Header {
                msg_type: wire::TYPE_TEXT,
                flags: FLAG_ENCRYPTED | payload.implied_flags(),
                msg_id,
            };
            let mut frame = header.to_bytes().to_vec();
            frame.extend_from_slice(&payload.to_bytes());
            return Ok((msg_id, vec![frame]));
        }

        let chunks: Vec<&[u8]> = text.chunks(wire::MAX_FRAGMENT_CHUNK).collect();
        if chunks.len() > wire::MAX_FRAGMENTS {
            return Err(ChatError::TextTooLong);
        }
        let total_frags = chunks.len() as u8;
        let header = Header {
            msg_type: wire::TYPE_TEXT,
            flags: FLAG_ENCRYPTED | FLAG_FRAGMENTED,
            msg_id,
        };
        let header_bytes = header.to_bytes();
        let frames = chunks
            .iter()
            .enumerate()
            .map(|(idx, chunk)| {
                let mut frame = header_bytes.to_vec();
                frame.extend_from_slice(&FragmentHeader::encode(idx as u8, total_frags, chunk));
                frame
            })
            .collect();
        Ok((msg_id, frames))
    }

    /// Encode a non-fragmenting payload type (Ack, Typing, React, Delete, Edit).
    pub fn send_payload(&self, payload: &ChatPayload) -> Vec<u8> {
        let header = Header {
            msg_type: payload.msg_type(),
            flags: FLAG_ENCRYPTED | payload.implied_flags(),
            msg_id: Self::random_msg_id(),
        };
        let mut frame = header.to_bytes().to_vec();
        frame.extend_from_slice(&payload.to_bytes());
        frame
    }

    /// Decode an inbound wire frame from `from`, reassembling fragments and
    /// pushing completed deliveries onto the pull queue.
    pub fn handle_inbound(&mut self, from: NodeId, bytes: &[u8], now_ms: u64) -> Result<()> {
        let (header, body) = Header::from_bytes(bytes).ok_or(ChatError::Malformed)?;

        if header.has_flag(FLAG_FRAGMENTED) {
            self.handle_fragment(from, header.msg_id, body, now_ms);
            return Ok(());
        }

        if header.msg_type == wire::TYPE_TEXT {
            match ChatPayload::from_bytes(header.msg_type, header.flags, body) {
                Some(ChatPayload::Text { text, .. }) => {
                    self.push(Delivered {
                        from,
                        msg_type: wire::TYPE_TEXT,
                        data: wire::pull_queue_text_body(&text),
                    });
                    return Ok(());
                }
                _ => return Err(ChatError::Malformed),
            }
        }

        self.push(Delivered { from, msg_type: header.msg_type, data: body.to_vec() });
        Ok(())
    }

    fn handle_fragment(&mut self, from: NodeId, msg_id: MsgId, body: &[u8], now_ms: u64) {
        let Some((frag_hdr, chunk)) = FragmentHeader::decode(body) else { return };
        if frag_hdr.total_frags == 0
            || frag_hdr.frag_idx >= frag_hdr.total_frags
            || frag_hdr.total_frags as usize > MAX_FRAGMENTS_PER_ENTRY
        {
            return;
        }

        let key = (from, msg_id);
        if !self.reassembly.contains_key(&key) {
            if self.reassembly.len() >= REASSEMBLY_CAP {
                if let Some(oldest) = self.reassembly_order.pop_front() {
                    self.reassembly.remove(&oldest);
                }
            }
            self.reassembly.insert(
                key,
                FragmentEntry {
                    total_frags: frag_hdr.total_frags,
                    received_mask: 0,
                    received_count: 0,
                    chunks: vec![Vec::new(); frag_hdr.total_frags as usize],
                    start_time_ms: now_ms,
                },
            );
            self.reassembly_order.push_back(key);
        }

        let entry = self.reassembly.get_mut(&key).expect("just inserted");
        let bit = 1u64 << frag_hdr.frag_idx;
        if entry.received_mask & bit != 0 {
            return; // duplicate fragment, silently ignored
        }
        entry.received_mask |= bit;
        entry.received_count += 1;
        entry.chunks[frag_hdr.frag_idx as usize] = chunk.to_vec();

        if entry.received_count == entry.total_frags {
            let mut full = Vec::new();
            for chunk in &entry.chunks {
                full.extend_from_slice(chunk);
            }
            self.reassembly.remove(&key);
            self.reassembly_order.retain(|k| *k != key);
            self.push(Delivered {
                from,
                msg_type: wire::TYPE_TEXT,
                data: wire::pull_queue_text_body(&full),
            });
        }
    }

    /// Drop reassembly entries older than 30 s.
    pub fn expire_fragments(&mut self, now_ms: u64) {
        let expired: Vec<(NodeId, MsgId)> = self
            .reassembly
            .iter()
            .filter(|(_, entry)| now_ms.saturating_sub(entry.start_time_ms) > FRAGMENT_EXPIRY_MS)
            .map(|(key, _)| *key)
            .collect();
        for key in expired {
            self.reassembly.remove(&key);
            self.reassembly_order.retain(|k| *k != key);
        }
    }

    fn push(&mut self, item: Delivered) {
        if self.pull_queue.len() >= PULL_QUEUE_CAP {
            self.pull_queue.pop_front();
        }
        self.pull_queue.push_back(item);
    }

    /// Drain the next delivered item from the pull queue, FIFO.
    pub fn recv_next(&mut self) -> Option<Delivered> {
        self.pull_queue.pop_front()
    }

    pub fn pending_len(&self) -> usize {
        self.pull_queue.len()
    }
}

pub const HEADER_LEN_PUBLIC: usize = HEADER_LEN;
