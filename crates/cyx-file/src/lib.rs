//! File Transfer engine (spec §4.4): chunking, pacing, XChaCha20-Poly1305
//! encryption of the whole payload, and DHT-delivery key derivation for
//! offline recipients.

pub mod wire;

use cyx_crypto::blake2::{self, contexts};
use cyx_crypto::xchacha20;
use cyx_types::{FileId, NodeId};
use std::collections::HashMap;
use wire::{chunk_count, CHUNK_SIZE};

pub const MAX_TRANSFERS: usize = 16;
const CHUNK_PACING_MS: u64 = 500;
const STALL_TIMEOUT_MS: u64 = 60_000;
/// Size cap for DHT micro-mode chunk storage (spec §4.4).
pub const DHT_MAX_FILE_SIZE: u64 = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("transfer table is full")]
    Full,
    #[error("unknown transfer")]
    NotFound,
    #[error("crypto error: {0}")]
    Crypto(#[from] cyx_crypto::CryptoError),
    #[error("transfer is not complete yet")]
    NotComplete,
}

pub type Result<T> = std::result::Result<T, FileError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Pending,
    Sending,
    Receiving,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Direct,
    Relay,
    DhtMicro,
    DhtSignal,
}

pub struct OutgoingTransfer {
    pub file_id: FileId,
    pub peer: NodeId,
    pub encrypted: Vec<u8>,
    pub chunk_count: u32,
    pub next_chunk: u32,
    pub last_chunk_sent_ms: u64,
    pub state: TransferState,
    pub mode: TransferMode,
    pub updated_at: u64,
    pub file_hash: [u8; 32],
}

pub struct IncomingTransfer {
    pub file_id: FileId,
    pub peer: NodeId,
    pub chunk_count: u32,
    pub chunks: Vec<Option<Vec<u8>>>,
    pub chunks_done: u32,
    pub state: TransferState,
    pub mode: TransferMode,
    pub updated_at: u64,
    pub announced_hash: [u8; 32],
    /// The sender's file key, sealed under the shared secret with `peer`.
    /// Carried from the offer so the plaintext can be recovered once every
    /// chunk is in, via [`FileEngine::decrypt`].
    pub file_key_sealed: [u8; 48],
    pub nonce: [u8; 24],
}

/// DHT storage key for the out-of-band offer blob (spec §4.4 DHT_SIGNAL mode).
pub fn offer_key(recipient: NodeId, file_id: FileId) -> [u8; 32] {
    blake2::derive_multi(contexts::FILE_OFFER_KEY, &[recipient.as_bytes(), file_id.as_bytes()])
}

/// DHT storage key for chunk `i` of a file (spec §4.4 DHT_MICRO mode).
pub fn chunk_key(file_hash: &[u8; 32], i: u32) -> [u8; 32] {
    blake2::derive_multi(contexts::FILE_CHUNK_KEY, &[file_hash, &i.to_le_bytes()])
}

#[derive(Default)]
pub struct FileEngine {
    outgoing: HashMap<FileId, OutgoingTransfer>,
    incoming: HashMap<FileId, IncomingTransfer>,
}

impl FileEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encrypt `plaintext` once end-to-end and register an outgoing
    /// transfer. Returns the `FILE_OFFER` frame to send and the sealed
    /// file key (48 B: an AEAD-encrypted copy of the 32 B key under the
    /// peer's shared secret).
    pub fn offer(
        &mut self,
        peer: NodeId,
        file_id: FileId,
        filename: &str,
        mime: &str,
        plaintext: &[u8],
        shared_secret: &[u8; 32],
    ) -> Result<Vec<u8>> {
        if self.outgoing.len() >= MAX_TRANSFERS {
            return Err(FileError::Full);
        }
        let file_key = xchacha20::SymmetricKey::random();
        let nonce = xchacha20::random_nonce();
        let encrypted = xchacha20::encrypt_no_aad(file_key.as_bytes(), &nonce, plaintext)?;
        let file_hash = blake2::hash(&encrypted);
        let sealed = xchacha20::encrypt_no_aad(shared_secret, &nonce, file_key.as_bytes())?;
        let mut file_key_sealed = [0u8; 48];
        file_key_sealed.copy_from_slice(&sealed);

        let count = chunk_count(encrypted.len() as u64);
        let meta = wire::FileMeta {
            file_id,
            filename: filename.to_string(),
            mime: mime.to_string(),
            size: encrypted.len() as u64,
            chunk_count: count,
            file_key_sealed,
            nonce,
            file_hash,
        };
        let frame = meta.to_bytes();

        self.outgoing.insert(
            file_id,
            OutgoingTransfer {
                file_id,
                peer,
                encrypted,
                chunk_count: count,
                next_chunk: 0,
                last_chunk_sent_ms: 0,
                state: TransferState::Pending,
                mode: TransferMode::Direct,
                updated_at: 0,
                file_hash,
            },
        );
        Ok(frame)
    }

    /// Register an inbound offer on the receiving side (before an accept
    /// decision is made).
    pub fn register_incoming(&mut self, peer: NodeId, meta: &wire::FileMeta, now_ms: u64) -> Result<()> {
        if self.incoming.len() >= MAX_TRANSFERS {
            return Err(FileError::Full);
        }
        self.incoming.insert(
            meta.file_id,
            IncomingTransfer {
                file_id: meta.file_id,
                peer,
                chunk_count: meta.chunk_count,
                chunks: vec![None; meta.chunk_count as usize],
                chunks_done: 0,
                state: TransferState::Pending,
                mode: TransferMode::Direct,
                updated_at: now_ms,
                announced_hash: meta.file_hash,
                file_key_sealed: meta.file_key_sealed,
                nonce: meta.nonce,
            },
        );
        Ok(())
    }

    /// Receiver accepts, optionally resuming from `start_chunk` (already
    /// obtained lower-indexed chunks e.g. via DHT).
    pub fn accept_incoming(&mut self, file_id: FileId, now_ms: u64) -> Result<()> {
        let t = self.incoming.get_mut(&file_id).ok_or(FileError::NotFound)?;
        t.state = TransferState::Receiving;
        t.updated_at = now_ms;
        Ok(())
    }

    /// Sender processes `FILE_ACCEPT(start_chunk)`.
    pub fn on_accept(&mut self, file_id: FileId, start_chunk: u32, now_ms: u64) -> Result<()> {
        let t = self.outgoing.get_mut(&file_id).ok_or(FileError::NotFound)?;
        t.state = TransferState::Sending;
        t.next_chunk = start_chunk;
        t.last_chunk_sent_ms = 0;
        t.updated_at = now_ms;
        Ok(())
    }

    /// Supply a chunk obtained out-of-band (e.g. via DHT micro-mode) before
    /// direct transfer delivers it.
    pub fn supply_external_chunk(&mut self, file_id: FileId, chunk_idx: u32, data: Vec<u8>, now_ms: u64) -> Result<()> {
        let t = self.incoming.get_mut(&file_id).ok_or(FileError::NotFound)?;
        if t.chunks[chunk_idx as usize].is_none() {
            t.chunks[chunk_idx as usize] = Some(data);
            t.chunks_done += 1;
        }
        t.updated_at = now_ms;
        Ok(())
    }

    /// Receiver processes an inbound `FILE_CHUNK`. Returns a `FILE_COMPLETE`
    /// frame once every chunk is present.
    pub fn handle_chunk(&mut self, file_id: FileId, chunk_idx: u32, data: &[u8], now_ms: u64) -> Result<Option<Vec<u8>>> {
        let t = self.incoming.get_mut(&file_id).ok_or(FileError::NotFound)?;
        if (chunk_idx as usize) >= t.chunks.len() {
            return Err(FileError::NotFound);
        }
        t.updated_at = now_ms;
        if t.chunks[chunk_idx as usize].is_none() {
            t.chunks[chunk_idx as usize] = Some(data.to_vec());
            t.chunks_done += 1;
        }
        if t.chunks_done == t.chunk_count {
            let full: Vec<u8> = t.chunks.iter().flatten().flat_map(|c| c.iter().copied()).collect();
            let verify_hash = blake2::hash(&full);
            let status = if verify_hash == t.announced_hash { 0 } else { 1 };
            t.state = if status == 0 { TransferState::Completed } else { TransferState::Failed };
            return Ok(Some(wire::encode_complete(file_id, status, t.chunks_done, verify_hash)));
        }
        Ok(None)
    }

    /// Unseal the sender's file key with the shared secret held for `peer`
    /// and decrypt the reassembled ciphertext back to the original
    /// plaintext. Only callable once [`handle_chunk`](Self::handle_chunk)
    /// has driven the transfer to `Completed`; `handle_chunk` itself only
    /// verifies the ciphertext's hash, since it has no shared secret to
    /// unseal the key with.
    pub fn decrypt(&self, file_id: FileId, shared_secret: &[u8; 32]) -> Result<Vec<u8>> {
        let t = self.incoming.get(&file_id).ok_or(FileError::NotFound)?;
        if t.state != TransferState::Completed {
            return Err(FileError::NotComplete);
        }
        let unsealed = xchacha20::decrypt_no_aad(shared_secret, &t.nonce, &t.file_key_sealed)?;
        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&unsealed);
        let file_key = xchacha20::SymmetricKey::from_bytes(key_bytes);
        let full: Vec<u8> = t.chunks.iter().flatten().flat_map(|c| c.iter().copied()).collect();
        xchacha20::decrypt_no_aad(file_key.as_bytes(), &t.nonce, &full).map_err(Into::into)
    }

    /// Sender processes the receiver's `FILE_COMPLETE`.
    pub fn handle_complete(&mut self, file_id: FileId, status: u8, verify_hash: [u8; 32]) -> Result<()> {
        let t = self.outgoing.get_mut(&file_id).ok_or(FileError::NotFound)?;
        t.state = if status == 0 && verify_hash == t.file_hash {
            TransferState::Completed
        } else {
            TransferState::Failed
        };
        Ok(())
    }

    /// Pace one outgoing chunk per transfer per call, once every 500 ms;
    /// the first chunk after an accept is emitted immediately. Also runs
    /// stall detection on both directions.
    pub fn poll(&mut self, now_ms: u64) -> Vec<(NodeId, Vec<u8>)> {
        let mut frames = Vec::new();
        for t in self.outgoing.values_mut() {
            if t.state != TransferState::Sending {
                continue;
            }
            let due = t.last_chunk_sent_ms == 0 || now_ms.saturating_sub(t.last_chunk_sent_ms) >= CHUNK_PACING_MS;
            if !due || t.next_chunk >= t.chunk_count {
                continue;
            }
            let start = t.next_chunk as usize * CHUNK_SIZE;
            let end = (start + CHUNK_SIZE).min(t.encrypted.len());
            let chunk = &t.encrypted[start..end];
            frames.push((t.peer, wire::encode_chunk(t.file_id, t.next_chunk, chunk)));
            t.last_chunk_sent_ms = now_ms;
            t.updated_at = now_ms;
            t.next_chunk += 1;
            if t.next_chunk >= t.chunk_count {
                t.state = TransferState::Completed;
            }
        }

        for t in self.outgoing.values_mut() {
            if matches!(t.state, TransferState::Sending) && now_ms.saturating_sub(t.updated_at) > STALL_TIMEOUT_MS {
                t.state = TransferState::Failed;
            }
        }
        for t in self.incoming.values_mut() {
            if matches!(t.state, TransferState::Receiving) && now_ms.saturating_sub(t.updated_at) > STALL_TIMEOUT_MS {
                t.state = TransferState::Failed;
            }
        }
        frames
    }

    pub fn outgoing_state(&self, file_id: FileId) -> Option<TransferState> {
        self.outgoing.get(&file_id).map(|t| t.state)
    }

    pub fn incoming_state(&self, file_id: FileId) -> Option<TransferState> {
        self.incoming.get(&file_id).map(|t| t.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn scenario_f_accept_resume_and_complete() {
        let mut sender = FileEngine::new();
        let mut receiver = FileEngine::new();
        let peer_s = NodeId::random(&mut OsRng);
        let peer_r = NodeId::random(&mut OsRng);
        let file_id = FileId::random(&mut OsRng);
        let shared_secret = [42u8; 32];

        let plaintext = vec![7u8; 2500];
        let offer_frame = sender
            .offer(peer_r, file_id, "data.bin", "application/octet-stream", &plaintext, &shared_secret)
            .unwrap();
        let meta = wire::FileMeta::from_bytes(&offer_frame).unwrap();
        assert_eq!(meta.chunk_count, 3);

        receiver.register_incoming(peer_s, &meta, 0).unwrap();
        receiver.accept_incoming(file_id, 0).unwrap();
        sender.on_accept(file_id, 1, 0).unwrap();

        // receiver already has chunk 0 via DHT
        let encrypted = sender.outgoing.get(&file_id).unwrap().encrypted.clone();
        let chunk0 = encrypted[0..1024].to_vec();
        receiver.supply_external_chunk(file_id, 0, chunk0, 0).unwrap();

        let frames_a = sender.poll(0);
        assert_eq!(frames_a.len(), 1);
        let frames_b = sender.poll(500);
        assert_eq!(frames_b.len(), 1);

        let mut complete_frame = None;
        for (_, frame) in frames_a.into_iter().chain(frames_b) {
            let (fid, idx, data) = wire::decode_chunk(&frame).unwrap();
            let result = receiver.handle_chunk(fid, idx, data, 600).unwrap();
            if result.is_some() {
                complete_frame = result;
            }
        }

        let complete_frame = complete_frame.expect("all chunks received");
        let (fid, status, chunks_received, verify_hash) = wire::decode_complete(&complete_frame).unwrap();
        assert_eq!(fid, file_id);
        assert_eq!(status, 0);
        assert_eq!(chunks_received, 3);

        sender.handle_complete(file_id, status, verify_hash).unwrap();
        assert_eq!(sender.outgoing_state(file_id), Some(TransferState::Completed));
        assert_eq!(receiver.incoming_state(file_id), Some(TransferState::Completed));
        let _ = peer_s;
    }

    #[test]
    fn stalled_transfer_fails() {
        let mut sender = FileEngine::new();
        let peer = NodeId::random(&mut OsRng);
        let file_id = FileId::random(&mut OsRng);
        sender.offer(peer, file_id, "f", "m", &vec![1u8; 50], &[0u8; 32]).unwrap();
        sender.on_accept(file_id, 0, 0).unwrap();
        sender.poll(0);
        sender.poll(60_001);
        assert_eq!(sender.outgoing_state(file_id), Some(TransferState::Failed));
    }

    #[test]
    fn completed_transfer_decrypts_back_to_plaintext() {
        let mut sender = FileEngine::new();
        let mut receiver = FileEngine::new();
        let peer_s = NodeId::random(&mut OsRng);
        let peer_r = NodeId::random(&mut OsRng);
        let file_id = FileId::random(&mut OsRng);
        let shared_secret = [11u8; 32];

        let plaintext = b"the whole point of sending a file is reading it back".to_vec();
        let offer_frame = sender
            .offer(peer_r, file_id, "note.txt", "text/plain", &plaintext, &shared_secret)
            .unwrap();
        let meta = wire::FileMeta::from_bytes(&offer_frame).unwrap();

        receiver.register_incoming(peer_s, &meta, 0).unwrap();
        receiver.accept_incoming(file_id, 0).unwrap();
        sender.on_accept(file_id, 0, 0).unwrap();

        let mut complete_frame = None;
        let mut now = 0u64;
        loop {
            let frames = sender.poll(now);
            if frames.is_empty() {
                break;
            }
            for (_, frame) in frames {
                let (fid, idx, data) = wire::decode_chunk(&frame).unwrap();
                if let Some(frame) = receiver.handle_chunk(fid, idx, data, now).unwrap() {
                    complete_frame = Some(frame);
                }
            }
            now += 500;
        }
        complete_frame.expect("transfer completes");

        assert_eq!(receiver.incoming_state(file_id), Some(TransferState::Completed));
        let recovered = receiver.decrypt(file_id, &shared_secret).unwrap();
        assert_eq!(recovered, plaintext);

        let wrong_secret = [12u8; 32];
        assert!(receiver.decrypt(file_id, &wrong_secret).is_err());
    }

    #[test]
    fn decrypt_before_complete_is_rejected() {
        let mut sender = FileEngine::new();
        let mut receiver = FileEngine::new();
        let peer_r = NodeId::random(&mut OsRng);
        let peer_s = NodeId::random(&mut OsRng);
        let file_id = FileId::random(&mut OsRng);
        let shared_secret = [1u8; 32];
        let offer_frame = sender
            .offer(peer_r, file_id, "f", "m", &vec![1u8; 10], &shared_secret)
            .unwrap();
        let meta = wire::FileMeta::from_bytes(&offer_frame).unwrap();
        receiver.register_incoming(peer_s, &meta, 0).unwrap();

        assert!(matches!(
            receiver.decrypt(file_id, &shared_secret),
            Err(FileError::NotComplete)
        ));
    }

    #[test]
    fn offer_key_and_chunk_key_are_deterministic() {
        let recipient = NodeId::random(&mut OsRng);
        let file_id = FileId::random(&mut OsRng);
        assert_eq!(offer_key(recipient, file_id), offer_key(recipient, file_id));
        let hash = [3u8; 32];
        assert_ne!(chunk_key(&hash, 0), chunk_key(&hash, 1));
    }
}
