//! File transfer wire IDs and frame codecs (spec §4.4). v1 push
//! (`META`/`CHUNK`/`ACK`) and v2 offer/accept coexist on the same byte range.

use cyx_types::FileId;

pub const FILE_META: u8 = 0x14;
pub const FILE_CHUNK: u8 = 0x15;
pub const FILE_ACK: u8 = 0x16;
pub const FILE_OFFER: u8 = 0x40;
pub const FILE_ACCEPT: u8 = 0x41;
pub const FILE_REJECT: u8 = 0x42;
pub const FILE_COMPLETE: u8 = 0x43;
pub const FILE_CANCEL: u8 = 0x44;
pub const FILE_DHT_READY: u8 = 0x45;

pub const CHUNK_SIZE: usize = 1024;

#[derive(Debug, Clone)]
pub struct FileMeta {
    pub file_id: FileId,
    pub filename: String,
    pub mime: String,
    pub size: u64,
    pub chunk_count: u32,
    pub file_key_sealed: [u8; 48],
    pub nonce: [u8; 24],
    pub file_hash: [u8; 32],
}

pub fn chunk_count(size: u64) -> u32 {
    ((size + CHUNK_SIZE as u64 - 1) / CHUNK_SIZE as u64) as u32
}

impl FileMeta {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![FILE_OFFER];
        out.extend_from_slice(self.file_id.as_bytes());
        let name_bytes = self.filename.as_bytes();
        out.push(name_bytes.len() as u8);
        out.extend_from_slice(name_bytes);
        let mime_bytes = self.mime.as_bytes();
        out.push(mime_bytes.len() as u8);
        out.extend_from_slice(mime_bytes);
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.chunk_count.to_le_bytes());
        out.extend_from_slice(&self.file_key_sealed);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.file_hash);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let (&type_byte, rest) = data.split_first()?;
        if type_byte != FILE_OFFER {
            return None;
        }
        let file_id = id8(rest.get(0..8)?);
        let mut pos = 8;
        let name_len = *rest.get(pos)? as usize;
        pos += 1;
        let filename = String::from_utf8(rest.get(pos..pos + name_len)?.to_vec()).ok()?;
        pos += name_len;
        let mime_len = *rest.get(pos)? as usize;
        pos += 1;
        let mime = String::from_utf8(rest.get(pos..pos + mime_len)?.to_vec()).ok()?;
        pos += mime_len;
        let size = u64::from_le_bytes(rest.get(pos..pos + 8)?.try_into().ok()?);
        pos += 8;
        let chunk_count = u32::from_le_bytes(rest.get(pos..pos + 4)?.try_into().ok()?);
        pos += 4;
        let mut file_key_sealed = [0u8; 48];
        file_key_sealed.copy_from_slice(rest.get(pos..pos + 48)?);
        pos += 48;
        let mut nonce = [0u8; 24];
        nonce.copy_from_slice(rest.get(pos..pos + 24)?);
        pos += 24;
        let mut file_hash = [0u8; 32];
        file_hash.copy_from_slice(rest.get(pos..pos + 32)?);
        Some(FileMeta {
            file_id,
            filename,
            mime,
            size,
            chunk_count,
            file_key_sealed,
            nonce,
            file_hash,
        })
    }
}

pub fn encode_accept(file_id: FileId, start_chunk: u32) -> Vec<u8> {
    let mut out = vec![FILE_ACCEPT];
    out.extend_from_slice(file_id.as_bytes());
    out.extend_from_slice(&start_chunk.to_le_bytes());
    out
}

pub fn decode_accept(data: &[u8]) -> Option<(FileId, u32)> {
    let (&type_byte, rest) = data.split_first()?;
    if type_byte != FILE_ACCEPT {
        return None;
    }
    let file_id = id8(rest.get(0..8)?);
    let start_chunk = u32::from_le_bytes(rest.get(8..12)?.try_into().ok()?);
    Some((file_id, start_chunk))
}

pub fn encode_reject(file_id: FileId) -> Vec<u8> {
    let mut out = vec![FILE_REJECT];
    out.extend_from_slice(file_id.as_bytes());
    out
}

pub fn encode_cancel(file_id: FileId) -> Vec<u8> {
    let mut out = vec![FILE_CANCEL];
    out.extend_from_slice(file_id.as_bytes());
    out
}

pub fn encode_chunk(file_id: FileId, chunk_idx: u32, data: &[u8]) -> Vec<u8> {
    let mut out = vec![FILE_CHUNK];
    out.extend_from_slice(file_id.as_bytes());
    out.extend_from_slice(&chunk_idx.to_le_bytes());
    out.extend_from_slice(&(data.len() as u16).to_le_bytes());
    out.extend_from_slice(data);
    out
}

pub fn decode_chunk(data: &[u8]) -> Option<(FileId, u32, &[u8])> {
    let (&type_byte, rest) = data.split_first()?;
    if type_byte != FILE_CHUNK {
        return None;
    }
    let file_id = id8(rest.get(0..8)?);
    let chunk_idx = u32::from_le_bytes(rest.get(8..12)?.try_into().ok()?);
    let chunk_len = u16::from_le_bytes(rest.get(12..14)?.try_into().ok()?) as usize;
    let chunk = rest.get(14..14 + chunk_len)?;
    Some((file_id, chunk_idx, chunk))
}

pub fn encode_complete(file_id: FileId, status: u8, chunks_received: u32, verify_hash: [u8; 32]) -> Vec<u8> {
    let mut out = vec![FILE_COMPLETE];
    out.extend_from_slice(file_id.as_bytes());
    out.push(status);
    out.extend_from_slice(&chunks_received.to_le_bytes());
    out.extend_from_slice(&verify_hash);
    out
}

pub fn decode_complete(data: &[u8]) -> Option<(FileId, u8, u32, [u8; 32])> {
    let (&type_byte, rest) = data.split_first()?;
    if type_byte != FILE_COMPLETE {
        return None;
    }
    let file_id = id8(rest.get(0..8)?);
    let status = *rest.get(8)?;
    let chunks_received = u32::from_le_bytes(rest.get(9..13)?.try_into().ok()?);
    let mut verify_hash = [0u8; 32];
    verify_hash.copy_from_slice(rest.get(13..45)?);
    Some((file_id, status, chunks_received, verify_hash))
}

pub fn encode_dht_ready(file_id: FileId, chunk_count: u32) -> Vec<u8> {
    let mut out = vec![FILE_DHT_READY];
    out.extend_from_slice(file_id.as_bytes());
    out.extend_from_slice(&chunk_count.to_le_bytes());
    out
}

fn id8(bytes: &[u8]) -> FileId {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(bytes);
    FileId(arr)
}
