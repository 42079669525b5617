//! Mail wire frames (spec §4.7, type-byte range `0xE0..0xEA`).
//!
//! This range is numerically disjoint from relay's `0xE0..0xE5` only by
//! layer: relay bytes are the first byte of a raw transport frame, mail
//! bytes live inside an onion-decrypted payload. See the relay/connection
//! crates for the other half of that split.

use cyx_crypto::ed25519::{Signature, VerifyingKey};
use cyx_types::{FileId, MailId, NodeId};

pub const MAIL_SEND: u8 = 0xE0;
pub const MAIL_ACK: u8 = 0xE1;
pub const MAIL_READ_RECEIPT: u8 = 0xE2;
pub const MAIL_BOUNCE: u8 = 0xE3;

pub const SUBJECT_MAX_LEN: usize = 255;
pub const BODY_SIGNED_PREFIX_LEN: usize = 256;

/// Max `to[]`/`cc[]` entries on a single mail.
pub const MAX_RECIPIENTS: usize = 10;
/// Max attachments on a single mail.
pub const MAX_ATTACHMENTS: usize = 10;
/// Attachments at or under this size are carried inline; larger ones are
/// handed to the file transfer engine and referenced by `file_id` only.
pub const MAX_INLINE_ATTACHMENT_SIZE: u64 = 64 * 1024;

/// Where an attachment's bytes actually live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentStorage {
    /// The bytes ride along with the mail itself.
    Inline(Vec<u8>),
    /// Too large to inline; delivered separately via the file transfer
    /// engine under the same `file_id`.
    FileTransfer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailAttachment {
    pub file_id: FileId,
    pub filename: String,
    pub mime: String,
    pub size: u64,
    pub file_hash: [u8; 32],
    pub storage: AttachmentStorage,
}

/// The wire form of a mail message (also the signed artifact, minus the
/// signature itself).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailWire {
    pub mail_id: MailId,
    pub in_reply_to: Option<MailId>,
    pub from: NodeId,
    pub to: Vec<NodeId>,
    pub cc: Vec<NodeId>,
    pub subject: String,
    pub body: String,
    pub sent_at: u64,
    pub attachments: Vec<MailAttachment>,
    pub pubkey: VerifyingKey,
    pub signature: Signature,
}

/// Bytes an Ed25519 signature covers: `mail_id ‖ subject ‖ body[0..256]`.
pub fn signed_material(mail_id: MailId, subject: &str, body: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + subject.len() + BODY_SIGNED_PREFIX_LEN);
    out.extend_from_slice(mail_id.as_bytes());
    out.extend_from_slice(subject.as_bytes());
    let body_bytes = body.as_bytes();
    let n = body_bytes.len().min(BODY_SIGNED_PREFIX_LEN);
    out.extend_from_slice(&body_bytes[..n]);
    out
}

impl MailWire {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![MAIL_SEND];
        out.extend_from_slice(self.mail_id.as_bytes());
        match self.in_reply_to {
            Some(id) => {
                out.push(1);
                out.extend_from_slice(id.as_bytes());
            }
            None => out.push(0),
        }
        out.extend_from_slice(self.from.as_bytes());
        out.push(self.to.len().min(MAX_RECIPIENTS) as u8);
        for id in self.to.iter().take(MAX_RECIPIENTS) {
            out.extend_from_slice(id.as_bytes());
        }
        out.push(self.cc.len().min(MAX_RECIPIENTS) as u8);
        for id in self.cc.iter().take(MAX_RECIPIENTS) {
            out.extend_from_slice(id.as_bytes());
        }
        let subject_bytes = self.subject.as_bytes();
        out.push(subject_bytes.len().min(SUBJECT_MAX_LEN) as u8);
        out.extend_from_slice(&subject_bytes[..subject_bytes.len().min(SUBJECT_MAX_LEN)]);
        out.extend_from_slice(&(self.body.len() as u32).to_le_bytes());
        out.extend_from_slice(self.body.as_bytes());
        out.extend_from_slice(&self.sent_at.to_le_bytes());
        out.push(self.attachments.len().min(MAX_ATTACHMENTS) as u8);
        for att in self.attachments.iter().take(MAX_ATTACHMENTS) {
            out.extend_from_slice(att.file_id.as_bytes());
            let name_bytes = att.filename.as_bytes();
            out.push(name_bytes.len().min(255) as u8);
            out.extend_from_slice(&name_bytes[..name_bytes.len().min(255)]);
            let mime_bytes = att.mime.as_bytes();
            out.push(mime_bytes.len().min(255) as u8);
            out.extend_from_slice(&mime_bytes[..mime_bytes.len().min(255)]);
            out.extend_from_slice(&att.size.to_le_bytes());
            out.extend_from_slice(&att.file_hash);
            match &att.storage {
                AttachmentStorage::Inline(data) => {
                    out.push(0);
                    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
                    out.extend_from_slice(data);
                }
                AttachmentStorage::FileTransfer => out.push(1),
            }
        }
        out.extend_from_slice(self.pubkey.as_bytes());
        out.extend_from_slice(&self.signature.to_bytes());
        out
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let (&type_byte, rest) = data.split_first()?;
        if type_byte != MAIL_SEND {
            return None;
        }
        let mail_id = id8(rest.get(0..8)?);
        let mut pos = 8;
        let has_reply = *rest.get(pos)?;
        pos += 1;
        let in_reply_to = if has_reply != 0 {
            let id = id8(rest.get(pos..pos + 8)?);
            pos += 8;
            Some(id)
        } else {
            None
        };
        let mut from_bytes = [0u8; 32];
        from_bytes.copy_from_slice(rest.get(pos..pos + 32)?);
        pos += 32;
        let to_count = *rest.get(pos)? as usize;
        pos += 1;
        let mut to = Vec::with_capacity(to_count);
        for _ in 0..to_count {
            let mut id = [0u8; 32];
            id.copy_from_slice(rest.get(pos..pos + 32)?);
            to.push(NodeId(id));
            pos += 32;
        }
        let cc_count = *rest.get(pos)? as usize;
        pos += 1;
        let mut cc = Vec::with_capacity(cc_count);
        for _ in 0..cc_count {
            let mut id = [0u8; 32];
            id.copy_from_slice(rest.get(pos..pos + 32)?);
            cc.push(NodeId(id));
            pos += 32;
        }
        let subject_len = *rest.get(pos)? as usize;
        pos += 1;
        let subject = String::from_utf8(rest.get(pos..pos + subject_len)?.to_vec()).ok()?;
        pos += subject_len;
        let body_len = u32::from_le_bytes(rest.get(pos..pos + 4)?.try_into().ok()?) as usize;
        pos += 4;
        let body = String::from_utf8(rest.get(pos..pos + body_len)?.to_vec()).ok()?;
        pos += body_len;
        let sent_at = u64::from_le_bytes(rest.get(pos..pos + 8)?.try_into().ok()?);
        pos += 8;
        let attachment_count = *rest.get(pos)? as usize;
        pos += 1;
        let mut attachments = Vec::with_capacity(attachment_count);
        for _ in 0..attachment_count {
            let file_id = file_id8(rest.get(pos..pos + 8)?);
            pos += 8;
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
            let mut file_hash = [0u8; 32];
            file_hash.copy_from_slice(rest.get(pos..pos + 32)?);
            pos += 32;
            let storage_tag = *rest.get(pos)?;
            pos += 1;
            let storage = match storage_tag {
                0 => {
                    let inline_len = u32::from_le_bytes(rest.get(pos..pos + 4)?.try_into().ok()?) as usize;
                    pos += 4;
                    let data = rest.get(pos..pos + inline_len)?.to_vec();
                    pos += inline_len;
                    AttachmentStorage::Inline(data)
                }
                1 => AttachmentStorage::FileTransfer,
                _ => return None,
            };
            attachments.push(MailAttachment {
                file_id,
                filename,
                mime,
                size,
                file_hash,
                storage,
            });
        }
        let mut pubkey_bytes = [0u8; 32];
        pubkey_bytes.copy_from_slice(rest.get(pos..pos + 32)?);
        pos += 32;
        let mut sig_bytes = [0u8; 64];
        sig_bytes.copy_from_slice(rest.get(pos..pos + 64)?);
        Some(MailWire {
            mail_id,
            in_reply_to,
            from: NodeId(from_bytes),
            to,
            cc,
            subject,
            body,
            sent_at,
            attachments,
            pubkey: VerifyingKey::from_bytes(&pubkey_bytes).ok()?,
            signature: Signature::from_bytes(&sig_bytes),
        })
    }
}

pub fn encode_ack(mail_id: MailId) -> Vec<u8> {
    let mut out = vec![MAIL_ACK];
    out.extend_from_slice(mail_id.as_bytes());
    out
}

pub fn decode_ack(data: &[u8]) -> Option<MailId> {
    let (&type_byte, rest) = data.split_first()?;
    if type_byte != MAIL_ACK {
        return None;
    }
    Some(id8(rest.get(0..8)?))
}

pub fn encode_read_receipt(mail_id: MailId) -> Vec<u8> {
    let mut out = vec![MAIL_READ_RECEIPT];
    out.extend_from_slice(mail_id.as_bytes());
    out
}

pub fn decode_read_receipt(data: &[u8]) -> Option<MailId> {
    let (&type_byte, rest) = data.split_first()?;
    if type_byte != MAIL_READ_RECEIPT {
        return None;
    }
    Some(id8(rest.get(0..8)?))
}

fn id8(bytes: &[u8]) -> MailId {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(bytes);
    MailId(arr)
}

fn file_id8(bytes: &[u8]) -> FileId {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(bytes);
    FileId(arr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyx_crypto::ed25519::KeyPair;
    use rand::rngs::OsRng;

    fn sample() -> MailWire {
        let kp = KeyPair::generate();
        let mail_id = MailId::random(&mut OsRng);
        let signature = kp.signing_key.sign(&signed_material(mail_id, "hi", "body text"));
        MailWire {
            mail_id,
            in_reply_to: None,
            from: NodeId::random(&mut OsRng),
            to: vec![NodeId::random(&mut OsRng)],
            cc: Vec::new(),
            subject: "hi".to_string(),
            body: "body text".to_string(),
            sent_at: 1_000,
            attachments: Vec::new(),
            pubkey: kp.verifying_key,
            signature,
        }
    }

    #[test]
    fn round_trip_without_reply() {
        let wire = sample();
        let bytes = wire.to_bytes();
        assert_eq!(MailWire::from_bytes(&bytes).unwrap(), wire);
    }

    #[test]
    fn round_trip_with_reply() {
        let mut wire = sample();
        wire.in_reply_to = Some(MailId::random(&mut OsRng));
        let bytes = wire.to_bytes();
        assert_eq!(MailWire::from_bytes(&bytes).unwrap(), wire);
    }

    #[test]
    fn round_trip_with_multiple_recipients_and_attachments() {
        let mut wire = sample();
        wire.to.push(NodeId::random(&mut OsRng));
        wire.cc = vec![NodeId::random(&mut OsRng), NodeId::random(&mut OsRng)];
        wire.attachments = vec![
            MailAttachment {
                file_id: FileId::random(&mut OsRng),
                filename: "photo.png".into(),
                mime: "image/png".into(),
                size: 4,
                file_hash: [7u8; 32],
                storage: AttachmentStorage::Inline(vec![1, 2, 3, 4]),
            },
            MailAttachment {
                file_id: FileId::random(&mut OsRng),
                filename: "video.mp4".into(),
                mime: "video/mp4".into(),
                size: 10_000_000,
                file_hash: [8u8; 32],
                storage: AttachmentStorage::FileTransfer,
            },
        ];
        let bytes = wire.to_bytes();
        assert_eq!(MailWire::from_bytes(&bytes).unwrap(), wire);
    }

    #[test]
    fn signature_verifies_against_signed_material() {
        let wire = sample();
        let material = signed_material(wire.mail_id, &wire.subject, &wire.body);
        assert!(wire.pubkey.verify(&material, &wire.signature).is_ok());
    }

    #[test]
    fn ack_round_trip() {
        let id = MailId::random(&mut OsRng);
        assert_eq!(decode_ack(&encode_ack(id)), Some(id));
    }
}
