//! Mail engine: compose, sign, send with retry/bounce, thread, file, and
//! search mail (spec §4.7).

pub mod wire;

use std::collections::HashMap;

use cyx_crypto::ed25519::SigningKey;
use cyx_types::{MailId, NodeId};
use wire::MailWire;

pub const SEND_QUEUE_CAP: usize = 16;
pub const RETRY_INTERVAL_MS: u64 = 30_000;
pub const MAX_RETRIES: u32 = 3;
/// Local mailbox capacity across every folder; oldest mail is evicted to
/// make room, same as the presence/DNS caches' LRU eviction.
pub const MAX_MAIL_STORE: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("send queue is full")]
    QueueFull,
    #[error("mail not found")]
    NotFound,
    #[error("too many recipients")]
    TooManyRecipients,
}

pub type Result<T> = std::result::Result<T, MailError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Folder {
    Inbox,
    Sent,
    Drafts,
    Archive,
    Trash,
    Spam,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Draft,
    Queued,
    Sent,
    Delivered,
    Failed,
}

pub struct MailEntry {
    pub mail: MailWire,
    pub thread_id: MailId,
    pub folder: Folder,
    pub status: SendStatus,
    pub read: bool,
    pub flagged: bool,
    pub signature_valid: bool,
    in_trash_once: bool,
}

struct PendingSend {
    mail_id: MailId,
    start_time: u64,
    last_retry: u64,
    retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailEvent {
    Resend { peers: Vec<NodeId>, frame_bytes: Vec<u8> },
    Bounced { mail_id: MailId },
}

#[derive(Default)]
pub struct MailEngine {
    store: HashMap<MailId, MailEntry>,
    send_queue: Vec<PendingSend>,
}

impl MailEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sign and queue a new outgoing mail; returns its id and the
    /// `MAIL_SEND` frame to send to every entry in `to` and `cc`.
    #[allow(clippy::too_many_arguments)]
    pub fn compose(
        &mut self,
        signing_key: &SigningKey,
        from: NodeId,
        to: Vec<NodeId>,
        cc: Vec<NodeId>,
        subject: String,
        body: String,
        attachments: Vec<wire::MailAttachment>,
        in_reply_to: Option<MailId>,
        mail_id: MailId,
        now_ms: u64,
    ) -> Result<Vec<u8>> {
        if self.send_queue.len() >= SEND_QUEUE_CAP {
            return Err(MailError::QueueFull);
        }
        if to.len() > wire::MAX_RECIPIENTS || cc.len() > wire::MAX_RECIPIENTS {
            return Err(MailError::TooManyRecipients);
        }
        let signature = signing_key.sign(&wire::signed_material(mail_id, &subject, &body));
        let mail = MailWire {
            mail_id,
            in_reply_to,
            from,
            to,
            cc,
            subject,
            body,
            sent_at: now_ms,
            attachments,
            pubkey: signing_key.verifying_key(),
            signature,
        };
        let thread_id = self.resolve_thread_id(mail_id, in_reply_to);
        let bytes = mail.to_bytes();

        self.ensure_capacity();
        self.store.insert(
            mail_id,
            MailEntry {
                mail,
                thread_id,
                folder: Folder::Sent,
                status: SendStatus::Queued,
                read: true,
                flagged: false,
                signature_valid: true,
                in_trash_once: false,
            },
        );
        self.send_queue.push(PendingSend {
            mail_id,
            start_time: now_ms,
            last_retry: now_ms,
            retries: 0,
        });
        Ok(bytes)
    }

    /// Evict the oldest stored mail once the mailbox is at capacity, same
    /// LRU-by-timestamp policy the DNS and presence caches use.
    fn ensure_capacity(&mut self) {
        if self.store.len() < MAX_MAIL_STORE {
            return;
        }
        if let Some(oldest_id) = self.store.iter().min_by_key(|(_, e)| e.mail.sent_at).map(|(id, _)| *id) {
            self.store.remove(&oldest_id);
        }
    }

    fn resolve_thread_id(&self, mail_id: MailId, in_reply_to: Option<MailId>) -> MailId {
        match in_reply_to {
            Some(parent_id) => match self.store.get(&parent_id) {
                Some(parent) => parent.thread_id,
                None => parent_id,
            },
            None => mail_id,
        }
    }

    /// Handle an inbound `MAIL_SEND`. Signature failure is recorded, not
    /// fatal: the mail is delivered with `signature_valid = false`.
    pub fn handle_send(&mut self, mail: MailWire, now_ms: u64) -> Vec<u8> {
        let signature_valid = mail
            .pubkey
            .verify(&wire::signed_material(mail.mail_id, &mail.subject, &mail.body), &mail.signature)
            .is_ok();
        let thread_id = self.resolve_thread_id(mail.mail_id, mail.in_reply_to);
        let mail_id = mail.mail_id;
        let _ = now_ms;
        self.ensure_capacity();
        self.store.insert(
            mail_id,
            MailEntry {
                mail,
                thread_id,
                folder: Folder::Inbox,
                status: SendStatus::Delivered,
                read: false,
                flagged: false,
                signature_valid,
                in_trash_once: false,
            },
        );
        tracing::debug!(mail = %mail_id, signature_valid, "delivered inbound mail");
        wire::encode_ack(mail_id)
    }

    /// Handle an inbound `MAIL_ACK`: our outgoing mail was delivered.
    pub fn handle_ack(&mut self, mail_id: MailId) {
        self.send_queue.retain(|p| p.mail_id != mail_id);
        if let Some(entry) = self.store.get_mut(&mail_id) {
            entry.status = SendStatus::Delivered;
        }
    }

    /// Drive retries and bounces. Returns the frames to resend plus any
    /// bounce notifications.
    pub fn poll(&mut self, now_ms: u64) -> Vec<MailEvent> {
        let mut events = Vec::new();
        let mut bounced_ids = Vec::new();

        for pending in &mut self.send_queue {
            if now_ms.saturating_sub(pending.last_retry) < RETRY_INTERVAL_MS {
                continue;
            }
            if pending.retries >= MAX_RETRIES {
                bounced_ids.push(pending.mail_id);
                continue;
            }
            pending.retries += 1;
            pending.last_retry = now_ms;
            if let Some(entry) = self.store.get(&pending.mail_id) {
                let mut peers = entry.mail.to.clone();
                peers.extend(entry.mail.cc.iter().copied());
                events.push(MailEvent::Resend {
                    peers,
                    frame_bytes: entry.mail.to_bytes(),
                });
            }
        }

        self.send_queue.retain(|p| !bounced_ids.contains(&p.mail_id));
        for mail_id in bounced_ids {
            if let Some(entry) = self.store.get_mut(&mail_id) {
                entry.status = SendStatus::Failed;
                entry.folder = Folder::Sent;
            }
            tracing::debug!(mail = %mail_id, "mail bounced after max retries");
            events.push(MailEvent::Bounced { mail_id });
        }

        events
    }

    pub fn get(&self, mail_id: &MailId) -> Option<&MailEntry> {
        self.store.get(mail_id)
    }

    pub fn move_to(&mut self, mail_id: MailId, folder: Folder) -> Result<()> {
        let entry = self.store.get_mut(&mail_id).ok_or(MailError::NotFound)?;
        entry.folder = folder;
        Ok(())
    }

    /// First call moves to Trash; a second call on an already-trashed mail
    /// deletes it permanently.
    pub fn delete(&mut self, mail_id: MailId) -> Result<()> {
        let entry = self.store.get_mut(&mail_id).ok_or(MailError::NotFound)?;
        if entry.folder == Folder::Trash || entry.in_trash_once {
            self.store.remove(&mail_id);
        } else {
            entry.folder = Folder::Trash;
            entry.in_trash_once = true;
        }
        Ok(())
    }

    pub fn empty_trash(&mut self) {
        self.store.retain(|_, e| e.folder != Folder::Trash);
    }

    /// Mark read, optionally returning a `MAIL_READ_RECEIPT` frame.
    pub fn mark_read(&mut self, mail_id: MailId, send_receipt: bool) -> Result<Option<Vec<u8>>> {
        let entry = self.store.get_mut(&mail_id).ok_or(MailError::NotFound)?;
        entry.read = true;
        Ok(send_receipt.then(|| wire::encode_read_receipt(mail_id)))
    }

    pub fn set_flagged(&mut self, mail_id: MailId, flagged: bool) -> Result<()> {
        let entry = self.store.get_mut(&mail_id).ok_or(MailError::NotFound)?;
        entry.flagged = flagged;
        Ok(())
    }

    /// Case-sensitive substring search over subject and body.
    pub fn search(&self, query: &str) -> Vec<&MailEntry> {
        self.store
            .values()
            .filter(|e| e.mail.subject.contains(query) || e.mail.body.contains(query))
            .collect()
    }
}
