//! Core wires every engine to the `Transport`/`Onion`/`Dht` handles and
//! dispatches inbound application bytes by their type-byte range (spec §6).
//!
//! There is no shared "Services" struct threaded through every engine:
//! each engine crate takes the collaborator handles it needs directly as
//! constructor parameters, which keeps the dependency graph a DAG instead
//! of a cycle. `Core` is the one place that owns all three handles and
//! builds every engine from them.

use std::rc::Rc;

use cyx_chat::ChatEngine;
use cyx_connection::{ConnEvent, ConnectionManager};
use cyx_crypto::ed25519::SigningKey;
use cyx_dht::Dht;
use cyx_dns::DnsEngine;
use cyx_file::FileEngine;
use cyx_group::GroupEngine;
use cyx_mail::MailEngine;
use cyx_onion::Onion;
use cyx_presence::{wire::PresenceFrame, PresenceEngine};
use cyx_relay::RelayClient;
use cyx_transport::Transport;
use cyx_types::{FileId, GroupId, MailId, NodeId};

/// Type-byte ranges from the wire registry (spec §6). Relay's `0xE0..0xE5`
/// is deliberately absent: those bytes are consumed inside
/// [`ConnectionManager`] and never surface here as application data.
pub const TYPE_CHAT_RANGE: std::ops::RangeInclusive<u8> = 0x10..=0x1F;
pub const TYPE_GROUP_RANGE: std::ops::RangeInclusive<u8> = 0x20..=0x2F;
pub const TYPE_PRESENCE_RANGE: std::ops::RangeInclusive<u8> = 0x30..=0x3F;
pub const TYPE_FILE_RANGE: std::ops::RangeInclusive<u8> = 0x40..=0x45;
pub const TYPE_DNS_RANGE: std::ops::RangeInclusive<u8> = 0xD0..=0xD6;
pub const TYPE_MAIL_RANGE: std::ops::RangeInclusive<u8> = 0xE0..=0xE3;

#[derive(Debug, thiserror::Error)]
pub enum CyxError {
    #[error(transparent)]
    Connection(#[from] cyx_connection::ConnectionError),
    #[error(transparent)]
    Relay(#[from] cyx_relay::RelayError),
    #[error(transparent)]
    Chat(#[from] cyx_chat::ChatError),
    #[error(transparent)]
    File(#[from] cyx_file::FileError),
    #[error(transparent)]
    Dns(#[from] cyx_dns::DnsError),
    #[error(transparent)]
    Group(#[from] cyx_group::GroupError),
    #[error(transparent)]
    Mail(#[from] cyx_mail::MailError),
}

pub type Result<T> = std::result::Result<T, CyxError>;

/// What happened to a group while we weren't looking; the host applies the
/// outcome to its own copy of the membership list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupMembershipKind {
    Kicked { target: NodeId },
    Left,
    RoleUpdated { target: NodeId, role: u8 },
}

/// Everything a single [`Core::poll`] call delivers to the host.
#[derive(Debug)]
pub enum CoreEvent {
    PeerConnected { peer: NodeId },
    PeerDisconnected { peer: NodeId },
    Chat(cyx_chat::Delivered),
    /// An invite the host must act on: unseal `sealed_key` with the shared
    /// secret it holds for `from`, then call [`GroupEngine::create_group`]
    /// to materialize local membership. Core has no standing X25519 secret
    /// to do this itself (that lives with the onion/connection layer).
    GroupInvite {
        group_id: GroupId,
        group_name: String,
        sealed_key: [u8; 48],
        nonce: [u8; 24],
        key_version: u64,
        inviter: NodeId,
        from: NodeId,
    },
    /// A resealed key the host must unseal with its shared secret for
    /// `from` and hand to [`GroupEngine::handle_key_update`].
    GroupKeyUpdate {
        group_id: GroupId,
        sealed_key: [u8; 48],
        nonce: [u8; 24],
        key_version: u64,
        from: NodeId,
    },
    GroupText { group_id: GroupId, from: NodeId, text: String },
    /// A membership-changing frame carries no wire-level proof of the
    /// sender's authority; Core surfaces it rather than applying it, so the
    /// host can check `from` against its own membership/role view first.
    GroupMembership { group_id: GroupId, from: NodeId, kind: GroupMembershipKind },
    Presence { peer: NodeId, status: cyx_presence::wire::Status, text: String },
    PresenceQueried { peer: NodeId },
    /// `meta.file_key_sealed`/`meta.nonce` are the receiver's copy, retained
    /// by [`cyx_file::FileEngine`] until the transfer completes and
    /// [`cyx_file::FileEngine::decrypt`] can unseal them with the shared
    /// secret held for `peer`.
    FileOffer { peer: NodeId, meta: cyx_file::wire::FileMeta },
    FileAccepted { file_id: FileId, start_chunk: u32 },
    /// `status == 0` means the reassembled ciphertext's hash matched; the
    /// plaintext itself still needs `FileEngine::decrypt` with the shared
    /// secret for the sender.
    FileCompleted { file_id: FileId, status: u8 },
    FileRejected { file_id: FileId },
    FileCancelled { file_id: FileId },
    MailDelivered { mail_id: MailId, from: NodeId },
    MailReadReceipt { mail_id: MailId, from: NodeId },
    Mail(cyx_mail::MailEvent),
    Dns(cyx_dns::DnsEvent),
    /// An inbound frame from a blocked contact was dropped before reaching
    /// any engine.
    Blocked { peer: NodeId },
}

/// Owns the identity's signing key, the three external collaborator
/// handles, and every feature engine built on top of them.
pub struct Core {
    pub local_id: NodeId,
    signing_key: SigningKey,
    #[allow(dead_code)]
    transport: Rc<dyn Transport>,
    onion: Rc<dyn Onion>,
    dht: Rc<dyn Dht>,
    #[allow(dead_code)]
    relay: Rc<RelayClient>,
    pub connection: ConnectionManager,
    pub contacts: cyx_dns::contact::ContactBook,
    pub chat: ChatEngine,
    pub file: FileEngine,
    pub dns: DnsEngine,
    pub group: GroupEngine,
    pub mail: MailEngine,
    pub presence: PresenceEngine,
}

impl Core {
    /// Build every engine for `local_id`. `relay_servers` are configured on
    /// the relay client before it is shared with the connection manager
    /// (spec §4.2 caps this at [`cyx_relay::MAX_RELAYS`]).
    pub fn new(
        local_id: NodeId,
        signing_key: SigningKey,
        transport: Rc<dyn Transport>,
        onion: Rc<dyn Onion>,
        dht: Rc<dyn Dht>,
        relay_servers: &[NodeId],
    ) -> Result<Self> {
        let mut relay_client = RelayClient::new(local_id, transport.clone());
        for relay_id in relay_servers {
            relay_client.add_relay(*relay_id)?;
        }
        let relay = Rc::new(relay_client);
        let connection = ConnectionManager::new(local_id, transport.clone(), onion.clone(), relay.clone());
        let dns = DnsEngine::new(local_id, signing_key.clone());

        Ok(Self {
            local_id,
            signing_key,
            transport,
            onion,
            dht,
            relay,
            connection,
            contacts: cyx_dns::contact::ContactBook::new(),
            chat: ChatEngine::new(),
            file: FileEngine::new(),
            dns,
            group: GroupEngine::new(),
            mail: MailEngine::new(),
            presence: PresenceEngine::new(),
        })
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn dht(&self) -> &Rc<dyn Dht> {
        &self.dht
    }

    pub fn onion(&self) -> &Rc<dyn Onion> {
        &self.onion
    }

    /// Send already-framed application bytes to `peer` over its current
    /// channel, direct or relayed.
    pub fn send(&self, peer: NodeId, bytes: &[u8]) -> Result<()> {
        Ok(self.connection.send(peer, bytes)?)
    }

    /// Drain the connection manager, every engine's own timers, and
    /// dispatch inbound bytes by type-byte range. This is the only method
    /// the host needs to call on a regular tick.
    pub fn poll(&mut self, now_ms: u64) -> Vec<CoreEvent> {
        let mut events = Vec::new();

        for event in self.connection.poll(now_ms) {
            match event {
                ConnEvent::Connected { peer } => events.push(CoreEvent::PeerConnected { peer }),
                ConnEvent::Disconnected { peer } => events.push(CoreEvent::PeerDisconnected { peer }),
                ConnEvent::Raw { from, bytes } => self.dispatch(from, &bytes, now_ms, &mut events),
                ConnEvent::OnionData { from, cleartext } => self.dispatch(from, &cleartext, now_ms, &mut events),
            }
        }

        self.chat.expire_fragments(now_ms);
        while let Some(delivered) = self.chat.recv_next() {
            events.push(CoreEvent::Chat(delivered));
        }

        for (peer, bytes) in self.file.poll(now_ms) {
            let _ = self.send(peer, &bytes);
        }

        for dns_event in self.dns.poll(now_ms) {
            if let cyx_dns::DnsEvent::Refreshed { frame_bytes } = &dns_event {
                self.broadcast_to_connected(frame_bytes);
            }
            events.push(CoreEvent::Dns(dns_event));
        }

        for mail_event in self.mail.poll(now_ms) {
            if let cyx_mail::MailEvent::Resend { peers, frame_bytes } = &mail_event {
                for peer in peers {
                    let _ = self.send(*peer, frame_bytes);
                }
            }
            events.push(CoreEvent::Mail(mail_event));
        }

        if let Some(frame_bytes) = self.presence.poll(now_ms) {
            self.broadcast_to_connected(&frame_bytes);
        }

        events
    }

    fn broadcast_to_connected(&self, bytes: &[u8]) {
        for peer in self.connection.connected_peers() {
            let _ = self.send(peer, bytes);
        }
    }

    fn broadcast_to_connected_except(&self, bytes: &[u8], exclude: NodeId) {
        for peer in self.connection.connected_peers() {
            if peer != exclude {
                let _ = self.send(peer, bytes);
            }
        }
    }

    fn dispatch(&mut self, from: NodeId, bytes: &[u8], now_ms: u64, events: &mut Vec<CoreEvent>) {
        if self.contacts.is_blocked(&from) {
            events.push(CoreEvent::Blocked { peer: from });
            return;
        }
        let Some(&type_byte) = bytes.first() else { return };
        if TYPE_CHAT_RANGE.contains(&type_byte) {
            if let Err(e) = self.chat.handle_inbound(from, bytes, now_ms) {
                tracing::debug!(peer = %from, error = %e, "dropping malformed chat frame");
            }
        } else if TYPE_GROUP_RANGE.contains(&type_byte) {
            self.dispatch_group(from, bytes, events);
        } else if TYPE_PRESENCE_RANGE.contains(&type_byte) {
            self.dispatch_presence(from, bytes, now_ms, events);
        } else if TYPE_FILE_RANGE.contains(&type_byte) {
            self.dispatch_file(from, bytes, now_ms, events);
        } else if TYPE_DNS_RANGE.contains(&type_byte) {
            self.dispatch_dns(from, bytes, now_ms, events);
        } else if TYPE_MAIL_RANGE.contains(&type_byte) {
            self.dispatch_mail(from, bytes, now_ms, events);
        } else {
            tracing::debug!(peer = %from, type_byte, "dropping frame of unrecognized type");
        }
    }

    fn dispatch_group(&mut self, from: NodeId, bytes: &[u8], events: &mut Vec<CoreEvent>) {
        use cyx_group::wire::GroupFrame;
        let Some(frame) = GroupFrame::from_bytes(bytes) else { return };
        match frame {
            GroupFrame::Invite { group_id, group_name, sealed_key, nonce, key_version, inviter } => {
                events.push(CoreEvent::GroupInvite { group_id, group_name, sealed_key, nonce, key_version, inviter, from });
            }
            GroupFrame::KeyUpdate { group_id, sealed_key, nonce, key_version } => {
                events.push(CoreEvent::GroupKeyUpdate { group_id, sealed_key, nonce, key_version, from });
            }
            GroupFrame::Text { group_id, key_version, nonce, ciphertext } => match self.group.handle_text(group_id, key_version, nonce, &ciphertext) {
                Ok(text) => events.push(CoreEvent::GroupText { group_id, from, text }),
                Err(e) => tracing::debug!(group = %group_id, error = %e, "dropping group text"),
            },
            GroupFrame::Kick { group_id, target } => {
                events.push(CoreEvent::GroupMembership { group_id, from, kind: GroupMembershipKind::Kicked { target } });
            }
            GroupFrame::Leave { group_id } => {
                events.push(CoreEvent::GroupMembership { group_id, from, kind: GroupMembershipKind::Left });
            }
            GroupFrame::RoleUpdate { group_id, target, role } => {
                events.push(CoreEvent::GroupMembership { group_id, from, kind: GroupMembershipKind::RoleUpdated { target, role } });
            }
        }
    }

    fn dispatch_presence(&mut self, from: NodeId, bytes: &[u8], now_ms: u64, events: &mut Vec<CoreEvent>) {
        let Some(frame) = PresenceFrame::from_bytes(bytes) else { return };
        match frame {
            PresenceFrame::Status { status, text } => {
                self.presence.handle_status(from, status, text.clone(), now_ms);
                events.push(CoreEvent::Presence { peer: from, status, text });
            }
            PresenceFrame::Query => {
                let (status, text) = self.presence.status();
                let reply = PresenceFrame::Status { status, text: text.to_string() }.to_bytes();
                let _ = self.send(from, &reply);
                events.push(CoreEvent::PresenceQueried { peer: from });
            }
        }
    }

    fn dispatch_file(&mut self, from: NodeId, bytes: &[u8], now_ms: u64, events: &mut Vec<CoreEvent>) {
        use cyx_file::wire;
        let Some(&type_byte) = bytes.first() else { return };
        match type_byte {
            wire::FILE_OFFER => {
                let Some(meta) = wire::FileMeta::from_bytes(bytes) else { return };
                if let Err(e) = self.file.register_incoming(from, &meta, now_ms) {
                    tracing::debug!(peer = %from, error = %e, "dropping file offer");
                    return;
                }
                events.push(CoreEvent::FileOffer { peer: from, meta });
            }
            wire::FILE_ACCEPT => {
                let Some((file_id, start_chunk)) = wire::decode_accept(bytes) else { return };
                if self.file.on_accept(file_id, start_chunk, now_ms).is_ok() {
                    events.push(CoreEvent::FileAccepted { file_id, start_chunk });
                }
            }
            wire::FILE_CHUNK => {
                let Some((file_id, chunk_idx, data)) = wire::decode_chunk(bytes) else { return };
                match self.file.handle_chunk(file_id, chunk_idx, data, now_ms) {
                    Ok(Some(complete_frame)) => {
                        let _ = self.send(from, &complete_frame);
                    }
                    Ok(None) => {}
                    Err(e) => tracing::debug!(peer = %from, error = %e, "dropping chunk for unknown transfer"),
                }
            }
            wire::FILE_COMPLETE => {
                let Some((file_id, status, _chunks_received, verify_hash)) = wire::decode_complete(bytes) else { return };
                if self.file.handle_complete(file_id, status, verify_hash).is_ok() {
                    events.push(CoreEvent::FileCompleted { file_id, status });
                }
            }
            wire::FILE_REJECT => {
                if let Some(file_id) = decode_file_id(bytes) {
                    events.push(CoreEvent::FileRejected { file_id });
                }
            }
            wire::FILE_CANCEL => {
                if let Some(file_id) = decode_file_id(bytes) {
                    events.push(CoreEvent::FileCancelled { file_id });
                }
            }
            wire::FILE_DHT_READY => {
                tracing::debug!(peer = %from, "peer reports file available via dht micro-mode");
            }
            _ => {}
        }
    }

    fn dispatch_dns(&mut self, from: NodeId, bytes: &[u8], now_ms: u64, events: &mut Vec<CoreEvent>) {
        use cyx_dns::wire::DnsFrame;
        let Some(frame) = DnsFrame::from_bytes(bytes) else { return };
        match frame {
            DnsFrame::Register { record, hops } | DnsFrame::Update { record, hops } => {
                if let Some(rebroadcast) = self.dns.handle_gossip(record, hops, now_ms) {
                    self.broadcast_to_connected_except(&rebroadcast, from);
                }
            }
            DnsFrame::Lookup { query_id, name } => {
                let response = self.dns.handle_lookup_query(query_id, &name, now_ms);
                let _ = self.send(from, &response);
            }
            DnsFrame::Response { query_id, record } => {
                if let Some(event) = self.dns.handle_response(query_id, record, now_ms) {
                    events.push(CoreEvent::Dns(event));
                }
            }
            DnsFrame::Announce { record } => {
                let _ = self.dns.handle_gossip(record, 0, now_ms);
            }
            DnsFrame::RegisterAck { .. } | DnsFrame::UpdateAck { .. } => {}
        }
    }

    fn dispatch_mail(&mut self, from: NodeId, bytes: &[u8], now_ms: u64, events: &mut Vec<CoreEvent>) {
        use cyx_mail::wire;
        let Some(&type_byte) = bytes.first() else { return };
        match type_byte {
            wire::MAIL_SEND => {
                let Some(mail) = wire::MailWire::from_bytes(bytes) else { return };
                let mail_id = mail.mail_id;
                let ack = self.mail.handle_send(mail, now_ms);
                let _ = self.send(from, &ack);
                events.push(CoreEvent::MailDelivered { mail_id, from });
            }
            wire::MAIL_ACK => {
                if let Some(mail_id) = wire::decode_ack(bytes) {
                    self.mail.handle_ack(mail_id);
                }
            }
            wire::MAIL_READ_RECEIPT => {
                if let Some(mail_id) = wire::decode_read_receipt(bytes) {
                    events.push(CoreEvent::MailReadReceipt { mail_id, from });
                }
            }
            wire::MAIL_BOUNCE => {
                tracing::debug!(peer = %from, "mail bounce notice received");
            }
            _ => {}
        }
    }
}

fn decode_file_id(bytes: &[u8]) -> Option<FileId> {
    let arr: [u8; 8] = bytes.get(1..9)?.try_into().ok()?;
    Some(FileId(arr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyx_crypto::ed25519::KeyPair;
    use cyx_dht::FakeDht;
    use cyx_onion::FakeOnionNetwork;
    use cyx_transport::FakeNetwork;
    use rand::rngs::OsRng;

    fn setup_pair() -> (Core, Core) {
        let transport_net = FakeNetwork::new();
        let onion_net = FakeOnionNetwork::new();
        let alice_kp = KeyPair::generate();
        let bob_kp = KeyPair::generate();
        let alice_id = NodeId::random(&mut OsRng);
        let bob_id = NodeId::random(&mut OsRng);

        let alice = Core::new(
            alice_id,
            alice_kp.signing_key,
            Rc::new(transport_net.register(alice_id)),
            Rc::new(onion_net.register(alice_id)),
            Rc::new(FakeDht::new()),
            &[],
        )
        .unwrap();
        let bob = Core::new(
            bob_id,
            bob_kp.signing_key,
            Rc::new(transport_net.register(bob_id)),
            Rc::new(onion_net.register(bob_id)),
            Rc::new(FakeDht::new()),
            &[],
        )
        .unwrap();
        (alice, bob)
    }

    fn handshake(alice: &mut Core, bob: &mut Core) {
        alice.connection.connect(bob.local_id, 0).unwrap();
        bob.poll(0);
        alice.poll(10);
        bob.poll(20);
    }

    #[test]
    fn chat_text_reaches_the_peer_through_poll_dispatch() {
        let (mut alice, mut bob) = setup_pair();
        handshake(&mut alice, &mut bob);

        let (_msg_id, frames) = alice.chat.send_text(b"hi bob", None).unwrap();
        alice.send(bob.local_id, &frames[0]).unwrap();

        let events = bob.poll(30);
        assert!(events.iter().any(|e| matches!(e, CoreEvent::Chat(d) if d.from == alice.local_id)));
    }

    #[test]
    fn presence_query_is_answered_automatically() {
        let (mut alice, mut bob) = setup_pair();
        handshake(&mut alice, &mut bob);

        bob.presence.set_status(cyx_presence::wire::Status::Busy, "cooking".into(), 0);
        let query = PresenceFrame::Query.to_bytes();
        alice.send(bob.local_id, &query).unwrap();
        bob.poll(30);
        let events = alice.poll(40);

        assert!(events.iter().any(|e| matches!(
            e,
            CoreEvent::Presence { peer, status: cyx_presence::wire::Status::Busy, text }
                if *peer == bob.local_id && text == "cooking"
        )));
    }

    #[test]
    fn dns_lookup_resolves_via_a_connected_peer() {
        let (mut alice, mut bob) = setup_pair();
        handshake(&mut alice, &mut bob);

        bob.dns.register("bob", [0u8; 24], 0).unwrap();
        let frame_bytes = match alice.dns.lookup("bob", 30) {
            cyx_dns::LookupResult::Pending { frame_bytes, .. } => frame_bytes,
            other => panic!("expected pending, got {other:?}"),
        };
        alice.send(bob.local_id, &frame_bytes).unwrap();
        bob.poll(40);
        let events = alice.poll(50);

        assert!(events.iter().any(|e| matches!(
            e,
            CoreEvent::Dns(cyx_dns::DnsEvent::LookupResolved { node_id, .. }) if *node_id == bob.local_id
        )));
    }

    #[test]
    fn group_text_decrypts_through_core_dispatch() {
        use cyx_group::wire::GroupFrame;

        let (mut alice, mut bob) = setup_pair();
        handshake(&mut alice, &mut bob);

        let gid = GroupId::random(&mut OsRng);
        alice.group.create_group(gid, "friends".into(), "".into(), alice.local_id, [1u8; 32], 0).unwrap();

        // Rotate the key once via a throwaway member so the eventual invite
        // to bob carries key_version 1; handle_key_update only accepts a
        // version strictly newer than a fresh group's starting 0.
        let placeholder = NodeId::random(&mut OsRng);
        alice.group.invite(gid, alice.local_id, placeholder, [9u8; 32], &[0u8; 32], 0).unwrap();
        alice.group.remove_member(gid, alice.local_id, placeholder, 0).unwrap();

        let shared_secret = [7u8; 32];
        let invite_bytes = alice
            .group
            .invite(gid, alice.local_id, bob.local_id, [2u8; 32], &shared_secret, 0)
            .unwrap();
        let (sealed_key, nonce, key_version) = match GroupFrame::from_bytes(&invite_bytes).unwrap() {
            GroupFrame::Invite { sealed_key, nonce, key_version, .. } => (sealed_key, nonce, key_version),
            other => panic!("expected invite frame, got {other:?}"),
        };

        bob.group.create_group(gid, "friends".into(), "".into(), alice.local_id, [1u8; 32], 0).unwrap();
        bob.group.handle_key_update(gid, sealed_key, nonce, key_version, &shared_secret, 0).unwrap();

        let (bytes, _) = alice.group.send_text(gid, alice.local_id, "hello group").unwrap();
        alice.send(bob.local_id, &bytes).unwrap();
        let events = bob.poll(30);

        assert!(events.iter().any(|e| matches!(
            e,
            CoreEvent::GroupText { group_id, text, .. } if *group_id == gid && text == "hello group"
        )));
    }

    #[test]
    fn unrecognized_type_byte_is_dropped_without_panicking() {
        let (mut alice, mut bob) = setup_pair();
        handshake(&mut alice, &mut bob);

        alice.send(bob.local_id, &[0x99, 1, 2, 3]).unwrap();
        let events = bob.poll(30);
        assert!(!events.iter().any(|e| matches!(e, CoreEvent::Chat(_))));
    }

    #[test]
    fn blocked_peer_frames_are_rejected_before_dispatch() {
        let (mut alice, mut bob) = setup_pair();
        handshake(&mut alice, &mut bob);
        bob.contacts.block(alice.local_id);

        let (_msg_id, frames) = alice.chat.send_text(b"hi bob", None).unwrap();
        alice.send(bob.local_id, &frames[0]).unwrap();
        let events = bob.poll(30);

        assert!(!events.iter().any(|e| matches!(e, CoreEvent::Chat(_))));
        assert!(events
            .iter()
            .any(|e| matches!(e, CoreEvent::Blocked { peer } if *peer == alice.local_id)));
    }
}
