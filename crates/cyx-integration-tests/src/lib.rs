//! End-to-end integration tests for cyxchat, seeded from the concrete
//! scenarios in the naming, relay, file-transfer, and chat specs. Each test
//! drives two or three real [`cyx_core::Core`] instances over a shared
//! in-memory transport/onion fabric rather than poking a single engine in
//! isolation.
//!
//! This crate has no library code.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p cyx-integration-tests
//! ```

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use cyx_core::{Core, CoreEvent};
    use cyx_crypto::ed25519::KeyPair;
    use cyx_dht::FakeDht;
    use cyx_dns::wire::DnsFrame;
    use cyx_file::wire as file_wire;
    use cyx_onion::FakeOnionNetwork;
    use cyx_transport::FakeNetwork;
    use cyx_types::{FileId, NodeId};
    use rand::rngs::OsRng;

    struct Fabric {
        transport_net: Rc<FakeNetwork>,
        onion_net: Rc<FakeOnionNetwork>,
    }

    impl Fabric {
        fn new() -> Self {
            Self {
                transport_net: FakeNetwork::new(),
                onion_net: FakeOnionNetwork::new(),
            }
        }

        fn spawn(&self, relay_servers: &[NodeId]) -> Core {
            let kp = KeyPair::generate();
            let id = NodeId::random(&mut OsRng);
            Core::new(
                id,
                kp.signing_key,
                Rc::new(self.transport_net.register(id)),
                Rc::new(self.onion_net.register(id)),
                Rc::new(FakeDht::new()),
                relay_servers,
            )
            .unwrap()
        }
    }

    /// Direct-connect two already-spawned cores and drain the announce/ack
    /// handshake so both land in `Connected`.
    fn handshake(a: &mut Core, b: &mut Core) {
        a.connection.connect(b.local_id, 0).unwrap();
        b.poll(0);
        a.poll(10);
        b.poll(20);
    }

    // Scenario A (spec §8): short text round-trip with no reply_to.
    #[test]
    fn scenario_a_short_text_round_trip() {
        let fabric = Fabric::new();
        let mut bob = fabric.spawn(&[]);
        let mut alice = fabric.spawn(&[]);
        handshake(&mut bob, &mut alice);

        let (_msg_id, frames) = bob.chat.send_text(b"hello", None).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][0], 0x10);
        assert_eq!(frames[0][1], 0x01);

        bob.send(alice.local_id, &frames[0]).unwrap();
        let events = alice.poll(30);

        let delivered = events
            .iter()
            .find_map(|e| match e {
                CoreEvent::Chat(d) if d.from == bob.local_id => Some(d),
                _ => None,
            })
            .expect("expected a chat delivery from bob");
        assert_eq!(delivered.msg_type, 0x10);
        assert_eq!(delivered.data, b"\x05\x00hello");
    }

    // Scenario B (spec §8): a 200-byte text fragments into 3 frames and
    // reassembles correctly when delivered out of order.
    #[test]
    fn scenario_b_fragmented_text_round_trip() {
        let fabric = Fabric::new();
        let mut bob = fabric.spawn(&[]);
        let mut alice = fabric.spawn(&[]);
        handshake(&mut bob, &mut alice);

        let text: Vec<u8> = (0..200).map(|i| b'a' + (i % 26) as u8).collect();
        let (_msg_id, frames) = bob.chat.send_text(&text, None).unwrap();
        assert_eq!(frames.len(), 3);

        // deliver out of order, reproducing the scenario's 2, 0, 1 ordering
        for idx in [2usize, 0, 1] {
            bob.send(alice.local_id, &frames[idx]).unwrap();
        }
        let events = alice.poll(30);

        let delivered = events
            .iter()
            .find_map(|e| match e {
                CoreEvent::Chat(d) if d.from == bob.local_id => Some(d),
                _ => None,
            })
            .expect("expected a reassembled chat delivery");

        let mut expected = (text.len() as u16).to_le_bytes().to_vec();
        expected.extend_from_slice(&text);
        assert_eq!(delivered.data, expected);
    }

    // Scenario C (spec §8): a peer unreachable for 5s falls back to the
    // relay. There is no simulated relay server in this workspace, so this
    // only asserts the local state transition the connection manager makes:
    // `Relaying`/`is_relayed`, and that `send` afterwards routes without
    // error (through `RelayClient::send`, which only needs a live session).
    #[test]
    fn scenario_c_relay_fallback_after_five_seconds() {
        let fabric = Fabric::new();
        let relay_id = NodeId::random(&mut OsRng);
        fabric.transport_net.register(relay_id);

        let mut alice = fabric.spawn(&[relay_id]);
        let carol = fabric.spawn(&[]);

        // block the direct route so alice's announce to carol never lands,
        // simulating an unreachable peer instead of a slow one.
        fabric.transport_net.block_route(alice.local_id, carol.local_id);

        alice.connection.connect(carol.local_id, 0).unwrap();
        assert_eq!(
            alice.connection.peer_state(carol.local_id),
            Some(cyx_connection::PeerState::Connecting)
        );

        let events = alice.poll(5_000);
        assert!(events
            .iter()
            .any(|e| matches!(e, CoreEvent::PeerConnected { peer } if *peer == carol.local_id)));
        assert_eq!(
            alice.connection.peer_state(carol.local_id),
            Some(cyx_connection::PeerState::Relaying)
        );

        // a payload sent now goes out over the relay tunnel, not the
        // blocked direct transport, so it must not error.
        assert!(alice.send(carol.local_id, b"hi carol").is_ok());
    }

    // Scenario D (spec §8): a cache hit resolves a lookup synchronously,
    // without a `DNS_LOOKUP` round trip.
    #[test]
    fn scenario_d_dns_lookup_resolves_from_cache() {
        let fabric = Fabric::new();
        let mut bob = fabric.spawn(&[]);
        let mut alice = fabric.spawn(&[]);
        handshake(&mut bob, &mut alice);

        let register_frame = bob.dns.register("bob", [0u8; 24], 0).unwrap();
        bob.send(alice.local_id, &register_frame).unwrap();
        alice.poll(10);
        assert_eq!(alice.dns.cache_len(), 1);

        // well after registration; still resolves synchronously from cache.
        match alice.dns.lookup("bob", 100_000) {
            cyx_dns::LookupResult::Resolved(id) => assert_eq!(id, bob.local_id),
            other => panic!("expected a cache-hit resolution, got {other:?}"),
        }
    }

    // Scenario E (spec §8): a registration re-gossips across a 3-node chain
    // and a node that already holds the same timestamp never replaces its
    // cached copy (strict monotonicity).
    #[test]
    fn scenario_e_dns_register_then_re_gossip_is_monotonic() {
        let fabric = Fabric::new();
        let mut alice = fabric.spawn(&[]);
        let mut bob = fabric.spawn(&[]);
        let mut carol = fabric.spawn(&[]);
        handshake(&mut alice, &mut bob);
        handshake(&mut bob, &mut carol);

        let register_frame = alice.dns.register("alice", [0u8; 24], 0).unwrap();
        alice.send(bob.local_id, &register_frame).unwrap();

        // bob caches it and rebroadcasts hops=1 to everyone but alice, i.e.
        // to carol (connected_peers() only sees direct peers, so carol must
        // be directly handshaken to bob too).
        bob.poll(10);
        assert_eq!(bob.dns.cache_len(), 1);
        carol.poll(20);
        assert_eq!(carol.dns.cache_len(), 1);

        let record = match DnsFrame::from_bytes(&register_frame).unwrap() {
            DnsFrame::Register { record, .. } => record,
            other => panic!("expected a register frame, got {other:?}"),
        };

        // re-delivering the exact same (timestamp-identical) record is a
        // no-op: the cache never rolls forward on a replay.
        assert!(carol.dns.handle_gossip(record, 0, 30_000).is_none());
        assert_eq!(carol.dns.cache_len(), 1);
    }

    // Scenario F (spec §8): an offered file is accepted, chunked, paced
    // 500ms apart, and completes with a verified hash. The scenario's
    // literal "receiver already has chunk 0 via DHT, accepts at
    // start_chunk=1" framing needs white-box access to the engine's private
    // chunk table; that variant is covered inside cyx-file's own tests.
    // This exercises the ordinary single-chunk path end to end through two
    // real Cores.
    #[test]
    fn scenario_f_file_offer_accept_and_complete() {
        let fabric = Fabric::new();
        let mut sender = fabric.spawn(&[]);
        let mut receiver = fabric.spawn(&[]);
        handshake(&mut sender, &mut receiver);

        let file_id = FileId::random(&mut OsRng);
        let shared_secret = [5u8; 32];
        let plaintext = b"a small file that fits in a single chunk";
        let offer_frame = sender
            .file
            .offer(receiver.local_id, file_id, "notes.txt", "text/plain", plaintext, &shared_secret)
            .unwrap();
        assert_eq!(offer_frame[0], file_wire::FILE_OFFER);

        sender.send(receiver.local_id, &offer_frame).unwrap();
        let events = receiver.poll(10);
        assert!(events
            .iter()
            .any(|e| matches!(e, CoreEvent::FileOffer { meta, .. } if meta.file_id == file_id)));

        receiver.file.accept_incoming(file_id, 10).unwrap();
        let accept_frame = file_wire::encode_accept(file_id, 0);
        receiver.send(sender.local_id, &accept_frame).unwrap();

        // the accept lands on sender's next poll, and the same poll call's
        // file.poll loop emits the one due chunk immediately.
        let events = sender.poll(20);
        assert!(events.iter().any(
            |e| matches!(e, CoreEvent::FileAccepted { file_id: f, start_chunk: 0 } if *f == file_id)
        ));

        receiver.poll(30);
        assert_eq!(
            receiver.file.incoming_state(file_id),
            Some(cyx_file::TransferState::Completed)
        );
        assert_eq!(
            receiver.file.decrypt(file_id, &shared_secret).unwrap(),
            plaintext.to_vec()
        );

        let events = sender.poll(40);
        assert!(events
            .iter()
            .any(|e| matches!(e, CoreEvent::FileCompleted { file_id: f, status: 0 } if *f == file_id)));
        assert_eq!(
            sender.file.outgoing_state(file_id),
            Some(cyx_file::TransferState::Completed)
        );
    }
}
