//! Property-based tests for the framing layer.

use bytes::BytesMut;
use proptest::prelude::*;

use hybi::channel::{Channel, Fragmenter, Incoming, Role};
use hybi::protocol::frame::FrameHeader;
use hybi::protocol::mask::apply_mask;
use hybi::protocol::{OpCode, legacy};
use hybi::{Config, FrameKind, ProtocolVersion};

fn data_opcode() -> impl Strategy<Value = OpCode> {
    prop_oneof![
        Just(OpCode::Continuation),
        Just(OpCode::Text),
        Just(OpCode::Binary),
    ]
}

fn any_opcode() -> impl Strategy<Value = OpCode> {
    prop_oneof![
        Just(OpCode::Continuation),
        Just(OpCode::Text),
        Just(OpCode::Binary),
        Just(OpCode::Close),
        Just(OpCode::Ping),
        Just(OpCode::Pong),
    ]
}

proptest! {
    // =========================================================================
    // Header codec: decode(encode(header)) == header
    // =========================================================================
    #[test]
    fn header_roundtrip(
        fin in any::<bool>(),
        opcode in data_opcode(),
        rsv in 0u8..8,
        payload_len in prop_oneof![0u64..200, 100u64..70_000, Just(1u64 << 32)],
        mask in prop::option::of(any::<[u8; 4]>())
    ) {
        let header = FrameHeader { opcode, fin, rsv, payload_len, mask };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        prop_assert_eq!(buf.len(), header.wire_len());

        let (decoded, consumed) = FrameHeader::decode(&buf).unwrap();
        prop_assert_eq!(consumed, buf.len());
        prop_assert_eq!(decoded, header);
    }

    #[test]
    fn header_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..32)) {
        let _ = FrameHeader::decode(&bytes);
    }

    #[test]
    fn control_header_validation(opcode in any_opcode(), len in 0u64..200) {
        let header = FrameHeader::control(opcode, len);
        let ok = header.validate().is_ok();
        if opcode.is_control() {
            prop_assert_eq!(ok, len <= 125);
        } else {
            prop_assert!(ok);
        }
    }

    // =========================================================================
    // Masking: self-inverse, and split application equals whole application
    // =========================================================================
    #[test]
    fn mask_is_self_inverse(
        data in prop::collection::vec(any::<u8>(), 0..2000),
        key in any::<[u8; 4]>(),
        offset in 0usize..16
    ) {
        let mut masked = data.clone();
        apply_mask(&mut masked, key, offset);
        apply_mask(&mut masked, key, offset);
        prop_assert_eq!(masked, data);
    }

    #[test]
    fn mask_split_equals_whole(
        data in prop::collection::vec(any::<u8>(), 1..1000),
        key in any::<[u8; 4]>(),
        split_seed in any::<prop::sample::Index>()
    ) {
        let split = split_seed.index(data.len());

        let mut whole = data.clone();
        apply_mask(&mut whole, key, 0);

        let mut split_applied = data.clone();
        let (head, tail) = split_applied.split_at_mut(split);
        apply_mask(head, key, 0);
        apply_mask(tail, key, split);

        prop_assert_eq!(split_applied, whole);
    }

    // =========================================================================
    // Fragmenter: chunks cover the payload exactly, FIN only on the last
    // =========================================================================
    #[test]
    fn fragmenter_covers_payload(
        payload in prop::collection::vec(any::<u8>(), 0..500),
        fragment_size in 1usize..64
    ) {
        let frames: Vec<_> = Fragmenter::new(&payload, OpCode::Binary, fragment_size).collect();
        prop_assert!(!frames.is_empty());

        let joined: Vec<u8> = frames.iter().flat_map(|(_, _, c)| c.to_vec()).collect();
        prop_assert_eq!(&joined, &payload);

        prop_assert_eq!(frames[0].0, OpCode::Binary);
        for (opcode, _, _) in &frames[1..] {
            prop_assert_eq!(*opcode, OpCode::Continuation);
        }
        let fin_positions: Vec<usize> = frames
            .iter()
            .enumerate()
            .filter_map(|(i, (_, fin, _))| fin.then_some(i))
            .collect();
        prop_assert_eq!(fin_positions, vec![frames.len() - 1]);
    }

    // =========================================================================
    // Channel pair: what one side sends, the other receives, any version,
    // any fragment size
    // =========================================================================
    #[test]
    fn channel_binary_roundtrip(
        payload in prop::collection::vec(any::<u8>(), 0..3000),
        fragment_size in 1usize..512
    ) {
        let config = Config::default().with_fragment_size(fragment_size);
        let mut client = Channel::new(ProtocolVersion::V13, Role::Client, config);
        let mut server = Channel::new(ProtocolVersion::V13, Role::Server, Config::default());

        client.send_message(FrameKind::Binary, &payload).unwrap();
        let wire = client.take_outbound();
        server.feed(&wire);

        let Some(Incoming::Source(src)) = server.receive().unwrap() else {
            return Err(TestCaseError::fail("no message surfaced"));
        };
        prop_assert_eq!(src.kind(), FrameKind::Binary);
        prop_assert_eq!(src.into_payload(), payload);
    }

    #[test]
    fn channel_text_roundtrip(text in ".{0,400}") {
        let mut server = Channel::new(ProtocolVersion::V13, Role::Server, Config::default());
        let mut client = Channel::new(ProtocolVersion::V13, Role::Client, Config::default());

        server.send_message(FrameKind::Text, text.as_bytes()).unwrap();
        client.feed(&server.take_outbound());

        let Some(Incoming::Source(src)) = client.receive().unwrap() else {
            return Err(TestCaseError::fail("no message surfaced"));
        };
        prop_assert_eq!(src.into_payload(), text.as_bytes());
    }

    // =========================================================================
    // Legacy framing: text roundtrip for arbitrary UTF-8 (never contains the
    // 0xFF terminator)
    // =========================================================================
    #[test]
    fn legacy_text_roundtrip(text in ".{0,300}") {
        let mut buf = BytesMut::new();
        legacy::encode_text(text.as_bytes(), &mut buf);

        let (frame, consumed) = legacy::decode(&buf, 1 << 20).unwrap().unwrap();
        prop_assert_eq!(consumed, buf.len());
        prop_assert_eq!(frame, legacy::LegacyFrame::Text(text.as_bytes().to_vec()));
    }

    // =========================================================================
    // Feeding a valid wire stream byte-by-byte never changes the outcome
    // =========================================================================
    #[test]
    fn byte_at_a_time_feed(payload in prop::collection::vec(any::<u8>(), 0..300)) {
        let mut client = Channel::new(ProtocolVersion::V13, Role::Client, Config::default());
        let mut server = Channel::new(ProtocolVersion::V13, Role::Server, Config::default());

        client.send_message(FrameKind::Binary, &payload).unwrap();
        let wire = client.take_outbound();

        let mut surfaced = None;
        for byte in wire.iter() {
            server.feed(std::slice::from_ref(byte));
            if let Some(Incoming::Source(src)) = server.receive().unwrap() {
                surfaced = Some(src.into_payload());
            }
        }
        prop_assert_eq!(surfaced, Some(payload));
    }
}
