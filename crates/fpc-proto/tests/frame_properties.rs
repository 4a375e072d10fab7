//! Property-based tests for frame encoding/decoding.
//!
//! These verify round-trip and size invariants hold for all valid inputs,
//! not just a handful of hand-picked examples.

use bytes::Bytes;
use fpc_proto::{DescriptorKind, Frame, FrameHeader, FrameTrailer, MessageId};
use proptest::prelude::*;

fn arbitrary_message_id() -> impl Strategy<Value = MessageId> {
    (1u32..=2000).prop_map(|v| MessageId::new(v).expect("nonzero"))
}

fn arbitrary_descriptor_kind() -> impl Strategy<Value = DescriptorKind> {
    prop_oneof![
        Just(DescriptorKind::Unknown),
        Just(DescriptorKind::File),
        Just(DescriptorKind::Directory),
        Just(DescriptorKind::Device),
        Just(DescriptorKind::Socket),
        Just(DescriptorKind::Pipe),
        Just(DescriptorKind::Process),
        Just(DescriptorKind::Kqueue),
        Just(DescriptorKind::SharedMemory),
        Just(DescriptorKind::Event),
        Just(DescriptorKind::JailNonOwning),
        Just(DescriptorKind::JailOwning),
    ]
}

fn arbitrary_inline_frame() -> impl Strategy<Value = Frame> {
    (arbitrary_message_id(), any::<u64>(), prop::collection::vec(any::<u8>(), 0..4096))
        .prop_map(|(id, correlation, payload)| Frame::new(id, correlation, Bytes::from(payload)).expect("u32-sized"))
}

proptest! {
    #[test]
    fn frame_encode_decode_roundtrip(frame in arbitrary_inline_frame()) {
        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded).expect("decode should succeed");
        prop_assert_eq!(decoded, frame);
    }

    #[test]
    fn frame_header_roundtrip(id in arbitrary_message_id(), correlation in any::<u64>(), count in 0u8..=254) {
        let mut header = FrameHeader::new(id.value(), correlation);
        header.set_descriptor_count(count);
        let bytes = header.to_bytes();
        let decoded = FrameHeader::from_bytes(&bytes).expect("from_bytes should succeed");
        prop_assert_eq!(decoded.identifier(), id.value());
        prop_assert_eq!(decoded.correlation(), correlation);
        prop_assert_eq!(decoded.descriptor_count(), count);
    }

    #[test]
    fn frame_empty_payload_preserved(id in arbitrary_message_id(), correlation in any::<u64>()) {
        let frame = Frame::new(id, correlation, Bytes::new()).expect("empty payload always fits");
        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded).expect("decode should succeed");
        prop_assert_eq!(decoded.payload.len(), 0);
        prop_assert_eq!(decoded.header.payload_len(), 0);
    }

    #[test]
    fn frame_encoded_size_matches_header(frame in arbitrary_inline_frame()) {
        let encoded = frame.encode();
        let expected = Frame::MIN_SIZE + frame.payload.len();
        prop_assert_eq!(encoded.len(), expected);
    }

    #[test]
    fn frame_trailer_kinds_preserved(kinds in prop::collection::vec(arbitrary_descriptor_kind(), 0..32)) {
        let trailer = FrameTrailer::for_kinds(&kinds).expect("well within 254 slots");
        let bytes = trailer.to_bytes();
        let decoded = FrameTrailer::from_bytes(&bytes).expect("from_bytes should succeed");
        for (i, kind) in kinds.iter().enumerate() {
            prop_assert_eq!(decoded.kind_raw_at(i), Some(kind.to_wire()));
        }
        prop_assert!(!decoded.is_ool());
    }

    #[test]
    fn ool_frame_roundtrip(id in arbitrary_message_id(), correlation in any::<u64>(), extra in prop::collection::vec(arbitrary_descriptor_kind(), 0..16)) {
        let descriptor_count = u8::try_from(extra.len() + 1).expect("well within u8");
        let trailer = FrameTrailer::for_ool(&extra).expect("well within 253 slots");
        let frame = Frame::new_ool(id, correlation, descriptor_count, trailer);
        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded).expect("decode should succeed");
        prop_assert_eq!(decoded, frame);
        prop_assert!(decoded.header.flags().is_ool_present());
        prop_assert_eq!(decoded.header.payload_len(), 0);
    }
}
