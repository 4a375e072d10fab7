//! The full wire frame: header, inline payload, and trailer.

use bytes::Bytes;

use crate::descriptor::OOL_MARKER;
use crate::error::{ProtocolError, Result};
use crate::header::{FrameFlags, FrameHeader};
use crate::message_id::MessageId;
use crate::trailer::FrameTrailer;

/// A complete frame: 256-byte header, variable-length inline payload, and
/// 256-byte trailer.
///
/// An OOL frame (header flag bit 0 set) always carries an empty inline
/// `payload` — the real payload lives in the shared-memory segment passed
/// as the first ancillary descriptor, and the trailer's slot 0 records
/// [`crate::descriptor::OOL_MARKER`] to say so.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The frame header.
    pub header: FrameHeader,
    /// The inline payload. Empty for OOL frames.
    pub payload: Bytes,
    /// The frame trailer.
    pub trailer: FrameTrailer,
}

impl Frame {
    /// Minimum possible frame size: header + trailer, no payload.
    pub const MIN_SIZE: usize = FrameHeader::SIZE + FrameTrailer::SIZE;

    /// Builds a new inline (non-OOL) frame with no ancillary descriptors.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::LimitExceeded`] if `payload` exceeds `u32::MAX`
    /// bytes.
    pub fn new(identifier: MessageId, correlation: u64, payload: Bytes) -> Result<Self> {
        let len = u32::try_from(payload.len())
            .map_err(|_| ProtocolError::LimitExceeded { reason: "payload exceeds u32::MAX bytes" })?;
        let mut header = FrameHeader::new(identifier.value(), correlation);
        header.set_payload_len(len);
        Ok(Self { header, payload, trailer: FrameTrailer::empty() })
    }

    /// Builds a new OOL frame: empty inline payload, the OOL flag set, and
    /// a trailer whose slot 0 is [`OOL_MARKER`].
    ///
    /// `descriptor_count` must match the number of ancillary descriptors
    /// that will accompany this frame over `sendmsg` (OOL segment plus any
    /// extra descriptors `trailer` describes), and is the caller's
    /// responsibility to keep consistent with `trailer`.
    #[must_use]
    pub fn new_ool(identifier: MessageId, correlation: u64, descriptor_count: u8, trailer: FrameTrailer) -> Self {
        let mut header = FrameHeader::new(identifier.value(), correlation);
        header.set_flags(FrameFlags::ool_present());
        header.set_descriptor_count(descriptor_count);
        Self { header, payload: Bytes::new(), trailer }
    }

    /// Serializes the frame: header, then inline payload, then trailer.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = Vec::with_capacity(Self::MIN_SIZE + self.payload.len());
        buf.extend_from_slice(&self.header.to_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.trailer.to_bytes());
        Bytes::from(buf)
    }

    /// Parses a complete frame from `bytes`.
    ///
    /// Validates, in order: minimum length, header structure (delegated to
    /// [`FrameHeader::from_bytes`]), the header's claimed total length
    /// against the actual buffer length, and OOL/trailer consistency.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::FrameTooShort`] if `bytes` is shorter than
    ///   [`Self::MIN_SIZE`], or shorter than the header's claimed total
    ///   length.
    /// - [`ProtocolError::UnsupportedVersion`] — see
    ///   [`FrameHeader::from_bytes`].
    /// - [`ProtocolError::InvalidFormat`] if the descriptor-count/OOL-flag/
    ///   trailer-slot-0 invariants are violated, or trailing bytes remain
    ///   after the claimed frame length.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::MIN_SIZE {
            return Err(ProtocolError::FrameTooShort { expected: Self::MIN_SIZE, actual: bytes.len() });
        }

        let header = *FrameHeader::from_bytes(bytes)?;

        let payload_len = header.payload_len() as usize;
        let expected_total = FrameHeader::SIZE + payload_len + FrameTrailer::SIZE;
        if bytes.len() < expected_total {
            return Err(ProtocolError::FrameTooShort { expected: expected_total, actual: bytes.len() });
        }
        if bytes.len() > expected_total {
            return Err(ProtocolError::InvalidFormat { reason: "trailing bytes after claimed frame length" });
        }

        let payload_start = FrameHeader::SIZE;
        let payload_end = payload_start + payload_len;
        let payload = Bytes::copy_from_slice(&bytes[payload_start..payload_end]);
        let trailer = FrameTrailer::from_bytes(&bytes[payload_end..])?;

        Self::check_ool_consistency(&header, &trailer)?;

        Ok(Self { header, payload, trailer })
    }

    fn check_ool_consistency(header: &FrameHeader, trailer: &FrameTrailer) -> Result<()> {
        let descriptor_count = header.descriptor_count();

        if header.flags().is_ool_present() {
            if header.payload_len() != 0 {
                return Err(ProtocolError::InvalidFormat { reason: "OOL frame has nonzero inline payload length" });
            }
            if descriptor_count == 0 {
                return Err(ProtocolError::InvalidFormat { reason: "OOL frame has zero descriptor count" });
            }
            if trailer.kind_raw_at(0) != Some(OOL_MARKER) {
                return Err(ProtocolError::InvalidFormat { reason: "OOL frame missing OOL marker at trailer slot 0" });
            }
        } else {
            for slot in 0..descriptor_count as usize {
                if trailer.kind_raw_at(slot) == Some(OOL_MARKER) {
                    return Err(ProtocolError::InvalidFormat {
                        reason: "non-OOL frame has OOL marker in trailer",
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::descriptor::DescriptorKind;

    #[test]
    fn round_trips_inline_frame() {
        let frame = Frame::new(MessageId::PING, 7, Bytes::from_static(b"hello")).unwrap();
        let bytes = frame.encode();
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn round_trips_empty_payload() {
        let frame = Frame::new(MessageId::PING, 0, Bytes::new()).unwrap();
        let bytes = frame.encode();
        assert_eq!(bytes.len(), Frame::MIN_SIZE);
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn round_trips_ool_frame() {
        let trailer = FrameTrailer::for_ool(&[]).unwrap();
        let frame = Frame::new_ool(MessageId::EVENT, 42, 1, trailer);
        let bytes = frame.encode();
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded, frame);
        assert!(decoded.header.flags().is_ool_present());
    }

    #[test]
    fn reject_truncated_frame() {
        let frame = Frame::new(MessageId::PING, 7, Bytes::from_static(b"hello")).unwrap();
        let bytes = frame.encode();
        let truncated = &bytes[..bytes.len() - 1];
        assert!(matches!(Frame::decode(truncated), Err(ProtocolError::FrameTooShort { .. })));
    }

    #[test]
    fn reject_extra_trailing_bytes() {
        let frame = Frame::new(MessageId::PING, 7, Bytes::from_static(b"hello")).unwrap();
        let mut bytes = frame.encode().to_vec();
        bytes.push(0);
        assert!(matches!(Frame::decode(&bytes), Err(ProtocolError::InvalidFormat { .. })));
    }

    #[test]
    fn reject_ool_flag_with_nonzero_payload_len() {
        let trailer = FrameTrailer::for_ool(&[]).unwrap();
        let mut frame = Frame::new_ool(MessageId::EVENT, 42, 1, trailer);
        frame.header.set_payload_len(4);
        let bytes = frame.encode();
        assert!(matches!(Frame::decode(&bytes), Err(ProtocolError::InvalidFormat { .. })));
    }

    #[test]
    fn reject_ool_flag_without_marker_in_trailer() {
        let trailer = FrameTrailer::for_kinds(&[DescriptorKind::File]).unwrap();
        let frame = Frame::new_ool(MessageId::EVENT, 42, 1, trailer);
        let bytes = frame.encode();
        assert!(matches!(Frame::decode(&bytes), Err(ProtocolError::InvalidFormat { .. })));
    }

    #[test]
    fn reject_marker_in_trailer_without_ool_flag() {
        let trailer = FrameTrailer::for_ool(&[]).unwrap();
        let mut header = FrameHeader::new(MessageId::PING.value(), 0);
        header.set_descriptor_count(1);
        let frame = Frame { header, payload: Bytes::new(), trailer };
        let bytes = frame.encode();
        assert!(matches!(Frame::decode(&bytes), Err(ProtocolError::InvalidFormat { .. })));
    }

    proptest! {
        #[test]
        fn inline_round_trip(correlation in any::<u64>(), payload in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let frame = Frame::new(MessageId::PING, correlation, Bytes::from(payload)).unwrap();
            let bytes = frame.encode();
            let decoded = Frame::decode(&bytes).unwrap();
            prop_assert_eq!(decoded, frame);
        }
    }
}
