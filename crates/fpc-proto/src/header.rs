//! Fixed 256-byte frame header.
//!
//! All multi-byte integers are little-endian, per the wire format. Fields
//! are stored as raw byte arrays (rather than native integers) so the
//! struct has no alignment requirements and can be cast directly from an
//! untrusted datagram via `zerocopy`.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{ProtocolError, Result};

/// Bit 0 of the flags byte: the frame's payload is out-of-line.
const FLAG_OOL_PRESENT: u8 = 0b0000_0001;

/// Every flag bit not yet assigned. Decode rejects frames that set any of
/// these.
const FLAG_RESERVED_MASK: u8 = !FLAG_OOL_PRESENT;

/// Frame processing flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// No flags set.
    pub const EMPTY: Self = Self(0);

    /// Constructs flags with the OOL-present bit set.
    #[must_use]
    pub const fn ool_present() -> Self {
        Self(FLAG_OOL_PRESENT)
    }

    /// Raw flags byte.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        self.0
    }

    /// Parses a raw flags byte without rejecting reserved bits.
    ///
    /// Reserved-bit rejection happens in [`FrameHeader::from_bytes`], which
    /// has access to the full decode-error context.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// `true` if the OOL-present bit is set.
    #[must_use]
    pub const fn is_ool_present(self) -> bool {
        self.0 & FLAG_OOL_PRESENT != 0
    }

    /// `true` if any bit outside the OOL-present bit is set.
    #[must_use]
    pub const fn has_reserved_bits(self) -> bool {
        self.0 & FLAG_RESERVED_MASK != 0
    }
}

/// Fixed 256-byte frame header, little-endian on the wire.
///
/// # Security
///
/// `#[repr(C, packed)]` with `zerocopy`'s `FromBytes`/`IntoBytes` makes
/// every 256-byte pattern a valid `FrameHeader`, so casting untrusted bytes
/// cannot produce undefined behaviour. Structural validity (version,
/// descriptor count, OOL/trailer consistency) is still checked explicitly
/// in [`Self::from_bytes`] and in [`crate::Frame::decode`].
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    identifier: [u8; 4],
    correlation: [u8; 8],
    payload_len: [u8; 4],
    descriptor_count: u8,
    version: u8,
    flags: u8,
    reserved: [u8; 237],
}

impl FrameHeader {
    /// Size of the serialized header in bytes.
    pub const SIZE: usize = 256;

    /// The only version this implementation speaks.
    pub const VERSION: u8 = 0;

    /// Maximum number of ancillary descriptors a single frame may carry
    /// (the OOL marker, when present, consumes one of these slots).
    pub const MAX_DESCRIPTORS: u8 = 254;

    /// Builds a new header for an inline (non-OOL), descriptor-free frame.
    /// Callers mutate the result with the `set_*` methods before encoding.
    #[must_use]
    pub fn new(identifier: u32, correlation: u64) -> Self {
        Self {
            identifier: identifier.to_le_bytes(),
            correlation: correlation.to_le_bytes(),
            payload_len: 0u32.to_le_bytes(),
            descriptor_count: 0,
            version: Self::VERSION,
            flags: 0,
            reserved: [0; 237],
        }
    }

    /// Parses a header from the first [`Self::SIZE`] bytes of `bytes`.
    ///
    /// Validates the version byte, the descriptor count, and the reserved
    /// flag bits. Does **not** validate OOL/trailer consistency — that
    /// requires the trailer, and is checked by [`crate::Frame::decode`].
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::FrameTooShort`] if fewer than [`Self::SIZE`] bytes
    ///   are available.
    /// - [`ProtocolError::UnsupportedVersion`] if the version byte is
    ///   nonzero.
    /// - [`ProtocolError::InvalidFormat`] if the descriptor count or
    ///   reserved flag bits are invalid.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() })?
            .0;

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        if header.descriptor_count > Self::MAX_DESCRIPTORS {
            return Err(ProtocolError::InvalidFormat {
                reason: "descriptor count exceeds 254",
            });
        }

        if header.flags().has_reserved_bits() {
            return Err(ProtocolError::InvalidFormat { reason: "reserved flag bits are set" });
        }

        Ok(header)
    }

    /// Serializes the header to its 256-byte wire form.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let bytes = IntoBytes::as_bytes(self);
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(bytes);
        arr
    }

    /// The message identifier.
    #[must_use]
    pub fn identifier(&self) -> u32 {
        u32::from_le_bytes(self.identifier)
    }

    /// The correlation value (`0` denotes unsolicited/fire-and-forget).
    #[must_use]
    pub fn correlation(&self) -> u64 {
        u64::from_le_bytes(self.correlation)
    }

    /// Payload length in bytes. Always `0` for OOL frames.
    #[must_use]
    pub fn payload_len(&self) -> u32 {
        u32::from_le_bytes(self.payload_len)
    }

    /// Number of ancillary descriptors carried by this frame, including the
    /// OOL shared-memory descriptor (slot 0) when present.
    #[must_use]
    pub fn descriptor_count(&self) -> u8 {
        self.descriptor_count
    }

    /// The wire protocol version.
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Frame processing flags.
    #[must_use]
    pub fn flags(&self) -> FrameFlags {
        FrameFlags::from_byte(self.flags)
    }

    /// Sets the correlation value.
    pub fn set_correlation(&mut self, correlation: u64) {
        self.correlation = correlation.to_le_bytes();
    }

    /// Sets the payload length. Callers must keep this consistent with the
    /// actual payload; [`crate::Frame::new`] does this automatically.
    pub fn set_payload_len(&mut self, len: u32) {
        self.payload_len = len.to_le_bytes();
    }

    /// Sets the descriptor count.
    pub fn set_descriptor_count(&mut self, count: u8) {
        self.descriptor_count = count;
    }

    /// Sets processing flags.
    pub fn set_flags(&mut self, flags: FrameFlags) {
        self.flags = flags.to_byte();
    }
}

// Manual Debug: `repr(packed)` fields cannot be borrowed directly.
impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("identifier", &self.identifier())
            .field("correlation", &self.correlation())
            .field("payload_len", &self.payload_len())
            .field("descriptor_count", &self.descriptor_count())
            .field("version", &self.version())
            .field("flags", &self.flags().to_byte())
            .finish_non_exhaustive()
    }
}

impl PartialEq for FrameHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for FrameHeader {}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn header_size_is_256() {
        assert_eq!(std::mem::size_of::<FrameHeader>(), FrameHeader::SIZE);
    }

    #[test]
    fn reject_short_buffer() {
        let short = [0u8; 100];
        assert_eq!(
            FrameHeader::from_bytes(&short),
            Err(ProtocolError::FrameTooShort { expected: 256, actual: 100 })
        );
    }

    #[test]
    fn reject_nonzero_version() {
        let mut bytes = FrameHeader::new(1, 0).to_bytes();
        bytes[17] = 7;
        assert_eq!(FrameHeader::from_bytes(&bytes), Err(ProtocolError::UnsupportedVersion(7)));
    }

    #[test]
    fn reject_reserved_flag_bits() {
        let mut bytes = FrameHeader::new(1, 0).to_bytes();
        bytes[18] = 0b0000_0010;
        assert!(matches!(FrameHeader::from_bytes(&bytes), Err(ProtocolError::InvalidFormat { .. })));
    }

    #[test]
    fn reject_descriptor_count_over_254() {
        let mut bytes = FrameHeader::new(1, 0).to_bytes();
        bytes[16] = 255;
        assert!(matches!(FrameHeader::from_bytes(&bytes), Err(ProtocolError::InvalidFormat { .. })));
    }

    proptest! {
        #[test]
        fn header_round_trip(identifier in any::<u32>(), correlation in any::<u64>(), count in 0u8..=254) {
            let mut header = FrameHeader::new(identifier, correlation);
            header.set_descriptor_count(count);
            let bytes = header.to_bytes();
            let parsed = FrameHeader::from_bytes(&bytes).expect("should parse");
            prop_assert_eq!(parsed.identifier(), identifier);
            prop_assert_eq!(parsed.correlation(), correlation);
            prop_assert_eq!(parsed.descriptor_count(), count);
        }
    }
}
