//! Message identifier: the 32-bit opcode carried in the frame header.
//!
//! Partitioned into a system-reserved range `[1..255]` and a user range
//! `[256..]`. `0` is reserved and never valid on the wire.

use std::fmt;

/// A 32-bit message identifier.
///
/// `0` is reserved and unused; `[1..=255]` is reserved for the system
/// opcodes below; `[256..]` is free for application use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(u32);

impl MessageId {
    /// Keepalive probe.
    pub const PING: Self = Self(1);
    /// Reply to [`Self::PING`].
    pub const PONG: Self = Self(2);
    /// Name/address lookup request.
    pub const LOOKUP: Self = Self(3);
    /// Reply to [`Self::LOOKUP`].
    pub const LOOKUP_REPLY: Self = Self(4);
    /// Subscribe to a topic or event stream.
    pub const SUBSCRIBE: Self = Self(5);
    /// Acknowledgement of [`Self::SUBSCRIBE`].
    pub const SUBSCRIBE_ACK: Self = Self(6);
    /// An unsolicited event notification.
    pub const EVENT: Self = Self(7);
    /// An error reply.
    pub const ERROR: Self = Self(255);

    /// First identifier in the user-assignable range.
    pub const USER_RANGE_START: u32 = 256;

    /// Wraps a raw 32-bit value without validation.
    ///
    /// Used when decoding a frame header: the wire format does not reject
    /// unrecognised identifiers, only the reserved value `0` is meaningful
    /// to reject, and only at the point a caller constructs an outbound
    /// message (see [`Self::new`]).
    #[must_use]
    pub const fn from_wire(value: u32) -> Self {
        Self(value)
    }

    /// Constructs a message identifier for outbound use.
    ///
    /// Returns `None` for the reserved-unused value `0`.
    #[must_use]
    pub const fn new(value: u32) -> Option<Self> {
        if value == 0 { None } else { Some(Self(value)) }
    }

    /// The raw wire value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// `true` for the reserved-unused value `0`.
    #[must_use]
    pub const fn is_unused(self) -> bool {
        self.0 == 0
    }

    /// `true` for identifiers in the system-reserved range `[1..=255]`.
    #[must_use]
    pub const fn is_reserved(self) -> bool {
        self.0 != 0 && self.0 < Self::USER_RANGE_START
    }

    /// `true` for identifiers in the user range `[256..]`.
    #[must_use]
    pub const fn is_user(self) -> bool {
        self.0 >= Self::USER_RANGE_START
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<MessageId> for u32 {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_unused_and_rejected_by_new() {
        assert!(MessageId::from_wire(0).is_unused());
        assert_eq!(MessageId::new(0), None);
    }

    #[test]
    fn reserved_and_user_ranges() {
        assert!(MessageId::PING.is_reserved());
        assert!(MessageId::ERROR.is_reserved());
        assert!(!MessageId::PING.is_user());

        let app = MessageId::new(256).expect("256 is valid");
        assert!(app.is_user());
        assert!(!app.is_reserved());
    }
}
