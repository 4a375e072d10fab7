//! Wire-format errors.
//!
//! Pure structural/validation failures produced by [`crate::Frame::decode`],
//! [`crate::Frame::encode`], and the header/trailer parsers they call. These
//! never depend on I/O or endpoint state — see `fpc::FpcError` for the
//! layer that wraps these into the full endpoint error taxonomy.

use thiserror::Error;

/// Errors produced while encoding or decoding a frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Input was shorter than the minimum frame size, or shorter than the
    /// header's claimed payload length.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum number of bytes required.
        expected: usize,
        /// Number of bytes actually available.
        actual: usize,
    },

    /// The header's version byte is not `0`.
    #[error("unsupported frame version: {0}")]
    UnsupportedVersion(u8),

    /// The frame failed one of the structural invariants in the frame
    /// layout (descriptor count, OOL flag/trailer consistency, reserved
    /// flag bits).
    #[error("invalid frame format: {reason}")]
    InvalidFormat {
        /// Human-readable description of which invariant failed.
        reason: &'static str,
    },

    /// A payload or descriptor count exceeds what the wire format can
    /// represent (payload length must fit in `u32`; descriptor count must
    /// fit in 254).
    #[error("frame exceeds wire limits: {reason}")]
    LimitExceeded {
        /// Human-readable description of which limit was exceeded.
        reason: &'static str,
    },
}

/// Convenience alias used throughout `fpc-proto`.
pub type Result<T> = std::result::Result<T, ProtocolError>;
