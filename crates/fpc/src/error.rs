//! The endpoint-level error taxonomy.

use std::io;

use fpc_proto::ProtocolError;
use thiserror::Error;

/// Errors surfaced by endpoint, listener, and constructor operations.
#[derive(Debug, Error)]
pub enum FpcError {
    /// The peer closed the connection, or a fatal I/O error tore it down
    /// mid-stream.
    #[error("peer disconnected")]
    Disconnected,

    /// The operation requires a running endpoint or listener, but it has
    /// been stopped.
    #[error("endpoint stopped")]
    Stopped,

    /// The operation requires a running endpoint or listener, but
    /// `start()` was never called.
    #[error("endpoint not started")]
    NotStarted,

    /// `incoming()` was called a second time on the same endpoint.
    #[error("incoming() already claimed on this endpoint")]
    StreamAlreadyClaimed,

    /// A frame failed a structural or invariant check during decode.
    ///
    /// Does not cover [`ProtocolError::UnsupportedVersion`], which has its
    /// own [`Self::UnsupportedVersion`] variant so the two spec-level
    /// errors remain independently matchable — see the [`From`] impl
    /// below.
    #[error("invalid message format: {0}")]
    InvalidMessageFormat(ProtocolError),

    /// The header's version byte is not the one this implementation
    /// speaks.
    #[error("unsupported frame version: {0}")]
    UnsupportedVersion(u8),

    /// An outbound message exceeds the 254-descriptor wire limit.
    #[error("too many descriptors: {0} exceeds the 254 limit")]
    TooManyDescriptors(usize),

    /// A payload exceeds the endpoint's configured OOL size cap.
    #[error("payload of {actual} bytes exceeds the {limit}-byte maximum")]
    PayloadTooLarge {
        /// The configured maximum.
        limit: usize,
        /// The payload's actual size.
        actual: usize,
    },

    /// `request()` did not receive a reply before its timeout elapsed.
    #[error("request timed out")]
    Timeout,

    /// An I/O error from the underlying socket, OOL segment, or
    /// credential query that does not fit a more specific variant.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience alias used throughout `fpc`.
pub type Result<T> = std::result::Result<T, FpcError>;

/// Maps a wire-format error onto the endpoint-level taxonomy, splitting
/// [`ProtocolError::UnsupportedVersion`] into its own [`FpcError`] variant
/// (spec.md §6 lists `invalidMessageFormat` and `unsupportedVersion(v)` as
/// independently-named errors) and everything else into
/// [`FpcError::InvalidMessageFormat`].
impl From<ProtocolError> for FpcError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::UnsupportedVersion(v) => Self::UnsupportedVersion(v),
            other => Self::InvalidMessageFormat(other),
        }
    }
}

impl FpcError {
    /// `true` for errors that leave the endpoint terminally stopped:
    /// decode failures, and I/O errors (which the reader task treats as
    /// fatal per the endpoint's error-handling design).
    #[must_use]
    pub fn is_fatal_to_endpoint(&self) -> bool {
        matches!(self, Self::InvalidMessageFormat(_) | Self::UnsupportedVersion(_) | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_and_io_errors_are_fatal() {
        assert!(FpcError::InvalidMessageFormat(ProtocolError::InvalidFormat { reason: "test" }).is_fatal_to_endpoint());
        assert!(FpcError::UnsupportedVersion(3).is_fatal_to_endpoint());
        assert!(FpcError::Io(io::Error::other("boom")).is_fatal_to_endpoint());
    }

    #[test]
    fn unsupported_version_converts_to_its_own_variant() {
        let converted: FpcError = ProtocolError::UnsupportedVersion(7).into();
        assert!(matches!(converted, FpcError::UnsupportedVersion(7)));
    }

    #[test]
    fn other_protocol_errors_convert_to_invalid_message_format() {
        let converted: FpcError = ProtocolError::InvalidFormat { reason: "test" }.into();
        assert!(matches!(converted, FpcError::InvalidMessageFormat(ProtocolError::InvalidFormat { .. })));
    }

    #[test]
    fn lifecycle_errors_are_not_fatal() {
        assert!(!FpcError::Disconnected.is_fatal_to_endpoint());
        assert!(!FpcError::Stopped.is_fatal_to_endpoint());
        assert!(!FpcError::Timeout.is_fatal_to_endpoint());
    }
}
