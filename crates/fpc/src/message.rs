//! The logical message: what callers hand to and receive from an endpoint.

use bytes::Bytes;
use fpc_proto::{DescriptorKind, MessageId};
use nix::libc::c_int;

/// An ancillary descriptor attached to a message, paired with the kind tag
/// recorded for it in the frame trailer.
///
/// Owns the raw descriptor. Dropping a [`DescriptorRef`] that was never
/// extracted via [`Message::take_descriptor`] closes the underlying file
/// descriptor.
#[derive(Debug)]
pub struct DescriptorRef {
    fd: std::os::fd::OwnedFd,
    kind: DescriptorKind,
}

impl DescriptorRef {
    /// Pairs a descriptor with its kind tag.
    #[must_use]
    pub fn new(fd: std::os::fd::OwnedFd, kind: DescriptorKind) -> Self {
        Self { fd, kind }
    }

    /// The descriptor's kind tag.
    #[must_use]
    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }

    /// The raw descriptor number, for diagnostics. Does not transfer
    /// ownership.
    #[must_use]
    pub fn raw(&self) -> c_int {
        std::os::fd::AsRawFd::as_raw_fd(&self.fd)
    }

    /// Consumes this reference, returning ownership of the descriptor.
    #[must_use]
    pub fn into_owned_fd(self) -> std::os::fd::OwnedFd {
        self.fd
    }
}

/// A lightweight capability allowing a handler to produce a reply without
/// retaining the whole inbound [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyToken {
    correlation: u64,
}

impl ReplyToken {
    pub(crate) fn new(correlation: u64) -> Self {
        Self { correlation }
    }

    pub(crate) fn correlation(self) -> u64 {
        self.correlation
    }
}

/// A message exchanged over an endpoint: identifier, correlation value,
/// payload bytes, and an ordered sequence of descriptors.
#[derive(Debug)]
pub struct Message {
    identifier: MessageId,
    correlation: u64,
    payload: Bytes,
    descriptors: Vec<Option<DescriptorRef>>,
}

impl Message {
    /// Builds a new unsolicited (correlation `0`) message.
    #[must_use]
    pub fn new(identifier: MessageId, payload: Bytes, descriptors: Vec<DescriptorRef>) -> Self {
        Self { identifier, correlation: 0, payload, descriptors: descriptors.into_iter().map(Some).collect() }
    }

    pub(crate) fn with_correlation(
        identifier: MessageId,
        correlation: u64,
        payload: Bytes,
        descriptors: Vec<DescriptorRef>,
    ) -> Self {
        Self { identifier, correlation, payload, descriptors: descriptors.into_iter().map(Some).collect() }
    }

    /// The message identifier.
    #[must_use]
    pub fn identifier(&self) -> MessageId {
        self.identifier
    }

    /// The correlation value. `0` means unsolicited.
    #[must_use]
    pub fn correlation(&self) -> u64 {
        self.correlation
    }

    /// The payload bytes.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Number of descriptors attached to this message (extracted or not).
    #[must_use]
    pub fn descriptor_count(&self) -> usize {
        self.descriptors.len()
    }

    /// Extracts the descriptor at `index` if present and its kind matches
    /// `expected`, transferring ownership to the caller.
    ///
    /// Returns `None` on an out-of-range index, an already-extracted slot,
    /// or a kind mismatch — leaving the slot untouched on mismatch.
    pub fn take_descriptor(&mut self, index: usize, expected: DescriptorKind) -> Option<DescriptorRef> {
        let slot = self.descriptors.get_mut(index)?;
        if slot.as_ref()?.kind() != expected {
            return None;
        }
        slot.take()
    }

    /// A [`ReplyToken`] capturing this message's correlation value, for
    /// producing a reply without retaining the full message.
    #[must_use]
    pub fn reply_token(&self) -> ReplyToken {
        ReplyToken::new(self.correlation)
    }

    /// `true` if this message's correlation is `0` (unsolicited).
    #[must_use]
    pub fn is_unsolicited(&self) -> bool {
        self.correlation == 0
    }
}
