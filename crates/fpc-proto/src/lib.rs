//! FPC wire format.
//!
//! Pure byte-level encode/decode for the frame layout described by the
//! transport core: a fixed 256-byte header, a variable-length inline
//! payload, and a fixed 256-byte trailer. This crate has no knowledge of
//! sockets, shared memory, or descriptor passing — it only knows how to
//! turn a [`Frame`] into bytes and back, and which byte patterns are valid.
//!
//! `fpc`, the sibling crate, drives the actual OOL spilling and ancillary
//! descriptor transfer; this crate only records, in the trailer, that an
//! OOL descriptor was (or wasn't) sent.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod descriptor;
mod error;
mod frame;
mod header;
mod message_id;
mod trailer;

pub use descriptor::{DescriptorKind, OOL_MARKER};
pub use error::{ProtocolError, Result};
pub use frame::Frame;
pub use header::{FrameFlags, FrameHeader};
pub use message_id::MessageId;
pub use trailer::FrameTrailer;
