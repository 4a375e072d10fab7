//! Descriptor kind tags carried in the frame trailer.

use std::fmt;

/// The wire value at trailer slot 0 signalling that the frame's payload is
/// out-of-line, and that the first ancillary descriptor is the shared-memory
/// segment backing it rather than an application descriptor.
pub const OOL_MARKER: u8 = 255;

/// The kind of an ancillary descriptor, as recorded in the frame trailer.
///
/// Wire value 255 ([`OOL_MARKER`]) is not a kind — it is the OOL signal and
/// is handled separately by [`crate::FrameTrailer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DescriptorKind {
    /// Kind could not be determined.
    Unknown = 0,
    /// A regular file.
    File = 1,
    /// A directory.
    Directory = 2,
    /// A device node.
    Device = 3,
    /// A socket.
    Socket = 4,
    /// A pipe (FIFO or anonymous).
    Pipe = 5,
    /// A process handle.
    Process = 6,
    /// A kqueue.
    Kqueue = 7,
    /// An anonymous shared-memory segment.
    SharedMemory = 8,
    /// An event descriptor.
    Event = 9,
    /// A non-owning jail reference.
    JailNonOwning = 10,
    /// An owning jail reference.
    JailOwning = 11,
}

impl DescriptorKind {
    /// The raw wire value for this kind.
    #[must_use]
    pub const fn to_wire(self) -> u8 {
        self as u8
    }

    /// Parses a raw wire value, rejecting [`OOL_MARKER`] as not a kind.
    #[must_use]
    pub const fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Unknown),
            1 => Some(Self::File),
            2 => Some(Self::Directory),
            3 => Some(Self::Device),
            4 => Some(Self::Socket),
            5 => Some(Self::Pipe),
            6 => Some(Self::Process),
            7 => Some(Self::Kqueue),
            8 => Some(Self::SharedMemory),
            9 => Some(Self::Event),
            10 => Some(Self::JailNonOwning),
            11 => Some(Self::JailOwning),
            _ => None,
        }
    }
}

impl fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::File => "file",
            Self::Directory => "directory",
            Self::Device => "device",
            Self::Socket => "socket",
            Self::Pipe => "pipe",
            Self::Process => "process",
            Self::Kqueue => "kqueue",
            Self::SharedMemory => "shared-memory",
            Self::Event => "event",
            Self::JailNonOwning => "jail(non-owning)",
            Self::JailOwning => "jail(owning)",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ool_marker_is_not_a_kind() {
        assert_eq!(DescriptorKind::from_wire(OOL_MARKER), None);
    }

    #[test]
    fn round_trips_every_defined_kind() {
        for raw in 0..=11u8 {
            let kind = DescriptorKind::from_wire(raw).expect("defined kind");
            assert_eq!(kind.to_wire(), raw);
        }
    }
}
