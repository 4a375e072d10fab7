//! Out-of-line payload engine.
//!
//! Spills payloads over [`crate::config::OOL_THRESHOLD`] into an anonymous
//! shared-memory segment that travels as the first ancillary descriptor,
//! instead of inline in the datagram.

use std::num::NonZeroUsize;
use std::os::fd::{AsFd, OwnedFd};
use std::ptr::NonNull;

use bytes::Bytes;
use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap};
use nix::sys::stat::fstat;
use nix::unistd::ftruncate;

use crate::error::{FpcError, Result};

fn to_fpc(err: nix::Error) -> FpcError {
    FpcError::Io(std::io::Error::from(err))
}

/// Creates an anonymous, memory-backed segment sized to hold `payload`,
/// writes `payload` into it, and returns the descriptor ready to be sent
/// as the OOL ancillary descriptor.
///
/// Any failure during creation, resize, map, or copy aborts with
/// `FpcError::Io`.
pub(crate) fn write_segment(payload: &[u8]) -> Result<OwnedFd> {
    let fd = create_anonymous_memory()?;

    let len = NonZeroUsize::new(payload.len()).unwrap_or(NonZeroUsize::MIN);
    ftruncate(&fd, payload.len() as nix::libc::off_t).map_err(to_fpc)?;

    if payload.is_empty() {
        return Ok(fd);
    }

    // SAFETY: `fd` was just created by this process and sized to
    // `payload.len()` above; the mapping is dropped (unmapped) before
    // this function returns and is never aliased elsewhere.
    let addr = unsafe { mmap(None, len, ProtFlags::PROT_WRITE, MapFlags::MAP_SHARED, &fd, 0) }.map_err(to_fpc)?;

    // SAFETY: `addr` is a valid writable mapping of exactly `len` bytes,
    // obtained immediately above and not yet unmapped.
    unsafe {
        std::ptr::copy_nonoverlapping(payload.as_ptr(), addr.as_ptr().cast::<u8>(), payload.len());
    }

    // SAFETY: unmaps exactly the region mapped above, once, and the
    // pointer is not used again afterward.
    unsafe { munmap(addr, len.get()) }.map_err(to_fpc)?;

    Ok(fd)
}

/// Maps `fd` (an OOL segment received from a peer) read-only, copies its
/// contents into an owned buffer, and unmaps it. The descriptor itself is
/// closed when `fd` is dropped.
///
/// Any failure here is reported to the caller as
/// `FpcError::InvalidMessageFormat`-equivalent territory; callers in the
/// reader task treat it as fatal and stop the endpoint.
pub(crate) fn read_segment(fd: &OwnedFd) -> Result<Bytes> {
    let stat = fstat(fd.as_fd()).map_err(to_fpc)?;
    let size = usize::try_from(stat.st_size).map_err(|_| FpcError::Io(std::io::Error::other("negative segment size")))?;

    if size == 0 {
        return Ok(Bytes::new());
    }

    let len = NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN);

    // SAFETY: `fd` is a shared-memory segment of at least `size` bytes
    // (just confirmed via fstat); the mapping is unmapped before return
    // and never aliased elsewhere.
    let addr = unsafe { mmap(None, len, ProtFlags::PROT_READ, MapFlags::MAP_SHARED, fd, 0) }.map_err(to_fpc)?;

    // SAFETY: `addr` is a valid readable mapping of exactly `size` bytes.
    let copied = unsafe { std::slice::from_raw_parts(addr.as_ptr().cast::<u8>(), size) }.to_vec();

    // SAFETY: unmaps exactly the region mapped above, once.
    unsafe { munmap(addr, len.get()) }.map_err(to_fpc)?;

    Ok(Bytes::from(copied))
}

fn create_anonymous_memory() -> Result<OwnedFd> {
    imp::create_anonymous_memory().map_err(to_fpc)
}

#[cfg(target_os = "linux")]
mod imp {
    use std::ffi::CStr;
    use std::os::fd::OwnedFd;

    use nix::sys::memfd::{MFdFlags, memfd_create};

    pub(super) fn create_anonymous_memory() -> nix::Result<OwnedFd> {
        const NAME: &CStr = c"fpc-ool";
        memfd_create(NAME, MFdFlags::MFD_CLOEXEC)
    }
}

#[cfg(any(
    target_os = "freebsd",
    target_os = "macos",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
mod imp {
    use std::os::fd::OwnedFd;
    use std::sync::atomic::{AtomicU64, Ordering};

    use nix::fcntl::OFlag;
    use nix::sys::stat::Mode;

    /// Monotonically increasing per-process counter, combined with the pid
    /// and a timestamp, to keep concurrently-created segment names from
    /// colliding — `gettid` has no portable equivalent on BSD-class kernels.
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    /// Emulates Linux's `MFD_CLOEXEC` anonymous memory on BSD-class
    /// kernels lacking `memfd_create`: open a uniquely-named POSIX shared
    /// memory object, then unlink it immediately so no other process can
    /// open the same name and the segment is reclaimed on last close.
    pub(super) fn create_anonymous_memory() -> nix::Result<OwnedFd> {
        let nanos = nix::sys::time::clock_gettime(nix::time::ClockId::CLOCK_MONOTONIC)?.tv_nsec();
        let sequence = COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = format!("/fpc-ool-{}-{}-{}", std::process::id(), nanos, sequence);
        let fd = nix::sys::mman::shm_open(
            name.as_str(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )?;
        let _ = nix::sys::mman::shm_unlink(name.as_str());
        Ok(fd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let payload = b"a payload large enough to exercise the OOL path".to_vec();
        let fd = write_segment(&payload).expect("write should succeed");
        let read_back = read_segment(&fd).expect("read should succeed");
        assert_eq!(read_back.as_ref(), payload.as_slice());
    }

    #[test]
    fn empty_payload_round_trips() {
        let fd = write_segment(&[]).expect("write should succeed");
        let read_back = read_segment(&fd).expect("read should succeed");
        assert!(read_back.is_empty());
    }
}
