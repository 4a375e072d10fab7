//! Raw `SOCK_SEQPACKET` socket I/O: one frame per datagram, with ancillary
//! descriptor passing and peer-credential queries.

use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd, RawFd};

use fpc_proto::Frame;
use nix::sys::socket::{ControlMessage, ControlMessageOwned, MsgFlags, recvmsg, sendmsg};
use nix::sys::uio::IoSlice;
use tokio::io::unix::AsyncFd;

use crate::config::OOL_THRESHOLD;
use crate::error::{FpcError, Result};

/// `{uid, gid, pid}` of a connected peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    /// The peer process's user id.
    pub uid: u32,
    /// The peer process's group id.
    pub gid: u32,
    /// The peer process's id.
    pub pid: i32,
}

/// Maximum bytes a single datagram can carry: header + the largest inline
/// (non-OOL) payload + trailer.
const MAX_DATAGRAM: usize = fpc_proto::FrameHeader::SIZE + OOL_THRESHOLD + 256;

/// Maximum ancillary descriptors accepted per receive, matching the
/// header's descriptor-count field range.
const MAX_ANCILLARY: usize = 254;

/// An async-readiness-driven wrapper around a connected `SOCK_SEQPACKET`
/// socket.
pub(crate) struct RawSocket {
    inner: AsyncFd<OwnedFd>,
}

impl RawSocket {
    pub(crate) fn new(fd: OwnedFd) -> std::io::Result<Self> {
        Ok(Self { inner: AsyncFd::new(fd)? })
    }

    /// Sends one frame and its ancillary descriptors as a single atomic
    /// datagram. Asserts `MSG_EOR` (record boundary) and `MSG_NOSIGNAL`
    /// (closed-peer yields an error, not `SIGPIPE`).
    pub(crate) async fn send_frame(&self, frame: &Frame, descriptors: &[RawFd]) -> Result<()> {
        if descriptors.len() > MAX_ANCILLARY {
            return Err(FpcError::TooManyDescriptors(descriptors.len()));
        }

        let encoded = frame.encode();

        loop {
            let mut guard = self.inner.writable().await.map_err(FpcError::Io)?;
            let result = guard.try_io(|fd| {
                let iov = [IoSlice::new(&encoded)];
                let cmsgs: Vec<ControlMessage<'_>> =
                    if descriptors.is_empty() { Vec::new() } else { vec![ControlMessage::ScmRights(descriptors)] };
                sendmsg::<()>(fd.as_raw_fd(), &iov, &cmsgs, MsgFlags::MSG_EOR | MsgFlags::MSG_NOSIGNAL, None)
                    .map(|_| ())
                    .map_err(std::io::Error::from)
            });

            match result {
                Ok(inner) => return inner.map_err(FpcError::Io),
                Err(_would_block) => continue,
            }
        }
    }

    /// Receives one frame and its ancillary descriptors from a single
    /// datagram.
    ///
    /// Returns `Ok(None)` on a zero-length datagram (clean peer close;
    /// callers translate this to `FpcError::Disconnected`).
    pub(crate) async fn recv_frame(&self) -> Result<Option<(Frame, Vec<OwnedFd>)>> {
        loop {
            let mut guard = self.inner.readable().await.map_err(FpcError::Io)?;
            let result = guard.try_io(|fd| {
                let mut buf = vec![0u8; MAX_DATAGRAM];
                let mut iov = [std::io::IoSliceMut::new(&mut buf)];
                let mut cmsg_space = nix::cmsg_space!([RawFd; MAX_ANCILLARY]);

                let msg =
                    recvmsg::<()>(fd.as_raw_fd(), &mut iov, Some(&mut cmsg_space), imp::recv_flags())
                        .map_err(std::io::Error::from)?;

                if msg.bytes == 0 {
                    return Ok(None);
                }
                if msg.flags.intersects(MsgFlags::MSG_TRUNC | MsgFlags::MSG_CTRUNC) {
                    return Ok(Some((Vec::new(), Vec::new(), true)));
                }

                let mut fds = Vec::new();
                for cmsg in msg.cmsgs().map_err(std::io::Error::from)? {
                    if let ControlMessageOwned::ScmRights(raw_fds) = cmsg {
                        // SAFETY: each raw fd was just handed to us by the
                        // kernel via SCM_RIGHTS and is owned by this
                        // process exclusively from this point on.
                        fds.extend(raw_fds.into_iter().map(|raw| unsafe { OwnedFd::from_raw_fd(raw) }));
                    }
                }
                imp::ensure_cloexec(&fds).map_err(std::io::Error::from)?;

                Ok(Some((buf[..msg.bytes].to_vec(), fds, false)))
            });

            let (bytes, fds, truncated) = match result {
                Ok(Ok(None)) => return Ok(None),
                Ok(Ok(Some(parsed))) => parsed,
                Ok(Err(err)) => return Err(FpcError::Io(err)),
                Err(_would_block) => continue,
            };

            if truncated {
                return Err(FpcError::InvalidMessageFormat(fpc_proto::ProtocolError::InvalidFormat {
                    reason: "datagram truncated by kernel",
                }));
            }

            let frame = Frame::decode(&bytes)?;
            return Ok(Some((frame, fds)));
        }
    }

    /// Queries the connected peer's credentials.
    pub(crate) fn peer_credentials(&self) -> Result<PeerCredentials> {
        imp::peer_credentials(self.inner.get_ref().as_fd())
    }
}

#[cfg(target_os = "linux")]
mod imp {
    use std::os::fd::{BorrowedFd, OwnedFd};

    use nix::sys::socket::{MsgFlags, getsockopt, sockopt::PeerCredentials as PeerCredentialsOpt};

    use super::PeerCredentials;
    use crate::error::{FpcError, Result};

    pub(super) fn peer_credentials(fd: BorrowedFd<'_>) -> Result<PeerCredentials> {
        let creds = getsockopt(&fd, PeerCredentialsOpt).map_err(|e| FpcError::Io(std::io::Error::from(e)))?;
        Ok(PeerCredentials { uid: creds.uid(), gid: creds.gid(), pid: creds.pid() })
    }

    /// `MSG_CMSG_CLOEXEC` atomically marks received ancillary descriptors
    /// close-on-exec; supported here, so [`ensure_cloexec`] is a no-op.
    pub(super) fn recv_flags() -> MsgFlags {
        MsgFlags::MSG_CMSG_CLOEXEC
    }

    pub(super) fn ensure_cloexec(_fds: &[OwnedFd]) -> nix::Result<()> {
        Ok(())
    }
}

#[cfg(target_os = "macos")]
mod imp {
    use std::mem::size_of;
    use std::os::fd::{AsRawFd, BorrowedFd};

    use nix::sys::socket::getpeereid;

    use super::PeerCredentials;
    use crate::error::{FpcError, Result};

    pub(super) fn peer_credentials(fd: BorrowedFd<'_>) -> Result<PeerCredentials> {
        let (uid, gid) = getpeereid(fd).map_err(|e| FpcError::Io(std::io::Error::from(e)))?;
        let pid = local_peer_pid(fd)?;
        Ok(PeerCredentials { uid: uid.as_raw(), gid: gid.as_raw(), pid })
    }

    /// macOS has no `LOCAL_PEERCRED`-embedded pid field (unlike FreeBSD's
    /// `xucred`), so the peer's pid is fetched separately via the
    /// `SOL_LOCAL`/`LOCAL_PEERPID` socket option, which yields a bare
    /// `pid_t`. `nix` does not wrap this option, so it is read directly
    /// through `getsockopt(2)`.
    fn local_peer_pid(fd: BorrowedFd<'_>) -> Result<i32> {
        // SAFETY: `pid` and `pid_len` describe a correctly sized out
        // buffer for `LOCAL_PEERPID`, which always yields a `pid_t`.
        let pid = unsafe {
            let mut pid: nix::libc::pid_t = 0;
            let mut pid_len = size_of::<nix::libc::pid_t>() as nix::libc::socklen_t;
            let ret = nix::libc::getsockopt(
                fd.as_raw_fd(),
                nix::libc::SOL_LOCAL,
                nix::libc::LOCAL_PEERPID,
                std::ptr::addr_of_mut!(pid).cast(),
                &mut pid_len,
            );
            if ret != 0 {
                return Err(FpcError::Io(std::io::Error::last_os_error()));
            }
            pid
        };
        Ok(pid)
    }

    pub(super) fn recv_flags() -> nix::sys::socket::MsgFlags {
        nix::sys::socket::MsgFlags::empty()
    }

    /// `accept`/`recvmsg` on macOS have no atomic close-on-exec flag for
    /// ancillary descriptors, so [`ensure_cloexec`] sets `FD_CLOEXEC` on
    /// each received descriptor by hand after the fact — a narrow exec
    /// race the kernel gives no way to close here.
    pub(super) fn ensure_cloexec(fds: &[std::os::fd::OwnedFd]) -> nix::Result<()> {
        use nix::fcntl::{FcntlArg, FdFlag, fcntl};

        for fd in fds {
            fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
        }
        Ok(())
    }
}

#[cfg(target_os = "freebsd")]
mod imp {
    use std::mem::size_of;
    use std::os::fd::{AsRawFd, BorrowedFd};

    use super::PeerCredentials;
    use crate::error::{FpcError, Result};

    /// FreeBSD's `xucred` (`sys/ucred.h`), as exposed by the `libc` crate:
    /// version tag, uid, group count plus a fixed-size group array, and —
    /// since FreeBSD 13 — the peer's pid. `LOCAL_PEERCRED` fills the whole
    /// struct in one `getsockopt(2)` call, unlike macOS's split
    /// `LOCAL_PEERCRED`/`LOCAL_PEERPID`.
    pub(super) fn peer_credentials(fd: BorrowedFd<'_>) -> Result<PeerCredentials> {
        // SAFETY: `cred`/`cred_len` describe a correctly sized out buffer
        // for `LOCAL_PEERCRED`, which always yields a full `xucred`.
        let cred = unsafe {
            let mut cred: nix::libc::xucred = std::mem::zeroed();
            let mut cred_len = size_of::<nix::libc::xucred>() as nix::libc::socklen_t;
            let ret = nix::libc::getsockopt(
                fd.as_raw_fd(),
                nix::libc::SOL_LOCAL,
                nix::libc::LOCAL_PEERCRED,
                std::ptr::addr_of_mut!(cred).cast(),
                &mut cred_len,
            );
            if ret != 0 {
                return Err(FpcError::Io(std::io::Error::last_os_error()));
            }
            cred
        };

        if cred.cr_version != nix::libc::XUCRED_VERSION {
            return Err(FpcError::Io(std::io::Error::other("unexpected xucred version from LOCAL_PEERCRED")));
        }
        let gid = *cred.cr_groups.first().unwrap_or(&0);
        Ok(PeerCredentials { uid: cred.cr_uid, gid, pid: cred.cr_pid })
    }

    pub(super) fn recv_flags() -> nix::sys::socket::MsgFlags {
        nix::sys::socket::MsgFlags::MSG_CMSG_CLOEXEC
    }

    pub(super) fn ensure_cloexec(_fds: &[std::os::fd::OwnedFd]) -> nix::Result<()> {
        Ok(())
    }
}

#[cfg(any(target_os = "netbsd", target_os = "openbsd", target_os = "dragonfly"))]
mod imp {
    use std::os::fd::BorrowedFd;

    use super::PeerCredentials;
    use crate::error::{FpcError, Result};

    /// Neither NetBSD, OpenBSD, nor DragonFly BSD expose a portable
    /// syscall for the peer's pid on a Unix domain socket (only uid/gid
    /// via `getpeereid(3)`), so the pid half of the query cannot be
    /// honestly satisfied here. Surfaced as an error rather than
    /// fabricating a pid of `0`.
    pub(super) fn peer_credentials(_fd: BorrowedFd<'_>) -> Result<PeerCredentials> {
        Err(FpcError::Io(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "peer pid is not obtainable on this platform",
        )))
    }

    pub(super) fn recv_flags() -> nix::sys::socket::MsgFlags {
        nix::sys::socket::MsgFlags::MSG_CMSG_CLOEXEC
    }

    pub(super) fn ensure_cloexec(_fds: &[std::os::fd::OwnedFd]) -> nix::Result<()> {
        Ok(())
    }
}
