//! The client `connect()` constructor: connect to a listening address by
//! path, or by directory descriptor plus relative path.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::path::Path;

use nix::sys::socket::{AddressFamily, SockFlag, SockType, UnixAddr, connect, socket as create_socket};

use crate::config::EndpointConfig;
use crate::endpoint::Endpoint;
use crate::error::{FpcError, Result};

fn to_io(err: nix::Error) -> FpcError {
    FpcError::Io(std::io::Error::from(err))
}

/// Connects to the `SOCK_SEQPACKET` socket bound at `path`, returning an
/// `idle` endpoint.
pub fn connect_path(path: impl AsRef<Path>) -> Result<Endpoint> {
    connect_path_with_config(path, EndpointConfig::new())
}

/// Like [`connect_path`], but the resulting endpoint uses `config`
/// instead of the default.
pub fn connect_path_with_config(path: impl AsRef<Path>, config: EndpointConfig) -> Result<Endpoint> {
    let addr = UnixAddr::new(path.as_ref()).map_err(to_io)?;
    connect_addr(&addr, config)
}

/// Connects to a `SOCK_SEQPACKET` socket named by `relative_path`,
/// resolved against `dir_fd` rather than the process's current working
/// directory — for sandboxed callers that may not have an ambient root.
///
/// `UnixAddr` has no `*at`-style constructor, so this resolves through the
/// kernel's fd-as-directory trick: `/proc/self/fd/<dir_fd>` on Linux,
/// `/dev/fd/<dir_fd>` (`fdescfs`) on FreeBSD and DragonFly BSD. NetBSD,
/// OpenBSD, and macOS expose no equivalent directory-traversal mechanism,
/// so there this returns `FpcError::Io` with `ErrorKind::Unsupported`
/// rather than being absent from the compiled API.
pub fn connect_relative(dir_fd: BorrowedFd<'_>, relative_path: impl AsRef<Path>) -> Result<Endpoint> {
    connect_relative_with_config(dir_fd, relative_path, EndpointConfig::new())
}

/// Like [`connect_relative`], but the resulting endpoint uses `config`
/// instead of the default.
pub fn connect_relative_with_config(
    dir_fd: BorrowedFd<'_>,
    relative_path: impl AsRef<Path>,
    config: EndpointConfig,
) -> Result<Endpoint> {
    let resolved = resolve_relative(dir_fd, relative_path.as_ref())?;
    connect_path_with_config(resolved, config)
}

#[cfg(target_os = "linux")]
fn resolve_relative(dir_fd: BorrowedFd<'_>, relative_path: &Path) -> Result<std::path::PathBuf> {
    Ok(Path::new("/proc/self/fd").join(dir_fd.as_raw_fd().to_string()).join(relative_path))
}

/// `fdescfs`, conventionally mounted at `/dev/fd`, gives each open
/// descriptor a directory entry; walking `<dir_fd>/<relative_path>`
/// through it resolves relative to `dir_fd` the same way Linux's
/// `/proc/self/fd` trick does.
#[cfg(any(target_os = "freebsd", target_os = "dragonfly"))]
fn resolve_relative(dir_fd: BorrowedFd<'_>, relative_path: &Path) -> Result<std::path::PathBuf> {
    Ok(Path::new("/dev/fd").join(dir_fd.as_raw_fd().to_string()).join(relative_path))
}

#[cfg(any(target_os = "netbsd", target_os = "openbsd", target_os = "macos"))]
fn resolve_relative(_dir_fd: BorrowedFd<'_>, _relative_path: &Path) -> Result<std::path::PathBuf> {
    Err(FpcError::Io(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "connect_relative has no directory-fd-traversal mechanism on this platform",
    )))
}

fn connect_addr(addr: &UnixAddr, config: EndpointConfig) -> Result<Endpoint> {
    let fd = create_socket(AddressFamily::Unix, SockType::SeqPacket, SockFlag::SOCK_CLOEXEC, None).map_err(to_io)?;
    connect(fd.as_fd().as_raw_fd(), addr).map_err(to_io)?;
    Endpoint::new(fd, config).map_err(FpcError::Io)
}
