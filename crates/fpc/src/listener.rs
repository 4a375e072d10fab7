//! Listener: binds a `SOCK_SEQPACKET` socket and surfaces inbound
//! connections as a bounded, cancellable sequence of idle endpoints.

use std::os::fd::{AsRawFd, OwnedFd};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::{Context, Poll};

use futures::Stream;
use nix::sys::socket::{AddressFamily, Backlog, SockFlag, SockType, UnixAddr, bind, listen, socket as create_socket};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::EndpointConfig;
use crate::endpoint::{Endpoint, EndpointState};
use crate::error::{FpcError, Result};

/// Default backlog for [`Listener::bind`].
const DEFAULT_BACKLOG: i32 = 128;

struct Shared {
    accept_fd: AsyncFd<OwnedFd>,
    state: AtomicU8,
    endpoint_config: EndpointConfig,
    // Wrapped so `stop()` can drop the sole `Sender` and close the channel
    // even after a consumer has already claimed the `Receiver` half via
    // `connections()` — see the identical reasoning on `Endpoint`'s
    // `incoming_tx`.
    connections_tx: std::sync::Mutex<Option<mpsc::Sender<Endpoint>>>,
    connections_rx: std::sync::Mutex<Option<mpsc::Receiver<Endpoint>>>,
    accept_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// A bound, listening `SOCK_SEQPACKET` socket.
#[derive(Clone)]
pub struct Listener {
    shared: Arc<Shared>,
}

impl Listener {
    /// Binds to `path` and begins listening. Removing any stale socket
    /// node at `path` is the caller's responsibility, not this function's.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_config(path, EndpointConfig::new())
    }

    /// Like [`Self::bind`], but every accepted endpoint is constructed
    /// with `config` instead of the default.
    pub fn bind_with_config(path: impl AsRef<Path>, config: EndpointConfig) -> Result<Self> {
        let fd = create_socket(AddressFamily::Unix, SockType::SeqPacket, SockFlag::SOCK_CLOEXEC, None).map_err(to_io)?;
        let addr = UnixAddr::new(path.as_ref()).map_err(to_io)?;
        bind(fd.as_raw_fd(), &addr).map_err(to_io)?;
        listen(&fd, Backlog::new(DEFAULT_BACKLOG).unwrap_or(Backlog::MAXCONN)).map_err(to_io)?;

        let (connections_tx, connections_rx) = mpsc::channel(config.incoming_capacity());
        let shared = Arc::new(Shared {
            accept_fd: AsyncFd::new(fd).map_err(FpcError::Io)?,
            state: AtomicU8::new(0),
            endpoint_config: config,
            connections_tx: std::sync::Mutex::new(Some(connections_tx)),
            connections_rx: std::sync::Mutex::new(Some(connections_rx)),
            accept_handle: tokio::sync::Mutex::new(None),
        });
        Ok(Self { shared })
    }

    /// The listener's current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EndpointState {
        match self.shared.state.load(Ordering::Acquire) {
            0 => EndpointState::Idle,
            1 => EndpointState::Running,
            _ => EndpointState::Stopped,
        }
    }

    /// Transitions `idle -> running` and spawns the accept loop. A no-op
    /// if already running; fails with `FpcError::NotStarted` if already
    /// stopped.
    pub async fn start(&self) -> Result<()> {
        match self.state() {
            EndpointState::Running => return Ok(()),
            EndpointState::Stopped => return Err(FpcError::NotStarted),
            EndpointState::Idle => {}
        }
        self.shared.state.store(1, Ordering::Release);

        let listener = self.clone();
        let handle = tokio::spawn(async move { listener.run_accept_loop().await });
        *self.shared.accept_handle.lock().await = Some(handle);
        Ok(())
    }

    /// Stops accepting new connections. Idempotent and infallible.
    pub async fn stop(&self) {
        let previous = self.shared.state.swap(2, Ordering::AcqRel);
        if previous == 2 {
            return;
        }
        if let Some(handle) = self.shared.accept_handle.lock().await.take() {
            handle.abort();
        }
        #[allow(clippy::expect_used, reason = "mutex poisoning should cause a panic")]
        {
            *self.shared.connections_rx.lock().expect("connections_rx mutex poisoned") = None;
            *self.shared.connections_tx.lock().expect("connections_tx mutex poisoned") = None;
        }
    }

    /// Claims the sequence of accepted, idle endpoints. The consumer is
    /// responsible for calling `start()` on each.
    pub fn connections(&self) -> Connections {
        #[allow(clippy::expect_used, reason = "mutex poisoning should cause a panic")]
        let receiver = self.shared.connections_rx.lock().expect("connections_rx mutex poisoned").take();
        Connections { receiver }
    }

    async fn run_accept_loop(self) {
        loop {
            let accepted = self.accept_one().await;
            match accepted {
                Ok(fd) => match Endpoint::new(fd, self.shared.endpoint_config) {
                    Ok(endpoint) => {
                        #[allow(clippy::expect_used, reason = "mutex poisoning should cause a panic")]
                        let sender = self.shared.connections_tx.lock().expect("connections_tx mutex poisoned").clone();
                        match sender {
                            Some(sender) if sender.send(endpoint).await.is_ok() => {}
                            _ => return,
                        }
                    }
                    Err(err) => tracing::warn!(error = %err, "failed to wrap accepted socket as an endpoint"),
                },
                Err(err) => {
                    tracing::warn!(error = %err, "accept loop stopping after fatal error");
                    self.stop().await;
                    return;
                }
            }
        }
    }

    async fn accept_one(&self) -> Result<OwnedFd> {
        loop {
            let mut guard = self.shared.accept_fd.readable().await.map_err(FpcError::Io)?;
            let result = guard.try_io(|fd| imp::accept_cloexec(fd.as_raw_fd()).map_err(std::io::Error::from));
            match result {
                Ok(Ok(raw)) => {
                    // SAFETY: `imp::accept_cloexec` just returned a
                    // freshly-accepted descriptor owned exclusively by
                    // this process.
                    return Ok(unsafe { std::os::fd::FromRawFd::from_raw_fd(raw) });
                }
                Ok(Err(err)) => return Err(FpcError::Io(err)),
                Err(_would_block) => continue,
            }
        }
    }
}

/// `accept4` (atomic close-on-exec accept) exists on Linux and most BSDs,
/// but not on macOS/Darwin — there, `accept()` plus a separate `fcntl`
/// `FD_CLOEXEC` set is the best available, with a narrow exec race between
/// the two calls that the kernel gives no way to close.
#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
mod imp {
    use std::os::fd::RawFd;

    use nix::sys::socket::{SockFlag, accept4};

    pub(super) fn accept_cloexec(fd: RawFd) -> nix::Result<RawFd> {
        accept4(fd, SockFlag::SOCK_CLOEXEC)
    }
}

#[cfg(target_os = "macos")]
mod imp {
    use std::os::fd::RawFd;

    use nix::fcntl::{FcntlArg, FdFlag, fcntl};
    use nix::sys::socket::accept;

    pub(super) fn accept_cloexec(fd: RawFd) -> nix::Result<RawFd> {
        let accepted = accept(fd)?;
        fcntl(accepted, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
        Ok(accepted)
    }
}

fn to_io(err: nix::Error) -> FpcError {
    FpcError::Io(std::io::Error::from(err))
}

/// The lazy, cancellable sequence of accepted endpoints produced by a
/// [`Listener`].
pub struct Connections {
    receiver: Option<mpsc::Receiver<Endpoint>>,
}

impl Connections {
    /// Awaits the next accepted endpoint, or `None` once the listener is
    /// stopped and the queue is drained.
    pub async fn next(&mut self) -> Option<Endpoint> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => None,
        }
    }
}

impl Stream for Connections {
    type Item = Endpoint;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.poll_recv(cx),
            None => Poll::Ready(None),
        }
    }
}
