//! Endpoint state machine: lifecycle, reader task, pending-request table,
//! and incoming-message delivery.

use std::collections::HashMap;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::Bytes;
use fpc_proto::{DescriptorKind, Frame, FrameTrailer, MessageId};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::{EndpointConfig, OOL_THRESHOLD};
use crate::error::{FpcError, Result};
use crate::message::{DescriptorRef, Message, ReplyToken};
use crate::ool;
use crate::socket::{PeerCredentials, RawSocket};

/// The endpoint's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Constructed, not yet started.
    Idle,
    /// `start()` has been called; the reader task is live.
    Running,
    /// Terminal: `stop()` was called, or the reader hit a fatal error.
    Stopped,
}

impl EndpointState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Stopped => 2,
        }
    }
}

struct Shared {
    socket: RawSocket,
    config: EndpointConfig,
    state: AtomicU8,
    correlation_counter: AtomicU64,
    // A plain std mutex, not a tokio one: `PendingGuard::drop` must be able
    // to remove its entry synchronously when `request()`'s future is
    // dropped mid-await, and `Drop` cannot `.await`.
    pending: StdMutex<HashMap<u64, oneshot::Sender<Message>>>,
    send_lock: Mutex<()>,
    // Wrapped so `stop()` can drop the sole `Sender` and close the channel
    // even after a consumer has already claimed the `Receiver` half via
    // `incoming()` — dropping the last sender is the only way to make a
    // claimed `Incoming::next()` return `None` instead of waiting forever.
    incoming_tx: StdMutex<Option<mpsc::Sender<Message>>>,
    incoming_rx: StdMutex<Option<mpsc::Receiver<Message>>>,
    incoming_claimed: AtomicBool,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
}

/// Removes a correlation's pending-request entry when dropped, regardless
/// of how `request()`'s future was driven to completion — including
/// outright cancellation, which runs no code after the future's last
/// completed `.await` point. Removal is idempotent, so it is harmless if
/// `route_frame` already removed the entry itself.
struct PendingGuard<'a> {
    shared: &'a Shared,
    correlation: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        #[allow(clippy::expect_used, reason = "mutex poisoning should cause a panic")]
        self.shared.pending.lock().expect("pending mutex poisoned").remove(&self.correlation);
    }
}

/// One connected side of a socket: a socket, a monotonic correlation
/// counter, a pending-request table, and a single-claim incoming queue.
///
/// Cheaply cloneable; clones share the same underlying state (the socket,
/// reader task, and tables) — a shared container owned jointly by the
/// endpoint and its reader task, neither side owning the other.
#[derive(Clone)]
pub struct Endpoint {
    shared: Arc<Shared>,
}

impl Endpoint {
    pub(crate) fn new(fd: OwnedFd, config: EndpointConfig) -> std::io::Result<Self> {
        let (incoming_tx, incoming_rx) = mpsc::channel(config.incoming_capacity());
        let shared = Arc::new(Shared {
            socket: RawSocket::new(fd)?,
            config,
            state: AtomicU8::new(EndpointState::Idle.to_u8()),
            correlation_counter: AtomicU64::new(0),
            pending: StdMutex::new(HashMap::new()),
            send_lock: Mutex::new(()),
            incoming_tx: StdMutex::new(Some(incoming_tx)),
            incoming_rx: StdMutex::new(Some(incoming_rx)),
            incoming_claimed: AtomicBool::new(false),
            reader_handle: Mutex::new(None),
        });
        Ok(Self { shared })
    }

    /// The endpoint's current lifecycle state. Non-blocking.
    #[must_use]
    pub fn state(&self) -> EndpointState {
        EndpointState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Transitions `idle -> running` and spawns the reader task.
    ///
    /// A no-op if already running. Fails with `FpcError::NotStarted` if
    /// the endpoint has already been stopped — a stopped endpoint can
    /// never run again.
    pub async fn start(&self) -> Result<()> {
        match self.state() {
            EndpointState::Running => return Ok(()),
            EndpointState::Stopped => return Err(FpcError::NotStarted),
            EndpointState::Idle => {}
        }

        self.shared.state.store(EndpointState::Running.to_u8(), Ordering::Release);

        let reader_endpoint = self.clone();
        let handle = tokio::spawn(async move { reader_endpoint.run_reader().await });
        *self.shared.reader_handle.lock().await = Some(handle);
        Ok(())
    }

    /// Transitions any state to `stopped`: fails every pending waiter with
    /// `FpcError::Disconnected`, closes the incoming queue, and aborts the
    /// reader task. Idempotent and infallible.
    pub async fn stop(&self) {
        let previous = self.shared.state.swap(EndpointState::Stopped.to_u8(), Ordering::AcqRel);
        if previous == EndpointState::Stopped.to_u8() {
            return;
        }

        if let Some(handle) = self.shared.reader_handle.lock().await.take() {
            handle.abort();
        }

        #[allow(clippy::expect_used, reason = "mutex poisoning should cause a panic")]
        {
            // Dropping each waiter completes its receiver with `RecvError`,
            // which `request()` maps to `FpcError::Disconnected`.
            self.shared.pending.lock().expect("pending mutex poisoned").clear();
            *self.shared.incoming_rx.lock().expect("incoming_rx mutex poisoned") = None;
            // Drop the sole sender so a claimed `Incoming::next()` observes
            // the channel closing instead of waiting forever.
            *self.shared.incoming_tx.lock().expect("incoming_tx mutex poisoned") = None;
        }
    }

    /// Sends an unsolicited message (correlation `0`).
    pub async fn send(&self, identifier: MessageId, payload: impl Into<Bytes>, descriptors: Vec<DescriptorRef>) -> Result<()> {
        self.send_message(identifier, 0, payload.into(), descriptors).await
    }

    /// Sends an unsolicited message, waiting at most `timeout` for kernel
    /// backpressure on the send path to clear.
    pub async fn send_timeout(
        &self,
        identifier: MessageId,
        payload: impl Into<Bytes>,
        descriptors: Vec<DescriptorRef>,
        timeout: Duration,
    ) -> Result<()> {
        tokio::time::timeout(timeout, self.send(identifier, payload, descriptors)).await.map_err(|_| FpcError::Timeout)?
    }

    /// Sends a reply to a message received via `incoming()`, preserving
    /// its correlation value. `reply()` never assigns a new correlation.
    pub async fn reply(
        &self,
        to: ReplyToken,
        identifier: MessageId,
        payload: impl Into<Bytes>,
        descriptors: Vec<DescriptorRef>,
    ) -> Result<()> {
        self.send_message(identifier, to.correlation(), payload.into(), descriptors).await
    }

    /// Allocates the next correlation value, sends a request, and awaits
    /// the matching reply or `timeout`.
    ///
    /// `request()` is the only producer of new correlation values. The
    /// pending-request entry is removed on every exit path — reply,
    /// timeout, send failure, or the caller cancelling this future itself
    /// (e.g. a `tokio::select!` branch losing, or an aborted task) — via a
    /// guard that runs on drop rather than inline code after an `.await`.
    pub async fn request(
        &self,
        identifier: MessageId,
        payload: impl Into<Bytes>,
        descriptors: Vec<DescriptorRef>,
        timeout: Duration,
    ) -> Result<Message> {
        self.ensure_running()?;

        let correlation = self.next_correlation();
        let (tx, rx) = oneshot::channel();
        #[allow(clippy::expect_used, reason = "mutex poisoning should cause a panic")]
        self.shared.pending.lock().expect("pending mutex poisoned").insert(correlation, tx);
        let _guard = PendingGuard { shared: self.shared.as_ref(), correlation };

        self.send_message(identifier, correlation, payload.into(), descriptors).await?;

        let outcome = tokio::time::timeout(timeout, rx).await;

        match outcome {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_canceled)) => Err(FpcError::Disconnected),
            Err(_elapsed) => Err(FpcError::Timeout),
        }
    }

    /// Claims the single-consumer incoming-message sequence.
    ///
    /// Fails with `FpcError::StreamAlreadyClaimed` if called a second time
    /// on this endpoint.
    pub fn incoming(&self) -> Result<Incoming> {
        if self.shared.incoming_claimed.swap(true, Ordering::AcqRel) {
            return Err(FpcError::StreamAlreadyClaimed);
        }
        #[allow(clippy::expect_used, reason = "mutex poisoning should cause a panic")]
        let receiver = self.shared.incoming_rx.lock().expect("incoming_rx mutex poisoned").take();
        Ok(Incoming { receiver })
    }

    /// Queries the peer's credentials.
    pub fn peer_credentials(&self) -> Result<PeerCredentials> {
        self.shared.socket.peer_credentials()
    }

    fn next_correlation(&self) -> u64 {
        let next = self.shared.correlation_counter.fetch_add(1, Ordering::Relaxed) + 1;
        debug_assert_ne!(next, 0, "correlation counter wrapped around within a single endpoint's lifetime");
        next
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state() {
            EndpointState::Running => Ok(()),
            EndpointState::Idle => Err(FpcError::NotStarted),
            EndpointState::Stopped => Err(FpcError::Stopped),
        }
    }

    async fn send_message(&self, identifier: MessageId, correlation: u64, payload: Bytes, descriptors: Vec<DescriptorRef>) -> Result<()> {
        self.ensure_running()?;

        let kinds: Vec<DescriptorKind> = descriptors.iter().map(DescriptorRef::kind).collect();
        let owned_fds: Vec<OwnedFd> = descriptors.into_iter().map(DescriptorRef::into_owned_fd).collect();

        if payload.len() > self.shared.config.max_ool_payload() {
            return Err(FpcError::PayloadTooLarge { limit: self.shared.config.max_ool_payload(), actual: payload.len() });
        }

        let (frame, segment) = if payload.len() > OOL_THRESHOLD {
            let total = owned_fds.len() + 1;
            if total > 254 {
                return Err(FpcError::TooManyDescriptors(total));
            }
            let segment = ool::write_segment(&payload)?;
            let trailer = FrameTrailer::for_ool(&kinds).map_err(FpcError::from)?;
            let descriptor_count = u8::try_from(total).unwrap_or(254);
            (Frame::new_ool(identifier, correlation, descriptor_count, trailer), Some(segment))
        } else {
            if owned_fds.len() > 254 {
                return Err(FpcError::TooManyDescriptors(owned_fds.len()));
            }
            let trailer = FrameTrailer::for_kinds(&kinds).map_err(FpcError::from)?;
            let mut frame = Frame::new(identifier, correlation, payload).map_err(FpcError::from)?;
            frame.header.set_descriptor_count(u8::try_from(owned_fds.len()).unwrap_or(254));
            frame.trailer = trailer;
            (frame, None)
        };

        let raw_fds: Vec<RawFd> =
            segment.iter().map(AsRawFd::as_raw_fd).chain(owned_fds.iter().map(AsRawFd::as_raw_fd)).collect();

        let _serialize = self.shared.send_lock.lock().await;
        let result = self.shared.socket.send_frame(&frame, &raw_fds).await;
        drop(segment);
        drop(owned_fds);
        result
    }

    async fn run_reader(self) {
        loop {
            let received = self.shared.socket.recv_frame().await;
            match received {
                Ok(None) => {
                    self.stop().await;
                    return;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "reader task stopping endpoint after fatal error");
                    self.stop().await;
                    return;
                }
                Ok(Some((frame, mut fds))) => {
                    if let Err(err) = self.route_frame(frame, &mut fds).await {
                        tracing::warn!(error = %err, "reader task stopping endpoint after routing error");
                        self.stop().await;
                        return;
                    }
                }
            }
        }
    }

    async fn route_frame(&self, frame: Frame, fds: &mut Vec<OwnedFd>) -> Result<()> {
        let identifier = MessageId::from_wire(frame.header.identifier());
        let correlation = frame.header.correlation();
        let is_ool = frame.header.flags().is_ool_present();

        let (payload, descriptor_start) = if is_ool {
            if fds.is_empty() {
                return Err(FpcError::InvalidMessageFormat(fpc_proto::ProtocolError::InvalidFormat {
                    reason: "OOL frame arrived without an ancillary segment",
                }));
            }
            let segment = fds.remove(0);
            let payload = ool::read_segment(&segment)?;
            (payload, 1usize)
        } else {
            (frame.payload.clone(), 0usize)
        };

        let descriptor_count = frame.header.descriptor_count() as usize;
        let expected_remaining = descriptor_count.saturating_sub(descriptor_start);
        if fds.len() != expected_remaining {
            return Err(FpcError::InvalidMessageFormat(fpc_proto::ProtocolError::InvalidFormat {
                reason: "descriptor count does not match received ancillary descriptors",
            }));
        }

        let mut descriptors = Vec::with_capacity(fds.len());
        for (slot_offset, fd) in fds.drain(..).enumerate() {
            let slot = descriptor_start + slot_offset;
            let kind = frame
                .trailer
                .kind_raw_at(slot)
                .and_then(DescriptorKind::from_wire)
                .unwrap_or(DescriptorKind::Unknown);
            descriptors.push(DescriptorRef::new(fd, kind));
        }

        let message = Message::with_correlation(identifier, correlation, payload, descriptors);

        if correlation != 0 {
            #[allow(clippy::expect_used, reason = "mutex poisoning should cause a panic")]
            let waiter = self.shared.pending.lock().expect("pending mutex poisoned").remove(&correlation);
            if let Some(waiter) = waiter {
                let _ = waiter.send(message);
                return Ok(());
            }
        }

        #[allow(clippy::expect_used, reason = "mutex poisoning should cause a panic")]
        let sender = self.shared.incoming_tx.lock().expect("incoming_tx mutex poisoned").clone();
        if let Some(sender) = sender {
            let _ = sender.send(message).await;
        }
        Ok(())
    }
}

/// The single-claim, consumer-facing sequence of inbound messages that
/// are not replies to local `request()` calls.
pub struct Incoming {
    receiver: Option<mpsc::Receiver<Message>>,
}

impl Incoming {
    /// Awaits the next inbound message, or `None` once the endpoint is
    /// stopped and the queue is drained.
    pub async fn next(&mut self) -> Option<Message> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_u8() {
        for state in [EndpointState::Idle, EndpointState::Running, EndpointState::Stopped] {
            assert_eq!(EndpointState::from_u8(state.to_u8()), state);
        }
    }
}
