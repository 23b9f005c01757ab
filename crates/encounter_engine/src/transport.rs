//! Transport boundary — the radio capability the engine drives.
//!
//! A [`Transport`] advertises local presence, scans for peers and, on
//! request, runs the two-phase handshake (read the peer's rendezvous
//! parameter, then open a byte-stream channel). Everything it observes is
//! reported as a [`TransportEvent`] through the mpsc sender handed to
//! [`Transport::start`]; the engine's decision loop consumes that channel.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{mpsc, watch};

use crate::address::{DiscoveryEvent, PeerAddress};
use crate::error::{HandshakeError, TransportError};

static NEXT_ATTEMPT: AtomicU64 = AtomicU64::new(1);
static NEXT_CHANNEL: AtomicU64 = AtomicU64::new(1);

/// Identifies one handshake attempt, so late callbacks from an abandoned
/// attempt are never applied to a newer connection to the same address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptId(u64);

impl AttemptId {
    fn next() -> Self {
        Self(NEXT_ATTEMPT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt-{}", self.0)
    }
}

/// Identifies one byte-stream channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    fn next() -> Self {
        Self(NEXT_CHANNEL.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Returned by [`Transport::begin_handshake`]. Cancelling is a signal only;
/// it never waits for the handshake task to notice.
#[derive(Debug, Clone)]
pub struct CancelToken {
    attempt: AttemptId,
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            attempt: AttemptId::next(),
            tx: Arc::new(tx),
        }
    }

    /// The attempt this token controls.
    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ChannelFlags {
    ended: AtomicBool,
    released: AtomicBool,
    closed: AtomicBool,
    read_waker: Mutex<Option<Waker>>,
    write_waker: Mutex<Option<Waker>>,
}

impl ChannelFlags {
    fn park(slot: &Mutex<Option<Waker>>, waker: &Waker) {
        let mut slot = slot.lock();
        if !slot.as_ref().is_some_and(|w| w.will_wake(waker)) {
            *slot = Some(waker.clone());
        }
    }

    fn wake_all(&self) {
        for slot in [&self.read_waker, &self.write_waker] {
            if let Some(waker) = slot.lock().take() {
                waker.wake();
            }
        }
    }
}

/// Non-exclusive handle to a byte-stream channel.
///
/// The engine keeps one of these after the stream itself has been handed to
/// the sink. `ended` is raised by the stream on EOF, error, shutdown or drop;
/// `released` guards the transport-level close so it happens at most once.
/// [`close`](Self::close) cuts the data path: whoever holds the
/// [`ByteStream`] reads EOF and gets `BrokenPipe` on write from then on.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    id: ChannelId,
    flags: Arc<ChannelFlags>,
}

impl ChannelHandle {
    pub fn new() -> Self {
        Self {
            id: ChannelId::next(),
            flags: Arc::new(ChannelFlags::default()),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Whether the stream has stopped carrying data.
    pub fn is_ended(&self) -> bool {
        self.flags.ended.load(Ordering::Acquire)
    }

    pub fn mark_ended(&self) {
        self.flags.ended.store(true, Ordering::Release);
    }

    pub fn is_released(&self) -> bool {
        self.flags.released.load(Ordering::Acquire)
    }

    /// Cut the data path and wake any read or write parked on it.
    pub fn close(&self) {
        self.mark_ended();
        if !self.flags.closed.swap(true, Ordering::AcqRel) {
            self.flags.wake_all();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.flags.closed.load(Ordering::Acquire)
    }

    /// Close the channel and claim the right to release it at the transport.
    /// Returns `true` exactly once.
    pub fn begin_release(&self) -> bool {
        self.close();
        !self.flags.released.swap(true, Ordering::AcqRel)
    }
}

impl Default for ChannelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Any async duplex I/O object a transport can hand out.
pub trait StreamIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> StreamIo for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// A live bidirectional byte stream to one peer.
///
/// Owned by exactly one party at a time: the transport until the handshake
/// completes, then the engine, then the sink.
pub struct ByteStream {
    handle: ChannelHandle,
    io: Box<dyn StreamIo>,
}

impl ByteStream {
    pub fn new(handle: ChannelHandle, io: impl StreamIo + 'static) -> Self {
        Self {
            handle,
            io: Box::new(io),
        }
    }

    pub fn handle(&self) -> &ChannelHandle {
        &self.handle
    }

    pub fn id(&self) -> ChannelId {
        self.handle.id
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream")
            .field("id", &self.handle.id)
            .field("ended", &self.handle.is_ended())
            .finish()
    }
}

impl AsyncRead for ByteStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.handle.is_closed() {
            return Poll::Ready(Ok(()));
        }
        let before = buf.filled().len();
        let asked = buf.remaining() > 0;
        match Pin::new(&mut this.io).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                if asked && buf.filled().len() == before {
                    this.handle.mark_ended();
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => {
                this.handle.mark_ended();
                Poll::Ready(Err(e))
            }
            Poll::Pending => {
                ChannelFlags::park(&this.handle.flags.read_waker, cx.waker());
                // A close that raced the park would otherwise go unnoticed.
                if this.handle.is_closed() {
                    Poll::Ready(Ok(()))
                } else {
                    Poll::Pending
                }
            }
        }
    }
}

impl AsyncWrite for ByteStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.handle.is_closed() {
            return Poll::Ready(Err(channel_closed()));
        }
        match Pin::new(&mut this.io).poll_write(cx, data) {
            Poll::Ready(Err(e)) => {
                this.handle.mark_ended();
                Poll::Ready(Err(e))
            }
            Poll::Pending => {
                ChannelFlags::park(&this.handle.flags.write_waker, cx.waker());
                if this.handle.is_closed() {
                    Poll::Ready(Err(channel_closed()))
                } else {
                    Poll::Pending
                }
            }
            ready => ready,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.handle.is_closed() {
            return Poll::Ready(Err(channel_closed()));
        }
        Pin::new(&mut this.io).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.handle.is_closed() {
            return Poll::Ready(Ok(()));
        }
        let result = Pin::new(&mut this.io).poll_shutdown(cx);
        if result.is_ready() {
            this.handle.mark_ended();
        }
        result
    }
}

fn channel_closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "channel closed")
}

impl Drop for ByteStream {
    fn drop(&mut self) {
        self.handle.mark_ended();
    }
}

// ---------------------------------------------------------------------------
// Events and the transport trait
// ---------------------------------------------------------------------------

/// Why an established channel went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Orderly close by either side.
    Clean,
    /// The link failed.
    Error(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clean => f.write_str("clean"),
            Self::Error(status) => write!(f, "error: {status}"),
        }
    }
}

/// An event reported by the transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A peer advertising our service was seen.
    Discovered(DiscoveryEvent),
    /// Both handshake phases completed; the channel is open.
    HandshakeSucceeded {
        address: PeerAddress,
        attempt: AttemptId,
        channel: ByteStream,
    },
    /// The handshake failed or timed out.
    HandshakeFailed {
        address: PeerAddress,
        attempt: AttemptId,
        reason: HandshakeError,
    },
    /// An open channel went away.
    Disconnected {
        address: PeerAddress,
        channel: ChannelId,
        reason: DisconnectReason,
    },
    /// A remote peer opened a channel to us.
    InboundAccepted {
        address: PeerAddress,
        channel: ByteStream,
    },
}

/// The radio capability driven by the engine.
///
/// Every method must return promptly; handshakes run on the transport's own
/// tasks and report back through the event sender.
pub trait Transport: Send + Sync {
    /// Check that the radio is present, enabled and permitted.
    fn check_available(&self) -> Result<(), TransportError>;

    /// Begin advertising, scanning and accepting inbound channels.
    fn start(&self, events: mpsc::Sender<TransportEvent>) -> Result<(), TransportError>;

    /// Stop advertising, scanning and accepting.
    fn stop(&self);

    /// Start the two-phase handshake with `address`. The outcome arrives
    /// later as `HandshakeSucceeded` or `HandshakeFailed` carrying the
    /// token's attempt id.
    fn begin_handshake(&self, address: &PeerAddress) -> Result<CancelToken, TransportError>;

    /// Close a channel. Must be idempotent.
    fn close_channel(&self, channel: &ChannelHandle) -> Result<(), TransportError>;
}
