//! Scripted in-memory socket.

use std::{
    collections::VecDeque,
    io,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    task::{Context, Poll},
};

use async_trait::async_trait;
use bytes::Bytes;
use dbwire::{
    ReceivedFrame,
    socket::{Connector, FrameReader, FrameWriter, SocketHalves},
};
use tokio::sync::{Notify, mpsc};

/// One frame written by the connection under test.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentFrame {
    pub payload: Bytes,
    pub end_of_message: bool,
}

impl SentFrame {
    /// `(payload length, end_of_message)`, handy for asserting framing.
    #[must_use]
    pub fn shape(&self) -> (usize, bool) { (self.payload.len(), self.end_of_message) }
}

enum Inbound {
    Frame(Bytes, bool),
    Close,
    Error(io::ErrorKind),
}

#[derive(Clone, Copy)]
enum ConnectBehaviour {
    Accept,
    Fail(io::ErrorKind),
    Stall,
}

struct ConnectorInner {
    behaviour: Mutex<ConnectBehaviour>,
    addresses: Mutex<Vec<String>>,
    peers_tx: mpsc::UnboundedSender<MockPeer>,
    peers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockPeer>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("mock socket lock poisoned")
}

/// [`Connector`] producing in-memory sockets.
///
/// Clones share state, so a test can keep one clone after handing another
/// to [`dbwire::Connection::builder`].
#[derive(Clone)]
pub struct MockConnector {
    inner: Arc<ConnectorInner>,
}

impl Default for MockConnector {
    fn default() -> Self { Self::new() }
}

impl MockConnector {
    #[must_use]
    pub fn new() -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(ConnectorInner {
                behaviour: Mutex::new(ConnectBehaviour::Accept),
                addresses: Mutex::new(Vec::new()),
                peers_tx,
                peers_rx: tokio::sync::Mutex::new(peers_rx),
            }),
        }
    }

    /// Make subsequent connects fail with `kind`.
    pub fn fail_with(&self, kind: io::ErrorKind) { *lock(&self.inner.behaviour) = ConnectBehaviour::Fail(kind); }

    /// Make subsequent connects never complete.
    pub fn stall(&self) { *lock(&self.inner.behaviour) = ConnectBehaviour::Stall; }

    /// Restore successful connects.
    pub fn accept(&self) { *lock(&self.inner.behaviour) = ConnectBehaviour::Accept; }

    /// Addresses passed to `connect`, in call order.
    #[must_use]
    pub fn addresses(&self) -> Vec<String> { lock(&self.inner.addresses).clone() }

    /// Server side of the next accepted socket.
    ///
    /// Returns `None` only if the connector is gone.
    pub async fn next_peer(&self) -> Option<MockPeer> { self.inner.peers_rx.lock().await.recv().await }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, address: &str) -> io::Result<SocketHalves> {
        lock(&self.inner.addresses).push(address.to_owned());
        let behaviour = *lock(&self.inner.behaviour);
        match behaviour {
            ConnectBehaviour::Accept => {}
            ConnectBehaviour::Fail(kind) => return Err(io::Error::new(kind, "mock connect refused")),
            ConnectBehaviour::Stall => std::future::pending::<()>().await,
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(PeerShared::default());
        let peer = MockPeer {
            tx,
            shared: Arc::clone(&shared),
        };
        let _ = self.inner.peers_tx.send(peer);
        Ok((
            Box::new(MockReader {
                rx,
                pending: VecDeque::new(),
                closed: false,
                shared: Arc::clone(&shared),
            }),
            Box::new(MockWriter { shared }),
        ))
    }
}

#[derive(Default)]
struct PeerShared {
    sent: Mutex<Vec<SentFrame>>,
    sent_notify: Notify,
    receives: AtomicUsize,
    closed: AtomicBool,
    hang_on_close: AtomicBool,
    fail_sends: Mutex<Option<io::ErrorKind>>,
}

/// Server side of a mock socket.
pub struct MockPeer {
    tx: mpsc::UnboundedSender<Inbound>,
    shared: Arc<PeerShared>,
}

impl MockPeer {
    /// Queue one inbound frame.
    ///
    /// A frame larger than the connection's receive block is handed out
    /// across several receives, only the last one flagged end-of-message.
    pub fn push_frame(&self, payload: impl Into<Bytes>, end_of_message: bool) {
        let _ = self.tx.send(Inbound::Frame(payload.into(), end_of_message));
    }

    /// Queue a whole message as a single final frame.
    pub fn push_message(&self, payload: impl Into<Bytes>) { self.push_frame(payload, true); }

    /// Queue the peer's close frame.
    pub fn push_close(&self) { let _ = self.tx.send(Inbound::Close); }

    /// Queue a socket failure.
    pub fn push_error(&self, kind: io::ErrorKind) { let _ = self.tx.send(Inbound::Error(kind)); }

    /// Number of receives that yielded a data frame to the connection.
    #[must_use]
    pub fn receives(&self) -> usize { self.shared.receives.load(Ordering::SeqCst) }

    /// Snapshot of every frame written so far.
    #[must_use]
    pub fn sent(&self) -> Vec<SentFrame> { lock(&self.shared.sent).clone() }

    /// `(length, end_of_message)` of every frame written so far.
    #[must_use]
    pub fn sent_shapes(&self) -> Vec<(usize, bool)> { self.sent().iter().map(SentFrame::shape).collect() }

    /// Written frames regrouped into logical messages.
    #[must_use]
    pub fn sent_messages(&self) -> Vec<Vec<u8>> {
        let mut messages = Vec::new();
        let mut current = Vec::new();
        for frame in lock(&self.shared.sent).iter() {
            current.extend_from_slice(&frame.payload);
            if frame.end_of_message {
                messages.push(std::mem::take(&mut current));
            }
        }
        messages
    }

    /// Wait until at least `count` frames were written.
    pub async fn wait_for_frames(&self, count: usize) {
        loop {
            let notified = self.shared.sent_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if lock(&self.shared.sent).len() >= count {
                return;
            }
            notified.await;
        }
    }

    /// Returns true once the connection sent its close frame.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.shared.closed.load(Ordering::SeqCst) }

    /// Make the close handshake never complete.
    pub fn hang_on_close(&self) { self.shared.hang_on_close.store(true, Ordering::SeqCst); }

    /// Make subsequent sends fail with `kind`.
    pub fn fail_sends(&self, kind: io::ErrorKind) { *lock(&self.shared.fail_sends) = Some(kind); }
}

struct MockReader {
    rx: mpsc::UnboundedReceiver<Inbound>,
    // Remainder of a pushed frame larger than the caller's buffer.
    pending: VecDeque<(Bytes, bool)>,
    closed: bool,
    shared: Arc<PeerShared>,
}

impl FrameReader for MockReader {
    fn poll_receive(
        &mut self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<ReceivedFrame>> {
        if self.pending.is_empty() && !self.closed {
            match self.rx.poll_recv(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Inbound::Frame(payload, eom))) => self.pending.push_back((payload, eom)),
                Poll::Ready(Some(Inbound::Error(kind))) => {
                    return Poll::Ready(Err(io::Error::new(kind, "mock receive failed")));
                }
                Poll::Ready(Some(Inbound::Close) | None) => self.closed = true,
            }
        }
        let Some((mut payload, eom)) = self.pending.pop_front() else {
            return Poll::Ready(Ok(ReceivedFrame::Close));
        };
        let len = payload.len().min(buf.len());
        buf[..len].copy_from_slice(&payload.split_to(len));
        let end_of_message = eom && payload.is_empty();
        if !payload.is_empty() {
            self.pending.push_front((payload, eom));
        }
        self.shared.receives.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Ok(ReceivedFrame::Data {
            len,
            end_of_message,
        }))
    }
}

struct MockWriter {
    shared: Arc<PeerShared>,
}

#[async_trait]
impl FrameWriter for MockWriter {
    async fn send_frame(&mut self, payload: Bytes, end_of_message: bool) -> io::Result<()> {
        let failure = *lock(&self.shared.fail_sends);
        if let Some(kind) = failure {
            return Err(io::Error::new(kind, "mock send failed"));
        }
        // Copied so pooled payload blocks return to the pool.
        lock(&self.shared.sent).push(SentFrame {
            payload: Bytes::copy_from_slice(&payload),
            end_of_message,
        });
        self.shared.sent_notify.notify_waiters();
        // Give concurrent tasks a chance to observe each frame.
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        if self.shared.hang_on_close.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.shared.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
