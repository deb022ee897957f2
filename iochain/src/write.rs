//! Write requests and the per-session queue the transport drains on flush.

use crate::future::WriteFuture;
use crate::message::Message;
use crate::session::IoSession;
use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

struct Inner {
    message: Message,
    future: WriteFuture,
    destination: Option<SocketAddr>,
    close_request: bool,
}

/// A message on its way to the transport, paired with the future that
/// reports its outcome.
///
/// Cloning is cheap and every clone shares the same future.
#[derive(Clone)]
pub struct WriteRequest {
    inner: Arc<Inner>,
}

impl WriteRequest {
    /// Creates a request with a fresh pending future.
    pub fn new(message: Message) -> Self {
        Self::with_destination(message, None)
    }

    /// Creates a request for a connectionless transport.
    pub fn with_destination(message: Message, destination: Option<SocketAddr>) -> Self {
        Self::with_future(message, WriteFuture::new(), destination)
    }

    /// Creates a request that completes `future`.
    pub fn with_future(
        message: Message,
        future: WriteFuture,
        destination: Option<SocketAddr>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                message,
                future,
                destination,
                close_request: false,
            }),
        }
    }

    /// The marker `close_on_flush` enqueues. Never handed to a transport.
    pub(crate) fn close_request() -> Self {
        Self {
            inner: Arc::new(Inner {
                message: Message::bytes(bytes::Bytes::new()),
                future: WriteFuture::new(),
                destination: None,
                close_request: true,
            }),
        }
    }

    /// Returns a request carrying `message` that completes the same future.
    ///
    /// Encoding filters use this to swap the payload on the way out.
    pub fn with_message(&self, message: Message) -> Self {
        Self {
            inner: Arc::new(Inner {
                message,
                future: self.inner.future.clone(),
                destination: self.inner.destination,
                close_request: self.inner.close_request,
            }),
        }
    }

    /// The payload.
    pub fn message(&self) -> &Message {
        &self.inner.message
    }

    /// The outcome of this write.
    pub fn future(&self) -> &WriteFuture {
        &self.inner.future
    }

    /// Target address for connectionless transports.
    pub fn destination(&self) -> Option<SocketAddr> {
        self.inner.destination
    }

    pub(crate) fn is_close_request(&self) -> bool {
        self.inner.close_request
    }

    /// Returns `true` if both handles refer to the same request.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for WriteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.inner.close_request {
            return f.write_str("WriteRequest(CLOSE)");
        }
        f.debug_struct("WriteRequest")
            .field("message", &self.inner.message)
            .field("destination", &self.inner.destination)
            .finish()
    }
}

/// FIFO storage of pending writes, owned by one session.
///
/// Implementations must be safe to call from the application thread that
/// writes and the transport thread that flushes at the same time.
pub trait WriteRequestQueue: Send + Sync {
    /// Appends a request.
    fn offer(&self, session: &IoSession, request: WriteRequest);

    /// Removes and returns the oldest request.
    fn poll(&self, session: &IoSession) -> Option<WriteRequest>;

    /// Returns `true` if nothing is queued.
    fn is_empty(&self, session: &IoSession) -> bool;

    /// Number of queued requests.
    fn len(&self, session: &IoSession) -> usize;

    /// Drops every queued request.
    fn clear(&self, session: &IoSession);

    /// Releases resources once the session is closed.
    fn dispose(&self, _session: &IoSession) {}
}

/// The default in-memory queue.
#[derive(Default)]
pub struct DefaultWriteRequestQueue {
    queue: Mutex<VecDeque<WriteRequest>>,
}

impl DefaultWriteRequestQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }
}

impl WriteRequestQueue for DefaultWriteRequestQueue {
    fn offer(&self, _session: &IoSession, request: WriteRequest) {
        self.queue.lock().unwrap().push_back(request);
    }

    fn poll(&self, _session: &IoSession) -> Option<WriteRequest> {
        self.queue.lock().unwrap().pop_front()
    }

    fn is_empty(&self, _session: &IoSession) -> bool {
        self.queue.lock().unwrap().is_empty()
    }

    fn len(&self, _session: &IoSession) -> usize {
        self.queue.lock().unwrap().len()
    }

    fn clear(&self, _session: &IoSession) {
        self.queue.lock().unwrap().clear();
    }
}

impl fmt::Debug for DefaultWriteRequestQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.queue.lock().map(|q| q.len()).unwrap_or(0);
        f.debug_struct("DefaultWriteRequestQueue")
            .field("len", &len)
            .finish()
    }
}
