//! The transport seam: what a session asks of the I/O layer beneath it.

use crate::session::IoSession;
use log::trace;
use std::sync::atomic::{AtomicBool, Ordering};

/// Transport-side operations a session relies on.
///
/// The engine never touches sockets; it only asks the processor to flush the
/// write queue, to apply a changed suspend state, or to tear a session down.
pub trait IoProcessor: Send + Sync {
    /// Writes out as much of the session's queue as possible. Implementations
    /// drain it with [`IoSession::poll_write_request`] and report progress
    /// with [`IoSession::increase_written_bytes`] and
    /// `filter_chain().fire_message_sent(..)`.
    fn flush(&self, session: &IoSession);

    /// Applies the session's read/write suspend flags.
    fn update_traffic_control(&self, session: &IoSession);

    /// Releases transport resources and confirms teardown with
    /// [`IoSession::destroy`].
    fn remove(&self, session: &IoSession);

    /// Releases processor-wide resources.
    fn dispose(&self) {}

    /// Returns `true` once [`IoProcessor::dispose`] was called.
    fn is_disposed(&self) -> bool {
        false
    }
}

/// An in-process processor whose writes complete immediately.
///
/// Each flushed request is reported fully written and `message_sent` is fired
/// on the calling thread. Removing a session destroys it synchronously.
#[derive(Debug, Default)]
pub struct DummyProcessor {
    disposed: AtomicBool,
}

impl DummyProcessor {
    /// Creates a processor.
    pub fn new() -> Self {
        Self::default()
    }
}

impl IoProcessor for DummyProcessor {
    fn flush(&self, session: &IoSession) {
        if session.is_write_suspended() {
            return;
        }
        while let Some(request) = session.poll_write_request() {
            let now = crate::current_time_millis();
            session.set_current_write_request(Some(request.clone()), now);
            let len = request.message().byte_len() as u64;
            trace!("session {} flushed {} bytes", session.id(), len);
            session.increase_written_bytes(len, now);
            session.set_current_write_request(None, now);
            session.filter_chain().fire_message_sent(request);
        }
    }

    fn update_traffic_control(&self, session: &IoSession) {
        if !session.is_write_suspended() {
            self.flush(session);
        }
    }

    fn remove(&self, session: &IoSession) {
        session.destroy();
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}
