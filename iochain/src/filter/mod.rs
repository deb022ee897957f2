//! Filters and the delegators that connect them.
//!
//! A [`Filter`] sees every event on its way through a session's
//! [`FilterChain`]. Inbound events travel from the head towards the
//! [`IoHandler`](crate::IoHandler) at the tail; outbound requests
//! (`filter_write`, `filter_close`) travel from the tail back to the head,
//! where they are handed to the transport.
//!
//! ```text
//!                  IoHandler
//!                     /|\  |  write() / close_now()
//!   +------------------+---+-------------------+
//!   |  tail            |  \|/                  |
//!   |  filter N     message_received   filter_write
//!   |   ...           /|\   |                  |
//!   |  filter 1        |   \|/                 |
//!   |  head            |    |                  |
//!   +------------------+----+------------------+
//!                      |   \|/
//!                IoProcessor (transport)
//! ```
//!
//! A filter forwards an event by calling the matching method on the
//! [`NextFilter`] it is given. Not forwarding vetoes the event.

mod builder;
mod chain;
mod executor;
mod logging;

pub use builder::FilterChainBuilder;
pub use chain::{FilterChain, HEAD_NAME, TAIL_NAME};
pub use executor::{DEFAULT_EVENT_TYPES, ExecutorFilter};
pub use logging::LoggingFilter;

use crate::error::{Error, Result};
use crate::message::Message;
use crate::session::{IdleStatus, IoSession};
use crate::write::WriteRequest;
use log::warn;
use std::fmt;
use std::sync::Arc;

/// An interceptor registered under a name in a filter chain.
///
/// Event methods forward to `next` by default. Returning an error from any
/// of them reroutes the error into `exception_caught` from the head of the
/// chain. Errors returned from `exception_caught` itself are logged and
/// dropped. A failing `filter_write` also fails the request's future.
///
/// The lifecycle hooks run while the chain's structure is locked; they may
/// inspect the chain and its session but must not add or remove filters on
/// the same chain.
pub trait Filter: Send + Sync {
    /// Called before the filter is linked into `chain` under `name`.
    fn on_pre_add(&self, _chain: &FilterChain, _name: &str, _next: &NextFilter) -> Result<()> {
        Ok(())
    }

    /// Called after the filter has been linked.
    fn on_post_add(&self, _chain: &FilterChain, _name: &str, _next: &NextFilter) -> Result<()> {
        Ok(())
    }

    /// Called before the filter is unlinked.
    fn on_pre_remove(&self, _chain: &FilterChain, _name: &str, _next: &NextFilter) -> Result<()> {
        Ok(())
    }

    /// Called after the filter has been unlinked. An error here is logged
    /// and does not undo the removal.
    fn on_post_remove(&self, _chain: &FilterChain, _name: &str, _next: &NextFilter) -> Result<()> {
        Ok(())
    }

    /// Filters `session_created`.
    fn session_created(&self, next: &NextFilter, session: &Arc<IoSession>) -> Result<()> {
        next.session_created(session);
        Ok(())
    }

    /// Filters `session_opened`.
    fn session_opened(&self, next: &NextFilter, session: &Arc<IoSession>) -> Result<()> {
        next.session_opened(session);
        Ok(())
    }

    /// Filters `session_closed`.
    fn session_closed(&self, next: &NextFilter, session: &Arc<IoSession>) -> Result<()> {
        next.session_closed(session);
        Ok(())
    }

    /// Filters `session_idle`.
    fn session_idle(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        status: IdleStatus,
    ) -> Result<()> {
        next.session_idle(session, status);
        Ok(())
    }

    /// Filters `exception_caught`.
    fn exception_caught(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        cause: Arc<Error>,
    ) -> Result<()> {
        next.exception_caught(session, cause);
        Ok(())
    }

    /// Filters `input_closed`.
    fn input_closed(&self, next: &NextFilter, session: &Arc<IoSession>) -> Result<()> {
        next.input_closed(session);
        Ok(())
    }

    /// Filters `message_received`.
    fn message_received(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        message: Message,
    ) -> Result<()> {
        next.message_received(session, message);
        Ok(())
    }

    /// Filters `message_sent`.
    fn message_sent(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        request: WriteRequest,
    ) -> Result<()> {
        next.message_sent(session, request);
        Ok(())
    }

    /// Filters an outbound write.
    fn filter_write(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        request: WriteRequest,
    ) -> Result<()> {
        next.filter_write(session, request);
        Ok(())
    }

    /// Filters an outbound close request.
    fn filter_close(&self, next: &NextFilter, session: &Arc<IoSession>) -> Result<()> {
        next.filter_close(session);
        Ok(())
    }
}

/// The kinds of event a chain carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IoEventType {
    /// `session_created`
    SessionCreated,
    /// `session_opened`
    SessionOpened,
    /// `session_closed`
    SessionClosed,
    /// `session_idle`
    SessionIdle,
    /// `exception_caught`
    ExceptionCaught,
    /// `input_closed`
    InputClosed,
    /// `message_received`
    MessageReceived,
    /// `message_sent`
    MessageSent,
    /// `filter_write`
    Write,
    /// `filter_close`
    Close,
}

impl IoEventType {
    /// Every event kind.
    pub const ALL: [IoEventType; 10] = [
        IoEventType::SessionCreated,
        IoEventType::SessionOpened,
        IoEventType::SessionClosed,
        IoEventType::SessionIdle,
        IoEventType::ExceptionCaught,
        IoEventType::InputClosed,
        IoEventType::MessageReceived,
        IoEventType::MessageSent,
        IoEventType::Write,
        IoEventType::Close,
    ];

    /// Returns `true` for events that travel from the head to the tail.
    pub fn is_inbound(self) -> bool {
        !matches!(self, IoEventType::Write | IoEventType::Close)
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for IoEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IoEventType::SessionCreated => "SESSION_CREATED",
            IoEventType::SessionOpened => "SESSION_OPENED",
            IoEventType::SessionClosed => "SESSION_CLOSED",
            IoEventType::SessionIdle => "SESSION_IDLE",
            IoEventType::ExceptionCaught => "EXCEPTION_CAUGHT",
            IoEventType::InputClosed => "INPUT_CLOSED",
            IoEventType::MessageReceived => "MESSAGE_RECEIVED",
            IoEventType::MessageSent => "MESSAGE_SENT",
            IoEventType::Write => "WRITE",
            IoEventType::Close => "CLOSE",
        })
    }
}

/// An event captured as a value so it can be delivered later, possibly on
/// another thread.
#[derive(Clone, Debug)]
pub enum IoEvent {
    /// `session_created`
    SessionCreated,
    /// `session_opened`
    SessionOpened,
    /// `session_closed`
    SessionClosed,
    /// `session_idle`
    SessionIdle(IdleStatus),
    /// `exception_caught`
    ExceptionCaught(Arc<Error>),
    /// `input_closed`
    InputClosed,
    /// `message_received`
    MessageReceived(Message),
    /// `message_sent`
    MessageSent(WriteRequest),
    /// `filter_write`
    Write(WriteRequest),
    /// `filter_close`
    Close,
}

impl IoEvent {
    /// The kind of this event.
    pub fn event_type(&self) -> IoEventType {
        match self {
            IoEvent::SessionCreated => IoEventType::SessionCreated,
            IoEvent::SessionOpened => IoEventType::SessionOpened,
            IoEvent::SessionClosed => IoEventType::SessionClosed,
            IoEvent::SessionIdle(_) => IoEventType::SessionIdle,
            IoEvent::ExceptionCaught(_) => IoEventType::ExceptionCaught,
            IoEvent::InputClosed => IoEventType::InputClosed,
            IoEvent::MessageReceived(_) => IoEventType::MessageReceived,
            IoEvent::MessageSent(_) => IoEventType::MessageSent,
            IoEvent::Write(_) => IoEventType::Write,
            IoEvent::Close => IoEventType::Close,
        }
    }

    /// Passes the event on through `next` in its natural direction.
    pub fn fire(self, next: &NextFilter, session: &Arc<IoSession>) {
        if self.event_type().is_inbound() {
            next.deliver_inbound(session, self);
        } else {
            next.deliver_outbound(session, self);
        }
    }
}

#[derive(Clone)]
pub(crate) struct Entry {
    pub(crate) name: Arc<str>,
    pub(crate) filter: Arc<dyn Filter>,
}

pub(crate) type Links = Arc<Vec<Entry>>;

/// The delegator a filter uses to pass an event to its neighbour.
///
/// A `NextFilter` is bound to the chain structure that existed when it was
/// created. Filters added or removed afterwards do not affect an event that
/// is already travelling through it.
#[derive(Clone)]
pub struct NextFilter {
    links: Links,
    index: usize,
}

impl NextFilter {
    pub(crate) fn new(links: Links, index: usize) -> Self {
        Self { links, index }
    }

    /// Name of the filter this delegator belongs to.
    pub fn name(&self) -> &str {
        self.links.get(self.index).map(|e| &*e.name).unwrap_or("")
    }

    /// Forwards `session_created`.
    pub fn session_created(&self, session: &Arc<IoSession>) {
        self.deliver_inbound(session, IoEvent::SessionCreated);
    }

    /// Forwards `session_opened`.
    pub fn session_opened(&self, session: &Arc<IoSession>) {
        self.deliver_inbound(session, IoEvent::SessionOpened);
    }

    /// Forwards `session_closed`.
    pub fn session_closed(&self, session: &Arc<IoSession>) {
        self.deliver_inbound(session, IoEvent::SessionClosed);
    }

    /// Forwards `session_idle`.
    pub fn session_idle(&self, session: &Arc<IoSession>, status: IdleStatus) {
        self.deliver_inbound(session, IoEvent::SessionIdle(status));
    }

    /// Forwards `exception_caught`.
    pub fn exception_caught(&self, session: &Arc<IoSession>, cause: Arc<Error>) {
        self.deliver_inbound(session, IoEvent::ExceptionCaught(cause));
    }

    /// Forwards `input_closed`.
    pub fn input_closed(&self, session: &Arc<IoSession>) {
        self.deliver_inbound(session, IoEvent::InputClosed);
    }

    /// Forwards `message_received`.
    pub fn message_received(&self, session: &Arc<IoSession>, message: Message) {
        self.deliver_inbound(session, IoEvent::MessageReceived(message));
    }

    /// Forwards `message_sent`.
    pub fn message_sent(&self, session: &Arc<IoSession>, request: WriteRequest) {
        self.deliver_inbound(session, IoEvent::MessageSent(request));
    }

    /// Forwards a write towards the transport.
    pub fn filter_write(&self, session: &Arc<IoSession>, request: WriteRequest) {
        self.deliver_outbound(session, IoEvent::Write(request));
    }

    /// Forwards a close request towards the transport.
    pub fn filter_close(&self, session: &Arc<IoSession>) {
        self.deliver_outbound(session, IoEvent::Close);
    }

    fn deliver_inbound(&self, session: &Arc<IoSession>, event: IoEvent) {
        deliver(&self.links, self.index + 1, session, event);
    }

    fn deliver_outbound(&self, session: &Arc<IoSession>, event: IoEvent) {
        if let Some(index) = self.index.checked_sub(1) {
            deliver(&self.links, index, session, event);
        }
    }
}

impl fmt::Debug for NextFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NextFilter")
            .field("name", &self.name())
            .field("index", &self.index)
            .finish()
    }
}

/// Invokes the filter at `index` with `event`.
///
/// Errors from any event but `exception_caught` are turned into an
/// `exception_caught` event that starts again from the head.
pub(crate) fn deliver(links: &Links, index: usize, session: &Arc<IoSession>, event: IoEvent) {
    let Some(entry) = links.get(index) else {
        return;
    };
    let next = NextFilter::new(Arc::clone(links), index);
    let filter = &entry.filter;

    let result = match event {
        IoEvent::SessionCreated => filter.session_created(&next, session),
        IoEvent::SessionOpened => filter.session_opened(&next, session),
        IoEvent::SessionClosed => filter.session_closed(&next, session),
        IoEvent::SessionIdle(status) => filter.session_idle(&next, session, status),
        IoEvent::InputClosed => filter.input_closed(&next, session),
        IoEvent::MessageReceived(message) => filter.message_received(&next, session, message),
        IoEvent::MessageSent(request) => filter.message_sent(&next, session, request),
        IoEvent::Close => filter.filter_close(&next, session),
        IoEvent::ExceptionCaught(cause) => {
            if let Err(err) = filter.exception_caught(&next, session, cause) {
                warn!(
                    "filter {} failed while handling an exception on session {}: {}",
                    entry.name,
                    session.id(),
                    err
                );
            }
            return;
        }
        IoEvent::Write(request) => {
            if let Err(err) = filter.filter_write(&next, session, request.clone()) {
                let cause = Arc::new(err);
                request.future().set_exception(Arc::clone(&cause));
                deliver(links, 0, session, IoEvent::ExceptionCaught(cause));
            }
            return;
        }
    };

    if let Err(err) = result {
        deliver(links, 0, session, IoEvent::ExceptionCaught(Arc::new(err)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_write_and_close_are_outbound() {
        let outbound: Vec<_> = IoEventType::ALL
            .iter()
            .filter(|t| !t.is_inbound())
            .collect();
        assert_eq!(outbound, vec![&IoEventType::Write, &IoEventType::Close]);
    }

    #[test]
    fn event_reports_its_type() {
        let event = IoEvent::SessionIdle(IdleStatus::ReaderIdle);
        assert_eq!(event.event_type(), IoEventType::SessionIdle);
        assert_eq!(IoEvent::Close.event_type().to_string(), "CLOSE");
    }

    #[test]
    fn type_indices_are_dense() {
        for (i, t) in IoEventType::ALL.iter().enumerate() {
            assert_eq!(t.index(), i);
        }
    }
}
