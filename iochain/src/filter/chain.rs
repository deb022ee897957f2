use super::{Entry, Filter, IoEvent, Links, NextFilter, deliver};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::session::{IdleStatus, IoSession};
use crate::write::WriteRequest;
use log::{trace, warn};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, Weak};

/// Name of the sentinel at the transport end of every chain.
pub const HEAD_NAME: &str = "head";
/// Name of the sentinel at the handler end of every chain.
pub const TAIL_NAME: &str = "tail";

/// The live, per-session chain of filters.
///
/// The chain always starts with a head sentinel that hands outbound requests
/// to the session's [`IoProcessor`](crate::IoProcessor) and ends with a tail
/// sentinel that calls the session's [`IoHandler`](crate::IoHandler). User
/// filters sit strictly between the two.
///
/// Structural changes are serialized by a per-chain lock and publish a new
/// immutable snapshot of the entries. Firing an event never takes that lock;
/// it runs against whichever snapshot was current when it started, so a
/// concurrent `remove` is either fully visible to an event or not at all.
pub struct FilterChain {
    session: Weak<IoSession>,
    links: RwLock<Links>,
    mutation: Mutex<()>,
}

impl FilterChain {
    pub(crate) fn new(session: Weak<IoSession>) -> Self {
        let links = vec![
            Entry {
                name: Arc::from(HEAD_NAME),
                filter: Arc::new(HeadFilter),
            },
            Entry {
                name: Arc::from(TAIL_NAME),
                filter: Arc::new(TailFilter),
            },
        ];
        Self {
            session,
            links: RwLock::new(Arc::new(links)),
            mutation: Mutex::new(()),
        }
    }

    /// The session this chain belongs to, while it is alive.
    pub fn session(&self) -> Option<Arc<IoSession>> {
        self.session.upgrade()
    }

    fn snapshot(&self) -> Links {
        Arc::clone(&self.links.read().unwrap())
    }

    fn install(&self, links: Links) {
        *self.links.write().unwrap() = links;
    }

    /// Position of the user filter called `name`.
    fn position(links: &[Entry], name: &str) -> Option<usize> {
        let last = links.len().saturating_sub(1);
        (1..last).find(|&i| &*links[i].name == name)
    }

    fn check_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::NullArgument("name"));
        }
        if name == HEAD_NAME || name == TAIL_NAME {
            return Err(Error::DuplicateName(name.to_owned()));
        }
        Ok(())
    }

    /// Adds `filter` right after the head, so it sees inbound events first.
    pub fn add_first(&self, name: &str, filter: Arc<dyn Filter>) -> Result<()> {
        self.insert(name, filter, |_| Ok(1))
    }

    /// Adds `filter` right before the tail, so it sees inbound events last.
    pub fn add_last(&self, name: &str, filter: Arc<dyn Filter>) -> Result<()> {
        self.insert(name, filter, |links| Ok(links.len() - 1))
    }

    /// Adds `filter` just before the filter called `base_name`.
    pub fn add_before(&self, base_name: &str, name: &str, filter: Arc<dyn Filter>) -> Result<()> {
        self.insert(name, filter, |links| {
            Self::position(links, base_name).ok_or_else(|| Error::UnknownName(base_name.to_owned()))
        })
    }

    /// Adds `filter` just after the filter called `base_name`.
    pub fn add_after(&self, base_name: &str, name: &str, filter: Arc<dyn Filter>) -> Result<()> {
        self.insert(name, filter, |links| {
            Self::position(links, base_name)
                .map(|i| i + 1)
                .ok_or_else(|| Error::UnknownName(base_name.to_owned()))
        })
    }

    fn insert(
        &self,
        name: &str,
        filter: Arc<dyn Filter>,
        at: impl FnOnce(&[Entry]) -> Result<usize>,
    ) -> Result<()> {
        Self::check_name(name)?;

        let _guard = self.mutation.lock().unwrap();
        let current = self.snapshot();
        if Self::position(&current, name).is_some() {
            return Err(Error::DuplicateName(name.to_owned()));
        }
        let index = at(current.as_slice())?;

        let mut entries = current.to_vec();
        entries.insert(
            index,
            Entry {
                name: Arc::from(name),
                filter: Arc::clone(&filter),
            },
        );
        let updated = Arc::new(entries);
        let next = NextFilter::new(Arc::clone(&updated), index);

        filter
            .on_pre_add(self, name, &next)
            .map_err(|e| lifecycle_error(name, "on_pre_add", e))?;
        self.install(updated);

        if let Err(e) = filter.on_post_add(self, name, &next) {
            self.install(current);
            return Err(lifecycle_error(name, "on_post_add", e));
        }
        trace!("filter {} added at position {}", name, index);
        Ok(())
    }

    /// Removes the filter called `name` and returns it.
    ///
    /// A failing `on_pre_remove` keeps the filter in place. A failing
    /// `on_post_remove` is only logged.
    pub fn remove(&self, name: &str) -> Result<Arc<dyn Filter>> {
        let _guard = self.mutation.lock().unwrap();
        let current = self.snapshot();
        let index =
            Self::position(&current, name).ok_or_else(|| Error::UnknownName(name.to_owned()))?;
        let filter = Arc::clone(&current[index].filter);
        let next = NextFilter::new(Arc::clone(&current), index);

        filter
            .on_pre_remove(self, name, &next)
            .map_err(|e| lifecycle_error(name, "on_pre_remove", e))?;

        let mut entries = current.to_vec();
        entries.remove(index);
        self.install(Arc::new(entries));

        // the filter is already unlinked, so the removal stands
        if let Err(e) = filter.on_post_remove(self, name, &next) {
            warn!("{}", lifecycle_error(name, "on_post_remove", e));
        }
        trace!("filter {} removed", name);
        Ok(filter)
    }

    /// Swaps the filter called `name` for `filter`, keeping its position.
    /// Returns the filter that was replaced.
    pub fn replace(&self, name: &str, filter: Arc<dyn Filter>) -> Result<Arc<dyn Filter>> {
        let _guard = self.mutation.lock().unwrap();
        let current = self.snapshot();
        let index =
            Self::position(&current, name).ok_or_else(|| Error::UnknownName(name.to_owned()))?;

        let mut entries = current.to_vec();
        let old = std::mem::replace(&mut entries[index].filter, Arc::clone(&filter));
        let updated = Arc::new(entries);
        let next = NextFilter::new(Arc::clone(&updated), index);

        filter
            .on_pre_add(self, name, &next)
            .map_err(|e| lifecycle_error(name, "on_pre_add", e))?;
        self.install(updated);

        if let Err(e) = filter.on_post_add(self, name, &next) {
            self.install(current);
            return Err(lifecycle_error(name, "on_post_add", e));
        }
        Ok(old)
    }

    /// Removes every user filter, running their remove hooks in order.
    pub fn clear(&self) -> Result<()> {
        for name in self.names() {
            self.remove(&name)?;
        }
        Ok(())
    }

    /// The filter called `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Filter>> {
        let links = self.snapshot();
        Self::position(&links, name).map(|i| Arc::clone(&links[i].filter))
    }

    /// Returns `true` if a filter called `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        Self::position(&self.snapshot(), name).is_some()
    }

    /// Names of the user filters from head to tail.
    pub fn names(&self) -> Vec<String> {
        let links = self.snapshot();
        links[1..links.len() - 1]
            .iter()
            .map(|e| e.name.to_string())
            .collect()
    }

    /// Number of user filters.
    pub fn len(&self) -> usize {
        self.snapshot().len() - 2
    }

    /// Returns `true` if only the sentinels are present.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The delegator of the filter called `name`, bound to the current
    /// structure. Lets a filter inject events on its own.
    pub fn next_filter(&self, name: &str) -> Option<NextFilter> {
        let links = self.snapshot();
        Self::position(&links, name).map(|i| NextFilter::new(links, i))
    }

    fn fire_from_head(&self, event: IoEvent) {
        if let Some(session) = self.session() {
            deliver(&self.snapshot(), 0, &session, event);
        }
    }

    fn fire_from_tail(&self, event: IoEvent) {
        if let Some(session) = self.session() {
            let links = self.snapshot();
            let tail = links.len() - 1;
            deliver(&links, tail, &session, event);
        }
    }

    /// Fires `session_created`.
    pub fn fire_session_created(&self) {
        self.fire_from_head(IoEvent::SessionCreated);
    }

    /// Fires `session_opened`.
    pub fn fire_session_opened(&self) {
        self.fire_from_head(IoEvent::SessionOpened);
    }

    /// Completes the session's close future, then fires `session_closed`.
    pub fn fire_session_closed(&self) {
        if let Some(session) = self.session() {
            session.close_future().set_closed();
        }
        self.fire_from_head(IoEvent::SessionClosed);
    }

    /// Fires `session_idle`.
    pub fn fire_session_idle(&self, status: IdleStatus) {
        self.fire_from_head(IoEvent::SessionIdle(status));
    }

    /// Fires `exception_caught`.
    pub fn fire_exception_caught(&self, cause: Arc<Error>) {
        self.fire_from_head(IoEvent::ExceptionCaught(cause));
    }

    /// Fires `input_closed`.
    pub fn fire_input_closed(&self) {
        self.fire_from_head(IoEvent::InputClosed);
    }

    /// Accounts the received bytes, then fires `message_received`.
    pub fn fire_message_received(&self, message: Message) {
        if let Some(session) = self.session() {
            let len = message.byte_len();
            if len > 0 {
                session.increase_read_bytes(len as u64, crate::current_time_millis());
            }
        }
        self.fire_from_head(IoEvent::MessageReceived(message));
    }

    /// Marks `request` as written, then fires `message_sent`.
    pub fn fire_message_sent(&self, request: WriteRequest) {
        request.future().set_written();
        self.fire_from_head(IoEvent::MessageSent(request));
    }

    /// Sends a write from the tail towards the transport.
    pub fn fire_filter_write(&self, request: WriteRequest) {
        self.fire_from_tail(IoEvent::Write(request));
    }

    /// Sends a close request from the tail towards the transport.
    pub fn fire_filter_close(&self) {
        self.fire_from_tail(IoEvent::Close);
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("filters", &self.names())
            .finish()
    }
}

fn lifecycle_error(name: &str, method: &'static str, source: Error) -> Error {
    Error::FilterLifecycle {
        name: name.to_owned(),
        method,
        source: Box::new(source),
    }
}

/// Hands outbound requests to the transport.
struct HeadFilter;

impl Filter for HeadFilter {
    fn filter_write(
        &self,
        _next: &NextFilter,
        session: &Arc<IoSession>,
        request: WriteRequest,
    ) -> Result<()> {
        session.enqueue_write_request(request);
        if !session.is_write_suspended() {
            session.processor().flush(session);
        }
        Ok(())
    }

    fn filter_close(&self, _next: &NextFilter, session: &Arc<IoSession>) -> Result<()> {
        session.processor().remove(session);
        Ok(())
    }
}

/// Hands inbound events to the handler.
struct TailFilter;

impl Filter for TailFilter {
    fn session_created(&self, _next: &NextFilter, session: &Arc<IoSession>) -> Result<()> {
        session.handler().session_created(session)
    }

    fn session_opened(&self, _next: &NextFilter, session: &Arc<IoSession>) -> Result<()> {
        session.handler().session_opened(session)
    }

    fn session_closed(&self, _next: &NextFilter, session: &Arc<IoSession>) -> Result<()> {
        let result = session.handler().session_closed(session);
        session.dispose_data_structures();
        if let Err(e) = session.filter_chain().clear() {
            warn!("failed to clear the filter chain of session {}: {}", session.id(), e);
        }
        result
    }

    fn session_idle(
        &self,
        _next: &NextFilter,
        session: &Arc<IoSession>,
        status: IdleStatus,
    ) -> Result<()> {
        session.handler().session_idle(session, status)
    }

    fn exception_caught(
        &self,
        _next: &NextFilter,
        session: &Arc<IoSession>,
        cause: Arc<Error>,
    ) -> Result<()> {
        session.handler().exception_caught(session, cause)
    }

    fn input_closed(&self, _next: &NextFilter, session: &Arc<IoSession>) -> Result<()> {
        session.handler().input_closed(session)
    }

    fn message_received(
        &self,
        _next: &NextFilter,
        session: &Arc<IoSession>,
        message: Message,
    ) -> Result<()> {
        session.increase_read_messages(crate::current_time_millis());
        session.handler().message_received(session, message)
    }

    fn message_sent(
        &self,
        _next: &NextFilter,
        session: &Arc<IoSession>,
        request: WriteRequest,
    ) -> Result<()> {
        session.increase_written_messages(&request, crate::current_time_millis());
        session.handler().message_sent(session, request)
    }
}
