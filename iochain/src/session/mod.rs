//! Sessions: one logical connection with its chain, queue, counters and
//! lifecycle.

mod attribute;
mod config;
mod id;
mod idle;

pub use attribute::{
    AttributeMap, AttributeValue, DefaultAttributeMap, DefaultSessionDataStructureFactory,
    SessionDataStructureFactory,
};
pub use config::{
    DEFAULT_MAX_READ_BUFFER_SIZE, DEFAULT_MIN_READ_BUFFER_SIZE, DEFAULT_READ_BUFFER_SIZE,
    DEFAULT_THROUGHPUT_CALCULATION_INTERVAL, DEFAULT_WRITE_TIMEOUT, SessionConfig, TransportConfig,
};
pub use id::SessionIdGenerator;
pub use idle::{IdleStatus, notify_idle_session, notify_write_timeout};

pub(crate) use idle::{IdleCounters, is_idle};

use crate::error::{Error, Result};
use crate::filter::FilterChain;
use crate::future::{CloseFuture, WriteFuture};
use crate::handler::IoHandler;
use crate::message::Message;
use crate::processor::IoProcessor;
use crate::service::{IoService, TransportMetadata};
use crate::statistics::{Throughput, TrafficStatistics};
use crate::write::{WriteRequest, WriteRequestQueue};
use log::debug;
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

/// Where a session is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Constructed but not yet registered with its service.
    Created,
    /// Registered and open for I/O.
    Connected,
    /// A close was requested and teardown is under way.
    Closing,
    /// Teardown is complete.
    Closed,
}

/// One logical connection.
///
/// A session is created by its [`IoService`] when a transport accepts or
/// opens a connection and is always handled through an `Arc`. Events reach
/// the application through the session's [`FilterChain`]; writes and closes
/// travel back through the same chain to the [`IoProcessor`].
///
/// Two sessions are equal when their ids are equal.
pub struct IoSession {
    id: u64,
    service: Arc<IoService>,
    handler: Arc<dyn IoHandler>,
    processor: Arc<dyn IoProcessor>,
    config: RwLock<SessionConfig>,
    chain: FilterChain,

    local_address: Option<SocketAddr>,
    remote_address: Option<SocketAddr>,
    creation_time: u64,

    statistics: TrafficStatistics,
    idle: IdleCounters,

    attributes: OnceLock<Box<dyn AttributeMap>>,
    write_queue: OnceLock<Box<dyn WriteRequestQueue>>,
    current_write_request: Mutex<Option<(WriteRequest, u64)>>,

    close_future: CloseFuture,
    closing: AtomicBool,
    registered: AtomicBool,
    read_suspended: AtomicBool,
    write_suspended: AtomicBool,
}

impl IoSession {
    /// Builds a session, attaches its data structures and its filters.
    ///
    /// The session is not registered yet; that is the service's job.
    pub(crate) fn new(
        service: &Arc<IoService>,
        handler: Arc<dyn IoHandler>,
        processor: Arc<dyn IoProcessor>,
        config: SessionConfig,
        local_address: Option<SocketAddr>,
        remote_address: Option<SocketAddr>,
    ) -> Result<Arc<IoSession>> {
        let now = crate::current_time_millis();
        let id = service.id_generator().next_id();

        let session = Arc::new_cyclic(|weak| IoSession {
            id,
            service: Arc::clone(service),
            handler,
            processor,
            config: RwLock::new(config),
            chain: FilterChain::new(weak.clone()),
            local_address,
            remote_address,
            creation_time: now,
            statistics: TrafficStatistics::new(now),
            idle: IdleCounters::default(),
            attributes: OnceLock::new(),
            write_queue: OnceLock::new(),
            current_write_request: Mutex::new(None),
            close_future: CloseFuture::new(),
            closing: AtomicBool::new(false),
            registered: AtomicBool::new(false),
            read_suspended: AtomicBool::new(false),
            write_suspended: AtomicBool::new(false),
        });

        let factory = service.data_structure_factory();
        let attributes = factory.attribute_map(&session)?;
        let write_queue = factory.write_request_queue(&session)?;
        let _ = session.attributes.set(attributes);
        let _ = session.write_queue.set(write_queue);

        let weak = Arc::downgrade(&session);
        session.close_future.add_listener(move || {
            if let Some(session) = weak.upgrade() {
                session.reset_after_close();
            }
        });

        service.filter_chain().build_filter_chain(&session.chain)?;
        Ok(session)
    }

    /// Unique id of this session.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The service that owns this session.
    pub fn service(&self) -> &Arc<IoService> {
        &self.service
    }

    /// The handler at the end of this session's chain.
    pub fn handler(&self) -> &Arc<dyn IoHandler> {
        &self.handler
    }

    /// The transport processor serving this session.
    pub fn processor(&self) -> &Arc<dyn IoProcessor> {
        &self.processor
    }

    /// This session's own filter chain.
    pub fn filter_chain(&self) -> &FilterChain {
        &self.chain
    }

    /// A copy of the current configuration.
    pub fn config(&self) -> SessionConfig {
        self.config.read().unwrap().clone()
    }

    /// Modifies the configuration in place.
    pub fn update_config(&self, update: impl FnOnce(&mut SessionConfig)) {
        update(&mut self.config.write().unwrap());
    }

    /// Metadata of the transport this session runs on.
    pub fn transport_metadata(&self) -> &TransportMetadata {
        self.service.transport_metadata()
    }

    /// Local socket address, if the transport has one.
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.local_address
    }

    /// Remote socket address, if the transport has one.
    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.remote_address
    }

    /// Time this session was created, in milliseconds since the Unix epoch.
    pub fn creation_time(&self) -> u64 {
        self.creation_time
    }

    /// The current lifecycle state.
    pub fn state(&self) -> SessionState {
        if self.close_future.is_closed() {
            SessionState::Closed
        } else if self.closing.load(Ordering::SeqCst) {
            SessionState::Closing
        } else if self.registered.load(Ordering::SeqCst) {
            SessionState::Connected
        } else {
            SessionState::Created
        }
    }

    /// Returns `true` while registered and not yet closed.
    pub fn is_connected(&self) -> bool {
        self.registered.load(Ordering::SeqCst) && !self.close_future.is_closed()
    }

    /// Returns `true` while connected and no close was requested.
    pub fn is_active(&self) -> bool {
        self.is_connected() && !self.is_closing()
    }

    /// Returns `true` once a close was requested.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst) || self.close_future.is_closed()
    }

    pub(crate) fn mark_registered(&self) {
        self.registered.store(true, Ordering::SeqCst);
    }

    /// The future completed when this session is closed.
    pub fn close_future(&self) -> &CloseFuture {
        &self.close_future
    }

    /// Writes `message` through the filter chain.
    ///
    /// On a closing or closed session the returned future has already failed
    /// with [`Error::WriteToClosedSession`], and the same error is fired as
    /// `exception_caught`.
    pub fn write(&self, message: impl Into<Message>) -> WriteFuture {
        self.write_to(message, None)
    }

    /// Writes `message` to `destination` on a connectionless transport.
    pub fn write_to(
        &self,
        message: impl Into<Message>,
        destination: Option<SocketAddr>,
    ) -> WriteFuture {
        if self.is_closing() || !self.is_connected() {
            debug!("write on closed session {} rejected", self.id);
            let cause = Arc::new(Error::WriteToClosedSession {
                session_id: self.id,
                requests: 1,
            });
            let future = WriteFuture::new_not_written(Arc::clone(&cause));
            self.chain.fire_exception_caught(cause);
            return future;
        }

        let request = WriteRequest::with_destination(message.into(), destination);
        let future = request.future().clone();
        self.chain.fire_filter_write(request);
        future
    }

    /// Closes the session immediately, dropping queued writes.
    ///
    /// Only the first call starts the close; every call returns the same
    /// future.
    pub fn close_now(&self) -> CloseFuture {
        if self.closing.swap(true, Ordering::SeqCst) {
            return self.close_future.clone();
        }
        debug!("closing session {}", self.id);
        self.chain.fire_filter_close();
        self.close_future.clone()
    }

    /// Closes the session once every write queued so far has been flushed.
    pub fn close_on_flush(&self) -> CloseFuture {
        if self.is_closing() {
            return self.close_future.clone();
        }
        match self.write_queue.get() {
            Some(queue) => {
                queue.offer(self, WriteRequest::close_request());
                self.processor.flush(self);
                self.close_future.clone()
            }
            None => self.close_now(),
        }
    }

    /// Stops reading from the transport.
    pub fn suspend_read(&self) {
        self.read_suspended.store(true, Ordering::SeqCst);
        self.update_traffic_control();
    }

    /// Stops flushing writes to the transport.
    pub fn suspend_write(&self) {
        self.write_suspended.store(true, Ordering::SeqCst);
        self.update_traffic_control();
    }

    /// Resumes reading from the transport.
    pub fn resume_read(&self) {
        self.read_suspended.store(false, Ordering::SeqCst);
        self.update_traffic_control();
    }

    /// Resumes flushing writes to the transport.
    pub fn resume_write(&self) {
        self.write_suspended.store(false, Ordering::SeqCst);
        self.update_traffic_control();
    }

    fn update_traffic_control(&self) {
        if self.is_active() {
            self.processor.update_traffic_control(self);
        }
    }

    /// Returns `true` while reads are suspended.
    pub fn is_read_suspended(&self) -> bool {
        self.read_suspended.load(Ordering::SeqCst)
    }

    /// Returns `true` while writes are suspended.
    pub fn is_write_suspended(&self) -> bool {
        self.write_suspended.load(Ordering::SeqCst)
    }

    fn attribute_map(&self) -> Option<&dyn AttributeMap> {
        self.attributes.get().map(|m| m.as_ref())
    }

    /// The attribute stored under `key`, if it has type `T`.
    pub fn attribute<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.attribute_map()?.get(key)?.downcast::<T>().ok()
    }

    /// Stores `value` under `key` and returns the previous value.
    pub fn set_attribute<T: Any + Send + Sync>(&self, key: &str, value: T) -> Option<AttributeValue> {
        self.attribute_map()?.set(key, Arc::new(value))
    }

    /// Stores `value` under `key` unless present; returns the existing value.
    pub fn set_attribute_if_absent<T: Any + Send + Sync>(
        &self,
        key: &str,
        value: T,
    ) -> Option<AttributeValue> {
        self.attribute_map()?.set_if_absent(key, Arc::new(value))
    }

    /// Removes the attribute stored under `key`.
    pub fn remove_attribute(&self, key: &str) -> Option<AttributeValue> {
        self.attribute_map()?.remove(key)
    }

    /// Returns `true` if an attribute is stored under `key`.
    pub fn contains_attribute(&self, key: &str) -> bool {
        self.attribute_map().is_some_and(|m| m.contains(key))
    }

    /// Keys of all attributes.
    pub fn attribute_keys(&self) -> Vec<String> {
        self.attribute_map().map(|m| m.keys()).unwrap_or_default()
    }

    /// Traffic counters of this session.
    pub fn statistics(&self) -> &TrafficStatistics {
        &self.statistics
    }

    /// Total bytes read.
    pub fn read_bytes(&self) -> u64 {
        self.statistics.read_bytes()
    }

    /// Total bytes written.
    pub fn written_bytes(&self) -> u64 {
        self.statistics.written_bytes()
    }

    /// Total messages read.
    pub fn read_messages(&self) -> u64 {
        self.statistics.read_messages()
    }

    /// Total messages written.
    pub fn written_messages(&self) -> u64 {
        self.statistics.written_messages()
    }

    /// Time of the last read.
    pub fn last_read_time(&self) -> u64 {
        self.statistics.last_read_time()
    }

    /// Time of the last write.
    pub fn last_write_time(&self) -> u64 {
        self.statistics.last_write_time()
    }

    /// Time of the last read or write.
    pub fn last_io_time(&self) -> u64 {
        self.statistics.last_io_time()
    }

    /// Bytes accepted for writing but not yet written.
    pub fn scheduled_write_bytes(&self) -> i64 {
        self.statistics.scheduled_write_bytes()
    }

    /// Messages accepted for writing but not yet written.
    pub fn scheduled_write_messages(&self) -> i64 {
        self.statistics.scheduled_write_messages()
    }

    /// The most recent throughput snapshot.
    pub fn throughput(&self) -> Throughput {
        self.statistics.throughput()
    }

    /// Highest throughput ever observed on this session.
    pub fn largest_throughput(&self) -> Throughput {
        self.statistics.largest_throughput()
    }

    /// Recomputes throughput if the configured interval elapsed, or
    /// unconditionally when `force` is set.
    pub fn update_throughput(&self, now: u64, force: bool) -> bool {
        let interval = self.config.read().unwrap().throughput_calculation_interval_millis();
        self.statistics.update_throughput(now, interval, force)
    }

    /// Records `increment` bytes read at `now`. Called by transports.
    pub fn increase_read_bytes(&self, increment: u64, now: u64) {
        if increment == 0 {
            return;
        }
        self.statistics.record_read_bytes(increment, now);
        self.reset_read_idle();
        self.service.record_read_bytes(increment, now);
    }

    /// Records one message read at `now`.
    pub fn increase_read_messages(&self, now: u64) {
        self.statistics.record_read_message(now);
        self.reset_read_idle();
        self.service.record_read_message(now);
    }

    /// Records `increment` bytes written at `now`. Called by transports,
    /// possibly several times per request for partial writes.
    pub fn increase_written_bytes(&self, increment: u64, now: u64) {
        if increment == 0 {
            return;
        }
        self.statistics.record_written_bytes(increment, now);
        self.reset_write_idle();
        self.service.record_written_bytes(increment, now);
        self.add_scheduled_write_bytes(-(increment as i64));
    }

    /// Records that `request` was fully written at `now`.
    pub fn increase_written_messages(&self, request: &WriteRequest, now: u64) {
        if request.is_close_request() {
            return;
        }
        self.statistics.record_written_message(now);
        self.reset_write_idle();
        self.service.record_written_message(now);
        self.add_scheduled_write_messages(-1);
    }

    fn add_scheduled_write_bytes(&self, delta: i64) {
        self.statistics.add_scheduled_write_bytes(delta);
        self.service.statistics().add_scheduled_write_bytes(delta);
    }

    fn add_scheduled_write_messages(&self, delta: i64) {
        self.statistics.add_scheduled_write_messages(delta);
        self.service.statistics().add_scheduled_write_messages(delta);
    }

    fn reset_read_idle(&self) {
        self.idle.reset(IdleStatus::ReaderIdle);
        self.idle.reset(IdleStatus::BothIdle);
    }

    fn reset_write_idle(&self) {
        self.idle.reset(IdleStatus::WriterIdle);
        self.idle.reset(IdleStatus::BothIdle);
    }

    /// Consecutive idle events of `status` since the last matching activity.
    pub fn idle_count(&self, status: IdleStatus) -> u32 {
        self.idle.count(status)
    }

    /// Time of the last idle event of `status`, `0` if none.
    pub fn last_idle_time(&self, status: IdleStatus) -> u64 {
        self.idle.last_idle_time(status)
    }

    /// Returns `true` if the last idle check found `status` idle.
    pub fn is_idle(&self, status: IdleStatus) -> bool {
        self.idle.count(status) > 0
    }

    /// Records an idle event of `status` at `now`.
    pub fn increase_idle_count(&self, status: IdleStatus, now: u64) {
        self.idle.increase(status, now);
    }

    /// Accounts a write that reached the head of the chain and queues it.
    pub(crate) fn enqueue_write_request(&self, request: WriteRequest) {
        let len = request.message().byte_len();
        if len > 0 {
            self.add_scheduled_write_bytes(len as i64);
        }
        self.add_scheduled_write_messages(1);
        match self.write_queue.get() {
            Some(queue) => queue.offer(self, request),
            None => {
                request.future().set_exception(Arc::new(Error::WriteToClosedSession {
                    session_id: self.id,
                    requests: 1,
                }));
            }
        }
    }

    /// Takes the next request for the transport to write.
    ///
    /// When the marker queued by [`IoSession::close_on_flush`] comes up, the
    /// session is closed, the queue disposed and `None` returned.
    pub fn poll_write_request(&self) -> Option<WriteRequest> {
        let queue = self.write_queue.get()?;
        let request = queue.poll(self)?;
        if request.is_close_request() {
            self.close_now();
            queue.dispose(self);
            return None;
        }
        Some(request)
    }

    /// Returns `true` if no writes are queued.
    pub fn is_write_queue_empty(&self) -> bool {
        self.write_queue.get().is_none_or(|q| q.is_empty(self))
    }

    /// Number of queued writes.
    pub fn write_queue_len(&self) -> usize {
        self.write_queue.get().map_or(0, |q| q.len(self))
    }

    /// The request the transport is currently writing.
    pub fn current_write_request(&self) -> Option<WriteRequest> {
        self.current_write_request
            .lock()
            .unwrap()
            .as_ref()
            .map(|(request, _)| request.clone())
    }

    /// When the current request went in flight.
    pub fn current_write_since(&self) -> Option<u64> {
        self.current_write_request
            .lock()
            .unwrap()
            .as_ref()
            .map(|(_, since)| *since)
    }

    /// Sets the request the transport is currently writing, which went in
    /// flight at `now`.
    pub fn set_current_write_request(&self, request: Option<WriteRequest>, now: u64) {
        *self.current_write_request.lock().unwrap() = request.map(|request| (request, now));
    }

    /// Clears and returns the request the transport is currently writing.
    pub fn take_current_write_request(&self) -> Option<WriteRequest> {
        self.current_write_request
            .lock()
            .unwrap()
            .take()
            .map(|(request, _)| request)
    }

    /// Confirms that the transport has torn the session down.
    ///
    /// Fails the in-flight write and every queued write with
    /// [`Error::WriteToClosedSession`] and fires `exception_caught` for them.
    /// Then it unregisters the session, which fires `session_closed`.
    pub fn destroy(&self) {
        self.closing.store(true, Ordering::SeqCst);

        let mut failed = Vec::new();
        if let Some(current) = self.take_current_write_request() {
            failed.push(current);
        }
        if let Some(queue) = self.write_queue.get() {
            while let Some(request) = queue.poll(self) {
                if request.is_close_request() {
                    continue;
                }
                let len = request.message().byte_len();
                if len > 0 {
                    self.add_scheduled_write_bytes(-(len as i64));
                }
                self.add_scheduled_write_messages(-1);
                failed.push(request);
            }
        }

        if !failed.is_empty() {
            let cause = Arc::new(Error::WriteToClosedSession {
                session_id: self.id,
                requests: failed.len(),
            });
            for request in &failed {
                request.future().set_exception(Arc::clone(&cause));
            }
            self.chain.fire_exception_caught(cause);
        }

        if !self
            .service
            .listeners()
            .fire_session_destroyed(&self.service, self)
        {
            // never registered, or already destroyed
            self.close_future.set_closed();
        }
    }

    /// Releases the write queue and attribute map after `session_closed`.
    pub(crate) fn dispose_data_structures(&self) {
        if let Some(queue) = self.write_queue.get() {
            queue.dispose(self);
        }
        if let Some(attributes) = self.attributes.get() {
            attributes.dispose();
        }
    }

    fn reset_after_close(&self) {
        let (bytes, messages) = self.statistics.take_scheduled_writes();
        let service_stats = self.service.statistics();
        service_stats.add_scheduled_write_bytes(-bytes);
        service_stats.add_scheduled_write_messages(-messages);
        self.statistics.reset_throughput();
    }
}

impl PartialEq for IoSession {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for IoSession {}

impl Hash for IoSession {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for IoSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("remote_address", &self.remote_address)
            .finish()
    }
}

impl fmt::Display for IoSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(0x{:08x}: {}", self.id, self.transport_metadata().name())?;
        match self.remote_address {
            Some(remote) => write!(f, " => {})", remote),
            None => f.write_str(")"),
        }
    }
}
