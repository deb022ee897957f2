//! Services own a transport endpoint and every session opened through it.
//!
//! An [`IoService`] is either an acceptor, activated by binding local
//! addresses, or a connector, activated by its first session. Transports
//! register each new connection with [`IoService::new_session`], which copies
//! the service's [`FilterChainBuilder`] onto the session's own chain and
//! fires `session_created` and `session_opened`.

mod listener;

pub use listener::{IoServiceListener, IoServiceListenerSupport};

use crate::error::{Error, Result};
use crate::filter::{Filter, FilterChainBuilder};
use crate::future::WriteFuture;
use crate::handler::IoHandler;
use crate::idle_checker::IdleStatusChecker;
use crate::message::Message;
use crate::monitor::{self, ExceptionMonitor};
use crate::processor::IoProcessor;
use crate::session::{
    DEFAULT_THROUGHPUT_CALCULATION_INTERVAL, DefaultSessionDataStructureFactory, IdleCounters,
    IdleStatus, IoSession, SessionConfig, SessionDataStructureFactory, SessionIdGenerator, is_idle,
};
use crate::statistics::{Throughput, TrafficStatistics};
use iochain_executor::{Executor, ExecutorBuilder, Job};
use log::debug;
use std::any::{Any, TypeId};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Whether a service accepts incoming connections or opens outgoing ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    /// Listens on bound addresses; active while at least one is bound.
    Acceptor,
    /// Opens connections; active while at least one session is managed.
    Connector,
}

/// Static description of the transport behind a service.
#[derive(Clone, Debug)]
pub struct TransportMetadata {
    provider_name: String,
    name: String,
    connectionless: bool,
    has_fragmentation: bool,
    session_config_type: Option<(TypeId, &'static str)>,
}

impl TransportMetadata {
    /// Describes a transport called `name` from `provider_name`.
    pub fn new(provider_name: &str, name: &str, connectionless: bool, has_fragmentation: bool) -> Self {
        Self {
            provider_name: provider_name.to_owned(),
            name: name.to_owned(),
            connectionless,
            has_fragmentation,
            session_config_type: None,
        }
    }

    /// Requires session configurations to carry a transport extension of
    /// type `C`.
    pub fn with_session_config<C: Any>(mut self) -> Self {
        self.session_config_type = Some((TypeId::of::<C>(), std::any::type_name::<C>()));
        self
    }

    /// Name of the transport implementation family, such as `"nio"`.
    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    /// Name of the transport, such as `"socket"`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` for datagram-style transports.
    pub fn is_connectionless(&self) -> bool {
        self.connectionless
    }

    /// Returns `true` if messages may arrive split across reads.
    pub fn has_fragmentation(&self) -> bool {
        self.has_fragmentation
    }

    /// Fails with [`Error::TypeMismatch`] unless `config` carries the
    /// transport extension this transport expects.
    pub fn check_session_config(&self, config: &SessionConfig) -> Result<()> {
        let Some((expected_id, expected)) = self.session_config_type else {
            return Ok(());
        };
        match config.transport_config() {
            Some(transport) if transport.type_id() == expected_id => Ok(()),
            Some(transport) => Err(Error::TypeMismatch {
                expected,
                actual: transport.type_name(),
            }),
            None => Err(Error::TypeMismatch {
                expected,
                actual: "no transport configuration",
            }),
        }
    }
}

/// A transport endpoint and the sessions opened through it.
///
/// Build one with [`IoServiceBuilder`]. The service is shared as an `Arc`:
/// every session keeps its service alive until it is destroyed.
pub struct IoService {
    kind: ServiceKind,
    metadata: TransportMetadata,
    handler: RwLock<Option<Arc<dyn IoHandler>>>,
    session_config: RwLock<SessionConfig>,
    filter_chain: FilterChainBuilder,
    listeners: IoServiceListenerSupport,

    executor: Arc<dyn Executor>,
    created_executor: bool,
    idle_checker: Arc<IdleStatusChecker>,
    id_generator: Arc<SessionIdGenerator>,
    data_structure_factory: Arc<dyn SessionDataStructureFactory>,
    exception_monitor: Arc<dyn ExceptionMonitor>,
    close_on_deactivation: bool,

    bound_addresses: Mutex<Vec<SocketAddr>>,

    statistics: TrafficStatistics,
    idle: IdleCounters,
    idle_times: [AtomicU32; 3],
    throughput_calculation_interval: AtomicU32,

    disposal_lock: Mutex<()>,
    disposing: AtomicBool,
    disposed: AtomicBool,
}

impl IoService {
    /// Whether this is an acceptor or a connector.
    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    /// Metadata of the transport behind this service.
    pub fn transport_metadata(&self) -> &TransportMetadata {
        &self.metadata
    }

    /// The handler new sessions are given.
    pub fn handler(&self) -> Option<Arc<dyn IoHandler>> {
        self.handler.read().unwrap().clone()
    }

    /// Replaces the handler. Fails with [`Error::IllegalState`] while the
    /// service is active.
    pub fn set_handler(&self, handler: Arc<dyn IoHandler>) -> Result<()> {
        if self.is_active() {
            return Err(Error::IllegalState(
                "the handler cannot be set while the service is active".into(),
            ));
        }
        *self.handler.write().unwrap() = Some(handler);
        Ok(())
    }

    /// A copy of the configuration new sessions start with.
    pub fn session_config(&self) -> SessionConfig {
        self.session_config.read().unwrap().clone()
    }

    /// Replaces the configuration new sessions start with.
    pub fn set_session_config(&self, config: SessionConfig) -> Result<()> {
        self.metadata.check_session_config(&config)?;
        *self.session_config.write().unwrap() = config;
        Ok(())
    }

    /// The template copied onto the chain of every new session.
    pub fn filter_chain(&self) -> &FilterChainBuilder {
        &self.filter_chain
    }

    /// Lifecycle listeners and the managed-session registry.
    pub fn listeners(&self) -> &IoServiceListenerSupport {
        &self.listeners
    }

    /// Registers a lifecycle listener.
    pub fn add_listener(&self, listener: Arc<dyn IoServiceListener>) {
        self.listeners.add_listener(listener);
    }

    /// Unregisters a lifecycle listener.
    pub fn remove_listener(&self, listener: &Arc<dyn IoServiceListener>) -> bool {
        self.listeners.remove_listener(listener)
    }

    /// The monitor that receives listener failures.
    pub fn exception_monitor(&self) -> &Arc<dyn ExceptionMonitor> {
        &self.exception_monitor
    }

    /// The idle checker this service and its sessions are registered with.
    pub fn idle_checker(&self) -> &Arc<IdleStatusChecker> {
        &self.idle_checker
    }

    pub(crate) fn id_generator(&self) -> &SessionIdGenerator {
        &self.id_generator
    }

    pub(crate) fn data_structure_factory(&self) -> &dyn SessionDataStructureFactory {
        self.data_structure_factory.as_ref()
    }

    /// Returns `true` if an acceptor closes its sessions when unbound.
    pub fn close_on_deactivation(&self) -> bool {
        self.close_on_deactivation
    }

    /// Returns `true` while the service is active.
    pub fn is_active(&self) -> bool {
        self.listeners.is_active()
    }

    /// Time of the last activation.
    pub fn activation_time(&self) -> u64 {
        self.listeners.activation_time()
    }

    /// All currently managed sessions.
    pub fn managed_sessions(&self) -> Vec<Arc<IoSession>> {
        self.listeners.managed_sessions()
    }

    /// Number of currently managed sessions.
    pub fn managed_session_count(&self) -> usize {
        self.listeners.managed_session_count()
    }

    /// Binds `address`. The first bound address activates an acceptor.
    pub fn bind(self: &Arc<Self>, address: SocketAddr) -> Result<()> {
        if self.kind != ServiceKind::Acceptor {
            return Err(Error::IllegalState("only an acceptor can be bound".into()));
        }
        if self.is_disposing() {
            return Err(Error::IllegalState("the service is being disposed".into()));
        }
        if self.handler().is_none() {
            return Err(Error::IllegalState("the handler is not set".into()));
        }

        let activate = {
            let mut bound = self.bound_addresses.lock().unwrap();
            if bound.contains(&address) {
                return Err(Error::InvalidArgument(format!("{} is already bound", address)));
            }
            bound.push(address);
            bound.len() == 1
        };
        debug!("service {} bound to {}", self, address);
        if activate {
            self.listeners.fire_service_activated(self);
        }
        Ok(())
    }

    /// Unbinds `address`. Unbinding the last address deactivates an acceptor.
    pub fn unbind(self: &Arc<Self>, address: SocketAddr) -> Result<()> {
        let deactivate = {
            let mut bound = self.bound_addresses.lock().unwrap();
            let Some(index) = bound.iter().position(|a| *a == address) else {
                return Err(Error::InvalidArgument(format!("{} is not bound", address)));
            };
            bound.remove(index);
            bound.is_empty()
        };
        debug!("service {} unbound from {}", self, address);
        if deactivate {
            self.listeners.fire_service_deactivated(self);
        }
        Ok(())
    }

    /// Unbinds every bound address.
    pub fn unbind_all(self: &Arc<Self>) {
        let had_addresses = {
            let mut bound = self.bound_addresses.lock().unwrap();
            let had = !bound.is_empty();
            bound.clear();
            had
        };
        if had_addresses {
            self.listeners.fire_service_deactivated(self);
        }
    }

    /// Addresses an acceptor is bound to.
    pub fn local_addresses(&self) -> Vec<SocketAddr> {
        self.bound_addresses.lock().unwrap().clone()
    }

    /// Creates a session for a connection opened by a transport and
    /// registers it.
    ///
    /// The session gets a copy of the service's session configuration and
    /// filter chain, then `session_created` and `session_opened` are fired.
    pub fn new_session(
        self: &Arc<Self>,
        processor: Arc<dyn IoProcessor>,
        local_address: Option<SocketAddr>,
        remote_address: Option<SocketAddr>,
    ) -> Result<Arc<IoSession>> {
        if self.is_disposing() {
            return Err(Error::IllegalState("the service is being disposed".into()));
        }
        let handler = self
            .handler()
            .ok_or_else(|| Error::IllegalState("the handler is not set".into()))?;
        let config = self.session_config();
        self.metadata.check_session_config(&config)?;

        let session = IoSession::new(
            self,
            handler,
            processor,
            config,
            local_address,
            remote_address,
        )?;
        self.listeners.fire_session_created(self, &session);
        Ok(session)
    }

    /// Writes `message` to every managed session.
    pub fn broadcast(&self, message: impl Into<Message>) -> Vec<WriteFuture> {
        let message = message.into();
        self.managed_sessions()
            .iter()
            .map(|session| session.write(message.clone()))
            .collect()
    }

    /// Runs transport work on the service's executor.
    pub fn execute_worker(&self, job: Job) -> Result<()> {
        self.executor.execute(job)?;
        Ok(())
    }

    /// The executor transport work runs on.
    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// Aggregate traffic counters of every session this service managed.
    pub fn statistics(&self) -> &TrafficStatistics {
        &self.statistics
    }

    /// Highest number of sessions ever managed at the same time.
    pub fn largest_managed_session_count(&self) -> usize {
        self.listeners.largest_managed_session_count()
    }

    /// Number of sessions ever registered.
    pub fn cumulative_managed_session_count(&self) -> u64 {
        self.listeners.cumulative_managed_session_count()
    }

    /// Bytes accepted for writing across all sessions but not yet written.
    pub fn scheduled_write_bytes(&self) -> i64 {
        self.statistics.scheduled_write_bytes()
    }

    /// Messages accepted for writing across all sessions but not yet written.
    pub fn scheduled_write_messages(&self) -> i64 {
        self.statistics.scheduled_write_messages()
    }

    /// The most recent aggregate throughput snapshot.
    pub fn throughput(&self) -> Throughput {
        self.statistics.throughput()
    }

    /// Highest aggregate throughput ever observed.
    pub fn largest_throughput(&self) -> Throughput {
        self.statistics.largest_throughput()
    }

    /// Seconds between throughput calculations.
    pub fn throughput_calculation_interval(&self) -> u32 {
        self.throughput_calculation_interval.load(Ordering::SeqCst)
    }

    /// Sets the seconds between throughput calculations; `0` disables them.
    pub fn set_throughput_calculation_interval(&self, seconds: u32) {
        self.throughput_calculation_interval
            .store(seconds, Ordering::SeqCst);
    }

    /// Recomputes aggregate throughput if the interval elapsed, or
    /// unconditionally when `force` is set.
    pub fn update_throughput(&self, now: u64, force: bool) -> bool {
        let interval = u64::from(self.throughput_calculation_interval()) * 1000;
        self.statistics.update_throughput(now, interval, force)
    }

    pub(crate) fn record_read_bytes(&self, increment: u64, now: u64) {
        self.statistics.record_read_bytes(increment, now);
        self.reset_read_idle();
    }

    pub(crate) fn record_read_message(&self, now: u64) {
        self.statistics.record_read_message(now);
        self.reset_read_idle();
    }

    pub(crate) fn record_written_bytes(&self, increment: u64, now: u64) {
        self.statistics.record_written_bytes(increment, now);
        self.reset_write_idle();
    }

    pub(crate) fn record_written_message(&self, now: u64) {
        self.statistics.record_written_message(now);
        self.reset_write_idle();
    }

    fn reset_read_idle(&self) {
        self.idle.reset(IdleStatus::ReaderIdle);
        self.idle.reset(IdleStatus::BothIdle);
    }

    fn reset_write_idle(&self) {
        self.idle.reset(IdleStatus::WriterIdle);
        self.idle.reset(IdleStatus::BothIdle);
    }

    /// Seconds without activity before `service_idle` fires for `status`.
    pub fn idle_time(&self, status: IdleStatus) -> u32 {
        self.idle_times[status.index()].load(Ordering::SeqCst)
    }

    /// Sets the idle time of `status` in seconds; `0` disables it.
    pub fn set_idle_time(&self, status: IdleStatus, seconds: u32) {
        self.idle_times[status.index()].store(seconds, Ordering::SeqCst);
    }

    /// Consecutive idle events of `status` since the last matching activity.
    pub fn idle_count(&self, status: IdleStatus) -> u32 {
        self.idle.count(status)
    }

    /// Time of the last idle event of `status`.
    pub fn last_idle_time(&self, status: IdleStatus) -> u64 {
        self.idle.last_idle_time(status)
    }

    /// Fans `service_idle` out for every expired category.
    pub fn notify_idleness(self: &Arc<Self>, now: u64) {
        if !self.is_active() {
            return;
        }
        for status in IdleStatus::ALL {
            let last_io_time = match status {
                IdleStatus::ReaderIdle => self.statistics.last_read_time(),
                IdleStatus::WriterIdle => self.statistics.last_write_time(),
                IdleStatus::BothIdle => self.statistics.last_io_time(),
            };
            let idle_time_millis = u64::from(self.idle_time(status)) * 1000;
            if is_idle(now, idle_time_millis, last_io_time, self.idle.last_idle_time(status)) {
                self.idle.increase(status, now);
                self.listeners.fire_service_idle(self, status);
            }
        }
    }

    /// Returns `true` once [`IoService::dispose`] was called.
    pub fn is_disposing(&self) -> bool {
        self.disposing.load(Ordering::SeqCst)
    }

    /// Returns `true` once [`IoService::dispose`] completed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Releases every resource of this service.
    ///
    /// Unbinds an acceptor, closes the remaining sessions and shuts down the
    /// executor if the service created it. With `await_termination` the call
    /// blocks until that executor has terminated. Later calls return
    /// immediately.
    pub fn dispose(self: &Arc<Self>, await_termination: bool) {
        if self.is_disposed() {
            return;
        }
        let _guard = self.disposal_lock.lock().unwrap();
        if self.disposing.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("disposing service {}", self);

        self.unbind_all();
        for session in self.managed_sessions() {
            session.close_now();
        }
        self.listeners.fire_service_deactivated(self);
        self.idle_checker.remove_service(self);

        if self.created_executor {
            self.executor.shutdown();
            if await_termination {
                while !self.executor.await_termination(Duration::from_secs(1)) {
                    debug!("waiting for the executor of service {} to terminate", self);
                }
            }
        }
        self.disposed.store(true, Ordering::SeqCst);
    }
}

impl fmt::Display for IoService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ServiceKind::Acceptor => "acceptor",
            ServiceKind::Connector => "connector",
        };
        write!(
            f,
            "{}/{} {}",
            self.metadata.provider_name(),
            self.metadata.name(),
            kind
        )
    }
}

impl fmt::Debug for IoService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoService")
            .field("kind", &self.kind)
            .field("metadata", &self.metadata)
            .field("active", &self.is_active())
            .field("managed_sessions", &self.managed_session_count())
            .field("filters", &self.filter_chain.names())
            .finish()
    }
}

/// Builds an [`IoService`].
///
/// Everything but the kind and the transport metadata is optional. A service
/// built without an executor creates its own pool and shuts it down on
/// [`IoService::dispose`]; without an idle checker it uses the shared one.
pub struct IoServiceBuilder {
    kind: ServiceKind,
    metadata: TransportMetadata,
    handler: Option<Arc<dyn IoHandler>>,
    session_config: SessionConfig,
    filters: Vec<(String, Arc<dyn Filter>)>,
    executor: Option<Arc<dyn Executor>>,
    idle_checker: Option<Arc<IdleStatusChecker>>,
    id_generator: Option<Arc<SessionIdGenerator>>,
    data_structure_factory: Option<Arc<dyn SessionDataStructureFactory>>,
    exception_monitor: Option<Arc<dyn ExceptionMonitor>>,
    close_on_deactivation: bool,
}

impl IoServiceBuilder {
    fn new(kind: ServiceKind, metadata: TransportMetadata) -> Self {
        Self {
            kind,
            metadata,
            handler: None,
            session_config: SessionConfig::default(),
            filters: Vec::new(),
            executor: None,
            idle_checker: None,
            id_generator: None,
            data_structure_factory: None,
            exception_monitor: None,
            close_on_deactivation: true,
        }
    }

    /// Starts building an acceptor.
    pub fn acceptor(metadata: TransportMetadata) -> Self {
        Self::new(ServiceKind::Acceptor, metadata)
    }

    /// Starts building a connector.
    pub fn connector(metadata: TransportMetadata) -> Self {
        Self::new(ServiceKind::Connector, metadata)
    }

    /// Sets the handler.
    pub fn handler(mut self, handler: Arc<dyn IoHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Sets the configuration new sessions start with.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Appends `filter` to the service's filter chain template.
    pub fn filter(mut self, name: &str, filter: Arc<dyn Filter>) -> Self {
        self.filters.push((name.to_owned(), filter));
        self
    }

    /// Runs transport work on `executor` instead of a private pool.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Registers the service and its sessions with `checker`.
    pub fn idle_checker(mut self, checker: Arc<IdleStatusChecker>) -> Self {
        self.idle_checker = Some(checker);
        self
    }

    /// Draws session ids from `generator`.
    pub fn id_generator(mut self, generator: Arc<SessionIdGenerator>) -> Self {
        self.id_generator = Some(generator);
        self
    }

    /// Creates session attribute maps and write queues with `factory`.
    pub fn data_structure_factory(mut self, factory: Arc<dyn SessionDataStructureFactory>) -> Self {
        self.data_structure_factory = Some(factory);
        self
    }

    /// Reports listener failures to `monitor`.
    pub fn exception_monitor(mut self, monitor: Arc<dyn ExceptionMonitor>) -> Self {
        self.exception_monitor = Some(monitor);
        self
    }

    /// Whether an acceptor closes its sessions when its last address is
    /// unbound. Defaults to `true`.
    pub fn close_on_deactivation(mut self, close: bool) -> Self {
        self.close_on_deactivation = close;
        self
    }

    /// Builds the service.
    ///
    /// Fails with [`Error::TypeMismatch`] if the session configuration does
    /// not fit the transport, or with [`Error::DuplicateName`] if two filters
    /// share a name.
    pub fn build(self) -> Result<Arc<IoService>> {
        self.metadata.check_session_config(&self.session_config)?;

        let filter_chain = FilterChainBuilder::new();
        for (name, filter) in self.filters {
            filter_chain.add_last(&name, filter)?;
        }

        let created_executor = self.executor.is_none();
        let executor = match self.executor {
            Some(executor) => executor,
            None => {
                let name = format!("{}-{}", self.metadata.provider_name(), self.metadata.name());
                let pool: Arc<dyn Executor> = Arc::new(ExecutorBuilder::new().name(&name).build());
                pool
            }
        };

        Ok(Arc::new(IoService {
            kind: self.kind,
            metadata: self.metadata,
            handler: RwLock::new(self.handler),
            session_config: RwLock::new(self.session_config),
            filter_chain,
            listeners: IoServiceListenerSupport::new(),
            executor,
            created_executor,
            idle_checker: self.idle_checker.unwrap_or_else(IdleStatusChecker::shared),
            id_generator: self.id_generator.unwrap_or_else(SessionIdGenerator::shared),
            data_structure_factory: self
                .data_structure_factory
                .unwrap_or_else(|| Arc::new(DefaultSessionDataStructureFactory)),
            exception_monitor: self.exception_monitor.unwrap_or_else(monitor::global),
            close_on_deactivation: self.close_on_deactivation,
            bound_addresses: Mutex::new(Vec::new()),
            statistics: TrafficStatistics::new(crate::current_time_millis()),
            idle: IdleCounters::default(),
            idle_times: Default::default(),
            throughput_calculation_interval: AtomicU32::new(DEFAULT_THROUGHPUT_CALCULATION_INTERVAL),
            disposal_lock: Mutex::new(()),
            disposing: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct SocketOptions;

    #[test]
    fn metadata_checks_transport_config_type() {
        let metadata = TransportMetadata::new("mem", "pipe", false, false)
            .with_session_config::<SocketOptions>();

        let mut config = SessionConfig::default();
        assert!(matches!(
            metadata.check_session_config(&config),
            Err(Error::TypeMismatch { .. })
        ));

        config.set_transport_config(crate::session::TransportConfig::new(42u32));
        assert!(matches!(
            metadata.check_session_config(&config),
            Err(Error::TypeMismatch { actual: "u32", .. })
        ));

        config.set_transport_config(crate::session::TransportConfig::new(SocketOptions));
        assert!(metadata.check_session_config(&config).is_ok());
    }

    #[test]
    fn metadata_without_extension_accepts_anything() {
        let metadata = TransportMetadata::new("mem", "pipe", true, false);
        assert!(metadata.check_session_config(&SessionConfig::default()).is_ok());
        assert!(metadata.is_connectionless());
        assert!(!metadata.has_fragmentation());
    }
}
