use super::{IoService, ServiceKind};
use crate::error::Result;
use crate::session::{IdleStatus, IoSession};
use log::{debug, trace};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::Duration;

const SESSION_DRAIN_RECHECK: Duration = Duration::from_millis(500);

/// Observes the lifecycle of a service and of the sessions it manages.
///
/// Errors returned from a callback are reported to the service's
/// [`ExceptionMonitor`](crate::ExceptionMonitor); they never reach the
/// caller and never stop other listeners from being notified.
pub trait IoServiceListener: Send + Sync {
    /// The service became active.
    fn service_activated(&self, _service: &Arc<IoService>) -> Result<()> {
        Ok(())
    }

    /// The service has been idle for its configured `status` time.
    fn service_idle(&self, _service: &Arc<IoService>, _status: IdleStatus) -> Result<()> {
        Ok(())
    }

    /// The service became inactive.
    fn service_deactivated(&self, _service: &Arc<IoService>) -> Result<()> {
        Ok(())
    }

    /// A session was registered with the service.
    fn session_created(&self, _session: &Arc<IoSession>) -> Result<()> {
        Ok(())
    }

    /// A session was removed from the service.
    fn session_destroyed(&self, _session: &Arc<IoSession>) -> Result<()> {
        Ok(())
    }
}

type Listeners = Arc<Vec<Arc<dyn IoServiceListener>>>;

/// Registry of managed sessions and fan-out point for lifecycle events.
///
/// The managed-session map decides everything: a session is registered by
/// inserting it and destroyed by removing it, each exactly once, and
/// connector activation follows the map going from empty to non-empty and
/// back.
pub struct IoServiceListenerSupport {
    listeners: RwLock<Listeners>,
    managed: Mutex<HashMap<u64, Arc<IoSession>>>,
    all_removed: Condvar,
    activated: AtomicBool,
    activation_time: AtomicU64,
    largest_managed_session_count: AtomicUsize,
    cumulative_managed_session_count: AtomicU64,
}

impl Default for IoServiceListenerSupport {
    fn default() -> Self {
        Self::new()
    }
}

impl IoServiceListenerSupport {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Arc::new(Vec::new())),
            managed: Mutex::new(HashMap::new()),
            all_removed: Condvar::new(),
            activated: AtomicBool::new(false),
            activation_time: AtomicU64::new(0),
            largest_managed_session_count: AtomicUsize::new(0),
            cumulative_managed_session_count: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> Listeners {
        Arc::clone(&self.listeners.read().unwrap())
    }

    /// Registers `listener`.
    pub fn add_listener(&self, listener: Arc<dyn IoServiceListener>) {
        let mut listeners = self.listeners.write().unwrap();
        let mut updated = listeners.to_vec();
        updated.push(listener);
        *listeners = Arc::new(updated);
    }

    /// Unregisters `listener`. Returns `false` if it was not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn IoServiceListener>) -> bool {
        let mut listeners = self.listeners.write().unwrap();
        let Some(index) = listeners
            .iter()
            .position(|l| std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)))
        else {
            return false;
        };
        let mut updated = listeners.to_vec();
        updated.remove(index);
        *listeners = Arc::new(updated);
        true
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.snapshot().len()
    }

    /// Returns `true` while the service is active.
    pub fn is_active(&self) -> bool {
        self.activated.load(Ordering::SeqCst)
    }

    /// Time of the last activation, `0` if never activated.
    pub fn activation_time(&self) -> u64 {
        self.activation_time.load(Ordering::SeqCst)
    }

    /// All currently managed sessions.
    pub fn managed_sessions(&self) -> Vec<Arc<IoSession>> {
        self.managed.lock().unwrap().values().cloned().collect()
    }

    /// The managed session with `id`.
    pub fn managed_session(&self, id: u64) -> Option<Arc<IoSession>> {
        self.managed.lock().unwrap().get(&id).cloned()
    }

    /// Number of currently managed sessions.
    pub fn managed_session_count(&self) -> usize {
        self.managed.lock().unwrap().len()
    }

    /// Highest number of sessions ever managed at the same time.
    pub fn largest_managed_session_count(&self) -> usize {
        self.largest_managed_session_count.load(Ordering::SeqCst)
    }

    /// Number of sessions ever registered.
    pub fn cumulative_managed_session_count(&self) -> u64 {
        self.cumulative_managed_session_count.load(Ordering::SeqCst)
    }

    fn notify(
        &self,
        service: &Arc<IoService>,
        session: Option<&IoSession>,
        call: impl Fn(&dyn IoServiceListener) -> Result<()>,
    ) {
        for listener in self.snapshot().iter() {
            if let Err(e) = call(listener.as_ref()) {
                service.exception_monitor().exception_caught(&e, session);
            }
        }
    }

    /// Activates the service. Only the first call after a deactivation has
    /// any effect.
    pub fn fire_service_activated(&self, service: &Arc<IoService>) {
        if self
            .activated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let now = crate::current_time_millis();
        self.activation_time.store(now, Ordering::SeqCst);
        service.statistics().reset_activity(now);
        service.idle_checker().add_service(service);
        debug!("service {} activated", service);

        self.notify(service, None, |l| l.service_activated(service));
    }

    /// Deactivates the service. Only the first call after an activation has
    /// any effect.
    ///
    /// An acceptor configured to close on deactivation then closes every
    /// managed session and blocks until all of them are destroyed.
    pub fn fire_service_deactivated(&self, service: &Arc<IoService>) {
        if self
            .activated
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        service.idle_checker().remove_service(service);
        debug!("service {} deactivated", service);

        self.notify(service, None, |l| l.service_deactivated(service));

        if service.kind() == ServiceKind::Acceptor && service.close_on_deactivation() {
            self.disconnect_sessions();
        }
    }

    fn disconnect_sessions(&self) {
        for session in self.managed_sessions() {
            session.close_now();
        }

        let mut managed = self.managed.lock().unwrap();
        while !managed.is_empty() {
            trace!("waiting for {} session(s) to close", managed.len());
            managed = self
                .all_removed
                .wait_timeout(managed, SESSION_DRAIN_RECHECK)
                .unwrap()
                .0;
        }
    }

    /// Fans `service_idle` out to the listeners.
    pub fn fire_service_idle(&self, service: &Arc<IoService>, status: IdleStatus) {
        self.notify(service, None, |l| l.service_idle(service, status));
    }

    /// Registers `session` and fires `session_created` and `session_opened`
    /// through its chain.
    ///
    /// Returns `false` without firing anything if the session is already
    /// registered. The first session of a connector activates the service
    /// before any session event is fired.
    pub fn fire_session_created(&self, service: &Arc<IoService>, session: &Arc<IoSession>) -> bool {
        let first = {
            let mut managed = self.managed.lock().unwrap();
            if managed.contains_key(&session.id()) {
                return false;
            }
            let first = managed.is_empty();
            managed.insert(session.id(), Arc::clone(session));
            self.largest_managed_session_count
                .fetch_max(managed.len(), Ordering::SeqCst);
            self.cumulative_managed_session_count
                .fetch_add(1, Ordering::SeqCst);
            first
        };

        if first && service.kind() == ServiceKind::Connector {
            self.sync_connector_activation(service);
        }

        session.mark_registered();
        service.idle_checker().add_session(session);

        let chain = session.filter_chain();
        chain.fire_session_created();
        chain.fire_session_opened();

        self.notify(service, Some(&**session), |l| l.session_created(session));
        true
    }

    /// Unregisters `session` and fires `session_closed` through its chain.
    ///
    /// Returns `false` without firing anything if the session is not
    /// registered. Removing the last session of a connector deactivates the
    /// service afterwards.
    pub fn fire_session_destroyed(&self, service: &Arc<IoService>, session: &IoSession) -> bool {
        let (removed, last) = {
            let mut managed = self.managed.lock().unwrap();
            let Some(removed) = managed.remove(&session.id()) else {
                return false;
            };
            let last = managed.is_empty();
            if last {
                self.all_removed.notify_all();
            }
            (removed, last)
        };

        removed.filter_chain().fire_session_closed();

        self.notify(service, Some(session), |l| l.session_destroyed(&removed));

        if last && service.kind() == ServiceKind::Connector {
            self.sync_connector_activation(service);
        }
        true
    }

    /// Activates or deactivates a connector until its state matches whether
    /// it manages any session.
    ///
    /// A session can be created or destroyed between the map update and the
    /// activation flip, so the state is read again after every transition.
    fn sync_connector_activation(&self, service: &Arc<IoService>) {
        loop {
            let has_sessions = self.managed_session_count() > 0;
            if has_sessions == self.is_active() {
                return;
            }
            if has_sessions {
                self.fire_service_activated(service);
            } else {
                self.fire_service_deactivated(service);
            }
        }
    }
}

impl fmt::Debug for IoServiceListenerSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoServiceListenerSupport")
            .field("listeners", &self.listener_count())
            .field("active", &self.is_active())
            .field("managed_sessions", &self.managed_session_count())
            .finish()
    }
}
