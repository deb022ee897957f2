//! The once-a-second sweep that fires idle events and enforces write
//! timeouts.

use crate::error::Result;
use crate::service::IoService;
use crate::session::{IoSession, notify_idle_session};
use crossbeam_channel::{RecvTimeoutError, Sender};
use dashmap::DashMap;
use log::{trace, warn};
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Time between two sweeps of the background thread.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

const THREAD_NAME: &str = "IdleStatusChecker";

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Tracks active services and sessions and periodically checks them for
/// idleness.
///
/// Each [`tick`](IdleStatusChecker::tick) refreshes throughput figures,
/// fires `session_idle` or `service_idle` for every expired category and
/// force-closes sessions whose write timed out. Sessions leave the checker on
/// their own when their close future completes.
///
/// [`start`](IdleStatusChecker::start) runs ticks on a background thread
/// every [`TICK_INTERVAL`]. Tests can instead call `tick` directly with a
/// chosen time.
pub struct IdleStatusChecker {
    sessions: DashMap<u64, Arc<IoSession>>,
    services: DashMap<usize, Weak<IoService>>,
    worker: Mutex<Option<Worker>>,
}

impl Default for IdleStatusChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleStatusChecker {
    /// Creates a checker without a background thread.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            services: DashMap::new(),
            worker: Mutex::new(None),
        }
    }

    /// The process-wide checker, started on first use.
    pub fn shared() -> Arc<IdleStatusChecker> {
        static SHARED: OnceLock<Arc<IdleStatusChecker>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| {
            let checker = Arc::new(IdleStatusChecker::new());
            if let Err(e) = checker.start() {
                warn!("failed to start the idle status checker: {}", e);
            }
            checker
        }))
    }

    /// Starts the background thread. Does nothing if it is already running.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() {
            return Ok(());
        }

        let (stop, stopped) = crossbeam_channel::bounded::<()>(1);
        let checker = Arc::downgrade(self);
        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_owned())
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(TICK_INTERVAL) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let Some(checker) = checker.upgrade() else {
                        break;
                    };
                    checker.tick(crate::current_time_millis());
                }
                trace!("{} stopped", THREAD_NAME);
            })?;

        *worker = Some(Worker { stop, handle });
        Ok(())
    }

    /// Stops the background thread and waits for it to exit, unless called
    /// from that thread.
    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().unwrap().take() else {
            return;
        };
        let _ = worker.stop.try_send(());
        drop(worker.stop);
        if worker.handle.thread().id() != thread::current().id() {
            let _ = worker.handle.join();
        }
    }

    /// Returns `true` while the background thread runs.
    pub fn is_running(&self) -> bool {
        self.worker.lock().unwrap().is_some()
    }

    /// Starts checking `session` until its close future completes.
    pub fn add_session(self: &Arc<Self>, session: &Arc<IoSession>) {
        self.sessions.insert(session.id(), Arc::clone(session));

        // fires immediately if the session is already closed
        let checker = Arc::downgrade(self);
        let id = session.id();
        session.close_future().add_listener(move || {
            if let Some(checker) = checker.upgrade() {
                checker.sessions.remove(&id);
            }
        });
    }

    /// Stops checking `session`.
    pub fn remove_session(&self, session: &IoSession) {
        self.sessions.remove(&session.id());
    }

    /// Number of sessions being checked.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Starts checking `service`.
    pub fn add_service(&self, service: &Arc<IoService>) {
        self.services
            .insert(service_key(service), Arc::downgrade(service));
    }

    /// Stops checking `service`.
    pub fn remove_service(&self, service: &IoService) {
        self.services.remove(&service_key(service));
    }

    /// Number of services being checked.
    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Runs one sweep as of `now`, in milliseconds since the Unix epoch.
    pub fn tick(&self, now: u64) {
        self.services.retain(|_, service| service.strong_count() > 0);
        let services: Vec<Arc<IoService>> = self
            .services
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect();
        for service in services {
            service.update_throughput(now, false);
            service.notify_idleness(now);
        }

        let sessions: Vec<Arc<IoSession>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for session in sessions {
            session.update_throughput(now, false);
            notify_idle_session(&session, now);
        }
    }
}

fn service_key(service: &IoService) -> usize {
    service as *const IoService as usize
}

impl fmt::Debug for IdleStatusChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdleStatusChecker")
            .field("sessions", &self.session_count())
            .field("services", &self.service_count())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_and_stop() {
        let checker = Arc::new(IdleStatusChecker::new());
        checker.start().unwrap();
        assert!(checker.is_running());
        checker.start().unwrap();

        checker.stop();
        assert!(!checker.is_running());
        checker.stop();
    }

    #[test]
    fn empty_tick_is_harmless() {
        let checker = IdleStatusChecker::new();
        checker.tick(crate::current_time_millis());
        assert_eq!(checker.session_count(), 0);
        assert_eq!(checker.service_count(), 0);
    }
}
