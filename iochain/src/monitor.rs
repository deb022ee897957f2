//! Last-resort reporting for errors that have no caller to return to.

use crate::error::Error;
use crate::session::IoSession;
use log::warn;
use std::sync::{Arc, OnceLock, RwLock};

/// Receives errors that cannot be propagated, such as a service listener
/// failing while a lifecycle event is fanned out.
pub trait ExceptionMonitor: Send + Sync {
    /// Reports `cause`, raised while handling `session` if there was one.
    fn exception_caught(&self, cause: &Error, session: Option<&IoSession>);
}

/// Logs every reported error with `log::warn!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingExceptionMonitor;

impl ExceptionMonitor for LoggingExceptionMonitor {
    fn exception_caught(&self, cause: &Error, session: Option<&IoSession>) {
        match session {
            Some(session) => warn!("unexpected exception on session {}: {}", session.id(), cause),
            None => warn!("unexpected exception: {}", cause),
        }
    }
}

fn global_slot() -> &'static RwLock<Arc<dyn ExceptionMonitor>> {
    static GLOBAL: OnceLock<RwLock<Arc<dyn ExceptionMonitor>>> = OnceLock::new();
    GLOBAL.get_or_init(|| RwLock::new(Arc::new(LoggingExceptionMonitor)))
}

/// The process-wide monitor used by services built without their own.
pub fn global() -> Arc<dyn ExceptionMonitor> {
    Arc::clone(&global_slot().read().unwrap())
}

/// Replaces the process-wide monitor. Services that already captured the
/// previous monitor keep using it.
pub fn set_global(monitor: Arc<dyn ExceptionMonitor>) {
    *global_slot().write().unwrap() = monitor;
}
