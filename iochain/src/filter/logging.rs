use super::{Filter, IoEventType, NextFilter};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::session::{IdleStatus, IoSession};
use crate::write::WriteRequest;
use log::{Level, log, log_enabled};
use std::sync::{Arc, RwLock};

const EVENT_KINDS: usize = IoEventType::ALL.len();

/// Logs every event that passes through it, then forwards it unchanged.
///
/// Each event kind has its own level; `None` silences that kind. Exceptions
/// are logged at `Warn`, everything else at `Info` by default. Records go to
/// the target given at construction.
#[derive(Debug)]
pub struct LoggingFilter {
    target: String,
    levels: RwLock<[Option<Level>; EVENT_KINDS]>,
}

impl Default for LoggingFilter {
    fn default() -> Self {
        Self::new(module_path!())
    }
}

impl LoggingFilter {
    /// Creates a filter logging to `target`.
    pub fn new(target: &str) -> Self {
        let mut levels = [Some(Level::Info); EVENT_KINDS];
        levels[IoEventType::ExceptionCaught.index()] = Some(Level::Warn);
        Self {
            target: target.to_owned(),
            levels: RwLock::new(levels),
        }
    }

    /// The level used for `event`.
    pub fn level(&self, event: IoEventType) -> Option<Level> {
        self.levels.read().unwrap()[event.index()]
    }

    /// Changes the level used for `event`; `None` disables it.
    pub fn set_level(&self, event: IoEventType, level: Option<Level>) {
        self.levels.write().unwrap()[event.index()] = level;
    }

    fn log(&self, event: IoEventType, args: std::fmt::Arguments<'_>) {
        if let Some(level) = self.level(event) {
            if log_enabled!(target: self.target.as_str(), level) {
                log!(target: self.target.as_str(), level, "{}", args);
            }
        }
    }
}

impl Filter for LoggingFilter {
    fn session_created(&self, next: &NextFilter, session: &Arc<IoSession>) -> Result<()> {
        self.log(
            IoEventType::SessionCreated,
            format_args!("CREATED session {}", session.id()),
        );
        next.session_created(session);
        Ok(())
    }

    fn session_opened(&self, next: &NextFilter, session: &Arc<IoSession>) -> Result<()> {
        self.log(
            IoEventType::SessionOpened,
            format_args!("OPENED session {}", session.id()),
        );
        next.session_opened(session);
        Ok(())
    }

    fn session_closed(&self, next: &NextFilter, session: &Arc<IoSession>) -> Result<()> {
        self.log(
            IoEventType::SessionClosed,
            format_args!("CLOSED session {}", session.id()),
        );
        next.session_closed(session);
        Ok(())
    }

    fn session_idle(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        status: IdleStatus,
    ) -> Result<()> {
        self.log(
            IoEventType::SessionIdle,
            format_args!("IDLE ({}) session {}", status, session.id()),
        );
        next.session_idle(session, status);
        Ok(())
    }

    fn exception_caught(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        cause: Arc<Error>,
    ) -> Result<()> {
        self.log(
            IoEventType::ExceptionCaught,
            format_args!("EXCEPTION on session {}: {}", session.id(), cause),
        );
        next.exception_caught(session, cause);
        Ok(())
    }

    fn input_closed(&self, next: &NextFilter, session: &Arc<IoSession>) -> Result<()> {
        self.log(
            IoEventType::InputClosed,
            format_args!("INPUT CLOSED session {}", session.id()),
        );
        next.input_closed(session);
        Ok(())
    }

    fn message_received(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        message: Message,
    ) -> Result<()> {
        self.log(
            IoEventType::MessageReceived,
            format_args!("RECEIVED on session {}: {:?}", session.id(), message),
        );
        next.message_received(session, message);
        Ok(())
    }

    fn message_sent(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        request: WriteRequest,
    ) -> Result<()> {
        self.log(
            IoEventType::MessageSent,
            format_args!("SENT on session {}: {:?}", session.id(), request.message()),
        );
        next.message_sent(session, request);
        Ok(())
    }

    fn filter_write(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        request: WriteRequest,
    ) -> Result<()> {
        self.log(
            IoEventType::Write,
            format_args!("WRITE on session {}: {:?}", session.id(), request.message()),
        );
        next.filter_write(session, request);
        Ok(())
    }

    fn filter_close(&self, next: &NextFilter, session: &Arc<IoSession>) -> Result<()> {
        self.log(
            IoEventType::Close,
            format_args!("CLOSE requested on session {}", session.id()),
        );
        next.filter_close(session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_levels() {
        let filter = LoggingFilter::default();
        assert_eq!(filter.level(IoEventType::ExceptionCaught), Some(Level::Warn));
        assert_eq!(filter.level(IoEventType::MessageReceived), Some(Level::Info));
    }

    #[test]
    fn levels_can_be_changed_or_silenced() {
        let filter = LoggingFilter::new("wire");
        filter.set_level(IoEventType::MessageSent, Some(Level::Debug));
        filter.set_level(IoEventType::SessionIdle, None);

        assert_eq!(filter.level(IoEventType::MessageSent), Some(Level::Debug));
        assert_eq!(filter.level(IoEventType::SessionIdle), None);
    }
}
