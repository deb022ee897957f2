//! The application-facing end of every filter chain.

use crate::error::{Error, Result};
use crate::message::Message;
use crate::session::{IdleStatus, IoSession};
use crate::write::WriteRequest;
use log::warn;
use std::sync::Arc;

/// Receives the inbound events that reach the tail of a session's chain.
///
/// Every method has a default so implementors only override what they need.
/// Returning an error reroutes it into [`IoHandler::exception_caught`] via the
/// chain, except from `exception_caught` itself where it is only logged.
///
/// # Example
///
/// ```rust
/// use iochain::{IoHandler, IoSession, Message, Result};
/// use std::sync::Arc;
///
/// struct Echo;
///
/// impl IoHandler for Echo {
///     fn message_received(&self, session: &Arc<IoSession>, message: Message) -> Result<()> {
///         session.write(message);
///         Ok(())
///     }
/// }
/// ```
pub trait IoHandler: Send + Sync {
    /// A session was created and registered with its service.
    fn session_created(&self, _session: &Arc<IoSession>) -> Result<()> {
        Ok(())
    }

    /// A session is open and ready for I/O.
    fn session_opened(&self, _session: &Arc<IoSession>) -> Result<()> {
        Ok(())
    }

    /// A session was closed.
    fn session_closed(&self, _session: &Arc<IoSession>) -> Result<()> {
        Ok(())
    }

    /// A session stayed idle for the configured time.
    fn session_idle(&self, _session: &Arc<IoSession>, _status: IdleStatus) -> Result<()> {
        Ok(())
    }

    /// An error was raised by the transport, a filter or this handler.
    fn exception_caught(&self, session: &Arc<IoSession>, cause: Arc<Error>) -> Result<()> {
        warn!(
            "EXCEPTION, please implement {}::exception_caught() for proper handling: session {}: {}",
            std::any::type_name::<Self>(),
            session.id(),
            cause
        );
        Ok(())
    }

    /// A message was received.
    fn message_received(&self, _session: &Arc<IoSession>, _message: Message) -> Result<()> {
        Ok(())
    }

    /// A message was written by the transport.
    fn message_sent(&self, _session: &Arc<IoSession>, _request: WriteRequest) -> Result<()> {
        Ok(())
    }

    /// The read side of the connection was shut down. Closes the session
    /// unless overridden.
    fn input_closed(&self, session: &Arc<IoSession>) -> Result<()> {
        session.close_now();
        Ok(())
    }
}
