//! # iochain - Session and Filter-Chain Engine
//!
//! `iochain` is the transport-independent core of an asynchronous network
//! application framework. A transport (TCP, UDP, an in-memory pipe) reports
//! what happened on a connection; `iochain` turns that into events that flow
//! through a chain of filters to your [`IoHandler`], and carries writes and
//! close requests back down to the transport.
//!
//! ## Core Concepts
//!
//! ### Service
//!
//! An [`IoService`] owns a transport endpoint. An acceptor becomes active
//! when bound, a connector when its first session opens. The service keeps
//! the set of managed sessions, a [`FilterChainBuilder`] template copied onto
//! every new session, aggregate [`TrafficStatistics`] and a list of
//! [`IoServiceListener`]s.
//!
//! ### Session
//!
//! An [`IoSession`] is one logical connection. It has a unique id, its own
//! [`FilterChain`], a write queue drained by the transport, typed attributes,
//! traffic counters and three idle tracks ([`IdleStatus`]).
//!
//! ### Filter
//!
//! A [`Filter`] is a named stage of a chain. It may observe, transform or
//! swallow each event and decides itself whether to forward it through the
//! [`NextFilter`] it is given:
//!
//! ```text
//!        session_created, message_received, ...          write(), close_now()
//!   head ------------------------------------------> tail ----------------+
//!    /|\                                               |                  |
//!     |                                          IoHandler               \|/
//!  transport <------------------------------------------------------- filters
//!           filter_write, filter_close (tail to head)
//! ```
//!
//! ### Idle detection
//!
//! An [`IdleStatusChecker`] sweeps active services and sessions once a second,
//! fires `session_idle`/`service_idle` for expired idle tracks and
//! force-closes sessions whose pending write exceeded the write timeout.
//!
//! ## Quick Example
//!
//! ```rust
//! use iochain::{
//!     DummyProcessor, IoHandler, IoServiceBuilder, IoSession, LoggingFilter, Message, Result,
//!     TransportMetadata,
//! };
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! impl IoHandler for Echo {
//!     fn message_received(&self, session: &Arc<IoSession>, message: Message) -> Result<()> {
//!         session.write(message);
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> Result<()> {
//! let service = IoServiceBuilder::connector(TransportMetadata::new("mem", "loopback", false, false))
//!     .handler(Arc::new(Echo))
//!     .filter("logger", Arc::new(LoggingFilter::default()))
//!     .build()?;
//!
//! let session = service.new_session(Arc::new(DummyProcessor::new()), None, None)?;
//! session.filter_chain().fire_message_received(Message::from("ping"));
//! assert_eq!(session.written_messages(), 1);
//!
//! session.close_now().await_uninterruptibly();
//! service.dispose(true);
//! # Ok(())
//! # }
//! ```
//!
//! ## Threading
//!
//! Nothing here runs an event loop. Events are delivered on whichever thread
//! fires them: a transport's I/O thread, the idle checker thread, or an
//! application thread calling `write`. Every shared structure is safe to use
//! concurrently. Put an [`ExecutorFilter`] in the chain to move handler work
//! onto a thread pool while keeping per-session event order.

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

// ========================================
// Module Declarations
// ========================================

/// Crate error type
pub(crate) mod error;

/// Filters, the live chain and its builder
pub mod filter;

/// One-shot completion futures
pub(crate) mod future;

/// The application-facing handler
pub(crate) mod handler;

/// Periodic idle and write-timeout detection
pub(crate) mod idle_checker;

/// Message payloads
pub(crate) mod message;

/// Process-wide error reporting
pub mod monitor;

/// The transport seam
pub(crate) mod processor;

/// Services, transport metadata and lifecycle listeners
pub(crate) mod service;

/// Sessions, their configuration and data structures
pub mod session;

/// Traffic counters and throughput
pub(crate) mod statistics;

/// Write requests and write queues
pub(crate) mod write;

// ========================================
// Public Exports
// ========================================

pub use error::{Error, Result};
pub use filter::{
    ExecutorFilter, Filter, FilterChain, FilterChainBuilder, IoEvent, IoEventType, LoggingFilter,
    NextFilter,
};
pub use future::{CloseFuture, IoFuture, WriteFuture, WriteResult};
pub use handler::IoHandler;
pub use idle_checker::{IdleStatusChecker, TICK_INTERVAL};
pub use message::Message;
pub use monitor::{ExceptionMonitor, LoggingExceptionMonitor};
pub use processor::{DummyProcessor, IoProcessor};
pub use service::{
    IoService, IoServiceBuilder, IoServiceListener, IoServiceListenerSupport, ServiceKind,
    TransportMetadata,
};
pub use session::{IdleStatus, IoSession, SessionConfig, SessionState};
pub use statistics::{Throughput, TrafficStatistics};
pub use write::{DefaultWriteRequestQueue, WriteRequest, WriteRequestQueue};

/// Re-exported so callers can build executors without a direct dependency.
pub use iochain_executor::{Executor, ExecutorBuilder, ThreadPoolExecutor};

/// Milliseconds since the Unix epoch, the clock every session timestamp uses.
pub fn current_time_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
