//! Idle categories, idle counters and the per-session idle/write-timeout check.

use super::IoSession;
use crate::error::Error;
use log::debug;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// One of the three independent inactivity tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IdleStatus {
    /// Nothing has been read for the configured time.
    ReaderIdle,
    /// Nothing has been written for the configured time.
    WriterIdle,
    /// Nothing has been read or written for the configured time.
    BothIdle,
}

impl IdleStatus {
    /// All categories, in the order the idle checker evaluates them.
    pub const ALL: [IdleStatus; 3] = [
        IdleStatus::BothIdle,
        IdleStatus::ReaderIdle,
        IdleStatus::WriterIdle,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            IdleStatus::ReaderIdle => 0,
            IdleStatus::WriterIdle => 1,
            IdleStatus::BothIdle => 2,
        }
    }
}

impl fmt::Display for IdleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IdleStatus::ReaderIdle => "reader idle",
            IdleStatus::WriterIdle => "writer idle",
            IdleStatus::BothIdle => "both idle",
        })
    }
}

/// Consecutive idle-event counts and last idle-event times per category.
#[derive(Debug, Default)]
pub(crate) struct IdleCounters {
    counts: [AtomicU32; 3],
    last_idle_times: [AtomicU64; 3],
}

impl IdleCounters {
    pub(crate) fn count(&self, status: IdleStatus) -> u32 {
        self.counts[status.index()].load(Ordering::SeqCst)
    }

    pub(crate) fn last_idle_time(&self, status: IdleStatus) -> u64 {
        self.last_idle_times[status.index()].load(Ordering::SeqCst)
    }

    pub(crate) fn increase(&self, status: IdleStatus, now: u64) {
        self.counts[status.index()].fetch_add(1, Ordering::SeqCst);
        self.last_idle_times[status.index()].store(now, Ordering::SeqCst);
    }

    pub(crate) fn reset(&self, status: IdleStatus) {
        self.counts[status.index()].store(0, Ordering::SeqCst);
    }
}

/// Decides whether one idle category has expired.
///
/// The reference point is the later of the last activity and the last idle
/// event, so a category fires at most once per timeout period.
pub(crate) fn is_idle(now: u64, idle_time_millis: u64, last_io_time: u64, last_idle_time: u64) -> bool {
    let reference = last_io_time.max(last_idle_time);
    idle_time_millis > 0 && reference != 0 && now.saturating_sub(reference) >= idle_time_millis
}

/// Fires `session_idle` for every expired category of `session` and then
/// enforces its write timeout.
pub fn notify_idle_session(session: &Arc<IoSession>, now: u64) {
    let config = session.config();
    for status in IdleStatus::ALL {
        let last_io_time = match status {
            IdleStatus::ReaderIdle => session.last_read_time(),
            IdleStatus::WriterIdle => session.last_write_time(),
            IdleStatus::BothIdle => session.last_io_time(),
        };
        if is_idle(
            now,
            config.idle_time_millis(status),
            last_io_time,
            session.last_idle_time(status),
        ) {
            session.increase_idle_count(status, now);
            session.filter_chain().fire_session_idle(status);
        }
    }

    notify_write_timeout(session, now);
}

/// Fails the in-flight write and force-closes the session when that write
/// has made no progress for longer than the configured write timeout.
///
/// Progress is the later of the moment the request went in flight and the
/// last bytes the transport reported written.
pub fn notify_write_timeout(session: &Arc<IoSession>, now: u64) {
    let write_timeout = session.config().write_timeout_millis();
    if write_timeout == 0 {
        return;
    }
    let Some(since) = session.current_write_since() else {
        return;
    };
    if now.saturating_sub(since.max(session.last_write_time())) < write_timeout {
        return;
    }
    let Some(request) = session.take_current_write_request() else {
        return;
    };

    debug!("write timeout on session {}", session.id());
    let cause = Arc::new(Error::WriteTimeout {
        session_id: session.id(),
    });
    request.future().set_exception(Arc::clone(&cause));
    session.filter_chain().fire_exception_caught(cause);
    session.close_now();
}
