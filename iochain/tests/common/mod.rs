#![allow(dead_code)]

use iochain::{
    Error, IdleStatus, IdleStatusChecker, IoHandler, IoProcessor, IoService, IoServiceBuilder,
    IoSession, Message, Result, SessionConfig, TransportMetadata, WriteRequest,
};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub fn metadata() -> TransportMetadata {
    TransportMetadata::new("test", "memory", false, false)
}

/// Records every handler callback as a short string.
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<String>>,
    received: Mutex<Vec<Message>>,
    errors: Mutex<Vec<Arc<Error>>>,
    thread_names: Mutex<Vec<String>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, event: String) {
        let name = std::thread::current()
            .name()
            .unwrap_or_default()
            .to_owned();
        self.thread_names.lock().unwrap().push(name);
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.as_str() == event)
            .count()
    }

    pub fn received(&self) -> Vec<Message> {
        self.received.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<Arc<Error>> {
        self.errors.lock().unwrap().clone()
    }

    pub fn thread_names(&self) -> Vec<String> {
        self.thread_names.lock().unwrap().clone()
    }
}

impl IoHandler for RecordingHandler {
    fn session_created(&self, _session: &Arc<IoSession>) -> Result<()> {
        self.record("created".into());
        Ok(())
    }

    fn session_opened(&self, _session: &Arc<IoSession>) -> Result<()> {
        self.record("opened".into());
        Ok(())
    }

    fn session_closed(&self, _session: &Arc<IoSession>) -> Result<()> {
        self.record("closed".into());
        Ok(())
    }

    fn session_idle(&self, _session: &Arc<IoSession>, status: IdleStatus) -> Result<()> {
        self.record(format!("idle {}", status));
        Ok(())
    }

    fn exception_caught(&self, _session: &Arc<IoSession>, cause: Arc<Error>) -> Result<()> {
        self.record("exception".into());
        self.errors.lock().unwrap().push(cause);
        Ok(())
    }

    fn message_received(&self, _session: &Arc<IoSession>, message: Message) -> Result<()> {
        self.received.lock().unwrap().push(message);
        self.record("received".into());
        Ok(())
    }

    fn message_sent(&self, _session: &Arc<IoSession>, _request: WriteRequest) -> Result<()> {
        self.record("sent".into());
        Ok(())
    }

    fn input_closed(&self, session: &Arc<IoSession>) -> Result<()> {
        self.record("input closed".into());
        session.close_now();
        Ok(())
    }
}

/// A processor that writes one request at a time and only when told to.
///
/// `flush` moves the next queued request into the session's in-flight slot;
/// `complete` reports the in-flight request written and moves on to the
/// next. Removing a session destroys it synchronously.
///
/// Requests go in flight at the wall clock unless `set_now` pinned a time.
#[derive(Default)]
pub struct ManualProcessor {
    flushes: AtomicUsize,
    traffic_control_updates: AtomicUsize,
    now: AtomicU64,
}

impl ManualProcessor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn traffic_control_updates(&self) -> usize {
        self.traffic_control_updates.load(Ordering::SeqCst)
    }

    pub fn set_now(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    fn now(&self) -> u64 {
        match self.now.load(Ordering::SeqCst) {
            0 => iochain::current_time_millis(),
            now => now,
        }
    }

    /// Reports `bytes` of the in-flight request written without finishing it.
    pub fn write_partially(&self, session: &IoSession, bytes: u64, now: u64) {
        session.increase_written_bytes(bytes, now);
    }

    /// Finishes the in-flight request and starts the next one.
    pub fn complete(&self, session: &IoSession, now: u64) -> Option<WriteRequest> {
        let request = session.take_current_write_request()?;
        session.increase_written_bytes(request.message().byte_len() as u64, now);
        session.filter_chain().fire_message_sent(request.clone());
        self.flush(session);
        Some(request)
    }

    /// Finishes the remainder of the in-flight request after partial writes.
    pub fn complete_remaining(&self, session: &IoSession, remaining: u64, now: u64) {
        let Some(request) = session.take_current_write_request() else {
            return;
        };
        session.increase_written_bytes(remaining, now);
        session.filter_chain().fire_message_sent(request);
        self.flush(session);
    }
}

impl IoProcessor for ManualProcessor {
    fn flush(&self, session: &IoSession) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        if session.is_write_suspended() || session.current_write_request().is_some() {
            return;
        }
        if let Some(request) = session.poll_write_request() {
            session.set_current_write_request(Some(request), self.now());
        }
    }

    fn update_traffic_control(&self, _session: &IoSession) {
        self.traffic_control_updates.fetch_add(1, Ordering::SeqCst);
    }

    fn remove(&self, session: &IoSession) {
        session.destroy();
    }
}

/// A connector wired to `handler` and to a private, stopped idle checker.
pub fn connector(handler: Arc<dyn IoHandler>) -> (Arc<IoService>, Arc<IdleStatusChecker>) {
    connector_with_config(handler, SessionConfig::default())
}

pub fn connector_with_config(
    handler: Arc<dyn IoHandler>,
    config: SessionConfig,
) -> (Arc<IoService>, Arc<IdleStatusChecker>) {
    let checker = Arc::new(IdleStatusChecker::new());
    let service = IoServiceBuilder::connector(metadata())
        .handler(handler)
        .session_config(config)
        .idle_checker(Arc::clone(&checker))
        .build()
        .unwrap();
    (service, checker)
}

pub fn acceptor(handler: Arc<dyn IoHandler>, close_on_deactivation: bool) -> Arc<IoService> {
    IoServiceBuilder::acceptor(metadata())
        .handler(handler)
        .idle_checker(Arc::new(IdleStatusChecker::new()))
        .close_on_deactivation(close_on_deactivation)
        .build()
        .unwrap()
}

/// Polls `condition` until it holds or `timeout` expires.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
