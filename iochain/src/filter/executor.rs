use super::{Filter, FilterChain, IoEvent, IoEventType, NextFilter};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::session::{IdleStatus, IoSession};
use crate::write::WriteRequest;
use iochain_executor::{Executor, ExecutorBuilder};
use log::{debug, warn};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

const DEFAULT_MAX_THREADS: usize = 16;

/// Events handed to the pool unless configured otherwise.
pub const DEFAULT_EVENT_TYPES: [IoEventType; 7] = [
    IoEventType::SessionOpened,
    IoEventType::SessionClosed,
    IoEventType::SessionIdle,
    IoEventType::ExceptionCaught,
    IoEventType::InputClosed,
    IoEventType::MessageReceived,
    IoEventType::MessageSent,
];

#[derive(Default)]
struct SessionTasks {
    state: Mutex<TasksState>,
}

#[derive(Default)]
struct TasksState {
    queue: VecDeque<(NextFilter, IoEvent)>,
    running: bool,
}

/// Moves event processing off the calling thread onto a thread pool.
///
/// Events of one session are still delivered one at a time and in the order
/// they arrived; different sessions are processed in parallel. Event kinds
/// not selected at construction pass through on the calling thread.
///
/// When built without an executor, the pool is created the first time the
/// filter is added to a chain and shut down when the filter is dropped.
pub struct ExecutorFilter {
    executor: OnceLock<Arc<dyn Executor>>,
    max_threads: usize,
    event_types: HashSet<IoEventType>,
    tasks_key: String,
}

impl Default for ExecutorFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorFilter {
    /// Creates a filter with its own lazily created pool.
    pub fn new() -> Self {
        Self::with_max_threads(DEFAULT_MAX_THREADS)
    }

    /// Creates a filter whose lazily created pool has at most `max_threads`.
    pub fn with_max_threads(max_threads: usize) -> Self {
        Self::build(OnceLock::new(), max_threads, &DEFAULT_EVENT_TYPES)
    }

    /// Creates a filter running events on `executor`.
    pub fn with_executor(executor: Arc<dyn Executor>) -> Self {
        Self::build(
            OnceLock::from(executor),
            DEFAULT_MAX_THREADS,
            &DEFAULT_EVENT_TYPES,
        )
    }

    /// Restricts the events handed to the pool to `event_types`.
    pub fn event_types(mut self, event_types: &[IoEventType]) -> Self {
        self.event_types = event_types.iter().copied().collect();
        self
    }

    fn build(executor: OnceLock<Arc<dyn Executor>>, max_threads: usize, types: &[IoEventType]) -> Self {
        static INSTANCES: AtomicU64 = AtomicU64::new(0);
        let instance = INSTANCES.fetch_add(1, Ordering::Relaxed);
        Self {
            executor,
            max_threads,
            event_types: types.iter().copied().collect(),
            tasks_key: format!("iochain.executor_filter.{}.tasks", instance),
        }
    }

    /// The pool, if it was supplied or has been created.
    pub fn executor(&self) -> Option<&Arc<dyn Executor>> {
        self.executor.get()
    }

    fn session_tasks(&self, session: &IoSession) -> Option<Arc<SessionTasks>> {
        if let Some(tasks) = session.attribute::<SessionTasks>(&self.tasks_key) {
            return Some(tasks);
        }
        session.set_attribute_if_absent(&self.tasks_key, SessionTasks::default());
        session.attribute::<SessionTasks>(&self.tasks_key)
    }

    fn fire_event(&self, next: &NextFilter, session: &Arc<IoSession>, event: IoEvent) -> Result<()> {
        if !self.event_types.contains(&event.event_type()) {
            event.fire(next, session);
            return Ok(());
        }
        let (Some(executor), Some(tasks)) = (self.executor.get(), self.session_tasks(session))
        else {
            event.fire(next, session);
            return Ok(());
        };

        {
            let mut state = tasks.state.lock().unwrap();
            state.queue.push_back((next.clone(), event));
            if state.running {
                return Ok(());
            }
            state.running = true;
        }

        let worker_tasks = Arc::clone(&tasks);
        let worker_session = Arc::clone(session);
        let job = Box::new(move || run_tasks(&worker_tasks, &worker_session));
        if let Err(e) = executor.execute(job) {
            let mut state = tasks.state.lock().unwrap();
            let dropped = state.queue.len();
            state.queue.clear();
            state.running = false;
            warn!(
                "executor rejected {} event(s) of session {}",
                dropped,
                session.id()
            );
            return Err(Error::Io(e));
        }
        Ok(())
    }
}

fn run_tasks(tasks: &SessionTasks, session: &Arc<IoSession>) {
    loop {
        let item = {
            let mut state = tasks.state.lock().unwrap();
            match state.queue.pop_front() {
                Some(item) => item,
                None => {
                    state.running = false;
                    return;
                }
            }
        };
        let (next, event) = item;
        event.fire(&next, session);
    }
}

impl fmt::Debug for ExecutorFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorFilter")
            .field("max_threads", &self.max_threads)
            .field("pool_created", &self.executor.get().is_some())
            .finish()
    }
}

impl Filter for ExecutorFilter {
    fn on_pre_add(&self, _chain: &FilterChain, name: &str, _next: &NextFilter) -> Result<()> {
        self.executor.get_or_init(|| {
            debug!("creating event pool for filter {}", name);
            let pool: Arc<dyn Executor> = Arc::new(
                ExecutorBuilder::new()
                    .name("iochain-filter")
                    .max_threads(self.max_threads)
                    .build(),
            );
            pool
        });
        Ok(())
    }

    fn session_opened(&self, next: &NextFilter, session: &Arc<IoSession>) -> Result<()> {
        self.fire_event(next, session, IoEvent::SessionOpened)
    }

    fn session_closed(&self, next: &NextFilter, session: &Arc<IoSession>) -> Result<()> {
        self.fire_event(next, session, IoEvent::SessionClosed)
    }

    fn session_idle(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        status: IdleStatus,
    ) -> Result<()> {
        self.fire_event(next, session, IoEvent::SessionIdle(status))
    }

    fn exception_caught(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        cause: Arc<Error>,
    ) -> Result<()> {
        self.fire_event(next, session, IoEvent::ExceptionCaught(cause))
    }

    fn input_closed(&self, next: &NextFilter, session: &Arc<IoSession>) -> Result<()> {
        self.fire_event(next, session, IoEvent::InputClosed)
    }

    fn message_received(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        message: Message,
    ) -> Result<()> {
        self.fire_event(next, session, IoEvent::MessageReceived(message))
    }

    fn message_sent(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        request: WriteRequest,
    ) -> Result<()> {
        self.fire_event(next, session, IoEvent::MessageSent(request))
    }

    fn filter_write(
        &self,
        next: &NextFilter,
        session: &Arc<IoSession>,
        request: WriteRequest,
    ) -> Result<()> {
        self.fire_event(next, session, IoEvent::Write(request))
    }

    fn filter_close(&self, next: &NextFilter, session: &Arc<IoSession>) -> Result<()> {
        self.fire_event(next, session, IoEvent::Close)
    }
}
