//! # iochain Executor - Thread Pool for I/O Services
//!
//! `iochain-executor` provides the thread pool an `iochain` service owns when the
//! caller does not supply an executor of its own.
//!
//! ## Features
//!
//! - **Tokio blocking pool**: Jobs run on the blocking pool of a tokio
//!   multi-thread runtime, which grows on demand up to an optional maximum
//! - **CPU Pinning**: Pin worker threads to specific CPU cores
//! - **Thread Naming**: Name worker threads for debugging
//! - **Orderly shutdown**: Stop accepting jobs, let submitted ones finish and
//!   wait for them
//!
//! ## Quick Start
//!
//! ```rust
//! use iochain_executor::{Executor, ExecutorBuilder};
//! use std::time::Duration;
//!
//! let executor = ExecutorBuilder::new().name("my-executor").build();
//! executor
//!     .execute(Box::new(|| println!("Running on a pool thread!")))
//!     .unwrap();
//!
//! executor.shutdown();
//! assert!(executor.await_termination(Duration::from_secs(5)));
//! ```
//!
//! ## CPU Pinning
//!
//! ```rust,no_run
//! use iochain_executor::ExecutorBuilder;
//! use core_affinity::CoreId;
//!
//! let executor = ExecutorBuilder::new()
//!     .name("pinned")
//!     .max_threads(2)
//!     .core_id(CoreId { id: 0 })
//!     .core_id(CoreId { id: 1 })
//!     .build();
//! ```
//!
//! Workers are pinned round-robin over the configured cores.

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

use core_affinity::{CoreId, set_for_current};
use log::{trace, warn};
use std::{
    io::{Error, Result},
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};
use tokio::runtime::{Builder, Runtime};

/// A unit of work submitted to an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs on background threads and supports orderly shutdown.
///
/// Services talk to their executor only through this trait, so callers can
/// plug in any pool they like.
pub trait Executor: Send + Sync {
    /// Submits a job for execution.
    ///
    /// Fails once [`Executor::shutdown`] has been called.
    fn execute(&self, job: Job) -> Result<()>;

    /// Stops accepting new jobs. Already submitted jobs still run.
    fn shutdown(&self);

    /// Returns `true` once [`Executor::shutdown`] has been called.
    fn is_shutdown(&self) -> bool;

    /// Returns `true` once shut down and every submitted job has finished.
    fn is_terminated(&self) -> bool;

    /// Blocks until terminated or until `timeout` elapses.
    ///
    /// Returns whether the executor terminated.
    fn await_termination(&self, timeout: Duration) -> bool;
}

/// A factory that can be used to configure and create a [`ThreadPoolExecutor`].
#[derive(Debug, Default)]
pub struct ExecutorBuilder {
    name: String,
    max_threads: usize,
    core_ids: Vec<CoreId>,
}

impl ExecutorBuilder {
    /// Creates a new ExecutorBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the worker threads. Each worker gets the name suffixed with its index.
    pub fn name(mut self, name: &str) -> Self {
        self.name = String::from(name);
        self
    }

    /// Caps the number of threads running jobs. `0` (the default) leaves the
    /// cap to tokio.
    pub fn max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Adds a CPU core that worker threads are pinned to, round-robin.
    pub fn core_id(mut self, core_id: CoreId) -> Self {
        self.core_ids.push(core_id);
        self
    }

    /// Builds the executor. The runtime is started when the first job arrives.
    pub fn build(self) -> ThreadPoolExecutor {
        let name = if self.name.is_empty() {
            String::from("iochain-worker")
        } else {
            self.name
        };

        ThreadPoolExecutor {
            name,
            max_threads: self.max_threads,
            core_ids: Arc::new(self.core_ids),
            runtime: Mutex::new(None),
            shutdown: AtomicBool::new(false),
            pending: Arc::new(Pending::default()),
        }
    }
}

/// Jobs submitted but not finished yet.
#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    done: Condvar,
}

impl Pending {
    fn add(&self) {
        *self.count.lock().unwrap() += 1;
    }

    fn remove(&self) {
        let mut count = self.count.lock().unwrap();
        *count -= 1;
        if *count == 0 {
            self.done.notify_all();
        }
    }

    fn get(&self) -> usize {
        *self.count.lock().unwrap()
    }

    fn wait_empty(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock().unwrap();
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            count = self.done.wait_timeout(count, deadline - now).unwrap().0;
        }
        true
    }
}

/// Marks a job finished even when it panics.
struct JobGuard {
    pending: Arc<Pending>,
    name: Arc<str>,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            warn!("a job panicked on executor {}", self.name);
        }
        self.pending.remove();
    }
}

/// An executor backed by the blocking pool of a tokio runtime.
///
/// Blocking threads are created on demand, so long-running jobs such as
/// transport event loops never starve short ones as long as `max_threads`
/// is left unbounded.
pub struct ThreadPoolExecutor {
    name: String,
    max_threads: usize,
    core_ids: Arc<Vec<CoreId>>,
    runtime: Mutex<Option<Runtime>>,
    shutdown: AtomicBool,
    pending: Arc<Pending>,
}

impl ThreadPoolExecutor {
    /// Returns the number of jobs submitted but not finished yet.
    pub fn pending_jobs(&self) -> usize {
        self.pending.get()
    }

    fn build_runtime(&self) -> Result<Runtime> {
        let mut builder = Builder::new_multi_thread();
        builder.worker_threads(1);
        if self.max_threads > 0 {
            builder.max_blocking_threads(self.max_threads);
        }

        let name = self.name.clone();
        let next_name = AtomicUsize::new(0);
        builder.thread_name_fn(move || {
            format!("{}-{}", name, next_name.fetch_add(1, Ordering::SeqCst))
        });

        if !self.core_ids.is_empty() {
            let core_ids = Arc::clone(&self.core_ids);
            let next_core = AtomicUsize::new(0);
            builder.on_thread_start(move || {
                let index = next_core.fetch_add(1, Ordering::SeqCst);
                set_for_current(core_ids[index % core_ids.len()]);
            });
        }

        trace!("starting runtime of executor {}", self.name);
        builder.build()
    }
}

impl Executor for ThreadPoolExecutor {
    fn execute(&self, job: Job) -> Result<()> {
        let mut runtime = self.runtime.lock().unwrap();
        if self.is_shutdown() {
            return Err(Error::other(format!(
                "executor {} has been shut down",
                self.name
            )));
        }
        if runtime.is_none() {
            *runtime = Some(self.build_runtime()?);
        }
        let Some(runtime) = runtime.as_ref() else {
            return Err(Error::other(format!("executor {} has no runtime", self.name)));
        };

        self.pending.add();
        let guard = JobGuard {
            pending: Arc::clone(&self.pending),
            name: Arc::from(self.name.as_str()),
        };
        runtime.spawn_blocking(move || {
            let _guard = guard;
            job();
        });
        Ok(())
    }

    fn shutdown(&self) {
        let _runtime = self.runtime.lock().unwrap();
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            trace!("shutting down executor {}", self.name);
        }
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn is_terminated(&self) -> bool {
        self.is_shutdown() && self.pending.get() == 0
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        if !self.is_shutdown() || !self.pending.wait_empty(timeout) {
            return false;
        }

        // every job is done, so the runtime only holds idle threads
        if let Some(runtime) = self.runtime.lock().unwrap().take() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::runtime::Handle::try_current().is_ok() {
                runtime.shutdown_background();
            } else {
                runtime.shutdown_timeout(remaining);
            }
            trace!("executor {} terminated", self.name);
        }
        true
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(runtime) = self.runtime.lock().unwrap().take() {
            // may run inside another runtime, where blocking on shutdown panics
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn runs_submitted_jobs() {
        let executor = ExecutorBuilder::new().name("test-pool").build();
        let counter = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = mpsc::channel();

        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            let done_tx = done_tx.clone();
            executor
                .execute(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    done_tx.send(thread::current().name().map(str::to_owned)).unwrap();
                }))
                .unwrap();
        }

        for _ in 0..16 {
            let name = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert!(name.unwrap().starts_with("test-pool-"));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn rejects_jobs_after_shutdown() {
        let executor = ExecutorBuilder::new().build();
        executor.shutdown();

        assert!(executor.is_shutdown());
        assert!(executor.execute(Box::new(|| {})).is_err());
        assert!(executor.await_termination(Duration::from_secs(1)));
        assert!(executor.is_terminated());
    }

    #[test]
    fn shutdown_lets_submitted_jobs_finish() {
        let executor = ExecutorBuilder::new().max_threads(1).build();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            executor
                .execute(Box::new(move || {
                    thread::sleep(Duration::from_millis(5));
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }

        executor.shutdown();
        assert!(executor.await_termination(Duration::from_secs(5)));
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        assert_eq!(executor.pending_jobs(), 0);
    }

    #[test]
    fn respects_max_threads() {
        let executor = ExecutorBuilder::new().max_threads(2).build();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            executor
                .execute(Box::new(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(30));
                    running.fetch_sub(1, Ordering::SeqCst);
                }))
                .unwrap();
        }

        executor.shutdown();
        assert!(executor.await_termination(Duration::from_secs(5)));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn await_termination_times_out_while_running() {
        let executor = ExecutorBuilder::new().build();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        executor
            .execute(Box::new(move || {
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
            }))
            .unwrap();

        executor.shutdown();
        assert!(!executor.await_termination(Duration::from_millis(20)));
        assert!(!executor.is_terminated());

        release_tx.send(()).unwrap();
        assert!(executor.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn a_panicking_job_still_counts_as_finished() {
        let executor = ExecutorBuilder::new().build();
        executor
            .execute(Box::new(|| panic!("job failed")))
            .unwrap();

        executor.shutdown();
        assert!(executor.await_termination(Duration::from_secs(5)));
    }
}
