//! One-shot completion signals for asynchronous session operations.
//!
//! An [`IoFuture`] transitions exactly once from pending to done. Listeners
//! registered before completion run on the completing thread; listeners
//! registered afterwards run immediately on the registering thread. The
//! future can be waited on from blocking code or `.await`ed from async code.

use crate::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

type Listener<T> = Box<dyn FnOnce(&T) + Send>;

struct State<T> {
    value: Option<T>,
    listeners: Vec<Listener<T>>,
    wakers: Vec<Waker>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    done: Condvar,
}

/// A shareable one-shot result.
///
/// Clones refer to the same underlying future.
pub struct IoFuture<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for IoFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Default for IoFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> IoFuture<T> {
    /// Creates a pending future.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    value: None,
                    listeners: Vec::new(),
                    wakers: Vec::new(),
                }),
                done: Condvar::new(),
            }),
        }
    }

    /// Creates a future that is already done.
    pub fn done(value: T) -> Self {
        let future = Self::new();
        future.set_value(value);
        future
    }

    /// Returns `true` once a value has been set.
    pub fn is_done(&self) -> bool {
        self.inner.state.lock().unwrap().value.is_some()
    }

    /// Returns the value if the future is done.
    pub fn value(&self) -> Option<T> {
        self.inner.state.lock().unwrap().value.clone()
    }

    /// Completes the future.
    ///
    /// Only the first call wins and returns `true`; later calls are ignored.
    pub fn set_value(&self, value: T) -> bool {
        let (listeners, wakers) = {
            let mut state = self.inner.state.lock().unwrap();
            if state.value.is_some() {
                return false;
            }
            state.value = Some(value.clone());
            (
                std::mem::take(&mut state.listeners),
                std::mem::take(&mut state.wakers),
            )
        };

        self.inner.done.notify_all();
        for waker in wakers {
            waker.wake();
        }
        for listener in listeners {
            listener(&value);
        }
        true
    }

    /// Registers a completion listener.
    pub fn add_listener(&self, listener: impl FnOnce(&T) + Send + 'static) {
        let value = {
            let mut state = self.inner.state.lock().unwrap();
            match &state.value {
                Some(value) => value.clone(),
                None => {
                    state.listeners.push(Box::new(listener));
                    return;
                }
            }
        };
        listener(&value);
    }

    /// Waits up to `timeout` for completion and reports whether it completed.
    ///
    /// This is the bounded wait library code uses by default; a caller that
    /// wants to give up early simply passes a shorter timeout.
    pub fn await_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock().unwrap();
        while state.value.is_none() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self.inner.done.wait_timeout(state, deadline - now).unwrap().0;
        }
        true
    }

    /// Blocks until the future completes, however long it takes.
    pub fn await_uninterruptibly(&self) -> T {
        let mut state = self.inner.state.lock().unwrap();
        loop {
            if let Some(value) = &state.value {
                return value.clone();
            }
            state = self.inner.done.wait(state).unwrap();
        }
    }

    /// Returns `true` if both handles refer to the same future.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + Send + 'static> Future for IoFuture<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut state = self.inner.state.lock().unwrap();
        if let Some(value) = &state.value {
            return Poll::Ready(value.clone());
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<T> fmt::Debug for IoFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let done = self.inner.state.lock().map(|s| s.value.is_some()).unwrap_or(false);
        f.debug_struct("IoFuture").field("done", &done).finish()
    }
}

/// Completes when a session has been fully closed.
#[derive(Clone, Debug, Default)]
pub struct CloseFuture(IoFuture<()>);

impl CloseFuture {
    /// Creates a pending close future.
    pub fn new() -> Self {
        Self(IoFuture::new())
    }

    /// Returns `true` once the session is closed.
    pub fn is_closed(&self) -> bool {
        self.0.is_done()
    }

    /// Marks the session as closed. Returns `false` if it already was.
    pub fn set_closed(&self) -> bool {
        self.0.set_value(())
    }

    /// Runs `listener` once the session is closed.
    pub fn add_listener(&self, listener: impl FnOnce() + Send + 'static) {
        self.0.add_listener(move |_| listener());
    }

    /// Waits up to `timeout`; returns whether the session closed.
    pub fn await_timeout(&self, timeout: Duration) -> bool {
        self.0.await_timeout(timeout)
    }

    /// Blocks until the session is closed.
    pub fn await_uninterruptibly(&self) {
        self.0.await_uninterruptibly()
    }

    /// Returns `true` if both handles refer to the same future.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.0.ptr_eq(&other.0)
    }
}

impl Future for CloseFuture {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        Pin::new(&mut self.0).poll(cx)
    }
}

/// The outcome of a write: `Ok` once written, or the failure cause.
pub type WriteResult = Result<(), Arc<Error>>;

/// Completes when a write request has been fully written or has failed.
#[derive(Clone, Debug, Default)]
pub struct WriteFuture(IoFuture<WriteResult>);

impl WriteFuture {
    /// Creates a pending write future.
    pub fn new() -> Self {
        Self(IoFuture::new())
    }

    /// Creates a future that has already failed with `cause`.
    pub fn new_not_written(cause: Arc<Error>) -> Self {
        Self(IoFuture::done(Err(cause)))
    }

    /// Returns `true` once the future is decided either way.
    pub fn is_done(&self) -> bool {
        self.0.is_done()
    }

    /// Returns `true` if the write succeeded.
    pub fn is_written(&self) -> bool {
        matches!(self.0.value(), Some(Ok(())))
    }

    /// Returns the failure cause if the write failed.
    pub fn exception(&self) -> Option<Arc<Error>> {
        match self.0.value() {
            Some(Err(cause)) => Some(cause),
            _ => None,
        }
    }

    /// Marks the write as done. Returns `false` if already decided.
    pub fn set_written(&self) -> bool {
        self.0.set_value(Ok(()))
    }

    /// Fails the write. Returns `false` if already decided.
    pub fn set_exception(&self, cause: Arc<Error>) -> bool {
        self.0.set_value(Err(cause))
    }

    /// Runs `listener` with the outcome once decided.
    pub fn add_listener(&self, listener: impl FnOnce(&WriteResult) + Send + 'static) {
        self.0.add_listener(listener);
    }

    /// Waits up to `timeout`; returns whether the outcome is decided.
    pub fn await_timeout(&self, timeout: Duration) -> bool {
        self.0.await_timeout(timeout)
    }

    /// Blocks until decided and returns the outcome.
    pub fn await_uninterruptibly(&self) -> WriteResult {
        self.0.await_uninterruptibly()
    }
}

impl Future for WriteFuture {
    type Output = WriteResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<WriteResult> {
        Pin::new(&mut self.0).poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn completes_exactly_once() {
        let future = CloseFuture::new();
        assert!(!future.is_closed());
        assert!(future.set_closed());
        assert!(!future.set_closed());
        assert!(future.is_closed());
    }

    #[test]
    fn listeners_fire_before_and_after_completion() {
        let future = CloseFuture::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let before = Arc::clone(&fired);
        future.add_listener(move || {
            before.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        future.set_closed();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let after = Arc::clone(&fired);
        future.add_listener(move || {
            after.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn await_timeout_reports_pending() {
        let future = WriteFuture::new();
        assert!(!future.await_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn waits_across_threads() {
        let future = WriteFuture::new();
        let completer = future.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            completer.set_written();
        });

        assert!(future.await_uninterruptibly().is_ok());
        assert!(future.is_written());
        handle.join().unwrap();
    }

    #[test]
    fn first_outcome_wins() {
        let future = WriteFuture::new();
        future.set_exception(Arc::new(Error::WriteTimeout { session_id: 1 }));
        assert!(!future.set_written());
        assert!(!future.is_written());
        assert!(matches!(
            future.exception().as_deref(),
            Some(Error::WriteTimeout { session_id: 1 })
        ));
    }

    #[tokio::test]
    async fn can_be_awaited() {
        let future = CloseFuture::new();
        let completer = future.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            completer.set_closed();
        });
        future.clone().await;
        assert!(future.is_closed());
    }
}
