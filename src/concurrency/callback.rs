//! Single-assignment future with listeners
//!
//! A [`Callback`] ends in exactly one of three terminal states: resolved with
//! a value, failed with an error, or cancelled with a [`CancelReason`]. The
//! first completion wins; later `resolve`/`fail`/`cancel` calls return `false`
//! and change nothing.
//!
//! Listeners registered before completion run on the completing thread, in
//! registration order. Listeners registered afterwards run immediately on the
//! registering thread. Either way each listener runs exactly once.

use crate::error::Error;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared failure carried by a failed callback
pub type Failure = Arc<Error>;

/// Why a callback terminated without a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The storage backend is disabled or not ready
    BackendDisabled,
    /// The caller gave up on the result
    Cancelled,
    /// The operation ran out of time
    Timeout,
    /// The process is shutting down
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::BackendDisabled => write!(f, "backend disabled"),
            CancelReason::Cancelled => write!(f, "cancelled by caller"),
            CancelReason::Timeout => write!(f, "timed out"),
            CancelReason::Shutdown => write!(f, "shutting down"),
        }
    }
}

/// Terminal state of a callback
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    /// Completed with a value
    Resolved(T),
    /// Completed with an error
    Failed(Failure),
    /// Terminated without a value
    Cancelled(CancelReason),
}

impl<T> Outcome<T> {
    /// Whether the outcome carries a value
    pub fn is_resolved(&self) -> bool {
        matches!(self, Outcome::Resolved(_))
    }

    /// Whether the outcome is a failure
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    /// Whether the outcome is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled(_))
    }

    /// Borrow the value, if resolved
    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Resolved(value) => Some(value),
            _ => None,
        }
    }

    /// Label used for metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Resolved(_) => "resolved",
            Outcome::Failed(_) => "failed",
            Outcome::Cancelled(_) => "cancelled",
        }
    }
}

impl<T: Clone> Outcome<T> {
    /// Convert into a `Result`, mapping cancellation to [`Error::Cancelled`]
    pub fn to_result(&self) -> Result<T, Failure> {
        match self {
            Outcome::Resolved(value) => Ok(value.clone()),
            Outcome::Failed(error) => Err(Arc::clone(error)),
            Outcome::Cancelled(reason) => Err(Arc::new(Error::Cancelled(*reason))),
        }
    }
}

type Listener<T> = Box<dyn FnOnce(Arc<Outcome<T>>) + Send>;

enum State<T> {
    Pending(Vec<Listener<T>>),
    Done(Arc<Outcome<T>>),
}

struct Inner<T> {
    state: Mutex<State<T>>,
    done: Condvar,
}

/// Single-assignment future
///
/// Cloning a callback produces another handle to the same cell.
///
/// ```rust
/// use kuba_aggregation::concurrency::{Callback, CancelReason};
///
/// let callback = Callback::new();
/// assert!(callback.resolve(42));
/// assert!(!callback.cancel(CancelReason::Cancelled));
/// assert_eq!(callback.wait().value(), Some(&42));
/// ```
pub struct Callback<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Callback<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> Default for Callback<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Callback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.inner.state.lock() {
            State::Pending(listeners) => format!("pending({} listeners)", listeners.len()),
            State::Done(outcome) => outcome.label().to_string(),
        };
        f.debug_struct("Callback").field("state", &state).finish()
    }
}

impl<T: Send + Sync + 'static> Callback<T> {
    /// Create a pending callback
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Pending(Vec::new())),
                done: Condvar::new(),
            }),
        }
    }

    fn terminal(outcome: Outcome<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Done(Arc::new(outcome))),
                done: Condvar::new(),
            }),
        }
    }

    /// Callback that is already resolved
    pub fn resolved(value: T) -> Self {
        Self::terminal(Outcome::Resolved(value))
    }

    /// Callback that has already failed
    pub fn failed(error: Error) -> Self {
        Self::terminal(Outcome::Failed(Arc::new(error)))
    }

    /// Callback that has already been cancelled
    pub fn cancelled(reason: CancelReason) -> Self {
        Self::terminal(Outcome::Cancelled(reason))
    }

    /// Resolve with a value; returns `false` if already terminal
    pub fn resolve(&self, value: T) -> bool {
        self.complete(Outcome::Resolved(value))
    }

    /// Fail with an error; returns `false` if already terminal
    pub fn fail(&self, error: Error) -> bool {
        self.complete(Outcome::Failed(Arc::new(error)))
    }

    /// Fail with an error shared with other callbacks
    pub fn fail_shared(&self, error: Failure) -> bool {
        self.complete(Outcome::Failed(error))
    }

    /// Cancel; returns `false` if already terminal
    pub fn cancel(&self, reason: CancelReason) -> bool {
        self.complete(Outcome::Cancelled(reason))
    }

    fn complete(&self, outcome: Outcome<T>) -> bool {
        let (listeners, outcome) = {
            let mut state = self.inner.state.lock();
            if matches!(*state, State::Done(_)) {
                return false;
            }

            let outcome = Arc::new(outcome);
            let previous = std::mem::replace(&mut *state, State::Done(Arc::clone(&outcome)));
            self.inner.done.notify_all();

            match previous {
                State::Pending(listeners) => (listeners, outcome),
                State::Done(_) => (Vec::new(), outcome),
            }
        };

        for listener in listeners {
            listener(Arc::clone(&outcome));
        }

        true
    }

    fn listen(&self, listener: Listener<T>) {
        let outcome = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                State::Pending(listeners) => {
                    listeners.push(listener);
                    return;
                }
                State::Done(outcome) => Arc::clone(outcome),
            }
        };

        listener(outcome);
    }

    /// Register a listener for the terminal state
    pub fn on_done<F>(&self, listener: F) -> &Self
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        self.listen(Box::new(move |outcome| listener(outcome.as_ref())));
        self
    }

    /// Register a listener that only runs when the callback resolves
    pub fn on_resolved<F>(&self, listener: F) -> &Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.on_done(move |outcome| {
            if let Outcome::Resolved(value) = outcome {
                listener(value);
            }
        })
    }

    /// Register a listener that only runs when the callback is cancelled
    pub fn on_cancelled<F>(&self, listener: F) -> &Self
    where
        F: FnOnce(CancelReason) + Send + 'static,
    {
        self.on_done(move |outcome| {
            if let Outcome::Cancelled(reason) = outcome {
                listener(*reason);
            }
        })
    }

    /// Whether the callback has reached a terminal state
    pub fn is_done(&self) -> bool {
        matches!(*self.inner.state.lock(), State::Done(_))
    }

    /// Peek at the terminal state without blocking
    pub fn outcome(&self) -> Option<Arc<Outcome<T>>> {
        match &*self.inner.state.lock() {
            State::Done(outcome) => Some(Arc::clone(outcome)),
            State::Pending(_) => None,
        }
    }

    /// Block the current thread until the callback is terminal
    ///
    /// Must not be called from a pool worker that the callback itself waits
    /// on, or the pool can deadlock.
    pub fn wait(&self) -> Arc<Outcome<T>> {
        let mut state = self.inner.state.lock();
        loop {
            if let State::Done(outcome) = &*state {
                return Arc::clone(outcome);
            }
            self.inner.done.wait(&mut state);
        }
    }

    /// Block until terminal or until `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Arc<Outcome<T>>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            if let State::Done(outcome) = &*state {
                return Some(Arc::clone(outcome));
            }
            if self.inner.done.wait_until(&mut state, deadline).timed_out() {
                return match &*state {
                    State::Done(outcome) => Some(Arc::clone(outcome)),
                    State::Pending(_) => None,
                };
            }
        }
    }

    /// Await the terminal state from async code
    pub async fn join(&self) -> Arc<Outcome<T>> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.listen(Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }));

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Arc::new(Outcome::Cancelled(CancelReason::Shutdown)),
        }
    }

    /// Derive a callback by applying `f` to the resolved value
    ///
    /// Failures and cancellations pass through unchanged. Cancelling the
    /// derived callback cancels this one.
    pub fn transform<U, F>(&self, f: F) -> Callback<U>
    where
        T: Clone,
        U: Send + Sync + 'static,
        F: FnOnce(T) -> crate::error::Result<U> + Send + 'static,
    {
        let derived = Callback::new();

        let target = derived.clone();
        self.on_done(move |outcome| match outcome {
            Outcome::Resolved(value) => match f(value.clone()) {
                Ok(mapped) => {
                    target.resolve(mapped);
                }
                Err(e) => {
                    target.fail(e);
                }
            },
            Outcome::Failed(error) => {
                target.fail_shared(Arc::clone(error));
            }
            Outcome::Cancelled(reason) => {
                target.cancel(*reason);
            }
        });

        let source = self.clone();
        derived.on_cancelled(move |reason| {
            source.cancel(reason);
        });

        derived
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_first_completion_wins() {
        let callback = Callback::new();
        assert!(callback.resolve(1));
        assert!(!callback.resolve(2));
        assert!(!callback.fail(Error::Backend("late".into())));
        assert!(!callback.cancel(CancelReason::Timeout));
        assert_eq!(callback.wait().value(), Some(&1));
    }

    #[test]
    fn test_cancel_after_resolve_is_noop() {
        let callback = Callback::resolved("done".to_string());
        assert!(!callback.cancel(CancelReason::Cancelled));
        assert!(callback.outcome().unwrap().is_resolved());
    }

    #[test]
    fn test_listeners_fire_once_before_and_after() {
        let fired = Arc::new(AtomicUsize::new(0));
        let callback: Callback<u32> = Callback::new();

        let counter = Arc::clone(&fired);
        callback.on_done(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        callback.cancel(CancelReason::BackendDisabled);
        callback.cancel(CancelReason::Timeout);

        let counter = Arc::clone(&fired);
        callback.on_cancelled(move |reason| {
            assert_eq!(reason, CancelReason::BackendDisabled);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_double_resolution() {
        let callback: Callback<usize> = Callback::new();
        let wins = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let callback = callback.clone();
                let wins = Arc::clone(&wins);
                thread::spawn(move || {
                    if callback.resolve(i) {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert!(callback.wait().is_resolved());
    }

    #[test]
    fn test_wait_timeout_pending() {
        let callback: Callback<()> = Callback::new();
        assert!(callback.wait_timeout(Duration::from_millis(10)).is_none());

        let remote = callback.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.resolve(());
        });

        assert!(callback.wait_timeout(Duration::from_secs(5)).is_some());
        handle.join().unwrap();
    }

    #[test]
    fn test_transform() {
        let source: Callback<i64> = Callback::new();
        let doubled = source.transform(|v| Ok(v * 2));
        source.resolve(21);
        assert_eq!(doubled.wait().value(), Some(&42));

        let failing = Callback::resolved(1).transform::<i64, _>(|_| {
            Err(Error::Backend("boom".into()))
        });
        assert!(failing.wait().is_failed());
    }

    #[test]
    fn test_transform_cancel_reaches_source() {
        let source: Callback<i64> = Callback::new();
        let derived = source.transform(Ok);
        derived.cancel(CancelReason::Timeout);

        match &*source.wait() {
            Outcome::Cancelled(reason) => assert_eq!(*reason, CancelReason::Timeout),
            other => panic!("unexpected outcome {:?}", other.label()),
        }
    }

    #[test]
    fn test_to_result() {
        let cancelled: Outcome<u8> = Outcome::Cancelled(CancelReason::Shutdown);
        let err = cancelled.to_result().unwrap_err();
        assert!(matches!(*err, Error::Cancelled(CancelReason::Shutdown)));
    }

    #[tokio::test]
    async fn test_join() {
        let callback: Callback<u8> = Callback::new();
        let remote = callback.clone();
        std::thread::spawn(move || {
            remote.resolve(7);
        });
        assert_eq!(callback.join().await.value(), Some(&7));
    }
}
