//! All-children-complete reduction of callbacks
//!
//! [`reduce_all`] waits for every child callback to reach a terminal state,
//! then hands the resolved values, failures and cancellation reasons to a
//! reducer exactly once. The reducer runs on whichever thread completes the
//! last child; an atomic countdown decides which thread that is.
//!
//! Cancelling the reduced callback cancels every child that is still
//! pending. Children that already finished are unaffected and the reducer
//! never runs.

use crate::concurrency::callback::{Callback, CancelReason, Failure, Outcome};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Terminal states of a set of children, grouped by kind
///
/// Order within each list follows completion order, not submission order.
#[derive(Debug, Clone)]
pub struct Outcomes<T> {
    /// Values of resolved children
    pub resolved: Vec<T>,
    /// Errors of failed children
    pub failed: Vec<Failure>,
    /// Reasons of cancelled children
    pub cancelled: Vec<CancelReason>,
}

impl<T> Default for Outcomes<T> {
    fn default() -> Self {
        Self {
            resolved: Vec::new(),
            failed: Vec::new(),
            cancelled: Vec::new(),
        }
    }
}

impl<T: Clone> Outcomes<T> {
    fn record(&mut self, outcome: &Outcome<T>) {
        match outcome {
            Outcome::Resolved(value) => self.resolved.push(value.clone()),
            Outcome::Failed(error) => self.failed.push(Arc::clone(error)),
            Outcome::Cancelled(reason) => self.cancelled.push(*reason),
        }
    }
}

impl<T> Outcomes<T> {
    /// Total number of children recorded
    pub fn len(&self) -> usize {
        self.resolved.len() + self.failed.len() + self.cancelled.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Countdown<T, R> {
    remaining: AtomicUsize,
    outcomes: Mutex<Outcomes<T>>,
    reducer: Mutex<Option<R>>,
}

/// Reduce `children` into a single callback once all of them are terminal
///
/// ```rust
/// use kuba_aggregation::concurrency::{reduce_all, Callback, CancelReason};
///
/// let children = vec![
///     Callback::resolved(1),
///     Callback::resolved(2),
///     Callback::cancelled(CancelReason::BackendDisabled),
/// ];
///
/// let total = reduce_all(children, |values, failed, cancelled| {
///     assert!(failed.is_empty());
///     assert_eq!(cancelled, vec![CancelReason::BackendDisabled]);
///     Ok(values.iter().sum::<i32>())
/// });
///
/// assert_eq!(total.wait().value(), Some(&3));
/// ```
pub fn reduce_all<T, U, R>(children: Vec<Callback<T>>, reducer: R) -> Callback<U>
where
    T: Clone + Send + Sync + 'static,
    U: Send + Sync + 'static,
    R: FnOnce(Vec<T>, Vec<Failure>, Vec<CancelReason>) -> Result<U> + Send + 'static,
{
    let parent = Callback::new();

    if children.is_empty() {
        finish(&parent, reducer, Outcomes::default());
        return parent;
    }

    let countdown = Arc::new(Countdown {
        remaining: AtomicUsize::new(children.len()),
        outcomes: Mutex::new(Outcomes::default()),
        reducer: Mutex::new(Some(reducer)),
    });

    for child in &children {
        let countdown = Arc::clone(&countdown);
        let parent = parent.clone();

        child.on_done(move |outcome| {
            countdown.outcomes.lock().record(outcome);

            if countdown.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
                return;
            }

            let outcomes = std::mem::take(&mut *countdown.outcomes.lock());
            let reducer = countdown.reducer.lock().take();

            if let Some(reducer) = reducer {
                if !parent.is_done() {
                    finish(&parent, reducer, outcomes);
                }
            }
        });
    }

    parent.on_cancelled(move |reason| {
        for child in &children {
            child.cancel(reason);
        }
    });

    parent
}

/// Collect the terminal states of all children without reducing them
pub fn collect_all<T>(children: Vec<Callback<T>>) -> Callback<Outcomes<T>>
where
    T: Clone + Send + Sync + 'static,
{
    reduce_all(children, |resolved, failed, cancelled| {
        Ok(Outcomes {
            resolved,
            failed,
            cancelled,
        })
    })
}

fn finish<T, U, R>(parent: &Callback<U>, reducer: R, outcomes: Outcomes<T>)
where
    U: Send + Sync + 'static,
    R: FnOnce(Vec<T>, Vec<Failure>, Vec<CancelReason>) -> Result<U>,
{
    let Outcomes {
        resolved,
        failed,
        cancelled,
    } = outcomes;

    match panic::catch_unwind(AssertUnwindSafe(move || reducer(resolved, failed, cancelled))) {
        Ok(Ok(value)) => {
            parent.resolve(value);
        }
        Ok(Err(e)) => {
            parent.fail(e);
        }
        Err(_) => {
            parent.fail(Error::ResolverPanicked("reducer panicked".to_string()));
        }
    }
}
