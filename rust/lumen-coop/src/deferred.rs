//! The one-shot completion token every other primitive in this crate is
//! built from.
//!
//! A [`Deferred`] starts `Pending`, and transitions exactly once to either
//! `Settled` (with a value or an error) or `Cancelled`. Two independent
//! notification paths exist on top of that single transition:
//!
//! - *Immediate callbacks*, registered with [`Deferred::add_immediate_callback`],
//!   run synchronously, inline with the call that causes the transition.
//!   Primitives use these to finalize bookkeeping (marking a lock held,
//!   decrementing a semaphore) before any other task gets a chance to run.
//! - The [`Future`] implementation, which wakes whatever task is `.await`ing
//!   the `Deferred` on the executor's next tick.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::error::CoopError;

#[derive(Debug)]
enum State<T, E> {
    Pending,
    Settled(Result<T, E>),
    Cancelled,
}

/// A read-only view of the value a [`Deferred`] just settled (or didn't)
/// with, handed to immediate callbacks.
#[derive(Debug)]
pub enum Outcome<'a, T, E> {
    Value(&'a T),
    Error(&'a E),
    Cancelled,
}

// References are Copy regardless of what they point at.
impl<'a, T, E> Clone for Outcome<'a, T, E> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<'a, T, E> Copy for Outcome<'a, T, E> {}

type ImmediateCallback<T, E> = Box<dyn FnOnce(Outcome<'_, T, E>)>;

struct Inner<T, E> {
    state: State<T, E>,
    waker: Option<Waker>,
    immediate: Vec<ImmediateCallback<T, E>>,
    #[cfg(feature = "leak-trace")]
    backtrace: std::backtrace::Backtrace,
}

impl<T, E> Drop for Inner<T, E> {
    fn drop(&mut self) {
        #[cfg(feature = "leak-trace")]
        if matches!(self.state, State::Pending) {
            tracing::warn!(backtrace = %self.backtrace, "Deferred dropped while still pending");
        }
    }
}

/// The error surfaced when a settled or cancelled `await`er's error slot is
/// itself generic. Most primitives in this crate use `E = CoopError`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeferredError<E> {
    #[error(transparent)]
    Failed(E),
    #[error("cancelled")]
    Cancelled,
}

/// A one-shot, awaitable completion token.
///
/// Cloning a `Deferred` clones the handle, not the state — every clone
/// observes and can drive the same underlying completion.
pub struct Deferred<T, E = CoopError> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner) }
    }
}

impl<T, E> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.inner.borrow().state {
            State::Pending => "pending",
            State::Settled(Ok(_)) => "settled(value)",
            State::Settled(Err(_)) => "settled(error)",
            State::Cancelled => "cancelled",
        };
        f.debug_struct("Deferred").field("state", &label).finish()
    }
}

impl<T, E> Default for Deferred<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Deferred<T, E> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                state: State::Pending,
                waker: None,
                immediate: Vec::new(),
                #[cfg(feature = "leak-trace")]
                backtrace: std::backtrace::Backtrace::capture(),
            })),
        }
    }

    pub fn done(&self) -> bool {
        !matches!(self.inner.borrow().state, State::Pending)
    }

    pub fn cancelled(&self) -> bool {
        matches!(self.inner.borrow().state, State::Cancelled)
    }

    /// Settle with a value. Fails with [`CoopError::InvalidState`] if this
    /// `Deferred` already settled or was cancelled.
    pub fn settle(&self, value: T) -> Result<(), CoopError> {
        if !matches!(self.inner.borrow().state, State::Pending) {
            return Err(CoopError::invalid_state("deferred is already settled"));
        }
        self.complete(State::Settled(Ok(value)));
        Ok(())
    }

    /// Settle with an error. Same preconditions as [`Deferred::settle`].
    pub fn fail(&self, error: E) -> Result<(), CoopError> {
        if !matches!(self.inner.borrow().state, State::Pending) {
            return Err(CoopError::invalid_state("deferred is already settled"));
        }
        self.complete(State::Settled(Err(error)));
        Ok(())
    }

    /// Cancel a still-pending `Deferred`. Returns `false` (not an error) if
    /// it had already settled or been cancelled — cancellation racing a
    /// settle is expected, not exceptional.
    pub fn cancel(&self) -> bool {
        if !matches!(self.inner.borrow().state, State::Pending) {
            return false;
        }
        self.complete(State::Cancelled);
        true
    }

    /// Register a callback to run the instant this `Deferred` transitions
    /// out of `Pending`. If it already has, the callback runs synchronously,
    /// right here.
    pub fn add_immediate_callback<F>(&self, callback: F)
    where
        F: FnOnce(Outcome<'_, T, E>) + 'static,
    {
        let inner = self.inner.borrow();
        match &inner.state {
            State::Pending => {
                drop(inner);
                self.inner.borrow_mut().immediate.push(Box::new(callback));
            }
            State::Settled(Ok(v)) => callback(Outcome::Value(v)),
            State::Settled(Err(e)) => callback(Outcome::Error(e)),
            State::Cancelled => callback(Outcome::Cancelled),
        }
    }

    fn complete(&self, new_state: State<T, E>) {
        let (waker, callbacks) = {
            let mut inner = self.inner.borrow_mut();
            inner.state = new_state;
            (inner.waker.take(), std::mem::take(&mut inner.immediate))
        };
        if !callbacks.is_empty() {
            let inner = self.inner.borrow();
            let outcome = match &inner.state {
                State::Settled(Ok(v)) => Outcome::Value(v),
                State::Settled(Err(e)) => Outcome::Error(e),
                State::Cancelled => Outcome::Cancelled,
                State::Pending => unreachable!("state was just set to non-pending"),
            };
            for callback in callbacks {
                callback(outcome);
            }
        }
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T: Clone, E: Clone> Deferred<T, E> {
    /// The settled value. `Err(CoopError::Cancelled)` if cancelled,
    /// `Err(CoopError::InvalidState(_))` if still pending or settled with an
    /// error instead.
    pub fn result(&self) -> Result<T, CoopError> {
        match &self.inner.borrow().state {
            State::Pending => Err(CoopError::invalid_state("deferred is still pending")),
            State::Cancelled => Err(CoopError::Cancelled),
            State::Settled(Ok(v)) => Ok(v.clone()),
            State::Settled(Err(_)) => Err(CoopError::invalid_state("deferred settled with an error")),
        }
    }

    /// The settled error. Same accessibility rules as [`Deferred::result`].
    pub fn error(&self) -> Result<E, CoopError> {
        match &self.inner.borrow().state {
            State::Pending => Err(CoopError::invalid_state("deferred is still pending")),
            State::Cancelled => Err(CoopError::Cancelled),
            State::Settled(Err(e)) => Ok(e.clone()),
            State::Settled(Ok(_)) => Err(CoopError::invalid_state("deferred settled with a value")),
        }
    }
}

impl<T: Clone, E: Clone> Future for Deferred<T, E> {
    type Output = Result<T, DeferredError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.inner.borrow_mut();
        match &inner.state {
            State::Pending => {
                inner.waker = Some(cx.waker().clone());
                Poll::Pending
            }
            State::Settled(Ok(v)) => Poll::Ready(Ok(v.clone())),
            State::Settled(Err(e)) => Poll::Ready(Err(DeferredError::Failed(e.clone()))),
            State::Cancelled => Poll::Ready(Err(DeferredError::Cancelled)),
        }
    }
}

/// Cancels the wrapped `Deferred` if it is still pending when dropped.
///
/// Every higher-level operation that hides an internal waiter `Deferred`
/// behind an `async fn` (queues, the work queue, conditions) needs this: if
/// the caller drops the returned future before it resolves, the waiter must
/// be detached from whatever wait list it sits in, or later wakers will keep
/// finding and trying to settle a waiter nobody is polling anymore.
pub(crate) struct CancelOnDrop<T: Clone, E: Clone> {
    deferred: Deferred<T, E>,
    armed: bool,
}

impl<T: Clone, E: Clone> CancelOnDrop<T, E> {
    pub(crate) fn new(deferred: Deferred<T, E>) -> Self {
        Self { deferred, armed: true }
    }

    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl<T: Clone, E: Clone> Drop for CancelOnDrop<T, E> {
    fn drop(&mut self) {
        if self.armed && !self.deferred.done() {
            self.deferred.cancel();
        }
    }
}

/// Await a `Deferred` cancel-safely: if the returned future is dropped before
/// it resolves, the `Deferred` is cancelled instead of left live. Any call
/// site that `.await`s a `Deferred` it does not otherwise hold a guard over —
/// e.g. a bare `lock.acquire().await` — needs this rather than awaiting the
/// `Deferred` directly, or an abandoned await leaves a permanently-live
/// waiter sitting in whatever list it was registered on.
pub(crate) async fn settle_or_cancel<T: Clone, E: Clone>(deferred: Deferred<T, E>) -> Result<T, DeferredError<E>> {
    let guard = CancelOnDrop::new(deferred.clone());
    let result = deferred.await;
    guard.disarm();
    result
}
