//! A single-owner, baton-passing exclusive lock.

use std::cell::RefCell;
use std::rc::Rc;

use crate::deferred::{Deferred, Outcome};
use crate::error::CoopError;
use crate::waitlist::WaitList;

struct State {
    locked: bool,
    waiters: WaitList<(), CoopError>,
}

/// An exclusive lock for cooperative tasks.
///
/// `acquire()` returns an already-settled [`Deferred`] when the lock is free,
/// or an awaitable one otherwise. When `release()` finds a live waiter, the
/// handoff is atomic: the waiter's immediate callback re-marks the lock held
/// before `release()` returns, so no third task can observe the lock as free
/// in between.
#[derive(Clone)]
pub struct Lock {
    inner: Rc<RefCell<State>>,
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl Lock {
    pub fn new() -> Self {
        Self { inner: Rc::new(RefCell::new(State { locked: false, waiters: WaitList::new() })) }
    }

    pub fn locked(&self) -> bool {
        self.inner.borrow().locked
    }

    /// Returns an awaitable that resolves once this task holds the lock.
    pub fn acquire(&self) -> Deferred<(), CoopError> {
        let mut state = self.inner.borrow_mut();
        if !state.locked {
            state.locked = true;
            return already_settled();
        }
        let waiter: Deferred<(), CoopError> = Deferred::new();
        let inner = Rc::clone(&self.inner);
        waiter.add_immediate_callback(move |outcome| {
            if let Outcome::Value(()) = outcome {
                inner.borrow_mut().locked = true;
            }
        });
        state.waiters.push(waiter.clone());
        waiter
    }

    /// Release the lock. Fails with [`CoopError::InvalidState`] if it isn't
    /// currently held.
    pub fn release(&self) -> Result<(), CoopError> {
        let mut state = self.inner.borrow_mut();
        if !state.locked {
            return Err(CoopError::invalid_state("release on a lock that is not held"));
        }
        state.locked = false;
        // The woken waiter's own immediate callback re-sets `locked = true`
        // synchronously inside `wake_first`, so by the time this returns the
        // lock's state already reflects whether a new owner took over.
        state.waiters.wake_first(());
        Ok(())
    }
}

fn already_settled() -> Deferred<(), CoopError> {
    let d = Deferred::new();
    d.settle(()).expect("freshly constructed deferred is pending");
    d
}
