//! A counting semaphore with the same atomic-handoff discipline as [`Lock`](crate::sync::Lock).

use std::cell::RefCell;
use std::rc::Rc;

use crate::deferred::{Deferred, Outcome};
use crate::error::CoopError;
use crate::waitlist::WaitList;

struct State {
    permits: u64,
    waiters: WaitList<(), CoopError>,
}

/// A counting semaphore.
///
/// `release()` increments the permit count and then, if a live waiter is
/// queued, immediately hands the freed permit to it — the waiter's immediate
/// callback decrements the count back down as part of settling, so the
/// permit is never observably "available" between a release and its
/// handoff.
#[derive(Clone)]
pub struct Semaphore {
    inner: Rc<RefCell<State>>,
}

impl Semaphore {
    /// Fails with [`CoopError::InvalidState`] if `value` is negative.
    pub fn new(value: i64) -> Result<Self, CoopError> {
        if value < 0 {
            return Err(CoopError::invalid_state("semaphore value must not be negative"));
        }
        Ok(Self { inner: Rc::new(RefCell::new(State { permits: value as u64, waiters: WaitList::new() })) })
    }

    pub fn available(&self) -> u64 {
        self.inner.borrow().permits
    }

    /// Returns an awaitable that resolves once a permit has been acquired.
    pub fn acquire(&self) -> Deferred<(), CoopError> {
        let mut state = self.inner.borrow_mut();
        if state.permits > 0 {
            state.permits -= 1;
            let d = Deferred::new();
            d.settle(()).expect("freshly constructed deferred is pending");
            return d;
        }
        let waiter: Deferred<(), CoopError> = Deferred::new();
        // Registered now, but only fires once this waiter is actually
        // granted a permit by a future `release()` — that's the moment the
        // permit it was handed needs to come back off the count.
        let inner = Rc::clone(&self.inner);
        waiter.add_immediate_callback(move |outcome| {
            if let Outcome::Value(()) = outcome {
                inner.borrow_mut().permits -= 1;
            }
        });
        state.waiters.push(waiter.clone());
        waiter
    }

    /// Release one permit, or hand it directly to the next live waiter.
    pub fn release(&self) {
        let mut state = self.inner.borrow_mut();
        state.permits += 1;
        state.waiters.wake_first(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::block_on;

    #[test]
    fn negative_initial_value_is_rejected() {
        assert!(matches!(Semaphore::new(-1), Err(CoopError::InvalidState(_))));
    }

    #[test]
    fn acquire_below_capacity_resolves_immediately_and_decrements() {
        let sem = Semaphore::new(2).unwrap();
        assert!(sem.acquire().done());
        assert_eq!(sem.available(), 1);
    }

    #[test]
    fn acquire_past_capacity_blocks_until_release() {
        let sem = Semaphore::new(1).unwrap();
        block_on(sem.acquire()).unwrap();
        let waiter = sem.acquire();
        assert!(!waiter.done());
        sem.release();
        assert!(waiter.done());
        assert_eq!(sem.available(), 0);
    }

    #[test]
    fn permit_count_never_observably_double_counts_across_handoff() {
        let sem = Semaphore::new(0).unwrap();
        let waiter = sem.acquire();
        sem.release();
        assert!(waiter.done());
        // the permit went straight to the waiter: nothing left available.
        assert_eq!(sem.available(), 0);
    }

    #[test]
    fn cancelled_waiter_does_not_consume_a_released_permit() {
        let sem = Semaphore::new(0).unwrap();
        let cancelled_waiter = sem.acquire();
        let live_waiter = sem.acquire();
        cancelled_waiter.cancel();
        sem.release();
        assert!(live_waiter.done());
        assert_eq!(sem.available(), 0);
    }
}
