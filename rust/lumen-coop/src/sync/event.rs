//! A level-triggered signal: once set, every past and future `wait()` until
//! the next `clear()` resolves immediately.

use std::cell::RefCell;
use std::rc::Rc;

use crate::deferred::Deferred;
use crate::error::CoopError;
use crate::waitlist::WaitList;

struct State {
    set: bool,
    waiters: WaitList<(), CoopError>,
}

/// A broadcast, level-triggered signal.
#[derive(Clone)]
pub struct Event {
    inner: Rc<RefCell<State>>,
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl Event {
    pub fn new() -> Self {
        Self { inner: Rc::new(RefCell::new(State { set: false, waiters: WaitList::new() })) }
    }

    pub fn is_set(&self) -> bool {
        self.inner.borrow().set
    }

    /// Set the event, waking every current waiter. A no-op if already set.
    pub fn set(&self) {
        let mut state = self.inner.borrow_mut();
        if state.set {
            return;
        }
        state.set = true;
        state.waiters.wake_all(|| ());
    }

    /// Clear the event. Waiters already woken by a prior `set()` are
    /// unaffected; only future `wait()` calls will block again.
    pub fn clear(&self) {
        self.inner.borrow_mut().set = false;
    }

    /// Returns an awaitable that resolves once the event is set.
    pub fn wait(&self) -> Deferred<(), CoopError> {
        let mut state = self.inner.borrow_mut();
        if state.set {
            let d = Deferred::new();
            d.settle(()).expect("freshly constructed deferred is pending");
            return d;
        }
        let waiter = Deferred::new();
        state.waiters.push(waiter.clone());
        waiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_on_an_already_set_event_resolves_immediately() {
        let event = Event::new();
        event.set();
        assert!(event.wait().done());
    }

    #[test]
    fn set_wakes_every_outstanding_waiter() {
        let event = Event::new();
        let a = event.wait();
        let b = event.wait();
        event.set();
        assert!(a.done());
        assert!(b.done());
    }

    #[test]
    fn clear_does_not_revoke_already_resolved_waiters() {
        let event = Event::new();
        let waiter = event.wait();
        event.set();
        event.clear();
        assert!(waiter.done());
        assert!(!event.is_set());
    }

    #[test]
    fn set_is_idempotent() {
        let event = Event::new();
        event.set();
        event.set();
        assert!(event.is_set());
    }
}
