//! A condition variable paired with a [`Lock`].

use std::cell::RefCell;
use std::rc::Rc;

use crate::deferred::{settle_or_cancel, Deferred};
use crate::error::CoopError;
use crate::sync::Lock;
use crate::waitlist::WaitList;

/// A condition variable. Owns (or shares) a [`Lock`] and a FIFO list of
/// notify waiters.
#[derive(Clone)]
pub struct Condition {
    lock: Lock,
    waiters: Rc<RefCell<WaitList<(), CoopError>>>,
}

impl Default for Condition {
    fn default() -> Self {
        Self::new()
    }
}

impl Condition {
    pub fn new() -> Self {
        Self::with_lock(Lock::new())
    }

    /// Build a condition variable around an existing lock, so several
    /// conditions can share one critical section.
    pub fn with_lock(lock: Lock) -> Self {
        Self { lock, waiters: Rc::new(RefCell::new(WaitList::new())) }
    }

    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    pub fn locked(&self) -> bool {
        self.lock.locked()
    }

    pub fn acquire(&self) -> Deferred<(), CoopError> {
        self.lock.acquire()
    }

    pub fn release(&self) -> Result<(), CoopError> {
        self.lock.release()
    }

    /// Release the lock, wait for a `notify`, then reacquire the lock before
    /// returning. Requires the lock to already be held; fails with
    /// [`CoopError::InvalidState`] otherwise.
    ///
    /// Reacquiring after the notify can itself be contended — the retry loop
    /// below simply tries again if that inner acquire is cancelled out from
    /// under it, matching the "retry across spurious reacquire cancellation"
    /// behavior called for by the wider queue family. Both awaits below go
    /// through a cancel guard: if the caller drops this future mid-wait, the
    /// notify-waiter or the in-flight lock acquire must be cancelled rather
    /// than left live in the notify list or the lock's own waiter list —
    /// otherwise a later, unrelated `release()` would hand the lock to a
    /// waiter nobody is polling anymore, deadlocking the lock forever.
    pub async fn wait(&self) -> Result<(), CoopError> {
        if !self.lock.locked() {
            return Err(CoopError::invalid_state("condition wait without holding the lock"));
        }
        self.lock.release()?;

        let waiter: Deferred<(), CoopError> = Deferred::new();
        self.waiters.borrow_mut().push(waiter.clone());
        let notified = settle_or_cancel(waiter).await;

        loop {
            match settle_or_cancel(self.lock.acquire()).await {
                Ok(()) => break,
                Err(_) => continue,
            }
        }

        notified.map_err(|_| CoopError::Cancelled)
    }

    /// Wake one waiter blocked in `wait()`. Fails with
    /// [`CoopError::InvalidState`] if the lock is not currently held.
    pub fn notify(&self) -> Result<(), CoopError> {
        if !self.lock.locked() {
            return Err(CoopError::invalid_state("condition notify without holding the lock"));
        }
        self.waiters.borrow_mut().wake_first(());
        Ok(())
    }

    /// Wake every waiter blocked in `wait()`. Fails with
    /// [`CoopError::InvalidState`] if the lock is not currently held.
    pub fn notify_all(&self) -> Result<(), CoopError> {
        if !self.lock.locked() {
            return Err(CoopError::invalid_state("condition notify_all without holding the lock"));
        }
        self.waiters.borrow_mut().wake_all(|| ());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::LocalExecutor;
    use crate::test_support::block_on;
    use std::cell::Cell;

    #[test]
    fn wait_without_holding_the_lock_is_invalid_state() {
        let cond = Condition::new();
        assert!(matches!(block_on(cond.wait()), Err(CoopError::InvalidState(_))));
    }

    #[test]
    fn notify_wakes_a_waiter_which_then_reacquires_the_lock() {
        let exec = LocalExecutor::new();
        let cond = Condition::new();
        block_on(cond.acquire()).unwrap();

        let waiter_done = Rc::new(Cell::new(false));
        let waiter_done_in_task = Rc::clone(&waiter_done);
        let cond_in_task = cond.clone();
        exec.spawn(async move {
            cond_in_task.wait().await.unwrap();
            waiter_done_in_task.set(true);
        });

        // Drains the spawned task up to the point where it's parked inside
        // `wait()`, holding nothing — the lock was released before waiting.
        exec.run_until_idle();
        assert!(!waiter_done.get());
        assert!(!cond.locked());

        // notify() requires the lock held, mirroring the same requirement on
        // wait(); reacquire before notifying, then release so the waiter's
        // reacquire can succeed.
        block_on(cond.acquire()).unwrap();
        cond.notify().unwrap();
        cond.release().unwrap();
        exec.run_until_idle();

        assert!(waiter_done.get());
        assert!(cond.locked());
        cond.release().unwrap();
    }

    #[test]
    fn notify_without_holding_the_lock_is_invalid_state() {
        let cond = Condition::new();
        assert!(matches!(cond.notify(), Err(CoopError::InvalidState(_))));
        assert!(matches!(cond.notify_all(), Err(CoopError::InvalidState(_))));
    }

    #[test]
    fn shared_lock_is_reused_across_conditions() {
        let lock = Lock::new();
        let a = Condition::with_lock(lock.clone());
        let b = Condition::with_lock(lock.clone());
        block_on(a.acquire()).unwrap();
        assert!(b.locked());
    }
}
