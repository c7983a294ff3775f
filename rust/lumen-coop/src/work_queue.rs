//! A bounded pipeline that runs arbitrary awaitables to completion and
//! delivers their outcomes in finish order rather than submission order.

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use crate::deferred::{CancelOnDrop, Deferred};
use crate::error::CoopError;
use crate::executor::Spawn;
use crate::queue::Queue;
use crate::waitlist::WaitList;

/// One completed unit of work: which submission it was, and what it
/// produced.
#[derive(Debug, Clone)]
pub struct Envelope<V, Err> {
    pub id: u64,
    pub outcome: Result<V, Err>,
}

struct State<V, Err> {
    max_pending: Option<usize>,
    next_id: u64,
    pending_count: usize,
    fulfilled: Queue<Envelope<V, Err>>,
    putters: WaitList<(), CoopError>,
    /// Set once `next()` has yielded an error with `allow_errors` unset —
    /// mimics a generator that has already thrown.
    poisoned: bool,
}

impl<V, Err> State<V, Err> {
    fn can_put(&self) -> bool {
        let pending_ok = self.max_pending.map_or(true, |max| self.pending_count < max);
        let fulfilled_ok = !self.fulfilled.is_full();
        pending_ok && fulfilled_ok
    }
}

/// A bounded, unordered work pipeline.
///
/// `put` admits an awaitable subject to `maxPending` (how many may be
/// in-flight) and `maxFulfilled` (how many completed-but-unclaimed results
/// may queue up); `get` delivers completed results in the order they
/// finished, which need not match submission order.
pub struct UnorderedWorkQueue<V, Err> {
    inner: Rc<RefCell<State<V, Err>>>,
    scheduler: Rc<dyn Spawn>,
    allow_errors: bool,
}

impl<V, Err> Clone for UnorderedWorkQueue<V, Err> {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner), scheduler: Rc::clone(&self.scheduler), allow_errors: self.allow_errors }
    }
}

impl<V: 'static, Err: 'static> UnorderedWorkQueue<V, Err> {
    pub fn new(scheduler: Rc<dyn Spawn>, max_pending: Option<usize>, max_fulfilled: Option<usize>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(State {
                max_pending,
                next_id: 0,
                pending_count: 0,
                fulfilled: Queue::fifo(max_fulfilled.unwrap_or(0)),
                putters: WaitList::new(),
                poisoned: false,
            })),
            scheduler,
            allow_errors: false,
        }
    }

    /// When set, `next()` keeps iterating past a failed item instead of
    /// stopping and handing the error back to the caller.
    pub fn with_allow_errors(mut self, allow_errors: bool) -> Self {
        self.allow_errors = allow_errors;
        self
    }

    pub fn pending(&self) -> usize {
        self.inner.borrow().pending_count
    }

    pub fn fulfilled(&self) -> usize {
        self.inner.borrow().fulfilled.len()
    }

    fn can_put(&self) -> bool {
        self.inner.borrow().can_put()
    }

    /// Submit an awaitable, waiting first if `maxPending` or `maxFulfilled`
    /// backpressure is currently engaged.
    pub async fn put<F>(&self, awaitable: F) -> Result<(), CoopError>
    where
        F: Future<Output = Result<V, Err>> + 'static,
    {
        loop {
            if self.can_put() {
                break;
            }
            let waiter: Deferred<(), CoopError> = Deferred::new();
            self.inner.borrow_mut().putters.push(waiter.clone());
            let guard = CancelOnDrop::new(waiter.clone());
            let result = waiter.await;
            guard.disarm();
            result.map_err(|_| CoopError::Cancelled)?;
        }

        let id = {
            let mut state = self.inner.borrow_mut();
            state.pending_count += 1;
            let id = state.next_id;
            state.next_id += 1;
            id
        };

        let inner = Rc::clone(&self.inner);
        self.scheduler.spawn(Box::pin(async move {
            let outcome = awaitable.await;
            let fulfilled = {
                let mut state = inner.borrow_mut();
                state.pending_count -= 1;
                state.fulfilled.clone()
            };
            fulfilled.put(Envelope { id, outcome }, 0).await;
            let can_put_now = inner.borrow().can_put();
            if can_put_now {
                inner.borrow_mut().putters.wake_first(());
            }
        }));

        Ok(())
    }

    /// Retrieve the next completed result, in finish order.
    pub async fn get(&self) -> Result<V, Err> {
        let fulfilled = self.inner.borrow().fulfilled.clone();
        let envelope = fulfilled.get().await;
        let can_put_now = self.can_put();
        if can_put_now {
            self.inner.borrow_mut().putters.wake_first(());
        }
        envelope.outcome
    }

    /// Iterate results until both the pending set and the fulfilled buffer
    /// are empty. With `allow_errors` unset (the default), once an error is
    /// yielded the queue is considered exhausted — every subsequent `next()`
    /// returns `None`, mirroring a generator that threw out past its caller.
    pub async fn next(&self) -> Option<Result<V, Err>> {
        if self.inner.borrow().poisoned {
            return None;
        }
        if self.pending() == 0 && self.fulfilled() == 0 {
            return None;
        }
        let result = self.get().await;
        if result.is_err() && !self.allow_errors {
            self.inner.borrow_mut().poisoned = true;
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::LocalExecutor;

    #[test]
    fn max_pending_blocks_further_submissions_until_one_finishes() {
        let exec = Rc::new(LocalExecutor::new());
        let wq: UnorderedWorkQueue<i32, CoopError> = UnorderedWorkQueue::new(exec.clone(), Some(1), None);
        exec.run(async {
            wq.put(async { Ok(1) }).await.unwrap();
            assert_eq!(wq.pending(), 1);
            // A second put would block since maxPending=1 is already in use;
            // confirm the gating condition directly instead of stalling the
            // test on an executor tick loop.
            assert!(!wq.can_put());
        });
    }

    #[test]
    fn max_fulfilled_blocks_completion_delivery_into_the_buffer() {
        let exec = Rc::new(LocalExecutor::new());
        let wq: UnorderedWorkQueue<i32, CoopError> = UnorderedWorkQueue::new(exec.clone(), None, Some(1));
        exec.run(async {
            wq.put(async { Ok(1) }).await.unwrap();
            wq.put(async { Ok(2) }).await.unwrap();
        });
        exec.run_until_idle();
        assert_eq!(wq.fulfilled(), 1);
        assert!(!wq.can_put());
    }

    #[test]
    fn results_are_retrievable_once_fulfilled() {
        let exec = Rc::new(LocalExecutor::new());
        let wq: UnorderedWorkQueue<i32, CoopError> = UnorderedWorkQueue::new(exec.clone(), None, None);
        exec.run(async {
            wq.put(async { Ok(1) }).await.unwrap();
            wq.put(async { Ok(2) }).await.unwrap();
        });
        exec.run_until_idle();
        let (first, second) = exec.run(async { (wq.get().await, wq.get().await) });
        let mut values = vec![first.unwrap(), second.unwrap()];
        values.sort();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn next_stops_at_the_first_error_by_default() {
        let exec = Rc::new(LocalExecutor::new());
        let wq: UnorderedWorkQueue<i32, CoopError> = UnorderedWorkQueue::new(exec.clone(), None, None);
        exec.run(async {
            wq.put(async { Err(CoopError::QueueEmpty) }).await.unwrap();
        });
        exec.run_until_idle();
        let outcome = exec.run(async { wq.next().await });
        assert!(matches!(outcome, Some(Err(CoopError::QueueEmpty))));
    }
}
