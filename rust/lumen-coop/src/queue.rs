//! A single `Queue<T>` type realizing FIFO, LIFO and priority disciplines,
//! instead of three separate classes sharing a common shape.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::rc::Rc;

use crate::deferred::{CancelOnDrop, Deferred};
use crate::error::CoopError;
use crate::sync::Event;
use crate::waitlist::WaitList;

/// Which order items come back out in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    Fifo,
    Lifo,
    /// Lowest `priority` key first; ties broken by insertion order.
    Priority,
}

struct PriorityEntry<T> {
    priority: i64,
    seq: u64,
    item: T,
}

impl<T> PartialEq for PriorityEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl<T> Eq for PriorityEntry<T> {}
impl<T> PartialOrd for PriorityEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for PriorityEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority).then(self.seq.cmp(&other.seq))
    }
}

enum Storage<T> {
    Linear(VecDeque<T>),
    // `BinaryHeap` is a max-heap; wrapping entries in `Reverse` makes `pop`
    // return the smallest (priority, seq) pair instead — lowest priority
    // value wins, ties broken by insertion order.
    Priority(BinaryHeap<std::cmp::Reverse<PriorityEntry<T>>>),
}

struct State<T> {
    discipline: Discipline,
    maxsize: usize,
    storage: Storage<T>,
    next_seq: u64,
    getters: WaitList<(), CoopError>,
    putters: WaitList<(), CoopError>,
    threshold_waiters: Vec<(usize, Deferred<(), CoopError>)>,
    unfinished: u64,
    finished: Event,
}

impl<T> State<T> {
    fn len(&self) -> usize {
        match &self.storage {
            Storage::Linear(d) => d.len(),
            Storage::Priority(h) => h.len(),
        }
    }

    fn is_full(&self) -> bool {
        self.maxsize != 0 && self.len() >= self.maxsize
    }

    fn push(&mut self, item: T, priority: i64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        match &mut self.storage {
            Storage::Linear(d) => d.push_back(item),
            Storage::Priority(h) => h.push(std::cmp::Reverse(PriorityEntry { priority, seq, item })),
        }
    }

    fn pop(&mut self) -> Option<T> {
        match &mut self.storage {
            Storage::Linear(d) => match self.discipline {
                Discipline::Fifo => d.pop_front(),
                Discipline::Lifo => d.pop_back(),
                Discipline::Priority => unreachable!("priority discipline uses the heap storage"),
            },
            Storage::Priority(h) => h.pop().map(|std::cmp::Reverse(entry)| entry.item),
        }
    }

    fn check_threshold_waiters(&mut self) {
        let len = self.len();
        self.threshold_waiters.retain(|(n, waiter)| {
            if waiter.done() {
                return false;
            }
            if len >= *n {
                waiter.settle(()).expect("threshold waiter just checked to still be pending");
                return false;
            }
            true
        });
    }

    /// Insert without waiting; bookkeeping side effects a caller-facing
    /// `put_no_wait` and a woken blocking `put` both need.
    fn do_put(&mut self, item: T, priority: i64) {
        self.push(item, priority);
        self.unfinished += 1;
        self.finished.clear();
        self.check_threshold_waiters();
        self.getters.wake_first(());
    }

    /// Extract without waiting; same shared bookkeeping as `do_put`.
    fn do_get(&mut self) -> T {
        let item = self.pop().expect("caller already checked the queue is non-empty");
        self.putters.wake_first(());
        item
    }
}

/// A bounded or unbounded queue with pluggable ordering.
pub struct Queue<T> {
    inner: Rc<RefCell<State<T>>>,
}

// Written by hand rather than derived: cloning the handle never requires
// `T: Clone`, but `#[derive(Clone)]` would add that bound anyway.
impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner) }
    }
}

impl<T> Queue<T> {
    fn new(discipline: Discipline, maxsize: usize) -> Self {
        let storage = match discipline {
            Discipline::Priority => Storage::Priority(BinaryHeap::new()),
            _ => Storage::Linear(VecDeque::new()),
        };
        Self {
            inner: Rc::new(RefCell::new(State {
                discipline,
                maxsize,
                storage,
                next_seq: 0,
                getters: WaitList::new(),
                putters: WaitList::new(),
                threshold_waiters: Vec::new(),
                unfinished: 0,
                finished: Event::new(),
            })),
        }
    }

    /// `maxsize == 0` means unbounded.
    pub fn fifo(maxsize: usize) -> Self {
        Self::new(Discipline::Fifo, maxsize)
    }

    pub fn lifo(maxsize: usize) -> Self {
        Self::new(Discipline::Lifo, maxsize)
    }

    pub fn priority(maxsize: usize) -> Self {
        Self::new(Discipline::Priority, maxsize)
    }

    pub fn discipline(&self) -> Discipline {
        self.inner.borrow().discipline
    }

    pub fn maxsize(&self) -> usize {
        self.inner.borrow().maxsize
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.inner.borrow().is_full()
    }

    /// Non-blocking put. `priority` is ignored unless this queue uses
    /// [`Discipline::Priority`].
    pub fn put_no_wait(&self, item: T, priority: i64) -> Result<(), CoopError> {
        let mut state = self.inner.borrow_mut();
        if state.is_full() {
            return Err(CoopError::QueueFull);
        }
        state.do_put(item, priority);
        Ok(())
    }

    /// Non-blocking get.
    pub fn get_no_wait(&self) -> Result<T, CoopError> {
        let mut state = self.inner.borrow_mut();
        if state.is_empty() {
            return Err(CoopError::QueueEmpty);
        }
        Ok(state.do_get())
    }

    /// Put `item`, waiting for room if the queue is at capacity.
    pub async fn put(&self, item: T, priority: i64) {
        loop {
            {
                let mut state = self.inner.borrow_mut();
                if !state.is_full() {
                    state.do_put(item, priority);
                    return;
                }
            }
            let waiter: Deferred<(), CoopError> = Deferred::new();
            self.inner.borrow_mut().putters.push(waiter.clone());
            let guard = CancelOnDrop::new(waiter.clone());
            let _ = waiter.await;
            guard.disarm();
            // Woken because room opened up, but another putter (or a
            // directly-called `put_no_wait`) may have claimed it first —
            // loop back and re-check rather than assuming the slot is ours.
        }
    }

    /// Get an item, waiting if the queue is empty.
    pub async fn get(&self) -> T {
        loop {
            {
                let mut state = self.inner.borrow_mut();
                if !state.is_empty() {
                    return state.do_get();
                }
            }
            let waiter: Deferred<(), CoopError> = Deferred::new();
            self.inner.borrow_mut().getters.push(waiter.clone());
            let guard = CancelOnDrop::new(waiter.clone());
            let _ = waiter.await;
            guard.disarm();
        }
    }

    /// Drain every item currently buffered, waiting first if the queue is
    /// empty.
    pub async fn get_all(&self) -> Vec<T> {
        loop {
            {
                let mut state = self.inner.borrow_mut();
                if !state.is_empty() {
                    let mut drained = Vec::with_capacity(state.len());
                    while !state.is_empty() {
                        drained.push(state.pop().expect("just checked non-empty"));
                    }
                    let freed = drained.len();
                    state.putters.wake_up_to(freed, || ());
                    return drained;
                }
            }
            let waiter: Deferred<(), CoopError> = Deferred::new();
            self.inner.borrow_mut().getters.push(waiter.clone());
            let guard = CancelOnDrop::new(waiter.clone());
            let _ = waiter.await;
            guard.disarm();
        }
    }

    /// Wait until at least `n` items are buffered, without consuming any.
    /// Re-arms itself on spurious wakeups (e.g. another task drained the
    /// queue back below the threshold before this one got to run).
    pub async fn wait(&self, n: usize) -> Result<(), CoopError> {
        let n = n.max(1);
        loop {
            let waiter = {
                let mut state = self.inner.borrow_mut();
                if state.len() >= n {
                    return Ok(());
                }
                let d: Deferred<(), CoopError> = Deferred::new();
                state.threshold_waiters.push((n, d.clone()));
                d
            };
            let guard = CancelOnDrop::new(waiter.clone());
            let result = waiter.await;
            guard.disarm();
            result.map_err(|_| CoopError::Cancelled)?;
        }
    }

    /// Mark one previously gotten task as done. Fails with
    /// [`CoopError::InvalidState`] if called more times than there are
    /// outstanding tasks.
    pub fn task_done(&self) -> Result<(), CoopError> {
        let mut state = self.inner.borrow_mut();
        if state.unfinished == 0 {
            return Err(CoopError::invalid_state("task_done called more times than there are outstanding tasks"));
        }
        state.unfinished -= 1;
        if state.unfinished == 0 {
            state.finished.set();
        }
        Ok(())
    }

    /// Resolves once every put item has had a matching `task_done`.
    pub fn join(&self) -> Deferred<(), CoopError> {
        self.inner.borrow().finished.wait()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::block_on;

    #[test]
    fn fifo_preserves_insertion_order() {
        let q = Queue::fifo(0);
        q.put_no_wait(1, 0).unwrap();
        q.put_no_wait(2, 0).unwrap();
        q.put_no_wait(3, 0).unwrap();
        assert_eq!(q.get_no_wait().unwrap(), 1);
        assert_eq!(q.get_no_wait().unwrap(), 2);
        assert_eq!(q.get_no_wait().unwrap(), 3);
    }

    #[test]
    fn lifo_reverses_insertion_order() {
        let q = Queue::lifo(0);
        q.put_no_wait(1, 0).unwrap();
        q.put_no_wait(2, 0).unwrap();
        q.put_no_wait(3, 0).unwrap();
        assert_eq!(q.get_no_wait().unwrap(), 3);
        assert_eq!(q.get_no_wait().unwrap(), 2);
        assert_eq!(q.get_no_wait().unwrap(), 1);
    }

    #[test]
    fn priority_orders_by_key_then_insertion() {
        let q = Queue::priority(0);
        q.put_no_wait("low", 10).unwrap();
        q.put_no_wait("high-a", 1).unwrap();
        q.put_no_wait("high-b", 1).unwrap();
        assert_eq!(q.get_no_wait().unwrap(), "high-a");
        assert_eq!(q.get_no_wait().unwrap(), "high-b");
        assert_eq!(q.get_no_wait().unwrap(), "low");
    }

    #[test]
    fn put_no_wait_on_full_queue_fails() {
        let q = Queue::fifo(1);
        q.put_no_wait(1, 0).unwrap();
        assert!(matches!(q.put_no_wait(2, 0), Err(CoopError::QueueFull)));
    }

    #[test]
    fn get_no_wait_on_empty_queue_fails() {
        let q: Queue<i32> = Queue::fifo(0);
        assert!(matches!(q.get_no_wait(), Err(CoopError::QueueEmpty)));
    }

    #[test]
    fn blocking_get_resolves_once_an_item_is_available() {
        let q: Queue<i32> = Queue::fifo(0);
        assert!(q.is_empty());
        q.put_no_wait(7, 0).unwrap();
        assert_eq!(block_on(q.get()), 7);
    }

    #[test]
    fn wait_resolves_once_threshold_is_met_and_does_not_consume() {
        let q: Queue<i32> = Queue::fifo(0);
        q.put_no_wait(1, 0).unwrap();
        block_on(q.wait(1)).unwrap();
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn join_resolves_once_every_put_item_is_marked_done() {
        let q: Queue<i32> = Queue::fifo(0);
        q.put_no_wait(1, 0).unwrap();
        q.put_no_wait(2, 0).unwrap();
        let joined = q.join();
        assert!(!joined.done());
        q.task_done().unwrap();
        assert!(!joined.done());
        q.task_done().unwrap();
        assert!(joined.done());
    }

    #[test]
    fn task_done_past_outstanding_count_is_invalid_state() {
        let q: Queue<i32> = Queue::fifo(0);
        assert!(matches!(q.task_done(), Err(CoopError::InvalidState(_))));
    }

    #[test]
    fn unbounded_queue_never_reports_full() {
        let q = Queue::fifo(0);
        for i in 0..100 {
            q.put_no_wait(i, 0).unwrap();
        }
        assert!(!q.is_full());
    }
}
