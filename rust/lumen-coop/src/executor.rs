//! A minimal single-threaded reference executor.
//!
//! This crate's primitives only need *some* scheduler to drive `Future`s to
//! completion — they don't depend on this one specifically. `LocalExecutor`
//! exists so the crate is self-contained (and so [`UnorderedWorkQueue`](crate::work_queue::UnorderedWorkQueue)
//! has something to spawn its driver tasks onto) without pulling in an
//! external async runtime. Its shape — an injection queue drained once per
//! tick, a run loop that stops when nothing is ready — mirrors a
//! work-stealing scheduler's tick/drain/run-to-completion structure, minus
//! the multiple workers: there's only one thread here, so there's nothing to
//! steal from.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Wake, Waker};

/// The minimal "give me a future, I'll drive it" interface external
/// collaborators (like [`UnorderedWorkQueue`](crate::work_queue::UnorderedWorkQueue)) depend on.
pub trait Spawn {
    fn spawn(&self, future: Pin<Box<dyn Future<Output = ()>>>);
}

struct TaskWaker {
    id: usize,
    ready: Arc<Mutex<VecDeque<usize>>>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.ready.lock().expect("ready queue poisoned").push_back(self.id);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.ready.lock().expect("ready queue poisoned").push_back(self.id);
    }
}

type BoxedTask = Pin<Box<dyn Future<Output = ()>>>;

/// A single-threaded, run-to-completion task scheduler.
///
/// Tasks are plain `Future<Output = ()>`s. `tick()` polls everything
/// currently marked ready exactly once; `run_until_idle()` keeps ticking
/// until nothing is ready and nothing new has been spawned.
pub struct LocalExecutor {
    tasks: RefCell<Vec<Option<BoxedTask>>>,
    ready: Arc<Mutex<VecDeque<usize>>>,
    injected: RefCell<VecDeque<BoxedTask>>,
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self { tasks: RefCell::new(Vec::new()), ready: Arc::new(Mutex::new(VecDeque::new())), injected: RefCell::new(VecDeque::new()) }
    }

    /// Spawn a future to run on this executor.
    pub fn spawn(&self, future: impl Future<Output = ()> + 'static) {
        self.injected.borrow_mut().push_back(Box::pin(future));
    }

    /// Block the current thread, polling `future` (and anything it spawns)
    /// until it completes.
    pub fn run<F: Future>(&self, future: F) -> F::Output {
        let output = Rc::new(RefCell::new(None));
        let output_task = Rc::clone(&output);
        // `future`'s output isn't `'static`/`Send`, so it can't go through
        // the generic `spawn` path; drive it directly alongside everything
        // else spawned onto this executor.
        let mut future = Box::pin(future);
        loop {
            self.admit_injected();
            let waker = self.task_waker(usize::MAX);
            let mut cx = Context::from_waker(&waker);
            if let Poll::Ready(v) = future.as_mut().poll(&mut cx) {
                *output_task.borrow_mut() = Some(v);
                break;
            }
            if !self.tick() {
                // Nothing else is ready; block is only reachable if `future`
                // itself registered the waker above, so a future tick will
                // eventually find it ready again once woken.
                if self.ready.lock().expect("ready queue poisoned").is_empty() {
                    break;
                }
            }
        }
        Rc::try_unwrap(output).ok().and_then(|cell| cell.into_inner()).expect("driven future did not complete")
    }

    fn task_waker(&self, id: usize) -> Waker {
        Waker::from(Arc::new(TaskWaker { id, ready: Arc::clone(&self.ready) }))
    }

    fn admit_injected(&self) {
        let mut tasks = self.tasks.borrow_mut();
        let mut injected = self.injected.borrow_mut();
        while let Some(fut) = injected.pop_front() {
            let id = tasks.len();
            tasks.push(Some(fut));
            self.ready.lock().expect("ready queue poisoned").push_back(id);
        }
    }

    /// Poll every task currently marked ready, exactly once each. Returns
    /// whether any work happened.
    pub fn tick(&self) -> bool {
        self.admit_injected();
        let ready_ids: Vec<usize> = self.ready.lock().expect("ready queue poisoned").drain(..).collect();
        if ready_ids.is_empty() {
            return false;
        }
        for id in ready_ids {
            let mut fut = {
                let mut tasks = self.tasks.borrow_mut();
                match tasks.get_mut(id).and_then(Option::take) {
                    Some(f) => f,
                    None => continue,
                }
            };
            let waker = self.task_waker(id);
            let mut cx = Context::from_waker(&waker);
            match fut.as_mut().poll(&mut cx) {
                Poll::Ready(()) => {}
                Poll::Pending => self.tasks.borrow_mut()[id] = Some(fut),
            }
        }
        true
    }

    /// Run until both the ready queue and the injection queue are empty.
    /// Returns the number of ticks it took.
    pub fn run_until_idle(&self) -> usize {
        let mut rounds = 0;
        loop {
            self.admit_injected();
            let idle = self.ready.lock().expect("ready queue poisoned").is_empty() && self.injected.borrow().is_empty();
            if idle {
                break;
            }
            if self.tick() {
                rounds += 1;
            } else {
                break;
            }
        }
        rounds
    }
}

impl Spawn for LocalExecutor {
    fn spawn(&self, future: Pin<Box<dyn Future<Output = ()>>>) {
        self.injected.borrow_mut().push_back(future);
    }
}

/// Await every future in `futures` concurrently, collecting their outputs in
/// the original order. Used by [`RateLimiterGroup`](crate::rate_limiter::RateLimiterGroup)
/// to wait on all of its members at once instead of one at a time.
pub(crate) async fn join_all<F: Future>(futures: Vec<F>) -> Vec<F::Output> {
    let mut futures: Vec<_> = futures.into_iter().map(Box::pin).collect();
    let mut outputs: Vec<Option<F::Output>> = futures.iter().map(|_| None).collect();
    std::future::poll_fn(move |cx| {
        let mut all_ready = true;
        for (fut, out) in futures.iter_mut().zip(outputs.iter_mut()) {
            if out.is_none() {
                match fut.as_mut().poll(cx) {
                    Poll::Ready(v) => *out = Some(v),
                    Poll::Pending => all_ready = false,
                }
            }
        }
        if all_ready {
            Poll::Ready(outputs.iter_mut().map(|o| o.take().expect("just checked ready")).collect())
        } else {
            Poll::Pending
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn run_drives_a_simple_future_to_completion() {
        let exec = LocalExecutor::new();
        let result = exec.run(async { 1 + 1 });
        assert_eq!(result, 2);
    }

    #[test]
    fn spawned_tasks_run_during_run_until_idle() {
        let exec = LocalExecutor::new();
        let ran = Rc::new(Cell::new(false));
        let ran_task = Rc::clone(&ran);
        exec.spawn(async move { ran_task.set(true) });
        let rounds = exec.run_until_idle();
        assert!(ran.get());
        assert!(rounds >= 1);
    }

    #[test]
    fn run_until_idle_is_idempotent_once_drained() {
        let exec = LocalExecutor::new();
        exec.spawn(async {});
        exec.run_until_idle();
        assert_eq!(exec.run_until_idle(), 0);
    }

    #[test]
    fn join_all_waits_for_every_future() {
        let exec = LocalExecutor::new();
        let result = exec.run(async {
            join_all(vec![async { 1 }, async { 2 }, async { 3 }]).await
        });
        assert_eq!(result, vec![1, 2, 3]);
    }
}
