//! Time as a pluggable interface.
//!
//! The rate limiter (and tests for everything else) need a monotonic,
//! swappable notion of "now" and a swappable notion of "sleep" so that
//! deterministic, non-flaky tests can drive both without touching a real
//! clock or a real thread scheduler.

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::thread;
use std::time::{Duration, Instant};

/// A monotonic millisecond clock.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// The default [`Clock`], backed by [`Instant`] so it is immune to wall-clock
/// adjustments.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// A hand-advanced clock for deterministic tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Rc<Cell<u64>>);

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self(Rc::new(Cell::new(start_ms)))
    }

    pub fn advance(&self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }

    pub fn set(&self, ms: u64) {
        self.0.set(ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.get()
    }
}

/// A source of delay futures. Kept separate from [`Clock`] so tests can
/// advance time without actually blocking a thread.
pub trait Sleep {
    fn sleep(&self, ms: u64) -> Pin<Box<dyn Future<Output = ()>>>;
}

struct SleepShared {
    done: bool,
    waker: Option<Waker>,
}

struct SleepFuture {
    shared: Arc<Mutex<SleepShared>>,
}

impl Future for SleepFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut shared = self.shared.lock().expect("sleep shared state poisoned");
        if shared.done {
            Poll::Ready(())
        } else {
            shared.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

/// Sleeps on a detached OS thread timer. This is the one place in the crate
/// that touches real threads — the cooperative model above it stays
/// single-threaded, but *something* has to wake us up after a real delay.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleep;

impl Sleep for ThreadSleep {
    fn sleep(&self, ms: u64) -> Pin<Box<dyn Future<Output = ()>>> {
        let shared = Arc::new(Mutex::new(SleepShared { done: false, waker: None }));
        let spawned = Arc::clone(&shared);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(ms));
            let mut guard = spawned.lock().expect("sleep shared state poisoned");
            guard.done = true;
            if let Some(waker) = guard.waker.take() {
                waker.wake();
            }
        });
        Box::pin(SleepFuture { shared })
    }
}

/// Resolves immediately. Used in tests that drive a [`ManualClock`] by hand
/// and don't want to wait on real wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantSleep;

impl Sleep for InstantSleep {
    fn sleep(&self, _ms: u64) -> Pin<Box<dyn Future<Output = ()>>> {
        Box::pin(std::future::ready(()))
    }
}
