//! Cooperative concurrency primitives for single-threaded event-loop
//! runtimes: a one-shot completion token ([`Deferred`]), classic
//! synchronization primitives built on it ([`sync`]), a discipline-pluggable
//! [`Queue`], a bounded unordered work pipeline ([`UnorderedWorkQueue`]), and
//! sliding-window [`RateLimiter`]s.
//!
//! Nothing in this crate spawns an OS thread to make progress — the one
//! exception is the default [`clock::ThreadSleep`], which only exists to
//! wake a timer back up. Everything else runs to completion purely by being
//! polled, so it works under any `Future` executor, including the minimal
//! [`LocalExecutor`] this crate ships for its own tests.

pub mod clock;
pub mod deferred;
pub mod error;
pub mod executor;
pub mod queue;
pub mod rate_limiter;
pub mod sync;
pub mod work_queue;

mod waitlist;

#[cfg(test)]
mod test_support;

pub use clock::{Clock, ManualClock, Sleep, SystemClock, ThreadSleep};
pub use deferred::{Deferred, DeferredError, Outcome};
pub use error::CoopError;
pub use executor::{LocalExecutor, Spawn};
pub use queue::{Discipline, Queue};
pub use rate_limiter::{InMemoryStorage, RateLimiter, RateLimiterGroup, RateLimiterRegistry, RateLimiterSpec, RateLimiterState, RateLimiterStorage};
pub use sync::{Condition, Event, Lock, Semaphore};
pub use work_queue::{Envelope, UnorderedWorkQueue};
