//! Error taxonomy for the cooperative concurrency primitives.
//!
//! Every primitive in this crate signals failure through [`CoopError`] rather
//! than panicking. Primitives never log on error paths — the sole
//! informational exception is the rate limiter's period-reset notice (see
//! [`crate::rate_limiter`]), which is diagnostic only.

use thiserror::Error;

/// The unified error type for this crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoopError {
    /// Raised by [`Queue::get_no_wait`](crate::queue::Queue::get_no_wait) on
    /// an empty queue.
    #[error("queue is empty")]
    QueueEmpty,

    /// Raised by [`Queue::put_no_wait`](crate::queue::Queue::put_no_wait) on
    /// a full queue.
    #[error("queue is full")]
    QueueFull,

    /// Raised when an operation is attempted in the wrong lifecycle state —
    /// settling an already-settled [`Deferred`](crate::deferred::Deferred),
    /// releasing an unheld [`Lock`](crate::sync::Lock), waiting/notifying on
    /// a [`Condition`](crate::sync::Condition) without holding its lock,
    /// constructing a [`Semaphore`](crate::sync::Semaphore) with a negative
    /// value, or calling `task_done` more times than there are outstanding
    /// tasks.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Thrown to awaiters of a cancelled [`Deferred`](crate::deferred::Deferred).
    #[error("cancelled")]
    Cancelled,
}

impl CoopError {
    pub(crate) fn invalid_state(reason: &'static str) -> Self {
        CoopError::InvalidState(reason.to_string())
    }
}
