//! Sliding-window rate limiting with an optional minimum spacing between
//! grants, plus a label-keyed registry so unrelated call sites can share the
//! same limiter by name.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::clock::{Clock, Sleep, SystemClock, ThreadSleep};
use crate::deferred::settle_or_cancel;
use crate::error::CoopError;
use crate::executor::join_all;
use crate::sync::Lock;

/// How many grants are allowed per period, and whether grants must also be
/// spread evenly across it.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterSpec {
    pub limit: u32,
    pub period_ms: u64,
    /// When set, consecutive grants must additionally be spaced at least
    /// `period_ms / limit` apart, smoothing bursts instead of allowing the
    /// full `limit` to fire back-to-back at a period boundary.
    pub spread: bool,
}

impl RateLimiterSpec {
    pub fn new(limit: u32, period_ms: u64) -> Self {
        Self { limit, period_ms, spread: false }
    }

    pub fn with_spread(mut self, spread: bool) -> Self {
        self.spread = spread;
        self
    }

    fn min_spacing_ms(&self) -> u64 {
        if self.limit == 0 {
            0
        } else {
            self.period_ms / self.limit as u64
        }
    }
}

/// Persisted window state for one labelled limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterState {
    pub version: u64,
    pub first_ms: u64,
    pub last_ms: u64,
    pub count: u32,
}

impl RateLimiterState {
    fn fresh(now_ms: u64) -> Self {
        Self { version: 0, first_ms: now_ms, last_ms: 0, count: 0 }
    }
}

/// Where window state lives. The default is in-process memory; implement
/// this to back a limiter with shared storage instead.
pub trait RateLimiterStorage {
    fn get_state(&self, label: &str) -> Option<RateLimiterState>;
    fn set_state(&self, label: &str, state: RateLimiterState);
}

/// The default [`RateLimiterStorage`]: a plain in-memory map, one entry per
/// label.
#[derive(Default)]
pub struct InMemoryStorage {
    states: RefCell<HashMap<String, RateLimiterState>>,
}

impl RateLimiterStorage for InMemoryStorage {
    fn get_state(&self, label: &str) -> Option<RateLimiterState> {
        self.states.borrow().get(label).copied()
    }

    fn set_state(&self, label: &str, state: RateLimiterState) {
        self.states.borrow_mut().insert(label.to_string(), state);
    }
}

const POLL_INTERVAL_MS: u64 = 50;

/// A single named rate limiter.
///
/// `wait()` polls at a fixed interval, re-checking the window each time
/// under an internal [`Lock`] so that the load-check-increment-persist
/// sequence is never split across two tasks mid-update.
pub struct RateLimiter {
    label: String,
    spec: RateLimiterSpec,
    lock: Lock,
    clock: Rc<dyn Clock>,
    sleeper: Rc<dyn Sleep>,
    storage: Rc<dyn RateLimiterStorage>,
}

impl RateLimiter {
    pub fn new(label: impl Into<String>, spec: RateLimiterSpec) -> Self {
        Self::with_collaborators(label, spec, Rc::new(SystemClock::new()), Rc::new(ThreadSleep), Rc::new(InMemoryStorage::default()))
    }

    pub fn with_collaborators(
        label: impl Into<String>,
        spec: RateLimiterSpec,
        clock: Rc<dyn Clock>,
        sleeper: Rc<dyn Sleep>,
        storage: Rc<dyn RateLimiterStorage>,
    ) -> Self {
        Self { label: label.into(), spec, lock: Lock::new(), clock, sleeper, storage }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn load_state(&self) -> RateLimiterState {
        self.storage.get_state(&self.label).unwrap_or_else(|| RateLimiterState::fresh(self.clock.now_ms()))
    }

    fn reset_if_period_elapsed(&self, state: &mut RateLimiterState) {
        let now = self.clock.now_ms();
        if now.saturating_sub(state.first_ms) >= self.spec.period_ms {
            tracing::debug!(label = %self.label, "rate limiter period reset");
            state.count = 0;
            state.first_ms = now;
        }
    }

    /// Wait until a grant is available, then consume it.
    pub async fn wait(&self) -> Result<(), CoopError> {
        loop {
            settle_or_cancel(self.lock.acquire()).await.map_err(|_| CoopError::Cancelled)?;
            let mut state = self.load_state();
            self.reset_if_period_elapsed(&mut state);
            let now = self.clock.now_ms();
            let over_limit = state.count >= self.spec.limit;
            let too_soon = self.spec.spread && now.saturating_sub(state.last_ms) < self.spec.min_spacing_ms();

            if over_limit || too_soon {
                self.lock.release().ok();
                self.sleeper.sleep(POLL_INTERVAL_MS).await;
                continue;
            }

            state.count += 1;
            state.last_ms = now;
            state.version += 1;
            self.storage.set_state(&self.label, state);
            self.lock.release().ok();
            return Ok(());
        }
    }
}

/// A set of rate limiters that must all grant before a call proceeds.
pub struct RateLimiterGroup {
    members: Vec<Rc<RateLimiter>>,
}

impl Default for RateLimiterGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiterGroup {
    pub fn new() -> Self {
        Self { members: Vec::new() }
    }

    pub fn add(&mut self, limiter: Rc<RateLimiter>) -> &mut Self {
        self.members.push(limiter);
        self
    }

    /// Wait for every member to grant concurrently (not one at a time) —
    /// the call only proceeds once all of them have.
    pub async fn wait(&self) -> Result<(), CoopError> {
        let futures: Vec<_> = self.members.iter().map(|m| m.wait()).collect();
        for result in join_all(futures).await {
            result?;
        }
        Ok(())
    }
}

/// A label -> [`RateLimiter`] registry. Explicit and injectable rather than
/// a hidden process-wide global: construct one, share it by `Rc`, and every
/// caller asking for the same label gets the same underlying limiter.
#[derive(Default)]
pub struct RateLimiterRegistry {
    limiters: RefCell<HashMap<String, Rc<RateLimiter>>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the limiter registered for `label`, constructing one with
    /// `spec` if this is the first request for it. The first caller's spec
    /// wins — later calls with a different spec still get the original
    /// instance.
    pub fn get_or_create(&self, label: &str, spec: RateLimiterSpec) -> Rc<RateLimiter> {
        if let Some(existing) = self.limiters.borrow().get(label) {
            return Rc::clone(existing);
        }
        let limiter = Rc::new(RateLimiter::new(label, spec));
        self.limiters.borrow_mut().insert(label.to_string(), Rc::clone(&limiter));
        limiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{InstantSleep, ManualClock};
    use crate::executor::LocalExecutor;

    fn test_limiter(limit: u32, period_ms: u64, clock: ManualClock) -> RateLimiter {
        RateLimiter::with_collaborators(
            "test",
            RateLimiterSpec::new(limit, period_ms),
            Rc::new(clock),
            Rc::new(InstantSleep),
            Rc::new(InMemoryStorage::default()),
        )
    }

    #[test]
    fn burst_up_to_limit_then_blocks_until_period_resets() {
        let exec = LocalExecutor::new();
        let clock = ManualClock::new(0);
        let limiter = test_limiter(2, 1_000, clock.clone());

        exec.run(async {
            limiter.wait().await.unwrap();
            limiter.wait().await.unwrap();
        });

        // Third grant would exceed the limit within the same period; advance
        // past the window and confirm it then succeeds instead of hanging.
        clock.advance(1_001);
        exec.run(async {
            limiter.wait().await.unwrap();
        });
    }

    #[test]
    fn spread_enforces_minimum_spacing_between_grants() {
        let spec = RateLimiterSpec::new(4, 1_000).with_spread(true);
        assert_eq!(spec.min_spacing_ms(), 250);
    }

    #[test]
    fn registry_returns_the_same_instance_for_a_repeated_label() {
        let registry = RateLimiterRegistry::new();
        let a = registry.get_or_create("shared", RateLimiterSpec::new(1, 1_000));
        let b = registry.get_or_create("shared", RateLimiterSpec::new(99, 5_000));
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(a.spec.limit, 1);
    }

    #[test]
    fn group_wait_resolves_once_every_member_has_granted() {
        let exec = LocalExecutor::new();
        let clock = ManualClock::new(0);
        let a = Rc::new(test_limiter(1, 1_000, clock.clone()));
        let b = Rc::new(test_limiter(1, 1_000, clock.clone()));
        let mut group = RateLimiterGroup::new();
        group.add(Rc::clone(&a));
        group.add(Rc::clone(&b));

        exec.run(async { group.wait().await }).unwrap();

        // both members consumed their one grant for this period.
        assert_eq!(a.load_state().count, 1);
        assert_eq!(b.load_state().count, 1);
    }
}
