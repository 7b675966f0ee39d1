//! Search-count based cooldown policy and the request spacing floor.

use std::num::NonZeroU32;
use std::ops::RangeInclusive;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;

use crate::run_state::RunSignals;

const REQUEST_SLOT_POLL: Duration = Duration::from_millis(100);

/// Advisory pause the caller must honor before the next search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownDirective {
    pub duration: Duration,
    /// External call count that triggered the cooldown.
    pub external_calls: u64,
}

type WindowSampler = Box<dyn FnMut(RangeInclusive<u64>) -> u64 + Send>;

/// Counts external searches and asks for a randomized cooldown every `budget` calls.
pub struct RateLimiter {
    budget: u64,
    window_secs: RangeInclusive<u64>,
    external_calls: u64,
    sampler: WindowSampler,
    request_floor: Option<governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl RateLimiter {
    pub fn new(budget: u32, window_secs: RangeInclusive<u64>) -> Self {
        Self::with_sampler(
            budget,
            window_secs,
            Box::new(|window: RangeInclusive<u64>| rand::random_range(window)),
        )
    }

    pub fn with_sampler(
        budget: u32,
        window_secs: RangeInclusive<u64>,
        sampler: WindowSampler,
    ) -> Self {
        Self {
            budget: u64::from(budget.max(1)),
            window_secs,
            external_calls: 0,
            sampler,
            request_floor: None,
        }
    }

    /// Spaces outbound searches at least `interval_ms` apart. `0` leaves them unspaced.
    pub fn with_request_floor(mut self, interval_ms: u64) -> Self {
        self.request_floor = (interval_ms > 0)
            .then(|| Quota::with_period(Duration::from_millis(interval_ms)))
            .flatten()
            .map(|quota| {
                governor::RateLimiter::direct(
                    quota.allow_burst(NonZeroU32::new(1).expect("non-zero limiter burst")),
                )
            });
        self
    }

    /// Blocks until the next search may go out. Returns false when a stop arrived first.
    pub fn wait_for_request_slot(&self, signals: &RunSignals) -> bool {
        let Some(limiter) = self.request_floor.as_ref() else {
            return !signals.is_stopping();
        };
        loop {
            if signals.is_stopping() {
                return false;
            }
            if limiter.check().is_ok() {
                return true;
            }
            signals.sleep_unless_stopped(REQUEST_SLOT_POLL);
        }
    }

    pub fn external_calls(&self) -> u64 {
        self.external_calls
    }

    /// Records one non-cached search. Every `budget`-th call yields a cooldown.
    pub fn record_external_call(&mut self) -> Option<CooldownDirective> {
        self.external_calls = self.external_calls.saturating_add(1);
        if self.external_calls % self.budget != 0 {
            return None;
        }
        let seconds = (self.sampler)(self.window_secs.clone());
        Some(CooldownDirective {
            duration: Duration::from_secs(seconds),
            external_calls: self.external_calls,
        })
    }
}
