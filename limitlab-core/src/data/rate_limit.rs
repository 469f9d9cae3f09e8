//! Per-minute call budget.
//!
//! Tushare counts calls per interface per minute. The limiter either refuses
//! (`Stop`) or sleeps until the next slot frees (`Wait`).

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;

/// What to do when the budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitPolicy {
    /// Fail with `retry_after`; the pipeline marks its task `rate_limited`.
    #[default]
    Stop,
    /// Block the caller until a slot frees up.
    Wait,
}

/// GCRA call budget: `max_calls` may burst at once, after which one call
/// frees up every `window / max_calls`.
pub struct RateLimiter {
    limiter: DefaultDirectRateLimiter,
    clock: DefaultClock,
    policy: RateLimitPolicy,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn per_minute(max_calls: usize, policy: RateLimitPolicy) -> Self {
        Self::new(max_calls, Duration::from_secs(60), policy)
    }

    pub fn new(max_calls: usize, window: Duration, policy: RateLimitPolicy) -> Self {
        let burst = u32::try_from(max_calls)
            .ok()
            .and_then(NonZeroU32::new)
            .unwrap_or(NonZeroU32::MIN);
        let period = window / burst.get();
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX))
            .allow_burst(burst);
        Self {
            limiter: DefaultDirectRateLimiter::direct(quota),
            clock: DefaultClock::default(),
            policy,
        }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Claim one call slot.
    ///
    /// Returns `Err(wait)` under `Stop` when the budget is spent, where `wait`
    /// is the time until the next slot frees.
    pub fn acquire(&self) -> Result<(), Duration> {
        loop {
            let wait = match self.limiter.check() {
                Ok(()) => return Ok(()),
                Err(not_until) => not_until.wait_time_from(self.clock.now()),
            };
            match self.policy {
                RateLimitPolicy::Stop => return Err(wait),
                RateLimitPolicy::Wait => {
                    tracing::info!("call budget exhausted, waiting {:.1}s", wait.as_secs_f64());
                    std::thread::sleep(wait);
                }
            }
        }
    }
}
