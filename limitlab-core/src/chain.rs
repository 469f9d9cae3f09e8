//! Chain height accumulator.
//!
//! Folds a date-ordered sequence of limit statuses into the running count of
//! consecutive limit-up closes. The state is a plain value threaded through
//! the fold, so resuming from a stored day is just seeding it.
//!
//! Transitions:
//! - `Up`        -> `h + 1`
//! - `NotUp`     -> `0`
//! - `Undefined` -> `h` (suspension carries the chain forward)

use serde::{Deserialize, Serialize};

use crate::domain::LimitStatus;

/// Accumulator state after some day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    pub height: u32,
}

impl ChainState {
    /// Resume from a previously emitted chain height.
    pub fn seeded(height: u32) -> Self {
        Self { height }
    }

    /// Advance one day.
    #[must_use]
    pub fn step(self, status: LimitStatus) -> Self {
        let height = match status {
            LimitStatus::Up => self.height.saturating_add(1),
            LimitStatus::NotUp => 0,
            LimitStatus::Undefined => self.height,
        };
        Self { height }
    }
}

/// Chain heights for a full history starting from an empty chain.
pub fn accumulate(statuses: &[LimitStatus]) -> Vec<u32> {
    accumulate_from(ChainState::default(), statuses)
}

/// Chain heights for a sequence continuing from `seed`.
pub fn accumulate_from(seed: ChainState, statuses: &[LimitStatus]) -> Vec<u32> {
    statuses
        .iter()
        .scan(seed, |state, status| {
            *state = state.step(*status);
            Some(state.height)
        })
        .collect()
}

/// State after consuming the whole sequence.
pub fn final_state(seed: ChainState, statuses: &[LimitStatus]) -> ChainState {
    statuses.iter().fold(seed, |state, status| state.step(*status))
}
