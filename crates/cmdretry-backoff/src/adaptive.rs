//! Adaptive backoff: adjusts a multiplicative factor toward shorter delays
//! after recent successes and longer delays after recent failures, falling
//! back to a configured base strategy for the raw delay shape.
//!
//! Modeled on the sliding-window-over-a-bounded-log technique used by
//! sliding-window rate limiters (a `VecDeque` of recent outcomes instead of
//! recent timestamps), the same mechanics §4.D's metrics ring and §4.B's
//! commitment window share.

use crate::strategy::IntervalFunction;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

/// Minimum and maximum bounds for the adaptive multiplicative factor, so a
/// long failure streak can't grow delays without limit and a long success
/// streak can't collapse them to zero.
const MIN_FACTOR: f64 = 0.1;
const MAX_FACTOR: f64 = 10.0;

struct AdaptiveState {
    outcomes: VecDeque<bool>,
    factor: f64,
}

/// Adaptive strategy: maintains a sliding window of the last `window_size`
/// outcomes and nudges an internal multiplicative `factor` by
/// `learning_rate` toward 1.0 on success and away from it on failure, then
/// applies `factor` to whatever the `base` strategy would have returned.
pub struct AdaptiveInterval<I> {
    base: I,
    window_size: usize,
    learning_rate: f64,
    state: Mutex<AdaptiveState>,
}

impl<I> fmt::Debug for AdaptiveInterval<I>
where
    I: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptiveInterval")
            .field("base", &self.base)
            .field("window_size", &self.window_size)
            .field("learning_rate", &self.learning_rate)
            .finish()
    }
}

impl<I> AdaptiveInterval<I>
where
    I: IntervalFunction,
{
    /// Creates an adaptive strategy wrapping `base`, tracking the last
    /// `window_size` outcomes with the given `learning_rate` (0.0..=1.0).
    pub fn new(base: I, window_size: usize, learning_rate: f64) -> Self {
        Self {
            base,
            window_size: window_size.max(1),
            learning_rate: learning_rate.clamp(0.0, 1.0),
            state: Mutex::new(AdaptiveState {
                outcomes: VecDeque::with_capacity(window_size.max(1)),
                factor: 1.0,
            }),
        }
    }

    /// Records the outcome of an attempt, updating the sliding window and
    /// the internal factor. Call this after each attempt completes.
    pub fn record_outcome(&self, succeeded: bool) {
        let mut state = self.state.lock().expect("adaptive backoff state poisoned");
        if state.outcomes.len() == self.window_size {
            state.outcomes.pop_front();
        }
        state.outcomes.push_back(succeeded);

        let successes = state.outcomes.iter().filter(|&&ok| ok).count();
        let success_ratio = successes as f64 / state.outcomes.len() as f64;

        // Drive the factor toward <1.0 (shorter delays) as success_ratio ->
        // 1.0, and toward >1.0 (longer delays) as success_ratio -> 0.0.
        let target = 2.0 - 2.0 * success_ratio;
        state.factor += (target - state.factor) * self.learning_rate;
        state.factor = state.factor.clamp(MIN_FACTOR, MAX_FACTOR);
    }

    /// Current multiplicative factor, for observability.
    pub fn factor(&self) -> f64 {
        self.state.lock().expect("adaptive backoff state poisoned").factor
    }
}

impl<I> IntervalFunction for AdaptiveInterval<I>
where
    I: IntervalFunction,
{
    fn next_interval(
        &self,
        attempt: usize,
        prev_delay: Option<Duration>,
        rng: &mut dyn rand::RngCore,
    ) -> Duration {
        let base_value = self.base.next_interval(attempt, prev_delay, rng);
        let factor = self.factor();
        base_value.mul_f64(factor)
    }
}
