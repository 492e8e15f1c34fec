//! Backoff strategies: pure mappings from `(attempt, base_delay, prev_delay)`
//! to the next retry delay, per spec §4.A.
//!
//! The retry loop never runtime-type-checks a strategy (§9's recommendation);
//! it either holds a `Arc<dyn IntervalFunction>` directly, or, when the
//! strategy needs to be picked from configuration, an [`AnyStrategy`] tagged
//! enum that dispatches to the concrete type without `dyn`.

pub mod adaptive;
pub mod strategy;

pub use adaptive::AdaptiveInterval;
pub use strategy::{
    Capped, DecorrelatedJitterInterval, ExponentialInterval, FibonacciInterval, FixedInterval,
    FnInterval, IntervalFunction, JitterInterval, LinearInterval, PolynomialInterval,
};

use std::sync::Arc;
use std::time::Duration;

/// A tagged variant over every built-in strategy, for configuration-driven
/// selection (e.g. parsed from a CLI flag or TOML file) without resorting to
/// runtime type checks in the hot path.
#[derive(Clone)]
pub enum AnyStrategy {
    /// [`FixedInterval`].
    Fixed(FixedInterval),
    /// [`LinearInterval`].
    Linear(LinearInterval),
    /// [`ExponentialInterval`].
    Exponential(ExponentialInterval),
    /// [`JitterInterval`].
    Jitter(JitterInterval),
    /// [`DecorrelatedJitterInterval`].
    DecorrelatedJitter(DecorrelatedJitterInterval),
    /// [`FibonacciInterval`].
    Fibonacci(FibonacciInterval),
    /// [`PolynomialInterval`].
    Polynomial(PolynomialInterval),
    /// Any [`IntervalFunction`] behind an `Arc`, for `Adaptive` and custom
    /// strategies that can't be named as a plain enum variant.
    Dynamic(Arc<dyn IntervalFunction>),
}

impl std::fmt::Debug for AnyStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnyStrategy::Fixed(s) => f.debug_tuple("Fixed").field(s).finish(),
            AnyStrategy::Linear(s) => f.debug_tuple("Linear").field(s).finish(),
            AnyStrategy::Exponential(s) => f.debug_tuple("Exponential").field(s).finish(),
            AnyStrategy::Jitter(s) => f.debug_tuple("Jitter").field(s).finish(),
            AnyStrategy::DecorrelatedJitter(s) => {
                f.debug_tuple("DecorrelatedJitter").field(s).finish()
            }
            AnyStrategy::Fibonacci(s) => f.debug_tuple("Fibonacci").field(s).finish(),
            AnyStrategy::Polynomial(s) => f.debug_tuple("Polynomial").field(s).finish(),
            AnyStrategy::Dynamic(_) => f.debug_tuple("Dynamic").finish(),
        }
    }
}

impl IntervalFunction for AnyStrategy {
    fn next_interval(
        &self,
        attempt: usize,
        prev_delay: Option<Duration>,
        rng: &mut dyn rand::RngCore,
    ) -> Duration {
        match self {
            AnyStrategy::Fixed(s) => s.next_interval(attempt, prev_delay, rng),
            AnyStrategy::Linear(s) => s.next_interval(attempt, prev_delay, rng),
            AnyStrategy::Exponential(s) => s.next_interval(attempt, prev_delay, rng),
            AnyStrategy::Jitter(s) => s.next_interval(attempt, prev_delay, rng),
            AnyStrategy::DecorrelatedJitter(s) => s.next_interval(attempt, prev_delay, rng),
            AnyStrategy::Fibonacci(s) => s.next_interval(attempt, prev_delay, rng),
            AnyStrategy::Polynomial(s) => s.next_interval(attempt, prev_delay, rng),
            AnyStrategy::Dynamic(s) => s.next_interval(attempt, prev_delay, rng),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn any_strategy_dispatches_to_fixed() {
        let s = AnyStrategy::Fixed(FixedInterval::new(Duration::from_secs(2)));
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        assert_eq!(s.next_interval(1, None, &mut rng), Duration::from_secs(2));
    }
}
