//! Pluggable backoff strategies: pure mappings from `(attempt, base_delay,
//! prev_delay)` to the next delay, per spec §4.A.

use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Abstraction for computing the delay before the next retry attempt.
///
/// `attempt` is 1-indexed: the first retry is attempt 1. Implementations
/// must be deterministic given their inputs; strategies that need
/// randomness take an explicit `rng` rather than reaching for a global one,
/// so tests can seed it.
pub trait IntervalFunction: Send + Sync + fmt::Debug {
    /// Computes the next delay.
    fn next_interval(
        &self,
        attempt: usize,
        prev_delay: Option<Duration>,
        rng: &mut dyn rand::RngCore,
    ) -> Duration;
}

impl<T: IntervalFunction + ?Sized> IntervalFunction for Arc<T> {
    fn next_interval(&self, attempt: usize, prev_delay: Option<Duration>, rng: &mut dyn rand::RngCore) -> Duration {
        (**self).next_interval(attempt, prev_delay, rng)
    }
}

/// Clamps the output of an inner [`IntervalFunction`] to `max_delay`. Per
/// spec, the cap is "applied last" on top of whichever strategy is in use.
#[derive(Debug)]
pub struct Capped<I> {
    inner: I,
    max_delay: Duration,
}

impl<I> Capped<I> {
    /// Wraps `inner`, capping its output at `max_delay`.
    pub fn new(inner: I, max_delay: Duration) -> Self {
        Self { inner, max_delay }
    }
}

impl<I: IntervalFunction> IntervalFunction for Capped<I> {
    fn next_interval(
        &self,
        attempt: usize,
        prev_delay: Option<Duration>,
        rng: &mut dyn rand::RngCore,
    ) -> Duration {
        self.inner
            .next_interval(attempt, prev_delay, rng)
            .min(self.max_delay)
    }
}

/// Fixed interval backoff: returns `base_delay` for every attempt.
#[derive(Debug, Clone, Copy)]
pub struct FixedInterval {
    base_delay: Duration,
}

impl FixedInterval {
    /// Creates a fixed-interval strategy.
    pub fn new(base_delay: Duration) -> Self {
        Self { base_delay }
    }
}

impl IntervalFunction for FixedInterval {
    fn next_interval(&self, _attempt: usize, _prev: Option<Duration>, _rng: &mut dyn rand::RngCore) -> Duration {
        self.base_delay
    }
}

/// Linear backoff: `base_delay + (attempt - 1) * increment`.
#[derive(Debug, Clone, Copy)]
pub struct LinearInterval {
    base_delay: Duration,
    increment: Duration,
}

impl LinearInterval {
    /// Creates a linear-growth strategy.
    pub fn new(base_delay: Duration, increment: Duration) -> Self {
        Self {
            base_delay,
            increment,
        }
    }
}

impl IntervalFunction for LinearInterval {
    fn next_interval(&self, attempt: usize, _prev: Option<Duration>, _rng: &mut dyn rand::RngCore) -> Duration {
        let steps = attempt.saturating_sub(1) as u32;
        self.base_delay + self.increment * steps
    }
}

/// Exponential backoff: `base_delay * multiplier^(attempt - 1)`.
///
/// `multiplier` is clamped to `[1.0, 10.0]` per spec.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialInterval {
    base_delay: Duration,
    multiplier: f64,
}

impl ExponentialInterval {
    /// Creates an exponential-backoff strategy with the default multiplier
    /// of 2.0.
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier: 2.0,
        }
    }

    /// Overrides the multiplier, clamped to the spec's `[1.0, 10.0]` range.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.clamp(1.0, 10.0);
        self
    }

    fn raw_value(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        self.base_delay.mul_f64(self.multiplier.powi(exponent))
    }
}

impl IntervalFunction for ExponentialInterval {
    fn next_interval(&self, attempt: usize, _prev: Option<Duration>, _rng: &mut dyn rand::RngCore) -> Duration {
        self.raw_value(attempt)
    }
}

/// Jitter backoff: uniform random in `[0, exponential_value]`.
#[derive(Debug, Clone, Copy)]
pub struct JitterInterval {
    exponential: ExponentialInterval,
}

impl JitterInterval {
    /// Creates a jitter strategy layered over exponential backoff.
    pub fn new(base_delay: Duration) -> Self {
        Self {
            exponential: ExponentialInterval::new(base_delay),
        }
    }

    /// Overrides the underlying exponential multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.exponential = self.exponential.with_multiplier(multiplier);
        self
    }
}

impl IntervalFunction for JitterInterval {
    fn next_interval(&self, attempt: usize, _prev: Option<Duration>, rng: &mut dyn rand::RngCore) -> Duration {
        let ceiling = self.exponential.raw_value(attempt);
        if ceiling.is_zero() {
            return Duration::ZERO;
        }
        let fraction: f64 = rng.random_range(0.0..=1.0);
        ceiling.mul_f64(fraction)
    }
}

/// Decorrelated jitter: `uniform(base_delay, max(base_delay, prev_delay *
/// multiplier))`. The first call (no `prev_delay`) uses `base_delay` as the
/// previous value, per spec.
#[derive(Debug, Clone, Copy)]
pub struct DecorrelatedJitterInterval {
    base_delay: Duration,
    multiplier: f64,
}

impl DecorrelatedJitterInterval {
    /// Creates a decorrelated-jitter strategy with the default multiplier of
    /// 3.0 (the common AWS-architecture-blog recommendation).
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier: 3.0,
        }
    }

    /// Overrides the multiplier applied to the previous delay.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }
}

impl IntervalFunction for DecorrelatedJitterInterval {
    fn next_interval(
        &self,
        _attempt: usize,
        prev_delay: Option<Duration>,
        rng: &mut dyn rand::RngCore,
    ) -> Duration {
        let prev = prev_delay.unwrap_or(self.base_delay);
        let ceiling = self.base_delay.max(prev.mul_f64(self.multiplier));
        if ceiling <= self.base_delay {
            return self.base_delay;
        }
        let low = self.base_delay.as_secs_f64();
        let high = ceiling.as_secs_f64();
        let value = rng.random_range(low..=high);
        Duration::from_secs_f64(value)
    }
}

/// Fibonacci backoff: `base_delay * fib(attempt)`, with `fib(1) = fib(2) = 1`.
#[derive(Debug, Clone, Copy)]
pub struct FibonacciInterval {
    base_delay: Duration,
}

impl FibonacciInterval {
    /// Creates a Fibonacci-growth strategy.
    pub fn new(base_delay: Duration) -> Self {
        Self { base_delay }
    }

    fn fib(n: usize) -> u64 {
        if n == 0 {
            return 0;
        }
        let (mut a, mut b) = (1u64, 1u64);
        for _ in 1..n {
            let next = a.saturating_add(b);
            a = b;
            b = next;
        }
        a
    }
}

impl IntervalFunction for FibonacciInterval {
    fn next_interval(&self, attempt: usize, _prev: Option<Duration>, _rng: &mut dyn rand::RngCore) -> Duration {
        self.base_delay * Self::fib(attempt.max(1)) as u32
    }
}

/// Polynomial backoff: `base_delay * attempt^exponent`.
#[derive(Debug, Clone, Copy)]
pub struct PolynomialInterval {
    base_delay: Duration,
    exponent: f64,
}

impl PolynomialInterval {
    /// Creates a polynomial-growth strategy.
    pub fn new(base_delay: Duration, exponent: f64) -> Self {
        Self {
            base_delay,
            exponent,
        }
    }
}

impl IntervalFunction for PolynomialInterval {
    fn next_interval(&self, attempt: usize, _prev: Option<Duration>, _rng: &mut dyn rand::RngCore) -> Duration {
        let attempt = attempt.max(1) as f64;
        self.base_delay.mul_f64(attempt.powf(self.exponent))
    }
}

/// Function-based interval, for callers with a bespoke formula.
pub struct FnInterval<F> {
    f: F,
}

impl<F> fmt::Debug for FnInterval<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnInterval").finish_non_exhaustive()
    }
}

impl<F> FnInterval<F>
where
    F: Fn(usize, Option<Duration>) -> Duration + Send + Sync,
{
    /// Wraps a closure as an [`IntervalFunction`].
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> IntervalFunction for FnInterval<F>
where
    F: Fn(usize, Option<Duration>) -> Duration + Send + Sync,
{
    fn next_interval(&self, attempt: usize, prev: Option<Duration>, _rng: &mut dyn rand::RngCore) -> Duration {
        (self.f)(attempt, prev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> rand::rngs::StdRng {
        rand::rngs::StdRng::seed_from_u64(42)
    }

    #[test]
    fn fixed_is_constant() {
        let s = FixedInterval::new(Duration::from_secs(1));
        let mut r = rng();
        assert_eq!(s.next_interval(1, None, &mut r), Duration::from_secs(1));
        assert_eq!(s.next_interval(10, None, &mut r), Duration::from_secs(1));
    }

    #[test]
    fn linear_grows_by_increment() {
        let s = LinearInterval::new(Duration::from_secs(1), Duration::from_millis(500));
        let mut r = rng();
        assert_eq!(s.next_interval(1, None, &mut r), Duration::from_secs(1));
        assert_eq!(s.next_interval(2, None, &mut r), Duration::from_millis(1500));
        assert_eq!(s.next_interval(3, None, &mut r), Duration::from_secs(2));
    }

    #[test]
    fn exponential_doubles_by_default() {
        let s = ExponentialInterval::new(Duration::from_millis(100));
        let mut r = rng();
        assert_eq!(s.next_interval(1, None, &mut r), Duration::from_millis(100));
        assert_eq!(s.next_interval(2, None, &mut r), Duration::from_millis(200));
        assert_eq!(s.next_interval(3, None, &mut r), Duration::from_millis(400));
    }

    #[test]
    fn exponential_multiplier_is_clamped() {
        let s = ExponentialInterval::new(Duration::from_millis(100)).with_multiplier(50.0);
        let mut r = rng();
        // Clamped to 10.0 max.
        assert_eq!(s.next_interval(2, None, &mut r), Duration::from_millis(1000));
    }

    #[test]
    fn jitter_is_bounded_by_exponential_value() {
        let s = JitterInterval::new(Duration::from_millis(100));
        let mut r = rng();
        for attempt in 1..=4 {
            let ceiling = ExponentialInterval::new(Duration::from_millis(100)).raw_value(attempt);
            let v = s.next_interval(attempt, None, &mut r);
            assert!(v <= ceiling, "{:?} should be <= {:?}", v, ceiling);
        }
    }

    #[test]
    fn decorrelated_jitter_uses_base_as_initial_prev() {
        let s = DecorrelatedJitterInterval::new(Duration::from_millis(100)).with_multiplier(3.0);
        let mut r = rng();
        let v = s.next_interval(1, None, &mut r);
        assert!(v >= Duration::from_millis(100) && v <= Duration::from_millis(300));
    }

    #[test]
    fn fibonacci_sequence() {
        let s = FibonacciInterval::new(Duration::from_millis(100));
        let mut r = rng();
        let expected = [1, 1, 2, 3, 5, 8];
        for (i, mult) in expected.iter().enumerate() {
            let attempt = i + 1;
            assert_eq!(
                s.next_interval(attempt, None, &mut r),
                Duration::from_millis(100 * mult)
            );
        }
    }

    #[test]
    fn polynomial_grows_by_power() {
        let s = PolynomialInterval::new(Duration::from_millis(100), 2.0);
        let mut r = rng();
        assert_eq!(s.next_interval(1, None, &mut r), Duration::from_millis(100));
        assert_eq!(s.next_interval(2, None, &mut r), Duration::from_millis(400));
        assert_eq!(s.next_interval(3, None, &mut r), Duration::from_millis(900));
    }

    #[test]
    fn capped_clamps_large_values() {
        let inner = ExponentialInterval::new(Duration::from_millis(100));
        let capped = Capped::new(inner, Duration::from_millis(300));
        let mut r = rng();
        assert_eq!(capped.next_interval(5, None, &mut r), Duration::from_millis(300));
    }

    #[test]
    fn deterministic_given_same_seed() {
        let s = JitterInterval::new(Duration::from_millis(100));
        let a = s.next_interval(3, None, &mut rng());
        let b = s.next_interval(3, None, &mut rng());
        assert_eq!(a, b);
    }
}
