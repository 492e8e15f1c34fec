//! The Diophantine scheduler core (spec §4.B): decides whether a candidate
//! event time (plus its projected retry offsets) can be added to an existing
//! commitment timeline without any sliding window of length `window` ever
//! holding more than `rate_limit` events, and finds the next admissible
//! candidate when it can't.
//!
//! Grounded on the sliding-window rate limiter in the wider tower-resilience
//! pack (`tower-resilience-ratelimiter`'s `SlidingLogState`, a `VecDeque` of
//! recent timestamps counted against a window) — the same counting technique
//! is reused here over a caller-supplied commitment slice instead of an
//! internally owned log, since here the log lives in the registry (module
//! C), not the scheduler.

mod wallclock;

pub use wallclock::WallClock;

use std::time::Duration;

/// Default search quantum for [`next_slot`] (Open Question 4: hardcoded in
/// the original, made configurable here).
pub const DEFAULT_QUANTUM: Duration = Duration::from_secs(60);

/// Default search horizon for [`next_slot`].
pub const DEFAULT_HORIZON: Duration = Duration::from_secs(24 * 60 * 60);

/// Parameters governing a single resource's rate limit.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    /// Maximum number of events allowed per `window`.
    pub n: u32,
    /// The sliding window duration the limit applies over.
    pub window: Duration,
}

/// Configuration for [`next_slot`]'s forward search.
#[derive(Debug, Clone, Copy)]
pub struct SearchConfig {
    /// Step size between candidates.
    pub quantum: Duration,
    /// Maximum distance ahead of `preferred` to search.
    pub horizon: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            quantum: DEFAULT_QUANTUM,
            horizon: DEFAULT_HORIZON,
        }
    }
}

/// Outcome of [`next_slot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOutcome {
    /// An admissible candidate was found.
    Admissible(WallClock),
    /// No admissible candidate was found within the horizon; the returned
    /// instant is `preferred + horizon`, per spec.
    HorizonExceeded(WallClock),
}

/// Returns `true` iff scheduling `candidate` (and, for each offset `o` in
/// `retry_offsets`, `candidate + o`) would leave every half-open sliding
/// window `(t - window, t]` holding at most `rate_limit.n` events, counting
/// both `existing` commitments and the other offsets in this same
/// projection.
///
/// `existing` need not be sorted; the common case (few live commitments per
/// resource) makes a linear scan perfectly adequate, as spec §4.B notes.
pub fn can_schedule(
    existing: &[WallClock],
    candidate: WallClock,
    rate_limit: RateLimit,
    retry_offsets: &[Duration],
) -> bool {
    let offsets = if retry_offsets.is_empty() {
        &[Duration::ZERO][..]
    } else {
        retry_offsets
    };

    for (i, &offset) in offsets.iter().enumerate() {
        let t = candidate + offset;
        let window_start = t - rate_limit.window;

        let count_existing = existing
            .iter()
            .filter(|&&e| e > window_start && e <= t)
            .count();

        let count_self = offsets[..i]
            .iter()
            .filter(|&&prior_offset| {
                let t2 = candidate + prior_offset;
                t2 > window_start && t2 <= t
            })
            .count();

        if count_existing + count_self + 1 > rate_limit.n as usize {
            return false;
        }
    }

    true
}

/// Searches forward from `preferred` at `config.quantum` steps, up to
/// `config.horizon`, for the first candidate for which [`can_schedule`] is
/// true. Candidates are tested in strictly increasing order, so the result
/// is deterministic for a fixed `existing` snapshot.
pub fn next_slot(
    existing: &[WallClock],
    preferred: WallClock,
    rate_limit: RateLimit,
    retry_offsets: &[Duration],
    config: SearchConfig,
) -> SlotOutcome {
    let quantum = if config.quantum.is_zero() {
        DEFAULT_QUANTUM
    } else {
        config.quantum
    };

    let mut elapsed = Duration::ZERO;
    while elapsed <= config.horizon {
        let candidate = preferred + elapsed;
        if can_schedule(existing, candidate, rate_limit, retry_offsets) {
            return SlotOutcome::Admissible(candidate);
        }
        elapsed += quantum;
    }

    SlotOutcome::HorizonExceeded(preferred + config.horizon)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(seconds: i64) -> WallClock {
        WallClock::from_unix_seconds(seconds)
    }

    /// Scenario 1 — permits within limit.
    #[test]
    fn scenario_1_permits_within_limit() {
        let existing: Vec<WallClock> = vec![];
        let candidate = at(0);
        let limit = RateLimit {
            n: 5,
            window: Duration::from_secs(3600),
        };
        let offsets = [
            Duration::ZERO,
            Duration::from_secs(600),
            Duration::from_secs(1800),
        ];
        assert!(can_schedule(&existing, candidate, limit, &offsets));
    }

    /// Scenario 2 — violates limit; next admissible slot is 01:10:00.
    #[test]
    fn scenario_2_violates_limit_finds_next_slot() {
        let existing = vec![at(10 * 60), at(20 * 60), at(30 * 60), at(40 * 60)];
        let preferred = at(45 * 60);
        let limit = RateLimit {
            n: 4,
            window: Duration::from_secs(3600),
        };
        let offsets = [Duration::ZERO, Duration::from_secs(600)];

        assert!(!can_schedule(&existing, preferred, limit, &offsets));

        let outcome = next_slot(
            &existing,
            preferred,
            limit,
            &offsets,
            SearchConfig::default(),
        );
        match outcome {
            SlotOutcome::Admissible(t) => {
                assert_eq!(t.as_unix_seconds(), 70 * 60);
            }
            SlotOutcome::HorizonExceeded(_) => panic!("expected an admissible slot"),
        }
    }

    /// Scenario 3 — registering one commitment then asking for another at
    /// the same instant with rate_limit 1 is rejected.
    #[test]
    fn scenario_3_registration_then_schedule() {
        let existing = vec![at(0)];
        let limit = RateLimit {
            n: 1,
            window: Duration::from_secs(3600),
        };
        assert!(!can_schedule(&existing, at(0), limit, &[Duration::ZERO]));
    }

    #[test]
    fn horizon_exceeded_when_no_slot_fits() {
        // Rate limit of 0 can never admit anything.
        let existing: Vec<WallClock> = vec![];
        let limit = RateLimit {
            n: 0,
            window: Duration::from_secs(60),
        };
        let config = SearchConfig {
            quantum: Duration::from_secs(60),
            horizon: Duration::from_secs(120),
        };
        let outcome = next_slot(&existing, at(0), limit, &[Duration::ZERO], config);
        assert_eq!(
            outcome,
            SlotOutcome::HorizonExceeded(at(0) + Duration::from_secs(120))
        );
    }

    #[test]
    fn window_boundary_is_half_open_favoring_later_instant() {
        // An existing commitment exactly `window` before the candidate is
        // outside the window (t - W < e is false when e == t - W).
        let existing = vec![at(0)];
        let limit = RateLimit {
            n: 1,
            window: Duration::from_secs(3600),
        };
        let candidate = at(3600);
        assert!(can_schedule(&existing, candidate, limit, &[Duration::ZERO]));
    }

    #[test]
    fn idempotent_for_unchanged_registry() {
        let existing = vec![at(0), at(100)];
        let limit = RateLimit {
            n: 2,
            window: Duration::from_secs(3600),
        };
        let offsets = [Duration::ZERO];
        let first = can_schedule(&existing, at(50), limit, &offsets);
        let second = can_schedule(&existing, at(50), limit, &offsets);
        assert_eq!(first, second);
    }
}
