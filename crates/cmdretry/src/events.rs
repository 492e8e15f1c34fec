//! Events emitted by the retry loop (module H), in the style of the
//! per-crate `RetryEvent`/`CircuitBreakerEvent` enums the rest of the
//! workspace's ancestor middleware used for observability.

use std::time::{Duration, Instant};

use cmdretry_core::CmdRetryEvent;

/// Events a [`crate::runner::RetryRunner`] emits as a run progresses.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// An attempt is about to start.
    AttemptStarted {
        /// 1-indexed attempt number.
        attempt: usize,
        /// When the attempt started.
        timestamp: Instant,
    },
    /// An attempt completed successfully (exit code 0).
    AttemptSucceeded {
        /// 1-indexed attempt number.
        attempt: usize,
        /// When the attempt concluded.
        timestamp: Instant,
    },
    /// An attempt exited non-zero.
    AttemptFailed {
        /// 1-indexed attempt number.
        attempt: usize,
        /// The child's exit code, if it ran to completion.
        exit_code: Option<i32>,
        /// When the attempt concluded.
        timestamp: Instant,
    },
    /// An attempt was killed after exceeding its per-attempt timeout.
    AttemptTimedOut {
        /// 1-indexed attempt number.
        attempt: usize,
        /// When the attempt was killed.
        timestamp: Instant,
    },
    /// The child could not be spawned. Always fatal; the run ends here.
    SpawnFailed {
        /// Why the spawn failed.
        message: String,
        /// When the spawn was attempted.
        timestamp: Instant,
    },
    /// A retry is about to happen after sleeping `delay`.
    Retrying {
        /// The attempt number about to be made.
        attempt: usize,
        /// How long the runner is about to sleep before that attempt.
        delay: Duration,
        /// When the decision was made.
        timestamp: Instant,
    },
    /// The coordinator could not be reached; falling back to local backoff.
    CoordinatorUnavailable {
        /// Human-readable detail.
        reason: String,
        /// When the fallback was taken.
        timestamp: Instant,
    },
    /// The run concluded, successfully or not.
    RunCompleted {
        /// Total attempts made.
        attempts: usize,
        /// Whether the run ultimately succeeded.
        succeeded: bool,
        /// When the run concluded.
        timestamp: Instant,
    },
}

impl CmdRetryEvent for RunEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RunEvent::AttemptStarted { .. } => "attempt_started",
            RunEvent::AttemptSucceeded { .. } => "attempt_succeeded",
            RunEvent::AttemptFailed { .. } => "attempt_failed",
            RunEvent::AttemptTimedOut { .. } => "attempt_timed_out",
            RunEvent::SpawnFailed { .. } => "spawn_failed",
            RunEvent::Retrying { .. } => "retrying",
            RunEvent::CoordinatorUnavailable { .. } => "coordinator_unavailable",
            RunEvent::RunCompleted { .. } => "run_completed",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            RunEvent::AttemptStarted { timestamp, .. }
            | RunEvent::AttemptSucceeded { timestamp, .. }
            | RunEvent::AttemptFailed { timestamp, .. }
            | RunEvent::AttemptTimedOut { timestamp, .. }
            | RunEvent::SpawnFailed { timestamp, .. }
            | RunEvent::Retrying { timestamp, .. }
            | RunEvent::CoordinatorUnavailable { timestamp, .. }
            | RunEvent::RunCompleted { timestamp, .. } => *timestamp,
        }
    }
}
