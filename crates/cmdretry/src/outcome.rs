//! Outcome classification for a single attempt (spec §4.H, §7).

use std::time::Duration;

/// What happened to one attempt at running the child process.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitClass {
    /// The child ran to completion with exit code 0.
    Success,
    /// The child ran to completion with a non-zero exit code.
    NonZeroExit(i32),
    /// The per-attempt timeout elapsed and the child was killed.
    Timeout,
    /// The child could not be spawned at all. Fatal; never retried.
    SpawnError(String),
}

impl ExitClass {
    /// Whether this outcome is eligible for another attempt, assuming
    /// attempts remain. Spec §4.H: "Only non-zero exits and timeouts
    /// retry; spawn errors are fatal for the run."
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExitClass::NonZeroExit(_) | ExitClass::Timeout)
    }

    /// Whether this outcome counts as a successful attempt for
    /// `RunMetrics::successful_attempts`.
    pub fn is_success(&self) -> bool {
        matches!(self, ExitClass::Success)
    }
}

/// A single recorded attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptOutcome {
    /// How this attempt concluded.
    pub class: ExitClass,
    /// Wall-clock duration of the attempt.
    pub duration: Duration,
    /// Unix-second timestamp the attempt started at.
    pub started_at: i64,
}
