//! Module H: retry loop glue. Drives module A (local backoff) or module G
//! (coordinated scheduling) around a child process, per spec §4.H.
//!
//! Thin by design: spec.md notes the bulk of the interesting logic lives
//! in A–G. This crate's job is to spawn the child, classify its outcome,
//! and wire the two policy sources together.

pub mod events;
pub mod outcome;
pub mod runner;

pub use events::RunEvent;
pub use outcome::{AttemptOutcome, ExitClass};
pub use runner::{CoordinatedConfig, RetryConfig, RetryRunner, RunResult, RunnerError};

/// Exit code returned when every attempt was exhausted by the
/// per-attempt timeout rather than a non-zero exit, distinguishing the
/// two failure modes per spec §6. Matches the conventional exit code
/// GNU `timeout` uses.
pub const EXIT_CODE_TIMEOUT_EXHAUSTED: i32 = 124;

/// Exit code returned when the child process could not be spawned at
/// all (fatal, never retried, per spec §4.H/§7).
pub const EXIT_CODE_SPAWN_FAILURE: i32 = 127;
