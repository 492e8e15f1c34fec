//! The `RunMetrics` wire/storage schema (spec §3) and its stable command
//! hash.

use serde::{Deserialize, Serialize};

/// Outcome of a full retry run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    /// The run eventually succeeded.
    Succeeded,
    /// Every attempt (or the retry budget/attempt cap) was exhausted.
    Failed,
}

/// One attempt within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// How long the attempt took, in seconds.
    pub duration: f64,
    /// The child process's exit code, if it ran to completion.
    pub exit_code: Option<i32>,
    /// Whether this attempt was classified as a success.
    pub success: bool,
    /// Unix-second timestamp the attempt started at.
    pub timestamp: i64,
}

/// A full run of the wrapped command, submitted to the coordinator's
/// metrics ingestion endpoint on completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    /// The command line that was run, joined with spaces.
    pub command: String,
    /// Stable 8-hex-digit digest of `command`'s tokens.
    pub command_hash: String,
    /// Final outcome of the run.
    pub final_status: FinalStatus,
    /// Wall-clock duration of the entire run, in seconds.
    pub total_duration_seconds: f64,
    /// Total number of attempts made.
    pub total_attempts: u32,
    /// Number of attempts classified as successful.
    pub successful_attempts: u32,
    /// Number of attempts classified as failed.
    pub failed_attempts: u32,
    /// Per-attempt detail, in chronological order.
    pub attempts: Vec<AttemptRecord>,
}

/// Computes the stable 8-hex-digit digest of a command's joined tokens.
///
/// Uses FNV-1a (a small, dependency-free, non-cryptographic hash) rather
/// than pulling in a hashing crate purely to fingerprint a command line for
/// grouping purposes — collisions here cost nothing but a slightly blended
/// "top commands" bucket.
pub fn command_hash(tokens: &[String]) -> String {
    const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    let joined = tokens.join(" ");
    let mut hash = FNV_OFFSET_BASIS;
    for byte in joined.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{:08x}", hash)
}
