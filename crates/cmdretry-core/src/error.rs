//! Umbrella error type composing every layer a retry run can fail at.
//!
//! Lets [`cmdretry`](../cmdretry/index.html)'s retry loop glue bubble up
//! scheduling, transport and child-process failures through one `?`-friendly
//! type instead of hand-writing a `From` impl per source crate.

use std::fmt;
use std::time::Duration;

/// A common error type wrapping every failure category named in the
/// error-handling design (validation, protocol, transport, capacity,
/// registry, scheduling, child-process).
#[derive(Debug, Clone, thiserror::Error)]
pub enum CmdRetryError<E> {
    /// Configuration or request field out of range. Not retried.
    #[error("validation error: {message}")]
    Validation {
        /// Human-readable description.
        message: String,
    },

    /// Malformed JSON, unknown message type, or unsupported protocol version.
    #[error("protocol error: {message}")]
    Protocol {
        /// Human-readable description.
        message: String,
    },

    /// Connect/read/write failure or timeout talking to the coordinator.
    #[error("transport error: {message}")]
    Transport {
        /// Human-readable description.
        message: String,
    },

    /// The coordinator's worker queue was full; connection was rejected.
    #[error("coordinator at capacity")]
    Capacity,

    /// Registry rejected a registration (duplicate id, bad expiry, ...).
    #[error("registry error: {message}")]
    Registry {
        /// Human-readable description.
        message: String,
    },

    /// No admissible slot was found within the scheduling horizon.
    #[error("no admissible slot within horizon, wait until {wait_ms}ms from now")]
    SchedulingHorizonExceeded {
        /// Milliseconds from now until the fallback slot.
        wait_ms: u64,
    },

    /// The child process could not be spawned at all. Fatal; never retried.
    #[error("failed to spawn child process: {message}")]
    ChildSpawn {
        /// Human-readable description.
        message: String,
    },

    /// The wrapped application error (e.g. a non-zero exit or timeout).
    #[error("{0}")]
    Application(E),
}

impl<E> CmdRetryError<E> {
    /// True if this is a transport-layer error (coordinator unreachable).
    pub fn is_transport(&self) -> bool {
        matches!(self, CmdRetryError::Transport { .. } | CmdRetryError::Capacity)
    }

    /// True if this is an application (child-process outcome) error.
    pub fn is_application(&self) -> bool {
        matches!(self, CmdRetryError::Application(_))
    }

    /// Extracts the application error, if this is an `Application` variant.
    pub fn application_error(self) -> Option<E> {
        match self {
            CmdRetryError::Application(e) => Some(e),
            _ => None,
        }
    }

    /// Maps the application error using a function, preserving all other
    /// variants unchanged.
    pub fn map_application<F, T>(self, f: F) -> CmdRetryError<T>
    where
        F: FnOnce(E) -> T,
    {
        match self {
            CmdRetryError::Validation { message } => CmdRetryError::Validation { message },
            CmdRetryError::Protocol { message } => CmdRetryError::Protocol { message },
            CmdRetryError::Transport { message } => CmdRetryError::Transport { message },
            CmdRetryError::Capacity => CmdRetryError::Capacity,
            CmdRetryError::Registry { message } => CmdRetryError::Registry { message },
            CmdRetryError::SchedulingHorizonExceeded { wait_ms } => {
                CmdRetryError::SchedulingHorizonExceeded { wait_ms }
            }
            CmdRetryError::ChildSpawn { message } => CmdRetryError::ChildSpawn { message },
            CmdRetryError::Application(e) => CmdRetryError::Application(f(e)),
        }
    }
}

/// Converts a [`Duration`] to milliseconds for [`CmdRetryError::SchedulingHorizonExceeded`].
pub fn wait_ms_from(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct AppErr(i32);

    impl fmt::Display for AppErr {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "exit code {}", self.0)
        }
    }
    impl std::error::Error for AppErr {}

    #[test]
    fn is_transport_matches_transport_and_capacity() {
        let t: CmdRetryError<AppErr> = CmdRetryError::Transport {
            message: "refused".into(),
        };
        assert!(t.is_transport());
        let c: CmdRetryError<AppErr> = CmdRetryError::Capacity;
        assert!(c.is_transport());
        let a: CmdRetryError<AppErr> = CmdRetryError::Application(AppErr(1));
        assert!(!a.is_transport());
    }

    #[test]
    fn map_application_preserves_other_variants() {
        let e: CmdRetryError<AppErr> = CmdRetryError::SchedulingHorizonExceeded { wait_ms: 500 };
        let mapped = e.map_application(|a| a.0);
        assert!(matches!(
            mapped,
            CmdRetryError::SchedulingHorizonExceeded { wait_ms: 500 }
        ));
    }

    #[test]
    fn application_error_roundtrips() {
        let e: CmdRetryError<AppErr> = CmdRetryError::Application(AppErr(7));
        assert_eq!(e.application_error().unwrap().0, 7);
    }
}
