//! Coordinator configuration: socket path, PID file, worker pool sizing,
//! timeouts, metrics caps, and the scheduler's search quantum/horizon
//! (Open Question 4).
//!
//! Spec §1 names the TOML/env/flag config *loader* itself as an external
//! collaborator out of scope, but `coordinatord` still needs one to be a
//! runnable binary. Precedence is flag > env > file > default; the
//! flag/env half of that is handled by `clap`'s `env` attribute on each
//! field (clap checks the flag before the env var), so this module only
//! has to layer the file and the defaults underneath.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

/// Default number of worker tasks in the coordinator's connection pool.
pub const DEFAULT_WORKER_COUNT: usize = 10;
/// Default connection idle timeout.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
/// Default socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/cmdretry-coordinator.sock";
/// Default PID file path.
pub const DEFAULT_PID_PATH: &str = "/tmp/cmdretry-coordinator.pid";

/// Errors raised while resolving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file existed but wasn't valid TOML for this shape.
    #[error("invalid config file: {0}")]
    InvalidFile(#[from] toml::de::Error),
    /// The config file could not be read.
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),
    /// A resolved value was out of range.
    #[error("invalid configuration: {message}")]
    Validation {
        /// What was wrong.
        message: String,
    },
}

/// The optional, file-sourced half of the configuration. Every field is
/// optional: a field absent from the file falls through to the flag/env
/// value (if any) or the hardcoded default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    socket_path: Option<PathBuf>,
    pid_path: Option<PathBuf>,
    worker_count: Option<usize>,
    queue_capacity: Option<usize>,
    connection_timeout_secs: Option<u64>,
    max_metrics: Option<usize>,
    max_metrics_age_secs: Option<u64>,
    scheduler_quantum_secs: Option<u64>,
    scheduler_horizon_secs: Option<u64>,
}

impl FileConfig {
    /// Loads a `FileConfig` from a TOML file at `path`.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}

/// Command-line flags for `coordinatord`. Each field also accepts the
/// matching environment variable (`CMDRETRY_COORD_*`), consulted only when
/// the flag itself is absent.
#[derive(Debug, Clone, Parser)]
#[command(name = "coordinatord", about = "cmdretry rate-limit coordinator")]
pub struct CoordinatorArgs {
    /// Path to a TOML config file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Unix socket path to bind.
    #[arg(long, env = "CMDRETRY_COORD_SOCKET_PATH")]
    pub socket_path: Option<PathBuf>,

    /// PID file path.
    #[arg(long, env = "CMDRETRY_COORD_PID_PATH")]
    pub pid_path: Option<PathBuf>,

    /// Number of worker tasks.
    #[arg(long, env = "CMDRETRY_COORD_WORKER_COUNT")]
    pub worker_count: Option<usize>,

    /// Bounded hand-off queue capacity. Defaults to 2x worker_count.
    #[arg(long, env = "CMDRETRY_COORD_QUEUE_CAPACITY")]
    pub queue_capacity: Option<usize>,

    /// Idle-connection timeout, in seconds.
    #[arg(long, env = "CMDRETRY_COORD_CONNECTION_TIMEOUT_SECS")]
    pub connection_timeout_secs: Option<u64>,

    /// Maximum retained metrics entries.
    #[arg(long, env = "CMDRETRY_COORD_MAX_METRICS")]
    pub max_metrics: Option<usize>,

    /// Maximum retained metrics age, in seconds.
    #[arg(long, env = "CMDRETRY_COORD_MAX_METRICS_AGE_SECS")]
    pub max_metrics_age_secs: Option<u64>,

    /// Diophantine `next_slot` search quantum, in seconds.
    #[arg(long, env = "CMDRETRY_COORD_SCHEDULER_QUANTUM_SECS")]
    pub scheduler_quantum_secs: Option<u64>,

    /// Diophantine `next_slot` search horizon, in seconds.
    #[arg(long, env = "CMDRETRY_COORD_SCHEDULER_HORIZON_SECS")]
    pub scheduler_horizon_secs: Option<u64>,
}

/// The fully resolved coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Unix socket path to bind, mode 0600.
    pub socket_path: PathBuf,
    /// PID file path, mode 0644.
    pub pid_path: PathBuf,
    /// Number of worker tasks.
    pub worker_count: usize,
    /// Bounded hand-off queue capacity.
    pub queue_capacity: usize,
    /// Idle-connection timeout.
    pub connection_timeout: Duration,
    /// Maximum retained metrics entries.
    pub max_metrics: usize,
    /// Maximum retained metrics age.
    pub max_metrics_age: Duration,
    /// Diophantine `next_slot` search quantum.
    pub scheduler_quantum: Duration,
    /// Diophantine `next_slot` search horizon.
    pub scheduler_horizon: Duration,
}

impl CoordinatorConfig {
    /// Resolves flags/env (via `args`), an optional parsed config file,
    /// and hardcoded defaults into a complete configuration.
    pub fn resolve(args: &CoordinatorArgs, file: Option<&FileConfig>) -> Result<Self, ConfigError> {
        let file = file.cloned().unwrap_or_default();

        let worker_count = args
            .worker_count
            .or(file.worker_count)
            .unwrap_or(DEFAULT_WORKER_COUNT);
        if worker_count == 0 {
            return Err(ConfigError::Validation {
                message: "worker_count must be positive".to_string(),
            });
        }

        let queue_capacity = args
            .queue_capacity
            .or(file.queue_capacity)
            .unwrap_or(worker_count * 2);

        Ok(Self {
            socket_path: args
                .socket_path
                .clone()
                .or(file.socket_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH)),
            pid_path: args
                .pid_path
                .clone()
                .or(file.pid_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PID_PATH)),
            worker_count,
            queue_capacity,
            connection_timeout: Duration::from_secs(
                args.connection_timeout_secs
                    .or(file.connection_timeout_secs)
                    .unwrap_or(DEFAULT_CONNECTION_TIMEOUT.as_secs()),
            ),
            max_metrics: args
                .max_metrics
                .or(file.max_metrics)
                .unwrap_or(cmdretry_metrics::DEFAULT_MAX_SIZE),
            max_metrics_age: Duration::from_secs(
                args.max_metrics_age_secs
                    .or(file.max_metrics_age_secs)
                    .unwrap_or(cmdretry_metrics::DEFAULT_MAX_AGE.as_secs()),
            ),
            scheduler_quantum: Duration::from_secs(
                args.scheduler_quantum_secs
                    .or(file.scheduler_quantum_secs)
                    .unwrap_or(cmdretry_scheduler::DEFAULT_QUANTUM.as_secs()),
            ),
            scheduler_horizon: Duration::from_secs(
                args.scheduler_horizon_secs
                    .or(file.scheduler_horizon_secs)
                    .unwrap_or(cmdretry_scheduler::DEFAULT_HORIZON.as_secs()),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_args() -> CoordinatorArgs {
        CoordinatorArgs {
            config: None,
            socket_path: None,
            pid_path: None,
            worker_count: None,
            queue_capacity: None,
            connection_timeout_secs: None,
            max_metrics: None,
            max_metrics_age_secs: None,
            scheduler_quantum_secs: None,
            scheduler_horizon_secs: None,
        }
    }

    #[test]
    fn defaults_apply_when_nothing_set() {
        let config = CoordinatorConfig::resolve(&empty_args(), None).unwrap();
        assert_eq!(config.worker_count, DEFAULT_WORKER_COUNT);
        assert_eq!(config.queue_capacity, DEFAULT_WORKER_COUNT * 2);
        assert_eq!(config.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));
    }

    #[test]
    fn flag_overrides_file() {
        let mut args = empty_args();
        args.worker_count = Some(4);
        let file = FileConfig {
            worker_count: Some(20),
            ..Default::default()
        };
        let config = CoordinatorConfig::resolve(&args, Some(&file)).unwrap();
        assert_eq!(config.worker_count, 4);
    }

    #[test]
    fn file_overrides_default() {
        let file = FileConfig {
            worker_count: Some(20),
            ..Default::default()
        };
        let config = CoordinatorConfig::resolve(&empty_args(), Some(&file)).unwrap();
        assert_eq!(config.worker_count, 20);
    }

    #[test]
    fn zero_worker_count_is_rejected() {
        let mut args = empty_args();
        args.worker_count = Some(0);
        let err = CoordinatorConfig::resolve(&args, None).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn file_config_parses_from_toml() {
        let toml_str = r#"
            worker_count = 16
            max_metrics = 500
        "#;
        let file: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(file.worker_count, Some(16));
        assert_eq!(file.max_metrics, Some(500));
    }
}
