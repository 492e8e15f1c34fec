//! Module H: retry loop glue (spec §4.H).
//!
//! Drives module A ([`cmdretry_backoff`]) or module G
//! ([`cmdretry_client`]) around repeated executions of a child process,
//! classifies each attempt's outcome, and emits a [`RunMetrics`] to the
//! coordinator's fire-and-forget metrics endpoint when the run concludes.
//!
//! Deliberately thin: spec §2 puts the bulk of the interesting logic in
//! modules A-G. What looks like business logic here (exit classification,
//! the attempt loop) is mostly wiring.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::SeedableRng;
use tokio::process::Command;
use uuid::Uuid;

use cmdretry_backoff::IntervalFunction;
use cmdretry_client::{ClientError, CoordinatorClient, ScheduleRequestParams};
use cmdretry_core::EventListeners;
use cmdretry_protocol::RegisterEntry;
use cmdretry_scheduler::WallClock;

use crate::events::RunEvent;
use crate::outcome::{AttemptOutcome, ExitClass};
use crate::{EXIT_CODE_SPAWN_FAILURE, EXIT_CODE_TIMEOUT_EXHAUSTED};
use cmdretry_metrics::{AttemptRecord, FinalStatus, RunMetrics};

/// Parameters for coordinated (module G) scheduling, selected by `--daemon`.
#[derive(Debug, Clone)]
pub struct CoordinatedConfig {
    /// Path to the coordinator's Unix socket.
    pub socket_path: std::path::PathBuf,
    /// The rate-limited resource this run's retries count against.
    pub resource_id: String,
    /// Maximum events per `window`.
    pub rate_limit: u32,
    /// The sliding window the limit applies over.
    pub window: Duration,
    /// Deadline applied to every RPC against the coordinator.
    pub rpc_deadline: Duration,
}

/// Everything the retry loop needs for one run.
pub struct RetryConfig {
    /// The command to run: `command[0]` is the program, the rest are
    /// arguments.
    pub command: Vec<String>,
    /// Maximum number of attempts (1 means "no retries").
    pub max_attempts: usize,
    /// Per-attempt timeout; `None` means unbounded.
    pub attempt_timeout: Option<Duration>,
    /// The local backoff strategy used when not in coordinated mode, or
    /// as the fallback when the coordinator is unreachable.
    pub backoff: Arc<dyn IntervalFunction>,
    /// Cap applied to every computed delay, local or coordinated.
    pub max_delay: Option<Duration>,
    /// When set, retries are scheduled through the coordinator instead of
    /// purely locally.
    pub coordinated: Option<CoordinatedConfig>,
    /// Where to fire-and-forget the run's metrics on completion. `None`
    /// disables metrics submission entirely.
    pub metrics_socket_path: Option<std::path::PathBuf>,
    /// Client identifier sent in the handshake, for coordinator-side
    /// logging.
    pub client_name: String,
}

/// Errors that stop the retry loop before it can classify any attempt.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// `command` was empty.
    #[error("no command given")]
    EmptyCommand,
}

/// The outcome of a full run.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// The process exit code to propagate to the wrapper's own caller.
    pub exit_code: i32,
    /// Every attempt made, in order.
    pub attempts: Vec<AttemptOutcome>,
    /// The `RunMetrics` record submitted to the coordinator.
    pub metrics: RunMetrics,
}

fn unix_seconds_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Drives one retry run to completion.
pub struct RetryRunner {
    config: RetryConfig,
    events: EventListeners<RunEvent>,
}

impl RetryRunner {
    /// Builds a runner for `config`, emitting events to `events`.
    pub fn new(config: RetryConfig, events: EventListeners<RunEvent>) -> Result<Self, RunnerError> {
        if config.command.is_empty() {
            return Err(RunnerError::EmptyCommand);
        }
        Ok(Self { config, events })
    }

    /// Runs the command to completion or exhaustion, returning the final
    /// exit code, the per-attempt history, and the metrics record that
    /// was (attempted to be) submitted to the coordinator.
    pub async fn run(&self) -> RunResult {
        let run_start = std::time::Instant::now();
        let mut attempts: Vec<AttemptOutcome> = Vec::new();
        let mut client = self
            .config
            .coordinated
            .as_ref()
            .map(|coord| CoordinatorClient::new(coord.socket_path.clone(), self.config.client_name.clone()));
        let mut prev_delay: Option<Duration> = None;
        let mut rng = rand::rngs::StdRng::from_os_rng();

        for attempt in 1..=self.config.max_attempts {
            self.events.emit(&RunEvent::AttemptStarted {
                attempt,
                timestamp: std::time::Instant::now(),
            });

            let started_at = unix_seconds_now();
            let attempt_clock = std::time::Instant::now();
            let class = self.run_one_attempt().await;
            let duration = attempt_clock.elapsed();

            self.emit_attempt_event(attempt, &class);
            attempts.push(AttemptOutcome {
                class: class.clone(),
                duration,
                started_at,
            });

            if !class.is_retryable() || attempt == self.config.max_attempts {
                break;
            }

            let delay = self
                .next_delay(attempt, prev_delay, client.as_mut(), &mut rng)
                .await;
            prev_delay = Some(delay);

            self.events.emit(&RunEvent::Retrying {
                attempt: attempt + 1,
                delay,
                timestamp: std::time::Instant::now(),
            });
            tokio::time::sleep(delay).await;
        }

        let succeeded = attempts.last().map(|a| a.class.is_success()).unwrap_or(false);
        self.events.emit(&RunEvent::RunCompleted {
            attempts: attempts.len(),
            succeeded,
            timestamp: std::time::Instant::now(),
        });

        let metrics = self.build_metrics(&attempts, run_start.elapsed(), succeeded);
        if let Some(socket_path) = &self.config.metrics_socket_path {
            CoordinatorClient::send_metrics_async(socket_path.clone(), &metrics).await;
        }

        RunResult {
            exit_code: Self::final_exit_code(&attempts, succeeded),
            attempts,
            metrics,
        }
    }

    async fn run_one_attempt(&self) -> ExitClass {
        let (program, args) = self
            .config
            .command
            .split_first()
            .expect("command validated non-empty in RetryRunner::new");

        let mut command = Command::new(program);
        command.args(args);
        command.stdin(Stdio::inherit());
        command.stdout(Stdio::inherit());
        command.stderr(Stdio::inherit());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => return ExitClass::SpawnError(err.to_string()),
        };

        let wait_result = match self.config.attempt_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    let _ = child.kill().await;
                    return ExitClass::Timeout;
                }
            },
            None => child.wait().await,
        };

        match wait_result {
            Ok(status) if status.success() => ExitClass::Success,
            Ok(status) => ExitClass::NonZeroExit(status.code().unwrap_or(-1)),
            Err(err) => ExitClass::SpawnError(err.to_string()),
        }
    }

    fn emit_attempt_event(&self, attempt: usize, class: &ExitClass) {
        let timestamp = std::time::Instant::now();
        let event = match class {
            ExitClass::Success => RunEvent::AttemptSucceeded { attempt, timestamp },
            ExitClass::NonZeroExit(code) => RunEvent::AttemptFailed {
                attempt,
                exit_code: Some(*code),
                timestamp,
            },
            ExitClass::Timeout => RunEvent::AttemptTimedOut { attempt, timestamp },
            ExitClass::SpawnError(message) => RunEvent::SpawnFailed {
                message: message.clone(),
                timestamp,
            },
        };
        self.events.emit(&event);
    }

    /// Computes the delay before the next attempt: via the coordinator
    /// when in coordinated mode (falling back to local backoff on any
    /// transport error, per spec §7), or via the local strategy otherwise.
    async fn next_delay(
        &self,
        attempt: usize,
        prev_delay: Option<Duration>,
        client: Option<&mut CoordinatorClient>,
        rng: &mut dyn rand::RngCore,
    ) -> Duration {
        if let (Some(coord), Some(client)) = (&self.config.coordinated, client) {
            match self.schedule_via_coordinator(coord, client).await {
                Ok(delay) => return self.cap(delay),
                Err(err) => {
                    self.events.emit(&RunEvent::CoordinatorUnavailable {
                        reason: err.to_string(),
                        timestamp: std::time::Instant::now(),
                    });
                }
            }
        }

        let local = self.config.backoff.next_interval(attempt, prev_delay, rng);
        self.cap(local)
    }

    fn cap(&self, delay: Duration) -> Duration {
        match self.config.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Asks the coordinator whether now is admissible; if not, sleeps
    /// until the slot it offers. Either way, registers the chosen instant
    /// as a commitment so other concurrent CLIs see it.
    async fn schedule_via_coordinator(
        &self,
        coord: &CoordinatedConfig,
        client: &mut CoordinatorClient,
    ) -> Result<Duration, ClientError> {
        let now = WallClock::now();
        let params = ScheduleRequestParams {
            resource_id: coord.resource_id.clone(),
            rate_limit: coord.rate_limit,
            window: coord.window,
            retry_offsets: vec![Duration::ZERO],
            request_time: now.as_unix_seconds(),
        };

        let response = client.can_schedule(&params, coord.rpc_deadline).await?;
        let scheduled_at = if response.can_schedule {
            now
        } else {
            match response.wait_until.as_deref().and_then(parse_rfc3339) {
                Some(instant) => instant,
                None => now,
            }
        };

        let entry = RegisterEntry {
            id: Uuid::new_v4().to_string(),
            resource_id: coord.resource_id.clone(),
            scheduled_at: scheduled_at.as_unix_seconds(),
            expires_at: (scheduled_at + coord.window).as_unix_seconds(),
        };
        client.register(vec![entry], coord.rpc_deadline).await?;

        Ok(scheduled_at.saturating_duration_since(now))
    }

    fn build_metrics(&self, attempts: &[AttemptOutcome], total_duration: Duration, succeeded: bool) -> RunMetrics {
        let successful_attempts = attempts.iter().filter(|a| a.class.is_success()).count() as u32;
        let failed_attempts = attempts.len() as u32 - successful_attempts;
        RunMetrics {
            command: self.config.command.join(" "),
            command_hash: cmdretry_metrics::command_hash(&self.config.command),
            final_status: if succeeded {
                FinalStatus::Succeeded
            } else {
                FinalStatus::Failed
            },
            total_duration_seconds: total_duration.as_secs_f64(),
            total_attempts: attempts.len() as u32,
            successful_attempts,
            failed_attempts,
            attempts: attempts
                .iter()
                .map(|a| AttemptRecord {
                    duration: a.duration.as_secs_f64(),
                    exit_code: match &a.class {
                        ExitClass::Success => Some(0),
                        ExitClass::NonZeroExit(code) => Some(*code),
                        ExitClass::Timeout | ExitClass::SpawnError(_) => None,
                    },
                    success: a.class.is_success(),
                    timestamp: a.started_at,
                })
                .collect(),
        }
    }

    /// Final process exit code per spec §4.H/§6: 0 on success, the last
    /// attempt's exit code on a non-zero-exit failure, or a distinguished
    /// code for timeout-exhaustion/spawn failure.
    fn final_exit_code(attempts: &[AttemptOutcome], succeeded: bool) -> i32 {
        if succeeded {
            return 0;
        }
        match attempts.last().map(|a| &a.class) {
            Some(ExitClass::NonZeroExit(code)) => *code,
            Some(ExitClass::Timeout) => EXIT_CODE_TIMEOUT_EXHAUSTED,
            Some(ExitClass::SpawnError(_)) => EXIT_CODE_SPAWN_FAILURE,
            _ => EXIT_CODE_SPAWN_FAILURE,
        }
    }
}

fn parse_rfc3339(text: &str) -> Option<WallClock> {
    chrono::DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| WallClock::from_millis(dt.timestamp_millis()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdretry_backoff::FixedInterval;
    use std::sync::Arc;

    fn config(command: Vec<&str>) -> RetryConfig {
        RetryConfig {
            command: command.into_iter().map(str::to_string).collect(),
            max_attempts: 3,
            attempt_timeout: Some(Duration::from_secs(5)),
            backoff: Arc::new(FixedInterval::new(Duration::from_millis(10))),
            max_delay: None,
            coordinated: None,
            metrics_socket_path: None,
            client_name: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn succeeding_command_runs_once() {
        let runner = RetryRunner::new(config(vec!["true"]), EventListeners::new()).unwrap();
        let result = runner.run().await;
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.attempts.len(), 1);
        assert!(result.metrics.final_status == FinalStatus::Succeeded);
    }

    #[tokio::test]
    async fn failing_command_retries_until_exhausted() {
        let runner = RetryRunner::new(config(vec!["false"]), EventListeners::new()).unwrap();
        let result = runner.run().await;
        assert_eq!(result.attempts.len(), 3);
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.metrics.final_status, FinalStatus::Failed);
        assert_eq!(result.metrics.total_attempts, 3);
    }

    #[tokio::test]
    async fn spawn_failure_is_fatal_and_not_retried() {
        let runner = RetryRunner::new(
            config(vec!["/nonexistent/binary/does-not-exist"]),
            EventListeners::new(),
        )
        .unwrap();
        let result = runner.run().await;
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(result.exit_code, EXIT_CODE_SPAWN_FAILURE);
    }

    #[tokio::test]
    async fn timeout_kills_child_and_is_retried() {
        let mut cfg = config(vec!["sleep", "5"]);
        cfg.attempt_timeout = Some(Duration::from_millis(50));
        cfg.max_attempts = 2;
        let runner = RetryRunner::new(cfg, EventListeners::new()).unwrap();
        let result = runner.run().await;
        assert_eq!(result.attempts.len(), 2);
        assert!(matches!(result.attempts[0].class, ExitClass::Timeout));
        assert_eq!(result.exit_code, EXIT_CODE_TIMEOUT_EXHAUSTED);
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let err = RetryRunner::new(config(vec![]), EventListeners::new()).unwrap_err();
        assert!(matches!(err, RunnerError::EmptyCommand));
    }

    async fn spawn_test_coordinator() -> (tempfile::TempDir, std::path::PathBuf, tokio_util::sync::CancellationToken, tokio::task::JoinHandle<()>) {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let registry = Arc::new(cmdretry_registry::Registry::new());
        let metrics = Arc::new(cmdretry_metrics::MetricsStore::new(100, Duration::from_secs(3600)));
        let handler = Arc::new(cmdretry_coordinator::ConnectionHandler::new(
            registry,
            metrics,
            cmdretry_scheduler::SearchConfig::default(),
        ));
        let listener = cmdretry_coordinator::transport::bind(&socket_path).await.unwrap();
        let shutdown = tokio_util::sync::CancellationToken::new();
        let config = cmdretry_coordinator::CoordinatorConfig {
            socket_path: socket_path.clone(),
            pid_path: socket_path.with_extension("pid"),
            worker_count: 2,
            queue_capacity: 4,
            connection_timeout: Duration::from_secs(5),
            max_metrics: 100,
            max_metrics_age: Duration::from_secs(3600),
            scheduler_quantum: Duration::from_secs(1),
            scheduler_horizon: Duration::from_secs(60),
        };
        let serve_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            cmdretry_coordinator::transport::serve(listener, handler, &config, serve_shutdown).await;
        });

        (dir, socket_path, shutdown, handle)
    }

    #[tokio::test]
    async fn coordinated_mode_schedules_retry_through_coordinator() {
        let (_dir, socket_path, shutdown, handle) = spawn_test_coordinator().await;

        let mut cfg = config(vec!["false"]);
        cfg.max_attempts = 2;
        cfg.coordinated = Some(CoordinatedConfig {
            socket_path: socket_path.clone(),
            resource_id: "A".to_string(),
            rate_limit: 5,
            window: Duration::from_secs(60),
            rpc_deadline: Duration::from_secs(1),
        });

        let runner = RetryRunner::new(cfg, EventListeners::new()).unwrap();
        // Each attempt is well within the rate limit, so the coordinator
        // admits immediately and this completes quickly rather than
        // waiting out a scheduling delay.
        let result = tokio::time::timeout(Duration::from_secs(5), runner.run())
            .await
            .expect("coordinated run should not hang");
        assert_eq!(result.attempts.len(), 2);
        assert_eq!(result.exit_code, 1);

        shutdown.cancel();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn coordinator_unreachable_falls_back_to_local_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let missing_socket = dir.path().join("absent.sock");

        let mut cfg = config(vec!["false"]);
        cfg.max_attempts = 2;
        cfg.coordinated = Some(CoordinatedConfig {
            socket_path: missing_socket,
            resource_id: "A".to_string(),
            rate_limit: 5,
            window: Duration::from_secs(60),
            rpc_deadline: Duration::from_millis(100),
        });

        let runner = RetryRunner::new(cfg, EventListeners::new()).unwrap();
        let result = runner.run().await;
        // Falls back to the local FixedInterval(10ms) strategy rather than
        // hanging or failing the run outright.
        assert_eq!(result.attempts.len(), 2);
    }
}
