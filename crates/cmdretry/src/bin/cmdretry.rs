//! `cmdretry`: a command-retry wrapper with proactive, coordinated
//! rate-limit scheduling (spec §1, §6).
//!
//! Flag parsing, config-file loading, and terminal progress rendering are
//! named out of scope in spec §1 as external collaborators; this binary
//! carries a thin but real `clap` surface so the crate builds and runs
//! end to end, per `SPEC_FULL.md`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use cmdretry::{CoordinatedConfig, RetryConfig, RetryRunner};
use cmdretry_backoff::{
    Capped, DecorrelatedJitterInterval, ExponentialInterval, FibonacciInterval, FixedInterval,
    IntervalFunction, JitterInterval, LinearInterval, PolynomialInterval,
};
use cmdretry_core::EventListeners;

/// Default path the coordinator binds its socket to, matching
/// `cmdretry-coordinator`'s own default.
const DEFAULT_DAEMON_ADDRESS: &str = "/tmp/cmdretry-coordinator.sock";

#[derive(Debug, Clone, clap::ValueEnum)]
enum Strategy {
    Fixed,
    Linear,
    Exponential,
    Jitter,
    DecorrelatedJitter,
    Fibonacci,
    Polynomial,
}

/// Command-retry wrapper with proactive, coordinated rate-limit scheduling.
#[derive(Debug, Parser)]
#[command(name = "cmdretry", version, about)]
struct Cli {
    /// Schedule retries through a running coordinator instead of purely
    /// locally.
    #[arg(long)]
    daemon: bool,

    /// Coordinator Unix socket path.
    #[arg(long, env = "CMDRETRY_DAEMON_ADDRESS", default_value = DEFAULT_DAEMON_ADDRESS)]
    daemon_address: PathBuf,

    /// The rate-limited resource this run's retries count against.
    /// Required when `--daemon` is set.
    #[arg(long)]
    resource_id: Option<String>,

    /// Maximum events per window, for the coordinator's Diophantine
    /// scheduler.
    #[arg(long, default_value_t = 60)]
    rate_limit: u32,

    /// The sliding window, in seconds, the rate limit applies over.
    #[arg(long, default_value_t = 60)]
    window_secs: u64,

    /// Deadline, in milliseconds, applied to each coordinator RPC.
    #[arg(long, default_value_t = 500)]
    coordinator_deadline_ms: u64,

    /// Maximum number of attempts before giving up.
    #[arg(long, short = 'n', default_value_t = 3)]
    max_attempts: usize,

    /// Per-attempt timeout, in seconds. Unbounded if omitted.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Local backoff strategy, used when not in coordinated mode or as
    /// the fallback when the coordinator is unreachable.
    #[arg(long, value_enum, default_value_t = Strategy::Exponential)]
    strategy: Strategy,

    /// Base delay for the chosen strategy, in milliseconds.
    #[arg(long, default_value_t = 500)]
    base_delay_ms: u64,

    /// Multiplier used by `exponential`, `jitter`, and
    /// `decorrelated-jitter` strategies.
    #[arg(long, default_value_t = 2.0)]
    multiplier: f64,

    /// Increment used by the `linear` strategy, in milliseconds.
    #[arg(long, default_value_t = 500)]
    increment_ms: u64,

    /// Exponent used by the `polynomial` strategy.
    #[arg(long, default_value_t = 2.0)]
    exponent: f64,

    /// Caps every computed delay, local or coordinated, in milliseconds.
    #[arg(long)]
    max_delay_ms: Option<u64>,

    /// Where to fire-and-forget this run's metrics. Defaults to
    /// `--daemon-address`; pass an empty string to disable submission.
    #[arg(long)]
    metrics_socket: Option<PathBuf>,

    /// The command to run, and its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    command: Vec<String>,
}

fn build_backoff(cli: &Cli) -> Arc<dyn IntervalFunction> {
    let base_delay = Duration::from_millis(cli.base_delay_ms);
    let strategy: Arc<dyn IntervalFunction> = match cli.strategy {
        Strategy::Fixed => Arc::new(FixedInterval::new(base_delay)),
        Strategy::Linear => Arc::new(LinearInterval::new(base_delay, Duration::from_millis(cli.increment_ms))),
        Strategy::Exponential => Arc::new(ExponentialInterval::new(base_delay).with_multiplier(cli.multiplier)),
        Strategy::Jitter => Arc::new(JitterInterval::new(base_delay).with_multiplier(cli.multiplier)),
        Strategy::DecorrelatedJitter => {
            Arc::new(DecorrelatedJitterInterval::new(base_delay).with_multiplier(cli.multiplier))
        }
        Strategy::Fibonacci => Arc::new(FibonacciInterval::new(base_delay)),
        Strategy::Polynomial => Arc::new(PolynomialInterval::new(base_delay, cli.exponent)),
    };

    match cli.max_delay_ms {
        Some(max) => Arc::new(Capped::new(strategy, Duration::from_millis(max))),
        None => strategy,
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    #[cfg(feature = "tracing")]
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.daemon && cli.resource_id.is_none() {
        eprintln!("--resource-id is required when --daemon is set");
        return std::process::ExitCode::FAILURE;
    }

    let coordinated = cli.daemon.then(|| CoordinatedConfig {
        socket_path: cli.daemon_address.clone(),
        resource_id: cli.resource_id.clone().unwrap_or_default(),
        rate_limit: cli.rate_limit,
        window: Duration::from_secs(cli.window_secs),
        rpc_deadline: Duration::from_millis(cli.coordinator_deadline_ms),
    });

    let metrics_socket_path = match &cli.metrics_socket {
        Some(path) if path.as_os_str().is_empty() => None,
        Some(path) => Some(path.clone()),
        None => Some(cli.daemon_address.clone()),
    };

    let config = RetryConfig {
        command: cli.command.clone(),
        max_attempts: cli.max_attempts.max(1),
        attempt_timeout: cli.timeout_secs.map(Duration::from_secs),
        backoff: build_backoff(&cli),
        max_delay: cli.max_delay_ms.map(Duration::from_millis),
        coordinated,
        metrics_socket_path,
        client_name: "cmdretry-cli".to_string(),
    };

    let runner = match RetryRunner::new(config, EventListeners::new()) {
        Ok(runner) => runner,
        Err(err) => {
            eprintln!("{err}");
            return std::process::ExitCode::FAILURE;
        }
    };

    let result = runner.run().await;
    let code = result.exit_code.clamp(0, 255) as u8;
    std::process::ExitCode::from(code)
}
