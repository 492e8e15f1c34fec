use clap::Parser;
use cmdretry_coordinator::{config::FileConfig, pidfile::PidFile, CoordinatorArgs, CoordinatorConfig};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    #[cfg(feature = "tracing")]
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = CoordinatorArgs::parse();
    let file_config = match &args.config {
        Some(path) => match FileConfig::load(path) {
            Ok(file) => Some(file),
            Err(err) => {
                eprintln!("failed to load config file {}: {err}", path.display());
                return std::process::ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let config = match CoordinatorConfig::resolve(&args, file_config.as_ref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            return std::process::ExitCode::FAILURE;
        }
    };

    let pid_file = match PidFile::create(&config.pid_path) {
        Ok(pid_file) => pid_file,
        Err(err) => {
            eprintln!("{err}");
            return std::process::ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        signal_shutdown.cancel();
    });

    let result = cmdretry_coordinator::run(config, shutdown).await;
    pid_file.remove();

    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("coordinator error: {err}");
            std::process::ExitCode::FAILURE
        }
    }
}
