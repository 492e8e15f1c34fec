//! Module G: the CLI-side coordinator client (spec §4.G).
//!
//! Owns a single connection, established lazily on first RPC, and
//! performs the handshake once per connection. Reconnection on a
//! transient transport error is attempted at most once per call; beyond
//! that, callers are expected to fall back to purely local backoff
//! (spec §7's error table).

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use cmdretry_protocol::{
    decode_server_message, encode_line, ClientMessage, RegisterEntry, ServerMessage, PROTOCOL_VERSION,
};

/// Deadline for `send_metrics_async`'s connect-and-write, per spec §4.G.
pub const METRICS_SEND_DEADLINE: Duration = Duration::from_millis(100);

/// Errors a client call against the coordinator can raise.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connect, read, or write failed, or the call's deadline elapsed.
    /// Coordinated mode should fall back to local backoff on this.
    #[error("transport error: {0}")]
    Transport(String),
    /// The coordinator replied with a malformed line or an `error`
    /// envelope.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The coordinator rejected the registration batch.
    #[error("registration rejected: {0}")]
    RegistrationRejected(String),
    /// The call was cancelled before it could be sent.
    #[error("cancelled")]
    Cancelled,
}

/// Parameters for a `schedule_request` RPC.
#[derive(Debug, Clone)]
pub struct ScheduleRequestParams {
    /// The rate-limited resource.
    pub resource_id: String,
    /// Maximum events per `window`.
    pub rate_limit: u32,
    /// The sliding window.
    pub window: Duration,
    /// Planned retry offsets from `request_time`.
    pub retry_offsets: Vec<Duration>,
    /// Unix-second instant to anchor offset 0 to.
    pub request_time: i64,
}

/// Outcome of a `schedule_request` RPC.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleResponse {
    /// Whether the candidate can be scheduled now.
    pub can_schedule: bool,
    /// RFC3339 instant to retry at, when `can_schedule` is false.
    pub wait_until: Option<String>,
    /// Human-readable explanation.
    pub reason: String,
}

/// A lazily-connected client for one coordinator socket.
pub struct CoordinatorClient {
    socket_path: PathBuf,
    client_name: String,
    connection: Option<BufReader<UnixStream>>,
}

impl CoordinatorClient {
    /// Creates a client for the coordinator socket at `socket_path`. No
    /// connection is made until the first RPC.
    pub fn new(socket_path: impl Into<PathBuf>, client_name: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            client_name: client_name.into(),
            connection: None,
        }
    }

    /// Asks whether a scheduling candidate can be admitted now.
    pub async fn can_schedule(&mut self, params: &ScheduleRequestParams, deadline: Duration) -> Result<ScheduleResponse, ClientError> {
        let message = ClientMessage::ScheduleRequest {
            resource_id: params.resource_id.clone(),
            rate_limit: params.rate_limit,
            window_ms: params.window.as_millis() as u64,
            retry_offsets: params.retry_offsets.iter().map(|d| d.as_millis() as u64).collect(),
            request_time: params.request_time,
        };

        match self.call(&message, deadline).await? {
            ServerMessage::ScheduleResponse {
                can_schedule,
                wait_until,
                reason,
            } => Ok(ScheduleResponse {
                can_schedule,
                wait_until,
                reason,
            }),
            ServerMessage::Error { error } => Err(ClientError::Protocol(error)),
            _ => Err(ClientError::Protocol("unexpected response to schedule_request".to_string())),
        }
    }

    /// Registers a batch of commitments, all-or-nothing.
    pub async fn register(&mut self, batch: Vec<RegisterEntry>, deadline: Duration) -> Result<(), ClientError> {
        let message = ClientMessage::RegisterRequest { requests: batch };
        match self.call(&message, deadline).await? {
            ServerMessage::RegisterResponse { success: true, .. } => Ok(()),
            ServerMessage::RegisterResponse { success: false, message } => Err(ClientError::RegistrationRejected(message)),
            ServerMessage::Error { error } => Err(ClientError::Protocol(error)),
            _ => Err(ClientError::Protocol("unexpected response to register_request".to_string())),
        }
    }

    /// Fire-and-forget metrics submission: opens a fresh connection with
    /// a 100ms connect+write deadline, writes the raw `RunMetrics` JSON,
    /// and closes. Errors are swallowed; the caller must not block on
    /// this beyond the deadline (spec §8 Scenario 6).
    pub async fn send_metrics_async(socket_path: impl Into<PathBuf>, metrics: &cmdretry_protocol::RunMetrics) {
        let socket_path = socket_path.into();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let _ = tokio::time::timeout(METRICS_SEND_DEADLINE, send_metrics_once(&socket_path, &metrics)).await;
        });
    }

    async fn call(&mut self, message: &ClientMessage, deadline: Duration) -> Result<ServerMessage, ClientError> {
        self.ensure_connected(deadline).await?;
        match self.send_and_receive(message, deadline).await {
            Ok(response) => Ok(response),
            Err(ClientError::Transport(_)) => {
                self.connection = None;
                self.ensure_connected(deadline).await?;
                self.send_and_receive(message, deadline).await
            }
            Err(other) => Err(other),
        }
    }

    async fn ensure_connected(&mut self, deadline: Duration) -> Result<(), ClientError> {
        if self.connection.is_some() {
            return Ok(());
        }

        let stream = tokio::time::timeout(deadline, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| ClientError::Transport("connect timed out".to_string()))?
            .map_err(|err| ClientError::Transport(err.to_string()))?;

        let mut connection = BufReader::new(stream);
        let handshake = ClientMessage::Handshake {
            version: PROTOCOL_VERSION.to_string(),
            client: self.client_name.clone(),
        };
        write_message(&mut connection, &handshake).await?;
        let response = read_message(&mut connection, deadline).await?;
        match response {
            ServerMessage::HandshakeResponse { status, .. } if status == "ok" => {
                self.connection = Some(connection);
                Ok(())
            }
            ServerMessage::Error { error } => Err(ClientError::Protocol(error)),
            _ => Err(ClientError::Protocol("unexpected handshake reply".to_string())),
        }
    }

    async fn send_and_receive(&mut self, message: &ClientMessage, deadline: Duration) -> Result<ServerMessage, ClientError> {
        let connection = self.connection.as_mut().ok_or_else(|| ClientError::Transport("not connected".to_string()))?;
        write_message(connection, message).await?;
        read_message(connection, deadline).await
    }
}

async fn write_message(connection: &mut BufReader<UnixStream>, message: &ClientMessage) -> Result<(), ClientError> {
    let line = encode_line(message).map_err(|err| ClientError::Protocol(err.to_string()))?;
    connection
        .write_all(line.as_bytes())
        .await
        .map_err(|err| ClientError::Transport(err.to_string()))?;
    connection.flush().await.map_err(|err| ClientError::Transport(err.to_string()))
}

async fn read_message(connection: &mut BufReader<UnixStream>, deadline: Duration) -> Result<ServerMessage, ClientError> {
    let mut line = String::new();
    let read = tokio::time::timeout(deadline, connection.read_line(&mut line))
        .await
        .map_err(|_| ClientError::Transport("read timed out".to_string()))?
        .map_err(|err| ClientError::Transport(err.to_string()))?;
    if read == 0 {
        return Err(ClientError::Transport("connection closed".to_string()));
    }
    decode_server_message(&line).map_err(|err| ClientError::Protocol(err.to_string()))
}

async fn send_metrics_once(socket_path: &Path, metrics: &cmdretry_protocol::RunMetrics) -> std::io::Result<()> {
    let mut stream = UnixStream::connect(socket_path).await?;
    let payload = serde_json::to_vec(metrics)?;
    stream.write_all(&payload).await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdretry_metrics::{AttemptRecord, FinalStatus};
    use cmdretry_protocol::RunMetrics;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn sample_metrics() -> RunMetrics {
        RunMetrics {
            command: "curl".to_string(),
            command_hash: "deadbeef".to_string(),
            final_status: FinalStatus::Succeeded,
            total_duration_seconds: 1.0,
            total_attempts: 1,
            successful_attempts: 1,
            failed_attempts: 0,
            attempts: vec![AttemptRecord {
                duration: 1.0,
                exit_code: Some(0),
                success: true,
                timestamp: 0,
            }],
        }
    }

    /// Scenario 6 — fire-and-forget metrics against an absent coordinator
    /// returns quickly and never propagates an error.
    #[tokio::test]
    async fn send_metrics_against_missing_socket_does_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.sock");
        let metrics = sample_metrics();

        let started = tokio::time::Instant::now();
        CoordinatorClient::send_metrics_async(path, &metrics).await;
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    async fn spawn_test_coordinator() -> (
        tempfile::TempDir,
        PathBuf,
        CancellationToken,
        tokio::task::JoinHandle<()>,
    ) {
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
        let shutdown = CancellationToken::new();
        let config = cmdretry_coordinator::CoordinatorConfig {
            socket_path: socket_path.clone(),
            pid_path: socket_path.with_extension("pid"),
            worker_count: 2,
            queue_capacity: 4,
            connection_timeout: Duration::from_secs(5),
            max_metrics: 100,
            max_metrics_age: Duration::from_secs(3600),
            scheduler_quantum: Duration::from_secs(60),
            scheduler_horizon: Duration::from_secs(86_400),
        };
        let serve_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            cmdretry_coordinator::transport::serve(listener, handler, &config, serve_shutdown).await;
        });

        (dir, socket_path, shutdown, handle)
    }

    #[tokio::test]
    async fn handshake_then_schedule_request_round_trips() {
        let (_dir, socket_path, shutdown, handle) = spawn_test_coordinator().await;
        let mut client = CoordinatorClient::new(&socket_path, "test-client");

        let response = client
            .can_schedule(
                &ScheduleRequestParams {
                    resource_id: "A".to_string(),
                    rate_limit: 5,
                    window: Duration::from_secs(3600),
                    retry_offsets: vec![Duration::ZERO],
                    request_time: 0,
                },
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        assert!(response.can_schedule);

        shutdown.cancel();
        let _ = handle.await;
    }
}
