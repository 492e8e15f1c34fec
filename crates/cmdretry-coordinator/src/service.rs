//! Module F: the per-connection state machine (spec §4.F).
//!
//! ```text
//!   [connected] --handshake ok--> [ready] --request/reply*--> [ready]
//!       |                           |
//!   bad version or non-handshake   idle > connection_timeout
//!       |                           |
//!       v                           v
//!   [error; close]              [close]
//! ```
//!
//! Tightened relative to the reference behavior per Open Question 2: any
//! non-handshake message on a fresh connection is rejected with
//! `error = "handshake required"` rather than being dispatched.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::sync::CancellationToken;

#[cfg(feature = "tracing")]
use tracing::{debug, warn};

use cmdretry_metrics::{MetricsStore, RunMetrics};
use cmdretry_protocol::{decode_client_message, encode_line, ClientMessage, RegisterEntry, ServerMessage, PROTOCOL_VERSION};
use cmdretry_registry::{Registry, ScheduledRequest};
use cmdretry_scheduler::{RateLimit, SearchConfig, SlotOutcome, WallClock};

/// Formats a [`WallClock`] as an RFC3339 timestamp for the wire, per §6.
fn wall_clock_to_rfc3339(instant: WallClock) -> String {
    chrono::DateTime::from_timestamp_millis(instant.as_millis())
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_default()
}

/// Deadline for reading the first line of a fresh connection and, if it
/// turns out to be a bare metrics payload, for reading it end to end
/// (spec §4.F's 5-second metrics read deadline).
const METRICS_READ_DEADLINE: Duration = Duration::from_secs(5);

/// Binds the registry, metrics store, and scheduler search parameters to
/// the transport.
pub struct ConnectionHandler {
    registry: Arc<Registry>,
    metrics: Arc<MetricsStore>,
    search_config: SearchConfig,
}

enum HandshakeState {
    AwaitingHandshake,
    Ready,
}

impl ConnectionHandler {
    /// Builds a handler over the given registry and metrics store.
    pub fn new(registry: Arc<Registry>, metrics: Arc<MetricsStore>, search_config: SearchConfig) -> Self {
        Self {
            registry,
            metrics,
            search_config,
        }
    }

    /// Owns `stream` for its full lifetime: reads the first line to
    /// decide whether this is a typed protocol connection or a bare
    /// metrics payload, then drives the corresponding flow until EOF,
    /// idle timeout, or `shutdown`.
    pub async fn handle_connection(&self, stream: UnixStream, connection_timeout: Duration, shutdown: CancellationToken) {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half).lines();

        let first_line = tokio::select! {
            _ = shutdown.cancelled() => return,
            line = tokio::time::timeout(METRICS_READ_DEADLINE, reader.next_line()) => line,
        };

        let first_line = match first_line {
            Ok(Ok(Some(line))) => line,
            _ => return,
        };

        match decode_client_message(&first_line) {
            Ok(message) => {
                self.drive_protocol(message, &mut reader, &mut write_half, connection_timeout, &shutdown)
                    .await;
            }
            Err(_) => {
                self.ingest_metrics(&first_line).await;
            }
        }
    }

    async fn ingest_metrics(&self, payload: &str) {
        match serde_json::from_str::<RunMetrics>(payload) {
            Ok(metrics) => {
                let now = WallClock::now().as_unix_seconds();
                self.metrics.store(metrics, now).await;
                #[cfg(feature = "tracing")]
                debug!("ingested run metrics");
            }
            Err(_err) => {
                #[cfg(feature = "tracing")]
                warn!(error = %_err, "dropping unparseable metrics payload");
            }
        }
    }

    async fn drive_protocol(
        &self,
        first_message: ClientMessage,
        reader: &mut tokio::io::Lines<BufReader<OwnedReadHalf>>,
        writer: &mut OwnedWriteHalf,
        connection_timeout: Duration,
        shutdown: &CancellationToken,
    ) {
        let mut state = HandshakeState::AwaitingHandshake;
        let mut next_message = Some(first_message);

        loop {
            let message = match next_message.take() {
                Some(message) => message,
                None => {
                    let line = tokio::select! {
                        _ = shutdown.cancelled() => return,
                        line = tokio::time::timeout(connection_timeout, reader.next_line()) => line,
                    };
                    match line {
                        Ok(Ok(Some(line))) => match decode_client_message(&line) {
                            Ok(message) => message,
                            Err(_) => {
                                let _ = Self::reply(writer, &ServerMessage::error("malformed message")).await;
                                return;
                            }
                        },
                        _ => return,
                    }
                }
            };

            let response = match (&state, message) {
                (HandshakeState::AwaitingHandshake, ClientMessage::Handshake { version, client: _ }) => {
                    if version == PROTOCOL_VERSION {
                        state = HandshakeState::Ready;
                        ServerMessage::HandshakeResponse {
                            status: "ok".to_string(),
                            version: PROTOCOL_VERSION.to_string(),
                        }
                    } else {
                        let _ = Self::reply(writer, &ServerMessage::error("unsupported protocol version")).await;
                        return;
                    }
                }
                (HandshakeState::AwaitingHandshake, _other) => {
                    let _ = Self::reply(writer, &ServerMessage::error("handshake required")).await;
                    return;
                }
                (HandshakeState::Ready, ClientMessage::Handshake { .. }) => {
                    ServerMessage::error("handshake required")
                }
                (HandshakeState::Ready, ClientMessage::ScheduleRequest {
                    resource_id,
                    rate_limit,
                    window_ms,
                    retry_offsets,
                    request_time,
                }) => {
                    self.handle_schedule_request(&resource_id, rate_limit, window_ms, &retry_offsets, request_time)
                        .await
                }
                (HandshakeState::Ready, ClientMessage::RegisterRequest { requests }) => {
                    self.handle_register_request(requests).await
                }
            };

            if Self::reply(writer, &response).await.is_err() {
                return;
            }
        }
    }

    async fn handle_schedule_request(
        &self,
        resource_id: &str,
        rate_limit: u32,
        window_ms: u64,
        retry_offsets: &[u64],
        request_time: i64,
    ) -> ServerMessage {
        let rate_limit = RateLimit {
            n: rate_limit,
            window: Duration::from_millis(window_ms),
        };
        let offsets: Vec<Duration> = retry_offsets.iter().map(|ms| Duration::from_millis(*ms)).collect();
        let candidate = WallClock::from_unix_seconds(request_time);

        let can_schedule = self
            .registry
            .can_schedule_with_strategy(resource_id, candidate, rate_limit, &offsets)
            .await;

        if can_schedule {
            ServerMessage::ScheduleResponse {
                can_schedule: true,
                wait_until: None,
                reason: "within rate limit".to_string(),
            }
        } else {
            let outcome = self
                .registry
                .next_slot_with_strategy(resource_id, candidate, rate_limit, &offsets, self.search_config)
                .await;
            let (wait_until, reason) = match outcome {
                SlotOutcome::Admissible(t) => (t, "rate limit would be exceeded"),
                SlotOutcome::HorizonExceeded(t) => (t, "horizon exceeded"),
            };
            ServerMessage::ScheduleResponse {
                can_schedule: false,
                wait_until: Some(wall_clock_to_rfc3339(wait_until)),
                reason: reason.to_string(),
            }
        }
    }

    async fn handle_register_request(&self, requests: Vec<RegisterEntry>) -> ServerMessage {
        let entries: Vec<ScheduledRequest> = requests
            .into_iter()
            .map(|entry| ScheduledRequest {
                id: entry.id,
                resource_id: entry.resource_id,
                scheduled_at: WallClock::from_unix_seconds(entry.scheduled_at),
                expires_at: WallClock::from_unix_seconds(entry.expires_at),
            })
            .collect();

        match self.registry.add_batch(entries).await {
            Ok(()) => ServerMessage::RegisterResponse {
                success: true,
                message: String::new(),
            },
            Err(err) => ServerMessage::RegisterResponse {
                success: false,
                message: err.to_string(),
            },
        }
    }

    async fn reply(writer: &mut OwnedWriteHalf, message: &ServerMessage) -> std::io::Result<()> {
        let line = encode_line(message).map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await
    }
}
