//! The `type`-discriminated envelopes exchanged over the coordinator's
//! Unix socket (spec §6).

use serde::{Deserialize, Serialize};

/// The only protocol version this crate's server half accepts.
pub const PROTOCOL_VERSION: &str = "1.0";

/// One entry of a `register_request` batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterEntry {
    /// Caller-chosen identifier, unique within `resource_id`.
    pub id: String,
    /// The rate-limited resource this commitment counts against.
    pub resource_id: String,
    /// Unix-second instant the commitment is scheduled for.
    pub scheduled_at: i64,
    /// Unix-second instant the commitment stops being live. Must exceed
    /// `scheduled_at`.
    pub expires_at: i64,
}

/// Messages a client sends to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Must be the first message on a fresh connection.
    #[serde(rename = "handshake")]
    Handshake {
        /// Protocol version the client speaks. Only `"1.0"` is accepted.
        version: String,
        /// Human-readable client identifier, for logging only.
        client: String,
    },
    /// Asks whether `candidate` (derived from `request_time` and
    /// `retry_offsets`) can be scheduled against `resource_id`'s rate
    /// limit.
    #[serde(rename = "schedule_request")]
    ScheduleRequest {
        /// The rate-limited resource.
        resource_id: String,
        /// Maximum events per `window_ms`.
        rate_limit: u32,
        /// Sliding window length, in milliseconds.
        window_ms: u64,
        /// Planned retry offsets from `request_time`, in milliseconds,
        /// non-decreasing and starting at 0.
        retry_offsets: Vec<u64>,
        /// Unix-second instant the caller anchors offset 0 to.
        request_time: i64,
    },
    /// Requests a batch of commitments be added to the registry,
    /// all-or-nothing.
    #[serde(rename = "register_request")]
    RegisterRequest {
        /// The commitments to add.
        requests: Vec<RegisterEntry>,
    },
}

/// Messages the coordinator sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Reply to a successful `handshake`.
    #[serde(rename = "handshake_response")]
    HandshakeResponse {
        /// Always `"ok"`.
        status: String,
        /// Echoes [`PROTOCOL_VERSION`].
        version: String,
    },
    /// Reply to a `schedule_request`.
    #[serde(rename = "schedule_response")]
    ScheduleResponse {
        /// Whether the candidate (and its retry offsets) can be
        /// scheduled now.
        can_schedule: bool,
        /// The earliest admissible instant, RFC3339, when
        /// `can_schedule` is false. `None` when `can_schedule` is true.
        wait_until: Option<String>,
        /// Human-readable explanation.
        reason: String,
    },
    /// Reply to a `register_request`.
    #[serde(rename = "register_response")]
    RegisterResponse {
        /// `true` only if every entry in the batch was accepted.
        success: bool,
        /// Human-readable detail, e.g. the first rejection reason.
        message: String,
    },
    /// Reply to anything malformed, unsupported, or out of protocol
    /// sequence.
    #[serde(rename = "error")]
    Error {
        /// Human-readable error tag, e.g. `"unsupported protocol
        /// version"`, `"handshake required"`, `"unknown message
        /// type"`.
        error: String,
    },
}

impl ServerMessage {
    /// Shorthand for building an `error` envelope.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            error: message.into(),
        }
    }
}
