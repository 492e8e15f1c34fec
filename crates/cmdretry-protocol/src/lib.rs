//! Wire types for the coordinator's line-delimited JSON protocol (spec
//! §4.E/§6). The transport (module E) and client (module G) both depend
//! on this crate rather than encoding/decoding ad hoc.

mod codec;
mod message;

pub use codec::{decode_client_message, decode_server_message, encode_line, CodecError};
pub use message::{ClientMessage, RegisterEntry, ServerMessage, PROTOCOL_VERSION};

pub use cmdretry_metrics::RunMetrics;
