//! Line framing: one UTF-8 JSON object per message, terminated by `\n`.

use crate::message::{ClientMessage, ServerMessage};
use serde::Serialize;

/// Errors raised while encoding or decoding a protocol message.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The line was not valid JSON, or didn't match any known message
    /// shape.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Serializes `message` and appends the line terminator.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, CodecError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Parses one line (with or without its trailing newline) as a
/// [`ClientMessage`].
pub fn decode_client_message(line: &str) -> Result<ClientMessage, CodecError> {
    Ok(serde_json::from_str(line.trim_end())?)
}

/// Parses one line (with or without its trailing newline) as a
/// [`ServerMessage`].
pub fn decode_server_message(line: &str) -> Result<ServerMessage, CodecError> {
    Ok(serde_json::from_str(line.trim_end())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::PROTOCOL_VERSION;

    #[test]
    fn encode_then_decode_client_message_is_identity() {
        let msg = ClientMessage::Handshake {
            version: PROTOCOL_VERSION.to_string(),
            client: "test".to_string(),
        };
        let line = encode_line(&msg).unwrap();
        assert!(line.ends_with('\n'));
        let decoded = decode_client_message(&line).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn malformed_json_is_rejected() {
        let result = decode_client_message("not json\n");
        assert!(result.is_err());
    }
}
