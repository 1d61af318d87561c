//! Line codec: one JSON object per line, newline-terminated, UTF-8
//!
//! The codec is stateless and thread-safe. Both error kinds are non-fatal
//! for a session: the offending frame is logged and skipped, and the read
//! loop keeps scanning from the next newline.

use std::fmt;

use super::messages::Message;

/// Maximum size of a single frame (the serialized line, without the newline)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Frame-level decode failures
#[derive(Debug)]
pub enum DecodeError {
    /// The line was not a well-formed JSON message
    Malformed(serde_json::Error),
    /// The line exceeded [`MAX_FRAME_SIZE`]
    Oversize(usize),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed(err) => write!(f, "malformed frame: {}", err),
            DecodeError::Oversize(len) => {
                write!(f, "frame of {} bytes exceeds {} byte limit", len, MAX_FRAME_SIZE)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Serialize a message to a newline-terminated JSON line.
///
/// Only a message whose encoded form would exceed the frame limit fails;
/// the message types themselves always serialize.
pub fn encode(msg: &Message) -> Result<Vec<u8>, DecodeError> {
    let mut line = serde_json::to_vec(msg).map_err(DecodeError::Malformed)?;
    if line.len() > MAX_FRAME_SIZE {
        return Err(DecodeError::Oversize(line.len()));
    }
    line.push(b'\n');
    Ok(line)
}

/// Parse one line (without its newline) into a message.
pub fn decode(line: &str) -> Result<Message, DecodeError> {
    if line.len() > MAX_FRAME_SIZE {
        return Err(DecodeError::Oversize(line.len()));
    }
    serde_json::from_str(line).map_err(DecodeError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{MessageType, UserStatus};

    #[test]
    fn encode_appends_newline() {
        let msg = Message::broadcast("alice", "hello");
        let bytes = encode(&msg).unwrap();
        assert_eq!(*bytes.last().unwrap(), b'\n');
        // One frame per line: the payload itself must not contain a newline
        assert!(!bytes[..bytes.len() - 1].contains(&b'\n'));
    }

    #[test]
    fn encode_decode_round_trip() {
        let original = Message {
            recipient: "bob".to_string(),
            file_id: "f1".to_string(),
            filename: "a.bin".to_string(),
            filesize: 16384,
            total_chunks: 2,
            ..Message::new(MessageType::File)
        };

        let bytes = encode(&original).unwrap();
        let line = std::str::from_utf8(&bytes[..bytes.len() - 1]).unwrap();
        let decoded = decode(line).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn decode_ignores_unknown_fields() {
        let msg = decode(r#"{"type":"TEXT","content":"hi","x_custom":42}"#).unwrap();
        assert_eq!(msg.kind, MessageType::Text);
        assert_eq!(msg.content, "hi");
    }

    #[test]
    fn decode_rejects_malformed_json() {
        assert!(matches!(
            decode("{not json"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode(r#"{"type":"NO_SUCH_TYPE"}"#),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn decode_rejects_oversize_line() {
        let line = format!(
            r#"{{"type":"TEXT","content":"{}"}}"#,
            "x".repeat(MAX_FRAME_SIZE)
        );
        assert!(matches!(decode(&line), Err(DecodeError::Oversize(_))));
    }

    #[test]
    fn status_round_trip() {
        let msg = Message {
            sender: "carol".to_string(),
            status: Some(UserStatus::Invisible),
            ..Message::new(MessageType::Status)
        };
        let bytes = encode(&msg).unwrap();
        let line = std::str::from_utf8(&bytes[..bytes.len() - 1]).unwrap();
        assert_eq!(decode(line).unwrap(), msg);
    }
}
