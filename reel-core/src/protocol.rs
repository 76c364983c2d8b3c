//! Encoder wire protocol
//!
//! One persistent TCP connection per encoder, carrying newline-delimited
//! JSON objects with a `type` discriminator in both directions. Unknown
//! message types decode to `Unknown` so old orchestrators tolerate newer
//! encoders (and vice versa): the receiver logs and ignores them.
//!
//! Connection identity exists only after a valid `register`; anything else
//! as a first message gets the socket dropped.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::encoding::EncodingAssignment;

/// Messages sent by an encoder to the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EncoderMessage {
    /// Handshake; must be the first message on a connection.
    Register { encoder_id: String, capacity: usize },
    Heartbeat,
    JobProgress { job_id: Uuid, percent: f32 },
    JobCompleted {
        job_id: Uuid,
        output_path: String,
        output_size: u64,
    },
    JobFailed { job_id: Uuid, error: String },
    /// Forward-compatibility catch-all; logged and ignored.
    #[serde(other)]
    Unknown,
}

/// Messages sent by the orchestrator to an encoder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RegisterAck { encoder_id: String },
    JobAssign { assignment: EncodingAssignment },
    JobCancel { job_id: Uuid, reason: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Encode a message as one protocol line (newline included).
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Decode one protocol line.
pub fn decode_line<'a, T: Deserialize<'a>>(line: &'a str) -> Result<T, ProtocolError> {
    Ok(serde_json::from_str(line.trim_end())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_wire_shape() {
        let msg = EncoderMessage::Register {
            encoder_id: "enc-1".to_string(),
            capacity: 2,
        };
        let line = encode_line(&msg).unwrap();
        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["type"], "register");
        assert_eq!(value["capacity"], 2);
    }

    #[test]
    fn test_unknown_type_tolerated() {
        let msg: EncoderMessage =
            decode_line(r#"{"type":"telemetry_v2","cpu":0.4}"#).unwrap();
        assert!(matches!(msg, EncoderMessage::Unknown));

        let msg: ServerMessage = decode_line(r#"{"type":"drain","grace_secs":30}"#).unwrap();
        assert!(matches!(msg, ServerMessage::Unknown));
    }

    #[test]
    fn test_malformed_line_is_an_error() {
        assert!(decode_line::<EncoderMessage>("not json").is_err());
    }

    #[test]
    fn test_job_failed_round() {
        let id = Uuid::new_v4();
        let line = encode_line(&EncoderMessage::JobFailed {
            job_id: id,
            error: "ffmpeg exited with 1".to_string(),
        })
        .unwrap();
        match decode_line::<EncoderMessage>(&line).unwrap() {
            EncoderMessage::JobFailed { job_id, error } => {
                assert_eq!(job_id, id);
                assert!(error.contains("ffmpeg"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
