//! JSON codec for SignalR hub protocol messages.
//!
//! Provides framing (`decode`/`encode`) between raw transport payloads and
//! [`Message`] values, per the SignalR JSON hub protocol: each record is a
//! JSON object with an integer `type` discriminant, terminated by the ASCII
//! record separator 0x1E. Several records may arrive concatenated in one
//! transport delivery.

use serde_json::Value;
use tracing::warn;

use crate::protocol::message::{
    CancelInvocation, Close, Completion, Invocation, Message, StreamInvocation, StreamItem,
};

/// Protocol name advertised during the handshake.
pub const PROTOCOL_NAME: &str = "json";
/// Protocol version advertised during the handshake.
pub const PROTOCOL_VERSION: u32 = 1;
/// Transfer format advertised during the handshake.
pub const TRANSFER_FORMAT: &str = "Text";
/// Record separator terminating every JSON record on the wire.
pub const RECORD_SEPARATOR: u8 = 0x1E;

/// Errors that can occur while decoding or encoding protocol records.
///
/// Every variant is fatal to the session: a payload that fails here indicates
/// wire drift or an unsupported protocol feature, never something safe to
/// skip. (The original protocol reserves a "binding failure" sentinel that no
/// conforming server emits; it surfaces as [`ProtocolError::UnknownMessageType`].)
#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    /// The transport payload is not valid UTF-8 text.
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// A record is not a well-formed JSON object of the expected shape.
    #[error("malformed JSON record: {0}")]
    Json(#[from] serde_json::Error),

    /// A record carries no integer `type` discriminant.
    #[error("record has no message type discriminant")]
    MissingType,

    /// The `type` discriminant is not one of the seven known codes.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u64),
}

/// Static description of this codec, consumed by the handshake collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolDescription {
    pub name: &'static str,
    pub version: u32,
    pub transfer_format: &'static str,
    pub record_separator: u8,
}

/// Codec for the SignalR JSON hub protocol.
///
/// Stateless; provides static methods to convert between [`Message`] and
/// separator-terminated JSON records.
pub struct JsonCodec;

impl JsonCodec {
    /// Returns the protocol parameters advertised during the handshake.
    pub const fn describe() -> ProtocolDescription {
        ProtocolDescription {
            name: PROTOCOL_NAME,
            version: PROTOCOL_VERSION,
            transfer_format: TRANSFER_FORMAT,
            record_separator: RECORD_SEPARATOR,
        }
    }

    /// Decodes one transport delivery into the messages it contains.
    ///
    /// The payload is split on the record separator; empty fragments are
    /// discarded. A trailing fragment without its terminator is never decoded
    /// as a complete record: it is logged and dropped, since records do not
    /// span transport deliveries.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not UTF-8 or if any complete record
    /// is malformed JSON or carries an unknown `type` code.
    pub fn decode(raw: &[u8]) -> Result<Vec<Message>, ProtocolError> {
        let text = std::str::from_utf8(raw)?;

        let mut records: Vec<&str> = text.split(RECORD_SEPARATOR as char).collect();
        // The fragment after the last separator is either "" (well-formed
        // input) or an unterminated partial record.
        if let Some(tail) = records.pop() {
            if !tail.is_empty() {
                warn!(len = tail.len(), "discarding unterminated record fragment");
            }
        }

        let mut messages = Vec::with_capacity(records.len());
        for record in records {
            if record.is_empty() {
                continue;
            }
            messages.push(Self::parse_record(record)?);
        }
        Ok(messages)
    }

    /// Encodes a single message into one terminated JSON record.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(message: &Message) -> Result<Vec<u8>, ProtocolError> {
        let mut value = match message {
            Message::Invocation(m) => serde_json::to_value(m)?,
            Message::StreamItem(m) => serde_json::to_value(m)?,
            Message::Completion(m) => serde_json::to_value(m)?,
            Message::StreamInvocation(m) => serde_json::to_value(m)?,
            Message::CancelInvocation(m) => serde_json::to_value(m)?,
            Message::Ping => Value::Object(serde_json::Map::new()),
            Message::Close(m) => serde_json::to_value(m)?,
        };
        if let Value::Object(obj) = &mut value {
            obj.insert("type".to_string(), Value::from(message.kind()));
        }

        let mut bytes = serde_json::to_vec(&value)?;
        bytes.push(RECORD_SEPARATOR);
        Ok(bytes)
    }

    fn parse_record(record: &str) -> Result<Message, ProtocolError> {
        let value: Value = serde_json::from_str(record)?;
        let kind = value
            .get("type")
            .and_then(Value::as_u64)
            .ok_or(ProtocolError::MissingType)?;

        // serde ignores the extra `type` key when filling the payload struct.
        let message = match kind {
            1 => Message::Invocation(serde_json::from_value::<Invocation>(value)?),
            2 => Message::StreamItem(serde_json::from_value::<StreamItem>(value)?),
            3 => Message::Completion(serde_json::from_value::<Completion>(value)?),
            4 => Message::StreamInvocation(serde_json::from_value::<StreamInvocation>(value)?),
            5 => Message::CancelInvocation(serde_json::from_value::<CancelInvocation>(value)?),
            6 => Message::Ping,
            7 => Message::Close(serde_json::from_value::<Close>(value)?),
            other => return Err(ProtocolError::UnknownMessageType(other)),
        };
        Ok(message)
    }
}
