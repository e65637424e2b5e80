//! SignalR hub protocol messages.
//!
//! This module defines the core [`Message`] enum that represents all possible
//! message types in the ASP.NET Core SignalR hub protocol (v1), as carried by
//! the JSON text encoding.
//!
//! For details, see the [official specification](https://github.com/dotnet/aspnetcore/blob/main/src/SignalR/docs/specs/HubProtocol.md).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A hub protocol message.
///
/// Each variant corresponds to one of the seven message types of the protocol
/// and carries its payload as a named struct, so dispatch sites can hand the
/// payload to callbacks by value. Dispatch over this enum is exhaustive: a new
/// message kind cannot be added without touching every match site.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A method call. Server → client for event broadcasts, client → server
    /// for `send`/`invoke`.
    Invocation(Invocation),

    /// Client → server request to start a server stream.
    StreamInvocation(StreamInvocation),

    /// One element of an active stream.
    StreamItem(StreamItem),

    /// Terminal response to an invocation or stream.
    Completion(Completion),

    /// Server → client abort of an active stream.
    CancelInvocation(CancelInvocation),

    /// Keep-alive signal. No payload, no response required.
    Ping,

    /// Graceful termination of the session.
    Close(Close),
}

impl Message {
    /// The integer discriminant this message carries on the wire.
    pub fn kind(&self) -> u8 {
        match self {
            Message::Invocation(_) => 1,
            Message::StreamItem(_) => 2,
            Message::Completion(_) => 3,
            Message::StreamInvocation(_) => 4,
            Message::CancelInvocation(_) => 5,
            Message::Ping => 6,
            Message::Close(_) => 7,
        }
    }
}

/// A method call identified by target name and argument list.
///
/// `invocation_id` is `None` for fire-and-forget calls: no completion will be
/// correlated back to the caller.
///
/// Example (wire): `{"type":1,"invocationId":"...","target":"Send","arguments":["hi"]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    pub target: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

/// Client → server request to open a stream for `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInvocation {
    pub invocation_id: String,
    pub target: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

/// One element of the stream identified by `invocation_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamItem {
    pub invocation_id: String,
    pub item: Value,
}

/// Terminal response to an invocation.
///
/// At most one of `result` / `error` is set. A completion with `error` is a
/// server-reported application failure, not a protocol failure.
///
/// Example (success): `{"type":3,"invocationId":"123","result":"ok"}`
/// Example (error):   `{"type":3,"invocationId":"123","error":"boom"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub invocation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Server → client abort of the stream identified by `invocation_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelInvocation {
    pub invocation_id: String,
}

/// Termination signal. With `error` set this reports a fatal server-side
/// condition; without it the session ends normally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Close {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
