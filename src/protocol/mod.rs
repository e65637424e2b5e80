//! SignalR hub protocol implementation.
//!
//! This module provides the message model and the JSON text codec for the
//! hub protocol, including the 0x1E record framing.

mod codec;
mod message;

pub use codec::{
    JsonCodec, ProtocolDescription, ProtocolError, PROTOCOL_NAME, PROTOCOL_VERSION,
    RECORD_SEPARATOR, TRANSFER_FORMAT,
};
pub use message::{
    CancelInvocation, Close, Completion, Invocation, Message, StreamInvocation, StreamItem,
};
