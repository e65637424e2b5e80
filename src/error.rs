use thiserror::Error;

/// Errors that can terminate a hub session.
#[derive(Error, Debug)]
pub enum HubError {
    /// A transport payload could not be decoded into protocol messages.
    #[error("protocol error: {0}")]
    Protocol(#[from] crate::protocol::ProtocolError),

    /// The server reported an application error (`Completion.error` or
    /// `Close.error`) and no error callback was registered to absorb it.
    #[error("server reported error: {0}")]
    Server(String),

    /// The transport stopped accepting outbound frames.
    #[error("transport channel closed")]
    TransportClosed,

    /// `run()` was called on a session that is already being driven.
    #[error("session is already running")]
    AlreadyRunning,
}
