//! Client-side session core for the ASP.NET Core SignalR hub protocol.
//!
//! This crate implements the JSON text framing of the hub protocol and the
//! session state machine on top of it: correlating invocations with their
//! completions by id, routing server-initiated calls to registered handlers,
//! and managing server-to-client and client-to-server streams.
//!
//! The transport (WebSocket lifecycle, TLS, keep-alive, handshake) lives
//! outside this crate and talks to the session through a pair of channels;
//! see [`transport`].
//!
//! # Quick start
//!
//! ```rust
//! use signalr_session::{HubSession, TransportEvent};
//! use tokio::sync::mpsc;
//!
//! // The transport drains `out_rx` and feeds `in_tx`.
//! let (out_tx, _out_rx) = mpsc::channel(64);
//! let (_in_tx, in_rx) = mpsc::channel::<TransportEvent>(64);
//!
//! let session = HubSession::new(out_tx, in_rx);
//! // session.on("ReceiveMessage", ...), session.run() ...
//! ```

pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

pub use error::HubError;
pub use protocol::{JsonCodec, Message, ProtocolError};
pub use session::{ClientStream, HubSession, StreamHandle};
pub use transport::TransportEvent;
