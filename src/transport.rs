//! Boundary types for the external transport.
//!
//! The transport (WebSocket lifecycle, TLS, keep-alive, handshake) lives
//! outside this crate. It interacts with the session through two channels:
//! it drains encoded frames from the outbound sender handed to it, and feeds
//! [`TransportEvent`]s into the inbound receiver the session runs on.

use tokio::sync::mpsc;

/// Notifications delivered by the transport to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The connection is established and the handshake has completed.
    Opened,
    /// One raw delivery; may contain several terminated records.
    Payload(Vec<u8>),
    /// The connection was torn down.
    Closed,
}

/// Sending half the transport drains: encoded, separator-terminated frames.
pub type OutboundSender = mpsc::Sender<Vec<u8>>;
/// Receiving half the session drives in [`run`](crate::HubSession::run).
pub type InboundReceiver = mpsc::Receiver<TransportEvent>;
