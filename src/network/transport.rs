//! Signaling transport abstraction
//!
//! The Janus driver talks to the gateway through a text channel. Completion of
//! `connect` and everything the peer sends arrive later as [`TransportEvent`]s.

use tokio::sync::mpsc;

use super::error::NetworkError;

/// Notifications delivered by a signaling transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is open and `send` will reach the peer
    Connected,
    /// The connection failed to open or was closed by the peer
    Closed { reason: String },
    /// A text message arrived
    Message(String),
}

/// Sending half used by transports to report events
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// A bidirectional text-message channel to the gateway
///
/// Implementations must not block: `send` queues the message and returns.
pub trait SignalingTransport: Send + Sync {
    /// Start connecting to `url`. Completion is reported as
    /// [`TransportEvent::Connected`] or [`TransportEvent::Closed`].
    fn connect(&self, url: &str) -> Result<(), NetworkError>;

    /// Queue a text message for delivery
    fn send(&self, text: String) -> Result<(), NetworkError>;

    /// Close the connection after queued messages are flushed.
    ///
    /// No further events are reported for a connection closed locally.
    fn close(&self);

    /// Whether the connection is currently open
    fn is_connected(&self) -> bool;
}
