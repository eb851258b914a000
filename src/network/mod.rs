//! Network module for gateway signaling
//!
//! Provides the transport abstraction the Janus driver sends through and a
//! WebSocket implementation of it.

mod error;
mod transport;
mod websocket;

pub use error::NetworkError;
pub use transport::{SignalingTransport, TransportEvent, TransportEventSender};
pub use websocket::{WebSocketTransport, JANUS_SUBPROTOCOL};
