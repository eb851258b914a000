//! Janus module for VideoRoom publishing
//!
//! Implements the publisher side of the Janus WebSocket API: the session
//! handshake, keepalives and the offer/answer exchange with the media driver.

mod error;
mod event;
mod keepalive;
mod message;
mod publisher;
mod session;
mod state;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::JanusError;
pub use event::PublisherEvent;
pub use keepalive::KeepaliveSupervisor;
pub use message::{
    GatewayError, JanusEvent, MessageBody, PluginData, Request, Response, Transaction,
    TrickleCandidate, VIDEOROOM_PLUGIN,
};
pub use publisher::Publisher;
pub use session::JanusSession;
pub use state::{PublishState, SessionIds, SessionState};
