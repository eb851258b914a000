//! Network error types

use thiserror::Error;

/// Errors that can occur in the signaling transport
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
