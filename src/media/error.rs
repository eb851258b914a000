//! Media error types

use thiserror::Error;

/// Errors reported by media drivers and feed adapters
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Media sender not created")]
    NoSender,

    #[error("Invalid session description: {0}")]
    InvalidDescription(String),

    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Bitrate update rejected: {0}")]
    Bitrate(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
