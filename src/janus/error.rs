//! Janus signaling error types

use thiserror::Error;

use super::message::Transaction;
use crate::config::ConfigError;
use crate::network::NetworkError;

/// Reasons a publish attempt fails
#[derive(Error, Debug)]
pub enum JanusError {
    #[error("Invalid publish configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Failed to connect to {url}: {source}")]
    ConnectFailed {
        url: String,
        #[source]
        source: NetworkError,
    },

    #[error("Connection to gateway closed: {0}")]
    ConnectionClosed(String),

    #[error("Failed to send {transaction} request: {source}")]
    SendFailed {
        transaction: Transaction,
        #[source]
        source: NetworkError,
    },

    #[error("{transaction} request failed: {reason}")]
    Gateway {
        transaction: Transaction,
        reason: String,
    },

    #[error("{0} request timed out")]
    Timeout(&'static str),

    #[error("session timed out")]
    SessionExpired,
}
