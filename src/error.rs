//! Error taxonomy for the event-transport client.
//!
//! Transport errors (network failures, non-2xx responses) are always caught
//! at the lowest layer and converted into failure responses or reconnection;
//! they never escape the connector's public methods. Protocol errors are
//! carried in response bodies, not in this enum.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Transport(format!("Request timeout: {}", err))
        } else if err.is_connect() {
            ClientError::Transport(format!("Connection failed: {}", err))
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
