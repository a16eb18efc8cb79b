//! Error types for the RPC server and client.

use imstore_core::CoreError;
use imstore_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the RPC server or client.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request contents.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Storage engine error.
    #[error("storage error: {0}")]
    Storage(#[from] CoreError),

    /// The peer replied with an error.
    #[error("remote error: {message}")]
    Remote {
        /// Error text from the server.
        message: String,
        /// Whether the server marked it retryable.
        retryable: bool,
    },

    /// The call did not finish in time.
    #[error("request timed out")]
    Timeout,

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true if the caller sent something wrong.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ServerError::InvalidRequest(_) | ServerError::Protocol(_))
    }

    /// Returns true if the server failed.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            ServerError::Storage(_) | ServerError::Internal(_) | ServerError::Io(_)
        )
    }

    /// Returns true if repeating the call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServerError::Timeout | ServerError::Io(_) => true,
            ServerError::Remote { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for ServerError {
    fn from(err: tokio::task::JoinError) -> Self {
        ServerError::Internal(err.to_string())
    }
}
