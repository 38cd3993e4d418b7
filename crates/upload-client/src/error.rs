//! Client error types.

use stowage_protocol::is_transient_code;
use stowage_transfer::TransferError;
use tokio_tungstenite::tungstenite;

/// Errors produced by the session client and the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    /// The server answered with an error body.
    #[error("server error {code} ({kind}): {message}")]
    Server {
        code: i32,
        kind: String,
        message: String,
    },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("unknown task {0}")]
    UnknownTask(String),

    #[error("task {id} cannot {action} while {status}")]
    InvalidState {
        id: String,
        action: &'static str,
        status: String,
    },

    #[error("cancelled")]
    Cancelled,
}

impl ClientError {
    /// Whether retrying the same request may succeed.
    ///
    /// Connection failures, timeouts and 5xx server errors (other than
    /// "not implemented") are transient. Validation and state errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Closed | Self::WebSocket(_) => true,
            Self::Server { code, .. } => is_transient_code(*code),
            _ => false,
        }
    }
}
