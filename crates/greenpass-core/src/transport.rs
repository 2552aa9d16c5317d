use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application error body attached to a failed remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerErrorBody {
    pub status: String,
    pub code: i32,
}

/// Classified failure of a remote fetch. Callers turn these into outcome
/// values; they are never retried at this layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connectivity failure: timeout, DNS, refused connection.
    #[error("network error: {0}")]
    Network(String),

    /// Error status without a parseable application error body.
    #[error("http error {0}")]
    Http(u16),

    #[error("server error {code} ({})", .body.code)]
    Server { code: u16, body: ServerErrorBody },
}

impl TransportError {
    /// HTTP status of the failed call, `None` for connectivity failures.
    pub fn http_code(&self) -> Option<u16> {
        match self {
            TransportError::Network(_) => None,
            TransportError::Http(code) | TransportError::Server { code, .. } => Some(*code),
        }
    }

    pub fn body(&self) -> Option<&ServerErrorBody> {
        match self {
            TransportError::Server { body, .. } => Some(body),
            _ => None,
        }
    }
}
