use greenpass_core::TransportError;
use thiserror::Error;

/// Errors from local credential operations.
/// Display strings never carry key or secret material.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("invalid commitment: {0}")]
    InvalidCommitment(String),

    #[error("internal error")]
    InternalError,
}

pub type CredResult<T> = Result<T, CredError>;

/// Failure of one issuance exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IssuanceError {
    /// The issuer answered, but with something the holder cannot use.
    #[error("issuance protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<CredError> for IssuanceError {
    fn from(err: CredError) -> Self {
        IssuanceError::Protocol(err.to_string())
    }
}
