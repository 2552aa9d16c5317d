use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<VaultError> for greenpass_core::GreenpassError {
    fn from(e: VaultError) -> Self {
        greenpass_core::GreenpassError::Storage(e.to_string())
    }
}

impl From<greenpass_core::GreenpassError> for VaultError {
    fn from(e: greenpass_core::GreenpassError) -> Self {
        VaultError::Storage(e.to_string())
    }
}

pub type VaultResult<T> = Result<T, VaultError>;
