use thiserror::Error;

#[derive(Debug, Error)]
pub enum GreenpassError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for GreenpassError {
    fn from(e: serde_json::Error) -> Self {
        GreenpassError::Serialization(e.to_string())
    }
}

pub type GreenpassResult<T> = Result<T, GreenpassError>;
