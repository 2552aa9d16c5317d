use thiserror::Error;

/// Error type for the greenpass orchestration layer, aggregating errors from
/// the dependency crates.
///
/// Protocol outcomes (`TestResult`, `DatabaseSyncerResult`) are values, not
/// errors. This type covers local failures: configuration, files, storage.
#[derive(Debug, Error)]
pub enum RootError {
    #[error("core error: {0}")]
    Core(#[from] greenpass_core::GreenpassError),

    #[error("vault error: {0}")]
    Vault(#[from] greenpass_vault::VaultError),

    #[error("credential error: {0}")]
    Credential(#[from] greenpass_cred::CredError),

    #[error("transport error: {0}")]
    Transport(#[from] greenpass_core::TransportError),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RootError {
    fn from(e: serde_json::Error) -> Self {
        RootError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for RootError {
    fn from(e: toml::de::Error) -> Self {
        RootError::Config(format!("TOML parse error: {}", e))
    }
}

pub type RootResult<T> = Result<T, RootError>;
