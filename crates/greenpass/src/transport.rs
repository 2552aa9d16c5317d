//! Remote collaborators the holder talks to, and their wire models.
//!
//! HTTP and JSON plumbing live behind these traits. Implementations return
//! the raw signed bytes together with the parsed model, and classify every
//! failure as a [`TransportError`].

use serde::{Deserialize, Serialize};

use greenpass_core::types::base64_bytes;
use greenpass_core::{ClKey, EventType, IssuerConfig, Provider, Timestamp, TransportError};

/// Raw signed bytes alongside the model parsed from them. The raw bytes are
/// what gets retained for re-issuance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedResponse<T> {
    pub raw: Vec<u8>,
    pub model: T,
}

// ---------------------------------------------------------------------------
// Test providers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteTestStatus {
    Complete,
    Pending,
    VerificationRequired,
    InvalidToken,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTestEvent {
    pub unique: String,
    pub sample_date: Timestamp,
    pub negative_result: bool,
    #[serde(default)]
    pub test_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTestResult {
    pub status: RemoteTestStatus,
    #[serde(default)]
    pub result: Option<RemoteTestEvent>,
    #[serde(default)]
    pub protocol_version: String,
}

pub trait TestProviderClient: Send + Sync {
    /// Fetch the result behind `token` from the provider's result URL.
    fn fetch_test_result(
        &self,
        provider: &Provider,
        token: &str,
        verification_code: Option<&str>,
    ) -> Result<SignedResponse<RemoteTestResult>, TransportError>;
}

// ---------------------------------------------------------------------------
// Event providers
// ---------------------------------------------------------------------------

/// One signed bundle of events as returned by an event provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEventGroup {
    pub provider_identifier: String,
    pub event_type: EventType,
    pub max_issued_at: Timestamp,
    #[serde(with = "base64_bytes")]
    pub signed_payload: Vec<u8>,
}

pub trait EventProviderClient: Send + Sync {
    /// Fetch the events for every pending token or session.
    fn fetch_events(&self, config: &IssuerConfig) -> Result<Vec<RemoteEventGroup>, TransportError>;
}

// ---------------------------------------------------------------------------
// Issuer configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub public_keys: Vec<ClKey>,
    pub providers: Vec<Provider>,
    /// Server clock at the time of the response.
    pub server_time: Timestamp,
}

pub trait ConfigSource: Send + Sync {
    fn fetch_config(&self) -> Result<RemoteConfig, TransportError>;
}
