//! Redemption of a test provider's unique code.
//!
//! The code is checked locally (shape, provider, checksum) before any network
//! call. A complete, valid negative result is turned into cards through the
//! issuance protocol before `redeem` returns, so the caller receives either
//! issued cards or the reason issuance failed.

use std::sync::Arc;

use greenpass_core::{
    EventGroup, EventType, GreenCardStore, IssuedGreenCard, ServerErrorBody, Timestamp,
    TransportError,
};
use greenpass_cred::{IssuanceError, IssuanceProtocol, TokenValidator};
use greenpass_vault::SecretKeyStore;
use tracing::{debug, info, warn};

use crate::clock::ClockDeviationDetector;
use crate::issuer_config::IssuerConfigStore;
use crate::transport::{RemoteTestEvent, RemoteTestStatus, TestProviderClient};
use crate::HolderState;

/// Outcome of a redemption. Every variant is a value the caller must handle;
/// nothing here is thrown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestResult {
    NegativeTestResult {
        result: RemoteTestEvent,
        cards: Vec<IssuedGreenCard>,
    },
    NoNegativeTestResult,
    Pending,
    VerificationRequired,
    InvalidToken,
    NetworkError,
    ServerError {
        http_code: u16,
        error: Option<ServerErrorBody>,
    },
    /// Issuance or local persistence failed after a valid negative result.
    IssuanceFailed(String),
}

impl From<TransportError> for TestResult {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Network(_) => TestResult::NetworkError,
            TransportError::Http(code) => TestResult::ServerError {
                http_code: code,
                error: None,
            },
            TransportError::Server { code, body } => TestResult::ServerError {
                http_code: code,
                error: Some(body),
            },
        }
    }
}

impl From<IssuanceError> for TestResult {
    fn from(err: IssuanceError) -> Self {
        match err {
            IssuanceError::Protocol(msg) => TestResult::IssuanceFailed(msg),
            IssuanceError::Transport(t) => t.into(),
        }
    }
}

/// `provider-token-checksum`, all three parts non-empty.
struct UniqueCode<'a> {
    provider: &'a str,
    token: &'a str,
    checksum: &'a str,
}

impl<'a> UniqueCode<'a> {
    fn parse(code: &'a str) -> Option<Self> {
        let parts: Vec<&str> = code.trim().split('-').collect();
        match parts[..] {
            [provider, token, checksum]
                if !provider.is_empty() && !token.is_empty() && !checksum.is_empty() =>
            {
                Some(Self {
                    provider,
                    token,
                    checksum,
                })
            }
            _ => None,
        }
    }
}

pub struct TestResultRedeemer {
    issuer_config: Arc<IssuerConfigStore>,
    clock: Arc<ClockDeviationDetector>,
    secret_keys: Arc<SecretKeyStore>,
    store: Arc<dyn GreenCardStore>,
    test_provider: Arc<dyn TestProviderClient>,
    validator: Arc<dyn TokenValidator>,
    issuance: Arc<IssuanceProtocol>,
    test_validity_hours: u64,
}

impl TestResultRedeemer {
    pub fn new(
        state: &HolderState,
        test_provider: Arc<dyn TestProviderClient>,
        validator: Arc<dyn TokenValidator>,
        issuance: Arc<IssuanceProtocol>,
    ) -> Self {
        Self {
            issuer_config: state.issuer_config.clone(),
            clock: state.clock.clone(),
            secret_keys: state.secret_keys.clone(),
            store: state.store.clone(),
            test_provider,
            validator,
            issuance,
            test_validity_hours: state.config.issuer.test_validity_hours,
        }
    }

    pub fn redeem(&self, unique_code: &str, verification_code: Option<&str>) -> TestResult {
        let now = self.clock.validity_now(Timestamp::now());
        self.redeem_at(unique_code, verification_code, now)
    }

    pub fn redeem_at(
        &self,
        unique_code: &str,
        verification_code: Option<&str>,
        now: Timestamp,
    ) -> TestResult {
        let Some(code) = UniqueCode::parse(unique_code) else {
            debug!("unique code is malformed");
            return TestResult::InvalidToken;
        };
        let Some(provider) = self.issuer_config.provider(code.provider) else {
            debug!(provider = code.provider, "unknown test provider");
            return TestResult::InvalidToken;
        };
        if !self.validator.validate(code.token, code.checksum) {
            debug!(provider = code.provider, "token checksum rejected");
            return TestResult::InvalidToken;
        }

        let fetched = self
            .test_provider
            .fetch_test_result(&provider, code.token, verification_code);
        let response = match fetched {
            Ok(response) => response,
            Err(e) => {
                warn!(provider = code.provider, error = %e, "test result fetch failed");
                return e.into();
            }
        };

        match response.model.status {
            RemoteTestStatus::Complete => match response.model.result {
                Some(event) if event.negative_result && self.is_within_validity(&event, now) => {
                    self.issue_negative_test(code.provider, event, response.raw)
                }
                _ => TestResult::NoNegativeTestResult,
            },
            RemoteTestStatus::Pending => TestResult::Pending,
            RemoteTestStatus::VerificationRequired => TestResult::VerificationRequired,
            RemoteTestStatus::InvalidToken | RemoteTestStatus::Unknown => TestResult::InvalidToken,
        }
    }

    /// Sample taken at most `test_validity_hours` ago and not in the future
    /// beyond the clock tolerance.
    fn is_within_validity(&self, event: &RemoteTestEvent, now: Timestamp) -> bool {
        let expires = event.sample_date.plus_hours(self.test_validity_hours as i64);
        let latest_sample = now.plus_seconds(self.clock.tolerance_seconds() as i64);
        now < expires && event.sample_date <= latest_sample
    }

    fn issue_negative_test(
        &self,
        provider: &str,
        event: RemoteTestEvent,
        signed_payload: Vec<u8>,
    ) -> TestResult {
        let Some(config) = self.issuer_config.current() else {
            return TestResult::IssuanceFailed("no issuer configuration".into());
        };
        let secret = match self.secret_keys.get_or_create() {
            Ok(secret) => secret,
            Err(e) => return TestResult::IssuanceFailed(e.to_string()),
        };

        let group = EventGroup::new(
            provider,
            EventType::NegativeTest,
            event.sample_date,
            signed_payload,
        );
        let issued = match self.issuance.issue(secret.as_bytes(), &config, &group) {
            Ok(issued) => issued,
            Err(e) => {
                warn!(provider, error = %e, "issuance after negative test failed");
                return e.into();
            }
        };
        if let Some(server_time) = issued.server_time {
            self.clock.observe(server_time, Timestamp::now());
        }

        let cards = issued.cards;
        if let Err(e) = self.store.save_issued_group(&group, &cards) {
            return TestResult::IssuanceFailed(e.to_string());
        }

        info!(
            provider,
            event_group = %group.id,
            cards = cards.len(),
            "negative test redeemed"
        );
        TestResult::NegativeTestResult {
            result: event,
            cards,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unique_code() {
        let code = UniqueCode::parse("XXX-YYYYYYYYYYYY-Z2").unwrap();
        assert_eq!(code.provider, "XXX");
        assert_eq!(code.token, "YYYYYYYYYYYY");
        assert_eq!(code.checksum, "Z2");
    }

    #[test]
    fn test_parse_rejects_wrong_segment_counts() {
        for code in ["", "dummy", "dummy-dummy", "a-b-c-d", "a-b-c-"] {
            assert!(UniqueCode::parse(code).is_none(), "{:?}", code);
        }
    }

    #[test]
    fn test_parse_rejects_empty_segments() {
        for code in ["-b-c", "a--c", "a-b-", "--"] {
            assert!(UniqueCode::parse(code).is_none(), "{:?}", code);
        }
    }

    #[test]
    fn test_transport_errors_classified() {
        assert_eq!(
            TestResult::from(TransportError::Network("dns".into())),
            TestResult::NetworkError
        );
        assert_eq!(
            TestResult::from(TransportError::Http(429)),
            TestResult::ServerError {
                http_code: 429,
                error: None
            }
        );
        let body = ServerErrorBody {
            status: "error".into(),
            code: 99_702,
        };
        assert_eq!(
            TestResult::from(TransportError::Server {
                code: 400,
                body: body.clone()
            }),
            TestResult::ServerError {
                http_code: 400,
                error: Some(body)
            }
        );
    }

    #[test]
    fn test_issuance_protocol_error_classified() {
        assert_eq!(
            TestResult::from(IssuanceError::Protocol("bad response".into())),
            TestResult::IssuanceFailed("bad response".into())
        );
        assert_eq!(
            TestResult::from(IssuanceError::Transport(TransportError::Network(
                "reset".into()
            ))),
            TestResult::NetworkError
        );
    }
}
