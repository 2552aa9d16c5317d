//! Commitment-based issuance of GreenCards for one event group.
//!
//! The exchange has three messages:
//! 1. `prepare_issue` returns a session token and a fresh nonce.
//! 2. The holder commits to its secret key and the event group's attributes
//!    against the nonce and sends the commitment with the signed events.
//! 3. The issuer answers with the remote green cards. Domestic credentials
//!    arrive blinded, each signed over the card's origin types and its own
//!    window, and are completed locally; EU credentials arrive finished.
//!
//! No retries happen here. Transport failures surface unchanged.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use greenpass_core::types::base64_bytes;
use greenpass_core::{
    content_id, Credential, CredentialId, EventGroup, EventType, GreenCardType, IssuedGreenCard,
    IssuerConfig, Origin, OriginType, Timestamp, TransportError,
};

use crate::error::IssuanceError;
use crate::scheme::{Commitment, CommitmentAttributes, CommitmentScheme, ValidityAttributes};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareIssue {
    pub stoken: String,
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
}

/// One signed source event as sent to the issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEvent {
    pub provider_identifier: String,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRequest {
    pub stoken: String,
    pub events: Vec<SignedEvent>,
    pub attributes: CommitmentAttributes,
    pub commitment: Commitment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteOrigin {
    #[serde(rename = "type")]
    pub origin_type: OriginType,
    pub event_type: EventType,
    pub event_time: Timestamp,
    pub valid_from: Timestamp,
    pub expiration_time: Timestamp,
}

/// Blinded credential material signed under one issuer key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBlindCredential {
    pub key_id: String,
    pub valid_from: Timestamp,
    pub expiration_time: Timestamp,
    #[serde(with = "base64_bytes")]
    pub blinded: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDomesticGreenCard {
    pub origins: Vec<RemoteOrigin>,
    pub create_credential_messages: Vec<RemoteBlindCredential>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEuGreenCard {
    pub origins: Vec<RemoteOrigin>,
    #[serde(with = "base64_bytes")]
    pub credential: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoteGreenCards {
    #[serde(default)]
    pub domestic_green_card: Option<RemoteDomesticGreenCard>,
    #[serde(default)]
    pub eu_green_cards: Vec<RemoteEuGreenCard>,
    /// Issuer clock at the time of the response.
    #[serde(default)]
    pub server_time: Option<Timestamp>,
}

/// Cards produced for one event group, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCards {
    pub cards: Vec<IssuedGreenCard>,
    pub server_time: Option<Timestamp>,
}

pub trait IssuerClient: Send + Sync {
    fn prepare_issue(&self) -> Result<PrepareIssue, TransportError>;
    fn issue(&self, request: &IssueRequest) -> Result<RemoteGreenCards, TransportError>;
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

pub struct IssuanceProtocol {
    scheme: Arc<dyn CommitmentScheme>,
    client: Arc<dyn IssuerClient>,
}

impl IssuanceProtocol {
    pub fn new(scheme: Arc<dyn CommitmentScheme>, client: Arc<dyn IssuerClient>) -> Self {
        Self { scheme, client }
    }

    /// Issue the cards for `group`. Nothing is persisted here; the caller
    /// stores the result in one step so a cancelled issuance leaves no trace.
    pub fn issue(
        &self,
        secret: &[u8; 32],
        config: &IssuerConfig,
        group: &EventGroup,
    ) -> Result<IssuedCards, IssuanceError> {
        let prepared = self.client.prepare_issue()?;
        let attributes = CommitmentAttributes::for_group(group);
        let (commitment, pending) = self
            .scheme
            .commit(secret, &attributes, &prepared.nonce)?;

        let request = IssueRequest {
            stoken: prepared.stoken,
            events: vec![SignedEvent {
                provider_identifier: group.provider_identifier.clone(),
                payload: group.signed_payload.clone(),
            }],
            attributes,
            commitment,
        };
        let remote = self.client.issue(&request)?;

        let mut issued = Vec::new();

        if let Some(domestic) = remote.domestic_green_card {
            let origins = convert_origins(&domestic.origins, group)?;
            let origin_types: Vec<OriginType> = origins.iter().map(|o| o.origin_type).collect();
            let mut credentials = Vec::with_capacity(domestic.create_credential_messages.len());
            for message in &domestic.create_credential_messages {
                check_window(message.valid_from, message.expiration_time)?;
                let key = config.public_key(&message.key_id).ok_or_else(|| {
                    IssuanceError::Protocol(format!("unknown issuer key {}", message.key_id))
                })?;
                let validity = ValidityAttributes::new(
                    origin_types.clone(),
                    message.valid_from,
                    message.expiration_time,
                );
                let data =
                    self.scheme
                        .complete(key, &message.blinded, secret, &pending, &validity)?;
                credentials.push(credential(
                    group,
                    data,
                    message.valid_from,
                    message.expiration_time,
                ));
            }
            issued.push(IssuedGreenCard {
                card_type: GreenCardType::Domestic,
                origins,
                credentials,
            });
        }

        for eu in remote.eu_green_cards {
            let origins = convert_origins(&eu.origins, group)?;
            if eu.credential.is_empty() {
                return Err(IssuanceError::Protocol("EU card without credential".into()));
            }
            let credentials = match origin_window(&origins) {
                Some((from, until)) => vec![credential(group, eu.credential, from, until)],
                None => Vec::new(),
            };
            issued.push(IssuedGreenCard {
                card_type: GreenCardType::Eu,
                origins,
                credentials,
            });
        }

        tracing::debug!(
            event_group = %group.id,
            cards = issued.len(),
            "issued green cards"
        );
        Ok(IssuedCards {
            cards: issued,
            server_time: remote.server_time,
        })
    }
}

fn check_window(valid_from: Timestamp, expiration_time: Timestamp) -> Result<(), IssuanceError> {
    if expiration_time < valid_from {
        return Err(IssuanceError::Protocol(format!(
            "validity window ends before it starts ({} < {})",
            expiration_time, valid_from
        )));
    }
    Ok(())
}

fn convert_origins(
    remote: &[RemoteOrigin],
    group: &EventGroup,
) -> Result<Vec<Origin>, IssuanceError> {
    remote
        .iter()
        .map(|o| {
            check_window(o.valid_from, o.expiration_time)?;
            Ok(Origin {
                origin_type: o.origin_type,
                event_type: o.event_type,
                event_time: o.event_time,
                valid_from: o.valid_from,
                expiration_time: o.expiration_time,
                event_group_id: group.id.clone(),
            })
        })
        .collect()
}

fn origin_window(origins: &[Origin]) -> Option<(Timestamp, Timestamp)> {
    let from = origins.iter().map(|o| o.valid_from).min()?;
    let until = origins.iter().map(|o| o.expiration_time).max()?;
    Some((from, until))
}

/// Credential ids derive from content so re-issuing the same material is a no-op.
fn credential(
    group: &EventGroup,
    data: Vec<u8>,
    valid_from: Timestamp,
    expiration_time: Timestamp,
) -> Credential {
    let id = content_id(
        b"greenpass-credential",
        &[
            group.id.as_str().as_bytes(),
            &data[..],
            &valid_from.seconds_since_epoch.to_be_bytes()[..],
            &expiration_time.seconds_since_epoch.to_be_bytes()[..],
        ],
    );
    Credential {
        id: CredentialId::new(id),
        data,
        valid_from,
        expiration_time,
        event_group_id: group.id.clone(),
    }
}
