//! GreenCard entity model.
//!
//! A [`GreenCard`] exclusively owns its [`Origin`]s and [`Credential`]s.
//! Queries always start from the card, so children carry no back-references;
//! they only remember the [`EventGroup`] they were issued from so that a
//! re-sync can supersede them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::content_id;
use crate::types::{base64_bytes, CredentialId, EventGroupId, GreenCardId, Timestamp};

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginType {
    Vaccination,
    Test,
    Recovery,
}

impl fmt::Display for OriginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginType::Vaccination => write!(f, "vaccination"),
            OriginType::Test => write!(f, "test"),
            OriginType::Recovery => write!(f, "recovery"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GreenCardType {
    Domestic,
    Eu,
}

impl fmt::Display for GreenCardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GreenCardType::Domestic => write!(f, "domestic"),
            GreenCardType::Eu => write!(f, "eu"),
        }
    }
}

/// Kind of signed remote event an origin was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Vaccination,
    NegativeTest,
    PositiveTest,
    Recovery,
}

impl EventType {
    /// The proof type an event of this kind asserts. A positive test proves recovery.
    pub fn origin_type(&self) -> OriginType {
        match self {
            EventType::Vaccination => OriginType::Vaccination,
            EventType::NegativeTest => OriginType::Test,
            EventType::PositiveTest | EventType::Recovery => OriginType::Recovery,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Vaccination => write!(f, "vaccination"),
            EventType::NegativeTest => write!(f, "negativetest"),
            EventType::PositiveTest => write!(f, "positivetest"),
            EventType::Recovery => write!(f, "recovery"),
        }
    }
}

// ---------------------------------------------------------------------------
// Origin / Credential / GreenCard
// ---------------------------------------------------------------------------

/// Time-bounded assertion of one proof type. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub origin_type: OriginType,
    pub event_type: EventType,
    pub event_time: Timestamp,
    pub valid_from: Timestamp,
    pub expiration_time: Timestamp,
    pub event_group_id: EventGroupId,
}

/// Opaque, time-bounded proof blob. Windows of sibling credentials may overlap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub valid_from: Timestamp,
    pub expiration_time: Timestamp,
    pub event_group_id: EventGroupId,
}

impl Credential {
    /// `valid_from <= now < expiration_time`
    pub fn covers(&self, now: Timestamp) -> bool {
        self.valid_from <= now && now < self.expiration_time
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreenCard {
    pub id: GreenCardId,
    pub card_type: GreenCardType,
    pub origins: Vec<Origin>,
    pub credentials: Vec<Credential>,
}

impl GreenCard {
    pub fn first_origin_type(&self) -> Option<OriginType> {
        self.origins.first().map(|o| o.origin_type)
    }

    pub fn has_origin_type(&self, origin_type: OriginType) -> bool {
        self.origins.iter().any(|o| o.origin_type == origin_type)
    }

    /// EU card carrying at least one vaccination origin.
    pub fn is_eu_vaccination(&self) -> bool {
        self.card_type == GreenCardType::Eu && self.has_origin_type(OriginType::Vaccination)
    }

    fn key(&self) -> Option<CardKey> {
        let first = self.origins.first()?;
        Some(CardKey::new(
            self.card_type,
            first.origin_type,
            &first.event_group_id,
        ))
    }
}

// ---------------------------------------------------------------------------
// EventGroup
// ---------------------------------------------------------------------------

/// Raw signed remote events retained for re-issuance. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventGroup {
    pub id: EventGroupId,
    pub provider_identifier: String,
    pub event_type: EventType,
    pub max_issued_at: Timestamp,
    #[serde(with = "base64_bytes")]
    pub signed_payload: Vec<u8>,
}

impl EventGroup {
    /// Build an event group whose id is derived from its content, so saving
    /// the same payload twice is a no-op.
    pub fn new(
        provider_identifier: impl Into<String>,
        event_type: EventType,
        max_issued_at: Timestamp,
        signed_payload: Vec<u8>,
    ) -> Self {
        let provider_identifier = provider_identifier.into();
        let kind = event_type.to_string();
        let id = content_id(
            b"greenpass-event-group",
            &[
                provider_identifier.as_bytes(),
                kind.as_bytes(),
                &signed_payload,
            ],
        );
        Self {
            id: EventGroupId(id),
            provider_identifier,
            event_type,
            max_issued_at,
            signed_payload,
        }
    }
}

// ---------------------------------------------------------------------------
// Issuer configuration
// ---------------------------------------------------------------------------

/// Issuer public key for anonymous-credential issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClKey {
    pub id: String,
    /// Base64 key material; the encoding belongs to the commitment scheme.
    pub public_key: String,
}

/// Test or event provider entry from the issuer's provider directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub identifier: String,
    pub name: String,
    pub result_url: String,
    #[serde(with = "base64_bytes", default)]
    pub public_key: Vec<u8>,
}

/// Process-wide issuer configuration. Replaced wholesale, never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerConfig {
    pub public_keys: Vec<ClKey>,
    pub providers: Vec<Provider>,
    pub fetched_at: Timestamp,
}

impl IssuerConfig {
    pub fn provider(&self, identifier: &str) -> Option<&Provider> {
        self.providers.iter().find(|p| p.identifier == identifier)
    }

    pub fn public_key(&self, id: &str) -> Option<&ClKey> {
        self.public_keys.iter().find(|k| k.id == id)
    }
}

// ---------------------------------------------------------------------------
// Issuance output and the upsert rule
// ---------------------------------------------------------------------------

/// Cards produced by issuing one event group, before they are merged into the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedGreenCard {
    pub card_type: GreenCardType,
    pub origins: Vec<Origin>,
    pub credentials: Vec<Credential>,
}

/// Upsert key. Domestic cards merge per origin type; each EU certificate
/// stays tied to the event group it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CardKey {
    card_type: GreenCardType,
    origin_type: OriginType,
    event_group_id: Option<EventGroupId>,
}

impl CardKey {
    fn new(card_type: GreenCardType, origin_type: OriginType, group: &EventGroupId) -> Self {
        let event_group_id = match card_type {
            GreenCardType::Domestic => None,
            GreenCardType::Eu => Some(group.clone()),
        };
        Self {
            card_type,
            origin_type,
            event_group_id,
        }
    }
}

/// Merge the issuance result of one event group into the current card set.
///
/// Every origin and credential previously issued from `group` is dropped and
/// replaced by `issued`; cards are matched by upsert key so existing card ids
/// survive a re-sync. Cards left without origins are removed. Applying the
/// same issuance twice yields the same set.
pub fn merge_issued_cards(
    current: Vec<GreenCard>,
    group: &EventGroupId,
    issued: &[IssuedGreenCard],
) -> Vec<GreenCard> {
    let mut keyed: Vec<(Option<CardKey>, GreenCard)> = current
        .into_iter()
        .map(|card| (card.key(), card))
        .collect();

    for (_, card) in keyed.iter_mut() {
        card.origins.retain(|o| &o.event_group_id != group);
        card.credentials.retain(|c| &c.event_group_id != group);
    }

    for issued_card in issued {
        let Some(first) = issued_card.origins.first() else {
            continue;
        };
        let key = CardKey::new(issued_card.card_type, first.origin_type, group);
        match keyed.iter_mut().find(|(k, _)| k.as_ref() == Some(&key)) {
            Some((_, card)) => {
                card.origins.extend(issued_card.origins.iter().cloned());
                card.credentials
                    .extend(issued_card.credentials.iter().cloned());
            }
            None => keyed.push((
                Some(key),
                GreenCard {
                    id: GreenCardId::generate(),
                    card_type: issued_card.card_type,
                    origins: issued_card.origins.clone(),
                    credentials: issued_card.credentials.clone(),
                },
            )),
        }
    }

    keyed
        .into_iter()
        .map(|(_, mut card)| {
            card.origins.sort_by_key(|o| o.valid_from);
            card.credentials.sort_by_key(|c| c.valid_from);
            card
        })
        .filter(|card| !card.origins.is_empty())
        .collect()
}

/// Remove every child issued from `group`, dropping cards left without origins.
pub fn remove_event_group_children(current: Vec<GreenCard>, group: &EventGroupId) -> Vec<GreenCard> {
    merge_issued_cards(current, group, &[])
}
