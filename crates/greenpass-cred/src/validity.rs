//! Validity derivation for stored GreenCards.
//!
//! A card is displayable only while some credential covers "now". The
//! selected credential is the latest-starting one whose window
//! `valid_from <= now < expiration_time` contains "now". A card without a
//! covering credential is expired even when an origin nominally runs longer.

use greenpass_core::{Credential, GreenCard, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardStatus {
    Valid,
    Expired,
}

/// Pick the credential to display at `now`.
/// Ties on `valid_from` go to the later entry in the card.
pub fn select_credential(card: &GreenCard, now: Timestamp) -> Option<&Credential> {
    card.credentials
        .iter()
        .filter(|c| c.covers(now))
        .max_by_key(|c| c.valid_from)
}

/// Latest origin expiration, `None` for a card without origins.
pub fn origin_expiration(card: &GreenCard) -> Option<Timestamp> {
    card.origins.iter().map(|o| o.expiration_time).max()
}

/// `now >= max(origin.expiration_time)`, or no credential covers `now`.
pub fn is_expired(card: &GreenCard, now: Timestamp) -> bool {
    match origin_expiration(card) {
        None => true,
        Some(expiration) if now >= expiration => true,
        Some(_) => select_credential(card, now).is_none(),
    }
}

pub fn card_status(card: &GreenCard, now: Timestamp) -> CardStatus {
    if is_expired(card, now) {
        CardStatus::Expired
    } else {
        CardStatus::Valid
    }
}
