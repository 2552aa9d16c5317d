//! Greenpass Credential Engine
//!
//! Rules that turn stored origins and credentials into a display decision,
//! the checksum validator for human-entered unique codes, and the
//! commitment-based issuance protocol that exchanges signed events for
//! credentials without revealing the holder's secret key.
//!
//! The commitment math sits behind [`CommitmentScheme`] and the issuer
//! behind [`IssuerClient`], so the protocol runs unchanged against fakes.

pub mod error;
pub mod issuance;
pub mod scheme;
pub mod token;
pub mod validity;

pub use error::{CredError, CredResult, IssuanceError};
pub use issuance::{
    IssuanceProtocol, IssueRequest, IssuedCards, IssuerClient, PrepareIssue,
    RemoteBlindCredential, RemoteDomesticGreenCard, RemoteEuGreenCard, RemoteGreenCards,
    RemoteOrigin,
};
pub use scheme::{
    Commitment, CommitmentAttributes, CommitmentScheme, IssuerKey, PendingIssuance,
    RistrettoScheme, ValidityAttributes,
};
pub use token::{LuhnModNValidator, TokenValidator};
pub use validity::{card_status, is_expired, origin_expiration, select_credential, CardStatus};
