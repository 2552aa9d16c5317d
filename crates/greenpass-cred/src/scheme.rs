//! Blind commitment scheme over Ristretto255.
//!
//! The holder derives a scalar `s` from its secret key and hashes the event
//! group it is asking about into an attribute scalar `a`. It commits as
//! `C = s*G + r*H + a*J` with a fresh blinding `r`, together with a Schnorr
//! proof of knowledge of `(s, r)` bound to `a` and the issuer's nonce.
//!
//! The issuer fixes the validity attributes of each credential (origin
//! types and window), hashes them into `w` and answers with
//! `Z = x*(C + w*K)` and a DLEQ proof that `Z` was made with the same `x` as
//! its published key. The holder removes the blinding:
//!
//!   sigma = Z - r*(x*H) = x*(s*G + a*J + w*K)
//!
//! and keeps `S || sigma || a || w` (with `S = s*G`) as the credential. The
//! issuer only ever sees `C`, which is uniformly random, so it cannot link
//! the credential back to the issuance call.
//!
//! Wire layouts (all points compressed, all scalars canonical, 32 bytes):
//!   commitment       C || T || z1 || z2
//!   issuer response  Z || c || z
//!   public key       x*G || x*H          (base64 in `ClKey::public_key`)
//!   credential       S || sigma || a || w

use base64::{engine::general_purpose::STANDARD, Engine};
use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use zeroize::{Zeroize, Zeroizing};

use greenpass_core::types::base64_bytes;
use greenpass_core::{ClKey, EventGroup, EventType, OriginType, Timestamp};

use crate::error::{CredError, CredResult, IssuanceError};

const COMMITMENT_LEN: usize = 128;
const RESPONSE_LEN: usize = 96;
const PUBLIC_KEY_LEN: usize = 64;
const CREDENTIAL_LEN: usize = 128;
const PENDING_LEN: usize = 96;

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

/// What the holder binds into its commitment: the event group being issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentAttributes {
    pub event_group_id: String,
    pub provider_identifier: String,
    pub event_type: EventType,
}

impl CommitmentAttributes {
    pub fn for_group(group: &EventGroup) -> Self {
        Self {
            event_group_id: group.id.as_str().to_string(),
            provider_identifier: group.provider_identifier.clone(),
            event_type: group.event_type,
        }
    }

    fn scalar(&self) -> Scalar {
        let event_type = self.event_type.to_string();
        challenge(
            b"greenpass-commitment-attributes",
            &[
                self.event_group_id.as_bytes(),
                self.provider_identifier.as_bytes(),
                event_type.as_bytes(),
            ],
        )
    }
}

/// What the issuer binds into one credential: the origin types it proves and
/// the window it is valid for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidityAttributes {
    pub origin_types: Vec<OriginType>,
    pub valid_from: Timestamp,
    pub expiration_time: Timestamp,
}

impl ValidityAttributes {
    pub fn new(
        origin_types: Vec<OriginType>,
        valid_from: Timestamp,
        expiration_time: Timestamp,
    ) -> Self {
        Self {
            origin_types,
            valid_from,
            expiration_time,
        }
    }

    fn scalar(&self) -> Scalar {
        let names: Vec<String> = self.origin_types.iter().map(|t| t.to_string()).collect();
        let from = self.valid_from.seconds_since_epoch.to_be_bytes();
        let until = self.expiration_time.seconds_since_epoch.to_be_bytes();
        let mut parts: Vec<&[u8]> = vec![&from[..], &until[..]];
        parts.extend(names.iter().map(|n| n.as_bytes()));
        challenge(b"greenpass-validity-attributes", &parts)
    }
}

// ---------------------------------------------------------------------------
// Scheme interface
// ---------------------------------------------------------------------------

/// Commitment sent to the issuer. Reveals nothing about the secret key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment(#[serde(with = "base64_bytes")] pub Vec<u8>);

/// Holder-side state between `commit` and `complete`. Never leaves the device.
pub struct PendingIssuance {
    state: Zeroizing<Vec<u8>>,
}

impl PendingIssuance {
    pub fn new(state: Vec<u8>) -> Self {
        Self {
            state: Zeroizing::new(state),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.state
    }
}

impl std::fmt::Debug for PendingIssuance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PendingIssuance([REDACTED])")
    }
}

pub trait CommitmentScheme: Send + Sync {
    /// Blind `secret` together with `attributes` into a commitment bound to
    /// the issuer's `nonce`.
    fn commit(
        &self,
        secret: &[u8; 32],
        attributes: &CommitmentAttributes,
        nonce: &[u8],
    ) -> Result<(Commitment, PendingIssuance), IssuanceError>;

    /// Turn the issuer's blinded material, signed over `validity`, into
    /// credential bytes.
    fn complete(
        &self,
        issuer_key: &ClKey,
        issuer_response: &[u8],
        secret: &[u8; 32],
        pending: &PendingIssuance,
        validity: &ValidityAttributes,
    ) -> Result<Vec<u8>, IssuanceError>;
}

// ---------------------------------------------------------------------------
// Group helpers
// ---------------------------------------------------------------------------

/// Generator with unknown discrete log relative to G and the other generators.
fn generator(label: &[u8]) -> RistrettoPoint {
    let hash1 = Sha256::digest(label);
    let hash2 = Sha256::digest(hash1);
    let mut uniform = [0u8; 64];
    uniform[..32].copy_from_slice(&hash1);
    uniform[32..].copy_from_slice(&hash2);
    RistrettoPoint::from_uniform_bytes(&uniform)
}

fn generator_h() -> RistrettoPoint {
    generator(b"greenpass-commitment-H")
}

fn generator_j() -> RistrettoPoint {
    generator(b"greenpass-attributes-J")
}

fn generator_k() -> RistrettoPoint {
    generator(b"greenpass-validity-K")
}

fn random_scalar() -> Scalar {
    let mut wide = [0u8; 64];
    rand::rngs::OsRng.fill_bytes(&mut wide);
    let scalar = Scalar::from_bytes_mod_order_wide(&wide);
    wide.zeroize();
    scalar
}

/// Fiat-Shamir challenge over length-prefixed parts.
fn challenge(tag: &[u8], parts: &[&[u8]]) -> Scalar {
    let mut hasher = Sha512::new();
    hasher.update((tag.len() as u64).to_be_bytes());
    hasher.update(tag);
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hasher.finalize());
    Scalar::from_bytes_mod_order_wide(&wide)
}

fn pok_challenge(c: &[u8], t: &[u8], a: &Scalar, nonce: &[u8]) -> Scalar {
    challenge(
        b"greenpass-commitment-pok",
        &[c, t, &a.to_bytes()[..], nonce],
    )
}

/// Holder scalar derived from the secret key with HKDF-SHA256.
fn secret_scalar(secret: &[u8; 32]) -> CredResult<Scalar> {
    let hk = Hkdf::<Sha256>::new(Some(&b"greenpass-holder"[..]), secret);
    let mut okm = Zeroizing::new([0u8; 64]);
    hk.expand(b"greenpass-commitment-secret", &mut okm[..])
        .map_err(|_| CredError::InternalError)?;
    Ok(Scalar::from_bytes_mod_order_wide(&okm))
}

fn read_array(bytes: &[u8], offset: usize) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes[offset..offset + 32]);
    out
}

fn read_point(bytes: &[u8], offset: usize, what: &str) -> CredResult<RistrettoPoint> {
    CompressedRistretto(read_array(bytes, offset))
        .decompress()
        .ok_or_else(|| CredError::InvalidKey(format!("{} is not a valid point", what)))
}

fn read_scalar(bytes: &[u8], offset: usize, what: &str) -> CredResult<Scalar> {
    Option::<Scalar>::from(Scalar::from_canonical_bytes(read_array(bytes, offset)))
        .ok_or_else(|| CredError::InvalidKey(format!("{} is not a canonical scalar", what)))
}

fn decode_public_key(key: &ClKey) -> CredResult<(RistrettoPoint, RistrettoPoint)> {
    let raw = STANDARD
        .decode(key.public_key.as_bytes())
        .map_err(|_| CredError::InvalidKey(format!("key {} is not base64", key.id)))?;
    if raw.len() != PUBLIC_KEY_LEN {
        return Err(CredError::InvalidKey(format!(
            "key {} has length {}, expected {}",
            key.id,
            raw.len(),
            PUBLIC_KEY_LEN
        )));
    }
    Ok((
        read_point(&raw, 0, "public key X")?,
        read_point(&raw, 32, "public key Y")?,
    ))
}

// ---------------------------------------------------------------------------
// Holder side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct RistrettoScheme;

impl CommitmentScheme for RistrettoScheme {
    fn commit(
        &self,
        secret: &[u8; 32],
        attributes: &CommitmentAttributes,
        nonce: &[u8],
    ) -> Result<(Commitment, PendingIssuance), IssuanceError> {
        if nonce.is_empty() {
            return Err(IssuanceError::Protocol("issuer nonce is empty".into()));
        }
        let g = RISTRETTO_BASEPOINT_POINT;
        let h = generator_h();

        let s = secret_scalar(secret)?;
        let a = attributes.scalar();
        let r = random_scalar();
        let c_point = s * g + r * h + a * generator_j();

        // Proof of knowledge of (s, r) for C - a*J, bound to a and the nonce
        let k1 = random_scalar();
        let k2 = random_scalar();
        let t_point = k1 * g + k2 * h;
        let c_bytes = c_point.compress().to_bytes();
        let t_bytes = t_point.compress().to_bytes();
        let e = pok_challenge(&c_bytes, &t_bytes, &a, nonce);
        let z1 = k1 + e * s;
        let z2 = k2 + e * r;

        let mut commitment = Vec::with_capacity(COMMITMENT_LEN);
        commitment.extend_from_slice(&c_bytes);
        commitment.extend_from_slice(&t_bytes);
        commitment.extend_from_slice(&z1.to_bytes());
        commitment.extend_from_slice(&z2.to_bytes());

        let mut state = Vec::with_capacity(PENDING_LEN);
        state.extend_from_slice(&r.to_bytes());
        state.extend_from_slice(&c_bytes);
        state.extend_from_slice(&a.to_bytes());

        Ok((Commitment(commitment), PendingIssuance::new(state)))
    }

    fn complete(
        &self,
        issuer_key: &ClKey,
        issuer_response: &[u8],
        secret: &[u8; 32],
        pending: &PendingIssuance,
        validity: &ValidityAttributes,
    ) -> Result<Vec<u8>, IssuanceError> {
        let (x_g, x_h) = decode_public_key(issuer_key)?;

        let state = pending.as_bytes();
        if state.len() != PENDING_LEN {
            return Err(CredError::InternalError.into());
        }
        let r = read_scalar(state, 0, "blinding")?;
        let c_point = read_point(state, 32, "commitment")?;
        let a = read_scalar(state, 64, "attributes")?;

        if issuer_response.len() != RESPONSE_LEN {
            return Err(IssuanceError::Protocol(format!(
                "issuer response has length {}, expected {}",
                issuer_response.len(),
                RESPONSE_LEN
            )));
        }
        let z_point = read_point(issuer_response, 0, "issuer response")?;
        let c = read_scalar(issuer_response, 32, "issuer challenge")?;
        let z = read_scalar(issuer_response, 64, "issuer proof")?;

        let w = validity.scalar();
        let signed_point = c_point + w * generator_k();
        if !verify_dleq(&x_g, &signed_point, &z_point, c, z) {
            return Err(IssuanceError::Protocol(format!(
                "issuer proof does not match key {}",
                issuer_key.id
            )));
        }

        let s = secret_scalar(secret)?;
        let s_point = s * RISTRETTO_BASEPOINT_POINT;
        let sigma = z_point - r * x_h;

        let mut credential = Vec::with_capacity(CREDENTIAL_LEN);
        credential.extend_from_slice(&s_point.compress().to_bytes());
        credential.extend_from_slice(&sigma.compress().to_bytes());
        credential.extend_from_slice(&a.to_bytes());
        credential.extend_from_slice(&w.to_bytes());
        Ok(credential)
    }
}

/// Check that `log_G(X) == log_M(Z)` for the signed point `M`.
fn verify_dleq(
    x_g: &RistrettoPoint,
    m_point: &RistrettoPoint,
    z_point: &RistrettoPoint,
    c: Scalar,
    z: Scalar,
) -> bool {
    let a1 = z * RISTRETTO_BASEPOINT_POINT - c * x_g;
    let a2 = z * m_point - c * z_point;
    let expected = dleq_challenge(x_g, m_point, z_point, &a1, &a2);
    expected == c
}

fn dleq_challenge(
    x_g: &RistrettoPoint,
    m_point: &RistrettoPoint,
    z_point: &RistrettoPoint,
    a1: &RistrettoPoint,
    a2: &RistrettoPoint,
) -> Scalar {
    challenge(
        b"greenpass-issuer-dleq",
        &[
            &x_g.compress().as_bytes()[..],
            &m_point.compress().as_bytes()[..],
            &z_point.compress().as_bytes()[..],
            &a1.compress().as_bytes()[..],
            &a2.compress().as_bytes()[..],
        ],
    )
}

// ---------------------------------------------------------------------------
// Issuer side
// ---------------------------------------------------------------------------

/// Issuer signing key. Used by issuer services and by tests that stand in
/// for one.
pub struct IssuerKey {
    id: String,
    x: Scalar,
}

impl IssuerKey {
    pub fn generate(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            x: random_scalar(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Public half as published in the issuer config.
    pub fn public_key(&self) -> ClKey {
        let mut raw = Vec::with_capacity(PUBLIC_KEY_LEN);
        raw.extend_from_slice((self.x * RISTRETTO_BASEPOINT_POINT).compress().as_bytes());
        raw.extend_from_slice((self.x * generator_h()).compress().as_bytes());
        ClKey {
            id: self.id.clone(),
            public_key: STANDARD.encode(raw),
        }
    }

    /// Verify the holder's proof of knowledge against `attributes` and sign
    /// the blinded commitment over `validity`.
    pub fn sign_commitment(
        &self,
        commitment: &Commitment,
        attributes: &CommitmentAttributes,
        nonce: &[u8],
        validity: &ValidityAttributes,
    ) -> CredResult<Vec<u8>> {
        let bytes = &commitment.0;
        if bytes.len() != COMMITMENT_LEN {
            return Err(CredError::InvalidCommitment(format!(
                "length {}, expected {}",
                bytes.len(),
                COMMITMENT_LEN
            )));
        }
        let c_point = read_point(bytes, 0, "commitment")
            .map_err(|e| CredError::InvalidCommitment(e.to_string()))?;
        let t_point = read_point(bytes, 32, "proof commitment")
            .map_err(|e| CredError::InvalidCommitment(e.to_string()))?;
        let z1 = read_scalar(bytes, 64, "proof response")
            .map_err(|e| CredError::InvalidCommitment(e.to_string()))?;
        let z2 = read_scalar(bytes, 96, "proof response")
            .map_err(|e| CredError::InvalidCommitment(e.to_string()))?;

        let a = attributes.scalar();
        let e = pok_challenge(&bytes[0..32], &bytes[32..64], &a, nonce);
        let unbound = c_point - a * generator_j();
        if z1 * RISTRETTO_BASEPOINT_POINT + z2 * generator_h() != t_point + e * unbound {
            return Err(CredError::InvalidCommitment(
                "proof of knowledge rejected".into(),
            ));
        }

        let m_point = c_point + validity.scalar() * generator_k();
        let z_point = self.x * m_point;
        let x_g = self.x * RISTRETTO_BASEPOINT_POINT;
        let k = random_scalar();
        let a1 = k * RISTRETTO_BASEPOINT_POINT;
        let a2 = k * m_point;
        let c = dleq_challenge(&x_g, &m_point, &z_point, &a1, &a2);
        let z = k + c * self.x;

        let mut response = Vec::with_capacity(RESPONSE_LEN);
        response.extend_from_slice(z_point.compress().as_bytes());
        response.extend_from_slice(&c.to_bytes());
        response.extend_from_slice(&z.to_bytes());
        Ok(response)
    }

    /// Check that `credential` was produced under this key for exactly these
    /// attributes.
    pub fn verify_credential(
        &self,
        credential: &[u8],
        attributes: &CommitmentAttributes,
        validity: &ValidityAttributes,
    ) -> bool {
        if credential.len() != CREDENTIAL_LEN {
            return false;
        }
        let parsed = (
            read_point(credential, 0, "credential"),
            read_point(credential, 32, "credential"),
            read_scalar(credential, 64, "credential attributes"),
            read_scalar(credential, 96, "credential validity"),
        );
        let (Ok(s_point), Ok(sigma), Ok(a), Ok(w)) = parsed else {
            return false;
        };
        if a != attributes.scalar() || w != validity.scalar() {
            return false;
        }
        self.x * (s_point + a * generator_j() + w * generator_k()) == sigma
    }
}

impl Drop for IssuerKey {
    fn drop(&mut self) {
        self.x.zeroize();
    }
}

impl std::fmt::Debug for IssuerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuerKey")
            .field("id", &self.id)
            .field("x", &"[REDACTED]")
            .finish()
    }
}
