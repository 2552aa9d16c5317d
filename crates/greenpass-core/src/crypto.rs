use sha2::{Digest, Sha256};

/// Domain-separated SHA-256 over a sequence of length-prefixed parts.
///
/// Length prefixes keep `["ab", "c"]` and `["a", "bc"]` apart.
pub fn tagged_digest(tag: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update((tag.len() as u64).to_be_bytes());
    hasher.update(tag);
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Stable content identifier: the first 16 bytes of a tagged digest, hex encoded.
pub fn content_id(tag: &[u8], parts: &[&[u8]]) -> String {
    let digest = tagged_digest(tag, parts);
    hex::encode(&digest[..16])
}
