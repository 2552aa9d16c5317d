//! Checksum validation for the token segment of a unique code.
//!
//! A unique code reads `PROVIDER-TOKEN-CV`: the first character of the
//! third segment is a Luhn mod N check character over `TOKEN`, anything
//! after it is a format version and is not checked.

/// Characters a token may use, in check-digit order.
pub const TOKEN_ALPHABET: &str = "BCFGJLQRSTUVXYZ23456789";

pub trait TokenValidator: Send + Sync {
    /// `checksum` is the whole third segment of the unique code.
    fn validate(&self, token: &str, checksum: &str) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LuhnModNValidator;

impl LuhnModNValidator {
    /// Check character for `token`, `None` if it uses characters outside
    /// the alphabet or is empty.
    pub fn check_character(token: &str) -> Option<char> {
        let alphabet: Vec<char> = TOKEN_ALPHABET.chars().collect();
        let n = alphabet.len();
        if token.is_empty() {
            return None;
        }

        let mut factor = 2;
        let mut sum = 0;
        for c in token.chars().rev() {
            let code_point = alphabet.iter().position(|a| *a == c)?;
            let addend = factor * code_point;
            factor = if factor == 2 { 1 } else { 2 };
            sum += addend / n + addend % n;
        }
        let check = (n - sum % n) % n;
        alphabet.get(check).copied()
    }
}

impl TokenValidator for LuhnModNValidator {
    fn validate(&self, token: &str, checksum: &str) -> bool {
        let Some(expected) = Self::check_character(&token.to_uppercase()) else {
            return false;
        };
        checksum
            .chars()
            .next()
            .map(|c| c.to_ascii_uppercase() == expected)
            .unwrap_or(false)
    }
}
