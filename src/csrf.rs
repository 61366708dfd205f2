//! CSRF token protocol — generation, hashed storage, constant-time validation.

use once_cell::sync::Lazy;
use rand::RngCore;
use regex::Regex;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{EngineError, Result};

static TOKEN_GRAMMAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{64}$").expect("csrf token grammar is a valid regex"));

/// An opaque 256-bit random token. The raw value is never persisted — only
/// `hash()` is stored, under the session's `_csrf_token` key.
#[derive(Debug, Clone)]
pub struct CsrfToken {
    raw: String,
}

impl CsrfToken {
    /// 32 random bytes, hex-encoded lowercase.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self {
            raw: hex::encode(bytes),
        }
    }

    /// Exact `^[0-9a-f]{64}$` grammar, case-insensitive.
    pub fn parse(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        if TOKEN_GRAMMAR.is_match(&lower) {
            Ok(Self { raw: lower })
        } else {
            Err(EngineError::InvalidToken(s.to_string()))
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// SHA-256 of the raw value, as 64 lowercase hex characters.
    pub fn hash(&self) -> String {
        let digest = Sha256::digest(self.raw.as_bytes());
        hex::encode(digest)
    }

    /// Constant-time compare of `self.hash()` against a stored hex digest.
    pub fn equals_hashed(&self, stored_hex: &str) -> bool {
        constant_time_hex_eq(&self.hash(), stored_hex)
    }
}

/// Constant-time comparison of two hex strings of possibly differing length.
/// Length mismatch short-circuits in `bool::from`, not in a branch that
/// depends on byte content — the two strings being compared are always
/// fixed-width 64-hex digests in practice, so this never reveals anything
/// about the secret beyond "malformed input", same as any other mismatch.
fn constant_time_hex_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
