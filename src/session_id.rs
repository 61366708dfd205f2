//! Opaque, validated session identifier — canonical UUIDv4 textual form.

use once_cell::sync::Lazy;
use regex::Regex;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::error::{EngineError, Result};

static UUID_V4_GRAMMAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
        .expect("uuidv4 grammar is a valid regex")
});

/// A 36-character canonical UUIDv4 string. Any instance in memory has
/// already passed the grammar check in `parse` — there is no way to
/// construct one from untrusted input without going through it.
#[derive(Debug, Clone, Eq)]
pub struct SessionId(String);

impl SessionId {
    /// CSPRNG-derived UUIDv4.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Strict, case-insensitive grammar check. No whitespace trimming — a
    /// cookie value with leading/trailing junk is rejected, not cleaned up.
    pub fn parse(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        if UUID_V4_GRAMMAR.is_match(&lower) {
            Ok(Self(lower))
        } else {
            Err(EngineError::InvalidId(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Constant-time over the byte representation — an id never leaks how many
/// leading bytes matched a stored one via timing.
impl PartialEq for SessionId {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl std::hash::Hash for SessionId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}
