//! Client-binding fingerprints used to detect session takeover across
//! network identities.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Compile-time salt mixed into the IP hash. It exists to keep the stored
/// value from being a direct PII leak, not to resist an offline attack
/// against a determined adversary who already has the stored hash.
const IP_HASH_SALT: &[u8] = b"sessionguard-ip-fingerprint-v1";

/// Request metadata the fingerprint is derived from. Deliberately minimal —
/// just what §4.6 names.
pub struct RequestMeta<'a> {
    pub forwarded_for: Option<&'a str>,
    pub client_ip_header: Option<&'a str>,
    pub real_ip_header: Option<&'a str>,
    pub peer_addr: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

/// Picks the first present of `X-Forwarded-For` (first comma-separated
/// entry, trimmed), `Client-IP`, `X-Real-IP`, else the peer address, else
/// `0.0.0.0`. This is declaratively trusted; a deployment that doesn't
/// terminate its own proxy must disable IP binding rather than rely on this
/// function to detect spoofing.
pub fn client_ip(meta: &RequestMeta) -> String {
    if let Some(forwarded) = meta.forwarded_for {
        if let Some(first) = forwarded.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    if let Some(ip) = meta.client_ip_header {
        if !ip.is_empty() {
            return ip.to_string();
        }
    }
    if let Some(ip) = meta.real_ip_header {
        if !ip.is_empty() {
            return ip.to_string();
        }
    }
    if let Some(ip) = meta.peer_addr {
        if !ip.is_empty() {
            return ip.to_string();
        }
    }
    "0.0.0.0".to_string()
}

/// `SHA-256(client_ip ‖ salt)`, hex-encoded.
pub fn ip_hash(ip: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ip.as_bytes());
    hasher.update(IP_HASH_SALT);
    hex::encode(hasher.finalize())
}

/// Constant-time comparison of two fingerprint strings (hashes or raw
/// User-Agent values — both are treated as secrets for binding purposes).
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
