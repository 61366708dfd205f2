//! Authenticated-encryption envelope for session payloads at rest.
//!
//! AES-256-GCM with a 12-byte IV and 16-byte tag, no associated data. Output
//! is base64 of `IV(12) ‖ TAG(16) ‖ CIPHERTEXT`, matching the layout the
//! rest of this workspace's AES-GCM users (session cookie encryption,
//! at-rest password blobs) already produce.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;

use crate::error::{EngineError, Result};

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Confidentiality + integrity for opaque byte strings under a single
/// 256-bit key. The key is held as opaque bytes and is never logged,
/// serialized, or embedded in an error message.
pub struct Envelope {
    cipher: Aes256Gcm,
}

impl Envelope {
    /// `key` must be at least 32 bytes; only the first 32 are used.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() < 32 {
            return Err(EngineError::Config(
                "envelope key must be at least 32 bytes".into(),
            ));
        }
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..32]));
        Ok(Self { cipher })
    }

    /// Generates a fresh random IV per call — IV reuse under one key never
    /// happens because every encryption samples a new one.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut iv_bytes = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv_bytes);
        let nonce = Nonce::from_slice(&iv_bytes);

        // AES-256-GCM encryption only fails on plaintext length overflow,
        // which cannot happen for session-sized payloads.
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .expect("aes-256-gcm encryption of a bounded session payload cannot fail");

        let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
        out.extend_from_slice(&iv_bytes);
        out.extend_from_slice(&ciphertext);
        STANDARD.encode(out).into_bytes()
    }

    /// Strict: rejects invalid base64, short payloads, and authentication
    /// failures uniformly as `ERR_DECRYPT` — no oracle that distinguishes
    /// "bad base64" from "bad tag" from "bad key".
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        let decoded = STANDARD.decode(blob).map_err(|_| EngineError::Decrypt)?;
        if decoded.len() < IV_LEN + TAG_LEN {
            return Err(EngineError::Decrypt);
        }

        let (iv_bytes, ciphertext) = decoded.split_at(IV_LEN);
        let nonce = Nonce::from_slice(iv_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| EngineError::Decrypt)
    }
}
