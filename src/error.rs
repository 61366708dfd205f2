//! Error Handling — closed sum type per the engine's error taxonomy
//!
//! Security-relevant failures (invalid id, invalid CSRF token, decrypt
//! failure, binding mismatch, timeout) never surface here — the engine
//! absorbs them internally and falls back to a fresh session. Only
//! programmer errors and infrastructure errors are represented.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Raised by `SessionId::parse`. Never returned from `SessionEngine::start`,
    /// which handles invalid ids locally by creating a fresh session.
    #[error("invalid session id: {0}")]
    InvalidId(String),

    /// Raised by `CsrfToken::parse`. `is_csrf_token_valid` maps this to `false`
    /// rather than propagating it.
    #[error("invalid csrf token: {0}")]
    InvalidToken(String),

    /// AEAD authentication or base64 framing failure. Carries no detail by
    /// design — distinguishing failure modes here would be a decryption
    /// oracle.
    #[error("envelope decryption failed")]
    Decrypt,

    /// A `Store` implementation reported a failure. Surfaced to the caller
    /// of `start`/`commit` rather than absorbed, since the application may
    /// want to fail the request.
    #[error("session store error: {0}")]
    StoreIo(String),

    /// An operation other than `start` was called before the engine was
    /// initialized. Programmer error.
    #[error("session engine used before start()")]
    NotStarted,

    /// Raised eagerly by constructors: bad key length, inconsistent
    /// timeouts, unknown cipher.
    #[error("invalid engine configuration: {0}")]
    Config(String),
}
