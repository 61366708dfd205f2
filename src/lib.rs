//! sessionguard: a security-policy session management engine.
//!
//! ## Architecture
//!
//! The engine is framework-agnostic — `config`, `error`, `session_id`,
//! `csrf`, `envelope`, `store`, `cookie`, `fingerprint`, `state`, and
//! `engine` depend on nothing but the standard library and a handful of
//! crypto/serialization crates. `middleware` is the one module that knows
//! about Axum, adapting `SessionEngine` to a request/response pipeline; a
//! deployment built on a different HTTP framework would replace only that
//! module.
//!
//! ## How It Works
//!
//! 1. `middleware::session_middleware` reads the session cookie (if any)
//!    off the incoming request and calls `SessionEngine::start`, which
//!    resumes, rejects, or freshly creates a `SessionState`.
//! 2. Handlers reach the engine via the `SessionHandle` extractor and call
//!    `get`/`set`/`remove`/`clear`/`regenerateId`/`destroy` and the CSRF
//!    operations.
//! 3. After the handler returns, the middleware calls `commit`, which
//!    persists dirty state through the `Store` (encrypting via `Envelope`
//!    if configured) and attaches the resulting `Set-Cookie` header.

pub mod config;
pub mod cookie;
pub mod csrf;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod middleware;
pub mod session_id;
pub mod state;
pub mod store;

pub use config::EngineConfig;
pub use cookie::CookieEmitter;
pub use csrf::CsrfToken;
pub use engine::SessionEngine;
pub use envelope::Envelope;
pub use error::{EngineError, Result};
pub use session_id::SessionId;
pub use state::{SessionState, SessionStatus};
pub use store::{MemoryStore, Store};
