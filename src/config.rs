//! Engine configuration — timeouts, binding policy, cookie policy, key material.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Configuration for one `SessionEngine`. Immutable after construction and
/// safe to share across threads via `Arc`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
    #[serde(default = "default_absolute_timeout")]
    pub absolute_timeout_seconds: u64,
    #[serde(default = "default_true")]
    pub bind_to_ip: bool,
    #[serde(default = "default_true")]
    pub bind_to_user_agent: bool,
    /// Base64-encoded key, if the envelope is enabled.
    #[serde(default)]
    pub encryption_key: Option<String>,
    #[serde(default = "default_grace_seconds")]
    pub grace_seconds: u64,
    #[serde(default)]
    pub cookie: CookieConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CookieConfig {
    #[serde(default = "default_cookie_name")]
    pub name: String,
    #[serde(default = "default_true")]
    pub secure: bool,
    #[serde(default = "default_true")]
    pub http_only: bool,
    #[serde(default)]
    pub same_site: SameSite,
    #[serde(default = "default_path")]
    pub path: String,
    /// `None` means a session cookie (no `Max-Age`).
    #[serde(default)]
    pub lifetime_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "PascalCase")]
pub enum SameSite {
    #[default]
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

fn default_idle_timeout() -> u64 {
    1800
}

fn default_absolute_timeout() -> u64 {
    14400
}

fn default_grace_seconds() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_cookie_name() -> String {
    "__Host-id".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: default_cookie_name(),
            secure: true,
            http_only: true,
            same_site: SameSite::default(),
            path: default_path(),
            lifetime_seconds: None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: default_idle_timeout(),
            absolute_timeout_seconds: default_absolute_timeout(),
            bind_to_ip: true,
            bind_to_user_agent: true,
            encryption_key: None,
            grace_seconds: default_grace_seconds(),
            cookie: CookieConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Validate the knob invariants spec.md §6 requires: the key, if
    /// present, must decode to at least 32 bytes, and idle timeout must not
    /// exceed absolute timeout.
    pub fn validate(&self) -> Result<()> {
        if self.idle_timeout_seconds > self.absolute_timeout_seconds {
            return Err(EngineError::Config(
                "idle_timeout_seconds must be <= absolute_timeout_seconds".into(),
            ));
        }
        if let Some(bytes) = self.encryption_key_bytes()? {
            if bytes.len() < 32 {
                return Err(EngineError::Config(
                    "encryption_key must decode to at least 32 bytes".into(),
                ));
            }
        }
        Ok(())
    }

    /// Decode the configured key, if any.
    pub fn encryption_key_bytes(&self) -> Result<Option<Vec<u8>>> {
        use base64::Engine as _;
        match &self.encryption_key {
            None => Ok(None),
            Some(key) => {
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(key)
                    .map_err(|e| EngineError::Config(format!("encryption_key is not base64: {e}")))?;
                Ok(Some(decoded))
            }
        }
    }

    /// Load configuration from `config/sessionguard.toml` (if present) plus
    /// `SESSIONGUARD__*` environment overrides, file source layered under
    /// environment overrides via `config::Config`. Not on any required call
    /// path — `EngineConfig::default()` is always valid — but offered for
    /// deployments that want file/env-driven tuning of timeouts and cookie
    /// policy.
    pub fn load() -> std::result::Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/sessionguard").required(false))
            .add_source(config::Environment::with_prefix("SESSIONGUARD").separator("__"));

        let merged = builder.build()?;
        merged.try_deserialize()
    }
}
