//! `Set-Cookie` header emission, with safety coercions for prefixed and
//! cross-site cookies applied once at construction.

use crate::config::{CookieConfig, SameSite};
use crate::state::{SessionState, SessionStatus};

/// Builds `Set-Cookie` header values for session state transitions. Holds
/// its own coerced copy of the configured policy rather than trusting the
/// caller's `CookieConfig` verbatim.
pub struct CookieEmitter {
    name: String,
    secure: bool,
    http_only: bool,
    same_site: SameSite,
    path: String,
    lifetime_seconds: Option<u64>,
}

impl CookieEmitter {
    /// Applies the two safety coercions from spec.md §4.5 regardless of
    /// what the caller configured:
    ///
    /// 1. A `__Host-` prefixed name forces `secure = true` and `path = "/"`
    ///    (and forbids a `Domain` attribute, which this emitter never sets).
    /// 2. `SameSite=None` forces `secure = true`.
    pub fn new(config: &CookieConfig) -> Self {
        let is_host_prefixed = config.name.starts_with("__Host-");

        let mut secure = config.secure;
        let mut path = config.path.clone();
        if is_host_prefixed {
            secure = true;
            path = "/".to_string();
        }
        if config.same_site == SameSite::None {
            secure = true;
        }

        Self {
            name: config.name.clone(),
            secure,
            http_only: config.http_only,
            same_site: config.same_site,
            path,
            lifetime_seconds: config.lifetime_seconds,
        }
    }

    /// `None` is never actually returned today — the engine always has a
    /// cookie to emit on commit — but the signature mirrors spec.md §4.5 so
    /// a future policy (e.g. "don't set a cookie for bots") has somewhere to
    /// hook in without changing the contract.
    pub fn emit(&self, state: &SessionState) -> Option<String> {
        Some(match state.status() {
            SessionStatus::Destroyed => self.emit_expiring(state),
            _ => self.emit_active(state),
        })
    }

    fn emit_active(&self, state: &SessionState) -> String {
        let mut out = format!(
            "{}={}; Path={}",
            self.name,
            urlencode(state.id().as_str()),
            self.path
        );
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out.push_str("; SameSite=");
        out.push_str(self.same_site.as_str());
        if let Some(lifetime) = self.lifetime_seconds {
            out.push_str("; Max-Age=");
            out.push_str(&lifetime.to_string());
        }
        out
    }

    fn emit_expiring(&self, state: &SessionState) -> String {
        let mut out = format!(
            "{}={}; Path={}; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=0",
            self.name,
            urlencode(state.id().as_str()),
            self.path
        );
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out.push_str("; SameSite=");
        out.push_str(self.same_site.as_str());
        out
    }
}

/// Session ids are already a restricted charset (hex + hyphen) so this is
/// mostly a formality, but it keeps the emitter correct if that invariant
/// ever loosens.
fn urlencode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_id::SessionId;
    use std::collections::HashMap;

    fn fresh_state() -> SessionState {
        let now = chrono::Utc::now();
        SessionState::new(SessionId::generate(), HashMap::new(), now, now)
    }

    #[test]
    fn host_prefix_forces_secure_and_root_path() {
        let config = CookieConfig {
            name: "__Host-id".to_string(),
            secure: false,
            http_only: true,
            same_site: SameSite::Strict,
            path: "/app".to_string(),
            lifetime_seconds: None,
        };
        let emitter = CookieEmitter::new(&config);
        let header = emitter.emit(&fresh_state()).unwrap();
        assert!(header.contains("Secure"));
        assert!(header.contains("Path=/"));
        assert!(!header.contains("Path=/app"));
    }

    #[test]
    fn same_site_none_forces_secure() {
        let config = CookieConfig {
            name: "sid".to_string(),
            secure: false,
            http_only: true,
            same_site: SameSite::None,
            path: "/".to_string(),
            lifetime_seconds: None,
        };
        let emitter = CookieEmitter::new(&config);
        let header = emitter.emit(&fresh_state()).unwrap();
        assert!(header.contains("Secure"));
        assert!(header.contains("SameSite=None"));
    }

    #[test]
    fn attribute_order_matches_contract() {
        let config = CookieConfig {
            name: "sid".to_string(),
            secure: true,
            http_only: true,
            same_site: SameSite::Lax,
            path: "/".to_string(),
            lifetime_seconds: Some(3600),
        };
        let emitter = CookieEmitter::new(&config);
        let header = emitter.emit(&fresh_state()).unwrap();
        let path_idx = header.find("Path=").unwrap();
        let secure_idx = header.find("Secure").unwrap();
        let http_only_idx = header.find("HttpOnly").unwrap();
        let same_site_idx = header.find("SameSite=").unwrap();
        let max_age_idx = header.find("Max-Age=").unwrap();
        assert!(path_idx < secure_idx);
        assert!(secure_idx < http_only_idx);
        assert!(http_only_idx < same_site_idx);
        assert!(same_site_idx < max_age_idx);
    }

    #[test]
    fn destroyed_state_emits_expiring_cookie() {
        let config = CookieConfig::default();
        let emitter = CookieEmitter::new(&config);
        let mut state = fresh_state();
        state = state.destroy();
        let header = emitter.emit(&state).unwrap();
        assert!(header.contains("Expires=Thu, 01 Jan 1970 00:00:00 GMT"));
        assert!(header.contains("Max-Age=0"));
    }

    #[test]
    fn session_cookie_omits_max_age_when_no_lifetime_configured() {
        let config = CookieConfig {
            lifetime_seconds: None,
            ..CookieConfig::default()
        };
        let emitter = CookieEmitter::new(&config);
        let header = emitter.emit(&fresh_state()).unwrap();
        assert!(!header.contains("Max-Age"));
    }
}
