//! The session lifecycle state machine — the engine's centerpiece.
//!
//! Orchestrates `start`/`get`/`set`/`remove`/`clear`/`regenerateId`/`destroy`/
//! `commit` and the CSRF operations over a `Store` and an optional
//! `Envelope`. One instance is bound to exactly one request; see the module
//! docs on `Store` for the concurrency contract this relies on.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

use crate::config::EngineConfig;
use crate::cookie::CookieEmitter;
use crate::csrf::CsrfToken;
use crate::envelope::Envelope;
use crate::error::{EngineError, Result};
use crate::fingerprint::{self, RequestMeta};
use crate::session_id::SessionId;
use crate::state::{
    is_reserved_key, SessionState, SessionStatus, RESERVED_CREATED_AT, RESERVED_CSRF_TOKEN,
    RESERVED_IP_HASH, RESERVED_LAST_ACTIVITY_AT, RESERVED_USER_AGENT,
};
use crate::store::Store;

/// Reads a single cookie value out of a raw `Cookie` header. Linear scan over
/// `;`-separated pairs — cookie headers are small and this runs once per
/// request.
pub fn extract_cookie_value<'a>(cookie_header: Option<&'a str>, name: &str) -> Option<&'a str> {
    let header = cookie_header?;
    header.split(';').find_map(|pair| {
        let mut parts = pair.trim().splitn(2, '=');
        let key = parts.next()?.trim();
        let value = parts.next()?.trim();
        if key == name {
            Some(value)
        } else {
            None
        }
    })
}

/// Bound to one request. Holds the current `SessionState` plus the metadata
/// fields that live outside the user-visible data map (CSRF hash, binding
/// fingerprints) — see spec's reserved-key note in the data model: these are
/// stripped from `data` the moment a `SessionState` is constructed, so the
/// engine tracks them itself instead.
pub struct SessionEngine {
    config: Arc<EngineConfig>,
    store: Arc<dyn Store>,
    envelope: Option<Arc<Envelope>>,
    initialized: bool,
    state: Option<SessionState>,
    csrf_token_hash: Option<String>,
    bound_user_agent: Option<String>,
    bound_ip_hash: Option<String>,
    request_user_agent: Option<String>,
    request_ip_hash: Option<String>,
}

impl SessionEngine {
    /// Validates `config` eagerly (`ERR_CONFIG`) and builds the envelope, if
    /// any, once up front rather than per operation.
    pub fn new(config: Arc<EngineConfig>, store: Arc<dyn Store>) -> Result<Self> {
        config.validate()?;
        let envelope = match config.encryption_key_bytes()? {
            Some(key) => Some(Arc::new(Envelope::new(&key)?)),
            None => None,
        };
        Ok(Self {
            config,
            store,
            envelope,
            initialized: false,
            state: None,
            csrf_token_hash: None,
            bound_user_agent: None,
            bound_ip_hash: None,
            request_user_agent: None,
            request_ip_hash: None,
        })
    }

    fn ensure_started(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(EngineError::NotStarted)
        }
    }

    /// Ordered, deterministic per §4.7.1. Idempotent: a second call against
    /// an already-started engine returns the current state unchanged.
    pub fn start(&mut self, request: &RequestMeta, cookie_value: Option<&str>) -> Result<SessionState> {
        if self.initialized {
            return Ok(self.state.clone().expect("initialized implies a state"));
        }

        let now = Utc::now();
        let ip = fingerprint::client_ip(request);
        self.request_ip_hash = Some(fingerprint::ip_hash(&ip));
        self.request_user_agent = request.user_agent.map(str::to_string);

        let raw = match cookie_value {
            Some(v) => v,
            None => return Ok(self.create_fresh(now)),
        };
        let id = match SessionId::parse(raw) {
            Ok(id) => id,
            Err(_) => return Ok(self.create_fresh(now)),
        };
        let payload = match self.store.read(&id) {
            Some(p) => p,
            None => return Ok(self.create_fresh(now)),
        };

        let plaintext = match &self.envelope {
            Some(env) => match env.decrypt(&payload) {
                Ok(p) => p,
                Err(_) => {
                    tracing::warn!("session payload failed to decrypt, destroying and issuing a fresh session");
                    self.store.destroy(&id);
                    return Ok(self.create_fresh(now));
                }
            },
            None => payload,
        };

        let mut map = match serde_json::from_slice::<Value>(&plaintext) {
            Ok(Value::Object(m)) => m,
            _ => {
                tracing::warn!("session payload was corrupt, destroying and issuing a fresh session");
                self.store.destroy(&id);
                return Ok(self.create_fresh(now));
            }
        };

        let created_at = parse_reserved_instant(&mut map, RESERVED_CREATED_AT).unwrap_or(now);
        let last_activity_at =
            parse_reserved_instant(&mut map, RESERVED_LAST_ACTIVITY_AT).unwrap_or(now);

        if (now - last_activity_at).num_seconds() > self.config.idle_timeout_seconds as i64 {
            tracing::warn!("session idle timeout exceeded, destroying and issuing a fresh session");
            self.store.destroy(&id);
            return Ok(self.create_fresh(now));
        }
        if (now - created_at).num_seconds() > self.config.absolute_timeout_seconds as i64 {
            tracing::warn!("session absolute timeout exceeded, destroying and issuing a fresh session");
            self.store.destroy(&id);
            return Ok(self.create_fresh(now));
        }

        let stored_csrf_hash = take_reserved_string(&mut map, RESERVED_CSRF_TOKEN);
        let stored_user_agent = take_reserved_string(&mut map, RESERVED_USER_AGENT);
        let stored_ip_hash = take_reserved_string(&mut map, RESERVED_IP_HASH);

        if self.config.bind_to_user_agent {
            if let Some(stored) = &stored_user_agent {
                let current = self.request_user_agent.as_deref().unwrap_or("");
                if !fingerprint::constant_time_eq(stored, current) {
                    tracing::warn!("user-agent binding mismatch on resume, treating as possible hijack");
                    self.store.destroy(&id);
                    return Ok(self.create_fresh(now));
                }
            }
        }
        if self.config.bind_to_ip {
            if let Some(stored) = &stored_ip_hash {
                let current = self.request_ip_hash.as_deref().unwrap_or("");
                if !fingerprint::constant_time_eq(stored, current) {
                    tracing::warn!("ip binding mismatch on resume, treating as possible hijack");
                    self.store.destroy(&id);
                    return Ok(self.create_fresh(now));
                }
            }
        }

        let data: HashMap<String, Value> = map.into_iter().collect();
        let state = SessionState::new(id, data, created_at, now);

        tracing::debug!(session_id = %state.id(), "resumed session");
        self.csrf_token_hash = stored_csrf_hash;
        self.bound_user_agent = stored_user_agent;
        self.bound_ip_hash = stored_ip_hash;
        self.state = Some(state.clone());
        self.initialized = true;
        Ok(state)
    }

    fn create_fresh(&mut self, now: DateTime<Utc>) -> SessionState {
        let state = SessionState::new(SessionId::generate(), HashMap::new(), now, now);
        tracing::debug!(session_id = %state.id(), "created fresh session");
        self.csrf_token_hash = None;
        self.bound_user_agent = None;
        self.bound_ip_hash = None;
        self.state = Some(state.clone());
        self.initialized = true;
        state
    }

    fn current(&self) -> &SessionState {
        self.state.as_ref().expect("ensure_started was checked")
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        self.ensure_started()?;
        Ok(self.current().get(key).cloned())
    }

    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        self.ensure_started()?;
        if is_reserved_key(key) {
            return Err(EngineError::Config(format!(
                "key '{key}' is reserved for internal metadata"
            )));
        }
        let state = self.state.take().expect("ensure_started was checked");
        self.state = Some(state.with_set(key.to_string(), value));
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Result<()> {
        self.ensure_started()?;
        let state = self.state.take().expect("ensure_started was checked");
        self.state = Some(state.with_removed(key));
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.ensure_started()?;
        let state = self.state.take().expect("ensure_started was checked");
        self.state = Some(state.with_cleared());
        Ok(())
    }

    /// Preserves data, rotates the id, and writes both ids immediately
    /// rather than waiting for `commit` — see §4.7.3. After this call the
    /// state is marked clean again so a plain `commit()` afterward performs
    /// no further write; any mutation made between `regenerateId` and
    /// `commit` re-dirties it as usual.
    pub fn regenerate_id(&mut self) -> Result<()> {
        self.ensure_started()?;
        let old_state = self.state.take().expect("ensure_started was checked");
        let old_id = old_state.id().clone();
        let new_id = SessionId::generate();
        let new_state = old_state.regenerated(new_id.clone());

        let payload = self.serialize_payload(&new_state);
        let stored = self.maybe_encrypt(&payload);

        if !self
            .store
            .write(&new_id, &stored, self.config.absolute_timeout_seconds)
        {
            return Err(EngineError::StoreIo(
                "store.write failed while rotating to the new session id".into(),
            ));
        }
        // Per the open question on grace-window semantics: the old id is
        // rewritten with the *new* id's payload, not a copy of its own prior
        // bytes. Both ids resolve to identical data for the grace window.
        self.store
            .write(&old_id, &stored, self.config.grace_seconds);

        tracing::info!(old_session_id = %old_id, new_session_id = %new_id, "regenerated session id");
        self.state = Some(new_state.with_clean());
        Ok(())
    }

    /// Deletes the store entry and transitions to `DESTROYED`. Subsequent
    /// `get` calls return `None`; `commit` will emit an expiring cookie and
    /// perform no additional write.
    pub fn destroy(&mut self) -> Result<()> {
        self.ensure_started()?;
        let id = self.current().id().clone();
        self.store.destroy(&id);
        tracing::info!(session_id = %id, "destroyed session");
        let state = self.state.take().expect("ensure_started was checked");
        self.state = Some(state.destroyed());
        Ok(())
    }

    /// Writes the current state if dirty and not destroyed, then asks
    /// `emitter` for the `Set-Cookie` value the caller should attach to its
    /// response. Returning the header value rather than mutating a response
    /// type directly keeps the engine free of any HTTP framework dependency.
    pub fn commit(&mut self, emitter: &CookieEmitter) -> Result<Option<String>> {
        self.ensure_started()?;
        let state = self.current().clone();

        if state.is_dirty() && state.status() != SessionStatus::Destroyed {
            if self.config.bind_to_user_agent && self.bound_user_agent.is_none() {
                self.bound_user_agent = self.request_user_agent.clone();
            }
            if self.config.bind_to_ip && self.bound_ip_hash.is_none() {
                self.bound_ip_hash = self.request_ip_hash.clone();
            }

            let payload = self.serialize_payload(&state);
            let stored = self.maybe_encrypt(&payload);
            let ttl = remaining_ttl(&state, self.config.absolute_timeout_seconds);

            if !self.store.write(state.id(), &stored, ttl) {
                return Err(EngineError::StoreIo(
                    "store.write failed while committing session state".into(),
                ));
            }
            self.state = Some(state.with_clean());
        }

        Ok(emitter.emit(self.current()))
    }

    /// Creates a fresh CSRF token, stores only its hash, and dirties the
    /// state. The raw token is never persisted.
    pub fn generate_csrf_token(&mut self) -> Result<CsrfToken> {
        self.ensure_started()?;
        let token = CsrfToken::generate();
        self.csrf_token_hash = Some(token.hash());
        let state = self.state.take().expect("ensure_started was checked");
        self.state = Some(state.with_dirty());
        Ok(token)
    }

    /// `false` for an absent stored hash or a malformed `submitted` value —
    /// never an error, so callers can treat this as a plain boolean gate.
    pub fn is_csrf_token_valid(&self, submitted: &str) -> Result<bool> {
        self.ensure_started()?;
        let stored_hash = match &self.csrf_token_hash {
            Some(h) => h,
            None => return Ok(false),
        };
        match CsrfToken::parse(submitted) {
            Ok(token) => Ok(token.equals_hashed(stored_hash)),
            Err(_) => Ok(false),
        }
    }

    fn serialize_payload(&self, state: &SessionState) -> Vec<u8> {
        let mut map = serde_json::Map::with_capacity(state.data().len() + 5);
        for (k, v) in state.data() {
            map.insert(k.clone(), v.clone());
        }
        map.insert(
            RESERVED_CREATED_AT.to_string(),
            Value::String(state.created_at().to_rfc3339()),
        );
        map.insert(
            RESERVED_LAST_ACTIVITY_AT.to_string(),
            Value::String(state.last_activity_at().to_rfc3339()),
        );
        if let Some(hash) = &self.csrf_token_hash {
            map.insert(RESERVED_CSRF_TOKEN.to_string(), Value::String(hash.clone()));
        }
        if let Some(ua) = &self.bound_user_agent {
            map.insert(RESERVED_USER_AGENT.to_string(), Value::String(ua.clone()));
        }
        if let Some(hash) = &self.bound_ip_hash {
            map.insert(RESERVED_IP_HASH.to_string(), Value::String(hash.clone()));
        }
        serde_json::to_vec(&Value::Object(map)).expect("a session payload is always serializable")
    }

    fn maybe_encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        match &self.envelope {
            Some(env) => env.encrypt(plaintext),
            None => plaintext.to_vec(),
        }
    }
}

fn remaining_ttl(state: &SessionState, absolute_timeout_seconds: u64) -> u64 {
    let elapsed = (Utc::now() - state.created_at()).num_seconds().max(0) as u64;
    absolute_timeout_seconds.saturating_sub(elapsed)
}

fn parse_reserved_instant(
    map: &mut serde_json::Map<String, Value>,
    key: &str,
) -> Option<DateTime<Utc>> {
    map.remove(key)
        .and_then(|v| v.as_str().map(str::to_string))
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn take_reserved_string(map: &mut serde_json::Map<String, Value>, key: &str) -> Option<String> {
    map.remove(key).and_then(|v| v.as_str().map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CookieConfig;
    use crate::store::MemoryStore;

    fn engine(config: EngineConfig) -> SessionEngine {
        SessionEngine::new(Arc::new(config), Arc::new(MemoryStore::new())).unwrap()
    }

    fn meta<'a>(user_agent: Option<&'a str>) -> RequestMeta<'a> {
        RequestMeta {
            forwarded_for: None,
            client_ip_header: None,
            real_ip_header: None,
            peer_addr: Some("203.0.113.9"),
            user_agent,
        }
    }

    fn emitter() -> CookieEmitter {
        CookieEmitter::new(&CookieConfig::default())
    }

    #[test]
    fn fresh_on_missing_cookie() {
        let mut engine = engine(EngineConfig::default());
        let state = engine.start(&meta(Some("ua")), None).unwrap();
        assert_eq!(state.status(), SessionStatus::Active);
        assert!(state.data().is_empty());
    }

    #[test]
    fn fresh_on_invalid_cookie() {
        let mut engine = engine(EngineConfig::default());
        let state = engine.start(&meta(Some("ua")), Some("not-a-uuid")).unwrap();
        assert_eq!(state.status(), SessionStatus::Active);
    }

    #[test]
    fn start_is_idempotent() {
        let mut engine = engine(EngineConfig::default());
        let first = engine.start(&meta(Some("ua")), None).unwrap();
        let second = engine.start(&meta(Some("ua")), None).unwrap();
        assert_eq!(first.id(), second.id());
    }

    #[test]
    fn ops_before_start_fail_not_started() {
        let engine = engine(EngineConfig::default());
        assert!(matches!(engine.get("x"), Err(EngineError::NotStarted)));
    }

    #[test]
    fn no_write_on_read_only_request() {
        let store = Arc::new(MemoryStore::new());
        let mut engine = SessionEngine::new(Arc::new(EngineConfig::default()), store.clone()).unwrap();
        let state = engine.start(&meta(Some("ua")), None).unwrap();
        engine.get("anything").unwrap();
        engine.commit(&emitter()).unwrap();
        assert!(store.read(state.id()).is_none());
    }

    // S1 — fresh session lifecycle round-trips across two engine instances
    // sharing one store.
    #[test]
    fn s1_fresh_session_round_trips_through_store() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let config = Arc::new(EngineConfig::default());

        let mut first = SessionEngine::new(config.clone(), store.clone()).unwrap();
        first.start(&meta(Some("ua")), None).unwrap();
        first.set("u", Value::from(42)).unwrap();
        let cookie = first.commit(&emitter()).unwrap().unwrap();
        assert!(cookie.contains("Secure"));

        let id = first.current_id_for_test();

        let mut second = SessionEngine::new(config, store).unwrap();
        second.start(&meta(Some("ua")), Some(id.as_str())).unwrap();
        assert_eq!(second.get("u").unwrap(), Some(Value::from(42)));
    }

    // S2 — idle expiry destroys and replaces.
    #[test]
    fn s2_idle_expiry_replaces_session() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let config = Arc::new(EngineConfig {
            idle_timeout_seconds: 1,
            ..EngineConfig::default()
        });

        let mut first = SessionEngine::new(config.clone(), store.clone()).unwrap();
        first.start(&meta(Some("ua")), None).unwrap();
        first.set("u", Value::from(1)).unwrap();
        first.commit(&emitter()).unwrap();
        let old_id = first.current_id_for_test();

        std::thread::sleep(std::time::Duration::from_millis(1100));

        let mut second = SessionEngine::new(config, store.clone()).unwrap();
        let state = second
            .start(&meta(Some("ua")), Some(old_id.as_str()))
            .unwrap();
        assert_ne!(state.id(), &old_id);
        assert!(store.read(&old_id).is_none());
    }

    // S3 — hijack mismatch on User-Agent destroys the session.
    #[test]
    fn s3_user_agent_mismatch_destroys_session() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let config = Arc::new(EngineConfig::default());

        let mut first = SessionEngine::new(config.clone(), store.clone()).unwrap();
        first.start(&meta(Some("Mozilla/5.0 A")), None).unwrap();
        first.set("u", Value::from(1)).unwrap();
        first.commit(&emitter()).unwrap();
        let old_id = first.current_id_for_test();

        let mut second = SessionEngine::new(config, store.clone()).unwrap();
        let state = second
            .start(&meta(Some("Mozilla/5.0 B")), Some(old_id.as_str()))
            .unwrap();
        assert_ne!(state.id(), &old_id);
        assert!(state.data().is_empty());
        assert!(store.read(&old_id).is_none());
    }

    // S4 — regenerate grace: both old and new ids decrypt to the same data
    // immediately after regenerateId, before any further mutation.
    #[test]
    fn s4_regenerate_keeps_both_ids_readable_during_grace() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let config = Arc::new(EngineConfig::default());

        let mut engine = SessionEngine::new(config.clone(), store.clone()).unwrap();
        engine.start(&meta(Some("ua")), None).unwrap();
        engine.set("u", Value::from(1)).unwrap();
        engine.commit(&emitter()).unwrap();
        let old_id = engine.current_id_for_test();

        engine.regenerate_id().unwrap();
        let new_id = engine.current_id_for_test();
        let cookie = engine.commit(&emitter()).unwrap().unwrap();
        assert!(cookie.contains(new_id.as_str()));

        assert!(store.read(&old_id).is_some());
        assert!(store.read(&new_id).is_some());
        assert_ne!(old_id, new_id);

        let mut reader = SessionEngine::new(config, store).unwrap();
        let state = reader
            .start(&meta(Some("ua")), Some(new_id.as_str()))
            .unwrap();
        assert_eq!(state.get("u"), Some(&Value::from(1)));
    }

    // S5 — CSRF round-trip; a new token invalidates the previous one.
    #[test]
    fn s5_csrf_round_trip_and_rotation() {
        let mut engine = engine(EngineConfig::default());
        engine.start(&meta(Some("ua")), None).unwrap();
        let t1 = engine.generate_csrf_token().unwrap();
        assert!(engine.is_csrf_token_valid(t1.raw()).unwrap());

        let t2 = engine.generate_csrf_token().unwrap();
        assert!(!engine.is_csrf_token_valid(t1.raw()).unwrap());
        assert!(engine.is_csrf_token_valid(t2.raw()).unwrap());
    }

    // S6 — destroy emits an expiring cookie and removes the store entry.
    #[test]
    fn s6_destroy_emits_expiring_cookie() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let mut engine = SessionEngine::new(Arc::new(EngineConfig::default()), store.clone()).unwrap();
        engine.start(&meta(Some("ua")), None).unwrap();
        engine.set("u", Value::from(1)).unwrap();
        engine.commit(&emitter()).unwrap();
        let id = engine.current_id_for_test();

        engine.destroy().unwrap();
        let cookie = engine.commit(&emitter()).unwrap().unwrap();
        assert!(cookie.contains("Max-Age=0"));
        assert!(cookie.contains("Expires=Thu, 01 Jan 1970 00:00:00 GMT"));
        assert!(store.read(&id).is_none());
    }

    #[test]
    fn set_rejects_reserved_key() {
        let mut engine = engine(EngineConfig::default());
        engine.start(&meta(Some("ua")), None).unwrap();
        assert!(matches!(
            engine.set("_created_at", Value::from(1)),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn envelope_round_trips_session_payload() {
        let config = Arc::new(EngineConfig {
            encryption_key: Some(base64_key()),
            ..EngineConfig::default()
        });
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

        let mut first = SessionEngine::new(config.clone(), store.clone()).unwrap();
        first.start(&meta(Some("ua")), None).unwrap();
        first.set("secret", Value::from("value")).unwrap();
        first.commit(&emitter()).unwrap();
        let id = first.current_id_for_test();

        let mut second = SessionEngine::new(config, store).unwrap();
        second.start(&meta(Some("ua")), Some(id.as_str())).unwrap();
        assert_eq!(second.get("secret").unwrap(), Some(Value::from("value")));
    }

    fn base64_key() -> String {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.encode([9u8; 32])
    }

    impl SessionEngine {
        /// Test-only accessor for the current session id.
        fn current_id_for_test(&self) -> SessionId {
            self.current().id().clone()
        }
    }

    #[test]
    fn extract_cookie_value_finds_named_pair_among_several() {
        let header = "a=1; __Host-id=abc-def; b=2";
        assert_eq!(
            extract_cookie_value(Some(header), "__Host-id"),
            Some("abc-def")
        );
    }

    #[test]
    fn extract_cookie_value_absent_header_or_name() {
        assert_eq!(extract_cookie_value(None, "id"), None);
        assert_eq!(extract_cookie_value(Some("a=1"), "id"), None);
    }
}
