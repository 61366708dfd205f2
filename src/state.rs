//! Immutable session state snapshot.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Keys reserved for internal metadata. Application code must not use these
/// — `SessionEngine::set`/`remove` reject them.
pub const RESERVED_CREATED_AT: &str = "_created_at";
pub const RESERVED_LAST_ACTIVITY_AT: &str = "_last_activity_at";
pub const RESERVED_CSRF_TOKEN: &str = "_csrf_token";
pub const RESERVED_USER_AGENT: &str = "_user_agent";
pub const RESERVED_IP_HASH: &str = "_ip_hash";

pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with('_')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    Regenerated,
    Destroyed,
}

/// A conceptually immutable record. Every mutation in `SessionEngine`
/// produces a new value via one of the `with_*` constructors below; the
/// prior instance is left untouched.
#[derive(Debug, Clone)]
pub struct SessionState {
    id: crate::session_id::SessionId,
    data: HashMap<String, Value>,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    status: SessionStatus,
    dirty: bool,
}

impl SessionState {
    /// A brand-new, active, clean session snapshot.
    pub fn new(
        id: crate::session_id::SessionId,
        data: HashMap<String, Value>,
        created_at: DateTime<Utc>,
        last_activity_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            data,
            created_at,
            last_activity_at,
            status: SessionStatus::Active,
            dirty: false,
        }
    }

    pub fn id(&self) -> &crate::session_id::SessionId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Iterate the user-visible data (reserved keys are never present —
    /// they're stripped before a `SessionState` is ever constructed for a
    /// resumed session).
    pub fn data(&self) -> &HashMap<String, Value> {
        &self.data
    }

    pub fn with_set(&self, key: String, value: Value) -> Self {
        let mut data = self.data.clone();
        data.insert(key, value);
        Self {
            data,
            dirty: true,
            ..self.clone()
        }
    }

    pub fn with_removed(&self, key: &str) -> Self {
        let mut data = self.data.clone();
        let existed = data.remove(key).is_some();
        Self {
            data,
            dirty: self.dirty || existed,
            ..self.clone()
        }
    }

    pub fn with_cleared(&self) -> Self {
        Self {
            data: HashMap::new(),
            dirty: true,
            ..self.clone()
        }
    }

    /// Marks the state dirty without touching `data` — used when a mutation
    /// lives outside the data map (e.g. issuing a new CSRF token, whose hash
    /// is tracked by the engine rather than in `data`).
    pub fn with_dirty(&self) -> Self {
        Self {
            dirty: true,
            ..self.clone()
        }
    }

    pub fn with_refreshed_activity(&self, now: DateTime<Utc>) -> Self {
        Self {
            last_activity_at: now,
            ..self.clone()
        }
    }

    pub fn with_clean(&self) -> Self {
        Self {
            dirty: false,
            ..self.clone()
        }
    }

    pub fn regenerated(&self, new_id: crate::session_id::SessionId) -> Self {
        Self {
            id: new_id,
            status: SessionStatus::Regenerated,
            dirty: true,
            ..self.clone()
        }
    }

    pub fn destroyed(&self) -> Self {
        Self {
            data: HashMap::new(),
            status: SessionStatus::Destroyed,
            dirty: true,
            ..self.clone()
        }
    }

    /// Convenience alias used by tests and the cookie module's doctests.
    pub fn destroy(&self) -> Self {
        self.destroyed()
    }
}
