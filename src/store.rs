//! Backing store contract and a reference in-memory implementation.
//!
//! The store is an external collaborator per spec.md §1 — the engine only
//! depends on this trait. `MemoryStore` exists so the engine is testable
//! and demo-able without wiring up Redis, Postgres, or any other real
//! backing store.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::session_id::SessionId;

/// `(SessionId -> bytes)` with TTL. All operations are synchronous — the
/// engine holds no lock of its own and blocks only inside these calls.
/// Implementations must be safe for concurrent use by separate engine
/// instances; the engine provides no mutual exclusion itself.
pub trait Store: Send + Sync {
    /// Most recent payload for `id`, or `None` if absent or expired.
    fn read(&self, id: &SessionId) -> Option<Vec<u8>>;

    /// Overwrites any prior payload. `ttl_seconds` is relative, counted from
    /// this call. Must not silently truncate `bytes`.
    fn write(&self, id: &SessionId, bytes: &[u8], ttl_seconds: u64) -> bool;

    /// Removes the payload. Returns `true` whether or not it existed.
    fn destroy(&self, id: &SessionId) -> bool;

    /// Hint to purge entries older than `max_ttl_seconds`. A no-op is
    /// acceptable for stores with native TTL support.
    fn gc(&self, max_ttl_seconds: u64) -> bool;
}

struct Entry {
    bytes: Vec<u8>,
    expires_at: Instant,
}

/// `std::sync::RwLock<HashMap<..>>`-backed store: reads take a shared lock,
/// writes/destroys take an exclusive lock, and every entry carries its own
/// expiry so a read past TTL returns `None` without a background sweep
/// being required for correctness.
pub struct MemoryStore {
    entries: RwLock<HashMap<SessionId, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Start a background task that periodically calls `gc`. Optional
    /// convenience, not required for correctness since `read` already
    /// enforces TTL lazily.
    pub fn start_cleanup_task(self: std::sync::Arc<Self>, interval_secs: u64) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                let before = self.entries.read().expect("store lock poisoned").len();
                self.entries
                    .write()
                    .expect("store lock poisoned")
                    .retain(|_, entry| entry.expires_at > Instant::now());
                let after = self.entries.read().expect("store lock poisoned").len();
                if before != after {
                    tracing::debug!(removed = before - after, "memory store cleanup");
                }
            }
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn read(&self, id: &SessionId) -> Option<Vec<u8>> {
        let entries = self.entries.read().expect("store lock poisoned");
        entries.get(id).and_then(|entry| {
            if entry.expires_at > Instant::now() {
                Some(entry.bytes.clone())
            } else {
                None
            }
        })
    }

    fn write(&self, id: &SessionId, bytes: &[u8], ttl_seconds: u64) -> bool {
        let mut entries = self.entries.write().expect("store lock poisoned");
        entries.insert(
            id.clone(),
            Entry {
                bytes: bytes.to_vec(),
                expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
            },
        );
        true
    }

    fn destroy(&self, id: &SessionId) -> bool {
        self.entries.write().expect("store lock poisoned").remove(id);
        true
    }

    fn gc(&self, _max_ttl_seconds: u64) -> bool {
        let now = Instant::now();
        self.entries
            .write()
            .expect("store lock poisoned")
            .retain(|_, entry| entry.expires_at > now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn write_then_read_round_trips() {
        let store = MemoryStore::new();
        let id = SessionId::generate();
        assert!(store.write(&id, b"payload", 60));
        assert_eq!(store.read(&id), Some(b"payload".to_vec()));
    }

    #[test]
    fn read_missing_returns_none() {
        let store = MemoryStore::new();
        let id = SessionId::generate();
        assert_eq!(store.read(&id), None);
    }

    #[test]
    fn destroy_removes_entry_and_is_idempotent() {
        let store = MemoryStore::new();
        let id = SessionId::generate();
        store.write(&id, b"x", 60);
        assert!(store.destroy(&id));
        assert_eq!(store.read(&id), None);
        assert!(store.destroy(&id));
    }

    #[test]
    fn write_overwrites_prior_payload() {
        let store = MemoryStore::new();
        let id = SessionId::generate();
        store.write(&id, b"first", 60);
        store.write(&id, b"second", 60);
        assert_eq!(store.read(&id), Some(b"second".to_vec()));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let store = MemoryStore::new();
        let id = SessionId::generate();
        store.write(&id, b"short lived", 0);
        sleep(Duration::from_millis(5));
        assert_eq!(store.read(&id), None);
    }

    #[test]
    fn does_not_truncate_bytes() {
        let store = MemoryStore::new();
        let id = SessionId::generate();
        let payload = vec![0xEFu8; 8192];
        store.write(&id, &payload, 60);
        assert_eq!(store.read(&id), Some(payload));
    }

    #[test]
    fn gc_purges_only_already_expired_entries() {
        let store = MemoryStore::new();
        let expired = SessionId::generate();
        let live = SessionId::generate();
        store.write(&expired, b"gone soon", 0);
        store.write(&live, b"still fresh", 60);
        sleep(Duration::from_millis(5));

        assert!(store.gc(60));

        assert_eq!(
            store.entries.read().expect("store lock poisoned").len(),
            1
        );
        assert_eq!(store.read(&live), Some(b"still fresh".to_vec()));
    }
}
