//! Session table (C2) — the in-memory map of live sessions.
//!
//! Owns per session: the peer's socket address (never persisted), the
//! symmetric session key and repository row id (mirrored from the
//! repository so the hot path never needs a lookup-by-string round trip
//! to seal/open a packet or check the nonce ledger), and a `last_seen`
//! clock used by the sweeper. Mutation happens on the receive task; the
//! sweeper takes the table's entry lock only for the span of one eviction
//! pass — `DashMap` already shards that for us.

use std::net::SocketAddr;
use std::time::Instant;

use dashmap::DashMap;

use chat_core::crypto::SessionKey;

/// One live session's in-memory state.
#[derive(Clone)]
pub struct SessionEntry {
    pub session_id: String,
    /// Repository surrogate key for this session row — carried here so the
    /// nonce ledger check on every ingress packet doesn't need a lookup by
    /// `session_id` string first.
    pub session_pk: i64,
    pub peer_addr: SocketAddr,
    pub session_key: SessionKey,
    /// Bound user, mirrored from the repository row. `None` until LOGIN,
    /// MERGE_SESSION, or the like binds it.
    pub user_pk: Option<i64>,
    pub last_seen: Instant,
}

/// The session table (C2). Cheap to clone — it's an `Arc<DashMap<..>>`.
#[derive(Clone)]
pub struct SessionTable {
    inner: std::sync::Arc<DashMap<String, SessionEntry>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Arc::new(DashMap::new()),
        }
    }

    pub fn insert(&self, session_id: String, session_pk: i64, peer_addr: SocketAddr, session_key: SessionKey) {
        self.inner.insert(
            session_id.clone(),
            SessionEntry {
                session_id,
                session_pk,
                peer_addr,
                session_key,
                user_pk: None,
                last_seen: Instant::now(),
            },
        );
    }

    pub fn get(&self, session_id: &str) -> Option<SessionEntry> {
        self.inner.get(session_id).map(|e| e.clone())
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.inner.contains_key(session_id)
    }

    /// Refreshes `last_seen` to now, per the secure envelope's ingress step 3.
    pub fn touch(&self, session_id: &str) {
        if let Some(mut entry) = self.inner.get_mut(session_id) {
            entry.last_seen = Instant::now();
        }
    }

    pub fn bind_user(&self, session_id: &str, user_pk: i64) {
        if let Some(mut entry) = self.inner.get_mut(session_id) {
            entry.user_pk = Some(user_pk);
        }
    }

    pub fn clear_user(&self, session_id: &str) {
        if let Some(mut entry) = self.inner.get_mut(session_id) {
            entry.user_pk = None;
        }
    }

    pub fn remove(&self, session_id: &str) {
        self.inner.remove(session_id);
    }

    /// Every live session id — used by the broadcast gate when no explicit
    /// recipient set is given.
    pub fn all_session_ids(&self) -> Vec<String> {
        self.inner.iter().map(|e| e.session_id.clone()).collect()
    }

    /// Session ids of every live session bound to `user_pk`, used to fan
    /// out to a user's other connected devices (e.g. ROOM_LEFT).
    pub fn session_ids_for_user(&self, user_pk: i64) -> Vec<String> {
        self.inner
            .iter()
            .filter(|e| e.user_pk == Some(user_pk))
            .map(|e| e.session_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Evicts every entry whose `last_seen` is older than `timeout`. Returns
    /// the evicted session ids for logging.
    pub fn sweep_inactive(&self, timeout: std::time::Duration) -> Vec<String> {
        let now = Instant::now();
        let stale: Vec<String> = self
            .inner
            .iter()
            .filter(|e| now.duration_since(e.last_seen) > timeout)
            .map(|e| e.session_id.clone())
            .collect();
        for session_id in &stale {
            self.inner.remove(session_id);
        }
        stale
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn addr() -> SocketAddr {
        "127.0.0.1:9999".parse().unwrap()
    }

    #[test]
    fn insert_and_get_roundtrips() {
        let table = SessionTable::new();
        let key = SessionKey::generate();
        table.insert("s1".into(), 1, addr(), key.clone());
        let entry = table.get("s1").unwrap();
        assert_eq!(entry.session_id, "s1");
        assert_eq!(entry.user_pk, None);
    }

    #[test]
    fn bind_and_clear_user() {
        let table = SessionTable::new();
        table.insert("s1".into(), 1, addr(), SessionKey::generate());
        table.bind_user("s1", 42);
        assert_eq!(table.get("s1").unwrap().user_pk, Some(42));
        table.clear_user("s1");
        assert_eq!(table.get("s1").unwrap().user_pk, None);
    }

    #[test]
    fn session_ids_for_user_filters_by_binding() {
        let table = SessionTable::new();
        table.insert("a".into(), 1, addr(), SessionKey::generate());
        table.insert("b".into(), 2, addr(), SessionKey::generate());
        table.bind_user("a", 1);
        table.bind_user("b", 2);
        assert_eq!(table.session_ids_for_user(1), vec!["a".to_string()]);
    }

    #[test]
    fn sweep_inactive_evicts_only_stale_entries() {
        let table = SessionTable::new();
        table.insert("stale".into(), 1, addr(), SessionKey::generate());
        table.insert("fresh".into(), 2, addr(), SessionKey::generate());
        // Force "stale" to look old by waiting past a tiny timeout while
        // "fresh" is touched right before the sweep.
        std::thread::sleep(Duration::from_millis(5));
        table.touch("fresh");
        let evicted = table.sweep_inactive(Duration::from_millis(2));
        assert_eq!(evicted, vec!["stale".to_string()]);
        assert!(table.get("fresh").is_some());
        assert!(table.get("stale").is_none());
    }

    #[test]
    fn remove_drops_entry() {
        let table = SessionTable::new();
        table.insert("s1".into(), 1, addr(), SessionKey::generate());
        table.remove("s1");
        assert!(table.get("s1").is_none());
    }
}
