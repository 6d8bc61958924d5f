//! The repository (C4): a narrow CRUD interface over users, sessions,
//! rooms, members, messages, and the nonce ledger (C3). The core consumes
//! this trait rather than a concrete SQL engine.

use crate::error::RepoError;
use crate::models::{MemberView, MessageView, Room, Session, User};

pub trait Repository: Send + Sync {
    // ── Users ──────────────────────────────────────────────────────────
    fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepoError>;
    fn find_user_by_user_id(&self, user_id: &str) -> Result<Option<User>, RepoError>;
    /// Looks a user up by surrogate primary key — used when a handler
    /// already holds a `user_pk` (session binding, membership row) and
    /// needs the full row.
    fn find_user_by_pk(&self, user_pk: i64) -> Result<Option<User>, RepoError>;
    /// Auto-provisions a user with no password, non-admin, per LOGIN semantics.
    fn insert_user(&self, email: &str, name: &str) -> Result<User, RepoError>;
    fn touch_user(&self, user_pk: i64) -> Result<(), RepoError>;

    // ── Sessions ───────────────────────────────────────────────────────
    fn insert_session(&self, session_id: &str, session_key_hex: &str) -> Result<Session, RepoError>;
    fn find_session_by_session_id(&self, session_id: &str) -> Result<Option<Session>, RepoError>;
    fn bind_session_user(&self, session_id: &str, user_pk: i64) -> Result<(), RepoError>;
    fn clear_session_user(&self, session_id: &str) -> Result<(), RepoError>;
    fn touch_session(&self, session_id: &str, timestamp: i64) -> Result<(), RepoError>;
    /// Deletes sessions whose `last_active_at` is older than `threshold`
    /// (a unix timestamp).
    fn purge_stale_sessions(&self, threshold: i64) -> Result<(), RepoError>;

    // ── Nonce ledger (C3) ──────────────────────────────────────────────
    fn nonce_seen(&self, session_pk: i64, nonce_hex: &str) -> Result<bool, RepoError>;
    fn insert_nonce(&self, session_pk: i64, nonce_hex: &str) -> Result<(), RepoError>;

    // ── Rooms ──────────────────────────────────────────────────────────
    fn find_room_by_name(&self, name: &str) -> Result<Option<Room>, RepoError>;
    fn find_room_by_room_id(&self, room_id: &str) -> Result<Option<Room>, RepoError>;
    fn insert_room(&self, name: &str) -> Result<Room, RepoError>;
    fn delete_room(&self, room_pk: i64) -> Result<(), RepoError>;
    fn touch_room(&self, room_pk: i64) -> Result<(), RepoError>;
    fn list_rooms(&self) -> Result<Vec<Room>, RepoError>;
    /// Most recently active room a user is a member of, if any.
    fn find_active_room_for_user(&self, user_pk: i64) -> Result<Option<Room>, RepoError>;

    // ── Membership ─────────────────────────────────────────────────────
    fn is_member(&self, room_pk: i64, user_pk: i64) -> Result<bool, RepoError>;
    fn insert_member(&self, room_pk: i64, user_pk: i64, is_admin: bool) -> Result<(), RepoError>;
    fn remove_member(&self, room_pk: i64, user_pk: i64) -> Result<(), RepoError>;
    /// User *primary keys* of every remaining member of a room.
    fn member_user_pks(&self, room_pk: i64) -> Result<Vec<i64>, RepoError>;
    fn list_members(&self, room_pk: i64) -> Result<Vec<MemberView>, RepoError>;

    // ── Messages ───────────────────────────────────────────────────────
    fn insert_message(
        &self,
        room_pk: i64,
        user_pk: i64,
        content: &str,
        is_announcement: bool,
    ) -> Result<MessageView, RepoError>;
    /// Up to `limit` most recent messages, returned **oldest-first**
    /// (normalized here so every caller — LIST_MESSAGES and AI_MESSAGE
    /// context alike — sees a consistent chronological order).
    fn last_messages(&self, room_id: &str, limit: i64) -> Result<Vec<MessageView>, RepoError>;
}
