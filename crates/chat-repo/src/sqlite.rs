//! `rusqlite`-backed implementation of [`Repository`]. All calls run
//! against a single connection guarded by a mutex — SQLite connections are
//! not `Sync`-safe across threads, and the daemon's deferred-write
//! discipline (see `chatd::server`) ensures writes all originate from one
//! logical owner regardless.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::RepoError;
use crate::models::{unix_now, MemberView, MessageView, Room, Session, User};
use crate::repository::Repository;

pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    pub fn open(path: &Path) -> Result<Self, RepoError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, RepoError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    pub fn init_schema(&self) -> Result<(), RepoError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(include_str!("schema.sql"))
            .map_err(RepoError::SchemaInit)
    }

    fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            name: row.get("name")?,
            email: row.get("email")?,
            password: row.get("password")?,
            is_admin: row.get::<_, i64>("is_admin")? != 0,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            last_active_at: row.get("last_active_at")?,
        })
    }

    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
        Ok(Session {
            id: row.get("id")?,
            session_id: row.get("session_id")?,
            user_id: row.get("user_id")?,
            session_key: row.get("session_key")?,
            created_at: row.get("created_at")?,
            last_active_at: row.get("last_active_at")?,
        })
    }

    fn row_to_room(row: &rusqlite::Row) -> rusqlite::Result<Room> {
        Ok(Room {
            id: row.get("id")?,
            room_id: row.get("room_id")?,
            name: row.get("name")?,
            is_private: row.get::<_, i64>("is_private")? != 0,
            created_at: row.get("created_at")?,
            last_active_at: row.get("last_active_at")?,
        })
    }
}

impl Repository for SqliteRepository {
    fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepoError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT * FROM users WHERE email = ?1",
                params![email],
                Self::row_to_user,
            )
            .optional()?)
    }

    fn find_user_by_user_id(&self, user_id: &str) -> Result<Option<User>, RepoError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT * FROM users WHERE user_id = ?1",
                params![user_id],
                Self::row_to_user,
            )
            .optional()?)
    }

    fn find_user_by_pk(&self, user_pk: i64) -> Result<Option<User>, RepoError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT * FROM users WHERE id = ?1",
                params![user_pk],
                Self::row_to_user,
            )
            .optional()?)
    }

    fn insert_user(&self, email: &str, name: &str) -> Result<User, RepoError> {
        let conn = self.conn.lock().unwrap();
        let now = unix_now();
        let user_id = chat_core::crypto::generate_opaque_id();
        conn.execute(
            "INSERT INTO users (user_id, name, email, is_admin, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?4)",
            params![user_id, name, email, now],
        )?;
        let id = conn.last_insert_rowid();
        Ok(User {
            id,
            user_id,
            name: name.to_string(),
            email: email.to_string(),
            password: None,
            is_admin: false,
            created_at: now,
            updated_at: now,
            last_active_at: None,
        })
    }

    fn touch_user(&self, user_pk: i64) -> Result<(), RepoError> {
        let conn = self.conn.lock().unwrap();
        let now = unix_now();
        conn.execute(
            "UPDATE users SET last_active_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![now, user_pk],
        )?;
        Ok(())
    }

    fn insert_session(&self, session_id: &str, session_key_hex: &str) -> Result<Session, RepoError> {
        let conn = self.conn.lock().unwrap();
        let now = unix_now();
        conn.execute(
            "INSERT INTO sessions (session_id, session_key, created_at, last_active_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![session_id, session_key_hex, now],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Session {
            id,
            session_id: session_id.to_string(),
            user_id: None,
            session_key: Some(session_key_hex.to_string()),
            created_at: now,
            last_active_at: Some(now),
        })
    }

    fn find_session_by_session_id(&self, session_id: &str) -> Result<Option<Session>, RepoError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT * FROM sessions WHERE session_id = ?1",
                params![session_id],
                Self::row_to_session,
            )
            .optional()?)
    }

    fn bind_session_user(&self, session_id: &str, user_pk: i64) -> Result<(), RepoError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sessions SET user_id = ?1 WHERE session_id = ?2",
            params![user_pk, session_id],
        )?;
        Ok(())
    }

    fn clear_session_user(&self, session_id: &str) -> Result<(), RepoError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sessions SET user_id = NULL WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(())
    }

    fn touch_session(&self, session_id: &str, timestamp: i64) -> Result<(), RepoError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sessions SET last_active_at = ?1 WHERE session_id = ?2",
            params![timestamp, session_id],
        )?;
        Ok(())
    }

    fn purge_stale_sessions(&self, threshold: i64) -> Result<(), RepoError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM sessions WHERE last_active_at IS NOT NULL AND last_active_at < ?1",
            params![threshold],
        )?;
        Ok(())
    }

    fn nonce_seen(&self, session_pk: i64, nonce_hex: &str) -> Result<bool, RepoError> {
        let conn = self.conn.lock().unwrap();
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM nonces WHERE session_id = ?1 AND nonce = ?2",
                params![session_pk, nonce_hex],
                |row| row.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    fn insert_nonce(&self, session_pk: i64, nonce_hex: &str) -> Result<(), RepoError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO nonces (session_id, nonce) VALUES (?1, ?2)",
            params![session_pk, nonce_hex],
        )?;
        Ok(())
    }

    fn find_room_by_name(&self, name: &str) -> Result<Option<Room>, RepoError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT * FROM rooms WHERE name = ?1",
                params![name],
                Self::row_to_room,
            )
            .optional()?)
    }

    fn find_room_by_room_id(&self, room_id: &str) -> Result<Option<Room>, RepoError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT * FROM rooms WHERE room_id = ?1",
                params![room_id],
                Self::row_to_room,
            )
            .optional()?)
    }

    fn insert_room(&self, name: &str) -> Result<Room, RepoError> {
        let conn = self.conn.lock().unwrap();
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM rooms WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(RepoError::DuplicateRoomName(name.to_string()));
        }
        let now = unix_now();
        let room_id = chat_core::crypto::generate_opaque_id();
        conn.execute(
            "INSERT INTO rooms (room_id, name, is_private, created_at, last_active_at)
             VALUES (?1, ?2, 0, ?3, ?3)",
            params![room_id, name, now],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Room {
            id,
            room_id,
            name: name.to_string(),
            is_private: false,
            created_at: now,
            last_active_at: Some(now),
        })
    }

    fn delete_room(&self, room_pk: i64) -> Result<(), RepoError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM rooms WHERE id = ?1", params![room_pk])?;
        Ok(())
    }

    fn touch_room(&self, room_pk: i64) -> Result<(), RepoError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE rooms SET last_active_at = ?1 WHERE id = ?2",
            params![unix_now(), room_pk],
        )?;
        Ok(())
    }

    fn list_rooms(&self) -> Result<Vec<Room>, RepoError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM rooms ORDER BY name")?;
        let rows = stmt
            .query_map([], Self::row_to_room)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn find_active_room_for_user(&self, user_pk: i64) -> Result<Option<Room>, RepoError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT rooms.* FROM rooms
                 JOIN members ON rooms.id = members.room_id
                 WHERE members.user_id = ?1
                 ORDER BY rooms.last_active_at DESC
                 LIMIT 1",
                params![user_pk],
                Self::row_to_room,
            )
            .optional()?)
    }

    fn is_member(&self, room_pk: i64, user_pk: i64) -> Result<bool, RepoError> {
        let conn = self.conn.lock().unwrap();
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM members WHERE room_id = ?1 AND user_id = ?2",
                params![room_pk, user_pk],
                |row| row.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    fn insert_member(&self, room_pk: i64, user_pk: i64, is_admin: bool) -> Result<(), RepoError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO members (room_id, user_id, is_admin, joined_at) VALUES (?1, ?2, ?3, ?4)",
            params![room_pk, user_pk, is_admin as i64, unix_now()],
        )?;
        Ok(())
    }

    fn remove_member(&self, room_pk: i64, user_pk: i64) -> Result<(), RepoError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM members WHERE room_id = ?1 AND user_id = ?2",
            params![room_pk, user_pk],
        )?;
        Ok(())
    }

    fn member_user_pks(&self, room_pk: i64) -> Result<Vec<i64>, RepoError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT user_id FROM members WHERE room_id = ?1")?;
        let rows = stmt
            .query_map(params![room_pk], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn list_members(&self, room_pk: i64) -> Result<Vec<MemberView>, RepoError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT users.user_id AS user_id, users.name AS name,
                    members.is_admin AS is_admin, members.joined_at AS joined_at
             FROM members
             JOIN users ON members.user_id = users.id
             WHERE members.room_id = ?1
             ORDER BY users.name",
        )?;
        let rows = stmt
            .query_map(params![room_pk], |row| {
                Ok(MemberView {
                    user_id: row.get("user_id")?,
                    name: row.get("name")?,
                    is_admin: row.get::<_, i64>("is_admin")? != 0,
                    joined_at: row.get("joined_at")?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn insert_message(
        &self,
        room_pk: i64,
        user_pk: i64,
        content: &str,
        is_announcement: bool,
    ) -> Result<MessageView, RepoError> {
        let conn = self.conn.lock().unwrap();
        let now = unix_now();
        conn.execute(
            "INSERT INTO messages (room_id, user_id, content, is_announcement, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![room_pk, user_pk, content, is_announcement as i64, now],
        )?;
        let id = conn.last_insert_rowid();
        let (room_id, sender_user_id, sender_name): (String, String, String) = conn.query_row(
            "SELECT rooms.room_id, users.user_id, users.name
             FROM rooms, users WHERE rooms.id = ?1 AND users.id = ?2",
            params![room_pk, user_pk],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(MessageView {
            id,
            room_id,
            sender_user_id,
            sender_name,
            content: content.to_string(),
            is_announcement,
            created_at: now,
        })
    }

    fn last_messages(&self, room_id: &str, limit: i64) -> Result<Vec<MessageView>, RepoError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT messages.id AS id, rooms.room_id AS room_id,
                    users.user_id AS sender_user_id, users.name AS sender_name,
                    messages.content AS content, messages.is_announcement AS is_announcement,
                    messages.created_at AS created_at
             FROM messages
             JOIN users ON messages.user_id = users.id
             JOIN rooms ON messages.room_id = rooms.id
             WHERE rooms.room_id = ?1
             ORDER BY messages.created_at DESC
             LIMIT ?2",
        )?;
        let mut rows = stmt
            .query_map(params![room_id, limit], |row| {
                Ok(MessageView {
                    id: row.get("id")?,
                    room_id: row.get("room_id")?,
                    sender_user_id: row.get("sender_user_id")?,
                    sender_name: row.get("sender_name")?,
                    content: row.get("content")?,
                    is_announcement: row.get::<_, i64>("is_announcement")? != 0,
                    created_at: row.get("created_at")?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        // The query above returns newest-first; normalize to chronological
        // order here so every caller (LIST_MESSAGES and AI_MESSAGE context
        // alike) sees the same ordering.
        rows.reverse();
        Ok(rows)
    }
}
