//! Row types returned by the repository (C4): users, sessions, rooms,
//! memberships, and messages.

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub password: Option<String>,
    pub is_admin: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_active_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: i64,
    pub session_id: String,
    pub user_id: Option<i64>,
    pub session_key: Option<String>,
    pub created_at: i64,
    pub last_active_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Room {
    pub id: i64,
    pub room_id: String,
    pub name: String,
    pub is_private: bool,
    pub created_at: i64,
    pub last_active_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Member {
    pub room_id: i64,
    pub user_id: i64,
    pub is_admin: bool,
    pub joined_at: i64,
}

/// A member row joined against its user, as returned by `list_members`.
#[derive(Debug, Clone)]
pub struct MemberView {
    pub user_id: String,
    pub name: String,
    pub is_admin: bool,
    pub joined_at: i64,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: i64,
    pub room_id: i64,
    pub user_id: i64,
    pub content: String,
    pub is_announcement: bool,
    pub created_at: i64,
}

/// A message row joined against its author, as returned by `last_messages`.
#[derive(Debug, Clone)]
pub struct MessageView {
    pub id: i64,
    pub room_id: String,
    pub sender_user_id: String,
    pub sender_name: String,
    pub content: String,
    pub is_announcement: bool,
    pub created_at: i64,
}

pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i64
}
