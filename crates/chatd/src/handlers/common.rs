//! Shared helpers for packet handlers: field extraction, the email
//! pattern, password hashing, and the JSON shapes reused across several
//! responses (a room summary, a WELCOME's user block).

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use chat_repo::models::{Room, User};

use crate::dispatch::error_payload;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap()
});

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Unsalted MD5. Kept as-is for interop with the existing client rather
/// than silently upgraded — a future password scheme is a migration, not
/// a one-line swap, since every stored hash would need rehashing.
pub fn md5_hex(input: &str) -> String {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn str_field<'a>(data: &'a Value, key: &str) -> &'a str {
    data.get(key).and_then(Value::as_str).unwrap_or("")
}

pub fn room_summary(room: &Room) -> Value {
    serde_json::json!({ "room_id": room.room_id, "name": room.name })
}

pub fn room_list_item(room: &Room) -> Value {
    serde_json::json!({
        "room_id": room.room_id,
        "name": room.name,
        "last_active_at": room.last_active_at,
    })
}

pub fn user_block(user: &User, room: Option<&Room>) -> Value {
    serde_json::json!({
        "email": user.email,
        "name": user.name,
        "user_id": user.user_id,
        "room": room.map(room_summary),
    })
}

pub fn welcome_payload(user: &User, room: Option<&Room>) -> Value {
    serde_json::json!({ "type": "WELCOME", "data": { "user": user_block(user, room) } })
}

/// Every handler's auth gate: `Ok` with the bound user's primary key, or
/// an `ERROR` payload ready to hand straight back to the caller.
pub fn require_auth(user_pk: Option<i64>) -> Result<i64, Value> {
    user_pk.ok_or_else(|| error_payload("Authentication required."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_pattern_accepts_plausible_addresses() {
        assert!(is_valid_email("alice@example.com"));
        assert!(is_valid_email("a.b+tag@sub.example.co"));
    }

    #[test]
    fn email_pattern_rejects_malformed_addresses() {
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("missing-domain@"));
        assert!(!is_valid_email("@missing-local.com"));
        assert!(!is_valid_email("no-tld@example"));
    }

    #[test]
    fn md5_hex_is_stable_and_matches_known_vector() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex("password"), md5_hex("password"));
        assert_ne!(md5_hex("password"), md5_hex("Password"));
    }

    #[test]
    fn require_auth_distinguishes_bound_and_unbound() {
        assert_eq!(require_auth(Some(7)), Ok(7));
        assert!(require_auth(None).is_err());
    }
}
