use async_trait::async_trait;
use serde_json::Value;

use chat_core::crypto::SessionKey;
use chat_repo::models::unix_now;

use crate::dispatch::{error_payload, PacketHandler};
use crate::handlers::common::{is_valid_email, md5_hex, str_field, welcome_payload};
use crate::server::{ChatServer, HandlerCtx};

/// Finds-or-creates the user by email, checks the password if one is set,
/// and binds the session to it. A brand new user has no password — the
/// first LOGIN for an email is effectively a signup.
pub struct LoginHandler;

#[async_trait]
impl PacketHandler for LoginHandler {
    async fn handle(
        &self,
        server: &ChatServer,
        ctx: &HandlerCtx,
        data: &Value,
    ) -> anyhow::Result<Option<Value>> {
        let email = str_field(data, "email").trim().to_lowercase();
        if !is_valid_email(&email) {
            return Ok(Some(error_payload("Please provide a valid email address.")));
        }
        let password = data.get("password").and_then(Value::as_str);

        let user = match server.repo.find_user_by_email(&email)? {
            Some(user) => user,
            None => {
                let name = email.split('@').next().unwrap_or(&email).to_string();
                server.repo.insert_user(&email, &name)?
            }
        };

        match (&user.password, password) {
            (Some(_), None) => {
                return Ok(Some(serde_json::json!({
                    "type": "PLEASE_LOGIN",
                    "data": { "message": "Please type your password to continue", "email": email },
                })))
            }
            (Some(hash), Some(given)) if *hash != md5_hex(given) => {
                return Ok(Some(serde_json::json!({
                    "type": "UNAUTHORISED",
                    "data": { "message": "Incorrect password" },
                })))
            }
            _ => {}
        }

        server.repo.bind_session_user(&ctx.session_id, user.id)?;
        server.repo.touch_session(&ctx.session_id, unix_now())?;
        server.repo.touch_user(user.id)?;
        server.sessions.bind_user(&ctx.session_id, user.id);
        server.sessions.touch(&ctx.session_id);

        let room = server.repo.find_active_room_for_user(user.id)?;
        Ok(Some(welcome_payload(&user, room.as_ref())))
    }
}

pub struct LogoutHandler;

#[async_trait]
impl PacketHandler for LogoutHandler {
    async fn handle(
        &self,
        server: &ChatServer,
        ctx: &HandlerCtx,
        _data: &Value,
    ) -> anyhow::Result<Option<Value>> {
        if ctx.user_pk.is_none() {
            return Ok(Some(error_payload("You are not logged in.")));
        }
        server.repo.clear_session_user(&ctx.session_id)?;
        server.repo.touch_session(&ctx.session_id, unix_now())?;
        server.sessions.clear_user(&ctx.session_id);
        Ok(Some(serde_json::json!({ "type": "STATUS", "data": { "user": Value::Null } })))
    }
}

/// Reports what the current session knows about itself — used by clients
/// to recover state after a reconnect without a full LOGIN.
pub struct StatusHandler;

#[async_trait]
impl PacketHandler for StatusHandler {
    async fn handle(
        &self,
        server: &ChatServer,
        ctx: &HandlerCtx,
        _data: &Value,
    ) -> anyhow::Result<Option<Value>> {
        let session = match server.repo.find_session_by_session_id(&ctx.session_id)? {
            Some(session) => session,
            None => return Ok(Some(error_payload("Invalid session ID"))),
        };

        let user_block = match session.user_id {
            Some(user_pk) => match server.repo.find_user_by_pk(user_pk)? {
                Some(user) => {
                    let room = server.repo.find_active_room_for_user(user.id)?;
                    crate::handlers::common::user_block(&user, room.as_ref())
                }
                None => Value::Object(Default::default()),
            },
            None => Value::Object(Default::default()),
        };

        Ok(Some(serde_json::json!({
            "type": "STATUS",
            "data": { "session_id": ctx.session_id, "user": user_block },
        })))
    }
}

/// Carries a login over to a fresh session — the client's typical move
/// after a reconnect, presenting the session id/key of a session it held
/// before. Failures are collapsed into one generic response so a guesser
/// can't use this to probe for valid session ids.
pub struct MergeSessionHandler;

#[async_trait]
impl PacketHandler for MergeSessionHandler {
    async fn handle(
        &self,
        server: &ChatServer,
        ctx: &HandlerCtx,
        data: &Value,
    ) -> anyhow::Result<Option<Value>> {
        let failed = serde_json::json!({ "type": "MERGE_SESSION_FAILED" });

        let old_session_id = str_field(data, "old_session_id");
        let old_session_key = str_field(data, "old_session_key");
        if old_session_id.is_empty() || old_session_key.is_empty() {
            return Ok(Some(failed));
        }

        let Some(old_session) = server.repo.find_session_by_session_id(old_session_id)? else {
            return Ok(Some(failed));
        };
        let (Some(stored_key_hex), Some(user_pk)) = (&old_session.session_key, old_session.user_id)
        else {
            return Ok(Some(failed));
        };

        let (Ok(stored_key), Ok(given_key)) = (
            SessionKey::from_hex(stored_key_hex),
            SessionKey::from_hex(old_session_key),
        ) else {
            return Ok(Some(failed));
        };
        if stored_key != given_key {
            return Ok(Some(failed));
        }

        let Some(user) = server.repo.find_user_by_pk(user_pk)? else {
            return Ok(Some(failed));
        };

        server.repo.bind_session_user(&ctx.session_id, user.id)?;
        server.repo.touch_session(&ctx.session_id, unix_now())?;
        server.sessions.bind_user(&ctx.session_id, user.id);
        server.sessions.touch(&ctx.session_id);

        let room = server.repo.find_active_room_for_user(user.id)?;
        Ok(Some(welcome_payload(&user, room.as_ref())))
    }
}
