use async_trait::async_trait;
use serde_json::Value;

use chat_repo::models::MessageView;

use crate::dispatch::{error_payload, PacketHandler};
use crate::handlers::common::{require_auth, str_field};
use crate::server::{ChatServer, HandlerCtx};

const HISTORY_LIMIT: i64 = 100;

fn message_json(view: &MessageView) -> Value {
    serde_json::json!({
        "room_id": view.room_id,
        "message_id": view.id,
        "user_id": view.sender_user_id,
        "name": view.sender_name,
        "content": view.content,
        "is_announcement": view.is_announcement,
        "timestamp": view.created_at,
    })
}

fn message_broadcast(view: &MessageView) -> Value {
    serde_json::json!({ "type": "MESSAGE", "data": message_json(view) })
}

async fn broadcast_to_room_members(server: &ChatServer, room_pk: i64, payload: Value) -> anyhow::Result<()> {
    let member_pks = server.repo.member_user_pks(room_pk)?;
    let mut session_ids = Vec::new();
    for pk in member_pks {
        session_ids.extend(server.sessions.session_ids_for_user(pk));
    }
    chat_services::broadcast::broadcast(&server.dispatcher, &server.sessions, payload, Some(&session_ids));
    Ok(())
}

/// Requires membership. Persists, refreshes room activity, broadcasts to
/// every live session whose bound user is a member, and tells the author
/// their own copy landed.
pub struct MessageHandler;

#[async_trait]
impl PacketHandler for MessageHandler {
    async fn handle(
        &self,
        server: &ChatServer,
        ctx: &HandlerCtx,
        data: &Value,
    ) -> anyhow::Result<Option<Value>> {
        let user_pk = match require_auth(ctx.user_pk) {
            Ok(pk) => pk,
            Err(err) => return Ok(Some(err)),
        };

        let room_id = str_field(data, "room_id");
        let Some(room) = server.repo.find_room_by_room_id(room_id)? else {
            return Ok(Some(error_payload("Room not found.")));
        };
        if !server.repo.is_member(room.id, user_pk)? {
            return Ok(Some(error_payload("You are not a member of that room.")));
        }

        let content = str_field(data, "content").trim().to_string();
        if content.is_empty() {
            return Ok(Some(error_payload("Message content is required.")));
        }

        let view = server.repo.insert_message(room.id, user_pk, &content, false)?;
        server.repo.touch_room(room.id)?;
        broadcast_to_room_members(server, room.id, message_broadcast(&view)).await?;

        Ok(Some(serde_json::json!({
            "type": "MESSAGE_SENT",
            "data": message_json(&view),
        })))
    }
}

/// Requires membership. Asks the configured assistant provider to improve
/// on `content` (a draft) or continue the conversation (`content` absent),
/// then persists and broadcasts the result exactly as MESSAGE would —
/// except the caller gets no direct response, only the broadcast.
pub struct AiMessageHandler;

#[async_trait]
impl PacketHandler for AiMessageHandler {
    async fn handle(
        &self,
        server: &ChatServer,
        ctx: &HandlerCtx,
        data: &Value,
    ) -> anyhow::Result<Option<Value>> {
        let user_pk = match require_auth(ctx.user_pk) {
            Ok(pk) => pk,
            Err(err) => return Ok(Some(err)),
        };

        let room_id = str_field(data, "room_id");
        let Some(room) = server.repo.find_room_by_room_id(room_id)? else {
            return Ok(Some(error_payload("Room not found.")));
        };
        if !server.repo.is_member(room.id, user_pk)? {
            return Ok(Some(error_payload("You are not a member of that room.")));
        }
        let Some(user) = server.repo.find_user_by_pk(user_pk)? else {
            return Ok(Some(error_payload("You are not a member of that room.")));
        };

        let context = server.repo.last_messages(room_id, HISTORY_LIMIT)?;
        let draft = data.get("content").and_then(Value::as_str);

        let generated = match server.assistant.complete(&context, &user.name, draft).await {
            Ok(text) => text,
            Err(err) => {
                return Ok(Some(error_payload(format!("AI generation failed: {err}"))));
            }
        };

        let view = server.repo.insert_message(room.id, user_pk, &generated, true)?;
        server.repo.touch_room(room.id)?;
        broadcast_to_room_members(server, room.id, message_broadcast(&view)).await?;

        Ok(None)
    }
}

pub struct ListMessagesHandler;

#[async_trait]
impl PacketHandler for ListMessagesHandler {
    async fn handle(
        &self,
        server: &ChatServer,
        ctx: &HandlerCtx,
        data: &Value,
    ) -> anyhow::Result<Option<Value>> {
        if let Err(err) = require_auth(ctx.user_pk) {
            return Ok(Some(err));
        }
        let room_id = str_field(data, "room_id");
        if server.repo.find_room_by_room_id(room_id)?.is_none() {
            return Ok(Some(error_payload("Room not found.")));
        }

        let messages = server.repo.last_messages(room_id, HISTORY_LIMIT)?;
        Ok(Some(serde_json::json!({
            "type": "ROOM_HISTORY",
            "data": {
                "room_id": room_id,
                "messages": messages.iter().map(message_json).collect::<Vec<_>>(),
            },
        })))
    }
}

pub struct ListMembersHandler;

#[async_trait]
impl PacketHandler for ListMembersHandler {
    async fn handle(
        &self,
        server: &ChatServer,
        ctx: &HandlerCtx,
        data: &Value,
    ) -> anyhow::Result<Option<Value>> {
        if let Err(err) = require_auth(ctx.user_pk) {
            return Ok(Some(err));
        }
        let room_id = str_field(data, "room_id");
        let Some(room) = server.repo.find_room_by_room_id(room_id)? else {
            return Ok(Some(error_payload("Room not found.")));
        };

        let members = server.repo.list_members(room.id)?;
        let members_json: Vec<Value> = members
            .iter()
            .map(|m| {
                serde_json::json!({
                    "user_id": m.user_id,
                    "name": m.name,
                    "is_admin": m.is_admin,
                    "joined_at": m.joined_at,
                })
            })
            .collect();

        Ok(Some(serde_json::json!({
            "type": "ROOM_MEMBERS",
            "data": { "room_id": room_id, "members": members_json },
        })))
    }
}

/// No authentication requirement beyond the sealed channel — the session
/// key is the sole credential for cancelling one of its own retry tasks.
pub struct AckHandler;

#[async_trait]
impl PacketHandler for AckHandler {
    async fn handle(
        &self,
        server: &ChatServer,
        ctx: &HandlerCtx,
        data: &Value,
    ) -> anyhow::Result<Option<Value>> {
        let msg_id = str_field(data, "msg_id");
        if !msg_id.is_empty() {
            server.dispatcher.acknowledge(&ctx.session_id, msg_id);
        }
        Ok(None)
    }
}
