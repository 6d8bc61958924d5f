use async_trait::async_trait;
use serde_json::Value;

use chat_repo::models::Room;

use crate::dispatch::{error_payload, PacketHandler};
use crate::handlers::common::{require_auth, room_list_item, room_summary, str_field};
use crate::server::{ChatServer, HandlerCtx};

fn rooms_payload(rooms: &[Room]) -> Value {
    serde_json::json!({
        "type": "ROOM_LIST",
        "data": { "rooms": rooms.iter().map(room_list_item).collect::<Vec<_>>() },
    })
}

fn broadcast_room_list(server: &ChatServer) -> anyhow::Result<()> {
    let rooms = server.repo.list_rooms()?;
    chat_services::broadcast::broadcast(&server.dispatcher, &server.sessions, rooms_payload(&rooms), None);
    Ok(())
}

pub struct ListRoomsHandler;

#[async_trait]
impl PacketHandler for ListRoomsHandler {
    async fn handle(
        &self,
        server: &ChatServer,
        ctx: &HandlerCtx,
        _data: &Value,
    ) -> anyhow::Result<Option<Value>> {
        if let Err(err) = require_auth(ctx.user_pk) {
            return Ok(Some(err));
        }
        let rooms = server.repo.list_rooms()?;
        Ok(Some(rooms_payload(&rooms)))
    }
}

/// Creates a room and joins the caller to it as its first (admin) member.
/// Every session — not just members of the new room — gets a refreshed
/// ROOM_LIST, since room creation changes everyone's join candidates.
pub struct CreateRoomHandler;

#[async_trait]
impl PacketHandler for CreateRoomHandler {
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

        let name = str_field(data, "name").trim().to_string();
        if name.is_empty() {
            return Ok(Some(error_payload("Room name is required.")));
        }
        if server.repo.find_room_by_name(&name)?.is_some() {
            return Ok(Some(error_payload("A room with that name already exists.")));
        }

        let room = server.repo.insert_room(&name)?;
        server.repo.insert_member(room.id, user_pk, true)?;
        broadcast_room_list(server)?;

        Ok(Some(serde_json::json!({
            "type": "ROOM_CREATED",
            "data": { "room": room_summary(&room) },
        })))
    }
}

/// Joining an already-joined room is a no-op success, not an error — the
/// client may retry a JOIN_ROOM it's unsure landed.
pub struct JoinRoomHandler;

#[async_trait]
impl PacketHandler for JoinRoomHandler {
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
            let Some(user) = server.repo.find_user_by_pk(user_pk)? else {
                return Ok(Some(error_payload("User not found.")));
            };
            let joined_at = chat_repo::models::unix_now();
            server.repo.insert_member(room.id, user_pk, false)?;
            server.repo.touch_room(room.id)?;

            let member_pks = server.repo.member_user_pks(room.id)?;
            let mut session_ids = Vec::new();
            for pk in member_pks {
                session_ids.extend(server.sessions.session_ids_for_user(pk));
            }
            let member_joined = serde_json::json!({
                "type": "MEMBER_JOINED",
                "data": {
                    "room_id": room.room_id,
                    "member": {
                        "user_id": user.user_id,
                        "name": user.name,
                        "is_admin": false,
                        "joined_at": joined_at,
                    },
                },
            });
            chat_services::broadcast::broadcast(
                &server.dispatcher,
                &server.sessions,
                member_joined,
                Some(&session_ids),
            );
        }

        Ok(Some(serde_json::json!({
            "type": "JOINED_ROOM",
            "data": { "room": room_summary(&room) },
        })))
    }
}

/// Leaving empties a room out from under its members — if the departure
/// was the last membership, the room itself is torn down and every
/// session sees a refreshed ROOM_LIST; otherwise the remaining members get
/// MEMBER_LEFT. The leaving user's *other* sessions additionally get
/// ROOM_LEFT so every device they're logged in on drops out of the room.
pub struct LeaveRoomHandler;

#[async_trait]
impl PacketHandler for LeaveRoomHandler {
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

        let leaving_user_id = server
            .repo
            .find_user_by_pk(user_pk)?
            .map(|u| u.user_id)
            .unwrap_or_default();

        server.repo.remove_member(room.id, user_pk)?;

        let remaining = server.repo.member_user_pks(room.id)?;
        if remaining.is_empty() {
            server.repo.delete_room(room.id)?;
            broadcast_room_list(server)?;
        } else {
            server.repo.touch_room(room.id)?;
            let mut session_ids = Vec::new();
            for pk in remaining {
                session_ids.extend(server.sessions.session_ids_for_user(pk));
            }
            let member_left = serde_json::json!({
                "type": "MEMBER_LEFT",
                "data": { "room_id": room.room_id, "member_id": leaving_user_id },
            });
            chat_services::broadcast::broadcast(
                &server.dispatcher,
                &server.sessions,
                member_left,
                Some(&session_ids),
            );
        }

        let sibling_sessions: Vec<String> = server
            .sessions
            .session_ids_for_user(user_pk)
            .into_iter()
            .filter(|id| id != &ctx.session_id)
            .collect();
        if !sibling_sessions.is_empty() {
            let room_left = serde_json::json!({
                "type": "ROOM_LEFT",
                "data": { "room_id": room.room_id },
            });
            chat_services::broadcast::broadcast(
                &server.dispatcher,
                &server.sessions,
                room_left,
                Some(&sibling_sessions),
            );
        }

        Ok(Some(serde_json::json!({
            "type": "LEFT_ROOM",
            "data": { "room_id": room.room_id, "name": room.name },
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::HandlerCtx;
    use crate::test_support::{no_ai_assistant, test_server};

    async fn logged_in_session(server: &ChatServer, session_id: &str, email: &str) -> HandlerCtx {
        server.repo.insert_session(session_id, "deadbeef").unwrap();
        let user = server.repo.insert_user(email, email.split('@').next().unwrap()).unwrap();
        server.repo.bind_session_user(session_id, user.id).unwrap();
        server.sessions.insert(
            session_id.to_string(),
            server.repo.find_session_by_session_id(session_id).unwrap().unwrap().id,
            "127.0.0.1:1".parse().unwrap(),
            chat_core::crypto::SessionKey::generate(),
        );
        server.sessions.bind_user(session_id, user.id);
        HandlerCtx { session_id: session_id.to_string(), user_pk: Some(user.id) }
    }

    #[tokio::test]
    async fn create_room_rejects_duplicate_names() {
        let server = test_server(no_ai_assistant()).await;
        let ctx = logged_in_session(&server, "s1", "alice@example.com").await;

        let ok = CreateRoomHandler.handle(&server, &ctx, &serde_json::json!({ "name": "lobby" })).await.unwrap().unwrap();
        assert_eq!(ok["type"], "ROOM_CREATED");

        let dup = CreateRoomHandler.handle(&server, &ctx, &serde_json::json!({ "name": "lobby" })).await.unwrap().unwrap();
        assert_eq!(dup["type"], "ERROR");
    }

    #[tokio::test]
    async fn join_room_is_idempotent() {
        let server = test_server(no_ai_assistant()).await;
        let ctx = logged_in_session(&server, "s1", "alice@example.com").await;
        let room = server.repo.insert_room("lobby").unwrap();

        let first = JoinRoomHandler.handle(&server, &ctx, &serde_json::json!({ "room_id": room.room_id })).await.unwrap().unwrap();
        assert_eq!(first["type"], "JOINED_ROOM");
        let second = JoinRoomHandler.handle(&server, &ctx, &serde_json::json!({ "room_id": room.room_id })).await.unwrap().unwrap();
        assert_eq!(second["type"], "JOINED_ROOM");

        assert_eq!(server.repo.member_user_pks(room.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn leaving_the_last_member_destroys_the_room() {
        let server = test_server(no_ai_assistant()).await;
        let ctx = logged_in_session(&server, "s1", "alice@example.com").await;
        let room = server.repo.insert_room("lobby").unwrap();
        server.repo.insert_member(room.id, ctx.user_pk.unwrap(), true).unwrap();

        let response = LeaveRoomHandler.handle(&server, &ctx, &serde_json::json!({ "room_id": room.room_id })).await.unwrap().unwrap();
        assert_eq!(response["type"], "LEFT_ROOM");
        assert!(server.repo.find_room_by_room_id(&room.room_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn leave_room_rejects_non_members() {
        let server = test_server(no_ai_assistant()).await;
        let ctx = logged_in_session(&server, "s1", "alice@example.com").await;
        let room = server.repo.insert_room("lobby").unwrap();

        let response = LeaveRoomHandler.handle(&server, &ctx, &serde_json::json!({ "room_id": room.room_id })).await.unwrap().unwrap();
        assert_eq!(response["type"], "ERROR");
    }
}
