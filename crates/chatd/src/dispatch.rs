//! Packet dispatcher (C7) — maps a decrypted payload's `type` to a handler.
//!
//! Handlers are registered in a static table keyed by packet type string,
//! per the design note favoring "a mapping from packet-type string to a
//! handler value implementing a common capability" over a class hierarchy.
//! Unknown types are an *application*-level error, not a transport error:
//! the session is valid, the envelope opened fine, the client just asked
//! for something this server doesn't understand.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::handlers;
use crate::server::{ChatServer, HandlerCtx};

/// A single packet handler. Returning `Ok(None)` means "no direct response,
/// though broadcasts may already have been enqueued"; `Ok(Some(payload))`
/// is a full response object (including its own `"type"` key — response
/// shapes are not uniform enough to force through one envelope struct, see
/// HELLO). An `Err` here is an unexpected failure and becomes a transport
/// `SERVER_ERROR`, not an application `ERROR` payload.
#[async_trait]
pub trait PacketHandler: Send + Sync {
    async fn handle(
        &self,
        server: &ChatServer,
        ctx: &HandlerCtx,
        data: &Value,
    ) -> anyhow::Result<Option<Value>>;
}

/// Builds an application-level `ERROR` payload — the shape every handler
/// uses for validation/auth/not-found failures.
pub fn error_payload(message: impl Into<String>) -> Value {
    serde_json::json!({ "type": "ERROR", "data": { "message": message.into() } })
}

pub struct PacketDispatcher {
    handlers: HashMap<&'static str, Arc<dyn PacketHandler>>,
}

impl PacketDispatcher {
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, Arc<dyn PacketHandler>> = HashMap::new();
        handlers.insert("HELLO", Arc::new(handlers::hello::HelloHandler));
        handlers.insert("LOGIN", Arc::new(handlers::auth::LoginHandler));
        handlers.insert("LOGOUT", Arc::new(handlers::auth::LogoutHandler));
        handlers.insert("STATUS", Arc::new(handlers::auth::StatusHandler));
        handlers.insert("MERGE_SESSION", Arc::new(handlers::auth::MergeSessionHandler));
        handlers.insert("LIST_ROOMS", Arc::new(handlers::rooms::ListRoomsHandler));
        handlers.insert("CREATE_ROOM", Arc::new(handlers::rooms::CreateRoomHandler));
        handlers.insert("JOIN_ROOM", Arc::new(handlers::rooms::JoinRoomHandler));
        handlers.insert("LEAVE_ROOM", Arc::new(handlers::rooms::LeaveRoomHandler));
        handlers.insert("MESSAGE", Arc::new(handlers::messaging::MessageHandler));
        handlers.insert("AI_MESSAGE", Arc::new(handlers::messaging::AiMessageHandler));
        handlers.insert("LIST_MESSAGES", Arc::new(handlers::messaging::ListMessagesHandler));
        handlers.insert("LIST_MEMBERS", Arc::new(handlers::messaging::ListMembersHandler));
        handlers.insert("ACK", Arc::new(handlers::messaging::AckHandler));
        Self { handlers }
    }

    pub async fn dispatch(
        &self,
        server: &ChatServer,
        ctx: &HandlerCtx,
        packet_type: &str,
        data: &Value,
    ) -> anyhow::Result<Option<Value>> {
        match self.handlers.get(packet_type) {
            Some(handler) => handler.handle(server, ctx, data).await,
            None => Ok(Some(error_payload(format!(
                "Unknown packet type: {packet_type}"
            )))),
        }
    }
}

impl Default for PacketDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
