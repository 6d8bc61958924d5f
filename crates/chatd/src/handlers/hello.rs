use async_trait::async_trait;
use serde_json::Value;

use crate::dispatch::PacketHandler;
use crate::server::{ChatServer, HandlerCtx};

/// A no-op liveness check. Its response breaks the usual `{type, data}`
/// envelope shape — `message` sits at the top level — matching what the
/// existing client expects.
pub struct HelloHandler;

#[async_trait]
impl PacketHandler for HelloHandler {
    async fn handle(
        &self,
        _server: &ChatServer,
        _ctx: &HandlerCtx,
        _data: &Value,
    ) -> anyhow::Result<Option<Value>> {
        Ok(Some(
            serde_json::json!({ "type": "HELLO", "message": "Welcome to UDPChat-AI." }),
        ))
    }
}
