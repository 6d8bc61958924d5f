//! `ChatServer` — the daemon's shared state, handed by reference to every
//! handshake, envelope, and packet handler call.

use std::sync::Arc;

use chat_core::config::ChatConfig;
use chat_core::crypto::ServerKeys;
use chat_repo::Repository;
use chat_services::{DeferredSender, RetryDispatcher, SessionTable};
use tokio::net::UdpSocket;

use crate::assistant::AssistantProvider;

pub struct ChatServer {
    pub config: ChatConfig,
    pub keys: ServerKeys,
    pub repo: Arc<dyn Repository>,
    pub sessions: SessionTable,
    pub dispatcher: Arc<RetryDispatcher>,
    pub socket: Arc<UdpSocket>,
    pub deferred: DeferredSender,
    pub assistant: Arc<dyn AssistantProvider>,
}

/// Per-request context handed to packet handlers: which session the
/// request arrived on, and which user (if any) it is currently bound to.
/// Handlers that bind/clear a user (LOGIN, LOGOUT, MERGE_SESSION) update
/// both the repository and the session table directly — `ctx` itself is
/// a snapshot taken before dispatch.
pub struct HandlerCtx {
    pub session_id: String,
    pub user_pk: Option<i64>,
}
