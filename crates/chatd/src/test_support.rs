//! Shared fixtures for handler unit tests: an in-memory-backed `ChatServer`
//! plus a couple of canned [`AssistantProvider`] stand-ins so AI_MESSAGE
//! tests never reach out over HTTP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;

use chat_core::config::ChatConfig;
use chat_core::crypto::{self, ServerKeys};
use chat_repo::models::MessageView;
use chat_repo::{Repository, SqliteRepository};
use chat_services::{deferred, RetryDispatcher, SessionTable};
use tokio::net::UdpSocket;

use crate::assistant::AssistantProvider;
use crate::server::ChatServer;

/// Generated once per test binary — RSA keygen is too slow to repeat per test.
static TEST_KEYS: Lazy<ServerKeys> = Lazy::new(|| {
    let dir = std::env::temp_dir().join(format!("chatd-handler-test-keys-{}", std::process::id()));
    crypto::load_or_create_server_keys(&dir.join("private.pem"), &dir.join("public.pem"))
        .expect("generating test server keys")
});

fn cloned_test_keys() -> ServerKeys {
    ServerKeys {
        private: TEST_KEYS.private.clone(),
        public: TEST_KEYS.public.clone(),
        fingerprint: TEST_KEYS.fingerprint.clone(),
    }
}

pub(crate) struct StubAssistant {
    pub reply: &'static str,
}

#[async_trait]
impl AssistantProvider for StubAssistant {
    async fn complete(&self, _context: &[MessageView], _as_user: &str, _draft: Option<&str>) -> anyhow::Result<String> {
        Ok(self.reply.to_string())
    }
}

pub(crate) struct FailingAssistant;

#[async_trait]
impl AssistantProvider for FailingAssistant {
    async fn complete(&self, _context: &[MessageView], _as_user: &str, _draft: Option<&str>) -> anyhow::Result<String> {
        Err(anyhow::anyhow!("provider unreachable"))
    }
}

/// Builds a `ChatServer` wired to an in-memory SQLite repository and a
/// real (but unused) loopback socket, so handlers can run exactly as they
/// do in production.
pub(crate) async fn test_server(assistant: Arc<dyn AssistantProvider>) -> Arc<ChatServer> {
    let repo: Arc<dyn Repository> = Arc::new(SqliteRepository::open_in_memory().expect("in-memory db"));
    let sessions = SessionTable::new();
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.expect("bind loopback"));
    let (deferred_tx, _deferred_rx) = deferred::channel();
    let dispatcher = RetryDispatcher::new(
        sessions.clone(),
        socket.clone(),
        deferred_tx.clone(),
        5,
        Duration::from_secs(2),
    );

    Arc::new(ChatServer {
        config: ChatConfig::default(),
        keys: cloned_test_keys(),
        repo,
        sessions,
        dispatcher,
        socket,
        deferred: deferred_tx,
        assistant,
    })
}

pub(crate) fn no_ai_assistant() -> Arc<dyn AssistantProvider> {
    Arc::new(FailingAssistant)
}
