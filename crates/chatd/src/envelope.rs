//! Secure envelope handling (C6) — unwraps an ingress `SECURE_MSG` into an
//! authenticated application payload, and seals outgoing direct responses
//! the same way. The retry dispatcher (C9) handles resends on its own,
//! using the same crypto primitives but its own nonce bookkeeping.

use chat_core::crypto::{self};
use chat_core::protocol::{ApplicationPayload, SecureMsgEnvelope};
use chat_services::{DeferredWrite, SessionEntry};
use serde_json::Value;

use crate::server::ChatServer;

/// Everything that can go wrong unwrapping a `SECURE_MSG` before the
/// packet dispatcher ever sees it — always a transport-level failure.
pub enum UnwrapError {
    Incomplete,
    UnknownSession(String),
    ReplayedNonce,
    DecryptFailed(String),
}

impl UnwrapError {
    pub fn message(&self) -> String {
        match self {
            UnwrapError::Incomplete => "Message format is incomplete".to_string(),
            UnwrapError::UnknownSession(id) => format!("Session ID '{id}' not found"),
            UnwrapError::ReplayedNonce => "This nonce was already used".to_string(),
            UnwrapError::DecryptFailed(e) => format!("Message decryption failed: {e}"),
        }
    }
}

/// Looks the session up, enforces the nonce ledger, decrypts, and parses
/// the inner JSON. Nonce acceptance and the session's `last_active_at` are
/// both written synchronously here (request-scoped effects run on the
/// receive thread per the deferred-write design); only *egress* nonce
/// registration goes through the deferred queue.
pub fn unwrap_secure_msg(
    server: &ChatServer,
    rest: &Value,
) -> Result<(SessionEntry, ApplicationPayload), UnwrapError> {
    let session_id = rest.get("session_id").and_then(Value::as_str).unwrap_or("");
    let nonce_hex = rest.get("nonce").and_then(Value::as_str).unwrap_or("");
    let ciphertext_hex = rest.get("ciphertext").and_then(Value::as_str).unwrap_or("");
    if session_id.is_empty() || nonce_hex.is_empty() || ciphertext_hex.is_empty() {
        return Err(UnwrapError::Incomplete);
    }

    let entry = server
        .sessions
        .get(session_id)
        .ok_or_else(|| UnwrapError::UnknownSession(session_id.to_string()))?;

    let already_seen = server
        .repo
        .nonce_seen(entry.session_pk, nonce_hex)
        .map_err(|e| UnwrapError::DecryptFailed(e.to_string()))?;
    if already_seen {
        return Err(UnwrapError::ReplayedNonce);
    }
    server
        .repo
        .insert_nonce(entry.session_pk, nonce_hex)
        .map_err(|e| UnwrapError::DecryptFailed(e.to_string()))?;

    server.sessions.touch(session_id);
    let _ = server.deferred.send(DeferredWrite::TouchSession {
        session_id: session_id.to_string(),
        timestamp: chat_repo::models::unix_now(),
    });

    let nonce = crypto::nonce_from_hex(nonce_hex).map_err(|e| UnwrapError::DecryptFailed(e.to_string()))?;
    let ciphertext = hex::decode(ciphertext_hex).map_err(|e| UnwrapError::DecryptFailed(e.to_string()))?;
    let plaintext = crypto::open(&entry.session_key, &nonce, &ciphertext)
        .map_err(|e| UnwrapError::DecryptFailed(e.to_string()))?;
    let payload: ApplicationPayload =
        serde_json::from_slice(&plaintext).map_err(|e| UnwrapError::DecryptFailed(e.to_string()))?;

    Ok((entry, payload))
}

/// Seals `payload` for `session_id` with a fresh nonce and sends it
/// immediately (not through the retry queue — used for direct responses,
/// which aren't retried). Egress nonce registration is deferred.
pub async fn send_direct(server: &ChatServer, entry: &SessionEntry, payload: &Value) -> anyhow::Result<()> {
    let plaintext = serde_json::to_vec(payload)?;
    let nonce = crypto::mint_nonce();
    let ciphertext = crypto::seal(&entry.session_key, &nonce, &plaintext)?;
    let envelope = SecureMsgEnvelope::new(entry.session_id.clone(), hex::encode(nonce), hex::encode(ciphertext));
    let bytes = serde_json::to_vec(&envelope)?;
    server.socket.send_to(&bytes, entry.peer_addr).await?;
    let _ = server.deferred.send(DeferredWrite::EgressNonce {
        session_id: entry.session_id.clone(),
        nonce_hex: hex::encode(nonce),
    });
    Ok(())
}
