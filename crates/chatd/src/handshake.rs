//! Handshake handling (C5) — the plaintext `SESSION_INIT` exchange that
//! stands up a new secure session.

use std::net::SocketAddr;

use chat_core::crypto::{self, SessionKey};
use chat_core::protocol::{ServerErrorEnvelope, SessionInitRequest, SessionInitResponse};
use pkcs8::EncodePublicKey;
use serde_json::Value;

use crate::server::ChatServer;

pub async fn handle_session_init(server: &ChatServer, addr: SocketAddr, rest: Value) -> anyhow::Result<()> {
    let request: SessionInitRequest = match serde_json::from_value(rest) {
        Ok(req) => req,
        Err(_) => return send_transport_error(server, addr, "Missing client's public key").await,
    };
    if request.client_key.trim().is_empty() {
        return send_transport_error(server, addr, "Missing client's public key").await;
    }

    let session_id = crypto::generate_session_id();
    let session_key = SessionKey::generate();

    let encrypted_key = match crypto::wrap_session_key(&request.client_key, session_key.as_bytes()) {
        Ok(k) => k,
        Err(e) => {
            return send_transport_error(server, addr, format!("Invalid client public key: {e}")).await
        }
    };
    let signature = crypto::sign(session_key.as_bytes(), &server.keys.private)?;
    let server_pubkey_der = server.keys.public.to_public_key_der()?;

    let session = server.repo.insert_session(&session_id, &session_key.to_hex())?;
    server.sessions.insert(session_id.clone(), session.id, addr, session_key);

    let response = SessionInitResponse::new(
        session_id,
        &encrypted_key,
        server_pubkey_der.as_bytes(),
        &signature,
        server.keys.fingerprint.clone(),
    );
    let bytes = serde_json::to_vec(&response)?;
    server.socket.send_to(&bytes, addr).await?;
    Ok(())
}

pub async fn send_transport_error(
    server: &ChatServer,
    addr: SocketAddr,
    message: impl Into<String>,
) -> anyhow::Result<()> {
    let envelope = ServerErrorEnvelope::new(message);
    let bytes = serde_json::to_vec(&envelope)?;
    server.socket.send_to(&bytes, addr).await?;
    Ok(())
}
