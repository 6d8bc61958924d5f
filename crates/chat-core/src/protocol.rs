//! Wire envelope types — this IS the protocol.
//!
//! Two layers travel over the same UDP socket: a plaintext handshake layer
//! (`SESSION_INIT`, and `SERVER_ERROR` for transport-level failures) and a
//! sealed application layer (`SECURE_MSG`, whose ciphertext decrypts to an
//! application payload `{type, data}`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level datagram envelope, as received off the wire before any
/// decryption. `type` discriminates which arm applies; unknown/malformed
/// envelopes are a transport error, not a panic.
#[derive(Debug, Clone, Deserialize)]
pub struct IngressEnvelope {
    #[serde(rename = "type")]
    pub envelope_type: String,
    #[serde(flatten)]
    pub rest: Value,
}

/// `SESSION_INIT` request, client → server (plaintext).
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInitRequest {
    pub client_key: String,
}

/// `SESSION_INIT` response, server → client (plaintext).
#[derive(Debug, Clone, Serialize)]
pub struct SessionInitResponse {
    #[serde(rename = "type")]
    pub envelope_type: &'static str,
    pub session_id: String,
    pub encrypted_key: String,
    pub server_pubkey: String,
    pub signature: String,
    pub fingerprint: String,
}

impl SessionInitResponse {
    pub fn new(
        session_id: String,
        encrypted_key: &[u8],
        server_pubkey_der: &[u8],
        signature: &[u8],
        fingerprint: String,
    ) -> Self {
        Self {
            envelope_type: "SESSION_INIT",
            session_id,
            encrypted_key: hex::encode(encrypted_key),
            server_pubkey: hex::encode(server_pubkey_der),
            signature: hex::encode(signature),
            fingerprint,
        }
    }
}

/// `SECURE_MSG` envelope, either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecureMsgEnvelope {
    #[serde(rename = "type")]
    pub envelope_type: String,
    pub session_id: String,
    pub nonce: String,
    pub ciphertext: String,
}

impl SecureMsgEnvelope {
    pub fn new(session_id: String, nonce_hex: String, ciphertext_hex: String) -> Self {
        Self {
            envelope_type: "SECURE_MSG".to_string(),
            session_id,
            nonce: nonce_hex,
            ciphertext: ciphertext_hex,
        }
    }
}

/// Plaintext transport-error envelope, sent when the failure occurs before
/// (or instead of) a successful decrypt — so the client can diagnose
/// without its session key.
#[derive(Debug, Clone, Serialize)]
pub struct ServerErrorEnvelope {
    #[serde(rename = "type")]
    pub envelope_type: &'static str,
    pub message: String,
}

impl ServerErrorEnvelope {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            envelope_type: "SERVER_ERROR",
            message: message.into(),
        }
    }
}

/// The decrypted application payload inside a `SECURE_MSG` ciphertext.
/// Packet types are plain strings (see the packet catalogue) rather than a
/// closed Rust enum, because new packet types are added without touching
/// this envelope shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationPayload {
    #[serde(rename = "type")]
    pub packet_type: String,
    #[serde(default)]
    pub data: Value,
    /// Stamped in by the retry dispatcher at enqueue time; absent on
    /// client-originated requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,
}

impl ApplicationPayload {
    pub fn new(packet_type: impl Into<String>, data: Value) -> Self {
        Self {
            packet_type: packet_type.into(),
            data,
            msg_id: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new("ERROR", serde_json::json!({ "message": message.into() }))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("invalid envelope json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown envelope type: {0}")]
    UnknownEnvelopeType(String),
    #[error("message format is incomplete")]
    IncompleteMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingress_envelope_reads_type_and_keeps_rest() {
        let raw = r#"{"type":"SESSION_INIT","client_key":"abc"}"#;
        let env: IngressEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.envelope_type, "SESSION_INIT");
        let req: SessionInitRequest = serde_json::from_value(env.rest).unwrap();
        assert_eq!(req.client_key, "abc");
    }

    #[test]
    fn secure_msg_roundtrips_through_json() {
        let env = SecureMsgEnvelope::new("deadbeef".into(), "aa".repeat(12), "bb".repeat(8));
        let json = serde_json::to_string(&env).unwrap();
        let back: SecureMsgEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session_id, "deadbeef");
    }

    #[test]
    fn application_payload_error_shape() {
        let payload = ApplicationPayload::error("boom");
        assert_eq!(payload.packet_type, "ERROR");
        assert_eq!(payload.data["message"], "boom");
    }
}
