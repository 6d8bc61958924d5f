//! The deferred-write queue: egress-side repository writes (nonce
//! registration, session `last_active_at` touches) are pushed here by
//! whichever task minted them — the retry dispatcher, most often — and
//! drained by the receive loop at the top of every iteration. This keeps
//! every repository write on one logical thread without forcing the
//! dispatcher to block on it.

use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum DeferredWrite {
    /// Register a nonce this server minted for egress, so a mirrored
    /// replay of the same (session, nonce) pair is rejected.
    EgressNonce { session_id: String, nonce_hex: String },
    /// Bump a session's `last_active_at` to `timestamp` (unix seconds).
    TouchSession { session_id: String, timestamp: i64 },
}

pub type DeferredSender = mpsc::UnboundedSender<DeferredWrite>;
pub type DeferredReceiver = mpsc::UnboundedReceiver<DeferredWrite>;

pub fn channel() -> (DeferredSender, DeferredReceiver) {
    mpsc::unbounded_channel()
}
