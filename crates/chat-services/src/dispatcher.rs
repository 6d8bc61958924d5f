//! Retry dispatcher (C9) — bounded-retry, at-most-once delivery of
//! server-originated `SECURE_MSG` datagrams.
//!
//! UDP gives no delivery guarantee, so the protocol needs *something*
//! driving reliable server-to-client delivery for room/membership state
//! transitions. This is that something: every enqueued payload gets a
//! fresh `msg_id`, is resent on a fixed interval up to `max_retries`
//! times, and is dropped the moment an ACK for its `msg_id` arrives or the
//! retry budget is exhausted.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use chat_core::crypto::{self, SessionKey};

use crate::deferred::{DeferredSender, DeferredWrite};
use crate::session::SessionTable;

struct Task {
    msg_id: String,
    session_id: String,
    payload: Value,
    retry_count: u32,
    /// `None` until the first send attempt.
    last_sent: Option<Instant>,
}

/// The outbound retry queue plus its background ticker.
pub struct RetryDispatcher {
    queue: Mutex<Vec<Task>>,
    sessions: SessionTable,
    socket: Arc<UdpSocket>,
    deferred: DeferredSender,
    max_retries: u32,
    retry_interval: Duration,
}

impl RetryDispatcher {
    pub fn new(
        sessions: SessionTable,
        socket: Arc<UdpSocket>,
        deferred: DeferredSender,
        max_retries: u32,
        retry_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(Vec::new()),
            sessions,
            socket,
            deferred,
            max_retries,
            retry_interval,
        })
    }

    /// Stamps a fresh `msg_id` into `payload` and appends it to the queue.
    /// If the session is not live, the enqueue is silently dropped — this
    /// mirrors the broadcast gate's "non-live sessions are skipped" policy.
    pub fn enqueue(&self, session_id: &str, mut payload: Value) {
        if !self.sessions.contains(session_id) {
            return;
        }
        let msg_id = hex::encode(rand::random::<[u8; 16]>());
        if let Value::Object(map) = &mut payload {
            map.insert("msg_id".to_string(), Value::String(msg_id.clone()));
        }
        let task = Task {
            msg_id,
            session_id: session_id.to_string(),
            payload,
            retry_count: 0,
            last_sent: None,
        };
        self.queue.lock().unwrap().push(task);
    }

    /// Removes every queued task matching `(session_id, msg_id)`. A no-op
    /// if the id was already dropped or never existed.
    pub fn acknowledge(&self, session_id: &str, msg_id: &str) {
        let mut queue = self.queue.lock().unwrap();
        queue.retain(|t| !(t.session_id == session_id && t.msg_id == msg_id));
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Spawns the background ticker as a tokio task. Resends due tasks
    /// once per second; stops when `shutdown` fires.
    pub fn spawn(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::info!("retry dispatcher shutting down");
                        return;
                    }
                    _ = interval.tick() => {
                        self.tick().await;
                    }
                }
            }
        })
    }

    async fn tick(&self) {
        let due = self.collect_due();
        for (session_id, payload) in due {
            let Some(entry) = self.sessions.get(&session_id) else {
                continue;
            };
            self.resend(&session_id, &entry.session_key, entry.peer_addr, &payload)
                .await;
        }
    }

    /// Scans the queue once, dropping exhausted tasks and returning the
    /// payloads due for (re)send, having already bumped their bookkeeping.
    fn collect_due(&self) -> Vec<(String, Value)> {
        let now = Instant::now();
        let mut queue = self.queue.lock().unwrap();
        queue.retain(|t| t.retry_count < self.max_retries);

        let mut due = Vec::new();
        for task in queue.iter_mut() {
            let is_due = match task.last_sent {
                None => true,
                Some(last) => now.duration_since(last) >= self.retry_interval,
            };
            if is_due {
                task.retry_count += 1;
                task.last_sent = Some(now);
                due.push((task.session_id.clone(), task.payload.clone()));
            }
        }
        due
    }

    async fn resend(&self, session_id: &str, key: &SessionKey, addr: std::net::SocketAddr, payload: &Value) {
        let plaintext = match serde_json::to_vec(payload) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize retry payload");
                return;
            }
        };
        let nonce = crypto::mint_nonce();
        let ciphertext = match crypto::seal(key, &nonce, &plaintext) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, session_id, "failed to seal retry payload");
                return;
            }
        };
        let envelope = chat_core::protocol::SecureMsgEnvelope::new(
            session_id.to_string(),
            hex::encode(nonce),
            hex::encode(ciphertext),
        );
        let bytes = match serde_json::to_vec(&envelope) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode SECURE_MSG envelope");
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&bytes, addr).await {
            tracing::warn!(error = %e, %addr, "retry send failed");
            return;
        }
        let _ = self.deferred.send(DeferredWrite::EgressNonce {
            session_id: session_id.to_string(),
            nonce_hex: hex::encode(nonce),
        });
    }
}
