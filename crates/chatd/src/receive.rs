//! Receive loop (C10) — the single task that owns the datagram socket.
//!
//! Per iteration: drain the deferred-write queue, run a pending repository
//! session purge if the sweeper asked for one, wait up to one second for a
//! datagram, and dispatch whatever arrives. Everything here runs on one
//! task, so every repository write this loop performs is naturally
//! serialized against every other — the only concurrent writer is the
//! retry dispatcher's own `EgressNonce` pushes onto the same queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chat_core::protocol::IngressEnvelope;
use chat_services::DeferredWrite;
use tokio::sync::broadcast;

use crate::dispatch::PacketDispatcher;
use crate::envelope;
use crate::handshake;
use crate::server::{ChatServer, HandlerCtx};

/// Set by the sweeper when it wants the next receive iteration to purge
/// stale session rows from the repository.
pub fn spawn_sweeper(server: Arc<ChatServer>, mut shutdown: broadcast::Receiver<()>) -> (Arc<AtomicBool>, tokio::task::JoinHandle<()>) {
    let must_cleanup = Arc::new(AtomicBool::new(false));
    let flag = must_cleanup.clone();
    let handle = tokio::spawn(async move {
        let timeout = Duration::from_secs(server.config.session.inactivity_timeout_secs);
        let sweep_interval = Duration::from_secs(server.config.session.sweep_interval_secs);
        let sweeps_per_purge = server.config.session.sweeps_per_purge.max(1);
        let mut interval = tokio::time::interval(sweep_interval);
        let mut cycles: u32 = 0;
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("sweeper shutting down");
                    return;
                }
                _ = interval.tick() => {
                    let evicted = server.sessions.sweep_inactive(timeout);
                    if !evicted.is_empty() {
                        tracing::debug!(count = evicted.len(), "evicted inactive sessions");
                    }
                    cycles += 1;
                    if cycles >= sweeps_per_purge {
                        cycles = 0;
                        flag.store(true, Ordering::SeqCst);
                    }
                }
            }
        }
    });
    (must_cleanup, handle)
}

fn drain_deferred_writes(server: &ChatServer, deferred_rx: &mut chat_services::DeferredReceiver) {
    while let Ok(write) = deferred_rx.try_recv() {
        match write {
            DeferredWrite::EgressNonce { session_id, nonce_hex } => {
                if let Some(entry) = server.sessions.get(&session_id) {
                    if let Err(e) = server.repo.insert_nonce(entry.session_pk, &nonce_hex) {
                        tracing::warn!(error = %e, session_id, "failed to persist egress nonce");
                    }
                }
            }
            DeferredWrite::TouchSession { session_id, timestamp } => {
                if let Err(e) = server.repo.touch_session(&session_id, timestamp) {
                    tracing::warn!(error = %e, session_id, "failed to persist session touch");
                }
            }
        }
    }
}

/// Runs until `shutdown` fires. Consumes `server`'s socket via repeated
/// `recv_from` calls with a 1s timeout, so the loop still wakes up to check
/// for shutdown even when no datagrams are arriving.
pub async fn run(
    server: Arc<ChatServer>,
    mut deferred_rx: chat_services::DeferredReceiver,
    must_cleanup: Arc<AtomicBool>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let dispatcher = PacketDispatcher::new();
    let mut buf = vec![0u8; server.config.network.buffer_size];

    loop {
        drain_deferred_writes(&server, &mut deferred_rx);
        if must_cleanup.swap(false, Ordering::SeqCst) {
            let threshold = chat_repo::models::unix_now()
                - server.config.session.inactivity_timeout_secs as i64;
            if let Err(e) = server.repo.purge_stale_sessions(threshold) {
                tracing::warn!(error = %e, "session purge failed");
            }
        }

        let recv = tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("receive loop shutting down");
                break;
            }
            result = tokio::time::timeout(Duration::from_secs(1), server.socket.recv_from(&mut buf)) => result,
        };

        let Ok(recv) = recv else {
            continue; // 1s timeout elapsed, loop back to check shutdown/cleanup
        };
        let (len, addr) = match recv {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "socket recv_from failed");
                continue;
            }
        };

        let Ok(envelope) = serde_json::from_slice::<IngressEnvelope>(&buf[..len]) else {
            let _ = handshake::send_transport_error(&server, addr, "Invalid message format").await;
            continue;
        };

        match envelope.envelope_type.as_str() {
            "SESSION_INIT" => {
                if let Err(e) = handshake::handle_session_init(&server, addr, envelope.rest).await {
                    tracing::warn!(error = %e, %addr, "SESSION_INIT handling failed");
                }
            }
            "SECURE_MSG" => {
                handle_secure_msg(&server, &dispatcher, addr, &envelope.rest).await;
            }
            other => {
                let _ = handshake::send_transport_error(
                    &server,
                    addr,
                    format!("Unknown message type '{other}'"),
                )
                .await;
            }
        }
    }
}

async fn handle_secure_msg(
    server: &ChatServer,
    dispatcher: &PacketDispatcher,
    addr: std::net::SocketAddr,
    rest: &serde_json::Value,
) {
    let (entry, payload) = match envelope::unwrap_secure_msg(server, rest) {
        Ok(pair) => pair,
        Err(err) => {
            let _ = handshake::send_transport_error(server, addr, err.message()).await;
            return;
        }
    };

    let ctx = HandlerCtx {
        session_id: entry.session_id.clone(),
        user_pk: entry.user_pk,
    };

    let outcome = dispatcher
        .dispatch(server, &ctx, &payload.packet_type, &payload.data)
        .await;

    match outcome {
        Ok(Some(response)) => {
            if let Err(e) = envelope::send_direct(server, &entry, &response).await {
                tracing::warn!(error = %e, session_id = %entry.session_id, "failed to send direct response");
            }
        }
        Ok(None) => {}
        Err(e) => {
            let _ = handshake::send_transport_error(server, addr, format!("Packet processing failure: {e}")).await;
        }
    }
}
