//! chatd — UDPChat-AI daemon entry point.

mod assistant;
mod dispatch;
mod envelope;
mod handlers;
mod handshake;
mod receive;
mod server;
#[cfg(test)]
mod test_support;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use chat_core::config::ChatConfig;
use chat_core::crypto;
use chat_repo::{Repository, SqliteRepository};
use chat_services::{deferred, RetryDispatcher, SessionTable};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use server::ChatServer;

fn print_usage() {
    println!("Usage: chatd <command>");
    println!();
    println!("  start [ip] [port]   Run the daemon (defaults from config/environment)");
    println!("  init_db             Bootstrap the database schema and exit");
    println!("  test <name>         Run a named diagnostic check and exit");
    println!();
    println!("Examples:");
    println!("  chatd start");
    println!("  chatd start 0.0.0.0 9999");
    println!("  chatd init_db");
    println!("  chatd test crypto");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let refs: Vec<&str> = args.iter().map(String::as_str).collect();

    match refs.as_slice() {
        [] | ["start"] => cmd_start(None, None).await,
        ["start", ip] => cmd_start(Some(ip), None).await,
        ["start", ip, port] => cmd_start(Some(ip), Some(port)).await,
        ["init_db"] => cmd_init_db(),
        ["test", name] => cmd_test(name),
        _ => {
            print_usage();
            anyhow::bail!("unrecognized command line");
        }
    }
}

async fn cmd_start(ip: Option<&str>, port: Option<&str>) -> Result<()> {
    let mut config = ChatConfig::load().context("loading configuration")?;
    if let Some(ip) = ip {
        config.network.server_ip = ip.to_string();
    }
    if let Some(port) = port {
        config.network.server_port = port.parse().context("port must be a number")?;
    }

    let keys = crypto::load_or_create_server_keys(
        &config.storage.private_key_path(),
        &config.storage.public_key_path(),
    )
    .context("loading server keys")?;
    tracing::info!(fingerprint = %keys.fingerprint, "server keys ready");

    let repo: Arc<dyn Repository> = {
        let sqlite = SqliteRepository::open(&config.storage.db_path()).context("opening database")?;
        sqlite.init_schema().context("initializing schema")?;
        Arc::new(sqlite)
    };

    let bind_addr: SocketAddr = format!("{}:{}", config.network.server_ip, config.network.server_port)
        .parse()
        .context("invalid bind address")?;
    let socket = Arc::new(UdpSocket::bind(bind_addr).await.context("binding UDP socket")?);
    tracing::info!(%bind_addr, "listening");

    let sessions = SessionTable::new();
    let (deferred_tx, deferred_rx) = deferred::channel();
    let (shutdown_tx, _shutdown_rx) = broadcast::channel(4);

    let dispatcher = RetryDispatcher::new(
        sessions.clone(),
        socket.clone(),
        deferred_tx.clone(),
        config.dispatcher.max_retries,
        Duration::from_secs(config.dispatcher.retry_interval_secs),
    );
    let assistant = assistant::build(&config.assistant);

    let server = Arc::new(ChatServer {
        config,
        keys,
        repo,
        sessions,
        dispatcher: dispatcher.clone(),
        socket,
        deferred: deferred_tx,
        assistant,
    });

    let dispatcher_task = dispatcher.spawn(shutdown_tx.subscribe());
    let (must_cleanup, sweeper_task) = receive::spawn_sweeper(server.clone(), shutdown_tx.subscribe());
    let signal_task = spawn_signal_watcher(shutdown_tx.clone())?;

    receive::run(server.clone(), deferred_rx, must_cleanup, shutdown_tx.subscribe()).await;

    // The receive loop only returns once it has observed shutdown itself,
    // but make sure every other task heard it too before we exit.
    let _ = shutdown_tx.send(());
    let _ = tokio::join!(dispatcher_task, sweeper_task, signal_task);

    tracing::info!("shutdown complete");
    Ok(())
}

/// Watches for SIGINT/SIGTERM and fires `shutdown` the moment either
/// arrives, so every task tied to the same broadcast channel unwinds.
fn spawn_signal_watcher(shutdown: broadcast::Sender<()>) -> Result<tokio::task::JoinHandle<()>> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("installing SIGTERM handler")?;
    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        }
        let _ = shutdown.send(());
    }))
}

fn cmd_init_db() -> Result<()> {
    let config = ChatConfig::load().context("loading configuration")?;
    std::fs::create_dir_all(config.storage.db_dir()).context("creating database directory")?;
    let repo = SqliteRepository::open(&config.storage.db_path()).context("opening database")?;
    repo.init_schema().context("initializing schema")?;
    println!("Initialized database at {}", config.storage.db_path().display());
    Ok(())
}

fn cmd_test(name: &str) -> Result<()> {
    match name {
        "crypto" => test_crypto(),
        "handshake" => test_handshake(),
        other => anyhow::bail!("unknown test '{other}' (known: crypto, handshake)"),
    }
}

/// Round-trips sign/verify and seal/open against a freshly minted keypair
/// kept entirely in a scratch directory — no daemon state is touched.
fn test_crypto() -> Result<()> {
    let scratch = scratch_dir("crypto");
    let keys = crypto::load_or_create_server_keys(&scratch.join("private.pem"), &scratch.join("public.pem"))
        .context("generating diagnostic keypair")?;

    let session_key = crypto::SessionKey::generate();
    let signature = crypto::sign(session_key.as_bytes(), &keys.private)?;
    crypto::verify(session_key.as_bytes(), &signature, &keys.public)?;

    let nonce = crypto::mint_nonce();
    let plaintext = b"diagnostic payload";
    let ciphertext = crypto::seal(&session_key, &nonce, plaintext)?;
    let opened = crypto::open(&session_key, &nonce, &ciphertext)?;
    anyhow::ensure!(opened == plaintext, "seal/open round-trip mismatch");

    let _ = std::fs::remove_dir_all(&scratch);
    println!("crypto: sign/verify and seal/open round-trips OK (fingerprint {})", keys.fingerprint);
    Ok(())
}

/// Stands in for a client during the `SESSION_INIT` exchange: wraps a fresh
/// session key under a locally generated "client" keypair and confirms it
/// unwraps back to the same bytes, without opening a socket.
fn test_handshake() -> Result<()> {
    let server_dir = scratch_dir("handshake-server");
    let client_dir = scratch_dir("handshake-client");
    let server_keys =
        crypto::load_or_create_server_keys(&server_dir.join("private.pem"), &server_dir.join("public.pem"))
            .context("generating diagnostic server keypair")?;
    let client_keys =
        crypto::load_or_create_server_keys(&client_dir.join("private.pem"), &client_dir.join("public.pem"))
            .context("generating diagnostic client keypair")?;

    let client_key_b64 = crypto::encode_public_key_b64(&client_keys.public)?;
    let session_key = crypto::SessionKey::generate();
    let wrapped = crypto::wrap_session_key(&client_key_b64, session_key.as_bytes())
        .context("wrapping session key under client public key")?;
    let unwrapped = crypto::unwrap_session_key(&client_keys.private, &wrapped)
        .context("unwrapping session key with client private key")?;
    anyhow::ensure!(unwrapped == session_key.as_bytes(), "unwrapped key does not match original");

    let signature = crypto::sign(session_key.as_bytes(), &server_keys.private)?;
    crypto::verify(session_key.as_bytes(), &signature, &server_keys.public)?;

    let _ = std::fs::remove_dir_all(&server_dir);
    let _ = std::fs::remove_dir_all(&client_dir);
    println!("handshake: session key wrap/unwrap and server signature round-trips OK");
    Ok(())
}

fn scratch_dir(label: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("chatd-test-{label}-{}", std::process::id()))
}
