//! Event loop (component I): accept loop over TCP and/or a Unix socket,
//! `max_connections` enforcement, and the shared shutdown signal `kill`
//! raises. Generalizes the teacher's own `mpd_client::handle_clients`
//! (bind once, loop `accept`, spawn a task per connection) to multiplex two
//! listener kinds and to bound the number of live connections, since the
//! teacher never needed either.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use color_eyre::Result;
use color_eyre::eyre::Context;
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::Notify;
use tokio::task;
use tracing::{info, warn};

use crate::client;
use crate::config::Config;
use crate::dispatch::PasswordEntry;
use crate::partition::Partition;

/// Where the server listens. At least one of `tcp_port`/`unix_socket_path`
/// should be set; both may be, matching real MPD's ability to serve both at
/// once.
pub struct ListenAddrs {
    pub tcp_port: Option<u16>,
    pub unix_socket_path: Option<std::path::PathBuf>,
}

/// Runs both accept loops to completion. Returns once `shutdown` is
/// notified (via the `kill` command) or a listener itself fails to bind.
pub async fn run(
    addrs: ListenAddrs,
    partition: Arc<Partition>,
    config: Arc<Config>,
    passwords: Arc<[PasswordEntry]>,
    player_driver: task::JoinHandle<()>,
) -> Result<()> {
    let shutdown = Arc::new(Notify::new());
    let live_connections = Arc::new(AtomicUsize::new(0));

    let mut listeners: Vec<task::JoinHandle<Result<()>>> = Vec::new();

    if let Some(port) = addrs.tcp_port {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .wrap_err_with(|| format!("Could not bind TCP port {port}"))?;
        info!(port, "listening");
        listeners.push(task::spawn(accept_tcp(
            listener,
            Arc::clone(&partition),
            Arc::clone(&config),
            Arc::clone(&passwords),
            Arc::clone(&shutdown),
            Arc::clone(&live_connections),
        )));
    }

    if let Some(path) = addrs.unix_socket_path {
        let listener = bind_unix_socket(&path)?;
        info!(?path, "listening");
        listeners.push(task::spawn(accept_unix(
            listener,
            partition,
            config,
            passwords,
            Arc::clone(&shutdown),
            live_connections,
        )));
    }

    if listeners.is_empty() {
        warn!("no listen addresses configured, server has nothing to do");
        return Ok(());
    }

    tokio::select! {
        () = shutdown.notified() => {
            info!("shutting down on kill");
            for handle in listeners {
                handle.abort();
            }
            player_driver.abort();
            Ok(())
        }
        result = futures::future::select_all(listeners) => {
            let (outcome, _index, _rest) = result;
            outcome.wrap_err("listener task panicked")?
        }
    }
}

fn bind_unix_socket(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path).wrap_err_with(|| format!("Could not remove stale socket: {}", path.display()))?;
    }
    UnixListener::bind(path).wrap_err_with(|| format!("Could not bind Unix socket: {}", path.display()))
}

async fn accept_tcp(
    listener: TcpListener,
    partition: Arc<Partition>,
    config: Arc<Config>,
    passwords: Arc<[PasswordEntry]>,
    shutdown: Arc<Notify>,
    live_connections: Arc<AtomicUsize>,
) -> Result<()> {
    loop {
        let (stream, addr) = listener.accept().await.wrap_err("Could not accept TCP connection")?;
        if !try_reserve_slot(&live_connections, config.max_connections) {
            warn!(%addr, "rejecting connection: max_connections reached");
            drop(stream);
            continue;
        }
        spawn_client(stream, &partition, &config, &passwords, &shutdown, &live_connections);
    }
}

async fn accept_unix(
    listener: UnixListener,
    partition: Arc<Partition>,
    config: Arc<Config>,
    passwords: Arc<[PasswordEntry]>,
    shutdown: Arc<Notify>,
    live_connections: Arc<AtomicUsize>,
) -> Result<()> {
    loop {
        let (stream, _addr) = listener.accept().await.wrap_err("Could not accept Unix connection")?;
        if !try_reserve_slot(&live_connections, config.max_connections) {
            warn!("rejecting connection: max_connections reached");
            drop(stream);
            continue;
        }
        spawn_client(stream, &partition, &config, &passwords, &shutdown, &live_connections);
    }
}

/// `client::handle_client` itself has no notion of `max_connections` (it
/// only knows about the one connection it's handling), so the accept loops
/// enforce the cap here with a simple atomic counter, releasing the slot
/// when the spawned task ends either way.
fn try_reserve_slot(live_connections: &Arc<AtomicUsize>, max: usize) -> bool {
    let mut current = live_connections.load(Ordering::Relaxed);
    loop {
        if current >= max {
            return false;
        }
        match live_connections.compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return true,
            Err(observed) => current = observed,
        }
    }
}

fn spawn_client(
    stream: impl tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
    partition: &Arc<Partition>,
    config: &Arc<Config>,
    passwords: &Arc<[PasswordEntry]>,
    shutdown: &Arc<Notify>,
    live_connections: &Arc<AtomicUsize>,
) {
    let partition = Arc::clone(partition);
    let config = Arc::clone(config);
    let passwords = Arc::clone(passwords);
    let shutdown = Arc::clone(shutdown);
    let live_connections = Arc::clone(live_connections);
    task::spawn(async move {
        if let Err(e) = client::handle_client(stream, partition, config, passwords, shutdown).await {
            warn!("error handling client: {e:?}");
        } else {
            info!("client disconnected");
        }
        live_connections.fetch_sub(1, Ordering::AcqRel);
    });
}
