//! Per-connection session loop (component F): handshake, line parsing,
//! command-list batching, idle/subscription state, output-buffer and
//! connection-timeout limits. Generalizes `mpd_client.rs`'s
//! `handle_client`/`handle_command_list`/`handle_idle`/`perform_command`
//! quartet from a single global `System` lock to dispatching against a
//! shared [`Partition`], with `perform_command` itself replaced by
//! [`dispatch::dispatch`].

use std::sync::Arc;

use color_eyre::Result;
use color_eyre::eyre::{Context, eyre};
use futures::FutureExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::dispatch::{self, ClientContext, Outcome, PasswordEntry};
use crate::error::AckError;
use crate::idle::{self, SubSystem};
use crate::mpd_protocol::{self, Command};
use crate::partition::Partition;

/// Runs one client connection until it disconnects, times out, or sends
/// `close`/`kill`. I/O errors on this socket are returned to the caller
/// (component I), which logs and moves on — per spec.7, one client's socket
/// error never affects its siblings.
#[instrument(skip_all)]
pub async fn handle_client(
    stream: impl AsyncRead + AsyncWrite + Send + Unpin + 'static,
    partition: Arc<Partition>,
    config: Arc<Config>,
    passwords: Arc<[PasswordEntry]>,
    shutdown: Arc<Notify>,
) -> Result<()> {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader).lines();

    writer
        .write_all(format!("OK MPD {}\n", mpd_protocol::VERSION).as_bytes())
        .await
        .wrap_err("Could not send handshake to client")?;

    let default_permission = config.default_permission().wrap_err("Bad default_permissions config")?;
    let mut ctx = ClientContext::new(&partition, default_permission);
    let mut idle_baseline = partition.idle.peek();

    loop {
        let line = match timeout(config.connection_timeout(), reader.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => {
                info!("client disconnected");
                return Ok(());
            }
            Ok(Err(e)) => return Err(e).wrap_err("Could not read from client"),
            Err(_elapsed) => {
                debug!("client idle timeout, closing connection");
                return Ok(());
            }
        };

        if line == "command_list_begin" || line == "command_list_ok_begin" {
            let ack_each = line == "command_list_ok_begin";
            let keep_going =
                handle_command_list(&mut reader, &mut writer, &partition, &config, &passwords, &mut ctx, &shutdown, ack_each)
                    .await?;
            if !keep_going {
                return Ok(());
            }
            continue;
        }

        let mut command = match Command::parse(&line) {
            Ok(c) => c,
            Err(e) => {
                write_line(&mut writer, &AckError::arg(format!("{e:#}")).render(first_word(&line), 0)).await?;
                continue;
            }
        };

        // A client may re-enter idle immediately after one idle resolves;
        // loop until a non-idle command comes back.
        while let Command::Idle(subsystems) = command {
            match handle_idle(&mut reader, &mut writer, &partition, &mut idle_baseline, subsystems).await? {
                Some(next) => command = next,
                None => return Ok(()),
            }
        }

        match dispatch::dispatch(&command, &partition, &mut ctx, &passwords).await {
            Ok(Outcome::Ok(body)) => {
                if !write_response(&mut writer, &config, &body).await? {
                    return Err(eyre!("client's response exceeded max_output_buffer_size"));
                }
            }
            Ok(Outcome::Close) => {
                write_line(&mut writer, "OK\n").await?;
                return Ok(());
            }
            Ok(Outcome::Kill) => {
                write_line(&mut writer, "OK\n").await?;
                shutdown.notify_waiters();
                return Ok(());
            }
            Ok(Outcome::Idle(_)) => unreachable!("Command::Idle is drained by the while-let above"),
            Err(e) => {
                write_line(&mut writer, &e.render(&command_wire_name(&command), 0)).await?;
            }
        }
    }
}

/// Reads and dispatches one `command_list_begin`/`command_list_ok_begin`
/// batch atomically: the first handler error aborts the remaining commands
/// and annotates the `ACK` with the failing 0-based index (spec.7).
/// Returns `Ok(false)` if the client disconnected mid-list.
#[allow(clippy::too_many_arguments)]
async fn handle_command_list(
    reader: &mut tokio::io::Lines<impl AsyncBufRead + Unpin>,
    writer: &mut (impl AsyncWrite + Unpin),
    partition: &Partition,
    config: &Config,
    passwords: &[PasswordEntry],
    ctx: &mut ClientContext,
    shutdown: &Notify,
    ack_each: bool,
) -> Result<bool> {
    let mut commands = Vec::new();
    let mut total_bytes = 0usize;

    loop {
        let Some(line) = reader.next_line().await.wrap_err("Could not read from client")? else {
            return Ok(false);
        };
        if line == "command_list_end" {
            break;
        }

        total_bytes += line.len() + 1;
        if total_bytes > config.max_command_list_bytes() {
            write_line(writer, &AckError::arg("command list too large").render("command_list_end", commands.len())).await?;
            return Ok(true);
        }

        let command = match Command::parse(&line) {
            Ok(c) => c,
            Err(e) => {
                write_line(writer, &AckError::arg(format!("{e:#}")).render(first_word(&line), commands.len())).await?;
                return Ok(true);
            }
        };
        if matches!(command, Command::Idle(_) | Command::NoIdle) {
            write_line(writer, &AckError::not_list(&command_wire_name(&command)).render(&command_wire_name(&command), commands.len())).await?;
            return Ok(true);
        }
        commands.push(command);
    }

    for (index, command) in commands.iter().enumerate() {
        match dispatch::dispatch(command, partition, ctx, passwords).await {
            Ok(Outcome::Ok(body)) => {
                writer.write_all(body.as_bytes()).await.wrap_err("Failed to write response to client")?;
                if ack_each {
                    write_line(writer, "list_OK\n").await?;
                }
            }
            Ok(Outcome::Close) => {
                write_line(writer, "OK\n").await?;
                return Ok(false);
            }
            Ok(Outcome::Kill) => {
                write_line(writer, "OK\n").await?;
                shutdown.notify_waiters();
                return Ok(false);
            }
            Ok(Outcome::Idle(_)) => unreachable!("Idle/NoIdle are rejected above"),
            Err(e) => {
                write_line(writer, &e.render(&command_wire_name(command), index)).await?;
                return Ok(true);
            }
        }
    }
    write_line(writer, "OK\n").await?;
    Ok(true)
}

enum Woke {
    Changed,
    NextLine(std::io::Result<Option<String>>),
}

/// Suspends for one `idle [subsystems...]` call. Per spec.4.A, `IdleBus` is a
/// single process-global bitmask that only ever grows via `add`/OR, never
/// cleared out from under a concurrent waiter; each client instead keeps its
/// own `idle_baseline` snapshot and computes "what's new since I last looked"
/// as `peek() & !baseline`, so concurrent idling clients never race each
/// other over a shared drain.
#[instrument(skip_all)]
async fn handle_idle(
    reader: &mut tokio::io::Lines<impl AsyncBufRead + Unpin>,
    writer: &mut (impl AsyncWrite + Unpin),
    partition: &Partition,
    idle_baseline: &mut u32,
    subsystems: Vec<SubSystem>,
) -> Result<Option<Command>> {
    use futures_concurrency::prelude::*;

    let wanted = if subsystems.is_empty() { idle::all_flags() } else { idle::flags_of(subsystems) };

    loop {
        let pending = partition.idle.peek();
        let fresh = pending & !*idle_baseline & wanted;
        *idle_baseline = pending;
        if fresh != 0 {
            write_line(writer, &idle::render_changed(fresh)).await?;
            write_line(writer, "OK\n").await?;
            return next_command_after_idle(reader).await;
        }

        let next_line = reader.next_line().map(Woke::NextLine);
        let next_event = partition.idle.wait().map(|()| Woke::Changed);

        match (next_line, next_event).race().await {
            Woke::Changed => continue,
            Woke::NextLine(Ok(Some(line))) => {
                let command = Command::parse(&line)?;
                if matches!(command, Command::NoIdle) {
                    write_line(writer, "OK\n").await?;
                    return next_command_after_idle(reader).await;
                }
                warn!(?command, "client sent a command other than noidle while idling, closing connection");
                return Ok(None);
            }
            Woke::NextLine(Ok(None)) => {
                info!("client closed connection while idling");
                return Ok(None);
            }
            Woke::NextLine(Err(e)) => return Err(e).wrap_err("Could not read from client"),
        }
    }
}

async fn next_command_after_idle(reader: &mut tokio::io::Lines<impl AsyncBufRead + Unpin>) -> Result<Option<Command>> {
    let Some(line) = reader.next_line().await.wrap_err("Could not read from client")? else {
        return Ok(None);
    };
    Ok(Some(Command::parse(&line)?))
}

/// Writes `body` followed by `OK\n`, enforcing `max_output_buffer_size`.
/// Returns `false` if the response was rejected for being oversized (the
/// caller closes the connection, since a single handler response can't be
/// partially flushed and resumed).
async fn write_response(writer: &mut (impl AsyncWrite + Unpin), config: &Config, body: &str) -> Result<bool> {
    if body.len() + 3 > config.max_output_buffer_bytes() {
        warn!(bytes = body.len(), "response exceeds max_output_buffer_size");
        return Ok(false);
    }
    writer.write_all(body.as_bytes()).await.wrap_err("Failed to write response to client")?;
    writer.write_all(b"OK\n").await.wrap_err("Failed to write response to client")?;
    Ok(true)
}

async fn write_line(writer: &mut (impl AsyncWrite + Unpin), line: &str) -> Result<()> {
    writer.write_all(line.as_bytes()).await.wrap_err("Failed to write to client")
}

fn first_word(line: &str) -> &str {
    line.split_whitespace().next().unwrap_or("")
}

/// The lowercase wire keyword for a command, derived from its `Debug` name
/// (the `Command` enum's own `#[strum(serialize_all = "lowercase")]` already
/// lowercases the bare identifier with no separator, so this is equivalent
/// to a `strum::Display` impl without adding one to a type this crate
/// doesn't own the derive list for).
fn command_wire_name(cmd: &Command) -> String {
    let debug = format!("{cmd:?}");
    let name = debug.split(['(', ' ']).next().unwrap_or(&debug);
    name.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DatabaseBackend, MemoryDatabase};
    use crate::playlist_controller::PlaylistController;
    use crate::playlist_store::PlaylistStore;
    use camino::Utf8Path;
    use tokio::io::{AsyncReadExt, duplex};

    fn test_partition() -> Arc<Partition> {
        let db = MemoryDatabase::new();
        let playlists = PlaylistStore::load_from_dir(Utf8Path::new("/tmp/beatline-client-tests").to_owned())
            .unwrap_or_else(|_| panic!("could not set up test playlist dir"));
        Arc::new(Partition::new("default", PlaylistController::new(64), playlists, DatabaseBackend::Memory(db)))
    }

    #[tokio::test]
    async fn greeting_then_ping_ok_round_trip() {
        let partition = test_partition();
        let config = Arc::new(Config::default());
        let passwords: Arc<[PasswordEntry]> = Arc::from(Vec::new());
        let shutdown = Arc::new(Notify::new());

        let (client_side, server_side) = duplex(4096);
        let handle = tokio::spawn(handle_client(server_side, partition, config, passwords, shutdown));

        let (mut read_half, mut write_half) = tokio::io::split(client_side);
        write_half.write_all(b"ping\nclose\n").await.unwrap();

        let mut buf = Vec::new();
        read_half.read_to_end(&mut buf).await.unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.starts_with(&format!("OK MPD {}\n", mpd_protocol::VERSION)));
        assert!(text.contains("OK\n"));
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unknown_command_gets_an_ack_not_a_dropped_connection() {
        let partition = test_partition();
        let config = Arc::new(Config::default());
        let passwords: Arc<[PasswordEntry]> = Arc::from(Vec::new());
        let shutdown = Arc::new(Notify::new());

        let (client_side, server_side) = duplex(4096);
        let handle = tokio::spawn(handle_client(server_side, partition, config, passwords, shutdown));

        let (mut read_half, mut write_half) = tokio::io::split(client_side);
        write_half.write_all(b"notacommand\nclose\n").await.unwrap();

        let mut buf = Vec::new();
        read_half.read_to_end(&mut buf).await.unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.contains("ACK"));
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn command_list_runs_all_members_atomically() {
        let partition = test_partition();
        let config = Arc::new(Config::default());
        let passwords: Arc<[PasswordEntry]> = Arc::from(Vec::new());
        let shutdown = Arc::new(Notify::new());

        let (client_side, server_side) = duplex(4096);
        let handle = tokio::spawn(handle_client(server_side, partition, config, passwords, shutdown));

        let (mut read_half, mut write_half) = tokio::io::split(client_side);
        write_half
            .write_all(b"command_list_ok_begin\nstatus\nping\ncommand_list_end\nclose\n")
            .await
            .unwrap();

        let mut buf = Vec::new();
        read_half.read_to_end(&mut buf).await.unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert_eq!(text.matches("list_OK\n").count(), 2);
        handle.await.unwrap().unwrap();
    }
}
