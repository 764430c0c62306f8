//! Drives the Player side of the `PlayerControl` rendezvous (component D).
//!
//! The core has no decoder or audio output (spec §1 Non-goals) and the
//! actual decode-thread source was not part of the retrieved reference
//! material, so this is a decoder-free stand-in worked out from
//! `PlayerControl.cxx`'s command set: it services every command the Main
//! side can send, applies the STOP/PAUSE/PLAY state transition
//! synchronously (no actual decoding happens in between), and calls back
//! into the owning `Partition`'s `PlaylistController` exactly where the
//! real player thread would — once playback of a queued song "starts" and
//! whenever it "stops". One of these runs per partition for the lifetime
//! of the process; `main.rs` spawns it alongside the accept loops.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::idle::SubSystem;
use crate::partition::Partition;
use crate::player_control::{PlayerCommand, PlayerState};

/// Spawns the driving task and returns its handle. The task runs until it
/// receives `PlayerCommand::Exit` (issued by `kill`), so it is safe to
/// `abort()` on shutdown same as the listener tasks in `server.rs`.
pub fn spawn(partition: Arc<Partition>) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn(run(partition))
}

#[instrument(skip(partition), fields(partition = %partition.name))]
async fn run(partition: Arc<Partition>) {
    let player = partition.controller.lock().await.player.clone();
    let mut state = PlayerState::Stop;

    loop {
        let command = player.wait_for_command().await;
        debug!(?command, ?state, "player driver servicing command");
        match command {
            PlayerCommand::None => unreachable!("wait_for_command never returns None"),
            PlayerCommand::Exit => {
                player.acknowledge(state).await;
                return;
            }
            PlayerCommand::Queue(song) => {
                let duration = song.duration();
                player.set_total_time(duration, song.format).await;
                player.set_elapsed(Some(std::time::Duration::ZERO), None).await;
                state = PlayerState::Play;
                player.acknowledge(state).await;
                partition.controller.lock().await.on_started_next_song(&partition.idle);
            }
            PlayerCommand::Stop => {
                player.set_elapsed(None, None).await;
                player.set_total_time(None, None).await;
                state = PlayerState::Stop;
                player.acknowledge(state).await;
            }
            PlayerCommand::Pause => {
                state = match state {
                    PlayerState::Play => PlayerState::Pause,
                    PlayerState::Pause => PlayerState::Play,
                    PlayerState::Stop => PlayerState::Stop,
                };
                player.acknowledge(state).await;
            }
            PlayerCommand::Seek(where_) => {
                player.set_elapsed(Some(where_), None).await;
                if state == PlayerState::Stop {
                    state = PlayerState::Play;
                }
                player.acknowledge(state).await;
            }
            PlayerCommand::Cancel => {
                player.acknowledge(state).await;
            }
            PlayerCommand::CloseAudio | PlayerCommand::UpdateAudio | PlayerCommand::Refresh => {
                player.acknowledge(state).await;
            }
        }
        partition.idle.add_subsystem(SubSystem::Player);
    }
}
