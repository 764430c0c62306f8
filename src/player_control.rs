//! Cross-thread rendezvous between the Main task and a Partition's player
//! thread (component D).
//!
//! Grounded on `original_source/src/PlayerControl.cxx`: one mutex, two
//! condition variables, a single pending-command slot. The Main side and the
//! Player side are both async-friendly here (the Main side runs inside the
//! current-thread reactor; the player thread itself stays a plain OS thread
//! and blocks on `Notify::notified()` synchronously via `Handle::block_on`,
//! per SPEC_FULL.md §4.D).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::instrument;

use crate::song::{AudioFormat, DetachedSong, SongTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Stop,
    Pause,
    Play,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    None,
    Exit,
    Stop,
    Pause,
    Seek(SongTime),
    CloseAudio,
    UpdateAudio,
    Queue(Box<DetachedSong>),
    Cancel,
    Refresh,
}

impl Default for PlayerCommand {
    fn default() -> Self {
        Self::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    None,
    Decoder,
    Output,
}

/// The rendezvous object itself. Cheaply `Clone`-able (it's an `Arc` of
/// shared state); both the Main-side handle and the Player thread hold one.
#[derive(Debug, Clone)]
pub struct PlayerControl {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    /// signalled by the player thread: "command has been consumed / state changed"
    client_cond: Notify,
    /// signalled by a client: "a new command is pending"
    player_cond: Notify,
}

#[derive(Debug)]
struct State {
    command: PlayerCommand,
    player_state: PlayerState,
    next_song: Option<DetachedSong>,
    seek_where: Option<SongTime>,
    border_pause: bool,
    error: (ErrorKind, String),
    total_time: Option<SongTime>,
    elapsed: Option<SongTime>,
    bit_rate: Option<u64>,
    audio_format: Option<AudioFormat>,
    cross_fade: Duration,
    tagged_song: Option<DetachedSong>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            command: PlayerCommand::None,
            player_state: PlayerState::Stop,
            next_song: None,
            seek_where: None,
            border_pause: false,
            error: (ErrorKind::None, String::new()),
            total_time: None,
            elapsed: None,
            bit_rate: None,
            audio_format: None,
            cross_fade: Duration::ZERO,
            tagged_song: None,
        }
    }
}

/// A read-only snapshot of the fields `status` cares about.
#[derive(Debug, Clone)]
pub struct PlayerSnapshot {
    pub state: PlayerState,
    pub elapsed: Option<SongTime>,
    pub total_time: Option<SongTime>,
    pub bit_rate: Option<u64>,
    pub audio_format: Option<AudioFormat>,
    pub error: Option<String>,
    pub cross_fade: Duration,
}

impl PlayerControl {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                client_cond: Notify::new(),
                player_cond: Notify::new(),
            }),
        }
    }

    /// Steps 1-5 of the rendezvous contract (spec.4.D): wait for an idle
    /// slot, publish the command, wake the player, then wait for it to clear
    /// the slot again (acknowledging receipt).
    #[instrument(skip(self, prepare))]
    async fn lock_synchronous_command(&self, prepare: impl FnOnce(&mut State) -> PlayerCommand) {
        let mut guard = self.inner.state.lock().await;
        while guard.command != PlayerCommand::None {
            drop(guard);
            self.inner.client_cond.notified().await;
            guard = self.inner.state.lock().await;
        }
        let command = prepare(&mut guard);
        guard.command = command;
        self.inner.player_cond.notify_waiters();
        drop(guard);

        loop {
            let guard = self.inner.state.lock().await;
            if guard.command == PlayerCommand::None {
                break;
            }
            drop(guard);
            self.inner.client_cond.notified().await;
        }
    }

    pub async fn play(&self, song: DetachedSong) {
        self.lock_synchronous_command(|state| {
            state.next_song = Some(song.clone());
            PlayerCommand::Queue(Box::new(song))
        })
        .await;
    }

    pub async fn stop(&self) {
        self.lock_synchronous_command(|_| PlayerCommand::Stop).await;
    }

    pub async fn pause(&self) {
        self.lock_synchronous_command(|_| PlayerCommand::Pause).await;
    }

    pub async fn seek(&self, where_: SongTime) {
        self.lock_synchronous_command(|state| {
            state.seek_where = Some(where_);
            PlayerCommand::Seek(where_)
        })
        .await;
    }

    pub async fn cancel(&self) {
        self.lock_synchronous_command(|state| {
            state.next_song = None;
            PlayerCommand::Cancel
        })
        .await;
    }

    pub async fn exit(&self) {
        self.lock_synchronous_command(|_| PlayerCommand::Exit).await;
    }

    pub async fn set_border_pause(&self, border_pause: bool) {
        self.inner.state.lock().await.border_pause = border_pause;
    }

    pub async fn set_cross_fade(&self, duration: Duration) {
        self.inner.state.lock().await.cross_fade = duration;
    }

    /// Called by the player thread when it has consumed `command` and
    /// applied any resulting state transition; clears the slot and wakes
    /// whoever is waiting in `lock_synchronous_command`.
    pub async fn acknowledge(&self, new_state: PlayerState) {
        let mut guard = self.inner.state.lock().await;
        guard.command = PlayerCommand::None;
        guard.player_state = new_state;
        drop(guard);
        self.inner.client_cond.notify_waiters();
    }

    /// Called by the player thread to wait for the next command.
    pub async fn wait_for_command(&self) -> PlayerCommand {
        loop {
            let guard = self.inner.state.lock().await;
            if guard.command != PlayerCommand::None {
                return guard.command.clone();
            }
            drop(guard);
            self.inner.player_cond.notified().await;
        }
    }

    pub async fn set_error(&self, kind: ErrorKind, message: impl Into<String>) {
        let mut guard = self.inner.state.lock().await;
        guard.error = (kind, message.into());
        guard.player_state = PlayerState::Stop;
    }

    pub async fn clear_error(&self) {
        self.inner.state.lock().await.error = (ErrorKind::None, String::new());
    }

    pub async fn set_elapsed(&self, elapsed: Option<SongTime>, bit_rate: Option<u64>) {
        let mut guard = self.inner.state.lock().await;
        guard.elapsed = elapsed;
        guard.bit_rate = bit_rate;
    }

    pub async fn set_total_time(&self, total: Option<SongTime>, format: Option<AudioFormat>) {
        let mut guard = self.inner.state.lock().await;
        guard.total_time = total;
        guard.audio_format = format;
    }

    pub async fn set_tagged_song(&self, song: DetachedSong) {
        self.inner.state.lock().await.tagged_song = Some(song);
    }

    pub async fn snapshot(&self) -> PlayerSnapshot {
        let guard = self.inner.state.lock().await;
        PlayerSnapshot {
            state: guard.player_state,
            elapsed: guard.elapsed,
            total_time: guard.total_time,
            bit_rate: guard.bit_rate,
            audio_format: guard.audio_format,
            error: (guard.error.0 != ErrorKind::None).then(|| guard.error.1.clone()),
            cross_fade: guard.cross_fade,
        }
    }

    pub async fn has_next_song(&self) -> bool {
        self.inner.state.lock().await.next_song.is_some()
    }
}

impl Default for PlayerControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::Tags;
    use std::time::Duration as StdDuration;

    fn song(name: &str) -> DetachedSong {
        DetachedSong::new(name, Tags::default())
    }

    #[tokio::test]
    async fn play_then_acknowledge_clears_command_slot() {
        let pc = PlayerControl::new();
        let pc2 = pc.clone();
        let player = tokio::spawn(async move {
            let cmd = pc2.wait_for_command().await;
            assert!(matches!(cmd, PlayerCommand::Queue(_)));
            pc2.acknowledge(PlayerState::Play).await;
        });
        tokio::time::timeout(StdDuration::from_secs(1), pc.play(song("a")))
            .await
            .expect("rendezvous should complete")
        ;
        player.await.unwrap();
        assert_eq!(pc.snapshot().await.state, PlayerState::Play);
    }

    #[tokio::test]
    async fn error_transitions_to_stop_and_is_visible_until_cleared() {
        let pc = PlayerControl::new();
        pc.set_error(ErrorKind::Output, "device gone").await;
        let snap = pc.snapshot().await;
        assert_eq!(snap.state, PlayerState::Stop);
        assert_eq!(snap.error.as_deref(), Some("device gone"));
        pc.clear_error().await;
        assert_eq!(pc.snapshot().await.error, None);
    }

    #[tokio::test]
    async fn second_command_waits_for_first_to_clear() {
        let pc = PlayerControl::new();
        let pc2 = pc.clone();
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let order2 = order.clone();
        let player = tokio::spawn(async move {
            for _ in 0..2 {
                let cmd = pc2.wait_for_command().await;
                order2.lock().await.push(format!("{cmd:?}"));
                pc2.acknowledge(PlayerState::Stop).await;
            }
        });
        pc.stop().await;
        pc.pause().await;
        player.await.unwrap();
        assert_eq!(order.lock().await.len(), 2);
    }
}
