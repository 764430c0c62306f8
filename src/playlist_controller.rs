//! Combines Queue (C) and PlayerControl (D) into the semantic play/seek/next
//! operations a Partition exposes to the dispatcher (component E).
//!
//! Grounded on `original_source/`'s playlist/player glue (the `current`
//! and `queued` order-index pair, `UpdateQueuedSong`) per SPEC_FULL.md §4.E.

use crate::idle::{IdleBus, SubSystem};
use crate::player_control::{ErrorKind, PlayerControl, PlayerState};
use crate::queue::{Order, Queue, QueueEntry, SongId};

/// `current`/`queued` are order indices, `-1` represented as `None`.
pub struct PlaylistController {
    pub queue: Queue,
    pub player: PlayerControl,
    current: Option<Order>,
    queued: Option<Order>,
    stop_on_error: bool,
    consecutive_errors: u32,
}

impl PlaylistController {
    pub fn new(max_length: usize) -> Self {
        Self {
            queue: Queue::new(max_length),
            player: PlayerControl::new(),
            current: None,
            queued: None,
            stop_on_error: false,
            consecutive_errors: 0,
        }
    }

    pub fn current_order(&self) -> Option<Order> {
        self.current
    }

    pub fn queued_order(&self) -> Option<Order> {
        self.queued
    }

    pub fn current_entry(&self) -> Option<&QueueEntry> {
        self.current.and_then(|o| self.queue.entry_at_order(o))
    }

    /// spec.4.E UpdateQueuedSong: recomputes what the player should be told
    /// to decode next, and issues CANCEL/QUEUE against PlayerControl only
    /// when the target actually changed.
    pub async fn update_queued_song(&mut self, idle: &IdleBus) {
        let next_order = self.next_order();

        if next_order == self.queued {
            return;
        }

        if self.queued.is_some() {
            self.player.cancel().await;
        }

        self.queued = next_order;

        match next_order {
            Some(order) => {
                if order == Order(0) && self.queue.random && !self.queue.single {
                    self.queue.shuffle_order(self.current);
                }
                if let Some(entry) = self.queue.entry_at_order(order) {
                    self.player.play(entry.song.clone()).await;
                }
            }
            None => {}
        }
        idle.add_subsystem(SubSystem::Playlist);
    }

    fn next_order(&self) -> Option<Order> {
        let Some(current) = self.current else {
            return (self.queue.len() > 0).then_some(Order(0));
        };
        if self.queue.single && self.queue.repeat {
            return Some(current);
        }
        if current.0 + 1 < self.queue.len() {
            return Some(Order(current.0 + 1));
        }
        if self.queue.repeat {
            return (self.queue.len() > 0).then_some(Order(0));
        }
        None
    }

    /// spec.4.E "player-started-next-song": called once the player thread
    /// has actually begun decoding the pre-queued song.
    pub fn on_started_next_song(&mut self, idle: &IdleBus) {
        let old_current = self.current;
        self.current = self.queued;
        self.queued = None;
        if self.queue.consume {
            if let Some(order) = old_current {
                if let Some(pos) = self.queue.position_of_order(order) {
                    let _ = self.queue.delete_position(pos);
                }
            }
        }
        idle.add_subsystem(SubSystem::Player);
    }

    /// spec.4.E "player-stopped": decides whether to advance or halt, based
    /// on the error slot and how many consecutive errors have occurred.
    pub async fn on_player_stopped(&mut self, error_kind: ErrorKind, idle: &IdleBus) {
        let critical = matches!(error_kind, ErrorKind::Output)
            || self.stop_on_error
            || self.consecutive_errors as usize >= self.queue.len().max(1);

        if error_kind != ErrorKind::None {
            self.consecutive_errors += 1;
        } else {
            self.consecutive_errors = 0;
        }

        if critical {
            self.current = None;
            self.queued = None;
            idle.add_subsystem(SubSystem::Player);
            return;
        }

        let next = self.next_order();
        self.current = next;
        self.queued = None;
        if let Some(order) = next {
            if let Some(entry) = self.queue.entry_at_order(order) {
                self.player.play(entry.song.clone()).await;
            }
        }
        idle.add_subsystem(SubSystem::Player);
    }

    async fn propagate_border_pause(&self) {
        self.player
            .set_border_pause(self.queue.single && !self.queue.repeat)
            .await;
    }

    pub async fn set_repeat(&mut self, value: bool, idle: &IdleBus) {
        self.queue.repeat = value;
        self.propagate_border_pause().await;
        self.update_queued_song(idle).await;
        idle.add_subsystem(SubSystem::Options);
    }

    pub async fn set_single(&mut self, value: bool, idle: &IdleBus) {
        self.queue.single = value;
        self.propagate_border_pause().await;
        self.update_queued_song(idle).await;
        idle.add_subsystem(SubSystem::Options);
    }

    pub async fn set_random(&mut self, value: bool, idle: &IdleBus) {
        self.queue.random = value;
        if value {
            self.queue.shuffle_order(self.current);
        } else {
            self.queue.restore_order();
        }
        self.update_queued_song(idle).await;
        idle.add_subsystem(SubSystem::Options);
    }

    pub async fn set_consume(&mut self, value: bool, idle: &IdleBus) {
        self.queue.consume = value;
        idle.add_subsystem(SubSystem::Options);
    }

    /// Begin (or resume) playback at the given order; used by `play [pos]`.
    pub async fn play_order(&mut self, order: Order, idle: &IdleBus) {
        self.current = Some(order);
        self.queued = None;
        if let Some(entry) = self.queue.entry_at_order(order) {
            self.player.play(entry.song.clone()).await;
        }
        self.update_queued_song(idle).await;
        idle.add_subsystem(SubSystem::Player);
    }

    pub async fn play_id(&mut self, id: SongId, idle: &IdleBus) -> Option<()> {
        let order = self.queue.order_of_position(self.queue.position_of_id(id)?)?;
        self.play_order(order, idle).await;
        Some(())
    }

    pub async fn stop(&mut self, idle: &IdleBus) {
        self.player.stop().await;
        self.current = None;
        self.queued = None;
        idle.add_subsystem(SubSystem::Player);
    }

    pub async fn pause_toggle(&mut self, force: Option<bool>) {
        let state = self.player.snapshot().await.state;
        let should_pause = force.unwrap_or(state != PlayerState::Pause);
        if should_pause {
            self.player.pause().await;
        } else if state == PlayerState::Pause {
            self.player.pause().await;
        }
    }

    /// `next`/`previous`: advances/retreats one order step and replays.
    pub async fn seek_order_delta(&mut self, delta: i64, idle: &IdleBus) -> bool {
        let Some(current) = self.current else {
            return false;
        };
        let target = current.0 as i64 + delta;
        if target < 0 || target as usize >= self.queue.len() {
            return false;
        }
        self.play_order(Order(target as usize), idle).await;
        true
    }

    /// current-song-invalidated path (spec.4.C delete): if the deleted
    /// position held the currently playing order, stop the player.
    pub async fn notify_position_deleted(&mut self, deleted_order: Order, idle: &IdleBus) {
        if self.current == Some(deleted_order) {
            self.stop(idle).await;
        } else if let Some(current) = self.current {
            if deleted_order.0 < current.0 {
                self.current = Some(Order(current.0 - 1));
            }
        }
        if let Some(queued) = self.queued {
            if deleted_order.0 < queued.0 {
                self.queued = Some(Order(queued.0 - 1));
            } else if deleted_order == queued {
                self.queued = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::{DetachedSong, Tags};

    fn song(name: &str) -> DetachedSong {
        DetachedSong::new(name, Tags::default())
    }

    fn controller_with_songs(names: &[&str]) -> PlaylistController {
        let mut pc = PlaylistController::new(16);
        for name in names {
            pc.queue.append(song(name), None).unwrap();
        }
        spawn_stand_in_player(pc.player.clone());
        pc
    }

    /// These tests exercise `PlaylistController` directly, with no partition
    /// around it to run the real player driver, so `play`/`stop`/`pause`
    /// would otherwise block forever waiting for an acknowledgement. Service
    /// the rendezvous with the simplest possible responder instead.
    fn spawn_stand_in_player(player: crate::player_control::PlayerControl) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let command = player.wait_for_command().await;
                if command == crate::player_control::PlayerCommand::Exit {
                    player.acknowledge(PlayerState::Stop).await;
                    return;
                }
                player.acknowledge(PlayerState::Play).await;
            }
        })
    }

    #[tokio::test]
    async fn next_order_advances_sequentially_without_repeat() {
        let mut pc = controller_with_songs(&["a", "b", "c"]);
        let idle = IdleBus::new();
        pc.play_order(Order(0), &idle).await;
        assert_eq!(pc.next_order(), Some(Order(1)));
    }

    #[tokio::test]
    async fn next_order_wraps_with_repeat() {
        let mut pc = controller_with_songs(&["a", "b"]);
        let idle = IdleBus::new();
        pc.queue.repeat = true;
        pc.play_order(Order(1), &idle).await;
        assert_eq!(pc.next_order(), Some(Order(0)));
    }

    #[tokio::test]
    async fn single_and_repeat_keeps_returning_current() {
        let mut pc = controller_with_songs(&["a", "b", "c"]);
        let idle = IdleBus::new();
        pc.queue.single = true;
        pc.queue.repeat = true;
        pc.play_order(Order(1), &idle).await;
        assert_eq!(pc.next_order(), Some(Order(1)));
        assert_eq!(pc.next_order(), Some(Order(1)));
    }

    #[tokio::test]
    async fn consume_removes_old_current_on_advance() {
        let mut pc = controller_with_songs(&["a", "b", "c"]);
        let idle = IdleBus::new();
        pc.queue.consume = true;
        pc.play_order(Order(0), &idle).await;
        pc.queued = Some(Order(1));
        pc.on_started_next_song(&idle);
        assert_eq!(pc.queue.len(), 2);
        assert_eq!(pc.current_order(), Some(Order(1)));
    }

    #[tokio::test]
    async fn delete_of_current_position_stops_playback() {
        let mut pc = controller_with_songs(&["a", "b"]);
        let idle = IdleBus::new();
        pc.play_order(Order(0), &idle).await;
        pc.notify_position_deleted(Order(0), &idle).await;
        assert_eq!(pc.current_order(), None);
    }
}
