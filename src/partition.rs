//! Component H: one partition binds a queue/playlist-controller pair to one
//! player, one stored-playlist store, one database handle, and the set of
//! clients attached to it. The core ships with exactly one partition
//! ("default"); the type exists so a future multi-partition server doesn't
//! need to touch `Dispatch`.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::time::Instant;

use tokio::sync::{Mutex, broadcast};

use crate::database::DatabaseBackend;
use crate::idle::IdleBus;
use crate::mpd_protocol::{ChannelName, ReplayGainMode};
use crate::playlist_controller::PlaylistController;
use crate::playlist_store::PlaylistStore;

/// Volume/mute memory, restored when audio output resumes after being
/// disabled. The core has no real output plugins (spec §1), so this is
/// just a plain value the dispatcher reads/writes on `setvol`/`volume`.
#[derive(Debug, Default)]
pub struct MixerMemento {
    pub volume: i32,
    pub replay_gain_mode: ReplayGainMode,
}

/// Client-to-client channels (component F.4): a process-wide broadcast of
/// `(channel, message)` pairs, plus a refcount of how many clients currently
/// subscribe to each channel name so `channels` can list the active set.
/// Real subscription filtering happens client-side: every subscriber gets
/// every message and discards what it isn't subscribed to, same as the
/// `tokio::sync::broadcast` contract.
#[derive(Default)]
pub struct MessageBus {
    sender: Option<broadcast::Sender<(ChannelName, String)>>,
    subscriber_counts: StdMutex<HashMap<ChannelName, usize>>,
}

impl MessageBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            sender: Some(sender),
            subscriber_counts: StdMutex::new(HashMap::new()),
        }
    }

    fn sender(&self) -> &broadcast::Sender<(ChannelName, String)> {
        self.sender.as_ref().expect("MessageBus::new always sets a sender")
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(ChannelName, String)> {
        self.sender().subscribe()
    }

    pub fn mark_subscribed(&self, channel: &ChannelName) {
        *self.subscriber_counts.lock().unwrap().entry(channel.clone()).or_insert(0) += 1;
    }

    pub fn mark_unsubscribed(&self, channel: &ChannelName) {
        let mut counts = self.subscriber_counts.lock().unwrap();
        if let Some(count) = counts.get_mut(channel) {
            *count -= 1;
            if *count == 0 {
                counts.remove(channel);
            }
        }
    }

    pub fn channels(&self) -> Vec<ChannelName> {
        let mut names: Vec<_> = self.subscriber_counts.lock().unwrap().keys().cloned().collect();
        names.sort_by(|a, b| a.0.cmp(&b.0));
        names
    }

    pub fn send(&self, channel: ChannelName, message: String) {
        let _ = self.sender().send((channel, message));
    }
}

pub struct Partition {
    pub name: String,
    pub controller: Mutex<PlaylistController>,
    pub playlists: Mutex<PlaylistStore>,
    pub database: Mutex<DatabaseBackend>,
    pub mixer: Mutex<MixerMemento>,
    pub idle: IdleBus,
    pub messages: MessageBus,
    /// Process start time, for `stats`' `uptime` field.
    pub started_at: Instant,
}

impl Partition {
    pub fn new(
        name: impl Into<String>,
        controller: PlaylistController,
        playlists: PlaylistStore,
        database: DatabaseBackend,
    ) -> Self {
        Self {
            name: name.into(),
            controller: Mutex::new(controller),
            playlists: Mutex::new(playlists),
            database: Mutex::new(database),
            mixer: Mutex::new(MixerMemento::default()),
            idle: IdleBus::new(),
            messages: MessageBus::new(),
            started_at: Instant::now(),
        }
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}
