//! The global "what changed" event bus (component A).
//!
//! Grounded on `original_source/src/Idle.hxx` + `ClientIdle.cxx`: a single
//! bitmask, set from any thread, drained by the main loop. The C++ version
//! wakes the reactor with an eventfd write; here a `tokio::sync::Notify`
//! plays the same role (see SPEC_FULL.md §4.A).

use std::sync::Mutex;

use strum::{EnumIter, EnumString, IntoEnumIterator};
use tokio::sync::Notify;

/// One bit per event class. Order is stable: it is the bit position, not
/// just an enum discriminant, so keep it append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumString, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SubSystem {
    Database,
    Update,
    StoredPlaylist,
    Playlist,
    Player,
    Mixer,
    Output,
    Options,
    Partition,
    Sticker,
    Subscription,
    Message,
    Neighbor,
    Mount,
}

impl SubSystem {
    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// All 14 bits set.
pub fn all_flags() -> u32 {
    SubSystem::iter().map(SubSystem::bit).fold(0, |a, b| a | b)
}

pub fn flags_of(subsystems: impl IntoIterator<Item = SubSystem>) -> u32 {
    subsystems.into_iter().map(SubSystem::bit).fold(0, |a, b| a | b)
}

/// Render the set bits of `flags` as `changed: <name>\n` lines, one per bit,
/// in enum-declaration order (matches `ClientIdle.cxx`'s iteration over
/// `idle_get_names()`).
pub fn render_changed(flags: u32) -> String {
    let mut out = String::new();
    for subsystem in SubSystem::iter() {
        if flags & subsystem.bit() != 0 {
            out.push_str("changed: ");
            out.push_str(&subsystem.to_string());
            out.push('\n');
        }
    }
    out
}

/// Process-global pending bitmask plus the wakeup used to unstick the main
/// loop's idle-client drain.
#[derive(Debug, Default)]
pub struct IdleBus {
    pending: Mutex<u32>,
    wakeup: Notify,
}

impl IdleBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Thread-safe: `pending |= flags`. Wakes the main loop exactly when a
    /// bit transitions from unset to set (spec.4.A).
    pub fn add(&self, flags: u32) {
        if flags == 0 {
            return;
        }
        let mut pending = self.pending.lock().unwrap();
        let before = *pending;
        *pending |= flags;
        if *pending != before {
            drop(pending);
            self.wakeup.notify_waiters();
        }
    }

    pub fn add_subsystem(&self, subsystem: SubSystem) {
        self.add(subsystem.bit());
    }

    /// Atomically read-and-clear the pending mask.
    pub fn drain(&self) -> u32 {
        let mut pending = self.pending.lock().unwrap();
        std::mem::take(&mut *pending)
    }

    pub fn peek(&self) -> u32 {
        *self.pending.lock().unwrap()
    }

    /// Suspend until `add` sets a new bit. Does not itself check whether
    /// anything is already pending - callers check `peek`/`drain` first,
    /// matching the "only in (a) the reactor's poller" suspension rule.
    pub async fn wait(&self) {
        self.wakeup.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_coalesces_duplicate_bits() {
        let bus = IdleBus::new();
        bus.add(flags_of([SubSystem::Playlist]));
        bus.add(flags_of([SubSystem::Playlist]));
        bus.add(flags_of([SubSystem::Player]));
        let drained = bus.drain();
        assert_eq!(drained, flags_of([SubSystem::Playlist, SubSystem::Player]));
        // second drain sees nothing new
        assert_eq!(bus.drain(), 0);
    }

    #[test]
    fn render_changed_lists_each_set_bit_once() {
        let flags = flags_of([SubSystem::Playlist, SubSystem::Mixer]);
        let rendered = render_changed(flags);
        assert_eq!(rendered.matches("changed: playlist").count(), 1);
        assert_eq!(rendered.matches("changed: mixer").count(), 1);
        assert!(!rendered.contains("changed: player"));
    }

    #[tokio::test]
    async fn wait_wakes_on_new_bit() {
        let bus = std::sync::Arc::new(IdleBus::new());
        let waiter = {
            let bus = bus.clone();
            tokio::spawn(async move {
                bus.wait().await;
            })
        };
        tokio::task::yield_now().await;
        bus.add(flags_of([SubSystem::Database]));
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("wait() should have woken up")
            .unwrap();
    }

    #[test]
    fn all_flags_covers_every_subsystem() {
        let all = all_flags();
        for subsystem in SubSystem::iter() {
            assert_ne!(all & subsystem.bit(), 0, "{subsystem} bit missing");
        }
    }
}
