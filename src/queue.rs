//! Ordered play-queue state machine (component C).
//!
//! Storage is a dense `Vec<QueueEntry>` indexed by [`Position`], plus two
//! parallel permutation arrays mapping position<->order (spec.3.2, spec.4.C).
//! All operations run on the Main thread only (spec.5).

use rand::seq::SliceRandom;

use crate::song::DetachedSong;

/// 0-based index into the queue's insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position(pub usize);

/// 0-based index into the play order (a permutation of positions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Order(pub usize);

/// Monotonically-assigned id identifying a queue entry across moves.
/// Unique within a queue's lifetime; recycled only after wrapping past
/// `SongId::CEILING` (spec.3.1 "implementation-defined ceiling").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SongId(pub u32);

impl SongId {
    pub const CEILING: u32 = u32::MAX;
}

/// 32-bit monotonic counter, incremented on every structural or per-entry
/// change (spec.3.1, invariant 8.1.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Version(pub u32);

impl Version {
    fn next(self) -> Self {
        Version(self.0.wrapping_add(1))
    }
}

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub song: DetachedSong,
    pub id: SongId,
    pub priority: u8,
    pub version: Version,
}

#[derive(Debug)]
pub enum QueueError {
    Full,
    NoSuchPosition(usize),
    NoSuchId(SongId),
    EmptyRange,
}

pub struct Queue {
    entries: Vec<QueueEntry>,
    /// `position_to_order[pos] == order`
    position_to_order: Vec<usize>,
    /// `order_to_position[order] == pos`
    order_to_position: Vec<usize>,
    next_id: u32,
    version: Version,
    pub max_length: usize,
    pub consume: bool,
    pub repeat: bool,
    pub single: bool,
    pub random: bool,
}

impl Queue {
    pub fn new(max_length: usize) -> Self {
        Self {
            entries: Vec::new(),
            position_to_order: Vec::new(),
            order_to_position: Vec::new(),
            next_id: 1,
            version: Version::default(),
            max_length,
            consume: false,
            repeat: false,
            single: false,
            random: false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    fn bump_version(&mut self) {
        self.version = self.version.next();
    }

    pub fn entry_at(&self, pos: Position) -> Option<&QueueEntry> {
        self.entries.get(pos.0)
    }

    pub fn entry_by_id(&self, id: SongId) -> Option<(Position, &QueueEntry)> {
        self.entries
            .iter()
            .position(|e| e.id == id)
            .map(|pos| (Position(pos), &self.entries[pos]))
    }

    pub fn position_of_id(&self, id: SongId) -> Option<Position> {
        self.entries.iter().position(|e| e.id == id).map(Position)
    }

    pub fn order_of_position(&self, pos: Position) -> Option<Order> {
        self.position_to_order.get(pos.0).copied().map(Order)
    }

    pub fn position_of_order(&self, order: Order) -> Option<Position> {
        self.order_to_position.get(order.0).copied().map(Position)
    }

    pub fn entry_at_order(&self, order: Order) -> Option<&QueueEntry> {
        self.position_of_order(order).and_then(|p| self.entry_at(p))
    }

    /// Iterate `(position, entry)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (Position, &QueueEntry)> {
        self.entries.iter().enumerate().map(|(i, e)| (Position(i), e))
    }

    /// Iterate `(position, entry)` pairs in play order.
    pub fn iter_in_order(&self) -> impl Iterator<Item = (Position, &QueueEntry)> + '_ {
        self.order_to_position
            .iter()
            .map(move |&pos| (Position(pos), &self.entries[pos]))
    }

    /// `plchanges`: entries modified since `since`.
    pub fn changes_since(&self, since: Version) -> impl Iterator<Item = (Position, &QueueEntry)> {
        self.iter().filter(move |(_, e)| e.version > since)
    }

    fn fresh_id(&mut self) -> SongId {
        loop {
            let id = SongId(self.next_id);
            self.next_id = if self.next_id == SongId::CEILING {
                1
            } else {
                self.next_id + 1
            };
            if !self.entries.iter().any(|e| e.id == id) {
                return id;
            }
        }
    }

    /// Appends at position `length`; if `random`, reinserts its order at a
    /// randomly chosen order >= its natural (appended) order (spec.4.C).
    pub fn append(
        &mut self,
        song: DetachedSong,
        current_order: Option<Order>,
    ) -> Result<SongId, QueueError> {
        if self.entries.len() >= self.max_length {
            return Err(QueueError::Full);
        }
        let id = self.fresh_id();
        let version = self.version.next();
        self.entries.push(QueueEntry {
            song,
            id,
            priority: 0,
            version,
        });
        self.version = version;

        let new_pos = self.entries.len() - 1;
        let new_order = self.order_to_position.len();
        self.order_to_position.push(new_pos);
        self.position_to_order.push(new_order);

        if self.random {
            let lower_bound = current_order.map(|o| o.0 + 1).unwrap_or(0).min(new_order);
            let target = rand_range(lower_bound, new_order);
            self.move_order(new_order, target);
        }
        Ok(id)
    }

    /// Swap two entries in the order permutation, keeping position<->order
    /// consistent. `from` moves to `to`, shifting entries between.
    fn move_order(&mut self, from: usize, to: usize) {
        if from == to {
            return;
        }
        let moved_pos = self.order_to_position.remove(from);
        self.order_to_position.insert(to, moved_pos);
        self.rebuild_position_to_order();
    }

    fn rebuild_position_to_order(&mut self) {
        for (order, &pos) in self.order_to_position.iter().enumerate() {
            self.position_to_order[pos] = order;
        }
    }

    /// Removes the entry at `pos`. Returns the removed entry so callers
    /// (the playlist controller) can react if it was the current song.
    pub fn delete_position(&mut self, pos: Position) -> Result<QueueEntry, QueueError> {
        if pos.0 >= self.entries.len() {
            return Err(QueueError::NoSuchPosition(pos.0));
        }
        let removed = self.entries.remove(pos.0);
        self.rebuild_permutations_after_removal(pos.0);
        self.bump_version();
        Ok(removed)
    }

    pub fn delete_id(&mut self, id: SongId) -> Result<QueueEntry, QueueError> {
        let pos = self.position_of_id(id).ok_or(QueueError::NoSuchId(id))?;
        self.delete_position(pos)
    }

    /// Removes `[start, end)` by position, highest first so earlier indices
    /// stay valid.
    pub fn delete_range(&mut self, start: usize, end: usize) -> Result<Vec<QueueEntry>, QueueError> {
        if start >= end || end > self.entries.len() {
            return Err(QueueError::EmptyRange);
        }
        let mut removed = Vec::with_capacity(end - start);
        for pos in (start..end).rev() {
            removed.push(self.delete_position(Position(pos))?);
        }
        removed.reverse();
        Ok(removed)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.position_to_order.clear();
        self.order_to_position.clear();
        self.bump_version();
    }

    fn rebuild_permutations_after_removal(&mut self, removed_pos: usize) {
        // The order value that pointed at removed_pos is gone; every order
        // entry pointing at a position > removed_pos must shift down by one.
        self.order_to_position.retain(|&p| p != removed_pos);
        for p in self.order_to_position.iter_mut() {
            if *p > removed_pos {
                *p -= 1;
            }
        }
        self.position_to_order = vec![0; self.entries.len()];
        self.rebuild_position_to_order();
    }

    /// Remaps every `order_to_position` entry through a `[start, end)` ->
    /// `to` move, the same position shift `move_range` just applied to
    /// `self.entries`, so the existing play order (shuffle, priority) keeps
    /// pointing at the same songs instead of being discarded.
    fn remap_positions_after_move(&mut self, start: usize, end: usize, to: usize) {
        let len = end - start;
        let remap = |pos: usize| -> usize {
            if (start..end).contains(&pos) {
                return to + (pos - start);
            }
            let drained = if pos < start { pos } else { pos - len };
            if drained >= to { drained + len } else { drained }
        };
        for p in self.order_to_position.iter_mut() {
            *p = remap(*p);
        }
        self.rebuild_position_to_order();
    }

    /// Moves `[start, end)` (by position) so it begins at position `to`.
    pub fn move_range(&mut self, start: usize, end: usize, to: usize) -> Result<(), QueueError> {
        if start >= end || end > self.entries.len() || to > self.entries.len() - (end - start) {
            return Err(QueueError::EmptyRange);
        }
        let moved: Vec<_> = self.entries.drain(start..end).collect();
        for (i, entry) in moved.into_iter().enumerate() {
            self.entries.insert(to + i, entry);
        }
        self.remap_positions_after_move(start, end, to);
        self.bump_version();
        Ok(())
    }

    pub fn move_id(&mut self, id: SongId, to: usize) -> Result<(), QueueError> {
        let pos = self.position_of_id(id).ok_or(QueueError::NoSuchId(id))?;
        self.move_range(pos.0, pos.0 + 1, to)
    }

    pub fn swap_positions(&mut self, a: usize, b: usize) -> Result<(), QueueError> {
        if a >= self.entries.len() || b >= self.entries.len() {
            return Err(QueueError::NoSuchPosition(a.max(b)));
        }
        self.entries.swap(a, b);
        self.bump_version();
        Ok(())
    }

    pub fn swap_ids(&mut self, a: SongId, b: SongId) -> Result<(), QueueError> {
        let pa = self.position_of_id(a).ok_or(QueueError::NoSuchId(a))?;
        let pb = self.position_of_id(b).ok_or(QueueError::NoSuchId(b))?;
        self.swap_positions(pa.0, pb.0)
    }

    /// After any position-array mutation that doesn't just relabel existing
    /// entries (move_range), rebuild the order permutation to match priority
    /// (descending) with position order as the tiebreak, the way
    /// `set_priority` does (spec.4.C.1), but without reshuffling -- ties
    /// preserve existing relative order by falling back to identity.
    fn rebuild_permutations_full(&mut self) {
        let len = self.entries.len();
        self.order_to_position = (0..len).collect();
        self.position_to_order = (0..len).collect();
    }

    /// Sets priority on `[start, end)` by position; re-sorts the tail of the
    /// play order (orders strictly after `current_order`) so higher priority
    /// moves earlier, ties preserving relative order (spec.4.C, stable sort).
    pub fn set_priority_range(
        &mut self,
        start: usize,
        end: usize,
        priority: u8,
        current_order: Option<Order>,
    ) -> Result<(), QueueError> {
        if start >= end || end > self.entries.len() {
            return Err(QueueError::EmptyRange);
        }
        let version = self.version.next();
        for entry in &mut self.entries[start..end] {
            entry.priority = priority;
            entry.version = version;
        }
        self.version = version;
        self.resort_tail_by_priority(current_order);
        Ok(())
    }

    pub fn set_priority_id(
        &mut self,
        id: SongId,
        priority: u8,
        current_order: Option<Order>,
    ) -> Result<(), QueueError> {
        let pos = self.position_of_id(id).ok_or(QueueError::NoSuchId(id))?;
        self.set_priority_range(pos.0, pos.0 + 1, priority, current_order)
    }

    /// Stable sort of the tail (orders strictly after `current_order`) by
    /// descending priority, ties keeping existing relative order
    /// (spec.4.C.1: "priority ties preserve existing relative order").
    fn resort_tail_by_priority(&mut self, current_order: Option<Order>) {
        let tail_start = current_order.map(|o| o.0 + 1).unwrap_or(0);
        if tail_start >= self.order_to_position.len() {
            return;
        }
        let mut tail: Vec<usize> = self.order_to_position[tail_start..].to_vec();
        tail.sort_by_key(|&pos| std::cmp::Reverse(self.entries[pos].priority));
        self.order_to_position[tail_start..].copy_from_slice(&tail);
        self.rebuild_position_to_order();
    }

    /// Fisher-Yates over `[current_order+1, length)` when playing, else the
    /// whole range (spec.4.C). Priority always wins: within the shuffled
    /// range entries are grouped by priority first (stable), then each
    /// priority group is independently shuffled, so higher priority still
    /// always sorts earlier (spec.4.C.1).
    pub fn shuffle_order(&mut self, current_order: Option<Order>) {
        let tail_start = current_order.map(|o| o.0 + 1).unwrap_or(0);
        if tail_start >= self.order_to_position.len() {
            return;
        }
        let mut tail: Vec<usize> = self.order_to_position[tail_start..].to_vec();
        let mut rng = rand::rng();
        tail.shuffle(&mut rng);
        tail.sort_by_key(|&pos| std::cmp::Reverse(self.entries[pos].priority));
        self.order_to_position[tail_start..].copy_from_slice(&tail);
        self.rebuild_position_to_order();
    }

    /// Play order becomes identity.
    pub fn restore_order(&mut self) {
        self.rebuild_permutations_full();
    }

    /// Bumps version and tags every entry's version (used to signal a
    /// metadata refresh, e.g. after cover-art update).
    pub fn modify_all(&mut self) {
        let version = self.version.next();
        for entry in &mut self.entries {
            entry.version = version;
        }
        self.version = version;
    }

    pub fn modify_at_order(&mut self, order: Order) -> Result<(), QueueError> {
        let pos = self
            .position_of_order(order)
            .ok_or(QueueError::NoSuchPosition(order.0))?;
        let version = self.version.next();
        self.entries[pos.0].version = version;
        self.version = version;
        Ok(())
    }

    /// Applies `random` after the flag flips: when turning random on, biases
    /// the whole order by priority then shuffles ties; turning it off
    /// restores identity order. Callers decide which (this just offers the
    /// primitives); see `PlaylistController::set_random`.
    pub fn reshuffle_whole(&mut self) {
        self.shuffle_order(None);
    }
}

/// Small helper: inclusive-both-ends random index in `[lo, hi]`.
fn rand_range(lo: usize, hi: usize) -> usize {
    if lo >= hi {
        return hi;
    }
    rand::random_range(lo..=hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::Tags;

    fn song(name: &str) -> DetachedSong {
        DetachedSong::new(name, Tags::default())
    }

    #[test]
    fn permutations_stay_bijective_after_mutation() {
        let mut q = Queue::new(16);
        for name in ["a", "b", "c", "d"] {
            q.append(song(name), None).unwrap();
        }
        q.set_priority_id(SongId(3), 10, None).unwrap();
        q.delete_id(SongId(1)).unwrap();
        assert_permutations_bijective(&q);
    }

    fn assert_permutations_bijective(q: &Queue) {
        for i in 0..q.len() {
            let order = q.position_to_order[i];
            assert_eq!(q.order_to_position[order], i);
        }
        for i in 0..q.len() {
            let pos = q.order_to_position[i];
            assert_eq!(q.position_to_order[pos], i);
        }
    }

    #[test]
    fn append_assigns_fresh_monotonic_ids() {
        let mut q = Queue::new(16);
        let a = q.append(song("a"), None).unwrap();
        let b = q.append(song("b"), None).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn version_strictly_increases_on_mutation() {
        let mut q = Queue::new(16);
        let v0 = q.version();
        q.append(song("a"), None).unwrap();
        let v1 = q.version();
        assert!(v1 > v0);
        q.append(song("b"), None).unwrap();
        let v2 = q.version();
        assert!(v2 > v1);
    }

    #[test]
    fn full_queue_rejects_append() {
        let mut q = Queue::new(1);
        q.append(song("a"), None).unwrap();
        assert!(matches!(q.append(song("b"), None), Err(QueueError::Full)));
    }

    #[test]
    fn priority_ordering_keeps_higher_priority_before_lower_in_tail() {
        let mut q = Queue::new(16);
        for name in ["a", "b", "c", "d", "e"] {
            q.append(song(name), None).unwrap();
        }
        // currently playing is order 0 (position 0); bias position 3 so it
        // jumps ahead of the rest of the (frozen) tail.
        q.set_priority_range(3, 4, 100, Some(Order(0))).unwrap();
        assert_permutations_bijective(&q);
        let tail: Vec<usize> = q.order_to_position[1..].to_vec();
        assert_eq!(tail[0], 3, "highest priority entry should be first in tail");
    }

    #[test]
    fn priority_ties_preserve_relative_order() {
        let mut q = Queue::new(16);
        for name in ["a", "b", "c", "d"] {
            q.append(song(name), None).unwrap();
        }
        // no priorities set: tail order (start=0) should stay identity.
        q.resort_tail_by_priority(None);
        assert_eq!(q.order_to_position, vec![0, 1, 2, 3]);
    }

    #[test]
    fn changes_since_yields_only_newer_entries() {
        let mut q = Queue::new(16);
        q.append(song("a"), None).unwrap();
        let v_after_a = q.version();
        q.append(song("b"), None).unwrap();
        let changed: Vec<_> = q.changes_since(v_after_a).map(|(p, _)| p.0).collect();
        assert_eq!(changed, vec![1]);
    }

    #[test]
    fn delete_position_keeps_bijective_permutations() {
        let mut q = Queue::new(16);
        for name in ["a", "b", "c", "d"] {
            q.append(song(name), None).unwrap();
        }
        q.delete_position(Position(1)).unwrap();
        assert_eq!(q.len(), 3);
        assert_permutations_bijective(&q);
    }

    #[test]
    fn move_range_relocates_entries_and_bumps_version() {
        let mut q = Queue::new(16);
        for name in ["a", "b", "c", "d"] {
            q.append(song(name), None).unwrap();
        }
        let before = q.version();
        q.move_range(0, 1, 3).unwrap();
        assert!(q.version() > before);
        let names: Vec<_> = q.iter().map(|(_, e)| e.song.uri.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "d", "a"]);
    }

    #[test]
    fn shuffle_keeps_priority_ahead_of_lower_priority_tail() {
        let mut q = Queue::new(16);
        for name in ["a", "b", "c", "d", "e"] {
            q.append(song(name), None).unwrap();
        }
        q.set_priority_range(3, 4, 100, None).unwrap();
        q.shuffle_order(None);
        assert_permutations_bijective(&q);
        assert_eq!(q.order_to_position[0], 3);
    }

    #[test]
    fn move_range_preserves_established_play_order() {
        let mut q = Queue::new(16);
        for name in ["a", "b", "c", "d", "e"] {
            q.append(song(name), None).unwrap();
        }
        q.set_priority_range(4, 5, 100, None).unwrap();
        assert_permutations_bijective(&q);
        let before: Vec<_> = q.iter_in_order().map(|(_, e)| e.song.uri.to_string()).collect();
        assert_eq!(before, vec!["e", "a", "b", "c", "d"]);

        q.move_range(0, 1, 3).unwrap();

        assert_permutations_bijective(&q);
        let after: Vec<_> = q.iter_in_order().map(|(_, e)| e.song.uri.to_string()).collect();
        assert_eq!(after, before, "move must remap the existing order, not reset it to position order");
    }

    #[test]
    fn restore_order_resets_to_identity() {
        let mut q = Queue::new(16);
        for name in ["a", "b", "c"] {
            q.append(song(name), None).unwrap();
        }
        q.move_range(0, 1, 2).unwrap();
        q.restore_order();
        assert_eq!(q.order_to_position, vec![0, 1, 2]);
        assert_eq!(q.position_to_order, vec![0, 1, 2]);
    }
}
