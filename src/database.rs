//! Trait boundary for the (out-of-scope) song database plugins.
//!
//! Per Design Notes: the source's storage/decoder/output plugins are
//! inheritance hierarchies; here each becomes a capability trait plus a
//! static registry of concrete variants (`DatabaseBackend`). Concrete
//! storage (simple flat-file DB, proxy DB, filesystem crawling) is out of
//! scope (spec §1); `MemoryDatabase` exists only so the core has something
//! real to dispatch against in tests and as a default backend.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use jiff::Timestamp;

use crate::mpd_protocol::query::Query;
use crate::song::{DetachedSong, Tag};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListItem {
    Directory(Utf8PathBuf),
    File(Utf8PathBuf),
}

/// Capability set a concrete song database must provide. Async because a
/// real implementation may hit disk or another process (the out-of-scope
/// proxy DB); the in-memory stub below never actually suspends.
#[async_trait::async_trait]
pub trait Database: Send + Sync {
    async fn song_by_uri(&self, uri: &Utf8Path) -> Option<DetachedSong>;
    async fn find(&self, query: &Query) -> Vec<DetachedSong>;
    async fn search(&self, query: &Query) -> Vec<DetachedSong>;
    async fn list_tag(&self, tag: Tag) -> Vec<String>;
    async fn list_all_under(&self, dir: &Utf8Path) -> Vec<ListItem>;
    async fn update(&mut self, path: Option<&Utf8Path>) -> Timestamp;
    fn stats(&self) -> DatabaseStats;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DatabaseStats {
    pub artists: usize,
    pub albums: usize,
    pub songs: usize,
    /// Sum of every known song's duration; songs with no tagged duration
    /// don't contribute (`stats`'s `db_playtime` is necessarily a lower bound).
    pub playtime: Duration,
}

/// The one concrete variant the core ships with: songs kept in a `Vec`,
/// populated by whatever the binary's startup scan step decides to put in
/// it. Real deployments would add e.g. `DatabaseBackend::Proxy(..)` here
/// without touching anything that depends on the `Database` trait.
pub enum DatabaseBackend {
    Memory(MemoryDatabase),
}

#[async_trait::async_trait]
impl Database for DatabaseBackend {
    async fn song_by_uri(&self, uri: &Utf8Path) -> Option<DetachedSong> {
        match self {
            Self::Memory(db) => db.song_by_uri(uri).await,
        }
    }

    async fn find(&self, query: &Query) -> Vec<DetachedSong> {
        match self {
            Self::Memory(db) => db.find(query).await,
        }
    }

    async fn search(&self, query: &Query) -> Vec<DetachedSong> {
        match self {
            Self::Memory(db) => db.search(query).await,
        }
    }

    async fn list_tag(&self, tag: Tag) -> Vec<String> {
        match self {
            Self::Memory(db) => db.list_tag(tag).await,
        }
    }

    async fn list_all_under(&self, dir: &Utf8Path) -> Vec<ListItem> {
        match self {
            Self::Memory(db) => db.list_all_under(dir).await,
        }
    }

    async fn update(&mut self, path: Option<&Utf8Path>) -> Timestamp {
        match self {
            Self::Memory(db) => db.update(path).await,
        }
    }

    fn stats(&self) -> DatabaseStats {
        match self {
            Self::Memory(db) => db.stats(),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryDatabase {
    songs: Vec<DetachedSong>,
    last_update: Option<Timestamp>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, song: DetachedSong) {
        self.songs.push(song);
    }

    /// Very small filter matcher, enough to ground `find`/`search`: supports
    /// only the `TagEqual`/`TagContains`/`PathEqual` leaves of `Query` (full
    /// filter-tree evaluation is out of scope, spec §1's "tag parsing"
    /// carve-out). Delegates to `Query::matches`, shared with the queue-local
    /// `playlistfind`/`playlistsearch` handlers.
    fn matches(&self, song: &DetachedSong, query: &Query) -> bool {
        query.matches(song)
    }
}

#[async_trait::async_trait]
impl Database for MemoryDatabase {
    async fn song_by_uri(&self, uri: &Utf8Path) -> Option<DetachedSong> {
        self.songs.iter().find(|s| s.uri == uri).cloned()
    }

    async fn find(&self, query: &Query) -> Vec<DetachedSong> {
        self.songs.iter().filter(|s| self.matches(s, query)).cloned().collect()
    }

    async fn search(&self, query: &Query) -> Vec<DetachedSong> {
        // case-insensitive variant of find; the in-memory matcher already
        // does plain substring/equality so this just reuses it (full
        // case-folding semantics are out of scope here).
        self.find(query).await
    }

    async fn list_tag(&self, tag: Tag) -> Vec<String> {
        let mut values: Vec<String> = self
            .songs
            .iter()
            .flat_map(|s| s.tags.get_all(tag).map(str::to_owned))
            .collect();
        values.sort_unstable();
        values.dedup();
        values
    }

    async fn list_all_under(&self, dir: &Utf8Path) -> Vec<ListItem> {
        let mut items = Vec::new();
        let mut seen_dirs = std::collections::HashSet::new();
        for song in self.songs.iter().filter(|s| s.uri.starts_with(dir)) {
            if let Some(parent) = song.uri.parent() {
                if seen_dirs.insert(parent.to_owned()) {
                    items.push(ListItem::Directory(parent.to_owned()));
                }
            }
            items.push(ListItem::File(song.uri.clone()));
        }
        items
    }

    async fn update(&mut self, _path: Option<&Utf8Path>) -> Timestamp {
        let now = self.last_update.unwrap_or(Timestamp::UNIX_EPOCH);
        self.last_update = Some(now);
        now
    }

    fn stats(&self) -> DatabaseStats {
        let mut artists: Vec<&str> = self.songs.iter().flat_map(|s| s.tags.get_all(Tag::Artist)).collect();
        artists.sort_unstable();
        artists.dedup();
        let mut albums: Vec<&str> = self.songs.iter().flat_map(|s| s.tags.get_all(Tag::Album)).collect();
        albums.sort_unstable();
        albums.dedup();
        let playtime = self.songs.iter().filter_map(|s| s.duration()).sum();
        DatabaseStats {
            artists: artists.len(),
            albums: albums.len(),
            songs: self.songs.len(),
            playtime,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpd_protocol::query::{Filter, Query, QueryNode};
    use crate::song::Tags;

    fn song(uri: &str, artist: &str) -> DetachedSong {
        DetachedSong::new(uri, Tags::builder().add(Tag::Artist, artist).build())
    }

    #[tokio::test]
    async fn find_matches_tag_equal() {
        let mut db = MemoryDatabase::new();
        db.insert(song("a.flac", "Boards of Canada"));
        db.insert(song("b.flac", "Aphex Twin"));
        let query = Query(QueryNode::Filter(Filter::TagEqual {
            tag: Tag::Artist,
            needle: "Aphex Twin".to_string(),
        }));
        let results = db.find(&query).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].uri, "b.flac");
    }

    #[tokio::test]
    async fn list_tag_dedupes_and_sorts() {
        let mut db = MemoryDatabase::new();
        db.insert(song("a.flac", "Bonobo"));
        db.insert(song("b.flac", "Bonobo"));
        db.insert(song("c.flac", "Aphex Twin"));
        let tags = db.list_tag(Tag::Artist).await;
        assert_eq!(tags, vec!["Aphex Twin".to_string(), "Bonobo".to_string()]);
    }

    #[tokio::test]
    async fn list_all_under_synthesizes_parent_directories() {
        let mut db = MemoryDatabase::new();
        db.insert(song("Album/track1.flac", "X"));
        db.insert(song("Album/track2.flac", "X"));
        let items = db.list_all_under(Utf8Path::new("")).await;
        let dirs = items.iter().filter(|i| matches!(i, ListItem::Directory(_))).count();
        let files = items.iter().filter(|i| matches!(i, ListItem::File(_))).count();
        assert_eq!(dirs, 1);
        assert_eq!(files, 2);
    }
}
