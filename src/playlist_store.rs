//! Stored playlists: named, on-disk lists of URIs, independent of the queue.
//!
//! Grounded on `playlist.rs`'s directory-of-files loader, generalized to the
//! full command surface (`listplaylist`, `save`, `rename`, `rm`, …) per
//! SPEC_FULL.md §4.supplement-B. Stored-playlist *file formats*
//! (M3U/PLS/XSPF/CUE) are out of scope (spec §1); each playlist is one path
//! per line, which is all the core needs to round-trip through `save`/`load`.

use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::Result;
use color_eyre::eyre::{Context, OptionExt};
use itertools::Itertools;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::{AckCode, AckError};

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct PlaylistName(pub String);

impl std::fmt::Display for PlaylistName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct StoredPlaylist {
    entries: Vec<Utf8PathBuf>,
    last_modified: Timestamp,
}

/// All stored playlists, backed by one directory on disk (one file per
/// playlist, one URI per line). Held by the `Partition`/`Instance`, mutated
/// only from Main.
pub struct PlaylistStore {
    dir: Utf8PathBuf,
    playlists: HashMap<PlaylistName, StoredPlaylist>,
}

impl PlaylistStore {
    pub fn load_from_dir(dir: Utf8PathBuf) -> Result<Self> {
        let mut playlists = HashMap::new();
        if dir.exists() {
            for entry in std::fs::read_dir(&dir).wrap_err("Could not read playlist dir")? {
                let entry = entry.wrap_err("Could not read entry in playlist dir")?;
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let (name, stored) = load_file(&path)?;
                playlists.insert(name, stored);
            }
        }
        Ok(Self { dir, playlists })
    }

    pub fn names(&self) -> impl Iterator<Item = (&PlaylistName, Timestamp)> {
        self.playlists.iter().map(|(n, p)| (n, p.last_modified))
    }

    pub fn entries(&self, name: &PlaylistName) -> Result<&[Utf8PathBuf], AckError> {
        self.playlists
            .get(name)
            .map(|p| p.entries.as_slice())
            .ok_or_else(|| AckError::no_exist(format!("No such playlist: {name}")))
    }

    pub fn len(&self, name: &PlaylistName) -> Result<usize, AckError> {
        self.entries(name).map(<[_]>::len)
    }

    /// `save <name>`: creates (or, with `Replace`, overwrites) a playlist
    /// from the given list of URIs.
    pub fn save(
        &mut self,
        name: PlaylistName,
        uris: Vec<Utf8PathBuf>,
        mode: SaveMode,
    ) -> Result<(), AckError> {
        if mode == SaveMode::Create && self.playlists.contains_key(&name) {
            return Err(AckError::new(AckCode::Exist, format!("Playlist already exists: {name}")));
        }
        let entry = self.playlists.entry(name).or_insert_with(|| StoredPlaylist {
            entries: Vec::new(),
            last_modified: Timestamp::UNIX_EPOCH,
        });
        match mode {
            SaveMode::Append => entry.entries.extend(uris),
            SaveMode::Create | SaveMode::Replace => entry.entries = uris,
        }
        Ok(())
    }

    pub fn playlist_add(&mut self, name: &PlaylistName, uri: Utf8PathBuf) -> Result<(), AckError> {
        let entry = self
            .playlists
            .get_mut(name)
            .ok_or_else(|| AckError::no_exist(format!("No such playlist: {name}")))?;
        entry.entries.push(uri);
        Ok(())
    }

    pub fn playlist_clear(&mut self, name: &PlaylistName) -> Result<(), AckError> {
        let entry = self
            .playlists
            .get_mut(name)
            .ok_or_else(|| AckError::no_exist(format!("No such playlist: {name}")))?;
        entry.entries.clear();
        Ok(())
    }

    pub fn playlist_delete(&mut self, name: &PlaylistName, pos: usize) -> Result<(), AckError> {
        let entry = self
            .playlists
            .get_mut(name)
            .ok_or_else(|| AckError::no_exist(format!("No such playlist: {name}")))?;
        if pos >= entry.entries.len() {
            return Err(AckError::arg(format!("Bad position: {pos}")));
        }
        entry.entries.remove(pos);
        Ok(())
    }

    pub fn playlist_move(&mut self, name: &PlaylistName, from: usize, to: usize) -> Result<(), AckError> {
        let entry = self
            .playlists
            .get_mut(name)
            .ok_or_else(|| AckError::no_exist(format!("No such playlist: {name}")))?;
        if from >= entry.entries.len() || to >= entry.entries.len() {
            return Err(AckError::arg("Bad position"));
        }
        let item = entry.entries.remove(from);
        entry.entries.insert(to, item);
        Ok(())
    }

    pub fn rename(&mut self, from: &PlaylistName, to: PlaylistName) -> Result<(), AckError> {
        if self.playlists.contains_key(&to) {
            return Err(AckError::new(AckCode::Exist, format!("Playlist already exists: {to}")));
        }
        let stored = self
            .playlists
            .remove(from)
            .ok_or_else(|| AckError::no_exist(format!("No such playlist: {from}")))?;
        self.playlists.insert(to, stored);
        Ok(())
    }

    pub fn remove(&mut self, name: &PlaylistName) -> Result<(), AckError> {
        self.playlists
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| AckError::no_exist(format!("No such playlist: {name}")))
    }

    /// Persists every playlist to `self.dir`, one file per name. Used at
    /// shutdown / on `save`; loads are eager (at startup) so reads never
    /// touch disk.
    pub fn flush(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).wrap_err("Could not create playlist dir")?;
        for (name, stored) in &self.playlists {
            let path = self.dir.join(&name.0);
            let contents = stored.entries.iter().map(Utf8PathBuf::as_str).join("\n");
            std::fs::write(&path, contents)
                .wrap_err("Could not write playlist to disk")
                .with_note(|| format!("path: {path}"))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveMode {
    #[default]
    Create,
    Append,
    Replace,
}

fn load_file(path: &std::path::Path) -> Result<(PlaylistName, StoredPlaylist)> {
    let entries = std::fs::read_to_string(path)
        .wrap_err("Failed to read playlist from disk")
        .with_note(|| format!("path: {}", path.display()))?
        .lines()
        .map(Utf8PathBuf::from)
        .collect();
    let last_modified = std::fs::metadata(path)
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|t| Timestamp::try_from(t).ok())
        .unwrap_or(Timestamp::UNIX_EPOCH);
    let name = path
        .file_name()
        .ok_or_eyre("Playlist file did not have a name")
        .with_note(|| format!("path: {}", path.display()))?
        .to_string_lossy()
        .to_string();
    Ok((PlaylistName(name), StoredPlaylist { entries, last_modified }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PlaylistStore {
        PlaylistStore {
            dir: Utf8Path::new("/tmp/does-not-matter").to_owned(),
            playlists: HashMap::new(),
        }
    }

    #[test]
    fn save_create_rejects_existing_name() {
        let mut store = store();
        store
            .save(PlaylistName("favorites".into()), vec!["a.flac".into()], SaveMode::Create)
            .unwrap();
        let err = store
            .save(PlaylistName("favorites".into()), vec!["b.flac".into()], SaveMode::Create)
            .unwrap_err();
        assert_eq!(err.code, AckCode::Exist);
    }

    #[test]
    fn save_replace_overwrites_entries() {
        let mut store = store();
        store
            .save(PlaylistName("p".into()), vec!["a.flac".into()], SaveMode::Create)
            .unwrap();
        store
            .save(PlaylistName("p".into()), vec!["b.flac".into()], SaveMode::Replace)
            .unwrap();
        assert_eq!(store.entries(&PlaylistName("p".into())).unwrap(), &["b.flac".to_string().into()]);
    }

    #[test]
    fn rename_fails_if_target_exists() {
        let mut store = store();
        store.save(PlaylistName("a".into()), vec![], SaveMode::Create).unwrap();
        store.save(PlaylistName("b".into()), vec![], SaveMode::Create).unwrap();
        let err = store.rename(&PlaylistName("a".into()), PlaylistName("b".into())).unwrap_err();
        assert_eq!(err.code, AckCode::Exist);
    }

    #[test]
    fn playlist_delete_out_of_range_is_arg_error() {
        let mut store = store();
        store.save(PlaylistName("p".into()), vec![], SaveMode::Create).unwrap();
        let err = store.playlist_delete(&PlaylistName("p".into()), 0).unwrap_err();
        assert_eq!(err.code, AckCode::Arg);
    }
}
