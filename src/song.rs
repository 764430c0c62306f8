//! Song/tag value types (component B).
//!
//! `Tag` and `DetachedSong` are immutable once built; `Tag` uses a small
//! builder because it is an ordered multimap, not a plain struct.

use std::num::NonZeroU32;
use std::time::Duration;

use camino::Utf8PathBuf;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// see <https://mpd.readthedocs.io/en/stable/protocol.html#tags>
#[derive(
    Deserialize,
    Serialize,
    Display,
    EnumIter,
    EnumString,
    Debug,
    Default,
    PartialEq,
    Eq,
    Clone,
    Copy,
    Hash,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Tag {
    #[default]
    Artist,
    ArtistSort,
    Album,
    AlbumSort,
    AlbumArtist,
    AlbumArtistSort,
    Title,
    TitleSort,
    Track,
    Name,
    Genre,
    Mood,
    Date,
    OriginalDate,
    Composer,
    ComposerSort,
    Performer,
    Conductor,
    Work,
    Ensemble,
    Movement,
    MovementNumber,
    ShowMovement,
    Location,
    Grouping,
    Comment,
    Disc,
    Label,
    MusicbrainzArtistId,
    MusicbrainzAlbumId,
    MusicbrainzAlbumArtistId,
    MusicbrainzTrackId,
    MusicbrainzReleasegroupId,
    MusicbrainzReleaseTrackId,
    MusicbrainzWorkId,
}

/// Non-negative duration in milliseconds.
pub type SongTime = Duration;

/// A duration that may be negative, meaning "unknown". Used for seek offsets
/// and `seekcur "-5"`/`"+5"` style deltas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignedSongTime(f64);

impl SignedSongTime {
    pub const UNKNOWN: Self = SignedSongTime(-1.0);

    pub fn from_secs_f64(secs: f64) -> Self {
        Self(secs)
    }

    pub fn is_unknown(self) -> bool {
        self.0 < 0.0
    }

    pub fn to_duration(self) -> Option<Duration> {
        (!self.is_unknown()).then(|| Duration::from_secs_f64(self.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    S8,
    S16,
    S24P32,
    S32,
    F32,
    Dsd,
}

/// (sample_rate, sample_format, channels), validated per spec.3.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub sample_format: SampleFormat,
    pub channels: NonZeroU32,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, sample_format: SampleFormat, channels: u32) -> Option<Self> {
        let channels = NonZeroU32::new(channels)?;
        if !(1..=192_000).contains(&sample_rate) || channels.get() > 8 {
            return None;
        }
        Some(Self {
            sample_rate,
            sample_format,
            channels,
        })
    }
}

/// An ordered multimap of tag-type to value, plus the song's duration and
/// whether the file embeds a sub-playlist (e.g. a CUE-sheet-backed image).
/// Immutable once built; build via [`TagBuilder`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tags {
    values: Vec<(Tag, String)>,
    duration: Option<SongTime>,
    has_playlist: bool,
}

impl Tags {
    pub fn builder() -> TagBuilder {
        TagBuilder::default()
    }

    /// All values for a tag type, in insertion order.
    pub fn get_all(&self, tag: Tag) -> impl Iterator<Item = &str> {
        self.values
            .iter()
            .filter(move |(t, _)| *t == tag)
            .map(|(_, v)| v.as_str())
    }

    /// First value for a tag type, if any.
    pub fn get(&self, tag: Tag) -> Option<&str> {
        self.get_all(tag).next()
    }

    pub fn duration(&self) -> Option<SongTime> {
        self.duration
    }

    pub fn has_playlist(&self) -> bool {
        self.has_playlist
    }

    pub fn iter(&self) -> impl Iterator<Item = (Tag, &str)> {
        self.values.iter().map(|(t, v)| (*t, v.as_str()))
    }
}

#[derive(Debug, Default)]
pub struct TagBuilder {
    values: Vec<(Tag, String)>,
    duration: Option<SongTime>,
    has_playlist: bool,
}

impl TagBuilder {
    pub fn add(mut self, tag: Tag, value: impl Into<String>) -> Self {
        self.values.push((tag, value.into()));
        self
    }

    pub fn duration(mut self, duration: SongTime) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn has_playlist(mut self, has_playlist: bool) -> Self {
        self.has_playlist = has_playlist;
        self
    }

    pub fn build(self) -> Tags {
        Tags {
            values: self.values,
            duration: self.duration,
            has_playlist: self.has_playlist,
        }
    }
}

/// A self-contained song record: everything the queue needs to know about a
/// song without consulting the (out-of-scope) database again.
#[derive(Debug, Clone, PartialEq)]
pub struct DetachedSong {
    /// Display form, used for the protocol's `file:` field and for stored
    /// playlists.
    pub uri: Utf8PathBuf,
    /// Resolution form, used for I/O, when the song was mapped from an
    /// in-database relative path to an absolute one. `None` means `uri` is
    /// already the form to open.
    pub real_uri: Option<Utf8PathBuf>,
    pub tags: Tags,
    pub last_modified: Option<Timestamp>,
    /// Sub-song range in milliseconds, for songs split out of a single file
    /// (e.g. CUE tracks).
    pub start: SongTime,
    pub end: Option<SongTime>,
    pub format: Option<AudioFormat>,
}

impl DetachedSong {
    pub fn new(uri: impl Into<Utf8PathBuf>, tags: Tags) -> Self {
        Self {
            uri: uri.into(),
            real_uri: None,
            tags,
            last_modified: None,
            start: SongTime::ZERO,
            end: None,
            format: None,
        }
    }

    pub fn with_real_uri(mut self, real_uri: impl Into<Utf8PathBuf>) -> Self {
        self.real_uri = Some(real_uri.into());
        self
    }

    /// The path to open for I/O: `real_uri` if present, else `uri`.
    pub fn resolved_uri(&self) -> &camino::Utf8Path {
        self.real_uri.as_deref().unwrap_or(&self.uri)
    }

    pub fn duration(&self) -> Option<SongTime> {
        self.tags.duration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_uri_prefers_real_uri() {
        let song = DetachedSong::new("relative/path.flac", Tags::default())
            .with_real_uri("/music/relative/path.flac");
        assert_eq!(song.resolved_uri(), "/music/relative/path.flac");
    }

    #[test]
    fn resolved_uri_falls_back_to_uri() {
        let song = DetachedSong::new("relative/path.flac", Tags::default());
        assert_eq!(song.resolved_uri(), "relative/path.flac");
    }

    #[test]
    fn tag_builder_preserves_multimap_order() {
        let tags = Tags::builder()
            .add(Tag::Artist, "A")
            .add(Tag::Artist, "B")
            .add(Tag::Album, "Album")
            .build();
        assert_eq!(tags.get_all(Tag::Artist).collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(tags.get(Tag::Album), Some("Album"));
        assert_eq!(tags.get(Tag::Genre), None);
    }

    #[test]
    fn audio_format_rejects_out_of_range_sample_rate() {
        assert!(AudioFormat::new(0, SampleFormat::S16, 2).is_none());
        assert!(AudioFormat::new(192_001, SampleFormat::S16, 2).is_none());
        assert!(AudioFormat::new(44_100, SampleFormat::S16, 9).is_none());
        assert!(AudioFormat::new(44_100, SampleFormat::S16, 2).is_some());
    }

    #[test]
    fn signed_song_time_unknown_is_negative() {
        assert!(SignedSongTime::UNKNOWN.is_unknown());
        assert_eq!(SignedSongTime::UNKNOWN.to_duration(), None);
        assert_eq!(
            SignedSongTime::from_secs_f64(5.0).to_duration(),
            Some(Duration::from_secs(5))
        );
    }
}
