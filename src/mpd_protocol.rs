pub mod command_parser;
pub mod query;
pub mod response_format;

use std::time::Duration;

use camino::Utf8PathBuf;
use jiff::Timestamp;
use serde::Serialize;
use strum::{EnumIter, EnumString, VariantNames};
use tracing::instrument;

use crate::idle::SubSystem;
use crate::playlist_store::PlaylistName;
use crate::queue::{Position, SongId};
use crate::song::{AudioFormat, SongTime, Tag};

pub const VERSION: &str = "0.24.4";

/// see <https://mpd.readthedocs.io/en/stable/protocol.html#command-reference>
#[derive(Debug, Default, VariantNames, EnumString, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum Command {
    // Query Status:
    ClearError,
    CurrentSong,
    Idle(Vec<SubSystem>),
    NoIdle,
    #[default]
    Status,
    Stats,

    // Playback Options:
    Consume(ConsumeState),
    Crossfade(u64),
    MixRampDb(f32),
    MixRampDelay(f32),
    Random(bool),
    Repeat(bool),
    SetVol(u8),
    Single(SingleState),
    ReplayGainMode(ReplayGainMode),
    ReplayGainStatus,
    Volume(i32),

    // Control Playback:
    Next,
    Pause(Option<bool>),
    Play(Option<Position>),
    PlayId(Option<SongId>),
    Previous,
    Seek(Position, f32),
    SeekId(SongId, f32),
    SeekCur(TimeOrOffset),
    Stop,

    // Manipulate the Queue:
    Add(Utf8PathBuf, Option<QueuePosition>),
    AddId(Utf8PathBuf, Option<QueuePosition>),
    Clear,
    Delete(Option<PosOrRange>),
    DeleteId(SongId),
    Move(PosOrRange, QueuePosition),
    MoveId(SongId, QueuePosition),
    /// bare `playlist`, a legacy alias for `playlistinfo` with no argument.
    Playlist,
    PlaylistInfo(Option<PosOrRange>),
    PlaylistId(Option<SongId>),
    PlaylistFind(query::Query),
    PlaylistSearch(query::Query),
    PlChanges(u32, Option<Range>),
    PlChangesPosId(u32, Option<Range>),
    Prio(u8, Vec<Range>),
    PrioId(u8, Vec<SongId>),
    Shuffle(Option<Range>),
    Swap(Position, Position),
    SwapId(SongId, SongId),

    // Manipulate Playlists:
    ListPlaylist(PlaylistName),
    ListPlaylistInfo(PlaylistName),
    ListPlayLists,
    Load(PlaylistName, Option<QueuePosition>),
    PlaylistAdd(PlaylistName, Utf8PathBuf),
    PlaylistClear(PlaylistName),
    PlaylistDelete(PlaylistName, u32),
    PlaylistLength(PlaylistName),
    PlaylistMove(PlaylistName, u32, u32),
    Rename(PlaylistName, PlaylistName),
    Rm(PlaylistName),
    Save(PlaylistName),

    // Interact with database:
    Count(query::Query),
    Find(query::Query),
    FindAdd(query::Query),
    List(Tag, Option<query::Query>),
    ListAll(Option<Utf8PathBuf>),
    ListAllInfo(Option<Utf8PathBuf>),
    ListFiles(Utf8PathBuf),
    LsInfo(Option<Utf8PathBuf>),
    Search(query::Query),
    SearchAdd(query::Query),
    SearchAddPl(PlaylistName, query::Query),
    Update(Option<Utf8PathBuf>),
    Rescan(Option<Utf8PathBuf>),

    // Mounts and Neighbors:
    ListMounts,
    ListNeighbors,

    // Connection Settings:
    Close,
    Kill,
    Password(String),
    Ping,
    TagTypes,
    TagTypesDisable(Vec<Tag>),
    TagTypesEnable(Vec<Tag>),
    TagTypesClear,
    TagTypesAll,
    Config,
    Commands,
    NotCommands,
    UrlHandlers,
    Decoders,

    // Client to client:
    Subscribe(ChannelName),
    Unsubscribe(ChannelName),
    Channels,
    ReadMessages,
    SendMessage(ChannelName, String),
}

impl Command {
    #[instrument(level = "debug", ret)]
    pub(crate) fn parse(line: &str) -> color_eyre::Result<Self> {
        command_parser::parse(line)
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum QueuePosition {
    Absolute(u32),
    /// `+0` means immediately after the currently playing song, `-0` before it.
    Relative(i32),
}

#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub enum TimeOrOffset {
    #[default]
    Absolute(f32),
    Relative(f32),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Range {
    pub start: u32,
    pub end: Option<u32>,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum PosOrRange {
    Position(Position),
    Range(Range),
}

#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub enum ConsumeState {
    #[default]
    Off,
    On,
    OneShot,
}

#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub enum SingleState {
    #[default]
    Off,
    On,
    OneShot,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ReplayGainMode {
    #[default]
    Off,
    Track,
    Album,
    Auto,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ChannelName(pub String);

/// `status`'s response body.
#[derive(Serialize, Debug)]
pub struct Status {
    pub volume: i32,
    pub repeat: bool,
    pub random: bool,
    pub single: bool,
    pub consume: bool,
    pub partition: String,
    pub playlist: u32,
    pub playlistlength: u64,
    pub state: PlaybackState,
    #[serde(serialize_with = "response_format::duration_seconds")]
    pub xfade: Duration,
    pub song: Option<u32>,
    pub songid: Option<u32>,
    #[serde(serialize_with = "response_format::option_duration_millis_precise")]
    pub elapsed: Option<Duration>,
    pub bitrate: Option<u64>,
    #[serde(rename = "duration")]
    #[serde(serialize_with = "response_format::option_duration_millis_precise")]
    pub duration: Option<Duration>,
    #[serde(rename = "audio")]
    #[serde(serialize_with = "response_format::option_audio_format")]
    pub audio: Option<AudioFormat>,
    pub error: Option<String>,
    pub nextsong: Option<u32>,
    pub nextsongid: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Play,
    Pause,
    #[default]
    Stop,
}

impl From<crate::player_control::PlayerState> for PlaybackState {
    fn from(s: crate::player_control::PlayerState) -> Self {
        match s {
            crate::player_control::PlayerState::Play => Self::Play,
            crate::player_control::PlayerState::Pause => Self::Pause,
            crate::player_control::PlayerState::Stop => Self::Stop,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct Stats {
    pub artists: usize,
    pub albums: usize,
    pub songs: usize,
    #[serde(serialize_with = "response_format::duration_seconds")]
    pub uptime: Duration,
    #[serde(serialize_with = "response_format::duration_seconds")]
    pub db_playtime: Duration,
    #[serde(serialize_with = "response_format::unix_time")]
    pub db_update: Timestamp,
    #[serde(serialize_with = "response_format::duration_seconds")]
    pub playtime: Duration,
}

/// One line of `playlistinfo`/`find`/`search`/`currentsong` output.
///
/// Tag fields are inlined rather than nested (our hand-rolled serializer
/// doesn't support `#[serde(flatten)]`, which needs a real `serialize_map`);
/// `Tags` itself stays an ordered multimap internally (see `song.rs`) so
/// repeated values (multiple artists) aren't lost on the way in, but the
/// wire format only ever shows the first of each.
#[derive(Serialize, Debug)]
pub struct SongInfo {
    #[serde(rename = "file")]
    pub uri: Utf8PathBuf,
    #[serde(rename = "Last-Modified")]
    pub last_modified: Option<Timestamp>,
    #[serde(serialize_with = "response_format::option_audio_format")]
    pub format: Option<AudioFormat>,
    #[serde(rename = "Artist")]
    pub artist: Option<String>,
    #[serde(rename = "AlbumArtist")]
    pub album_artist: Option<String>,
    #[serde(rename = "Title")]
    pub title: Option<String>,
    #[serde(rename = "Album")]
    pub album: Option<String>,
    #[serde(rename = "Track")]
    pub track: Option<String>,
    #[serde(rename = "Date")]
    pub date: Option<String>,
    #[serde(rename = "Genre")]
    pub genre: Option<String>,
    #[serde(rename = "Disc")]
    pub disc: Option<String>,
    #[serde(serialize_with = "response_format::option_duration_millis_precise")]
    pub duration: Option<SongTime>,
    pub pos: Option<u32>,
    pub id: Option<u32>,
}

impl SongInfo {
    pub fn from_song(song: &crate::song::DetachedSong, pos: Option<u32>, id: Option<u32>) -> Self {
        let tags = &song.tags;
        Self {
            uri: song.uri.clone(),
            last_modified: song.last_modified,
            format: song.format,
            artist: tags.get(Tag::Artist).map(str::to_owned),
            album_artist: tags.get(Tag::AlbumArtist).map(str::to_owned),
            title: tags.get(Tag::Title).map(str::to_owned),
            album: tags.get(Tag::Album).map(str::to_owned),
            track: tags.get(Tag::Track).map(str::to_owned),
            date: tags.get(Tag::Date).map(str::to_owned),
            genre: tags.get(Tag::Genre).map(str::to_owned),
            disc: tags.get(Tag::Disc).map(str::to_owned),
            duration: song.duration(),
            pos,
            id,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct PlaylistSummary {
    pub playlist: String,
    #[serde(rename = "Last-Modified")]
    #[serde(serialize_with = "response_format::unix_time")]
    pub last_modified: Timestamp,
}

#[derive(Debug, Default, PartialEq, Eq, EnumIter, EnumString, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum StickerPlaceholder {
    #[default]
    Song,
}
