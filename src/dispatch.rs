//! Command dispatcher (component G): maps a parsed [`Command`] to a
//! permission requirement and a handler that mutates a [`Partition`] and
//! renders the response body, generalizing `mpd_client.rs`'s `perform_command`
//! match (which called straight into the old `System`) to the
//! queue/playlist-controller/database/playlist-store split.

use std::collections::HashSet;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::Serialize;
use sha2::{Digest, Sha256};
use strum::{IntoEnumIterator, VariantNames};
use tokio::sync::broadcast;

use crate::database::Database;
use crate::error::{AckCode, AckError};
use crate::idle::SubSystem;
use crate::mpd_protocol::query::Query;
use crate::mpd_protocol::response_format;
use crate::mpd_protocol::{
    ChannelName, Command, PlaylistSummary, PosOrRange, QueuePosition, Range, SongInfo, Stats,
    Status,
};
use crate::partition::Partition;
use crate::playlist_store::{PlaylistName, SaveMode};
use crate::queue::{Order, Position, Queue, QueueError, SongId};
use crate::song::{DetachedSong, Tag};

/// Permission bitmask (spec.6.2's READ/ADD/CONTROL/ADMIN), the same
/// "one bit per capability, OR them together" shape as `idle::SubSystem`'s
/// bitmask, just scoped per-connection instead of process-global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permission(u8);

impl Permission {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(1 << 0);
    pub const ADD: Self = Self(1 << 1);
    pub const CONTROL: Self = Self(1 << 2);
    pub const ADMIN: Self = Self(1 << 3);

    pub fn contains(self, required: Self) -> bool {
        self.0 & required.0 == required.0
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for Permission {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl Default for Permission {
    /// Mirrors `default_permissions` (spec.6.4) when no password is set:
    /// every connection starts fully trusted.
    fn default() -> Self {
        Self::READ | Self::ADD | Self::CONTROL | Self::ADMIN
    }
}

/// A configured `password <sha256>@<perm,...>` entry (spec.6.4).
pub struct PasswordEntry {
    pub sha256_hex: String,
    pub permission: Permission,
}

/// Per-tag enable/disable state for `tagtypes`. Tracks the *disabled* set
/// (empty = everything enabled, the default) so `clear`/`all`/`disable X`
/// compose the way the protocol's four subcommands are specified.
#[derive(Debug, Clone, Default)]
pub struct TagTypeFilter {
    disabled: HashSet<Tag>,
}

impl TagTypeFilter {
    pub fn disable(&mut self, tags: impl IntoIterator<Item = Tag>) {
        self.disabled.extend(tags);
    }

    pub fn enable(&mut self, tags: impl IntoIterator<Item = Tag>) {
        for tag in tags {
            self.disabled.remove(&tag);
        }
    }

    pub fn clear(&mut self) {
        self.disabled = Tag::iter().collect();
    }

    pub fn set_all(&mut self) {
        self.disabled.clear();
    }

    pub fn is_enabled(&self, tag: Tag) -> bool {
        !self.disabled.contains(&tag)
    }

    pub fn enabled(&self) -> impl Iterator<Item = Tag> + '_ {
        Tag::iter().filter(move |t| self.is_enabled(*t))
    }
}

/// Per-connection state the dispatcher reads and mutates across calls: the
/// client's elevated permission (via `password`), its `tagtypes` filter, and
/// its channel-message subscription/inbox pair (component F.4).
pub struct ClientContext {
    pub permission: Permission,
    pub tag_types: TagTypeFilter,
    pub subscriptions: HashSet<ChannelName>,
    pub inbox: broadcast::Receiver<(ChannelName, String)>,
}

impl ClientContext {
    pub fn new(partition: &Partition, default_permission: Permission) -> Self {
        Self {
            permission: default_permission,
            tag_types: TagTypeFilter::default(),
            subscriptions: HashSet::new(),
            inbox: partition.messages.subscribe(),
        }
    }
}

/// What a dispatched command asks the connection's session loop to do next.
pub enum Outcome {
    /// Send the rendered body, then `OK\n` (empty body for commands with no
    /// output).
    Ok(String),
    /// Send `OK\n`, then close the connection (spec.6.2 `close`).
    Close,
    /// Send `OK\n`, then shut the whole server down (spec.6.2 `kill`,
    /// ADMIN-only).
    Kill,
    /// The session loop should suspend on `partition.idle` filtered to these
    /// subsystems (all 14 if empty) until `noidle` or a matching change.
    Idle(Vec<SubSystem>),
}

fn queue_error_to_ack(e: QueueError) -> AckError {
    match e {
        QueueError::Full => AckError::new(AckCode::PlaylistMax, "playlist is at the maximum size"),
        QueueError::NoSuchPosition(p) => AckError::no_exist(format!("No such song position: {p}")),
        QueueError::NoSuchId(id) => AckError::no_exist(format!("No such song id: {}", id.0)),
        QueueError::EmptyRange => AckError::arg("Bad range"),
    }
}

fn render<T: Serialize>(value: &T) -> Result<String, AckError> {
    response_format::to_string(value).map_err(|e| AckError::new(AckCode::System, e.to_string()))
}

/// The required permission for each command, grouped the way the `Command`
/// enum's own section comments already group them (query/options/playback
/// mirror real MPD's READ/CONTROL split; `add`/`findadd`/`searchadd*` need
/// ADD; anything that touches the filesystem crawler, the process, or other
/// clients' passwords needs ADMIN). Commands a client must be able to call
/// before authenticating (`password`, `ping`, capability queries) need NONE.
pub fn required_permission(cmd: &Command) -> Permission {
    use Command::*;
    match cmd {
        Password(_) | Ping | Commands | NotCommands | UrlHandlers | Decoders | TagTypes
        | TagTypesDisable(_) | TagTypesEnable(_) | TagTypesClear | TagTypesAll | Close => {
            Permission::NONE
        }

        ClearError | CurrentSong | Idle(_) | NoIdle | Status | Stats => Permission::READ,

        Consume(_) | Crossfade(_) | MixRampDb(_) | MixRampDelay(_) | Random(_) | Repeat(_)
        | SetVol(_) | Single(_) | ReplayGainMode(_) | ReplayGainStatus | Volume(_) => {
            Permission::CONTROL
        }

        Next | Pause(_) | Play(_) | PlayId(_) | Previous | Seek(..) | SeekId(..) | SeekCur(_)
        | Stop => Permission::CONTROL,

        Add(..) | AddId(..) => Permission::ADD,
        Clear | Delete(_) | DeleteId(_) | Move(..) | MoveId(..) | Shuffle(_) | Swap(..)
        | SwapId(..) | Prio(..) | PrioId(..) => Permission::CONTROL,
        Playlist | PlaylistInfo(_) | PlaylistId(_) | PlaylistFind(_) | PlaylistSearch(_)
        | PlChanges(..) | PlChangesPosId(..) => Permission::READ,

        ListPlaylist(_) | ListPlaylistInfo(_) | ListPlayLists | PlaylistLength(_) => {
            Permission::READ
        }
        Load(..) => Permission::ADD,
        PlaylistAdd(..) => Permission::ADD,
        PlaylistClear(_) | PlaylistDelete(..) | PlaylistMove(..) | Rename(..) | Rm(_) | Save(_) => {
            Permission::CONTROL
        }

        Count(_) | Find(_) | List(..) | ListAll(_) | ListAllInfo(_) | ListFiles(_) | LsInfo(_)
        | Search(_) => Permission::READ,
        FindAdd(_) | SearchAdd(_) | SearchAddPl(..) => Permission::ADD,
        Update(_) | Rescan(_) => Permission::ADMIN,

        ListMounts | ListNeighbors => Permission::READ,

        Kill | Config => Permission::ADMIN,

        Subscribe(_) | Unsubscribe(_) | Channels | ReadMessages | SendMessage(..) => {
            Permission::READ
        }
    }
}

fn resolve_pos_or_range(queue_len: usize, range: Option<PosOrRange>) -> (usize, usize) {
    match range {
        None => (0, queue_len),
        Some(PosOrRange::Position(p)) => (p.0, p.0 + 1),
        Some(PosOrRange::Range(r)) => (r.start as usize, r.end.map(|e| e as usize).unwrap_or(queue_len)),
    }
}

fn resolve_range(queue_len: usize, range: Option<Range>) -> (usize, usize) {
    match range {
        None => (0, queue_len),
        Some(r) => (r.start as usize, r.end.map(|e| e as usize).unwrap_or(queue_len)),
    }
}

/// Resolves a `move`/`add`/`load` target position. `None` means "append, no
/// move needed". Relative offsets anchor on the currently playing position;
/// `+0` and `-0` are indistinguishable once parsed as a signed integer (both
/// collapse to `Relative(0)`), so both are treated as "immediately after".
fn resolve_insert_position(queue: &Queue, current: Option<Order>, pos: Option<QueuePosition>) -> Option<Result<usize, AckError>> {
    match pos {
        None => None,
        Some(QueuePosition::Absolute(n)) => Some(Ok(n as usize)),
        Some(QueuePosition::Relative(delta)) => {
            let Some(current_pos) = current.and_then(|o| queue.position_of_order(o)) else {
                return Some(Err(AckError::arg("No current song to anchor a relative position on")));
            };
            let target = current_pos.0 as i64 + delta as i64;
            Some(Ok(target.clamp(0, queue.len() as i64) as usize))
        }
    }
}

/// Deletes queue positions `start..end` one at a time, highest position
/// first (so earlier indices stay valid), notifying the playlist controller
/// of each removal so `current`/`queued` stay correct (spec.4.C "delete").
async fn delete_range_and_notify(
    controller: &mut crate::playlist_controller::PlaylistController,
    start: usize,
    end: usize,
    idle: &crate::idle::IdleBus,
) -> Result<(), AckError> {
    if start >= end || end > controller.queue.len() {
        return Err(AckError::arg("Bad range"));
    }
    for pos in (start..end).rev() {
        let order = controller.queue.order_of_position(Position(pos));
        controller.queue.delete_position(Position(pos)).map_err(queue_error_to_ack)?;
        if let Some(order) = order {
            controller.notify_position_deleted(order, idle).await;
        }
    }
    Ok(())
}

/// The conventional wire name for a tag type, as printed by `tagtypes`/`list`
/// (matches real MPD's capitalization, including the `MUSICBRAINZ_*` family's
/// underscored form).
/// Channel-name and per-client subscription limits (spec.4.F.4).
const MAX_SUBSCRIPTIONS_PER_CLIENT: usize = 16;

fn is_valid_channel_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '.' | '/' | '-'))
}

fn tag_wire_name(tag: Tag) -> &'static str {
    match tag {
        Tag::Artist => "Artist",
        Tag::ArtistSort => "ArtistSort",
        Tag::Album => "Album",
        Tag::AlbumSort => "AlbumSort",
        Tag::AlbumArtist => "AlbumArtist",
        Tag::AlbumArtistSort => "AlbumArtistSort",
        Tag::Title => "Title",
        Tag::TitleSort => "TitleSort",
        Tag::Track => "Track",
        Tag::Name => "Name",
        Tag::Genre => "Genre",
        Tag::Mood => "Mood",
        Tag::Date => "Date",
        Tag::OriginalDate => "OriginalDate",
        Tag::Composer => "Composer",
        Tag::ComposerSort => "ComposerSort",
        Tag::Performer => "Performer",
        Tag::Conductor => "Conductor",
        Tag::Work => "Work",
        Tag::Ensemble => "Ensemble",
        Tag::Movement => "Movement",
        Tag::MovementNumber => "MovementNumber",
        Tag::ShowMovement => "ShowMovement",
        Tag::Location => "Location",
        Tag::Grouping => "Grouping",
        Tag::Comment => "Comment",
        Tag::Disc => "Disc",
        Tag::Label => "Label",
        Tag::MusicbrainzArtistId => "MUSICBRAINZ_ARTISTID",
        Tag::MusicbrainzAlbumId => "MUSICBRAINZ_ALBUMID",
        Tag::MusicbrainzAlbumArtistId => "MUSICBRAINZ_ALBUMARTISTID",
        Tag::MusicbrainzTrackId => "MUSICBRAINZ_TRACKID",
        Tag::MusicbrainzReleasegroupId => "MUSICBRAINZ_RELEASEGROUPID",
        Tag::MusicbrainzReleaseTrackId => "MUSICBRAINZ_RELEASETRACKID",
        Tag::MusicbrainzWorkId => "MUSICBRAINZ_WORKID",
    }
}

/// The subset of `tag_wire_name`'s output that actually appears on
/// `SongInfo` (the other tag types are tracked by `tagtypes` but never
/// rendered, since `SongInfo`'s fields are fixed).
const SONG_INFO_TAGS: [Tag; 8] = [
    Tag::Artist,
    Tag::AlbumArtist,
    Tag::Title,
    Tag::Album,
    Tag::Track,
    Tag::Date,
    Tag::Genre,
    Tag::Disc,
];

fn strip_disabled_tags(body: String, filter: &TagTypeFilter) -> String {
    let disabled_names: Vec<&str> = SONG_INFO_TAGS
        .into_iter()
        .filter(|t| !filter.is_enabled(*t))
        .map(tag_wire_name)
        .collect();
    if disabled_names.is_empty() {
        return body;
    }
    body.lines()
        .filter(|line| {
            let key = line.split_once(':').map(|(k, _)| k).unwrap_or(line);
            !disabled_names.contains(&key)
        })
        .map(|line| format!("{line}\n"))
        .collect()
}

#[derive(Serialize)]
struct IdResponse {
    #[serde(rename = "Id")]
    id: u32,
}

#[derive(Serialize)]
struct UpdateJobId {
    updating_db: u32,
}

#[derive(Serialize)]
struct PosId {
    cpos: u32,
    #[serde(rename = "Id")]
    id: u32,
}

#[derive(Serialize)]
struct CountResult {
    songs: usize,
    #[serde(serialize_with = "response_format::duration_seconds")]
    playtime: Duration,
}

#[derive(Serialize)]
struct DirectoryLine {
    directory: Utf8PathBuf,
}

#[derive(Serialize)]
struct FileLine {
    file: Utf8PathBuf,
}

/// Dispatches one parsed command against a partition. `passwords` backs the
/// `password` command's permission elevation (spec.6.4's repeatable
/// `password <sha256>@<perm,...>` config entries).
pub async fn dispatch(
    cmd: &Command,
    partition: &Partition,
    ctx: &mut ClientContext,
    passwords: &[PasswordEntry],
) -> Result<Outcome, AckError> {
    let required = required_permission(cmd);
    if !matches!(cmd, Command::Password(_)) && !ctx.permission.contains(required) {
        return Err(AckError::permission());
    }

    use Command::*;
    match cmd {
        ClearError => {
            partition.controller.lock().await.player.clear_error().await;
            Ok(Outcome::Ok(String::new()))
        }
        CurrentSong => {
            let controller = partition.controller.lock().await;
            let body = match controller.current_entry() {
                Some(entry) => render(&SongInfo::from_song(
                    &entry.song,
                    controller.current_order().map(|o| o.0 as u32),
                    Some(entry.id.0),
                ))?,
                None => String::new(),
            };
            Ok(Outcome::Ok(strip_disabled_tags(body, &ctx.tag_types)))
        }
        Idle(subsystems) => Ok(Outcome::Idle(subsystems.clone())),
        NoIdle => Ok(Outcome::Ok(String::new())),
        Status => {
            let controller = partition.controller.lock().await;
            let mixer = partition.mixer.lock().await;
            let snapshot = controller.player.snapshot().await;
            let current_entry = controller.current_entry();
            let nextsongid = controller
                .queued_order()
                .and_then(|o| controller.queue.entry_at_order(o))
                .map(|e| e.id.0);
            let status = Status {
                volume: mixer.volume,
                repeat: controller.queue.repeat,
                random: controller.queue.random,
                single: controller.queue.single,
                consume: controller.queue.consume,
                partition: partition.name.clone(),
                playlist: controller.queue.version().0,
                playlistlength: controller.queue.len() as u64,
                state: snapshot.state.into(),
                xfade: snapshot.cross_fade,
                song: controller.current_order().map(|o| o.0 as u32),
                songid: current_entry.map(|e| e.id.0),
                elapsed: snapshot.elapsed,
                bitrate: snapshot.bit_rate,
                duration: snapshot.total_time,
                audio: snapshot.audio_format,
                error: snapshot.error,
                nextsong: controller.queued_order().map(|o| o.0 as u32),
                nextsongid,
            };
            Ok(Outcome::Ok(render(&status)?))
        }
        Stats => {
            let controller = partition.controller.lock().await;
            let database = partition.database.lock().await;
            let stats = database.stats();
            let snapshot = controller.player.snapshot().await;
            let body = Stats {
                artists: stats.artists,
                albums: stats.albums,
                songs: stats.songs,
                uptime: partition.uptime(),
                db_playtime: stats.playtime,
                db_update: jiff::Timestamp::UNIX_EPOCH,
                playtime: snapshot.elapsed.unwrap_or_default(),
            };
            Ok(Outcome::Ok(render(&body)?))
        }

        Consume(state) => {
            let mut controller = partition.controller.lock().await;
            controller.set_consume(*state != crate::mpd_protocol::ConsumeState::Off, &partition.idle).await;
            Ok(Outcome::Ok(String::new()))
        }
        Crossfade(secs) => {
            partition.controller.lock().await.player.set_cross_fade(Duration::from_secs(*secs)).await;
            partition.idle.add_subsystem(SubSystem::Options);
            Ok(Outcome::Ok(String::new()))
        }
        MixRampDb(_) | MixRampDelay(_) => {
            // MixRamp math is out of scope (Non-goal); accepted and ignored.
            Ok(Outcome::Ok(String::new()))
        }
        Random(b) => {
            partition.controller.lock().await.set_random(*b, &partition.idle).await;
            Ok(Outcome::Ok(String::new()))
        }
        Repeat(b) => {
            partition.controller.lock().await.set_repeat(*b, &partition.idle).await;
            Ok(Outcome::Ok(String::new()))
        }
        SetVol(n) => {
            partition.mixer.lock().await.volume = (*n as i32).clamp(0, 100);
            partition.idle.add_subsystem(SubSystem::Mixer);
            Ok(Outcome::Ok(String::new()))
        }
        Single(state) => {
            let mut controller = partition.controller.lock().await;
            controller.set_single(*state != crate::mpd_protocol::SingleState::Off, &partition.idle).await;
            Ok(Outcome::Ok(String::new()))
        }
        ReplayGainMode(mode) => {
            partition.mixer.lock().await.replay_gain_mode = *mode;
            Ok(Outcome::Ok(String::new()))
        }
        ReplayGainStatus => {
            let mode = partition.mixer.lock().await.replay_gain_mode;
            Ok(Outcome::Ok(format!("replay_gain_mode: {mode:?}\n").to_lowercase()))
        }
        Volume(delta) => {
            let mut mixer = partition.mixer.lock().await;
            mixer.volume = (mixer.volume + delta).clamp(0, 100);
            partition.idle.add_subsystem(SubSystem::Mixer);
            Ok(Outcome::Ok(String::new()))
        }

        Next => {
            partition.controller.lock().await.seek_order_delta(1, &partition.idle).await;
            Ok(Outcome::Ok(String::new()))
        }
        Previous => {
            partition.controller.lock().await.seek_order_delta(-1, &partition.idle).await;
            Ok(Outcome::Ok(String::new()))
        }
        Pause(force) => {
            partition.controller.lock().await.pause_toggle(*force).await;
            partition.idle.add_subsystem(SubSystem::Player);
            Ok(Outcome::Ok(String::new()))
        }
        Play(pos) => {
            let mut controller = partition.controller.lock().await;
            let order = match pos {
                Some(p) => controller
                    .queue
                    .order_of_position(*p)
                    .ok_or_else(|| AckError::no_exist(format!("No such song position: {}", p.0)))?,
                None => Order(0),
            };
            controller.play_order(order, &partition.idle).await;
            Ok(Outcome::Ok(String::new()))
        }
        PlayId(id) => {
            let mut controller = partition.controller.lock().await;
            match id {
                Some(id) => {
                    controller
                        .play_id(*id, &partition.idle)
                        .await
                        .ok_or_else(|| AckError::no_exist(format!("No such song id: {}", id.0)))?;
                }
                None => controller.play_order(Order(0), &partition.idle).await,
            }
            Ok(Outcome::Ok(String::new()))
        }
        Stop => {
            partition.controller.lock().await.stop(&partition.idle).await;
            Ok(Outcome::Ok(String::new()))
        }
        Seek(pos, time) => {
            let mut controller = partition.controller.lock().await;
            let order = controller
                .queue
                .order_of_position(*pos)
                .ok_or_else(|| AckError::no_exist(format!("No such song position: {}", pos.0)))?;
            if controller.current_order() != Some(order) {
                controller.play_order(order, &partition.idle).await;
            }
            controller.player.seek(Duration::from_secs_f32(*time)).await;
            Ok(Outcome::Ok(String::new()))
        }
        SeekId(id, time) => {
            let mut controller = partition.controller.lock().await;
            let pos = controller
                .queue
                .position_of_id(*id)
                .ok_or_else(|| AckError::no_exist(format!("No such song id: {}", id.0)))?;
            let order = controller.queue.order_of_position(pos).expect("position came from the queue itself");
            if controller.current_order() != Some(order) {
                controller.play_order(order, &partition.idle).await;
            }
            controller.player.seek(Duration::from_secs_f32(*time)).await;
            Ok(Outcome::Ok(String::new()))
        }
        SeekCur(time_or_offset) => {
            let controller = partition.controller.lock().await;
            let snapshot = controller.player.snapshot().await;
            let target = match time_or_offset {
                crate::mpd_protocol::TimeOrOffset::Absolute(t) => Duration::from_secs_f32(*t),
                crate::mpd_protocol::TimeOrOffset::Relative(delta) => {
                    let elapsed = snapshot.elapsed.unwrap_or_default().as_secs_f32();
                    Duration::from_secs_f32((elapsed + *delta).max(0.0))
                }
            };
            controller.player.seek(target).await;
            Ok(Outcome::Ok(String::new()))
        }

        Add(uri, pos) => {
            let controller_guard = partition.controller.lock().await;
            let database = partition.database.lock().await;
            let song = database
                .song_by_uri(uri)
                .await
                .ok_or_else(|| AckError::no_exist(format!("No such song: {uri}")))?;
            drop(database);
            drop(controller_guard);
            add_song_to_queue(partition, song, *pos).await?;
            Ok(Outcome::Ok(String::new()))
        }
        AddId(uri, pos) => {
            let database = partition.database.lock().await;
            let song = database
                .song_by_uri(uri)
                .await
                .ok_or_else(|| AckError::no_exist(format!("No such song: {uri}")))?;
            drop(database);
            let id = add_song_to_queue(partition, song, *pos).await?;
            Ok(Outcome::Ok(render(&IdResponse { id: id.0 })?))
        }
        Clear => {
            let mut controller = partition.controller.lock().await;
            controller.queue.clear();
            controller.stop(&partition.idle).await;
            partition.idle.add_subsystem(SubSystem::Playlist);
            Ok(Outcome::Ok(String::new()))
        }
        Delete(range) => {
            let mut controller = partition.controller.lock().await;
            let (start, end) = resolve_pos_or_range(controller.queue.len(), *range);
            delete_range_and_notify(&mut controller, start, end, &partition.idle).await?;
            controller.update_queued_song(&partition.idle).await;
            partition.idle.add_subsystem(SubSystem::Playlist);
            Ok(Outcome::Ok(String::new()))
        }
        DeleteId(id) => {
            let mut controller = partition.controller.lock().await;
            let pos = controller
                .queue
                .position_of_id(*id)
                .ok_or_else(|| AckError::no_exist(format!("No such song id: {}", id.0)))?;
            delete_range_and_notify(&mut controller, pos.0, pos.0 + 1, &partition.idle).await?;
            controller.update_queued_song(&partition.idle).await;
            partition.idle.add_subsystem(SubSystem::Playlist);
            Ok(Outcome::Ok(String::new()))
        }
        Move(range, to) => {
            let mut controller = partition.controller.lock().await;
            let (start, end) = resolve_pos_or_range(controller.queue.len(), Some(*range));
            let current = controller.current_order();
            let target = match resolve_insert_position(&controller.queue, current, Some(*to)) {
                Some(Ok(target)) => target,
                Some(Err(e)) => return Err(e),
                None => unreachable!("move always passes Some(to)"),
            };
            controller.queue.move_range(start, end, target).map_err(queue_error_to_ack)?;
            controller.update_queued_song(&partition.idle).await;
            partition.idle.add_subsystem(SubSystem::Playlist);
            Ok(Outcome::Ok(String::new()))
        }
        MoveId(id, to) => {
            let mut controller = partition.controller.lock().await;
            let pos = controller
                .queue
                .position_of_id(*id)
                .ok_or_else(|| AckError::no_exist(format!("No such song id: {}", id.0)))?;
            let current = controller.current_order();
            let target = match resolve_insert_position(&controller.queue, current, Some(*to)) {
                Some(Ok(target)) => target,
                Some(Err(e)) => return Err(e),
                None => unreachable!("moveid always passes Some(to)"),
            };
            controller.queue.move_range(pos.0, pos.0 + 1, target).map_err(queue_error_to_ack)?;
            controller.update_queued_song(&partition.idle).await;
            partition.idle.add_subsystem(SubSystem::Playlist);
            Ok(Outcome::Ok(String::new()))
        }
        Playlist => playlist_info(partition, None, &ctx.tag_types).await,
        PlaylistInfo(range) => playlist_info(partition, *range, &ctx.tag_types).await,
        PlaylistId(id) => {
            let controller = partition.controller.lock().await;
            match id {
                Some(id) => {
                    let (pos, entry) = controller
                        .queue
                        .entry_by_id(*id)
                        .ok_or_else(|| AckError::no_exist(format!("No such song id: {}", id.0)))?;
                    let body = render(&SongInfo::from_song(&entry.song, Some(pos.0 as u32), Some(entry.id.0)))?;
                    Ok(Outcome::Ok(strip_disabled_tags(body, &ctx.tag_types)))
                }
                None => {
                    drop(controller);
                    playlist_info(partition, None, &ctx.tag_types).await
                }
            }
        }
        PlaylistFind(query) => queue_query(partition, query, &ctx.tag_types).await,
        PlaylistSearch(query) => queue_query(partition, query, &ctx.tag_types).await,
        PlChanges(version, range) => {
            let controller = partition.controller.lock().await;
            let (start, end) = resolve_range(controller.queue.len(), *range);
            let mut body = String::new();
            for (pos, entry) in controller.queue.changes_since(crate::queue::Version(*version)) {
                if pos.0 < start || pos.0 >= end {
                    continue;
                }
                body.push_str(&render(&SongInfo::from_song(&entry.song, Some(pos.0 as u32), Some(entry.id.0)))?);
            }
            Ok(Outcome::Ok(strip_disabled_tags(body, &ctx.tag_types)))
        }
        PlChangesPosId(version, range) => {
            let controller = partition.controller.lock().await;
            let (start, end) = resolve_range(controller.queue.len(), *range);
            let mut body = String::new();
            for (pos, entry) in controller.queue.changes_since(crate::queue::Version(*version)) {
                if pos.0 < start || pos.0 >= end {
                    continue;
                }
                body.push_str(&render(&PosId { cpos: pos.0 as u32, id: entry.id.0 })?);
            }
            Ok(Outcome::Ok(body))
        }
        Prio(priority, ranges) => {
            let mut controller = partition.controller.lock().await;
            let current = controller.current_order();
            for range in ranges {
                let (start, end) = resolve_range(controller.queue.len(), Some(*range));
                controller
                    .queue
                    .set_priority_range(start, end, *priority, current)
                    .map_err(queue_error_to_ack)?;
            }
            partition.idle.add_subsystem(SubSystem::Playlist);
            Ok(Outcome::Ok(String::new()))
        }
        PrioId(priority, ids) => {
            let mut controller = partition.controller.lock().await;
            let current = controller.current_order();
            for id in ids {
                controller.queue.set_priority_id(*id, *priority, current).map_err(queue_error_to_ack)?;
            }
            partition.idle.add_subsystem(SubSystem::Playlist);
            Ok(Outcome::Ok(String::new()))
        }
        Shuffle(_range) => {
            // Sub-range shuffle isn't modeled by `Queue::shuffle_order`
            // (it always shuffles the tail after the current song); a
            // bounded range argument is accepted but shuffles the whole
            // tail, same carve-out as the in-memory database's filters.
            let mut controller = partition.controller.lock().await;
            let current = controller.current_order();
            controller.queue.shuffle_order(current);
            partition.idle.add_subsystem(SubSystem::Playlist);
            Ok(Outcome::Ok(String::new()))
        }
        Swap(a, b) => {
            partition.controller.lock().await.queue.swap_positions(a.0, b.0).map_err(queue_error_to_ack)?;
            partition.idle.add_subsystem(SubSystem::Playlist);
            Ok(Outcome::Ok(String::new()))
        }
        SwapId(a, b) => {
            partition.controller.lock().await.queue.swap_ids(*a, *b).map_err(queue_error_to_ack)?;
            partition.idle.add_subsystem(SubSystem::Playlist);
            Ok(Outcome::Ok(String::new()))
        }

        ListPlaylist(name) => {
            let playlists = partition.playlists.lock().await;
            let body = playlists
                .entries(name)?
                .iter()
                .map(|uri| render(&FileLine { file: uri.clone() }))
                .collect::<Result<String, AckError>>()?;
            Ok(Outcome::Ok(body))
        }
        ListPlaylistInfo(name) => {
            let playlists = partition.playlists.lock().await;
            let uris = playlists.entries(name)?.to_vec();
            drop(playlists);
            let database = partition.database.lock().await;
            let mut body = String::new();
            for (i, uri) in uris.iter().enumerate() {
                let info = match database.song_by_uri(uri).await {
                    Some(song) => SongInfo::from_song(&song, Some(i as u32), None),
                    None => SongInfo::from_song(&DetachedSong::new(uri.clone(), crate::song::Tags::default()), Some(i as u32), None),
                };
                body.push_str(&render(&info)?);
            }
            Ok(Outcome::Ok(strip_disabled_tags(body, &ctx.tag_types)))
        }
        ListPlayLists => {
            let playlists = partition.playlists.lock().await;
            let mut summaries: Vec<_> = playlists
                .names()
                .map(|(name, modified)| PlaylistSummary { playlist: name.0.clone(), last_modified: modified })
                .collect();
            summaries.sort_by(|a, b| a.playlist.cmp(&b.playlist));
            let mut body = String::new();
            for summary in &summaries {
                body.push_str(&render(summary)?);
            }
            Ok(Outcome::Ok(body))
        }
        Load(name, pos) => {
            let playlists = partition.playlists.lock().await;
            let uris = playlists.entries(name)?.to_vec();
            drop(playlists);
            let database = partition.database.lock().await;
            let mut songs = Vec::with_capacity(uris.len());
            for uri in &uris {
                if let Some(song) = database.song_by_uri(uri).await {
                    songs.push(song);
                }
            }
            drop(database);
            for song in songs {
                add_song_to_queue(partition, song, *pos).await?;
            }
            Ok(Outcome::Ok(String::new()))
        }
        PlaylistAdd(name, uri) => {
            partition.playlists.lock().await.playlist_add(name, uri.clone())?;
            partition.idle.add_subsystem(SubSystem::StoredPlaylist);
            Ok(Outcome::Ok(String::new()))
        }
        PlaylistClear(name) => {
            partition.playlists.lock().await.playlist_clear(name)?;
            partition.idle.add_subsystem(SubSystem::StoredPlaylist);
            Ok(Outcome::Ok(String::new()))
        }
        PlaylistDelete(name, pos) => {
            partition.playlists.lock().await.playlist_delete(name, *pos as usize)?;
            partition.idle.add_subsystem(SubSystem::StoredPlaylist);
            Ok(Outcome::Ok(String::new()))
        }
        PlaylistLength(name) => {
            let len = partition.playlists.lock().await.len(name)?;
            Ok(Outcome::Ok(format!("playlistlength: {len}\n")))
        }
        PlaylistMove(name, from, to) => {
            partition.playlists.lock().await.playlist_move(name, *from as usize, *to as usize)?;
            partition.idle.add_subsystem(SubSystem::StoredPlaylist);
            Ok(Outcome::Ok(String::new()))
        }
        Rename(from, to) => {
            partition.playlists.lock().await.rename(from, to.clone())?;
            partition.idle.add_subsystem(SubSystem::StoredPlaylist);
            Ok(Outcome::Ok(String::new()))
        }
        Rm(name) => {
            partition.playlists.lock().await.remove(name)?;
            partition.idle.add_subsystem(SubSystem::StoredPlaylist);
            Ok(Outcome::Ok(String::new()))
        }
        Save(name) => {
            let uris: Vec<_> = partition
                .controller
                .lock()
                .await
                .queue
                .iter()
                .map(|(_, entry)| entry.song.uri.clone())
                .collect();
            partition.playlists.lock().await.save(name.clone(), uris, SaveMode::Create)?;
            partition.idle.add_subsystem(SubSystem::StoredPlaylist);
            Ok(Outcome::Ok(String::new()))
        }

        Count(query) => {
            let database = partition.database.lock().await;
            let songs = database.find(query).await;
            let playtime = songs.iter().filter_map(|s| s.duration()).sum();
            Ok(Outcome::Ok(render(&CountResult { songs: songs.len(), playtime })?))
        }
        Find(query) => queue_database_query(partition, query, false, &ctx.tag_types).await,
        Search(query) => queue_database_query(partition, query, true, &ctx.tag_types).await,
        FindAdd(query) => {
            let database = partition.database.lock().await;
            let songs = database.find(query).await;
            drop(database);
            for song in songs {
                add_song_to_queue(partition, song, None).await?;
            }
            Ok(Outcome::Ok(String::new()))
        }
        SearchAdd(query) => {
            let database = partition.database.lock().await;
            let songs = database.search(query).await;
            drop(database);
            for song in songs {
                add_song_to_queue(partition, song, None).await?;
            }
            Ok(Outcome::Ok(String::new()))
        }
        SearchAddPl(name, query) => {
            let database = partition.database.lock().await;
            let uris: Vec<_> = database.search(query).await.into_iter().map(|s| s.uri).collect();
            drop(database);
            partition.playlists.lock().await.save(name.clone(), uris, SaveMode::Append)?;
            partition.idle.add_subsystem(SubSystem::StoredPlaylist);
            Ok(Outcome::Ok(String::new()))
        }
        List(tag, query) => {
            let database = partition.database.lock().await;
            let mut values = match query {
                Some(query) => {
                    let mut values: Vec<String> = database
                        .find(query)
                        .await
                        .iter()
                        .flat_map(|s| s.tags.get_all(*tag).map(str::to_owned).collect::<Vec<_>>())
                        .collect();
                    values.sort_unstable();
                    values.dedup();
                    values
                }
                None => database.list_tag(*tag).await,
            };
            values.sort_unstable();
            let name = tag_wire_name(*tag);
            let mut body = String::new();
            for value in values.drain(..) {
                body.push_str(&format!("{name}: {value}\n"));
            }
            Ok(Outcome::Ok(body))
        }
        ListAll(uri) => list_directory(partition, uri.as_deref(), false).await,
        ListAllInfo(uri) => list_directory(partition, uri.as_deref(), true).await,
        LsInfo(uri) => list_directory(partition, uri.as_deref(), true).await,
        ListFiles(uri) => {
            let database = partition.database.lock().await;
            match database.song_by_uri(uri).await {
                Some(song) => Ok(Outcome::Ok(render(&FileLine { file: song.uri })?)),
                None => list_directory(partition, Some(uri.as_path()), false).await,
            }
        }
        Update(uri) => {
            let mut database = partition.database.lock().await;
            database.update(uri.as_deref()).await;
            partition.idle.add_subsystem(SubSystem::Database);
            partition.idle.add_subsystem(SubSystem::Update);
            Ok(Outcome::Ok(render(&UpdateJobId { updating_db: 1 })?))
        }
        Rescan(uri) => {
            let mut database = partition.database.lock().await;
            database.update(uri.as_deref()).await;
            partition.idle.add_subsystem(SubSystem::Database);
            partition.idle.add_subsystem(SubSystem::Update);
            Ok(Outcome::Ok(render(&UpdateJobId { updating_db: 1 })?))
        }

        ListMounts => Ok(Outcome::Ok(String::new())),
        ListNeighbors => Ok(Outcome::Ok(String::new())),

        Close => Ok(Outcome::Close),
        Kill => Ok(Outcome::Kill),
        Password(pw) => {
            let hash = format!("{:x}", Sha256::digest(pw.as_bytes()));
            match passwords.iter().find(|entry| entry.sha256_hex == hash) {
                Some(entry) => {
                    ctx.permission = entry.permission;
                    Ok(Outcome::Ok(String::new()))
                }
                None => Err(AckError::new(AckCode::Password, "incorrect password")),
            }
        }
        Ping => Ok(Outcome::Ok(String::new())),
        TagTypes => {
            let mut body = String::new();
            for tag in ctx.tag_types.enabled() {
                body.push_str(&format!("tagtype: {}\n", tag_wire_name(tag)));
            }
            Ok(Outcome::Ok(body))
        }
        TagTypesDisable(tags) => {
            ctx.tag_types.disable(tags.iter().copied());
            Ok(Outcome::Ok(String::new()))
        }
        TagTypesEnable(tags) => {
            ctx.tag_types.enable(tags.iter().copied());
            Ok(Outcome::Ok(String::new()))
        }
        TagTypesClear => {
            ctx.tag_types.clear();
            Ok(Outcome::Ok(String::new()))
        }
        TagTypesAll => {
            ctx.tag_types.set_all();
            Ok(Outcome::Ok(String::new()))
        }
        Config => Ok(Outcome::Ok(String::new())),
        Commands => {
            let mut body = String::new();
            for name in Command::VARIANTS {
                body.push_str(&format!("command: {name}\n"));
            }
            Ok(Outcome::Ok(body))
        }
        NotCommands => Ok(Outcome::Ok(String::new())),
        UrlHandlers => Ok(Outcome::Ok("handler: file://\n".to_string())),
        Decoders => Ok(Outcome::Ok(String::new())),

        Subscribe(channel) => {
            if !is_valid_channel_name(&channel.0) {
                return Err(AckError::arg("invalid channel name"));
            }
            if ctx.subscriptions.contains(channel) {
                return Err(AckError::new(AckCode::Exist, "already subscribed to this channel"));
            }
            if ctx.subscriptions.len() >= MAX_SUBSCRIPTIONS_PER_CLIENT {
                return Err(AckError::no_exist("subscription list is full"));
            }
            ctx.subscriptions.insert(channel.clone());
            partition.messages.mark_subscribed(channel);
            partition.idle.add_subsystem(SubSystem::Subscription);
            Ok(Outcome::Ok(String::new()))
        }
        Unsubscribe(channel) => {
            if !ctx.subscriptions.remove(channel) {
                return Err(AckError::no_exist("not subscribed to this channel"));
            }
            partition.messages.mark_unsubscribed(channel);
            partition.idle.add_subsystem(SubSystem::Subscription);
            Ok(Outcome::Ok(String::new()))
        }
        Channels => {
            let mut body = String::new();
            for channel in partition.messages.channels() {
                body.push_str(&format!("channel: {}\n", channel.0));
            }
            Ok(Outcome::Ok(body))
        }
        ReadMessages => {
            let mut body = String::new();
            loop {
                match ctx.inbox.try_recv() {
                    Ok((channel, message)) if ctx.subscriptions.contains(&channel) => {
                        body.push_str(&format!("channel: {}\nmessage: {}\n", channel.0, message));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
            Ok(Outcome::Ok(body))
        }
        SendMessage(channel, message) => {
            if !is_valid_channel_name(&channel.0) {
                return Err(AckError::arg("invalid channel name"));
            }
            if !partition.messages.channels().contains(channel) {
                return Err(AckError::no_exist("no clients are subscribed to this channel"));
            }
            partition.messages.send(channel.clone(), message.clone());
            partition.idle.add_subsystem(SubSystem::Message);
            Ok(Outcome::Ok(String::new()))
        }
    }
}

/// Shared tail of `add`/`addid`/`findadd`/`searchadd`/`load`: append to the
/// queue, then honor an optional target position.
async fn add_song_to_queue(partition: &Partition, song: DetachedSong, pos: Option<QueuePosition>) -> Result<SongId, AckError> {
    let mut controller = partition.controller.lock().await;
    let current = controller.current_order();
    let id = controller.queue.append(song, current).map_err(queue_error_to_ack)?;
    if let Some(result) = resolve_insert_position(&controller.queue, current, pos) {
        let target = result?;
        controller.queue.move_id(id, target).map_err(queue_error_to_ack)?;
    }
    controller.update_queued_song(&partition.idle).await;
    partition.idle.add_subsystem(SubSystem::Playlist);
    Ok(id)
}

async fn playlist_info(partition: &Partition, range: Option<PosOrRange>, tag_types: &TagTypeFilter) -> Result<Outcome, AckError> {
    let controller = partition.controller.lock().await;
    let (start, end) = resolve_pos_or_range(controller.queue.len(), range);
    if start > end || end > controller.queue.len() {
        return Err(AckError::arg("Bad range"));
    }
    let mut body = String::new();
    for (pos, entry) in controller.queue.iter() {
        if pos.0 < start || pos.0 >= end {
            continue;
        }
        body.push_str(&render(&SongInfo::from_song(&entry.song, Some(pos.0 as u32), Some(entry.id.0)))?);
    }
    Ok(Outcome::Ok(strip_disabled_tags(body, tag_types)))
}

async fn queue_query(partition: &Partition, query: &Query, tag_types: &TagTypeFilter) -> Result<Outcome, AckError> {
    let controller = partition.controller.lock().await;
    let mut body = String::new();
    for (pos, entry) in controller.queue.iter() {
        if query.matches(&entry.song) {
            body.push_str(&render(&SongInfo::from_song(&entry.song, Some(pos.0 as u32), Some(entry.id.0)))?);
        }
    }
    Ok(Outcome::Ok(strip_disabled_tags(body, tag_types)))
}

async fn queue_database_query(partition: &Partition, query: &Query, search: bool, tag_types: &TagTypeFilter) -> Result<Outcome, AckError> {
    let database = partition.database.lock().await;
    let songs = if search { database.search(query).await } else { database.find(query).await };
    let mut body = String::new();
    for song in &songs {
        body.push_str(&render(&SongInfo::from_song(song, None, None))?);
    }
    Ok(Outcome::Ok(strip_disabled_tags(body, tag_types)))
}

async fn list_directory(partition: &Partition, uri: Option<&camino::Utf8Path>, with_info: bool) -> Result<Outcome, AckError> {
    let database = partition.database.lock().await;
    let dir = uri.unwrap_or(camino::Utf8Path::new(""));
    let items = database.list_all_under(dir).await;
    let mut body = String::new();
    for item in items {
        match item {
            crate::database::ListItem::Directory(path) => body.push_str(&render(&DirectoryLine { directory: path })?),
            crate::database::ListItem::File(path) => {
                if with_info {
                    if let Some(song) = database.song_by_uri(&path).await {
                        body.push_str(&render(&SongInfo::from_song(&song, None, None))?);
                        continue;
                    }
                }
                body.push_str(&render(&FileLine { file: path })?);
            }
        }
    }
    Ok(Outcome::Ok(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DatabaseBackend, MemoryDatabase};
    use crate::playlist_controller::PlaylistController;
    use crate::playlist_store::PlaylistStore;
    use crate::song::Tags;
    use camino::Utf8Path;

    fn test_partition() -> std::sync::Arc<Partition> {
        let mut db = MemoryDatabase::new();
        db.insert(DetachedSong::new("a.flac", Tags::builder().add(Tag::Artist, "Boards of Canada").build()));
        let playlists = PlaylistStore::load_from_dir(Utf8Path::new("/tmp/beatline-dispatch-tests").to_owned()).unwrap_or_else(|_| {
            panic!("could not set up test playlist dir")
        });
        let partition = std::sync::Arc::new(Partition::new(
            "default",
            PlaylistController::new(64),
            playlists,
            DatabaseBackend::Memory(db),
        ));
        crate::player_driver::spawn(std::sync::Arc::clone(&partition));
        partition
    }

    fn ctx(partition: &Partition) -> ClientContext {
        ClientContext::new(partition, Permission::default())
    }

    #[tokio::test]
    async fn status_reports_empty_queue() {
        let partition = test_partition();
        let mut c = ctx(&partition);
        let outcome = dispatch(&Command::Status, &partition, &mut c, &[]).await.unwrap();
        let Outcome::Ok(body) = outcome else { panic!("expected Ok") };
        assert!(body.contains("playlistlength: 0"));
        assert!(body.contains("state: stop"));
    }

    #[tokio::test]
    async fn add_then_playlistinfo_round_trips() {
        let partition = test_partition();
        let mut c = ctx(&partition);
        dispatch(&Command::Add(Utf8PathBuf::from("a.flac"), None), &partition, &mut c, &[]).await.unwrap();
        let outcome = dispatch(&Command::PlaylistInfo(None), &partition, &mut c, &[]).await.unwrap();
        let Outcome::Ok(body) = outcome else { panic!("expected Ok") };
        assert!(body.contains("file: a.flac"));
        assert!(body.contains("Artist: Boards of Canada"));
    }

    #[tokio::test]
    async fn permission_denied_without_control() {
        let partition = test_partition();
        let mut c = ctx(&partition);
        c.permission = Permission::READ;
        let err = dispatch(&Command::Stop, &partition, &mut c, &[]).await.unwrap_err();
        assert_eq!(err.code, AckCode::Permission);
    }

    #[tokio::test]
    async fn tagtypes_disable_hides_field_from_song_info() {
        let partition = test_partition();
        let mut c = ctx(&partition);
        dispatch(&Command::Add(Utf8PathBuf::from("a.flac"), None), &partition, &mut c, &[]).await.unwrap();
        c.tag_types.disable([Tag::Artist]);
        let outcome = dispatch(&Command::PlaylistInfo(None), &partition, &mut c, &[]).await.unwrap();
        let Outcome::Ok(body) = outcome else { panic!("expected Ok") };
        assert!(!body.contains("Artist:"));
        assert!(body.contains("file: a.flac"));
    }

    #[tokio::test]
    async fn subscribe_twice_is_an_error() {
        let partition = test_partition();
        let mut c = ctx(&partition);
        dispatch(&Command::Subscribe(ChannelName("chat".into())), &partition, &mut c, &[]).await.unwrap();
        let err = dispatch(&Command::Subscribe(ChannelName("chat".into())), &partition, &mut c, &[]).await.unwrap_err();
        assert_eq!(err.code, AckCode::Exist);
    }

    #[tokio::test]
    async fn send_message_is_readable_by_subscriber() {
        let partition = test_partition();
        let mut c = ctx(&partition);
        dispatch(&Command::Subscribe(ChannelName("chat".into())), &partition, &mut c, &[]).await.unwrap();
        dispatch(&Command::SendMessage(ChannelName("chat".into()), "hello".into()), &partition, &mut c, &[])
            .await
            .unwrap();
        let outcome = dispatch(&Command::ReadMessages, &partition, &mut c, &[]).await.unwrap();
        let Outcome::Ok(body) = outcome else { panic!("expected Ok") };
        assert!(body.contains("channel: chat"));
        assert!(body.contains("message: hello"));
    }
}
