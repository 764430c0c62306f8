//! Parses mpd commands, which are always a single line of text.

use std::str::FromStr;

use camino::Utf8PathBuf;
use color_eyre::Section;
use color_eyre::eyre::Context;
use itertools::Itertools;
use peg::RuleResult;
use peg::RuleResult::*;

use crate::idle::SubSystem;
use crate::mpd_protocol::query::{Filter, Query, QueryNode};
use crate::mpd_protocol::{
    ChannelName, Command, Command::*, ConsumeState, PosOrRange, QueuePosition, Range,
    ReplayGainMode, SingleState, TimeOrOffset,
};
use crate::playlist_store::PlaylistName;
use crate::queue::{Position, SongId};
use crate::song::Tag;

peg::parser! {
grammar command() for str {
    pub rule line() -> Command
        = v:command() {v}
    rule command() -> Command
        = query_state() / playback_options() / control_playback() / manipulate_queue()
        / manipulate_playlist() / interact_with_database() / mounts_and_neighbors()
        / stickers() / connection_settings() / partitions() / audio_outputs()
        / client_to_client() / command_without_arguments()

    rule query_state() -> Command
        = "idle" s:(_ s:list(<subsystem()>) {s})? { Command::Idle(s.unwrap_or_default()) }
        / "noidle" { Command::NoIdle }
        / "status" { Command::Status }
        / "stats" { Command::Stats }
        / "currentsong" { Command::CurrentSong }
        / "clearerror" { Command::ClearError }

    rule playback_options() -> Command
        = "consume" _ s:consume_state() { Command::Consume(s) }
        / "crossfade" _ n:number() { Command::Crossfade(n) }
        / "mixrampdb" _ n:float() { Command::MixRampDb(n) }
        / "mixrampdelay" _ n:float() { Command::MixRampDelay(n) }
        / "random" _ b:bool_flag() { Command::Random(b) }
        / "repeat" _ b:bool_flag() { Command::Repeat(b) }
        / "setvol" _ n:number() { Command::SetVol(n) }
        / "single" _ s:single_state() { Command::Single(s) }
        / "replay_gain_mode" _ m:replay_gain_mode() { Command::ReplayGainMode(m) }
        / "replay_gain_status" { Command::ReplayGainStatus }
        / "volume" _ n:signed_number::<i32>() { Command::Volume(n) }

    rule control_playback() -> Command
        = "playid" p:(_ p:song_id() {p})? { Command::PlayId(p) }
        / "play" p:(_ p:position() {p})? { Command::Play(p) }
        / "stop" { Command::Stop }
        / "pause" b:(_ b:bool_flag() {b})? { Command::Pause(b) }
        / "next" { Command::Next }
        / "previous" { Command::Previous }
        / "seekid" _ id:song_id() _ t:float() { Command::SeekId(id, t) }
        / "seekcur" _ t:time_or_offset() { Command::SeekCur(t) }
        / "seek" _ p:position() _ t:float() { Command::Seek(p, t) }

    rule manipulate_queue() -> Command
        = "addid" _ uri:uri() pos:(_ p:queue_position() {p})? { Command::AddId(uri, pos) }
        / "add" _ uri:uri() pos:(_ p:queue_position() {p})? { Command::Add(uri, pos) }
        / "clear" { Command::Clear }
        / "deleteid" _ id:song_id() { Command::DeleteId(id) }
        / "delete" p:(_ p:pos_or_range() {p})? { Command::Delete(p) }
        / "moveid" _ id:song_id() _ to:queue_position() { Command::MoveId(id, to) }
        / "move" _ p:pos_or_range() _ to:queue_position() { Command::Move(p, to) }
        / "swapid" _ a:song_id() _ b:song_id() { Command::SwapId(a, b) }
        / "swap" _ a:position() _ b:position() { Command::Swap(a, b) }
        / "playlistfind" _ q:query() { Command::PlaylistFind(q) }
        / "playlistsearch" _ q:query() { Command::PlaylistSearch(q) }
        / "playlistid" id:(_ id:song_id() {id})? { Command::PlaylistId(id) }
        / "playlistinfo" p:(_ p:pos_or_range() {p})? { Command::PlaylistInfo(p) }
        / "playlist" { Command::Playlist }
        / "plchangesposid" _ v:number() r:(_ r:range() {r})? { Command::PlChangesPosId(v, r) }
        / "plchanges" _ v:number() r:(_ r:range() {r})? { Command::PlChanges(v, r) }
        / "prioid" _ p:number() ids:(_ ids:list(<song_id()>) {ids})? { Command::PrioId(p, ids.unwrap_or_default()) }
        / "prio" _ p:number() ranges:(_ ranges:list(<range()>) {ranges})? { Command::Prio(p, ranges.unwrap_or_default()) }
        / "shuffle" r:(_ r:range() {r})? { Command::Shuffle(r) }

    rule manipulate_playlist() -> Command
        = "listplaylistinfo" _ n:playlist_name() { Command::ListPlaylistInfo(n) }
        / "listplaylist" _ n:playlist_name() { Command::ListPlaylist(n) }
        / "listplaylists" { Command::ListPlayLists }
        / "load" _ n:playlist_name() pos:(_ p:queue_position() {p})? { Command::Load(n, pos) }
        / "playlistadd" _ n:playlist_name() _ uri:uri() { Command::PlaylistAdd(n, uri) }
        / "playlistclear" _ n:playlist_name() { Command::PlaylistClear(n) }
        / "playlistdelete" _ n:playlist_name() _ p:number() { Command::PlaylistDelete(n, p) }
        / "playlistlength" _ n:playlist_name() { Command::PlaylistLength(n) }
        / "playlistmove" _ n:playlist_name() _ from:number() _ to:number() { Command::PlaylistMove(n, from, to) }
        / "rename" _ from:playlist_name() _ to:playlist_name() { Command::Rename(from, to) }
        / "rm" _ n:playlist_name() { Command::Rm(n) }
        / "save" _ n:playlist_name() { Command::Save(n) }

    rule interact_with_database() -> Command
        = "findadd" _ q:query() { Command::FindAdd(q) }
        / "find" _ q:query() { Command::Find(q) }
        / "searchaddpl" _ n:playlist_name() _ q:query() { Command::SearchAddPl(n, q) }
        / "searchadd" _ q:query() { Command::SearchAdd(q) }
        / "search" _ q:query() { Command::Search(q) }
        / "count" _ q:query() { Command::Count(q) }
        / "list" _ t:tag() q:(_ q:query() {q})? { Command::List(t, q) }
        / "listallinfo" uri:(_ u:uri() {u})? { Command::ListAllInfo(uri) }
        / "listall" uri:(_ u:uri() {u})? { Command::ListAll(uri) }
        / "listfiles" _ uri:uri() { Command::ListFiles(uri) }
        / "lsinfo" uri:(_ u:uri() {u})? { Command::LsInfo(uri) }
        / "update" uri:(_ u:uri() {u})? { Command::Update(uri) }
        / "rescan" uri:(_ u:uri() {u})? { Command::Rescan(uri) }

    rule mounts_and_neighbors() -> Command
        = "listmounts" { Command::ListMounts }
        / "listneighbors" { Command::ListNeighbors }

    rule stickers() -> Command
        = "todo" { todo!("sticker commands are out of scope") }

    rule connection_settings() -> Command
        = "close" { Command::Close }
        / "kill" { Command::Kill }
        / "password" _ pw:string() { Command::Password(pw) }
        / "ping" { Command::Ping }
        / "tagtypes" sub:(_ sub:tagtypes_sub() {sub})? { sub.unwrap_or(Command::TagTypes) }
        / "urlhandlers" { Command::UrlHandlers }
        / "decoders" { Command::Decoders }
        / "config" { Command::Config }
        / "commands" { Command::Commands }
        / "notcommands" { Command::NotCommands }

    rule partitions() -> Command
        = "todo" { todo!("partition commands are out of scope") }

    rule audio_outputs() -> Command
        = "todo" { todo!("output commands are out of scope") }

    rule client_to_client() -> Command
        = "subscribe" _ c:channel() { Command::Subscribe(c) }
        / "unsubscribe" _ c:channel() { Command::Unsubscribe(c) }
        / "channels" { Command::Channels }
        / "readmessages" { Command::ReadMessages }
        / "sendmessage" _ c:channel() _ m:string() { Command::SendMessage(c, m) }

    rule command_without_arguments() -> Command
        = c:$(['a'..='z' | 'A'..='Z' | '_']+) {? Command::from_str(c).or(Err("unknown command")) }

    // ---- tagtypes subcommands ----
    rule tagtypes_sub() -> Command
        = "\"clear\"" { Command::TagTypesClear }
        / "clear" { Command::TagTypesClear }
        / "all" { Command::TagTypesAll }
        / "enable" _ types:(tag() ++ _) { Command::TagTypesEnable(types) }
        / "disable" _ types:(tag() ++ _) { Command::TagTypesDisable(types) }

    // ---- query / filter expressions ----
    rule query() -> Query
        = n:query_node() { Query(n) }
    rule query_node() -> QueryNode
        = first:single_node() rest:(_ "AND" _ n:single_node() { n })+ {
            let mut nodes = vec![first];
            nodes.extend(rest);
            QueryNode::And(nodes)
        }
        / single_node()
    rule single_node() -> QueryNode
        = "(" _? "!" n:single_node() _? ")" {
            match n {
                QueryNode::Filter(f) => QueryNode::NegatedFilter(f),
                other => other,
            }
        }
        / "(" _? f:filter() _? ")" { QueryNode::Filter(f) }

    rule filter() -> Filter
        = "base" _ p:quoted_or_bare() { Filter::ParentPathEquals(Utf8PathBuf::from(p)) }
        / "file" _ "==" _ p:quoted_or_bare() { Filter::PathEqual(Utf8PathBuf::from(p)) }
        / "modified-since" _ t:timestamp() { Filter::ModifiedSince { time: t } }
        / "added-since" _ t:timestamp() { Filter::AddedSince { time: t } }
        / "prio" _ ">=" _ n:number() { Filter::QueuePriority(n) }
        / t:tag() _ "!=" _ v:quoted_or_bare() { Filter::TagNotEqual { tag: t, needle: v } }
        / t:tag() _ "contains" _ v:quoted_or_bare() { Filter::TagContains { tag: t, needle: v } }
        / t:tag() _ "starts_with" _ v:quoted_or_bare() { Filter::TagStartsWith { tag: t, needle: v } }
        / t:tag() _ "=~" _ v:quoted_or_bare() { Filter::TagRegex { tag: t, regex: v } }
        / t:tag() _ "==" _ v:quoted_or_bare() { Filter::TagEqual { tag: t, needle: v } }

    // ---- shared leaves ----
    rule list<T>(x: rule<T>) -> Vec<T>
        = v:(x() ** " ") {v}

    rule number<T: std::str::FromStr>() -> T
        = s:$(['0'..='9']+) {? s.parse().or(Err("number")) }
    rule signed_number<T: std::str::FromStr>() -> T
        = s:$(['+'|'-']? ['0'..='9']+) {? s.parse().or(Err("signed number")) }
    rule float() -> f32
        = s:$(['+'|'-']? ['0'..='9']+ ("." ['0'..='9']+)?) {? s.parse().or(Err("float")) }

    rule bool_flag() -> bool
        = "1" { true } / "0" { false }

    rule consume_state() -> ConsumeState
        = "1" { ConsumeState::On } / "0" { ConsumeState::Off } / "oneshot" { ConsumeState::OneShot }
    rule single_state() -> SingleState
        = "1" { SingleState::On } / "0" { SingleState::Off } / "oneshot" { SingleState::OneShot }
    rule replay_gain_mode() -> ReplayGainMode
        = "off" { ReplayGainMode::Off } / "track" { ReplayGainMode::Track }
        / "album" { ReplayGainMode::Album } / "auto" { ReplayGainMode::Auto }

    rule time_or_offset() -> TimeOrOffset
        = "+" n:float() { TimeOrOffset::Relative(n) }
        / "-" n:float() { TimeOrOffset::Relative(-n) }
        / n:float() { TimeOrOffset::Absolute(n) }

    rule position() -> Position
        = n:number() { Position(n) }

    rule queue_position() -> QueuePosition
        = "+" n:number::<i32>() { QueuePosition::Relative(n) }
        / "-" n:number::<i32>() { QueuePosition::Relative(-n) }
        / n:number() { QueuePosition::Absolute(n) }

    rule song_id() -> SongId
        = n:number() { SongId(n) }

    rule range() -> Range
        = "-1" { Range { start: 0, end: None } }
        / start:number() ":" end:number() { Range { start, end: Some(end) } }
        / start:number() ":" { Range { start, end: None } }
        / start:number() { Range { start, end: Some(start + 1) } }

    rule pos_or_range() -> PosOrRange
        = r:range() { PosOrRange::Range(r) }
        / p:position() { PosOrRange::Position(p) }

    rule tag() -> Tag = #{ try_from_str }
    rule subsystem() -> SubSystem = #{ try_from_str }

    rule uri() -> Utf8PathBuf = #{ uri_leaf }
    rule string() -> String = #{ string_leaf }
    rule quoted_or_bare() -> String = #{ string_leaf }
    rule playlist_name() -> PlaylistName = n:string() { PlaylistName(n) }
    rule channel() -> ChannelName = n:string() { ChannelName(n) }

    rule timestamp() -> jiff::Timestamp = #{ timestamp_leaf }

    rule _() = quiet!{[' '|'\t']+}
}
}

fn try_from_str<T: FromStr>(input: &str, pos: usize) -> RuleResult<T> {
    let temp = &input[pos..];
    let temp = temp.split_once(' ').map(|t| t.0).unwrap_or(temp);
    if let Ok(v) = T::from_str(temp) { Matched(temp.len() + pos, v) } else { Failed }
}

fn uri_leaf(input: &str, pos: usize) -> RuleResult<Utf8PathBuf> {
    match possibly_quoted_string(&input[pos..]) {
        Matched(consumed, s) => Matched(consumed + pos, Utf8PathBuf::from(s)),
        Failed => Failed,
    }
}

fn string_leaf(input: &str, pos: usize) -> RuleResult<String> {
    match possibly_quoted_string(&input[pos..]) {
        Matched(consumed, s) => Matched(consumed + pos, s),
        Failed => Failed,
    }
}

fn timestamp_leaf(input: &str, pos: usize) -> RuleResult<jiff::Timestamp> {
    let temp = &input[pos..];
    let temp = temp.split_once(' ').map(|t| t.0).unwrap_or(temp);
    if let Ok(secs) = temp.parse::<i64>() {
        if let Ok(ts) = jiff::Timestamp::from_second(secs) {
            return Matched(temp.len() + pos, ts);
        }
    }
    if let Ok(ts) = temp.parse::<jiff::Timestamp>() {
        return Matched(temp.len() + pos, ts);
    }
    Failed
}

// TODO: make \ escaping work correctly on windows...
fn possibly_quoted_string(input: &str) -> RuleResult<String> {
    if !input.starts_with('"') {
        return if let Some(len) = input.find(' ') {
            Matched(len, input[..len].to_owned())
        } else {
            Matched(input.len(), input.to_owned())
        };
    }
    let mut output = String::new();
    let padded = input.chars();
    for w @ (_, _) in padded.tuple_windows() {
        match w {
            ('\\', c @ ('\\' | '"')) => output.push(c),
            (_, '\\') => {}
            (_, '"') => return Matched(output.len() + 2, output),
            (_, c) => output.push(c),
        }
    }
    // unclosed string
    Failed
}

pub fn parse(s: &str) -> color_eyre::Result<Command> {
    use ariadne::{Label, Report, ReportKind, Source};

    let s = s.trim();
    let result = command::line(s);

    match result {
        Ok(c) => Ok(c),
        Err(e) => {
            let mut buf = Vec::new();
            let _ = Report::build(ReportKind::Error, e.location.column.saturating_sub(1)..e.location.column.saturating_sub(1))
                .with_message("Could not parse")
                .with_label(
                    Label::new(e.location.column.saturating_sub(1)..e.location.column.saturating_sub(1))
                        .with_message(format!("Expected one of {}", e.expected)),
                )
                .finish()
                .write(Source::from(s), &mut buf);
            tracing::debug!(diagnostic = %String::from_utf8_lossy(&buf), "command parse failure");

            Err(e).wrap_err("Could not parse line").with_note(|| format!("line was: {s}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait ExtendRuleResult<T> {
        fn unwrap(self) -> T;
    }

    impl<T> ExtendRuleResult<T> for RuleResult<T> {
        fn unwrap(self) -> T {
            match self {
                Matched(_, v) => v,
                Failed => panic!(),
            }
        }
    }

    #[test]
    fn test_parse_string() {
        let s = "Non-Album/Necry-Talkie/北上のススメ";
        assert_eq!(s, possibly_quoted_string(s).unwrap());
        let s = r#""Daft Punk/Discovery/02 Aerodynamic.mp3""#;
        assert_eq!(s[1..s.len() - 1], possibly_quoted_string(s).unwrap());
        let s = r#""asdf\"asdf""#;
        assert_eq!("asdf\"asdf", possibly_quoted_string(s).unwrap());
        let s = r#""asdf\\asdf""#;
        assert_eq!("asdf\\asdf", possibly_quoted_string(s).unwrap());
    }

    #[test]
    fn parses_bare_command() {
        assert_eq!(parse("status").unwrap(), Command::Status);
        assert_eq!(parse("next").unwrap(), Command::Next);
    }

    #[test]
    fn parses_add_with_quoted_uri() {
        let cmd = parse(r#"add "Artist/Album/01 Track.flac""#).unwrap();
        assert_eq!(cmd, Command::Add(Utf8PathBuf::from("Artist/Album/01 Track.flac"), None));
    }

    #[test]
    fn parses_playid_with_optional_arg() {
        assert_eq!(parse("playid").unwrap(), Command::PlayId(None));
        assert_eq!(parse("playid 5").unwrap(), Command::PlayId(Some(SongId(5))));
    }

    #[test]
    fn parses_range_with_open_end() {
        let cmd = parse("delete 3:").unwrap();
        match cmd {
            Command::Delete(Some(PosOrRange::Range(r))) => {
                assert_eq!(r.start, 3);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_idle_with_subsystem_list() {
        let cmd = parse("idle player mixer").unwrap();
        assert_eq!(cmd, Command::Idle(vec![SubSystem::Player, SubSystem::Mixer]));
    }

    #[test]
    fn parses_find_with_simple_filter() {
        let cmd = parse(r#"find (Artist == "Boards of Canada")"#).unwrap();
        match cmd {
            Command::Find(Query(QueryNode::Filter(Filter::TagEqual { tag: Tag::Artist, needle }))) => {
                assert_eq!(needle, "Boards of Canada");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
