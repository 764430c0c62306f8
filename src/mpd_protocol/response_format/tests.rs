use std::time::Duration;

use crate::mpd_protocol::{PlaybackState, SongInfo, Status, response_format};
use crate::song::{AudioFormat, SampleFormat};

#[test]
fn serialize_status() {
    pretty_assertions::assert_eq!(
        response_format::to_string(&Status {
            volume: 50,
            repeat: false,
            random: true,
            single: false,
            consume: true,
            partition: "default".to_string(),
            playlist: 22,
            playlistlength: 0,
            state: PlaybackState::Stop,
            xfade: Duration::from_secs(5),
            song: Some(5),
            songid: Some(5),
            elapsed: Some(Duration::from_secs(2)),
            bitrate: Some(320_000),
            duration: Some(Duration::from_secs(320)),
            audio: Some(AudioFormat::new(44100, SampleFormat::S24P32, 2).unwrap()),
            error: Some(
                "Failed to open \\\"usb dac\\\" (alsa); Failed to open ALSA device \\\"hw:CARD=UD110v2,DEV=1\\\": No such device".to_string()
            ),
            nextsong: Some(1),
            nextsongid: Some(1),
        })
        .unwrap(),
        "volume: 50
repeat: 0
random: 1
single: 0
consume: 1
partition: default
playlist: 22
playlistlength: 0
state: stop
xfade: 5
song: 5
songid: 5
elapsed: 2.000
bitrate: 320000
duration: 320.000
audio: 44100:24:2
error: Failed to open \\\"usb dac\\\" (alsa); Failed to open ALSA device \\\"hw:CARD=UD110v2,DEV=1\\\": No such device
nextsong: 1
nextsongid: 1
"
    );
}

#[test]
fn serialize_song_info_list() {
    let songs = vec![
        SongInfo {
            uri: "Lukas Graham/7 Years.mp3".into(),
            last_modified: "2025-06-15T22:08:17Z".parse().ok(),
            format: AudioFormat::new(44100, SampleFormat::S16, 2),
            artist: Some("Lukas Graham".to_string()),
            album_artist: Some("Various Artists".to_string()),
            title: Some("7 Years".to_string()),
            album: Some("do you ever think about dying".to_string()),
            track: Some("15".to_string()),
            date: Some("2023".to_string()),
            genre: None,
            disc: None,
            duration: Some(Duration::from_secs_f64(237.3)),
            pos: Some(0),
            id: Some(294),
        },
        SongInfo {
            uri: "Taylor Swift/1989/01 Welcome To New York.mp3".into(),
            last_modified: "2025-06-15T22:06:26Z".parse().ok(),
            format: AudioFormat::new(44100, SampleFormat::S16, 2),
            artist: Some("Taylor Swift".to_string()),
            album_artist: Some("Taylor Swift".to_string()),
            title: Some("Welcome To New York".to_string()),
            album: Some("1989 (Deluxe)".to_string()),
            track: Some("19".to_string()),
            date: Some("2014".to_string()),
            genre: Some("Country & Folk".to_string()),
            disc: Some("1".to_string()),
            duration: Some(Duration::from_secs_f64(212.6)),
            pos: Some(1),
            id: Some(295),
        },
    ];

    pretty_assertions::assert_eq!(
        response_format::to_string(&songs).unwrap(),
        "file: Lukas Graham/7 Years.mp3
Last-Modified: 2025-06-15T22:08:17Z
Format: 44100:16:2
Artist: Lukas Graham
AlbumArtist: Various Artists
Title: 7 Years
Album: do you ever think about dying
Track: 15
Date: 2023
duration: 237.300
pos: 0
id: 294
file: Taylor Swift/1989/01 Welcome To New York.mp3
Last-Modified: 2025-06-15T22:06:26Z
Format: 44100:16:2
Artist: Taylor Swift
AlbumArtist: Taylor Swift
Title: Welcome To New York
Album: 1989 (Deluxe)
Track: 19
Date: 2014
Genre: Country & Folk
Disc: 1
duration: 212.600
pos: 1
id: 295
"
    );
}

#[test]
fn audio_format_renders_float_and_dsd_bit_depths() {
    let f32_format = AudioFormat::new(96000, SampleFormat::F32, 2).unwrap();
    assert_eq!(response_format::to_string(&vec![f32_format_str(&f32_format)]).unwrap(), "96000:f:2\n");

    let dsd_format = AudioFormat::new(2822400, SampleFormat::Dsd, 2);
    assert!(dsd_format.is_none(), "DSD rates exceed the 192kHz cap modeled here");
}

fn f32_format_str(format: &AudioFormat) -> String {
    response_format::to_string(&SingleFormat(*format)).unwrap()
}

struct SingleFormat(AudioFormat);

impl serde::Serialize for SingleFormat {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        response_format::audio_format(&self.0, serializer)
    }
}
