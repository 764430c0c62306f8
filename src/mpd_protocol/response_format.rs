pub mod error;
/// Responses sent from server to client, can only serialize. A completely
/// different encoding from commands sent client to server.
mod ser;

use std::time::Duration;

pub use ser::to_string;

use crate::song::{AudioFormat, SampleFormat};

#[cfg(test)]
mod tests;

pub fn duration_seconds<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_secs())
}

/// MPD represents "accurate" durations as a number with three places after
/// the decimal; the serializer formats all floats that way (see `ser`).
pub fn duration_millis_precise<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

pub fn option_duration_millis_precise<S>(
    duration: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match duration {
        Some(duration) => duration_millis_precise(duration, serializer),
        None => serializer.serialize_none(),
    }
}

pub fn option_audio_format<S>(format: &Option<AudioFormat>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match format {
        Some(format) => audio_format(format, serializer),
        None => serializer.serialize_none(),
    }
}

/// `samplerate:bits:channels`, where `bits` is `f` for float formats and `d`
/// for DSD (mirroring the real protocol's "audio" field).
pub fn audio_format<S>(format: &AudioFormat, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let bits = match format.sample_format {
        SampleFormat::S8 => "8".to_string(),
        SampleFormat::S16 => "16".to_string(),
        SampleFormat::S24P32 => "24".to_string(),
        SampleFormat::S32 => "32".to_string(),
        SampleFormat::F32 => "f".to_string(),
        SampleFormat::Dsd => "dsd".to_string(),
    };
    serializer.serialize_str(&format!("{}:{}:{}", format.sample_rate, bits, format.channels))
}

pub fn unix_time<S>(ts: &jiff::Timestamp, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_i64(ts.as_second())
}
