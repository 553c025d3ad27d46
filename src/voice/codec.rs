//! PCM codec: float samples <-> base64-wrapped 16-bit little-endian PCM

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use super::frame::PlaybackSegment;
use crate::{Error, Result};

/// MIME descriptor for outbound capture audio
pub const CAPTURE_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Scale between normalized floats and 16-bit integers
const PCM_SCALE: f32 = 32768.0;

/// A transport-ready audio payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedChunk {
    /// Base64 text of little-endian i16 samples
    pub data: String,
    /// Sample format/rate descriptor
    pub mime_type: String,
}

/// Encode float samples as base64 16-bit PCM
///
/// Samples are scaled by 32768 and rounded without clamping, so values at
/// or beyond +1.0 wrap around the i16 range.
#[must_use]
pub fn encode(samples: &[f32]) -> EncodedChunk {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        #[allow(clippy::cast_possible_truncation)]
        let value = (sample * PCM_SCALE).round() as i32 as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    EncodedChunk {
        data: STANDARD.encode(bytes),
        mime_type: CAPTURE_MIME_TYPE.to_string(),
    }
}

/// Decode base64 text into raw bytes
///
/// # Errors
///
/// Returns `MalformedAudio` if the text is not valid base64
pub fn decode(data: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(data)
        .map_err(|e| Error::MalformedAudio(format!("invalid base64: {e}")))
}

/// Reinterpret interleaved i16 little-endian bytes as a playback segment
///
/// # Errors
///
/// Returns `MalformedAudio` if `channels` is zero or the byte length is not
/// a multiple of `2 * channels`
pub fn bytes_to_segment(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<PlaybackSegment> {
    if channels == 0 {
        return Err(Error::MalformedAudio("channel count must be non-zero".to_string()));
    }

    let channels = usize::from(channels);
    let frame_bytes = 2 * channels;
    if bytes.len() % frame_bytes != 0 {
        return Err(Error::MalformedAudio(format!(
            "{} bytes is not a multiple of {frame_bytes}",
            bytes.len()
        )));
    }

    let frame_count = bytes.len() / frame_bytes;
    let mut planar = vec![Vec::with_capacity(frame_count); channels];

    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let value = i16::from_le_bytes([pair[0], pair[1]]);
        planar[i % channels].push(f32::from(value) / PCM_SCALE);
    }

    Ok(PlaybackSegment {
        sample_rate,
        channels: planar,
    })
}

/// Decode a base64 payload straight into a playback segment
///
/// # Errors
///
/// Returns `MalformedAudio` if either the base64 or the sample layout is invalid
pub fn decode_segment(data: &str, sample_rate: u32, channels: u16) -> Result<PlaybackSegment> {
    let bytes = decode(data)?;
    bytes_to_segment(&bytes, sample_rate, channels)
}
