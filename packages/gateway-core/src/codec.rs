//! Codec Bridge: μ-law 8 kHz ↔ linear PCM sample conversion and simple rate
//! conversion, plus the byte-level helpers the rest of the gateway needs to
//! prepare and inspect raw audio buffers.
//!
//! Every function here is pure: output size is a deterministic function of
//! input size, there is no allocation proportional to anything but the
//! output, and there are no failure modes — malformed input (e.g. a
//! non-WAV buffer passed to [`strip_wav_if_present`]) is returned unchanged
//! rather than rejected.

use std::collections::HashMap;
use std::sync::OnceLock;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::protocol_constants::{FRAME_BYTES, MULAW_BIAS, MULAW_CLIP, MULAW_SEGMENTS, MULAW_SILENCE_BYTE};

/// Decodes a buffer of G.711 μ-law samples (8 kHz) into 16-bit linear PCM.
///
/// Standard ITU-T G.711 μ-law decode: complement the byte, split into sign,
/// exponent and mantissa, and reconstruct the linear sample.
pub fn mulaw_to_linear16_8k(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().map(|&b| mulaw_byte_to_linear(b)).collect()
}

#[inline]
fn mulaw_byte_to_linear(encoded: u8) -> i16 {
    let encoded = !encoded;
    let sign = encoded & 0x80;
    let exponent = ((encoded >> 4) & 0x07) as i32;
    let mantissa = (encoded & 0x0F) as i32;

    let mut sample = ((mantissa << 3) + MULAW_BIAS) << exponent;
    sample -= MULAW_BIAS;

    let sample = if sign != 0 { -sample } else { sample };
    sample.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Encodes 16-bit linear PCM samples (8 kHz) into G.711 μ-law bytes.
///
/// Standard ITU-T G.711 μ-law encode with `CLIP = 32635`, `BIAS = 0x84`.
pub fn linear16_to_mulaw_8k(samples: &[i16]) -> Bytes {
    let mut out = Vec::with_capacity(samples.len());
    for &sample in samples {
        out.push(linear_to_mulaw_byte(sample));
    }
    Bytes::from(out)
}

#[inline]
fn linear_to_mulaw_byte(sample: i16) -> u8 {
    let sign: u8 = if sample < 0 { 0x80 } else { 0x00 };
    let magnitude = if sample < 0 {
        // Avoid overflow on i16::MIN negation.
        -(sample as i32)
    } else {
        sample as i32
    };
    let magnitude = magnitude.min(MULAW_CLIP) + MULAW_BIAS;

    let exponent = (0..MULAW_SEGMENTS)
        .rev()
        .find(|&e| (magnitude >> (e + 7)) != 0)
        .unwrap_or(0);
    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;

    let encoded = sign | ((exponent as u8) << 4) | mantissa as u8;
    !encoded
}

/// Linearly interpolates between adjacent samples to double the sample rate
/// (8 kHz → 16 kHz). Output length is exactly `2 * input.len()`.
pub fn upsample_2x(samples: &[i16]) -> Vec<i16> {
    if samples.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(samples.len() * 2);
    for window in samples.windows(2) {
        out.push(window[0]);
        out.push(midpoint(window[0], window[1]));
    }
    // Last input sample has no successor to interpolate towards; repeat it.
    out.push(*samples.last().unwrap());
    out.push(*samples.last().unwrap());
    out
}

#[inline]
fn midpoint(a: i16, b: i16) -> i16 {
    (((a as i32) + (b as i32)) / 2) as i16
}

/// Averages consecutive blocks of 3 samples to reduce the sample rate by a
/// factor of 3 (24 kHz → 8 kHz). Output length is `floor(input.len() / 3)`.
pub fn downsample_3x(samples: &[i16]) -> Vec<i16> {
    samples
        .chunks_exact(3)
        .map(|chunk| {
            let sum: i32 = chunk.iter().map(|&s| s as i32).sum();
            (sum / 3) as i16
        })
        .collect()
}

static SILENCE_CACHE: OnceLock<RwLock<HashMap<usize, Bytes>>> = OnceLock::new();

/// Returns `ceil(ms / 20) * 160` bytes of μ-law silence (`0xFF`).
///
/// Cached by byte length behind a double-checked read/write lock, since a
/// call may request the same tail-silence length many times over its
/// lifetime (e.g. every TTS burst).
pub fn silence_mulaw(ms: u64) -> Bytes {
    let frame_count = ms.div_ceil(super::protocol_constants::FRAME_DURATION_MS);
    let len = frame_count as usize * FRAME_BYTES;
    get_or_create_silence(len)
}

fn get_or_create_silence(len: usize) -> Bytes {
    let cache = SILENCE_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    if let Some(existing) = cache.read().get(&len) {
        return existing.clone();
    }

    let mut write = cache.write();
    write
        .entry(len)
        .or_insert_with(|| Bytes::from(vec![MULAW_SILENCE_BYTE; len]))
        .clone()
}

/// If `bytes` begins with a `RIFF....WAVE` header, walks its chunks and
/// returns the contents of the first `data` chunk. Otherwise returns `bytes`
/// unchanged. Never fails: any inconsistency in the chunk layout (missing
/// `data` chunk, truncated header) falls through to returning the input as
/// given.
pub fn strip_wav_if_present(bytes: &Bytes) -> Bytes {
    const HEADER_MIN: usize = 12;
    if bytes.len() < HEADER_MIN || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return bytes.clone();
    }

    let mut cursor = HEADER_MIN;
    while cursor + 8 <= bytes.len() {
        let tag = &bytes[cursor..cursor + 4];
        let size = u32::from_le_bytes([
            bytes[cursor + 4],
            bytes[cursor + 5],
            bytes[cursor + 6],
            bytes[cursor + 7],
        ]) as usize;
        let chunk_start = cursor + 8;

        if tag == b"data" {
            let chunk_end = (chunk_start + size).min(bytes.len());
            return bytes.slice(chunk_start..chunk_end);
        }

        // Chunks are word-aligned: a chunk with an odd size is followed by
        // one padding byte.
        let advance = size + (size & 1);
        cursor = chunk_start + advance;
    }

    bytes.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mulaw_round_trip_stays_within_quantization_error() {
        // G.711 μ-law has coarser quantization at larger magnitudes; allow a
        // generous but bounded error band rather than exact equality.
        for sample in [-32768i32, -10000, -1000, -1, 0, 1, 1000, 10000, 32767] {
            let encoded = linear_to_mulaw_byte(sample as i16);
            let decoded = mulaw_byte_to_linear(encoded) as i32;
            let err = (sample - decoded).abs();
            assert!(
                err <= 1024,
                "sample {sample} round-tripped to {decoded}, error {err} too large"
            );
        }
    }

    #[test]
    fn mulaw_silence_byte_round_trips_near_zero() {
        let decoded = mulaw_byte_to_linear(MULAW_SILENCE_BYTE);
        assert!(decoded.abs() < 16, "decoded silence was {decoded}");
    }

    #[test]
    fn upsample_doubles_length() {
        let input = vec![0i16, 100, 200, 300];
        let out = upsample_2x(&input);
        assert_eq!(out.len(), input.len() * 2);
    }

    #[test]
    fn downsample_divides_length_by_three() {
        let input = vec![0i16; 9];
        let out = downsample_3x(&input);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn downsample_averages_blocks() {
        let input = vec![0i16, 3, 6, 9, 9, 9];
        let out = downsample_3x(&input);
        assert_eq!(out, vec![3, 9]);
    }

    #[test]
    fn silence_mulaw_length_and_content() {
        let buf = silence_mulaw(60);
        assert_eq!(buf.len(), 3 * FRAME_BYTES);
        assert!(buf.iter().all(|&b| b == MULAW_SILENCE_BYTE));
    }

    #[test]
    fn silence_mulaw_rounds_up_partial_frames() {
        let buf = silence_mulaw(21);
        assert_eq!(buf.len(), 2 * FRAME_BYTES);
    }

    #[test]
    fn strip_wav_passes_through_non_wav_bytes() {
        let data = Bytes::from_static(b"not a wav file at all");
        assert_eq!(strip_wav_if_present(&data), data);
    }

    #[test]
    fn strip_wav_extracts_data_chunk() {
        let payload = vec![0xFFu8; 320];
        let mut wav = Vec::new();
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(36u32 + payload.len() as u32).to_le_bytes());
        wav.extend_from_slice(b"WAVE");
        wav.extend_from_slice(b"fmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&[0u8; 16]);
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        wav.extend_from_slice(&payload);

        let bytes = Bytes::from(wav);
        let stripped = strip_wav_if_present(&bytes);
        assert_eq!(stripped.as_ref(), payload.as_slice());
    }
}
