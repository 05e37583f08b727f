//! Gateway-wide configuration.
//!
//! Provides [`Config`], the validated settings shared by every call session.
//! Individual per-call parameters (VAD thresholds, timers, barge-in policy)
//! live here rather than per-session because they come from one process-wide
//! deployment configuration; nothing in the core library is per-tenant.

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    DEFAULT_IDLE_HANGUP_MS, DEFAULT_MAX_CALL_MS, DEFAULT_NO_BARGE_TAIL_MS, DEFAULT_PREBUFFER_MS,
    DEFAULT_REPLY_CHUNK_CHARS, DEFAULT_TTS_TAIL_SILENCE_MS, DEFAULT_VAD_PREFIX_MS,
    DEFAULT_VAD_SILENCE_MS, DEFAULT_VAD_THRESHOLD,
};

/// Gateway-wide configuration, validated once at startup.
///
/// All fields have sensible defaults; [`Config::new`] and
/// [`Config::validate`] reject out-of-range values so a misconfigured
/// deployment fails fast at boot rather than misbehaving mid-call.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Exact opening phrase spoken on connect.
    pub opening_script: String,

    /// Pre-synthesize and cache the opening phrase's audio at boot.
    pub cache_opening_audio: bool,

    /// ASR server-side VAD activation threshold, in `[0.0, 1.0]`.
    pub vad_threshold: f32,

    /// ASR server-side VAD trailing-silence duration (ms).
    pub vad_silence_ms: u64,

    /// ASR server-side VAD leading prefix padding (ms).
    pub vad_prefix_ms: u64,

    /// If true, inbound caller audio interrupts bot speech.
    pub allow_barge_in: bool,

    /// Guard window after bot speech before re-listening (ms).
    pub no_barge_tail_ms: u64,

    /// Play a short filler phrase while a reply is being generated.
    pub ack_enabled: bool,

    /// The filler phrase played when `ack_enabled` is true.
    pub ack_text: String,

    /// Split long replies into chunks for progressive TTS streaming.
    pub reply_chunking: bool,

    /// Chunk boundary (characters) used when `reply_chunking` is true.
    pub reply_chunk_chars: usize,

    /// Trailing silence appended to each TTS burst (ms).
    pub tts_tail_silence_ms: u64,

    /// Frame Pacer jitter prebuffer threshold (ms).
    pub audio_prebuffer_ms: u64,

    /// Idle-hangup timeout: finalize if no inbound media for this long (ms).
    pub idle_hangup_ms: u64,

    /// Hard cap on total call duration (ms).
    pub max_call_ms: u64,
}

impl Config {
    /// Creates a new `Config`, rejecting out-of-range values.
    ///
    /// # Errors
    ///
    /// Returns a human-readable message naming the first invalid field.
    pub fn new(fields: Config) -> Result<Self, String> {
        fields.validate()?;
        Ok(fields)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.vad_threshold) {
            return Err("vad_threshold must be in [0.0, 1.0]".to_string());
        }
        if self.no_barge_tail_ms == 0 {
            return Err("no_barge_tail_ms must be >= 1".to_string());
        }
        if self.reply_chunk_chars == 0 {
            return Err("reply_chunk_chars must be >= 1".to_string());
        }
        if self.audio_prebuffer_ms == 0 {
            return Err("audio_prebuffer_ms must be >= 1".to_string());
        }
        if self.idle_hangup_ms == 0 {
            return Err("idle_hangup_ms must be >= 1".to_string());
        }
        if self.max_call_ms == 0 {
            return Err("max_call_ms must be >= 1".to_string());
        }
        if self.ack_enabled && self.ack_text.trim().is_empty() {
            return Err("ack_text must be non-empty when ack_enabled is true".to_string());
        }
        Ok(())
    }

    /// Returns the Frame Pacer's prebuffer threshold in bytes, derived from
    /// `audio_prebuffer_ms` at the fixed 160-bytes-per-20ms frame rate.
    pub fn prebuffer_bytes(&self) -> usize {
        let frames = self
            .audio_prebuffer_ms
            .div_ceil(crate::protocol_constants::FRAME_DURATION_MS);
        frames as usize * crate::protocol_constants::FRAME_BYTES
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            opening_script: String::new(),
            cache_opening_audio: true,
            vad_threshold: DEFAULT_VAD_THRESHOLD,
            vad_silence_ms: DEFAULT_VAD_SILENCE_MS,
            vad_prefix_ms: DEFAULT_VAD_PREFIX_MS,
            allow_barge_in: false,
            no_barge_tail_ms: DEFAULT_NO_BARGE_TAIL_MS,
            ack_enabled: false,
            ack_text: "one moment".to_string(),
            reply_chunking: false,
            reply_chunk_chars: DEFAULT_REPLY_CHUNK_CHARS,
            tts_tail_silence_ms: DEFAULT_TTS_TAIL_SILENCE_MS,
            audio_prebuffer_ms: DEFAULT_PREBUFFER_MS,
            idle_hangup_ms: DEFAULT_IDLE_HANGUP_MS,
            max_call_ms: DEFAULT_MAX_CALL_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_vad_threshold() {
        let mut config = Config::default();
        config.vad_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_ack_enabled_with_empty_text() {
        let mut config = Config::default();
        config.ack_enabled = true;
        config.ack_text = "   ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn prebuffer_bytes_matches_spec_default() {
        // 200ms default prebuffer -> 10 frames * 160 bytes = 1600 bytes.
        let config = Config::default();
        assert_eq!(config.prebuffer_bytes(), 1600);
    }
}
