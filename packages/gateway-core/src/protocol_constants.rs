//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the carrier media-stream protocol and the
//! G.711 standard; changing them would break wire compatibility.

// ─────────────────────────────────────────────────────────────────────────────
// G.711 μ-law / carrier framing
// ─────────────────────────────────────────────────────────────────────────────

/// Bytes per outbound/inbound media frame (20 ms of 8 kHz μ-law).
pub const FRAME_BYTES: usize = 160;

/// Frame duration in milliseconds. Fixed by the carrier's media protocol.
pub const FRAME_DURATION_MS: u64 = 20;

/// μ-law silence byte. `0xFF` decodes to (near) zero amplitude.
pub const MULAW_SILENCE_BYTE: u8 = 0xFF;

/// Sample rate the carrier wire format is fixed at.
pub const CARRIER_SAMPLE_RATE_HZ: u32 = 8_000;

/// G.711 μ-law encode/decode bias, per ITU-T G.711.
pub const MULAW_BIAS: i32 = 0x84;

/// G.711 μ-law clip magnitude, per ITU-T G.711.
pub const MULAW_CLIP: i32 = 32_635;

/// Number of quantization segments in μ-law encoding.
pub const MULAW_SEGMENTS: i32 = 8;

// ─────────────────────────────────────────────────────────────────────────────
// Frame Pacer defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default jitter prebuffer before the pacer begins emitting frames (ms).
pub const DEFAULT_PREBUFFER_MS: u64 = 200;

/// Capacity of the pacer's internal byte queue, in frames, before the
/// oldest queued bytes are dropped to bound memory under sustained
/// upstream overrun.
pub const MAX_PACER_QUEUE_FRAMES: usize = 500;

// ─────────────────────────────────────────────────────────────────────────────
// Turn Controller defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default ASR server-side VAD activation threshold.
pub const DEFAULT_VAD_THRESHOLD: f32 = 0.75;

/// Default ASR server-side VAD trailing-silence duration (ms).
pub const DEFAULT_VAD_SILENCE_MS: u64 = 700;

/// Default ASR server-side VAD leading prefix padding (ms).
pub const DEFAULT_VAD_PREFIX_MS: u64 = 150;

/// Default guard window after bot speech before re-listening (ms).
pub const DEFAULT_NO_BARGE_TAIL_MS: u64 = 900;

/// Window within which two identical consecutive transcripts collapse to one.
pub const DEDUP_WINDOW_MS: u64 = 800;

// ─────────────────────────────────────────────────────────────────────────────
// Call Session timers
// ─────────────────────────────────────────────────────────────────────────────

/// Default idle-hangup timeout: no inbound media frame for this long ends the call.
pub const DEFAULT_IDLE_HANGUP_MS: u64 = 120_000;

/// Default hard cap on total call duration.
pub const DEFAULT_MAX_CALL_MS: u64 = 600_000;

/// Sampling interval for the idle timer.
pub const IDLE_SAMPLE_INTERVAL_MS: u64 = 1_000;

// ─────────────────────────────────────────────────────────────────────────────
// TTS Streamer defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Trailing silence appended after each TTS burst, to avoid clipping the
/// last phoneme (ms).
pub const DEFAULT_TTS_TAIL_SILENCE_MS: u64 = 180;

/// Minimum number of head bytes accumulated before deciding whether a TTS
/// response body carries a RIFF/WAVE preamble.
pub const TTS_HEAD_BUFFER_MIN_BYTES: usize = 4_096;

/// Default reply-chunking boundary (characters), used when splitting long
/// replies for progressive TTS streaming.
pub const DEFAULT_REPLY_CHUNK_CHARS: usize = 70;

/// Timeout for HTTP calls to the TTS/LLM endpoints (seconds).
pub const UPSTREAM_HTTP_TIMEOUT_SECS: u64 = 15;

/// Default `model_id` sent to the TTS endpoint when none is configured.
pub const DEFAULT_TTS_MODEL_ID: &str = "eleven_turbo_v2";

/// Default `voice_settings.stability`.
pub const DEFAULT_VOICE_STABILITY: f32 = 0.5;

/// Default `voice_settings.similarity_boost`.
pub const DEFAULT_VOICE_SIMILARITY_BOOST: f32 = 0.75;

/// Default `voice_settings.style`.
pub const DEFAULT_VOICE_STYLE: f32 = 0.0;

/// Default `voice_settings.use_speaker_boost`.
pub const DEFAULT_VOICE_SPEAKER_BOOST: bool = true;

/// Maximum output tokens requested from the reply-generation endpoint for a
/// single user utterance.
pub const REPLY_MAX_OUTPUT_TOKENS: u32 = 220;

/// Fixed reply substituted when every configured reply backend fails or
/// returns no text.
pub const FIXED_APOLOGY_TEXT: &str =
    "I'm sorry, I'm having trouble answering right now. Could you repeat that?";

// ─────────────────────────────────────────────────────────────────────────────
// Application identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name used in log lines and correlation.
pub const APP_NAME: &str = "voice-agent-gateway";
