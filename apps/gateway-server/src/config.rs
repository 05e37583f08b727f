//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides, on
//! top of the library's call-behavior defaults.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
/// Converts to [`gateway_core::Config`] via [`ServerConfig::to_core_config`].
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP/WebSocket server to.
    /// Override: `GATEWAY_PORT` / `--port`
    pub port: u16,

    /// Public URL this server is reachable at (for diagnostics/logging only).
    /// Override: `GATEWAY_PUBLIC_URL` / `--public-url`
    pub public_url: Option<String>,

    pub opening_script: String,
    pub cache_opening_audio: bool,
    pub vad_threshold: f32,
    pub vad_silence_ms: u64,
    pub vad_prefix_ms: u64,
    pub allow_barge_in: bool,
    pub no_barge_tail_ms: u64,
    pub ack_enabled: bool,
    pub ack_text: String,
    pub reply_chunking: bool,
    pub reply_chunk_chars: usize,
    pub tts_tail_silence_ms: u64,
    pub audio_prebuffer_ms: u64,
    pub idle_hangup_ms: u64,
    pub max_call_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = gateway_core::Config::default();
        Self {
            port: 8080,
            public_url: None,
            opening_script: core.opening_script,
            cache_opening_audio: core.cache_opening_audio,
            vad_threshold: core.vad_threshold,
            vad_silence_ms: core.vad_silence_ms,
            vad_prefix_ms: core.vad_prefix_ms,
            allow_barge_in: core.allow_barge_in,
            no_barge_tail_ms: core.no_barge_tail_ms,
            ack_enabled: core.ack_enabled,
            ack_text: core.ack_text,
            reply_chunking: core.reply_chunking,
            reply_chunk_chars: core.reply_chunk_chars,
            tts_tail_silence_ms: core.tts_tail_silence_ms,
            audio_prebuffer_ms: core.audio_prebuffer_ms,
            idle_hangup_ms: core.idle_hangup_ms,
            max_call_ms: core.max_call_ms,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration. CLI
    /// flags (applied by the caller afterwards, in `main.rs`) take final
    /// precedence over these.
    fn apply_env_overrides(&mut self) {
        env_parsed("GATEWAY_PORT", &mut self.port);
        env_string("GATEWAY_PUBLIC_URL", &mut self.public_url);
        env_string_req("GATEWAY_OPENING_SCRIPT", &mut self.opening_script);
        env_parsed("GATEWAY_VAD_THRESHOLD", &mut self.vad_threshold);
        env_parsed("GATEWAY_VAD_SILENCE_MS", &mut self.vad_silence_ms);
        env_parsed("GATEWAY_VAD_PREFIX_MS", &mut self.vad_prefix_ms);
        env_parsed("GATEWAY_ALLOW_BARGE_IN", &mut self.allow_barge_in);
        env_parsed("GATEWAY_NO_BARGE_TAIL_MS", &mut self.no_barge_tail_ms);
        env_parsed("GATEWAY_ACK_ENABLED", &mut self.ack_enabled);
        env_string_req("GATEWAY_ACK_TEXT", &mut self.ack_text);
        env_parsed("GATEWAY_REPLY_CHUNKING", &mut self.reply_chunking);
        env_parsed("GATEWAY_REPLY_CHUNK_CHARS", &mut self.reply_chunk_chars);
        env_parsed("GATEWAY_TTS_TAIL_SILENCE_MS", &mut self.tts_tail_silence_ms);
        env_parsed("GATEWAY_AUDIO_PREBUFFER_MS", &mut self.audio_prebuffer_ms);
        env_parsed("GATEWAY_IDLE_HANGUP_MS", &mut self.idle_hangup_ms);
        env_parsed("GATEWAY_MAX_CALL_MS", &mut self.max_call_ms);
        env_parsed("GATEWAY_CACHE_OPENING_AUDIO", &mut self.cache_opening_audio);
    }

    /// Converts to gateway-core's validated `Config` type.
    pub fn to_core_config(&self) -> gateway_core::Config {
        gateway_core::Config {
            opening_script: self.opening_script.clone(),
            cache_opening_audio: self.cache_opening_audio,
            vad_threshold: self.vad_threshold,
            vad_silence_ms: self.vad_silence_ms,
            vad_prefix_ms: self.vad_prefix_ms,
            allow_barge_in: self.allow_barge_in,
            no_barge_tail_ms: self.no_barge_tail_ms,
            ack_enabled: self.ack_enabled,
            ack_text: self.ack_text.clone(),
            reply_chunking: self.reply_chunking,
            reply_chunk_chars: self.reply_chunk_chars,
            tts_tail_silence_ms: self.tts_tail_silence_ms,
            audio_prebuffer_ms: self.audio_prebuffer_ms,
            idle_hangup_ms: self.idle_hangup_ms,
            max_call_ms: self.max_call_ms,
        }
    }
}

/// Endpoint/secret configuration, read only from the environment (never
/// from the YAML file, since these are deployment secrets).
pub struct EndpointConfig {
    pub asr_endpoint_url: String,
    pub asr_api_key: String,
    pub tts_endpoint_url: String,
    pub tts_api_key: String,
    pub tts_voice_id: String,
    pub tts_model_id: String,
    pub tts_language: String,
    pub tts_voice_stability: f32,
    pub tts_voice_similarity_boost: f32,
    pub tts_voice_style: f32,
    pub tts_voice_speaker_boost: bool,
    pub reply_primary_url: String,
    pub reply_primary_key: String,
    pub reply_fallback_url: String,
    pub reply_fallback_key: String,
    pub outcome_webhook_url: Option<String>,
    pub system_instructions: String,
}

impl EndpointConfig {
    /// Reads every endpoint field from the environment. Returns an error
    /// naming the first missing required variable.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            asr_endpoint_url: require_env("ASR_ENDPOINT_URL")?,
            asr_api_key: require_env("ASR_API_KEY")?,
            tts_endpoint_url: require_env("TTS_ENDPOINT_URL")?,
            tts_api_key: require_env("TTS_API_KEY")?,
            tts_voice_id: std::env::var("TTS_VOICE_ID").unwrap_or_else(|_| "default".to_string()),
            tts_model_id: std::env::var("TTS_MODEL_ID")
                .unwrap_or_else(|_| gateway_core::protocol_constants::DEFAULT_TTS_MODEL_ID.to_string()),
            tts_language: std::env::var("TTS_LANGUAGE").unwrap_or_else(|_| "en".to_string()),
            tts_voice_stability: env_or(
                "TTS_VOICE_STABILITY",
                gateway_core::protocol_constants::DEFAULT_VOICE_STABILITY,
            ),
            tts_voice_similarity_boost: env_or(
                "TTS_VOICE_SIMILARITY_BOOST",
                gateway_core::protocol_constants::DEFAULT_VOICE_SIMILARITY_BOOST,
            ),
            tts_voice_style: env_or(
                "TTS_VOICE_STYLE",
                gateway_core::protocol_constants::DEFAULT_VOICE_STYLE,
            ),
            tts_voice_speaker_boost: env_or(
                "TTS_VOICE_SPEAKER_BOOST",
                gateway_core::protocol_constants::DEFAULT_VOICE_SPEAKER_BOOST,
            ),
            reply_primary_url: require_env("LLM_PRIMARY_ENDPOINT_URL")?,
            reply_primary_key: std::env::var("LLM_PRIMARY_API_KEY").unwrap_or_default(),
            reply_fallback_url: require_env("LLM_FALLBACK_ENDPOINT_URL")?,
            reply_fallback_key: std::env::var("LLM_FALLBACK_API_KEY").unwrap_or_default(),
            outcome_webhook_url: std::env::var("OUTCOME_WEBHOOK_URL").ok(),
            system_instructions: std::env::var("GATEWAY_SYSTEM_INSTRUCTIONS")
                .unwrap_or_else(|_| "You are a helpful phone assistant.".to_string()),
        })
    }

    pub fn to_endpoints(&self) -> gateway_core::Endpoints {
        gateway_core::Endpoints {
            asr_endpoint_url: self.asr_endpoint_url.clone(),
            asr_api_key: self.asr_api_key.clone(),
            tts_endpoint_url: self.tts_endpoint_url.clone(),
            tts_api_key: self.tts_api_key.clone(),
            tts_voice_id: self.tts_voice_id.clone(),
            tts_model_id: self.tts_model_id.clone(),
            tts_language: self.tts_language.clone(),
            tts_voice_settings: gateway_core::tts::VoiceSettings {
                stability: self.tts_voice_stability,
                similarity_boost: self.tts_voice_similarity_boost,
                style: self.tts_voice_style,
                use_speaker_boost: self.tts_voice_speaker_boost,
            },
            reply_primary_url: self.reply_primary_url.clone(),
            reply_primary_key: self.reply_primary_key.clone(),
            reply_fallback_url: self.reply_fallback_url.clone(),
            reply_fallback_key: self.reply_fallback_key.clone(),
            outcome_webhook_url: self.outcome_webhook_url.clone(),
            system_instructions: self.system_instructions.clone(),
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required environment variable {key}"))
}

fn env_parsed<T: std::str::FromStr>(key: &str, field: &mut T) {
    if let Ok(val) = std::env::var(key) {
        if let Ok(parsed) = val.parse() {
            *field = parsed;
        } else {
            log::warn!("[Config] ignoring unparseable {key}={val:?}");
        }
    }
}

fn env_string(key: &str, field: &mut Option<String>) {
    if let Ok(val) = std::env::var(key) {
        *field = Some(val);
    }
}

fn env_string_req(key: &str, field: &mut String) {
    if let Ok(val) = std::env::var(key) {
        *field = val;
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_converts_to_valid_core_config() {
        let config = ServerConfig::default();
        assert!(config.to_core_config().validate().is_ok());
    }
}
