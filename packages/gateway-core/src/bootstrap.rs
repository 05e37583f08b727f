//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. This pattern provides:
//!
//! - **Clarity**: All dependency relationships are visible in one place
//! - **Testability**: Easy to swap implementations for testing
//! - **Maintainability**: Service creation logic is isolated from usage

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::asr_llm::{AsrConfig, FallbackReplyChain, HttpReplyBackend, VadConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::finalize::{HttpOutcomeSink, LoggingOutcomeSink, OutcomeSink};
use crate::protocol_constants::UPSTREAM_HTTP_TIMEOUT_SECS;
use crate::registry::SessionRegistry;
use crate::session::SessionDeps;
use crate::state::Config;
use crate::tts::{TtsConfig, TtsStreamer, VoiceSettings};

/// Connection details for the external services the gateway depends on.
/// Kept separate from [`Config`] since these are deployment secrets/URLs,
/// not call-behavior tunables.
pub struct Endpoints {
    pub asr_endpoint_url: String,
    pub asr_api_key: String,
    pub tts_endpoint_url: String,
    pub tts_api_key: String,
    pub tts_voice_id: String,
    pub tts_model_id: String,
    pub tts_language: String,
    pub tts_voice_settings: VoiceSettings,
    pub reply_primary_url: String,
    pub reply_primary_key: String,
    pub reply_fallback_url: String,
    pub reply_fallback_key: String,
    pub outcome_webhook_url: Option<String>,
    pub system_instructions: String,
}

/// Container for all bootstrapped services.
pub struct GatewayServices {
    /// Process-wide validated configuration.
    pub config: Arc<Config>,
    /// Tracks every live call session.
    pub registry: Arc<SessionRegistry>,
    /// Delivers finalize payloads (webhook or log-only).
    pub outcome_sink: Arc<dyn OutcomeSink>,
    asr_config: AsrConfig,
    vad: VadConfig,
    system_instructions: String,
    tts: Arc<TtsStreamer>,
    reply_chain: Arc<FallbackReplyChain>,
    opening_audio_cache: RwLock<Option<Bytes>>,
    /// Cancellation token for graceful process-wide shutdown.
    pub cancel_token: CancellationToken,
}

impl GatewayServices {
    /// Builds a fresh [`SessionDeps`] for one incoming call. Cloning here is
    /// cheap: every field is either `Arc`-shared or a small value type.
    pub fn session_deps(&self) -> SessionDeps {
        SessionDeps {
            config: Arc::clone(&self.config),
            asr_config: self.asr_config.clone(),
            vad: self.vad,
            system_instructions: self.system_instructions.clone(),
            tts: Arc::clone(&self.tts),
            reply_chain: Arc::clone(&self.reply_chain),
            opening_audio_cache: self.opening_audio_cache.read().clone(),
        }
    }

    /// Pre-synthesizes and caches the opening line's audio, if
    /// `config.cache_opening_audio` is set. Best-effort: a failure here just
    /// means the first call synthesizes it live instead.
    pub async fn warm_opening_audio(&self) {
        if !self.config.cache_opening_audio {
            return;
        }
        match self.tts.synthesize_to_bytes(&self.config.opening_script).await {
            Some(bytes) => {
                log::info!("[Bootstrap] cached {} byte(s) of opening audio", bytes.len());
                *self.opening_audio_cache.write() = Some(bytes);
            }
            None => {
                log::warn!("[Bootstrap] opening-audio pre-warm failed, will synthesize per-call");
            }
        }
    }

    /// Initiates graceful shutdown: cancels the process-wide token and
    /// force-closes every active call's session token.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] beginning graceful shutdown");
        self.cancel_token.cancel();
        let closed = self.registry.close_all();
        log::info!("[Bootstrap] force-closed {closed} active call(s)");
    }
}

fn create_http_client() -> GatewayResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(UPSTREAM_HTTP_TIMEOUT_SECS))
        .build()
        .map_err(|e| GatewayError::Internal(format!("failed to build HTTP client: {e}")))
}

/// Bootstraps all application services with their dependencies.
///
/// This is the composition root where all services are instantiated and
/// wired together:
///
/// 1. Validate configuration (fails fast on a misconfigured deployment).
/// 2. Shared HTTP client (connection pooling across TTS/reply/webhook calls).
/// 3. TTS Streamer and the ASR/LLM fallback reply chain.
/// 4. Outcome sink (webhook if configured, log-only otherwise).
/// 5. Session registry and process-wide cancellation token.
pub fn bootstrap_services(config: Config, endpoints: Endpoints) -> GatewayResult<GatewayServices> {
    config.validate().map_err(GatewayError::Configuration)?;
    let config = Arc::new(config);

    let http_client = create_http_client()?;

    let tts = Arc::new(TtsStreamer::new(
        http_client.clone(),
        TtsConfig {
            endpoint_url: endpoints.tts_endpoint_url,
            api_key: endpoints.tts_api_key,
            voice_id: endpoints.tts_voice_id,
            model_id: endpoints.tts_model_id,
            language: endpoints.tts_language,
            voice_settings: endpoints.tts_voice_settings,
            reply_chunking: config.reply_chunking,
            reply_chunk_chars: config.reply_chunk_chars,
            tail_silence_ms: config.tts_tail_silence_ms,
        },
    ));

    let reply_chain = Arc::new(FallbackReplyChain::new(vec![
        Box::new(HttpReplyBackend::new(
            http_client.clone(),
            endpoints.reply_primary_url,
            endpoints.reply_primary_key,
            "primary",
        )),
        Box::new(HttpReplyBackend::new(
            http_client.clone(),
            endpoints.reply_fallback_url,
            endpoints.reply_fallback_key,
            "fallback",
        )),
    ]));

    let outcome_sink: Arc<dyn OutcomeSink> = match endpoints.outcome_webhook_url {
        Some(url) => Arc::new(HttpOutcomeSink::new(http_client.clone(), url)),
        None => Arc::new(LoggingOutcomeSink),
    };

    Ok(GatewayServices {
        asr_config: AsrConfig {
            endpoint_url: endpoints.asr_endpoint_url,
            api_key: endpoints.asr_api_key,
        },
        vad: VadConfig {
            threshold: config.vad_threshold,
            silence_ms: config.vad_silence_ms,
            prefix_ms: config.vad_prefix_ms,
        },
        system_instructions: endpoints.system_instructions,
        tts,
        reply_chain,
        opening_audio_cache: RwLock::new(None),
        config,
        registry: Arc::new(SessionRegistry::new()),
        outcome_sink,
        cancel_token: CancellationToken::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> Endpoints {
        Endpoints {
            asr_endpoint_url: "wss://asr.example.com".to_string(),
            asr_api_key: "k".to_string(),
            tts_endpoint_url: "https://tts.example.com".to_string(),
            tts_api_key: "k".to_string(),
            tts_voice_id: "v".to_string(),
            tts_model_id: "eleven_turbo_v2".to_string(),
            tts_language: "en".to_string(),
            tts_voice_settings: VoiceSettings::default(),
            reply_primary_url: "https://reply-a.example.com".to_string(),
            reply_primary_key: "k".to_string(),
            reply_fallback_url: "https://reply-b.example.com".to_string(),
            reply_fallback_key: "k".to_string(),
            outcome_webhook_url: None,
            system_instructions: "Be helpful.".to_string(),
        }
    }

    #[test]
    fn bootstrap_succeeds_with_default_config() {
        let services = bootstrap_services(Config::default(), endpoints());
        assert!(services.is_ok());
    }

    #[test]
    fn bootstrap_rejects_invalid_config() {
        let mut config = Config::default();
        config.max_call_ms = 0;
        let result = bootstrap_services(config, endpoints());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn session_deps_starts_with_no_opening_audio_cache() {
        let services = bootstrap_services(Config::default(), endpoints()).unwrap();
        assert!(services.session_deps().opening_audio_cache.is_none());
    }
}
