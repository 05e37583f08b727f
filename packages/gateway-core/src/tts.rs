//! TTS Streamer: turns reply text into μ-law audio and feeds a call's Pacer.
//!
//! Grounded on `sonos/soap.rs::send_soap_request` for the shared
//! `reqwest::Client` + bounded timeout + request/response logging shape, and
//! on `stream/wav.rs`'s RIFF chunk convention (consumed here via
//! [`crate::codec::strip_wav_if_present`]) for recognizing a WAV-wrapped
//! response body.

use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serde::Serialize;

use crate::codec::{silence_mulaw, strip_wav_if_present};
use crate::pacer::Pacer;
use crate::protocol_constants::{
    DEFAULT_REPLY_CHUNK_CHARS, DEFAULT_TTS_MODEL_ID, DEFAULT_TTS_TAIL_SILENCE_MS,
    DEFAULT_VOICE_SIMILARITY_BOOST, DEFAULT_VOICE_SPEAKER_BOOST, DEFAULT_VOICE_STABILITY,
    DEFAULT_VOICE_STYLE, TTS_HEAD_BUFFER_MIN_BYTES, UPSTREAM_HTTP_TIMEOUT_SECS,
};

/// The tunable knobs of the `voice_settings` object in the TTS request body
/// (spec §6).
#[derive(Debug, Clone)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: DEFAULT_VOICE_STABILITY,
            similarity_boost: DEFAULT_VOICE_SIMILARITY_BOOST,
            style: DEFAULT_VOICE_STYLE,
            use_speaker_boost: DEFAULT_VOICE_SPEAKER_BOOST,
        }
    }
}

/// Configuration for outbound TTS requests.
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Base URL up to (not including) `/text-to-speech/{voice_id}`.
    pub endpoint_url: String,
    pub api_key: String,
    pub voice_id: String,
    pub model_id: String,
    pub language: String,
    pub voice_settings: VoiceSettings,
    pub reply_chunking: bool,
    pub reply_chunk_chars: usize,
    pub tail_silence_ms: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            api_key: String::new(),
            voice_id: String::new(),
            model_id: DEFAULT_TTS_MODEL_ID.to_string(),
            language: String::new(),
            voice_settings: VoiceSettings::default(),
            reply_chunking: false,
            reply_chunk_chars: DEFAULT_REPLY_CHUNK_CHARS,
            tail_silence_ms: DEFAULT_TTS_TAIL_SILENCE_MS,
        }
    }
}

#[derive(Serialize)]
struct TtsVoiceSettingsBody {
    stability: f32,
    similarity_boost: f32,
    style: f32,
    use_speaker_boost: bool,
}

#[derive(Serialize)]
struct TtsRequestBody<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: TtsVoiceSettingsBody,
}

/// Synthesizes reply text to μ-law audio and enqueues it on a call's Pacer.
pub struct TtsStreamer {
    client: reqwest::Client,
    config: TtsConfig,
}

impl TtsStreamer {
    pub fn new(client: reqwest::Client, config: TtsConfig) -> Self {
        Self { client, config }
    }

    /// Speaks `text`, splitting it into whitespace-bounded chunks first if
    /// `reply_chunking` is enabled. Chunks are streamed sequentially, never
    /// concurrently, since the Pacer's FramedQueue has no notion of
    /// interleaved bursts.
    pub async fn speak(&self, text: &str, pacer: &Pacer) -> bool {
        if !self.config.reply_chunking {
            return self.speak_one(text, pacer).await;
        }

        let mut all_ok = true;
        for chunk in split_on_whitespace(text, self.config.reply_chunk_chars) {
            if !self.speak_one(&chunk, pacer).await {
                all_ok = false;
            }
        }
        all_ok
    }

    /// POSTs a single text chunk and streams the resulting audio onto the
    /// Pacer. Returns `false` (and enqueues nothing) on any upstream
    /// failure; the caller treats that as "no audio for this turn".
    async fn speak_one(&self, text: &str, pacer: &Pacer) -> bool {
        let start = Instant::now();

        let response = match self
            .client
            .post(self.synthesis_url())
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(text))
            .timeout(Duration::from_secs(UPSTREAM_HTTP_TIMEOUT_SECS))
            .send()
            .await
        {
            Ok(res) => res,
            Err(err) => {
                log::warn!("[TTS] request failed: {err}");
                return false;
            }
        };

        if !response.status().is_success() {
            log::warn!("[TTS] upstream returned HTTP {}", response.status());
            return false;
        }

        let (chunk_count, bytes_enqueued) = match self.stream_to_pacer(response, pacer).await {
            Ok(stats) => stats,
            Err(err) => {
                log::warn!("[TTS] failed mid-stream: {err}");
                return false;
            }
        };

        pacer.enqueue(silence_mulaw(self.config.tail_silence_ms));

        log::info!(
            "[TTS] burst complete: {chunk_count} chunk(s), {bytes_enqueued} bytes enqueued in {:?}",
            start.elapsed()
        );
        true
    }

    /// Synthesizes `text` to a single in-memory μ-law buffer rather than
    /// streaming it onto a Pacer. Used at boot to pre-warm the opening
    /// line's audio once, ahead of any call (spec §6's
    /// `cache_opening_audio`); never called per-frame, so the simpler
    /// buffer-the-whole-body path is fine here.
    pub async fn synthesize_to_bytes(&self, text: &str) -> Option<Bytes> {
        let response = match self
            .client
            .post(self.synthesis_url())
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(text))
            .timeout(Duration::from_secs(UPSTREAM_HTTP_TIMEOUT_SECS))
            .send()
            .await
        {
            Ok(res) => res,
            Err(err) => {
                log::warn!("[TTS] opening-audio pre-warm request failed: {err}");
                return None;
            }
        };

        if !response.status().is_success() {
            log::warn!(
                "[TTS] opening-audio pre-warm returned HTTP {}",
                response.status()
            );
            return None;
        }

        match response.bytes().await {
            Ok(body) => Some(strip_wav_if_present(&body)),
            Err(err) => {
                log::warn!("[TTS] opening-audio pre-warm failed mid-body: {err}");
                None
            }
        }
    }

    /// `POST {endpoint_url}/text-to-speech/{voice_id}?output_format=ulaw_8000&language=...`
    /// (spec §6).
    fn synthesis_url(&self) -> String {
        format!(
            "{}/text-to-speech/{}?output_format=ulaw_8000&language={}",
            self.config.endpoint_url, self.config.voice_id, self.config.language
        )
    }

    fn request_body<'a>(&self, text: &'a str) -> TtsRequestBody<'a> {
        TtsRequestBody {
            text,
            model_id: &self.config.model_id,
            voice_settings: TtsVoiceSettingsBody {
                stability: self.config.voice_settings.stability,
                similarity_boost: self.config.voice_settings.similarity_boost,
                style: self.config.voice_settings.style,
                use_speaker_boost: self.config.voice_settings.use_speaker_boost,
            },
        }
    }

    async fn stream_to_pacer(
        &self,
        response: reqwest::Response,
        pacer: &Pacer,
    ) -> reqwest::Result<(usize, usize)> {
        let mut stream = response.bytes_stream();
        let mut head = BytesMut::new();
        let mut head_stripped = false;
        let mut chunk_count = 0usize;
        let mut bytes_enqueued = 0usize;

        while let Some(next) = stream.next().await {
            let chunk = next?;
            chunk_count += 1;

            if head_stripped {
                bytes_enqueued += chunk.len();
                pacer.enqueue(chunk);
                continue;
            }

            head.extend_from_slice(&chunk);
            if head.len() >= TTS_HEAD_BUFFER_MIN_BYTES {
                let stripped = strip_wav_if_present(&head.clone().freeze());
                bytes_enqueued += stripped.len();
                pacer.enqueue(stripped);
                head_stripped = true;
            }
        }

        if !head_stripped && !head.is_empty() {
            let stripped = strip_wav_if_present(&head.freeze());
            bytes_enqueued += stripped.len();
            pacer.enqueue(stripped);
        }

        Ok((chunk_count, bytes_enqueued))
    }
}

/// Splits `text` into chunks of at most `max_chars`, breaking only on
/// whitespace — a chunk never ends mid-word.
fn split_on_whitespace(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let candidate_len = if current.is_empty() {
            word.len()
        } else {
            current.len() + 1 + word.len()
        };

        if candidate_len > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }

        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_whitespace_without_breaking_words() {
        let text = "the quick brown fox jumps over the lazy dog";
        let chunks = split_on_whitespace(text, 12);
        for chunk in &chunks {
            assert!(chunk.len() <= 12 || !chunk.contains(' '));
            assert!(!chunk.starts_with(' ') && !chunk.ends_with(' '));
        }
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn single_short_chunk_stays_whole() {
        let chunks = split_on_whitespace("hello there", 70);
        assert_eq!(chunks, vec!["hello there".to_string()]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(split_on_whitespace("", 70).is_empty());
        assert!(split_on_whitespace("   ", 70).is_empty());
    }

    #[test]
    fn oversized_single_word_is_not_split_mid_word() {
        let long_word = "a".repeat(100);
        let chunks = split_on_whitespace(&long_word, 70);
        assert_eq!(chunks, vec![long_word]);
    }

    fn test_streamer() -> TtsStreamer {
        TtsStreamer::new(
            reqwest::Client::new(),
            TtsConfig {
                endpoint_url: "https://tts.example.com/v1".to_string(),
                voice_id: "voice-abc".to_string(),
                language: "en".to_string(),
                ..TtsConfig::default()
            },
        )
    }

    #[test]
    fn synthesis_url_puts_voice_id_in_the_path() {
        let streamer = test_streamer();
        assert_eq!(
            streamer.synthesis_url(),
            "https://tts.example.com/v1/text-to-speech/voice-abc?output_format=ulaw_8000&language=en"
        );
    }

    #[test]
    fn request_body_carries_model_id_and_voice_settings() {
        let streamer = test_streamer();
        let body = streamer.request_body("hello");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["text"], "hello");
        assert_eq!(json["model_id"], DEFAULT_TTS_MODEL_ID);
        assert!(json.get("voice_settings").unwrap().get("stability").is_some());
        assert!(json.get("voice").is_none());
    }
}
