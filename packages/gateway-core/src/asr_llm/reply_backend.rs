//! Reply generation and its fallback chain.
//!
//! Spec §9's "two near-duplicate provider backends with fallback chain"
//! design note is modeled as a `Vec<Box<dyn ReplyBackend>>` tried in
//! declaration order, grounded on `sonos/retry.rs::with_retry`'s
//! try/classify/retry-or-give-up shape — adapted here from
//! retry-the-same-operation to try-the-next-backend-on-failure, since a
//! failed or empty reply from the primary (localized) endpoint should fall
//! through to the general endpoint rather than be retried in place.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayResult;
use crate::protocol_constants::{FIXED_APOLOGY_TEXT, REPLY_MAX_OUTPUT_TOKENS, UPSTREAM_HTTP_TIMEOUT_SECS};

/// A single reply-generation provider.
#[async_trait]
pub trait ReplyBackend: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Requests a reply to `user_utterance` given `system_instructions`.
    /// Returns `Ok(text)` (possibly empty, meaning "no answer") on a
    /// successful call, or `Err` on any transport/decode failure.
    async fn generate_reply(
        &self,
        system_instructions: &str,
        user_utterance: &str,
    ) -> GatewayResult<String>;
}

#[derive(Serialize)]
struct ReplyRequestBody<'a> {
    instructions: &'a str,
    text: &'a str,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct ReplyResponseBody {
    #[serde(default)]
    text: String,
}

/// A reply backend that POSTs to a single HTTP text-generation endpoint.
/// The primary (localized) and fallback (general) endpoints named in spec
/// §4.4 are both instances of this same struct, differing only in
/// `endpoint_url` — they are genuinely near-duplicate providers, not
/// distinct implementations.
pub struct HttpReplyBackend {
    client: reqwest::Client,
    endpoint_url: String,
    api_key: String,
    name: String,
}

impl HttpReplyBackend {
    pub fn new(
        client: reqwest::Client,
        endpoint_url: impl Into<String>,
        api_key: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint_url: endpoint_url.into(),
            api_key: api_key.into(),
            name: name.into(),
        }
    }
}

#[async_trait]
impl ReplyBackend for HttpReplyBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_reply(
        &self,
        system_instructions: &str,
        user_utterance: &str,
    ) -> GatewayResult<String> {
        let response = self
            .client
            .post(&self.endpoint_url)
            .bearer_auth(&self.api_key)
            .json(&ReplyRequestBody {
                instructions: system_instructions,
                text: user_utterance,
                max_output_tokens: REPLY_MAX_OUTPUT_TOKENS,
            })
            .timeout(std::time::Duration::from_secs(UPSTREAM_HTTP_TIMEOUT_SECS))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(crate::error::GatewayError::LlmUpstreamFailed(format!(
                "{} returned HTTP {}",
                self.name,
                response.status()
            )));
        }

        let body: ReplyResponseBody = response.json().await?;
        Ok(body.text)
    }
}

/// Tries each configured backend in order, falling through on failure or an
/// empty reply, and substituting a fixed apology if every backend fails.
pub struct FallbackReplyChain {
    backends: Vec<Box<dyn ReplyBackend>>,
}

impl FallbackReplyChain {
    pub fn new(backends: Vec<Box<dyn ReplyBackend>>) -> Self {
        Self { backends }
    }

    /// Returns the first non-empty reply from the chain, or the fixed
    /// apology text if every backend fails or returns no text.
    pub async fn reply(&self, system_instructions: &str, user_utterance: &str) -> String {
        for backend in &self.backends {
            match backend.generate_reply(system_instructions, user_utterance).await {
                Ok(text) if !text.trim().is_empty() => return text,
                Ok(_) => {
                    log::info!("[Reply] {} returned no text, trying next backend", backend.name());
                }
                Err(err) => {
                    log::warn!("[Reply] {} failed: {err}", backend.name());
                }
            }
        }
        FIXED_APOLOGY_TEXT.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    enum StubOutcome {
        Text(String),
        Fail,
    }

    struct StubBackend {
        name: String,
        calls: Arc<AtomicUsize>,
        outcome: StubOutcome,
    }

    #[async_trait]
    impl ReplyBackend for StubBackend {
        fn name(&self) -> &str {
            &self.name
        }

        async fn generate_reply(&self, _: &str, _: &str) -> GatewayResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.outcome {
                StubOutcome::Text(text) => Ok(text.clone()),
                StubOutcome::Fail => {
                    Err(crate::error::GatewayError::LlmUpstreamFailed("stub".into()))
                }
            }
        }
    }

    #[tokio::test]
    async fn returns_primary_reply_when_non_empty() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = FallbackReplyChain::new(vec![Box::new(StubBackend {
            name: "primary".into(),
            calls: Arc::clone(&calls),
            outcome: StubOutcome::Text("hello".to_string()),
        })]);

        assert_eq!(chain.reply("instructions", "hi").await, "hello");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn falls_through_to_next_backend_on_empty_reply() {
        let primary_calls = Arc::new(AtomicUsize::new(0));
        let fallback_calls = Arc::new(AtomicUsize::new(0));
        let chain = FallbackReplyChain::new(vec![
            Box::new(StubBackend {
                name: "primary".into(),
                calls: Arc::clone(&primary_calls),
                outcome: StubOutcome::Text(String::new()),
            }),
            Box::new(StubBackend {
                name: "fallback".into(),
                calls: Arc::clone(&fallback_calls),
                outcome: StubOutcome::Text("fallback reply".to_string()),
            }),
        ]);

        assert_eq!(chain.reply("instructions", "hi").await, "fallback reply");
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn falls_through_to_next_backend_on_error() {
        let chain = FallbackReplyChain::new(vec![
            Box::new(StubBackend {
                name: "primary".into(),
                calls: Arc::new(AtomicUsize::new(0)),
                outcome: StubOutcome::Fail,
            }),
            Box::new(StubBackend {
                name: "fallback".into(),
                calls: Arc::new(AtomicUsize::new(0)),
                outcome: StubOutcome::Text("recovered".to_string()),
            }),
        ]);

        assert_eq!(chain.reply("instructions", "hi").await, "recovered");
    }

    #[tokio::test]
    async fn apology_returned_when_every_backend_fails() {
        let chain = FallbackReplyChain::new(vec![Box::new(StubBackend {
            name: "only".into(),
            calls: Arc::new(AtomicUsize::new(0)),
            outcome: StubOutcome::Fail,
        })]);

        assert_eq!(chain.reply("instructions", "hi").await, FIXED_APOLOGY_TEXT);
    }
}
