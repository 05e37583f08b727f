//! ASR/LLM Adapter (§4.4): the realtime transcription WebSocket client and
//! the reply-generation fallback chain.

mod asr_client;
mod reply_backend;

pub use asr_client::{AsrClient, AsrConfig, AsrEvent, VadConfig};
pub use reply_backend::{FallbackReplyChain, HttpReplyBackend, ReplyBackend};
