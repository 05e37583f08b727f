//! Centralized error types for the voice-agent gateway core library.
//!
//! This module defines a single structured error type using `thiserror` and
//! maps each variant to the error kinds named in the gateway's error-handling
//! design: most are handled locally (logged and swallowed) by the component
//! that produced them; only [`GatewayError::TransportClosed`],
//! [`GatewayError::TransportError`] and timer expirations are allowed to
//! escape a component boundary and reach the Call Session, which always
//! responds by finalizing the call exactly once.

use thiserror::Error;

/// Trait for error types that provide a machine-readable error code, used
/// for log correlation and for the finalization payload's failure reason
/// when applicable.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;
}

/// Unified error type for the gateway core library.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The carrier or ASR WebSocket was closed by the remote side. Terminal
    /// for the session.
    #[error("transport closed: {0}")]
    TransportClosed(String),

    /// A WebSocket transport failed (read/write/protocol error below the
    /// JSON layer). Terminal for the session.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The TTS HTTP call returned a non-2xx status or the body could not be
    /// read to completion. Non-fatal: the turn proceeds without audio.
    #[error("TTS upstream failed: {0}")]
    TtsUpstreamFailed(String),

    /// The LLM/reply HTTP call failed on every configured backend.
    /// Non-fatal: a fixed apology is substituted.
    #[error("LLM upstream failed: {0}")]
    LlmUpstreamFailed(String),

    /// An ASR error event arrived with a known-ignorable code.
    #[error("ASR soft error: {0}")]
    AsrSoftError(String),

    /// No inbound media frame arrived within the idle timeout.
    #[error("idle timeout")]
    IdleTimeout,

    /// The call exceeded its maximum allowed duration.
    #[error("max call duration exceeded")]
    MaxCallDuration,

    /// A WebSocket text frame did not parse as valid JSON/protocol shape.
    /// Non-fatal: the frame is dropped and a counter incremented.
    #[error("protocol parse error: {0}")]
    ProtocolParseError(String),

    /// Configuration failed validation at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Catch-all for unexpected internal failures.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorCode for GatewayError {
    fn code(&self) -> &'static str {
        match self {
            Self::TransportClosed(_) => "transport_closed",
            Self::TransportError(_) => "transport_error",
            Self::TtsUpstreamFailed(_) => "tts_upstream_failed",
            Self::LlmUpstreamFailed(_) => "llm_upstream_failed",
            Self::AsrSoftError(_) => "asr_soft_error",
            Self::IdleTimeout => "idle_timeout",
            Self::MaxCallDuration => "max_call_duration",
            Self::ProtocolParseError(_) => "protocol_parse_error",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl GatewayError {
    /// True for kinds that the Call Session must treat as terminal, i.e.
    /// that cause an orderly shutdown and exactly-once finalization.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::TransportClosed(_)
                | Self::TransportError(_)
                | Self::IdleTimeout
                | Self::MaxCallDuration
        )
    }
}

/// Convenient Result alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                Self::TransportClosed(err.to_string())
            }
            other => Self::TransportError(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::TtsUpstreamFailed(err.to_string())
        } else {
            Self::Internal(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::ProtocolParseError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_timeout_is_terminal_with_correct_code() {
        let err = GatewayError::IdleTimeout;
        assert_eq!(err.code(), "idle_timeout");
        assert!(err.is_terminal());
    }

    #[test]
    fn asr_soft_error_is_not_terminal() {
        let err = GatewayError::AsrSoftError("cancel_not_active".into());
        assert_eq!(err.code(), "asr_soft_error");
        assert!(!err.is_terminal());
    }

    #[test]
    fn tts_upstream_failed_is_not_terminal() {
        let err = GatewayError::TtsUpstreamFailed("HTTP 500".into());
        assert_eq!(err.code(), "tts_upstream_failed");
        assert!(!err.is_terminal());
    }
}
