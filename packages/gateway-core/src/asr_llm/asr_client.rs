//! Outbound WebSocket client to the realtime ASR/transcription service.
//!
//! The teacher only ever accepts inbound `axum` WebSocket connections; it
//! has no outbound WS client role. This is new, grounded generally on the
//! same split-socket `futures::{SinkExt, StreamExt}` idiom `api/ws.rs` uses
//! for the inbound side, adapted to `tokio_tungstenite::connect_async` for
//! an outbound client connection carrying a bearer-token header.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{GatewayError, GatewayResult};

/// Server-side VAD parameters declared in the session configuration message.
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    pub threshold: f32,
    pub silence_ms: u64,
    pub prefix_ms: u64,
}

/// Connection parameters for the ASR service.
#[derive(Debug, Clone)]
pub struct AsrConfig {
    pub endpoint_url: String,
    pub api_key: String,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum AsrOutgoing<'a> {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfigWire<'a> },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
}

#[derive(Serialize)]
struct SessionConfigWire<'a> {
    input_audio_format: &'a str,
    instructions: &'a str,
    turn_detection: TurnDetectionWire,
}

#[derive(Serialize)]
struct TurnDetectionWire {
    #[serde(rename = "type")]
    kind: &'static str,
    threshold: f32,
    silence_duration_ms: u64,
    prefix_padding_ms: u64,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum AsrIncoming {
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted { transcript: String },
    #[serde(rename = "response.text.delta")]
    ResponseDelta { delta: String },
    #[serde(rename = "response.done")]
    ResponseDone {},
    #[serde(rename = "error")]
    Error { code: String, message: String },
    #[serde(other)]
    Unknown,
}

/// A decoded event from the ASR service, translated to abstract names
/// (spec §4.4) independent of the wire representation above.
#[derive(Debug, Clone)]
pub enum AsrEvent {
    TranscriptionCompleted(String),
    ResponseDelta(String),
    ResponseDone,
    /// `already_has_active_response` and `cancel_not_active` are folded
    /// into this with `ignorable = true`; the Turn Controller already
    /// handles the conditions that would cause them.
    Error { code: String, ignorable: bool },
}

type AsrSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// A live connection to the realtime ASR service for a single call.
pub struct AsrClient {
    socket: AsrSocket,
}

impl AsrClient {
    /// Connects to the ASR endpoint and sends the initial session
    /// configuration declaring μ-law input, server-side VAD, and the
    /// system instructions for this call.
    pub async fn connect(
        config: &AsrConfig,
        vad: VadConfig,
        system_instructions: &str,
    ) -> GatewayResult<Self> {
        let mut request = config
            .endpoint_url
            .as_str()
            .into_client_request()
            .map_err(|e| GatewayError::Internal(format!("invalid ASR endpoint url: {e}")))?;
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|e| GatewayError::Configuration(format!("invalid ASR API key: {e}")))?;
        request.headers_mut().insert("Authorization", auth_value);

        let (socket, _response) = tokio_tungstenite::connect_async(request).await?;
        let mut client = Self { socket };

        client
            .send_json(&AsrOutgoing::SessionUpdate {
                session: SessionConfigWire {
                    input_audio_format: "g711_ulaw",
                    instructions: system_instructions,
                    turn_detection: TurnDetectionWire {
                        kind: "server_vad",
                        threshold: vad.threshold,
                        silence_duration_ms: vad.silence_ms,
                        prefix_padding_ms: vad.prefix_ms,
                    },
                },
            })
            .await?;

        Ok(client)
    }

    /// Forwards a frame of inbound μ-law audio as a base64
    /// `input_audio_buffer.append` message.
    pub async fn send_audio(&mut self, mulaw: &[u8]) -> GatewayResult<()> {
        let audio = BASE64.encode(mulaw);
        self.send_json(&AsrOutgoing::InputAudioBufferAppend { audio })
            .await
    }

    /// Waits for the next event from the ASR service. Returns `None` when
    /// the socket is closed; unparseable frames are logged and skipped
    /// rather than treated as fatal.
    pub async fn next_event(&mut self) -> Option<GatewayResult<AsrEvent>> {
        loop {
            let message = match self.socket.next().await {
                Some(Ok(message)) => message,
                Some(Err(err)) => return Some(Err(err.into())),
                None => return None,
            };

            let text = match message {
                Message::Text(text) => text.to_string(),
                Message::Close(_) => {
                    return Some(Err(GatewayError::TransportClosed(
                        "ASR socket closed by remote".to_string(),
                    )))
                }
                // Ping/Pong/Binary carry no ASR-level event; keep reading.
                _ => continue,
            };

            let parsed: AsrIncoming = match serde_json::from_str(&text) {
                Ok(parsed) => parsed,
                Err(err) => {
                    log::warn!("[ASR] unparseable event, dropping: {err}");
                    continue;
                }
            };

            return Some(Ok(match parsed {
                AsrIncoming::TranscriptionCompleted { transcript } => {
                    AsrEvent::TranscriptionCompleted(transcript)
                }
                AsrIncoming::ResponseDelta { delta } => AsrEvent::ResponseDelta(delta),
                AsrIncoming::ResponseDone {} => AsrEvent::ResponseDone,
                AsrIncoming::Error { code, message } => {
                    let ignorable =
                        code == "already_has_active_response" || code == "cancel_not_active";
                    if !ignorable {
                        log::warn!("[ASR] error {code}: {message}");
                    }
                    AsrEvent::Error { code, ignorable }
                }
                AsrIncoming::Unknown => continue,
            }));
        }
    }

    async fn send_json<T: Serialize>(&mut self, value: &T) -> GatewayResult<()> {
        let text = serde_json::to_string(value)?;
        self.socket.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Sends a WebSocket close frame and flushes it. Safe to call on an
    /// already-closed or erroring socket; any failure here is not fatal to
    /// the caller's own shutdown sequence.
    pub async fn close(&mut self) -> GatewayResult<()> {
        self.socket.send(Message::Close(None)).await?;
        Ok(())
    }
}
