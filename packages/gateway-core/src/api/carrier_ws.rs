//! Carrier media-stream WebSocket handler (§4.1's Protocol Adapter).
//!
//! Grounded on `api/ws.rs::ws_handler`/`handle_ws` for the overall
//! split-socket, single-task `tokio::select!` shape, and cross-checked
//! against `other_examples/dcd41259_dnacenta-voice-echo__src-twilio-media.rs.rs`
//! for the inbound/outbound carrier JSON shapes
//! (`{event,streamSid,media:{payload}}`).

use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::api::GatewayState;
use crate::finalize::FinalizeReason;
use crate::session::{CallIdentity, Session};

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum CarrierIncoming {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        start: StartMetadata,
    },
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
    Stop {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartMetadata {
    call_sid: String,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaPayload {
    payload: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum CarrierOutgoing {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutgoingMediaPayload,
    },
}

#[derive(Debug, Serialize)]
struct OutgoingMediaPayload {
    payload: String,
}

impl CarrierOutgoing {
    fn to_message(&self) -> Option<Message> {
        serde_json::to_string(self).ok().map(|s| Message::Text(s.into()))
    }
}

/// WebSocket upgrade handler for the carrier's media-stream endpoint.
pub async fn carrier_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_carrier_stream(socket, state))
}

async fn handle_carrier_stream(socket: WebSocket, state: GatewayState) {
    let (mut sender, mut receiver) = socket.split();

    // Phase 1: wait for the carrier's `start` event. Anything else before
    // it (a `connected` handshake, a premature `stop`) is logged and
    // otherwise ignored, matching the teacher's "log and continue on
    // anything unexpected" posture in `handle_ws`.
    let (stream_sid, call_sid, caller_id, callee_id) = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<CarrierIncoming>(&text) {
                Ok(CarrierIncoming::Start { stream_sid, start }) => {
                    break (
                        stream_sid,
                        start.call_sid,
                        start.from.unwrap_or_else(|| "unknown".to_string()),
                        start.to.unwrap_or_else(|| "unknown".to_string()),
                    );
                }
                Ok(_) => continue,
                Err(err) => {
                    log::warn!("[Carrier] protocol_parse_error before start: {err}");
                    continue;
                }
            },
            Some(Ok(Message::Close(_))) | None => return,
            Some(Err(err)) => {
                log::warn!("[Carrier] transport error before start: {err}");
                return;
            }
            _ => continue,
        }
    };

    let guard = state.services.registry.register(stream_sid.clone(), call_sid.clone());
    let cancel_token = guard.cancel_token().clone();
    log::info!(
        "[Session {}] call_id={call_sid} stream_id={stream_sid} from={caller_id} to={callee_id}",
        guard.correlation_id()
    );

    let (pacer_tx, mut pacer_rx) = mpsc::channel::<Bytes>(256);
    let deps = state.services.session_deps();
    let mut session = match Session::start(
        CallIdentity {
            call_id: call_sid,
            stream_id: stream_sid.clone(),
            caller_id,
            callee_id,
        },
        deps,
        pacer_tx,
        guard,
    )
    .await
    {
        Ok(session) => session,
        Err(err) => {
            log::error!("[Carrier] failed to start session for stream_id={stream_sid}: {err}");
            return;
        }
    };

    let finalize_reason = loop {
        let idle_deadline = session.idle_deadline();
        let max_deadline = session.max_call_deadline();
        let tail_deadline = session.tail_deadline();

        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => {
                break FinalizeReason::WebSocketClosed;
            }

            _ = tokio::time::sleep_until(max_deadline.into()) => {
                break FinalizeReason::MaxCallDuration;
            }

            _ = tokio::time::sleep_until(idle_deadline.into()) => {
                break FinalizeReason::IdleTimeout;
            }

            _ = sleep_until_opt(tail_deadline) => {
                if let Err(err) = session.handle_tail_deadline_elapsed().await {
                    log::warn!("[Carrier] tail-deadline reply failed: {err}");
                }
            }

            Some(frame) = pacer_rx.recv() => {
                let outgoing = CarrierOutgoing::Media {
                    stream_sid: stream_sid.clone(),
                    media: OutgoingMediaPayload { payload: BASE64.encode(&frame) },
                };
                if let Some(msg) = outgoing.to_message() {
                    if sender.send(msg).await.is_err() {
                        break FinalizeReason::WebSocketError;
                    }
                }
            }

            _ = session.next_pipeline_completion() => {}

            event = session.next_asr_event() => {
                match event {
                    Some(Ok(event)) => {
                        if let Err(err) = session.handle_asr_event(event).await {
                            log::warn!("[Carrier] error applying ASR event: {err}");
                        }
                    }
                    Some(Err(err)) if err.is_terminal() => {
                        log::warn!("[Carrier] ASR transport ended: {err}");
                        break FinalizeReason::AsrClosed;
                    }
                    Some(Err(err)) => {
                        log::warn!("[Carrier] ASR soft error: {err}");
                    }
                    None => break FinalizeReason::AsrClosed,
                }
            }

            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<CarrierIncoming>(&text) {
                            Ok(CarrierIncoming::Media { media, .. }) => {
                                match BASE64.decode(&media.payload) {
                                    Ok(mulaw) => {
                                        if let Err(err) = session.handle_inbound_media(Bytes::from(mulaw)).await {
                                            log::warn!("[Carrier] failed to forward media: {err}");
                                        }
                                    }
                                    Err(err) => log::warn!("[Carrier] bad base64 payload: {err}"),
                                }
                            }
                            Ok(CarrierIncoming::Stop { .. }) => {
                                break FinalizeReason::CarrierStop;
                            }
                            Ok(_) => {}
                            Err(err) => {
                                log::warn!("[Carrier] protocol_parse_error: {err}");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break FinalizeReason::WebSocketClosed,
                    Some(Err(err)) => {
                        log::warn!("[Carrier] transport error: {err}");
                        break FinalizeReason::WebSocketError;
                    }
                    _ => {}
                }
            }
        }
    };

    session.shutdown().await;
    if let Some(payload) = session.finalize(finalize_reason) {
        state.services.outcome_sink.deliver(payload).await;
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}
