//! Call Session (§4.6): per-call glue that owns the Pacer, ASR client, and
//! Turn Controller, runs the startup/shutdown sequences and idle/max-call
//! timers, and triggers finalization exactly once.
//!
//! Grounded on `api/ws.rs::handle_ws` (split socket, `tokio::select!` over
//! carrier-recv / timer ticks, `StreamGuard`-style RAII cleanup on exit) and
//! `api/ws_connection.rs::WsConnectionManager` for the per-session
//! `CancellationToken`. The actual carrier WebSocket plumbing (the
//! `tokio::select!` loop itself) lives in `api::carrier_ws`, which drives a
//! `Session` the way `handle_ws` drives its inline state.
//!
//! Reply generation and TTS streaming for a turn run on a spawned task
//! (`spawn_reply_pipeline`) rather than inline in a carrier select-loop arm,
//! the same "spawn the per-utterance pipeline, keep draining the socket"
//! shape `other_examples/dcd41259_dnacenta-voice-echo__src-twilio-media.rs.rs`
//! uses for its own outbound media loop. The Turn Controller itself stays
//! single-task-owned: only `apply_turn_action`/`next_pipeline_completion`,
//! both called from the carrier event loop, ever touch it; the spawned task
//! only talks to the Pacer and reports its outcome back over a channel.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::asr_llm::{AsrClient, AsrConfig, AsrEvent, FallbackReplyChain, VadConfig};
use crate::error::GatewayResult;
use crate::finalize::{
    self, CallSummary, ConversationEntry, FinalizePayload, FinalizeReason, Lead, Role,
};
use crate::pacer::Pacer;
use crate::protocol_constants::MULAW_SILENCE_BYTE;
use crate::registry::SessionGuard;
use crate::state::Config;
use crate::tts::TtsStreamer;
use crate::turn::{TurnAction, TurnController};

/// What a spawned reply pipeline reports back once it finishes speaking.
struct PipelineOutcome {
    reply_text: String,
}

/// Everything a [`Session`] needs to come up for one call.
pub struct SessionDeps {
    pub config: Arc<Config>,
    pub asr_config: AsrConfig,
    pub vad: VadConfig,
    pub system_instructions: String,
    pub tts: Arc<TtsStreamer>,
    pub reply_chain: Arc<FallbackReplyChain>,
    pub opening_audio_cache: Option<Bytes>,
}

/// Identifies one call from the carrier's `start` event.
pub struct CallIdentity {
    pub call_id: String,
    pub stream_id: String,
    pub caller_id: String,
    pub callee_id: String,
}

/// Per-call orchestrator. Owned and driven exclusively by the task running
/// `api::carrier_ws`'s event loop for this call; nothing here is shared
/// across calls or synchronized internally.
pub struct Session {
    summary: CallSummary,
    turn: TurnController,
    pacer: Arc<Pacer>,
    asr: AsrClient,
    tts: Arc<TtsStreamer>,
    reply_chain: Arc<FallbackReplyChain>,
    config: Arc<Config>,
    system_instructions: String,
    finalized: bool,
    last_media_at: Instant,
    call_started_monotonic: Instant,
    cancel_token: CancellationToken,
    pipeline_tx: mpsc::Sender<PipelineOutcome>,
    pipeline_rx: mpsc::Receiver<PipelineOutcome>,
    _guard: SessionGuard,
}

impl Session {
    /// Runs the startup sequence from spec §4.6: binds the Pacer, speaks
    /// the opening line (from cache or via TTS), enters the post-opening
    /// `NoListenTail`, and connects the ASR adapter.
    pub async fn start(
        identity: CallIdentity,
        deps: SessionDeps,
        pacer_output_tx: tokio::sync::mpsc::Sender<Bytes>,
        guard: SessionGuard,
    ) -> GatewayResult<Self> {
        let asr = AsrClient::connect(&deps.asr_config, deps.vad, &deps.system_instructions).await?;
        let cancel_token = guard.cancel_token().clone();

        let pacer = Arc::new(Pacer::new(deps.config.prebuffer_bytes(), pacer_output_tx));
        pacer.bind(identity.stream_id.clone());

        let now = Instant::now();
        let mut summary = CallSummary {
            call_id: identity.call_id,
            stream_id: identity.stream_id,
            caller_id: identity.caller_id,
            callee_id: identity.callee_id,
            started_at: SystemTime::now(),
            ended_at: SystemTime::now(),
            transcript: Vec::new(),
            lead: Lead::default(),
            recording_url: None,
        };
        summary.transcript.push(ConversationEntry {
            role: Role::Bot,
            text: deps.config.opening_script.clone(),
        });

        if let Some(cached) = &deps.opening_audio_cache {
            pacer.enqueue(cached.clone());
        } else {
            deps.tts.speak(&deps.config.opening_script, &pacer).await;
        }

        let mut turn = TurnController::new(
            deps.config.allow_barge_in,
            deps.config.no_barge_tail_ms,
            deps.config.ack_enabled,
        );
        turn.start_call(now);

        let (pipeline_tx, pipeline_rx) = mpsc::channel(4);

        Ok(Self {
            summary,
            turn,
            pacer,
            asr,
            tts: deps.tts,
            reply_chain: deps.reply_chain,
            config: deps.config,
            system_instructions: deps.system_instructions,
            finalized: false,
            last_media_at: now,
            call_started_monotonic: now,
            cancel_token,
            pipeline_tx,
            pipeline_rx,
            _guard: guard,
        })
    }

    /// Handles one inbound 160-byte μ-law frame from the carrier. Forwards
    /// it to the ASR adapter if the Turn Controller currently allows
    /// listening, and detects a barge-in if the caller starts talking while
    /// the bot is mid-utterance.
    pub async fn handle_inbound_media(&mut self, mulaw: Bytes) -> GatewayResult<()> {
        self.last_media_at = Instant::now();

        if !self.turn.should_forward_audio() {
            return Ok(());
        }

        if !is_silence(&mulaw) {
            if self.turn.on_user_audio_detected() == TurnAction::BargeIn {
                self.pacer.cancel();
            }
        }

        self.asr.send_audio(&mulaw).await
    }

    /// Waits for the next ASR event. `None` means the ASR socket closed.
    pub async fn next_asr_event(&mut self) -> Option<GatewayResult<AsrEvent>> {
        self.asr.next_event().await
    }

    /// Routes a decoded ASR event through the Turn Controller and, if it
    /// results in a reply being owed, generates and speaks it.
    pub async fn handle_asr_event(&mut self, event: AsrEvent) -> GatewayResult<()> {
        match event {
            AsrEvent::TranscriptionCompleted(text) => {
                self.summary.transcript.push(ConversationEntry {
                    role: Role::User,
                    text: text.clone(),
                });
                let action = self.turn.on_transcript(text, Instant::now());
                self.apply_turn_action(action);
            }
            // This gateway always generates replies itself via the
            // fallback chain (spec §4.4's "Reply generation" path); these
            // two are recognized per the adapter's event vocabulary but
            // have no effect here since this design never relies on the
            // ASR service's own response generation.
            AsrEvent::ResponseDelta(_) | AsrEvent::ResponseDone => {}
            AsrEvent::Error { .. } => {}
        }
        Ok(())
    }

    /// Applies a Turn Controller action. `IssueReply` flips into
    /// `BotSpeaking` immediately (so the select loop's barge-in check sees
    /// the right state the moment audio starts) and hands the actual
    /// network work off to a spawned task, so neither the reply fetch nor
    /// the TTS stream blocks this call's event loop.
    fn apply_turn_action(&mut self, action: TurnAction) {
        let TurnAction::IssueReply { utterance, ack } = action else {
            return;
        };
        self.turn.on_reply_ready();
        self.spawn_reply_pipeline(utterance, ack);
    }

    fn spawn_reply_pipeline(&self, utterance: String, ack: bool) {
        let tts = Arc::clone(&self.tts);
        let reply_chain = Arc::clone(&self.reply_chain);
        let pacer = Arc::clone(&self.pacer);
        let system_instructions = self.system_instructions.clone();
        let ack_text = self.config.ack_text.clone();
        let cancel_token = self.cancel_token.clone();
        let outcome_tx = self.pipeline_tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel_token.cancelled() => {}
                _ = run_reply_pipeline(ack, ack_text, utterance, tts, reply_chain, system_instructions, pacer, outcome_tx) => {}
            }
        });
    }

    /// Waits for the next spawned reply pipeline to finish speaking, folds
    /// its reply text into the transcript, and advances the Turn Controller
    /// out of `BotSpeaking`. Returns `false` only if every sender has been
    /// dropped, which does not happen in practice since `Session` always
    /// holds one.
    pub async fn next_pipeline_completion(&mut self) -> bool {
        match self.pipeline_rx.recv().await {
            Some(outcome) => {
                self.summary.transcript.push(ConversationEntry {
                    role: Role::Bot,
                    text: outcome.reply_text,
                });
                self.turn.on_tts_finished(Instant::now());
                true
            }
            None => false,
        }
    }

    /// The deadline the event loop should sleep until while in
    /// `NoListenTail`, if any.
    pub fn tail_deadline(&self) -> Option<Instant> {
        self.turn.tail_deadline()
    }

    /// Called when `tail_deadline()` elapses: dequeues the next pending
    /// utterance (if any) and issues its reply, or returns to `Idle`.
    pub async fn handle_tail_deadline_elapsed(&mut self) -> GatewayResult<()> {
        let action = self.turn.on_tail_deadline_elapsed();
        self.apply_turn_action(action);
        Ok(())
    }

    /// Deadline for the idle-hangup timer (spec §4.6).
    pub fn idle_deadline(&self) -> Instant {
        self.last_media_at + Duration::from_millis(self.config.idle_hangup_ms)
    }

    /// Deadline for the hard max-call-duration timer (spec §4.6).
    pub fn max_call_deadline(&self) -> Instant {
        self.call_started_monotonic + Duration::from_millis(self.config.max_call_ms)
    }

    /// Runs the shutdown sequence (spec §4.6): cancel the Pacer and close
    /// the ASR WebSocket. Each step is independent so a failure in one does
    /// not block the next. The carrier WebSocket itself is closed by the
    /// caller, which owns the split socket halves.
    pub async fn shutdown(&mut self) {
        self.pacer.cancel();
        if let Err(err) = self.asr.close().await {
            log::debug!(
                "[Session {}] ASR close failed (already closed?): {err}",
                self.summary.call_id
            );
        }
    }

    /// Classifies and assembles the finalize payload exactly once. Returns
    /// `None` on any call after the first, so callers can finalize from
    /// multiple trigger points (stop, close, error, timers) without
    /// double-delivering.
    pub fn finalize(&mut self, reason: FinalizeReason) -> Option<FinalizePayload> {
        if self.finalized {
            return None;
        }
        self.finalized = true;
        self.summary.ended_at = SystemTime::now();
        Some(finalize::build_payload(&self.summary, reason))
    }

    pub fn call_id(&self) -> &str {
        &self.summary.call_id
    }
}

fn is_silence(frame: &[u8]) -> bool {
    frame.iter().all(|&b| b == MULAW_SILENCE_BYTE)
}

/// One turn's worth of network work: speak the ack (if any), fetch the
/// reply, then speak it. Runs entirely off the carrier event loop's task;
/// the only shared state it touches is the Pacer, whose methods are
/// internally synchronized and safe to call concurrently with the Session
/// that owns it.
async fn run_reply_pipeline(
    ack: bool,
    ack_text: String,
    utterance: String,
    tts: Arc<TtsStreamer>,
    reply_chain: Arc<FallbackReplyChain>,
    system_instructions: String,
    pacer: Arc<Pacer>,
    outcome_tx: mpsc::Sender<PipelineOutcome>,
) {
    if ack {
        tts.speak(&ack_text, &pacer).await;
    }

    let reply = reply_chain.reply(&system_instructions, &utterance).await;
    tts.speak(&reply, &pacer).await;

    let _ = outcome_tx.send(PipelineOutcome { reply_text: reply }).await;
}
