//! Turn Controller: the listening/thinking/speaking state machine (§4.5).
//!
//! No single teacher file grounds this directly — the teacher has no
//! turn-taking concept. It is grounded on the general "funnel all events
//! through a single per-session task, mutate state without locks"
//! discipline the teacher applies throughout `api/ws.rs::handle_ws`'s
//! single-task `tokio::select!` loop: this is a plain synchronous struct
//! with `&mut self` transition methods, driven exclusively from inside the
//! Call Session's event loop, with no internal synchronization of its own.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// The five turn-taking states (spec §3's `TurnState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    UserSpeaking,
    Thinking,
    BotSpeaking,
    NoListenTail,
}

/// What the Call Session should do in response to a Turn Controller
/// transition. The controller never touches the Pacer, ASR client, or TTS
/// Streamer directly — it only reports what happened and lets the Session
/// (which owns those components) act on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnAction {
    /// A reply should be generated and spoken for `utterance`. `ack` is
    /// true only immediately after an `Idle -> Thinking` hop with
    /// acknowledgements enabled (spec §4.5: "the first hop on
    /// IDLE→THINKING").
    IssueReply { utterance: String, ack: bool },
    /// The transcript was appended to `PendingUtterances`; no reply should
    /// be issued yet.
    Queued,
    /// The transcript was a duplicate within the dedup window, or otherwise
    /// not actionable.
    Ignored,
    /// Inbound user audio was detected during `BOT_SPEAKING` with barge-in
    /// enabled: the Session must cancel the Pacer now.
    BargeIn,
    /// Nothing for the Session to do.
    None,
}

/// Listening/speaking state machine for a single call.
pub struct TurnController {
    state: TurnState,
    barge_in_allowed: bool,
    no_barge_tail_ms: u64,
    ack_enabled: bool,
    dedup_window: Duration,
    pending: VecDeque<String>,
    last_transcript: Option<(String, Instant)>,
    tail_deadline: Option<Instant>,
}

impl TurnController {
    pub fn new(barge_in_allowed: bool, no_barge_tail_ms: u64, ack_enabled: bool) -> Self {
        Self {
            state: TurnState::Idle,
            barge_in_allowed,
            no_barge_tail_ms,
            ack_enabled,
            dedup_window: Duration::from_millis(crate::protocol_constants::DEDUP_WINDOW_MS),
            pending: VecDeque::new(),
            last_transcript: None,
            tail_deadline: None,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Whether inbound caller audio should currently be forwarded to the
    /// ASR adapter. When barge-in is disabled, audio is dropped in every
    /// state but `Idle`/`UserSpeaking` (spec §4.5).  When barge-in is
    /// enabled, audio keeps flowing through `BotSpeaking` so the ASR's own
    /// VAD can detect the interruption.
    pub fn should_forward_audio(&self) -> bool {
        match self.state {
            TurnState::Idle | TurnState::UserSpeaking => true,
            TurnState::Thinking | TurnState::BotSpeaking | TurnState::NoListenTail => {
                self.barge_in_allowed
            }
        }
    }

    /// Called whenever the Session observes inbound user audio (VAD-level,
    /// not a completed transcript). Only `BotSpeaking` with barge-in
    /// enabled reacts; every other state is a no-op here.
    pub fn on_user_audio_detected(&mut self) -> TurnAction {
        if self.barge_in_allowed && self.state == TurnState::BotSpeaking {
            self.state = TurnState::UserSpeaking;
            self.tail_deadline = None;
            return TurnAction::BargeIn;
        }
        TurnAction::None
    }

    /// Called when the ASR adapter reports a completed user transcript.
    ///
    /// `UserSpeaking` is treated as listening-equivalent to `Idle` here:
    /// it is only ever entered via a barge-in, and the point of barge-in is
    /// for the interrupting utterance to be answered, not queued.
    pub fn on_transcript(&mut self, text: String, now: Instant) -> TurnAction {
        if self.is_duplicate(&text, now) {
            self.last_transcript = Some((text, now));
            return TurnAction::Ignored;
        }
        self.last_transcript = Some((text.clone(), now));

        match self.state {
            TurnState::Idle | TurnState::UserSpeaking => {
                let ack = self.ack_enabled && self.state == TurnState::Idle;
                self.state = TurnState::Thinking;
                TurnAction::IssueReply { utterance: text, ack }
            }
            TurnState::Thinking | TurnState::BotSpeaking | TurnState::NoListenTail => {
                self.pending.push_back(text);
                TurnAction::Queued
            }
        }
    }

    fn is_duplicate(&self, text: &str, now: Instant) -> bool {
        match &self.last_transcript {
            Some((prev, at)) => prev == text && now.saturating_duration_since(*at) < self.dedup_window,
            None => false,
        }
    }

    /// Enters `NoListenTail` directly at call startup, once the opening
    /// line has been enqueued (spec §4.6 startup step 4). This bypasses
    /// the normal `BotSpeaking -> NoListenTail` precondition since the
    /// opening line is the call's first bot utterance, spoken before any
    /// turn has formally begun.
    pub fn start_call(&mut self, now: Instant) {
        self.state = TurnState::NoListenTail;
        self.tail_deadline = Some(now + Duration::from_millis(self.no_barge_tail_ms));
    }

    /// `Thinking -> BotSpeaking`, once reply text is ready and TTS playback
    /// is about to start.
    pub fn on_reply_ready(&mut self) {
        debug_assert_eq!(self.state, TurnState::Thinking);
        self.state = TurnState::BotSpeaking;
    }

    /// `BotSpeaking -> NoListenTail`, arming the guard-window deadline.
    pub fn on_tts_finished(&mut self, now: Instant) {
        self.state = TurnState::NoListenTail;
        self.tail_deadline = Some(now + Duration::from_millis(self.no_barge_tail_ms));
    }

    /// The deadline the Session should sleep until while in `NoListenTail`.
    pub fn tail_deadline(&self) -> Option<Instant> {
        self.tail_deadline
    }

    /// `NoListenTail -> Thinking` (dequeuing the next pending utterance) or
    /// `NoListenTail -> Idle` if nothing is pending.
    pub fn on_tail_deadline_elapsed(&mut self) -> TurnAction {
        debug_assert_eq!(self.state, TurnState::NoListenTail);
        self.tail_deadline = None;

        match self.pending.pop_front() {
            Some(utterance) => {
                self.state = TurnState::Thinking;
                TurnAction::IssueReply { utterance, ack: false }
            }
            None => {
                self.state = TurnState::Idle;
                TurnAction::None
            }
        }
    }

    /// Number of utterances currently queued (diagnostics only).
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> TurnController {
        TurnController::new(false, 900, false)
    }

    #[test]
    fn idle_transcript_issues_reply_and_moves_to_thinking() {
        let mut turn = controller();
        let now = Instant::now();
        let action = turn.on_transcript("hello".to_string(), now);
        assert_eq!(
            action,
            TurnAction::IssueReply {
                utterance: "hello".to_string(),
                ack: false
            }
        );
        assert_eq!(turn.state(), TurnState::Thinking);
    }

    #[test]
    fn ack_only_fires_on_idle_to_thinking_hop() {
        let mut turn = TurnController::new(false, 900, true);
        let now = Instant::now();
        let action = turn.on_transcript("hello".to_string(), now);
        assert_eq!(
            action,
            TurnAction::IssueReply {
                utterance: "hello".to_string(),
                ack: true
            }
        );
    }

    #[test]
    fn transcript_while_thinking_is_queued_not_issued() {
        let mut turn = controller();
        let now = Instant::now();
        turn.on_transcript("first".to_string(), now);
        let action = turn.on_transcript("second".to_string(), now + Duration::from_millis(10));
        assert_eq!(action, TurnAction::Queued);
        assert_eq!(turn.pending_len(), 1);
    }

    #[test]
    fn duplicate_transcript_within_dedup_window_is_ignored() {
        let mut turn = controller();
        let now = Instant::now();
        turn.on_transcript("hello".to_string(), now);
        turn.on_reply_ready();
        turn.on_tts_finished(now);
        // still in NoListenTail; same text arrives again quickly
        let action = turn.on_transcript("hello".to_string(), now + Duration::from_millis(100));
        assert_eq!(action, TurnAction::Ignored);
    }

    #[test]
    fn duplicate_transcript_outside_dedup_window_is_not_ignored() {
        let mut turn = controller();
        let now = Instant::now();
        turn.on_transcript("hello".to_string(), now);
        turn.on_reply_ready();
        turn.on_tts_finished(now);
        let action = turn.on_transcript("hello".to_string(), now + Duration::from_millis(900));
        assert_eq!(action, TurnAction::Queued);
    }

    #[test]
    fn tail_deadline_elapsed_with_empty_queue_returns_to_idle() {
        let mut turn = controller();
        let now = Instant::now();
        turn.on_transcript("hi".to_string(), now);
        turn.on_reply_ready();
        turn.on_tts_finished(now);
        let action = turn.on_tail_deadline_elapsed();
        assert_eq!(action, TurnAction::None);
        assert_eq!(turn.state(), TurnState::Idle);
    }

    #[test]
    fn tail_deadline_elapsed_with_pending_dequeues_next_utterance() {
        let mut turn = controller();
        let now = Instant::now();
        turn.on_transcript("first".to_string(), now);
        turn.on_transcript("second".to_string(), now + Duration::from_millis(10));
        turn.on_reply_ready();
        turn.on_tts_finished(now);
        let action = turn.on_tail_deadline_elapsed();
        assert_eq!(
            action,
            TurnAction::IssueReply {
                utterance: "second".to_string(),
                ack: false
            }
        );
        assert_eq!(turn.state(), TurnState::Thinking);
    }

    #[test]
    fn audio_dropped_while_bot_speaking_without_barge_in() {
        let mut turn = controller();
        let now = Instant::now();
        turn.on_transcript("hi".to_string(), now);
        turn.on_reply_ready();
        assert!(!turn.should_forward_audio());
    }

    #[test]
    fn barge_in_cancels_and_moves_to_user_speaking() {
        let mut turn = TurnController::new(true, 900, false);
        let now = Instant::now();
        turn.on_transcript("hi".to_string(), now);
        turn.on_reply_ready();
        assert!(turn.should_forward_audio());
        let action = turn.on_user_audio_detected();
        assert_eq!(action, TurnAction::BargeIn);
        assert_eq!(turn.state(), TurnState::UserSpeaking);
    }

    #[test]
    fn start_call_enters_no_listen_tail_with_deadline() {
        let mut turn = controller();
        let now = Instant::now();
        turn.start_call(now);
        assert_eq!(turn.state(), TurnState::NoListenTail);
        assert_eq!(turn.tail_deadline(), Some(now + Duration::from_millis(900)));
    }

    #[test]
    fn no_barge_in_audio_detection_is_noop_outside_bot_speaking() {
        let mut turn = TurnController::new(true, 900, false);
        assert_eq!(turn.on_user_audio_detected(), TurnAction::None);
        assert_eq!(turn.state(), TurnState::Idle);
    }
}
