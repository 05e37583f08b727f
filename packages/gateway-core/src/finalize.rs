//! Finalization Gate (§4.7): post-call classification, lead extraction, and
//! delivery to an external outcome collaborator.
//!
//! Classification and extraction are new pure functions — the teacher has
//! no lead-extraction concept to ground them on — tested with plain
//! `#[test]`s in the teacher's boundary-test style (see `codec.rs`,
//! `error.rs`). [`OutcomeSink`] and its two implementations are grounded on
//! `events/emitter.rs`'s `EventEmitter` trait plus its
//! `LoggingEventEmitter`/`NoopEventEmitter` pair.

use async_trait::async_trait;
use serde::Serialize;
use std::time::{Duration, SystemTime};

/// Why a call ended. Logged, but does not affect the `FINAL`/`ABANDONED`
/// classification, which is computed purely from the transcript and
/// extracted lead fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeReason {
    CarrierStop,
    WebSocketClosed,
    WebSocketError,
    AsrClosed,
    IdleTimeout,
    MaxCallDuration,
}

impl FinalizeReason {
    fn as_log_str(&self) -> &'static str {
        match self {
            Self::CarrierStop => "carrier_stop",
            Self::WebSocketClosed => "ws_closed",
            Self::WebSocketError => "ws_error",
            Self::AsrClosed => "asr_closed",
            Self::IdleTimeout => "idle_timeout",
            Self::MaxCallDuration => "max_call_duration",
        }
    }
}

/// A role-tagged line in the call's transcript (spec §3's `ConversationLog`).
#[derive(Debug, Clone)]
pub struct ConversationEntry {
    pub role: Role,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Bot,
}

/// Extracted lead fields (spec §3's `CallContext.lead`).
#[derive(Debug, Clone, Default)]
pub struct Lead {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub request_present: bool,
}

/// Everything the Finalization Gate needs from a completed call.
#[derive(Debug, Clone)]
pub struct CallSummary {
    pub call_id: String,
    pub stream_id: String,
    pub caller_id: String,
    pub callee_id: String,
    pub started_at: SystemTime,
    pub ended_at: SystemTime,
    pub transcript: Vec<ConversationEntry>,
    pub lead: Lead,
    pub recording_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Classification {
    Final,
    Abandoned,
}

#[derive(Debug, Serialize)]
struct LeadPayload {
    name: Option<String>,
    phone: Option<String>,
    notes: Option<String>,
}

/// The payload handed to an [`OutcomeSink`] (spec §4.7).
#[derive(Debug, Serialize)]
pub struct FinalizePayload {
    pub event: Classification,
    pub call_id: String,
    pub stream_id: String,
    pub caller_id: String,
    pub callee_id: String,
    pub started_at: u64,
    pub ended_at: u64,
    pub duration_ms: u64,
    pub transcript_text: String,
    pub lead: LeadPayload,
    pub recording_url: Option<String>,
}

/// Classifies the call and assembles its finalize payload. Name/phone
/// extraction only runs if the upstream lead fields are still empty.
pub fn build_payload(summary: &CallSummary, reason: FinalizeReason) -> FinalizePayload {
    log::info!(
        "[Finalize] call_id={} reason={}",
        summary.call_id,
        reason.as_log_str()
    );

    let transcript_text = render_transcript(&summary.transcript);
    let mut lead = summary.lead.clone();
    if lead.name.is_none() {
        lead.name = extract_name(&summary.transcript);
    }

    let event = classify(&lead, &summary.transcript);
    let duration_ms = summary
        .ended_at
        .duration_since(summary.started_at)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64;

    FinalizePayload {
        event,
        call_id: summary.call_id.clone(),
        stream_id: summary.stream_id.clone(),
        caller_id: summary.caller_id.clone(),
        callee_id: summary.callee_id.clone(),
        started_at: to_unix_seconds(summary.started_at),
        ended_at: to_unix_seconds(summary.ended_at),
        duration_ms,
        transcript_text,
        lead: LeadPayload {
            name: lead.name,
            phone: lead.phone,
            notes: None,
        },
        recording_url: summary.recording_url.clone(),
    }
}

fn to_unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

fn render_transcript(entries: &[ConversationEntry]) -> String {
    entries
        .iter()
        .map(|entry| {
            let role = match entry.role {
                Role::User => "user",
                Role::Bot => "bot",
            };
            format!("{role}: {}", entry.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `FINAL` iff `name` is non-empty AND (`request_present` OR a subject is
/// derivable from the transcript). Otherwise `ABANDONED` (spec §4.7).
fn classify(lead: &Lead, transcript: &[ConversationEntry]) -> Classification {
    let has_name = lead.name.as_deref().is_some_and(|n| !n.trim().is_empty());
    let subject_derivable = lead.request_present || has_any_user_utterance(transcript);

    if has_name && subject_derivable {
        Classification::Final
    } else {
        Classification::Abandoned
    }
}

fn has_any_user_utterance(transcript: &[ConversationEntry]) -> bool {
    transcript
        .iter()
        .any(|entry| entry.role == Role::User && !entry.text.trim().is_empty())
}

/// Scans user utterances for "my name is <X>" (and the Hebrew equivalent);
/// falls back to the first user utterance if it looks name-shaped (2-40
/// characters, no digits).
fn extract_name(transcript: &[ConversationEntry]) -> Option<String> {
    const PATTERNS: &[&str] = &["my name is ", "this is ", "קוראים לי ", "השם שלי "];

    for entry in transcript.iter().filter(|e| e.role == Role::User) {
        let lower = entry.text.to_lowercase();
        for pattern in PATTERNS {
            if let Some(idx) = lower.find(pattern) {
                let candidate = entry.text[idx + pattern.len()..].trim();
                let name = first_name_phrase(candidate);
                if !name.is_empty() {
                    return Some(name);
                }
            }
        }
    }

    transcript
        .iter()
        .find(|e| e.role == Role::User)
        .map(|e| e.text.trim())
        .filter(|text| {
            let len = text.chars().count();
            (2..=40).contains(&len) && !text.chars().any(|c| c.is_ascii_digit())
        })
        .map(str::to_string)
}

/// Takes the leading run of a candidate name, stopping at sentence
/// punctuation so trailing clauses aren't folded into the name.
fn first_name_phrase(candidate: &str) -> String {
    candidate
        .split(['.', ',', '!', '?', ';'])
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Strips non-digits and normalizes to E.164-ish `+972…` form where
/// possible (spec §4.7). Returns `None` if the digit count is outside
/// `[9, 13]`.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let len = digits.len();
    if !(9..=13).contains(&len) {
        return None;
    }

    if let Some(rest) = digits.strip_prefix("972") {
        return Some(format!("+972{rest}"));
    }
    if digits.starts_with('0') && len == 10 {
        return Some(format!("+972{}", &digits[1..]));
    }
    Some(digits)
}

/// Delivers a finalize payload to wherever call outcomes are consumed.
/// Retries and authentication are the sink's own concern (spec §4.7).
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    async fn deliver(&self, payload: FinalizePayload);
}

/// Logs the payload and discards it. Used when no webhook is configured.
pub struct LoggingOutcomeSink;

#[async_trait]
impl OutcomeSink for LoggingOutcomeSink {
    async fn deliver(&self, payload: FinalizePayload) {
        log::info!(
            "[Finalize] call_id={} event={:?} lead_name={:?}",
            payload.call_id,
            payload.event,
            payload.lead.name
        );
    }
}

/// POSTs the payload as JSON to a configured webhook URL.
pub struct HttpOutcomeSink {
    client: reqwest::Client,
    webhook_url: String,
}

impl HttpOutcomeSink {
    pub fn new(client: reqwest::Client, webhook_url: impl Into<String>) -> Self {
        Self {
            client,
            webhook_url: webhook_url.into(),
        }
    }
}

#[async_trait]
impl OutcomeSink for HttpOutcomeSink {
    async fn deliver(&self, payload: FinalizePayload) {
        let call_id = payload.call_id.clone();
        match self.client.post(&self.webhook_url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                log::info!("[Finalize] delivered call_id={call_id}");
            }
            Ok(response) => {
                log::warn!(
                    "[Finalize] webhook returned HTTP {} for call_id={call_id}",
                    response.status()
                );
            }
            Err(err) => {
                log::warn!("[Finalize] webhook delivery failed for call_id={call_id}: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(text: &str) -> ConversationEntry {
        ConversationEntry {
            role: Role::User,
            text: text.to_string(),
        }
    }

    fn bot(text: &str) -> ConversationEntry {
        ConversationEntry {
            role: Role::Bot,
            text: text.to_string(),
        }
    }

    #[test]
    fn final_requires_name_and_request_present() {
        let lead = Lead {
            name: Some("Dana".to_string()),
            phone: None,
            request_present: true,
        };
        assert_eq!(classify(&lead, &[]), Classification::Final);
    }

    #[test]
    fn final_without_phone_still_classifies_final() {
        // Literal scenario from spec.md: name + request_present with no
        // phone captured still classifies FINAL.
        let lead = Lead {
            name: Some("Dana".to_string()),
            phone: None,
            request_present: true,
        };
        let payload = build_payload(
            &CallSummary {
                call_id: "CA1".into(),
                stream_id: "MZ1".into(),
                caller_id: "withheld".into(),
                callee_id: "+15551234".into(),
                started_at: SystemTime::UNIX_EPOCH,
                ended_at: SystemTime::UNIX_EPOCH + Duration::from_secs(30),
                transcript: vec![],
                lead,
                recording_url: None,
            },
            FinalizeReason::CarrierStop,
        );
        assert_eq!(payload.event, Classification::Final);
        assert_eq!(payload.lead.phone, None);
    }

    #[test]
    fn abandoned_without_name() {
        let lead = Lead {
            name: None,
            phone: None,
            request_present: true,
        };
        assert_eq!(classify(&lead, &[]), Classification::Abandoned);
    }

    #[test]
    fn abandoned_with_name_but_no_subject() {
        let lead = Lead {
            name: Some("Dana".to_string()),
            phone: None,
            request_present: false,
        };
        assert_eq!(classify(&lead, &[]), Classification::Abandoned);
    }

    #[test]
    fn final_when_subject_derivable_from_transcript_without_request_flag() {
        let lead = Lead {
            name: Some("Dana".to_string()),
            phone: None,
            request_present: false,
        };
        let transcript = vec![user("I'd like to book an appointment")];
        assert_eq!(classify(&lead, &transcript), Classification::Final);
    }

    #[test]
    fn extracts_name_from_my_name_is_pattern() {
        let transcript = vec![user("hi, my name is Dana Cohen, I have a question")];
        assert_eq!(extract_name(&transcript), Some("Dana Cohen".to_string()));
    }

    #[test]
    fn falls_back_to_first_utterance_when_name_shaped() {
        let transcript = vec![user("Dana Cohen")];
        assert_eq!(extract_name(&transcript), Some("Dana Cohen".to_string()));
    }

    #[test]
    fn does_not_fall_back_when_first_utterance_has_digits() {
        let transcript = vec![user("my order number is 12345")];
        assert_eq!(extract_name(&transcript), None);
    }

    #[test]
    fn ignores_bot_utterances_when_extracting_name() {
        let transcript = vec![bot("hello, how can I help?"), user("my name is Avi")];
        assert_eq!(extract_name(&transcript), Some("Avi".to_string()));
    }

    #[test]
    fn normalize_phone_handles_israeli_country_code() {
        assert_eq!(
            normalize_phone("972-50-123-4567"),
            Some("+972501234567".to_string())
        );
    }

    #[test]
    fn normalize_phone_handles_local_leading_zero() {
        assert_eq!(normalize_phone("050-123-4567"), Some("+972501234567".to_string()));
    }

    #[test]
    fn normalize_phone_rejects_too_short_or_too_long() {
        assert_eq!(normalize_phone("12345"), None);
        assert_eq!(normalize_phone("1".repeat(20).as_str()), None);
    }

    #[test]
    fn render_transcript_joins_role_tagged_lines() {
        let transcript = vec![bot("hello"), user("hi there")];
        assert_eq!(render_transcript(&transcript), "bot: hello\nuser: hi there");
    }
}
