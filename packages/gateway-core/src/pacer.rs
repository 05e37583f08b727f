//! Frame Pacer: the outbound audio queue that emits exactly one 160-byte
//! μ-law frame every 20 ms once a call's Pacer has been bound to a stream
//! and its jitter prebuffer threshold has been crossed.
//!
//! Grounded on the fixed-cadence tick loop in `stream/cadence.rs`
//! (`tokio::time::interval` + `MissedTickBehavior::Burst` +
//! `tokio::select! { biased; ... }`) and its `LoggingStreamGuard`
//! summary-on-drop logging. Unlike that stream, this pacer carves frames
//! from a flat byte queue rather than a queue of pre-framed chunks (this
//! gateway's `FramedQueue` is explicitly byte-granular, §3), has an
//! explicit prebuffer gate before it starts emitting, and drops crossfade
//! entirely since μ-law silence is a flat `0xFF` fill with no notion of a
//! smooth fade.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::protocol_constants::{FRAME_BYTES, FRAME_DURATION_MS, MAX_PACER_QUEUE_FRAMES, MULAW_SILENCE_BYTE};

struct PacerShared {
    queue: Mutex<VecDeque<u8>>,
    stream_id: Mutex<Option<String>>,
    started_sending: AtomicBool,
    prebuffer_bytes: usize,
    frames_emitted: AtomicU64,
    frames_dropped: AtomicU64,
}

/// Emits one exactly-160-byte μ-law frame every 20 ms for a single call,
/// after a jitter prebuffer threshold has been crossed.
pub struct Pacer {
    shared: Arc<PacerShared>,
    internal_token: CancellationToken,
}

impl Pacer {
    /// Creates a pacer and spawns its dedicated tick task. Frames are sent
    /// on `output_tx` as they are produced; the receiving end is owned by
    /// the Call Session, which forwards them to the carrier WebSocket.
    pub fn new(prebuffer_bytes: usize, output_tx: mpsc::Sender<Bytes>) -> Self {
        let shared = Arc::new(PacerShared {
            queue: Mutex::new(VecDeque::new()),
            stream_id: Mutex::new(None),
            started_sending: AtomicBool::new(false),
            prebuffer_bytes,
            frames_emitted: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        });
        let internal_token = CancellationToken::new();

        tokio::spawn(run_tick_loop(
            Arc::clone(&shared),
            output_tx,
            internal_token.clone(),
        ));

        Self {
            shared,
            internal_token,
        }
    }

    /// Attaches the pacer to a carrier stream identifier. Until this is
    /// called, ticks skip unconditionally (step 1 of the pacing algorithm).
    pub fn bind(&self, stream_id: impl Into<String>) {
        *self.shared.stream_id.lock() = Some(stream_id.into());
    }

    /// Appends bytes to the tail of the queue. Any length, including zero,
    /// is accepted; chunks need not be frame-aligned.
    ///
    /// If the queue would grow past `MAX_PACER_QUEUE_FRAMES` frames worth
    /// of bytes, the oldest bytes are dropped to bound memory under
    /// sustained upstream overrun (mirrors the teacher's
    /// drop-oldest-on-overflow cadence queue policy).
    pub fn enqueue(&self, bytes: Bytes) {
        if bytes.is_empty() {
            return;
        }
        let max_bytes = MAX_PACER_QUEUE_FRAMES * FRAME_BYTES;
        let mut queue = self.shared.queue.lock();
        queue.extend(bytes.iter().copied());
        while queue.len() > max_bytes {
            queue.pop_front();
            self.shared.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drops the queue and resets the prebuffer gate. Idempotent. Future
    /// ticks skip emitting (since the prebuffer is no longer satisfied)
    /// until `enqueue` supplies enough new bytes to cross the threshold
    /// again — this lets the same pacer be reused for barge-in (stop the
    /// interrupted bot turn, then resume once the next turn enqueues
    /// audio) as well as final teardown (paired with dropping the
    /// `Pacer`, which stops the tick task via its internal token).
    pub fn cancel(&self) {
        self.shared.queue.lock().clear();
        self.shared.started_sending.store(false, Ordering::SeqCst);
    }

    /// Total frames emitted so far (diagnostics only).
    pub fn frames_emitted(&self) -> u64 {
        self.shared.frames_emitted.load(Ordering::Relaxed)
    }
}

impl Drop for Pacer {
    fn drop(&mut self) {
        self.internal_token.cancel();
    }
}

async fn run_tick_loop(
    shared: Arc<PacerShared>,
    output_tx: mpsc::Sender<Bytes>,
    internal_token: CancellationToken,
) {
    let mut metronome = interval(Duration::from_millis(FRAME_DURATION_MS));
    metronome.set_missed_tick_behavior(MissedTickBehavior::Burst);

    loop {
        tokio::select! {
            biased;

            _ = internal_token.cancelled() => {
                log::debug!("[Pacer] tick task stopping");
                break;
            }

            _ = metronome.tick() => {
                let Some(frame) = next_frame(&shared) else {
                    continue;
                };
                shared.frames_emitted.fetch_add(1, Ordering::Relaxed);
                if output_tx.send(frame).await.is_err() {
                    log::debug!("[Pacer] output channel closed, stopping");
                    break;
                }
            }
        }
    }
}

/// Implements the pacing algorithm's per-tick decision (spec §4.2): gated
/// on bind + prebuffer, then carves exactly one 160-byte frame, padding a
/// short tail (including a fully empty queue) with μ-law silence.
fn next_frame(shared: &PacerShared) -> Option<Bytes> {
    if shared.stream_id.lock().is_none() {
        return None;
    }

    let mut queue = shared.queue.lock();

    if !shared.started_sending.load(Ordering::SeqCst) {
        if queue.len() < shared.prebuffer_bytes {
            return None;
        }
        shared.started_sending.store(true, Ordering::SeqCst);
    }

    if queue.len() >= FRAME_BYTES {
        let frame: Vec<u8> = queue.drain(..FRAME_BYTES).collect();
        return Some(Bytes::from(frame));
    }

    let mut buf = BytesMut::with_capacity(FRAME_BYTES);
    buf.extend(queue.drain(..));
    buf.resize(FRAME_BYTES, MULAW_SILENCE_BYTE);
    Some(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pacer(prebuffer_bytes: usize) -> (Pacer, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(64);
        (Pacer::new(prebuffer_bytes, tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn no_frame_emitted_before_bind() {
        let (pacer, mut rx) = test_pacer(160);
        pacer.enqueue(Bytes::from(vec![1u8; 320]));
        tokio::time::advance(Duration::from_millis(40)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn emits_one_full_frame_per_tick_once_bound_and_prebuffered() {
        let (pacer, mut rx) = test_pacer(160);
        pacer.bind("MZ1");
        pacer.enqueue(Bytes::from(vec![7u8; 320]));
        tokio::time::advance(Duration::from_millis(21)).await;

        let frame = rx.recv().await.expect("frame");
        assert_eq!(frame.len(), FRAME_BYTES);
        assert!(frame.iter().all(|&b| b == 7));
    }

    #[tokio::test(start_paused = true)]
    async fn prebuffer_gate_holds_until_threshold_crossed() {
        // Scenario 5 from spec.md: three 500-byte enqueues (1500 bytes)
        // stay below a 1600-byte threshold; a fourth crosses it.
        let (pacer, mut rx) = test_pacer(1600);
        pacer.bind("MZ1");
        for _ in 0..3 {
            pacer.enqueue(Bytes::from(vec![9u8; 500]));
        }
        tokio::time::advance(Duration::from_millis(21)).await;
        assert!(rx.try_recv().is_err(), "no frame before threshold crossed");

        pacer.enqueue(Bytes::from(vec![9u8; 500]));
        tokio::time::advance(Duration::from_millis(21)).await;
        let frame = rx.recv().await.expect("frame after threshold crossed");
        assert_eq!(frame.len(), FRAME_BYTES);
    }

    #[tokio::test(start_paused = true)]
    async fn pads_short_tail_with_silence() {
        let (pacer, mut rx) = test_pacer(0);
        pacer.bind("MZ1");
        pacer.enqueue(Bytes::from(vec![5u8; 40]));
        tokio::time::advance(Duration::from_millis(21)).await;

        let frame = rx.recv().await.expect("frame");
        assert_eq!(frame.len(), FRAME_BYTES);
        assert_eq!(&frame[0..40], &vec![5u8; 40][..]);
        assert!(frame[40..].iter().all(|&b| b == MULAW_SILENCE_BYTE));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_queue_after_prebuffer_emits_pure_silence() {
        let (pacer, mut rx) = test_pacer(0);
        pacer.bind("MZ1");
        tokio::time::advance(Duration::from_millis(21)).await;

        let frame = rx.recv().await.expect("frame");
        assert!(frame.iter().all(|&b| b == MULAW_SILENCE_BYTE));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drops_queue_and_resets_prebuffer_gate() {
        let (pacer, mut rx) = test_pacer(160);
        pacer.bind("MZ1");
        pacer.enqueue(Bytes::from(vec![1u8; 320]));
        tokio::time::advance(Duration::from_millis(21)).await;
        rx.recv().await.expect("first frame");

        pacer.cancel();
        tokio::time::advance(Duration::from_millis(21)).await;
        assert!(rx.try_recv().is_err(), "no frame immediately after cancel");

        // A later turn resumes once enough bytes are queued again.
        pacer.enqueue(Bytes::from(vec![2u8; 320]));
        tokio::time::advance(Duration::from_millis(21)).await;
        let frame = rx.recv().await.expect("frame after resume");
        assert!(frame.iter().all(|&b| b == 2));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let (pacer, _rx) = test_pacer(160);
        pacer.cancel();
        pacer.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn never_emits_a_frame_shorter_than_160_bytes() {
        let (pacer, mut rx) = test_pacer(0);
        pacer.bind("MZ1");
        for _ in 0..5 {
            tokio::time::advance(Duration::from_millis(21)).await;
            if let Ok(frame) = rx.try_recv() {
                assert_eq!(frame.len(), FRAME_BYTES);
            }
        }
    }
}
