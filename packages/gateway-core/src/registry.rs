//! Call session tracking and process-wide graceful shutdown.
//!
//! `SessionRegistry` tracks every live call by its carrier `stream_id` and
//! holds a hierarchical [`CancellationToken`] per call, so the process can
//! force-close every in-flight call (e.g. on SIGTERM) without each call
//! needing to poll any shared state directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

struct SessionState {
    call_id: String,
}

/// Tracks all active call sessions.
pub struct SessionRegistry {
    sessions: DashMap<String, SessionState>,
    next_correlation_id: AtomicU64,
    root_cancel: RwLock<CancellationToken>,
}

impl SessionRegistry {
    /// Creates a new, empty registry.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_correlation_id: AtomicU64::new(1),
            root_cancel: RwLock::new(CancellationToken::new()),
        }
    }

    /// Registers a new call and returns a guard for RAII cleanup plus the
    /// process-local correlation id to use in log lines.
    pub fn register(self: &Arc<Self>, stream_id: String, call_id: String) -> SessionGuard {
        let correlation_id = self.next_correlation_id.fetch_add(1, Ordering::Relaxed);
        let cancel_token = self.root_cancel.read().child_token();

        self.sessions
            .insert(stream_id.clone(), SessionState { call_id });
        log::info!(
            "[Session {correlation_id}] registered stream_id={stream_id} (active calls: {})",
            self.sessions.len()
        );

        SessionGuard {
            stream_id,
            correlation_id,
            registry: Arc::clone(self),
            cancel_token,
        }
    }

    fn unregister(&self, stream_id: &str) {
        if self.sessions.remove(stream_id).is_some() {
            log::info!(
                "[Session] unregistered stream_id={stream_id} (active calls: {})",
                self.sessions.len()
            );
        }
    }

    /// Returns the number of currently active calls.
    #[must_use]
    pub fn active_call_count(&self) -> usize {
        self.sessions.len()
    }

    /// Cancels every active call's token, signaling all session event loops
    /// to shut down. A fresh root token is installed afterwards so the
    /// registry can keep accepting new calls.
    pub fn close_all(&self) -> usize {
        let count = self.sessions.len();
        if count > 0 {
            log::info!("[Session] force-closing {count} active call(s)");
            let mut guard = self.root_cancel.write();
            guard.cancel();
            *guard = CancellationToken::new();
        }
        count
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that unregisters a call session when dropped, and carries the
/// per-call cancellation token session code should select on.
pub struct SessionGuard {
    stream_id: String,
    correlation_id: u64,
    registry: Arc<SessionRegistry>,
    cancel_token: CancellationToken,
}

impl SessionGuard {
    /// Process-local correlation id for log lines, distinct from the
    /// carrier-provided `call_id`/`stream_id`.
    pub fn correlation_id(&self) -> u64 {
        self.correlation_id
    }

    /// The cancellation token for this specific call.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.stream_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_increments_active_count_and_drop_decrements() {
        let registry = Arc::new(SessionRegistry::new());
        assert_eq!(registry.active_call_count(), 0);
        {
            let _guard = registry.register("MZ1".to_string(), "CA1".to_string());
            assert_eq!(registry.active_call_count(), 1);
        }
        assert_eq!(registry.active_call_count(), 0);
    }

    #[test]
    fn close_all_cancels_tokens_and_allows_new_registrations() {
        let registry = Arc::new(SessionRegistry::new());
        let guard = registry.register("MZ1".to_string(), "CA1".to_string());
        assert!(!guard.cancel_token().is_cancelled());

        let closed = registry.close_all();
        assert_eq!(closed, 1);
        assert!(guard.cancel_token().is_cancelled());

        let guard2 = registry.register("MZ2".to_string(), "CA2".to_string());
        assert!(!guard2.cancel_token().is_cancelled());
    }
}
