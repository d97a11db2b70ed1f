//! Callback registry for session events.
//!
//! One slot per event class: status changes, recognition results, terminal
//! errors, reconnect progress. Registering a callback replaces whatever was
//! in the slot before — the last registration wins, there is no fan-out.
//!
//! Invocation happens on the session driver task. A panicking callback is
//! caught and logged there; it never unwinds into the transport loop. Slots
//! hold `Arc`ed closures and the slot lock is released before the call, so a
//! callback may safely re-register callbacks or call back into the session.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;

use crate::codec::RecognitionResult;
use crate::error::SessionError;
use crate::session::{ConnectionState, ReconnectAttempt};

type Slot<T> = Mutex<Option<std::sync::Arc<dyn Fn(T) + Send + Sync>>>;

/// Holds the UI's registered callbacks, one slot per event class.
#[derive(Default)]
pub struct CallbackRegistry {
    on_status: Slot<ConnectionState>,
    on_result: Slot<RecognitionResult>,
    on_error: Slot<SessionError>,
    on_reconnect: Slot<ReconnectAttempt>,
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .finish_non_exhaustive()
    }
}

impl CallbackRegistry {
    /// Creates a registry with all slots empty.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the status-change callback, replacing any previous one.
    pub fn set_on_status(&self, callback: impl Fn(ConnectionState) + Send + Sync + 'static) {
        *self.on_status.lock().expect("status slot poisoned") =
            Some(std::sync::Arc::new(callback));
    }

    /// Registers the result callback, replacing any previous one.
    pub fn set_on_result(&self, callback: impl Fn(RecognitionResult) + Send + Sync + 'static) {
        *self.on_result.lock().expect("result slot poisoned") =
            Some(std::sync::Arc::new(callback));
    }

    /// Registers the error callback, replacing any previous one.
    pub fn set_on_error(&self, callback: impl Fn(SessionError) + Send + Sync + 'static) {
        *self.on_error.lock().expect("error slot poisoned") = Some(std::sync::Arc::new(callback));
    }

    /// Registers the reconnect-progress callback, replacing any previous one.
    pub fn set_on_reconnect(&self, callback: impl Fn(ReconnectAttempt) + Send + Sync + 'static) {
        *self.on_reconnect.lock().expect("reconnect slot poisoned") =
            Some(std::sync::Arc::new(callback));
    }

    /// Invokes the status callback, if registered.
    pub(crate) fn notify_status(&self, state: ConnectionState) {
        let callback = self
            .on_status
            .lock()
            .expect("status slot poisoned")
            .clone();
        if let Some(callback) = callback {
            if catch_unwind(AssertUnwindSafe(|| callback(state))).is_err() {
                log::error!("[Session] status callback panicked for {state:?}");
            }
        }
    }

    /// Invokes the result callback, if registered.
    pub(crate) fn notify_result(&self, result: RecognitionResult) {
        let callback = self
            .on_result
            .lock()
            .expect("result slot poisoned")
            .clone();
        if let Some(callback) = callback {
            if catch_unwind(AssertUnwindSafe(|| callback(result))).is_err() {
                log::error!("[Session] result callback panicked");
            }
        }
    }

    /// Invokes the error callback, if registered.
    pub(crate) fn notify_error(&self, error: SessionError) {
        let callback = self.on_error.lock().expect("error slot poisoned").clone();
        if let Some(callback) = callback {
            if catch_unwind(AssertUnwindSafe(|| callback(error))).is_err() {
                log::error!("[Session] error callback panicked");
            }
        }
    }

    /// Invokes the reconnect-progress callback, if registered.
    pub(crate) fn notify_reconnect(&self, attempt: ReconnectAttempt) {
        let callback = self
            .on_reconnect
            .lock()
            .expect("reconnect slot poisoned")
            .clone();
        if let Some(callback) = callback {
            if catch_unwind(AssertUnwindSafe(|| callback(attempt))).is_err() {
                log::error!("[Session] reconnect callback panicked");
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
