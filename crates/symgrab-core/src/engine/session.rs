//! Shared session state between the engine API and its worker task.
//!
//! Counters are atomics, control flags are atomics, and the descriptor
//! list, state and failure map sit behind `parking_lot` mutexes so the
//! controlling context and the worker can both touch them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use symgrab_types::{FileResource, SessionState};

#[derive(Debug, Default)]
pub(crate) struct SessionShared {
    state: Mutex<SessionState>,
    pub(crate) paused: AtomicBool,
    pub(crate) cancel_requested: AtomicBool,
    pub(crate) delete_completed_after_cancel: AtomicBool,

    pub(crate) resources: Mutex<Vec<FileResource>>,
    pub(crate) failures: Mutex<HashMap<String, String>>,

    pub(crate) total_size: AtomicU64,
    pub(crate) total_progress: AtomicU64,
    pub(crate) current_file_progress: AtomicU64,
    pub(crate) current_file_size: AtomicU64,
    pub(crate) speed: AtomicU64,
    pub(crate) current_index: AtomicUsize,
}

impl SessionShared {
    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    /// Transition atomically: returns the previous state if it matched one
    /// of `from`, otherwise leaves the state untouched.
    pub(crate) fn transition(
        &self,
        from: &[SessionState],
        to: SessionState,
    ) -> Result<SessionState, SessionState> {
        let mut state = self.state.lock();
        let current = *state;
        if from.contains(&current) {
            *state = to;
            Ok(current)
        } else {
            Err(current)
        }
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.state().is_busy()
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// Zero all counters and clear the failure map; called on (re)start so
    /// the previous session's final values stay readable until then.
    pub(crate) fn reset_counters(&self) {
        self.total_size.store(0, Ordering::Release);
        self.total_progress.store(0, Ordering::Release);
        self.current_file_progress.store(0, Ordering::Release);
        self.current_file_size.store(0, Ordering::Release);
        self.speed.store(0, Ordering::Release);
        self.current_index.store(0, Ordering::Release);
        self.failures.lock().clear();
    }

    pub(crate) fn record_failure(&self, name: &str, reason: String) {
        self.failures
            .lock()
            .entry(name.to_string())
            .or_insert(reason);
    }
}
