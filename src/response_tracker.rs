//! C1 — ResponseTracker. Sole source of truth for response identity (spec
//! §3/§4.1): allocates monotonically increasing response IDs and tracks the
//! single "current" one. Modeled on the teacher's `AudioStateMachine`
//! (`voice-core/src/audio/state.rs`) — a small atomic state record mutated
//! through compare-exchange-shaped transitions — scaled from a closed state
//! enum to a monotonic counter plus a per-current-response flag set.

use std::sync::Mutex;

/// Mutable state for whichever response is currently "current". Old
/// responses never need their own record — once superseded their ID simply
/// stops matching `current_id`, and every query method treats a mismatched
/// ID as stale without consulting history (spec §4.1).
struct Inner {
    last_id: u64,
    current_id: u64,
    playback_started: bool,
    playback_completed: bool,
    interrupted: bool,
}

/// Allocates and tracks the identity of the in-flight assistant turn.
pub struct ResponseTracker {
    inner: Mutex<Inner>,
}

impl ResponseTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                last_id: 0,
                current_id: 0,
                playback_started: false,
                playback_completed: false,
                interrupted: false,
            }),
        }
    }

    /// Allocates the next response ID and makes it current. Any previously
    /// current response's ID immediately becomes stale — no explicit
    /// cancellation call is required (spec §4.1 "cancelling the current
    /// response simply advances current_id").
    pub fn start_new_response(&self) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        inner.last_id += 1;
        inner.current_id = inner.last_id;
        inner.playback_started = false;
        inner.playback_completed = false;
        inner.interrupted = false;
        inner.current_id
    }

    /// The ID of the response currently considered "current". `0` before
    /// any response has ever been started.
    pub fn current(&self) -> u64 {
        self.inner.lock().unwrap().current_id
    }

    pub fn is_current(&self, id: u64) -> bool {
        self.inner.lock().unwrap().current_id == id
    }

    /// Marks `id` interrupted if it is still current. Stale IDs are
    /// silently ignored (spec §4.1) — an interruption racing a newer
    /// response has nothing left to interrupt.
    pub fn mark_interrupted(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        if inner.current_id == id {
            inner.interrupted = true;
        }
    }

    pub fn mark_playback_started(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        if inner.current_id == id {
            inner.playback_started = true;
        }
    }

    /// Gates the "playback actually finished" callback. Returns `true` only
    /// when `id` is still current and was never interrupted in the
    /// meantime (spec §4.1/§4.6) — the caller must reset its own state to
    /// idle regardless of the return value.
    pub fn confirm_playback_complete(&self, id: u64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.current_id != id {
            return false;
        }
        let confirmed = !inner.interrupted;
        if confirmed {
            inner.playback_completed = true;
        }
        confirmed
    }

    pub fn playback_started(&self, id: u64) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.current_id == id && inner.playback_started
    }

    pub fn is_interrupted(&self, id: u64) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.current_id == id && inner.interrupted
    }
}

impl Default for ResponseTracker {
    fn default() -> Self {
        Self::new()
    }
}
