//! C13 — ProactiveConversationManager. Silence-driven topic generation with
//! a 5s trigger, a 3-strike limit, and a 30s session-end ceiling (spec
//! §4.13). Grounded on the teacher's dual-timer shape in
//! `audio_processing_loop` (`src-tauri/src/voice/pipeline/mod.rs`) — a
//! silence-timeout timer racing the main `tokio::select!` loop —
//! generalized here to two independently re-armable timers instead of one,
//! using the same "only the timer still at the latest generation gets to
//! fire" discipline as `ExecutionChannel::arm_deferred_batch_timers`.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::config::EngineConfig;

/// Phrases that mean "stop doing that" (spec §4.13). Matched as a
/// substring, same convention as C12's ask-result patterns.
const REJECTION_PATTERNS: &[&str] = &["不用了", "闭嘴", "安静", "别说了", "不要再说了"];

/// Deterministic topic rotation. No pack repo needed topic generation, and
/// a fixed rotation keeps the manager's output reproducible in tests
/// without a `rand` dependency this crate has no other use for.
const TOPICS: &[&str] = &[
    "最近记账习惯怎么样，要不要看看本周花销？",
    "对了，你上个月的预算完成得不错，要继续保持吗？",
    "还在吗？有什么想记的随时说一声。",
];

#[derive(Debug, Clone)]
pub enum ProactiveEvent {
    /// A proactive topic the caller should voice (spec §4.13, typically
    /// routed through C6 like any other assistant turn).
    Topic(String),
    /// The proactive session is over — either three strikes were used up
    /// or the user went completely silent for 30s.
    SessionEnded,
}

struct Counters {
    count: AtomicU32,
    disabled: AtomicBool,
    ended: AtomicBool,
    silence_generation: AtomicU64,
    total_generation: AtomicU64,
}

/// Drives proactive (assistant-initiated) turns during user silence.
pub struct ProactiveConversationManager {
    counters: Arc<Counters>,
    events: mpsc::UnboundedSender<ProactiveEvent>,
    silence_timeout: Duration,
    total_timeout: Duration,
    max_count: u32,
    topic_cursor: Mutex<usize>,
}

impl ProactiveConversationManager {
    pub fn new(config: &EngineConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<ProactiveEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            counters: Arc::new(Counters {
                count: AtomicU32::new(0),
                disabled: AtomicBool::new(false),
                ended: AtomicBool::new(false),
                silence_generation: AtomicU64::new(0),
                total_generation: AtomicU64::new(0),
            }),
            events: tx,
            silence_timeout: Duration::from_millis(config.proactive_silence_timeout_ms),
            total_timeout: Duration::from_millis(config.max_total_silence_ms),
            max_count: config.max_proactive_count,
            topic_cursor: Mutex::new(0),
        });
        (manager, rx)
    }

    pub fn proactive_count(&self) -> u32 {
        self.counters.count.load(Ordering::Acquire)
    }

    pub fn is_disabled(&self) -> bool {
        self.counters.disabled.load(Ordering::Acquire)
    }

    pub fn is_session_ended(&self) -> bool {
        self.counters.ended.load(Ordering::Acquire)
    }

    /// Arms both timers for the first time. Call once when a conversation
    /// session starts.
    pub fn start_session(self: &Arc<Self>) {
        let silence_gen = self.counters.silence_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let total_gen = self.counters.total_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.spawn_silence_timer(silence_gen);
        self.spawn_total_timer(total_gen);
    }

    /// Cancels both timers, resets the strike count to zero, and re-arms
    /// both — called on any user turn *and* any system (proactive or
    /// regular) turn, since spec §4.13 gives system responses the same
    /// fresh 30s window a user turn would get.
    pub fn reset_timer(self: &Arc<Self>, _is_user_initiated: bool) {
        if self.counters.disabled.load(Ordering::Acquire) || self.counters.ended.load(Ordering::Acquire) {
            return;
        }
        self.counters.count.store(0, Ordering::Release);
        let silence_gen = self.counters.silence_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let total_gen = self.counters.total_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.spawn_silence_timer(silence_gen);
        self.spawn_total_timer(total_gen);
    }

    /// Checks `text` against the rejection vocabulary; if it matches,
    /// permanently disables proactive mode for the rest of the session
    /// (spec §4.13). Returns whether this call triggered the disable.
    pub fn note_user_utterance(&self, text: &str) -> bool {
        if REJECTION_PATTERNS.iter().any(|p| text.contains(p)) {
            self.counters.disabled.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }

    fn next_topic(&self) -> String {
        let mut cursor = self.topic_cursor.lock().unwrap();
        let topic = TOPICS[*cursor % TOPICS.len()].to_string();
        *cursor += 1;
        topic
    }

    fn spawn_silence_timer(self: &Arc<Self>, generation: u64) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(manager.silence_timeout).await;
            manager.fire_silence_timer(generation);
        });
    }

    fn fire_silence_timer(self: &Arc<Self>, generation: u64) {
        if self.counters.silence_generation.load(Ordering::SeqCst) != generation {
            return;
        }
        if self.counters.disabled.load(Ordering::Acquire) || self.counters.ended.load(Ordering::Acquire) {
            return;
        }

        if self.counters.count.load(Ordering::Acquire) >= self.max_count {
            self.end_session();
            return;
        }

        let topic = self.next_topic();
        let new_count = self.counters.count.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(count = new_count, "emitting proactive topic");
        let _ = self.events.send(ProactiveEvent::Topic(topic));

        // Restart the silence timer regardless of the new count — even a
        // just-used third strike still gets one more chance for the user
        // to respond (spec §4.13) before the *next* firing ends it.
        let silence_gen = self.counters.silence_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.spawn_silence_timer(silence_gen);
    }

    fn spawn_total_timer(self: &Arc<Self>, generation: u64) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(manager.total_timeout).await;
            if manager.counters.total_generation.load(Ordering::SeqCst) == generation
                && !manager.counters.ended.load(Ordering::Acquire)
            {
                manager.end_session();
            }
        });
    }

    fn end_session(&self) {
        if self.counters.ended.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("proactive session ended");
        let _ = self.events.send(ProactiveEvent::SessionEnded);
    }
}
