//! C4 — TTSQueueWorker. Bounded FIFO feeding sentences to the TTS service,
//! skipping tasks whose response ID is stale or whose age has expired
//! (spec §4.4). Modeled on the teacher's `audio_processing_loop`
//! (`src-tauri/src/voice/pipeline/mod.rs`): a `tokio::time::sleep`-driven
//! poll loop reading shared `Mutex` state, and on `ring_buffer.rs`'s
//! drop-oldest overflow discipline generalized from a sample ring to an
//! explicit `VecDeque::pop_front` eviction. Every successful synthesis is
//! also forwarded to `Aec::feed_tts_audio` — this is the one place the
//! actually-played PCM exists, so it is where the AEC reference feed has to
//! live (spec §2, §6).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::collaborators::{Aec, TtsService};
use crate::config::EngineConfig;
use crate::error::{CoreError, ErrorKind};
use crate::response_tracker::ResponseTracker;
use crate::result::Sentence;

const MAX_TASK_AGE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Working = 1,
    Paused = 2,
    Stopped = 3,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Working,
            2 => Self::Paused,
            3 => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

/// Events the driving loop emits so OutputPipeline (C6) can react without a
/// mutable callback field (spec §9 "callbacks as first-class state").
#[derive(Debug, Clone)]
pub enum TtsQueueEvent {
    SentenceStarted { response_id: u64, text: String },
    SentenceCompleted { response_id: u64, text: String },
    /// Queue ran dry with nothing left to play.
    Drained,
}

struct QueuedSentence {
    sentence: Sentence,
    response_id: u64,
    enqueued_at: Instant,
}

struct Shared {
    queue: Mutex<VecDeque<QueuedSentence>>,
    state: AtomicU8,
    fade_requested: std::sync::atomic::AtomicBool,
    wake: Notify,
    max_queue_size: usize,
}

/// Drives one logical worker loop per spec §4.4. Cloning an `Arc` of this
/// and calling `run` is the only way to start the drain loop; construction
/// alone leaves the queue idle.
pub struct TTSQueueWorker {
    shared: Arc<Shared>,
    tracker: Arc<ResponseTracker>,
    tts: Arc<dyn TtsService>,
    /// Fed every chunk of audio actually played, so AEC has a reference
    /// signal to cancel out of the mic capture (spec §2 "feeds AEC
    /// reference", §6 `onAudioPlayed(PCM)`).
    aec: Arc<dyn Aec>,
    events: mpsc::UnboundedSender<TtsQueueEvent>,
}

impl TTSQueueWorker {
    pub fn new(
        config: &EngineConfig,
        tracker: Arc<ResponseTracker>,
        tts: Arc<dyn TtsService>,
        aec: Arc<dyn Aec>,
    ) -> (Self, mpsc::UnboundedReceiver<TtsQueueEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                state: AtomicU8::new(WorkerState::Idle as u8),
                fade_requested: std::sync::atomic::AtomicBool::new(false),
                wake: Notify::new(),
                max_queue_size: config.max_tts_queue_size,
            }),
            tracker,
            tts,
            aec,
            events: tx,
        };
        (worker, rx)
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Enqueues a sentence for `response_id`. Drops the oldest queued
    /// sentence first if the queue is already at capacity (spec §4.4 cap
    /// 10, drop-oldest).
    pub fn enqueue(&self, sentence: Sentence, response_id: u64) {
        let mut queue = self.shared.queue.lock().unwrap();
        if queue.len() >= self.shared.max_queue_size {
            if let Some(dropped) = queue.pop_front() {
                warn!(response_id = dropped.response_id, "tts queue full, dropping oldest sentence");
            }
        }
        queue.push_back(QueuedSentence {
            sentence,
            response_id,
            enqueued_at: Instant::now(),
        });
        drop(queue);
        self.shared.state.store(WorkerState::Working as u8, Ordering::Release);
        self.shared.wake.notify_one();
    }

    /// Clears the queue and cancels playback in progress. Does not stop the
    /// loop permanently — a later `enqueue` resumes work.
    pub fn stop(&self) {
        self.shared.queue.lock().unwrap().clear();
        self.shared.state.store(WorkerState::Stopped as u8, Ordering::Release);
        self.shared.wake.notify_one();
    }

    /// Same as `stop`, but asks the TTS service to fade the in-flight
    /// utterance instead of cutting it abruptly (spec §4.4).
    pub fn fade_out_and_stop(&self) {
        self.shared.fade_requested.store(true, Ordering::Release);
        self.stop();
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    /// The drain loop proper. Intended to be `tokio::spawn`ed once per
    /// worker lifetime; returns when `shutdown` fires.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }

            let next = {
                let mut queue = self.shared.queue.lock().unwrap();
                queue.pop_front()
            };

            let Some(task) = next else {
                self.shared.state.store(WorkerState::Idle as u8, Ordering::Release);
                let _ = self.events.send(TtsQueueEvent::Drained);
                tokio::select! {
                    _ = self.shared.wake.notified() => continue,
                    _ = shutdown.changed() => return,
                }
            };

            if self.shared.state.load(Ordering::Acquire) == WorkerState::Stopped as u8 {
                continue;
            }

            if !self.tracker.is_current(task.response_id) {
                debug!(response_id = task.response_id, "dropping stale tts task");
                continue;
            }
            if task.enqueued_at.elapsed() > MAX_TASK_AGE {
                debug!(response_id = task.response_id, "dropping expired tts task");
                continue;
            }

            let _ = self.events.send(TtsQueueEvent::SentenceStarted {
                response_id: task.response_id,
                text: task.sentence.text.clone(),
            });

            match self.tts.synthesize(&task.sentence.text).await {
                Ok(samples) => {
                    self.aec.feed_tts_audio(&samples);
                    let _ = self.events.send(TtsQueueEvent::SentenceCompleted {
                        response_id: task.response_id,
                        text: task.sentence.text,
                    });
                }
                Err(err) => {
                    warn!(error = %err, "tts synthesis failed");
                }
            }

            self.shared.fade_requested.store(false, Ordering::Release);
        }
    }
}

/// Surfaces the `synthesize`-call-failed path as a `CoreError` for callers
/// that want to route it through the shared error handler rather than only
/// logging it locally.
pub fn synthesis_error(message: impl Into<String>) -> CoreError {
    CoreError::new("tts_queue", ErrorKind::Network, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct EchoTts {
        calls: AtomicUsize,
    }

    impl TtsService for EchoTts {
        async fn synthesize(&self, _text: &str) -> Result<Vec<f32>, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0.5, -0.5])
        }
    }

    #[derive(Default)]
    struct RecordingAec {
        fed_chunks: Mutex<Vec<Vec<f32>>>,
    }

    impl Aec for RecordingAec {
        fn feed_tts_audio(&self, pcm: &[f32]) {
            self.fed_chunks.lock().unwrap().push(pcm.to_vec());
        }
        fn set_tts_playing(&self, _playing: bool) {}
    }

    #[test]
    fn overflow_drops_oldest_entry() {
        let tracker = Arc::new(ResponseTracker::new());
        let id = tracker.start_new_response();
        let tts = Arc::new(EchoTts { calls: AtomicUsize::new(0) });
        let mut config = EngineConfig::default();
        config.max_tts_queue_size = 2;
        let (worker, _rx) = TTSQueueWorker::new(&config, tracker, tts, Arc::new(RecordingAec::default()));

        worker.enqueue(Sentence { text: "one".into(), response_id: id.to_string() }, id);
        worker.enqueue(Sentence { text: "two".into(), response_id: id.to_string() }, id);
        worker.enqueue(Sentence { text: "three".into(), response_id: id.to_string() }, id);

        assert_eq!(worker.queue_len(), 2);
    }

    #[tokio::test]
    async fn synthesized_audio_is_forwarded_to_aec_reference() {
        let tracker = Arc::new(ResponseTracker::new());
        let id = tracker.start_new_response();
        let tts = Arc::new(EchoTts { calls: AtomicUsize::new(0) });
        let aec = Arc::new(RecordingAec::default());
        let (worker, mut rx) = TTSQueueWorker::new(&EngineConfig::default(), tracker, tts, aec.clone());
        let worker = Arc::new(worker);

        worker.enqueue(Sentence { text: "hello".into(), response_id: id.to_string() }, id);

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(worker.clone().run(shutdown_rx));

        while let Some(event) = rx.recv().await {
            if matches!(event, TtsQueueEvent::SentenceCompleted { .. }) {
                break;
            }
        }

        assert_eq!(*aec.fed_chunks.lock().unwrap(), vec![vec![0.5, -0.5]]);

        let _ = shutdown_tx.send(true);
        let _ = handle.await;
    }

    #[tokio::test]
    async fn stale_response_id_is_skipped_without_synthesizing() {
        let tracker = Arc::new(ResponseTracker::new());
        let stale_id = tracker.start_new_response();
        let current_id = tracker.start_new_response();
        let tts = Arc::new(EchoTts { calls: AtomicUsize::new(0) });
        let (worker, mut rx) =
            TTSQueueWorker::new(&EngineConfig::default(), tracker, tts.clone(), Arc::new(RecordingAec::default()));
        let worker = Arc::new(worker);

        worker.enqueue(Sentence { text: "stale".into(), response_id: stale_id.to_string() }, stale_id);
        worker.enqueue(Sentence { text: "fresh".into(), response_id: current_id.to_string() }, current_id);

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(worker.clone().run(shutdown_rx));

        let mut started = Vec::new();
        while let Some(event) = rx.recv().await {
            if let TtsQueueEvent::SentenceStarted { text, .. } = event {
                started.push(text);
            }
            if started.len() == 1 {
                break;
            }
        }
        assert_eq!(started, vec!["fresh"]);
        assert_eq!(tts.calls.load(Ordering::SeqCst), 1);

        let _ = shutdown_tx.send(true);
        let _ = handle.await;
    }
}
