//! C6 — OutputPipeline. Drives one SentenceBuffer + TTSQueueWorker for a
//! single response: buffering incoming LLM chunks, handing sentences to
//! TTS, and reconciling playback-start/complete with ResponseTracker (spec
//! §4.6). Modeled on the teacher's `playback::speak` (cancel flag + drain
//! loop, `src-tauri/src/voice/tts/mod.rs`) generalized from "one utterance"
//! to "a queue of sentences belonging to one response".

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::warn;

use crate::collaborators::Aec;
use crate::config::EngineConfig;
use crate::response_tracker::ResponseTracker;
use crate::result::Sentence;
use crate::sentence_buffer::SentenceBuffer;
use crate::tts_queue::{TTSQueueWorker, TtsQueueEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputState {
    Idle = 0,
    Buffering = 1,
    Speaking = 2,
}

impl OutputState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Buffering,
            2 => Self::Speaking,
            _ => Self::Idle,
        }
    }
}

/// Replaces the source's `onCompleted`/`onSentenceStarted` callback fields
/// (spec §9) with an explicit event stream C14 subscribes to.
#[derive(Debug, Clone)]
pub enum OutputEvent {
    PlaybackStarted { response_id: u64 },
    /// Fired exactly once per response, regardless of whether
    /// `ResponseTracker::confirm_playback_complete` returned true — a
    /// stale/interrupted response still needs its `onCompleted` so the
    /// upstream state machine doesn't deadlock in `speaking` (spec §4.6,
    /// §9 "Completion race in OutputPipeline").
    Completed { response_id: u64 },
}

struct ActiveResponse {
    response_id: u64,
    sentence_buffer: SentenceBuffer,
    enqueued_total: usize,
}

pub struct OutputPipeline {
    state: AtomicU8,
    active: Mutex<Option<ActiveResponse>>,
    tracker: Arc<ResponseTracker>,
    tts_queue: Arc<TTSQueueWorker>,
    aec: Arc<dyn Aec>,
    config: EngineConfig,
    events: mpsc::UnboundedSender<OutputEvent>,
}

impl OutputPipeline {
    pub fn new(
        config: EngineConfig,
        tracker: Arc<ResponseTracker>,
        tts_queue: Arc<TTSQueueWorker>,
        aec: Arc<dyn Aec>,
    ) -> (Self, mpsc::UnboundedReceiver<OutputEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pipeline = Self {
            state: AtomicU8::new(OutputState::Idle as u8),
            active: Mutex::new(None),
            tracker,
            tts_queue,
            aec,
            config,
            events: tx,
        };
        (pipeline, rx)
    }

    pub fn state(&self) -> OutputState {
        OutputState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn start(&self, response_id: u64) {
        let mut active = self.active.lock().unwrap();
        *active = Some(ActiveResponse {
            response_id,
            sentence_buffer: SentenceBuffer::new(&self.config),
            enqueued_total: 0,
        });
        self.state.store(OutputState::Buffering as u8, Ordering::Release);
    }

    /// Appends `text` to the current response's sentence buffer and
    /// enqueues every sentence it completes. Returns how many sentences
    /// were enqueued by this call.
    pub fn add_chunk(&self, text: &str) -> usize {
        let mut active = self.active.lock().unwrap();
        let Some(active) = active.as_mut() else {
            warn!("add_chunk called with no active response");
            return 0;
        };
        let sentences = active.sentence_buffer.add_chunk(text);
        let count = sentences.len();
        for sentence_text in sentences {
            active.enqueued_total += 1;
            self.tts_queue.enqueue(
                Sentence { text: sentence_text, response_id: active.response_id.to_string() },
                active.response_id,
            );
        }
        count
    }

    /// Flushes the sentence buffer's residue. If nothing was ever enqueued
    /// for this response, fires `Completed` synchronously rather than
    /// waiting on a TTS queue that will never drain anything (spec §4.6).
    pub fn complete(&self) {
        let (response_id, residue, had_any) = {
            let mut active = self.active.lock().unwrap();
            let Some(active) = active.as_mut() else {
                return;
            };
            let residue = active.sentence_buffer.flush();
            if residue.is_some() {
                active.enqueued_total += 1;
            }
            (active.response_id, residue, active.enqueued_total > 0)
        };

        if let Some(text) = residue {
            self.tts_queue.enqueue(Sentence { text, response_id: response_id.to_string() }, response_id);
        }

        if !had_any {
            self.finish(response_id);
        }
    }

    /// Called by the caller's event-pump loop whenever the TTS queue event
    /// stream reports activity for the active response (see
    /// `pump_tts_event`).
    pub fn pump_tts_event(&self, event: TtsQueueEvent) {
        match event {
            TtsQueueEvent::SentenceStarted { response_id, .. } => {
                if self.tracker.is_current(response_id) {
                    self.tracker.mark_playback_started(response_id);
                    self.aec.set_tts_playing(true);
                    self.state.store(OutputState::Speaking as u8, Ordering::Release);
                    let _ = self.events.send(OutputEvent::PlaybackStarted { response_id });
                }
            }
            TtsQueueEvent::SentenceCompleted { .. } => {}
            TtsQueueEvent::Drained => {
                let response_id = {
                    let active = self.active.lock().unwrap();
                    active.as_ref().map(|a| a.response_id)
                };
                if let Some(response_id) = response_id {
                    if self.state() == OutputState::Speaking {
                        self.finish(response_id);
                    }
                }
            }
        }
    }

    /// Confirms completion with ResponseTracker, resets to `idle`
    /// *unconditionally* (the return value only controls whether downstream
    /// notification counts as "real" completion, never whether state gets
    /// reset — spec §9 calls out the historical bug where skipping the
    /// reset on a `false` deadlocked the controller in `speaking`), and
    /// fires `Completed`.
    fn finish(&self, response_id: u64) {
        let _confirmed = self.tracker.confirm_playback_complete(response_id);
        self.aec.set_tts_playing(false);
        self.state.store(OutputState::Idle as u8, Ordering::Release);
        *self.active.lock().unwrap() = None;
        let _ = self.events.send(OutputEvent::Completed { response_id });
    }

    pub fn stop(&self) {
        let response_id = self.active.lock().unwrap().as_ref().map(|a| a.response_id);
        if let Some(id) = response_id {
            self.tracker.mark_interrupted(id);
        }
        self.tts_queue.stop();
        self.aec.set_tts_playing(false);
        self.state.store(OutputState::Idle as u8, Ordering::Release);
        *self.active.lock().unwrap() = None;
    }

    pub fn fade_out_and_stop(&self) {
        let response_id = self.active.lock().unwrap().as_ref().map(|a| a.response_id);
        if let Some(id) = response_id {
            self.tracker.mark_interrupted(id);
        }
        self.tts_queue.fade_out_and_stop();
        self.aec.set_tts_playing(false);
        self.state.store(OutputState::Idle as u8, Ordering::Release);
        *self.active.lock().unwrap() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::TtsService;
    use crate::error::CoreError;

    struct NoopAec;
    impl Aec for NoopAec {
        fn feed_tts_audio(&self, _pcm: &[f32]) {}
        fn set_tts_playing(&self, _playing: bool) {}
    }

    struct NoopTts;
    impl TtsService for NoopTts {
        async fn synthesize(&self, _text: &str) -> Result<Vec<f32>, CoreError> {
            Ok(vec![])
        }
    }

    #[test]
    fn complete_with_nothing_enqueued_fires_completed_synchronously() {
        let config = EngineConfig::default();
        let tracker = Arc::new(ResponseTracker::new());
        let id = tracker.start_new_response();
        let (tts_worker, _rx) = TTSQueueWorker::new(&config, tracker.clone(), Arc::new(NoopTts), Arc::new(NoopAec));
        let (pipeline, mut events) =
            OutputPipeline::new(config, tracker, Arc::new(tts_worker), Arc::new(NoopAec));

        pipeline.start(id);
        pipeline.complete();

        let event = events.try_recv().expect("completed event");
        assert!(matches!(event, OutputEvent::Completed { .. }));
        assert_eq!(pipeline.state(), OutputState::Idle);
    }
}
