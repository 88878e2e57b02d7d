//! C14 — VoicePipelineController. The top-level state machine coordinating
//! C5–C13: aggregates ASR finals across an utterance, drives a recognized
//! utterance through C7/C10 and out through C6, and reconciles barge-in
//! (both ASR- and amplitude-driven) with ResponseTracker (spec §4.14).
//! Modeled on the teacher's `main()` — a `tokio::select!` over multiple
//! event channels — and its `VoicePipeline`/`AudioStateMachine` state enum
//! (`Idle/Listening/Recording/Processing/Speaking`), extended here with
//! `Stopping` and the sentence-aggregation timer spec.md §4.14 adds.
//!
//! Unlike the teacher's tightly-coupled `main.rs`, event pumping is split
//! into small `handle_*` methods the caller's own select loop drives — the
//! same "external pump, no internal event loop" shape `OutputPipeline`
//! already uses for `pump_tts_event` (spec §9 "callbacks as first-class
//! state" → typed events, explicit pump).

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::barge_in::{BargeInDetector, BargeInResult};
use crate::config::EngineConfig;
use crate::conversation_channel::ConversationMode;
use crate::dual_channel::DualChannelProcessor;
use crate::input_pipeline::{InputEvent, InputPipeline};
use crate::operation::{MultiOperationResult, RecognitionResultType};
use crate::output_pipeline::{OutputEvent, OutputPipeline};
use crate::proactive::ProactiveEvent;
use crate::recognizer::MultiOperationRecognizer;
use crate::response_tracker::ResponseTracker;
use crate::result_buffer::ResultBuffer;
use crate::timing_judge::{self, NotifiableResult, TimingContext, TimingVerdict};
use crate::tts_queue::TtsQueueEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControllerState {
    Idle = 0,
    Listening = 1,
    Processing = 2,
    Speaking = 3,
    Stopping = 4,
}

impl ControllerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Listening,
            2 => Self::Processing,
            3 => Self::Speaking,
            4 => Self::Stopping,
            _ => Self::Idle,
        }
    }
}

/// Events the host application can subscribe to, replacing the source's
/// mutable `onStateChanged` callback field (spec §9).
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    StateChanged(ControllerState),
    BargeIn(BargeInResult),
}

struct Aggregator {
    pending: Vec<String>,
    generation: u64,
    vad_speaking: bool,
}

/// Coordinates the full turn lifecycle: mic frames in, spoken reply out.
pub struct VoicePipelineController {
    state: AtomicU8,
    config: EngineConfig,
    input: Arc<InputPipeline>,
    output: Arc<OutputPipeline>,
    barge_in: Arc<BargeInDetector>,
    tracker: Arc<ResponseTracker>,
    recognizer: Arc<MultiOperationRecognizer>,
    dual_channel: Arc<DualChannelProcessor>,
    result_buffer: Arc<ResultBuffer>,
    aggregator: Mutex<Aggregator>,
    is_restarting_input: AtomicBool,
    events: mpsc::UnboundedSender<ControllerEvent>,
}

impl VoicePipelineController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        input: Arc<InputPipeline>,
        output: Arc<OutputPipeline>,
        barge_in: Arc<BargeInDetector>,
        tracker: Arc<ResponseTracker>,
        recognizer: Arc<MultiOperationRecognizer>,
        dual_channel: Arc<DualChannelProcessor>,
        result_buffer: Arc<ResultBuffer>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = Arc::new(Self {
            state: AtomicU8::new(ControllerState::Idle as u8),
            config,
            input,
            output,
            barge_in,
            tracker,
            recognizer,
            dual_channel,
            result_buffer,
            aggregator: Mutex::new(Aggregator { pending: Vec::new(), generation: 0, vad_speaking: false }),
            is_restarting_input: AtomicBool::new(false),
            events: tx,
        });
        (controller, rx)
    }

    pub fn state(&self) -> ControllerState {
        ControllerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ControllerState) {
        self.state.store(state as u8, Ordering::Release);
        let _ = self.events.send(ControllerEvent::StateChanged(state));
    }

    pub fn start(&self) {
        self.input.start();
        self.set_state(ControllerState::Listening);
    }

    /// Drives one InputPipeline event through the state machine (spec
    /// §4.14). Call this from the caller's own select loop over the
    /// `InputEvent` receiver `InputPipeline::new` returned.
    pub async fn handle_input_event(self: &Arc<Self>, event: InputEvent) {
        match event {
            InputEvent::SpeechStart => {
                self.barge_in.set_vad_speaking(true);
                self.aggregator.lock().unwrap().vad_speaking = true;
            }
            InputEvent::SpeechEnd => {
                self.barge_in.set_vad_speaking(false);
                self.on_vad_silence();
            }
            InputEvent::Partial { text, .. } => {
                if self.state() == ControllerState::Speaking {
                    if let Some(result) = self.barge_in.evaluate_asr_result(&text) {
                        self.handle_barge_in(result).await;
                    }
                }
            }
            InputEvent::Final { text, .. } => match self.state() {
                ControllerState::Speaking => {
                    if let Some(result) = self.barge_in.evaluate_asr_result(&text) {
                        self.handle_barge_in(result).await;
                    }
                }
                ControllerState::Listening => self.push_final_and_arm_timer(text),
                _ => {}
            },
            InputEvent::Error(message) => {
                warn!(%message, "input pipeline reported an error");
                if self.state() == ControllerState::Listening {
                    self.restart_input_pipeline().await;
                }
            }
        }
    }

    /// VAD reporting silence while the aggregator still holds unflushed
    /// finals shortens the pending timer to 300ms (spec §4.14) rather than
    /// waiting out the full insurance delay.
    fn on_vad_silence(self: &Arc<Self>) {
        let generation = {
            let mut agg = self.aggregator.lock().unwrap();
            if agg.pending.is_empty() {
                return;
            }
            agg.generation += 1;
            agg.generation
        };
        self.arm_aggregation_timer(generation, Duration::from_millis(self.config.sentence_continuation_delay_ms));
    }

    fn push_final_and_arm_timer(self: &Arc<Self>, text: String) {
        let (generation, delay) = {
            let mut agg = self.aggregator.lock().unwrap();
            agg.pending.push(text);
            agg.generation += 1;
            // VAD still reporting speech: wait out the longer insurance
            // delay in case more finals are on the way. VAD already
            // silent: the shorter steady-state delay is enough (spec
            // §4.14).
            let delay_ms =
                if agg.vad_speaking { self.config.insurance_delay_ms } else { self.config.sentence_aggregation_delay_ms };
            (agg.generation, Duration::from_millis(delay_ms))
        };
        self.arm_aggregation_timer(generation, delay);
    }

    fn arm_aggregation_timer(self: &Arc<Self>, generation: u64, delay: Duration) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            controller.fire_aggregation(generation).await;
        });
    }

    async fn fire_aggregation(self: &Arc<Self>, generation: u64) {
        let text = {
            let mut agg = self.aggregator.lock().unwrap();
            if agg.generation != generation || agg.pending.is_empty() {
                return;
            }
            agg.generation += 1;
            agg.pending.drain(..).collect::<Vec<_>>().join("")
        };

        if self.state() != ControllerState::Listening {
            return;
        }
        self.process_utterance(text).await;
    }

    /// Recognizes one aggregated utterance, drives it through C7/C10, and
    /// streams the reply out through C6 (spec §4.14). Leaves state
    /// transitions from here on to `handle_output_event`/
    /// `handle_tts_queue_event`, driven by the caller's pump loop.
    pub async fn process_utterance(self: &Arc<Self>, text: String) {
        self.set_state(ControllerState::Processing);
        let response_id = self.tracker.start_new_response();
        self.output.start(response_id);

        let recognition = self.recognizer.recognize(&text).await;
        let reply = self.reply_for(recognition).await;

        self.output.add_chunk(&reply);
        self.output.complete();
        // If `add_chunk` enqueued nothing, `complete()` already fired
        // `OutputEvent::Completed` synchronously, which
        // `handle_output_event` turns into a `Listening` transition plus
        // an input-pipeline restart — the safety net spec §4.14 calls for
        // when a turn never produces a speakable chunk.
    }

    async fn reply_for(&self, recognition: MultiOperationResult) -> String {
        match recognition.result_type {
            RecognitionResultType::Clarify => recognition.clarify_question.unwrap_or_default(),
            RecognitionResultType::Chat => self.dual_channel.process(recognition, ConversationMode::Chat).await,
            RecognitionResultType::Operations => {
                let mode = if recognition.operations.len() <= 1 { ConversationMode::QuickAck } else { ConversationMode::Summary };
                self.dual_channel.process(recognition, mode).await
            }
        }
    }

    /// Drives one OutputPipeline event through the state machine. Call
    /// from the caller's select loop over the `OutputEvent` receiver.
    pub async fn handle_output_event(self: &Arc<Self>, event: OutputEvent) {
        match event {
            OutputEvent::PlaybackStarted { .. } => {
                self.set_state(ControllerState::Speaking);
            }
            OutputEvent::Completed { .. } => {
                self.barge_in.set_tts_playing(false, "");
                self.set_state(ControllerState::Listening);
                self.restart_input_pipeline().await;
            }
        }
    }

    /// Forwards a `TTSQueueWorker` event both to `OutputPipeline` (which
    /// owns playback-started/completed bookkeeping) and to the barge-in
    /// detector (which needs the sentence text for its echo-similarity
    /// layer). Call from the caller's select loop over the TTS queue's
    /// event receiver.
    pub fn handle_tts_queue_event(&self, event: TtsQueueEvent) {
        if let TtsQueueEvent::SentenceStarted { text, .. } = &event {
            self.barge_in.set_tts_playing(true, text);
        }
        self.output.pump_tts_event(event);
    }

    async fn handle_barge_in(self: &Arc<Self>, result: BargeInResult) {
        info!(layer = ?result.layer, "barge-in detected");
        self.output.fade_out_and_stop();
        self.set_state(ControllerState::Listening);
        let _ = self.events.send(ControllerEvent::BargeIn(result));
        self.restart_input_pipeline().await;
    }

    /// Layer 3 of the barge-in detector (spec §4.3): sustained
    /// high-amplitude audio forces an interruption regardless of ASR/VAD.
    /// Call once per audio frame while `Speaking`.
    pub async fn evaluate_amplitude_frame(self: &Arc<Self>, mean_abs: i32) {
        if self.state() != ControllerState::Speaking {
            return;
        }
        if let Some(result) = self.barge_in.evaluate_amplitude_frame(mean_abs) {
            self.handle_barge_in(result).await;
        }
    }

    /// `stop(); reset(); start()` on the input pipeline, guarded against
    /// restart storms (spec §4.14 `_isRestartingInput`).
    async fn restart_input_pipeline(self: &Arc<Self>) {
        if self.is_restarting_input.swap(true, Ordering::AcqRel) {
            return;
        }
        self.input.restart().await;
        self.set_state(ControllerState::Listening);
        self.is_restarting_input.store(false, Ordering::Release);
    }

    /// Voices C11's pending results if C12's timing judge clears them and
    /// the controller is currently idle-listening. Returns `true` if a
    /// notification was spoken.
    pub fn maybe_voice_pending_results(self: &Arc<Self>, ctx: TimingContext) -> bool {
        if self.state() != ControllerState::Listening {
            return false;
        }
        let verdict = timing_judge::judge(&ctx, self.config.silence_threshold_ms);
        if matches!(verdict, TimingVerdict::Suppress | TimingVerdict::Defer) {
            return false;
        }
        let pending = self.result_buffer.pending();
        if pending.is_empty() {
            return false;
        }

        let notifiables: Vec<NotifiableResult> =
            pending.iter().map(|r| NotifiableResult { description: r.description.clone(), amount: r.amount }).collect();
        let text = timing_judge::generate_notification(&notifiables, verdict);
        for r in &pending {
            self.result_buffer.mark_notified(&r.id);
        }

        let response_id = self.tracker.start_new_response();
        self.output.start(response_id);
        self.output.add_chunk(&text);
        self.output.complete();
        true
    }

    /// Voices a C13 proactive event, if one is ready, as an ordinary
    /// assistant turn; a session-end event instead transitions the
    /// controller to `Stopping`.
    pub fn handle_proactive_event(self: &Arc<Self>, event: ProactiveEvent) {
        match event {
            ProactiveEvent::Topic(text) => {
                if self.state() != ControllerState::Listening {
                    return;
                }
                let response_id = self.tracker.start_new_response();
                self.output.start(response_id);
                self.output.add_chunk(&text);
                self.output.complete();
            }
            ProactiveEvent::SessionEnded => {
                self.set_state(ControllerState::Stopping);
            }
        }
    }
}
