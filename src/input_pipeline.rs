//! C5 — InputPipeline. Owns the mic frame stream, forwards frames to ASR
//! and VAD, and emits partial/final text plus VAD events (spec §4.5).
//! Modeled on the teacher's `VoicePipeline::start`/`stop` lifecycle
//! (`src-tauri/src/voice/pipeline/mod.rs`): keep the stream handle alive,
//! abort the background task on stop, and the same `AtomicU8` state shape
//! as `audio/state.rs`.
//!
//! The collaborator `AsrEngine` trait this crate exposes (spec §6) is a
//! one-shot `transcribe(&[f32]) -> String` rather than the source's raw
//! bidirectional stream — so "streaming partials" are produced by
//! transcribing the speech-in-progress buffer each time VAD reports
//! `speechStart`/ongoing speech, and a "final" is produced once on
//! `speechEnd`. This keeps the same external event shape (`partial`,
//! `final`, `speechStart`, `speechEnd`, `error`) the spec calls for without
//! inventing a streaming wire protocol this crate isn't responsible for.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::collaborators::{AsrEngine, VadService};
use crate::error::{CoreError, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineMode {
    Idle = 0,
    /// Controller is not currently speaking; ASR output passes through
    /// unfiltered.
    Listening = 1,
    /// Controller is speaking; ASR output must be gated by C3 before it is
    /// treated as a genuine interruption (that gating happens in C14, which
    /// owns the BargeInDetector — this pipeline only tags the mode on the
    /// emitted event so the caller knows which gate applies).
    Speaking = 2,
}

impl PipelineMode {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Listening,
            2 => Self::Speaking,
            _ => Self::Idle,
        }
    }
}

#[derive(Debug, Clone)]
pub enum InputEvent {
    Partial { text: String, mode: PipelineMode },
    Final { text: String, mode: PipelineMode },
    SpeechStart,
    SpeechEnd,
    Error(String),
}

struct Buffers {
    speech: Vec<f32>,
}

/// Owns the live mic stream and drives ASR/VAD over it.
pub struct InputPipeline {
    mode: AtomicU8,
    running: AtomicBool,
    vad_speaking: AtomicBool,
    buffers: Mutex<Buffers>,
    asr: Arc<dyn AsrEngine>,
    vad: Arc<dyn VadService>,
    events: mpsc::UnboundedSender<InputEvent>,
}

impl InputPipeline {
    pub fn new(asr: Arc<dyn AsrEngine>, vad: Arc<dyn VadService>) -> (Self, mpsc::UnboundedReceiver<InputEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pipeline = Self {
            mode: AtomicU8::new(PipelineMode::Idle as u8),
            running: AtomicBool::new(false),
            vad_speaking: AtomicBool::new(false),
            buffers: Mutex::new(Buffers { speech: Vec::new() }),
            asr,
            vad,
            events: tx,
        };
        (pipeline, rx)
    }

    pub fn mode(&self) -> PipelineMode {
        PipelineMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    pub fn set_mode(&self, mode: PipelineMode) {
        self.mode.store(mode as u8, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Creates the audio-controller-equivalent state before returning.
    /// Per spec §4.5 the audio controller must exist before the external
    /// audio-capture source is resumed — here that means `running` flips to
    /// `true`, and the mode to `Listening`, before this call returns, so a
    /// caller that resumes capture immediately after `start()` never races
    /// an uninitialized pipeline.
    pub fn start(&self) {
        self.buffers.lock().unwrap().speech.clear();
        self.vad_speaking.store(false, Ordering::Release);
        self.mode.store(PipelineMode::Listening as u8, Ordering::Release);
        self.running.store(true, Ordering::Release);
    }

    /// Cancels the ASR subscription before the caller closes the audio
    /// stream. Here there's no live subscription object to cancel — this
    /// crate's `AsrEngine` is request/response — so `stop` instead flips
    /// `running` false first (so in-flight `feed_audio_data` calls become
    /// no-ops) before the caller tears down capture, preserving the same
    /// ordering guarantee the spec calls out to avoid the close-await
    /// blocking on `onDone`.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.mode.store(PipelineMode::Idle as u8, Ordering::Release);
    }

    /// Unconditionally returns to `idle`, even if internal state is already
    /// inconsistent — resolves the known deadlock where a `stop()` raced an
    /// error path (spec §4.5).
    pub fn reset(&self) {
        self.running.store(false, Ordering::Release);
        self.vad_speaking.store(false, Ordering::Release);
        self.mode.store(PipelineMode::Idle as u8, Ordering::Release);
        if let Ok(mut buffers) = self.buffers.lock() {
            buffers.speech.clear();
        }
    }

    /// `stop(); reset(); start()` per spec §4.5. Because `start()` already
    /// brings the pipeline back to `running` before returning, a caller
    /// that resumes the external capture source immediately after this
    /// call never loses the first frames.
    pub async fn restart(&self) {
        self.stop();
        self.reset();
        self.start();
    }

    /// Feeds one frame of 16-bit PCM (as `f32` samples, already
    /// normalized) to VAD and, while speech is in progress, to the
    /// accumulating ASR buffer. No-ops once `running` is false.
    pub async fn feed_audio_data(&self, frame: &[f32]) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        let mode = self.mode();
        if matches!(mode, PipelineMode::Idle) {
            return;
        }

        let is_speech = self.vad.is_speech(frame);
        let was_speaking = self.vad_speaking.swap(is_speech, Ordering::AcqRel);

        if is_speech && !was_speaking {
            let _ = self.events.send(InputEvent::SpeechStart);
        }

        if is_speech {
            let mut buffers = self.buffers.lock().unwrap();
            buffers.speech.extend_from_slice(frame);
            let snapshot = buffers.speech.clone();
            drop(buffers);
            self.transcribe_and_emit(&snapshot, mode, false).await;
        }

        if !is_speech && was_speaking {
            let _ = self.events.send(InputEvent::SpeechEnd);
            let snapshot = {
                let mut buffers = self.buffers.lock().unwrap();
                std::mem::take(&mut buffers.speech)
            };
            self.transcribe_and_emit(&snapshot, mode, true).await;
        }
    }

    async fn transcribe_and_emit(&self, samples: &[f32], mode: PipelineMode, is_final: bool) {
        if samples.is_empty() {
            return;
        }
        match self.asr.transcribe(samples).await {
            Ok(text) if !text.trim().is_empty() => {
                let event = if is_final {
                    InputEvent::Final { text, mode }
                } else {
                    InputEvent::Partial { text, mode }
                };
                let _ = self.events.send(event);
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "asr transcription failed");
                let _ = self.events.send(InputEvent::Error(err.to_string()));
            }
        }
    }
}

pub fn stream_error(message: impl Into<String>) -> CoreError {
    CoreError::new("input_pipeline", ErrorKind::Network, message)
}
