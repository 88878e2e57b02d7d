//! Trait seams between this crate and the concrete engines/adapters it is
//! explicitly not responsible for (spec non-goals: no ASR/TTS wire formats,
//! no bookkeeping persistence). Shaped after the teacher's `SttEngine`/
//! `TtsEngine` traits in `voice-core/src/{stt,tts}/mod.rs`: async-fn-in-trait
//! via `#[allow(async_fn_in_trait)]`, no `async-trait` dependency needed.
//! Every trait here is `Send + Sync` so it can live behind an `Arc` shared
//! across the engine's tokio tasks.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::CoreError;
use crate::operation::{MultiOperationResult, Operation};
use crate::result::ExecutionResult;

/// Streams recognized text for a single utterance. Implementations own the
/// actual ASR wire protocol; this crate only consumes transcripts.
#[allow(async_fn_in_trait)]
pub trait AsrEngine: Send + Sync {
    async fn transcribe(&self, audio: &[f32]) -> Result<String, CoreError>;
}

/// Classifies an audio frame as speech or silence. Implementations own the
/// concrete detector (energy-based, neural, whatever); this crate only
/// consumes the boolean/confidence verdict.
pub trait VadService: Send + Sync {
    fn is_speech(&self, frame: &[f32]) -> bool;
}

/// Synthesizes a sentence of text to audio samples for playback.
#[allow(async_fn_in_trait)]
pub trait TtsService: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<f32>, CoreError>;
}

/// Acoustic echo cancellation, fed the TTS reference signal so the capture
/// path can subtract it from the mic before VAD/ASR ever see it (spec §6).
/// Implementations with no AEC hardware path can no-op both methods — the
/// contract is explicitly "all non-fatal".
pub trait Aec: Send + Sync {
    /// Forwards a chunk of the audio actually played by TTS, used as the
    /// cancellation reference.
    fn feed_tts_audio(&self, pcm: &[f32]);
    /// Tells the AEC whether TTS is currently producing audio, so it can
    /// decide whether cancellation should run at all.
    fn set_tts_playing(&self, playing: bool);
}

/// Converts free-text user input into structured operations or a
/// conversational reply. This crate never talks to an LLM provider
/// directly — it only consumes the structured result.
#[allow(async_fn_in_trait)]
pub trait LlmIntentService: Send + Sync {
    async fn recognize(&self, utterance: &str) -> Result<MultiOperationResult, CoreError>;
}

/// Executes a single operation against whatever bookkeeping store the
/// embedding application owns. This crate never persists data itself.
#[allow(async_fn_in_trait)]
pub trait OperationAdapter: Send + Sync {
    async fn execute(&self, operation: &Operation) -> Result<ExecutionResult, CoreError>;
}

/// Turns accumulated execution results and/or chat content into the
/// user-visible reply text for one turn (spec §4.9). This crate decides
/// *when* to speak; the adapter decides *how to phrase it* — templating,
/// an LLM rewrite, localization, whatever the embedding application wants.
pub trait FeedbackAdapter: Send + Sync {
    fn generate_feedback(&self, mode: crate::conversation_channel::ConversationMode, results: &[ExecutionResult], chat_content: Option<&str>) -> String;
    /// Whether this adapter can phrase a reply for `mode` at all. C9 falls
    /// back to a fixed apology string rather than calling an adapter that
    /// would refuse.
    fn supports_mode(&self, mode: crate::conversation_channel::ConversationMode) -> bool;
}

/// Publish/subscribe point where C9 deposits query-shaped results and C10
/// looks them up when assembling a reply. Deliberately a concrete type (not
/// a trait) — this is in-process bookkeeping, not an external seam, the
/// way the teacher registers `PreloadedTtsState` as shared `Arc` state
/// rather than behind a trait.
#[derive(Default)]
pub struct QueryResultEventBus {
    results: Mutex<HashMap<String, ExecutionResult>>,
}

impl QueryResultEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, operation_id: impl Into<String>, result: ExecutionResult) {
        self.results.lock().unwrap().insert(operation_id.into(), result);
    }

    pub fn take(&self, operation_id: &str) -> Option<ExecutionResult> {
        self.results.lock().unwrap().remove(operation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_bus_publish_then_take_is_one_shot() {
        let bus = QueryResultEventBus::new();
        bus.publish("op1", ExecutionResult::ok("op1", serde_json::json!({"n": 1})));
        assert!(bus.take("op1").is_some());
        assert!(bus.take("op1").is_none());
    }
}
