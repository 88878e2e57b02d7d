//! Demo entry point wiring every component together end to end with
//! in-memory stand-ins for ASR/VAD/TTS/AEC/LLM/bookkeeping — there is no
//! real microphone or speaker here, this just drives the state machine
//! the way a host application would, so the crate's wiring is exercised
//! by something other than unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use ledger_voice_core::{
    Aec, AsrEngine, BargeInLayer, ControllerEvent, ConversationChannel, ConversationMode, CoreError, DefaultErrorHandler,
    DualChannelProcessor, EngineConfig, ExecutionChannel, ExecutionResult, FeedbackAdapter, InputPipeline,
    LlmIntentService, MultiOperationRecognizer, MultiOperationResult, Operation, OperationAdapter, OperationParams,
    OperationType, OutputPipeline, Priority, ProactiveConversationManager, QueryResultEventBus,
    RecognitionResultType, ResponseTracker, ResultBuffer, TTSQueueWorker, TtsService, VadService, VoicePipelineController,
};

/// Always reports silence. The demo drives utterances directly through
/// `ScriptedVad` below instead of needing a real energy/neural detector.
struct ScriptedVad {
    /// Number of `is_speech` calls remaining that should report speech
    /// before falling back to silence — simulates one spoken utterance
    /// per script step.
    speech_frames_remaining: AtomicUsize,
}

impl VadService for ScriptedVad {
    fn is_speech(&self, _frame: &[f32]) -> bool {
        let remaining = self.speech_frames_remaining.load(Ordering::Acquire);
        if remaining == 0 {
            return false;
        }
        self.speech_frames_remaining.fetch_sub(1, Ordering::AcqRel);
        true
    }
}

impl ScriptedVad {
    fn speak_for(&self, frames: usize) {
        self.speech_frames_remaining.store(frames, Ordering::Release);
    }
}

/// Returns one canned utterance regardless of the audio buffer — the demo
/// has no real speech to recognize.
struct ScriptedAsr {
    utterance: std::sync::Mutex<String>,
}

impl AsrEngine for ScriptedAsr {
    async fn transcribe(&self, _audio: &[f32]) -> Result<String, CoreError> {
        Ok(self.utterance.lock().unwrap().clone())
    }
}

struct SilentTts;

impl TtsService for SilentTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        info!(%text, "synthesizing (demo: no audio produced)");
        Ok(vec![0.0; 160])
    }
}

/// No real echo canceller here, but logs what it's fed so the demo shows
/// the AEC reference path (spec §2/§6) actually being driven by synthesized
/// TTS audio rather than silently dropped.
struct LoggingAec;

impl Aec for LoggingAec {
    fn feed_tts_audio(&self, pcm: &[f32]) {
        debug!(samples = pcm.len(), "aec fed tts reference audio");
    }
    fn set_tts_playing(&self, playing: bool) {
        debug!(playing, "aec tts-playing flag updated");
    }
}

/// Recognizes a fixed grammar of two demo utterances and falls back to
/// chat for anything else, standing in for a real LLM intent service.
struct DemoLlm;

impl LlmIntentService for DemoLlm {
    async fn recognize(&self, utterance: &str) -> Result<MultiOperationResult, CoreError> {
        if utterance.contains("午饭") {
            let op = Operation::new(
                OperationType::AddTransaction,
                Priority::Normal,
                OperationParams::AddTransaction { amount: 30.0, category: "餐饮".to_string(), note: Some(utterance.to_string()) },
            );
            return Ok(MultiOperationResult {
                result_type: RecognitionResultType::Operations,
                operations: vec![op],
                chat_content: None,
                clarify_question: None,
                confidence: 0.95,
                source: "demo-llm".to_string(),
                original_input: utterance.to_string(),
            });
        }
        Ok(MultiOperationResult::chat(format!("好的，我听到你说「{utterance}」"), utterance, "demo-llm"))
    }
}

/// Echoes the operation back as a successful bookkeeping write, standing
/// in for a real ledger backend.
struct DemoOperationAdapter;

impl OperationAdapter for DemoOperationAdapter {
    async fn execute(&self, operation: &Operation) -> Result<ExecutionResult, CoreError> {
        info!(op_id = %operation.id, op_type = ?operation.op_type, "executing demo operation");
        Ok(ExecutionResult::ok(operation.id.clone(), serde_json::json!({ "operationId": operation.id })))
    }
}

struct DemoFeedback;

impl FeedbackAdapter for DemoFeedback {
    fn generate_feedback(&self, mode: ConversationMode, results: &[ExecutionResult], chat_content: Option<&str>) -> String {
        if let Some(chat) = chat_content {
            return chat.to_string();
        }
        match mode {
            ConversationMode::QuickAck => "记好了".to_string(),
            ConversationMode::Summary => format!("都记好了，一共{}笔", results.len()),
            _ => "好的".to_string(),
        }
    }

    fn supports_mode(&self, _mode: ConversationMode) -> bool {
        true
    }
}

#[tokio::main]
async fn main() {
    // Log to a rolling file the way the teacher's own `main()` does,
    // falling back to stderr if the log directory can't be created.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_dir = std::env::temp_dir().join("ledger-voice-core-demo");
    let use_file = std::fs::create_dir_all(&log_dir).is_ok();

    let _guard: Option<tracing_appender::non_blocking::WorkerGuard>;
    if use_file {
        let file_appender = tracing_appender::rolling::never(&log_dir, "voice-engine-demo.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        _guard = Some(guard);
        tracing_subscriber::fmt().with_env_filter(env_filter).with_writer(non_blocking).with_ansi(false).init();
    } else {
        _guard = None;
        tracing_subscriber::fmt().with_env_filter(env_filter).with_writer(std::io::stderr).init();
    }

    let config = EngineConfig::default();

    let vad = Arc::new(ScriptedVad { speech_frames_remaining: AtomicUsize::new(0) });
    let asr = Arc::new(ScriptedAsr { utterance: std::sync::Mutex::new(String::new()) });
    let (input, mut input_rx) = InputPipeline::new(asr.clone(), vad.clone());
    let input = Arc::new(input);

    let tracker = Arc::new(ResponseTracker::new());
    let aec = Arc::new(LoggingAec);
    let (tts_worker, mut tts_rx) = TTSQueueWorker::new(&config, tracker.clone(), Arc::new(SilentTts), aec.clone());
    let tts_worker = Arc::new(tts_worker);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(tts_worker.clone().run(shutdown_rx));

    let (output, mut output_rx) = OutputPipeline::new(config.clone(), tracker.clone(), tts_worker.clone(), aec);
    let output = Arc::new(output);

    let recognizer = Arc::new(MultiOperationRecognizer::new(Arc::new(DemoLlm), &config));

    let execution = Arc::new(ExecutionChannel::new(&config, Arc::new(DemoOperationAdapter), Arc::new(DefaultErrorHandler::new())));
    let conversation = Arc::new(ConversationChannel::new(Arc::new(DemoFeedback), Arc::new(DefaultErrorHandler::new())));
    let dual_channel = DualChannelProcessor::new(execution, conversation, Arc::new(QueryResultEventBus::new()));

    let result_buffer = ResultBuffer::new(&config);
    result_buffer.spawn_sweeper();

    let barge_in = Arc::new(ledger_voice_core::BargeInDetector::new(&config));

    let input_for_feed = input.clone();
    let (controller, mut controller_events) =
        VoicePipelineController::new(config, input, output, barge_in, tracker, recognizer, dual_channel, result_buffer);

    let (proactive, mut proactive_events) = ProactiveConversationManager::new(&EngineConfig::default());

    info!("voice engine demo starting");
    controller.start();
    proactive.start_session();

    let controller_for_pump = controller.clone();
    let pump = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(event) = input_rx.recv() => controller_for_pump.handle_input_event(event).await,
                Some(event) = output_rx.recv() => controller_for_pump.handle_output_event(event).await,
                Some(event) = tts_rx.recv() => controller_for_pump.handle_tts_queue_event(event),
                Some(event) = controller_events.recv() => {
                    if let ControllerEvent::BargeIn(result) = event {
                        info!(layer = ?result.layer, "demo pump observed a barge-in");
                    }
                }
                Some(event) = proactive_events.recv() => controller_for_pump.handle_proactive_event(event),
                else => break,
            }
        }
    });

    // Script one spoken utterance: 8 "speech" frames, then silence.
    *asr.utterance.lock().unwrap() = "帮我记一下午饭花了30块".to_string();
    vad.speak_for(8);
    for _ in 0..10 {
        input_for_feed.feed_audio_data(&[0.05; 160]).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    info!(state = ?controller.state(), "after first utterance");

    // Script a second, chattier utterance while speaking, forcing an
    // amplitude barge-in instead (layer 3 of spec §4.3).
    *asr.utterance.lock().unwrap() = "今天股市怎么样".to_string();
    vad.speak_for(8);
    for _ in 0..10 {
        input_for_feed.feed_audio_data(&[0.05; 160]).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    if controller.state() == ledger_voice_core::ControllerState::Speaking {
        for _ in 0..5 {
            controller.evaluate_amplitude_frame(6000).await;
        }
        info!(layer = ?BargeInLayer::Amplitude, "forced an amplitude barge-in");
    }

    tokio::time::sleep(Duration::from_secs(6)).await;
    info!(count = proactive.proactive_count(), "proactive nudges fired during the idle stretch");

    let _ = shutdown_tx.send(true);
    pump.abort();
    info!("voice engine demo finished");
}
