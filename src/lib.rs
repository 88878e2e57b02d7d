//! `ledger_voice_core` — the voice engine behind a hands-free personal
//! finance assistant: continuous mic capture through ASR/VAD, barge-in
//! detection against the assistant's own TTS, dual-channel execution of
//! financial operations alongside natural conversation, and proactive
//! nudges during silence. See `SPEC_FULL.md` for the full module map
//! (C1–C14).
//!
//! Every component takes its collaborators (ASR, VAD, TTS, AEC, LLM intent
//! recognition, operation execution, feedback phrasing) as trait objects
//! from [`collaborators`] — this crate owns orchestration, not model
//! inference or audio I/O.

pub mod barge_in;
pub mod collaborators;
pub mod config;
pub mod controller;
pub mod conversation_channel;
pub mod dual_channel;
pub mod error;
pub mod execution_channel;
pub mod input_pipeline;
pub mod operation;
pub mod output_pipeline;
pub mod proactive;
pub mod recognizer;
pub mod response_tracker;
pub mod result;
pub mod result_buffer;
pub mod sentence_buffer;
pub mod timing_judge;
pub mod tts_queue;

pub use barge_in::{BargeInDetector, BargeInLayer, BargeInResult};
pub use collaborators::{Aec, AsrEngine, FeedbackAdapter, LlmIntentService, OperationAdapter, QueryResultEventBus, TtsService, VadService};
pub use config::EngineConfig;
pub use controller::{ControllerEvent, ControllerState, VoicePipelineController};
pub use conversation_channel::{ConversationChannel, ConversationMode};
pub use dual_channel::DualChannelProcessor;
pub use error::{CoreError, DefaultErrorHandler, ErrorHandler, ErrorKind, ErrorSeverity};
pub use execution_channel::ExecutionChannel;
pub use input_pipeline::{InputEvent, InputPipeline, PipelineMode};
pub use operation::{MultiOperationResult, Operation, OperationParams, OperationType, Priority, RecognitionResultType};
pub use output_pipeline::{OutputEvent, OutputPipeline, OutputState};
pub use proactive::{ProactiveConversationManager, ProactiveEvent};
pub use recognizer::MultiOperationRecognizer;
pub use response_tracker::ResponseTracker;
pub use result::{BufferedResult, ExecutionResult, Response, ResponseTimingWindow, ResultPriority, ResultStatus, Sentence};
pub use result_buffer::ResultBuffer;
pub use sentence_buffer::SentenceBuffer;
pub use timing_judge::{NotifiableResult, TimingContext, TimingVerdict};
pub use tts_queue::{TTSQueueWorker, TtsQueueEvent, WorkerState};
