//! C9 — ConversationChannel. Aggregates execution results and chat content
//! into the user-visible reply via a FeedbackAdapter (spec §4.9). The
//! snapshot-then-clear-then-call shape is grounded on the teacher's
//! `run_stt_and_emit`'s "take the engine out before awaiting"
//! (`app.stt_engine.take()` in `src-tauri/src/commands/voice.rs`),
//! generalized here to "take the accumulated turn state out before calling
//! the (possibly failing) adapter" so a failing adapter can never poison
//! the next turn with stale data.

use std::sync::Mutex;

use crate::collaborators::FeedbackAdapter;
use crate::error::{CoreError, ErrorHandler, ErrorKind};
use crate::result::ExecutionResult;

/// Which kind of reply is being generated, mirrored from the source's
/// conversation-mode enum (quick-ack for a single deferred add vs. a fuller
/// summary for a batch, etc).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationMode {
    QuickAck,
    Summary,
    Chat,
    Clarify,
}

struct Turn {
    results: Vec<ExecutionResult>,
    chat_content: Option<String>,
}

pub struct ConversationChannel {
    turn: Mutex<Turn>,
    adapter: std::sync::Arc<dyn FeedbackAdapter>,
    error_handler: std::sync::Arc<dyn ErrorHandler>,
}

const FALLBACK_REPLY: &str = "抱歉，生成响应时遇到了问题";

impl ConversationChannel {
    pub fn new(adapter: std::sync::Arc<dyn FeedbackAdapter>, error_handler: std::sync::Arc<dyn ErrorHandler>) -> Self {
        Self {
            turn: Mutex::new(Turn { results: Vec::new(), chat_content: None }),
            adapter,
            error_handler,
        }
    }

    pub fn add_result(&self, result: ExecutionResult) {
        self.turn.lock().unwrap().results.push(result);
    }

    pub fn set_chat_content(&self, content: impl Into<String>) {
        self.turn.lock().unwrap().chat_content = Some(content.into());
    }

    /// Snapshots the accumulated turn, clears it immediately (so a failing
    /// adapter call below can't poison the next turn), then calls the
    /// feedback adapter. On adapter failure, returns a friendly fallback
    /// and records the error rather than propagating.
    pub fn generate_response(&self, mode: ConversationMode) -> String {
        let (results, chat_content) = {
            let mut turn = self.turn.lock().unwrap();
            (std::mem::take(&mut turn.results), turn.chat_content.take())
        };

        if !self.adapter.supports_mode(mode) {
            self.error_handler.on_error(&CoreError::new(
                "conversation_channel",
                ErrorKind::State,
                "feedback adapter does not support requested mode",
            ));
            return FALLBACK_REPLY.to_string();
        }

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.adapter.generate_feedback(mode, &results, chat_content.as_deref())
        }));

        match outcome {
            Ok(text) => text,
            Err(_) => {
                self.error_handler.on_error(&CoreError::new(
                    "conversation_channel",
                    ErrorKind::Callback,
                    "feedback adapter panicked",
                ));
                FALLBACK_REPLY.to_string()
            }
        }
    }

    pub fn pending_result_count(&self) -> usize {
        self.turn.lock().unwrap().results.len()
    }
}
