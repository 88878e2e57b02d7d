//! Shared vocabulary for "what the user asked to do" (C7's output, C8/C9's
//! input). Kept deliberately flat and serde-friendly, the way the teacher's
//! `ipc::VoiceCommand`/`VoiceEvent` model wire messages — these aren't wire
//! types here (no transport is in scope) but the same shape pays off for
//! logging and for the fakes used in tests.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bookkeeping action kinds the recognizer can produce. `Unknown` exists
/// because recognition can legitimately fail to classify an utterance
/// without that being an error (spec §3/§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    AddTransaction,
    Query,
    Update,
    Delete,
    ListCategories,
    Unknown,
}

/// Scheduling priority assigned to an operation before it enters C8's
/// triple queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Immediate,
    Normal,
    Deferred,
    /// Queues exactly like `Deferred` (same batch, same aggregation window)
    /// but never pre-empts one (spec §4.8 priority table).
    Background,
}

/// Typed view over `Operation::params` for the handful of shapes the engine
/// actually needs to inspect (as opposed to just forwarding to an adapter).
/// Anything recognized-but-unsupported degrades to `Unknown` rather than a
/// parse error — recognition failures are expected traffic, not bugs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationParams {
    AddTransaction {
        amount: f64,
        category: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    Query {
        #[serde(skip_serializing_if = "Option::is_none")]
        category: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        range: Option<String>,
    },
    Update {
        target_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        amount: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        category: Option<String>,
    },
    Delete {
        target_id: String,
    },
    ListCategories,
    Unknown {
        raw: serde_json::Value,
    },
}

/// A single action the user asked for, already resolved to a concrete type
/// and priority. `immutable` marks operations (e.g. a delete already sent
/// to an adapter) that must not be re-scheduled on retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub op_type: OperationType,
    pub priority: Priority,
    pub params: OperationParams,
    pub immutable: bool,
}

impl Operation {
    pub fn new(op_type: OperationType, priority: Priority, params: OperationParams) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            op_type,
            priority,
            params,
            immutable: false,
        }
    }
}

/// What kind of outcome C7 produced for a given utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionResultType {
    /// One or more operations were extracted and should be executed.
    Operations,
    /// The utterance was conversational — no operation, just a reply.
    Chat,
    /// The utterance was operation-shaped but ambiguous; ask the user.
    Clarify,
}

/// Full output of C7 for one recognized utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiOperationResult {
    pub result_type: RecognitionResultType,
    pub operations: Vec<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarify_question: Option<String>,
    pub confidence: f64,
    pub source: String,
    pub original_input: String,
}

impl MultiOperationResult {
    pub fn chat(content: impl Into<String>, original_input: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            result_type: RecognitionResultType::Chat,
            operations: Vec::new(),
            chat_content: Some(content.into()),
            clarify_question: None,
            confidence: 1.0,
            source: source.into(),
            original_input: original_input.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_puts_immediate_first() {
        let mut prios = vec![Priority::Deferred, Priority::Immediate, Priority::Normal];
        prios.sort();
        assert_eq!(prios, vec![Priority::Immediate, Priority::Normal, Priority::Deferred]);
    }

    #[test]
    fn unknown_params_round_trip_through_json() {
        let op = Operation::new(
            OperationType::Unknown,
            Priority::Normal,
            OperationParams::Unknown {
                raw: serde_json::json!({"foo": "bar"}),
            },
        );
        let json = serde_json::to_string(&op).unwrap();
        let back: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(back.op_type, OperationType::Unknown);
    }

    #[test]
    fn chat_result_has_no_operations() {
        let result = MultiOperationResult::chat("hi there", "hello", "llm");
        assert!(result.operations.is_empty());
        assert_eq!(result.result_type, RecognitionResultType::Chat);
    }
}
