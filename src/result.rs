//! Result and timing data model shared by C1, C8–C12. These types cross the
//! channel boundary between execution and conversation, so (like
//! `operation.rs`) they stay plain, serde-derivable structs rather than
//! trait objects.

use serde::{Deserialize, Serialize};

/// Outcome of running a single [`crate::operation::Operation`] through an
/// `OperationAdapter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub operation_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn ok(operation_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            operation_id: operation_id.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(operation_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// How urgently a buffered result needs to reach the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultPriority {
    Critical,
    Normal,
    Low,
}

/// Lifecycle of a [`BufferedResult`]. Transitions are one-way: a result
/// that has left `Pending` never returns to it (spec §4.11 invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Pending,
    Notified,
    Expired,
    Suppressed,
}

/// An execution result parked in C11 until C12 decides how (or whether) to
/// surface it to the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferedResult {
    pub id: String,
    pub execution_result: ExecutionResult,
    pub priority: ResultPriority,
    pub status: ResultStatus,
    pub created_at_ms: u64,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
}

impl BufferedResult {
    /// Attempts a status transition, enforcing the one-way rule. Returns
    /// `false` (no-op) if `self.status` is already terminal.
    pub fn transition(&mut self, next: ResultStatus) -> bool {
        if matches!(self.status, ResultStatus::Notified | ResultStatus::Expired | ResultStatus::Suppressed) {
            return false;
        }
        self.status = next;
        true
    }
}

/// A TTS response in flight, tracked from dispatch through playback
/// completion or interruption (C1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub playback_started: bool,
    pub playback_completed: bool,
    pub interrupted: bool,
}

impl Response {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            playback_started: false,
            playback_completed: false,
            interrupted: false,
        }
    }
}

/// A sentence-sized chunk of text queued for TTS, tagged with the response
/// it belongs to so playback events can be attributed (C2/C4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sentence {
    pub text: String,
    pub response_id: String,
}

/// Tracks whether a response is still within its "insurance window" — the
/// grace period after playback finishes during which a just-arrived
/// execution result is still treated as belonging to this turn rather than
/// a stray late arrival (used by C14 when reconciling a response's
/// completion against results racing in from C8). Not to be confused with
/// `crate::timing_judge::TimingContext`, C12's decision-table input — this
/// is narrower bookkeeping for one response's own lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseTimingWindow {
    pub response_id: String,
    pub response_started_at_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_completed_at_ms: Option<u64>,
    pub last_user_activity_at_ms: u64,
    pub silence_threshold_ms: u64,
    pub insurance_delay_ms: u64,
}

impl ResponseTimingWindow {
    /// True once playback has finished and the insurance delay past it has
    /// also elapsed, i.e. a result landing now is unambiguously "late".
    pub fn is_past_insurance_window(&self, now_ms: u64) -> bool {
        match self.response_completed_at_ms {
            Some(completed) => now_ms.saturating_sub(completed) > self.insurance_delay_ms,
            None => false,
        }
    }
}
