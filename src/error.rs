//! Typed error taxonomy and the pluggable error handler.
//!
//! Every fallible path in the engine produces a [`CoreError`] rather than a
//! bare `anyhow::Error` — callers need the `kind`/`severity`/`retryable`
//! fields to decide whether to downgrade (recognition), retry (network,
//! timeout), or simply absorb (callback, state) a failure. `anyhow` is still
//! used at the glue layer (the demo binary, collaborator implementations)
//! where a human-readable chain is all that's needed.

use std::collections::VecDeque;
use std::sync::Mutex;

use thiserror::Error;
use tracing::{error as log_error, warn};

/// Coarse classification of what went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Recognition,
    Execution,
    Callback,
    Timeout,
    Network,
    State,
    Configuration,
    Unknown,
}

/// How seriously the engine should treat a [`CoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    Warning,
    Error,
    Critical,
}

/// A single engine error, carrying enough context for the handler (and any
/// external observer) to decide what to do without re-deriving it from a
/// formatted string.
#[derive(Debug, Error)]
#[error("[{component}] {kind:?}: {message}")]
pub struct CoreError {
    pub component: &'static str,
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    /// Fallback sentence safe to read aloud to the user (spec §7).
    pub user_message: Option<&'static str>,
    /// Only network/timeout errors are retryable.
    pub retryable: bool,
    pub context: Vec<(&'static str, String)>,
    #[source]
    pub cause: Option<anyhow::Error>,
}

impl CoreError {
    pub fn new(component: &'static str, kind: ErrorKind, message: impl Into<String>) -> Self {
        let retryable = matches!(kind, ErrorKind::Network | ErrorKind::Timeout);
        Self {
            component,
            kind,
            severity: ErrorSeverity::Error,
            message: message.into(),
            user_message: default_user_message(kind),
            retryable,
            context: Vec::new(),
            cause: None,
        }
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_cause(mut self, cause: anyhow::Error) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Single-sentence fallback text, never a stack trace (spec §7).
    pub fn user_message(&self) -> &str {
        self.user_message.unwrap_or("抱歉，生成响应时遇到了问题")
    }
}

fn default_user_message(kind: ErrorKind) -> Option<&'static str> {
    match kind {
        ErrorKind::Timeout => Some("操作超时，请重试"),
        ErrorKind::Network => Some("网络连接失败，请检查网络后重试"),
        ErrorKind::Recognition => Some("语音识别遇到问题，请重试"),
        _ => Some("抱歉，生成响应时遇到了问题"),
    }
}

/// Receives every [`CoreError`] raised by the engine. Returning `true` means
/// the error is considered absorbed (no further propagation expected).
pub trait ErrorHandler: Send + Sync {
    fn on_error(&self, error: &CoreError) -> bool;
}

const RING_BUFFER_CAP: usize = 100;

/// Default handler: logs via `tracing` at a level matching severity, and
/// keeps the last 100 errors in a ring buffer for diagnostics. An optional
/// external observer is invoked after logging; if the observer itself
/// panics or the call otherwise fails, that failure is caught and logged
/// rather than propagated (double-fault protection, spec §7).
pub struct DefaultErrorHandler {
    recent: Mutex<VecDeque<String>>,
    observer: Option<Box<dyn Fn(&CoreError) + Send + Sync>>,
}

impl DefaultErrorHandler {
    pub fn new() -> Self {
        Self {
            recent: Mutex::new(VecDeque::with_capacity(RING_BUFFER_CAP)),
            observer: None,
        }
    }

    pub fn with_observer(observer: impl Fn(&CoreError) + Send + Sync + 'static) -> Self {
        Self {
            recent: Mutex::new(VecDeque::with_capacity(RING_BUFFER_CAP)),
            observer: Some(Box::new(observer)),
        }
    }

    /// Snapshot of the most recent errors, newest last.
    pub fn recent_errors(&self) -> Vec<String> {
        self.recent.lock().unwrap().iter().cloned().collect()
    }
}

impl Default for DefaultErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorHandler for DefaultErrorHandler {
    fn on_error(&self, error: &CoreError) -> bool {
        match error.severity {
            ErrorSeverity::Warning => warn!(component = error.component, kind = ?error.kind, "{}", error.message),
            ErrorSeverity::Error | ErrorSeverity::Critical => {
                log_error!(component = error.component, kind = ?error.kind, severity = ?error.severity, "{}", error.message)
            }
        }

        {
            let mut recent = self.recent.lock().unwrap();
            if recent.len() >= RING_BUFFER_CAP {
                recent.pop_front();
            }
            recent.push_back(format!("{error}"));
        }

        if let Some(observer) = &self.observer {
            // A panicking observer must not take the handler down with it —
            // the handler's own contract (§7) forbids a user callback from
            // causing a double fault.
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| observer(error)));
            if result.is_err() {
                log_error!(component = error.component, "error observer panicked");
            }
        }

        true
    }
}
