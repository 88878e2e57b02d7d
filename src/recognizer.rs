//! C7 — MultiOperationRecognizer. Wraps the LLM intent collaborator with a
//! timeout, classifies its output, filters noise operations, and downgrades
//! to a small rule engine on timeout/network failure (spec §4.7). The
//! timeout-wrapped-call-with-fallback shape is grounded on
//! `agalue-sherpa-voice-assistant/rust-impl/src/llm/client.rs` (the pack's
//! only LLM client — the teacher repo has none of its own, its "LLM" being
//! an externally polled inbox service).

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::collaborators::LlmIntentService;
use crate::config::EngineConfig;
use crate::error::{CoreError, ErrorKind};
use crate::operation::{MultiOperationResult, Operation, OperationParams, OperationType, Priority, RecognitionResultType};

/// Leading filler words stripped from chat content (spec §4.7).
const FILLER_PREFIXES: &[&str] = &["顺便", "对了", "还有", "另外", "然后"];

pub struct MultiOperationRecognizer {
    llm: Arc<dyn LlmIntentService>,
    timeout: Duration,
}

impl MultiOperationRecognizer {
    pub fn new(llm: Arc<dyn LlmIntentService>, config: &EngineConfig) -> Self {
        Self {
            llm,
            timeout: Duration::from_secs(config.recognition_timeout_sec),
        }
    }

    pub async fn recognize(&self, utterance: &str) -> MultiOperationResult {
        match tokio::time::timeout(self.timeout, self.llm.recognize(utterance)).await {
            Ok(Ok(result)) => post_process(result),
            Ok(Err(err)) => {
                warn!(error = %err, "llm recognition failed, downgrading to rule engine");
                rule_engine_recognize(utterance)
            }
            Err(_) => {
                warn!("llm recognition timed out, downgrading to rule engine");
                rule_engine_recognize(utterance)
            }
        }
    }
}

/// Filters `unknown`-typed operations and non-positive `addTransaction`
/// amounts, and trims leading filler words from chat content (spec §4.7).
fn post_process(mut result: MultiOperationResult) -> MultiOperationResult {
    result.operations.retain(|op| {
        if op.op_type == OperationType::Unknown {
            return false;
        }
        if op.op_type == OperationType::AddTransaction {
            if let OperationParams::AddTransaction { amount, .. } = &op.params {
                return *amount > 0.0;
            }
        }
        true
    });

    if let Some(content) = result.chat_content.take() {
        let trimmed = strip_filler_prefix(&content);
        result.chat_content = if trimmed.is_empty() { None } else { Some(trimmed) };
    }

    result
}

fn strip_filler_prefix(content: &str) -> String {
    let mut text = content.trim();
    loop {
        let mut stripped = None;
        for prefix in FILLER_PREFIXES {
            if let Some(rest) = text.strip_prefix(prefix) {
                stripped = Some(rest.trim_start_matches(['，', ',']).trim());
                break;
            }
        }
        match stripped {
            Some(rest) => text = rest,
            None => break,
        }
    }
    text.trim().to_string()
}

/// Amount immediately followed by a currency/count word, e.g. "30元" or
/// "35块". This is deliberately simple — the rule engine is a fallback for
/// when the LLM is unavailable, not a full parser.
fn extract_amount(text: &str) -> Option<f64> {
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i].is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let digits: String = chars[start..i].iter().collect();
            if let Ok(amount) = digits.parse::<f64>() {
                return Some(amount);
            }
        } else {
            i += 1;
        }
    }
    None
}

const KNOWN_CATEGORIES: &[&str] = &["餐饮", "打车", "交通", "购物", "娱乐", "住房", "医疗", "其他"];

fn extract_category(text: &str) -> Option<&'static str> {
    KNOWN_CATEGORIES.iter().copied().find(|category| text.contains(category))
}

/// Deterministic fallback recognizer used when the LLM is unreachable or
/// too slow (spec §4.7). Recognizes amount+category patterns; a bare
/// category with no amount yields `clarify` rather than guessing.
fn rule_engine_recognize(utterance: &str) -> MultiOperationResult {
    let amount = extract_amount(utterance);
    let category = extract_category(utterance);

    match (amount, category) {
        (Some(amount), _) if amount > 0.0 => {
            let category = category.unwrap_or("其他").to_string();
            let op = Operation::new(
                OperationType::AddTransaction,
                Priority::Deferred,
                OperationParams::AddTransaction { amount, category, note: None },
            );
            MultiOperationResult {
                result_type: RecognitionResultType::Operations,
                operations: vec![op],
                chat_content: None,
                clarify_question: None,
                confidence: 0.6,
                source: "rule".to_string(),
                original_input: utterance.to_string(),
            }
        }
        (None, Some(category)) => MultiOperationResult {
            result_type: RecognitionResultType::Clarify,
            operations: Vec::new(),
            chat_content: None,
            clarify_question: Some(format!("请说完整的记账指令，比如\"{category}50元\"")),
            confidence: 0.4,
            source: "rule".to_string(),
            original_input: utterance.to_string(),
        },
        _ => MultiOperationResult {
            result_type: RecognitionResultType::Clarify,
            operations: Vec::new(),
            chat_content: None,
            clarify_question: Some("没听清楚，请再说一遍具体的记账内容".to_string()),
            confidence: 0.2,
            source: "rule".to_string(),
            original_input: utterance.to_string(),
        },
    }
}

pub fn timeout_error(message: impl Into<String>) -> CoreError {
    CoreError::new("recognizer", ErrorKind::Timeout, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filler_prefix_is_stripped() {
        assert_eq!(strip_filler_prefix("顺便，今天天气不错"), "今天天气不错");
        assert_eq!(strip_filler_prefix("对了还有明天"), "明天");
    }

    #[test]
    fn filler_only_content_becomes_empty() {
        assert_eq!(strip_filler_prefix("顺便"), "");
    }

    #[test]
    fn rule_engine_recognizes_amount_and_category() {
        let result = rule_engine_recognize("打车35元");
        assert_eq!(result.result_type, RecognitionResultType::Operations);
        assert_eq!(result.operations.len(), 1);
        match &result.operations[0].params {
            OperationParams::AddTransaction { amount, category, .. } => {
                assert_eq!(*amount, 35.0);
                assert_eq!(category, "打车");
            }
            other => panic!("unexpected params: {other:?}"),
        }
    }

    #[test]
    fn bare_category_yields_clarify() {
        let result = rule_engine_recognize("其他");
        assert_eq!(result.result_type, RecognitionResultType::Clarify);
        assert!(result.clarify_question.unwrap().contains("其他"));
    }

    #[test]
    fn unintelligible_input_yields_generic_clarify() {
        let result = rule_engine_recognize("呃呃呃");
        assert_eq!(result.result_type, RecognitionResultType::Clarify);
    }

    #[test]
    fn post_process_drops_non_positive_amounts_and_unknown_ops() {
        let result = MultiOperationResult {
            result_type: RecognitionResultType::Operations,
            operations: vec![
                Operation::new(
                    OperationType::AddTransaction,
                    Priority::Deferred,
                    OperationParams::AddTransaction { amount: -5.0, category: "餐饮".into(), note: None },
                ),
                Operation::new(OperationType::Unknown, Priority::Normal, OperationParams::Unknown { raw: serde_json::json!({}) }),
            ],
            chat_content: Some("顺便，吃饭了吗".to_string()),
            clarify_question: None,
            confidence: 0.9,
            source: "llm".into(),
            original_input: "吃饭-5元".into(),
        };
        let cleaned = post_process(result);
        assert!(cleaned.operations.is_empty());
        assert_eq!(cleaned.chat_content.as_deref(), Some("吃饭了吗"));
    }
}
