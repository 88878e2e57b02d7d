//! C12 — TimingJudge. A pure function of dialogue state deciding when
//! buffered results may be voiced to the user (spec §4.12). New code — no
//! pack repo has a decision-table precedent — but tested the way the
//! teacher tests `audio/state.rs`'s `test_state_roundtrip`: one case per
//! table row.

use crate::result::ResultPriority;

/// Patterns the user says when explicitly checking whether a pending
/// operation landed (spec §8 scenario 4).
const ASK_RESULT_PATTERNS: &[&str] = &["记好了吗", "好了吗", "搞定了吗", "记上了吗", "弄好了吗"];

/// Everything C12 needs to decide whether a buffered result still belongs
/// to "now" (spec §3). Deliberately plain data — no hidden state reads, so
/// the judge stays a pure function of its input (spec §8 law).
#[derive(Debug, Clone)]
pub struct TimingContext {
    pub user_input: Option<String>,
    pub is_user_speaking: bool,
    pub silence_duration_ms: u64,
    pub is_negative_emotion: bool,
    pub is_in_chat: bool,
    pub last_round_was_operation: bool,
    pub pending_result_count: usize,
    pub highest_priority: Option<ResultPriority>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingVerdict {
    Immediate,
    Natural,
    OnIdle,
    OnTopicShift,
    Defer,
    Suppress,
}

/// Decides when (if ever) pending results may be voiced. Top matching row
/// of spec §4.12's table wins.
pub fn judge(ctx: &TimingContext, silence_threshold_ms: u64) -> TimingVerdict {
    if ctx.pending_result_count == 0 {
        return TimingVerdict::Suppress;
    }
    if ctx.is_user_speaking {
        return TimingVerdict::Defer;
    }
    if ctx.user_input.as_deref().map(asks_about_result).unwrap_or(false) {
        return TimingVerdict::Immediate;
    }
    if ctx.is_negative_emotion {
        return TimingVerdict::Defer;
    }
    if ctx.is_in_chat && ctx.highest_priority != Some(ResultPriority::Critical) {
        return TimingVerdict::Defer;
    }
    if ctx.silence_duration_ms >= silence_threshold_ms {
        return TimingVerdict::OnIdle;
    }
    if ctx.last_round_was_operation {
        return TimingVerdict::Natural;
    }
    if ctx.highest_priority == Some(ResultPriority::Critical) {
        return TimingVerdict::OnIdle;
    }
    TimingVerdict::Defer
}

fn asks_about_result(input: &str) -> bool {
    ASK_RESULT_PATTERNS.iter().any(|pattern| input.contains(pattern))
}

/// A single pending result plus enough of its shape to phrase a
/// notification (spec §4.12 `generateNotification`).
pub struct NotifiableResult {
    pub description: String,
    pub amount: Option<f64>,
}

/// Formats a spoken notification for one or more buffered results,
/// prepending a style-appropriate lead-in based on the verdict (spec
/// §4.12).
pub fn generate_notification(results: &[NotifiableResult], verdict: TimingVerdict) -> String {
    let lead_in = match verdict {
        TimingVerdict::Immediate => "",
        TimingVerdict::Natural => "另外，",
        TimingVerdict::OnTopicShift => "对了，",
        _ => "刚才的",
    };

    if results.len() == 1 {
        format!("{lead_in}{}已经记好了", results[0].description)
    } else {
        let names: Vec<&str> = results.iter().map(|r| r.description.as_str()).collect();
        format!("{lead_in}{}都已经记好了", names.join("、"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_ctx() -> TimingContext {
        TimingContext {
            user_input: None,
            is_user_speaking: false,
            silence_duration_ms: 0,
            is_negative_emotion: false,
            is_in_chat: false,
            last_round_was_operation: false,
            pending_result_count: 1,
            highest_priority: Some(ResultPriority::Normal),
        }
    }

    #[test]
    fn no_pending_results_suppresses() {
        let mut ctx = base_ctx();
        ctx.pending_result_count = 0;
        assert_eq!(judge(&ctx, 5000), TimingVerdict::Suppress);
    }

    #[test]
    fn user_speaking_defers() {
        let mut ctx = base_ctx();
        ctx.is_user_speaking = true;
        assert_eq!(judge(&ctx, 5000), TimingVerdict::Defer);
    }

    #[test]
    fn explicit_ask_is_immediate_even_while_in_chat() {
        let mut ctx = base_ctx();
        ctx.user_input = Some("记好了吗".to_string());
        ctx.is_in_chat = true;
        assert_eq!(judge(&ctx, 5000), TimingVerdict::Immediate);
    }

    #[test]
    fn negative_emotion_defers() {
        let mut ctx = base_ctx();
        ctx.is_negative_emotion = true;
        assert_eq!(judge(&ctx, 5000), TimingVerdict::Defer);
    }

    #[test]
    fn in_chat_with_non_critical_result_defers() {
        let mut ctx = base_ctx();
        ctx.is_in_chat = true;
        assert_eq!(judge(&ctx, 5000), TimingVerdict::Defer);
    }

    #[test]
    fn in_chat_with_critical_result_does_not_defer_on_that_rule() {
        let mut ctx = base_ctx();
        ctx.is_in_chat = true;
        ctx.highest_priority = Some(ResultPriority::Critical);
        // Falls through past the chat rule; highest_priority==critical rule
        // further down still applies since silence/last_round don't match.
        assert_eq!(judge(&ctx, 5000), TimingVerdict::OnIdle);
    }

    #[test]
    fn long_silence_voices_on_idle() {
        let mut ctx = base_ctx();
        ctx.silence_duration_ms = 6000;
        assert_eq!(judge(&ctx, 5000), TimingVerdict::OnIdle);
    }

    #[test]
    fn last_round_operation_is_natural() {
        let mut ctx = base_ctx();
        ctx.last_round_was_operation = true;
        assert_eq!(judge(&ctx, 5000), TimingVerdict::Natural);
    }

    #[test]
    fn critical_priority_falls_to_on_idle_by_default() {
        let mut ctx = base_ctx();
        ctx.highest_priority = Some(ResultPriority::Critical);
        assert_eq!(judge(&ctx, 5000), TimingVerdict::OnIdle);
    }

    #[test]
    fn otherwise_defers() {
        let ctx = base_ctx();
        assert_eq!(judge(&ctx, 5000), TimingVerdict::Defer);
    }

    #[test]
    fn notification_text_for_single_result_has_no_prefix_when_immediate() {
        let results = vec![NotifiableResult { description: "打车35元".to_string(), amount: Some(35.0) }];
        assert_eq!(generate_notification(&results, TimingVerdict::Immediate), "打车35元已经记好了");
    }

    #[test]
    fn notification_text_for_multiple_results_joins_with_dunhao() {
        let results = vec![
            NotifiableResult { description: "打车35元".to_string(), amount: Some(35.0) },
            NotifiableResult { description: "吃饭50元".to_string(), amount: Some(50.0) },
        ];
        let text = generate_notification(&results, TimingVerdict::Natural);
        assert!(text.starts_with("另外，"));
        assert!(text.contains("打车35元"));
        assert!(text.contains("吃饭50元"));
    }
}
