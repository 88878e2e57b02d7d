//! Tunables for every component, collected in one place the way the teacher
//! collects adapter/runtime settings in `VoiceConfig`/`VoiceSettings`. Unlike
//! the teacher, nothing here is read from disk — the engine has no
//! persisted state of its own (spec non-goal), so construction is always
//! `EngineConfig::default()` followed by whatever overrides the embedding
//! application supplies.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// C8: how long a deferred-priority operation waits before execution.
    pub deferred_wait_ms: u64,
    /// C8: hard ceiling on deferred wait regardless of queue pressure.
    pub max_deferred_wait_ms: u64,
    /// C8: window over which immediate operations are aggregated before
    /// being flushed as a batch.
    pub aggregation_window_ms: u64,
    /// C8: operations queued per priority lane before new submissions are
    /// rejected.
    pub max_queue_size: usize,
    /// C8: how long a caller waits to acquire the channel's internal lock
    /// before giving up.
    pub lock_timeout_sec: u64,
    /// C8: execution retry budget for retryable errors.
    pub max_retries: u32,
    /// C8: base delay for the retry backoff, doubled on each attempt.
    pub initial_retry_delay_ms: u64,
    /// C7: how long the recognizer waits for an ASR/LLM round trip.
    pub recognition_timeout_sec: u64,

    /// C2: punctuation that ends a sentence outright.
    pub sentence_delimiters: Vec<char>,
    /// C2: punctuation that may end a sentence if the fragment is long
    /// enough (see `min_sentence_length`).
    pub comma_delimiters: Vec<char>,
    /// C2: fragments shorter than this are held and merged into the next
    /// flush rather than emitted standalone.
    pub min_sentence_length: usize,
    /// C2: buffer is force-flushed if it grows past this without a
    /// delimiter, so a delimiter-free utterance is never withheld forever.
    pub max_buffer_length: usize,
    /// C14: how long the sentence aggregator waits after an ASR final
    /// before flushing the aggregated utterance, once VAD already reports
    /// silence.
    pub sentence_aggregation_delay_ms: u64,
    /// C14: shortened aggregator delay used once VAD reports silence
    /// *after* a final has already arrived, tightening an in-flight wait.
    pub sentence_continuation_delay_ms: u64,

    /// C4: sentences queued for playback before new ones are dropped.
    pub max_tts_queue_size: usize,

    /// C3: minimum sample amplitude treated as user speech during barge-in
    /// detection.
    pub barge_in_amplitude_threshold: i32,
    /// C3: consecutive over-threshold frames required before a barge-in is
    /// declared (debounce against transient noise).
    pub barge_in_frame_threshold: u32,
    /// C3: whether the echo-similarity layer is active at all (Open
    /// Question: kept, default on).
    pub echo_filter_enabled: bool,
    /// C3: Jaccard-trigram similarity above which TTS output echoed back
    /// through the mic is discarded rather than treated as a new utterance.
    pub echo_similarity_threshold: f64,

    /// C11: results held before the oldest is evicted.
    pub result_buffer_max_capacity: usize,
    /// C11: a buffered result not yet delivered is expired after this long.
    pub result_buffer_expiration_sec: u64,
    /// C11: how often the expiration sweep runs.
    pub result_buffer_cleanup_sec: u64,

    /// C13: user silence before a proactive nudge is considered.
    pub proactive_silence_timeout_ms: u64,
    /// C13: nudges allowed in a single idle stretch before giving up.
    pub max_proactive_count: u32,
    /// C13: absolute silence ceiling after which the conversation is
    /// considered abandoned regardless of nudge count.
    pub max_total_silence_ms: u64,

    /// C12: grace period after a response finishes speaking during which a
    /// just-arrived execution result is still considered "for this turn"
    /// rather than a stray late arrival.
    pub insurance_delay_ms: u64,
    /// C1/C6: silence duration that marks a response as no longer pending
    /// playback acknowledgement.
    pub silence_threshold_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            deferred_wait_ms: 2500,
            max_deferred_wait_ms: 10_000,
            aggregation_window_ms: 2500,
            max_queue_size: 10,
            lock_timeout_sec: 30,
            max_retries: 3,
            initial_retry_delay_ms: 100,
            recognition_timeout_sec: 5,

            sentence_delimiters: vec!['。', '！', '？', '.', '!', '?'],
            comma_delimiters: vec!['，', ','],
            min_sentence_length: 5,
            max_buffer_length: 200,
            sentence_aggregation_delay_ms: 500,
            sentence_continuation_delay_ms: 300,

            max_tts_queue_size: 10,

            barge_in_amplitude_threshold: 5000,
            barge_in_frame_threshold: 3,
            echo_filter_enabled: true,
            echo_similarity_threshold: 0.8,

            result_buffer_max_capacity: 10,
            result_buffer_expiration_sec: 30,
            result_buffer_cleanup_sec: 10,

            proactive_silence_timeout_ms: 5000,
            max_proactive_count: 3,
            max_total_silence_ms: 30_000,

            insurance_delay_ms: 2500,
            silence_threshold_ms: 5000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_literals() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.deferred_wait_ms, 2500);
        assert_eq!(cfg.max_deferred_wait_ms, 10_000);
        assert_eq!(cfg.max_queue_size, 10);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.max_proactive_count, 3);
        assert!(cfg.echo_filter_enabled);
        assert!((cfg.echo_similarity_threshold - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_queue_size, cfg.max_queue_size);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"max_retries": 7}"#).unwrap();
        assert_eq!(cfg.max_retries, 7);
        assert_eq!(cfg.deferred_wait_ms, 2500);
    }
}
