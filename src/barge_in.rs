//! C3 — BargeInDetector / EchoFilter. Three-layer decision over whether a
//! partial/final ASR result (or a burst of loud audio) is a genuine user
//! interruption of the currently-speaking TTS (spec §4.3). Grounded on the
//! teacher's `voice-core/src/vad/energy.rs` (amplitude-threshold fallback
//! detection) composed with a small Jaccard-over-char-trigrams similarity
//! helper — no pack repo needed text similarity, so this is new code
//! written to satisfy "text similarity to a trailing window" as plainly as
//! possible.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::config::EngineConfig;

/// Which of the three layers (spec §4.3) produced a barge-in verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BargeInLayer {
    /// VAD reported speech and the ASR partial survived the echo filter.
    VadAsr,
    /// Forced by sustained high-amplitude audio regardless of ASR (layer 3,
    /// driven by C14).
    Amplitude,
}

#[derive(Debug, Clone)]
pub struct BargeInResult {
    pub layer: BargeInLayer,
    pub text: String,
    pub similarity: Option<f64>,
}

struct State {
    tts_playing: bool,
    current_tts_text: String,
    vad_speaking: bool,
    consecutive_loud_frames: u32,
}

/// Synthetic text attached to an amplitude-triggered barge-in (spec §8
/// scenario 5), since no ASR transcript exists for it.
pub const AMPLITUDE_BARGE_IN_TEXT: &str = "[振幅打断]";

pub struct BargeInDetector {
    state: Mutex<State>,
    echo_filter_enabled: bool,
    echo_similarity_threshold: f64,
    amplitude_threshold: i32,
    frame_threshold: u32,
}

impl BargeInDetector {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            state: Mutex::new(State {
                tts_playing: false,
                current_tts_text: String::new(),
                vad_speaking: false,
                consecutive_loud_frames: 0,
            }),
            echo_filter_enabled: config.echo_filter_enabled,
            echo_similarity_threshold: config.echo_similarity_threshold,
            amplitude_threshold: config.barge_in_amplitude_threshold,
            frame_threshold: config.barge_in_frame_threshold,
        }
    }

    pub fn set_tts_playing(&self, playing: bool, current_text: &str) {
        let mut state = self.state.lock().unwrap();
        state.tts_playing = playing;
        state.current_tts_text = current_text.to_string();
        if !playing {
            state.consecutive_loud_frames = 0;
        }
    }

    pub fn set_vad_speaking(&self, speaking: bool) {
        self.state.lock().unwrap().vad_speaking = speaking;
    }

    /// Layer 1 (VAD gate) + layer 2 (echo suppression). A partial ASR
    /// result is only even a candidate while TTS is playing and VAD has
    /// reported speech; candidates that look like TTS echoed back through
    /// the mic are suppressed.
    pub fn evaluate_asr_result(&self, text: &str) -> Option<BargeInResult> {
        if text.trim().is_empty() {
            return None;
        }
        let state = self.state.lock().unwrap();
        if !state.tts_playing || !state.vad_speaking {
            return None;
        }

        if self.echo_filter_enabled {
            let similarity = trailing_window_similarity(text, &state.current_tts_text);
            if similarity > self.echo_similarity_threshold {
                return None;
            }
            return Some(BargeInResult {
                layer: BargeInLayer::VadAsr,
                text: text.to_string(),
                similarity: Some(similarity),
            });
        }

        Some(BargeInResult {
            layer: BargeInLayer::VadAsr,
            text: text.to_string(),
            similarity: None,
        })
    }

    /// Layer 3: sustained high-amplitude audio forces a barge-in regardless
    /// of what ASR/VAD say (spec §4.3, §8 scenario 5). Call once per audio
    /// frame; `mean_abs` is the frame's mean absolute PCM sample value.
    pub fn evaluate_amplitude_frame(&self, mean_abs: i32) -> Option<BargeInResult> {
        let mut state = self.state.lock().unwrap();
        if !state.tts_playing {
            state.consecutive_loud_frames = 0;
            return None;
        }

        if mean_abs > self.amplitude_threshold {
            state.consecutive_loud_frames += 1;
        } else {
            state.consecutive_loud_frames = 0;
            return None;
        }

        if state.consecutive_loud_frames >= self.frame_threshold {
            state.consecutive_loud_frames = 0;
            return Some(BargeInResult {
                layer: BargeInLayer::Amplitude,
                text: AMPLITUDE_BARGE_IN_TEXT.to_string(),
                similarity: None,
            });
        }
        None
    }
}

/// Trigram-Jaccard similarity between `text` and the trailing window of
/// `tts_text` the same length as `text` (comparing against the whole TTS
/// text would bias toward "different length = different words").
fn trailing_window_similarity(text: &str, tts_text: &str) -> f64 {
    let window = trailing_window(tts_text, text.chars().count());
    jaccard_trigram_similarity(text, &window)
}

fn trailing_window(text: &str, len: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= len {
        return text.to_string();
    }
    chars[chars.len() - len..].iter().collect()
}

fn trigrams(text: &str) -> HashSet<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() < 3 {
        return std::iter::once(chars.iter().collect()).collect();
    }
    chars.windows(3).map(|w| w.iter().collect()).collect()
}

fn jaccard_trigram_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let set_a = trigrams(a);
    let set_b = trigrams(b);
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_candidate_without_tts_playing() {
        let detector = BargeInDetector::new(&EngineConfig::default());
        detector.set_vad_speaking(true);
        assert!(detector.evaluate_asr_result("等一下").is_none());
    }

    #[test]
    fn no_candidate_without_vad_speech() {
        let detector = BargeInDetector::new(&EngineConfig::default());
        detector.set_tts_playing(true, "今天的总支出是五百元");
        assert!(detector.evaluate_asr_result("等一下").is_none());
    }

    #[test]
    fn genuine_interruption_is_reported() {
        let detector = BargeInDetector::new(&EngineConfig::default());
        detector.set_tts_playing(true, "今天的总支出是五百元");
        detector.set_vad_speaking(true);
        let result = detector.evaluate_asr_result("等一下别说了").unwrap();
        assert_eq!(result.layer, BargeInLayer::VadAsr);
    }

    #[test]
    fn echoed_tts_text_is_suppressed() {
        let detector = BargeInDetector::new(&EngineConfig::default());
        detector.set_tts_playing(true, "今天的总支出是五百元整");
        detector.set_vad_speaking(true);
        assert!(detector.evaluate_asr_result("今天的总支出是五百元整").is_none());
    }

    #[test]
    fn echo_filter_can_be_disabled() {
        let mut config = EngineConfig::default();
        config.echo_filter_enabled = false;
        let detector = BargeInDetector::new(&config);
        detector.set_tts_playing(true, "今天的总支出是五百元整");
        detector.set_vad_speaking(true);
        assert!(detector.evaluate_asr_result("今天的总支出是五百元整").is_some());
    }

    #[test]
    fn amplitude_barge_in_requires_consecutive_frames() {
        let detector = BargeInDetector::new(&EngineConfig::default());
        detector.set_tts_playing(true, "");
        assert!(detector.evaluate_amplitude_frame(6000).is_none());
        assert!(detector.evaluate_amplitude_frame(6000).is_none());
        let result = detector.evaluate_amplitude_frame(6000).unwrap();
        assert_eq!(result.layer, BargeInLayer::Amplitude);
        assert_eq!(result.text, AMPLITUDE_BARGE_IN_TEXT);
    }

    #[test]
    fn amplitude_counter_resets_on_quiet_frame() {
        let detector = BargeInDetector::new(&EngineConfig::default());
        detector.set_tts_playing(true, "");
        detector.evaluate_amplitude_frame(6000);
        detector.evaluate_amplitude_frame(100);
        assert!(detector.evaluate_amplitude_frame(6000).is_none());
        assert!(detector.evaluate_amplitude_frame(6000).is_none());
        assert!(detector.evaluate_amplitude_frame(6000).is_some());
    }
}
