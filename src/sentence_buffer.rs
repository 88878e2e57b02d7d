//! C2 — SentenceBuffer. Splits streaming LLM chunks into speakable
//! sentences (spec §4.2). Grounded on the teacher's
//! `src-tauri/src/voice/tts/phrase_split.rs` — same problem (turn streaming
//! text into TTS-sized units, merge short fragments) solved for a fixed
//! English-punctuation alphabet; this generalizes it to the spec's two
//! delimiter classes (hard sentence-enders vs. comma-class soft cuts) and
//! explicit min/max length rules instead of `phrase_split`'s fixed
//! constants.

use crate::config::EngineConfig;

/// Accumulates streamed text and yields complete sentences as they become
/// available. One instance is owned per in-flight response (spec §3:
/// OutputPipeline exclusively owns the current SentenceBuffer).
pub struct SentenceBuffer {
    buffer: String,
    sentence_delimiters: Vec<char>,
    comma_delimiters: Vec<char>,
    min_sentence_length: usize,
    max_buffer_length: usize,
}

impl SentenceBuffer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            buffer: String::new(),
            sentence_delimiters: config.sentence_delimiters.clone(),
            comma_delimiters: config.comma_delimiters.clone(),
            min_sentence_length: config.min_sentence_length,
            max_buffer_length: config.max_buffer_length,
        }
    }

    /// Appends `chunk` and extracts every complete sentence it can now
    /// produce. Order is preserved; an empty return means the chunk wasn't
    /// enough to complete a sentence yet.
    pub fn add_chunk(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut sentences = Vec::new();
        while let Some(sentence) = self.extract_one() {
            sentences.push(sentence);
        }
        sentences
    }

    /// Drains whatever residue remains as a single final sentence (spec
    /// §4.2 `flush()`). Returns `None` if the buffer is empty.
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.buffer).trim().to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Extracts the earliest complete sentence, if any, using the
    /// delimiter-scan + force-cut rules of spec §4.2. Called repeatedly by
    /// `add_chunk` since one chunk may complete several sentences at once.
    fn extract_one(&mut self) -> Option<String> {
        let chars: Vec<char> = self.buffer.chars().collect();

        // Primary rule: earliest prefix ending in a hard sentence delimiter
        // whose length meets the minimum.
        for (i, &c) in chars.iter().enumerate() {
            if self.sentence_delimiters.contains(&c) && i + 1 >= self.min_sentence_length {
                return Some(self.cut_at_char_index(&chars, i + 1));
            }
        }

        if chars.len() <= self.max_buffer_length {
            return None;
        }

        // Over-length with no sentence delimiter: force-cut at the last
        // comma-class delimiter past the minimum length, or at the buffer
        // midpoint if no comma is available either.
        let comma_cut = chars
            .iter()
            .enumerate()
            .rev()
            .find(|(i, c)| self.comma_delimiters.contains(c) && *i + 1 >= self.min_sentence_length)
            .map(|(i, _)| i + 1);

        let cut_at = comma_cut.unwrap_or_else(|| (self.max_buffer_length / 2).max(1));
        Some(self.cut_at_char_index(&chars, cut_at))
    }

    fn cut_at_char_index(&mut self, chars: &[char], cut_at: usize) -> String {
        let sentence: String = chars[..cut_at].iter().collect();
        let rest: String = chars[cut_at..].iter().collect();
        self.buffer = rest;
        sentence.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig {
            min_sentence_length: 3,
            max_buffer_length: 20,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn emits_a_sentence_once_a_delimiter_arrives() {
        let mut buf = SentenceBuffer::new(&config());
        assert!(buf.add_chunk("今天天气").is_empty());
        let sentences = buf.add_chunk("不错。明天");
        assert_eq!(sentences, vec!["今天天气不错。"]);
        assert_eq!(buf.flush(), Some("明天".to_string()));
    }

    #[test]
    fn short_fragment_below_minimum_is_held() {
        let mut buf = SentenceBuffer::new(&config());
        // "a!" is below min_sentence_length (3) so it must not emit yet.
        assert!(buf.add_chunk("a!").is_empty());
        assert_eq!(buf.flush(), Some("a!".to_string()));
    }

    #[test]
    fn over_length_without_delimiter_force_cuts_on_comma() {
        let mut buf = SentenceBuffer::new(&config());
        // 22 chars, no sentence delimiter, one comma past the minimum.
        let sentences = buf.add_chunk("零一二三四五，六七八九十一二三四五六七八九");
        assert_eq!(sentences.len(), 1);
        assert!(sentences[0].ends_with('，'));
        assert!(!buf.is_empty());
    }

    #[test]
    fn over_length_without_any_delimiter_cuts_at_midpoint() {
        let mut buf = SentenceBuffer::new(&config());
        let sentences = buf.add_chunk("1234567890123456789012345");
        assert_eq!(sentences.len(), 1);
        assert_eq!(sentences[0].chars().count(), config().max_buffer_length / 2);
    }

    #[test]
    fn flush_on_empty_buffer_returns_none() {
        let mut buf = SentenceBuffer::new(&config());
        assert_eq!(buf.flush(), None);
    }

    #[test]
    fn round_trip_preserves_content_modulo_whitespace() {
        let mut buf = SentenceBuffer::new(&config());
        let mut emitted = Vec::new();
        for chunk in ["今天", "天气不错。", "明天也会很好。", "后天呢"] {
            emitted.extend(buf.add_chunk(chunk));
        }
        if let Some(rest) = buf.flush() {
            emitted.push(rest);
        }
        let joined: String = emitted.concat();
        assert_eq!(joined, "今天天气不错。明天也会很好。后天呢");
    }
}
