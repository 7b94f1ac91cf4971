//! Sentence Splitter
//!
//! Finds segment boundaries in generated text. ASCII terminators only count
//! when followed by whitespace (so "3.14" or "e.g." mid-word stay intact);
//! full-width terminators and newlines split immediately. Optional split
//! characters (commas and the like) only apply once the pending segment has
//! grown past `max_length_before_optional_split` characters.

use crate::config::PipelineConfig;

/// Boundary finder for streamed text
#[derive(Clone, Debug)]
pub struct SentenceSplitter {
    split_chars: Vec<char>,
    optional_split_chars: Vec<char>,
    max_length_before_optional_split: usize,
}

impl SentenceSplitter {
    /// Create a splitter
    #[must_use]
    pub fn new(
        split_chars: Vec<char>,
        optional_split_chars: Vec<char>,
        max_length_before_optional_split: usize,
    ) -> Self {
        Self {
            split_chars,
            optional_split_chars,
            max_length_before_optional_split,
        }
    }

    /// Create a splitter from pipeline settings
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.split_chars.clone(),
            config.optional_split_chars.clone(),
            config.max_length_before_optional_split,
        )
    }

    /// Byte offset just past the first complete segment in `text`
    ///
    /// An ASCII terminator at the very end of `text` is undecided until more
    /// text arrives; pass `at_end = true` once the stream is done to accept it.
    #[must_use]
    pub fn next_boundary(&self, text: &str, at_end: bool) -> Option<usize> {
        let mut chars = text.char_indices().peekable();
        let mut seen = 0_usize;

        while let Some((i, c)) = chars.next() {
            seen += 1;
            let end = i + c.len_utf8();

            if c == '\n' {
                return Some(end);
            }

            let optional = seen >= self.max_length_before_optional_split
                && self.optional_split_chars.contains(&c);
            if !(self.split_chars.contains(&c) || optional) {
                continue;
            }

            if !c.is_ascii() {
                return Some(end);
            }
            match chars.peek() {
                Some((_, next)) if next.is_whitespace() => return Some(end),
                Some(_) => {}
                None if at_end => return Some(end),
                None => return None,
            }
        }
        None
    }

    /// Split every complete segment off `text`
    ///
    /// Returns the trimmed, non-empty segments and the number of bytes
    /// consumed. Whatever follows the consumed prefix is still pending.
    #[must_use]
    pub fn split(&self, text: &str, at_end: bool) -> (Vec<String>, usize) {
        let mut segments = Vec::new();
        let mut consumed = 0;

        while let Some(len) = self.next_boundary(&text[consumed..], at_end) {
            let segment = text[consumed..consumed + len].trim();
            if !segment.is_empty() {
                segments.push(segment.to_string());
            }
            consumed += len;
        }
        (segments, consumed)
    }
}

impl Default for SentenceSplitter {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}
