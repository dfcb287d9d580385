//! Splits a streamed model response into reasoning and final output.
//!
//! Upstream output interleaves control markers (`<|channel|>analysis`,
//! `<|message|>`, `<|end|>`, ...) with content. Everything before the first
//! `<|channel|>final` is reasoning, everything from it on is the answer.
//! The full buffer is re-parsed on every chunk, so a marker split across two
//! chunks is handled the same as one delivered whole.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Marker that opens the final-answer segment
pub const FINAL_MARKER: &str = "<|channel|>final";

/// `<|start|>` plus the role header that follows it
static START_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<\|start\|>(?:(?:assistant|system|user|developer)\b)?").expect("valid regex")
});

/// `<|channel|>` plus a known channel name
static CHANNEL_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<\|channel\|>(?:(?:analysis|commentary|final)\b)?").expect("valid regex")
});

/// Any other `<|...|>` token
static GENERIC_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<\|.*?\|>").expect("valid regex"));

/// A marker still being streamed at the end of the buffer
static PARTIAL_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\|[A-Za-z_]*\|?$").expect("valid regex"));

/// Which segment of the stream is being produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Reasoning,
    Output,
}

/// Remove control markers and surrounding whitespace
pub fn clean_control_markers(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = START_MARKER.replace_all(&current, "");
        let next = CHANNEL_MARKER.replace_all(&next, "");
        let next = GENERIC_MARKER.replace_all(&next, "").into_owned();
        // Removing one marker can join the halves of another
        if next == current {
            break;
        }
        current = next;
    }
    let current = PARTIAL_MARKER.replace(&current, "");
    current.trim().to_string()
}

/// Result of parsing an accumulated buffer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parsed {
    pub phase: Phase,
    pub reasoning_text: String,
    pub output_text: String,
}

/// Derive phase and both text segments from the complete raw buffer
pub fn parse(raw: &str) -> Parsed {
    if raw.is_empty() {
        return Parsed::default();
    }
    match raw.find(FINAL_MARKER) {
        None => Parsed {
            phase: Phase::Reasoning,
            reasoning_text: clean_control_markers(raw),
            output_text: String::new(),
        },
        Some(i) => Parsed {
            phase: Phase::Output,
            reasoning_text: clean_control_markers(&raw[..i]),
            output_text: clean_control_markers(&raw[i..]),
        },
    }
}

/// Accumulates stream chunks for one generation request
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    raw: String,
    parsed: Parsed,
    finished: bool,
}

impl StreamAccumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and re-derive both segments
    pub fn push(&mut self, chunk: &str) {
        if self.finished {
            return;
        }
        self.raw.push_str(chunk);
        self.parsed = parse(&self.raw);
    }

    /// Mark the stream complete. A server-computed output replaces the local
    /// one.
    pub fn finish(&mut self, server_output: Option<String>) {
        if let Some(output) = server_output {
            self.parsed.output_text = output;
        }
        self.parsed.phase = Phase::Idle;
        self.finished = true;
    }

    pub fn phase(&self) -> Phase {
        self.parsed.phase
    }

    pub fn reasoning_text(&self) -> &str {
        &self.parsed.reasoning_text
    }

    pub fn output_text(&self) -> &str {
        &self.parsed.output_text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(chunks: &[&str]) -> StreamAccumulator {
        let mut acc = StreamAccumulator::new();
        for chunk in chunks {
            acc.push(chunk);
        }
        acc
    }

    fn has_marker(text: &str) -> bool {
        match text.find("<|") {
            Some(i) => text[i + 2..].contains("|>"),
            None => false,
        }
    }

    #[test]
    fn test_answer_after_final_channel() {
        let acc = feed(&[
            "Thinking about it",
            "<|channel|>final",
            "<|message|>The answer is 42",
            "<|end|>",
        ]);
        assert_eq!(acc.phase(), Phase::Output);
        assert_eq!(acc.reasoning_text(), "Thinking about it");
        assert_eq!(acc.output_text(), "The answer is 42");
    }

    #[test]
    fn test_reasoning_only_until_marker() {
        let acc = feed(&["<|channel|>analysis<|message|>Let me ", "look at this"]);
        assert_eq!(acc.phase(), Phase::Reasoning);
        assert_eq!(acc.reasoning_text(), "Let me look at this");
        assert_eq!(acc.output_text(), "");
    }

    #[test]
    fn test_empty_accumulator_is_idle() {
        let acc = StreamAccumulator::new();
        assert_eq!(acc.phase(), Phase::Idle);
        assert_eq!(parse(""), Parsed::default());
    }

    #[test]
    fn test_split_marker_matches_whole_delivery() {
        let whole = feed(&["Hmm...<|channel|>final<|message|>Done."]);
        let split = feed(&["Hmm...<|chan", "nel|>final<|message|>Done."]);
        let split_late = feed(&["Hmm...<|channel|>fi", "nal<|mess", "age|>Done."]);

        for acc in [&split, &split_late] {
            assert_eq!(acc.phase(), whole.phase());
            assert_eq!(acc.reasoning_text(), whole.reasoning_text());
            assert_eq!(acc.output_text(), whole.output_text());
        }
        assert_eq!(whole.reasoning_text(), "Hmm...");
        assert_eq!(whole.output_text(), "Done.");
    }

    #[test]
    fn test_partial_marker_is_withheld() {
        let acc = feed(&["Thinking about it<|chan"]);
        assert_eq!(acc.phase(), Phase::Reasoning);
        assert_eq!(acc.reasoning_text(), "Thinking about it");
    }

    #[test]
    fn test_parse_is_idempotent() {
        let raw = "<|start|>assistant<|channel|>analysis<|message|>Plan<|end|>\
                   <|start|>assistant<|channel|>final<|message|>Answer<|return|>";
        let first = parse(raw);
        let second = parse(raw);
        assert_eq!(first, second);
        assert_eq!(first.reasoning_text, "Plan");
        assert_eq!(first.output_text, "Answer");
    }

    #[test]
    fn test_generic_markers_stripped() {
        let cleaned = clean_control_markers("a<|constrain|>b<|call|>c<|x y|>d");
        assert_eq!(cleaned, "abcd");
    }

    #[test]
    fn test_role_and_channel_names_need_word_boundary() {
        assert_eq!(
            clean_control_markers("<|start|>assistant<|message|>hi"),
            "hi"
        );
        assert_eq!(
            clean_control_markers("<|start|>users are happy"),
            "users are happy"
        );
        assert_eq!(
            clean_control_markers("<|channel|>analysis<|message|>x"),
            "x"
        );
        assert_eq!(
            clean_control_markers("<|channel|>analysisParalysis"),
            "analysisParalysis"
        );
        assert_eq!(clean_control_markers("a<|start|>b"), "ab");
    }

    #[test]
    fn test_nested_markers_fully_stripped() {
        let cleaned = clean_control_markers("before <<|end|>|channel|> after");
        assert!(!has_marker(&cleaned), "got: {}", cleaned);
        assert_eq!(cleaned, "before  after");
    }

    #[test]
    fn test_no_output_contains_markers() {
        let samples = [
            "<|channel|>commentary<|message|>x<|end|><|channel|>final<|message|>y<|end|>",
            "<|start|>user<|message|>q<|end|>",
            "text <|weird|marker|> more",
            "multi\nline <|to\nken|> ok",
        ];
        for raw in samples {
            let parsed = parse(raw);
            assert!(!has_marker(&parsed.reasoning_text), "{}", parsed.reasoning_text);
            assert!(!has_marker(&parsed.output_text), "{}", parsed.output_text);
        }
    }

    #[test]
    fn test_finish_prefers_server_output() {
        let mut acc = feed(&["x<|channel|>final<|message|>local answer"]);
        acc.finish(Some("server answer".into()));
        assert_eq!(acc.phase(), Phase::Idle);
        assert_eq!(acc.output_text(), "server answer");
        assert_eq!(acc.reasoning_text(), "x");
    }

    #[test]
    fn test_finish_without_server_output_keeps_local() {
        let mut acc = feed(&["x<|channel|>final<|message|>local answer"]);
        acc.finish(None);
        assert_eq!(acc.phase(), Phase::Idle);
        assert_eq!(acc.output_text(), "local answer");

        acc.push("ignored");
        assert_eq!(acc.output_text(), "local answer");
        assert_eq!(acc.phase(), Phase::Idle);
    }
}
