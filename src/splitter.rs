use serde::{Deserialize, Serialize};

use crate::constants::{THINK_CLOSE, THINK_OPEN};

/// Projection of an accumulated assistant buffer into reasoning and answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThoughtSplit {
    pub thoughts: String,
    pub answer: String,
    /// An opening marker was seen without its closing marker.
    pub is_thinking_open: bool,
    pub has_open_marker: bool,
    pub has_close_marker: bool,
}

impl ThoughtSplit {
    /// Reasoning finished without an opening marker in the buffer.
    pub fn thinking_ended(&self) -> bool {
        self.has_close_marker && !self.has_open_marker
    }
}

/// Splits the full buffer. Recomputed from scratch on every chunk; only the
/// first marker pair counts, later markers stay in the answer verbatim.
pub fn split_thought_and_answer(buffer: &str) -> ThoughtSplit {
    let has_close_marker = buffer.contains(THINK_CLOSE);

    let Some(open) = buffer.find(THINK_OPEN) else {
        return ThoughtSplit {
            answer: buffer.to_string(),
            has_close_marker,
            ..ThoughtSplit::default()
        };
    };

    let before = &buffer[..open];
    let after_open = &buffer[open + THINK_OPEN.len()..];

    match after_open.find(THINK_CLOSE) {
        Some(close) => ThoughtSplit {
            thoughts: after_open[..close].to_string(),
            answer: format!("{}{}", before, &after_open[close + THINK_CLOSE.len()..]),
            is_thinking_open: false,
            has_open_marker: true,
            has_close_marker,
        },
        None => ThoughtSplit {
            thoughts: after_open.to_string(),
            answer: before.to_string(),
            is_thinking_open: true,
            has_open_marker: true,
            has_close_marker,
        },
    }
}

/// Length of a trailing fragment that could still grow into a marker
/// (`"<thi"`), so incremental renderers can hold it back.
pub fn pending_marker_len(text: &str) -> usize {
    let mut longest = 0;
    for marker in [THINK_OPEN, THINK_CLOSE] {
        for n in 1..marker.len() {
            if text.ends_with(&marker[..n]) {
                longest = longest.max(n);
            }
        }
    }
    longest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_all_answer() {
        let split = split_thought_and_answer("hello");
        assert_eq!(split.answer, "hello");
        assert_eq!(split.thoughts, "");
        assert!(!split.is_thinking_open);
        assert!(!split.has_open_marker);
    }

    #[test]
    fn open_marker_starts_thinking() {
        let split = split_thought_and_answer("hello <think>reasoning");
        assert_eq!(split.answer, "hello ");
        assert_eq!(split.thoughts, "reasoning");
        assert!(split.is_thinking_open);
        assert!(split.has_open_marker);
        assert!(!split.has_close_marker);
    }

    #[test]
    fn closed_pair_is_cut_out_of_the_answer() {
        let split = split_thought_and_answer("hello <think>reasoning</think> world");
        assert_eq!(split.answer, "hello  world");
        assert_eq!(split.thoughts, "reasoning");
        assert!(!split.is_thinking_open);
        assert!(split.has_open_marker && split.has_close_marker);
        assert!(!split.thinking_ended());
    }

    #[test]
    fn only_first_pair_is_honoured() {
        let split = split_thought_and_answer("<think>a</think>b<think>c</think>");
        assert_eq!(split.thoughts, "a");
        assert_eq!(split.answer, "b<think>c</think>");
    }

    #[test]
    fn close_before_open_does_not_end_thinking() {
        let split = split_thought_and_answer("x</think>y<think>z");
        assert_eq!(split.answer, "x</think>y");
        assert_eq!(split.thoughts, "z");
        assert!(split.is_thinking_open);
    }

    #[test]
    fn lone_close_marker_is_literal_answer() {
        let split = split_thought_and_answer("reasoning</think>answer");
        assert_eq!(split.answer, "reasoning</think>answer");
        assert!(split.thinking_ended());
    }

    #[test]
    fn recompute_over_growing_buffer_converges() {
        let chunks = ["<thi", "nk>plan", "ning</th", "ink>Done."];
        let mut buffer = String::new();
        let mut last = ThoughtSplit::default();
        for chunk in chunks {
            buffer.push_str(chunk);
            last = split_thought_and_answer(&buffer);
        }
        assert_eq!(last.thoughts, "planning");
        assert_eq!(last.answer, "Done.");
    }

    #[test]
    fn pending_marker_fragments_are_detected() {
        assert_eq!(pending_marker_len("hello <thi"), 4);
        assert_eq!(pending_marker_len("thoughts </"), 2);
        assert_eq!(pending_marker_len("hello <"), 1);
        assert_eq!(pending_marker_len("hello"), 0);
        assert_eq!(pending_marker_len("done <think>"), 0);
    }
}
