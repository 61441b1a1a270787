//! Prompt text for map and synthesis calls.
//!
//! Every prompt ends with a bracketed label line followed by the text the
//! model works on, so the payload is always the tail of the prompt.

use super::plan::Segment;
use crate::api::GenerateError;

/// Separator between segment summaries when a level is reassembled.
pub const SECTION_SEPARATOR: &str = "\n\n";

/// Prompt for summarizing one segment at `level`.
///
/// The overlap, when present, is labelled as context so the model does not
/// summarize it twice.
pub fn segment_prompt(level: u32, segment: &Segment, total: usize, target_tokens: usize) -> String {
    let subject = if level == 0 {
        "section of a longer document"
    } else {
        "group of partial summaries of a longer document"
    };
    let mut prompt = format!(
        "Summarize the following {subject} concisely in about {target_tokens} tokens, \
         preserving key facts, names, numbers, and conclusions.\n\n"
    );
    let overlap = segment.overlap_text().trim();
    if !overlap.is_empty() {
        prompt.push_str("[Preceding context, for continuity only:]\n");
        prompt.push_str(overlap);
        prompt.push_str("\n\n");
    }
    prompt.push_str(&format!("[Section {} of {total}:]\n", segment.index + 1));
    prompt.push_str(segment.core_text().trim());
    prompt
}

/// Prompt for the final synthesis call.
pub fn synthesis_prompt(text: &str, target_tokens: usize) -> String {
    format!(
        "Create one coherent summary of the following text in about {target_tokens} tokens. \
         Focus on main themes, key points, and important conclusions.\n\n\
         [Text:]\n{}",
        text.trim()
    )
}

/// Stand-in for a segment whose summary could not be produced.
pub fn placeholder(index: usize, error: &GenerateError) -> String {
    format!("[Section {} omitted: {} failure]", index + 1, error.kind())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{RunConfig, plan_segments};
    use crate::text::{TokenizedText, WordEstimator};

    #[test]
    fn segment_prompt_ends_with_core_text() {
        let text = (0..30).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let input = TokenizedText::new(text, &WordEstimator);
        let cfg = RunConfig::new(20, 5).with_overlap_tokens(3);
        let segments = plan_segments(&input, &cfg).unwrap();
        let second = &segments[1];

        let prompt = segment_prompt(0, second, segments.len(), 4);
        assert!(prompt.contains("about 4 tokens"));
        assert!(prompt.contains("Preceding context"));
        assert!(prompt.ends_with(second.core_text().trim()));
        assert!(prompt.contains(&format!("[Section 2 of {}:]", segments.len())));
    }

    #[test]
    fn first_segment_has_no_context_block() {
        let input = TokenizedText::new("a b c", &WordEstimator);
        let segments = plan_segments(&input, &RunConfig::new(100, 10).with_overlap_tokens(5)).unwrap();
        let prompt = segment_prompt(1, &segments[0], 1, 2);
        assert!(!prompt.contains("Preceding context"));
        assert!(prompt.contains("partial summaries"));
    }

    #[test]
    fn placeholder_names_section_and_kind() {
        let text = placeholder(2, &GenerateError::Permanent("nope".into()));
        assert_eq!(text, "[Section 3 omitted: permanent failure]");
    }
}
