//! Confidence classification and citation derivation.
//!
//! Pure functions over captured tool outputs. Citations are constructed only
//! from retrieval hits that were actually returned to the generation step;
//! a citation can never exist without a corresponding hit.

use serde::Deserialize;

use crate::models::{Citation, ResponseMode, SelectedTextCitation, SourceCitation};
use crate::retrieval::SearchResult;

pub const SNIPPET_MAX_CHARS: usize = 200;
const ELLIPSIS: &str = "...";

/// Score bands for confidence classification. The defaults match the
/// reference deployment; both are configurable.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ConfidenceThresholds {
    pub high: f32,
    pub low: f32,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            high: 0.5,
            low: 0.3,
        }
    }
}

/// Classifies response confidence and mode from retrieval scores.
///
/// Three-way partition of [0, 1], inclusive on the lower bound of each band:
/// max >= high -> confident full answer; low <= max < high -> low-confidence
/// full answer; max < low -> treat as no results.
pub fn classify(
    tool_results: &[SearchResult],
    thresholds: &ConfidenceThresholds,
) -> (bool, ResponseMode) {
    if tool_results.is_empty() {
        return (false, ResponseMode::NoResults);
    }

    let max_score = tool_results
        .iter()
        .map(|r| r.similarity_score)
        .fold(0.0f32, f32::max);

    if max_score >= thresholds.high {
        (false, ResponseMode::Full)
    } else if max_score >= thresholds.low {
        (true, ResponseMode::Full)
    } else {
        (true, ResponseMode::NoResults)
    }
}

/// Resolves the final response mode for one request.
///
/// Selected-text requests are terminal: classification never touches them.
/// A generation failure downgrades a classified `Full` to `RetrievalOnly`
/// when retrieved content exists to show.
pub fn resolve_mode(
    selected_text_present: bool,
    generation_errored: bool,
    tool_results: &[SearchResult],
    thresholds: &ConfidenceThresholds,
) -> (bool, ResponseMode) {
    if selected_text_present {
        return (false, ResponseMode::SelectedText);
    }

    let (low_confidence, mode) = classify(tool_results, thresholds);
    if generation_errored {
        if tool_results.is_empty() {
            return (low_confidence, ResponseMode::NoResults);
        }
        return (low_confidence, ResponseMode::RetrievalOnly);
    }
    (low_confidence, mode)
}

/// Builds deduplicated citations from captured tool outputs.
///
/// Dedup key is (source_url, chunk_position); the first occurrence wins and
/// insertion order is preserved.
pub fn extract_citations(tool_results: &[SearchResult]) -> Vec<SourceCitation> {
    let mut seen: Vec<(String, u32)> = Vec::new();
    let mut citations = Vec::new();

    for result in tool_results {
        let key = (result.source_url.clone(), result.chunk_position);
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);

        citations.push(SourceCitation {
            source_url: result.source_url.clone(),
            title: result.title.clone(),
            section: result.section.clone(),
            chunk_position: result.chunk_position,
            similarity_score: result.similarity_score,
            snippet: snippet_of(&result.chunk_text),
        });
    }

    citations
}

/// Single citation for a selected-text response, recording the raw length of
/// the caller's selection.
pub fn selected_text_citation(selected_text: &str, relevance_note: &str) -> SelectedTextCitation {
    SelectedTextCitation {
        source_type: "selected_text".to_string(),
        selection_length: selected_text.chars().count(),
        snippet: snippet_of(selected_text),
        relevance_note: relevance_note.to_string(),
    }
}

pub fn citations_for(
    selected_text: Option<&str>,
    tool_results: &[SearchResult],
) -> Vec<Citation> {
    match selected_text {
        Some(text) => vec![Citation::SelectedText(selected_text_citation(
            text,
            "Answer derived from provided selection",
        ))],
        None => extract_citations(tool_results)
            .into_iter()
            .map(Citation::Source)
            .collect(),
    }
}

const SUPPORTED_TOPICS: &str = "\n\nI'm an assistant for the Physical AI & Robotics textbook. I can help you with topics like:\n\
- Robot motion planning and inverse kinematics\n\
- ROS2 fundamentals and navigation\n\
- Simulation with Gazebo and Unity\n\
- NVIDIA Isaac SDK\n\
- Vision-language-action systems\n\
- Sensor fusion and control systems\n\n\
Would you like to ask about any of these topics?";

/// Fallback text when a detailed answer is not obtainable. `None` means no
/// fallback is needed.
pub fn fallback_answer(tool_results: &[SearchResult], error: Option<&str>) -> Option<String> {
    if error.is_some() {
        if tool_results.is_empty() {
            return Some(
                "I'm currently unable to search the textbook. Please try again in a moment."
                    .to_string(),
            );
        }

        let mut sections: Vec<&str> = Vec::new();
        for result in tool_results {
            let section = if result.section.is_empty() {
                "Unknown"
            } else {
                result.section.as_str()
            };
            if !sections.contains(&section) {
                sections.push(section);
            }
            if sections.len() == 3 {
                break;
            }
        }

        return Some(format!(
            "I found relevant content in the following sections: {}. \
             However, I'm currently unable to generate a detailed response. \
             Please check the sources below for the information you need.",
            sections.join(", ")
        ));
    }

    if tool_results.is_empty() {
        return Some(format!(
            "I couldn't find relevant information in the textbook to answer your question.{}",
            SUPPORTED_TOPICS
        ));
    }

    None
}

fn snippet_of(text: &str) -> String {
    let head: String = text.chars().take(SNIPPET_MAX_CHARS).collect();
    let head = head.trim();

    if text.chars().count() <= SNIPPET_MAX_CHARS {
        return head.to_string();
    }

    // Truncated: end with the ellipsis while staying within the cap.
    let mut snippet: String = head
        .chars()
        .take(SNIPPET_MAX_CHARS - ELLIPSIS.len())
        .collect();
    snippet.truncate(snippet.trim_end().len());
    snippet.push_str(ELLIPSIS);
    snippet
}
