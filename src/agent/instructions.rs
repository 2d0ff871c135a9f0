//! System instructions for the two request modes.

use super::tool::{DEFAULT_SCORE_THRESHOLD, DEFAULT_TOOL_LIMIT, MAX_TOOL_LIMIT, SEARCH_TOOL_NAME};

/// Selections beyond this length are truncated before prompting.
pub const MAX_SELECTED_TEXT_CHARS: usize = 32_000;

const BASE_INSTRUCTIONS: &str = "You are a helpful assistant for the Physical AI & Robotics textbook. \
You help users understand concepts from the book by answering questions accurately and citing sources.

Guidelines:
1. Always use the search tool to find relevant information before answering.
2. Base your answers ONLY on the retrieved content - do not use outside knowledge.
3. When citing sources, mention the section or chapter name.
4. If the retrieved content doesn't contain relevant information, say so honestly.
5. Be concise but thorough in your explanations.
6. If asked about topics outside the book's scope, politely indicate this is a textbook assistant and suggest robotics-related questions.";

const SELECTED_TEXT_INSTRUCTIONS: &str = "You are answering questions about the following selected text ONLY.
Search is disabled for this request.
DO NOT reference information outside this selection.
Base your answer ENTIRELY on the provided text.

If the answer cannot be found in the selected text, respond with:
\"This question cannot be answered from the selected text. The selection discusses [brief summary of what it does discuss].\"

Selected text:
---
{selected_text}
---

Answer questions about this text clearly and concisely.";

/// Instructions for full mode, including the tool-call protocol the runtime
/// parses. One capability is registered: the documentation search.
pub fn full_mode_instructions() -> String {
    format!(
        "{base}

To search the textbook, respond with exactly one JSON object and nothing else:
{{\"type\": \"tool_call\", \"tool_name\": \"{tool}\", \"tool_args\": {{\"query\": \"<search query>\", \"limit\": {limit}, \"score_threshold\": {threshold}, \"source_url_prefix\": null, \"section\": null}}}}
- query: natural language description of what you are looking for (required)
- limit: maximum results, 1-{max_limit} (default {limit})
- score_threshold: minimum similarity score, 0.0-1.0 (default {threshold})
- source_url_prefix: optional URL prefix filter (e.g. \"/docs/module1\")
- section: optional exact section name filter

Tool results will be provided to you. When you have enough information, write \
your final answer as plain prose (no JSON), referencing specific passages \
from the retrieved content.",
        base = BASE_INSTRUCTIONS,
        tool = SEARCH_TOOL_NAME,
        limit = DEFAULT_TOOL_LIMIT,
        max_limit = MAX_TOOL_LIMIT,
        threshold = DEFAULT_SCORE_THRESHOLD,
    )
}

/// Instructions for selected-text mode. The selection is truncated to a
/// fixed ceiling; the search capability is not offered at all.
pub fn selected_text_instructions(selected_text: &str) -> String {
    let truncated: String = selected_text
        .chars()
        .take(MAX_SELECTED_TEXT_CHARS)
        .collect();
    SELECTED_TEXT_INSTRUCTIONS.replace("{selected_text}", &truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_mode_mentions_tool_protocol() {
        let instructions = full_mode_instructions();
        assert!(instructions.contains(SEARCH_TOOL_NAME));
        assert!(instructions.contains("tool_call"));
    }

    #[test]
    fn selected_text_is_embedded_and_truncated() {
        // A character that never appears in the instruction template, so
        // counting it measures only the embedded selection.
        let text = "Ω".repeat(40_000);
        let instructions = selected_text_instructions(&text);
        assert!(instructions.contains(&"Ω".repeat(100)));
        let embedded_len = instructions.matches('Ω').count();
        assert_eq!(embedded_len, MAX_SELECTED_TEXT_CHARS);
        assert!(instructions.contains("cannot be answered from the selected text"));
    }
}
