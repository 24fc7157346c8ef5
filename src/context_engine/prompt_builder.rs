//! Prompt Builder: assembles the final prompt body sent to the
//! LLM Gateway from the Context Builder's output, the running summary,
//! episodic search results, web search results, and the user's stored
//! facts. Sections are conditionally assembled, added only when their
//! source data is present.

use crate::domain::EpisodicHit;
use crate::token_estimator;

const INSTRUCTION_BLOCK: &str = "\
You are a conversational assistant with tiered memory. Most context below is shown in a \
shortened form; if you need the full detail of something, request it with \
[REQUEST_TIER:<level>:<message_id>] where level is 2 (medium) or 3 (full). \
To search earlier conversations not shown below, use [SEARCH_EPISODIC:<query>]. If that \
search comes back empty and you believe broader history could help, follow it immediately \
with [SEARCH_DEEPER_EPISODIC]. To look something up on the web, use [SEARCH: <query>]. To \
pull a previously archived conversation chunk back into context, use \
[FETCH_EPISODE:<chunk_id>]. Issue these directives on their own line; they will be removed \
from what the user sees. If a CRITICAL CONTEXT persona instruction is present below, \
maintain it consistently until the user says otherwise.";

const AUTHORITATIVE_REMINDER: &str = "\
Where a message above is shown with full or medium detail (tier 2 or 3), treat that content \
as authoritative over any conflicting detail in a summary or earlier shortened rendering.";

#[derive(Default)]
pub struct PromptSections {
    pub contextual_memory_and_current: String,
    pub current_summary: String,
    pub episodic_hits: Vec<EpisodicHit>,
    pub web_search_results: Option<String>,
    pub remember_this: String,
}

pub struct PromptBuilder;

/// Tokens reserved for the parts of the prompt the Context Builder
/// does not own: the instruction block and closing
/// reminder that `PromptBuilder::build` always appends.
pub fn preamble_token_estimate() -> usize {
    token_estimator::estimate(INSTRUCTION_BLOCK) + token_estimator::estimate(AUTHORITATIVE_REMINDER)
}

impl PromptBuilder {
    pub fn build(sections: PromptSections) -> String {
        let mut parts: Vec<String> = vec![INSTRUCTION_BLOCK.to_string()];

        if !sections.contextual_memory_and_current.trim().is_empty() {
            parts.push(sections.contextual_memory_and_current);
        }

        if !sections.current_summary.trim().is_empty() {
            parts.push(format!("CURRENT_CONTEXT_SUMMARY:\n{}", sections.current_summary));
        }

        if !sections.episodic_hits.is_empty() {
            let mut body = String::from("RELATED_PAST_CONVERSATIONS:\n");
            for hit in sections.episodic_hits.iter().take(5) {
                body.push_str(&format!("[{}] ({}) {}\n", hit.chunk_id, hit.timestamp.to_rfc3339(), hit.summary));
            }
            parts.push(body.trim_end().to_string());
        }

        if let Some(results) = sections.web_search_results {
            if !results.trim().is_empty() {
                parts.push(format!("WEB_SEARCH_RESULTS:\n{results}"));
            }
        }

        if !sections.remember_this.trim().is_empty() {
            parts.push(format!("REMEMBER_THIS:\n{}", sections.remember_this));
        }

        parts.push(AUTHORITATIVE_REMINDER.to_string());

        parts.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn omits_empty_sections() {
        let prompt = PromptBuilder::build(PromptSections::default());
        assert!(!prompt.contains("CURRENT_CONTEXT_SUMMARY"));
        assert!(!prompt.contains("RELATED_PAST_CONVERSATIONS"));
        assert!(!prompt.contains("WEB_SEARCH_RESULTS"));
        assert!(!prompt.contains("REMEMBER_THIS"));
        assert!(prompt.contains(INSTRUCTION_BLOCK));
        assert!(prompt.ends_with(AUTHORITATIVE_REMINDER));
    }

    #[test]
    fn includes_present_sections_in_order() {
        let sections = PromptSections {
            contextual_memory_and_current: "CONTEXTUAL_MEMORY:\nuser: hi\n\nCURRENT_MESSAGE:\nhi".to_string(),
            current_summary: "We discussed travel plans.".to_string(),
            episodic_hits: vec![EpisodicHit {
                score: 0.5,
                chunk_id: "chunk-1".to_string(),
                summary: "Talked about Kyoto trip.".to_string(),
                timestamp: Utc::now(),
            }],
            web_search_results: Some("1. Example (https://example.com)".to_string()),
            remember_this: "- User's name is Priya.".to_string(),
        };
        let prompt = PromptBuilder::build(sections);
        let summary_pos = prompt.find("CURRENT_CONTEXT_SUMMARY").unwrap();
        let related_pos = prompt.find("RELATED_PAST_CONVERSATIONS").unwrap();
        let web_pos = prompt.find("WEB_SEARCH_RESULTS").unwrap();
        let remember_pos = prompt.find("REMEMBER_THIS").unwrap();
        assert!(summary_pos < related_pos);
        assert!(related_pos < web_pos);
        assert!(web_pos < remember_pos);
    }
}
