//! Context Builder: assembles the `CONTEXTUAL_MEMORY` prompt
//! section under a hard token budget, preferring higher-tier content
//! and always keeping a chronological suffix of recent turns. Walks
//! candidates newest-first, evicting the lowest-tier currently-included
//! message to make room for a higher-tier one when the budget is tight.

use tracing::debug;

use crate::domain::{EpisodicHit, Message};
use crate::token_estimator;

#[derive(Debug, Clone)]
pub struct ContextBuilderConfig {
    pub token_budget: usize,
}

impl Default for ContextBuilderConfig {
    fn default() -> Self {
        Self { token_budget: 4_000 }
    }
}

pub struct ContextBuilder {
    config: ContextBuilderConfig,
}

struct Candidate {
    message: Message,
    rendered: String,
    tokens: usize,
}

fn render(message: &Message) -> String {
    let content = message.content_at_required_tier();
    if message.required_tier > 1 {
        format!(
            "[id:{} tier:{} role:{} timestamp:{}] {}",
            message.id,
            message.required_tier,
            message.role.as_str(),
            message.timestamp.to_rfc3339(),
            content
        )
    } else {
        format!("{}: {}", message.role.as_str(), content)
    }
}

impl ContextBuilder {
    pub fn new(config: ContextBuilderConfig) -> Self {
        Self { config }
    }

    /// Builds the `CONTEXTUAL_MEMORY` body plus a trailing
    /// `CURRENT_MESSAGE:` line, given contextual messages newest-first,
    /// any episodic hits recalled this turn, and the verbatim current
    /// user input. `preamble_tokens` reserves budget for the prompt preamble the builder does not own.
    pub fn build(
        &self,
        contextual_newest_first: Vec<Message>,
        recalled_episodic: &[EpisodicHit],
        current_user_input: &str,
        preamble_tokens: usize,
    ) -> String {
        let mut remaining = self.config.token_budget.saturating_sub(preamble_tokens);

        let mut candidates: Vec<Candidate> = contextual_newest_first
            .into_iter()
            .map(|message| {
                let rendered = render(&message);
                let tokens = token_estimator::estimate(&rendered);
                Candidate { message, rendered, tokens }
            })
            .collect();

        let mut included: Vec<Candidate> = Vec::new();

        let mut i = 0;
        while i < candidates.len() {
            let candidate = &candidates[i];
            if candidate.tokens <= remaining {
                remaining -= candidate.tokens;
                included.push(candidates.remove(i));
                continue;
            }

            if candidate.message.required_tier > 1 {
                let evict_idx = included
                    .iter()
                    .enumerate()
                    .filter(|(_, inc)| inc.message.required_tier < candidate.message.required_tier)
                    .min_by_key(|(_, inc)| inc.message.required_tier)
                    .map(|(idx, _)| idx);

                if let Some(idx) = evict_idx {
                    let evicted = included.remove(idx);
                    let freed = evicted.tokens;
                    if candidate.tokens <= remaining + freed {
                        remaining = remaining + freed - candidate.tokens;
                        included.push(candidates.remove(i));
                        continue;
                    }
                    // doesn't fit even after eviction; put it back untouched
                    included.insert(idx, evicted);
                }
            }
            i += 1;
        }

        debug!("context builder included {} of the fetched contextual messages", included.len());

        // Chronological order: oldest first.
        included.sort_by(|a, b| a.message.timestamp.cmp(&b.message.timestamp).then(a.message.id.cmp(&b.message.id)));

        let mut out = String::new();
        if !included.is_empty() {
            out.push_str("CONTEXTUAL_MEMORY:\n");
            for candidate in &included {
                out.push_str(&candidate.rendered);
                out.push('\n');
            }
        }

        if !recalled_episodic.is_empty() {
            out.push_str("\nRECALLED_EPISODIC_CONTENT:\n");
            for hit in recalled_episodic {
                out.push_str(&format!("[{}] {}\n", hit.timestamp.to_rfc3339(), hit.summary));
            }
        }

        out.push_str("\nCURRENT_MESSAGE:\n");
        out.push_str(current_user_input);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MemoryStatus, Role};
    use chrono::Utc;

    fn msg(id: i64, tier: u8, content: &str, ts_offset_secs: i64) -> Message {
        Message {
            id,
            session_id: "s1".to_string(),
            user_id: "u1".to_string(),
            role: Role::User,
            timestamp: Utc::now() + chrono::Duration::seconds(ts_offset_secs),
            content_full: content.to_string(),
            content_medium: content.to_string(),
            content_short: content.chars().take(10).collect(),
            required_tier: tier,
            memory_status: MemoryStatus::Contextual,
            importance_score: 0,
            was_recalled: false,
        }
    }

    #[test]
    fn stays_within_budget() {
        let builder = ContextBuilder::new(ContextBuilderConfig { token_budget: 50 });
        let messages = vec![
            msg(3, 1, "third message, newest", 2),
            msg(2, 1, "second message here", 1),
            msg(1, 1, "first message of the conversation was sent a while back and is quite long indeed", 0),
        ];
        let out = builder.build(messages, &[], "hello?", 0);
        assert!(out.contains("CURRENT_MESSAGE"));
        assert!(token_estimator::estimate(&out) <= 50 + token_estimator::estimate("CURRENT_MESSAGE:\nhello?"));
    }

    #[test]
    fn preserves_chronological_order_in_output() {
        let builder = ContextBuilder::new(ContextBuilderConfig { token_budget: 4_000 });
        let messages = vec![msg(2, 1, "second", 1), msg(1, 1, "first", 0)];
        let out = builder.build(messages, &[], "now", 0);
        let first_pos = out.find("first").unwrap();
        let second_pos = out.find("second").unwrap();
        assert!(first_pos < second_pos);
    }

    #[test]
    fn evicts_lower_tier_to_fit_higher_tier_message() {
        let builder = ContextBuilder::new(ContextBuilderConfig { token_budget: 12 });
        let messages = vec![
            msg(2, 3, "a much longer higher tier message that needs room", 1),
            msg(1, 1, "short", 0),
        ];
        let out = builder.build(messages, &[], "hi", 0);
        assert!(out.contains("tier:3"));
    }
}
