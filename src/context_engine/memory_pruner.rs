//! Memory Pruner: at the end of a turn, archives the oldest
//! contextual messages into an episodic chunk once the contextual
//! token ceiling is exceeded, summarizing them through the Episodic
//! Store and demoting them via the Tier Manager.

use std::sync::Arc;

use tracing::info;

use crate::domain::{Message, NewEpisodicChunk, SessionId, Turn, UserId};
use crate::error::CoreResult;
use crate::gateways::llm_gateway::LlmGateway;
use crate::memory_db::EpisodicStore;
use crate::token_estimator;

use super::tier_manager::TierManager;

#[derive(Debug, Clone)]
pub struct MemoryPrunerConfig {
    pub ceiling: usize,
    pub headroom: usize,
    pub floor_messages: usize,
}

impl Default for MemoryPrunerConfig {
    fn default() -> Self {
        Self { ceiling: 30_000, headroom: 5_000, floor_messages: 5 }
    }
}

pub struct MemoryPruner {
    tier_manager: Arc<TierManager>,
    episodic: Arc<dyn EpisodicStore>,
    config: MemoryPrunerConfig,
}

#[derive(Debug, Default)]
pub struct PruneOutcome {
    pub pruned_message_count: usize,
    pub chunk_id: Option<String>,
}

impl MemoryPruner {
    pub fn new(tier_manager: Arc<TierManager>, episodic: Arc<dyn EpisodicStore>, config: MemoryPrunerConfig) -> Self {
        Self { tier_manager, episodic, config }
    }

    pub async fn prune_if_needed(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        llm: &dyn LlmGateway,
    ) -> CoreResult<PruneOutcome> {
        // Floor is in messages, so over-fetch generously for the total estimate.
        let contextual = self.tier_manager.list_contextual(session_id, 10_000).await?;

        let total: usize = contextual.iter().map(|m| token_estimator::estimate(m.content_at_required_tier())).sum();
        if total <= self.config.ceiling {
            return Ok(PruneOutcome::default());
        }

        let need = total - self.config.ceiling + self.config.headroom;

        // `contextual` is newest-first (Tier Manager/Message Store convention);
        // walk oldest-first by reversing.
        let mut oldest_first: Vec<Message> = contextual;
        oldest_first.reverse();

        let max_prunable = oldest_first.len().saturating_sub(self.config.floor_messages);
        let mut collected: Vec<Message> = Vec::new();
        let mut collected_tokens = 0usize;

        for message in oldest_first.into_iter().take(max_prunable) {
            if collected_tokens >= need {
                break;
            }
            collected_tokens += token_estimator::estimate(&message.content_full);
            collected.push(message);
        }

        if collected.is_empty() {
            info!("memory pruner: ceiling exceeded but nothing prunable above the floor for session {session_id}");
            return Ok(PruneOutcome::default());
        }

        let raw_turns = pair_into_turns(&collected);
        let ids: Vec<_> = collected.iter().map(|m| m.id).collect();

        let chunk_id = self
            .episodic
            .archive(
                NewEpisodicChunk { session_id: session_id.clone(), user_id: user_id.clone(), raw_turns },
                llm,
            )
            .await?;

        self.tier_manager.to_episodic(&ids).await?;

        info!("memory pruner: archived {} messages into episodic chunk {chunk_id} for session {session_id}", ids.len());

        Ok(PruneOutcome { pruned_message_count: ids.len(), chunk_id: Some(chunk_id) })
    }
}

/// Pairs consecutive user/assistant messages into `Turn`s. An
/// unpaired trailing message (e.g. a dangling user turn) is paired
/// with itself as both sides so no content is dropped from the
/// archive.
fn pair_into_turns(messages: &[Message]) -> Vec<Turn> {
    let mut turns = Vec::new();
    let mut i = 0;
    while i < messages.len() {
        let current = &messages[i];
        if current.role == crate::domain::Role::User && i + 1 < messages.len() {
            let next = &messages[i + 1];
            turns.push(Turn {
                user_message_id: current.id,
                user_content: current.content_full.clone(),
                assistant_message_id: next.id,
                assistant_content: next.content_full.clone(),
                timestamp: next.timestamp,
            });
            i += 2;
        } else {
            turns.push(Turn {
                user_message_id: current.id,
                user_content: current.content_full.clone(),
                assistant_message_id: current.id,
                assistant_content: String::new(),
                timestamp: current.timestamp,
            });
            i += 1;
        }
    }
    turns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MemoryStatus, Role};
    use chrono::Utc;

    fn msg(id: i64, role: Role, content: &str) -> Message {
        Message {
            id,
            session_id: "s1".to_string(),
            user_id: "u1".to_string(),
            role,
            timestamp: Utc::now(),
            content_full: content.to_string(),
            content_medium: content.to_string(),
            content_short: content.to_string(),
            required_tier: 1,
            memory_status: MemoryStatus::Contextual,
            importance_score: 0,
            was_recalled: false,
        }
    }

    #[test]
    fn pairs_user_then_assistant() {
        let messages = vec![msg(1, Role::User, "hi"), msg(2, Role::Assistant, "hello")];
        let turns = pair_into_turns(&messages);
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].user_content, "hi");
        assert_eq!(turns[0].assistant_content, "hello");
    }

    #[test]
    fn handles_dangling_trailing_message() {
        let messages = vec![msg(1, Role::User, "hi"), msg(2, Role::Assistant, "hello"), msg(3, Role::User, "another question")];
        let turns = pair_into_turns(&messages);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].user_content, "another question");
    }
}
