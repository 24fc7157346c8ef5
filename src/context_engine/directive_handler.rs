//! Directive Handler: executes the directives the Directive
//! Codec extracted from a model reply against the Tier Manager,
//! Episodic Store, and Web Search Gateway, recording whether the turn
//! needs a re-run with enriched context.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::directive::Directive;
use crate::domain::{EpisodicHit, SessionId, Turn, UserId};
use crate::gateways::search_gateway::SearchGateway;
use crate::memory_db::EpisodicStore;

use super::orchestrator::OrchestratorEvent;
use super::tier_manager::TierManager;

#[derive(Default)]
pub struct DirectiveOutcome {
    pub needs_rerun: bool,
    pub events: Vec<OrchestratorEvent>,
    pub episodic_hits: Vec<EpisodicHit>,
    pub fetched_turns: Vec<Turn>,
    pub web_search_results: Option<String>,
}

pub struct DirectiveHandler {
    tier_manager: Arc<TierManager>,
    episodic: Arc<dyn EpisodicStore>,
    search: Arc<dyn SearchGateway>,
}

impl DirectiveHandler {
    pub fn new(tier_manager: Arc<TierManager>, episodic: Arc<dyn EpisodicStore>, search: Arc<dyn SearchGateway>) -> Self {
        Self { tier_manager, episodic, search }
    }

    pub async fn handle(
        &self,
        directives: &[Directive],
        session_id: &SessionId,
        user_id: &UserId,
        episodic_top_k: usize,
        threshold_short: f64,
        threshold_long: f64,
    ) -> DirectiveOutcome {
        let mut outcome = DirectiveOutcome::default();

        // multiple REQUEST_TIER directives for the same message
        // id coalesce to the maximum requested tier.
        let mut tier_requests: HashMap<String, u8> = HashMap::new();
        let wants_deeper = directives.iter().any(|d| matches!(d, Directive::SearchDeeperEpisodic));

        for directive in directives {
            match directive {
                Directive::RequestTier { level, message_id } => {
                    let entry = tier_requests.entry(message_id.clone()).or_insert(0);
                    if *level > *entry {
                        *entry = *level;
                    }
                }
                Directive::SearchEpisodic { query } => {
                    let threshold = if query.split_whitespace().count() <= 2 { threshold_short } else { threshold_long };
                    let mut hits = self
                        .episodic
                        .retrieve(user_id, Some(session_id), query, threshold, episodic_top_k)
                        .await
                        .unwrap_or_default();

                    if hits.is_empty() && wants_deeper {
                        hits = self
                            .episodic
                            .retrieve(user_id, None, query, threshold / 2.0, 10)
                            .await
                            .unwrap_or_default();
                    }

                    if !hits.is_empty() {
                        outcome.needs_rerun = true;
                        outcome.episodic_hits.extend(hits);
                    }
                }
                Directive::SearchDeeperEpisodic => {
                    // Handled alongside SearchEpisodic above; a bare
                    // deeper-search directive with no episodic query is a no-op.
                }
                Directive::Search { query } => {
                    let timestamp = Utc::now();
                    outcome.events.push(OrchestratorEvent::System {
                        id: Uuid::new_v4().to_string(),
                        action: "web_search".to_string(),
                        phase: "active".to_string(),
                        query: Some(query.clone()),
                        content: None,
                        timestamp,
                        session_id: session_id.clone(),
                    });

                    match self.search.search(query, 5).await {
                        Ok(results) => {
                            outcome.events.push(OrchestratorEvent::System {
                                id: Uuid::new_v4().to_string(),
                                action: "web_search".to_string(),
                                phase: "complete".to_string(),
                                query: Some(query.clone()),
                                content: Some(results.clone()),
                                timestamp: Utc::now(),
                                session_id: session_id.clone(),
                            });
                            outcome.web_search_results = Some(results);
                            outcome.needs_rerun = true;
                        }
                        Err(e) => {
                            warn!("web search directive failed: {e}");
                            outcome.events.push(OrchestratorEvent::System {
                                id: Uuid::new_v4().to_string(),
                                action: "web_search".to_string(),
                                phase: "error".to_string(),
                                query: Some(query.clone()),
                                content: Some(e.user_message()),
                                timestamp: Utc::now(),
                                session_id: session_id.clone(),
                            });
                        }
                    }
                }
                Directive::FetchEpisode { chunk_id } => match self.episodic.fetch_raw(chunk_id).await {
                    Ok(turns) => {
                        for turn in &turns {
                            let _ = self.tier_manager.recall(turn.user_message_id).await;
                            let _ = self.tier_manager.recall(turn.assistant_message_id).await;
                        }
                        outcome.fetched_turns.extend(turns);
                        outcome.needs_rerun = true;
                    }
                    Err(e) => warn!("episode fetch directive failed for chunk {chunk_id}: {e}"),
                },
            }
        }

        for (message_id, level) in tier_requests {
            if let Ok(id) = message_id.parse::<i64>() {
                if let Err(e) = self.tier_manager.promote_tier(session_id, id, level).await {
                    warn!("tier promotion failed for message {id}: {e}");
                } else {
                    outcome.needs_rerun = true;
                }
            } else {
                warn!("REQUEST_TIER directive referenced non-numeric message id: {message_id}");
            }
        }

        outcome
    }
}
