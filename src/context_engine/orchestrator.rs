//! Conversation Orchestrator: the per-session state machine
//! driving one turn from raw user input to a terminal reply event —
//! Receive, Extract, Assemble, CallModel, Parse, Handle, an optional
//! bounded Reassemble loop, Finalize, Prune, Emit. Built as an
//! `async_stream::stream!`-produced event stream over this crate's
//! store/gateway seams, with a `tokio::sync::Mutex` per session
//! serializing concurrent turns for that session.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_stream::stream;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::directive;
use crate::domain::{ChatMessage, Role, SessionContext, SessionId, UserId};
use crate::error::CoreError;
use crate::gateways::llm_gateway::{CompleteOptions, LlmGateway};
use crate::gateways::search_gateway::SearchGateway;
use crate::memory_db::{FactStore, MemoryDatabase};
use crate::metrics;

use super::context_builder::{ContextBuilder, ContextBuilderConfig};
use super::directive_handler::DirectiveHandler;
use super::memory_pruner::{MemoryPruner, MemoryPrunerConfig};
use super::prompt_builder::{self, PromptBuilder, PromptSections};
use super::tier_manager::{TierManager, TierManagerConfig};

/// One event in the stream a turn produces. Exactly one of `Response`
/// or `Error` terminates the stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// A non-terminal progress notice — a directive being executed
    /// (web search in flight, episode fetched, tier promoted).
    System {
        id: String,
        action: String,
        phase: String,
        query: Option<String>,
        content: Option<String>,
        timestamp: DateTime<Utc>,
        session_id: SessionId,
    },
    /// The terminal, user-visible assistant reply.
    #[serde(rename = "final")]
    Response {
        id: String,
        session_id: SessionId,
        content: String,
        timestamp: DateTime<Utc>,
    },
    /// A terminal failure; no `Response` follows it.
    Error {
        id: String,
        session_id: SessionId,
        #[serde(rename = "error")]
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl OrchestratorEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrchestratorEvent::Response { .. } | OrchestratorEvent::Error { .. })
    }
}

/// Owns one session's tiered-memory facade (Tier Manager, Context
/// Builder, Memory Pruner, Directive Handler) plus the gateways, and
/// serializes turns for that session behind `turn_lock` (a session
/// processes at most one turn at a time).
pub struct ConversationOrchestrator {
    session_id: SessionId,
    user_id: UserId,
    db: Arc<MemoryDatabase>,
    tier_manager: Arc<TierManager>,
    context_builder: ContextBuilder,
    memory_pruner: MemoryPruner,
    directive_handler: DirectiveHandler,
    facts: Arc<dyn FactStore>,
    llm: Arc<dyn LlmGateway>,
    config: Config,
    session_context: Mutex<SessionContext>,
    turn_lock: Mutex<()>,
}

impl ConversationOrchestrator {
    pub fn new(
        session_id: SessionId,
        user_id: UserId,
        db: Arc<MemoryDatabase>,
        llm: Arc<dyn LlmGateway>,
        search: Arc<dyn SearchGateway>,
        config: Config,
    ) -> Self {
        let tier_manager = Arc::new(TierManager::new(Arc::clone(&db.messages), TierManagerConfig::default()));
        let context_builder = ContextBuilder::new(ContextBuilderConfig { token_budget: config.context_token_budget });
        let memory_pruner = MemoryPruner::new(
            Arc::clone(&tier_manager),
            Arc::clone(&db.episodic),
            MemoryPrunerConfig {
                ceiling: config.prune_ceiling,
                headroom: config.prune_headroom,
                floor_messages: config.prune_floor_messages,
            },
        );
        let directive_handler = DirectiveHandler::new(Arc::clone(&tier_manager), Arc::clone(&db.episodic), search);

        Self {
            session_id,
            user_id,
            facts: Arc::clone(&db.facts),
            db,
            tier_manager,
            context_builder,
            memory_pruner,
            directive_handler,
            llm,
            config,
            session_context: Mutex::new(SessionContext::default()),
            turn_lock: Mutex::new(()),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Runs one turn, yielding the orchestrator's event sequence. The returned
    /// stream always ends with exactly one terminal event, even on
    /// error or timeout.
    pub fn process_turn(self: Arc<Self>, user_input: String) -> Pin<Box<dyn Stream<Item = OrchestratorEvent> + Send>> {
        Box::pin(stream! {
            let _turn_guard = self.turn_lock.lock().await;
            let deadline = Instant::now() + self.config.turn_timeout;
            let started = Instant::now();

            // ----- Receive -----
            if let Err(e) = self.db.touch_session(&self.session_id) {
                warn!("failed to touch session {}: {e}", self.session_id);
            }

            let user_message_id = match self
                .tier_manager
                .store_turn(&self.session_id, &self.user_id, Role::User, user_input.clone(), None, None)
                .await
            {
                Ok(id) => id,
                Err(e) => {
                    metrics::inc_turn("error");
                    yield terminal_error(&self.session_id, format!("failed to persist message: {}", e.user_message()));
                    return;
                }
            };

            // ----- Extract (deterministic, forget-command short-circuit) -----
            if let Some(pattern) = crate::memory_db::fact_store::detect_forget_command(&user_input) {
                let removed = self.facts.forget(&self.user_id, &pattern).await.unwrap_or(0);
                let content = if removed > 0 {
                    format!("Understood — I've forgotten what I knew about \"{pattern}\".")
                } else {
                    format!("I didn't have anything stored matching \"{pattern}\".")
                };
                let _ = self
                    .tier_manager
                    .store_turn(&self.session_id, &self.user_id, Role::Assistant, content.clone(), None, None)
                    .await;
                metrics::inc_turn("forget");
                yield terminal_response(&self.session_id, content);
                return;
            }

            let early_facts = crate::memory_db::fact_store::extract_deterministic(&user_input, "");
            if !early_facts.is_empty() {
                let mut merged = self.facts.load(&self.user_id).await.unwrap_or_default();
                merged.extend(early_facts);
                if let Err(e) = self.facts.save(&self.user_id, merged).await {
                    warn!("failed to save deterministic facts early for user {}: {e}", self.user_id);
                }
            }

            // ----- Reassemble loop: Assemble -> CallModel -> Parse -> Handle -----
            let mut episodic_hits = Vec::new();
            let mut web_search_results: Option<String> = None;
            let mut rerun_count: u32 = 0;
            let mut final_reply: Option<String> = None;

            loop {
                if Instant::now() >= deadline {
                    metrics::inc_turn("timeout");
                    yield terminal_error(&self.session_id, CoreError::Cancelled.user_message());
                    return;
                }

                let contextual = match self.tier_manager.list_contextual(&self.session_id, 500).await {
                    Ok(messages) => messages,
                    Err(e) => {
                        metrics::inc_turn("error");
                        yield terminal_error(&self.session_id, format!("failed to load context: {}", e.user_message()));
                        return;
                    }
                };

                let remember_this = self.facts.format(&self.user_id).await.unwrap_or_default();
                let current_summary = self.session_context.lock().await.current_summary.clone();

                let contextual_memory_and_current = self.context_builder.build(
                    contextual,
                    &[],
                    &user_input,
                    prompt_builder::preamble_token_estimate(),
                );

                let prompt = PromptBuilder::build(PromptSections {
                    contextual_memory_and_current,
                    current_summary,
                    episodic_hits: episodic_hits.clone(),
                    web_search_results: web_search_results.clone(),
                    remember_this,
                });

                let remaining = deadline.saturating_duration_since(Instant::now());
                let options = CompleteOptions { timeout: remaining.min(self.config.gateway_timeout), ..CompleteOptions::default() };
                let messages = vec![ChatMessage { role: "user".to_string(), content: prompt }];

                let reply = match call_model_with_retry(self.llm.as_ref(), &messages, options, &self.config, deadline).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        metrics::inc_turn("error");
                        yield terminal_error(&self.session_id, e.user_message());
                        return;
                    }
                };

                let (residual, directives) = directive::parse(&reply.content);
                for directive in &directives {
                    metrics::inc_directive(directive_kind(directive));
                }

                if directives.is_empty() {
                    final_reply = Some(residual);
                    break;
                }

                let outcome = self
                    .directive_handler
                    .handle(
                        &directives,
                        &self.session_id,
                        &self.user_id,
                        self.config.episodic_top_k,
                        self.config.episodic_threshold_short_query,
                        self.config.episodic_threshold_long_query,
                    )
                    .await;

                for event in outcome.events {
                    yield event;
                }
                episodic_hits.extend(outcome.episodic_hits);
                if let Some(results) = outcome.web_search_results {
                    web_search_results = Some(results);
                }

                if !outcome.needs_rerun || rerun_count >= self.config.max_reruns {
                    final_reply = Some(residual);
                    break;
                }

                rerun_count += 1;
                metrics::inc_rerun("directive");
            }

            let final_reply = final_reply.unwrap_or_default();

            // ----- Finalize -----
            let assistant_message_id = match self
                .tier_manager
                .store_turn(&self.session_id, &self.user_id, Role::Assistant, final_reply.clone(), None, None)
                .await
            {
                Ok(id) => id,
                Err(e) => {
                    metrics::inc_turn("error");
                    yield terminal_error(&self.session_id, format!("failed to persist reply: {}", e.user_message()));
                    return;
                }
            };
            info!(
                "turn complete: session={} user_message={} assistant_message={} reruns={}",
                self.session_id, user_message_id, assistant_message_id, rerun_count
            );

            {
                let mut ctx = self.session_context.lock().await;
                ctx.current_summary = roll_summary(&ctx.current_summary, &user_input, &final_reply);
            }

            match self.facts.extract(&user_input, &final_reply, self.llm.as_ref()).await {
                Ok(facts) => {
                    if let Err(e) = self.facts.save(&self.user_id, facts).await {
                        warn!("failed to save extracted facts for user {}: {e}", self.user_id);
                    }
                }
                Err(e) => warn!("fact extraction failed for user {}: {e}", self.user_id),
            }

            // ----- Prune -----
            match self.memory_pruner.prune_if_needed(&self.session_id, &self.user_id, self.llm.as_ref()).await {
                Ok(outcome) if outcome.chunk_id.is_some() => {
                    metrics::inc_prune("archived");
                    yield OrchestratorEvent::System {
                        id: Uuid::new_v4().to_string(),
                        action: "memory_prune".to_string(),
                        phase: "complete".to_string(),
                        query: None,
                        content: outcome.chunk_id,
                        timestamp: Utc::now(),
                        session_id: self.session_id.clone(),
                    };
                }
                Ok(_) => metrics::inc_prune("skipped"),
                Err(e) => {
                    metrics::inc_prune("error");
                    warn!("memory pruner failed for session {}: {e}", self.session_id);
                }
            }

            metrics::inc_turn("ok");
            metrics::observe_turn_latency(started.elapsed().as_secs_f64());

            // ----- Emit -----
            yield terminal_response(&self.session_id, final_reply);
        })
    }
}

/// `CallModel` with the propagation policy's retry: up to
/// `config.llm_retry_attempts` tries with a fixed backoff on
/// `Network`/`Timeout` failures, bounded by the turn's overall
/// deadline. Any other error kind is surfaced immediately.
async fn call_model_with_retry(
    llm: &dyn LlmGateway,
    messages: &[ChatMessage],
    options: CompleteOptions,
    config: &Config,
    deadline: Instant,
) -> Result<crate::gateways::llm_gateway::LlmReply, CoreError> {
    let mut attempt = 0;
    loop {
        match llm.complete(messages, options.clone()).await {
            Ok(reply) => return Ok(reply),
            Err(e @ (CoreError::UpstreamNetwork(_) | CoreError::UpstreamTimeout(_))) => {
                attempt += 1;
                if attempt >= config.llm_retry_attempts || Instant::now() >= deadline {
                    return Err(e);
                }
                warn!("LLM gateway call failed (attempt {attempt}/{}), retrying: {e}", config.llm_retry_attempts);
                tokio::time::sleep(config.llm_retry_backoff.min(deadline.saturating_duration_since(Instant::now()))).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn terminal_response(session_id: &SessionId, content: String) -> OrchestratorEvent {
    OrchestratorEvent::Response {
        id: Uuid::new_v4().to_string(),
        session_id: session_id.clone(),
        content,
        timestamp: Utc::now(),
    }
}

fn terminal_error(session_id: &SessionId, message: String) -> OrchestratorEvent {
    OrchestratorEvent::Error {
        id: Uuid::new_v4().to_string(),
        session_id: session_id.clone(),
        message,
        timestamp: Utc::now(),
    }
}

/// Rolling per-session summary shown to the model as
/// `CURRENT_CONTEXT_SUMMARY`. Deterministic and
/// lightweight rather than a model call — a terse running log of
/// turns, capped so it never grows unbounded across a long session.
const ROLLING_SUMMARY_CAP_CHARS: usize = 800;

fn roll_summary(previous: &str, user_input: &str, assistant_reply: &str) -> String {
    let user_gist: String = user_input.split_whitespace().take(12).collect::<Vec<_>>().join(" ");
    let reply_gist: String = assistant_reply.split_whitespace().take(12).collect::<Vec<_>>().join(" ");
    let mut updated = if previous.is_empty() {
        String::new()
    } else {
        format!("{previous}\n")
    };
    updated.push_str(&format!("User asked about {user_gist}; assistant replied {reply_gist}."));

    if updated.len() > ROLLING_SUMMARY_CAP_CHARS {
        let excess = updated.len() - ROLLING_SUMMARY_CAP_CHARS;
        let cut = updated.char_indices().find(|(i, _)| *i >= excess).map(|(i, _)| i).unwrap_or(updated.len());
        updated = updated[cut..].to_string();
        if let Some(newline) = updated.find('\n') {
            updated = updated[newline + 1..].to_string();
        }
    }
    updated
}

fn directive_kind(directive: &directive::Directive) -> &'static str {
    match directive {
        directive::Directive::RequestTier { .. } => "request_tier",
        directive::Directive::SearchEpisodic { .. } => "search_episodic",
        directive::Directive::Search { .. } => "search",
        directive::Directive::FetchEpisode { .. } => "fetch_episode",
        directive::Directive::SearchDeeperEpisodic => "search_deeper_episodic",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_and_error_are_terminal() {
        let r = terminal_response(&"s1".to_string(), "hi".to_string());
        let e = terminal_error(&"s1".to_string(), "bad".to_string());
        assert!(r.is_terminal());
        assert!(e.is_terminal());
    }

    #[test]
    fn roll_summary_accumulates_and_caps() {
        let s1 = roll_summary("", "What's the weather in Kyoto?", "It's sunny in Kyoto today.");
        assert!(s1.contains("Kyoto"));
        let mut s = s1;
        for _ in 0..100 {
            s = roll_summary(&s, "another long question about many unrelated topics", "another long reply about many unrelated topics");
        }
        assert!(s.len() <= ROLLING_SUMMARY_CAP_CHARS + 200);
    }

    #[test]
    fn system_event_is_not_terminal() {
        let ev = OrchestratorEvent::System {
            id: "1".to_string(),
            action: "web_search".to_string(),
            phase: "active".to_string(),
            query: None,
            content: None,
            timestamp: Utc::now(),
            session_id: "s1".to_string(),
        };
        assert!(!ev.is_terminal());
    }

    struct FlakyLlm {
        failures_remaining: std::sync::atomic::AtomicU32,
    }

    #[async_trait::async_trait]
    impl LlmGateway for FlakyLlm {
        async fn complete(&self, _messages: &[ChatMessage], _options: CompleteOptions) -> Result<crate::gateways::llm_gateway::LlmReply, CoreError> {
            if self.failures_remaining.fetch_sub(1, std::sync::atomic::Ordering::SeqCst) > 0 {
                Err(CoreError::UpstreamNetwork(anyhow::anyhow!("connection reset")))
            } else {
                Ok(crate::gateways::llm_gateway::LlmReply { content: "ok".to_string() })
            }
        }
    }

    #[tokio::test]
    async fn call_model_with_retry_recovers_from_transient_network_errors() {
        let llm = FlakyLlm { failures_remaining: std::sync::atomic::AtomicU32::new(2) };
        let mut config = Config::default();
        config.llm_retry_attempts = 3;
        config.llm_retry_backoff = std::time::Duration::from_millis(1);
        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        let reply = call_model_with_retry(&llm, &[], CompleteOptions::default(), &config, deadline).await.unwrap();
        assert_eq!(reply.content, "ok");
    }

    #[tokio::test]
    async fn call_model_with_retry_exhausts_after_configured_attempts() {
        let llm = FlakyLlm { failures_remaining: std::sync::atomic::AtomicU32::new(10) };
        let mut config = Config::default();
        config.llm_retry_attempts = 3;
        config.llm_retry_backoff = std::time::Duration::from_millis(1);
        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        let err = call_model_with_retry(&llm, &[], CompleteOptions::default(), &config, deadline).await.unwrap_err();
        assert!(matches!(err, CoreError::UpstreamNetwork(_)));
    }
}
