//! Session Manager: a factory/cache of per-(user, session)
//! orchestrators with idle eviction and per-user concurrency caps.
//! Keyed on `(UserId, SessionId)` in a `DashMap`, with each entry
//! tracking its own `last_activity: Instant`, and a `tokio::sync::Semaphore`
//! per user enforcing the concurrency cap.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{SessionId, UserId};
use crate::error::{CoreError, CoreResult};
use crate::gateways::llm_gateway::LlmGateway;
use crate::gateways::search_gateway::SearchGateway;
use crate::memory_db::MemoryDatabase;
use crate::metrics;

use super::orchestrator::ConversationOrchestrator;

struct OrchestratorEntry {
    orchestrator: Arc<ConversationOrchestrator>,
    last_activity: std::sync::Mutex<Instant>,
    /// Held for the entry's lifetime; counts against the owning user's
    /// concurrency cap and is dropped on eviction/deletion.
    _permit: tokio::sync::OwnedSemaphorePermit,
}

pub struct SessionManager {
    db: Arc<MemoryDatabase>,
    llm: Arc<dyn LlmGateway>,
    search: Arc<dyn SearchGateway>,
    config: Config,
    cache: DashMap<(UserId, SessionId), Arc<OrchestratorEntry>>,
    user_semaphores: DashMap<UserId, Arc<Semaphore>>,
}

impl SessionManager {
    pub fn new(db: Arc<MemoryDatabase>, llm: Arc<dyn LlmGateway>, search: Arc<dyn SearchGateway>, config: Config) -> Self {
        Self {
            db,
            llm,
            search,
            config,
            cache: DashMap::new(),
            user_semaphores: DashMap::new(),
        }
    }

    fn semaphore_for(&self, user_id: &UserId) -> Arc<Semaphore> {
        self.user_semaphores
            .entry(user_id.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_concurrent_sessions_per_user)))
            .clone()
    }

    /// Loads or mints a session's orchestrator. If `session_id` is
    /// absent, mints a UUID v4 session id and persists a new session
    /// row. Updates `last_activity` in the keyed cache either way.
    pub async fn acquire(
        &self,
        user_id: &UserId,
        session_id: Option<SessionId>,
    ) -> CoreResult<(SessionId, Arc<ConversationOrchestrator>)> {
        if let Some(sid) = &session_id {
            let key = (user_id.clone(), sid.clone());
            if let Some(entry) = self.cache.get(&key) {
                *entry.last_activity.lock().unwrap() = Instant::now();
                return Ok((sid.clone(), Arc::clone(&entry.orchestrator)));
            }
        }

        let session_id = match session_id {
            Some(sid) => {
                if self.db.get_session(&sid).map_err(CoreError::storage)?.is_none() {
                    self.db.create_session(&sid, user_id, None).map_err(CoreError::storage)?;
                }
                sid
            }
            None => {
                let sid = Uuid::new_v4().to_string();
                self.db.create_session(&sid, user_id, None).map_err(CoreError::storage)?;
                sid
            }
        };

        let semaphore = self.semaphore_for(user_id);
        let permit = tokio::time::timeout(self.config.session_acquire_timeout, semaphore.acquire_owned())
            .await
            .map_err(|_| {
                CoreError::ResourceExhausted(format!(
                    "user {user_id} already has {} concurrent sessions",
                    self.config.max_concurrent_sessions_per_user
                ))
            })?
            .map_err(|e| CoreError::internal(anyhow::anyhow!("semaphore closed: {e}")))?;

        let orchestrator = Arc::new(ConversationOrchestrator::new(
            session_id.clone(),
            user_id.clone(),
            Arc::clone(&self.db),
            Arc::clone(&self.llm),
            Arc::clone(&self.search),
            self.config.clone(),
        ));

        let entry = Arc::new(OrchestratorEntry {
            orchestrator: Arc::clone(&orchestrator),
            last_activity: std::sync::Mutex::new(Instant::now()),
            _permit: permit,
        });
        self.cache.insert((user_id.clone(), session_id.clone()), entry);
        metrics::inc_session();
        info!("session manager: acquired orchestrator for user={user_id} session={session_id}");

        Ok((session_id, orchestrator))
    }

    /// Removes orchestrators whose last activity is older than
    /// `max_idle`. Underlying persisted data is unaffected; the next
    /// `acquire()` for that session simply rebuilds the orchestrator.
    pub fn evict_idle(&self, max_idle: Duration) {
        let now = Instant::now();
        let stale: Vec<(UserId, SessionId)> = self
            .cache
            .iter()
            .filter(|entry| now.duration_since(*entry.value().last_activity.lock().unwrap()) >= max_idle)
            .map(|entry| entry.key().clone())
            .collect();

        for key in stale {
            if self.cache.remove(&key).is_some() {
                metrics::dec_session();
                info!("session manager: evicted idle orchestrator for user={} session={}", key.0, key.1);
            }
        }
    }

    /// Tears down the in-memory orchestrator if present, then deletes
    /// the session's persisted messages and episodic chunks.
    pub async fn delete(&self, user_id: &UserId, session_id: &SessionId) -> CoreResult<()> {
        if self.cache.remove(&(user_id.clone(), session_id.clone())).is_some() {
            metrics::dec_session();
        }
        self.db.messages.delete_session(session_id).await?;
        self.db.episodic.delete_session(session_id).await?;
        Ok(())
    }

    pub fn active_session_count(&self) -> usize {
        self.cache.len()
    }

    /// Background idle-eviction loop, intended to be spawned once at
    /// startup alongside the HTTP server.
    pub async fn run_eviction_loop(self: Arc<Self>, interval: Duration, max_idle: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.evict_idle(max_idle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::llm_gateway::{CompleteOptions, LlmReply};
    use crate::domain::ChatMessage;
    use async_trait::async_trait;

    struct FakeLlm;
    #[async_trait]
    impl LlmGateway for FakeLlm {
        async fn complete(&self, _messages: &[ChatMessage], _options: CompleteOptions) -> CoreResult<LlmReply> {
            Ok(LlmReply { content: "ok".to_string() })
        }
    }
    struct FakeSearch;
    #[async_trait]
    impl SearchGateway for FakeSearch {
        async fn search(&self, _query: &str, _max_results: usize) -> CoreResult<String> {
            Ok(String::new())
        }
    }

    fn test_manager() -> SessionManager {
        let db = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        SessionManager::new(db, Arc::new(FakeLlm), Arc::new(FakeSearch), Config::default())
    }

    #[tokio::test]
    async fn acquire_mints_session_when_absent() {
        let mgr = test_manager();
        let (sid, _orch) = mgr.acquire(&"u1".to_string(), None).await.unwrap();
        assert!(!sid.is_empty());
        assert_eq!(mgr.active_session_count(), 1);
    }

    #[tokio::test]
    async fn acquire_reuses_cached_orchestrator_for_same_session() {
        let mgr = test_manager();
        let (sid, _) = mgr.acquire(&"u1".to_string(), None).await.unwrap();
        let (sid2, _) = mgr.acquire(&"u1".to_string(), Some(sid.clone())).await.unwrap();
        assert_eq!(sid, sid2);
        assert_eq!(mgr.active_session_count(), 1);
    }

    #[tokio::test]
    async fn delete_removes_cached_orchestrator() {
        let mgr = test_manager();
        let (sid, _) = mgr.acquire(&"u1".to_string(), None).await.unwrap();
        mgr.delete(&"u1".to_string(), &sid).await.unwrap();
        assert_eq!(mgr.active_session_count(), 0);
    }

    #[tokio::test]
    async fn concurrency_cap_rejects_beyond_limit() {
        let mut cfg = Config::default();
        cfg.max_concurrent_sessions_per_user = 1;
        cfg.session_acquire_timeout = Duration::from_millis(50);
        let db = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        let mgr = SessionManager::new(db, Arc::new(FakeLlm), Arc::new(FakeSearch), cfg);

        let (_sid1, _orch1) = mgr.acquire(&"u1".to_string(), None).await.unwrap();
        let err = mgr.acquire(&"u1".to_string(), None).await.unwrap_err();
        assert!(matches!(err, CoreError::ResourceExhausted(_)));
    }
}
