//! Shared application state: the one place the HTTP layer reaches
//! into the memory core. Owns the database, gateways, and session
//! manager behind `Arc`s so axum handlers can cheaply `.clone()` the
//! whole struct per request, same shape as the teacher's
//! `shared_state::SharedState` but without the local-model runtime
//! concerns this system has no use for (the LLM lives behind an HTTP
//! gateway, not an in-process runtime).

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::config::Config;
use crate::context_engine::SessionManager;
use crate::gateways::llm_gateway::{HttpLlmGateway, LlmGateway};
use crate::gateways::search_gateway::{HttpSearchGateway, SearchGateway};
use crate::memory_db::MemoryDatabase;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<MemoryDatabase>,
    pub sessions: Arc<SessionManager>,
    pub config: Config,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let db_path = std::path::Path::new(&config.database_path);
        let db = match MemoryDatabase::new(db_path) {
            Ok(db) => {
                info!("memory database opened at {}", db_path.display());
                Arc::new(db)
            }
            Err(e) => {
                warn!("failed to open memory database at {}: {e}. Falling back to in-memory.", db_path.display());
                Arc::new(MemoryDatabase::new_in_memory()?)
            }
        };

        let llm: Arc<dyn LlmGateway> = Arc::new(HttpLlmGateway::new(config.llm_gateway_url.clone()));
        let search: Arc<dyn SearchGateway> = Arc::new(HttpSearchGateway::new(config.search_gateway_url.clone()));
        let sessions = Arc::new(SessionManager::new(Arc::clone(&db), llm, search, config.clone()));

        Ok(Self { db, sessions, config, started_at: Instant::now() })
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
