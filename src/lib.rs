//! Server-side core for a conversational assistant: tiered,
//! budget-bounded conversation memory with directive-driven tool use.
//! The HTTP transport (`server`, `api`, `app_state`, `auth`) is gated
//! behind the `cli` feature; everything else builds headless so the
//! memory/orchestration core can be embedded without pulling in axum.

#[cfg(feature = "cli")]
pub mod api;
#[cfg(feature = "cli")]
pub mod app_state;
#[cfg(feature = "cli")]
pub mod auth;
pub mod config;
pub mod context_engine;
pub mod directive;
pub mod domain;
pub mod error;
pub mod gateways;
pub mod memory_db;
pub mod metrics;
#[cfg(feature = "cli")]
pub mod server;
pub mod telemetry;
pub mod token_estimator;

pub use config::Config;
pub use context_engine::{ConversationOrchestrator, OrchestratorEvent, SessionManager};
pub use domain::{Message, NewMessage, Session};
pub use error::{CoreError, CoreResult};
pub use memory_db::MemoryDatabase;

#[cfg(feature = "cli")]
pub use app_state::AppState;
#[cfg(feature = "cli")]
pub use server::run_server;
