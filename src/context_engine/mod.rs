//! Context engine: the tiered-memory components that
//! turn stored messages and a user's latest input into a bounded
//! prompt, execute the directives a model reply asks for, and prune
//! contextual memory back under budget.

pub mod context_builder;
pub mod directive_handler;
pub mod memory_pruner;
pub mod orchestrator;
pub mod prompt_builder;
pub mod session_manager;
pub mod tier_manager;

pub use context_builder::{ContextBuilder, ContextBuilderConfig};
pub use directive_handler::{DirectiveHandler, DirectiveOutcome};
pub use memory_pruner::{MemoryPruner, MemoryPrunerConfig, PruneOutcome};
pub use orchestrator::{ConversationOrchestrator, OrchestratorEvent};
pub use prompt_builder::{PromptBuilder, PromptSections};
pub use session_manager::SessionManager;
pub use tier_manager::{TierManager, TierManagerConfig};
