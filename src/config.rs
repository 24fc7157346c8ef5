//! Environment-driven runtime configuration: token budgets, pruning
//! ceilings, timeouts, backpressure limits and gateway URLs. Values are
//! read from the environment (optionally via a `.env` file through
//! `dotenvy`) with sane defaults when unset.

use anyhow::Result;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    /// Context Builder's per-prompt token budget.
    pub context_token_budget: usize,
    /// Contextual token ceiling that triggers pruning.
    pub prune_ceiling: usize,
    /// Minimum pruning headroom once the ceiling is crossed.
    pub prune_headroom: usize,
    /// Floor on retained contextual messages after a prune.
    pub prune_floor_messages: usize,
    /// Maximum directive-triggered reassemble/call-model reruns per turn.
    pub max_reruns: u32,
    /// Episodic retrieval result cap per call.
    pub episodic_top_k: usize,
    /// Episodic retrieval score threshold when `|Q| <= 2`.
    pub episodic_threshold_short_query: f64,
    /// Episodic retrieval score threshold when `|Q| > 2`.
    pub episodic_threshold_long_query: f64,
    /// Per-turn overall latency budget.
    pub turn_timeout: Duration,
    /// Per-network-call timeout for LLM/search gateway requests.
    pub gateway_timeout: Duration,
    /// Session idle eviction threshold.
    pub session_idle_timeout: Duration,
    /// Max concurrent orchestrators per user before new acquisitions fail fast.
    pub max_concurrent_sessions_per_user: usize,
    /// Fail-fast timeout when a user is at their concurrency cap.
    pub session_acquire_timeout: Duration,
    /// Retry attempts for a network/timeout failure calling the LLM gateway.
    pub llm_retry_attempts: u32,
    /// Fixed backoff between LLM gateway retry attempts.
    pub llm_retry_backoff: Duration,
    pub llm_gateway_url: String,
    pub search_gateway_url: String,
    pub database_path: String,
    pub api_host: String,
    pub api_port: u16,
    pub prometheus_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            context_token_budget: 4_000,
            prune_ceiling: 30_000,
            prune_headroom: 5_000,
            prune_floor_messages: 5,
            max_reruns: 2,
            episodic_top_k: 5,
            episodic_threshold_short_query: 0.2,
            episodic_threshold_long_query: 0.1,
            turn_timeout: Duration::from_secs(60),
            gateway_timeout: Duration::from_secs(30),
            session_idle_timeout: Duration::from_secs(3_600),
            max_concurrent_sessions_per_user: 8,
            session_acquire_timeout: Duration::from_secs(5),
            llm_retry_attempts: 3,
            llm_retry_backoff: Duration::from_secs(2),
            llm_gateway_url: "http://127.0.0.1:8081".to_string(),
            search_gateway_url: "http://127.0.0.1:8082".to_string(),
            database_path: "memory.db".to_string(),
            api_host: "0.0.0.0".to_string(),
            api_port: 8080,
            prometheus_port: 9090,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        #[cfg(feature = "cli")]
        {
            if let Err(e) = dotenvy::dotenv() {
                warn!("Failed to load .env file: {}. Using system environment variables.", e);
            } else {
                info!("Loaded environment variables from .env file");
            }
        }

        let defaults = Config::default();
        let cfg = Config {
            context_token_budget: env_usize("CONTEXT_TOKEN_BUDGET", defaults.context_token_budget),
            prune_ceiling: env_usize("PRUNE_CEILING", defaults.prune_ceiling),
            prune_headroom: env_usize("PRUNE_HEADROOM", defaults.prune_headroom),
            prune_floor_messages: env_usize("PRUNE_FLOOR_MESSAGES", defaults.prune_floor_messages),
            max_reruns: env_u32("MAX_RERUNS", defaults.max_reruns),
            episodic_top_k: env_usize("EPISODIC_TOP_K", defaults.episodic_top_k),
            episodic_threshold_short_query: env_f64(
                "EPISODIC_THRESHOLD_SHORT_QUERY",
                defaults.episodic_threshold_short_query,
            ),
            episodic_threshold_long_query: env_f64(
                "EPISODIC_THRESHOLD_LONG_QUERY",
                defaults.episodic_threshold_long_query,
            ),
            turn_timeout: Duration::from_secs(env_u64("TURN_TIMEOUT_SECONDS", defaults.turn_timeout.as_secs())),
            gateway_timeout: Duration::from_secs(env_u64(
                "GATEWAY_TIMEOUT_SECONDS",
                defaults.gateway_timeout.as_secs(),
            )),
            session_idle_timeout: Duration::from_secs(env_u64(
                "SESSION_IDLE_TIMEOUT_SECONDS",
                defaults.session_idle_timeout.as_secs(),
            )),
            max_concurrent_sessions_per_user: env_usize(
                "MAX_CONCURRENT_SESSIONS_PER_USER",
                defaults.max_concurrent_sessions_per_user,
            ),
            session_acquire_timeout: Duration::from_secs(env_u64(
                "SESSION_ACQUIRE_TIMEOUT_SECONDS",
                defaults.session_acquire_timeout.as_secs(),
            )),
            llm_retry_attempts: env_u32("LLM_RETRY_ATTEMPTS", defaults.llm_retry_attempts),
            llm_retry_backoff: Duration::from_secs(env_u64(
                "LLM_RETRY_BACKOFF_SECONDS",
                defaults.llm_retry_backoff.as_secs(),
            )),
            llm_gateway_url: env::var("LLM_GATEWAY_URL").unwrap_or(defaults.llm_gateway_url),
            search_gateway_url: env::var("SEARCH_GATEWAY_URL").unwrap_or(defaults.search_gateway_url),
            database_path: env::var("DATABASE_PATH").unwrap_or(defaults.database_path),
            api_host: env::var("API_HOST").unwrap_or(defaults.api_host),
            api_port: env_u16("API_PORT", defaults.api_port),
            prometheus_port: env_u16("PROMETHEUS_PORT", defaults.prometheus_port),
        };

        Ok(cfg)
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.api_host, self.api_port).parse()?)
    }

    pub fn print_config(&self) {
        info!("Configuration:");
        info!("  context_token_budget = {}", self.context_token_budget);
        info!("  prune_ceiling = {}", self.prune_ceiling);
        info!("  prune_headroom = {}", self.prune_headroom);
        info!("  prune_floor_messages = {}", self.prune_floor_messages);
        info!("  max_reruns = {}", self.max_reruns);
        info!("  turn_timeout = {:?}", self.turn_timeout);
        info!("  session_idle_timeout = {:?}", self.session_idle_timeout);
        info!("  llm_gateway_url = {}", self.llm_gateway_url);
        info!("  search_gateway_url = {}", self.search_gateway_url);
        info!("  database_path = {}", self.database_path);
        info!("  api = {}:{}", self.api_host, self.api_port);
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
fn env_u16(key: &str, default: u16) -> u16 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===== Defaults =====

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.context_token_budget, 4_000);
        assert_eq!(cfg.prune_ceiling, 30_000);
        assert_eq!(cfg.prune_headroom, 5_000);
        assert_eq!(cfg.prune_floor_messages, 5);
        assert_eq!(cfg.max_reruns, 2);
    }

    // ===== Env overrides =====

    #[test]
    fn env_usize_falls_back_on_missing_or_invalid() {
        assert_eq!(env_usize("TIERED_MEMORY_CORE_DOES_NOT_EXIST", 42), 42);
    }

    #[test]
    fn api_addr_parses() {
        let cfg = Config::default();
        assert!(cfg.api_addr().is_ok());
    }
}
