//! Tier Manager: a façade over the Message Store handling
//! default short/medium derivation, monotonic tier promotion, episodic
//! demotion, and recall, with `moka::sync::Cache`-backed caching of
//! tier 1/2 content so rendering a contextual window doesn't round-trip
//! to SQLite for every message.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use tracing::warn;

use crate::domain::{MemoryStatus, Message, MessageId, NewMessage, Role, SessionId, UserId};
use crate::error::{CoreError, CoreResult};
use crate::memory_db::MessageStore;

#[derive(Debug, Clone)]
pub struct TierManagerConfig {
    pub tier1_cache_capacity: u64,
    pub tier2_cache_ttl_seconds: u64,
}

impl Default for TierManagerConfig {
    fn default() -> Self {
        Self { tier1_cache_capacity: 2_000, tier2_cache_ttl_seconds: 3_600 }
    }
}

/// Derives the default Tier 1 (short) rendering: the first ~10 words.
fn default_short(full: &str) -> String {
    let words: Vec<&str> = full.split_whitespace().take(10).collect();
    let mut short = words.join(" ");
    if full.split_whitespace().count() > 10 {
        short.push('…');
    }
    short
}

/// Derives the default Tier 2 (medium) rendering: roughly half length.
fn default_medium(full: &str) -> String {
    let target = (full.chars().count() / 2).max(1);
    if full.chars().count() <= target {
        return full.to_string();
    }
    let mut medium: String = full.chars().take(target).collect();
    medium.push('…');
    medium
}

pub struct TierManager {
    store: Arc<dyn MessageStore>,
    tier1_cache: Cache<(SessionId, MessageId), String>,
    tier2_cache: Cache<(SessionId, MessageId), String>,
    pub config: TierManagerConfig,
}

impl TierManager {
    pub fn new(store: Arc<dyn MessageStore>, config: TierManagerConfig) -> Self {
        let tier1_cache = Cache::builder().max_capacity(config.tier1_cache_capacity).build();
        let tier2_cache = Cache::builder()
            .max_capacity(config.tier1_cache_capacity)
            .time_to_live(Duration::from_secs(config.tier2_cache_ttl_seconds))
            .build();
        Self { store, tier1_cache, tier2_cache, config }
    }

    pub async fn store_turn(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        role: Role,
        full: String,
        medium: Option<String>,
        short: Option<String>,
    ) -> CoreResult<MessageId> {
        let short = short.unwrap_or_else(|| default_short(&full));
        let medium = medium.unwrap_or_else(|| default_medium(&full));

        let id = self
            .store
            .insert(NewMessage {
                session_id: session_id.clone(),
                user_id: user_id.clone(),
                role,
                content_full: full,
                content_medium: medium.clone(),
                content_short: short.clone(),
                required_tier: 1,
                memory_status: MemoryStatus::Contextual,
                importance_score: 0,
            })
            .await?;

        self.tier1_cache.insert((session_id.clone(), id), short);
        self.tier2_cache.insert((session_id.clone(), id), medium);
        Ok(id)
    }

    /// Monotonic tier promotion; a downgrade attempt is swallowed with
    /// a warning rather than surfaced to the caller (the `Conflict`
    /// propagation policy for this specific call site).
    pub async fn promote_tier(&self, session_id: &SessionId, id: MessageId, level: u8) -> CoreResult<()> {
        match self.store.update_required_tier(id, level).await {
            Ok(()) => {
                self.tier1_cache.invalidate(&(session_id.clone(), id));
                self.tier2_cache.invalidate(&(session_id.clone(), id));
                Ok(())
            }
            Err(CoreError::Conflict(msg)) => {
                warn!("tier downgrade rejected for message {id}: {msg}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn to_episodic(&self, ids: &[MessageId]) -> CoreResult<()> {
        self.store.update_memory_status(ids, MemoryStatus::Episodic).await
    }

    /// Recalls an episodic message back into contextual memory,
    /// forcing tier 3 (full content) and marking it as recalled. A
    /// recalled message's `importance_score` must never drop below 2,
    /// so the usual +1 bump is topped up to reach the
    /// floor when the message starts below it.
    pub async fn recall(&self, id: MessageId) -> CoreResult<Message> {
        let _ = self.store.update_required_tier(id, 3).await;
        self.store.update_memory_status(&[id], MemoryStatus::Contextual).await?;
        let current = self.store.get(id).await?;
        let delta = if current.importance_score < 2 { 2 - current.importance_score } else { 1 };
        self.store.update_importance(id, delta).await?;
        self.store.mark_recalled(id).await?;
        self.store.get(id).await
    }

    pub async fn list_contextual(&self, session_id: &SessionId, limit: usize) -> CoreResult<Vec<Message>> {
        self.store.list_contextual(session_id, limit).await
    }
}
