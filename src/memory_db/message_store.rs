//! Message Store: CRUD over tiered messages, with pooled-connection-
//! per-call access, row-mapping helpers, and dynamic `LIKE` query
//! construction for keyword search. Wrapped in `async_trait::async_trait`
//! so callers never block the async runtime on `rusqlite` I/O
//! (`rusqlite::Connection` is not `Send`-safe across an `.await`, so
//! every operation is dispatched via `tokio::task::spawn_blocking`).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use crate::domain::{MemoryStatus, Message, MessageId, NewMessage, Role, SessionId};
use crate::error::{CoreError, CoreResult};

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert(&self, message: NewMessage) -> CoreResult<MessageId>;
    async fn get(&self, id: MessageId) -> CoreResult<Message>;
    async fn list_contextual(&self, session_id: &str, limit: usize) -> CoreResult<Vec<Message>>;
    async fn list_by_status(&self, session_id: &str, status: MemoryStatus) -> CoreResult<Vec<Message>>;
    async fn update_required_tier(&self, id: MessageId, new_level: u8) -> CoreResult<()>;
    async fn update_memory_status(&self, ids: &[MessageId], new_status: MemoryStatus) -> CoreResult<()>;
    async fn update_importance(&self, id: MessageId, delta: i64) -> CoreResult<()>;
    async fn mark_recalled(&self, id: MessageId) -> CoreResult<()>;
    async fn delete_session(&self, session_id: &str) -> CoreResult<()>;
    async fn search_by_keywords(&self, session_id: &str, keywords: &[String], limit: usize) -> CoreResult<Vec<Message>>;
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    let timestamp_str: String = row.get("timestamp")?;
    let timestamp = parse_datetime(&timestamp_str);
    let role: String = row.get("role")?;
    let status: String = row.get("memory_status")?;
    Ok(Message {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        user_id: row.get("user_id")?,
        role: role.parse().unwrap_or(Role::User),
        timestamp,
        content_full: row.get("content_full")?,
        content_medium: row.get("content_medium")?,
        content_short: row.get("content_short")?,
        required_tier: row.get::<_, i64>("required_tier")? as u8,
        memory_status: status.parse().unwrap_or(MemoryStatus::Contextual),
        importance_score: row.get("importance_score")?,
        was_recalled: row.get::<_, i64>("was_recalled")? != 0,
    })
}

fn parse_datetime(s: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub struct SqliteMessageStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SqliteMessageStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| anyhow::anyhow!("failed to get connection from pool: {e}"))
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn insert(&self, message: NewMessage) -> CoreResult<MessageId> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| anyhow::anyhow!("{e}"))?;
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO messages
                 (session_id, user_id, role, timestamp, content_full, content_medium,
                  content_short, required_tier, memory_status, importance_score, was_recalled)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0)",
                params![
                    message.session_id,
                    message.user_id,
                    message.role.as_str(),
                    now,
                    message.content_full,
                    message.content_medium,
                    message.content_short,
                    message.required_tier as i64,
                    message.memory_status.as_str(),
                    message.importance_score,
                ],
            )?;
            Ok::<_, anyhow::Error>(conn.last_insert_rowid())
        })
        .await
        .map_err(|e| CoreError::internal(anyhow::anyhow!("{e}")))?
        .map_err(CoreError::storage)
    }

    async fn get(&self, id: MessageId) -> CoreResult<Message> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| anyhow::anyhow!("{e}"))?;
            let msg = conn
                .query_row("SELECT * FROM messages WHERE id = ?1", params![id], row_to_message)
                .optional()?;
            Ok::<_, anyhow::Error>(msg)
        })
        .await
        .map_err(|e| CoreError::internal(anyhow::anyhow!("{e}")))?
        .map_err(CoreError::storage)?
        .ok_or_else(|| CoreError::NotFound(format!("message {id}")))
    }

    async fn list_contextual(&self, session_id: &str, limit: usize) -> CoreResult<Vec<Message>> {
        let pool = self.pool.clone();
        let session_id = session_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| anyhow::anyhow!("{e}"))?;
            let mut stmt = conn.prepare(
                "SELECT * FROM messages WHERE session_id = ?1 AND memory_status = 'contextual'
                 ORDER BY timestamp DESC, id DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![session_id, limit as i64], row_to_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok::<_, anyhow::Error>(rows)
        })
        .await
        .map_err(|e| CoreError::internal(anyhow::anyhow!("{e}")))?
        .map_err(CoreError::storage)
    }

    async fn list_by_status(&self, session_id: &str, status: MemoryStatus) -> CoreResult<Vec<Message>> {
        let pool = self.pool.clone();
        let session_id = session_id.to_string();
        let status_str = status.as_str();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| anyhow::anyhow!("{e}"))?;
            let mut stmt = conn.prepare(
                "SELECT * FROM messages WHERE session_id = ?1 AND memory_status = ?2
                 ORDER BY timestamp ASC, id ASC",
            )?;
            let rows = stmt
                .query_map(params![session_id, status_str], row_to_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok::<_, anyhow::Error>(rows)
        })
        .await
        .map_err(|e| CoreError::internal(anyhow::anyhow!("{e}")))?
        .map_err(CoreError::storage)
    }

    async fn update_required_tier(&self, id: MessageId, new_level: u8) -> CoreResult<()> {
        let pool = self.pool.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| anyhow::anyhow!("{e}"))?;
            let current: i64 = conn.query_row(
                "SELECT required_tier FROM messages WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )?;
            if (new_level as i64) < current {
                return Ok::<_, anyhow::Error>(false);
            }
            conn.execute(
                "UPDATE messages SET required_tier = ?1 WHERE id = ?2",
                params![new_level as i64, id],
            )?;
            Ok(true)
        })
        .await
        .map_err(|e| CoreError::internal(anyhow::anyhow!("{e}")))?
        .map_err(CoreError::storage)?;

        if !outcome {
            tracing::warn!("tier downgrade attempt on message {id} ignored; higher tier wins");
            return Err(CoreError::Conflict(format!(
                "message {id} already has a required_tier >= {new_level}"
            )));
        }
        Ok(())
    }

    async fn update_memory_status(&self, ids: &[MessageId], new_status: MemoryStatus) -> CoreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let pool = self.pool.clone();
        let ids = ids.to_vec();
        let status_str = new_status.as_str();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| anyhow::anyhow!("{e}"))?;
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare("UPDATE messages SET memory_status = ?1 WHERE id = ?2")?;
                for id in &ids {
                    stmt.execute(params![status_str, id])?;
                }
            }
            tx.commit()?;
            Ok::<_, anyhow::Error>(())
        })
        .await
        .map_err(|e| CoreError::internal(anyhow::anyhow!("{e}")))?
        .map_err(CoreError::storage)
    }

    async fn update_importance(&self, id: MessageId, delta: i64) -> CoreResult<()> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| anyhow::anyhow!("{e}"))?;
            conn.execute(
                "UPDATE messages SET importance_score = MAX(0, importance_score + ?1) WHERE id = ?2",
                params![delta, id],
            )?;
            Ok::<_, anyhow::Error>(())
        })
        .await
        .map_err(|e| CoreError::internal(anyhow::anyhow!("{e}")))?
        .map_err(CoreError::storage)
    }

    async fn mark_recalled(&self, id: MessageId) -> CoreResult<()> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| anyhow::anyhow!("{e}"))?;
            conn.execute("UPDATE messages SET was_recalled = 1 WHERE id = ?1", params![id])?;
            Ok::<_, anyhow::Error>(())
        })
        .await
        .map_err(|e| CoreError::internal(anyhow::anyhow!("{e}")))?
        .map_err(CoreError::storage)
    }

    async fn delete_session(&self, session_id: &str) -> CoreResult<()> {
        let pool = self.pool.clone();
        let session_id = session_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| anyhow::anyhow!("{e}"))?;
            conn.execute("DELETE FROM messages WHERE session_id = ?1", params![session_id])?;
            conn.execute("DELETE FROM episodic_chunks WHERE session_id = ?1", params![session_id])?;
            conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
            Ok::<_, anyhow::Error>(())
        })
        .await
        .map_err(|e| CoreError::internal(anyhow::anyhow!("{e}")))?
        .map_err(CoreError::storage)
    }

    async fn search_by_keywords(&self, session_id: &str, keywords: &[String], limit: usize) -> CoreResult<Vec<Message>> {
        let pool = self.pool.clone();
        let session_id = session_id.to_string();
        let patterns: Vec<String> = keywords.iter().map(|k| format!("%{k}%")).collect();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| anyhow::anyhow!("{e}"))?;
            let mut query = String::from("SELECT * FROM messages WHERE session_id = ?1");
            for _ in &patterns {
                query.push_str(" AND content_full LIKE ?");
            }
            query.push_str(" ORDER BY timestamp DESC LIMIT ?");

            let mut stmt = conn.prepare(&query)?;
            let mut params: Vec<&dyn rusqlite::ToSql> = vec![&session_id];
            for pattern in &patterns {
                params.push(pattern);
            }
            let limit_i64 = limit as i64;
            params.push(&limit_i64);

            let rows = stmt
                .query_map(rusqlite::params_from_iter(params), row_to_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok::<_, anyhow::Error>(rows)
        })
        .await
        .map_err(|e| CoreError::internal(anyhow::anyhow!("{e}")))?
        .map_err(CoreError::storage)
    }
}

/// `DashMap`-backed in-memory store for unit/integration tests.
pub struct InMemoryMessageStore {
    messages: DashMap<MessageId, Message>,
    next_id: std::sync::atomic::AtomicI64,
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self {
            messages: DashMap::new(),
            next_id: std::sync::atomic::AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert(&self, message: NewMessage) -> CoreResult<MessageId> {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let msg = Message {
            id,
            session_id: message.session_id,
            user_id: message.user_id,
            role: message.role,
            timestamp: Utc::now(),
            content_full: message.content_full,
            content_medium: message.content_medium,
            content_short: message.content_short,
            required_tier: message.required_tier,
            memory_status: message.memory_status,
            importance_score: message.importance_score,
            was_recalled: false,
        };
        self.messages.insert(id, msg);
        Ok(id)
    }

    async fn get(&self, id: MessageId) -> CoreResult<Message> {
        self.messages
            .get(&id)
            .map(|m| m.clone())
            .ok_or_else(|| CoreError::NotFound(format!("message {id}")))
    }

    async fn list_contextual(&self, session_id: &str, limit: usize) -> CoreResult<Vec<Message>> {
        let mut msgs: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| m.session_id == session_id && m.memory_status == MemoryStatus::Contextual)
            .map(|m| m.clone())
            .collect();
        msgs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        msgs.truncate(limit);
        Ok(msgs)
    }

    async fn list_by_status(&self, session_id: &str, status: MemoryStatus) -> CoreResult<Vec<Message>> {
        let mut msgs: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| m.session_id == session_id && m.memory_status == status)
            .map(|m| m.clone())
            .collect();
        msgs.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(msgs)
    }

    async fn update_required_tier(&self, id: MessageId, new_level: u8) -> CoreResult<()> {
        let mut entry = self
            .messages
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("message {id}")))?;
        if new_level < entry.required_tier {
            return Err(CoreError::Conflict(format!(
                "message {id} already has a required_tier >= {new_level}"
            )));
        }
        entry.required_tier = new_level;
        Ok(())
    }

    async fn update_memory_status(&self, ids: &[MessageId], new_status: MemoryStatus) -> CoreResult<()> {
        for id in ids {
            if let Some(mut entry) = self.messages.get_mut(id) {
                entry.memory_status = new_status;
            }
        }
        Ok(())
    }

    async fn update_importance(&self, id: MessageId, delta: i64) -> CoreResult<()> {
        if let Some(mut entry) = self.messages.get_mut(&id) {
            entry.importance_score = (entry.importance_score + delta).max(0);
        }
        Ok(())
    }

    async fn mark_recalled(&self, id: MessageId) -> CoreResult<()> {
        if let Some(mut entry) = self.messages.get_mut(&id) {
            entry.was_recalled = true;
        }
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> CoreResult<()> {
        self.messages.retain(|_, m| m.session_id != session_id);
        Ok(())
    }

    async fn search_by_keywords(&self, session_id: &str, keywords: &[String], limit: usize) -> CoreResult<Vec<Message>> {
        let lowered: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
        let mut msgs: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| {
                m.session_id == session_id
                    && lowered.iter().all(|k| m.content_full.to_lowercase().contains(k))
            })
            .map(|m| m.clone())
            .collect();
        msgs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        msgs.truncate(limit);
        Ok(msgs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_message(session_id: &str, full: &str) -> NewMessage {
        NewMessage {
            session_id: session_id.to_string(),
            user_id: "u1".to_string(),
            role: Role::User,
            content_full: full.to_string(),
            content_medium: full.to_string(),
            content_short: full.chars().take(10).collect(),
            required_tier: 1,
            memory_status: MemoryStatus::Contextual,
            importance_score: 0,
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = InMemoryMessageStore::default();
        let id = store.insert(new_message("s1", "hello")).await.unwrap();
        let msg = store.get(id).await.unwrap();
        assert_eq!(msg.content_full, "hello");
        assert_eq!(msg.required_tier, 1);
    }

    #[tokio::test]
    async fn tier_downgrade_is_rejected() {
        let store = InMemoryMessageStore::default();
        let id = store.insert(new_message("s1", "hello")).await.unwrap();
        store.update_required_tier(id, 3).await.unwrap();
        let err = store.update_required_tier(id, 1).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
        let msg = store.get(id).await.unwrap();
        assert_eq!(msg.required_tier, 3);
    }

    #[tokio::test]
    async fn list_contextual_excludes_episodic() {
        let store = InMemoryMessageStore::default();
        let id1 = store.insert(new_message("s1", "a")).await.unwrap();
        let _id2 = store.insert(new_message("s1", "b")).await.unwrap();
        store.update_memory_status(&[id1], MemoryStatus::Episodic).await.unwrap();
        let contextual = store.list_contextual("s1", 10).await.unwrap();
        assert_eq!(contextual.len(), 1);
        assert_eq!(contextual[0].content_full, "b");
    }
}
