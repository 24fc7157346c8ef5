//! Episodic Store: append-only archive of pruned message chunks
//! with keyword-scored retrieval, built the same pooled-connection-CRUD
//! way as the rest of `memory_db`, using a `|Q∩S|/|Q|` keyword-overlap
//! scoring formula instead of embedding similarity.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use lazy_static::lazy_static;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use regex::Regex;
use rusqlite::params;
use uuid::Uuid;

use crate::domain::{ChunkId, EpisodicChunk, EpisodicHit, NewEpisodicChunk, Turn};
use crate::error::{CoreError, CoreResult};
use crate::gateways::llm_gateway::LlmGateway;

lazy_static! {
    static ref WORD_RE: Regex = Regex::new(r"\w+").unwrap();
}

fn tokenize(text: &str) -> HashSet<String> {
    WORD_RE.find_iter(text).map(|m| m.as_str().to_lowercase()).collect()
}

#[async_trait]
pub trait EpisodicStore: Send + Sync {
    async fn archive(&self, chunk: NewEpisodicChunk, llm: &dyn LlmGateway) -> CoreResult<ChunkId>;
    async fn retrieve(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        query: &str,
        threshold: f64,
        limit: usize,
    ) -> CoreResult<Vec<EpisodicHit>>;
    async fn fetch_raw(&self, chunk_id: &str) -> CoreResult<Vec<Turn>>;
    async fn delete_session(&self, session_id: &str) -> CoreResult<()>;
}

fn raw_turns_text(turns: &[Turn]) -> String {
    let mut text = String::new();
    for turn in turns {
        text.push_str(&turn.user_content);
        text.push(' ');
        text.push_str(&turn.assistant_content);
        text.push(' ');
    }
    text
}

fn summarization_prompt(turns: &[Turn]) -> String {
    let mut body = String::from(
        "Summarize the following conversation excerpt in 3-5 sentences, covering the \
         topics discussed, any decisions made, facts established, and the outcome.\n\n",
    );
    for turn in turns {
        body.push_str(&format!("User: {}\nAssistant: {}\n", turn.user_content, turn.assistant_content));
    }
    body
}

async fn summarize_with_retry(turns: &[Turn], llm: &dyn LlmGateway) -> (String, bool) {
    use crate::domain::ChatMessage;
    use crate::gateways::llm_gateway::CompleteOptions;

    let prompt = summarization_prompt(turns);
    let messages = vec![ChatMessage { role: "user".to_string(), content: prompt }];

    let mut delay = std::time::Duration::from_millis(500);
    for attempt in 0..3 {
        match llm.complete(&messages, CompleteOptions::default()).await {
            Ok(reply) => return (reply.content, false),
            Err(e) => {
                tracing::warn!("episodic summarization attempt {attempt} failed: {e}");
                if attempt < 2 {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }
    ("(summary unavailable)".to_string(), true)
}

pub struct SqliteEpisodicStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SqliteEpisodicStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    async fn list_chunks_for_scope(&self, user_id: &str, session_id: Option<&str>) -> anyhow::Result<Vec<EpisodicChunk>> {
        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        let session_id = session_id.map(|s| s.to_string());
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| anyhow::anyhow!("{e}"))?;
            let (sql, use_session) = match &session_id {
                Some(_) => ("SELECT * FROM episodic_chunks WHERE user_id = ?1 AND session_id = ?2", true),
                None => ("SELECT * FROM episodic_chunks WHERE user_id = ?1", false),
            };
            let mut stmt = conn.prepare(sql)?;
            let map_row = |row: &rusqlite::Row| -> rusqlite::Result<EpisodicChunk> {
                let created_at_str: String = row.get("created_at")?;
                let raw_turns_json: String = row.get("raw_turns")?;
                let raw_turns: Vec<Turn> = serde_json::from_str(&raw_turns_json).unwrap_or_default();
                Ok(EpisodicChunk {
                    id: row.get("id")?,
                    session_id: row.get("session_id")?,
                    user_id: row.get("user_id")?,
                    created_at: chrono::DateTime::parse_from_rfc3339(&created_at_str)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    raw_turns,
                    summary: row.get("summary")?,
                    summary_failed: row.get::<_, i64>("summary_failed")? != 0,
                })
            };
            let rows = if use_session {
                stmt.query_map(params![user_id, session_id.unwrap()], map_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            } else {
                stmt.query_map(params![user_id], map_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            };
            Ok::<_, anyhow::Error>(rows)
        })
        .await?
    }
}

#[async_trait]
impl EpisodicStore for SqliteEpisodicStore {
    async fn archive(&self, chunk: NewEpisodicChunk, llm: &dyn LlmGateway) -> CoreResult<ChunkId> {
        if chunk.raw_turns.is_empty() {
            return Err(CoreError::InvalidInput("episodic chunk must have at least one turn".into()));
        }
        let (summary, summary_failed) = summarize_with_retry(&chunk.raw_turns, llm).await;

        let id = Uuid::new_v4().to_string();
        let pool = self.pool.clone();
        let raw_turns_json = serde_json::to_string(&chunk.raw_turns).map_err(|e| CoreError::internal(e))?;
        let session_id = chunk.session_id.clone();
        let user_id = chunk.user_id.clone();
        let id_for_task = id.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| anyhow::anyhow!("{e}"))?;
            conn.execute(
                "INSERT INTO episodic_chunks (id, session_id, user_id, created_at, raw_turns, summary, summary_failed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id_for_task,
                    session_id,
                    user_id,
                    Utc::now().to_rfc3339(),
                    raw_turns_json,
                    summary,
                    summary_failed as i64,
                ],
            )?;
            Ok::<_, anyhow::Error>(())
        })
        .await
        .map_err(|e| CoreError::internal(anyhow::anyhow!("{e}")))?
        .map_err(CoreError::storage)?;

        Ok(id)
    }

    async fn retrieve(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        query: &str,
        threshold: f64,
        limit: usize,
    ) -> CoreResult<Vec<EpisodicHit>> {
        let query_words = tokenize(query);
        if query_words.is_empty() {
            return Ok(Vec::new());
        }

        let mut chunks = self
            .list_chunks_for_scope(user_id, session_id)
            .await
            .map_err(CoreError::storage)?;        // if the requested session is unknown, search all of the
        // user's sessions.
        if session_id.is_some() && chunks.is_empty() {
            chunks = self.list_chunks_for_scope(user_id, None).await.map_err(CoreError::storage)?;
        }

        let mut hits: Vec<EpisodicHit> = chunks
            .into_iter()
            .filter_map(|chunk| {
                // A failed summarization leaves only the "(summary
                // unavailable)" placeholder, which can never score
                // against a real query. Fall back to the chunk's own
                // raw content so the chunk stays searchable, per the
                // "indexed and searchable via its own content"
                // invariant on episodic chunks.
                let searchable_words = if chunk.summary_failed {
                    tokenize(&raw_turns_text(&chunk.raw_turns))
                } else {
                    tokenize(&chunk.summary)
                };
                let overlap = query_words.intersection(&searchable_words).count();
                let score = overlap as f64 / query_words.len() as f64;
                if score >= threshold {
                    Some(EpisodicHit {
                        score,
                        chunk_id: chunk.id,
                        summary: chunk.summary,
                        timestamp: chunk.created_at,
                    })
                } else {
                    None
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.timestamp.cmp(&a.timestamp))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn fetch_raw(&self, chunk_id: &str) -> CoreResult<Vec<Turn>> {
        let pool = self.pool.clone();
        let chunk_id = chunk_id.to_string();
        let raw = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| anyhow::anyhow!("{e}"))?;
            let raw_json: Option<String> = conn
                .query_row(
                    "SELECT raw_turns FROM episodic_chunks WHERE id = ?1",
                    params![chunk_id],
                    |r| r.get(0),
                )
                .ok();
            Ok::<_, anyhow::Error>(raw_json)
        })
        .await
        .map_err(|e| CoreError::internal(anyhow::anyhow!("{e}")))?
        .map_err(CoreError::storage)?;

        match raw {
            Some(json) => serde_json::from_str(&json).map_err(|e| CoreError::internal(e)),
            None => Err(CoreError::NotFound(format!("episodic chunk {chunk_id}"))),
        }
    }

    async fn delete_session(&self, session_id: &str) -> CoreResult<()> {
        let pool = self.pool.clone();
        let session_id = session_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| anyhow::anyhow!("{e}"))?;
            conn.execute("DELETE FROM episodic_chunks WHERE session_id = ?1", params![session_id])?;
            Ok::<_, anyhow::Error>(())
        })
        .await
        .map_err(|e| CoreError::internal(anyhow::anyhow!("{e}")))?
        .map_err(CoreError::storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_lowercases_and_splits_on_word_boundary() {
        let words = tokenize("Kyoto trip, day-1!");
        assert!(words.contains("kyoto"));
        assert!(words.contains("trip"));
        assert!(words.contains("day"));
        assert!(words.contains("1"));
    }

    #[test]
    fn scoring_formula_matches_spec() {
        let query = tokenize("kyoto trip");
        let summary = tokenize("A trip to Kyoto with great food");
        let score = query.intersection(&summary).count() as f64 / query.len() as f64;
        assert!((score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn raw_turns_text_is_searchable_when_summary_failed() {
        let turns = vec![Turn {
            user_message_id: "m1".to_string(),
            user_content: "What's a good ramen place in Kyoto?".to_string(),
            assistant_message_id: "m2".to_string(),
            assistant_content: "Try the one near the station in Kyoto.".to_string(),
            timestamp: Utc::now(),
        }];
        let query = tokenize("kyoto ramen");
        let searchable = tokenize(&raw_turns_text(&turns));
        let score = query.intersection(&searchable).count() as f64 / query.len() as f64;
        assert!(score >= 0.5);
    }
}
